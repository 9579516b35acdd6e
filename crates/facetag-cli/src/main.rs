use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facetag_core::{
    deserialize, DetectedFace, Detection, EuclideanMatcher, FaceAnalyzer,
    FaceDescriptor, IdentityId, MatchResult, Matcher, OnnxFaceAnalyzer, Roster,
};
use facetag_store::SqliteMetadataStore;
use facetag_tagging::{MetadataStore, Suggestion, TagViewer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facetag", about = "Face detection, matching and tagging for a photo library")]
struct Cli {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    models: Option<PathBuf>,
    /// Library database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces and print their descriptors
    Detect {
        image: PathBuf,
    },
    /// Detect faces and match each against known descriptors
    Match {
        image: PathBuf,
        /// Inline JSON or a path to a JSON file: [{"id": 1, "descriptors": [[...]]}]
        known_descriptors: String,
    },
    /// List known people
    Identities,
    /// Add a person
    IdentityAdd {
        name: String,
    },
    /// Rename a person
    IdentityRename {
        identity_id: IdentityId,
        name: String,
    },
    /// Delete a person; their tags stay on the photos, unassigned
    IdentityDelete {
        identity_id: IdentityId,
    },
    /// Add the largest face in an image to a person's reference descriptors
    Enroll {
        identity_id: IdentityId,
        image: PathBuf,
    },
    /// List face tags on a photo
    Tags {
        photo_ref: String,
    },
    /// Tag confident matches on a photo and print suggestions for the rest
    Autotag {
        photo_ref: String,
        image: PathBuf,
    },
}

#[derive(Deserialize)]
struct KnownIdentity {
    id: IdentityId,
    descriptors: Vec<Vec<f32>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchView<'a> {
    #[serde(flatten)]
    result: &'a MatchResult,
    should_auto_confirm: bool,
    should_suggest: bool,
}

impl<'a> From<&'a MatchResult> for MatchView<'a> {
    fn from(result: &'a MatchResult) -> Self {
        Self {
            result,
            should_auto_confirm: result.should_auto_confirm(),
            should_suggest: result.should_suggest(),
        }
    }
}

#[derive(Serialize)]
struct FaceMatch<'a> {
    #[serde(flatten)]
    face: &'a DetectedFace,
    #[serde(rename = "match")]
    result: MatchView<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionView<'a> {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    person_id: IdentityId,
    person_name: Option<&'a str>,
    #[serde(rename = "match")]
    result: MatchView<'a>,
}

impl<'a> From<&'a Suggestion> for SuggestionView<'a> {
    fn from(s: &'a Suggestion) -> Self {
        Self {
            x: s.rect.x,
            y: s.rect.y,
            width: s.rect.width,
            height: s.rect.height,
            person_id: s.identity_id,
            person_name: s.identity_name.as_deref(),
            result: MatchView::from(&s.result),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the JSON result only
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(models) = cli.models {
        config.model_dir = models;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match run(cli.command, &config).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("facetag: {e:#}");
            println!("{}", json!({ "success": false, "error": format!("{e:#}") }));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &Config) -> Result<Value> {
    match command {
        Commands::Detect { image } => {
            let detection = analyze_file(config, &image).await?;
            Ok(json!({
                "success": true,
                "faces": detection.faces,
                "imageWidth": detection.image_width,
                "imageHeight": detection.image_height,
            }))
        }
        Commands::Match { image, known_descriptors } => {
            let roster = load_known(&known_descriptors)?;
            let detection = analyze_file(config, &image).await?;
            let matcher = EuclideanMatcher::default();
            let results: Vec<MatchResult> = detection
                .faces
                .iter()
                .map(|face| matcher.best_match(&face.descriptor, &roster))
                .collect();
            let matches: Vec<FaceMatch<'_>> = detection
                .faces
                .iter()
                .zip(&results)
                .map(|(face, result)| FaceMatch { face, result: result.into() })
                .collect();
            Ok(json!({
                "success": true,
                "matches": matches,
                "imageWidth": detection.image_width,
                "imageHeight": detection.image_height,
            }))
        }
        Commands::Identities => {
            let store = open_store(config).await?;
            let identities: Vec<Value> = store
                .get_identities()
                .await?
                .into_iter()
                .map(|identity| {
                    let references = identity
                        .reference_descriptors
                        .as_deref()
                        .and_then(|text| deserialize(text).ok())
                        .map_or(0, |list| list.len());
                    json!({
                        "id": identity.id,
                        "name": identity.name,
                        "referenceCount": references,
                        "createdAt": identity.created_at,
                    })
                })
                .collect();
            Ok(json!({ "success": true, "identities": identities }))
        }
        Commands::IdentityAdd { name } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("identity name must not be empty");
            }
            let store = open_store(config).await?;
            let id = store.create_identity(name).await?;
            Ok(json!({ "success": true, "id": id, "name": name }))
        }
        Commands::IdentityRename { identity_id, name } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("identity name must not be empty");
            }
            let store = open_store(config).await?;
            store.rename_identity(identity_id, name).await?;
            Ok(json!({ "success": true, "id": identity_id, "name": name }))
        }
        Commands::IdentityDelete { identity_id } => {
            let store = open_store(config).await?;
            store.delete_identity(identity_id).await?;
            Ok(json!({ "success": true, "id": identity_id }))
        }
        Commands::Enroll { identity_id, image } => {
            let store = open_store(config).await?;
            if !store.get_identities().await?.iter().any(|i| i.id == identity_id) {
                bail!("identity {identity_id} not found");
            }
            let detection = analyze_file(config, &image).await?;
            let face = largest_face(&detection)
                .with_context(|| format!("no face found in {}", image.display()))?;
            let count = store.append_identity_descriptor(identity_id, &face.descriptor).await?;
            tracing::info!(identity = identity_id, references = count, "face enrolled");
            Ok(json!({
                "success": true,
                "identityId": identity_id,
                "referenceCount": count,
                "boundingBox": face.bounding_box,
            }))
        }
        Commands::Tags { photo_ref } => {
            let store = open_store(config).await?;
            let tags = store.get_tags_for_photo(&photo_ref).await?;
            Ok(json!({ "success": true, "tags": tags }))
        }
        Commands::Autotag { photo_ref, image } => {
            let detection = analyze_file(config, &image).await?;
            let viewer = TagViewer::new(open_store(config).await?);
            viewer.open_photo(&photo_ref).await;
            let applied = viewer.apply_detection(&photo_ref, Ok(detection)).await;
            let suggestions = viewer.suggestions();
            let suggestions: Vec<SuggestionView<'_>> = suggestions.iter().map(Into::into).collect();
            let notices: Vec<String> = viewer.take_notices().into_iter().map(|n| n.message).collect();
            Ok(json!({
                "success": true,
                "applied": applied,
                "suggestions": suggestions,
                "tags": viewer.tags(),
                "notices": notices,
            }))
        }
    }
}

async fn open_store(config: &Config) -> Result<SqliteMetadataStore> {
    SqliteMetadataStore::open(&config.db_path)
        .await
        .with_context(|| format!("cannot open library database {}", config.db_path.display()))
}

/// Read an image and run detection plus embedding off the async runtime.
async fn analyze_file(config: &Config, path: &Path) -> Result<Detection> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let analyzer_config = config.analyzer_config();
    let detection = tokio::task::spawn_blocking(move || {
        OnnxFaceAnalyzer::new(analyzer_config).analyze(&bytes)
    })
    .await??;
    Ok(detection)
}

/// Parse known descriptors given inline or as a file path.
fn load_known(arg: &str) -> Result<Roster> {
    let text = if arg.trim_start().starts_with('[') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("cannot read known descriptors {arg}"))?
    };
    let known: Vec<KnownIdentity> =
        serde_json::from_str(&text).context("known descriptors must be [{\"id\", \"descriptors\"}]")?;

    let mut roster = Roster::default();
    for identity in known {
        for values in identity.descriptors {
            let descriptor = FaceDescriptor::new(values)
                .with_context(|| format!("bad descriptor for identity {}", identity.id))?;
            roster.push(identity.id, descriptor);
        }
    }
    Ok(roster)
}

fn largest_face(detection: &Detection) -> Option<&DetectedFace> {
    detection.faces.iter().max_by(|a, b| {
        let area = |f: &DetectedFace| f.bounding_box.width * f.bounding_box.height;
        area(a).total_cmp(&area(b))
    })
}
