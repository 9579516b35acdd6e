use facetag_core::AnalyzerConfig;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite library database.
    pub db_path: PathBuf,
    /// Minimum SCRFD score for a face to be reported.
    pub detection_threshold: f32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load configuration from `FACETAG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACETAG_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facetag_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facetag");

        let db_path = std::env::var("FACETAG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("library.db"));

        Self {
            model_dir,
            db_path,
            detection_threshold: env_f32("FACETAG_DETECTION_THRESHOLD", 0.5),
            intra_threads: env_usize("FACETAG_INTRA_THREADS", 2),
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            model_dir: self.model_dir.clone(),
            detection_threshold: self.detection_threshold,
            intra_threads: self.intra_threads,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parsing_falls_back() {
        std::env::set_var("FACETAG_TEST_THRESHOLD_OK", "0.7");
        std::env::set_var("FACETAG_TEST_THRESHOLD_BAD", "high");
        assert_eq!(env_f32("FACETAG_TEST_THRESHOLD_OK", 0.5), 0.7);
        assert_eq!(env_f32("FACETAG_TEST_THRESHOLD_BAD", 0.5), 0.5);
        assert_eq!(env_usize("FACETAG_TEST_THREADS_UNSET", 2), 2);
    }

    #[test]
    fn test_analyzer_config_paths() {
        let config = Config {
            model_dir: PathBuf::from("/opt/models"),
            db_path: PathBuf::from("/tmp/library.db"),
            detection_threshold: 0.6,
            intra_threads: 4,
        };
        let analyzer = config.analyzer_config();
        assert_eq!(analyzer.detector_path(), PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(analyzer.recognizer_path(), PathBuf::from("/opt/models/w600k_r50.onnx"));
        assert_eq!(analyzer.intra_threads, 4);
    }
}
