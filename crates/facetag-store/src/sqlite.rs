//! SQLite persistence for identities (`people`) and face tags (`face_tags`).
//!
//! All statements run on the `tokio-rusqlite` background thread; closures
//! own their parameters so nothing borrowed crosses the thread boundary.

use async_trait::async_trait;
use facetag_core::{
    add_descriptor, deserialize, FaceDescriptor, FaceTag, IdentityId, IdentityRecord, TagId, TagRect,
};
use facetag_tagging::{MetadataStore, StoreError};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    face_encodings TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS face_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_filename TEXT NOT NULL,
    person_id INTEGER,
    x REAL NOT NULL,
    y REAL NOT NULL,
    width REAL NOT NULL,
    height REAL NOT NULL,
    confidence REAL DEFAULT 1.0,
    is_manual BOOLEAN DEFAULT TRUE,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (person_id) REFERENCES people (id)
);

CREATE INDEX IF NOT EXISTS idx_face_tags_photo_filename ON face_tags (photo_filename);
CREATE INDEX IF NOT EXISTS idx_face_tags_person_id ON face_tags (person_id);
";

const SELECT_TAGS: &str = "
SELECT t.id, t.photo_filename, t.person_id, t.x, t.y, t.width, t.height,
       t.confidence, t.is_manual, t.created_at, p.name
FROM face_tags t
LEFT JOIN people p ON p.id = t.person_id
WHERE t.photo_filename = ?1
ORDER BY t.created_at, t.id
";

fn backend(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn identity_exists(conn: &rusqlite::Connection, id: IdentityId) -> rusqlite::Result<bool> {
    identity_name(conn, id).map(|name| name.is_some())
}

fn identity_name(conn: &rusqlite::Connection, id: IdentityId) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT name FROM people WHERE id = ?1", params![id], |row| row.get(0))
        .optional()
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<FaceTag> {
    Ok(FaceTag {
        id: row.get(0)?,
        photo_ref: row.get(1)?,
        identity_id: row.get(2)?,
        rect: TagRect {
            x: row.get(3)?,
            y: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
        },
        confidence: row.get::<_, Option<f64>>(7)?.unwrap_or(1.0),
        is_manual: row.get::<_, Option<bool>>(8)?.unwrap_or(true),
        created_at: row.get(9)?,
        identity_name: row.get(10)?,
    })
}

/// [`MetadataStore`] over a single SQLite database.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Connection,
}

impl SqliteMetadataStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).await.map_err(backend)?;
        let store = Self::init(conn).await?;
        info!(path = %path.display(), "metadata store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(backend)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(backend)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, face_encodings, created_at FROM people ORDER BY name",
                )?;
                let people = stmt
                    .query_map([], |row| {
                        Ok(IdentityRecord {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            reference_descriptors: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(people)
            })
            .await
            .map_err(backend)
    }

    async fn create_identity(&self, name: &str) -> Result<IdentityId, StoreError> {
        let name = name.to_string();
        let now = chrono::Utc::now().timestamp();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO people (name, created_at) VALUES (?1, ?2)",
                    params![name, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(backend)?;
        info!(identity = id, "identity created");
        Ok(id)
    }

    async fn rename_identity(&self, identity_id: IdentityId, name: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("UPDATE people SET name = ?1 WHERE id = ?2", params![name, identity_id])?)
            })
            .await
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::IdentityNotFound(identity_id));
        }
        info!(identity = identity_id, "identity renamed");
        Ok(())
    }

    async fn delete_identity(&self, identity_id: IdentityId) -> Result<(), StoreError> {
        let (unassigned, deleted) = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let unassigned = tx.execute(
                    "UPDATE face_tags SET person_id = NULL WHERE person_id = ?1",
                    params![identity_id],
                )?;
                let deleted = tx.execute("DELETE FROM people WHERE id = ?1", params![identity_id])?;
                tx.commit()?;
                Ok((unassigned, deleted))
            })
            .await
            .map_err(backend)?;
        if deleted == 0 {
            return Err(StoreError::IdentityNotFound(identity_id));
        }
        info!(identity = identity_id, unassigned, "identity deleted");
        Ok(())
    }

    async fn update_identity_descriptors(
        &self,
        identity_id: IdentityId,
        descriptors: &str,
    ) -> Result<(), StoreError> {
        let descriptors = descriptors.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE people SET face_encodings = ?1 WHERE id = ?2",
                    params![descriptors, identity_id],
                )?)
            })
            .await
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::IdentityNotFound(identity_id));
        }
        Ok(())
    }

    async fn append_identity_descriptor(
        &self,
        identity_id: IdentityId,
        descriptor: &FaceDescriptor,
    ) -> Result<usize, StoreError> {
        let descriptor = descriptor.clone();
        self.conn
            .call(move |conn| {
                // IMMEDIATE takes the write lock before the read.
                let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
                let existing: Option<Option<String>> = tx
                    .query_row(
                        "SELECT face_encodings FROM people WHERE id = ?1",
                        params![identity_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(existing) = existing else {
                    return Ok(Err(StoreError::IdentityNotFound(identity_id)));
                };
                let text = match add_descriptor(existing.as_deref(), &descriptor) {
                    Ok(text) => text,
                    Err(e) => return Ok(Err(e.into())),
                };
                let count = match deserialize(&text) {
                    Ok(list) => list.len(),
                    Err(e) => return Ok(Err(e.into())),
                };
                tx.execute(
                    "UPDATE people SET face_encodings = ?1 WHERE id = ?2",
                    params![text, identity_id],
                )?;
                tx.commit()?;
                Ok(Ok(count))
            })
            .await
            .map_err(backend)?
    }

    async fn create_tag(
        &self,
        photo_ref: &str,
        rect: TagRect,
        identity_id: Option<IdentityId>,
        confidence: f64,
        is_manual: bool,
    ) -> Result<FaceTag, StoreError> {
        let photo_ref = photo_ref.to_string();
        let now = chrono::Utc::now().timestamp();
        self.conn
            .call(move |conn| {
                let identity_name = match identity_id {
                    Some(id) => match identity_name(conn, id)? {
                        Some(name) => Some(name),
                        None => return Ok(Err(StoreError::IdentityNotFound(id))),
                    },
                    None => None,
                };
                conn.execute(
                    "INSERT INTO face_tags
                        (photo_filename, person_id, x, y, width, height, confidence, is_manual, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        &photo_ref,
                        identity_id,
                        rect.x,
                        rect.y,
                        rect.width,
                        rect.height,
                        confidence,
                        is_manual,
                        now
                    ],
                )?;
                Ok(Ok(FaceTag {
                    id: conn.last_insert_rowid(),
                    photo_ref,
                    identity_id,
                    identity_name,
                    rect,
                    confidence,
                    is_manual,
                    created_at: now,
                }))
            })
            .await
            .map_err(backend)?
    }

    async fn update_tag(
        &self,
        tag_id: TagId,
        rect: TagRect,
        identity_id: Option<IdentityId>,
        confidence: f64,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .call(move |conn| {
                if let Some(id) = identity_id {
                    if !identity_exists(conn, id)? {
                        return Ok(Err(StoreError::IdentityNotFound(id)));
                    }
                }
                let changed = conn.execute(
                    "UPDATE face_tags
                     SET person_id = ?1, x = ?2, y = ?3, width = ?4, height = ?5, confidence = ?6
                     WHERE id = ?7",
                    params![
                        identity_id,
                        rect.x,
                        rect.y,
                        rect.width,
                        rect.height,
                        confidence,
                        tag_id
                    ],
                )?;
                Ok(Ok(changed))
            })
            .await
            .map_err(backend)??;
        if changed == 0 {
            return Err(StoreError::TagNotFound(tag_id));
        }
        Ok(())
    }

    async fn delete_tag(&self, tag_id: TagId) -> Result<(), StoreError> {
        let changed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM face_tags WHERE id = ?1", params![tag_id])?))
            .await
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::TagNotFound(tag_id));
        }
        Ok(())
    }

    async fn get_tags_for_photo(&self, photo_ref: &str) -> Result<Vec<FaceTag>, StoreError> {
        let photo_ref = photo_ref.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(SELECT_TAGS)?;
                let tags = stmt
                    .query_map(params![photo_ref], tag_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tags)
            })
            .await
            .map_err(backend)
    }
}
