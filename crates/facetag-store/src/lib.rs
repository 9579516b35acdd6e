//! facetag-store — SQLite-backed [`MetadataStore`](facetag_tagging::MetadataStore).

pub mod sqlite;

pub use sqlite::SqliteMetadataStore;
