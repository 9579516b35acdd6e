//! facetag-tagging — Face tags on the photo currently being viewed.
//!
//! The draw controller turns pointer gestures into percentage-space boxes,
//! the coordinator persists tags through a [`MetadataStore`] before showing
//! them, and the viewer ties both to photo navigation and match suggestions.

pub mod coordinator;
pub mod draw;
pub mod memory;
pub mod store;
pub mod viewer;

pub use coordinator::{NewTag, TagCoordinator, TagError};
pub use draw::{
    DisplayGeometry, DrawMode, DrawOutcome, DrawSession, DrawState, PointerEvent, PointerKind,
    PointerTarget, TagDrawController,
};
pub use memory::{MemoryStore, StoreOperation};
pub use store::{MetadataStore, StoreError};
pub use viewer::{Notice, NoticeKind, Suggestion, TagViewer};
