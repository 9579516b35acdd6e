//! Persisted face tags for the photo currently on screen.
//!
//! The store is the source of truth. Every mutation is sent to the store
//! first and applied to the working list only once the store confirms it.
//! Each request remembers which photo was on screen when it was issued;
//! a reply that arrives after the user has navigated away is dropped.

use crate::store::{MetadataStore, StoreError};
use facetag_core::{FaceTag, IdentityId, TagId, TagRect};
use std::cell::RefCell;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("invalid tag geometry: {0:?}")]
    InvalidGeometry(TagRect),
    #[error("tag {0} not found")]
    NotFound(TagId),
    #[error("identity {0} not found")]
    UnknownIdentity(IdentityId),
    #[error("store request failed: {0}")]
    Persistence(String),
}

impl From<StoreError> for TagError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TagNotFound(id) => TagError::NotFound(id),
            StoreError::IdentityNotFound(id) => TagError::UnknownIdentity(id),
            StoreError::Descriptor(e) => TagError::Persistence(e.to_string()),
            StoreError::Backend(msg) => TagError::Persistence(msg),
        }
    }
}

/// A tag to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTag {
    pub photo_ref: String,
    pub rect: TagRect,
    pub identity_id: Option<IdentityId>,
    pub identity_name: Option<String>,
    pub confidence: f64,
    pub is_manual: bool,
}

impl NewTag {
    /// A hand-drawn tag: full confidence, no identity yet.
    pub fn manual(photo_ref: impl Into<String>, rect: TagRect) -> Self {
        Self {
            photo_ref: photo_ref.into(),
            rect,
            identity_id: None,
            identity_name: None,
            confidence: 1.0,
            is_manual: true,
        }
    }

    /// A tag produced by automatic matching.
    pub fn detected(photo_ref: impl Into<String>, rect: TagRect, confidence: f64) -> Self {
        Self {
            confidence,
            is_manual: false,
            ..Self::manual(photo_ref, rect)
        }
    }

    pub fn with_identity(mut self, identity_id: IdentityId, name: Option<String>) -> Self {
        self.identity_id = Some(identity_id);
        self.identity_name = name;
        self
    }
}

/// Snapshot of the navigation context taken when a request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    generation: u64,
    revision: u64,
}

#[derive(Debug, Default)]
struct WorkingSet {
    photo: Option<String>,
    /// Bumped on every navigation.
    generation: u64,
    /// Bumped on every applied local mutation.
    revision: u64,
    tags: Vec<FaceTag>,
    /// Tags removed on this photo since it was opened.
    removed: HashSet<TagId>,
}

impl WorkingSet {
    fn navigate(&mut self, photo: Option<String>) {
        self.photo = photo;
        self.generation += 1;
        self.revision = 0;
        self.tags.clear();
        self.removed.clear();
    }

    fn ticket_for(&self, photo_ref: &str) -> Option<Ticket> {
        (self.photo.as_deref() == Some(photo_ref)).then_some(Ticket {
            generation: self.generation,
            revision: self.revision,
        })
    }

    fn ticket_for_tag(&self, tag_id: TagId) -> Option<(Ticket, FaceTag)> {
        let tag = self.tags.iter().find(|t| t.id == tag_id)?.clone();
        Some((
            Ticket {
                generation: self.generation,
                revision: self.revision,
            },
            tag,
        ))
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        self.generation == ticket.generation
    }
}

/// Mediates between the viewer's working list of tags and the store.
///
/// Runs on the UI thread; methods take `&self` so a new request can start
/// while an earlier one is still waiting on the store.
pub struct TagCoordinator<S> {
    store: S,
    state: RefCell<WorkingSet>,
}

impl<S: MetadataStore> TagCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: RefCell::new(WorkingSet::default()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn current_photo(&self) -> Option<String> {
        self.state.borrow().photo.clone()
    }

    /// Working copy of the current photo's tags.
    pub fn tags(&self) -> Vec<FaceTag> {
        self.state.borrow().tags.clone()
    }

    /// Switch to `photo_ref` with an empty working list. Results still in
    /// flight for the previous photo will be discarded.
    pub fn open_photo(&self, photo_ref: &str) {
        self.state.borrow_mut().navigate(Some(photo_ref.to_string()));
        tracing::debug!(photo = photo_ref, "photo opened");
    }

    pub fn close_photo(&self) {
        self.state.borrow_mut().navigate(None);
    }

    /// Make `photo_ref` current (if it is not already) and populate its tags
    /// from the store.
    ///
    /// When local mutations were applied while the load was in flight, the
    /// loaded list is merged: local versions win and locally removed tags
    /// stay removed. Returns the working list.
    ///
    /// If the user navigated away before the store answered, the answer is
    /// dropped, failures included, and an empty list is returned.
    pub async fn load_tags_for_photo(&self, photo_ref: &str) -> Result<Vec<FaceTag>, TagError> {
        if self.current_photo().as_deref() != Some(photo_ref) {
            self.open_photo(photo_ref);
        }
        let Some(ticket) = self.state.borrow().ticket_for(photo_ref) else {
            return Ok(Vec::new());
        };

        let result = self.store.get_tags_for_photo(photo_ref).await;

        let mut state = self.state.borrow_mut();
        if !state.is_current(ticket) {
            tracing::debug!(
                photo = photo_ref,
                failed = result.is_err(),
                "discarding tag load for a photo no longer shown"
            );
            return Ok(Vec::new());
        }
        let loaded = result?;
        if state.revision == ticket.revision {
            state.tags = loaded;
        } else {
            tracing::debug!(photo = photo_ref, "merging tag load with newer local changes");
            let merged = merge(&state.tags, loaded, &state.removed);
            state.tags = merged;
        }
        Ok(state.tags.clone())
    }

    /// Persist a new tag, then add it to the working list if its photo is
    /// still the one shown.
    pub async fn create_tag(&self, new: NewTag) -> Result<FaceTag, TagError> {
        if !new.rect.is_storable() {
            return Err(TagError::InvalidGeometry(new.rect));
        }
        let ticket = self.state.borrow().ticket_for(&new.photo_ref);

        let stored = self
            .store
            .create_tag(
                &new.photo_ref,
                new.rect,
                new.identity_id,
                new.confidence,
                new.is_manual,
            )
            .await?;

        let id = stored.id;
        let tag = FaceTag {
            identity_name: stored.identity_name.or(new.identity_name),
            ..stored
        };
        tracing::info!(tag = id, photo = %tag.photo_ref, manual = tag.is_manual, "tag created");

        let mut state = self.state.borrow_mut();
        match ticket {
            Some(ticket) if state.is_current(ticket) => {
                state.tags.push(tag.clone());
                state.revision += 1;
            }
            _ => tracing::debug!(tag = id, "created tag belongs to a photo no longer shown"),
        }
        Ok(tag)
    }

    /// Link a tag on the current photo to an identity.
    pub async fn assign_identity(
        &self,
        tag_id: TagId,
        identity_id: IdentityId,
        name: &str,
    ) -> Result<FaceTag, TagError> {
        let (ticket, current) = self
            .state
            .borrow()
            .ticket_for_tag(tag_id)
            .ok_or(TagError::NotFound(tag_id))?;

        self.store
            .update_tag(tag_id, current.rect, Some(identity_id), current.confidence)
            .await?;

        let updated = FaceTag {
            identity_id: Some(identity_id),
            identity_name: Some(name.to_string()),
            ..current
        };

        let mut state = self.state.borrow_mut();
        if state.is_current(ticket) {
            if let Some(slot) = state.tags.iter_mut().find(|t| t.id == tag_id) {
                *slot = updated.clone();
                state.revision += 1;
            }
        } else {
            tracing::debug!(tag = tag_id, "identity assigned on a photo no longer shown");
        }
        Ok(updated)
    }

    /// Delete a tag in the store, then drop it from the working list.
    pub async fn remove_tag(&self, tag_id: TagId) -> Result<(), TagError> {
        let ticket = {
            let state = self.state.borrow();
            Ticket {
                generation: state.generation,
                revision: state.revision,
            }
        };

        self.store.delete_tag(tag_id).await?;
        tracing::info!(tag = tag_id, "tag removed");

        let mut state = self.state.borrow_mut();
        if state.is_current(ticket) {
            state.tags.retain(|t| t.id != tag_id);
            state.removed.insert(tag_id);
            state.revision += 1;
        }
        Ok(())
    }
}

fn merge(local: &[FaceTag], loaded: Vec<FaceTag>, removed: &HashSet<TagId>) -> Vec<FaceTag> {
    let mut merged: Vec<FaceTag> = loaded
        .into_iter()
        .filter(|t| !removed.contains(&t.id))
        .map(|t| local.iter().find(|l| l.id == t.id).cloned().unwrap_or(t))
        .collect();
    for tag in local {
        if !merged.iter().any(|m| m.id == tag.id) {
            merged.push(tag.clone());
        }
    }
    merged
}
