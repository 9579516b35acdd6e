//! In-memory [`MetadataStore`] for previews and tests.
//!
//! Failures can be queued per operation with [`MemoryStore::fail_next`] to
//! exercise the error paths of callers.

use crate::store::{MetadataStore, StoreError};
use async_trait::async_trait;
use facetag_core::{add_descriptor, deserialize, FaceDescriptor, FaceTag, IdentityId, IdentityRecord, TagId, TagRect};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    GetIdentities,
    CreateIdentity,
    RenameIdentity,
    DeleteIdentity,
    UpdateIdentityDescriptors,
    AppendIdentityDescriptor,
    CreateTag,
    UpdateTag,
    DeleteTag,
    GetTagsForPhoto,
}

#[derive(Default)]
struct Inner {
    identities: Vec<IdentityRecord>,
    tags: Vec<FaceTag>,
    next_identity_id: IdentityId,
    next_tag_id: TagId,
    pending_failures: HashMap<StoreOperation, usize>,
}

impl Inner {
    fn check(&mut self, op: StoreOperation) -> Result<(), StoreError> {
        match self.pending_failures.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(StoreError::Backend(format!("injected failure for {op:?}")))
            }
            _ => Ok(()),
        }
    }

    fn identity_name(&self, id: IdentityId) -> Option<String> {
        self.identities
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.name.clone())
    }

    fn require_identity(&self, id: Option<IdentityId>) -> Result<Option<String>, StoreError> {
        match id {
            Some(id) => self
                .identity_name(id)
                .map(Some)
                .ok_or(StoreError::IdentityNotFound(id)),
            None => Ok(None),
        }
    }

    fn identity_mut(&mut self, id: IdentityId) -> Result<&mut IdentityRecord, StoreError> {
        self.identities
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(StoreError::IdentityNotFound(id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with a backend error.
    pub async fn fail_next(&self, op: StoreOperation, times: usize) {
        *self.inner.lock().await.pending_failures.entry(op).or_default() += times;
    }

    /// Number of tags stored across all photos.
    pub async fn tag_count(&self) -> usize {
        self.inner.lock().await.tags.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::GetIdentities)?;
        let mut identities = inner.identities.clone();
        identities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(identities)
    }

    async fn create_identity(&self, name: &str) -> Result<IdentityId, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::CreateIdentity)?;
        inner.next_identity_id += 1;
        let id = inner.next_identity_id;
        inner.identities.push(IdentityRecord {
            id,
            name: name.to_string(),
            reference_descriptors: None,
            created_at: chrono::Utc::now().timestamp(),
        });
        Ok(id)
    }

    async fn rename_identity(&self, identity_id: IdentityId, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::RenameIdentity)?;
        inner.identity_mut(identity_id)?.name = name.to_string();
        Ok(())
    }

    async fn delete_identity(&self, identity_id: IdentityId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::DeleteIdentity)?;
        inner.identity_mut(identity_id)?;
        inner.identities.retain(|i| i.id != identity_id);
        for tag in inner.tags.iter_mut().filter(|t| t.identity_id == Some(identity_id)) {
            tag.identity_id = None;
        }
        Ok(())
    }

    async fn update_identity_descriptors(
        &self,
        identity_id: IdentityId,
        descriptors: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::UpdateIdentityDescriptors)?;
        inner.identity_mut(identity_id)?.reference_descriptors = Some(descriptors.to_string());
        Ok(())
    }

    async fn append_identity_descriptor(
        &self,
        identity_id: IdentityId,
        descriptor: &FaceDescriptor,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::AppendIdentityDescriptor)?;
        let identity = inner.identity_mut(identity_id)?;
        let text = add_descriptor(identity.reference_descriptors.as_deref(), descriptor)?;
        let count = deserialize(&text)?.len();
        identity.reference_descriptors = Some(text);
        Ok(count)
    }

    async fn create_tag(
        &self,
        photo_ref: &str,
        rect: TagRect,
        identity_id: Option<IdentityId>,
        confidence: f64,
        is_manual: bool,
    ) -> Result<FaceTag, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::CreateTag)?;
        let identity_name = inner.require_identity(identity_id)?;
        inner.next_tag_id += 1;
        let tag = FaceTag {
            id: inner.next_tag_id,
            photo_ref: photo_ref.to_string(),
            rect,
            confidence,
            is_manual,
            identity_id,
            identity_name: None,
            created_at: chrono::Utc::now().timestamp(),
        };
        inner.tags.push(tag.clone());
        Ok(FaceTag { identity_name, ..tag })
    }

    async fn update_tag(
        &self,
        tag_id: TagId,
        rect: TagRect,
        identity_id: Option<IdentityId>,
        confidence: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::UpdateTag)?;
        inner.require_identity(identity_id)?;
        let tag = inner
            .tags
            .iter_mut()
            .find(|t| t.id == tag_id)
            .ok_or(StoreError::TagNotFound(tag_id))?;
        tag.rect = rect;
        tag.identity_id = identity_id;
        tag.confidence = confidence;
        Ok(())
    }

    async fn delete_tag(&self, tag_id: TagId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::DeleteTag)?;
        let before = inner.tags.len();
        inner.tags.retain(|t| t.id != tag_id);
        if inner.tags.len() == before {
            return Err(StoreError::TagNotFound(tag_id));
        }
        Ok(())
    }

    async fn get_tags_for_photo(&self, photo_ref: &str) -> Result<Vec<FaceTag>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check(StoreOperation::GetTagsForPhoto)?;
        let tags = inner
            .tags
            .iter()
            .filter(|t| t.photo_ref == photo_ref)
            .map(|t| FaceTag {
                identity_name: t.identity_id.and_then(|id| inner.identity_name(id)),
                ..t.clone()
            })
            .collect();
        Ok(tags)
    }
}
