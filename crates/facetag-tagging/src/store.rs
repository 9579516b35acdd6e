//! Contract of the durable metadata store that owns identities and tags.

use async_trait::async_trait;
use facetag_core::{DescriptorError, FaceDescriptor, FaceTag, IdentityId, IdentityRecord, TagId, TagRect};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("tag {0} not found")]
    TagNotFound(TagId),
    #[error("identity {0} not found")]
    IdentityNotFound(IdentityId),
    #[error("reference descriptors: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("store backend: {0}")]
    Backend(String),
}

/// Durable storage for identities and face tags.
///
/// Tag rectangles are always in percentage-of-image units.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_identities(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    async fn create_identity(&self, name: &str) -> Result<IdentityId, StoreError>;

    async fn rename_identity(&self, identity_id: IdentityId, name: &str) -> Result<(), StoreError>;

    /// Delete an identity. Its tags stay on their photos, unassigned.
    async fn delete_identity(&self, identity_id: IdentityId) -> Result<(), StoreError>;

    /// Replace an identity's serialized reference descriptors.
    async fn update_identity_descriptors(
        &self,
        identity_id: IdentityId,
        descriptors: &str,
    ) -> Result<(), StoreError>;

    /// Add one sample to an identity's reference descriptors as a single
    /// read-modify-write. Returns how many samples are stored afterwards.
    async fn append_identity_descriptor(
        &self,
        identity_id: IdentityId,
        descriptor: &FaceDescriptor,
    ) -> Result<usize, StoreError>;

    /// Persist a tag and return it as stored, identity name included.
    async fn create_tag(
        &self,
        photo_ref: &str,
        rect: TagRect,
        identity_id: Option<IdentityId>,
        confidence: f64,
        is_manual: bool,
    ) -> Result<FaceTag, StoreError>;

    async fn update_tag(
        &self,
        tag_id: TagId,
        rect: TagRect,
        identity_id: Option<IdentityId>,
        confidence: f64,
    ) -> Result<(), StoreError>;

    async fn delete_tag(&self, tag_id: TagId) -> Result<(), StoreError>;

    /// Tags on one photo in creation order, with identity names filled in.
    async fn get_tags_for_photo(&self, photo_ref: &str) -> Result<Vec<FaceTag>, StoreError>;
}
