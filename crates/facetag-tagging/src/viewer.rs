//! Tagging state of one photo viewer.
//!
//! Owns the single draw controller, the tag coordinator, pending match
//! suggestions and user-facing notices. Failures never propagate out of the
//! viewer; they become [`Notice`]s and the photo simply shows fewer tags or
//! suggestions.

use crate::coordinator::{NewTag, TagCoordinator};
use crate::draw::{DisplayGeometry, DrawOutcome, DrawSession, DrawState, PointerEvent, TagDrawController};
use crate::store::MetadataStore;
use facetag_core::{
    plan_face_actions, AnalyzerError, Detection, EuclideanMatcher, FaceAction,
    FaceDescriptor, FaceTag, IdentityId, MatchResult, Matcher, Roster, TagId, TagRect,
};
use std::cell::RefCell;
use std::collections::HashMap;

/// A detected face overlapping an existing tag this much is already tagged.
const DUPLICATE_TAG_IOU: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    TagNotSaved,
    TagNotUpdated,
    TagNotRemoved,
    TagsNotLoaded,
    DetectionFailed,
    ReferenceNotSaved,
}

/// Non-blocking message for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

/// A medium-confidence match offered to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub photo_ref: String,
    pub rect: TagRect,
    pub identity_id: IdentityId,
    pub identity_name: Option<String>,
    pub result: MatchResult,
    pub descriptor: FaceDescriptor,
}

pub struct TagViewer<S, M = EuclideanMatcher> {
    coordinator: TagCoordinator<S>,
    draw: RefCell<TagDrawController>,
    matcher: M,
    suggestions: RefCell<Vec<Suggestion>>,
    notices: RefCell<Vec<Notice>>,
}

impl<S: MetadataStore> TagViewer<S> {
    pub fn new(store: S) -> Self {
        Self::with_matcher(store, EuclideanMatcher::default())
    }
}

impl<S: MetadataStore, M: Matcher> TagViewer<S, M> {
    pub fn with_matcher(store: S, matcher: M) -> Self {
        Self {
            coordinator: TagCoordinator::new(store),
            draw: RefCell::new(TagDrawController::new()),
            matcher,
            suggestions: RefCell::new(Vec::new()),
            notices: RefCell::new(Vec::new()),
        }
    }

    pub fn coordinator(&self) -> &TagCoordinator<S> {
        &self.coordinator
    }

    pub fn current_photo(&self) -> Option<String> {
        self.coordinator.current_photo()
    }

    pub fn tags(&self) -> Vec<FaceTag> {
        self.coordinator.tags()
    }

    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.suggestions.borrow().clone()
    }

    /// Drain pending notices.
    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.borrow_mut())
    }

    fn notify(&self, kind: NoticeKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(?kind, %message, "tagging notice");
        self.notices.borrow_mut().push(Notice { kind, message });
    }

    fn is_current(&self, photo_ref: &str) -> bool {
        self.coordinator.current_photo().as_deref() == Some(photo_ref)
    }

    /// Show `photo_ref`: any draw session and suggestions are dropped, and
    /// the photo's tags are loaded from the store.
    pub async fn open_photo(&self, photo_ref: &str) -> Vec<FaceTag> {
        self.draw.borrow_mut().reset();
        self.suggestions.borrow_mut().clear();
        match self.coordinator.load_tags_for_photo(photo_ref).await {
            Ok(tags) => tags,
            Err(e) => {
                self.notify(NoticeKind::TagsNotLoaded, format!("could not load tags: {e}"));
                Vec::new()
            }
        }
    }

    pub fn close_photo(&self) {
        self.draw.borrow_mut().reset();
        self.suggestions.borrow_mut().clear();
        self.coordinator.close_photo();
    }

    pub fn set_tagging(&self, on: bool) {
        self.draw.borrow_mut().set_tagging(on);
    }

    pub fn is_tagging(&self) -> bool {
        self.draw.borrow().is_tagging()
    }

    pub fn set_display_geometry(&self, geometry: DisplayGeometry) {
        self.draw.borrow_mut().set_display_geometry(geometry);
    }

    pub fn draw_state(&self) -> DrawState {
        self.draw.borrow().state()
    }

    pub fn draw_session(&self) -> Option<DrawSession> {
        self.draw.borrow().session().cloned()
    }

    pub fn cancel_drawing(&self) {
        self.draw.borrow_mut().cancel();
    }

    /// Feed a pointer event to the draw controller; a committed box becomes
    /// a manual tag on the current photo.
    pub async fn handle_pointer(&self, event: PointerEvent) -> Option<FaceTag> {
        let outcome = self.draw.borrow_mut().handle(event);
        let DrawOutcome::Committed(rect) = outcome else {
            return None;
        };
        let photo_ref = self.coordinator.current_photo()?;
        match self.coordinator.create_tag(NewTag::manual(photo_ref, rect)).await {
            Ok(tag) => Some(tag),
            Err(e) => {
                self.notify(NoticeKind::TagNotSaved, format!("tag was not saved: {e}"));
                None
            }
        }
    }

    pub async fn assign_identity(&self, tag_id: TagId, identity_id: IdentityId, name: &str) -> Option<FaceTag> {
        match self.coordinator.assign_identity(tag_id, identity_id, name).await {
            Ok(tag) => Some(tag),
            Err(e) => {
                self.notify(NoticeKind::TagNotUpdated, format!("tag was not updated: {e}"));
                None
            }
        }
    }

    pub async fn remove_tag(&self, tag_id: TagId) -> bool {
        match self.coordinator.remove_tag(tag_id).await {
            Ok(()) => true,
            Err(e) => {
                self.notify(NoticeKind::TagNotRemoved, format!("tag was not removed: {e}"));
                false
            }
        }
    }

    /// Act on an analyzer result for `photo_ref`: high-tier matches are
    /// tagged right away, medium-tier matches become suggestions, the rest
    /// is ignored. Faces already covered by a tag are skipped.
    ///
    /// Returns the tags created automatically.
    pub async fn apply_detection(
        &self,
        photo_ref: &str,
        detection: Result<Detection, AnalyzerError>,
    ) -> Vec<FaceTag> {
        if !self.is_current(photo_ref) {
            tracing::debug!(photo = photo_ref, "discarding detection for a photo no longer shown");
            return Vec::new();
        }
        let detection = match detection {
            Ok(d) => d,
            Err(e) => {
                self.notify(NoticeKind::DetectionFailed, format!("face detection failed: {e}"));
                return Vec::new();
            }
        };
        let identities = match self.coordinator.store().get_identities().await {
            Ok(identities) => identities,
            Err(e) => {
                self.notify(NoticeKind::DetectionFailed, format!("could not load people: {e}"));
                return Vec::new();
            }
        };

        let names: HashMap<IdentityId, String> =
            identities.iter().map(|i| (i.id, i.name.clone())).collect();
        let roster = Roster::from_identities(&identities);
        let plan = plan_face_actions(&self.matcher, &detection.faces, &roster);

        let mut applied = Vec::new();
        for (face, (result, action)) in detection.faces.iter().zip(plan) {
            if !self.is_current(photo_ref) {
                break;
            }
            let Some(identity_id) = result.identity_id else {
                continue;
            };
            if action == FaceAction::Ignore {
                continue;
            }
            let rect = face
                .bounding_box
                .to_percent(detection.image_width, detection.image_height);
            if !rect.is_storable() || self.already_tagged(&rect) {
                continue;
            }
            let name = names.get(&identity_id).cloned();

            if action == FaceAction::AutoApply {
                let new = NewTag::detected(photo_ref, rect, f64::from(result.confidence))
                    .with_identity(identity_id, name);
                match self.coordinator.create_tag(new).await {
                    Ok(tag) => applied.push(tag),
                    Err(e) => self.notify(NoticeKind::TagNotSaved, format!("tag was not saved: {e}")),
                }
            } else {
                self.suggestions.borrow_mut().push(Suggestion {
                    photo_ref: photo_ref.to_string(),
                    rect,
                    identity_id,
                    identity_name: name,
                    result,
                    descriptor: face.descriptor.clone(),
                });
            }
        }

        tracing::info!(
            photo = photo_ref,
            faces = detection.faces.len(),
            auto_applied = applied.len(),
            suggested = self.suggestions.borrow().len(),
            "detection applied"
        );
        applied
    }

    fn already_tagged(&self, rect: &TagRect) -> bool {
        self.coordinator
            .tags()
            .iter()
            .any(|t| t.rect.iou(rect) > DUPLICATE_TAG_IOU)
    }

    /// Tag the suggested face with its identity and keep the face's
    /// descriptor as a new reference sample for that identity.
    pub async fn accept_suggestion(&self, index: usize) -> Option<FaceTag> {
        let suggestion = {
            let mut suggestions = self.suggestions.borrow_mut();
            if index >= suggestions.len() {
                return None;
            }
            suggestions.remove(index)
        };
        if !self.is_current(&suggestion.photo_ref) {
            return None;
        }

        let new = NewTag::detected(
            suggestion.photo_ref.clone(),
            suggestion.rect,
            f64::from(suggestion.result.confidence),
        )
        .with_identity(suggestion.identity_id, suggestion.identity_name.clone());

        match self.coordinator.create_tag(new).await {
            Ok(tag) => {
                self.add_reference_descriptor(suggestion.identity_id, &suggestion.descriptor)
                    .await;
                Some(tag)
            }
            Err(e) => {
                self.notify(NoticeKind::TagNotSaved, format!("tag was not saved: {e}"));
                if self.is_current(&suggestion.photo_ref) {
                    let mut suggestions = self.suggestions.borrow_mut();
                    let at = index.min(suggestions.len());
                    suggestions.insert(at, suggestion);
                }
                None
            }
        }
    }

    pub fn dismiss_suggestion(&self, index: usize) -> Option<Suggestion> {
        let mut suggestions = self.suggestions.borrow_mut();
        (index < suggestions.len()).then(|| suggestions.remove(index))
    }

    /// Append `descriptor` to the identity's rolling reference set.
    pub async fn add_reference_descriptor(&self, identity_id: IdentityId, descriptor: &FaceDescriptor) -> bool {
        match self
            .coordinator
            .store()
            .append_identity_descriptor(identity_id, descriptor)
            .await
        {
            Ok(count) => {
                tracing::info!(identity = identity_id, references = count, "reference descriptor added");
                true
            }
            Err(e) => {
                self.notify(NoticeKind::ReferenceNotSaved, format!("reference sample not saved: {e}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, StoreOperation};
    use crate::store::StoreError;
    use async_trait::async_trait;
    use facetag_core::{deserialize, serialize, BoundingBox, DetectedFace, IdentityRecord, MatchTier};

    /// Store that gives other tasks a turn before every request.
    #[derive(Default)]
    struct YieldingStore {
        inner: MemoryStore,
        /// Tag loads for this photo fail.
        failing_photo: Option<&'static str>,
    }

    #[async_trait]
    impl MetadataStore for YieldingStore {
        async fn get_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
            tokio::task::yield_now().await;
            self.inner.get_identities().await
        }
        async fn create_identity(&self, name: &str) -> Result<IdentityId, StoreError> {
            self.inner.create_identity(name).await
        }
        async fn rename_identity(&self, id: IdentityId, name: &str) -> Result<(), StoreError> {
            self.inner.rename_identity(id, name).await
        }
        async fn delete_identity(&self, id: IdentityId) -> Result<(), StoreError> {
            self.inner.delete_identity(id).await
        }
        async fn update_identity_descriptors(&self, id: IdentityId, d: &str) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.update_identity_descriptors(id, d).await
        }
        async fn append_identity_descriptor(&self, id: IdentityId, d: &FaceDescriptor) -> Result<usize, StoreError> {
            tokio::task::yield_now().await;
            self.inner.append_identity_descriptor(id, d).await
        }
        async fn create_tag(
            &self, photo: &str, rect: TagRect, id: Option<IdentityId>, c: f64, manual: bool,
        ) -> Result<FaceTag, StoreError> {
            tokio::task::yield_now().await;
            self.inner.create_tag(photo, rect, id, c, manual).await
        }
        async fn update_tag(&self, t: TagId, r: TagRect, id: Option<IdentityId>, c: f64) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.update_tag(t, r, id, c).await
        }
        async fn delete_tag(&self, t: TagId) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.delete_tag(t).await
        }
        async fn get_tags_for_photo(&self, photo: &str) -> Result<Vec<FaceTag>, StoreError> {
            tokio::task::yield_now().await;
            if self.failing_photo == Some(photo) {
                return Err(StoreError::Backend(format!("cannot read tags of {photo}")));
            }
            self.inner.get_tags_for_photo(photo).await
        }
    }

    fn d(values: &[f32]) -> FaceDescriptor {
        FaceDescriptor::new(values.to_vec()).unwrap()
    }

    fn face(x: f32, y: f32, values: &[f32]) -> DetectedFace {
        DetectedFace {
            bounding_box: BoundingBox {
                x, y, width: 20.0, height: 20.0, confidence: 0.95, landmarks: None,
            },
            confidence: 0.95,
            descriptor: d(values),
        }
    }

    fn detection(faces: Vec<DetectedFace>) -> Result<Detection, AnalyzerError> {
        Ok(Detection { faces, image_width: 100, image_height: 100 })
    }

    async fn viewer_with_people() -> (TagViewer<MemoryStore>, IdentityId, IdentityId) {
        let store = MemoryStore::new();
        let ada = store.create_identity("Ada").await.unwrap();
        let bob = store.create_identity("Bob").await.unwrap();
        store.update_identity_descriptors(ada, &serialize(&[d(&[0.0, 0.0])]).unwrap()).await.unwrap();
        store.update_identity_descriptors(bob, &serialize(&[d(&[1.0, 1.0])]).unwrap()).await.unwrap();
        let viewer = TagViewer::new(store);
        viewer.set_display_geometry(DisplayGeometry::new(0.0, 0.0, 100.0, 100.0));
        (viewer, ada, bob)
    }

    async fn draw(viewer: &TagViewer<MemoryStore>, from: (f64, f64), to: (f64, f64)) -> Option<FaceTag> {
        viewer.handle_pointer(PointerEvent::down(from.0, from.1)).await;
        viewer.handle_pointer(PointerEvent::moved(to.0, to.1)).await;
        viewer.handle_pointer(PointerEvent::up(to.0, to.1)).await
    }

    #[tokio::test]
    async fn test_drawn_box_becomes_manual_tag() {
        let (viewer, _, _) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;
        viewer.set_tagging(true);

        let tag = draw(&viewer, (10.0, 10.0), (40.0, 40.0)).await.unwrap();
        assert!(tag.is_manual);
        assert_eq!(tag.rect, TagRect { x: 10.0, y: 10.0, width: 30.0, height: 30.0 });
        assert_eq!(viewer.tags(), vec![tag]);
    }

    #[tokio::test]
    async fn test_unsaved_drawn_tag_not_visible() {
        let (viewer, _, _) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;
        viewer.set_tagging(true);
        viewer.coordinator().store().fail_next(StoreOperation::CreateTag, 1).await;

        assert!(draw(&viewer, (10.0, 10.0), (40.0, 40.0)).await.is_none());
        assert!(viewer.tags().is_empty());
        let notices = viewer.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::TagNotSaved);
        assert!(viewer.take_notices().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_resets_draw_and_tags() {
        let (viewer, _, _) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;
        viewer.set_tagging(true);
        draw(&viewer, (10.0, 10.0), (40.0, 40.0)).await.unwrap();

        viewer.handle_pointer(PointerEvent::down(50.0, 50.0)).await;
        viewer.handle_pointer(PointerEvent::up(50.0, 50.0)).await;
        assert_eq!(viewer.draw_state(), DrawState::AwaitingSecondClick);

        viewer.open_photo("b.jpg").await;
        assert_eq!(viewer.draw_state(), DrawState::Idle);
        assert!(viewer.tags().is_empty());
        assert!(viewer.is_tagging());

        assert_eq!(viewer.open_photo("a.jpg").await.len(), 1);
    }

    #[tokio::test]
    async fn test_detection_tiers() {
        let (viewer, ada, bob) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;

        let applied = viewer
            .apply_detection(
                "a.jpg",
                detection(vec![
                    face(10.0, 10.0, &[0.0, 0.0]), // Ada, exact → auto
                    face(50.0, 10.0, &[1.0, 1.3]), // Bob at 0.7 → suggest
                    face(10.0, 60.0, &[5.0, 5.0]), // nobody → ignore
                ]),
            )
            .await;

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].identity_id, Some(ada));
        assert_eq!(applied[0].identity_name.as_deref(), Some("Ada"));
        assert!(!applied[0].is_manual);
        assert_eq!(applied[0].rect, TagRect { x: 10.0, y: 10.0, width: 20.0, height: 20.0 });

        let suggestions = viewer.suggestions();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].identity_id, bob);
        assert_eq!(suggestions[0].result.tier, MatchTier::Medium);
        assert_eq!(viewer.tags().len(), 1);
    }

    #[tokio::test]
    async fn test_detection_failure_shows_nothing() {
        let (viewer, _, _) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;

        let applied = viewer
            .apply_detection("a.jpg", Err(AnalyzerError::Unavailable("det_10g.onnx missing".into())))
            .await;
        assert!(applied.is_empty());
        assert!(viewer.suggestions().is_empty());
        assert_eq!(viewer.take_notices()[0].kind, NoticeKind::DetectionFailed);
    }

    #[tokio::test]
    async fn test_detection_for_other_photo_discarded() {
        let (viewer, _, _) = viewer_with_people().await;
        viewer.open_photo("b.jpg").await;
        let applied = viewer.apply_detection("a.jpg", detection(vec![face(10.0, 10.0, &[0.0, 0.0])])).await;
        assert!(applied.is_empty());
        assert_eq!(viewer.coordinator().store().tag_count().await, 0);
        assert!(viewer.take_notices().is_empty());
    }

    #[tokio::test]
    async fn test_redetection_does_not_duplicate() {
        let (viewer, _, _) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;
        let faces = || detection(vec![face(10.0, 10.0, &[0.0, 0.0])]);

        assert_eq!(viewer.apply_detection("a.jpg", faces()).await.len(), 1);
        viewer.open_photo("a.jpg").await;
        assert!(viewer.apply_detection("a.jpg", faces()).await.is_empty());
        assert_eq!(viewer.tags().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_suggestion_learns_descriptor() {
        let (viewer, _, bob) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;
        viewer.apply_detection("a.jpg", detection(vec![face(50.0, 10.0, &[1.0, 1.3])])).await;

        let tag = viewer.accept_suggestion(0).await.unwrap();
        assert_eq!(tag.identity_id, Some(bob));
        assert!(viewer.suggestions().is_empty());

        let identities = viewer.coordinator().store().get_identities().await.unwrap();
        let bob_refs = identities.iter().find(|i| i.id == bob).unwrap();
        let refs = deserialize(bob_refs.reference_descriptors.as_deref().unwrap()).unwrap();
        assert_eq!(refs, vec![d(&[1.0, 1.0]), d(&[1.0, 1.3])]);
    }

    #[tokio::test]
    async fn test_failed_accept_keeps_suggestion() {
        let (viewer, _, _) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;
        viewer.apply_detection("a.jpg", detection(vec![face(50.0, 10.0, &[1.0, 1.3])])).await;
        viewer.coordinator().store().fail_next(StoreOperation::CreateTag, 1).await;

        assert!(viewer.accept_suggestion(0).await.is_none());
        assert_eq!(viewer.suggestions().len(), 1);
        assert!(viewer.tags().is_empty());
    }

    #[tokio::test]
    async fn test_dismiss_suggestion() {
        let (viewer, _, _) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;
        viewer.apply_detection("a.jpg", detection(vec![face(50.0, 10.0, &[1.0, 1.3])])).await;
        assert!(viewer.dismiss_suggestion(3).is_none());
        assert!(viewer.dismiss_suggestion(0).is_some());
        assert!(viewer.suggestions().is_empty());
    }

    #[tokio::test]
    async fn test_assign_and_remove_report_failures() {
        let (viewer, ada, _) = viewer_with_people().await;
        viewer.open_photo("a.jpg").await;
        viewer.set_tagging(true);
        let tag = draw(&viewer, (10.0, 10.0), (40.0, 40.0)).await.unwrap();

        assert_eq!(viewer.assign_identity(tag.id, ada, "Ada").await.unwrap().identity_id, Some(ada));
        assert!(viewer.remove_tag(tag.id).await);
        assert!(!viewer.remove_tag(tag.id).await);
        assert_eq!(viewer.take_notices()[0].kind, NoticeKind::TagNotRemoved);
    }

    #[tokio::test]
    async fn test_concurrent_feedback_keeps_both_samples() {
        let store = YieldingStore::default();
        let bob = store.create_identity("Bob").await.unwrap();
        store.inner.update_identity_descriptors(bob, &serialize(&[d(&[1.0, 1.0])]).unwrap()).await.unwrap();
        let viewer = TagViewer::new(store);

        let (d1, d2) = (d(&[1.0, 1.3]), d(&[1.3, 1.0]));
        let (first, second) = tokio::join!(
            viewer.add_reference_descriptor(bob, &d1),
            viewer.add_reference_descriptor(bob, &d2)
        );
        assert!(first && second);

        let identities = viewer.coordinator().store().inner.get_identities().await.unwrap();
        let refs = deserialize(identities[0].reference_descriptors.as_deref().unwrap()).unwrap();
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&d(&[1.0, 1.3])));
        assert!(refs.contains(&d(&[1.3, 1.0])));
    }

    #[tokio::test]
    async fn test_failed_load_of_abandoned_photo_is_silent() {
        let store = YieldingStore { failing_photo: Some("a.jpg"), ..Default::default() };
        store.inner.create_tag("b.jpg", TagRect { x: 10.0, y: 10.0, width: 20.0, height: 20.0 }, None, 1.0, true)
            .await
            .unwrap();
        let viewer = TagViewer::new(store);

        // Start loading a.jpg, then switch to b.jpg before the store answers.
        let open_a = viewer.open_photo("a.jpg");
        tokio::pin!(open_a);
        tokio::select! {
            biased;
            _ = &mut open_a => panic!("load finished without yielding"),
            _ = std::future::ready(()) => {}
        }
        let b = viewer.open_photo("b.jpg").await;
        let a = open_a.await;

        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
        assert_eq!(viewer.current_photo().as_deref(), Some("b.jpg"));
        assert_eq!(viewer.tags().len(), 1);
        assert!(viewer.take_notices().is_empty());
    }
}
