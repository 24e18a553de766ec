//! Rendering-engine capability
//!
//! The engine is cooperatively single-threaded: it lives on the thread that
//! created it and only advances while that thread calls `pump`. Nothing here
//! requires `Send`; only the factory crosses threads.

use crate::{Config, ContentSize, Margins, SnapshotError, Viewport};
use image::RgbaImage;

/// Coarse document lifecycle as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Uninitialized,
    Loading,
    Loaded,
    Interactive,
    Complete,
}

impl ReadyState {
    /// Map a `document.readyState` value.
    pub fn from_document_state(state: &str) -> Self {
        match state {
            "loading" => ReadyState::Loading,
            "interactive" => ReadyState::Interactive,
            "complete" => ReadyState::Complete,
            _ => ReadyState::Uninitialized,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ReadyState::Complete)
    }
}

/// Notifications delivered while the engine is pumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The document's readiness changed; only reported while observed.
    DocumentReady(ReadyState),
}

/// One hidden, non-interactive rendering surface.
pub trait RenderEngine {
    /// Start loading `url`. Returns once the request is issued, not loaded.
    fn navigate(&mut self, url: &str) -> Result<(), SnapshotError>;

    fn ready_state(&mut self) -> Result<ReadyState, SnapshotError>;

    /// Run one slice of the engine's internal queue. An error here means
    /// navigation itself failed.
    fn pump(&mut self) -> Result<Vec<EngineEvent>, SnapshotError>;

    fn observe_document_ready(&mut self) -> Result<(), SnapshotError>;

    fn stop_observing_document_ready(&mut self);

    /// Body scroll extent, or `None` while the document has no body.
    fn content_size(&mut self) -> Result<Option<ContentSize>, SnapshotError>;

    fn margins(&self) -> Margins;

    fn set_client_size(&mut self, size: Viewport) -> Result<(), SnapshotError>;

    /// Current surface bounds.
    fn bounds(&self) -> Viewport;

    /// Whether the surface has a realized handle it can be drawn from.
    fn has_surface_handle(&self) -> bool;

    /// Draw the surface into `target`, which is sized to `bounds` (min 1x1).
    fn draw_to_raster(&mut self, target: &mut RgbaImage) -> Result<(), SnapshotError>;

    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// Creates engines on the thread that will own them.
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &Config) -> Result<Box<dyn RenderEngine>, SnapshotError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_from_document_state() {
        assert_eq!(ReadyState::from_document_state("loading"), ReadyState::Loading);
        assert_eq!(
            ReadyState::from_document_state("interactive"),
            ReadyState::Interactive
        );
        assert!(ReadyState::from_document_state("complete").is_complete());
        assert_eq!(ReadyState::from_document_state(""), ReadyState::Uninitialized);
        assert!(!ReadyState::Loaded.is_complete());
    }
}
