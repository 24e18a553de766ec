//! One page load and one image, inside a render context
//!
//! `RenderSession::run` is the body of the isolated thread that owns the
//! rendering engine. Every stage recovers locally; whatever happens, the
//! engine is cleaned up and the completion signal fires exactly once,
//! after the outcome slot has been filled.

use crate::{
    observed_extent, record_stage_failure, CancelToken, CaptureRequest, CompletionSignal,
    Config, EngineEvent, EngineFactory, ErrorSeverity, FailureKind, PendingDimensions,
    ReadyState, RenderEngine, SnapshotError, Viewport,
};
use image::RgbaImage;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What a render context produced. Written once per capture.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub image: Option<RgbaImage>,
    pub resolved: Viewport,
    pub final_state: ReadyState,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl RenderOutcome {
    fn empty(resolved: Viewport, started: Instant) -> Self {
        Self {
            image: None,
            resolved,
            final_state: ReadyState::Uninitialized,
            cancelled: false,
            elapsed: started.elapsed(),
            captured_at: chrono::Utc::now(),
        }
    }
}

/// Fires the completion signal when the render context unwinds, panics included.
struct SignalOnExit<'a>(&'a CompletionSignal);

impl Drop for SignalOnExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(kind = FailureKind::Termination.as_str(), "Render context panicked");
        }
        if !self.0.set() {
            warn!("Completion signal was already set");
        }
    }
}

/// Owns the engine; deregisters the observer and disposes it on every exit path.
struct Surface {
    engine: Box<dyn RenderEngine>,
}

impl Deref for Surface {
    type Target = dyn RenderEngine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

impl DerefMut for Surface {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.engine.as_mut()
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.engine.stop_observing_document_ready();
        if !self.engine.is_disposed() {
            self.engine.dispose();
        }
        debug!("Rendering surface released");
    }
}

pub struct RenderSession<'a> {
    surface: Surface,
    config: &'a Config,
    cancel: &'a CancelToken,
    pending: PendingDimensions,
}

impl<'a> RenderSession<'a> {
    /// Perform one capture and publish its outcome.
    ///
    /// Must run on the thread that will own the engine: the factory is
    /// invoked here, not by the caller.
    pub fn run(
        factory: &dyn EngineFactory,
        request: &CaptureRequest,
        config: &Config,
        cancel: &CancelToken,
        outcome: &OnceLock<RenderOutcome>,
        signal: &CompletionSignal,
    ) {
        // Declared first so it drops last, after the surface is released.
        let _signal = SignalOnExit(signal);
        let started = Instant::now();

        let engine = match factory.create(config) {
            Ok(engine) => engine,
            Err(e) => {
                error!("Failed to create rendering surface: {}", e);
                let resolved = request.requested().settle(
                    None,
                    config.fallback_viewport,
                    config.max_surface,
                );
                publish(outcome, RenderOutcome::empty(resolved, started));
                return;
            }
        };

        let mut session = RenderSession {
            surface: Surface { engine },
            config,
            cancel,
            pending: request.requested(),
        };

        let result = session.capture(&request.url, started);
        publish(outcome, result);
    }

    fn capture(&mut self, url: &str, started: Instant) -> RenderOutcome {
        if let Err(e) = self.surface.observe_document_ready() {
            log_stage_failure("observing document readiness", &e);
        }

        let navigation = match self.surface.navigate(url) {
            Ok(()) => self
                .pump_for(self.config.navigation_grace)
                .and_then(|()| self.pump_until_ready()),
            Err(e) => Err(e),
        };

        let final_state = match navigation {
            Ok(state) => state,
            Err(e) => {
                log_stage_failure("navigation", &e);
                let resolved = self.settle(None);
                return RenderOutcome::empty(resolved, started);
            }
        };

        if self.cancel.is_cancelled() {
            info!("Capture of {} cancelled; skipping draw", url);
            let resolved = self.settle(None);
            return RenderOutcome {
                final_state,
                cancelled: true,
                ..RenderOutcome::empty(resolved, started)
            };
        }

        let resolved = self.resolve_final_size();
        if let Err(e) = self.surface.set_client_size(resolved) {
            log_stage_failure("applying surface size", &e);
        }

        let image = self.draw();
        if let Some(image) = &image {
            info!(
                "Captured {} at {}x{} ({:?})",
                url,
                image.width(),
                image.height(),
                final_state
            );
        }

        RenderOutcome {
            image,
            resolved,
            final_state,
            cancelled: false,
            elapsed: started.elapsed(),
            captured_at: chrono::Utc::now(),
        }
    }

    /// Pump until the document is complete, the load ceiling passes, or the
    /// capture is cancelled. Errors only for navigation failures.
    fn pump_until_ready(&mut self) -> Result<ReadyState, SnapshotError> {
        let started = Instant::now();
        let mut state = ReadyState::Uninitialized;

        loop {
            if self.cancel.is_cancelled() {
                debug!("Cancellation requested; leaving pump loop in {:?}", state);
                return Ok(state);
            }

            match self.surface.ready_state() {
                Ok(current) => {
                    state = current;
                    if state.is_complete() {
                        return Ok(state);
                    }
                }
                Err(e) => log_stage_failure("querying ready state", &e),
            }

            self.pump_once()?;

            if started.elapsed() > self.config.load_ceiling {
                warn!(
                    "Document not complete after {:?} (last state {:?}); capturing anyway",
                    self.config.load_ceiling, state
                );
                return Ok(state);
            }

            thread::sleep(self.config.poll_interval);
        }
    }

    /// Refine unset dimensions as soon as the document has a body.
    fn on_document_ready(&mut self, state: ReadyState) {
        if self.surface.is_disposed() {
            return;
        }
        debug!("Document ready event: {:?}", state);

        if !self.pending.is_complete() {
            match self.surface.content_size() {
                Ok(content) => {
                    let max = self.config.max_surface;
                    self.pending
                        .refine(observed_extent(content, self.surface.margins(), max));
                }
                Err(e) => log_stage_failure("reading content size", &e),
            }
        }

        if let Some(size) = self.pending.known() {
            let size = size.bounded(self.config.max_surface);
            if let Err(e) = self.surface.set_client_size(size) {
                log_stage_failure("applying surface size", &e);
            }
        }
    }

    fn resolve_final_size(&mut self) -> Viewport {
        let observed = if self.pending.is_complete() {
            None
        } else {
            match self.surface.content_size() {
                Ok(content) => {
                    observed_extent(content, self.surface.margins(), self.config.max_surface)
                }
                Err(e) => {
                    log_stage_failure("reading content size", &e);
                    None
                }
            }
        };

        if observed.is_none() && !self.pending.is_complete() {
            debug!(
                "Document body unavailable; falling back to {}x{}",
                self.config.fallback_viewport.width, self.config.fallback_viewport.height
            );
        }

        self.settle(observed)
    }

    fn settle(&mut self, observed: Option<Viewport>) -> Viewport {
        self.pending.settle(
            observed,
            self.config.fallback_viewport,
            self.config.max_surface,
        )
    }

    fn draw(&mut self) -> Option<RgbaImage> {
        if !self.surface.has_surface_handle() {
            log_stage_failure("drawing", &SnapshotError::SurfaceUnavailable);
            return None;
        }

        let bounds = self
            .surface
            .bounds()
            .clamped()
            .bounded(self.config.max_surface);
        let mut raster = match allocate_raster(bounds) {
            Ok(raster) => raster,
            Err(e) => {
                log_stage_failure("allocating raster", &e);
                return None;
            }
        };

        match self.surface.draw_to_raster(&mut raster) {
            Ok(()) => Some(raster),
            Err(e) => {
                log_stage_failure("drawing", &e);
                None
            }
        }
    }

    /// Keep the engine running for `duration` so navigation gets underway.
    fn pump_for(&mut self, duration: Duration) -> Result<(), SnapshotError> {
        let deadline = Instant::now() + duration;
        while !self.cancel.is_cancelled() {
            self.pump_once()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(self.config.poll_interval));
        }
        Ok(())
    }

    fn pump_once(&mut self) -> Result<(), SnapshotError> {
        for event in self.surface.pump()? {
            match event {
                EngineEvent::DocumentReady(ready) => self.on_document_ready(ready),
            }
        }
        Ok(())
    }
}

/// Zeroed raster of `size`, or `CaptureFailed` when the memory is not available.
pub fn allocate_raster(size: Viewport) -> Result<RgbaImage, SnapshotError> {
    let len = (size.width as usize)
        .checked_mul(size.height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| {
            SnapshotError::CaptureFailed(format!(
                "raster {}x{} overflows",
                size.width, size.height
            ))
        })?;

    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|e| {
        SnapshotError::CaptureFailed(format!(
            "cannot allocate {}x{} raster: {}",
            size.width, size.height, e
        ))
    })?;
    buffer.resize(len, 0);

    RgbaImage::from_raw(size.width, size.height, buffer).ok_or_else(|| {
        SnapshotError::CaptureFailed("raster buffer size mismatch".to_string())
    })
}

fn publish(slot: &OnceLock<RenderOutcome>, outcome: RenderOutcome) {
    if slot.set(outcome).is_err() {
        warn!("Render outcome already published; dropping duplicate");
    }
}

fn log_stage_failure(stage: &str, err: &SnapshotError) {
    record_stage_failure(err.kind());
    match err.severity() {
        ErrorSeverity::Low => debug!(kind = err.kind().as_str(), "{} failed: {}", stage, err),
        ErrorSeverity::Medium => warn!(kind = err.kind().as_str(), "{} failed: {}", stage, err),
        ErrorSeverity::High => error!(kind = err.kind().as_str(), "{} failed: {}", stage, err),
    }
}
