//! Capture requests and viewport size resolution
//!
//! A `CaptureRequest` freezes the caller's intent at construction time. The
//! two dimension fields may stay unset; they are resolved later, once each,
//! from the loaded document or from the fallback viewport.

use crate::DisplayInfo;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Width and height of a rendering surface in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size with both axes raised to at least one pixel.
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }
}

impl Viewport {
    /// Size with each axis cut to at most `max`'s.
    pub fn bounded(self, max: Viewport) -> Self {
        Self {
            width: self.width.min(max.width),
            height: self.height.min(max.height),
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

/// Scroll extent of the loaded document's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContentSize {
    pub width: u32,
    pub height: u32,
}

/// Space the rendering surface reserves around the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Margins {
    pub horizontal: u32,
    pub vertical: u32,
}

/// Document extent as the surface needs it: body box plus surface margins,
/// cut to `max` on each axis.
pub fn observed_extent(
    content: Option<ContentSize>,
    margins: Margins,
    max: Viewport,
) -> Option<Viewport> {
    content.map(|body| {
        Viewport {
            width: body.width.saturating_add(margins.horizontal),
            height: body.height.saturating_add(margins.vertical),
        }
        .bounded(max)
    })
}

/// Pick one axis: requested beats observed beats fallback.
pub fn resolve_dimension(requested: Option<u32>, observed: Option<u32>, fallback: u32) -> u32 {
    requested.or(observed).unwrap_or(fallback)
}

/// Apply `resolve_dimension` to both axes.
pub fn resolve_dimensions(
    requested: PendingDimensions,
    observed: Option<Viewport>,
    fallback: Viewport,
) -> Viewport {
    Viewport {
        width: resolve_dimension(requested.width, observed.map(|o| o.width), fallback.width),
        height: resolve_dimension(requested.height, observed.map(|o| o.height), fallback.height),
    }
}

/// Dimensions that may still be waiting for the document to report its size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingDimensions {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl PendingDimensions {
    pub const fn new(width: Option<u32>, height: Option<u32>) -> Self {
        Self { width, height }
    }

    pub fn is_complete(&self) -> bool {
        self.width.is_some() && self.height.is_some()
    }

    /// The full size, once both axes are known.
    pub fn known(&self) -> Option<Viewport> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Viewport { width, height }),
            _ => None,
        }
    }

    /// Fill unset axes from an observation. Axes already set never change.
    /// Returns true when at least one axis was filled.
    pub fn refine(&mut self, observed: Option<Viewport>) -> bool {
        let Some(observed) = observed else {
            return false;
        };

        let mut changed = false;
        if self.width.is_none() {
            self.width = Some(observed.width);
            changed = true;
        }
        if self.height.is_none() {
            self.height = Some(observed.height);
            changed = true;
        }
        changed
    }

    /// Settle both axes, each cut to `max`, leaving nothing pending.
    pub fn settle(
        &mut self,
        observed: Option<Viewport>,
        fallback: Viewport,
        max: Viewport,
    ) -> Viewport {
        let resolved = resolve_dimensions(*self, observed, fallback).bounded(max);
        *self = PendingDimensions::from(resolved);
        resolved
    }
}

impl From<Viewport> for PendingDimensions {
    fn from(viewport: Viewport) -> Self {
        Self {
            width: Some(viewport.width),
            height: Some(viewport.height),
        }
    }
}

/// One snapshot invocation.
///
/// When neither width nor height is given, both default to the primary
/// display's bounds as reported at construction time. Later changes to the
/// display never reach an existing request.
///
/// # Examples
///
/// ```rust
/// use page_snapshot::{CaptureRequest, FixedDisplay, Viewport};
/// use std::time::Duration;
///
/// let display = FixedDisplay::new(Viewport::new(1920, 1080));
/// let request = CaptureRequest::new(
///     "https://example.com",
///     None,
///     None,
///     Duration::from_secs(30),
///     &display,
/// );
/// assert_eq!(request.requested().known(), Some(Viewport::new(1920, 1080)));
/// ```
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub id: String,
    pub url: String,
    pub timeout: Duration,
    requested: PendingDimensions,
}

impl CaptureRequest {
    pub fn new(
        url: impl Into<String>,
        width: Option<u32>,
        height: Option<u32>,
        timeout: Duration,
        display: &dyn DisplayInfo,
    ) -> Self {
        let requested = if width.is_none() && height.is_none() {
            display
                .primary_bounds()
                .map(PendingDimensions::from)
                .unwrap_or_default()
        } else {
            PendingDimensions::new(width, height)
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            timeout,
            requested,
        }
    }

    pub fn requested(&self) -> PendingDimensions {
        self.requested
    }
}
