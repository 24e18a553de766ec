//! Display bounds used to default the capture size.

use crate::Viewport;
use tracing::debug;

/// Source of the primary display's full resolution.
#[cfg_attr(test, mockall::automock)]
pub trait DisplayInfo: Send + Sync {
    /// Bounds of the primary display, or `None` when there is no display to ask.
    fn primary_bounds(&self) -> Option<Viewport>;
}

/// A display with known, unchanging bounds.
#[derive(Debug, Clone, Copy)]
pub struct FixedDisplay {
    bounds: Viewport,
}

impl FixedDisplay {
    pub fn new(bounds: Viewport) -> Self {
        Self { bounds }
    }
}

impl DisplayInfo for FixedDisplay {
    fn primary_bounds(&self) -> Option<Viewport> {
        debug!("Primary display bounds: {}x{}", self.bounds.width, self.bounds.height);
        Some(self.bounds)
    }
}

/// Headless hosts: no display, so unset dimensions resolve from the page.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDisplay;

impl DisplayInfo for NoDisplay {
    fn primary_bounds(&self) -> Option<Viewport> {
        None
    }
}
