//! # Page Snapshot
//!
//! Renders one web page on a hidden, non-interactive headless surface and
//! returns it as an in-memory RGBA raster, within a fixed wall-clock bound.
//!
//! Every capture gets its own render context: a dedicated thread that
//! creates the rendering engine, pumps it until the document is complete
//! (or an internal load ceiling passes), sizes the surface and draws it.
//! The caller waits on a completion signal for at most the request timeout
//! and always gets control back. Failures never surface as errors; the
//! image is simply absent and the reason is logged.
//!
//! ## Surface size
//!
//! Each axis resolves independently:
//!
//! | Source | Used when |
//! |--------|-----------|
//! | Requested width/height | Given explicitly |
//! | Primary display bounds | Neither axis given (read once, at request creation) |
//! | Document body + margins | Still unset once the document has a body |
//! | 1024x768 fallback | Nothing else answered |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use page_snapshot::{CaptureCoordinator, Config};
//! use std::time::Duration;
//!
//! let coordinator = CaptureCoordinator::with_chrome(Config::default());
//! let request = coordinator.request(
//!     "https://example.com",
//!     Some(800),
//!     Some(600),
//!     Some(Duration::from_secs(30)),
//! );
//! if let Some(image) = coordinator.capture(request) {
//!     println!("Captured {}x{}", image.width(), image.height());
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! page-snapshot --url https://example.com --width 800 --height 600 --output example.png
//! ```

/// Capture timing bounds and headless Chrome launch settings
pub mod config;

/// Error types and failure classification
pub mod error;

/// Capture requests and surface-size resolution
pub mod request;

/// Primary display capability
pub mod display;

/// Rendering-engine capability traits
pub mod engine;

/// Headless Chrome rendering engine
pub mod chrome;

/// Completion signal and cooperative cancellation
pub mod signal;

/// Single-capture render session run inside a render context
pub mod session;

/// Bounded-time capture coordination
pub mod coordinator;

/// Command-line interface implementation
pub mod cli;

/// Capture metrics collection
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod tests;

pub use chrome::*;
pub use cli::*;
pub use config::*;
pub use coordinator::*;
pub use display::*;
pub use engine::*;
pub use error::*;
pub use self::metrics::*;
pub use request::*;
pub use session::*;
pub use signal::*;
pub use utils::*;
