//! Configuration management with serde serialization/deserialization
//!
//! This module holds the timing bounds of a capture and the settings used to
//! launch the headless rendering surface.

use crate::{SnapshotError, Viewport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for page snapshots
///
/// The external `capture_timeout` and the internal `load_ceiling` are
/// independent bounds; neither is assumed to fire first.
///
/// # Examples
///
/// ```rust
/// use page_snapshot::Config;
/// use std::time::Duration;
///
/// let config = Config {
///     capture_timeout: Duration::from_secs(10),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Wall-clock bound on a whole capture as seen by the caller (default: 30 seconds)
    pub capture_timeout: Duration,

    /// Longest the render context keeps pumping for a complete document (default: 25 seconds)
    ///
    /// When reached, the render context stops waiting and draws whatever
    /// the surface shows.
    pub load_ceiling: Duration,

    /// Pause after issuing navigation before the first readiness poll (default: 1 second)
    pub navigation_grace: Duration,

    /// Delay between readiness polls (default: 100ms)
    pub poll_interval: Duration,

    /// Longest a single engine query may hold the render thread (default: 250ms)
    ///
    /// Keeps the pump loop responsive to cancellation while the page is busy.
    pub step_budget: Duration,

    /// Longest the headless browser may take to start (default: 20 seconds)
    pub launch_timeout: Duration,

    /// Size used for any axis the document could not report (default: 1024x768)
    pub fallback_viewport: Viewport,

    /// Largest surface ever sized or drawn, per axis (default: 16384x16384)
    ///
    /// Documents reporting a larger extent are cut to this size.
    pub max_surface: Viewport,

    /// Primary display bounds used when a request names no size (default: 1920x1080)
    ///
    /// `None` leaves unset requests to be sized from the document.
    pub display_bounds: Option<Viewport>,

    /// Keep page script errors out of the engine's output (default: true)
    pub suppress_script_errors: bool,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for requests (default: Chrome default)
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_secs(30),
            load_ceiling: Duration::from_secs(25),
            navigation_grace: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            step_budget: Duration::from_millis(250),
            launch_timeout: Duration::from_secs(20),
            fallback_viewport: Viewport::new(1024, 768),
            max_surface: Viewport::new(16384, 16384),
            display_bounds: Some(Viewport::new(1920, 1080)),
            suppress_script_errors: true,
            chrome_path: None,
            user_agent: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.capture_timeout.is_zero() {
            return Err(SnapshotError::ConfigurationError(
                "Capture timeout must be greater than 0".to_string(),
            ));
        }

        if self.launch_timeout.is_zero() {
            return Err(SnapshotError::ConfigurationError(
                "Launch timeout must be greater than 0".to_string(),
            ));
        }

        if self.load_ceiling.is_zero() {
            return Err(SnapshotError::ConfigurationError(
                "Load ceiling must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() || self.step_budget.is_zero() {
            return Err(SnapshotError::ConfigurationError(
                "Poll interval and step budget must be greater than 0".to_string(),
            ));
        }

        if self.fallback_viewport.width == 0 || self.fallback_viewport.height == 0 {
            return Err(SnapshotError::ConfigurationError(
                "Fallback viewport dimensions must be greater than 0".to_string(),
            ));
        }

        if self.max_surface.width == 0 || self.max_surface.height == 0 {
            return Err(SnapshotError::ConfigurationError(
                "Maximum surface dimensions must be greater than 0".to_string(),
            ));
        }

        if self.fallback_viewport.width > self.max_surface.width
            || self.fallback_viewport.height > self.max_surface.height
        {
            return Err(SnapshotError::ConfigurationError(
                "Fallback viewport must fit within the maximum surface".to_string(),
            ));
        }

        if let Some(bounds) = self.display_bounds {
            if bounds.width == 0 || bounds.height == 0 {
                return Err(SnapshotError::ConfigurationError(
                    "Display bounds must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Generate Chrome command-line arguments for one hidden capture surface
///
/// Scrollbars are hidden and first-run, notification and extension UI is
/// disabled so nothing interactive can appear over the page.
///
/// # Examples
///
/// ```rust
/// use page_snapshot::{get_chrome_args, Config, Viewport};
/// use std::path::Path;
///
/// let config = Config::default();
/// let args = get_chrome_args(&config, Viewport::new(800, 600), Path::new("/tmp/profile"));
/// assert!(args.contains(&"--window-size=800,600".to_string()));
/// ```
pub fn get_chrome_args(config: &Config, viewport: Viewport, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--hide-scrollbars".to_string(),
        "--mute-audio".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--disable-notifications".to_string(),
        "--deny-permission-prompts".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--ignore-certificate-errors".to_string(),
        format!("--window-size={},{}", viewport.width, viewport.height),
        format!("--user-data-dir={}", profile_dir.display()),
    ];

    if config.suppress_script_errors {
        args.push("--log-level=3".to_string());
        args.push("--disable-logging".to_string());
    }

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(
    config: &Config,
    viewport: Viewport,
    profile_dir: &Path,
) -> Result<chromiumoxide::browser::BrowserConfig, SnapshotError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(viewport.width, viewport.height)
        .args(get_chrome_args(config, viewport, profile_dir));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(SnapshotError::ConfigurationError)
}
