//! Headless Chrome rendering surface
//!
//! The engine owns a current-thread tokio runtime. Nothing on it runs
//! unless the render thread is inside `block_on`, which keeps Chrome's
//! DevTools traffic on the owning thread and makes `pump` the only place
//! the page advances between queries.

use crate::{
    create_browser_config, Config, ContentSize, EngineEvent, EngineFactory, Margins, ReadyState,
    RenderEngine, SnapshotError, Viewport,
};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventDomContentEventFired, EventLoadEventFired, NavigateParams,
    NavigateReturns,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::{Page, ScreenshotParams};
use chromiumoxide::types::CommandResponse;
use futures::{FutureExt, StreamExt};
use image::RgbaImage;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long one `pump` lets the runtime run.
const PUMP_SLICE: Duration = Duration::from_millis(20);

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(10);

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const CONTENT_SIZE_SCRIPT: &str = "(() => { const b = document.body; \
     return b ? { width: b.scrollWidth, height: b.scrollHeight } : null; })()";

type Navigation = JoinHandle<Result<CommandResponse<NavigateReturns>, CdpError>>;

/// Progress of the one navigation an engine performs.
enum NavigationState {
    Idle,
    Pending(Navigation),
    Committed,
    Failed(SnapshotError),
}

struct ReadyListeners {
    content_loaded: EventStream<EventDomContentEventFired>,
    loaded: EventStream<EventLoadEventFired>,
}

pub struct ChromeEngine {
    runtime: Runtime,
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
    navigation: NavigationState,
    listeners: Option<ReadyListeners>,
    bounds: Viewport,
    step_budget: Duration,
    profile_dir: PathBuf,
    disposed: bool,
}

impl ChromeEngine {
    /// Launch a browser with a single blank page, sized to the fallback viewport.
    pub fn launch(config: &Config) -> Result<Self, SnapshotError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SnapshotError::EngineLaunchFailed(format!("runtime: {}", e)))?;

        let profile_dir = std::env::temp_dir().join(format!(
            "page-snapshot-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            SnapshotError::EngineLaunchFailed(format!("Failed to create profile dir: {}", e))
        })?;

        let bounds = config.fallback_viewport;
        let browser_config = create_browser_config(config, bounds, &profile_dir)?;

        let launched = runtime.block_on(async {
            let (browser, mut handler) =
                tokio::time::timeout(config.launch_timeout, Browser::launch(browser_config))
                    .await
                    .map_err(|_| SnapshotError::EngineLaunchFailed("launch timed out".to_string()))?
                    .map_err(|e| SnapshotError::EngineLaunchFailed(e.to_string()))?;

            // The handler stream drives all DevTools traffic and must be polled continuously
            let handler_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!("Handler error: {}", e);
                    }
                }
                debug!("Handler stream ended");
            });

            match browser.new_page("about:blank").await {
                Ok(page) => Ok::<_, SnapshotError>((browser, page, handler_task)),
                Err(e) => {
                    handler_task.abort();
                    Err(SnapshotError::EngineLaunchFailed(e.to_string()))
                }
            }
        });

        let (browser, page, handler) = match launched {
            Ok(parts) => parts,
            Err(e) => {
                remove_profile_dir(&profile_dir);
                return Err(e);
            }
        };

        info!("Headless surface launched at {}x{}", bounds.width, bounds.height);

        Ok(Self {
            runtime,
            browser: Some(browser),
            page: Some(page),
            handler: Some(handler),
            navigation: NavigationState::Idle,
            listeners: None,
            bounds,
            step_budget: config.step_budget,
            profile_dir,
            disposed: false,
        })
    }

    fn page(&self) -> Result<&Page, SnapshotError> {
        match &self.page {
            Some(page) if !self.disposed => Ok(page),
            _ => Err(SnapshotError::SurfaceUnavailable),
        }
    }

    /// Run one DevTools query to completion, bounded by `budget`.
    fn step<F, T>(&self, budget: Duration, query: F) -> Result<T, SnapshotError>
    where
        F: Future<Output = Result<T, CdpError>>,
    {
        self.runtime
            .block_on(tokio::time::timeout(budget, query))
            .map_err(|_| SnapshotError::Timeout(budget))?
            .map_err(SnapshotError::from)
    }

    fn handler_alive(&self) -> bool {
        self.handler.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Collect the result of the navigation task once it has finished.
    fn poll_navigation(&mut self) {
        let finished =
            matches!(&self.navigation, NavigationState::Pending(task) if task.is_finished());
        if !finished {
            return;
        }
        let NavigationState::Pending(task) =
            std::mem::replace(&mut self.navigation, NavigationState::Idle)
        else {
            return;
        };

        self.navigation = match self.runtime.block_on(task) {
            Ok(Ok(response)) => match response.result.error_text {
                Some(text) if !text.is_empty() => {
                    NavigationState::Failed(SnapshotError::NavigationFailed(text))
                }
                _ => {
                    debug!("Navigation committed");
                    NavigationState::Committed
                }
            },
            Ok(Err(e)) => NavigationState::Failed(SnapshotError::NavigationFailed(e.to_string())),
            Err(e) => NavigationState::Failed(SnapshotError::NavigationFailed(e.to_string())),
        };
    }
}

impl RenderEngine for ChromeEngine {
    fn navigate(&mut self, url: &str) -> Result<(), SnapshotError> {
        let page = self.page()?.clone();
        let params = NavigateParams::new(url);
        debug!("Navigating to {}", url);
        self.navigation = NavigationState::Pending(
            self.runtime
                .spawn(async move { page.execute(params).await }),
        );
        Ok(())
    }

    fn ready_state(&mut self) -> Result<ReadyState, SnapshotError> {
        // Until the navigation commits, `document` is still the blank start page
        self.poll_navigation();
        match &self.navigation {
            NavigationState::Idle => return Ok(ReadyState::Uninitialized),
            NavigationState::Pending(_) => return Ok(ReadyState::Loading),
            NavigationState::Failed(e) => return Err(e.clone()),
            NavigationState::Committed => {}
        }

        let page = self.page()?;
        let result = self.step(self.step_budget, page.evaluate("document.readyState"))?;
        let state: String = result.into_value()?;
        Ok(ReadyState::from_document_state(&state))
    }

    fn pump(&mut self) -> Result<Vec<EngineEvent>, SnapshotError> {
        if self.disposed {
            return Err(SnapshotError::SurfaceUnavailable);
        }

        self.runtime.block_on(tokio::time::sleep(PUMP_SLICE));
        self.poll_navigation();
        if let NavigationState::Failed(e) = &self.navigation {
            return Err(e.clone());
        }

        if !self.handler_alive() {
            return Err(SnapshotError::NavigationFailed(
                "browser connection closed".to_string(),
            ));
        }

        let mut events = Vec::new();
        if let Some(listeners) = &mut self.listeners {
            while let Some(Some(_)) = listeners.content_loaded.next().now_or_never() {
                events.push(EngineEvent::DocumentReady(ReadyState::Interactive));
            }
            while let Some(Some(_)) = listeners.loaded.next().now_or_never() {
                events.push(EngineEvent::DocumentReady(ReadyState::Complete));
            }
        }
        Ok(events)
    }

    fn observe_document_ready(&mut self) -> Result<(), SnapshotError> {
        let page = self.page()?;
        let content_loaded = self.step(
            self.step_budget,
            page.event_listener::<EventDomContentEventFired>(),
        )?;
        let loaded = self.step(self.step_budget, page.event_listener::<EventLoadEventFired>())?;
        self.listeners = Some(ReadyListeners {
            content_loaded,
            loaded,
        });
        Ok(())
    }

    fn stop_observing_document_ready(&mut self) {
        self.listeners = None;
    }

    fn content_size(&mut self) -> Result<Option<ContentSize>, SnapshotError> {
        let page = self.page()?;
        let result = self.step(self.step_budget, page.evaluate(CONTENT_SIZE_SCRIPT))?;
        match result.value() {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    fn margins(&self) -> Margins {
        Margins::default()
    }

    fn set_client_size(&mut self, size: Viewport) -> Result<(), SnapshotError> {
        let size = size.clamped();
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(size.width)
            .height(size.height)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(SnapshotError::ChromeError)?;

        let page = self.page()?;
        self.step(self.step_budget, page.execute(params))?;
        self.bounds = size;
        debug!("Surface resized to {}x{}", size.width, size.height);
        Ok(())
    }

    fn bounds(&self) -> Viewport {
        self.bounds
    }

    fn has_surface_handle(&self) -> bool {
        !self.disposed && self.page.is_some() && self.handler_alive()
    }

    fn draw_to_raster(&mut self, target: &mut RgbaImage) -> Result<(), SnapshotError> {
        let page = self.page()?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let png_data = self
            .step(SCREENSHOT_TIMEOUT, page.screenshot(params))
            .map_err(|e| SnapshotError::CaptureFailed(e.to_string()))?;

        let shot = image::load_from_memory(&png_data)?.to_rgba8();
        if shot.dimensions() != target.dimensions() {
            debug!(
                "Screenshot is {}x{}, raster is {}x{}",
                shot.width(),
                shot.height(),
                target.width(),
                target.height()
            );
        }
        image::imageops::replace(target, &shot, 0, 0);
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.listeners = None;

        if let NavigationState::Pending(task) =
            std::mem::replace(&mut self.navigation, NavigationState::Idle)
        {
            task.abort();
        }
        self.page = None;

        if let Some(mut browser) = self.browser.take() {
            let closed = self.runtime.block_on(async {
                tokio::time::timeout(CLOSE_TIMEOUT, async {
                    browser.close().await?;
                    browser.wait().await?;
                    Ok::<_, CdpError>(())
                })
                .await
            });
            match closed {
                Ok(Ok(())) => debug!("Browser closed"),
                Ok(Err(e)) => warn!("Error closing browser: {}", e),
                Err(_) => warn!("Browser did not close within {:?}", CLOSE_TIMEOUT),
            }
        }

        if let Some(handler) = self.handler.take() {
            handler.abort();
        }

        remove_profile_dir(&self.profile_dir);
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for ChromeEngine {
    fn drop(&mut self) {
        if !self.disposed {
            self.dispose();
        }
    }
}

fn remove_profile_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        debug!("Could not remove profile dir {}: {}", dir.display(), e);
    }
}

/// Launches one `ChromeEngine` per capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeEngineFactory;

impl EngineFactory for ChromeEngineFactory {
    fn create(&self, config: &Config) -> Result<Box<dyn RenderEngine>, SnapshotError> {
        Ok(Box::new(ChromeEngine::launch(config)?))
    }
}
