//! Bounded-time capture coordination
//!
//! `CaptureCoordinator` runs each `RenderSession` on a freshly spawned,
//! engine-owning thread and waits on its completion signal for at most the
//! request's timeout. The calling thread always gets control back; a render
//! context that outlives the timeout is asked to stop and then detached.

use crate::{
    format_duration, CancelToken, CaptureMetrics, CaptureRequest, ChromeEngineFactory,
    CompletionSignal, Config, DisplayInfo, EngineFactory, FixedDisplay, NoDisplay, RenderOutcome,
    RenderSession, SnapshotError,
};
use image::RgbaImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// How long a signalled render context gets to finish unwinding before it is detached.
const EXIT_GRACE: Duration = Duration::from_millis(250);

const EXIT_POLL: Duration = Duration::from_millis(2);

/// Takes one snapshot per call, never blocking longer than the request allows
///
/// # Examples
///
/// ```rust,no_run
/// use page_snapshot::{CaptureCoordinator, Config};
///
/// let coordinator = CaptureCoordinator::with_chrome(Config::default());
/// match coordinator.capture_url("https://example.com", Some(800), Some(600), None) {
///     Some(image) => println!("Captured {}x{}", image.width(), image.height()),
///     None => println!("No image"),
/// }
/// ```
pub struct CaptureCoordinator {
    config: Config,
    factory: Arc<dyn EngineFactory>,
    display: Arc<dyn DisplayInfo>,
    metrics: CaptureMetrics,
    contexts_started: AtomicUsize,
}

/// State shared with one render context.
struct RenderContext {
    signal: Arc<CompletionSignal>,
    outcome: Arc<OnceLock<RenderOutcome>>,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl CaptureCoordinator {
    pub fn new(
        config: Config,
        factory: Arc<dyn EngineFactory>,
        display: Arc<dyn DisplayInfo>,
    ) -> Self {
        Self {
            config,
            factory,
            display,
            metrics: CaptureMetrics::new(),
            contexts_started: AtomicUsize::new(0),
        }
    }

    /// Coordinator backed by headless Chrome, with display bounds from the config.
    pub fn with_chrome(config: Config) -> Self {
        let display: Arc<dyn DisplayInfo> = match config.display_bounds {
            Some(bounds) => Arc::new(FixedDisplay::new(bounds)),
            None => Arc::new(NoDisplay),
        };
        Self::new(config, Arc::new(ChromeEngineFactory), display)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build a request, reading display defaults now rather than at capture time.
    pub fn request(
        &self,
        url: impl Into<String>,
        width: Option<u32>,
        height: Option<u32>,
        timeout: Option<Duration>,
    ) -> CaptureRequest {
        CaptureRequest::new(
            url,
            width,
            height,
            timeout.unwrap_or(self.config.capture_timeout),
            self.display.as_ref(),
        )
    }

    pub fn capture_url(
        &self,
        url: impl Into<String>,
        width: Option<u32>,
        height: Option<u32>,
        timeout: Option<Duration>,
    ) -> Option<RgbaImage> {
        self.capture(self.request(url, width, height, timeout))
    }

    /// Capture one page. Returns within roughly `request.timeout`, never errors.
    ///
    /// `None` is the only failure signal; details go to the log.
    pub fn capture(&self, request: CaptureRequest) -> Option<RgbaImage> {
        let span = info_span!("capture", id = %request.id, url = %request.url);
        let _enter = span.enter();
        let started = Instant::now();

        let context = match self.start_render_context(&request) {
            Ok(context) => context,
            Err(e) => {
                error!("Failed to start render context: {}", e);
                self.metrics.record_capture(started.elapsed(), false);
                return None;
            }
        };

        let image = if context.signal.wait_timeout(request.timeout) {
            debug!("Render context completed in {}", format_duration(started.elapsed()));
            let image = read_image(&context.outcome);
            if let Err(e) = reclaim(context.handle, EXIT_GRACE) {
                warn!("{}", e);
                self.metrics.record_termination_failure();
            }
            image
        } else {
            warn!(
                "Timeout after {} while capturing {}; terminating render context",
                format_duration(request.timeout),
                request.url
            );
            self.metrics.record_timeout();
            context.cancel.cancel();
            let image = read_image(&context.outcome);
            if let Err(e) = reclaim(context.handle, Duration::ZERO) {
                warn!("{}", e);
                self.metrics.record_termination_failure();
            }
            image
        };

        self.metrics.record_capture(started.elapsed(), image.is_some());
        if image.is_none() {
            info!("No image produced for {}", request.url);
        }
        image
    }

    /// Run `capture` off the async executor.
    pub async fn capture_async(self: Arc<Self>, request: CaptureRequest) -> Option<RgbaImage> {
        match tokio::task::spawn_blocking(move || self.capture(request)).await {
            Ok(image) => image,
            Err(e) => {
                error!("Capture task failed: {}", e);
                None
            }
        }
    }

    fn start_render_context(
        &self,
        request: &CaptureRequest,
    ) -> Result<RenderContext, SnapshotError> {
        let signal = Arc::new(CompletionSignal::new());
        signal.reset();
        let outcome = Arc::new(OnceLock::new());
        let cancel = CancelToken::new();

        let sequence = self.contexts_started.fetch_add(1, Ordering::Relaxed);
        let span = tracing::Span::current();
        let factory = Arc::clone(&self.factory);
        let config = self.config.clone();
        let request = request.clone();
        let thread_signal = Arc::clone(&signal);
        let thread_outcome = Arc::clone(&outcome);
        let thread_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name(format!("render-context-{sequence}"))
            .spawn(move || {
                span.in_scope(|| {
                    RenderSession::run(
                        factory.as_ref(),
                        &request,
                        &config,
                        &thread_cancel,
                        &thread_outcome,
                        &thread_signal,
                    )
                })
            })
            .map_err(|e| SnapshotError::EngineLaunchFailed(e.to_string()))?;

        Ok(RenderContext {
            signal,
            outcome,
            cancel,
            handle,
        })
    }
}

fn read_image(outcome: &OnceLock<RenderOutcome>) -> Option<RgbaImage> {
    outcome.get().and_then(|outcome| outcome.image.clone())
}

/// Join a render context that exits within `grace`; detach one that does not.
fn reclaim(handle: JoinHandle<()>, grace: Duration) -> Result<(), SnapshotError> {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            debug!("Render context still winding down; detaching");
            return Ok(());
        }
        thread::sleep(EXIT_POLL);
    }

    handle.join().map_err(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        SnapshotError::TerminationFailed(format!("render context panicked: {reason}"))
    })
}
