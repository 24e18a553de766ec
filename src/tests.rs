#[cfg(test)]
mod integration_tests {
    use crate::{
        encode_png, CancelToken, CaptureCoordinator, CaptureRequest, Cli, CompletionSignal,
        Config, ContentSize, EngineEvent, EngineFactory, FixedDisplay, Margins, MockDisplayInfo,
        NoDisplay, ReadyState, RenderEngine, RenderOutcome, RenderSession, SnapshotError,
        Viewport,
    };
    use clap::Parser;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};
    use std::thread;
    use std::time::{Duration, Instant};

    const PAINT: Rgba<u8> = Rgba([200, 30, 30, 255]);
    const BLANK: Rgba<u8> = Rgba([255, 255, 255, 255]);

    /// What the engines built by one factory observed.
    #[derive(Default)]
    struct Tally {
        launches: AtomicUsize,
        disposed: AtomicUsize,
        draws: AtomicUsize,
        observer_removed: AtomicBool,
        /// Ready-state polls answered by the blank start page.
        early_polls: AtomicUsize,
        applied_sizes: Mutex<Vec<Viewport>>,
    }

    impl Tally {
        fn applied(&self) -> Vec<Viewport> {
            self.applied_sizes.lock().unwrap().clone()
        }

        fn wait_for_dispose(&self, limit: Duration) -> bool {
            let deadline = Instant::now() + limit;
            while Instant::now() < deadline {
                if self.disposed.load(Ordering::SeqCst) > 0 {
                    return true;
                }
                thread::sleep(Duration::from_millis(5));
            }
            false
        }
    }

    #[derive(Clone)]
    struct Script {
        /// Polls until `Complete`; `None` never completes.
        complete_after: Option<usize>,
        body: Option<ContentSize>,
        margins: Margins,
        navigate_error: bool,
        /// Engines launched before this count block inside `navigate`.
        hang_launches: usize,
        hang_for: Duration,
        has_handle: bool,
        draw_error: bool,
        draw_panic: bool,
        launch_error: bool,
        /// Pumps before navigation commits; until then the start page answers.
        commit_after_pumps: usize,
    }

    impl Default for Script {
        fn default() -> Self {
            Self {
                complete_after: Some(3),
                body: Some(ContentSize {
                    width: 1400,
                    height: 2600,
                }),
                margins: Margins::default(),
                navigate_error: false,
                hang_launches: 0,
                hang_for: Duration::ZERO,
                has_handle: true,
                draw_error: false,
                draw_panic: false,
                launch_error: false,
                commit_after_pumps: 0,
            }
        }
    }

    struct ScriptedEngine {
        script: Script,
        tally: Arc<Tally>,
        launch_index: usize,
        polls: usize,
        pumps: usize,
        observing: bool,
        announced: bool,
        bounds: Viewport,
        disposed: bool,
    }

    impl ScriptedEngine {
        fn committed(&self) -> bool {
            self.pumps >= self.script.commit_after_pumps
        }
    }

    impl RenderEngine for ScriptedEngine {
        fn navigate(&mut self, _url: &str) -> Result<(), SnapshotError> {
            if self.launch_index < self.script.hang_launches {
                thread::sleep(self.script.hang_for);
            }
            if self.script.navigate_error {
                return Err(SnapshotError::NavigationFailed(
                    "net::ERR_NAME_NOT_RESOLVED".to_string(),
                ));
            }
            Ok(())
        }

        fn ready_state(&mut self) -> Result<ReadyState, SnapshotError> {
            if !self.committed() {
                self.tally.early_polls.fetch_add(1, Ordering::SeqCst);
                return Ok(ReadyState::Complete);
            }
            self.polls += 1;
            Ok(match self.script.complete_after {
                Some(n) if self.polls >= n => ReadyState::Complete,
                _ => ReadyState::Loading,
            })
        }

        fn pump(&mut self) -> Result<Vec<EngineEvent>, SnapshotError> {
            self.pumps += 1;
            if !self.committed() {
                return Ok(Vec::new());
            }
            if self.observing && !self.announced && self.script.body.is_some() {
                self.announced = true;
                return Ok(vec![EngineEvent::DocumentReady(ReadyState::Interactive)]);
            }
            Ok(Vec::new())
        }

        fn observe_document_ready(&mut self) -> Result<(), SnapshotError> {
            self.observing = true;
            Ok(())
        }

        fn stop_observing_document_ready(&mut self) {
            self.observing = false;
            self.tally.observer_removed.store(true, Ordering::SeqCst);
        }

        fn content_size(&mut self) -> Result<Option<ContentSize>, SnapshotError> {
            Ok(self.script.body)
        }

        fn margins(&self) -> Margins {
            self.script.margins
        }

        fn set_client_size(&mut self, size: Viewport) -> Result<(), SnapshotError> {
            self.tally.applied_sizes.lock().unwrap().push(size);
            self.bounds = size;
            Ok(())
        }

        fn bounds(&self) -> Viewport {
            self.bounds
        }

        fn has_surface_handle(&self) -> bool {
            self.script.has_handle && !self.disposed
        }

        fn draw_to_raster(&mut self, target: &mut RgbaImage) -> Result<(), SnapshotError> {
            self.tally.draws.fetch_add(1, Ordering::SeqCst);
            if self.script.draw_panic {
                panic!("surface vanished mid-draw");
            }
            if self.script.draw_error {
                return Err(SnapshotError::CaptureFailed("blank surface".to_string()));
            }
            let fill = if self.committed() { PAINT } else { BLANK };
            for pixel in target.pixels_mut() {
                *pixel = fill;
            }
            Ok(())
        }

        fn dispose(&mut self) {
            self.disposed = true;
            self.tally.disposed.fetch_add(1, Ordering::SeqCst);
        }

        fn is_disposed(&self) -> bool {
            self.disposed
        }
    }

    struct ScriptedFactory {
        script: Script,
        tally: Arc<Tally>,
    }

    impl EngineFactory for ScriptedFactory {
        fn create(&self, config: &Config) -> Result<Box<dyn RenderEngine>, SnapshotError> {
            let launch_index = self.tally.launches.fetch_add(1, Ordering::SeqCst);
            if self.script.launch_error {
                return Err(SnapshotError::EngineLaunchFailed(
                    "no browser installed".to_string(),
                ));
            }
            Ok(Box::new(ScriptedEngine {
                script: self.script.clone(),
                tally: Arc::clone(&self.tally),
                launch_index,
                polls: 0,
                pumps: 0,
                observing: false,
                announced: false,
                bounds: config.fallback_viewport,
                disposed: false,
            }))
        }
    }

    fn fast_config() -> Config {
        Config {
            capture_timeout: Duration::from_secs(5),
            load_ceiling: Duration::from_millis(300),
            navigation_grace: Duration::from_millis(10),
            poll_interval: Duration::from_millis(5),
            step_budget: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn coordinator(script: Script) -> (CaptureCoordinator, Arc<Tally>) {
        coordinator_with(fast_config(), script)
    }

    fn coordinator_with(config: Config, script: Script) -> (CaptureCoordinator, Arc<Tally>) {
        let tally = Arc::new(Tally::default());
        let factory = ScriptedFactory {
            script,
            tally: Arc::clone(&tally),
        };
        let coordinator = CaptureCoordinator::new(config, Arc::new(factory), Arc::new(NoDisplay));
        (coordinator, tally)
    }

    #[test]
    fn test_explicit_size_is_honoured() {
        let (coordinator, tally) = coordinator(Script::default());

        let image = coordinator
            .capture_url("https://example.com", Some(800), Some(600), None)
            .expect("image");

        assert_eq!(image.dimensions(), (800, 600));
        assert_eq!(*image.get_pixel(799, 599), PAINT);
        assert_eq!(tally.applied().last(), Some(&Viewport::new(800, 600)));
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
        assert!(tally.observer_removed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_display_defaults_are_read_once_at_request_creation() {
        let mut display = MockDisplayInfo::new();
        display
            .expect_primary_bounds()
            .times(1)
            .returning(|| Some(Viewport::new(1280, 720)));

        let tally = Arc::new(Tally::default());
        let factory = ScriptedFactory {
            script: Script::default(),
            tally: Arc::clone(&tally),
        };
        let coordinator =
            CaptureCoordinator::new(fast_config(), Arc::new(factory), Arc::new(display));

        let request = coordinator.request("https://example.com", None, None, None);
        let image = coordinator.capture(request).expect("image");

        assert_eq!(image.dimensions(), (1280, 720));
    }

    #[test]
    fn test_explicit_size_skips_display() {
        let mut display = MockDisplayInfo::new();
        display.expect_primary_bounds().times(0);

        let request = CaptureRequest::new(
            "https://example.com",
            Some(300),
            None,
            Duration::from_secs(1),
            &display,
        );
        assert_eq!(request.requested().width, Some(300));
        assert_eq!(request.requested().height, None);
    }

    #[test]
    fn test_never_ready_page_falls_back_after_load_ceiling() {
        let script = Script {
            complete_after: None,
            body: None,
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        let started = Instant::now();
        let image = coordinator
            .capture_url("https://slow.example.com", None, None, None)
            .expect("best-effort image");

        assert_eq!(image.dimensions(), (1024, 768));
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(tally.draws.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_external_timeout_returns_absent_within_bound() {
        let script = Script {
            hang_launches: 1,
            hang_for: Duration::from_secs(2),
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);
        let request = coordinator.request(
            "https://hang.example.com",
            Some(800),
            Some(600),
            Some(Duration::from_millis(200)),
        );

        let started = Instant::now();
        let image = coordinator.capture(request);

        assert!(image.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(tally.launches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_cancels_and_render_context_cleans_up() {
        let config = Config {
            load_ceiling: Duration::from_secs(10),
            ..fast_config()
        };
        let script = Script {
            complete_after: None,
            ..Default::default()
        };
        let (coordinator, tally) = coordinator_with(config, script);
        let request = coordinator.request(
            "https://busy.example.com",
            Some(640),
            Some(480),
            Some(Duration::from_millis(150)),
        );

        assert!(coordinator.capture(request).is_none());
        assert!(tally.wait_for_dispose(Duration::from_secs(2)));
        assert_eq!(tally.draws.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_straggler_does_not_complete_next_capture() {
        let script = Script {
            hang_launches: 1,
            hang_for: Duration::from_millis(400),
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        let first = coordinator.request(
            "https://hang.example.com",
            Some(100),
            Some(100),
            Some(Duration::from_millis(100)),
        );
        assert!(coordinator.capture(first).is_none());

        let second = coordinator
            .capture_url("https://example.com", Some(320), Some(240), None)
            .expect("image");
        assert_eq!(second.dimensions(), (320, 240));
        assert_eq!(tally.launches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_requested_dimensions_never_change() {
        let script = Script {
            body: Some(ContentSize {
                width: 3000,
                height: 9000,
            }),
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        let image = coordinator
            .capture_url("https://example.com", Some(640), Some(480), None)
            .expect("image");

        assert_eq!(image.dimensions(), (640, 480));
        let applied = tally.applied();
        assert!(!applied.is_empty());
        assert!(applied.iter().all(|size| *size == Viewport::new(640, 480)));
    }

    #[test]
    fn test_navigation_failure_is_absent_and_cleans_up() {
        let script = Script {
            navigate_error: true,
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        let started = Instant::now();
        let image = coordinator.capture_url("https://nowhere.invalid", Some(800), Some(600), None);

        assert!(image.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
        assert!(tally.observer_removed.load(Ordering::SeqCst));
        assert_eq!(tally.draws.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_surface_handle_yields_no_image() {
        let script = Script {
            has_handle: false,
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        assert!(coordinator
            .capture_url("https://example.com", Some(800), Some(600), None)
            .is_none());
        assert_eq!(tally.draws.load(Ordering::SeqCst), 0);
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_draw_failure_yields_no_image() {
        let script = Script {
            draw_error: true,
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        assert!(coordinator
            .capture_url("https://example.com", Some(800), Some(600), None)
            .is_none());
        assert_eq!(tally.draws.load(Ordering::SeqCst), 1);
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unset_size_uses_body_plus_margins() {
        let script = Script {
            body: Some(ContentSize {
                width: 900,
                height: 1500,
            }),
            margins: Margins {
                horizontal: 8,
                vertical: 16,
            },
            ..Default::default()
        };
        let (coordinator, _tally) = coordinator(script);

        let image = coordinator
            .capture_url("https://example.com", None, None, None)
            .expect("image");

        assert_eq!(image.dimensions(), (908, 1516));
    }

    #[test]
    fn test_partial_request_resolves_missing_axis_from_body() {
        let script = Script {
            body: Some(ContentSize {
                width: 900,
                height: 1500,
            }),
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        let image = coordinator
            .capture_url("https://example.com", Some(500), None, None)
            .expect("image");

        assert_eq!(image.dimensions(), (500, 1500));
        assert!(tally.applied().iter().all(|size| size.width == 500));
    }

    #[test]
    fn test_panic_in_render_context_is_contained() {
        let script = Script {
            draw_panic: true,
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        let started = Instant::now();
        let image = coordinator.capture_url("https://example.com", Some(800), Some(600), None);

        assert!(image.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_launch_failure_yields_no_image() {
        let script = Script {
            launch_error: true,
            ..Default::default()
        };
        let (coordinator, tally) = coordinator(script);

        assert!(coordinator
            .capture_url("https://example.com", None, None, None)
            .is_none());
        assert_eq!(tally.launches.load(Ordering::SeqCst), 1);
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_signal_fires_once_after_outcome_is_published() {
        let tally = Arc::new(Tally::default());
        let factory = ScriptedFactory {
            script: Script::default(),
            tally: Arc::clone(&tally),
        };
        let config = fast_config();
        let display = FixedDisplay::new(Viewport::new(400, 300));
        let request = CaptureRequest::new(
            "https://example.com",
            None,
            None,
            config.capture_timeout,
            &display,
        );
        let outcome: OnceLock<RenderOutcome> = OnceLock::new();
        let signal = CompletionSignal::new();
        let cancel = CancelToken::new();

        RenderSession::run(&factory, &request, &config, &cancel, &outcome, &signal);

        assert!(signal.is_set());
        assert!(!signal.set());
        let outcome = outcome.get().expect("outcome published");
        assert_eq!(outcome.resolved, Viewport::new(400, 300));
        assert_eq!(outcome.final_state, ReadyState::Complete);
        assert!(!outcome.cancelled);
        assert!(outcome.image.is_some());
    }

    #[test]
    fn test_cancelled_session_skips_draw() {
        let tally = Arc::new(Tally::default());
        let factory = ScriptedFactory {
            script: Script::default(),
            tally: Arc::clone(&tally),
        };
        let config = fast_config();
        let request = CaptureRequest::new(
            "https://example.com",
            Some(200),
            Some(100),
            config.capture_timeout,
            &NoDisplay,
        );
        let outcome = OnceLock::new();
        let signal = CompletionSignal::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        RenderSession::run(&factory, &request, &config, &cancel, &outcome, &signal);

        let outcome = outcome.get().expect("outcome published");
        assert!(outcome.cancelled);
        assert!(outcome.image.is_none());
        assert!(signal.is_set());
        assert_eq!(tally.draws.load(Ordering::SeqCst), 0);
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_grace_period_drives_navigation_before_polling() {
        let config = Config {
            navigation_grace: Duration::from_millis(30),
            ..fast_config()
        };
        let script = Script {
            commit_after_pumps: 2,
            complete_after: Some(1),
            ..Default::default()
        };
        let (coordinator, tally) = coordinator_with(config, script);

        let image = coordinator
            .capture_url("file:///tmp/page.html", Some(320), Some(240), None)
            .expect("image");

        assert_eq!(tally.early_polls.load(Ordering::SeqCst), 0);
        assert_eq!(*image.get_pixel(160, 120), PAINT);
    }

    #[test]
    fn test_huge_body_is_bounded_by_max_surface() {
        let config = Config {
            max_surface: Viewport::new(2000, 2000),
            ..fast_config()
        };
        let script = Script {
            body: Some(ContentSize {
                width: 1920,
                height: 9_000_000,
            }),
            ..Default::default()
        };
        let (coordinator, tally) = coordinator_with(config, script);

        let image = coordinator
            .capture_url("https://tall.example.com", None, None, None)
            .expect("image");

        assert_eq!(image.dimensions(), (1920, 2000));
        let applied = tally.applied();
        assert!(!applied.is_empty());
        assert!(applied
            .iter()
            .all(|size| size.width <= 2000 && size.height <= 2000));
    }

    #[test]
    fn test_oversized_request_is_bounded_by_max_surface() {
        let config = Config {
            max_surface: Viewport::new(1000, 1000),
            ..fast_config()
        };
        let (coordinator, _tally) = coordinator_with(config, Script::default());

        let image = coordinator
            .capture_url("https://example.com", Some(5000), Some(400), None)
            .expect("image");

        assert_eq!(image.dimensions(), (1000, 400));
    }

    #[test]
    fn test_sequential_identical_captures_have_identical_dimensions() {
        let (coordinator, tally) = coordinator(Script::default());

        let first = coordinator
            .capture_url("https://example.com", Some(800), Some(600), None)
            .expect("first image");
        let second = coordinator
            .capture_url("https://example.com", Some(800), Some(600), None)
            .expect("second image");
        assert_eq!(first.dimensions(), (800, 600));
        assert_eq!(first.dimensions(), second.dimensions());

        let first = coordinator
            .capture_url("https://example.com", None, None, None)
            .expect("first unsized image");
        let second = coordinator
            .capture_url("https://example.com", None, None, None)
            .expect("second unsized image");
        assert_eq!(first.dimensions(), (1400, 2600));
        assert_eq!(first.dimensions(), second.dimensions());
        assert_eq!(tally.launches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_capture_async() {
        let (coordinator, _tally) = coordinator(Script::default());
        let coordinator = Arc::new(coordinator);
        let request = coordinator.request("https://example.com", Some(800), Some(600), None);

        let image = Arc::clone(&coordinator)
            .capture_async(request)
            .await
            .expect("image");

        assert_eq!(image.dimensions(), (800, 600));
    }

    #[test]
    fn test_cli_arguments() {
        let args = Cli::try_parse_from([
            "page-snapshot",
            "--url",
            "https://example.com",
            "--width",
            "800",
            "--timeout-ms",
            "5000",
        ])
        .unwrap();

        assert_eq!(args.url, "https://example.com");
        assert_eq!(args.width, Some(800));
        assert_eq!(args.height, None);
        assert_eq!(args.timeout_ms, Some(5000));
        assert!(args.output.is_none());
        assert!(!args.metrics);

        assert!(Cli::try_parse_from(["page-snapshot"]).is_err());
    }

    #[test]
    fn test_encode_png() {
        let image = RgbaImage::from_pixel(3, 2, PAINT);
        let png = encode_png(image).unwrap();

        assert_eq!(&png[..4], b"\x89PNG");
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(*decoded.get_pixel(2, 1), PAINT);
    }
}
