#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use dagrun::pipeline::state::{RunState, Status};
use dagrun::Executor;
use dagrun_test_utils::builders::TestSpec;
use dagrun_test_utils::fakes::{FakeEngine, MemoryStreamer, RecordingReporter, RecordingUploader};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing**
///   tests (unless you run with `-- --nocapture`).
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// An executor wired to fake collaborators, with handles kept for
/// assertions.
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub reporter: Arc<RecordingReporter>,
    pub streamer: Arc<MemoryStreamer>,
    pub uploader: Arc<RecordingUploader>,
    pub executor: Executor,
}

impl Harness {
    pub fn new(threads: usize) -> Self {
        init_tracing();

        let engine = Arc::new(FakeEngine::default());
        let reporter = Arc::new(RecordingReporter::default());
        let streamer = Arc::new(MemoryStreamer::default());
        let uploader = Arc::new(RecordingUploader::default());
        let executor = Executor::new(
            Arc::clone(&reporter) as Arc<dyn dagrun::pipeline::Reporter>,
            Arc::clone(&streamer) as Arc<dyn dagrun::pipeline::Streamer>,
            Arc::clone(&uploader) as Arc<dyn dagrun::pipeline::Uploader>,
            Arc::clone(&engine) as Arc<dyn dagrun::Engine>,
            threads,
        );

        Self {
            engine,
            reporter,
            streamer,
            uploader,
            executor,
        }
    }

    /// Run the spec against a fresh state with a fresh token.
    pub async fn run(&self, spec: TestSpec) -> (Arc<RunState>, dagrun::Result<()>) {
        self.run_with_token(spec, CancellationToken::new()).await
    }

    pub async fn run_with_token(
        &self,
        spec: TestSpec,
        cancel: CancellationToken,
    ) -> (Arc<RunState>, dagrun::Result<()>) {
        let state = Arc::new(spec.initial_state());
        let result = self
            .executor
            .exec(cancel, Arc::new(spec), Arc::clone(&state))
            .await;
        (state, result)
    }
}

pub fn status_of(state: &RunState, step: &str) -> Status {
    state
        .lock()
        .step(step)
        .unwrap_or_else(|| panic!("no state record for step '{step}'"))
        .status
}

pub fn exit_code_of(state: &RunState, step: &str) -> i32 {
    state
        .lock()
        .step(step)
        .unwrap_or_else(|| panic!("no state record for step '{step}'"))
        .exit_code
}
