mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use common::{status_of, Harness};
use tokio_util::sync::CancellationToken;

use dagrun::pipeline::state::Status;
use dagrun::pipeline::{NopReporter, NopStreamer, NopUploader};
use dagrun::Executor;
use dagrun_test_utils::builders::{SpecBuilder, StepBuilder};
use dagrun_test_utils::fakes::{FakeEngine, ReportEvent, StepScript};

#[tokio::test]
async fn setup_failure_fails_every_step_and_reports_once() {
    let h = Harness::new(0);
    h.engine.fail_setup("no runtime available");
    let spec = SpecBuilder::new("broken")
        .with_step(StepBuilder::new("a").build())
        .with_step(StepBuilder::new("b").after("a").build())
        .build();

    let (state, result) = h.run(spec).await;

    // The setup failure surfaces through the state, not the return value.
    result.unwrap();
    for step in ["a", "b"] {
        assert_eq!(status_of(&state, step), Status::Failed);
        let inner = state.lock();
        assert_eq!(
            inner.step(step).unwrap().error.as_deref(),
            Some("no runtime available")
        );
    }
    assert!(h.engine.started().is_empty());
    assert_eq!(h.engine.destroy_calls(), 1);
    assert_eq!(
        h.reporter.stage_events(),
        vec![ReportEvent::Stage {
            status: Status::Failed
        }]
    );
}

#[tokio::test]
async fn destroy_runs_exactly_once_on_success() {
    let h = Harness::new(0);
    let spec = SpecBuilder::new("ok")
        .with_step(StepBuilder::new("a").build())
        .build();

    let (_state, result) = h.run(spec).await;

    result.unwrap();
    assert_eq!(h.engine.setup_calls(), 1);
    assert_eq!(h.engine.destroy_calls(), 1);
}

#[tokio::test]
async fn step_report_failure_aborts_the_step_and_fails_the_run() {
    let h = Harness::new(0);
    h.reporter.fail_step_reports("a");
    let spec = SpecBuilder::new("unreportable")
        .with_step(StepBuilder::new("a").build())
        .build();

    let (state, result) = h.run(spec).await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("injected report failure"));
    // The step never reached the engine and the run is failing.
    assert!(h.engine.started().is_empty());
    assert_eq!(status_of(&state, "a"), Status::Failed);
}

#[tokio::test]
async fn terminal_report_failure_is_accumulated_but_not_fatal_to_siblings() {
    let h = Harness::new(0);
    h.reporter.fail_step_reports("b");
    h.engine.script("b", StepScript::exit(0));
    let spec = SpecBuilder::new("partially-reportable")
        .with_step(StepBuilder::new("a").build())
        .with_step(StepBuilder::new("b").after("a").build())
        .build();

    let (state, result) = h.run(spec).await;

    // "b" itself failed its Running report, so it never ran; "a" is
    // untouched.
    assert!(result.is_err());
    assert_eq!(status_of(&state, "a"), Status::Passed);
    assert_eq!(h.engine.started(), vec!["a"]);
}

#[tokio::test]
async fn detached_step_does_not_gate_dependents() {
    let h = Harness::new(0);
    h.engine.script("daemon", StepScript::block_until_cancelled());
    let spec = SpecBuilder::new("services")
        .with_step(StepBuilder::new("daemon").detached(true).build())
        .with_step(StepBuilder::new("test").after("daemon").build())
        .build();

    let (state, result) = h.run(spec).await;

    result.unwrap();
    // The daemon's engine call never finished, yet the dependent ran and
    // the pipeline completed; the sweep resolves the daemon as passed.
    assert_eq!(status_of(&state, "daemon"), Status::Passed);
    assert_eq!(status_of(&state, "test"), Status::Passed);
    let started = h.engine.started();
    assert!(started.contains(&"test".to_string()));
    assert!(!state.failed());
}

#[tokio::test]
async fn secrets_are_redacted_from_streamed_logs() {
    let h = Harness::new(0);
    h.engine.script(
        "deploy",
        StepScript::exit(0).with_log(b"curl -H 'Authorization: hunter2' https://api\n"),
    );
    let spec = SpecBuilder::new("secretive")
        .with_step(
            StepBuilder::new("deploy")
                .secret("API_TOKEN", "hunter2")
                .build(),
        )
        .build();

    let (_state, result) = h.run(spec).await;

    result.unwrap();
    let log = h.streamer.log("deploy");
    let text = String::from_utf8(log).unwrap();
    assert!(!text.contains("hunter2"));
    assert!(text.contains("Authorization: ******"));
    assert_eq!(h.streamer.close_count("deploy"), 1);
}

#[tokio::test]
async fn card_is_extracted_and_uploaded() {
    let h = Harness::new(0);
    let payload = br#"{"title":"coverage","value":98}"#;
    let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
    let log = format!("building...\n\x1b]1338;{encoded}\x07\ndone\n");
    h.engine
        .script("report", StepScript::exit(0).with_log(log.as_bytes()));
    let spec = SpecBuilder::new("carded")
        .with_step(StepBuilder::new("report").build())
        .build();

    let (_state, result) = h.run(spec).await;

    result.unwrap();
    assert_eq!(
        h.uploader.cards(),
        vec![("report".to_string(), payload.to_vec())]
    );
    // The card sequence is stripped from the stored log.
    let text = String::from_utf8(h.streamer.log("report")).unwrap();
    assert_eq!(text, "building...\ndone\n");
}

#[tokio::test]
async fn runs_with_nop_collaborators() {
    common::init_tracing();
    let engine = Arc::new(FakeEngine::default());
    let executor = Executor::new(
        Arc::new(NopReporter),
        Arc::new(NopStreamer),
        Arc::new(NopUploader),
        Arc::clone(&engine) as Arc<dyn dagrun::Engine>,
        0,
    );

    let spec = SpecBuilder::new("quiet")
        .with_step(StepBuilder::new("a").build())
        .build();
    let state = Arc::new(spec.initial_state());

    executor
        .exec(CancellationToken::new(), Arc::new(spec), Arc::clone(&state))
        .await
        .unwrap();

    assert_eq!(status_of(&state, "a"), Status::Passed);
    assert_eq!(engine.destroy_calls(), 1);
}

#[tokio::test]
async fn stage_reports_are_idempotent_snapshots() {
    let h = Harness::new(0);
    let spec = SpecBuilder::new("snapshot")
        .with_step(StepBuilder::new("a").build())
        .build();

    let (state, result) = h.run(spec).await;
    result.unwrap();

    use dagrun::pipeline::Reporter;
    h.reporter.report_stage(&state).await.unwrap();
    h.reporter.report_stage(&state).await.unwrap();

    let stages = h.reporter.stage_events();
    assert!(stages.len() >= 3);
    let last = &stages[stages.len() - 1];
    let second_last = &stages[stages.len() - 2];
    assert_eq!(last, second_last);
}

#[tokio::test]
async fn composed_environment_reaches_the_engine_unchanged_spec() {
    let h = Harness::new(0);
    h.engine
        .script("env", StepScript::exit(0).with_delay(Duration::from_millis(10)));
    let spec = SpecBuilder::new("environment")
        .with_step(StepBuilder::new("env").env("FOO", "bar").build())
        .build();
    let original = spec.clone();

    let (_state, result) = h.run(spec).await;

    result.unwrap();
    // Composition happens on a clone; the spec's own step keeps only its
    // declared variables.
    assert_eq!(
        original.steps[0].environ.get("FOO").map(String::as_str),
        Some("bar")
    );
    assert_eq!(original.steps[0].environ.len(), 1);
}
