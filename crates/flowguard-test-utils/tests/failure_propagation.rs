use assert_matches::assert_matches;
use std::sync::Arc;

use flowguard_core::{
    CoreError, FlowExecutionListener, HandleFactory, PersistenceHandle,
    PersistenceLifecycleListener, RequestContext, SessionOutcome,
};
use flowguard_state_inmemory::InMemoryPersistenceProvider;
use flowguard_test_utils::implementations::{
    FailingTransactionRunner, RecordingListener, StubHandle,
};
use flowguard_test_utils::mocks::{failing_handle_factory, scripted_handle_factory};
use flowguard_test_utils::{
    commit_and_clear_flow, init_test_tracing, persistent_flow, FlowHarness, TestResult,
};

fn harness_for(
    factory: Arc<dyn HandleFactory>,
    recorder: Arc<RecordingListener>,
) -> FlowHarness {
    init_test_tracing();
    let collaborators = InMemoryPersistenceProvider::new().create_collaborators();
    let listeners: Vec<Arc<dyn FlowExecutionListener>> = vec![
        Arc::new(PersistenceLifecycleListener::new(factory)),
        recorder,
    ];
    FlowHarness::with_listeners(listeners, &collaborators)
}

#[tokio::test]
async fn handle_setup_failure_aborts_session_start() {
    let recorder = Arc::new(RecordingListener::new());
    let factory = Arc::new(failing_handle_factory("orders", "database unreachable"));
    let harness = harness_for(factory, recorder.clone());

    let mut cx = RequestContext::full_page();
    let result = harness.start(&mut cx, persistent_flow("order")).await;

    assert_matches!(
        result,
        Err(CoreError::HandleSetup(reason)) if reason == "database unreachable"
    );
    assert_eq!(
        recorder.event_names(),
        vec!["request_submitted", "exception_thrown"]
    );
    assert!(cx.handles().is_empty());
}

#[tokio::test]
async fn failed_begin_closes_handle_and_leaves_nothing_registered() {
    let handle = Arc::new(StubHandle::new("stub-1", "orders").failing_begin());
    let factory = Arc::new(scripted_handle_factory("orders", vec![handle.clone()]));
    let harness = harness_for(factory, Arc::new(RecordingListener::new()));

    let mut cx = RequestContext::full_page();
    let result = harness.start(&mut cx, persistent_flow("order")).await;

    assert_matches!(result, Err(CoreError::Transaction(_)));
    assert!(cx.complete().is_empty());
    assert_eq!(handle.closes(), 1);
    assert!(!handle.is_open());
}

#[tokio::test]
async fn root_end_commits_or_rolls_back_scripted_handles() -> TestResult {
    let committed = Arc::new(StubHandle::new("stub-1", "orders"));
    let discarded = Arc::new(StubHandle::new("stub-2", "orders"));
    let factory = Arc::new(scripted_handle_factory(
        "orders",
        vec![committed.clone(), discarded.clone()],
    ));
    let harness = harness_for(factory, Arc::new(RecordingListener::new()));

    let mut cx = RequestContext::full_page();
    let mut execution = harness.start(&mut cx, persistent_flow("order")).await?;
    harness
        .end_active(&mut cx, &mut execution, SessionOutcome::new("placed"))
        .await?;

    let mut execution = harness.start(&mut cx, persistent_flow("order")).await?;
    harness
        .end_active(&mut cx, &mut execution, SessionOutcome::discard("abandoned"))
        .await?;

    assert_eq!((committed.commits(), committed.rollbacks()), (1, 0));
    assert_eq!((discarded.commits(), discarded.rollbacks()), (0, 1));
    assert_eq!(committed.closes(), 1);
    assert_eq!(discarded.closes(), 1);
    assert!(cx.complete().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_commit_and_clear_keeps_handle_registered() -> TestResult {
    init_test_tracing();
    let collaborators = InMemoryPersistenceProvider::new().create_collaborators();
    let runner = Arc::new(FailingTransactionRunner::new());
    let factory: Arc<dyn HandleFactory> = collaborators.handle_factory.clone();
    let listener = PersistenceLifecycleListener::with_transaction_runner(factory, runner.clone());
    let listeners: Vec<Arc<dyn FlowExecutionListener>> = vec![Arc::new(listener)];
    let harness = FlowHarness::with_listeners(listeners, &collaborators);

    let mut cx = RequestContext::full_page();
    let mut execution = harness
        .start(&mut cx, commit_and_clear_flow("checkout"))
        .await?;
    let result = harness.pause(&mut cx, &mut execution).await;

    assert_matches!(result, Err(CoreError::Transaction(_)));
    assert_eq!(runner.attempts(), 1);
    assert!(execution.is_active());

    let leftover = cx.complete();
    assert_eq!(leftover.len(), 1);
    assert_eq!(leftover[0].id(), collaborators.handle_factory.sessions()[0].id());
    Ok(())
}
