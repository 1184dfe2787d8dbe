use std::sync::Arc;

use flowguard_core::{
    FlowExecutionListener, FrameState, HandleFactory, PersistenceHandle,
    PersistenceLifecycleListener, RequestContext, SessionOutcome,
};
use flowguard_state_inmemory::{Collaborators, InMemoryPersistenceProvider};
use flowguard_test_utils::assertions::{assert_frame_state, assert_no_leaks, assert_registered};
use flowguard_test_utils::implementations::{RecordingInterceptor, RecordingListener};
use flowguard_test_utils::{
    commit_and_clear_flow, init_test_tracing, persistent_flow, plain_flow, FlowHarness,
    TestResult,
};
use serde_json::json;

struct Fixture {
    collaborators: Collaborators,
    listener: Arc<PersistenceLifecycleListener>,
    recorder: Arc<RecordingListener>,
    harness: FlowHarness,
}

fn fixture() -> Fixture {
    init_test_tracing();
    let provider = InMemoryPersistenceProvider::new();
    let collaborators = provider.create_collaborators();
    let factory: Arc<dyn HandleFactory> = collaborators.handle_factory.clone();

    let listener = Arc::new(PersistenceLifecycleListener::new(factory));
    let recorder = Arc::new(RecordingListener::new());
    let listeners: Vec<Arc<dyn FlowExecutionListener>> = vec![listener.clone(), recorder.clone()];
    let harness = FlowHarness::with_listeners(listeners, &collaborators);

    Fixture {
        collaborators,
        listener,
        recorder,
        harness,
    }
}

#[tokio::test]
async fn default_mode_child_reuses_root_handle() -> TestResult {
    let fx = fixture();
    let factory = &fx.collaborators.handle_factory;
    let mut cx = RequestContext::full_page();

    let mut execution = fx.harness.start(&mut cx, persistent_flow("order")).await?;
    assert_frame_state(&execution, 0, FrameState::Bound { shared: false })?;
    assert_eq!(factory.opened_count(), 1);
    let root_handle = factory.sessions()[0].clone();
    assert!(root_handle.in_transaction());
    assert_registered(&cx, fx.listener.factory_id(), Some(root_handle.id()))?;

    fx.harness
        .spawn_subflow(&mut cx, &mut execution, plain_flow("address"))
        .await?;
    assert_frame_state(&execution, 1, FrameState::Bound { shared: true })?;
    assert_eq!(factory.opened_count(), 1);

    fx.harness
        .end_active(&mut cx, &mut execution, SessionOutcome::new("done"))
        .await?;
    assert!(root_handle.is_open());
    assert!(root_handle.in_transaction());
    assert_registered(&cx, fx.listener.factory_id(), Some(root_handle.id()))?;

    root_handle.save("order:1", json!({"lines": 2})).await?;
    fx.harness
        .end_active(&mut cx, &mut execution, SessionOutcome::new("placed"))
        .await?;

    assert!(!execution.is_active());
    assert!(!root_handle.is_open());
    assert_eq!(
        factory.store().get("order:1").await,
        Some(json!({"lines": 2}))
    );
    assert_no_leaks(cx)
}

#[tokio::test]
async fn commit_and_clear_cycles_transient_handles() -> TestResult {
    let fx = fixture();
    let factory = &fx.collaborators.handle_factory;

    let mut first = RequestContext::full_page();
    let mut execution = fx
        .harness
        .start(&mut first, commit_and_clear_flow("checkout"))
        .await?;
    assert_frame_state(&execution, 0, FrameState::CommitPending)?;
    let before_pause = factory.sessions()[0].clone();
    before_pause.save("cart", json!(["book"])).await?;

    let key = fx.harness.pause(&mut first, &mut execution).await?;
    assert!(!before_pause.is_open());
    assert_eq!(factory.store().get("cart").await, Some(json!(["book"])));
    assert_no_leaks(first)?;

    // resumed by a different request with nothing registered
    let mut second = RequestContext::full_page();
    let mut resumed = fx.harness.resume(&mut second, key.as_str()).await?;
    assert_frame_state(&resumed, 0, FrameState::CommitPending)?;
    assert_eq!(factory.opened_count(), 2);
    let after_resume = factory.sessions()[1].clone();
    assert!(after_resume.is_open());

    after_resume.save("payment", json!("card")).await?;
    fx.harness
        .end_active(&mut second, &mut resumed, SessionOutcome::new("paid"))
        .await?;

    assert!(!after_resume.is_open());
    assert_eq!(factory.store().get("payment").await, Some(json!("card")));
    assert_eq!(factory.open_count(), 0);
    assert_no_leaks(second)
}

#[tokio::test]
async fn single_bind_across_pause_and_resume_with_nested_frames() -> TestResult {
    let fx = fixture();
    let factory = &fx.collaborators.handle_factory;

    let mut first = RequestContext::full_page();
    let mut execution = fx.harness.start(&mut first, persistent_flow("claim")).await?;
    fx.harness
        .spawn_subflow(&mut first, &mut execution, persistent_flow("evidence"))
        .await?;
    fx.harness
        .spawn_subflow(&mut first, &mut execution, plain_flow("upload"))
        .await?;
    let key = fx.harness.pause(&mut first, &mut execution).await?;

    let handle = factory.sessions()[0].clone();
    assert!(handle.is_open());
    assert!(!handle.is_connected());
    assert!(handle.in_transaction());
    assert_no_leaks(first)?;

    let mut second = RequestContext::full_page();
    let mut resumed = fx.harness.resume(&mut second, key.as_str()).await?;
    assert!(handle.is_connected());
    assert_registered(&second, fx.listener.factory_id(), Some(handle.id()))?;

    for end in ["uploaded", "collected", "filed"] {
        fx.harness
            .end_active(&mut second, &mut resumed, SessionOutcome::new(end))
            .await?;
    }

    assert_eq!(factory.opened_count(), 1);
    assert!(!handle.is_open());
    assert!(fx.recorder.max_registered() <= 1);
    assert_no_leaks(second)
}

#[tokio::test]
async fn non_root_end_leaves_root_handle_alone() -> TestResult {
    let fx = fixture();
    let mut cx = RequestContext::full_page();

    let mut execution = fx.harness.start(&mut cx, persistent_flow("root")).await?;
    fx.harness
        .spawn_subflow(&mut cx, &mut execution, persistent_flow("child"))
        .await?;
    let handle = fx.collaborators.handle_factory.sessions()[0].clone();
    handle.save("draft", json!(1)).await?;

    fx.harness
        .end_active(&mut cx, &mut execution, SessionOutcome::new("child-done"))
        .await?;

    assert!(handle.in_transaction());
    assert_eq!(handle.pending_writes(), 1);
    assert_frame_state(&execution, 0, FrameState::Bound { shared: false })?;
    assert!(fx.collaborators.handle_factory.store().is_empty().await);

    fx.harness
        .end_active(&mut cx, &mut execution, SessionOutcome::discard("cancelled"))
        .await?;
    assert!(fx.collaborators.handle_factory.store().is_empty().await);
    assert_no_leaks(cx)
}

#[tokio::test]
async fn subflow_inherits_commit_and_clear_from_root() -> TestResult {
    let fx = fixture();
    let mut cx = RequestContext::full_page();

    let mut execution = fx
        .harness
        .start(&mut cx, commit_and_clear_flow("wizard"))
        .await?;
    // the child does not declare the attribute itself
    fx.harness
        .spawn_subflow(&mut cx, &mut execution, persistent_flow("step"))
        .await?;
    assert_frame_state(&execution, 1, FrameState::Bound { shared: true })?;

    let key = fx.harness.pause(&mut cx, &mut execution).await?;
    let handle = fx.collaborators.handle_factory.sessions()[0].clone();
    assert!(!handle.is_open());
    assert_frame_state(&execution, 1, FrameState::Unbound)?;
    assert_no_leaks(cx)?;

    let mut next = RequestContext::full_page();
    let resumed = fx.harness.resume(&mut next, key.as_str()).await?;
    assert_frame_state(&resumed, 1, FrameState::CommitPending)?;
    assert_eq!(fx.collaborators.handle_factory.opened_count(), 2);
    Ok(())
}

#[tokio::test]
async fn lifecycle_callbacks_fire_in_engine_order() -> TestResult {
    let fx = fixture();
    let mut cx = RequestContext::full_page();

    let mut execution = fx.harness.start(&mut cx, persistent_flow("order")).await?;
    fx.harness.pause(&mut cx, &mut execution).await?;
    fx.harness.finish_request(&mut cx, &mut execution).await?;

    assert_eq!(
        fx.recorder.event_names(),
        vec![
            "request_submitted",
            "session_starting",
            "session_started",
            "paused",
            "request_processed",
        ]
    );
    let events = fx.recorder.events();
    assert_eq!(events[1].frame_state, Some(FrameState::Bound { shared: false }));
    assert_eq!(events[1].registered, 1);
    assert_eq!(events[3].registered, 0);
    Ok(())
}

#[tokio::test]
async fn interceptor_sees_flushes_of_listener_handles() -> TestResult {
    init_test_tracing();
    let collaborators = InMemoryPersistenceProvider::new().create_collaborators();
    let interceptor = Arc::new(RecordingInterceptor::new());
    let factory: Arc<dyn HandleFactory> = collaborators.handle_factory.clone();
    let listener = PersistenceLifecycleListener::new(factory)
        .with_entity_interceptor(interceptor.clone());
    let listeners: Vec<Arc<dyn FlowExecutionListener>> = vec![Arc::new(listener)];
    let harness = FlowHarness::with_listeners(listeners, &collaborators);

    let mut cx = RequestContext::full_page();
    let mut execution = harness.start(&mut cx, persistent_flow("order")).await?;
    let handle = collaborators.handle_factory.sessions()[0].clone();
    handle.save("a", json!(1)).await?;
    handle.save("b", json!(2)).await?;
    assert!(interceptor.flushes().is_empty());

    harness
        .end_active(&mut cx, &mut execution, SessionOutcome::new("done"))
        .await?;
    assert_eq!(interceptor.total_entities(), 2);
    assert_no_leaks(cx)
}

#[tokio::test]
async fn persistent_child_of_plain_root_keeps_its_handle_until_request_exit() -> TestResult {
    let fx = fixture();
    let factory = &fx.collaborators.handle_factory;
    let mut cx = RequestContext::full_page();

    let mut execution = fx.harness.start(&mut cx, plain_flow("browse")).await?;
    assert_eq!(factory.opened_count(), 0);
    fx.harness
        .spawn_subflow(&mut cx, &mut execution, persistent_flow("edit"))
        .await?;
    assert_frame_state(&execution, 1, FrameState::Bound { shared: false })?;
    let handle = factory.sessions()[0].clone();
    handle.save("draft", json!(1)).await?;

    fx.harness
        .end_active(&mut cx, &mut execution, SessionOutcome::new("edited"))
        .await?;

    assert!(handle.is_open());
    assert!(handle.in_transaction());
    assert!(factory.store().is_empty().await);
    assert_registered(&cx, fx.listener.factory_id(), Some(handle.id()))?;

    let leftover = cx.complete();
    assert_eq!(leftover.len(), 1);
    assert_eq!(leftover[0].id(), handle.id());
    Ok(())
}
