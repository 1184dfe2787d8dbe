//! Commit-and-clear support
//!
//! In commit-and-clear mode a frame never keeps a handle across a pause: a
//! transient handle is opened when the frame starts or resumes
//! ([`CommitAndClear::pre`]) and committed, unregistered and closed when it
//! pauses or ends ([`CommitAndClear::post`]).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::{
    domain::flow_execution::{BoundHandle, FlowExecution, HandleOrigin},
    domain::persistence::{HandleFactory, HandleOptions, PersistenceHandle, SharedHandle},
    domain::request_context::RequestContext,
    CoreError,
};

/// Work executed inside a managed transaction
pub type UnitOfWork = dyn Fn(&dyn PersistenceHandle) -> Result<(), CoreError> + Send + Sync;

/// Runs a unit of work inside a transaction, all or nothing
#[async_trait]
pub trait TransactionRunner: Send + Sync {
    /// Run `work` and commit, rolling back if either step fails
    async fn run(&self, cx: &mut RequestContext, work: &UnitOfWork) -> Result<(), CoreError>;
}

/// Runs transactions on the handle registered for one factory
///
/// When no handle is registered a throw-away handle is opened for the
/// duration of the transaction.
pub struct BoundHandleTransactionRunner {
    factory: Arc<dyn HandleFactory>,
    options: HandleOptions,
}

impl BoundHandleTransactionRunner {
    /// Create a runner for `factory`
    pub fn new(factory: Arc<dyn HandleFactory>) -> Self {
        Self {
            factory,
            options: HandleOptions::default(),
        }
    }

    /// Options for throw-away handles
    pub fn with_options(mut self, options: HandleOptions) -> Self {
        self.options = options;
        self
    }

    async fn execute(handle: &SharedHandle, work: &UnitOfWork) -> Result<(), CoreError> {
        if !handle.in_transaction() {
            handle.begin().await?;
        }

        if let Err(err) = work(&**handle) {
            Self::roll_back(handle).await;
            return Err(err);
        }

        if let Err(err) = handle.commit().await {
            Self::roll_back(handle).await;
            return Err(err);
        }
        Ok(())
    }

    async fn roll_back(handle: &SharedHandle) {
        if !handle.in_transaction() {
            return;
        }
        if let Err(err) = handle.rollback().await {
            // callers see the commit failure, not this one
            error!(handle = %handle.id(), error = %err, "Rollback failed");
        }
    }
}

#[async_trait]
impl TransactionRunner for BoundHandleTransactionRunner {
    async fn run(&self, cx: &mut RequestContext, work: &UnitOfWork) -> Result<(), CoreError> {
        let factory_id = self.factory.factory_id();

        if let Some(handle) = cx.handles().current(&factory_id).cloned() {
            debug!(
                request_id = %cx.id(),
                handle = %handle.id(),
                "Running transaction on bound handle"
            );
            return Self::execute(&handle, work).await;
        }

        let handle = self.factory.open_handle(&self.options).await?;
        debug!(
            request_id = %cx.id(),
            handle = %handle.id(),
            "Running transaction on temporary handle"
        );

        let result = Self::execute(&handle, work).await;
        let closed = handle.close().await;
        result.and(closed)
    }
}

/// Opens and retires the transient handles of commit-and-clear mode
pub struct CommitAndClear {
    factory: Arc<dyn HandleFactory>,
    runner: Arc<dyn TransactionRunner>,
    options: HandleOptions,
}

impl CommitAndClear {
    /// Create the helper
    pub fn new(
        factory: Arc<dyn HandleFactory>,
        runner: Arc<dyn TransactionRunner>,
        options: HandleOptions,
    ) -> Self {
        Self {
            factory,
            runner,
            options,
        }
    }

    /// Options applied to transient handles
    pub fn options(&self) -> &HandleOptions {
        &self.options
    }

    /// Replace the options applied to transient handles
    pub fn set_options(&mut self, options: HandleOptions) {
        self.options = options;
    }

    /// Replace the runner committing transient handles
    pub fn set_runner(&mut self, runner: Arc<dyn TransactionRunner>) {
        self.runner = runner;
    }

    /// Open a transient handle, attach it to the active frame and register it
    pub async fn pre(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        let stale = execution
            .require_active_session()?
            .bound_handle()
            .map(|bound| bound.handle.clone());
        if let Some(stale) = stale.filter(|handle| handle.is_open()) {
            warn!(
                request_id = %cx.id(),
                handle = %stale.id(),
                "Closing handle left in frame scope by an earlier cycle"
            );
            stale.close().await?;
        }

        let handle = self.factory.open_handle(&self.options).await?;
        let factory_id = self.factory.factory_id();
        let frame = execution.require_active_session_mut()?;
        frame
            .scope_mut()
            .put_handle(BoundHandle::new(handle.clone(), HandleOrigin::Transient));

        cx.handles_mut().bind(factory_id, handle)
    }

    /// Commit through a managed transaction, then unregister, detach and close
    pub async fn post(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        let touch = |handle: &dyn PersistenceHandle| -> Result<(), CoreError> {
            // the commit does the flushing; the handle only has to be usable
            if handle.is_open() {
                Ok(())
            } else {
                Err(CoreError::HandleClosed(handle.id().to_string()))
            }
        };
        self.runner.run(cx, &touch).await?;

        let unbound = cx.handles_mut().unbind(&self.factory.factory_id());
        let detached = execution
            .require_active_session_mut()?
            .scope_mut()
            .take_handle()
            .map(|bound| bound.handle);

        match (detached, unbound) {
            (Some(attached), Some(registered)) if attached.id() != registered.id() => {
                attached.close().await?;
                registered.close().await
            }
            (Some(handle), _) | (None, Some(handle)) => handle.close().await,
            (None, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow_definition::FlowDefinition;
    use crate::domain::persistence::{FactoryId, HandleId};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FakeHandle {
        id: HandleId,
        factory: FactoryId,
        closed: AtomicBool,
        in_tx: AtomicBool,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        fail_commit: bool,
        fail_close: bool,
    }

    impl FakeHandle {
        fn new(id: String, fail_commit: bool) -> Self {
            Self {
                id: HandleId(id),
                factory: FactoryId("fake".to_string()),
                closed: AtomicBool::new(false),
                in_tx: AtomicBool::new(false),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
                fail_commit,
                fail_close: false,
            }
        }
    }

    #[async_trait]
    impl PersistenceHandle for FakeHandle {
        fn id(&self) -> &HandleId {
            &self.id
        }
        fn factory_id(&self) -> &FactoryId {
            &self.factory
        }
        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
        fn is_connected(&self) -> bool {
            self.is_open()
        }
        fn in_transaction(&self) -> bool {
            self.in_tx.load(Ordering::SeqCst)
        }
        async fn begin(&self) -> Result<(), CoreError> {
            self.in_tx.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn commit(&self) -> Result<(), CoreError> {
            if self.fail_commit {
                return Err(CoreError::Transaction("constraint violated".to_string()));
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            self.in_tx.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn rollback(&self) -> Result<(), CoreError> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            self.in_tx.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn flush(&self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn reconnect(&self) -> Result<(), CoreError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), CoreError> {
            if self.fail_close {
                return Err(CoreError::Repository(format!("{} refused to close", self.id)));
            }
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        opened: Mutex<Vec<Arc<FakeHandle>>>,
        fail_commit: bool,
    }

    #[async_trait]
    impl HandleFactory for FakeFactory {
        fn factory_id(&self) -> FactoryId {
            FactoryId("fake".to_string())
        }

        async fn open_handle(&self, _options: &HandleOptions) -> Result<SharedHandle, CoreError> {
            let mut opened = self.opened.lock();
            let handle = Arc::new(FakeHandle::new(
                format!("h{}", opened.len() + 1),
                self.fail_commit,
            ));
            opened.push(handle.clone());
            Ok(handle)
        }
    }

    impl FakeFactory {
        fn handle(&self, index: usize) -> Arc<FakeHandle> {
            self.opened.lock()[index].clone()
        }

        fn count(&self) -> usize {
            self.opened.lock().len()
        }
    }

    fn helper(factory: &Arc<FakeFactory>) -> CommitAndClear {
        let runner = Arc::new(BoundHandleTransactionRunner::new(factory.clone()));
        CommitAndClear::new(factory.clone(), runner, HandleOptions::default())
    }

    fn started() -> FlowExecution {
        let mut execution = FlowExecution::new();
        execution
            .start(Arc::new(FlowDefinition::new("root").commit_and_clear_on_pause()))
            .unwrap();
        execution
    }

    #[tokio::test]
    async fn test_pre_then_post_cycle() {
        let factory = Arc::new(FakeFactory::default());
        let helper = helper(&factory);
        let mut cx = RequestContext::full_page();
        let mut execution = started();

        helper.pre(&mut cx, &mut execution).await.unwrap();
        assert_eq!(factory.count(), 1);
        assert!(cx.handles().is_bound(&FactoryId("fake".to_string())));
        assert_eq!(
            execution.active_session().unwrap().bound_handle().unwrap().origin,
            HandleOrigin::Transient
        );

        helper.post(&mut cx, &mut execution).await.unwrap();
        let handle = factory.handle(0);
        assert_eq!(handle.commits.load(Ordering::SeqCst), 1);
        assert!(!handle.is_open());
        assert!(cx.handles().is_empty());
        assert!(execution.active_session().unwrap().bound_handle().is_none());
    }

    #[tokio::test]
    async fn test_runner_uses_temporary_handle_when_unbound() {
        let factory = Arc::new(FakeFactory::default());
        let runner = BoundHandleTransactionRunner::new(factory.clone());
        let mut cx = RequestContext::full_page();

        runner.run(&mut cx, &|_| Ok(())).await.unwrap();

        let temporary = factory.handle(0);
        assert_eq!(temporary.commits.load(Ordering::SeqCst), 1);
        assert!(!temporary.is_open());
    }

    #[tokio::test]
    async fn test_failed_work_rolls_back_and_propagates() {
        let factory = Arc::new(FakeFactory::default());
        let runner = BoundHandleTransactionRunner::new(factory.clone());
        let mut cx = RequestContext::full_page();

        let err = runner
            .run(&mut cx, &|_| Err(CoreError::Repository("write rejected".to_string())))
            .await
            .unwrap_err();

        assert_eq!(err, CoreError::Repository("write rejected".to_string()));
        let handle = factory.handle(0);
        assert_eq!(handle.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(handle.commits.load(Ordering::SeqCst), 0);
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_handle_registered() {
        let factory = Arc::new(FakeFactory {
            fail_commit: true,
            ..Default::default()
        });
        let helper = helper(&factory);
        let mut cx = RequestContext::full_page();
        let mut execution = started();

        helper.pre(&mut cx, &mut execution).await.unwrap();
        let err = helper.post(&mut cx, &mut execution).await.unwrap_err();

        assert!(matches!(err, CoreError::Transaction(_)));
        assert_eq!(factory.handle(0).rollbacks.load(Ordering::SeqCst), 1);
        assert!(cx.handles().is_bound(&FactoryId("fake".to_string())));
    }

    #[tokio::test]
    async fn test_pre_closes_stale_scope_handle() {
        let factory = Arc::new(FakeFactory::default());
        let helper = helper(&factory);
        let mut execution = started();

        let mut first = RequestContext::full_page();
        helper.pre(&mut first, &mut execution).await.unwrap();
        drop(first);

        let mut second = RequestContext::full_page();
        helper.pre(&mut second, &mut execution).await.unwrap();

        assert!(!factory.handle(0).is_open());
        assert!(factory.handle(1).is_open());
        assert_eq!(
            execution.active_session().unwrap().bound_handle().unwrap().handle.id().0,
            "h2"
        );
    }

    #[tokio::test]
    async fn test_pre_opens_nothing_when_stale_handle_fails_to_close() {
        let factory = Arc::new(FakeFactory::default());
        let helper = helper(&factory);
        let mut execution = started();
        let stale = Arc::new(FakeHandle {
            fail_close: true,
            ..FakeHandle::new("stale".to_string(), false)
        });
        execution
            .require_active_session_mut()
            .unwrap()
            .scope_mut()
            .put_handle(BoundHandle::new(stale.clone(), HandleOrigin::Transient));

        let mut cx = RequestContext::full_page();
        let err = helper.pre(&mut cx, &mut execution).await.unwrap_err();

        assert_eq!(err, CoreError::Repository("stale refused to close".to_string()));
        assert_eq!(factory.count(), 0);
        assert!(cx.handles().is_empty());
        assert_eq!(
            execution.active_session().unwrap().bound_handle().unwrap().handle.id().0,
            "stale"
        );
    }
}
