//! Mock implementation of the HandleFactory trait.

use async_trait::async_trait;
use mockall::mock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use flowguard_core::{CoreError, FactoryId, HandleFactory, HandleOptions, SharedHandle};

use crate::implementations::StubHandle;

// Generate the mock implementation
mock! {
    pub HandleFactory {}

    #[async_trait]
    impl HandleFactory for HandleFactory {
        fn factory_id(&self) -> FactoryId;
        async fn open_handle(&self, options: &HandleOptions) -> Result<SharedHandle, CoreError>;
    }
}

/// Mock factory whose every `open_handle` fails with `HandleSetup`
pub fn failing_handle_factory(factory_id: &str, reason: &str) -> MockHandleFactory {
    let mut mock = MockHandleFactory::new();
    let id = FactoryId(factory_id.to_string());
    mock.expect_factory_id().returning(move || id.clone());

    let reason = reason.to_string();
    mock.expect_open_handle()
        .returning(move |_| Err(CoreError::HandleSetup(reason.clone())));
    mock
}

/// Mock factory handing out `handles` in order, exactly once each
pub fn scripted_handle_factory(
    factory_id: &str,
    handles: Vec<Arc<StubHandle>>,
) -> MockHandleFactory {
    let mut mock = MockHandleFactory::new();
    let id = FactoryId(factory_id.to_string());
    mock.expect_factory_id().returning(move || id.clone());

    let count = handles.len();
    let queue = Mutex::new(handles.into_iter().collect::<VecDeque<_>>());
    mock.expect_open_handle().times(count).returning(move |_| {
        queue
            .lock()
            .pop_front()
            .map(|handle| handle as SharedHandle)
            .ok_or_else(|| CoreError::HandleSetup("no scripted handle left".to_string()))
    });
    mock
}
