//! Test implementations (fakes) of FlowGuard collaborators.

pub mod failing_runner;
pub mod recording_interceptor;
pub mod recording_listener;
pub mod stub_handle;

pub use failing_runner::FailingTransactionRunner;
pub use recording_interceptor::RecordingInterceptor;
pub use recording_listener::{RecordedEvent, RecordingListener};
pub use stub_handle::StubHandle;
