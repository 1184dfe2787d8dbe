//! Assertion utilities for frame and registry state.

use flowguard_core::{FactoryId, FlowExecution, FrameState, HandleId, RequestContext};

use crate::error::{TestError, TestResult};

/// Asserts that the frame at stack `index` is in `expected` state.
///
/// # Returns
///
/// * `Ok(())` - If the frame exists and is in the expected state
/// * `Err(TestError::Assertion)` - Otherwise
pub fn assert_frame_state(
    execution: &FlowExecution,
    index: usize,
    expected: FrameState,
) -> TestResult {
    let frame = execution.session(index).ok_or_else(|| {
        TestError::Assertion(format!(
            "no frame at index {index}, stack depth is {}",
            execution.sessions().len()
        ))
    })?;

    let actual = frame.frame_state();
    if actual != expected {
        return Err(TestError::Assertion(format!(
            "frame {} ({}): expected {expected:?}, got {actual:?}",
            index,
            frame.definition().id
        )));
    }
    Ok(())
}

/// Asserts which handle, if any, is registered for `factory`.
pub fn assert_registered(
    cx: &RequestContext,
    factory: &FactoryId,
    expected: Option<&HandleId>,
) -> TestResult {
    let actual = cx.handles().current(factory).map(|handle| handle.id());
    if actual != expected {
        return Err(TestError::Assertion(format!(
            "factory {factory}: expected registered handle {expected:?}, got {actual:?}"
        )));
    }
    Ok(())
}

/// Completes the request and asserts no handle was left registered.
pub fn assert_no_leaks(cx: RequestContext) -> TestResult {
    let leftover = cx.complete();
    if leftover.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = leftover
        .iter()
        .map(|handle| handle.id().to_string())
        .collect();
    Err(TestError::Assertion(format!(
        "handles still bound at request exit: {}",
        ids.join(", ")
    )))
}
