//! Transition-time key materializer
//!
//! An interactive request may render a partial view without the engine ever
//! generating a continuation key, which leaves post-back controls keyless.
//! [`KeyMaterializer`] forces generation right before a transition executes
//! and republishes the key where rendering code looks for it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::{
    application::listener::FlowExecutionListener,
    config::FlowGuardConfig,
    domain::flow_definition::TransitionDefinition,
    domain::flow_execution::FlowExecution,
    domain::repository::{FlowExecutionKeyFactory, FlowExecutionRepository},
    domain::request_context::RequestContext,
    CoreError,
};

/// Listener guaranteeing a continuation key exists for interactive requests
pub struct KeyMaterializer {
    enabled: bool,
    repository: Arc<dyn FlowExecutionRepository>,
    key_factory: Arc<dyn FlowExecutionKeyFactory>,
    param_name: String,
    attribute_name: String,
}

impl KeyMaterializer {
    /// Create an enabled materializer publishing under the default names
    pub fn new(
        repository: Arc<dyn FlowExecutionRepository>,
        key_factory: Arc<dyn FlowExecutionKeyFactory>,
    ) -> Self {
        Self::from_config(repository, key_factory, &FlowGuardConfig::default())
    }

    /// Create a materializer from configuration
    pub fn from_config(
        repository: Arc<dyn FlowExecutionRepository>,
        key_factory: Arc<dyn FlowExecutionKeyFactory>,
        config: &FlowGuardConfig,
    ) -> Self {
        Self {
            enabled: config.materialize_keys,
            repository,
            key_factory,
            param_name: config.execution_param.clone(),
            attribute_name: config.execution_key_attribute.clone(),
        }
    }

    /// Enable or disable the materializer
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether the materializer acts at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl FlowExecutionListener for KeyMaterializer {
    fn name(&self) -> &str {
        "key-materializer"
    }

    async fn transition_executing(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        transition: &TransitionDefinition,
    ) -> Result<(), CoreError> {
        if !self.enabled || !cx.is_interactive() || !cx.key_cache().is_empty() {
            trace!(
                request_id = %cx.id(),
                transition = %transition.on,
                "Key materialization not needed"
            );
            return Ok(());
        }

        let key = match execution.key().cloned() {
            Some(current) => {
                let stored = self.repository.lookup(cx, &current).await?;
                self.key_factory.generate_key(cx, &stored).await?
            }
            // never stored yet, so the in-hand execution is authoritative
            None => self.key_factory.generate_key(cx, execution).await?,
        };

        debug!(
            request_id = %cx.id(),
            execution_id = %execution.id,
            transition = %transition.on,
            key = %key,
            "Materialized continuation key before transition"
        );

        let rendered = key.to_string();
        cx.key_cache_mut().store(key);
        cx.set_param(self.param_name.clone(), rendered.clone());
        cx.set_attribute(self.attribute_name.clone(), rendered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::key_proxy::KeyConsistencyProxy;
    use crate::domain::capability::{Capability, Capable};
    use crate::domain::flow_definition::FlowDefinition;
    use crate::domain::flow_execution::ContinuationKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        lookups: AtomicUsize,
        generated: AtomicUsize,
    }

    impl Capable for CountingStore {
        fn declared_capabilities(&self) -> &'static [Capability] {
            &[Capability::ExecutionRepository, Capability::KeyFactory]
        }
    }

    #[async_trait]
    impl FlowExecutionRepository for CountingStore {
        async fn parse_key(
            &self,
            _cx: &mut RequestContext,
            raw: &str,
        ) -> Result<ContinuationKey, CoreError> {
            Ok(ContinuationKey::new(raw))
        }

        async fn lookup(
            &self,
            _cx: &mut RequestContext,
            key: &ContinuationKey,
        ) -> Result<FlowExecution, CoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let mut execution = FlowExecution::new();
            execution.assign_key(key.clone());
            Ok(execution)
        }

        async fn put(
            &self,
            _cx: &mut RequestContext,
            _execution: &FlowExecution,
        ) -> Result<(), CoreError> {
            Ok(())
        }

        async fn remove(
            &self,
            _cx: &mut RequestContext,
            _execution: &FlowExecution,
        ) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl FlowExecutionKeyFactory for CountingStore {
        async fn generate_key(
            &self,
            _cx: &mut RequestContext,
            _execution: &FlowExecution,
        ) -> Result<ContinuationKey, CoreError> {
            let n = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ContinuationKey::new(format!("e1s{}", n)))
        }

        async fn update_snapshot(
            &self,
            _cx: &mut RequestContext,
            _execution: &FlowExecution,
        ) -> Result<(), CoreError> {
            Ok(())
        }

        async fn remove_snapshots(
            &self,
            _cx: &mut RequestContext,
            _execution: &FlowExecution,
        ) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn materializer() -> (Arc<KeyConsistencyProxy<CountingStore>>, KeyMaterializer) {
        let proxy = KeyConsistencyProxy::shared(CountingStore::default());
        let materializer = KeyMaterializer::new(proxy.clone(), proxy.clone());
        (proxy, materializer)
    }

    fn started_execution() -> FlowExecution {
        let mut execution = FlowExecution::new();
        execution
            .start(Arc::new(FlowDefinition::new("wizard")))
            .unwrap();
        execution
    }

    fn next() -> TransitionDefinition {
        TransitionDefinition::new("next", "step2")
    }

    #[tokio::test]
    async fn test_publishes_key_for_interactive_request() {
        let (proxy, materializer) = materializer();
        let mut cx = RequestContext::interactive();
        let mut execution = started_execution();
        execution.assign_key(ContinuationKey::new("e1s1"));

        materializer
            .transition_executing(&mut cx, &mut execution, &next())
            .await
            .unwrap();

        assert_eq!(cx.key_cache().get(), Some(&ContinuationKey::new("e1s1")));
        assert_eq!(cx.param("execution"), Some("e1s1"));
        assert_eq!(cx.attribute("flowExecutionKey"), Some("e1s1"));
        assert_eq!(proxy.inner().lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_transition_reuses_cached_key() {
        let (proxy, materializer) = materializer();
        let mut cx = RequestContext::interactive();
        let mut execution = started_execution();

        materializer
            .transition_executing(&mut cx, &mut execution, &next())
            .await
            .unwrap();
        materializer
            .transition_executing(&mut cx, &mut execution, &next())
            .await
            .unwrap();

        assert_eq!(proxy.inner().generated.load(Ordering::SeqCst), 1);
        // no key on the execution yet, so nothing was looked up
        assert_eq!(proxy.inner().lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_noop_for_full_page_or_disabled() {
        let (proxy, materializer) = materializer();
        let mut execution = started_execution();

        let mut full_page = RequestContext::full_page();
        materializer
            .transition_executing(&mut full_page, &mut execution, &next())
            .await
            .unwrap();
        assert_eq!(full_page.param("execution"), None);

        let disabled = materializer.enabled(false);
        assert!(!disabled.is_enabled());
        let mut interactive = RequestContext::interactive();
        disabled
            .transition_executing(&mut interactive, &mut execution, &next())
            .await
            .unwrap();
        assert!(interactive.key_cache().is_empty());
        assert_eq!(proxy.inner().generated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_configured_names() {
        let proxy = KeyConsistencyProxy::shared(CountingStore::default());
        let config = FlowGuardConfig {
            execution_param: "exec".to_string(),
            execution_key_attribute: "key".to_string(),
            ..FlowGuardConfig::default()
        };
        let materializer = KeyMaterializer::from_config(proxy.clone(), proxy, &config);

        let mut cx = RequestContext::interactive();
        let mut execution = started_execution();
        materializer
            .transition_executing(&mut cx, &mut execution, &next())
            .await
            .unwrap();

        assert_eq!(cx.param("exec"), Some("e1s1"));
        assert_eq!(cx.attribute("key"), Some("e1s1"));
        assert_eq!(cx.param("execution"), None);
    }
}
