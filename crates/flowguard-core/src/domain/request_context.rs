//! Per-request state
//!
//! A [`RequestContext`] is created when a request enters the host engine and
//! dropped (or [completed](RequestContext::complete)) when it leaves. It is
//! passed explicitly to every lifecycle callback and collaborator call, so
//! nothing bound to one request can leak into a later request served by the
//! same worker.

use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::flow_execution::ContinuationKey;
use crate::domain::persistence::{FactoryId, SharedHandle};
use crate::CoreError;

/// Single-slot cache of the continuation key issued for the current request
#[derive(Debug, Clone, Default)]
pub struct RequestKeyCache {
    slot: Option<ContinuationKey>,
}

impl RequestKeyCache {
    /// The cached key, if any
    #[inline]
    pub fn get(&self) -> Option<&ContinuationKey> {
        self.slot.as_ref()
    }

    /// Whether a key is cached
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// Cache a key, replacing any previous one
    pub fn store(&mut self, key: ContinuationKey) {
        self.slot = Some(key);
    }

    /// Drop the cached key
    pub fn clear(&mut self) -> Option<ContinuationKey> {
        self.slot.take()
    }
}

/// One registry slot per handle factory
#[derive(Debug, Default)]
pub struct HandleRegistry {
    slots: HashMap<FactoryId, SharedHandle>,
}

impl HandleRegistry {
    /// Handle registered for `factory`
    pub fn current(&self, factory: &FactoryId) -> Option<&SharedHandle> {
        self.slots.get(factory)
    }

    /// Whether `factory` has a registered handle
    pub fn is_bound(&self, factory: &FactoryId) -> bool {
        self.slots.contains_key(factory)
    }

    /// Register a handle; an occupied slot is never overwritten
    pub fn bind(&mut self, factory: FactoryId, handle: SharedHandle) -> Result<(), CoreError> {
        if self.slots.contains_key(&factory) {
            return Err(CoreError::HandleAlreadyBound(factory.0));
        }
        debug!(factory = %factory, handle = %handle.id(), "Bound persistence handle");
        self.slots.insert(factory, handle);
        Ok(())
    }

    /// Unregister and return the handle for `factory`
    pub fn unbind(&mut self, factory: &FactoryId) -> Option<SharedHandle> {
        let removed = self.slots.remove(factory);
        if let Some(handle) = &removed {
            debug!(factory = %factory, handle = %handle.id(), "Unbound persistence handle");
        }
        removed
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn drain(&mut self) -> Vec<(FactoryId, SharedHandle)> {
        self.slots.drain().collect()
    }
}

/// State owned by one inbound request
#[derive(Debug)]
pub struct RequestContext {
    id: String,
    interactive: bool,
    key_cache: RequestKeyCache,
    handles: HandleRegistry,
    params: HashMap<String, String>,
    attributes: HashMap<String, String>,
}

impl RequestContext {
    /// Create the context for a new request
    ///
    /// `interactive` is decided by the transport layer: true for requests that
    /// expect a partial/programmatic response instead of a full page.
    pub fn new(interactive: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            interactive,
            key_cache: RequestKeyCache::default(),
            handles: HandleRegistry::default(),
            params: HashMap::new(),
            attributes: HashMap::new(),
        }
    }

    /// Create the context for a full-page request
    pub fn full_page() -> Self {
        Self::new(false)
    }

    /// Create the context for an interactive request
    pub fn interactive() -> Self {
        Self::new(true)
    }

    /// Add a form parameter
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Request id, used in log fields
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this request expects a partial response
    #[inline]
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Key cache
    #[inline]
    pub fn key_cache(&self) -> &RequestKeyCache {
        &self.key_cache
    }

    /// Mutable key cache
    #[inline]
    pub fn key_cache_mut(&mut self) -> &mut RequestKeyCache {
        &mut self.key_cache
    }

    /// Handle registry
    #[inline]
    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// Mutable handle registry
    #[inline]
    pub fn handles_mut(&mut self) -> &mut HandleRegistry {
        &mut self.handles
    }

    /// Form parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Set a form parameter
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    /// Request attribute by name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Set a request attribute
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Finish the request, unbinding whatever is still registered.
    ///
    /// Returned handles were not released by any lifecycle callback.
    pub fn complete(mut self) -> Vec<SharedHandle> {
        let leftover = self.handles.drain();
        for (factory, handle) in &leftover {
            warn!(
                request_id = %self.id,
                factory = %factory,
                handle = %handle.id(),
                "Persistence handle still bound at request exit"
            );
        }
        leftover.into_iter().map(|(_, handle)| handle).collect()
    }
}
