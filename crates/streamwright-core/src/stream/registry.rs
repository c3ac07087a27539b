//! Response stream registry
//!
//! Maps (session, exchange) to the sink of the open exchange. At most one
//! sink exists per key; release is idempotent. A sink closed directly by its
//! owner counts as released: it is pruned the next time its key is touched.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::ResponseSink;
use crate::error::RegistryError;
use crate::types::StreamKey;

/// What `register` does when the key already has a sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationPolicy {
    /// The new sink replaces the old one (session resume)
    #[default]
    Resume,
    /// The call fails and the existing sink stays
    Reject,
}

pub struct ResponseStreamRegistry {
    streams: DashMap<StreamKey, Arc<dyn ResponseSink>>,
    policy: RegistrationPolicy,
}

impl ResponseStreamRegistry {
    pub fn new(policy: RegistrationPolicy) -> Self {
        Self {
            streams: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Register the sink for an exchange
    ///
    /// Under `Resume` a previous sink is returned to the caller; under
    /// `Reject` an occupied key is an error.
    pub fn register(
        &self,
        key: StreamKey,
        sink: Arc<dyn ResponseSink>,
    ) -> Result<Option<Arc<dyn ResponseSink>>, RegistryError> {
        match self.streams.entry(key) {
            Entry::Occupied(mut occupied) if occupied.get().is_closed() => {
                debug!("Replacing closed response stream for {}", occupied.key());
                occupied.insert(sink);
                Ok(None)
            }
            Entry::Occupied(mut occupied) => match self.policy {
                RegistrationPolicy::Resume => {
                    warn!("Replacing response stream for {}", occupied.key());
                    Ok(Some(occupied.insert(sink)))
                }
                RegistrationPolicy::Reject => {
                    Err(RegistryError::AlreadyRegistered(occupied.key().clone()))
                }
            },
            Entry::Vacant(vacant) => {
                info!("Registered response stream: {}", vacant.key());
                vacant.insert(sink);
                Ok(None)
            }
        }
    }

    pub fn lookup(&self, key: &StreamKey) -> Option<Arc<dyn ResponseSink>> {
        let sink = self.live(key);
        if sink.is_none() {
            debug!("No response stream for {}", key);
        }
        sink
    }

    /// Open sink for the key, pruning one that was closed in place
    fn live(&self, key: &StreamKey) -> Option<Arc<dyn ResponseSink>> {
        let sink = self.streams.get(key).map(|s| Arc::clone(&s))?;
        if !sink.is_closed() {
            return Some(sink);
        }
        if self
            .streams
            .remove_if(key, |_, current| Arc::ptr_eq(current, &sink))
            .is_some()
        {
            info!("Released closed response stream: {}", key);
        }
        None
    }

    /// Remove the entry; a second release returns `None`
    ///
    /// A sink its owner already closed was released by that close, so it is
    /// dropped here and `None` is returned.
    pub fn release(&self, key: &StreamKey) -> Option<Arc<dyn ResponseSink>> {
        let (_, sink) = self.streams.remove(key)?;
        if sink.is_closed() {
            debug!("Response stream {} was already closed", key);
            return None;
        }
        info!("Released response stream: {}", key);
        Some(sink)
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.live(key).is_some()
    }

    /// Keys with an open sink for one session
    pub fn keys_for_session(&self, session_id: &crate::types::SessionId) -> Vec<StreamKey> {
        self.prune_closed();
        self.streams
            .iter()
            .filter(|entry| &entry.key().session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of open sinks
    pub fn len(&self) -> usize {
        self.prune_closed();
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_closed(&self) {
        self.streams.retain(|key, sink| {
            let open = !sink.is_closed();
            if !open {
                info!("Released closed response stream: {}", key);
            }
            open
        });
    }
}

impl Default for ResponseStreamRegistry {
    fn default() -> Self {
        Self::new(RegistrationPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{create_sink_channel, ResponseSink};

    fn sink(key: &StreamKey) -> Arc<dyn ResponseSink> {
        let (sink, _rx) = create_sink_channel(key.clone());
        sink
    }

    #[test]
    fn test_register_lookup_release() {
        let registry = ResponseStreamRegistry::default();
        let key = StreamKey::new("s1", "e1");

        assert!(registry.register(key.clone(), sink(&key)).unwrap().is_none());
        assert!(registry.lookup(&key).is_some());
        assert!(registry.lookup(&StreamKey::new("s1", "e2")).is_none());

        assert!(registry.release(&key).is_some());
        assert!(registry.release(&key).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resume_replaces_and_returns_previous() {
        let registry = ResponseStreamRegistry::new(RegistrationPolicy::Resume);
        let key = StreamKey::new("s1", "e1");
        let first = sink(&key);
        let second = sink(&key);

        registry.register(key.clone(), Arc::clone(&first)).unwrap();
        let previous = registry.register(key.clone(), Arc::clone(&second)).unwrap();

        assert!(Arc::ptr_eq(&previous.unwrap(), &first));
        assert!(Arc::ptr_eq(&registry.lookup(&key).unwrap(), &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reject_keeps_existing() {
        let registry = ResponseStreamRegistry::new(RegistrationPolicy::Reject);
        let key = StreamKey::new("s1", "e1");
        let first = sink(&key);

        registry.register(key.clone(), Arc::clone(&first)).unwrap();
        let result = registry.register(key.clone(), sink(&key));

        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
        assert!(Arc::ptr_eq(&registry.lookup(&key).unwrap(), &first));
    }

    #[test]
    fn test_keys_for_session() {
        let registry = ResponseStreamRegistry::default();
        for key in [
            StreamKey::new("s1", "e1"),
            StreamKey::new("s1", "e2"),
            StreamKey::new("s2", "e1"),
        ] {
            registry.register(key.clone(), sink(&key)).unwrap();
        }
        let mut keys = registry.keys_for_session(&"s1".into());
        keys.sort_by(|a, b| a.exchange_id.cmp(&b.exchange_id));
        assert_eq!(keys, vec![StreamKey::new("s1", "e1"), StreamKey::new("s1", "e2")]);
    }

    #[test]
    fn test_closed_sink_is_released() {
        let registry = ResponseStreamRegistry::new(RegistrationPolicy::Reject);
        let key = StreamKey::new("s1", "e1");
        let first = sink(&key);
        registry.register(key.clone(), Arc::clone(&first)).unwrap();

        first.close(crate::stream::CloseReason::Finished);
        assert!(registry.release(&key).is_none());

        registry.register(key.clone(), sink(&key)).unwrap();
        registry.lookup(&key).unwrap().close(crate::stream::CloseReason::Finished);
        assert!(!registry.contains(&key));
        assert!(registry.lookup(&key).is_none());
        assert!(registry.is_empty());

        // The key is free again even under Reject
        let second = sink(&key);
        assert!(registry.register(key.clone(), Arc::clone(&second)).unwrap().is_none());
        assert!(Arc::ptr_eq(&registry.lookup(&key).unwrap(), &second));
    }

    #[test]
    fn test_closed_sink_replaced_without_lookup() {
        let registry = ResponseStreamRegistry::new(RegistrationPolicy::Reject);
        let key = StreamKey::new("s1", "e1");
        let first = sink(&key);
        registry.register(key.clone(), Arc::clone(&first)).unwrap();
        first.close(crate::stream::CloseReason::Canceled);

        assert!(registry.register(key.clone(), sink(&key)).unwrap().is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.keys_for_session(&"s1".into()), vec![key]);
    }
}
