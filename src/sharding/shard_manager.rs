//! Registry of remote lookup clients, one slot per shard.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::lookup::RemoteLookupClient;

/// Holds one remote-lookup client handle per shard id.
///
/// The slot for the server's own shard stays empty: local traffic never
/// leaves the process. Slots are refreshed by an external discovery loop, so
/// a fan-out must tolerate a temporarily missing handle.
pub struct ShardManager {
    clients: RwLock<Vec<Option<Arc<dyn RemoteLookupClient>>>>,
}

impl ShardManager {
    /// Create a manager with `num_shards` empty slots.
    pub fn new(num_shards: u32) -> Self {
        let clients = (0..num_shards).map(|_| None).collect();
        Self { clients: RwLock::new(clients) }
    }

    /// Install or replace the client for `shard_num`. Out-of-range shard
    /// numbers are ignored.
    pub fn insert(&self, shard_num: u32, client: Arc<dyn RemoteLookupClient>) {
        let mut clients = self.clients.write();
        if let Some(slot) = clients.get_mut(shard_num as usize) {
            *slot = Some(client);
        }
    }

    /// Drop the client for `shard_num`, e.g. when discovery loses the
    /// replica.
    pub fn remove(&self, shard_num: u32) {
        let mut clients = self.clients.write();
        if let Some(slot) = clients.get_mut(shard_num as usize) {
            *slot = None;
        }
    }

    /// The client for `shard_num`, if one is currently registered.
    pub fn get(&self, shard_num: u32) -> Option<Arc<dyn RemoteLookupClient>> {
        self.clients.read().get(shard_num as usize).and_then(Clone::clone)
    }

    /// Number of shard slots.
    pub fn num_shards(&self) -> u32 {
        self.clients.read().len() as u32
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::LookupError;
    use crate::lookup::wire::InternalLookupResponse;

    struct NullClient;

    #[async_trait]
    impl RemoteLookupClient for NullClient {
        async fn get_values(
            &self,
            _serialized_request: &[u8],
            _padding_length: usize,
        ) -> Result<InternalLookupResponse, LookupError> {
            Ok(InternalLookupResponse::default())
        }

        fn address(&self) -> &str {
            "null"
        }
    }

    #[test]
    fn empty_slots_resolve_to_none() {
        let manager = ShardManager::new(4);
        assert_eq!(manager.num_shards(), 4);
        for shard in 0..4 {
            assert!(manager.get(shard).is_none());
        }
    }

    #[test]
    fn insert_get_remove() {
        let manager = ShardManager::new(4);
        manager.insert(2, Arc::new(NullClient));
        assert!(manager.get(2).is_some());
        assert!(manager.get(1).is_none());

        manager.remove(2);
        assert!(manager.get(2).is_none());
    }

    #[test]
    fn out_of_range_is_ignored() {
        let manager = ShardManager::new(2);
        manager.insert(9, Arc::new(NullClient));
        assert!(manager.get(9).is_none());
    }
}
