//! In-Memory Swap Cache
//!
//! Live swaps stay cached until they reach a terminal status. The entity maps
//! are sharded to keep unrelated swaps off the same lock; the lookup indexes
//! (scriptPubKey and outpoint) live behind their own lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use bitcoin::OutPoint;

use crate::types::{ReverseSwap, Swap};

const SHARDS: usize = 8;

/// String-keyed map split across shard locks
pub struct ShardedMap<V> {
    shards: Vec<RwLock<HashMap<String, V>>>,
}

impl<V: Clone> ShardedMap<V> {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    pub fn insert(&self, key: String, value: V) {
        self.shard(&key).write().unwrap().insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.shard(key).read().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard(key).write().unwrap().remove(key)
    }

    pub fn values(&self) -> Vec<V> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().unwrap().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Indexes {
    /// scriptPubKey hex -> (swap id, is_reverse)
    outputs: HashMap<String, (String, bool)>,
    /// lockup outpoint -> reverse swap id
    inputs: HashMap<OutPoint, String>,
    /// swap id -> scriptPubKey hex, for removal
    outputs_by_id: HashMap<String, String>,
    /// reverse swap id -> outpoint, for removal
    inputs_by_id: HashMap<String, OutPoint>,
}

/// Cache of live swaps plus the lookups the event handlers need
#[derive(Default)]
pub struct SwapCache {
    swaps: ShardedMap<Swap>,
    reverse_swaps: ShardedMap<ReverseSwap>,
    indexes: RwLock<Indexes>,
}

impl SwapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_swap(&self, swap: Swap, script_pubkey_hex: String) {
        let mut indexes = self.indexes.write().unwrap();
        indexes
            .outputs
            .insert(script_pubkey_hex.clone(), (swap.id.clone(), false));
        indexes
            .outputs_by_id
            .insert(swap.id.clone(), script_pubkey_hex);
        self.swaps.insert(swap.id.clone(), swap);
    }

    pub fn insert_reverse_swap(&self, swap: ReverseSwap, script_pubkey_hex: String) {
        let mut indexes = self.indexes.write().unwrap();
        indexes
            .outputs
            .insert(script_pubkey_hex.clone(), (swap.id.clone(), true));
        indexes
            .outputs_by_id
            .insert(swap.id.clone(), script_pubkey_hex);
        self.reverse_swaps.insert(swap.id.clone(), swap);
    }

    /// Track the reverse swap's own lockup outpoint for spend detection
    pub fn register_lockup_outpoint(&self, id: &str, outpoint: OutPoint) {
        let mut indexes = self.indexes.write().unwrap();
        indexes.inputs.insert(outpoint, id.to_string());
        indexes.inputs_by_id.insert(id.to_string(), outpoint);
    }

    pub fn store_swap(&self, swap: Swap) {
        self.swaps.insert(swap.id.clone(), swap);
    }

    pub fn store_reverse_swap(&self, swap: ReverseSwap) {
        self.reverse_swaps.insert(swap.id.clone(), swap);
    }

    pub fn get_swap(&self, id: &str) -> Option<Swap> {
        self.swaps.get(id)
    }

    pub fn get_reverse_swap(&self, id: &str) -> Option<ReverseSwap> {
        self.reverse_swaps.get(id)
    }

    pub fn get_reverse_swap_by_preimage_hash(&self, hash: &str) -> Option<ReverseSwap> {
        self.reverse_swaps
            .values()
            .into_iter()
            .find(|s| s.preimage_hash == hash)
    }

    pub fn get_swap_by_preimage_hash(&self, hash: &str) -> Option<Swap> {
        self.swaps
            .values()
            .into_iter()
            .find(|s| s.preimage_hash == hash)
    }

    /// Resolve an output script against the live lockup addresses
    pub fn match_output(&self, script_pubkey_hex: &str) -> Option<(String, bool)> {
        self.indexes
            .read()
            .unwrap()
            .outputs
            .get(script_pubkey_hex)
            .cloned()
    }

    /// Resolve a spent outpoint against the watched reverse lockups
    pub fn match_input(&self, outpoint: &OutPoint) -> Option<String> {
        self.indexes.read().unwrap().inputs.get(outpoint).cloned()
    }

    pub fn all_swaps(&self) -> Vec<Swap> {
        self.swaps.values()
    }

    pub fn all_reverse_swaps(&self) -> Vec<ReverseSwap> {
        self.reverse_swaps.values()
    }

    /// Drop a terminal swap and its index entries. Returns the scriptPubKey
    /// and outpoint that should be unregistered from the observer.
    pub fn remove(&self, id: &str) -> (Option<String>, Option<OutPoint>) {
        self.swaps.remove(id);
        self.reverse_swaps.remove(id);

        let mut indexes = self.indexes.write().unwrap();
        let script = indexes.outputs_by_id.remove(id);
        if let Some(script) = &script {
            indexes.outputs.remove(script);
        }
        let outpoint = indexes.inputs_by_id.remove(id);
        if let Some(outpoint) = &outpoint {
            indexes.inputs.remove(outpoint);
        }
        (script, outpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::OutputType;
    use crate::types::{generate_swap_id, OrderSide, Pair, SwapStatus};

    fn sample_swap(id: &str) -> Swap {
        Swap {
            id: id.to_string(),
            pair: Pair::new("LTC", "BTC"),
            order_side: OrderSide::Sell,
            invoice: "lnbcrt1".to_string(),
            preimage_hash: "ab".repeat(32),
            redeem_script: "51".to_string(),
            lockup_address: "bcrt1q".to_string(),
            output_type: OutputType::Compatibility,
            key_index: 0,
            expected_amount: 1_000,
            accept_zero_conf: false,
            timeout_block_height: 100,
            status: SwapStatus::SwapCreated,
            lockup_transaction: None,
            onchain_amount: None,
            miner_fee: None,
            percentage_fee: 0,
            creation_height: 90,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_output_index_lifecycle() {
        let cache = SwapCache::new();
        let id = generate_swap_id();
        cache.insert_swap(sample_swap(&id), "00141234".to_string());

        assert_eq!(
            cache.match_output("00141234"),
            Some((id.clone(), false))
        );
        assert!(cache.get_swap(&id).is_some());

        let (script, outpoint) = cache.remove(&id);
        assert_eq!(script.as_deref(), Some("00141234"));
        assert!(outpoint.is_none());
        assert!(cache.match_output("00141234").is_none());
        assert!(cache.get_swap(&id).is_none());
    }

    #[test]
    fn test_sharded_map_spreads_keys() {
        let map: ShardedMap<u32> = ShardedMap::new();
        for i in 0..64 {
            map.insert(format!("key-{}", i), i);
        }
        assert_eq!(map.len(), 64);
        assert_eq!(map.get("key-17"), Some(17));
        assert_eq!(map.remove("key-17"), Some(17));
        assert_eq!(map.len(), 63);
    }
}
