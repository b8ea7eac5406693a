//! Lazy, partially-materialised view over one turn-indexed history field.
//!
//! The dict gives the illusion of a full map from turn-id to value while
//! holding only what the subscription preloaded plus whatever was fetched
//! on demand. `store` flushes a diff computed from per-key fingerprints,
//! so untouched values are not rewritten on every turn.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use prompter_core::Serializer;
use prompter_storage::{ContextStorage, FieldName};

use crate::error::{ContextError, Result};

type Fingerprint = [u8; 32];

fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Sha256::digest(bytes).into()
}

pub struct ContextDict<V> {
    storage: Option<Arc<dyn ContextStorage>>,
    ctx_id: String,
    field: FieldName,
    serializer: Serializer,
    /// Materialised key → value mapping; sparse relative to storage.
    items: BTreeMap<i64, V>,
    /// Per-key fingerprint captured when the value was loaded or flushed.
    hashes: HashMap<i64, Fingerprint>,
    /// Keys known to exist in storage, as far as this dict has seen.
    keys: BTreeSet<i64>,
    /// Whether `keys` reflects a full storage enumeration.
    keys_enumerated: bool,
    added: BTreeSet<i64>,
    removed: BTreeSet<i64>,
}

impl<V> ContextDict<V>
where
    V: Serialize + DeserializeOwned,
{
    /// A dict with no storage behind it. Everything lives in `items`.
    pub fn detached(field: FieldName) -> Self {
        Self {
            storage: None,
            ctx_id: String::new(),
            field,
            serializer: Serializer::default(),
            items: BTreeMap::new(),
            hashes: HashMap::new(),
            keys: BTreeSet::new(),
            keys_enumerated: true,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// A dict for a context that has never been stored: attached, empty.
    pub fn new(storage: Arc<dyn ContextStorage>, ctx_id: impl Into<String>, field: FieldName) -> Self {
        let serializer = storage.serializer();
        Self {
            storage: Some(storage),
            ctx_id: ctx_id.into(),
            field,
            serializer,
            items: BTreeMap::new(),
            hashes: HashMap::new(),
            keys: BTreeSet::new(),
            keys_enumerated: true,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Connect to an existing context: materialise the subscribed slice.
    pub async fn connected(
        storage: Arc<dyn ContextStorage>,
        ctx_id: impl Into<String>,
        field: FieldName,
    ) -> Result<Self> {
        let ctx_id = ctx_id.into();
        let serializer = storage.serializer();
        let latest = storage.load_field_latest(&ctx_id, field).await?;

        let mut items = BTreeMap::new();
        let mut hashes = HashMap::new();
        let mut keys = BTreeSet::new();
        for (key, bytes) in latest {
            let value: V = serializer.loads(&bytes)?;
            hashes.insert(key, fingerprint(&bytes));
            keys.insert(key);
            items.insert(key, value);
        }

        Ok(Self {
            storage: Some(storage),
            ctx_id,
            field,
            serializer,
            items,
            hashes,
            keys,
            keys_enumerated: false,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        })
    }

    pub fn field(&self) -> FieldName {
        self.field
    }

    /// Read a value, fetching it from storage when it is known but not
    /// materialised. Fails for keys that exist nowhere.
    pub async fn get(&mut self, key: i64) -> Result<&V> {
        if self.removed.contains(&key) {
            return Err(self.no_such_key(key));
        }
        if self.items.contains_key(&key) {
            return Ok(&self.items[&key]);
        }
        if let Some(storage) = &self.storage {
            let fetched = storage
                .load_field_items(&self.ctx_id, self.field, &[key])
                .await?;
            if let Some((_, bytes)) = fetched.into_iter().next() {
                let value: V = self.serializer.loads(&bytes)?;
                self.hashes.insert(key, fingerprint(&bytes));
                self.keys.insert(key);
                return Ok(self.items.entry(key).or_insert(value));
            }
        }
        Err(self.no_such_key(key))
    }

    /// Read without touching storage. `None` for unmaterialised keys.
    pub fn get_cached(&self, key: i64) -> Option<&V> {
        self.items.get(&key)
    }

    pub fn set(&mut self, key: i64, value: V) {
        self.removed.remove(&key);
        self.keys.insert(key);
        if !self.hashes.contains_key(&key) {
            self.added.insert(key);
        }
        self.items.insert(key, value);
    }

    pub fn remove(&mut self, key: i64) {
        self.items.remove(&key);
        self.hashes.remove(&key);
        self.keys.remove(&key);
        self.added.remove(&key);
        self.removed.insert(key);
    }

    pub async fn contains(&mut self, key: i64) -> Result<bool> {
        if self.removed.contains(&key) {
            return Ok(false);
        }
        if self.items.contains_key(&key) {
            return Ok(true);
        }
        self.ensure_keys().await?;
        Ok(self.keys.contains(&key))
    }

    pub async fn len(&mut self) -> Result<usize> {
        self.ensure_keys().await?;
        Ok(self.keys.len())
    }

    pub async fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// The full key set known to exist, enumerating storage on first use.
    pub async fn keys(&mut self) -> Result<&BTreeSet<i64>> {
        self.ensure_keys().await?;
        Ok(&self.keys)
    }

    /// Materialise an arbitrary key window. Keys absent from storage are
    /// silently skipped.
    pub async fn slice(&mut self, window: impl IntoIterator<Item = i64>) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let missing: Vec<i64> = window
            .into_iter()
            .filter(|key| !self.items.contains_key(key) && !self.removed.contains(key))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let fetched = storage
            .load_field_items(&self.ctx_id, self.field, &missing)
            .await?;
        for (key, bytes) in fetched {
            let value: V = self.serializer.loads(&bytes)?;
            self.hashes.insert(key, fingerprint(&bytes));
            self.keys.insert(key);
            self.items.insert(key, value);
        }
        Ok(())
    }

    /// Materialise everything and return the full map.
    pub async fn items(&mut self) -> Result<&BTreeMap<i64, V>> {
        self.ensure_keys().await?;
        let window: Vec<i64> = self.keys.iter().copied().collect();
        self.slice(window).await?;
        Ok(&self.items)
    }

    /// Materialise everything and return the values in key order.
    pub async fn values(&mut self) -> Result<Vec<&V>> {
        Ok(self.items().await?.values().collect())
    }

    /// The materialised portion, no storage round-trip.
    pub fn materialised(&self) -> &BTreeMap<i64, V> {
        &self.items
    }

    /// Highest materialised entry.
    pub fn last(&self) -> Option<(i64, &V)> {
        self.items.iter().next_back().map(|(&k, v)| (k, v))
    }

    /// Flush the diff: upsert added and fingerprint-changed keys, delete
    /// removed ones. Dict state is only updated after storage succeeds.
    pub async fn store(&mut self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Err(ContextError::Detached.into());
        };
        let rewrite = storage.rewrite_existing();

        let mut batch: Vec<(i64, Option<Vec<u8>>)> = Vec::new();
        let mut fresh_hashes: HashMap<i64, Fingerprint> = HashMap::new();
        for (&key, value) in &self.items {
            let bytes = self.serializer.dumps(value)?;
            let fp = fingerprint(&bytes);
            let dirty =
                rewrite || self.added.contains(&key) || self.hashes.get(&key) != Some(&fp);
            if dirty {
                batch.push((key, Some(bytes)));
            }
            fresh_hashes.insert(key, fp);
        }
        for &key in &self.removed {
            batch.push((key, None));
        }

        if !batch.is_empty() {
            storage
                .update_field_items(&self.ctx_id, self.field, &batch)
                .await?;
        }

        self.hashes = fresh_hashes;
        self.added.clear();
        self.removed.clear();
        Ok(())
    }

    async fn ensure_keys(&mut self) -> Result<()> {
        if self.keys_enumerated {
            return Ok(());
        }
        if let Some(storage) = &self.storage {
            let stored = storage.load_field_keys(&self.ctx_id, self.field).await?;
            for key in stored {
                if !self.removed.contains(&key) {
                    self.keys.insert(key);
                }
            }
        }
        self.keys_enumerated = true;
        Ok(())
    }

    fn no_such_key(&self, key: i64) -> crate::error::PipelineError {
        ContextError::NoSuchKey {
            field: self.field.as_str(),
            key,
        }
        .into()
    }

    #[cfg(test)]
    pub(crate) fn diff_sets(&self) -> (&BTreeSet<i64>, &BTreeSet<i64>) {
        (&self.added, &self.removed)
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for ContextDict<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextDict")
            .field("field", &self.field.as_str())
            .field("items", &self.items)
            .field("keys", &self.keys)
            .field("added", &self.added)
            .field("removed", &self.removed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prompter_core::Message;
    use prompter_storage::{MemoryStorage, Subscript, SubscriptConfig};

    fn msg(text: &str) -> Message {
        Message::text(text)
    }

    async fn seeded_storage(turns: usize) -> Arc<dyn ContextStorage> {
        let storage: Arc<dyn ContextStorage> =
            Arc::new(MemoryStorage::new(SubscriptConfig::uniform(Subscript::Last(2))));
        let mut dict: ContextDict<Message> =
            ContextDict::new(storage.clone(), "c1", FieldName::Requests);
        for turn in 0..turns {
            dict.set(turn as i64, msg(&format!("m{turn}")));
        }
        dict.store().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn connected_materialises_the_subscribed_window() {
        let storage = seeded_storage(5).await;
        let dict: ContextDict<Message> =
            ContextDict::connected(storage, "c1", FieldName::Requests)
                .await
                .unwrap();
        let materialised: Vec<i64> = dict.materialised().keys().copied().collect();
        assert_eq!(materialised, vec![3, 4]);
    }

    #[tokio::test]
    async fn keys_reports_the_full_storage_set() {
        let storage = seeded_storage(5).await;
        let mut dict: ContextDict<Message> =
            ContextDict::connected(storage, "c1", FieldName::Requests)
                .await
                .unwrap();
        let keys: Vec<i64> = dict.keys().await.unwrap().iter().copied().collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn get_lazily_fetches_unmaterialised_keys() {
        let storage = seeded_storage(5).await;
        let mut dict: ContextDict<Message> =
            ContextDict::connected(storage, "c1", FieldName::Requests)
                .await
                .unwrap();
        assert!(dict.get_cached(1).is_none());
        let value = dict.get(1).await.unwrap();
        assert_eq!(value.text.as_deref(), Some("m1"));
        assert!(dict.get_cached(1).is_some());
    }

    #[tokio::test]
    async fn get_unknown_key_fails() {
        let storage = seeded_storage(2).await;
        let mut dict: ContextDict<Message> =
            ContextDict::connected(storage, "c1", FieldName::Requests)
                .await
                .unwrap();
        assert!(dict.get(99).await.is_err());
    }

    #[tokio::test]
    async fn store_clears_diff_sets() {
        let storage: Arc<dyn ContextStorage> = Arc::new(MemoryStorage::default());
        let mut dict: ContextDict<Message> =
            ContextDict::new(storage.clone(), "c1", FieldName::Labels);
        dict.set(0, msg("a"));
        dict.set(1, msg("b"));
        dict.remove(1);
        {
            let (added, removed) = dict.diff_sets();
            assert!(!added.is_empty());
            assert!(!removed.is_empty());
        }
        dict.store().await.unwrap();
        let (added, removed) = dict.diff_sets();
        assert!(added.is_empty());
        assert!(removed.is_empty());

        let stored_keys = storage.load_field_keys("c1", FieldName::Labels).await.unwrap();
        assert_eq!(stored_keys, vec![0]);
    }

    /// Wraps a backend and counts which keys reach `update_field_items`.
    struct CountingStorage {
        inner: MemoryStorage,
        written: std::sync::Mutex<Vec<i64>>,
    }

    #[async_trait::async_trait]
    impl ContextStorage for CountingStorage {
        fn is_concurrent(&self) -> bool {
            self.inner.is_concurrent()
        }

        fn subscript(&self, field: FieldName) -> &prompter_storage::Subscript {
            self.inner.subscript(field)
        }

        async fn load_main_info(
            &self,
            ctx_id: &str,
        ) -> prompter_storage::Result<Option<prompter_storage::MainInfo>> {
            self.inner.load_main_info(ctx_id).await
        }

        async fn update_main_info(
            &self,
            ctx_id: &str,
            info: &prompter_storage::MainInfo,
        ) -> prompter_storage::Result<()> {
            self.inner.update_main_info(ctx_id, info).await
        }

        async fn delete_context(&self, ctx_id: &str) -> prompter_storage::Result<()> {
            self.inner.delete_context(ctx_id).await
        }

        async fn load_field_latest(
            &self,
            ctx_id: &str,
            field: FieldName,
        ) -> prompter_storage::Result<Vec<(i64, Vec<u8>)>> {
            self.inner.load_field_latest(ctx_id, field).await
        }

        async fn load_field_keys(
            &self,
            ctx_id: &str,
            field: FieldName,
        ) -> prompter_storage::Result<Vec<i64>> {
            self.inner.load_field_keys(ctx_id, field).await
        }

        async fn load_field_items(
            &self,
            ctx_id: &str,
            field: FieldName,
            keys: &[i64],
        ) -> prompter_storage::Result<Vec<(i64, Vec<u8>)>> {
            self.inner.load_field_items(ctx_id, field, keys).await
        }

        async fn update_field_items(
            &self,
            ctx_id: &str,
            field: FieldName,
            items: &[(i64, Option<Vec<u8>>)],
        ) -> prompter_storage::Result<()> {
            self.written
                .lock()
                .unwrap()
                .extend(items.iter().map(|(key, _)| *key));
            self.inner.update_field_items(ctx_id, field, items).await
        }

        async fn clear_all(&self) -> prompter_storage::Result<()> {
            self.inner.clear_all().await
        }
    }

    #[tokio::test]
    async fn unchanged_values_are_not_rewritten() {
        let storage = Arc::new(CountingStorage {
            inner: MemoryStorage::new(SubscriptConfig::uniform(Subscript::All)),
            written: std::sync::Mutex::new(Vec::new()),
        });
        let dyn_storage: Arc<dyn ContextStorage> = storage.clone();
        {
            let mut dict: ContextDict<Message> =
                ContextDict::new(dyn_storage.clone(), "c1", FieldName::Requests);
            for turn in 0..3 {
                dict.set(turn, msg(&format!("m{turn}")));
            }
            dict.store().await.unwrap();
        }
        storage.written.lock().unwrap().clear();

        let mut dict: ContextDict<Message> =
            ContextDict::connected(dyn_storage, "c1", FieldName::Requests)
                .await
                .unwrap();
        dict.set(2, msg("changed"));
        dict.store().await.unwrap();

        // Write-avoidance: only the fingerprint-changed key is upserted.
        assert_eq!(*storage.written.lock().unwrap(), vec![2]);
        let value = dict.get(2).await.unwrap();
        assert_eq!(value.text.as_deref(), Some("changed"));
    }

    #[tokio::test]
    async fn removed_key_reads_fail_before_flush() {
        let storage = seeded_storage(3).await;
        let mut dict: ContextDict<Message> =
            ContextDict::connected(storage, "c1", FieldName::Requests)
                .await
                .unwrap();
        dict.remove(2);
        assert!(dict.get(2).await.is_err());
        assert!(!dict.contains(2).await.unwrap());
    }

    #[tokio::test]
    async fn detached_dict_cannot_flush() {
        let mut dict: ContextDict<Message> = ContextDict::detached(FieldName::Labels);
        dict.set(0, msg("x"));
        assert!(dict.store().await.is_err());
    }
}
