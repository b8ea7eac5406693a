//! In-process storage backend.
//!
//! Mirrors the logical two-table layout: one header per context plus a
//! turn-indexed map with one optional blob slot per history field.
//! Safe for concurrent mutators, so `is_concurrent` is true.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::contract::{ContextStorage, FieldName, MainInfo};
use crate::error::Result;
use crate::subscript::{Subscript, SubscriptConfig};

#[derive(Debug, Default)]
struct ContextRecord {
    /// `None` until the header is first written; field rows may arrive
    /// before it when a flush runs its parts concurrently.
    main: Option<MainInfo>,
    /// turn_key -> one optional blob per history field.
    turns: BTreeMap<i64, [Option<Vec<u8>>; 3]>,
}

pub struct MemoryStorage {
    contexts: DashMap<String, ContextRecord>,
    subscripts: SubscriptConfig,
    rewrite_existing: bool,
}

impl MemoryStorage {
    pub fn new(subscripts: SubscriptConfig) -> Self {
        Self {
            contexts: DashMap::new(),
            subscripts,
            rewrite_existing: false,
        }
    }

    pub fn with_rewrite_existing(mut self, rewrite_existing: bool) -> Self {
        self.rewrite_existing = rewrite_existing;
        self
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(SubscriptConfig::default())
    }
}

#[async_trait]
impl ContextStorage for MemoryStorage {
    fn is_concurrent(&self) -> bool {
        true
    }

    fn rewrite_existing(&self) -> bool {
        self.rewrite_existing
    }

    fn subscript(&self, field: FieldName) -> &Subscript {
        self.subscripts.get(field)
    }

    async fn load_main_info(&self, ctx_id: &str) -> Result<Option<MainInfo>> {
        Ok(self.contexts.get(ctx_id).and_then(|r| r.main.clone()))
    }

    async fn update_main_info(&self, ctx_id: &str, info: &MainInfo) -> Result<()> {
        let mut record = self.contexts.entry(ctx_id.to_string()).or_default();
        let created_at = match &record.main {
            Some(existing) => existing.created_at,
            None => info.created_at,
        };
        record.main = Some(MainInfo {
            created_at,
            ..info.clone()
        });
        Ok(())
    }

    async fn delete_context(&self, ctx_id: &str) -> Result<()> {
        self.contexts.remove(ctx_id);
        Ok(())
    }

    async fn load_field_latest(
        &self,
        ctx_id: &str,
        field: FieldName,
    ) -> Result<Vec<(i64, Vec<u8>)>> {
        let subscript = self.subscript(field);
        let Some(record) = self.contexts.get(ctx_id) else {
            return Ok(Vec::new());
        };
        let mut result = Vec::new();
        let mut position = 0;
        for (&key, slots) in record.turns.iter().rev() {
            let Some(bytes) = &slots[field.index()] else {
                continue;
            };
            if subscript.admits(position, key) {
                result.push((key, bytes.clone()));
            }
            position += 1;
        }
        Ok(result)
    }

    async fn load_field_keys(&self, ctx_id: &str, field: FieldName) -> Result<Vec<i64>> {
        let Some(record) = self.contexts.get(ctx_id) else {
            return Ok(Vec::new());
        };
        Ok(record
            .turns
            .iter()
            .filter(|(_, slots)| slots[field.index()].is_some())
            .map(|(&key, _)| key)
            .collect())
    }

    async fn load_field_items(
        &self,
        ctx_id: &str,
        field: FieldName,
        keys: &[i64],
    ) -> Result<Vec<(i64, Vec<u8>)>> {
        let Some(record) = self.contexts.get(ctx_id) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|&key| {
                record
                    .turns
                    .get(&key)
                    .and_then(|slots| slots[field.index()].clone())
                    .map(|bytes| (key, bytes))
            })
            .collect())
    }

    async fn update_field_items(
        &self,
        ctx_id: &str,
        field: FieldName,
        items: &[(i64, Option<Vec<u8>>)],
    ) -> Result<()> {
        let mut record = self.contexts.entry(ctx_id.to_string()).or_default();
        for (key, bytes) in items {
            let slots = record.turns.entry(*key).or_default();
            slots[field.index()] = bytes.clone();
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.contexts.clear();
        Ok(())
    }
}
