use async_trait::async_trait;
use prompter_core::Serializer;

use crate::error::Result;
use crate::subscript::Subscript;

/// The per-context header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainInfo {
    pub current_turn_id: i64,
    /// Wall-clock nanoseconds of the first write. Observability only.
    pub created_at: i64,
    /// Wall-clock nanoseconds of the last write. Observability only.
    pub updated_at: i64,
    pub misc: Vec<u8>,
    pub framework_data: Vec<u8>,
}

/// The three turn-indexed history fields a context persists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    Labels,
    Requests,
    Responses,
}

impl FieldName {
    pub const ALL: [FieldName; 3] = [Self::Labels, Self::Requests, Self::Responses];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Labels => "labels",
            Self::Requests => "requests",
            Self::Responses => "responses",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Labels => 0,
            Self::Requests => 1,
            Self::Responses => 2,
        }
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract every context storage backend implements.
///
/// Values are opaque byte blobs produced and consumed by the backend's
/// [`Serializer`]; the engine never assumes a particular encoding.
/// All operations are independently awaitable; a backend that cannot
/// tolerate concurrent mutators on one context id reports
/// `is_concurrent() == false` and the pipeline serialises access to it.
#[async_trait]
pub trait ContextStorage: Send + Sync {
    /// Whether multiple concurrent mutators on the same context id are safe.
    fn is_concurrent(&self) -> bool;

    /// When true, flushes upsert every materialised key even if its
    /// fingerprint did not change. Defaults to write-avoidance.
    fn rewrite_existing(&self) -> bool {
        false
    }

    /// Blob codec for history values and main-info blobs.
    fn serializer(&self) -> Serializer {
        Serializer::Json
    }

    /// The preload policy for one history field.
    fn subscript(&self, field: FieldName) -> &Subscript;

    /// Single-row lookup of the per-context header; `None` when the
    /// context has never been stored.
    async fn load_main_info(&self, ctx_id: &str) -> Result<Option<MainInfo>>;

    /// Upsert the header. `created_at` is preserved on conflict.
    async fn update_main_info(&self, ctx_id: &str, info: &MainInfo) -> Result<()>;

    /// Remove the header and all field rows for this context.
    async fn delete_context(&self, ctx_id: &str) -> Result<()>;

    /// Return the subscribed slice for one field, ordered by key descending.
    async fn load_field_latest(&self, ctx_id: &str, field: FieldName)
        -> Result<Vec<(i64, Vec<u8>)>>;

    /// Every non-null key for one field.
    async fn load_field_keys(&self, ctx_id: &str, field: FieldName) -> Result<Vec<i64>>;

    /// Materialise an arbitrary key window. Keys absent from storage are
    /// silently omitted from the result.
    async fn load_field_items(
        &self,
        ctx_id: &str,
        field: FieldName,
        keys: &[i64],
    ) -> Result<Vec<(i64, Vec<u8>)>>;

    /// Upsert each item; `None` bytes delete that key.
    async fn update_field_items(
        &self,
        ctx_id: &str,
        field: FieldName,
        items: &[(i64, Option<Vec<u8>>)],
    ) -> Result<()>;

    /// Drop every context. Test-only.
    async fn clear_all(&self) -> Result<()>;
}
