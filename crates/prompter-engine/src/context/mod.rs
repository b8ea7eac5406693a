//! Per-dialog state: the turn histories, misc data, and the transient
//! runtime scaffolding the pipeline needs while a turn is in flight.

pub mod dict;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use prompter_core::{AbsoluteNodeLabel, Message};
use prompter_storage::{ContextStorage, FieldName, MainInfo};

use crate::error::{ContextError, PipelineError, Result};
use crate::pipeline::RunConfig;
use crate::script::Node;
use crate::service::ServiceState;

pub use dict::ContextDict;

/// The context as components see it: shared, locked around suspension
/// points. Parallel siblings must not write conflicting fields — that is
/// the component author's obligation, not something the scheduler checks.
pub type SharedContext = Arc<tokio::sync::Mutex<Context>>;

/// Wall-clock nanoseconds. Observability only, never used for ordering.
fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Transient runtime state the framework threads through a turn.
///
/// Everything except `stats` is rebuilt each turn and excluded from the
/// persisted blob.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FrameworkData {
    /// Execution status per component path. Cleared at the start of
    /// every turn.
    #[serde(skip)]
    pub service_states: HashMap<String, ServiceState>,

    /// Mutable copy of the inherited node the actor currently sits on.
    /// Processing steps may alter it freely without touching the script.
    #[serde(skip)]
    pub current_node: Option<Node>,

    /// Run configuration of the pipeline that manages this context:
    /// script, start label, fallback label.
    #[serde(skip)]
    pub run_config: Option<Arc<RunConfig>>,

    /// Fatal error parked by the actor for the pipeline to surface after
    /// the service group unwinds.
    #[serde(skip)]
    pub turn_error: Option<PipelineError>,

    /// Cross-turn stats collection. The only part that persists.
    #[serde(default)]
    pub stats: HashMap<String, serde_json::Value>,
}

pub struct Context {
    id: String,
    current_turn_id: i64,
    pub labels: ContextDict<AbsoluteNodeLabel>,
    pub requests: ContextDict<Message>,
    pub responses: ContextDict<Message>,
    pub misc: HashMap<String, serde_json::Value>,
    pub framework_data: FrameworkData,
    created_at: i64,
    updated_at: i64,
    origin_interface: Option<String>,
    storage: Option<Arc<dyn ContextStorage>>,
}

impl Context {
    /// A storage-less context seeded with the start label. Test and
    /// embedding convenience; `store` will fail on it.
    pub fn fresh(start_label: AbsoluteNodeLabel) -> Self {
        let mut labels = ContextDict::detached(FieldName::Labels);
        labels.set(0, start_label);
        Self {
            id: Uuid::new_v4().to_string(),
            current_turn_id: 0,
            labels,
            requests: ContextDict::detached(FieldName::Requests),
            responses: ContextDict::detached(FieldName::Responses),
            misc: HashMap::new(),
            framework_data: FrameworkData::default(),
            created_at: now_ns(),
            updated_at: now_ns(),
            origin_interface: None,
            storage: None,
        }
    }

    /// Load a context from storage, or create it when the id is new.
    ///
    /// With no id a fresh context under a random UUID is returned. With an
    /// id whose header exists, the header and the three history dicts are
    /// loaded — concurrently when the backend tolerates it.
    pub async fn connected(
        storage: Arc<dyn ContextStorage>,
        start_label: AbsoluteNodeLabel,
        id: Option<&str>,
    ) -> Result<Self> {
        let id = match id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let main = storage.load_main_info(&id).await?;
        let Some(main) = main else {
            return Ok(Self::created(storage, start_label, id));
        };

        let (labels, requests, responses) = if storage.is_concurrent() {
            let (labels, requests, responses) = tokio::join!(
                ContextDict::connected(storage.clone(), id.clone(), FieldName::Labels),
                ContextDict::connected(storage.clone(), id.clone(), FieldName::Requests),
                ContextDict::connected(storage.clone(), id.clone(), FieldName::Responses),
            );
            (labels?, requests?, responses?)
        } else {
            (
                ContextDict::connected(storage.clone(), id.clone(), FieldName::Labels).await?,
                ContextDict::connected(storage.clone(), id.clone(), FieldName::Requests).await?,
                ContextDict::connected(storage.clone(), id.clone(), FieldName::Responses).await?,
            )
        };

        let serializer = storage.serializer();
        let misc: HashMap<String, serde_json::Value> = serializer.loads(&main.misc)?;
        let framework_data: FrameworkData = serializer.loads(&main.framework_data)?;
        let origin_interface: Option<String> = framework_data
            .stats
            .get(ORIGIN_INTERFACE_KEY)
            .and_then(|v| v.as_str().map(String::from));

        Ok(Self {
            id,
            current_turn_id: main.current_turn_id,
            labels,
            requests,
            responses,
            misc,
            framework_data,
            created_at: main.created_at,
            updated_at: main.updated_at,
            origin_interface,
            storage: Some(storage),
        })
    }

    fn created(storage: Arc<dyn ContextStorage>, start_label: AbsoluteNodeLabel, id: String) -> Self {
        let mut labels = ContextDict::new(storage.clone(), id.clone(), FieldName::Labels);
        labels.set(0, start_label);
        Self {
            requests: ContextDict::new(storage.clone(), id.clone(), FieldName::Requests),
            responses: ContextDict::new(storage.clone(), id.clone(), FieldName::Responses),
            id,
            current_turn_id: 0,
            labels,
            misc: HashMap::new(),
            framework_data: FrameworkData::default(),
            created_at: now_ns(),
            updated_at: now_ns(),
            origin_interface: None,
            storage: Some(storage),
        }
    }

    /// Persist the header and flush all three history dicts.
    pub async fn store(&mut self) -> Result<()> {
        let Some(storage) = self.storage.clone() else {
            return Err(ContextError::Detached.into());
        };
        self.updated_at = now_ns();

        // origin_interface rides in the stats blob so the header schema
        // stays the same across backends.
        if let Some(origin) = &self.origin_interface {
            self.framework_data.stats.insert(
                ORIGIN_INTERFACE_KEY.to_string(),
                serde_json::Value::String(origin.clone()),
            );
        }

        let serializer = storage.serializer();
        let info = MainInfo {
            current_turn_id: self.current_turn_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            misc: serializer.dumps(&self.misc)?,
            framework_data: serializer.dumps(&self.framework_data)?,
        };

        if storage.is_concurrent() {
            let (main, labels, requests, responses) = tokio::join!(
                storage.update_main_info(&self.id, &info),
                self.labels.store(),
                self.requests.store(),
                self.responses.store(),
            );
            main?;
            labels?;
            requests?;
            responses?;
        } else {
            storage.update_main_info(&self.id, &info).await?;
            self.labels.store().await?;
            self.requests.store().await?;
            self.responses.store().await?;
        }
        Ok(())
    }

    /// Remove every row for this context across both tables.
    pub async fn delete(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Err(ContextError::Detached.into());
        };
        storage.delete_context(&self.id).await?;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_turn_id(&self) -> i64 {
        self.current_turn_id
    }

    pub(crate) fn advance_turn(&mut self) {
        self.current_turn_id += 1;
    }

    pub fn origin_interface(&self) -> Option<&str> {
        self.origin_interface.as_deref()
    }

    /// Set once, on the dialog's first turn. Later calls are ignored.
    pub fn set_origin_interface(&mut self, name: impl Into<String>) {
        if self.origin_interface.is_none() {
            self.origin_interface = Some(name.into());
        }
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn last_label(&self) -> Result<&AbsoluteNodeLabel> {
        self.labels
            .last()
            .map(|(_, v)| v)
            .ok_or_else(|| ContextError::EmptyHistory { field: "labels" }.into())
    }

    pub fn last_request(&self) -> Result<&Message> {
        self.requests
            .last()
            .map(|(_, v)| v)
            .ok_or_else(|| ContextError::EmptyHistory { field: "requests" }.into())
    }

    pub fn last_response(&self) -> Result<&Message> {
        self.responses
            .last()
            .map(|(_, v)| v)
            .ok_or_else(|| ContextError::EmptyHistory { field: "responses" }.into())
    }

    /// The pipeline run configuration, reachable from user callables.
    pub fn pipeline(&self) -> Result<&Arc<RunConfig>> {
        self.framework_data
            .run_config
            .as_ref()
            .ok_or_else(|| ContextError::PipelineNotSet.into())
    }

    /// The inherited node the actor currently sits on.
    pub fn current_node(&self) -> Result<&Node> {
        self.framework_data
            .current_node
            .as_ref()
            .ok_or_else(|| ContextError::CurrentNodeNotSet.into())
    }

    pub fn current_node_mut(&mut self) -> Result<&mut Node> {
        self.framework_data
            .current_node
            .as_mut()
            .ok_or_else(|| ContextError::CurrentNodeNotSet.into())
    }

    /// Content equality for tests: id, turn counter, materialised
    /// histories and misc. Framework data and timestamps are ignored.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.current_turn_id == other.current_turn_id
            && self.labels.materialised() == other.labels.materialised()
            && self.requests.materialised() == other.requests.materialised()
            && self.responses.materialised() == other.responses.materialised()
            && self.misc == other.misc
    }
}

const ORIGIN_INTERFACE_KEY: &str = "origin_interface";

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("current_turn_id", &self.current_turn_id)
            .field("labels", &self.labels)
            .field("origin_interface", &self.origin_interface)
            .finish()
    }
}
