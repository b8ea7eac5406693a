//! Top-level orchestrator: ties a messenger request to one full turn —
//! load context, pre-services, actor, post-services, persist, respond.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};

use prompter_core::{AbsoluteNodeLabel, Message};
use prompter_storage::{ContextStorage, MemoryStorage};

use crate::actor::Actor;
use crate::context::{Context, SharedContext};
use crate::error::{Result, ValidationError};
use crate::script::Script;
use crate::service::{Component, ExtraHandlerFn, ExtraHandlerStage, ServiceGroup};

/// What user callables and the actor can reach through the context while
/// a turn is in flight.
#[derive(Debug)]
pub struct RunConfig {
    pub script: Arc<Script>,
    pub start_label: AbsoluteNodeLabel,
    pub fallback_label: AbsoluteNodeLabel,
}

/// A request/response source driving the pipeline.
///
/// Polling interfaces own a receive loop and feed turns one by one;
/// callback interfaces expose an endpoint whose handler runs a turn and
/// returns once the context is persisted.
#[async_trait]
pub trait MessengerInterface: Send + Sync {
    /// Stable lowercase identifier, recorded as the dialog's
    /// `origin_interface` on its first turn.
    fn name(&self) -> &str;

    /// Take over the transport until it shuts down.
    async fn connect(&self, pipeline: Arc<Pipeline>) -> anyhow::Result<()>;
}

pub struct Pipeline {
    run_config: Arc<RunConfig>,
    root: Component,
    storage: Arc<dyn ContextStorage>,
    /// Per-dialog keyed locks: turns for one dialog id never overlap.
    dialog_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Taken for the whole turn when the backend declares it cannot
    /// tolerate concurrent mutators.
    storage_gate: Option<tokio::sync::Mutex<()>>,
}

impl Pipeline {
    pub fn builder(script: Script, start_label: impl Into<AbsoluteNodeLabel>) -> PipelineBuilder {
        PipelineBuilder {
            script,
            start_label: start_label.into(),
            fallback_label: None,
            storage: None,
            pre_services: Vec::new(),
            post_services: Vec::new(),
            global_handlers: Vec::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn ContextStorage> {
        &self.storage
    }

    pub fn run_config(&self) -> &Arc<RunConfig> {
        &self.run_config
    }

    /// Process one turn for a dialog. Turns for the same dialog id are
    /// serialised; different ids run freely concurrently.
    #[instrument(skip(self, request))]
    pub async fn run_turn(&self, request: Message, dialog_id: &str) -> Result<Message> {
        self.run_turn_as(None, request, dialog_id).await
    }

    /// Like [`run_turn`](Self::run_turn), recording which messenger the
    /// request came from.
    pub async fn run_turn_as(
        &self,
        interface: Option<&str>,
        request: Message,
        dialog_id: &str,
    ) -> Result<Message> {
        let dialog_lock = self
            .dialog_locks
            .entry(dialog_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _dialog_guard = dialog_lock.lock().await;
        let _storage_guard = match &self.storage_gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let mut ctx = Context::connected(
            self.storage.clone(),
            self.run_config.start_label.clone(),
            Some(dialog_id),
        )
        .await?;

        ctx.framework_data.service_states.clear();
        ctx.framework_data.turn_error = None;
        ctx.framework_data.run_config = Some(self.run_config.clone());
        if let Some(name) = interface {
            ctx.set_origin_interface(name);
        }

        // The request lands at the upcoming turn id before any service
        // runs, so pre-services already see it as `last_request`.
        let upcoming_turn = ctx.current_turn_id() + 1;
        ctx.requests.set(upcoming_turn, request);

        let shared: SharedContext = Arc::new(tokio::sync::Mutex::new(ctx));
        self.root.run(&shared).await;

        let mut guard = shared.lock().await;
        if let Some(error) = guard.framework_data.turn_error.take() {
            // Nothing was persisted; the dialog stays at its previous turn.
            return Err(error);
        }
        guard.store().await?;
        debug!(dialog_id, turn_id = guard.current_turn_id(), "turn persisted");
        Ok(guard.last_response()?.clone())
    }

    /// Remove a dialog from storage entirely.
    pub async fn delete_dialog(&self, dialog_id: &str) -> Result<()> {
        self.storage.delete_context(dialog_id).await?;
        self.dialog_locks.remove(dialog_id);
        Ok(())
    }
}

pub struct PipelineBuilder {
    script: Script,
    start_label: AbsoluteNodeLabel,
    fallback_label: Option<AbsoluteNodeLabel>,
    storage: Option<Arc<dyn ContextStorage>>,
    pre_services: Vec<Component>,
    post_services: Vec<Component>,
    global_handlers: Vec<(ExtraHandlerStage, Arc<dyn ExtraHandlerFn>)>,
}

impl PipelineBuilder {
    /// Label used when no transition fires. Defaults to the start label.
    pub fn fallback_label(mut self, label: impl Into<AbsoluteNodeLabel>) -> Self {
        self.fallback_label = Some(label.into());
        self
    }

    pub fn storage(mut self, storage: Arc<dyn ContextStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Append a component to run before the actor each turn.
    pub fn pre_service(mut self, component: Component) -> Self {
        self.pre_services.push(component);
        self
    }

    /// Append a component to run after the actor each turn.
    pub fn post_service(mut self, component: Component) -> Self {
        self.post_services.push(component);
        self
    }

    /// Attach a handler to run before every component in the pipeline.
    /// Typical use is cross-cutting stats collection.
    pub fn global_before_handler(mut self, handler: impl ExtraHandlerFn + 'static) -> Self {
        self.global_handlers
            .push((ExtraHandlerStage::Before, Arc::new(handler)));
        self
    }

    /// Attach a handler to run after every component in the pipeline.
    pub fn global_after_handler(mut self, handler: impl ExtraHandlerFn + 'static) -> Self {
        self.global_handlers
            .push((ExtraHandlerStage::After, Arc::new(handler)));
        self
    }

    /// Validate everything and assemble the pipeline. Validation problems
    /// are fatal here and never surface during turns.
    pub fn build(self) -> Result<Pipeline> {
        let script = self.script;
        script.validate()?;
        script.validate_label(&self.start_label)?;
        let fallback_label = self.fallback_label.unwrap_or_else(|| self.start_label.clone());
        script.validate_label(&fallback_label)?;

        let storage: Arc<dyn ContextStorage> = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::default()));

        let mut root = ServiceGroup::named(
            "pipeline",
            vec![
                ServiceGroup::named("pre", self.pre_services),
                Actor::new(),
                ServiceGroup::named("post", self.post_services),
            ],
        );
        assign_paths(&mut root, "")?;
        for (stage, handler) in &self.global_handlers {
            attach_global_handler(&mut root, *stage, handler);
        }
        if let Component::Group(group) = &root {
            group.log_optimization_warnings();
        }

        let storage_gate = if storage.is_concurrent() {
            None
        } else {
            Some(tokio::sync::Mutex::new(()))
        };

        Ok(Pipeline {
            run_config: Arc::new(RunConfig {
                script: Arc::new(script),
                start_label: self.start_label,
                fallback_label,
            }),
            root,
            storage,
            dialog_locks: DashMap::new(),
            storage_gate,
        })
    }
}

/// Construction-time walk: derive missing names, reject invalid or
/// colliding ones, and assign every component its dotted path.
pub(crate) fn assign_paths(
    component: &mut Component,
    parent_path: &str,
) -> std::result::Result<(), ValidationError> {
    if component.info().name.is_empty() {
        component.info_mut().name = component.kind_name().to_string();
    }
    validate_name(&component.info().name)?;

    let path = if parent_path.is_empty() {
        component.info().name.clone()
    } else {
        format!("{parent_path}.{}", component.info().name)
    };
    component.info_mut().path = path.clone();

    if let Component::Group(group) = component {
        let mut seen: HashSet<String> = HashSet::new();
        for (index, child) in group.components.iter_mut().enumerate() {
            if child.info().name.is_empty() {
                child.info_mut().name = format!("{}_{index}", child.kind_name());
            }
            if !seen.insert(child.info().name.clone()) {
                return Err(ValidationError::DuplicateComponentName {
                    name: child.info().name.clone(),
                });
            }
        }
        for child in group.components.iter_mut() {
            assign_paths(child, &path)?;
        }
    }
    Ok(())
}

/// Attach a global extra handler to a component and all its descendants.
fn attach_global_handler(
    component: &mut Component,
    stage: ExtraHandlerStage,
    handler: &Arc<dyn ExtraHandlerFn>,
) {
    let info = component.info_mut();
    match stage {
        ExtraHandlerStage::Before => info.before_handler.push(handler.clone()),
        ExtraHandlerStage::After => info.after_handler.push(handler.clone()),
    }
    if let Component::Group(group) = component {
        for child in group.components.iter_mut() {
            attach_global_handler(child, stage, handler);
        }
    }
}

fn validate_name(name: &str) -> std::result::Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::BlankComponentName);
    }
    if name.contains('.') {
        return Err(ValidationError::DottedComponentName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Flow, Node, Transition};
    use crate::service::Service;

    fn toy_script() -> Script {
        Script::new().flow(
            "flow",
            Flow::new()
                .node(
                    "start",
                    Node::new().transition(Transition::new("start", true)),
                )
                .node("other", Node::new()),
        )
    }

    #[test]
    fn build_rejects_unknown_start_label() {
        let result = Pipeline::builder(toy_script(), ("flow", "missing")).build();
        assert!(matches!(
            result,
            Err(PipelineError::Validation(ValidationError::UnknownNode { .. }))
        ));
    }

    #[test]
    fn build_rejects_dotted_component_names() {
        let result = Pipeline::builder(toy_script(), ("flow", "start"))
            .pre_service(Service::named("bad.name", |_ctx| async { Ok(()) }))
            .build();
        assert!(matches!(
            result,
            Err(PipelineError::Validation(
                ValidationError::DottedComponentName { .. }
            ))
        ));
    }

    #[test]
    fn build_rejects_duplicate_sibling_names() {
        let result = Pipeline::builder(toy_script(), ("flow", "start"))
            .pre_service(Service::named("twin", |_ctx| async { Ok(()) }))
            .pre_service(Service::named("twin", |_ctx| async { Ok(()) }))
            .build();
        assert!(matches!(
            result,
            Err(PipelineError::Validation(
                ValidationError::DuplicateComponentName { .. }
            ))
        ));
    }

    #[test]
    fn paths_are_dotted_from_the_root() {
        let pipeline = Pipeline::builder(toy_script(), ("flow", "start"))
            .pre_service(Service::named("first", |_ctx| async { Ok(()) }))
            .build()
            .unwrap();
        let Component::Group(root) = &pipeline.root else {
            panic!("root must be a group");
        };
        let Component::Group(pre) = &root.components[0] else {
            panic!("pre must be a group");
        };
        assert_eq!(root.info().path, "pipeline");
        assert_eq!(pre.info().path, "pipeline.pre");
        assert_eq!(pre.components[0].path(), "pipeline.pre.first");
        assert_eq!(root.components[1].path(), "pipeline.actor");
    }

    #[test]
    fn unnamed_services_get_indexed_names() {
        let pipeline = Pipeline::builder(toy_script(), ("flow", "start"))
            .pre_service(Service::new(|_ctx| async { Ok(()) }))
            .pre_service(Service::new(|_ctx| async { Ok(()) }))
            .build()
            .unwrap();
        let Component::Group(root) = &pipeline.root else {
            panic!("root must be a group");
        };
        let Component::Group(pre) = &root.components[0] else {
            panic!("pre must be a group");
        };
        assert_eq!(pre.components[0].name(), "service_0");
        assert_eq!(pre.components[1].name(), "service_1");
    }
}
