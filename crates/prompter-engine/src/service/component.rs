//! The shared per-run protocol every pipeline component follows.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::{error, warn};

use crate::actor::Actor;
use crate::context::SharedContext;
use crate::script::Condition;
use crate::service::extra::{ExtraHandlerFn, ExtraHandlerRuntimeInfo, ExtraHandlerStage};
use crate::service::group::ServiceGroup;
use crate::service::service::Service;
use crate::service::types::ComponentExecutionState;

/// Fields common to every component.
pub struct ComponentInfo {
    /// Unique within the parent group; auto-derived from the component
    /// kind when left empty. Must not be blank or contain `.`.
    pub name: String,
    /// Dotted path from the pipeline root; globally unique. Assigned by
    /// the construction-time tree walk.
    pub path: String,
    /// Maximum body execution time. Only effective on components that run
    /// inside a parallel subgroup.
    pub timeout: Option<Duration>,
    /// Requested parallel-safety declaration. `None` means "not declared",
    /// which runs synchronously but is distinguished for warning purposes.
    pub asynchronous: Option<bool>,
    /// The component runs this turn only if this holds.
    pub start_condition: Condition,
    pub before_handler: Vec<Arc<dyn ExtraHandlerFn>>,
    pub after_handler: Vec<Arc<dyn ExtraHandlerFn>>,
}

impl ComponentInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            timeout: None,
            asynchronous: None,
            start_condition: Condition::default(),
            before_handler: Vec::new(),
            after_handler: Vec::new(),
        }
    }

    pub fn is_async(&self) -> bool {
        self.asynchronous.unwrap_or(false)
    }
}

impl Default for ComponentInfo {
    fn default() -> Self {
        Self::named("")
    }
}

/// One unit of pipeline work: a leaf service, a composed group, or the
/// actor itself.
pub enum Component {
    Service(Service),
    Group(ServiceGroup),
    Actor(Actor),
}

impl Component {
    pub fn info(&self) -> &ComponentInfo {
        match self {
            Self::Service(s) => &s.info,
            Self::Group(g) => &g.info,
            Self::Actor(a) => &a.info,
        }
    }

    pub fn info_mut(&mut self) -> &mut ComponentInfo {
        match self {
            Self::Service(s) => &mut s.info,
            Self::Group(g) => &mut g.info,
            Self::Actor(a) => &mut a.info,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Service(_) => "service",
            Self::Group(_) => "group",
            Self::Actor(_) => "actor",
        }
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn path(&self) -> &str {
        &self.info().path
    }

    // Builder-style knobs, shared by every component kind.

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info_mut().name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.info_mut().timeout = Some(timeout);
        self
    }

    /// Declare the component safe to run concurrently with adjacent
    /// asynchronous components.
    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.info_mut().asynchronous = Some(asynchronous);
        self
    }

    pub fn with_start_condition(mut self, condition: Condition) -> Self {
        self.info_mut().start_condition = condition;
        self
    }

    pub fn with_before_handler(mut self, handler: impl ExtraHandlerFn + 'static) -> Self {
        self.info_mut().before_handler.push(Arc::new(handler));
        self
    }

    pub fn with_after_handler(mut self, handler: impl ExtraHandlerFn + 'static) -> Self {
        self.info_mut().after_handler.push(Arc::new(handler));
        self
    }

    /// Execute the full per-run protocol: start condition, before
    /// handlers, the body under its timeout, after handlers, and the
    /// finished signal — in that order, on every exit path.
    ///
    /// Never propagates errors: a failing or timed-out body marks the
    /// component `Failed` and the group moves on.
    pub fn run<'a>(&'a self, ctx: &'a SharedContext) -> BoxFuture<'a, ()> {
        Box::pin(self.run_protocol(ctx))
    }

    async fn run_protocol(&self, ctx: &SharedContext) {
        let started = {
            let guard = ctx.lock().await;
            self.info().start_condition.evaluate(&guard).await
        };
        if !started {
            self.set_state(ctx, ComponentExecutionState::NotRun).await;
            self.signal_done(ctx).await;
            return;
        }

        self.run_handlers(ctx, ExtraHandlerStage::Before).await;

        self.set_state(ctx, ComponentExecutionState::Running).await;
        let body = self.run_component(ctx);
        let outcome = match self.info().timeout {
            Some(timeout) => match tokio::time::timeout(timeout, body).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(component = %self.path(), ?timeout, "component timed out");
                    Err(anyhow::anyhow!("timed out"))
                }
            },
            None => body.await,
        };
        match outcome {
            Ok(Some(state)) => self.set_state(ctx, state).await,
            Ok(None) => self.set_state(ctx, ComponentExecutionState::Finished).await,
            Err(error) => {
                error!(component = %self.path(), %error, "component execution failed");
                self.set_state(ctx, ComponentExecutionState::Failed).await;
            }
        }

        self.run_handlers(ctx, ExtraHandlerStage::After).await;
        self.signal_done(ctx).await;
    }

    /// The body alone — no condition checking, handlers, or error
    /// containment. An explicit returned state overrides `Finished`.
    async fn run_component(
        &self,
        ctx: &SharedContext,
    ) -> anyhow::Result<Option<ComponentExecutionState>> {
        match self {
            Self::Service(service) => service.run_body(ctx).await.map(|_| None),
            Self::Group(group) => group.run_children(ctx).await,
            Self::Actor(actor) => actor.run_body(ctx).await.map(|_| None),
        }
    }

    async fn run_handlers(&self, ctx: &SharedContext, stage: ExtraHandlerStage) {
        let handlers = match stage {
            ExtraHandlerStage::Before => &self.info().before_handler,
            ExtraHandlerStage::After => &self.info().after_handler,
        };
        for handler in handlers {
            let mut guard = ctx.lock().await;
            let info = ExtraHandlerRuntimeInfo {
                path: self.path().to_string(),
                name: self.name().to_string(),
                stage,
                status: state_of(&guard, self.path()),
            };
            if let Err(error) = handler.handle(&mut guard, &info).await {
                warn!(component = %self.path(), ?stage, %error, "extra handler failed");
            }
        }
    }

    pub async fn get_state(&self, ctx: &SharedContext) -> ComponentExecutionState {
        let guard = ctx.lock().await;
        state_of(&guard, self.path())
    }

    async fn set_state(&self, ctx: &SharedContext, state: ComponentExecutionState) {
        let mut guard = ctx.lock().await;
        guard
            .framework_data
            .service_states
            .entry(self.path().to_string())
            .or_default()
            .status = state;
    }

    async fn signal_done(&self, ctx: &SharedContext) {
        let guard = ctx.lock().await;
        if let Some(state) = guard.framework_data.service_states.get(self.path()) {
            state.done.cancel();
        }
    }
}

pub(crate) fn state_of(ctx: &crate::context::Context, path: &str) -> ComponentExecutionState {
    ctx.framework_data
        .service_states
        .get(path)
        .map(|state| state.status)
        .unwrap_or_default()
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("kind", &self.kind_name())
            .field("name", &self.name())
            .field("path", &self.path())
            .field("asynchronous", &self.info().is_async())
            .finish()
    }
}
