//! Start conditions over component execution states, for sequencing
//! components against each other within a turn.

use async_trait::async_trait;

use crate::context::Context;
use crate::script::{Condition, ConditionFn};
use crate::service::component::state_of;
use crate::service::types::ComponentExecutionState;

struct ServiceFinished {
    path: String,
}

#[async_trait]
impl ConditionFn for ServiceFinished {
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        Ok(state_of(ctx, &self.path) == ComponentExecutionState::Finished)
    }
}

/// True when the component at `path` completed successfully this turn.
///
/// Non-blocking: the target's state is read as-is, so the target must be
/// sequenced before the component carrying this condition (a sync
/// barrier or an earlier group position).
pub fn service_finished(path: impl Into<String>) -> Condition {
    Condition::custom(ServiceFinished { path: path.into() })
}

struct ServiceFailed {
    path: String,
}

#[async_trait]
impl ConditionFn for ServiceFailed {
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        Ok(state_of(ctx, &self.path) == ComponentExecutionState::Failed)
    }
}

/// True when the component at `path` ended `Failed` this turn. Useful for
/// recovery services that only run after something broke.
pub fn service_failed(path: impl Into<String>) -> Condition {
    Condition::custom(ServiceFailed { path: path.into() })
}
