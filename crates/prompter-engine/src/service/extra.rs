//! Extra handlers: user callbacks attached before or after a component's
//! body. They observe and may mutate the context, but never fail the
//! component — errors are logged and suppressed.

use async_trait::async_trait;

use crate::context::Context;
use crate::service::types::ComponentExecutionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraHandlerStage {
    Before,
    After,
}

/// What the handler is allowed to know about its component.
#[derive(Debug, Clone)]
pub struct ExtraHandlerRuntimeInfo {
    pub path: String,
    pub name: String,
    pub stage: ExtraHandlerStage,
    pub status: ComponentExecutionState,
}

#[async_trait]
pub trait ExtraHandlerFn: Send + Sync {
    async fn handle(&self, ctx: &mut Context, info: &ExtraHandlerRuntimeInfo)
        -> anyhow::Result<()>;
}

#[async_trait]
impl<F> ExtraHandlerFn for F
where
    F: Fn(&mut Context, &ExtraHandlerRuntimeInfo) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(
        &self,
        ctx: &mut Context,
        info: &ExtraHandlerRuntimeInfo,
    ) -> anyhow::Result<()> {
        (self)(ctx, info)
    }
}
