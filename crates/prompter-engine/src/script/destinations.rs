//! Standard transition destinations.

use async_trait::async_trait;

use prompter_core::NodeLabel;

use crate::context::Context;
use crate::script::functions::{Destination, DestinationFn};

struct Repeat;

#[async_trait]
impl DestinationFn for Repeat {
    async fn resolve(&self, ctx: &Context) -> anyhow::Result<NodeLabel> {
        Ok(NodeLabel::Absolute(ctx.last_label()?.clone()))
    }
}

/// Stay on the current node.
pub fn repeat() -> Destination {
    Destination::custom(Repeat)
}

struct Previous;

#[async_trait]
impl DestinationFn for Previous {
    async fn resolve(&self, ctx: &Context) -> anyhow::Result<NodeLabel> {
        let turn = ctx.current_turn_id();
        let label = ctx.labels.get_cached(turn - 1).ok_or_else(|| {
            anyhow::anyhow!(
                "label of turn {} is not materialised; widen the labels subscription",
                turn - 1
            )
        })?;
        Ok(NodeLabel::Absolute(label.clone()))
    }
}

/// Return to the node visited one turn ago. Requires a labels
/// subscription of at least two turns.
pub fn previous() -> Destination {
    Destination::custom(Previous)
}

struct Start;

#[async_trait]
impl DestinationFn for Start {
    async fn resolve(&self, ctx: &Context) -> anyhow::Result<NodeLabel> {
        Ok(NodeLabel::Absolute(ctx.pipeline()?.start_label.clone()))
    }
}

/// Jump to the pipeline's start label.
pub fn start() -> Destination {
    Destination::custom(Start)
}

struct Fallback;

#[async_trait]
impl DestinationFn for Fallback {
    async fn resolve(&self, ctx: &Context) -> anyhow::Result<NodeLabel> {
        Ok(NodeLabel::Absolute(ctx.pipeline()?.fallback_label.clone()))
    }
}

/// Jump to the pipeline's fallback label.
pub fn fallback() -> Destination {
    Destination::custom(Fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prompter_core::AbsoluteNodeLabel;

    #[tokio::test]
    async fn repeat_resolves_to_the_last_label() {
        let ctx = Context::fresh(AbsoluteNodeLabel::new("flow", "start"));
        let current = ctx.last_label().unwrap().clone();
        let resolved = repeat().resolve(&ctx, &current).await.unwrap();
        assert_eq!(resolved, current);
    }

    #[tokio::test]
    async fn previous_requires_a_materialised_label() {
        let mut ctx = Context::fresh(AbsoluteNodeLabel::new("flow", "start"));
        let current = ctx.last_label().unwrap().clone();
        assert!(previous().resolve(&ctx, &current).await.is_err());

        ctx.labels.set(1, AbsoluteNodeLabel::new("flow", "next"));
        ctx.advance_turn();
        let resolved = previous().resolve(&ctx, &current).await.unwrap();
        assert_eq!(resolved, AbsoluteNodeLabel::new("flow", "start"));
    }
}
