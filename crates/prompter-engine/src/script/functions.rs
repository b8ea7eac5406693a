//! Capability traits at the user-code seam, plus the sum types that let
//! script authors mix literals and callables freely.
//!
//! User callables receive the [`Context`] only; the pipeline's run
//! configuration is reachable through `ctx.pipeline()`. All user errors
//! are `anyhow` so arbitrary error types flow into the framework's
//! logged-and-contained failure handling.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use prompter_core::{AbsoluteNodeLabel, Message, NodeLabel};

use crate::context::Context;

/// Guard predicate over the context.
#[async_trait]
pub trait ConditionFn: Send + Sync {
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool>;
}

#[async_trait]
impl<F> ConditionFn for F
where
    F: Fn(&Context) -> anyhow::Result<bool> + Send + Sync,
{
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        (self)(ctx)
    }
}

/// A static truth value or a user predicate.
#[derive(Clone)]
pub enum Condition {
    Static(bool),
    Custom(Arc<dyn ConditionFn>),
}

impl Condition {
    pub fn custom(f: impl ConditionFn + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate to a boolean. Failures are logged and count as false.
    pub async fn evaluate(&self, ctx: &Context) -> bool {
        match self {
            Self::Static(value) => *value,
            Self::Custom(f) => match f.check(ctx).await {
                Ok(value) => value,
                Err(error) => {
                    warn!(%error, "condition evaluation failed, treating as false");
                    false
                }
            },
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::Static(true)
    }
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        Self::Static(value)
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(value) => write!(f, "Condition::Static({value})"),
            Self::Custom(_) => f.write_str("Condition::Custom(..)"),
        }
    }
}

/// Computes where a transition leads.
#[async_trait]
pub trait DestinationFn: Send + Sync {
    async fn resolve(&self, ctx: &Context) -> anyhow::Result<NodeLabel>;
}

#[async_trait]
impl<F> DestinationFn for F
where
    F: Fn(&Context) -> anyhow::Result<NodeLabel> + Send + Sync,
{
    async fn resolve(&self, ctx: &Context) -> anyhow::Result<NodeLabel> {
        (self)(ctx)
    }
}

/// A static label or a user callable producing one.
#[derive(Clone)]
pub enum Destination {
    Static(NodeLabel),
    Custom(Arc<dyn DestinationFn>),
}

impl Destination {
    pub fn custom(f: impl DestinationFn + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Produce an absolute label; relative labels resolve against `current`.
    pub async fn resolve(
        &self,
        ctx: &Context,
        current: &AbsoluteNodeLabel,
    ) -> anyhow::Result<AbsoluteNodeLabel> {
        let label = match self {
            Self::Static(label) => label.clone(),
            Self::Custom(f) => f.resolve(ctx).await?,
        };
        Ok(label.resolve(current))
    }
}

impl From<NodeLabel> for Destination {
    fn from(label: NodeLabel) -> Self {
        Self::Static(label)
    }
}

impl From<AbsoluteNodeLabel> for Destination {
    fn from(label: AbsoluteNodeLabel) -> Self {
        Self::Static(label.into())
    }
}

impl From<(&str, &str)> for Destination {
    fn from(pair: (&str, &str)) -> Self {
        Self::Static(pair.into())
    }
}

impl From<&str> for Destination {
    fn from(node_name: &str) -> Self {
        Self::Static(node_name.into())
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(label) => write!(f, "Destination::Static({label:?})"),
            Self::Custom(_) => f.write_str("Destination::Custom(..)"),
        }
    }
}

/// Produces the node's response message.
#[async_trait]
pub trait ResponseFn: Send + Sync {
    async fn produce(&self, ctx: &Context) -> anyhow::Result<Message>;
}

#[async_trait]
impl<F> ResponseFn for F
where
    F: Fn(&Context) -> anyhow::Result<Message> + Send + Sync,
{
    async fn produce(&self, ctx: &Context) -> anyhow::Result<Message> {
        (self)(ctx)
    }
}

/// A literal message or a user callable producing one.
#[derive(Clone)]
pub enum ResponseSpec {
    Static(Message),
    Custom(Arc<dyn ResponseFn>),
}

impl ResponseSpec {
    pub fn custom(f: impl ResponseFn + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub async fn produce(&self, ctx: &Context) -> anyhow::Result<Message> {
        match self {
            Self::Static(message) => Ok(message.clone()),
            Self::Custom(f) => f.produce(ctx).await,
        }
    }
}

impl From<Message> for ResponseSpec {
    fn from(message: Message) -> Self {
        Self::Static(message)
    }
}

impl From<&str> for ResponseSpec {
    fn from(text: &str) -> Self {
        Self::Static(Message::text(text))
    }
}

impl From<String> for ResponseSpec {
    fn from(text: String) -> Self {
        Self::Static(Message::text(text))
    }
}

impl std::fmt::Debug for ResponseSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(message) => write!(f, "ResponseSpec::Static({message:?})"),
            Self::Custom(_) => f.write_str("ResponseSpec::Custom(..)"),
        }
    }
}

/// Node-level processing step; may mutate the context, including the
/// mutable inherited-node copy in `framework_data`.
#[async_trait]
pub trait ProcessingFn: Send + Sync {
    async fn apply(&self, ctx: &mut Context) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> ProcessingFn for F
where
    F: Fn(&mut Context) -> anyhow::Result<()> + Send + Sync,
{
    async fn apply(&self, ctx: &mut Context) -> anyhow::Result<()> {
        (self)(ctx)
    }
}
