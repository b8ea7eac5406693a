//! Leaf service: a pipeline component wrapping one user function.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::context::SharedContext;
use crate::service::component::{Component, ComponentInfo};

type ServiceHandler =
    Arc<dyn Fn(SharedContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct Service {
    pub(crate) info: ComponentInfo,
    handler: ServiceHandler,
}

impl Service {
    /// Wrap a user function as an unnamed component; a name is derived
    /// from the component kind at pipeline construction.
    pub fn new<F, Fut>(handler: F) -> Component
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Component::Service(Self {
            info: ComponentInfo::default(),
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
        })
    }

    /// Wrap a user function under an explicit name.
    pub fn named<F, Fut>(name: impl Into<String>, handler: F) -> Component
    where
        F: Fn(SharedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(handler).with_name(name)
    }

    pub(crate) async fn run_body(&self, ctx: &SharedContext) -> anyhow::Result<()> {
        (self.handler)(ctx.clone()).await
    }
}
