//! Service group: ordered composition of components with interior
//! parallel runs.
//!
//! Children are walked in declaration order. A contiguous run of
//! asynchronous children forms a parallel subgroup dispatched together;
//! a synchronous child is a barrier — the pending subgroup is awaited to
//! completion first, then the child runs alone.

use futures_util::future::join_all;
use tracing::warn;

use crate::context::SharedContext;
use crate::service::component::{state_of, Component, ComponentInfo};
use crate::service::types::ComponentExecutionState;

pub struct ServiceGroup {
    pub(crate) info: ComponentInfo,
    pub(crate) components: Vec<Component>,
}

impl ServiceGroup {
    pub fn new(components: Vec<Component>) -> Component {
        Component::Group(Self {
            info: ComponentInfo::default(),
            components,
        })
    }

    pub fn named(name: impl Into<String>, components: Vec<Component>) -> Component {
        Self::new(components).with_name(name)
    }

    /// Pure child execution; state bookkeeping of the group itself is
    /// returned to the shared per-run protocol.
    ///
    /// The group finishes `Failed` when any child did, but a failing
    /// child never stops its siblings or the walk.
    pub(crate) async fn run_children(
        &self,
        ctx: &SharedContext,
    ) -> anyhow::Result<Option<ComponentExecutionState>> {
        let mut subgroup: Vec<&Component> = Vec::new();
        for component in &self.components {
            if component.info().is_async() {
                subgroup.push(component);
            } else {
                flush_subgroup(ctx, &mut subgroup).await;
                component.run(ctx).await;
            }
        }
        flush_subgroup(ctx, &mut subgroup).await;

        let guard = ctx.lock().await;
        let failed = self
            .components
            .iter()
            .any(|c| state_of(&guard, c.path()) == ComponentExecutionState::Failed);
        Ok(Some(if failed {
            ComponentExecutionState::Failed
        } else {
            ComponentExecutionState::Finished
        }))
    }

    /// Flag configurations that will not behave the way they read.
    /// Non-fatal; emitted once at pipeline construction.
    pub(crate) fn log_optimization_warnings(&self) {
        for component in &self.components {
            match component {
                Component::Group(group) => {
                    let info = group.info();
                    if info.asynchronous.is_none() {
                        let any_async = group.components.iter().any(|c| c.info().is_async());
                        let any_sync = group.components.iter().any(|c| !c.info().is_async());
                        if any_async && any_sync {
                            warn!(
                                group = %info.name,
                                "group mixes sync and async components; split it or mark it synchronous explicitly"
                            );
                        }
                    }
                    group.log_optimization_warnings();
                }
                _ => {
                    let info = component.info();
                    if info.asynchronous == Some(false) {
                        warn!(component = %info.name, "component could be asynchronous");
                    }
                    if !info.is_async() && info.timeout.is_some() {
                        warn!(
                            component = %info.name,
                            "timeout has no effect on a component that does not run in a parallel subgroup"
                        );
                    }
                }
            }
        }
    }

    pub(crate) fn info(&self) -> &ComponentInfo {
        &self.info
    }
}

async fn flush_subgroup(ctx: &SharedContext, subgroup: &mut Vec<&Component>) {
    if subgroup.is_empty() {
        return;
    }
    join_all(subgroup.drain(..).map(|component| component.run(ctx))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use prompter_core::AbsoluteNodeLabel;

    use crate::context::Context;
    use crate::script::Condition;
    use crate::service::service::Service;

    fn shared_ctx() -> SharedContext {
        Arc::new(tokio::sync::Mutex::new(Context::fresh(
            AbsoluteNodeLabel::new("flow", "start"),
        )))
    }

    /// Append a tag to a log living in the context's misc map.
    fn logging_service(name: &'static str, delay: Duration) -> Component {
        Service::named(name, move |ctx: SharedContext| async move {
            tokio::time::sleep(delay).await;
            let mut guard = ctx.lock().await;
            let log = guard
                .misc
                .entry("log".to_string())
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let Some(entries) = log.as_array_mut() {
                entries.push(serde_json::Value::String(name.to_string()));
            }
            Ok(())
        })
    }

    async fn log_of(ctx: &SharedContext) -> Vec<String> {
        let guard = ctx.lock().await;
        guard
            .misc
            .get("log")
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn finalize(root: &mut Component) {
        crate::pipeline::assign_paths(root, "").unwrap();
    }

    #[tokio::test]
    async fn sync_child_is_a_barrier_between_async_runs() {
        let mut group = ServiceGroup::named(
            "root",
            vec![
                logging_service("a", Duration::from_millis(10)).asynchronous(true),
                logging_service("b", Duration::from_millis(10)).asynchronous(true),
                logging_service("c", Duration::ZERO),
                logging_service("d", Duration::from_millis(10)).asynchronous(true),
            ],
        );
        finalize(&mut group);
        let ctx = shared_ctx();
        group.run(&ctx).await;

        let log = log_of(&ctx).await;
        let pos = |tag: &str| log.iter().position(|e| e == tag).unwrap();
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("c"));
        assert!(pos("c") < pos("d"));
        assert_eq!(
            group.get_state(&ctx).await,
            ComponentExecutionState::Finished
        );
    }

    #[tokio::test]
    async fn failing_child_does_not_stop_siblings() {
        let mut group = ServiceGroup::named(
            "root",
            vec![
                Service::named("broken", |_ctx: SharedContext| async {
                    Err(anyhow::anyhow!("boom"))
                })
                .asynchronous(true),
                logging_service("ok", Duration::ZERO).asynchronous(true),
            ],
        );
        finalize(&mut group);
        let ctx = shared_ctx();
        group.run(&ctx).await;

        assert_eq!(log_of(&ctx).await, vec!["ok"]);
        assert_eq!(group.get_state(&ctx).await, ComponentExecutionState::Failed);
    }

    #[tokio::test]
    async fn timed_out_child_fails_but_after_handler_runs() {
        let mut group = ServiceGroup::named(
            "root",
            vec![
                Service::named("slow", |_ctx: SharedContext| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
                .asynchronous(true)
                .with_timeout(Duration::from_millis(10))
                .with_after_handler(
                    |ctx: &mut Context,
                     info: &crate::service::extra::ExtraHandlerRuntimeInfo|
                     -> anyhow::Result<()> {
                        ctx.misc.insert(
                            "after_saw".to_string(),
                            serde_json::Value::String(format!("{:?}", info.status)),
                        );
                        Ok(())
                    },
                ),
                logging_service("sibling", Duration::from_millis(20)).asynchronous(true),
            ],
        );
        finalize(&mut group);
        let ctx = shared_ctx();
        group.run(&ctx).await;

        assert_eq!(log_of(&ctx).await, vec!["sibling"]);
        assert_eq!(group.get_state(&ctx).await, ComponentExecutionState::Failed);
        let guard = ctx.lock().await;
        assert_eq!(
            guard.misc.get("after_saw"),
            Some(&serde_json::Value::String("Failed".to_string()))
        );
    }

    #[tokio::test]
    async fn false_start_condition_skips_the_component() {
        let mut group = ServiceGroup::named(
            "root",
            vec![
                logging_service("skipped", Duration::ZERO)
                    .with_start_condition(Condition::Static(false)),
                logging_service("ran", Duration::ZERO),
            ],
        );
        finalize(&mut group);
        let ctx = shared_ctx();
        group.run(&ctx).await;

        assert_eq!(log_of(&ctx).await, vec!["ran"]);
        let guard = ctx.lock().await;
        let skipped = match &group {
            Component::Group(g) => g.components[0].path().to_string(),
            _ => unreachable!(),
        };
        assert_eq!(state_of(&guard, &skipped), ComponentExecutionState::NotRun);
    }

    #[tokio::test]
    async fn all_async_group_finishes_every_child() {
        let children: Vec<Component> = (0..4)
            .map(|i| {
                Service::named(format!("s{i}"), |_ctx: SharedContext| async { Ok(()) })
                    .asynchronous(true)
            })
            .collect();
        let mut group = ServiceGroup::named("root", children);
        finalize(&mut group);
        let ctx = shared_ctx();
        group.run(&ctx).await;

        let guard = ctx.lock().await;
        if let Component::Group(g) = &group {
            for child in &g.components {
                assert_eq!(
                    state_of(&guard, child.path()),
                    ComponentExecutionState::Finished
                );
                assert!(guard.framework_data.service_states[child.path()].is_finished());
            }
        }
    }
}
