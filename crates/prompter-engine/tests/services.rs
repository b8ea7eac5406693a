// Cross-component features at the pipeline level: state-based start
// conditions and global extra handlers.

use std::sync::Arc;

use prompter_core::Message;
use prompter_engine::script::conditions;
use prompter_engine::service::conditions as svc;
use prompter_engine::testing::check_happy_path;
use prompter_engine::{
    Context, ExtraHandlerRuntimeInfo, ExtraHandlerStage, Flow, Node, Pipeline, Script, Service,
    SharedContext, Transition,
};
use prompter_storage::{ContextStorage, MemoryStorage};

fn toy_script() -> Script {
    Script::new().flow(
        "flow",
        Flow::new()
            .node(
                "start",
                Node::new().transition(Transition::new("greet", conditions::exact_match("hi"))),
            )
            .node(
                "greet",
                Node::new()
                    .response("hello")
                    .transition(Transition::new("start", true)),
            )
            .node("fallback", Node::new().response("sorry?")),
    )
}

fn tag_service(name: &'static str) -> prompter_engine::Component {
    Service::named(name, move |ctx: SharedContext| async move {
        let mut guard = ctx.lock().await;
        guard.misc.insert(format!("ran_{name}"), serde_json::json!(true));
        Ok(())
    })
}

#[tokio::test]
async fn happy_path_helper_drives_a_dialog() {
    let pipeline = Pipeline::builder(toy_script(), ("flow", "start"))
        .fallback_label(("flow", "fallback"))
        .build()
        .unwrap();
    check_happy_path(
        &pipeline,
        &[("hi", "hello"), ("unknown", "sorry?"), ("hi", "hello")],
    )
    .await;
}

#[tokio::test]
async fn service_finished_condition_gates_a_post_service() {
    let storage: Arc<dyn ContextStorage> = Arc::new(MemoryStorage::default());
    let pipeline = Pipeline::builder(toy_script(), ("flow", "start"))
        .fallback_label(("flow", "fallback"))
        .storage(storage.clone())
        .pre_service(tag_service("always"))
        .post_service(
            tag_service("after_success")
                .with_start_condition(svc::service_finished("pipeline.pre.always")),
        )
        .post_service(
            // The pre-service finished, so this one must never run.
            tag_service("never").with_start_condition(
                conditions::negation(svc::service_finished("pipeline.pre.always")),
            ),
        )
        .build()
        .unwrap();

    pipeline.run_turn(Message::text("hi"), "alice").await.unwrap();

    let ctx = Context::connected(storage, ("flow", "start").into(), Some("alice"))
        .await
        .unwrap();
    assert_eq!(ctx.misc.get("ran_always"), Some(&serde_json::json!(true)));
    assert_eq!(
        ctx.misc.get("ran_after_success"),
        Some(&serde_json::json!(true))
    );
    assert_eq!(ctx.misc.get("ran_never"), None);
}

#[tokio::test]
async fn global_handlers_wrap_every_component() {
    let storage: Arc<dyn ContextStorage> = Arc::new(MemoryStorage::default());
    let pipeline = Pipeline::builder(toy_script(), ("flow", "start"))
        .fallback_label(("flow", "fallback"))
        .storage(storage.clone())
        .pre_service(tag_service("one"))
        .post_service(tag_service("two"))
        .global_after_handler(
            |ctx: &mut Context, info: &ExtraHandlerRuntimeInfo| -> anyhow::Result<()> {
                assert_eq!(info.stage, ExtraHandlerStage::After);
                let seen = ctx
                    .misc
                    .entry("paths".to_string())
                    .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                if let Some(entries) = seen.as_array_mut() {
                    entries.push(serde_json::Value::String(info.path.clone()));
                }
                Ok(())
            },
        )
        .build()
        .unwrap();

    pipeline.run_turn(Message::text("hi"), "bob").await.unwrap();

    let ctx = Context::connected(storage, ("flow", "start").into(), Some("bob"))
        .await
        .unwrap();
    let paths: Vec<String> = ctx
        .misc
        .get("paths")
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    for expected in [
        "pipeline.pre.one",
        "pipeline.actor",
        "pipeline.post.two",
        "pipeline.pre",
        "pipeline.post",
        "pipeline",
    ] {
        assert!(paths.iter().any(|p| p == expected), "missing {expected}");
    }
}
