use std::sync::Arc;

use clap::Parser;
use tracing::info;

use prompter_core::config::PrompterConfig;
use prompter_engine::script::conditions;
use prompter_engine::{Flow, MessengerInterface, Node, Pipeline, Script, Transition};
use prompter_storage::{ContextStorage, SqliteStorage, Subscript, SubscriptConfig};
use prompter_terminal::TerminalInterface;

/// Run a demo dialog script on the terminal.
#[derive(Parser)]
#[command(name = "prompter", about = "Dialog pipeline terminal demo")]
struct Args {
    /// Config file path (default: ~/.prompter/prompter.toml).
    #[arg(long)]
    config: Option<String>,

    /// Resume a specific dialog instead of starting a fresh one.
    #[arg(long)]
    dialog_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prompter=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = PrompterConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        PrompterConfig::default()
    });

    if let Some(dir) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let subscripts = SubscriptConfig {
        labels: Subscript::Last(config.history.labels),
        requests: Subscript::Last(config.history.requests),
        responses: Subscript::Last(config.history.responses),
    };
    let storage: Arc<dyn ContextStorage> =
        Arc::new(SqliteStorage::open(&config.database.path, subscripts)?);

    let pipeline = Arc::new(
        Pipeline::builder(demo_script(), ("greeting", "start"))
            .fallback_label(("greeting", "fallback"))
            .storage(storage)
            .build()?,
    );

    let mut interface = TerminalInterface::new();
    if let Some(dialog_id) = args.dialog_id {
        interface = interface.with_dialog_id(dialog_id);
    }
    info!(dialog_id = %interface.dialog_id(), "terminal dialog ready, /quit to exit");
    interface.connect(pipeline).await
}

/// A small built-in script: greet, chat, say goodbye.
fn demo_script() -> Script {
    Script::new().flow(
        "greeting",
        Flow::new()
            .node(
                "start",
                Node::new().transition(Transition::new(
                    "greet",
                    conditions::any(vec![
                        conditions::has_text("hi"),
                        conditions::has_text("hello"),
                    ]),
                )),
            )
            .node(
                "greet",
                Node::new()
                    .response("Hello! Say 'bye' when you are done.")
                    .transition(Transition::new("goodbye", conditions::has_text("bye")))
                    .transition(Transition::new("chat", true)),
            )
            .node(
                "chat",
                Node::new()
                    .response("Interesting. Tell me more, or say 'bye'.")
                    .transition(Transition::new("goodbye", conditions::has_text("bye")))
                    .transition(Transition::new("chat", true)),
            )
            .node(
                "goodbye",
                Node::new()
                    .response("Goodbye!")
                    .transition(Transition::new(
                        "greet",
                        conditions::any(vec![
                            conditions::has_text("hi"),
                            conditions::has_text("hello"),
                        ]),
                    )),
            )
            .node(
                "fallback",
                Node::new()
                    .response("Say 'hi' to begin.")
                    .transition(Transition::new(
                        "greet",
                        conditions::any(vec![
                            conditions::has_text("hi"),
                            conditions::has_text("hello"),
                        ]),
                    )),
            ),
    )
}
