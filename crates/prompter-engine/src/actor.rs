//! The actor: a single-turn state machine that drives a context through
//! one script step.
//!
//! Per turn it resolves the node the dialog sits on, runs that node's
//! pre-transition processing, picks the next label from the guarded
//! transitions (falling back when none fire), runs pre-response
//! processing on the new node, produces the response, and finishes the
//! turn. User-code failures along the way are logged and contained; only
//! storage and programmer errors abort the turn.

use prompter_core::{AbsoluteNodeLabel, Message};
use tracing::{debug, warn};

use crate::context::{Context, SharedContext};
use crate::error::{PipelineError, ValidationError};
use crate::script::{Node, Transition};
use crate::service::component::{Component, ComponentInfo};

pub struct Actor {
    pub(crate) info: ComponentInfo,
}

impl Actor {
    pub fn new() -> Component {
        Component::Actor(Self {
            info: ComponentInfo::named("actor"),
        })
    }

    /// Component body. Fatal errors are parked in
    /// `framework_data.turn_error` for the pipeline to surface once the
    /// service group unwinds; the component itself just reads `Failed`.
    pub(crate) async fn run_body(&self, ctx: &SharedContext) -> anyhow::Result<()> {
        let mut guard = ctx.lock().await;
        match run_turn_machine(&mut guard).await {
            Ok(()) => Ok(()),
            Err(error) => {
                let message = error.to_string();
                guard.framework_data.turn_error = Some(error);
                Err(anyhow::anyhow!(message))
            }
        }
    }
}

async fn run_turn_machine(ctx: &mut Context) -> Result<(), PipelineError> {
    // GET_PREVIOUS_NODE / REWRITE_PREVIOUS_NODE: the node is re-resolved
    // from the script each turn, so global and local changes take effect
    // on the node the dialog already sits on.
    let previous_label = ctx.last_label()?.clone();
    let node = inherited(ctx, &previous_label)?;
    ctx.framework_data.current_node = Some(node);

    // RUN_PRE_TRANSITIONS_PROCESSING
    run_processing(ctx, ProcessingKind::PreTransition).await;

    // GET_TRUE_LABEL
    let next_label = pick_next_label(ctx, &previous_label).await?;
    debug!(ctx_id = %ctx.id(), %next_label, "transition chosen");

    // GET_NEXT_NODE
    let node = inherited(ctx, &next_label)?;
    ctx.framework_data.current_node = Some(node);
    let new_turn_id = ctx.current_turn_id() + 1;
    ctx.labels.set(new_turn_id, next_label);

    // RUN_PRE_RESPONSE_PROCESSING
    run_processing(ctx, ProcessingKind::PreResponse).await;

    // CREATE_RESPONSE
    let response = create_response(ctx).await;

    // FINISH_TURN — the request at the new id was appended by the
    // pipeline before the actor ran.
    ctx.advance_turn();
    ctx.responses.set(new_turn_id, response);
    Ok(())
}

fn inherited(ctx: &Context, label: &AbsoluteNodeLabel) -> Result<Node, PipelineError> {
    let run_config = ctx.pipeline()?.clone();
    run_config
        .script
        .get_inherited_node(label)
        .ok_or_else(|| ValidationError::UnknownNode {
            label: label.clone(),
        }
        .into())
}

#[derive(Clone, Copy)]
enum ProcessingKind {
    PreTransition,
    PreResponse,
}

impl ProcessingKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::PreTransition => "pre_transition",
            Self::PreResponse => "pre_response",
        }
    }
}

/// Run the current node's processing steps in declared order. A failing
/// step is skipped; the turn always continues.
async fn run_processing(ctx: &mut Context, kind: ProcessingKind) {
    let steps = match (&ctx.framework_data.current_node, kind) {
        (Some(node), ProcessingKind::PreTransition) => node.pre_transition.clone(),
        (Some(node), ProcessingKind::PreResponse) => node.pre_response.clone(),
        (None, _) => Vec::new(),
    };
    for (name, step) in steps {
        if let Err(error) = step.apply(ctx).await {
            warn!(step = %name, stage = kind.as_str(), %error, "processing step failed, skipping");
        }
    }
}

/// Evaluate the current node's transitions and pick the winner: highest
/// priority among those whose condition holds, declaration order breaking
/// ties. Falls back to the pipeline's fallback label when nothing fires.
async fn pick_next_label(
    ctx: &Context,
    current: &AbsoluteNodeLabel,
) -> Result<AbsoluteNodeLabel, PipelineError> {
    let transitions: Vec<Transition> = ctx.current_node()?.transitions.clone();

    let mut winner: Option<(f64, AbsoluteNodeLabel)> = None;
    for transition in &transitions {
        if !transition.condition.evaluate(ctx).await {
            continue;
        }
        if let Some((best_priority, _)) = &winner {
            // Strict comparison keeps the earliest declared on ties.
            if transition.priority <= *best_priority {
                continue;
            }
        }
        match transition.destination.resolve(ctx, current).await {
            Ok(label) => winner = Some((transition.priority, label)),
            Err(error) => {
                warn!(%error, "transition destination failed to resolve, skipping candidate");
            }
        }
    }

    match winner {
        Some((_, label)) => Ok(label),
        None => Ok(ctx.pipeline()?.fallback_label.clone()),
    }
}

/// Evaluate the node's response. No response or a failing callable both
/// yield the empty message — a valid turn outcome.
async fn create_response(ctx: &mut Context) -> Message {
    let spec = match &ctx.framework_data.current_node {
        Some(node) => node.response.clone(),
        None => None,
    };
    match spec {
        Some(spec) => match spec.produce(ctx).await {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "response generation failed, replying with an empty message");
                Message::default()
            }
        },
        None => Message::default(),
    }
}
