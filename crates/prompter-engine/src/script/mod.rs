//! The static conversation graph: flows of nodes with guarded transitions.
//!
//! Nodes expose three lookup levels — node, flow-local, script-global —
//! composed at read time into a fresh "inherited node" per turn, so
//! processing steps may mutate their copy without touching the script.

pub mod conditions;
pub mod destinations;
pub mod functions;

use std::collections::HashMap;
use std::sync::Arc;

use prompter_core::AbsoluteNodeLabel;

use crate::error::ValidationError;

pub use functions::{
    Condition, ConditionFn, Destination, DestinationFn, ProcessingFn, ResponseFn, ResponseSpec,
};

/// A named node-level processing step. Order matters; same-name entries
/// from more specific nodes override inherited ones in place.
pub type ProcStep = (String, Arc<dyn ProcessingFn>);

/// A guarded edge out of a node.
#[derive(Clone, Debug)]
pub struct Transition {
    pub destination: Destination,
    pub condition: Condition,
    pub priority: f64,
}

impl Transition {
    pub fn new(destination: impl Into<Destination>, condition: impl Into<Condition>) -> Self {
        Self {
            destination: destination.into(),
            condition: condition.into(),
            priority: 1.0,
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Clone, Default)]
pub struct Node {
    pub transitions: Vec<Transition>,
    pub response: Option<ResponseSpec>,
    pub pre_transition: Vec<ProcStep>,
    pub pre_response: Vec<ProcStep>,
    pub misc: HashMap<String, serde_json::Value>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response(mut self, response: impl Into<ResponseSpec>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn pre_transition(mut self, name: impl Into<String>, step: impl ProcessingFn + 'static) -> Self {
        self.pre_transition.push((name.into(), Arc::new(step)));
        self
    }

    pub fn pre_response(mut self, name: impl Into<String>, step: impl ProcessingFn + 'static) -> Self {
        self.pre_response.push((name.into(), Arc::new(step)));
        self
    }

    pub fn misc(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.misc.insert(key.into(), value);
        self
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("transitions", &self.transitions.len())
            .field("has_response", &self.response.is_some())
            .field("pre_transition", &self.pre_transition.len())
            .field("pre_response", &self.pre_response.len())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct Flow {
    /// Defaults shared by every node of this flow.
    pub local_node: Node,
    pub nodes: HashMap<String, Node>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(mut self, node: Node) -> Self {
        self.local_node = node;
        self
    }

    pub fn node(mut self, name: impl Into<String>, node: Node) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }
}

#[derive(Clone, Default)]
pub struct Script {
    /// Defaults shared by every node of the script.
    pub global_node: Node,
    pub flows: HashMap<String, Flow>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, node: Node) -> Self {
        self.global_node = node;
        self
    }

    pub fn flow(mut self, name: impl Into<String>, flow: Flow) -> Self {
        self.flows.insert(name.into(), flow);
        self
    }

    pub fn get_flow(&self, flow_name: &str) -> Option<&Flow> {
        self.flows.get(flow_name)
    }

    /// The raw node a label points at, without inheritance.
    pub fn get_node(&self, label: &AbsoluteNodeLabel) -> Option<&Node> {
        self.flows
            .get(&label.flow_name)
            .and_then(|flow| flow.nodes.get(&label.node_name))
    }

    /// Compose the inherited node for a label: `global < local < node`.
    ///
    /// Returns a fresh value each call — the runtime copy is free to be
    /// mutated by processing steps.
    pub fn get_inherited_node(&self, label: &AbsoluteNodeLabel) -> Option<Node> {
        let flow = self.flows.get(&label.flow_name)?;
        let node = flow.nodes.get(&label.node_name)?;
        Some(compose_inherited(&self.global_node, &flow.local_node, node))
    }

    /// Fail unless the label points at an existing node.
    pub fn validate_label(&self, label: &AbsoluteNodeLabel) -> Result<(), ValidationError> {
        let flow = self
            .flows
            .get(&label.flow_name)
            .ok_or_else(|| ValidationError::UnknownFlow {
                flow_name: label.flow_name.clone(),
            })?;
        if !flow.nodes.contains_key(&label.node_name) {
            return Err(ValidationError::UnknownNode {
                label: label.clone(),
            });
        }
        Ok(())
    }

    /// Structural validation, run once at pipeline construction.
    ///
    /// Checks name non-emptiness, finite transition priorities, and that
    /// every static destination points at an existing node. Relative
    /// destinations on the global node cannot be checked statically (their
    /// flow is only known at runtime) and are skipped.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (flow_name, flow) in &self.flows {
            if flow_name.is_empty() {
                return Err(ValidationError::Other("flow name cannot be blank".into()));
            }
            for (node_name, node) in &flow.nodes {
                if node_name.is_empty() {
                    return Err(ValidationError::Other(format!(
                        "node name cannot be blank in flow {flow_name:?}"
                    )));
                }
                self.validate_transitions(&node.transitions, Some(flow_name), node_name)?;
            }
            self.validate_transitions(&flow.local_node.transitions, Some(flow_name), "<local>")?;
        }
        self.validate_transitions(&self.global_node.transitions, None, "<global>")?;
        Ok(())
    }

    fn validate_transitions(
        &self,
        transitions: &[Transition],
        flow_name: Option<&str>,
        node_name: &str,
    ) -> Result<(), ValidationError> {
        for transition in transitions {
            if !transition.priority.is_finite() {
                return Err(ValidationError::NonFinitePriority {
                    label: format!("{}:{node_name}", flow_name.unwrap_or("<global>")),
                });
            }
            let Destination::Static(label) = &transition.destination else {
                continue;
            };
            match label {
                prompter_core::NodeLabel::Absolute(absolute) => {
                    self.validate_label(absolute)?;
                }
                prompter_core::NodeLabel::Relative(target) => {
                    let Some(flow_name) = flow_name else {
                        continue;
                    };
                    let resolved = AbsoluteNodeLabel::new(flow_name, target.clone());
                    self.validate_label(&resolved)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("flows", &self.flows.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Merge order: global first, then local, then the node itself.
///
/// `misc` and processing steps override by name (more specific wins, at
/// the position the name first appeared); transitions concatenate with
/// the node's own first so declaration-order tie-breaking favours the
/// most specific level; `response` is replaced outright.
fn compose_inherited(global: &Node, local: &Node, node: &Node) -> Node {
    let mut transitions =
        Vec::with_capacity(node.transitions.len() + local.transitions.len() + global.transitions.len());
    transitions.extend(node.transitions.iter().cloned());
    transitions.extend(local.transitions.iter().cloned());
    transitions.extend(global.transitions.iter().cloned());

    let mut misc = global.misc.clone();
    misc.extend(local.misc.iter().map(|(k, v)| (k.clone(), v.clone())));
    misc.extend(node.misc.iter().map(|(k, v)| (k.clone(), v.clone())));

    Node {
        transitions,
        response: node
            .response
            .clone()
            .or_else(|| local.response.clone())
            .or_else(|| global.response.clone()),
        pre_transition: merge_steps(
            &merge_steps(&global.pre_transition, &local.pre_transition),
            &node.pre_transition,
        ),
        pre_response: merge_steps(
            &merge_steps(&global.pre_response, &local.pre_response),
            &node.pre_response,
        ),
        misc,
    }
}

fn merge_steps(base: &[ProcStep], overlay: &[ProcStep]) -> Vec<ProcStep> {
    let mut merged: Vec<ProcStep> = base.to_vec();
    for (name, step) in overlay {
        match merged.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = step.clone(),
            None => merged.push((name.clone(), step.clone())),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn step(tag: &'static str) -> impl ProcessingFn {
        move |ctx: &mut Context| -> anyhow::Result<()> {
            ctx.misc.insert(
                "trace".into(),
                serde_json::Value::String(format!(
                    "{}{}",
                    ctx.misc
                        .get("trace")
                        .and_then(|v| v.as_str())
                        .unwrap_or(""),
                    tag
                )),
            );
            Ok(())
        }
    }

    fn script() -> Script {
        Script::new()
            .global(
                Node::new()
                    .misc("tier", serde_json::json!("global"))
                    .misc("global_only", serde_json::json!(true))
                    .pre_response("greet", step("G"))
                    .transition(Transition::new(("flow", "start"), false)),
            )
            .flow(
                "flow",
                Flow::new()
                    .local(
                        Node::new()
                            .misc("tier", serde_json::json!("local"))
                            .pre_response("greet", step("L"))
                            .pre_response("local_extra", step("l")),
                    )
                    .node(
                        "start",
                        Node::new()
                            .misc("tier", serde_json::json!("node"))
                            .response("hi")
                            .transition(Transition::new("next", true)),
                    )
                    .node("next", Node::new().response("next")),
            )
    }

    #[test]
    fn misc_merges_with_node_winning() {
        let script = script();
        let node = script
            .get_inherited_node(&AbsoluteNodeLabel::new("flow", "start"))
            .unwrap();
        assert_eq!(node.misc.get("tier"), Some(&serde_json::json!("node")));
        assert_eq!(node.misc.get("global_only"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn same_name_step_is_overridden_in_place() {
        let script = script();
        let node = script
            .get_inherited_node(&AbsoluteNodeLabel::new("flow", "start"))
            .unwrap();
        let names: Vec<&str> = node.pre_response.iter().map(|(n, _)| n.as_str()).collect();
        // "greet" keeps its global position but carries the local override.
        assert_eq!(names, vec!["greet", "local_extra"]);
    }

    #[test]
    fn transitions_concatenate_node_first() {
        let script = script();
        let node = script
            .get_inherited_node(&AbsoluteNodeLabel::new("flow", "start"))
            .unwrap();
        assert_eq!(node.transitions.len(), 2);
        assert!(matches!(
            node.transitions[0].condition,
            Condition::Static(true)
        ));
    }

    #[test]
    fn inherited_node_is_a_fresh_copy() {
        let script = script();
        let label = AbsoluteNodeLabel::new("flow", "start");
        let mut node = script.get_inherited_node(&label).unwrap();
        node.transitions.clear();
        let again = script.get_inherited_node(&label).unwrap();
        assert_eq!(again.transitions.len(), 2);
    }

    #[test]
    fn validate_rejects_dangling_static_destination() {
        let script = Script::new().flow(
            "flow",
            Flow::new().node(
                "start",
                Node::new().transition(Transition::new(("flow", "missing"), true)),
            ),
        );
        assert!(script.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_finite_priority() {
        let script = Script::new().flow(
            "flow",
            Flow::new()
                .node("start", Node::new())
                .node(
                    "other",
                    Node::new().transition(
                        Transition::new(("flow", "start"), true).with_priority(f64::NAN),
                    ),
                ),
        );
        assert!(script.validate().is_err());
    }

    #[test]
    fn validate_accepts_relative_destinations_within_the_flow() {
        let script = script();
        script.validate().unwrap();
    }
}
