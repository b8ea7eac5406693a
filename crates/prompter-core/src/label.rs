use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Absolute pointer into the script graph.
///
/// Both components must be non-empty; the script validator rejects labels
/// that point at flows or nodes that do not exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbsoluteNodeLabel {
    pub flow_name: String,
    pub node_name: String,
}

impl AbsoluteNodeLabel {
    pub fn new(flow_name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            flow_name: flow_name.into(),
            node_name: node_name.into(),
        }
    }

    /// Check the non-empty invariant without constructing an error chain.
    pub fn is_valid(&self) -> bool {
        !self.flow_name.is_empty() && !self.node_name.is_empty()
    }

    /// Return the canonical wire-format string.
    ///
    /// Format: `{flow_name}:{node_name}`; the node name may itself
    /// contain colons.
    pub fn format(&self) -> String {
        format!("{}:{}", self.flow_name, self.node_name)
    }

    /// Parse a wire-format label string back into an `AbsoluteNodeLabel`.
    pub fn parse(s: &str) -> Result<Self> {
        let colon_pos = s
            .find(':')
            .ok_or_else(|| CoreError::InvalidLabel(format!("missing ':' separator: {s}")))?;
        let flow_name = &s[..colon_pos];
        let node_name = &s[colon_pos + 1..];
        if flow_name.is_empty() || node_name.is_empty() {
            return Err(CoreError::InvalidLabel(format!(
                "label components must not be empty: {s}"
            )));
        }
        Ok(Self::new(flow_name, node_name))
    }
}

impl std::fmt::Display for AbsoluteNodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

impl From<(&str, &str)> for AbsoluteNodeLabel {
    fn from((flow, node): (&str, &str)) -> Self {
        Self::new(flow, node)
    }
}

/// User-facing label form accepted in transitions.
///
/// Relative labels name only a node; they resolve into the flow of the
/// label the dialog currently sits at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeLabel {
    Absolute(AbsoluteNodeLabel),
    Relative(String),
}

impl NodeLabel {
    pub fn absolute(flow_name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self::Absolute(AbsoluteNodeLabel::new(flow_name, node_name))
    }

    pub fn relative(node_name: impl Into<String>) -> Self {
        Self::Relative(node_name.into())
    }

    /// Resolve against the flow of `current`, producing an absolute label.
    pub fn resolve(&self, current: &AbsoluteNodeLabel) -> AbsoluteNodeLabel {
        match self {
            Self::Absolute(label) => label.clone(),
            Self::Relative(node_name) => {
                AbsoluteNodeLabel::new(current.flow_name.clone(), node_name.clone())
            }
        }
    }
}

impl From<AbsoluteNodeLabel> for NodeLabel {
    fn from(label: AbsoluteNodeLabel) -> Self {
        Self::Absolute(label)
    }
}

impl From<(&str, &str)> for NodeLabel {
    fn from(pair: (&str, &str)) -> Self {
        Self::Absolute(pair.into())
    }
}

impl From<&str> for NodeLabel {
    fn from(node_name: &str) -> Self {
        Self::Relative(node_name.to_string())
    }
}
