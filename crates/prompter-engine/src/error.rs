use prompter_core::AbsoluteNodeLabel;
use prompter_storage::StorageError;
use thiserror::Error;

/// Misuse of context accessors — empty history, missing runtime handles,
/// reads of keys that do not exist anywhere.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("History is empty: {field}")]
    EmptyHistory { field: &'static str },

    #[error("No such key in {field}: {key}")]
    NoSuchKey { field: &'static str, key: i64 },

    #[error("Context is not attached to a storage")]
    Detached,

    #[error("Pipeline is not set")]
    PipelineNotSet,

    #[error("Current node is not set")]
    CurrentNodeNotSet,
}

/// Script or pipeline construction problems. Fatal at startup, never
/// raised during a turn.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown flow: {flow_name}")]
    UnknownFlow { flow_name: String },

    #[error("Unknown node: {label}")]
    UnknownNode { label: AbsoluteNodeLabel },

    #[error("Component name cannot be blank")]
    BlankComponentName,

    #[error("Component name cannot contain '.': {name}")]
    DottedComponentName { name: String },

    #[error("Duplicate component name in one group: {name}")]
    DuplicateComponentName { name: String },

    #[error("Transition priority must be finite: {label}")]
    NonFinitePriority { label: String },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<prompter_core::CoreError> for PipelineError {
    fn from(err: prompter_core::CoreError) -> Self {
        Self::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
