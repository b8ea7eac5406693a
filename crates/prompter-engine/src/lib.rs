//! Dialog orchestration engine: the pipeline executor, the actor state
//! machine, and the lazy context persistence layer.
//!
//! A turn flows messenger → [`Pipeline::run_turn`] → pre-services →
//! [`actor`] → post-services → storage → response. Scripts are static
//! graphs of flows and nodes with guarded transitions; contexts are
//! per-dialog state persisted through the pluggable storage contract.

pub mod actor;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod script;
pub mod service;
pub mod testing;

pub use actor::Actor;
pub use context::{Context, ContextDict, FrameworkData, SharedContext};
pub use error::{ContextError, PipelineError, Result, ValidationError};
pub use pipeline::{MessengerInterface, Pipeline, PipelineBuilder, RunConfig};
pub use script::{
    Condition, Destination, Flow, Node, ResponseSpec, Script, Transition,
};
pub use service::{
    Component, ComponentExecutionState, ExtraHandlerRuntimeInfo, ExtraHandlerStage, Service,
    ServiceGroup, ServiceState,
};
