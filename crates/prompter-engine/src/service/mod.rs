//! Pipeline components: the shared run protocol, leaf services, and the
//! group scheduler.

pub mod component;
pub mod conditions;
pub mod extra;
pub mod group;
pub mod service;
pub mod types;

pub use component::{Component, ComponentInfo};
pub use extra::{ExtraHandlerFn, ExtraHandlerRuntimeInfo, ExtraHandlerStage};
pub use group::ServiceGroup;
pub use service::Service;
pub use types::{ComponentExecutionState, ServiceState};
