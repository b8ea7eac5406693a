use tokio_util::sync::CancellationToken;

/// Lifecycle of one component within one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentExecutionState {
    /// Start condition was false, or the component has not been reached.
    #[default]
    NotRun,
    Running,
    Finished,
    Failed,
}

/// Per-component runtime record, keyed by component path in
/// `framework_data.service_states` and cleared at the start of every turn.
#[derive(Debug, Clone, Default)]
pub struct ServiceState {
    pub status: ComponentExecutionState,
    /// Latched once the component's run protocol completes, in every exit
    /// path (not-run, finished, failed, timed out). Other components may
    /// await it to sequence against this one.
    pub done: CancellationToken,
}

impl ServiceState {
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }
}
