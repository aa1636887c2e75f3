/// Lifecycle of a [`PreparedState`](crate::prepared::PreparedState).
///
/// ```text
/// constructed → (init_buffer_info) → ready ⇄ started
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparedPhase {
    Constructed,
    Ready,
    Started,
}

/// Lifecycle of a [`RunningState`](crate::running::RunningState).
///
/// ```text
/// created → running → stopping → stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningPhase {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl RunningPhase {
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}
