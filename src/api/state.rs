use std::time::Instant;

use crate::pipeline::PipelineStatus;

#[derive(Clone)]
pub struct AppState {
    pub status: PipelineStatus,
    pub started: Instant,
    pub remediation_enabled: bool,
}

impl AppState {
    pub fn new(status: PipelineStatus) -> Self {
        let remediation_enabled = status.dispatcher.is_some();
        Self {
            status,
            started: Instant::now(),
            remediation_enabled,
        }
    }
}
