use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct ProbeState {
    marks: Vec<String>,
    running: usize,
    peak: usize,
    started: usize,
}

/// Shared record of what the scripted runtimes did.
#[derive(Clone, Debug, Default)]
pub struct ExecProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl ExecProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels passed to `mark(...)`, in the order they ran.
    pub fn marks(&self) -> Vec<String> {
        self.state.lock().marks.clone()
    }

    /// Highest number of executions running at once.
    pub fn peak(&self) -> usize {
        self.state.lock().peak
    }

    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    /// Executions started so far.
    pub fn started(&self) -> usize {
        self.state.lock().started
    }

    pub(crate) fn mark(&self, label: String) {
        self.state.lock().marks.push(label);
    }

    pub(crate) fn enter(&self) -> RunningGuard {
        let mut state = self.state.lock();
        state.running += 1;
        state.started += 1;
        state.peak = state.peak.max(state.running);
        RunningGuard {
            probe: self.clone(),
        }
    }
}

/// Counts one execution as running until dropped.
pub(crate) struct RunningGuard {
    probe: ExecProbe,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut state = self.probe.state.lock();
        state.running = state.running.saturating_sub(1);
    }
}
