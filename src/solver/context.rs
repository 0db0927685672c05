//! Per-run mutable solver state.

use crate::circuit::ComponentId;
use crate::components::SwitchState;

/// Acceptance tolerance applied to switch thresholds after many iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptanceStep {
    /// Iteration count from which this tolerance applies
    pub after_iterations: usize,
    /// Tolerance in volts
    pub tolerance: f64,
}

/// Immutable record of a switch changing state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchEvent {
    /// Device that switched
    pub component: ComponentId,
    /// Resulting state
    pub state: SwitchState,
    /// Simulation time of the step in which it switched
    pub time: f64,
}

/// State threaded through assembly, solve and switch checks of one run.
///
/// Nothing in here is global, so independent runs never share flags.
#[derive(Debug, Clone)]
pub struct RunContext {
    time: f64,
    restamp: bool,
    switch_inconsistency: bool,
    disturbance: f64,
    acceptance: f64,
    pending: Vec<SwitchEvent>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Fresh context; the first assembly is always a full re-stamp.
    pub fn new() -> Self {
        Self {
            time: 0.0,
            restamp: true,
            switch_inconsistency: false,
            disturbance: 1.0,
            acceptance: 0.0,
            pending: Vec::new(),
        }
    }

    /// Time of the step being resolved.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Reset per-step state before resolving the step ending at `time`.
    pub fn begin_step(&mut self, time: f64) {
        self.time = time;
        self.switch_inconsistency = false;
        self.disturbance = 1.0;
        self.acceptance = 0.0;
        self.pending.clear();
    }

    /// Force the next assembly pass to recompute every conductance stamp.
    pub fn request_restamp(&mut self) {
        self.restamp = true;
    }

    /// Whether the next assembly needs a full conductance re-stamp.
    pub fn needs_restamp(&self) -> bool {
        self.restamp
    }

    /// Clear the re-stamp flag once the matrix has been rebuilt.
    pub fn clear_restamp(&mut self) {
        self.restamp = false;
    }

    /// Diagnostic: at least one self-commutated switch disagreed with its solve.
    pub fn switch_inconsistency(&self) -> bool {
        self.switch_inconsistency
    }

    /// Current disturbance factor applied to forward thresholds.
    pub fn disturbance(&self) -> f64 {
        self.disturbance
    }

    /// Current acceptance tolerance applied to forward thresholds.
    pub fn acceptance(&self) -> f64 {
        self.acceptance
    }

    pub(crate) fn set_disturbance(&mut self, disturbance: f64) {
        self.disturbance = disturbance;
    }

    pub(crate) fn set_acceptance(&mut self, acceptance: f64) {
        self.acceptance = acceptance;
    }

    /// Record a self-commutated transition: raises both the inconsistency
    /// diagnostic and the re-stamp flag.
    pub fn record_commutation(&mut self, component: ComponentId, state: SwitchState) {
        self.switch_inconsistency = true;
        self.restamp = true;
        self.pending.push(SwitchEvent {
            component,
            state,
            time: self.time,
        });
    }

    /// Events produced while resolving the current step.
    pub fn pending_events(&self) -> &[SwitchEvent] {
        &self.pending
    }

    pub(crate) fn take_pending(&mut self) -> Vec<SwitchEvent> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_requests_full_stamp() {
        let ctx = RunContext::new();
        assert!(ctx.needs_restamp());
        assert!(!ctx.switch_inconsistency());
    }

    #[test]
    fn test_commutation_raises_flags_and_records_event() {
        let mut ctx = RunContext::new();
        ctx.clear_restamp();
        ctx.begin_step(2e-6);
        ctx.record_commutation(ComponentId(4), SwitchState::Off);

        assert!(ctx.needs_restamp());
        assert!(ctx.switch_inconsistency());
        assert_eq!(ctx.pending_events().len(), 1);
        assert_eq!(ctx.pending_events()[0].time, 2e-6);

        ctx.begin_step(3e-6);
        assert!(!ctx.switch_inconsistency());
        assert!(ctx.pending_events().is_empty());
    }

    #[test]
    fn test_contexts_are_independent() {
        let mut a = RunContext::new();
        let b = RunContext::new();
        a.clear_restamp();
        a.record_commutation(ComponentId(0), SwitchState::On);
        assert!(!b.switch_inconsistency());
    }
}
