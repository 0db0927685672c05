//! Switch state machine and the gate-driven ideal switch.

use std::fmt;

use crate::circuit::{ComponentId, NodeId};
use crate::solver::{MnaMatrix, MAX_RESISTANCE, MIN_RESISTANCE};

use super::{HistoryUpdatable, Stampable};

/// Conduction state of a switching device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    /// State from a boolean gate level.
    pub fn from_gate(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }

    pub fn is_on(self) -> bool {
        self == SwitchState::On
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchState::On => write!(f, "ON"),
            SwitchState::Off => write!(f, "OFF"),
        }
    }
}

/// Clamp a configured resistance into the range the solver accepts.
pub fn clamp_resistance(r: f64) -> f64 {
    r.clamp(MIN_RESISTANCE, MAX_RESISTANCE)
}

/// Differential resistance selected between an ON and an OFF value.
#[derive(Debug, Clone, Copy)]
pub struct SwitchResistance {
    r_on: f64,
    r_off: f64,
    state: SwitchState,
}

impl SwitchResistance {
    /// Create with both values clamped to the resistance floor.
    pub fn new(r_on: f64, r_off: f64, state: SwitchState) -> Self {
        Self {
            r_on: clamp_resistance(r_on),
            r_off: clamp_resistance(r_off),
            state,
        }
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    /// Set the state, returning whether it changed.
    pub fn set_state(&mut self, state: SwitchState) -> bool {
        let changed = self.state != state;
        self.state = state;
        changed
    }

    /// Resistance presented in the current state.
    pub fn resistance(&self) -> f64 {
        match self.state {
            SwitchState::On => self.r_on,
            SwitchState::Off => self.r_off,
        }
    }

    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance()
    }
}

/// A switch driven only by its gate signal.
#[derive(Debug, Clone)]
pub struct IdealSwitch {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub switch: SwitchResistance,
    pub voltage: f64,
    pub current: f64,
}

impl IdealSwitch {
    /// Default ON resistance.
    pub const R_ON: f64 = 10e-3;
    /// Default OFF resistance.
    pub const R_OFF: f64 = 10e6;

    /// Create a new switch.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        r_on: f64,
        r_off: f64,
        closed: bool,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            switch: SwitchResistance::new(r_on, r_off, SwitchState::from_gate(closed)),
            voltage: 0.0,
            current: 0.0,
        }
    }

    /// Apply a gate level; returns the new state if it changed.
    pub fn set_gate_signal(&mut self, on: bool) -> Option<SwitchState> {
        let target = SwitchState::from_gate(on);
        self.switch.set_state(target).then_some(target)
    }

    /// Current differential resistance.
    pub fn resistance(&self) -> f64 {
        self.switch.resistance()
    }
}

impl Stampable for IdealSwitch {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, _dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[1], self.switch.conductance());
    }

    fn stamp_excitation(&self, _mna: &mut MnaMatrix, _time: f64, _dt: f64) {}
}

impl HistoryUpdatable for IdealSwitch {
    fn update_history(&mut self, mna: &MnaMatrix, _dt: f64) {
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
        self.current = self.voltage * self.switch.conductance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn switch(r_on: f64) -> IdealSwitch {
        IdealSwitch::new(ComponentId(0), "S1".into(), [NodeId(1), NodeId(0)], r_on, 1e6, false)
    }

    #[test]
    fn test_gate_selects_resistance() {
        let mut s = switch(0.05);
        assert_eq!(s.set_gate_signal(true), Some(SwitchState::On));
        assert_relative_eq!(s.resistance(), 0.05);
        assert_eq!(s.set_gate_signal(true), None);
        assert_eq!(s.set_gate_signal(false), Some(SwitchState::Off));
        assert_relative_eq!(s.resistance(), 1e6);
    }

    #[test]
    fn test_on_resistance_clamped_to_floor() {
        let mut s = switch(0.0);
        s.set_gate_signal(true);
        assert_relative_eq!(s.resistance(), MIN_RESISTANCE);
        let mut s = switch(-5.0);
        s.set_gate_signal(true);
        assert!(s.resistance() > 0.0);
    }

    #[test]
    fn test_off_resistance_clamped_to_ceiling() {
        let r = SwitchResistance::new(1e-3, 1e30, SwitchState::Off);
        assert_relative_eq!(r.resistance(), MAX_RESISTANCE);
    }
}
