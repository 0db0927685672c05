//! Voltage and current sources.

use std::f64::consts::TAU;

use crate::circuit::{BranchId, ComponentId, NodeId};
use crate::solver::MnaMatrix;

use super::{HistoryUpdatable, Stampable};

/// Time function driving an independent source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Constant value, also used for externally set values
    Dc(f64),
    /// `offset + amplitude * sin(2*pi*frequency*t + phase)`
    Sine {
        amplitude: f64,
        frequency: f64,
        phase: f64,
        offset: f64,
    },
}

impl Waveform {
    /// Value at time `t`.
    pub fn value(&self, t: f64) -> f64 {
        match *self {
            Waveform::Dc(v) => v,
            Waveform::Sine {
                amplitude,
                frequency,
                phase,
                offset,
            } => offset + amplitude * (TAU * frequency * t + phase).sin(),
        }
    }
}

/// A voltage source component.
///
/// Voltage sources require an extra row/column in the MNA matrix for the
/// branch current. The source enforces: V+ - V- = V_source
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative]
    pub branch: BranchId,
    pub waveform: Waveform,
    /// Current delivered out of the positive terminal
    pub current: f64,
}

impl VoltageSource {
    /// Create a new voltage source.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        branch: BranchId,
        waveform: Waveform,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            branch,
            waveform,
            current: 0.0,
        }
    }

    /// Replace the waveform by a constant value set from outside the solver.
    pub fn set_value(&mut self, value: f64) {
        self.waveform = Waveform::Dc(value);
    }

    /// Source voltage at time `t`.
    pub fn voltage(&self, t: f64) -> f64 {
        self.waveform.value(t)
    }
}

impl Stampable for VoltageSource {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, _dt: f64) {
        mna.stamp_branch(self.nodes[0], self.nodes[1], self.branch);
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, time: f64, _dt: f64) {
        mna.stamp_branch_voltage(self.branch, self.voltage(time));
    }
}

impl HistoryUpdatable for VoltageSource {
    fn update_history(&mut self, mna: &MnaMatrix, _dt: f64) {
        self.current = -mna.branch_current(self.branch);
    }
}

/// A current source component.
///
/// Current sources add directly to the excitation vector.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2], // [positive, negative] - current flows from + to - through the source
    pub waveform: Waveform,
    pub voltage: f64,
}

impl CurrentSource {
    /// Create a new current source.
    pub fn new(id: ComponentId, name: String, nodes: [NodeId; 2], waveform: Waveform) -> Self {
        Self {
            id,
            name,
            nodes,
            waveform,
            voltage: 0.0,
        }
    }

    /// Replace the waveform by a constant value set from outside the solver.
    pub fn set_value(&mut self, value: f64) {
        self.waveform = Waveform::Dc(value);
    }
}

impl Stampable for CurrentSource {
    fn stamp_conductance(&self, _mna: &mut MnaMatrix, _dt: f64) {}

    fn stamp_excitation(&self, mna: &mut MnaMatrix, time: f64, _dt: f64) {
        mna.stamp_current_source(self.nodes[0], self.nodes[1], self.waveform.value(time));
    }
}

impl HistoryUpdatable for CurrentSource {
    fn update_history(&mut self, mna: &MnaMatrix, _dt: f64) {
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sine_waveform() {
        let w = Waveform::Sine {
            amplitude: 325.0,
            frequency: 50.0,
            phase: 0.0,
            offset: 0.0,
        };
        assert_relative_eq!(w.value(0.0), 0.0);
        assert_relative_eq!(w.value(0.005), 325.0, epsilon = 1e-9);
    }

    #[test]
    fn test_voltage_source_excitation_is_additive() {
        let vs = VoltageSource::new(
            ComponentId(0),
            "V1".into(),
            [NodeId(1), NodeId(0)],
            BranchId(0),
            Waveform::Dc(5.0),
        );
        let mut mna = MnaMatrix::new(2, 1);
        vs.stamp_excitation(&mut mna, 0.0, 1e-6);
        vs.stamp_excitation(&mut mna, 0.0, 1e-6);
        assert_relative_eq!(mna.z[1], 10.0);
    }

    #[test]
    fn test_set_value_overrides_waveform() {
        let mut cs = CurrentSource::new(
            ComponentId(0),
            "I1".into(),
            [NodeId(1), NodeId(0)],
            Waveform::Dc(1.0),
        );
        cs.set_value(-2.0);
        let mut mna = MnaMatrix::new(2, 0);
        cs.stamp_excitation(&mut mna, 1.0, 1e-6);
        assert_relative_eq!(mna.z[0], 2.0);
    }
}
