//! Current-controlled voltage sources.
//!
//! Both sources own a branch unknown of their own and read the delivered
//! current of another branch-owning device (the control). The control
//! branch index is resolved by the circuit builder before construction.

use crate::circuit::{BranchId, ComponentId, NodeId};
use crate::solver::{MnaMatrix, RunContext};

use super::{HistoryUpdatable, PostProcessable, Stampable};

/// Voltage source with `V = gain * I_control`, solved implicitly.
#[derive(Debug, Clone)]
pub struct CurrentControlledSource {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub branch: BranchId,
    pub control: BranchId,
    pub gain: f64,
    pub voltage: f64,
    pub current: f64,
}

impl CurrentControlledSource {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        branch: BranchId,
        control: BranchId,
        gain: f64,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            branch,
            control,
            gain,
            voltage: 0.0,
            current: 0.0,
        }
    }
}

impl Stampable for CurrentControlledSource {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, _dt: f64) {
        mna.stamp_branch(self.nodes[0], self.nodes[1], self.branch);
        // V+ - V- - gain * (-x_control) = 0
        let row = mna.branch_row(self.branch);
        let col = mna.branch_row(self.control);
        mna.add(row, col, self.gain);
    }

    fn stamp_excitation(&self, _mna: &mut MnaMatrix, _time: f64, _dt: f64) {}
}

impl HistoryUpdatable for CurrentControlledSource {
    fn update_history(&mut self, mna: &MnaMatrix, _dt: f64) {
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
        self.current = -mna.branch_current(self.branch);
    }
}

/// Voltage source with `V = gain * dI_control/dt`.
///
/// The derivative is taken from committed steps in the post-step hook and
/// applied as the next step's excitation.
#[derive(Debug, Clone)]
pub struct DiDtControlledSource {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub branch: BranchId,
    pub control: BranchId,
    pub gain: f64,
    /// Source voltage applied in the next step
    pub output: f64,
    pub current: f64,
    control_current: f64,
    previous_control: Option<f64>,
}

impl DiDtControlledSource {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        branch: BranchId,
        control: BranchId,
        gain: f64,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            branch,
            control,
            gain,
            output: 0.0,
            current: 0.0,
            control_current: 0.0,
            previous_control: None,
        }
    }
}

impl Stampable for DiDtControlledSource {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, _dt: f64) {
        mna.stamp_branch(self.nodes[0], self.nodes[1], self.branch);
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, _time: f64, _dt: f64) {
        mna.stamp_branch_voltage(self.branch, self.output);
    }
}

impl HistoryUpdatable for DiDtControlledSource {
    fn update_history(&mut self, mna: &MnaMatrix, _dt: f64) {
        self.current = -mna.branch_current(self.branch);
        self.control_current = -mna.branch_current(self.control);
    }
}

impl PostProcessable for DiDtControlledSource {
    fn post_step(&mut self, dt: f64, _ctx: &mut RunContext) {
        self.output = match self.previous_control {
            Some(previous) => self.gain * (self.control_current - previous) / dt,
            None => 0.0,
        };
        self.previous_control = Some(self.control_current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ccvs_references_control_column() {
        // nodes: gnd, n1, n2 ; branches: control (0), own (1)
        let h = CurrentControlledSource::new(
            ComponentId(1),
            "H1".into(),
            [NodeId(2), NodeId(0)],
            BranchId(1),
            BranchId(0),
            3.0,
        );
        let mut mna = MnaMatrix::new(3, 2);
        h.stamp_conductance(&mut mna, 1e-6);
        let row = mna.branch_row(BranchId(1));
        let col = mna.branch_row(BranchId(0));
        assert_relative_eq!(mna.get(row, col), 3.0);
        assert_relative_eq!(mna.get(row, 1), 1.0);
    }

    #[test]
    fn test_didt_output_follows_committed_derivative() {
        let mut src = DiDtControlledSource::new(
            ComponentId(1),
            "E1".into(),
            [NodeId(1), NodeId(0)],
            BranchId(1),
            BranchId(0),
            2.0,
        );
        let mut ctx = RunContext::new();
        let mut mna = MnaMatrix::new(2, 2);
        let control_row = mna.branch_row(BranchId(0));

        mna.x[control_row] = -1.0;
        src.update_history(&mna, 1e-3);
        src.post_step(1e-3, &mut ctx);
        assert_relative_eq!(src.output, 0.0);

        mna.x[control_row] = -1.5;
        src.update_history(&mna, 1e-3);
        src.post_step(1e-3, &mut ctx);
        // 2 * (1.5 - 1.0) / 1e-3
        assert_relative_eq!(src.output, 1000.0, epsilon = 1e-9);
    }
}
