//! Permanent-magnet DC machine.
//!
//! Electrically the armature is a series R-L branch followed by a back-EMF
//! voltage source:
//!
//! ```text
//!   A+ --[Ra]-- n1 --[La]-- n2 --(+ emf -)-- A-
//! ```
//!
//! The two internal nodes and the EMF branch are allocated by the circuit
//! builder. The mechanical side is advanced once per committed step:
//!
//! ```text
//!   T_el  = psi * i_a
//!   w_new = (J/dt * w_old + T_el - T_load) / (J/dt + friction)
//!   emf   = psi * w_new        (applied in the next step)
//! ```

use crate::circuit::{BranchId, ComponentId, NodeId};
use crate::solver::{IntegrationMethod, MnaMatrix, RunContext};

use super::linear::Inductor;
use super::{HistoryUpdatable, PostProcessable, Stampable};

/// Mechanical parameters of a DC machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineParams {
    /// Armature resistance (ohm)
    pub ra: f64,
    /// Armature inductance (H)
    pub la: f64,
    /// Flux linkage constant (V*s/rad)
    pub psi: f64,
    /// Rotor inertia (kg*m^2)
    pub inertia: f64,
    /// Viscous friction (N*m*s/rad)
    pub friction: f64,
    /// Initial speed (rad/s)
    pub omega0: f64,
}

/// A DC machine with terminals (A+, A-).
#[derive(Debug, Clone)]
pub struct DcMachine {
    pub id: ComponentId,
    pub name: String,
    /// [A+, A-, internal R-L node, internal L-EMF node]
    pub nodes: [NodeId; 4],
    pub branch: BranchId,
    pub params: MachineParams,
    pub armature: Inductor,
    pub load_torque: f64,
    pub omega: f64,
    pub theta: f64,
    pub torque: f64,
    pub emf: f64,
    pub voltage: f64,
}

impl DcMachine {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 4],
        branch: BranchId,
        params: MachineParams,
        load_torque: f64,
        method: IntegrationMethod,
    ) -> Self {
        let armature =
            Inductor::new(id, format!("{}.La", name), [nodes[2], nodes[3]], params.la, 0.0, method);
        Self {
            id,
            name,
            nodes,
            branch,
            params,
            armature,
            load_torque,
            omega: params.omega0,
            theta: 0.0,
            torque: 0.0,
            emf: params.psi * params.omega0,
            voltage: 0.0,
        }
    }

    /// Armature current (A+ into the machine).
    pub fn current(&self) -> f64 {
        self.armature.current
    }

    /// Speed in revolutions per minute.
    pub fn rpm(&self) -> f64 {
        self.omega * 60.0 / std::f64::consts::TAU
    }

    pub fn set_load_torque(&mut self, torque: f64) {
        self.load_torque = torque;
    }
}

impl Stampable for DcMachine {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[2], 1.0 / self.params.ra);
        self.armature.stamp_conductance(mna, dt);
        mna.stamp_branch(self.nodes[3], self.nodes[1], self.branch);
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, time: f64, dt: f64) {
        self.armature.stamp_excitation(mna, time, dt);
        mna.stamp_branch_voltage(self.branch, self.emf);
    }
}

impl HistoryUpdatable for DcMachine {
    fn update_history(&mut self, mna: &MnaMatrix, dt: f64) {
        self.armature.update_history(mna, dt);
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
    }

    fn commit(&mut self) {
        self.armature.commit();
    }
}

impl PostProcessable for DcMachine {
    fn post_step(&mut self, dt: f64, _ctx: &mut RunContext) {
        let p = &self.params;
        self.torque = p.psi * self.armature.current;
        let j_dt = p.inertia / dt;
        self.omega = (j_dt * self.omega + self.torque - self.load_torque) / (j_dt + p.friction);
        self.theta += self.omega * dt;
        self.emf = p.psi * self.omega;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn machine() -> DcMachine {
        let params = MachineParams {
            ra: 1.0,
            la: 1e-3,
            psi: 0.5,
            inertia: 0.01,
            friction: 0.0,
            omega0: 0.0,
        };
        DcMachine::new(
            ComponentId(0),
            "M1".into(),
            [NodeId(1), NodeId(0), NodeId(2), NodeId(3)],
            BranchId(0),
            params,
            0.0,
            IntegrationMethod::BackwardEuler,
        )
    }

    #[test]
    fn test_torque_balance_update() {
        let mut m = machine();
        m.armature.current = 2.0;
        let mut ctx = RunContext::new();
        m.post_step(1e-3, &mut ctx);
        // T = 1 N*m, J/dt = 10 -> w = 0.1 rad/s
        assert_relative_eq!(m.torque, 1.0);
        assert_relative_eq!(m.omega, 0.1, epsilon = 1e-12);
        assert_relative_eq!(m.emf, 0.05, epsilon = 1e-12);
        assert_relative_eq!(m.theta, 1e-4, epsilon = 1e-15);
        assert_relative_eq!(m.rpm(), 0.1 * 60.0 / std::f64::consts::TAU, epsilon = 1e-12);
    }

    #[test]
    fn test_load_torque_decelerates() {
        let mut m = machine();
        m.omega = 10.0;
        m.set_load_torque(1.0);
        let mut ctx = RunContext::new();
        m.post_step(1e-3, &mut ctx);
        assert!(m.omega < 10.0);
    }

    #[test]
    fn test_emf_stamped_in_branch_row() {
        let mut m = machine();
        m.emf = 3.0;
        let mut mna = MnaMatrix::new(4, 1);
        m.stamp_excitation(&mut mna, 0.0, 1e-6);
        let row = mna.branch_row(BranchId(0));
        assert_relative_eq!(mna.z[row], 3.0);
    }
}
