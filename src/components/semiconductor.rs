//! Power semiconductors: diode, thyristor, IGBT and MOSFET.
//!
//! All of them are modeled as a resistance that is either ON or OFF. In the ON
//! state a forward voltage drop `uf` is added as a current injection:
//!
//! ```text
//!   i = (v - uf) / r_on
//! ```
//!
//! After every solve the device compares the voltage implied by the solution
//! with `d * uf`, where `d` is the resolver's disturbance factor. A mismatch
//! flips the state and asks the resolver for another iteration.

use crate::circuit::{ComponentId, NodeId};
use crate::solver::{MnaMatrix, RunContext};

use super::characteristic::{Characteristic, SegmentMove};
use super::switch::{SwitchResistance, SwitchState};
use super::{HistoryUpdatable, SelfCommutating, Stampable};

/// Default diode forward voltage.
pub const DIODE_FORWARD_VOLTAGE: f64 = 0.6;
/// Default diode ON resistance.
pub const DIODE_R_ON: f64 = 1e-3;
/// Default diode OFF resistance.
pub const DIODE_R_OFF: f64 = 1e9;
/// Default forward voltage of thyristors and IGBTs.
pub const SWITCH_FORWARD_VOLTAGE: f64 = 0.7;
/// Default ON resistance of thyristors, IGBTs and MOSFETs.
pub const SWITCH_R_ON: f64 = 10e-3;
/// Default OFF resistance of thyristors, IGBTs and MOSFETs.
pub const SWITCH_R_OFF: f64 = 10e6;
/// Default thyristor recovery time after commutation.
pub const THYRISTOR_RECOVERY_TIME: f64 = 10e-6;

/// Self-commutation rule shared by every forward-biased device.
///
/// ON turns OFF when the implied voltage falls to or below the threshold; OFF
/// turns ON when it rises above it. The acceptance tolerance widens the band.
pub fn commutation_target(
    state: SwitchState,
    voltage: f64,
    forward_voltage: f64,
    ctx: &RunContext,
) -> Option<SwitchState> {
    let threshold = ctx.disturbance() * forward_voltage;
    match state {
        SwitchState::On if voltage <= threshold - ctx.acceptance() => Some(SwitchState::Off),
        SwitchState::Off if voltage > threshold + ctx.acceptance() => Some(SwitchState::On),
        _ => None,
    }
}

fn stamp_forward_drop(
    mna: &mut MnaMatrix,
    nodes: [NodeId; 2],
    forward_voltage: f64,
    resistance: f64,
) {
    if forward_voltage != 0.0 {
        mna.stamp_current_source(nodes[0], nodes[1], -forward_voltage / resistance);
    }
}

/// Conduction model of a diode.
#[derive(Debug, Clone)]
pub enum DiodeModel {
    /// Two-state model with a fixed forward voltage
    Ideal { forward_voltage: f64, switch: SwitchResistance },
    /// Measured curve; the active segment gives resistance and forward voltage
    Characteristic(Characteristic),
}

/// A diode (anode, cathode).
#[derive(Debug, Clone)]
pub struct Diode {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub model: DiodeModel,
    pub voltage: f64,
    pub current: f64,
    saved: (SwitchState, usize),
}

impl Diode {
    /// Create a two-state diode, initially blocking.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        forward_voltage: f64,
        r_on: f64,
        r_off: f64,
    ) -> Self {
        let switch = SwitchResistance::new(r_on, r_off, SwitchState::Off);
        Self::with_model(id, name, nodes, DiodeModel::Ideal { forward_voltage, switch })
    }

    /// Create a diode following a measured characteristic.
    pub fn from_characteristic(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        curve: Characteristic,
    ) -> Self {
        Self::with_model(id, name, nodes, DiodeModel::Characteristic(curve))
    }

    fn with_model(id: ComponentId, name: String, nodes: [NodeId; 2], model: DiodeModel) -> Self {
        let mut diode = Self {
            id,
            name,
            nodes,
            model,
            voltage: 0.0,
            current: 0.0,
            saved: (SwitchState::Off, 0),
        };
        diode.begin_step();
        diode
    }

    /// Current differential resistance.
    pub fn resistance(&self) -> f64 {
        match &self.model {
            DiodeModel::Ideal { switch, .. } => switch.resistance(),
            DiodeModel::Characteristic(c) => c.active().resistance,
        }
    }

    /// Forward voltage currently injected (0 while blocking).
    pub fn forward_voltage(&self) -> f64 {
        match &self.model {
            DiodeModel::Ideal {
                forward_voltage,
                switch,
            } if switch.state().is_on() => *forward_voltage,
            DiodeModel::Ideal { .. } => 0.0,
            DiodeModel::Characteristic(c) => c.active().forward_voltage,
        }
    }

    /// Conduction state; a characteristic diode is OFF only in its lowest segment.
    pub fn state(&self) -> SwitchState {
        match &self.model {
            DiodeModel::Ideal { switch, .. } => switch.state(),
            DiodeModel::Characteristic(c) => SwitchState::from_gate(c.active_index() > 0),
        }
    }

    fn segment_index(&self) -> usize {
        match &self.model {
            DiodeModel::Ideal { .. } => 0,
            DiodeModel::Characteristic(c) => c.active_index(),
        }
    }
}

impl Stampable for Diode {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, _dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[1], 1.0 / self.resistance());
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, _time: f64, _dt: f64) {
        stamp_forward_drop(mna, self.nodes, self.forward_voltage(), self.resistance());
    }
}

impl HistoryUpdatable for Diode {
    fn update_history(&mut self, mna: &MnaMatrix, _dt: f64) {
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
        self.current = (self.voltage - self.forward_voltage()) / self.resistance();
    }
}

impl SelfCommutating for Diode {
    fn check_switch_state(&mut self, ctx: &mut RunContext) -> bool {
        match &mut self.model {
            DiodeModel::Ideal { forward_voltage, switch } => {
                match commutation_target(switch.state(), self.voltage, *forward_voltage, ctx) {
                    Some(target) => {
                        switch.set_state(target);
                        ctx.record_commutation(self.id, target);
                        true
                    }
                    None => false,
                }
            }
            DiodeModel::Characteristic(curve) => {
                // Negative tolerance widens the segment, giving hysteresis
                // once the resolver starts accepting small errors.
                let moved = curve.advance(self.voltage, ctx.disturbance(), -ctx.acceptance());
                if moved == SegmentMove::Stable {
                    return false;
                }
                let state = SwitchState::from_gate(curve.active_index() > 0);
                ctx.record_commutation(self.id, state);
                true
            }
        }
    }

    fn begin_step(&mut self) {
        self.saved = (self.state(), self.segment_index());
    }

    fn rollback(&mut self) {
        let (state, segment) = self.saved;
        match &mut self.model {
            DiodeModel::Ideal { switch, .. } => {
                switch.set_state(state);
            }
            DiodeModel::Characteristic(c) => c.set_active(segment),
        }
    }
}

/// A thyristor (anode, cathode): fired by the gate, turned off by commutation.
#[derive(Debug, Clone)]
pub struct Thyristor {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub forward_voltage: f64,
    pub switch: SwitchResistance,
    pub recovery_time: f64,
    pub gate: bool,
    pub voltage: f64,
    pub current: f64,
    /// Firing is inhibited until this time after a turn-off
    blocked_until: f64,
    saved: (SwitchState, f64),
}

impl Thyristor {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        forward_voltage: f64,
        r_on: f64,
        r_off: f64,
        recovery_time: f64,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            forward_voltage,
            switch: SwitchResistance::new(r_on, r_off, SwitchState::Off),
            recovery_time,
            gate: false,
            voltage: 0.0,
            current: 0.0,
            blocked_until: f64::NEG_INFINITY,
            saved: (SwitchState::Off, f64::NEG_INFINITY),
        }
    }

    /// Store the gate level. Firing happens in the next switch check.
    pub fn set_gate_signal(&mut self, on: bool) {
        self.gate = on;
    }

    fn drop_voltage(&self) -> f64 {
        if self.switch.state().is_on() {
            self.forward_voltage
        } else {
            0.0
        }
    }
}

impl Stampable for Thyristor {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, _dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[1], self.switch.conductance());
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, _time: f64, _dt: f64) {
        stamp_forward_drop(mna, self.nodes, self.drop_voltage(), self.switch.resistance());
    }
}

impl HistoryUpdatable for Thyristor {
    fn update_history(&mut self, mna: &MnaMatrix, _dt: f64) {
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
        self.current = (self.voltage - self.drop_voltage()) * self.switch.conductance();
    }
}

impl SelfCommutating for Thyristor {
    fn check_switch_state(&mut self, ctx: &mut RunContext) -> bool {
        let state = self.switch.state();
        let target = match commutation_target(state, self.voltage, self.forward_voltage, ctx) {
            Some(SwitchState::Off) => {
                self.blocked_until = ctx.time() + self.recovery_time;
                SwitchState::Off
            }
            Some(SwitchState::On) if self.gate && ctx.time() >= self.blocked_until => {
                SwitchState::On
            }
            _ => return false,
        };
        self.switch.set_state(target);
        ctx.record_commutation(self.id, target);
        true
    }

    fn begin_step(&mut self) {
        self.saved = (self.switch.state(), self.blocked_until);
    }

    fn rollback(&mut self) {
        self.switch.set_state(self.saved.0);
        self.blocked_until = self.saved.1;
    }
}

/// Gate-driven unidirectional switch with forward drop (collector, emitter)
/// and an optional anti-parallel diode.
#[derive(Debug, Clone)]
pub struct Igbt {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub forward_voltage: f64,
    pub switch: SwitchResistance,
    pub gate: bool,
    pub anti_parallel: Option<Diode>,
    pub voltage: f64,
    pub current: f64,
    saved: SwitchState,
}

impl Igbt {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        forward_voltage: f64,
        r_on: f64,
        r_off: f64,
        anti_parallel: Option<Diode>,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            forward_voltage,
            switch: SwitchResistance::new(r_on, r_off, SwitchState::Off),
            gate: false,
            anti_parallel,
            voltage: 0.0,
            current: 0.0,
            saved: SwitchState::Off,
        }
    }

    /// Apply a gate level. Only an edge drives the channel; re-asserting the
    /// current level leaves a self-commutated state alone. Returns the new
    /// state if it changed.
    pub fn set_gate_signal(&mut self, on: bool) -> Option<SwitchState> {
        if self.gate == on {
            return None;
        }
        self.gate = on;
        let target = SwitchState::from_gate(on);
        self.switch.set_state(target).then_some(target)
    }

    fn drop_voltage(&self) -> f64 {
        if self.switch.state().is_on() {
            self.forward_voltage
        } else {
            0.0
        }
    }

    /// Total terminal current including the anti-parallel diode.
    pub fn terminal_current(&self) -> f64 {
        self.current - self.anti_parallel.as_ref().map(|d| d.current).unwrap_or(0.0)
    }
}

impl Stampable for Igbt {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[1], self.switch.conductance());
        if let Some(diode) = &self.anti_parallel {
            diode.stamp_conductance(mna, dt);
        }
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, time: f64, dt: f64) {
        stamp_forward_drop(mna, self.nodes, self.drop_voltage(), self.switch.resistance());
        if let Some(diode) = &self.anti_parallel {
            diode.stamp_excitation(mna, time, dt);
        }
    }
}

impl HistoryUpdatable for Igbt {
    fn update_history(&mut self, mna: &MnaMatrix, dt: f64) {
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
        self.current = (self.voltage - self.drop_voltage()) * self.switch.conductance();
        if let Some(diode) = &mut self.anti_parallel {
            diode.update_history(mna, dt);
        }
    }
}

impl SelfCommutating for Igbt {
    fn check_switch_state(&mut self, ctx: &mut RunContext) -> bool {
        let mut changed = false;
        if self.gate {
            let state = self.switch.state();
            if let Some(target) =
                commutation_target(state, self.voltage, self.forward_voltage, ctx)
            {
                self.switch.set_state(target);
                ctx.record_commutation(self.id, target);
                changed = true;
            }
        }
        if let Some(diode) = &mut self.anti_parallel {
            changed |= diode.check_switch_state(ctx);
        }
        changed
    }

    fn begin_step(&mut self) {
        self.saved = self.switch.state();
        if let Some(diode) = &mut self.anti_parallel {
            diode.begin_step();
        }
    }

    fn rollback(&mut self) {
        self.switch.set_state(self.saved);
        if let Some(diode) = &mut self.anti_parallel {
            diode.rollback();
        }
    }
}

/// Gate-driven bidirectional channel (drain, source) with an optional body diode.
#[derive(Debug, Clone)]
pub struct Mosfet {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub switch: SwitchResistance,
    pub body_diode: Option<Diode>,
    pub voltage: f64,
    pub current: f64,
}

impl Mosfet {
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        r_on: f64,
        r_off: f64,
        body_diode: Option<Diode>,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            switch: SwitchResistance::new(r_on, r_off, SwitchState::Off),
            body_diode,
            voltage: 0.0,
            current: 0.0,
        }
    }

    /// Apply a gate level; returns the new state if it changed.
    pub fn set_gate_signal(&mut self, on: bool) -> Option<SwitchState> {
        let target = SwitchState::from_gate(on);
        self.switch.set_state(target).then_some(target)
    }

    /// Total terminal current including the body diode.
    pub fn terminal_current(&self) -> f64 {
        self.current - self.body_diode.as_ref().map(|d| d.current).unwrap_or(0.0)
    }
}

impl Stampable for Mosfet {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[1], self.switch.conductance());
        if let Some(diode) = &self.body_diode {
            diode.stamp_conductance(mna, dt);
        }
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, time: f64, dt: f64) {
        if let Some(diode) = &self.body_diode {
            diode.stamp_excitation(mna, time, dt);
        }
    }
}

impl HistoryUpdatable for Mosfet {
    fn update_history(&mut self, mna: &MnaMatrix, dt: f64) {
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
        self.current = self.voltage * self.switch.conductance();
        if let Some(diode) = &mut self.body_diode {
            diode.update_history(mna, dt);
        }
    }
}

impl SelfCommutating for Mosfet {
    fn check_switch_state(&mut self, ctx: &mut RunContext) -> bool {
        match &mut self.body_diode {
            Some(diode) => diode.check_switch_state(ctx),
            None => false,
        }
    }

    fn begin_step(&mut self) {
        if let Some(diode) = &mut self.body_diode {
            diode.begin_step();
        }
    }

    fn rollback(&mut self) {
        if let Some(diode) = &mut self.body_diode {
            diode.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn diode() -> Diode {
        Diode::new(ComponentId(1), "D1".into(), [NodeId(1), NodeId(0)], 0.6, 1e-3, 1e9)
    }

    fn ctx() -> RunContext {
        let mut ctx = RunContext::new();
        ctx.begin_step(1e-6);
        ctx
    }

    #[test]
    fn test_diode_turns_on_above_threshold() {
        let mut d = diode();
        let mut ctx = ctx();
        d.voltage = 0.5;
        assert!(!d.check_switch_state(&mut ctx));
        d.voltage = 0.61;
        assert!(d.check_switch_state(&mut ctx));
        assert_eq!(d.state(), SwitchState::On);
        assert!(ctx.switch_inconsistency());
        assert_eq!(ctx.pending_events()[0].state, SwitchState::On);
    }

    #[test]
    fn test_diode_turns_off_at_threshold() {
        let mut d = diode();
        let mut ctx = ctx();
        d.voltage = 1.0;
        d.check_switch_state(&mut ctx);
        d.voltage = 0.6;
        assert!(d.check_switch_state(&mut ctx));
        assert_eq!(d.state(), SwitchState::Off);
    }

    #[test]
    fn test_disturbance_scales_threshold() {
        let mut d = diode();
        let mut ctx = ctx();
        ctx.set_disturbance(0.5);
        d.voltage = 0.35;
        assert!(d.check_switch_state(&mut ctx));
        assert_eq!(d.state(), SwitchState::On);
    }

    #[test]
    fn test_on_diode_excitation_injects_forward_drop() {
        let mut d = diode();
        let mut ctx = ctx();
        d.voltage = 1.0;
        d.check_switch_state(&mut ctx);

        let mut mna = MnaMatrix::new(2, 0);
        d.stamp_excitation(&mut mna, 0.0, 1e-6);
        // uf / r_on into the anode
        assert_relative_eq!(mna.z[0], 0.6 / 1e-3, epsilon = 1e-9);
    }

    #[test]
    fn test_rollback_restores_step_start_state() {
        let mut d = diode();
        let mut ctx = ctx();
        d.begin_step();
        d.voltage = 1.0;
        d.check_switch_state(&mut ctx);
        assert_eq!(d.state(), SwitchState::On);
        d.rollback();
        assert_eq!(d.state(), SwitchState::Off);
    }

    #[test]
    fn test_thyristor_needs_gate_to_fire() {
        let mut t = Thyristor::new(
            ComponentId(2),
            "T1".into(),
            [NodeId(1), NodeId(0)],
            0.7,
            10e-3,
            10e6,
            10e-6,
        );
        let mut ctx = ctx();
        t.voltage = 5.0;
        assert!(!t.check_switch_state(&mut ctx));
        t.set_gate_signal(true);
        assert!(t.check_switch_state(&mut ctx));
        assert!(t.switch.state().is_on());
    }

    #[test]
    fn test_thyristor_recovery_blocks_refiring() {
        let mut t = Thyristor::new(
            ComponentId(2),
            "T1".into(),
            [NodeId(1), NodeId(0)],
            0.7,
            10e-3,
            10e6,
            10e-6,
        );
        t.set_gate_signal(true);
        let mut ctx = RunContext::new();
        ctx.begin_step(1e-6);
        t.voltage = 5.0;
        t.check_switch_state(&mut ctx);

        // Commutated off at t = 2 us
        ctx.begin_step(2e-6);
        t.voltage = -1.0;
        assert!(t.check_switch_state(&mut ctx));
        assert!(!t.switch.state().is_on());

        // Forward voltage again within the recovery time: stays off
        ctx.begin_step(5e-6);
        t.voltage = 5.0;
        assert!(!t.check_switch_state(&mut ctx));

        ctx.begin_step(13e-6);
        assert!(t.check_switch_state(&mut ctx));
        assert!(t.switch.state().is_on());
    }

    #[test]
    fn test_igbt_gate_off_forces_off() {
        let mut q =
            Igbt::new(ComponentId(3), "Q1".into(), [NodeId(1), NodeId(0)], 0.7, 10e-3, 10e6, None);
        assert_eq!(q.set_gate_signal(true), Some(SwitchState::On));
        assert_relative_eq!(q.switch.resistance(), 10e-3);
        assert_eq!(q.set_gate_signal(false), Some(SwitchState::Off));
        assert_relative_eq!(q.switch.resistance(), 10e6);

        // Without gate, forward voltage does not turn it on
        let mut ctx = ctx();
        q.voltage = 10.0;
        assert!(!q.check_switch_state(&mut ctx));
    }

    #[test]
    fn test_igbt_reverse_voltage_commutates_channel() {
        let mut q =
            Igbt::new(ComponentId(3), "Q1".into(), [NodeId(1), NodeId(0)], 0.7, 10e-3, 10e6, None);
        q.set_gate_signal(true);
        let mut ctx = ctx();
        q.voltage = -2.0;
        assert!(q.check_switch_state(&mut ctx));
        assert_eq!(q.switch.state(), SwitchState::Off);
        // Still gated: forward bias brings it back
        q.voltage = 3.0;
        assert!(q.check_switch_state(&mut ctx));
        assert_eq!(q.switch.state(), SwitchState::On);
    }

    #[test]
    fn test_igbt_repeated_gate_level_is_ignored() {
        let mut q =
            Igbt::new(ComponentId(3), "Q1".into(), [NodeId(1), NodeId(0)], 0.7, 10e-3, 10e6, None);
        assert_eq!(q.set_gate_signal(false), None);
        assert_eq!(q.set_gate_signal(true), Some(SwitchState::On));

        let mut ctx = ctx();
        q.voltage = -2.0;
        assert!(q.check_switch_state(&mut ctx));
        assert_eq!(q.set_gate_signal(true), None);
        assert_eq!(q.switch.state(), SwitchState::Off);
    }
}
