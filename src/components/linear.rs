//! Linear passive components: Resistor, Capacitor, Inductor.

use crate::circuit::{ComponentId, NodeId};
use crate::solver::{IntegrationMethod, MnaMatrix, RunContext, MIN_RESISTANCE};

use super::characteristic::PiecewiseLinear;
use super::{HistoryUpdatable, PostProcessable, Stampable};

/// Relative inductance change of a saturable inductor that triggers a re-stamp.
const SATURATION_RESTAMP_THRESHOLD: f64 = 0.01;

/// A resistor component.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub resistance: f64,
    pub voltage: f64,
    pub current: f64,
}

impl Resistor {
    /// Create a new resistor.
    pub fn new(id: ComponentId, name: String, nodes: [NodeId; 2], resistance: f64) -> Self {
        Self {
            id,
            name,
            nodes,
            resistance: resistance.max(MIN_RESISTANCE),
            voltage: 0.0,
            current: 0.0,
        }
    }

    /// Get the conductance (1/R).
    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }
}

impl Stampable for Resistor {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, _dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[1], self.conductance());
    }

    fn stamp_excitation(&self, _mna: &mut MnaMatrix, _time: f64, _dt: f64) {}
}

impl HistoryUpdatable for Resistor {
    fn update_history(&mut self, mna: &MnaMatrix, _dt: f64) {
        self.voltage = mna.voltage_across(self.nodes[0], self.nodes[1]);
        self.current = self.voltage * self.conductance();
    }
}

/// A capacitor component.
///
/// Replaced for each step by a conductance `k*C/dt` in parallel with a
/// history current source:
///
/// | method      | k   | history injected into n+         |
/// |-------------|-----|----------------------------------|
/// | BE          | 1   | C/dt * v_old                     |
/// | trapezoidal | 2   | 2C/dt * v_old + i_old            |
/// | Gear        | 1.5 | C/dt * (2 v_old - 0.5 v_old_old) |
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub capacitance: f64,
    pub method: IntegrationMethod,
    pub voltage: f64,
    pub current: f64,
    v_old: f64,
    v_old_old: f64,
    i_old: f64,
}

impl Capacitor {
    /// Create a new capacitor charged to `initial_voltage`.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        capacitance: f64,
        initial_voltage: f64,
        method: IntegrationMethod,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            capacitance,
            method,
            voltage: initial_voltage,
            current: 0.0,
            v_old: initial_voltage,
            v_old_old: initial_voltage,
            i_old: 0.0,
        }
    }

    /// Companion conductance for step `dt`.
    pub fn conductance(&self, dt: f64) -> f64 {
        self.method.capacitor_scale() * self.capacitance / dt
    }

    /// Companion history current injected into the positive node.
    pub fn history_current(&self, dt: f64) -> f64 {
        let c_dt = self.capacitance / dt;
        match self.method {
            IntegrationMethod::BackwardEuler => c_dt * self.v_old,
            IntegrationMethod::Trapezoidal => 2.0 * c_dt * self.v_old + self.i_old,
            IntegrationMethod::Gear => c_dt * (2.0 * self.v_old - 0.5 * self.v_old_old),
        }
    }
}

impl Stampable for Capacitor {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[1], self.conductance(dt));
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, _time: f64, dt: f64) {
        mna.stamp_current_source(self.nodes[0], self.nodes[1], -self.history_current(dt));
    }
}

impl HistoryUpdatable for Capacitor {
    fn update_history(&mut self, mna: &MnaMatrix, dt: f64) {
        let v = mna.voltage_across(self.nodes[0], self.nodes[1]);
        let c_dt = self.capacitance / dt;
        self.voltage = v;
        self.current = match self.method {
            IntegrationMethod::BackwardEuler => c_dt * (v - self.v_old),
            IntegrationMethod::Trapezoidal => 2.0 * c_dt * (v - self.v_old) - self.i_old,
            IntegrationMethod::Gear => c_dt * (1.5 * v - 2.0 * self.v_old + 0.5 * self.v_old_old),
        };
    }

    fn commit(&mut self) {
        self.v_old_old = self.v_old;
        self.v_old = self.voltage;
        self.i_old = self.current;
    }
}

/// An inductor component, optionally saturable.
///
/// Stamped in nodal form (no branch unknown): a conductance `k*dt/L` in
/// parallel with a history current source, with `k` = 1, 1/2, 2/3 for
/// backward Euler, trapezoidal and Gear respectively.
#[derive(Debug, Clone)]
pub struct Inductor {
    pub id: ComponentId,
    pub name: String,
    pub nodes: [NodeId; 2],
    pub inductance: f64,
    /// Inductance as a function of |current|
    pub saturation: Option<PiecewiseLinear>,
    pub method: IntegrationMethod,
    pub voltage: f64,
    pub current: f64,
    v_old: f64,
    i_old: f64,
    i_old_old: f64,
}

impl Inductor {
    /// Create a new inductor carrying `initial_current`.
    pub fn new(
        id: ComponentId,
        name: String,
        nodes: [NodeId; 2],
        inductance: f64,
        initial_current: f64,
        method: IntegrationMethod,
    ) -> Self {
        Self {
            id,
            name,
            nodes,
            inductance,
            saturation: None,
            method,
            voltage: 0.0,
            current: initial_current,
            v_old: 0.0,
            i_old: initial_current,
            i_old_old: initial_current,
        }
    }

    /// Make the inductance follow `curve` as a function of |current|.
    pub fn with_saturation(mut self, curve: PiecewiseLinear) -> Self {
        self.inductance = curve.value(self.current.abs());
        self.saturation = Some(curve);
        self
    }

    /// Companion conductance for step `dt`.
    pub fn conductance(&self, dt: f64) -> f64 {
        self.method.inductor_scale() * dt / self.inductance
    }

    /// Companion history current flowing from n+ to n-.
    pub fn history_current(&self, dt: f64) -> f64 {
        match self.method {
            IntegrationMethod::BackwardEuler => self.i_old,
            IntegrationMethod::Trapezoidal => self.i_old + 0.5 * dt / self.inductance * self.v_old,
            IntegrationMethod::Gear => (4.0 / 3.0) * self.i_old - (1.0 / 3.0) * self.i_old_old,
        }
    }
}

impl Stampable for Inductor {
    fn stamp_conductance(&self, mna: &mut MnaMatrix, dt: f64) {
        mna.stamp_conductance(self.nodes[0], self.nodes[1], self.conductance(dt));
    }

    fn stamp_excitation(&self, mna: &mut MnaMatrix, _time: f64, dt: f64) {
        mna.stamp_current_source(self.nodes[0], self.nodes[1], self.history_current(dt));
    }
}

impl HistoryUpdatable for Inductor {
    fn update_history(&mut self, mna: &MnaMatrix, dt: f64) {
        let v = mna.voltage_across(self.nodes[0], self.nodes[1]);
        let mut delta = dt / self.inductance * v;
        if self.method == IntegrationMethod::Trapezoidal {
            delta += dt / self.inductance * self.v_old;
        }
        self.voltage = v;
        self.current = self.method.inductor_current(delta, self.i_old, self.i_old_old);
    }

    fn commit(&mut self) {
        self.i_old_old = self.i_old;
        self.i_old = self.current;
        self.v_old = self.voltage;
    }
}

impl PostProcessable for Inductor {
    fn post_step(&mut self, _dt: f64, ctx: &mut RunContext) {
        let Some(curve) = &self.saturation else {
            return;
        };
        let target = curve.value(self.current.abs());
        if ((target - self.inductance) / self.inductance).abs() > SATURATION_RESTAMP_THRESHOLD {
            log::trace!("{}: inductance {:.3e} -> {:.3e} H", self.name, self.inductance, target);
            self.inductance = target;
            ctx.request_restamp();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_resistor_conductance() {
        let r = Resistor::new(ComponentId(0), "R1".to_string(), [NodeId(1), NodeId(0)], 1000.0);
        assert_relative_eq!(r.conductance(), 0.001);
    }

    #[test]
    fn test_zero_resistance_clamped() {
        let r = Resistor::new(ComponentId(0), "R0".to_string(), [NodeId(1), NodeId(0)], 0.0);
        assert!(r.conductance().is_finite());
    }

    #[test]
    fn test_capacitor_companion_coefficients() {
        let dt = 1e-6;
        let mut c = Capacitor::new(
            ComponentId(0),
            "C1".to_string(),
            [NodeId(1), NodeId(0)],
            1e-6,
            2.0,
            IntegrationMethod::BackwardEuler,
        );
        assert_relative_eq!(c.conductance(dt), 1.0);
        assert_relative_eq!(c.history_current(dt), 2.0);

        c.method = IntegrationMethod::Trapezoidal;
        assert_relative_eq!(c.conductance(dt), 2.0);
        assert_relative_eq!(c.history_current(dt), 4.0);

        c.method = IntegrationMethod::Gear;
        assert_relative_eq!(c.conductance(dt), 1.5);
        assert_relative_eq!(c.history_current(dt), 3.0);
    }

    #[test]
    fn test_capacitor_current_matches_companion() {
        // i = G v - history must hold for the read-back current
        let dt = 1e-5;
        for method in [
            IntegrationMethod::BackwardEuler,
            IntegrationMethod::Trapezoidal,
            IntegrationMethod::Gear,
        ] {
            let mut c = Capacitor::new(
                ComponentId(0),
                "C1".into(),
                [NodeId(1), NodeId(0)],
                4.7e-6,
                1.0,
                method,
            );
            let mut mna = MnaMatrix::new(2, 0);
            mna.x[0] = 1.7;
            c.update_history(&mna, dt);
            let expected = c.conductance(dt) * 1.7 - c.history_current(dt);
            assert_relative_eq!(c.current, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_inductor_current_matches_companion() {
        let dt = 1e-5;
        for method in [
            IntegrationMethod::BackwardEuler,
            IntegrationMethod::Trapezoidal,
            IntegrationMethod::Gear,
        ] {
            let mut l = Inductor::new(
                ComponentId(0),
                "L1".into(),
                [NodeId(1), NodeId(0)],
                1e-3,
                0.5,
                method,
            );
            let mut mna = MnaMatrix::new(2, 0);
            mna.x[0] = 3.0;
            l.update_history(&mna, dt);
            l.commit();
            mna.x[0] = -1.0;
            l.update_history(&mna, dt);
            let expected = l.conductance(dt) * -1.0 + l.history_current(dt);
            assert_relative_eq!(l.current, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_update_history_is_idempotent_until_commit() {
        let dt = 1e-5;
        let mut l = Inductor::new(
            ComponentId(0),
            "L1".into(),
            [NodeId(1), NodeId(0)],
            1e-3,
            0.0,
            IntegrationMethod::BackwardEuler,
        );
        let mut mna = MnaMatrix::new(2, 0);
        mna.x[0] = 1.0;
        l.update_history(&mna, dt);
        l.update_history(&mna, dt);
        assert_relative_eq!(l.current, 0.01);
        l.commit();
        l.update_history(&mna, dt);
        assert_relative_eq!(l.current, 0.02);
    }

    #[test]
    fn test_saturation_requests_restamp() {
        let curve = PiecewiseLinear::new("L1", &[(0.0, 1e-3), (1.0, 1e-3), (2.0, 1e-4)]).unwrap();
        let mut l = Inductor::new(
            ComponentId(0),
            "L1".into(),
            [NodeId(1), NodeId(0)],
            1e-3,
            0.0,
            IntegrationMethod::BackwardEuler,
        )
        .with_saturation(curve);
        let mut ctx = RunContext::new();
        ctx.clear_restamp();

        l.current = 0.5;
        l.post_step(1e-6, &mut ctx);
        assert!(!ctx.needs_restamp());

        l.current = 2.0;
        l.post_step(1e-6, &mut ctx);
        assert!(ctx.needs_restamp());
        assert_relative_eq!(l.inductance, 1e-4);
    }
}
