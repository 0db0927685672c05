//! Device models for circuit simulation.
//!
//! This module provides models for all supported devices:
//! - Linear: Resistor, Capacitor, Inductor (optionally saturable)
//! - Magnetic: Coupled inductor groups
//! - Sources: Voltage Source, Current Source, current- and di/dt-controlled sources
//! - Switching: Ideal switch, Diode, Thyristor, IGBT, MOSFET
//! - Machines: permanent-magnet DC machine
//!
//! Every device takes part in the solve through small capability traits:
//! [`Stampable`] and [`HistoryUpdatable`] for all of them, [`SelfCommutating`]
//! for devices whose state follows the solution, and [`PostProcessable`] for
//! devices that update a scalar state once per accepted step. [`Component`]
//! is the closed set of device kinds and dispatches to these traits.

mod characteristic;
mod controlled;
mod coupled;
mod linear;
mod machine;
pub mod registry;
mod semiconductor;
mod sources;
mod switch;

pub use characteristic::{Characteristic, PiecewiseLinear, Segment, SegmentMove};
pub use controlled::{CurrentControlledSource, DiDtControlledSource};
pub use coupled::{CoupledInductorGroup, CoupledMember};
pub use linear::{Capacitor, Inductor, Resistor};
pub use machine::{DcMachine, MachineParams};
pub use semiconductor::{Diode, DiodeModel, Igbt, Mosfet, Thyristor};
pub use sources::{CurrentSource, VoltageSource, Waveform};
pub use switch::{clamp_resistance, IdealSwitch, SwitchResistance, SwitchState};

use crate::circuit::ComponentId;
use crate::error::{PowersimError, Result};
use crate::solver::{MnaMatrix, RunContext};

/// Analog gate level above which a gate counts as ON.
pub const GATE_THRESHOLD: f64 = 0.5;

/// Contributes conductance and excitation terms to the shared system.
///
/// Both operations are additive.
pub trait Stampable {
    /// Add conductance-matrix terms for a step of length `dt`.
    fn stamp_conductance(&self, mna: &mut MnaMatrix, dt: f64);

    /// Add excitation-vector terms for the step ending at `time`.
    fn stamp_excitation(&self, mna: &mut MnaMatrix, time: f64, dt: f64);
}

/// Reads back solved values and advances companion history.
pub trait HistoryUpdatable {
    /// Recompute voltage/current from the solution. Called after every
    /// resolver iteration; must not shift history.
    fn update_history(&mut self, mna: &MnaMatrix, dt: f64);

    /// Shift the history once the step is accepted.
    fn commit(&mut self) {}
}

/// A device whose conduction state follows the solved operating point.
pub trait SelfCommutating {
    /// Compare the solution with the assumed state, switching if inconsistent.
    /// Returns whether anything changed.
    fn check_switch_state(&mut self, ctx: &mut RunContext) -> bool;

    /// Remember the state at the start of a step.
    fn begin_step(&mut self);

    /// Return to the state remembered by [`Self::begin_step`].
    fn rollback(&mut self);
}

/// A device that updates internal state once per accepted step.
pub trait PostProcessable {
    fn post_step(&mut self, dt: f64, ctx: &mut RunContext);
}

/// Read-only snapshot of a device for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub id: ComponentId,
    pub name: String,
    /// Registry type identifier
    pub type_id: &'static str,
    pub voltage: f64,
    pub current: f64,
    pub state: Option<SwitchState>,
    /// Mechanical speed in rad/s for machines
    pub speed: Option<f64>,
}

/// A circuit device.
#[derive(Debug, Clone)]
pub enum Component {
    Resistor(Resistor),
    Capacitor(Capacitor),
    Inductor(Inductor),
    CoupledInductors(CoupledInductorGroup),
    VoltageSource(VoltageSource),
    CurrentSource(CurrentSource),
    CurrentControlled(CurrentControlledSource),
    DiDtControlled(DiDtControlledSource),
    Switch(IdealSwitch),
    Diode(Diode),
    Thyristor(Thyristor),
    Igbt(Igbt),
    Mosfet(Mosfet),
    DcMachine(DcMachine),
}

impl Component {
    /// Get the component ID.
    pub fn id(&self) -> ComponentId {
        match self {
            Component::Resistor(d) => d.id,
            Component::Capacitor(d) => d.id,
            Component::Inductor(d) => d.id,
            Component::CoupledInductors(d) => d.id,
            Component::VoltageSource(d) => d.id,
            Component::CurrentSource(d) => d.id,
            Component::CurrentControlled(d) => d.id,
            Component::DiDtControlled(d) => d.id,
            Component::Switch(d) => d.id,
            Component::Diode(d) => d.id,
            Component::Thyristor(d) => d.id,
            Component::Igbt(d) => d.id,
            Component::Mosfet(d) => d.id,
            Component::DcMachine(d) => d.id,
        }
    }

    /// Get the component name.
    pub fn name(&self) -> &str {
        match self {
            Component::Resistor(d) => &d.name,
            Component::Capacitor(d) => &d.name,
            Component::Inductor(d) => &d.name,
            Component::CoupledInductors(d) => &d.name,
            Component::VoltageSource(d) => &d.name,
            Component::CurrentSource(d) => &d.name,
            Component::CurrentControlled(d) => &d.name,
            Component::DiDtControlled(d) => &d.name,
            Component::Switch(d) => &d.name,
            Component::Diode(d) => &d.name,
            Component::Thyristor(d) => &d.name,
            Component::Igbt(d) => &d.name,
            Component::Mosfet(d) => &d.name,
            Component::DcMachine(d) => &d.name,
        }
    }

    /// Registry type identifier of this device.
    pub fn type_id(&self) -> &'static str {
        match self {
            Component::Resistor(_) => "R",
            Component::Capacitor(_) => "C",
            Component::Inductor(_) => "L",
            Component::CoupledInductors(_) => "K",
            Component::VoltageSource(_) => "V",
            Component::CurrentSource(_) => "I",
            Component::CurrentControlled(_) => "H",
            Component::DiDtControlled(_) => "DIDT",
            Component::Switch(_) => "S",
            Component::Diode(_) => "D",
            Component::Thyristor(_) => "THY",
            Component::Igbt(_) => "IGBT",
            Component::Mosfet(_) => "MOSFET",
            Component::DcMachine(_) => "DCM",
        }
    }

    /// Stamp contract of this device.
    pub fn stampable(&self) -> &dyn Stampable {
        match self {
            Component::Resistor(d) => d,
            Component::Capacitor(d) => d,
            Component::Inductor(d) => d,
            Component::CoupledInductors(d) => d,
            Component::VoltageSource(d) => d,
            Component::CurrentSource(d) => d,
            Component::CurrentControlled(d) => d,
            Component::DiDtControlled(d) => d,
            Component::Switch(d) => d,
            Component::Diode(d) => d,
            Component::Thyristor(d) => d,
            Component::Igbt(d) => d,
            Component::Mosfet(d) => d,
            Component::DcMachine(d) => d,
        }
    }

    /// Read-back contract of this device.
    pub fn history_mut(&mut self) -> &mut dyn HistoryUpdatable {
        match self {
            Component::Resistor(d) => d,
            Component::Capacitor(d) => d,
            Component::Inductor(d) => d,
            Component::CoupledInductors(d) => d,
            Component::VoltageSource(d) => d,
            Component::CurrentSource(d) => d,
            Component::CurrentControlled(d) => d,
            Component::DiDtControlled(d) => d,
            Component::Switch(d) => d,
            Component::Diode(d) => d,
            Component::Thyristor(d) => d,
            Component::Igbt(d) => d,
            Component::Mosfet(d) => d,
            Component::DcMachine(d) => d,
        }
    }

    /// Self-commutation contract, if the device has one.
    pub fn self_commutating_mut(&mut self) -> Option<&mut dyn SelfCommutating> {
        match self {
            Component::Diode(d) => Some(d as &mut dyn SelfCommutating),
            Component::Thyristor(d) => Some(d as &mut dyn SelfCommutating),
            Component::Igbt(d) => Some(d as &mut dyn SelfCommutating),
            Component::Mosfet(d) => Some(d as &mut dyn SelfCommutating),
            _ => None,
        }
    }

    /// Post-step contract, if the device has one.
    pub fn post_processable_mut(&mut self) -> Option<&mut dyn PostProcessable> {
        match self {
            Component::Inductor(d) if d.saturation.is_some() => Some(d as &mut dyn PostProcessable),
            Component::DiDtControlled(d) => Some(d as &mut dyn PostProcessable),
            Component::DcMachine(d) => Some(d as &mut dyn PostProcessable),
            _ => None,
        }
    }

    /// Check if this device can change its conduction state.
    pub fn is_switching(&self) -> bool {
        matches!(
            self,
            Component::Switch(_)
                | Component::Diode(_)
                | Component::Thyristor(_)
                | Component::Igbt(_)
                | Component::Mosfet(_)
        )
    }

    /// Apply a gate level. Returns the new state if the device switched
    /// immediately; thyristors only store the level and fire during the next
    /// switch check.
    pub fn set_gate(&mut self, on: bool) -> Result<Option<SwitchState>> {
        match self {
            Component::Switch(d) => Ok(d.set_gate_signal(on)),
            Component::Igbt(d) => Ok(d.set_gate_signal(on)),
            Component::Mosfet(d) => Ok(d.set_gate_signal(on)),
            Component::Thyristor(d) => {
                d.set_gate_signal(on);
                Ok(None)
            }
            other => Err(PowersimError::unsupported(other.name(), "gate signals")),
        }
    }

    /// Override an independent source with a constant value.
    pub fn set_source_value(&mut self, value: f64) -> Result<()> {
        match self {
            Component::VoltageSource(d) => d.set_value(value),
            Component::CurrentSource(d) => d.set_value(value),
            other => return Err(PowersimError::unsupported(other.name(), "source values")),
        }
        Ok(())
    }

    /// Set the mechanical load of a machine.
    pub fn set_load_torque(&mut self, torque: f64) -> Result<()> {
        match self {
            Component::DcMachine(d) => {
                d.set_load_torque(torque);
                Ok(())
            }
            other => Err(PowersimError::unsupported(other.name(), "load torque")),
        }
    }

    /// Reports for this device; coupled groups report each member.
    pub fn reports(&self, time: f64) -> Vec<DeviceReport> {
        let report = |name: &str, voltage: f64, current: f64, state: Option<SwitchState>| {
            DeviceReport {
                id: self.id(),
                name: name.to_string(),
                type_id: self.type_id(),
                voltage,
                current,
                state,
                speed: None,
            }
        };
        match self {
            Component::Resistor(d) => vec![report(&d.name, d.voltage, d.current, None)],
            Component::Capacitor(d) => vec![report(&d.name, d.voltage, d.current, None)],
            Component::Inductor(d) => vec![report(&d.name, d.voltage, d.current, None)],
            Component::CoupledInductors(g) => g
                .members
                .iter()
                .map(|m| DeviceReport {
                    type_id: "L",
                    ..report(&m.name, m.voltage, m.current, None)
                })
                .collect(),
            Component::VoltageSource(d) => vec![report(&d.name, d.voltage(time), d.current, None)],
            Component::CurrentSource(d) => {
                vec![report(&d.name, d.voltage, d.waveform.value(time), None)]
            }
            Component::CurrentControlled(d) => vec![report(&d.name, d.voltage, d.current, None)],
            Component::DiDtControlled(d) => vec![report(&d.name, d.output, d.current, None)],
            Component::Switch(d) => {
                vec![report(&d.name, d.voltage, d.current, Some(d.switch.state()))]
            }
            Component::Diode(d) => vec![report(&d.name, d.voltage, d.current, Some(d.state()))],
            Component::Thyristor(d) => {
                vec![report(&d.name, d.voltage, d.current, Some(d.switch.state()))]
            }
            Component::Igbt(d) => {
                vec![report(&d.name, d.voltage, d.terminal_current(), Some(d.switch.state()))]
            }
            Component::Mosfet(d) => {
                vec![report(&d.name, d.voltage, d.terminal_current(), Some(d.switch.state()))]
            }
            Component::DcMachine(d) => vec![DeviceReport {
                speed: Some(d.omega),
                ..report(&d.name, d.voltage, d.current(), None)
            }],
        }
    }
}
