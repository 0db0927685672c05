//! Main simulator interface.

use crate::circuit::{validate_circuit, Circuit, Netlist};
use crate::components::DeviceReport;
use crate::error::{PowersimError, Result};

use super::context::{AcceptanceStep, RunContext, SwitchEvent};
use super::integrator::IntegrationMethod;
use super::mna::MnaMatrix;
use super::resolver::{self, StepOutcome};
use super::{
    DEFAULT_MAX_SWITCH_ITERATIONS, DEFAULT_TIME_STEP, DISTURBANCE_DECAY, DISTURBANCE_DECAY_AFTER,
};

/// Configuration for the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Time step (seconds).
    pub dt: f64,
    /// Integration rule for reactive devices built from a netlist.
    pub integrator: IntegrationMethod,
    /// Resolver iterations per step before giving up.
    pub max_switch_iterations: usize,
    /// Rebuild the conductance matrix on every resolver iteration.
    pub full_restamp_every_iteration: bool,
    /// Disturbance factor applied per inconsistent iteration.
    pub disturbance_decay: f64,
    /// Inconsistent iterations before the disturbance starts decaying.
    pub decay_after: usize,
    /// Acceptance tolerances, ordered by iteration count.
    pub acceptance_schedule: Vec<AcceptanceStep>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            dt: DEFAULT_TIME_STEP,
            integrator: IntegrationMethod::default(),
            max_switch_iterations: DEFAULT_MAX_SWITCH_ITERATIONS,
            full_restamp_every_iteration: false,
            disturbance_decay: DISTURBANCE_DECAY,
            decay_after: DISTURBANCE_DECAY_AFTER,
            acceptance_schedule: vec![
                AcceptanceStep {
                    after_iterations: 300,
                    tolerance: 0.1,
                },
                AcceptanceStep {
                    after_iterations: 600,
                    tolerance: 0.2,
                },
            ],
        }
    }
}

impl SimulatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time step.
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Set the integration rule used when building from a netlist.
    pub fn with_integrator(mut self, integrator: IntegrationMethod) -> Self {
        self.integrator = integrator;
        self
    }

    /// Set the resolver iteration cap.
    ///
    /// Reaching the cap makes the step non-convergent. Note the acceptance
    /// schedule only comes into play for caps above 300.
    pub fn with_max_switch_iterations(mut self, max_switch_iterations: usize) -> Self {
        self.max_switch_iterations = max_switch_iterations;
        self
    }

    /// Force a full conductance re-stamp on every resolver iteration.
    pub fn with_full_restamp(mut self, full: bool) -> Self {
        self.full_restamp_every_iteration = full;
        self
    }

    /// Set the disturbance decay factor and the number of inconsistent
    /// iterations before it applies.
    pub fn with_disturbance_decay(mut self, decay: f64, after: usize) -> Self {
        self.disturbance_decay = decay;
        self.decay_after = after;
        self
    }

    pub fn with_acceptance_schedule(mut self, schedule: Vec<AcceptanceStep>) -> Self {
        self.acceptance_schedule = schedule;
        self
    }

    /// Acceptance tolerance in effect for resolver iteration `iteration`.
    pub fn acceptance_for(&self, iteration: usize) -> f64 {
        self.acceptance_schedule
            .iter()
            .filter(|step| iteration > step.after_iterations)
            .map(|step| step.tolerance)
            .fold(0.0, f64::max)
    }

    fn validate(&self) -> Result<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(PowersimError::InvalidSimulationParam {
                message: format!("time step must be positive, got {}", self.dt),
            });
        }
        if self.max_switch_iterations == 0 {
            return Err(PowersimError::InvalidSimulationParam {
                message: "max_switch_iterations must be at least 1".to_string(),
            });
        }
        if !(self.disturbance_decay > 0.0 && self.disturbance_decay <= 1.0) {
            return Err(PowersimError::InvalidSimulationParam {
                message: format!(
                    "disturbance decay must be in (0, 1], got {}",
                    self.disturbance_decay
                ),
            });
        }
        Ok(())
    }
}

/// What to do when a step does not converge during [`Simulator::run`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NonConvergencePolicy {
    /// Stop the run with [`PowersimError::SwitchNonConvergence`].
    #[default]
    Abort,
    /// Halve the time step and retry, failing once it would drop below `min_dt`.
    HalveStep { min_dt: f64 },
    /// Skip the step: time advances, device states stay at the last stable step.
    KeepLastStable,
}

/// Result of one call to [`Simulator::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub outcome: StepOutcome,
    pub iterations: usize,
    /// Simulation time after the step (unchanged if it did not converge)
    pub time: f64,
    /// Switch transitions committed by this step
    pub events: Vec<SwitchEvent>,
    /// Some self-commutated device disagreed with a solve during the step
    pub switch_inconsistency: bool,
}

/// Totals over a call to [`Simulator::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub steps_committed: usize,
    pub non_convergent_steps: usize,
    pub total_iterations: usize,
    pub max_iterations: usize,
    pub events: usize,
    pub final_time: f64,
    pub final_dt: f64,
}

/// The main circuit simulator.
pub struct Simulator {
    /// The circuit being simulated
    circuit: Circuit,
    /// MNA matrix system
    matrix: MnaMatrix,
    /// Per-run flags and tolerances
    ctx: RunContext,
    config: SimulatorConfig,
    dt: f64,
    time: f64,
    /// Committed switch transitions, in order
    events: Vec<SwitchEvent>,
}

impl Simulator {
    /// Build and validate a circuit from a netlist, then create a simulator.
    pub fn from_netlist(netlist: &Netlist, config: SimulatorConfig) -> Result<Self> {
        let circuit = Circuit::from_netlist(netlist, config.integrator)?;
        Self::with_config(circuit, config)
    }

    /// Create a new simulator for the given circuit with default configuration.
    pub fn new(circuit: Circuit) -> Result<Self> {
        Self::with_config(circuit, SimulatorConfig::default())
    }

    /// Create a new simulator for the given circuit with custom configuration.
    ///
    /// The circuit keeps the integration rules it was built with.
    pub fn with_config(circuit: Circuit, config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        validate_circuit(&circuit)?;
        let matrix = MnaMatrix::new(circuit.num_nodes, circuit.num_branches);
        log::debug!(
            "simulator: {} unknowns, {} switching devices, dt={:.3e} s",
            matrix.size,
            circuit.components.iter().filter(|c| c.is_switching()).count(),
            config.dt
        );

        Ok(Self {
            circuit,
            matrix,
            ctx: RunContext::new(),
            dt: config.dt,
            config,
            time: 0.0,
            events: Vec::new(),
        })
    }

    /// Resolve and, if stable, commit one time step.
    ///
    /// A non-convergent step is reported in the outcome; the simulator is
    /// left exactly as it was before the call.
    pub fn step(&mut self) -> Result<StepReport> {
        let time = self.time + self.dt;
        let outcome = resolver::resolve_step(
            &mut self.circuit.components,
            &mut self.matrix,
            &mut self.ctx,
            &self.config,
            time,
            self.dt,
        )?;

        let switch_inconsistency = self.ctx.switch_inconsistency();
        let events = match outcome {
            StepOutcome::Stable { .. } => {
                resolver::commit_step(&mut self.circuit.components, &mut self.ctx, self.dt);
                self.time = time;
                let events = self.ctx.take_pending();
                for event in &events {
                    log::debug!(
                        "{} switched {} at t={:.6e}",
                        self.circuit.component(event.component).name(),
                        event.state,
                        event.time
                    );
                }
                self.events.extend_from_slice(&events);
                events
            }
            StepOutcome::NonConvergent { .. } => Vec::new(),
        };

        Ok(StepReport {
            outcome,
            iterations: outcome.iterations(),
            time: self.time,
            events,
            switch_inconsistency,
        })
    }

    /// Run `steps` steps, handling non-convergent steps according to `policy`.
    pub fn run(&mut self, steps: usize, policy: NonConvergencePolicy) -> Result<RunSummary> {
        log::debug!(
            "run: {} steps of {:.3e} s from t={:.6e} ({} components)",
            steps,
            self.dt,
            self.time,
            self.circuit.components.len()
        );

        let mut summary = RunSummary::default();
        let mut remaining = steps;
        while remaining > 0 {
            let report = self.step()?;
            summary.total_iterations += report.iterations;
            summary.max_iterations = summary.max_iterations.max(report.iterations);

            match report.outcome {
                StepOutcome::Stable { .. } => {
                    summary.steps_committed += 1;
                    summary.events += report.events.len();
                    remaining -= 1;
                }
                StepOutcome::NonConvergent { iterations } => {
                    summary.non_convergent_steps += 1;
                    let failure = PowersimError::SwitchNonConvergence {
                        time: self.time + self.dt,
                        iterations,
                    };
                    match policy {
                        NonConvergencePolicy::Abort => return Err(failure),
                        NonConvergencePolicy::HalveStep { min_dt } => {
                            let next = self.dt / 2.0;
                            if next < min_dt {
                                return Err(failure);
                            }
                            log::warn!(
                                "halving time step to {:.3e} s at t={:.6e}",
                                next,
                                self.time
                            );
                            self.set_dt(next)?;
                        }
                        NonConvergencePolicy::KeepLastStable => {
                            log::warn!(
                                "keeping last stable state at t={:.6e}",
                                self.time + self.dt
                            );
                            self.time += self.dt;
                            remaining -= 1;
                        }
                    }
                }
            }
        }

        summary.final_time = self.time;
        summary.final_dt = self.dt;
        log::debug!(
            "run finished at t={:.6e}: {} committed, {} non-convergent, {} switch events",
            self.time,
            summary.steps_committed,
            summary.non_convergent_steps,
            summary.events
        );
        Ok(summary)
    }

    /// Apply a gate level to a switch, thyristor, IGBT or MOSFET.
    pub fn set_gate(&mut self, name: &str, on: bool) -> Result<()> {
        let id = self.lookup(name)?;
        if let Some(state) = self.circuit.component_mut(id).set_gate(on)? {
            self.ctx.request_restamp();
            log::debug!("{} gated {} at t={:.6e}", name, state, self.time);
            self.events.push(SwitchEvent {
                component: id,
                state,
                time: self.time,
            });
        }
        Ok(())
    }

    /// Override an independent source with a constant value.
    pub fn set_source_value(&mut self, name: &str, value: f64) -> Result<()> {
        let id = self.lookup(name)?;
        self.circuit.component_mut(id).set_source_value(value)
    }

    /// Set the load torque of a machine.
    pub fn set_load_torque(&mut self, name: &str, torque: f64) -> Result<()> {
        let id = self.lookup(name)?;
        self.circuit.component_mut(id).set_load_torque(torque)
    }

    /// Change the time step for subsequent steps.
    pub fn set_dt(&mut self, dt: f64) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PowersimError::InvalidSimulationParam {
                message: format!("time step must be positive, got {}", dt),
            });
        }
        if dt != self.dt {
            self.dt = dt;
            self.ctx.request_restamp();
        }
        Ok(())
    }

    /// Get the voltage at a node by name.
    pub fn node_voltage(&self, name: &str) -> Option<f64> {
        self.circuit.find_node(name).map(|node| self.matrix.voltage(node))
    }

    /// Read-only report for a device. Coupled inductors are reported by
    /// member name.
    pub fn device(&self, name: &str) -> Result<DeviceReport> {
        let id = self.lookup(name)?;
        self.circuit
            .component(id)
            .reports(self.time)
            .into_iter()
            .find(|report| report.name == name)
            .ok_or_else(|| PowersimError::ComponentNotFound { name: name.to_string() })
    }

    /// Reports for every device.
    pub fn devices(&self) -> Vec<DeviceReport> {
        self.circuit
            .components
            .iter()
            .flat_map(|component| component.reports(self.time))
            .collect()
    }

    /// Committed switch transitions, in order.
    pub fn events(&self) -> &[SwitchEvent] {
        &self.events
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Current time step.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Per-run solver state.
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Get a reference to the circuit.
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    fn lookup(&self, name: &str) -> Result<crate::circuit::ComponentId> {
        self.circuit
            .find_component(name)
            .ok_or_else(|| PowersimError::ComponentNotFound { name: name.to_string() })
    }
}
