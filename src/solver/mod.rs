//! MNA (Modified Nodal Analysis) solver.
//!
//! This module provides the numerical engine for circuit simulation.
//!
//! ## Modified Nodal Analysis
//!
//! MNA assembles a system of equations Ax = z where:
//! - x contains node voltages and branch currents
//! - A is the conductance/coefficient matrix
//! - z is the source vector
//!
//! The matrix structure is:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! where:
//! - G is the conductance matrix (node equations)
//! - B, C connect voltage sources to nodes
//! - D holds current-controlled source gains (usually 0)
//! - v is the vector of node voltages
//! - j is the vector of branch currents
//! - i is the sum of current sources into each node
//! - e is the vector of source voltages
//!
//! ## Switch resolution
//!
//! Switching devices are piecewise-linear: each state is a resistance plus
//! an optional forward drop. A time step is solved repeatedly until no
//! device changes state (see [`resolver`]), then committed.

mod context;
mod integrator;
mod mna;
pub mod resolver;
mod simulator;

pub use context::{AcceptanceStep, RunContext, SwitchEvent};
pub use integrator::IntegrationMethod;
pub use mna::MnaMatrix;
pub use resolver::{ResolverState, StepOutcome};
pub use simulator::{NonConvergencePolicy, RunSummary, Simulator, SimulatorConfig, StepReport};

/// Smallest resistance any device presents to the matrix.
pub const MIN_RESISTANCE: f64 = 1e-12;

/// Largest off-state resistance.
pub const MAX_RESISTANCE: f64 = 1e15;

/// Default time step (seconds).
pub const DEFAULT_TIME_STEP: f64 = 1e-6;

/// Resolver iterations per step before the step is declared non-convergent.
pub const DEFAULT_MAX_SWITCH_ITERATIONS: usize = 1000;

/// Factor applied to the disturbance on each inconsistent iteration.
pub const DISTURBANCE_DECAY: f64 = 0.99;

/// Inconsistent iterations tolerated before the disturbance starts decaying.
pub const DISTURBANCE_DECAY_AFTER: usize = 2;
