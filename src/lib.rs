//! # Powersim Core
//!
//! A transient simulator for switched power-electronics circuits.
//!
//! This library provides:
//! - Modified Nodal Analysis (MNA) based circuit simulation
//! - Piecewise-linear switching devices (diodes, thyristors, IGBTs, MOSFETs,
//!   ideal switches) resolved by a bounded fixed-point search per time step
//! - Linear and reactive devices with backward Euler, trapezoidal and Gear
//!   companion models, including coupled inductors and saturable inductors
//! - Controlled sources and a permanent-magnet DC machine
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`circuit`] - Netlist description, topology building and validation
//! - [`components`] - Device models and the device type registry
//! - [`solver`] - MNA assembly, LU solve, switch-state resolution and the
//!   run loop
//!
//! ## Usage
//!
//! ```no_run
//! use powersim_core::circuit::{Netlist, Params};
//! use powersim_core::{NonConvergencePolicy, Simulator, SimulatorConfig};
//!
//! let sine = Params::new().with("amplitude", 10.0).with("frequency", 50.0);
//! let netlist = Netlist::new()
//!     .device("V", "V1", &["in", "0"], sine)
//!     .device("D", "D1", &["in", "out"], Params::new())
//!     .device("R", "R1", &["out", "0"], Params::new().with("r", 100.0));
//!
//! let mut sim = Simulator::from_netlist(&netlist, SimulatorConfig::new().with_dt(10e-6))?;
//! sim.run(2000, NonConvergencePolicy::Abort)?;
//! println!("{:?}", sim.device("D1")?.state);
//! # Ok::<(), powersim_core::PowersimError>(())
//! ```
//!
//! ## Time Stepping
//!
//! For each time step:
//!
//! 1. Assemble the system matrix A (only when a device changed its
//!    conductance) and the source vector z
//! 2. Solve Ax = z for node voltages and branch currents
//! 3. Let every switching device compare the solution with its assumed
//!    state; if any device switches, go back to 1
//! 4. Commit companion history and run post-step updates (machine speed,
//!    di/dt sources, saturation)

pub mod circuit;
pub mod components;
pub mod error;
pub mod solver;

// Re-export main types for convenience
pub use circuit::{Circuit, Netlist};
pub use error::{PowersimError, Result};
pub use solver::{NonConvergencePolicy, Simulator, SimulatorConfig};
