//! Circuit description, graph representation and validation.
//!
//! A [`Netlist`] names devices and nodes; [`Circuit::from_netlist`] turns it
//! into constructed devices with every node, branch and control reference
//! resolved to matrix indices.

mod graph;
mod netlist;
mod types;
mod validate;

pub use graph::Circuit;
pub use netlist::{CouplingDef, DeviceDef, Netlist, Params};
pub use types::*;
pub use validate::validate_circuit;
