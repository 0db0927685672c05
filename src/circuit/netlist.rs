//! In-memory circuit description handed to the circuit builder.
//!
//! A [`Netlist`] is what an outer configuration or persistence layer
//! produces: devices by registry type id, terminal node names, and named
//! parameters. It carries no indices; those are assigned by
//! [`Circuit::from_netlist`](super::Circuit::from_netlist).

use std::collections::HashMap;

/// Named device parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: HashMap<String, f64>,
    texts: HashMap<String, String>,
    curves: HashMap<String, Vec<(f64, f64)>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar parameter.
    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    /// Add a text parameter (references to other devices, option names).
    pub fn with_str(mut self, key: &str, value: &str) -> Self {
        self.texts.insert(key.to_string(), value.to_string());
        self
    }

    /// Add a sampled curve.
    pub fn with_curve(mut self, key: &str, samples: &[(f64, f64)]) -> Self {
        self.curves.insert(key.to_string(), samples.to_vec());
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.texts.get(key).map(String::as_str)
    }

    pub fn curve(&self, key: &str) -> Option<&[(f64, f64)]> {
        self.curves.get(key).map(Vec::as_slice)
    }
}

/// One device entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDef {
    /// Registry type identifier
    pub type_id: String,
    pub name: String,
    /// Terminal node names; "0" and "GND" are ground
    pub nodes: Vec<String>,
    pub params: Params,
}

/// Magnetic coupling between two inductors.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingDef {
    pub name: String,
    pub first: String,
    pub second: String,
    pub k: f64,
}

/// A complete circuit description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Netlist {
    pub devices: Vec<DeviceDef>,
    pub couplings: Vec<CouplingDef>,
}

impl Netlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device.
    pub fn device(mut self, type_id: &str, name: &str, nodes: &[&str], params: Params) -> Self {
        self.devices.push(DeviceDef {
            type_id: type_id.to_string(),
            name: name.to_string(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            params,
        });
        self
    }

    /// Couple two inductors with factor `k`.
    pub fn couple(mut self, name: &str, first: &str, second: &str, k: f64) -> Self {
        self.couplings.push(CouplingDef {
            name: name.to_string(),
            first: first.to_string(),
            second: second.to_string(),
            k,
        });
        self
    }
}
