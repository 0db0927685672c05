//! Error types for the powersim solver.
//!
//! This module provides a unified error type [`PowersimError`] that covers
//! all error conditions that can occur during device construction, topology
//! building, and transient simulation.

use thiserror::Error;

/// Result type alias using [`PowersimError`].
pub type Result<T> = std::result::Result<T, PowersimError>;

/// Unified error type for all powersim operations.
#[derive(Error, Debug)]
pub enum PowersimError {
    // ============ Device Construction Errors ============
    /// Unknown device type identifier
    #[error("Unknown device type '{type_id}' for component '{name}'")]
    UnknownDeviceType { type_id: String, name: String },

    /// Invalid component definition
    #[error("Invalid component '{name}': {message}")]
    InvalidComponent { name: String, message: String },

    /// Invalid parameter value
    #[error("Invalid parameter '{param}' for component '{component}': {message}")]
    InvalidParameter {
        component: String,
        param: String,
        message: String,
    },

    /// Reference to another component that does not exist or has no branch unknown
    #[error("Component '{component}' references '{reference}': {message}")]
    UnresolvedReference {
        component: String,
        reference: String,
        message: String,
    },

    /// Characteristic curve samples are not usable
    #[error("Malformed characteristic for '{component}': {message}")]
    MalformedCharacteristic { component: String, message: String },

    /// Coupling matrix of an inductor group is not positive definite
    #[error("Coupled inductor group '{group}' is not positive definite (check coupling factors)")]
    NotPositiveDefinite { group: String },

    // ============ Circuit Topology Errors ============
    /// Node not found in circuit
    #[error("Node '{node}' not found in circuit")]
    NodeNotFound { node: String },

    /// Component not found in circuit
    #[error("Component '{name}' not found in circuit")]
    ComponentNotFound { name: String },

    /// Duplicate component name
    #[error("Duplicate component name '{name}'")]
    DuplicateComponent { name: String },

    /// Invalid circuit topology
    #[error("Invalid circuit topology: {message}")]
    InvalidTopology { message: String },

    /// Operation not supported by the addressed component
    #[error("Component '{name}' does not support {operation}")]
    UnsupportedOperation { name: String, operation: String },

    // ============ Simulation Errors ============
    /// Matrix is singular and cannot be solved
    #[error("Singular matrix - circuit may have a short circuit or floating node")]
    SingularMatrix,

    /// Switch states did not settle within the iteration cap
    #[error("Switch states did not settle at t = {time:.6e} s after {iterations} iterations")]
    SwitchNonConvergence { time: f64, iterations: usize },

    /// Invalid simulation parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },
}

impl PowersimError {
    /// Create an invalid component error
    pub fn invalid_component(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidComponent {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        component: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            component: component.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create a malformed characteristic error
    pub fn malformed_characteristic(
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedCharacteristic {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            name: name.into(),
            operation: operation.into(),
        }
    }
}
