//! Circuit validation.

use crate::error::{PowersimError, Result};

use super::{Circuit, NodeId};

/// Validate a circuit for simulation.
///
/// Checks:
/// - The circuit has at least one component
/// - At least one device terminal is tied to ground
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if circuit.components.is_empty() {
        return Err(PowersimError::InvalidTopology {
            message: "Circuit has no components".to_string(),
        });
    }

    if circuit.terminal_counts[NodeId::GROUND.0] == 0 {
        return Err(PowersimError::InvalidTopology {
            message: "No device is connected to ground".to_string(),
        });
    }

    // TODO: reject voltage-source loops and current-source cutsets before
    // they surface as SingularMatrix during the first step.

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Netlist, Params};
    use crate::solver::IntegrationMethod;

    #[test]
    fn test_empty_circuit_rejected() {
        let circuit =
            Circuit::from_netlist(&Netlist::new(), IntegrationMethod::Trapezoidal).unwrap();
        assert!(matches!(
            validate_circuit(&circuit),
            Err(PowersimError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_floating_circuit_rejected() {
        let netlist = Netlist::new()
            .device("V", "V1", &["a", "b"], Params::new().with("v", 1.0))
            .device("R", "R1", &["a", "b"], Params::new().with("r", 1.0));
        let circuit = Circuit::from_netlist(&netlist, IntegrationMethod::Trapezoidal).unwrap();
        assert!(validate_circuit(&circuit).is_err());
    }

    #[test]
    fn test_grounded_circuit_accepted() {
        let netlist = Netlist::new()
            .device("V", "V1", &["a", "0"], Params::new().with("v", 1.0))
            .device("R", "R1", &["a", "0"], Params::new().with("r", 1.0));
        let circuit = Circuit::from_netlist(&netlist, IntegrationMethod::Trapezoidal).unwrap();
        assert!(validate_circuit(&circuit).is_ok());
    }
}
