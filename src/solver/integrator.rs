//! Companion-model integration rules.
//!
//! Each reactive element is replaced for one step by a conductance and a
//! history current source. The coefficients here are shared by capacitors,
//! inductors and coupled-inductor groups.

use std::fmt;
use std::str::FromStr;

use crate::error::PowersimError;

/// Integration rule used to discretize reactive elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    /// First-order backward Euler.
    BackwardEuler,
    /// Second-order trapezoidal rule.
    #[default]
    Trapezoidal,
    /// Second-order backward differentiation (Gear).
    Gear,
}

impl IntegrationMethod {
    /// Scale of the capacitor companion conductance relative to `C/dt`.
    pub fn capacitor_scale(self) -> f64 {
        match self {
            IntegrationMethod::BackwardEuler => 1.0,
            IntegrationMethod::Trapezoidal => 2.0,
            IntegrationMethod::Gear => 1.5,
        }
    }

    /// Scale of the inductor companion conductance relative to `dt/L`.
    pub fn inductor_scale(self) -> f64 {
        match self {
            IntegrationMethod::BackwardEuler => 1.0,
            IntegrationMethod::Trapezoidal => 0.5,
            IntegrationMethod::Gear => 2.0 / 3.0,
        }
    }

    /// New inductor current from the step increment `delta`.
    ///
    /// For trapezoidal integration `delta` must already include the previous
    /// step's voltage contribution.
    pub fn inductor_current(self, delta: f64, old: f64, old_old: f64) -> f64 {
        match self {
            IntegrationMethod::BackwardEuler => old + delta,
            IntegrationMethod::Trapezoidal => old + 0.5 * delta,
            IntegrationMethod::Gear => {
                (2.0 / 3.0) * delta + (4.0 / 3.0) * old - (1.0 / 3.0) * old_old
            }
        }
    }
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntegrationMethod::BackwardEuler => "be",
            IntegrationMethod::Trapezoidal => "trz",
            IntegrationMethod::Gear => "gear",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for IntegrationMethod {
    type Err = PowersimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "be" | "euler" | "backward-euler" => Ok(IntegrationMethod::BackwardEuler),
            "trz" | "trap" | "trapezoidal" => Ok(IntegrationMethod::Trapezoidal),
            "gear" | "gs" | "bdf2" => Ok(IntegrationMethod::Gear),
            other => Err(PowersimError::InvalidSimulationParam {
                message: format!("unknown integration method '{}'", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_inductor_update_formulas() {
        let delta = 0.3;
        let old = 1.0;
        let old_old = 0.4;
        assert_relative_eq!(
            IntegrationMethod::BackwardEuler.inductor_current(delta, old, old_old),
            1.3
        );
        assert_relative_eq!(
            IntegrationMethod::Trapezoidal.inductor_current(delta, old, old_old),
            1.15
        );
        assert_relative_eq!(
            IntegrationMethod::Gear.inductor_current(delta, old, old_old),
            0.2 + 4.0 / 3.0 - 0.4 / 3.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_parse_method_names() {
        assert_eq!("TRZ".parse::<IntegrationMethod>().unwrap(), IntegrationMethod::Trapezoidal);
        assert_eq!("be".parse::<IntegrationMethod>().unwrap(), IntegrationMethod::BackwardEuler);
        assert_eq!("gear".parse::<IntegrationMethod>().unwrap(), IntegrationMethod::Gear);
        assert!("rk4".parse::<IntegrationMethod>().is_err());
    }
}
