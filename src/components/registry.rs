//! Device type registry.
//!
//! Maps the type identifier used in a [`Netlist`](crate::circuit::Netlist)
//! to a constructor. The table is static; construction failures are
//! returned as errors naming the device and parameter.

use crate::circuit::{BranchId, ComponentId, NodeId, Params};
use crate::error::{PowersimError, Result};
use crate::solver::IntegrationMethod;

use super::semiconductor::{
    DIODE_FORWARD_VOLTAGE, DIODE_R_OFF, DIODE_R_ON, SWITCH_FORWARD_VOLTAGE, SWITCH_R_OFF,
    SWITCH_R_ON,
    THYRISTOR_RECOVERY_TIME,
};
use super::*;

/// Everything a constructor needs, resolved by the circuit builder.
#[derive(Debug, Clone, Copy)]
pub struct DeviceSpec<'a> {
    pub id: ComponentId,
    pub name: &'a str,
    /// Terminal nodes followed by internal nodes
    pub nodes: &'a [NodeId],
    /// Own branch unknown, for types that declare one
    pub branch: Option<BranchId>,
    /// Branch unknown of the device named by the `control` parameter
    pub control: Option<BranchId>,
    pub params: &'a Params,
    /// Run-wide integration method; a `method` text parameter overrides it
    pub method: IntegrationMethod,
}

/// Device constructor.
pub type Factory = fn(&DeviceSpec<'_>) -> Result<Component>;

/// Static description of a device type.
#[derive(Debug, Clone, Copy)]
pub struct DeviceType {
    pub type_id: &'static str,
    /// Number of external terminals
    pub terminals: usize,
    /// Number of internal nodes the builder must allocate
    pub internal_nodes: usize,
    /// Whether the device owns a branch unknown
    pub has_branch: bool,
    /// Whether the device reads another device's branch unknown
    pub needs_control: bool,
    pub factory: Factory,
}

const fn two_terminal(
    type_id: &'static str,
    has_branch: bool,
    needs_control: bool,
    factory: Factory,
) -> DeviceType {
    DeviceType {
        type_id,
        terminals: 2,
        internal_nodes: 0,
        has_branch,
        needs_control,
        factory,
    }
}

static REGISTRY: &[DeviceType] = &[
    two_terminal("R", false, false, build_resistor),
    two_terminal("C", false, false, build_capacitor),
    two_terminal("L", false, false, build_inductor),
    two_terminal("V", true, false, build_voltage_source),
    two_terminal("I", false, false, build_current_source),
    two_terminal("H", true, true, build_ccvs),
    two_terminal("DIDT", true, true, build_didt_source),
    two_terminal("S", false, false, build_switch),
    two_terminal("D", false, false, build_diode),
    two_terminal("THY", false, false, build_thyristor),
    two_terminal("IGBT", false, false, build_igbt),
    two_terminal("MOSFET", false, false, build_mosfet),
    DeviceType {
        type_id: "DCM",
        terminals: 2,
        internal_nodes: 2,
        has_branch: true,
        needs_control: false,
        factory: build_dc_machine,
    },
];

/// Look up a device type by identifier (case-insensitive).
pub fn lookup(type_id: &str) -> Option<&'static DeviceType> {
    REGISTRY.iter().find(|t| t.type_id.eq_ignore_ascii_case(type_id))
}

/// All registered type identifiers.
pub fn type_ids() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|t| t.type_id)
}

// ============ Parameter helpers ============

fn positive(spec: &DeviceSpec<'_>, key: &str) -> Result<f64> {
    let value = spec
        .params
        .get(key)
        .ok_or_else(|| {
            PowersimError::invalid_parameter(spec.name, key, "required parameter is missing")
        })?;
    check_positive(spec, key, value)
}

fn positive_or(spec: &DeviceSpec<'_>, key: &str, default: f64) -> Result<f64> {
    check_positive(spec, key, spec.params.get(key).unwrap_or(default))
}

fn check_positive(spec: &DeviceSpec<'_>, key: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(PowersimError::invalid_parameter(
            spec.name,
            key,
            format!("must be positive, got {}", value),
        ))
    }
}

fn value_or(spec: &DeviceSpec<'_>, key: &str, default: f64) -> f64 {
    spec.params.get(key).unwrap_or(default)
}

fn flag(spec: &DeviceSpec<'_>, key: &str) -> bool {
    spec.params.get(key).map(|v| v > GATE_THRESHOLD).unwrap_or(false)
}

fn method(spec: &DeviceSpec<'_>) -> Result<IntegrationMethod> {
    match spec.params.text("method") {
        Some(name) => name.parse(),
        None => Ok(spec.method),
    }
}

fn terminals(spec: &DeviceSpec<'_>) -> [NodeId; 2] {
    [spec.nodes[0], spec.nodes[1]]
}

fn own_branch(spec: &DeviceSpec<'_>) -> Result<BranchId> {
    spec.branch
        .ok_or_else(|| PowersimError::invalid_component(spec.name, "no branch unknown assigned"))
}

fn control_branch(spec: &DeviceSpec<'_>) -> Result<BranchId> {
    spec.control.ok_or_else(|| PowersimError::UnresolvedReference {
        component: spec.name.to_string(),
        reference: spec.params.text("control").unwrap_or_default().to_string(),
        message: "control branch not resolved".to_string(),
    })
}

fn waveform(spec: &DeviceSpec<'_>, dc_key: &str) -> Result<Waveform> {
    match spec.params.get("amplitude") {
        Some(amplitude) => Ok(Waveform::Sine {
            amplitude,
            frequency: positive(spec, "frequency")?,
            phase: value_or(spec, "phase", 0.0),
            offset: value_or(spec, "offset", 0.0),
        }),
        None => Ok(Waveform::Dc(value_or(spec, dc_key, 0.0))),
    }
}

fn parallel_diode(spec: &DeviceSpec<'_>, nodes: [NodeId; 2]) -> Result<Diode> {
    Ok(Diode::new(
        spec.id,
        format!("{}.D", spec.name),
        nodes,
        value_or(spec, "diode_uf", DIODE_FORWARD_VOLTAGE),
        positive_or(spec, "diode_r_on", DIODE_R_ON)?,
        positive_or(spec, "diode_r_off", DIODE_R_OFF)?,
    ))
}

// ============ Constructors ============

fn build_resistor(spec: &DeviceSpec<'_>) -> Result<Component> {
    Ok(Component::Resistor(Resistor::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        positive(spec, "r")?,
    )))
}

fn build_capacitor(spec: &DeviceSpec<'_>) -> Result<Component> {
    Ok(Component::Capacitor(Capacitor::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        positive(spec, "c")?,
        value_or(spec, "v0", 0.0),
        method(spec)?,
    )))
}

fn build_inductor(spec: &DeviceSpec<'_>) -> Result<Component> {
    let saturation = match spec.params.curve("saturation") {
        Some(samples) => {
            if samples.iter().any(|&(_, l)| !(l.is_finite() && l > 0.0)) {
                return Err(PowersimError::malformed_characteristic(
                    spec.name,
                    "inductance must stay positive",
                ));
            }
            Some(PiecewiseLinear::new(spec.name, samples)?)
        }
        None => None,
    };
    let inductance = match &saturation {
        Some(_) => positive_or(spec, "l", 1.0)?,
        None => positive(spec, "l")?,
    };
    let inductor = Inductor::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        inductance,
        value_or(spec, "i0", 0.0),
        method(spec)?,
    );
    match saturation {
        Some(curve) => Ok(Component::Inductor(inductor.with_saturation(curve))),
        None => Ok(Component::Inductor(inductor)),
    }
}

fn build_voltage_source(spec: &DeviceSpec<'_>) -> Result<Component> {
    Ok(Component::VoltageSource(VoltageSource::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        own_branch(spec)?,
        waveform(spec, "v")?,
    )))
}

fn build_current_source(spec: &DeviceSpec<'_>) -> Result<Component> {
    Ok(Component::CurrentSource(CurrentSource::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        waveform(spec, "i")?,
    )))
}

fn build_ccvs(spec: &DeviceSpec<'_>) -> Result<Component> {
    let gain = spec
        .params
        .get("gain")
        .ok_or_else(|| {
            PowersimError::invalid_parameter(spec.name, "gain", "required parameter is missing")
        })?;
    Ok(Component::CurrentControlled(CurrentControlledSource::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        own_branch(spec)?,
        control_branch(spec)?,
        gain,
    )))
}

fn build_didt_source(spec: &DeviceSpec<'_>) -> Result<Component> {
    let gain = spec
        .params
        .get("gain")
        .ok_or_else(|| {
            PowersimError::invalid_parameter(spec.name, "gain", "required parameter is missing")
        })?;
    Ok(Component::DiDtControlled(DiDtControlledSource::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        own_branch(spec)?,
        control_branch(spec)?,
        gain,
    )))
}

fn build_switch(spec: &DeviceSpec<'_>) -> Result<Component> {
    Ok(Component::Switch(IdealSwitch::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        positive_or(spec, "r_on", IdealSwitch::R_ON)?,
        positive_or(spec, "r_off", IdealSwitch::R_OFF)?,
        flag(spec, "closed"),
    )))
}

fn build_diode(spec: &DeviceSpec<'_>) -> Result<Component> {
    let name = spec.name.to_string();
    if let Some(samples) = spec.params.curve("samples") {
        let curve = Characteristic::from_samples(spec.name, samples)?;
        let diode = Diode::from_characteristic(spec.id, name, terminals(spec), curve);
        return Ok(Component::Diode(diode));
    }
    Ok(Component::Diode(Diode::new(
        spec.id,
        name,
        terminals(spec),
        value_or(spec, "uf", DIODE_FORWARD_VOLTAGE),
        positive_or(spec, "r_on", DIODE_R_ON)?,
        positive_or(spec, "r_off", DIODE_R_OFF)?,
    )))
}

fn build_thyristor(spec: &DeviceSpec<'_>) -> Result<Component> {
    let recovery = value_or(spec, "t_rec", THYRISTOR_RECOVERY_TIME);
    if recovery < 0.0 {
        return Err(PowersimError::invalid_parameter(spec.name, "t_rec", "must not be negative"));
    }
    Ok(Component::Thyristor(Thyristor::new(
        spec.id,
        spec.name.to_string(),
        terminals(spec),
        value_or(spec, "uf", SWITCH_FORWARD_VOLTAGE),
        positive_or(spec, "r_on", SWITCH_R_ON)?,
        positive_or(spec, "r_off", SWITCH_R_OFF)?,
        recovery,
    )))
}

fn build_igbt(spec: &DeviceSpec<'_>) -> Result<Component> {
    let [collector, emitter] = terminals(spec);
    let diode = if flag(spec, "diode") {
        Some(parallel_diode(spec, [emitter, collector])?)
    } else {
        None
    };
    Ok(Component::Igbt(Igbt::new(
        spec.id,
        spec.name.to_string(),
        [collector, emitter],
        value_or(spec, "uf", SWITCH_FORWARD_VOLTAGE),
        positive_or(spec, "r_on", SWITCH_R_ON)?,
        positive_or(spec, "r_off", SWITCH_R_OFF)?,
        diode,
    )))
}

fn build_mosfet(spec: &DeviceSpec<'_>) -> Result<Component> {
    let [drain, source] = terminals(spec);
    let diode = if flag(spec, "diode") {
        Some(parallel_diode(spec, [source, drain])?)
    } else {
        None
    };
    Ok(Component::Mosfet(Mosfet::new(
        spec.id,
        spec.name.to_string(),
        [drain, source],
        positive_or(spec, "r_on", SWITCH_R_ON)?,
        positive_or(spec, "r_off", SWITCH_R_OFF)?,
        diode,
    )))
}

fn build_dc_machine(spec: &DeviceSpec<'_>) -> Result<Component> {
    let params = MachineParams {
        ra: positive(spec, "ra")?,
        la: positive(spec, "la")?,
        psi: positive(spec, "psi")?,
        inertia: positive(spec, "j")?,
        friction: value_or(spec, "friction", 0.0),
        omega0: value_or(spec, "omega0", 0.0),
    };
    if params.friction < 0.0 {
        return Err(PowersimError::invalid_parameter(spec.name, "friction", "must not be negative"));
    }
    let nodes = [spec.nodes[0], spec.nodes[1], spec.nodes[2], spec.nodes[3]];
    Ok(Component::DcMachine(DcMachine::new(
        spec.id,
        spec.name.to_string(),
        nodes,
        own_branch(spec)?,
        params,
        value_or(spec, "t_load", 0.0),
        method(spec)?,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec<'a>(name: &'a str, nodes: &'a [NodeId], params: &'a Params) -> DeviceSpec<'a> {
        DeviceSpec {
            id: ComponentId(0),
            name,
            nodes,
            branch: Some(BranchId(0)),
            control: None,
            params,
            method: IntegrationMethod::Trapezoidal,
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("igbt").map(|t| t.type_id), Some("IGBT"));
        assert!(lookup("BJT").is_none());
        assert!(type_ids().any(|id| id == "DCM"));
    }

    #[test]
    fn test_resistor_requires_positive_value() {
        let nodes = [NodeId(1), NodeId(0)];
        let params = Params::new();
        let err = (lookup("R").unwrap().factory)(&spec("R1", &nodes, &params));
        assert!(matches!(err, Err(PowersimError::InvalidParameter { .. })));

        let params = Params::new().with("r", -1.0);
        assert!((lookup("R").unwrap().factory)(&spec("R1", &nodes, &params)).is_err());

        let params = Params::new().with("r", 10.0);
        let r = (lookup("R").unwrap().factory)(&spec("R1", &nodes, &params)).unwrap();
        assert_eq!(r.name(), "R1");
    }

    #[test]
    fn test_method_override() {
        let nodes = [NodeId(1), NodeId(0)];
        let params = Params::new().with("c", 1e-6).with_str("method", "be");
        match (lookup("C").unwrap().factory)(&spec("C1", &nodes, &params)).unwrap() {
            Component::Capacitor(c) => assert_eq!(c.method, IntegrationMethod::BackwardEuler),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_igbt_with_anti_parallel_diode() {
        let nodes = [NodeId(1), NodeId(2)];
        let params = Params::new().with("diode", 1.0);
        match (lookup("IGBT").unwrap().factory)(&spec("Q1", &nodes, &params)).unwrap() {
            Component::Igbt(q) => {
                let d = q.anti_parallel.expect("diode configured");
                assert_eq!(d.nodes, [NodeId(2), NodeId(1)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_diode_curve_rejected() {
        let nodes = [NodeId(1), NodeId(0)];
        let params = Params::new().with_curve("samples", &[(0.0, 0.0), (0.8, 1.0), (0.7, 2.0)]);
        let err = (lookup("D").unwrap().factory)(&spec("D1", &nodes, &params));
        assert!(matches!(err, Err(PowersimError::MalformedCharacteristic { .. })));
    }

    #[test]
    fn test_saturation_curve_must_stay_positive() {
        let nodes = [NodeId(1), NodeId(0)];
        let params = Params::new().with_curve("saturation", &[(0.0, 1e-3), (1.0, 0.0)]);
        let err = (lookup("L").unwrap().factory)(&spec("L1", &nodes, &params));
        assert!(matches!(err, Err(PowersimError::MalformedCharacteristic { .. })));

        let params = Params::new().with_curve("saturation", &[(0.0, 1e-3), (1.0, 0.5e-3)]);
        assert!((lookup("L").unwrap().factory)(&spec("L1", &nodes, &params)).is_ok());
    }

    #[test]
    fn test_sine_source_needs_frequency() {
        let nodes = [NodeId(1), NodeId(0)];
        let params = Params::new().with("amplitude", 10.0);
        assert!((lookup("V").unwrap().factory)(&spec("V1", &nodes, &params)).is_err());
    }
}
