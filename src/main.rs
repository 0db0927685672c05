//! Powersim - switched circuit simulator demos
//!
//! Runs one of the built-in demo circuits and prints a CSV of node voltages.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug powersim buck --steps 20000 > buck.csv
//! ```

use clap::{Parser, ValueEnum};
use powersim_core::{
    circuit::{Netlist, Params},
    error::{PowersimError, Result},
    solver::{IntegrationMethod, NonConvergencePolicy, SimulatorConfig},
    Simulator,
};

/// Built-in demo circuits
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Demo {
    /// 50 Hz half-wave rectifier with capacitor filter
    Rectifier,
    /// 20 kHz buck converter, 24 V to 12 V
    Buck,
    /// Coupled-inductor step-up transformer
    Transformer,
    /// DC motor started across a fixed supply
    Motor,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Policy {
    Abort,
    Halve,
    Keep,
}

/// Switched circuit simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Demo circuit to run
    #[arg(value_enum)]
    demo: Demo,

    /// Time step in seconds
    #[arg(long)]
    dt: Option<f64>,

    /// Number of time steps
    #[arg(long, default_value_t = 10_000)]
    steps: usize,

    /// Integration method: be, trz or gear
    #[arg(long, default_value = "trz")]
    integrator: IntegrationMethod,

    /// Resolver iterations per step before giving up
    #[arg(long, default_value_t = powersim_core::solver::DEFAULT_MAX_SWITCH_ITERATIONS)]
    max_iterations: usize,

    /// What to do with a step that does not converge
    #[arg(long, value_enum, default_value = "abort")]
    policy: Policy,
}

struct DemoCircuit {
    netlist: Netlist,
    dt: f64,
    probes: &'static [&'static str],
    /// Gated device driven with a PWM signal: (name, frequency, duty)
    pwm: Option<(&'static str, f64, f64)>,
}

fn demo_circuit(demo: Demo) -> DemoCircuit {
    match demo {
        Demo::Rectifier => DemoCircuit {
            netlist: Netlist::new()
                .device(
                    "V",
                    "Vac",
                    &["ac", "0"],
                    Params::new().with("amplitude", 325.0).with("frequency", 50.0),
                )
                .device("D", "D1", &["ac", "out"], Params::new())
                .device("C", "Cf", &["out", "0"], Params::new().with("c", 470e-6))
                .device("R", "Rload", &["out", "0"], Params::new().with("r", 1e3)),
            dt: 10e-6,
            probes: &["ac", "out"],
            pwm: None,
        },
        Demo::Buck => DemoCircuit {
            netlist: Netlist::new()
                .device("V", "Vin", &["in", "0"], Params::new().with("v", 24.0))
                .device("IGBT", "Q1", &["in", "sw"], Params::new().with("diode", 1.0))
                .device("D", "Dfw", &["0", "sw"], Params::new())
                .device("L", "L1", &["sw", "out"], Params::new().with("l", 220e-6))
                .device("C", "C1", &["out", "0"], Params::new().with("c", 100e-6))
                .device("R", "Rload", &["out", "0"], Params::new().with("r", 5.0)),
            dt: 0.5e-6,
            probes: &["sw", "out"],
            pwm: Some(("Q1", 20e3, 0.5)),
        },
        Demo::Transformer => DemoCircuit {
            netlist: Netlist::new()
                .device(
                    "V",
                    "Vp",
                    &["p", "0"],
                    Params::new().with("amplitude", 10.0).with("frequency", 1e3),
                )
                .device("R", "Rp", &["p", "p1"], Params::new().with("r", 0.1))
                .device("L", "Lp", &["p1", "0"], Params::new().with("l", 1e-3))
                .device("L", "Ls", &["s", "0"], Params::new().with("l", 100e-3))
                .device("R", "Rs", &["s", "0"], Params::new().with("r", 1e3))
                .couple("K1", "Lp", "Ls", 0.99),
            dt: 1e-6,
            probes: &["p1", "s"],
            pwm: None,
        },
        Demo::Motor => DemoCircuit {
            netlist: Netlist::new()
                .device("V", "Vs", &["a", "0"], Params::new().with("v", 48.0))
                .device(
                    "DCM",
                    "M1",
                    &["a", "0"],
                    Params::new()
                        .with("ra", 0.5)
                        .with("la", 2e-3)
                        .with("psi", 0.4)
                        .with("j", 5e-3)
                        .with("friction", 1e-4),
                ),
            dt: 50e-6,
            probes: &["a", "M1#1"],
            pwm: None,
        },
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let demo = demo_circuit(args.demo);
    let config = SimulatorConfig::new()
        .with_dt(args.dt.unwrap_or(demo.dt))
        .with_integrator(args.integrator)
        .with_max_switch_iterations(args.max_iterations);
    let mut simulator = Simulator::from_netlist(&demo.netlist, config)?;

    let policy = match args.policy {
        Policy::Abort => NonConvergencePolicy::Abort,
        Policy::Halve => NonConvergencePolicy::HalveStep {
            min_dt: simulator.dt() / 64.0,
        },
        Policy::Keep => NonConvergencePolicy::KeepLastStable,
    };

    for probe in demo.probes {
        if simulator.node_voltage(probe).is_none() {
            return Err(PowersimError::NodeNotFound { node: probe.to_string() });
        }
    }
    log::info!(
        "{:?}: {} steps of {:.3e} s, {} integration",
        args.demo,
        args.steps,
        simulator.dt(),
        args.integrator
    );
    println!("time,{}", demo.probes.join(","));

    let mut non_convergent = 0;
    for _ in 0..args.steps {
        if let Some((name, frequency, duty)) = demo.pwm {
            let phase = (simulator.time() * frequency).fract();
            simulator.set_gate(name, phase < duty)?;
        }

        let summary = simulator.run(1, policy)?;
        non_convergent += summary.non_convergent_steps;

        let values: Vec<String> = demo
            .probes
            .iter()
            .map(|probe| format!("{:.6}", simulator.node_voltage(probe).unwrap_or(0.0)))
            .collect();
        println!("{:.9},{}", simulator.time(), values.join(","));
    }

    log::info!(
        "finished at t={:.6e}: {} switch events, {} non-convergent steps",
        simulator.time(),
        simulator.events().len(),
        non_convergent
    );
    for event in simulator.events() {
        let name = simulator.circuit().component(event.component).name();
        eprintln!("{:.9} {} {}", event.time, name, event.state);
    }

    Ok(())
}
