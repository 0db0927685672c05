//! Switch-state resolution for one time step.
//!
//! A step is solved as a fixed-point search over discrete switch states:
//!
//! ```text
//!   Assembling -> Solving -> UpdatingHistory -> CheckingSwitches
//!        ^                                            |
//!        +---------- some device changed state -------+
//! ```
//!
//! The loop ends `Stable` when a check changes nothing, or `NonConvergent`
//! when the iteration cap is reached. A non-convergent step restores every
//! device to the state it had at the start of the step.
//!
//! From the third inconsistent iteration on, the forward thresholds are
//! scaled down by a decaying disturbance factor, and after long runs an
//! acceptance tolerance widens the switching thresholds. Both break ties
//! for operating points that sit right on a threshold.

use crate::components::Component;
use crate::error::Result;

use super::context::RunContext;
use super::mna::MnaMatrix;
use super::simulator::SimulatorConfig;

/// Phase of the resolver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Assembling,
    Solving,
    UpdatingHistory,
    CheckingSwitches,
}

/// Result of resolving one time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No device changed state in the last iteration; the step can be committed.
    Stable { iterations: usize },
    /// The iteration cap was reached. Nothing was committed.
    NonConvergent { iterations: usize },
}

impl StepOutcome {
    pub fn iterations(&self) -> usize {
        match *self {
            StepOutcome::Stable { iterations } | StepOutcome::NonConvergent { iterations } => {
                iterations
            }
        }
    }

    pub fn is_stable(&self) -> bool {
        matches!(self, StepOutcome::Stable { .. })
    }
}

/// Build the system for the step ending at `time`.
///
/// The conductance matrix is rebuilt only when the re-stamp flag is raised
/// (or `full` is set); otherwise the previous matrix and its LU factors are
/// kept and only the excitation vector is rebuilt.
pub fn assemble(
    components: &[Component],
    mna: &mut MnaMatrix,
    ctx: &mut RunContext,
    full: bool,
    time: f64,
    dt: f64,
) {
    if full || ctx.needs_restamp() {
        mna.clear_matrix();
        for component in components {
            component.stampable().stamp_conductance(mna, dt);
        }
        ctx.clear_restamp();
    }

    mna.clear_excitation();
    for component in components {
        component.stampable().stamp_excitation(mna, time, dt);
    }
}

/// Resolve the switch states of the step ending at `time`.
///
/// Singular systems are returned as errors; in that case, as for a
/// non-convergent step, every device is rolled back.
pub fn resolve_step(
    components: &mut [Component],
    mna: &mut MnaMatrix,
    ctx: &mut RunContext,
    config: &SimulatorConfig,
    time: f64,
    dt: f64,
) -> Result<StepOutcome> {
    ctx.begin_step(time);
    for component in components.iter_mut() {
        if let Some(device) = component.self_commutating_mut() {
            device.begin_step();
        }
    }

    let result = iterate(components, mna, ctx, config, time, dt);
    if !matches!(result, Ok(StepOutcome::Stable { .. })) {
        rollback(components, ctx);
    }
    result
}

fn iterate(
    components: &mut [Component],
    mna: &mut MnaMatrix,
    ctx: &mut RunContext,
    config: &SimulatorConfig,
    time: f64,
    dt: f64,
) -> Result<StepOutcome> {
    let mut state = ResolverState::Assembling;
    let mut iterations = 0usize;
    let mut inconsistent = 0usize;

    loop {
        state = match state {
            ResolverState::Assembling => {
                if iterations >= config.max_switch_iterations {
                    log::warn!(
                        "switch states did not settle at t={:.6e} after {} iterations",
                        time,
                        iterations
                    );
                    return Ok(StepOutcome::NonConvergent { iterations });
                }
                iterations += 1;
                ctx.set_acceptance(config.acceptance_for(iterations));
                assemble(components, mna, ctx, config.full_restamp_every_iteration, time, dt);
                ResolverState::Solving
            }
            ResolverState::Solving => {
                mna.solve()?;
                ResolverState::UpdatingHistory
            }
            ResolverState::UpdatingHistory => {
                for component in components.iter_mut() {
                    component.history_mut().update_history(mna, dt);
                }
                ResolverState::CheckingSwitches
            }
            ResolverState::CheckingSwitches => {
                let mut changed = false;
                for component in components.iter_mut() {
                    if let Some(device) = component.self_commutating_mut() {
                        changed |= device.check_switch_state(ctx);
                    }
                }
                log::trace!(
                    "t={:.6e} iteration {}: {}",
                    time,
                    iterations,
                    if changed { "inconsistent" } else { "stable" }
                );
                if !changed {
                    return Ok(StepOutcome::Stable { iterations });
                }
                inconsistent += 1;
                if inconsistent > config.decay_after {
                    ctx.set_disturbance(ctx.disturbance() * config.disturbance_decay);
                }
                ResolverState::Assembling
            }
        };
    }
}

fn rollback(components: &mut [Component], ctx: &mut RunContext) {
    for component in components.iter_mut() {
        if let Some(device) = component.self_commutating_mut() {
            device.rollback();
        }
    }
    ctx.take_pending();
    ctx.request_restamp();
}

/// Accept a stable step: shift companion history, then run post-step hooks.
///
/// Hooks run after the re-stamp flag was cleared by the last assembly, so a
/// hook that changes a conductance (a saturating inductor) re-raises it for
/// the next step.
pub fn commit_step(components: &mut [Component], ctx: &mut RunContext, dt: f64) {
    for component in components.iter_mut() {
        component.history_mut().commit();
    }
    for component in components.iter_mut() {
        if let Some(device) = component.post_processable_mut() {
            device.post_step(dt, ctx);
        }
    }
}
