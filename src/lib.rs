/*! Petri nets under mass-action kinetics.

A Petri net's places carry real-valued token counts; transitions fire at
rates that are products of their input places' tokens weighted by a rate
constant; the time evolution is the solution of the autonomous ODE system
derived from the net's incidence structure.

# Organization

- [`net`]: places, transitions, arcs, markings, and the pflow.xyz-compatible
  JSON wire format.
- [`ode`]: translation of a net plus a rate map into an ODE right-hand side.
- [`solver`]: the adaptive Tsit5 integrator, dense output, and equilibrium
  detection.
- [`engine`]: the long-running, rule-driven streaming simulation loop.
- [`learn`]: rate constants replaced by state-dependent, fittable
  [`learn::RateFunc`]s, plus datasets and loss functions used to fit them.
- [`optimize`]: the derivative-free Nelder–Mead simplex optimizer that drives
  fitting.
- [`sensitivity`]: one-at-a-time rate impact, sweeps, gradients, and grid
  search, with an optional parallel backend.
- [`validate`]: static structural diagnostics for a net.
*/

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod learn;
pub mod net;
pub mod ode;
pub mod optimize;
pub mod sensitivity;
pub mod solver;
pub mod validate;

pub use error::{DomainError, RuleActionError, SolveError, StructureError};
pub use net::{Arc as NetArc, Marking, Net, Place, RateMap, Transition};
pub use ode::{OdeSystem, Problem};
pub use solver::{EquilibriumOptions, EquilibriumResult, Options, Solution};

/// Integrates a [`Problem`] with the given [`Options`], returning the
/// resulting [`Solution`].
///
/// Never returns `Err` for numerical failures (NaN/Inf in the right-hand
/// side, step underflow, or step-budget exhaustion): those are reported in
/// the returned `Solution`'s [`solver::Diagnostic`], per the propagation
/// policy that the solver never aborts the host process. An `Err` can only
/// occur if constructing the underlying system from `problem` itself fails,
/// which cannot happen for a `Problem` built through its own constructors.
pub fn solve(problem: &Problem, mut opts: Options) -> Result<Solution, SolveError> {
    let (system, y0) = problem.build_system();
    let (t0, t1) = problem.t_span();
    let place_names: Vec<String> =
        problem.net().place_names_sorted().into_iter().map(String::from).collect();
    let (solution, _) = solver::integrate(&system, &y0, t0, t1, place_names, &mut opts, None);
    Ok(solution)
}

/// Integrates a [`Problem`] while tracking equilibrium convergence,
/// returning both the [`Solution`] and the [`EquilibriumResult`].
pub fn solve_tracking_equilibrium(
    problem: &Problem,
    mut opts: Options,
    eq_opts: EquilibriumOptions,
) -> Result<(Solution, EquilibriumResult), SolveError> {
    let (system, y0) = problem.build_system();
    let (t0, t1) = problem.t_span();
    let place_names: Vec<String> =
        problem.net().place_names_sorted().into_iter().map(String::from).collect();
    let (solution, equilibrium) =
        solver::integrate(&system, &y0, t0, t1, place_names, &mut opts, Some(&eq_opts));
    Ok((solution, equilibrium.expect("equilibrium tracking was requested")))
}
