//! The adaptive Tsit5 integrator: step-size control, dense output, callbacks,
//! and equilibrium detection.
//!
//! This crate owns its own stepping loop rather than wrapping an external
//! adaptive stepper, since it needs a custom dense interpolant and an
//! equilibrium-detection hook threaded through every accepted step.

use nalgebra::DVector;
use tracing::{debug, warn};

use crate::error::SolveError;
use crate::net::Marking;
use crate::ode::OdeSystem;

pub mod callback;
mod tsit5;

pub use callback::{Callback, PeriodicCallback, StateModCallback};

/// The solver method selector. Only one method is implemented today, but the
/// option exists so new methods can be added without changing [`Options`]'s
/// shape, mirroring the capability-based `SolverMethod` extension point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Method {
    /// The 7-stage 5(4) Tsitouras explicit Runge-Kutta pair.
    #[default]
    Tsit5,
}

/// Solver configuration. All fields carry the documented defaults via
/// [`Default`], and the builder methods below let a caller override just
/// the ones it cares about.
///
/// `Clone` and `Debug` are implemented by hand rather than derived: a boxed
/// `dyn Callback` is neither, so cloning an `Options` drops its callbacks
/// rather than trying to duplicate arbitrary closure state, and `Debug`
/// prints the callback count instead of their contents. This matches how
/// every call site that clones an `Options` (sensitivity re-simulation,
/// engine steps, the fitter's per-candidate solves) uses the clone purely
/// for its tolerances and step controls, never for the original solve's
/// callbacks.
pub struct Options {
    /// Relative tolerance used in the per-component error weight.
    pub rtol: f64,
    /// Absolute tolerance used in the per-component error weight.
    pub atol: f64,
    /// Output sample spacing.
    pub dt: f64,
    /// Minimum permitted step size; shrinking past this is a hard failure.
    pub dt_min: f64,
    /// Maximum permitted step size.
    pub dt_max: f64,
    /// Hard cap on the number of attempted steps (accepted + rejected).
    pub max_iters: usize,
    /// When `false`, integrates with a fixed step of `dt` instead of
    /// adaptive step-size control.
    pub adaptive_stepping: bool,
    /// Ordered callbacks, invoked after each accepted step in order.
    pub callbacks: Vec<Box<dyn Callback>>,
    /// When `true`, emits `tracing::debug!` events for every accepted and
    /// rejected step, in addition to the `warn!`s always emitted on failure.
    pub verbose: bool,
    /// The integration method. Only [`Method::Tsit5`] exists today.
    pub method: Method,
}

impl Clone for Options {
    /// Clones every field except `callbacks`, which is reset to empty: a
    /// boxed `dyn Callback` cannot be duplicated in general, and every
    /// existing caller that clones an `Options` (sensitivity re-simulation,
    /// engine steps, the fitter's per-candidate solves) builds its clones
    /// from an `Options` that never carried callbacks in the first place.
    fn clone(&self) -> Self {
        Options {
            rtol: self.rtol,
            atol: self.atol,
            dt: self.dt,
            dt_min: self.dt_min,
            dt_max: self.dt_max,
            max_iters: self.max_iters,
            adaptive_stepping: self.adaptive_stepping,
            callbacks: Vec::new(),
            verbose: self.verbose,
            method: self.method,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("rtol", &self.rtol)
            .field("atol", &self.atol)
            .field("dt", &self.dt)
            .field("dt_min", &self.dt_min)
            .field("dt_max", &self.dt_max)
            .field("max_iters", &self.max_iters)
            .field("adaptive_stepping", &self.adaptive_stepping)
            .field("callbacks", &format_args!("[{} callback(s)]", self.callbacks.len()))
            .field("verbose", &self.verbose)
            .field("method", &self.method)
            .finish()
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            rtol: 1e-3,
            atol: 1e-6,
            dt: 0.1,
            dt_min: 0.0,
            dt_max: f64::INFINITY,
            max_iters: 100_000,
            adaptive_stepping: true,
            callbacks: Vec::new(),
            verbose: false,
            method: Method::Tsit5,
        }
    }
}

impl Options {
    /// Sets the relative and absolute tolerances.
    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    /// Sets the output sample spacing.
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Sets the step budget.
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Appends a callback to the ordered callback list.
    pub fn with_callback(mut self, callback: Box<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Disables adaptive step-size control in favor of a fixed step of `dt`.
    pub fn fixed_step(mut self) -> Self {
        self.adaptive_stepping = false;
        self
    }
}

/// Why an integration run ended before its time span completed normally.
#[derive(Clone, Debug, PartialEq)]
pub enum Diagnostic {
    /// Integration reached `t1` without incident.
    Complete,
    /// The right-hand side produced a non-finite value; integration stopped
    /// at the last accepted state.
    NonFinite {
        /// The time at which the non-finite value appeared.
        t: f64,
    },
    /// The adaptive step shrank below `dt_min`.
    StepTooSmall {
        /// The time at which the step size underflowed.
        t: f64,
    },
    /// `max_iters` attempted steps were used up before reaching `t1`.
    BudgetExceeded,
}

impl Diagnostic {
    /// Whether integration reached the end of its requested time span.
    pub fn is_complete(&self) -> bool {
        matches!(self, Diagnostic::Complete)
    }
}

/// A dense time grid of markings produced by a solve: `U[i]` is the marking
/// at `T[i]`, with `T` strictly increasing and always including the exact
/// endpoints of the requested time span (unless truncated early; see
/// [`Solution::diagnostic`]).
#[derive(Clone, Debug)]
pub struct Solution {
    place_names: Vec<String>,
    t: Vec<f64>,
    u: Vec<Marking>,
    diagnostic: Diagnostic,
}

impl Solution {
    /// The time grid, strictly increasing.
    pub fn times(&self) -> &[f64] {
        &self.t
    }

    /// The marking snapshots, `u[i]` at `times()[i]`.
    pub fn markings(&self) -> &[Marking] {
        &self.u
    }

    /// Why integration stopped. [`Diagnostic::Complete`] unless a numerical
    /// failure or the step budget truncated the run early.
    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }

    /// The full time series for a single place, in grid order.
    ///
    /// Returns `None` if `place` is not one of this solution's places.
    pub fn get_variable(&self, place: &str) -> Option<Vec<f64>> {
        if !self.place_names.iter().any(|p| p == place) {
            return None;
        }
        Some(self.u.iter().map(|m| m.get(place).copied().unwrap_or(0.0)).collect())
    }

    /// The marking at the last sample.
    pub fn final_state(&self) -> &Marking {
        self.u.last().expect("a Solution always has at least one sample")
    }

    /// Linearly interpolates the marking at an arbitrary `t` within
    /// `[times()[0], times().last()]`. Clamps to the nearest endpoint
    /// outside that range rather than extrapolating.
    pub fn interpolate(&self, t: f64) -> Marking {
        if t <= self.t[0] {
            return self.u[0].clone();
        }
        let last = self.t.len() - 1;
        if t >= self.t[last] {
            return self.u[last].clone();
        }
        let idx = match self.t.binary_search_by(|probe| probe.partial_cmp(&t).unwrap()) {
            Ok(i) => return self.u[i].clone(),
            Err(i) => i,
        };
        let (t0, t1) = (self.t[idx - 1], self.t[idx]);
        let theta = (t - t0) / (t1 - t0);
        self.place_names
            .iter()
            .map(|p| {
                let y0 = self.u[idx - 1].get(p).copied().unwrap_or(0.0);
                let y1 = self.u[idx].get(p).copied().unwrap_or(0.0);
                (p.clone(), y0 + theta * (y1 - y0))
            })
            .collect()
    }
}

/// The outcome of the equilibrium detector: either the marking the system
/// settled at and when, or a report that the time span ended first.
#[derive(Clone, Debug)]
pub struct EquilibriumResult {
    /// Whether the system reached equilibrium within the requested span.
    pub reached: bool,
    /// The time at which equilibrium was declared (or the span's end time
    /// if `reached` is `false`).
    pub time: f64,
    /// The marking at `time`.
    pub marking: Marking,
}

/// Parameters governing when the equilibrium detector declares convergence.
#[derive(Clone, Debug)]
pub struct EquilibriumOptions {
    /// No equilibrium check happens before this time.
    pub min_time: f64,
    /// Check `||dy/dt||_inf` every this many accepted steps.
    pub check_interval: usize,
    /// The infinity-norm threshold below which a check counts as "flat".
    pub tolerance: f64,
    /// How many consecutive flat checks declare equilibrium.
    pub consecutive_steps: usize,
}

impl Default for EquilibriumOptions {
    fn default() -> Self {
        EquilibriumOptions {
            min_time: 0.0,
            check_interval: 1,
            tolerance: 1e-6,
            consecutive_steps: 3,
        }
    }
}

/// Integrates `sys` from `y0` over `[t0, t1]` per `opts`, optionally
/// tracking equilibrium convergence per `eq_opts`.
///
/// This is the single stepping loop behind both [`crate::ode::Problem`]
/// solving and the streaming engine's short-span steps; equilibrium
/// tracking is folded in here (rather than as a second pass over the
/// output) because it needs the RHS value at every accepted step, which
/// the loop already computes for its FSAL first stage.
pub(crate) fn integrate<Sys: OdeSystem>(
    sys: &Sys,
    y0: &DVector<f64>,
    t0: f64,
    t1: f64,
    place_names: Vec<String>,
    opts: &mut Options,
    eq_opts: Option<&EquilibriumOptions>,
) -> (Solution, Option<EquilibriumResult>) {
    let dim = sys.dim();
    debug_assert_eq!(y0.len(), dim);

    let mut t = t0;
    let mut y = y0.clone();
    let mut f = sys.eval(&y);

    let mut h = initial_step(&opts, t1 - t0);
    // PI controller exponents (Gustafsson): beta1 weights the current error
    // norm, beta2 weights the previous accepted step's, both scaled by the
    // method's order so a higher-order method reacts less aggressively to a
    // given relative error.
    let beta1 = 0.7 / tsit5::ORDER;
    let beta2 = 0.4 / tsit5::ORDER;
    let mut prev_err_norm = 1.0_f64;

    let mut sample_times = Vec::new();
    let mut next_sample = t0;
    while next_sample < t1 {
        sample_times.push(next_sample);
        next_sample += opts.dt;
    }
    sample_times.push(t1);

    let mut t_out = Vec::with_capacity(sample_times.len());
    let mut u_out = Vec::with_capacity(sample_times.len());
    let mut sample_idx = 0;
    let mut emit = |t: f64, y: &DVector<f64>, place_names: &[String]| {
        t_out.push(t);
        u_out.push(dense_to_marking(place_names, y));
    };
    while sample_idx < sample_times.len() && sample_times[sample_idx] <= t0 + 1e-12 {
        emit(t0, &y, &place_names);
        sample_idx += 1;
    }

    let mut eq_state = eq_opts.map(|o| EquilibriumTracker::new(o.clone()));
    let mut equilibrium = None;

    let mut diagnostic = Diagnostic::Complete;
    let mut iters = 0usize;
    'outer: while t < t1 - 1e-12 {
        if iters >= opts.max_iters {
            warn!(t, max_iters = opts.max_iters, "exceeded step budget before reaching t1");
            diagnostic = Diagnostic::BudgetExceeded;
            break;
        }
        iters += 1;

        let h_try = h.min(t1 - t).min(opts.dt_max);
        if opts.verbose {
            debug!(t, h = h_try, "attempting step");
        }

        if !opts.adaptive_stepping {
            let attempt = tsit5::step(sys, &y, &f, h_try, opts.atol, opts.rtol);
            if !attempt.y_new.iter().all(|v| v.is_finite()) {
                warn!(t, "non-finite value in right-hand side");
                diagnostic = Diagnostic::NonFinite { t };
                break 'outer;
            }
            t += h_try;
            let (y_prev, f_prev) = (y.clone(), f.clone());
            y = attempt.y_new;
            f = attempt.k7;
            run_step(
                sys, &mut t, &mut y, &mut f, h_try, opts, &y_prev, &f_prev, &place_names,
                &sample_times, &mut sample_idx, &mut emit, &mut eq_state, &mut equilibrium,
            );
            continue;
        }

        let attempt = tsit5::step(sys, &y, &f, h_try, opts.atol, opts.rtol);
        if !attempt.y_new.iter().all(|v| v.is_finite()) || !attempt.err_norm.is_finite() {
            warn!(t, "non-finite value in right-hand side");
            diagnostic = Diagnostic::NonFinite { t };
            break;
        }

        if attempt.err_norm <= 1.0 {
            let y_prev = y.clone();
            let f_prev = f.clone();
            t += h_try;
            y = attempt.y_new;
            f = attempt.k7;

            run_step(
                sys, &mut t, &mut y, &mut f, h_try, opts, &y_prev, &f_prev, &place_names,
                &sample_times, &mut sample_idx, &mut emit, &mut eq_state, &mut equilibrium,
            );

            let grow = (0.9
                * attempt.err_norm.powf(-beta1)
                * prev_err_norm.powf(beta2))
            .clamp(0.2, 10.0);
            h = (h_try * grow).min(opts.dt_max);
            prev_err_norm = attempt.err_norm.max(1e-10);
        } else {
            let shrink = (0.9 * attempt.err_norm.powf(-1.0 / 5.0)).max(0.2);
            h = h_try * shrink;
            if h < opts.dt_min {
                warn!(t, dt_min = opts.dt_min, "step size shrank below dt_min");
                diagnostic = Diagnostic::StepTooSmall { t };
                break;
            }
            if opts.verbose {
                debug!(t, err_norm = attempt.err_norm, new_h = h, "rejected step");
            }
        }
    }

    while sample_idx < sample_times.len() {
        emit(t1, &y, &place_names);
        sample_idx += 1;
    }

    if equilibrium.is_none() {
        if let Some(eq) = eq_opts {
            equilibrium = Some(EquilibriumResult {
                reached: false,
                time: t1,
                marking: dense_to_marking(&place_names, &y),
            });
            let _ = eq;
        }
    }

    let solution = Solution { place_names, t: t_out, u: u_out, diagnostic };
    (solution, equilibrium)
}

#[allow(clippy::too_many_arguments)]
fn run_step<Sys: OdeSystem>(
    sys: &Sys,
    t: &mut f64,
    y: &mut DVector<f64>,
    f: &mut DVector<f64>,
    h: f64,
    opts: &mut Options,
    y_prev: &DVector<f64>,
    f_prev: &DVector<f64>,
    place_names: &[String],
    sample_times: &[f64],
    sample_idx: &mut usize,
    emit: &mut impl FnMut(f64, &DVector<f64>, &[String]),
    eq_state: &mut Option<EquilibriumTracker>,
    equilibrium: &mut Option<EquilibriumResult>,
) {
    let mut y_mid: Option<DVector<f64>> = None;
    while *sample_idx < sample_times.len() && sample_times[*sample_idx] <= *t + 1e-12 {
        let ts = sample_times[*sample_idx];
        let theta = ((ts - (*t - h)) / h).clamp(0.0, 1.0);
        if y_mid.is_none() {
            y_mid = Some(tsit5::midpoint_estimate(sys, y_prev, f_prev, h));
        }
        let mid = y_mid.as_ref().expect("just populated above");
        let y_s = tsit5::hermite_interpolate(y_prev, f_prev, y, f, mid, h, theta);
        emit(ts, &y_s, place_names);
        *sample_idx += 1;
    }

    let mut callbacks = std::mem::take(&mut opts.callbacks);
    let mut mutated = false;
    for cb in callbacks.iter_mut() {
        if cb.on_accepted_step(*t, y, h) {
            mutated = true;
        }
    }
    opts.callbacks = callbacks;
    if mutated {
        *f = sys.eval(y);
    }

    if let Some(tracker) = eq_state {
        if equilibrium.is_none() {
            if let Some(result) = tracker.observe(*t, f, y, place_names) {
                *equilibrium = Some(result);
            }
        }
    }
}

struct EquilibriumTracker {
    opts: EquilibriumOptions,
    steps_since_check: usize,
    flat_streak: usize,
}

impl EquilibriumTracker {
    fn new(opts: EquilibriumOptions) -> Self {
        EquilibriumTracker { opts, steps_since_check: 0, flat_streak: 0 }
    }

    fn observe(
        &mut self,
        t: f64,
        f: &DVector<f64>,
        y: &DVector<f64>,
        place_names: &[String],
    ) -> Option<EquilibriumResult> {
        if t < self.opts.min_time {
            return None;
        }
        self.steps_since_check += 1;
        if self.steps_since_check < self.opts.check_interval {
            return None;
        }
        self.steps_since_check = 0;

        let norm = f.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if norm < self.opts.tolerance {
            self.flat_streak += 1;
        } else {
            self.flat_streak = 0;
        }

        if self.flat_streak >= self.opts.consecutive_steps {
            Some(EquilibriumResult {
                reached: true,
                time: t,
                marking: dense_to_marking(place_names, y),
            })
        } else {
            None
        }
    }
}

fn initial_step(opts: &Options, span: f64) -> f64 {
    if !opts.adaptive_stepping {
        return opts.dt;
    }
    opts.dt.min(span).max(opts.dt_min.max(1e-6)).min(opts.dt_max)
}

fn dense_to_marking(place_names: &[String], y: &DVector<f64>) -> Marking {
    place_names.iter().cloned().zip(y.iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Arc as NetArc, Place, RateMap, Transition};
    use crate::ode::Problem;
    use std::sync::Arc as StdArc;

    fn decay_problem(rate: f64) -> Problem {
        let mut net = crate::net::Net::new();
        net.add_place(Place::new("A", 100.0)).unwrap();
        net.add_transition(Transition::new("decay")).unwrap();
        net.add_arc(NetArc::new("A", "decay", 1.0)).unwrap();
        let mut rates = RateMap::new();
        rates.insert("decay".to_string(), rate);
        Problem::from_net_defaults(StdArc::new(net), (0.0, 10.0), rates).unwrap()
    }

    #[test]
    fn pure_decay_matches_closed_form() {
        let problem = decay_problem(0.1);
        let solution = crate::solve(&problem, Options::default()).unwrap();
        let final_a = solution.final_state()["A"];
        assert!((final_a - 100.0 * (-1.0_f64).exp()).abs() < 0.05);
        assert!(solution.diagnostic().is_complete());
    }

    #[test]
    fn time_grid_is_monotone_and_spans_t0_t1() {
        let problem = decay_problem(0.1);
        let solution = crate::solve(&problem, Options::default()).unwrap();
        let t = solution.times();
        assert_eq!(t[0], 0.0);
        assert!((t[t.len() - 1] - 10.0).abs() < 1e-9);
        assert!(t.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn conservation_holds_for_balanced_transition() {
        let mut net = crate::net::Net::new();
        net.add_place(Place::new("A", 100.0)).unwrap();
        net.add_place(Place::new("B", 0.0)).unwrap();
        net.add_transition(Transition::new("convert")).unwrap();
        net.add_arc(NetArc::new("A", "convert", 1.0)).unwrap();
        net.add_arc(NetArc::new("convert", "B", 1.0)).unwrap();
        let mut rates = RateMap::new();
        rates.insert("convert".to_string(), 0.1);
        let problem =
            Problem::from_net_defaults(StdArc::new(net), (0.0, 10.0), rates).unwrap();
        let solution = crate::solve(&problem, Options::default()).unwrap();
        for m in solution.markings() {
            let total: f64 = m.values().sum();
            assert!((total - 100.0).abs() <= 10.0 * 1e-6 * 2.0);
        }
        let final_state = solution.final_state();
        assert!(final_state["A"] < 100.0);
        assert!(final_state["B"] > 0.0);
    }
}
