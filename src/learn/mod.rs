//! Rate constants replaced by state-dependent, fittable [`RateFunc`]s, plus
//! the [`Dataset`]/[`Loss`] machinery the optimizer fits them against.
//!
//! Rather than baking a scalar rate constant into a transition at
//! construction time, this layer generalises the rate slot itself into a
//! small trait so the "constant" can depend on the current state and carry
//! its own fittable parameters.

use std::collections::BTreeMap;
use std::sync::Arc as StdArc;

use nalgebra::DVector;

use crate::error::{DomainError, SolveError};
use crate::net::{Marking, Net};
use crate::ode::OdeSystem;
use crate::solver::{Options, Solution};

/// A parameterised, state-dependent replacement for a scalar rate constant.
///
/// Object-safe so a [`LearnableProblem`] can hold one per transition behind
/// `Box<dyn RateFunc>`, the same capability-trait shape used for
/// `Callback`/`Scorer`/`Loss` elsewhere in this crate.
pub trait RateFunc: Send {
    /// The current flat parameter vector.
    fn params(&self) -> Vec<f64>;

    /// Replaces the parameter vector. Fails if `params` has the wrong
    /// length for this rate function.
    fn set_params(&mut self, params: &[f64]) -> Result<(), DomainError>;

    /// Evaluates the rate against the current marking.
    fn evaluate(&self, marking: &Marking) -> f64;
}

/// A linear rate function: `intercept + sum(coefficient_i * marking[place_i])`,
/// with an optional non-negativity clamp on the output. Parameters are
/// unconstrained even when the output is clamped.
#[derive(Clone, Debug)]
pub struct LinearRateFunc {
    intercept: Option<f64>,
    coefficients: Vec<(String, f64)>,
    clamp_nonneg: bool,
}

impl LinearRateFunc {
    /// Creates a linear rate function over the given places, all
    /// coefficients and intercept initialised to zero.
    pub fn new(places: impl IntoIterator<Item = impl Into<String>>, with_intercept: bool) -> Self {
        LinearRateFunc {
            intercept: with_intercept.then_some(0.0),
            coefficients: places.into_iter().map(|p| (p.into(), 0.0)).collect(),
            clamp_nonneg: false,
        }
    }

    /// Enables clamping the evaluated output to be non-negative.
    pub fn clamp_nonnegative(mut self) -> Self {
        self.clamp_nonneg = true;
        self
    }

    /// Sets the intercept, if this rate function has one.
    pub fn with_intercept_value(mut self, value: f64) -> Self {
        if self.intercept.is_some() {
            self.intercept = Some(value);
        }
        self
    }

    /// Sets the coefficient for `place`, a no-op if `place` is not one of
    /// this rate function's places.
    pub fn with_coefficient(mut self, place: &str, value: f64) -> Self {
        if let Some(entry) = self.coefficients.iter_mut().find(|(p, _)| p == place) {
            entry.1 = value;
        }
        self
    }
}

impl RateFunc for LinearRateFunc {
    fn params(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(self.coefficients.len() + 1);
        if let Some(b) = self.intercept {
            v.push(b);
        }
        v.extend(self.coefficients.iter().map(|(_, c)| *c));
        v
    }

    fn set_params(&mut self, params: &[f64]) -> Result<(), DomainError> {
        let expected = self.coefficients.len() + self.intercept.is_some() as usize;
        if params.len() != expected {
            return Err(DomainError::ParamLengthMismatch { expected, got: params.len() });
        }
        let mut rest = params;
        if self.intercept.is_some() {
            self.intercept = Some(rest[0]);
            rest = &rest[1..];
        }
        for ((_, c), &v) in self.coefficients.iter_mut().zip(rest) {
            *c = v;
        }
        Ok(())
    }

    fn evaluate(&self, marking: &Marking) -> f64 {
        let mut out = self.intercept.unwrap_or(0.0);
        for (place, coeff) in &self.coefficients {
            out += coeff * marking.get(place).copied().unwrap_or(0.0);
        }
        if self.clamp_nonneg { out.max(0.0) } else { out }
    }
}

struct LearnableSystem<'a> {
    incidence: &'a crate::net::Incidence,
    rate_funcs: &'a [&'a dyn RateFunc],
}

impl OdeSystem for LearnableSystem<'_> {
    fn dim(&self) -> usize {
        self.incidence.num_places()
    }

    fn rhs(&self, dy: &mut DVector<f64>, y: &DVector<f64>) {
        dy.fill(0.0);
        let named = self.incidence.named_marking(y);
        let flux: Vec<f64> = self
            .incidence
            .transition_inputs
            .iter()
            .enumerate()
            .map(|(t, inputs)| {
                let mut f = self.rate_funcs[t].evaluate(&named);
                for &(p, w) in inputs {
                    let m = y[p].max(0.0);
                    f *= m.powf(w);
                }
                f
            })
            .collect();
        for (t, outputs) in self.incidence.transition_outputs.iter().enumerate() {
            for &(p, w) in outputs {
                dy[p] += flux[t] * w;
            }
        }
        for (t, inputs) in self.incidence.transition_inputs.iter().enumerate() {
            for &(p, w) in inputs {
                dy[p] -= flux[t] * w;
            }
        }
    }
}

/// A [`Problem`](crate::ode::Problem) whose rate map has been replaced by
/// per-transition [`RateFunc`]s, along with the deterministic parameter
/// gather/scatter the optimizer drives.
pub struct LearnableProblem {
    net: StdArc<Net>,
    initial: Marking,
    t0: f64,
    t1: f64,
    rate_funcs: BTreeMap<String, Box<dyn RateFunc>>,
}

impl LearnableProblem {
    /// Builds a learnable problem, validating the time span and that the
    /// marking and rate-function map only reference names that exist in
    /// `net`, mirroring [`crate::ode::Problem::new`]'s checks.
    pub fn new(
        net: StdArc<Net>,
        initial: Marking,
        t_span: (f64, f64),
        rate_funcs: BTreeMap<String, Box<dyn RateFunc>>,
    ) -> Result<Self, DomainError> {
        let (t0, t1) = t_span;
        if t1 <= t0 {
            return Err(DomainError::InvalidTimeSpan { t0, t1 });
        }
        for name in initial.keys() {
            if net.place(name).is_none() {
                return Err(DomainError::UnknownPlace(name.clone()));
            }
        }
        for name in rate_funcs.keys() {
            if net.transition(name).is_none() {
                return Err(DomainError::UnknownTransition(name.clone()));
            }
        }
        for name in net.transition_names_sorted() {
            if !rate_funcs.contains_key(name) {
                return Err(DomainError::MissingRateFunc(name.to_string()));
            }
        }
        Ok(LearnableProblem { net, initial, t0, t1, rate_funcs })
    }

    /// The underlying net.
    pub fn net(&self) -> &Net {
        &self.net
    }

    /// Gathers the flat parameter vector: for transitions in ascending name
    /// order, the concatenation of that transition's `RateFunc` parameters.
    /// Transitions with no registered `RateFunc` contribute nothing.
    pub fn params(&self) -> Vec<f64> {
        self.rate_funcs.values().flat_map(|rf| rf.params()).collect()
    }

    /// Scatters a flat parameter vector back across each transition's
    /// `RateFunc`, in the same ascending-name order [`Self::params`] used to
    /// gather it.
    pub fn set_params(&mut self, params: &[f64]) -> Result<(), DomainError> {
        let total_expected: usize = self.rate_funcs.values().map(|rf| rf.params().len()).sum();
        if params.len() != total_expected {
            return Err(DomainError::ParamLengthMismatch {
                expected: total_expected,
                got: params.len(),
            });
        }
        let mut rest = params;
        for rf in self.rate_funcs.values_mut() {
            let n = rf.params().len();
            rf.set_params(&rest[..n])?;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Integrates this problem, evaluating each transition's `RateFunc`
    /// against the integrator's current state at every right-hand-side
    /// call, rather than against a fixed rate map.
    pub fn solve(&self, mut opts: Options) -> Result<Solution, SolveError> {
        let incidence = self.net.freeze();
        let y0 = incidence.dense_marking(&self.initial);
        let rate_funcs: Vec<&dyn RateFunc> = incidence
            .transition_index
            .keys()
            .map(|name| {
                self.rate_funcs
                    .get(name.as_str())
                    .expect("LearnableProblem::new guarantees every transition has a RateFunc")
                    .as_ref()
            })
            .collect();
        let system = LearnableSystem { incidence: &incidence, rate_funcs: &rate_funcs };
        let place_names: Vec<String> =
            self.net.place_names_sorted().into_iter().map(String::from).collect();
        let (solution, _) =
            crate::solver::integrate(&system, &y0, self.t0, self.t1, place_names, &mut opts, None);
        Ok(solution)
    }
}

/// An observed time series for a subset of a net's places, used as a fit
/// target.
#[derive(Clone, Debug)]
pub struct Dataset {
    times: Vec<f64>,
    observations: BTreeMap<String, Vec<f64>>,
}

impl Dataset {
    /// Builds a dataset, validating that `times` is strictly increasing and
    /// every observation series has the same length as `times`.
    pub fn new(
        times: Vec<f64>,
        observations: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self, DomainError> {
        if !times.windows(2).all(|w| w[0] < w[1]) {
            return Err(DomainError::NonMonotonicTimes);
        }
        for (place, series) in &observations {
            if series.len() != times.len() {
                return Err(DomainError::DatasetLengthMismatch {
                    place: place.clone(),
                    expected: times.len(),
                    got: series.len(),
                });
            }
        }
        Ok(Dataset { times, observations })
    }

    /// The observation times.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// The observed series for `place`, if any.
    pub fn series(&self, place: &str) -> Option<&[f64]> {
        self.observations.get(place).map(Vec::as_slice)
    }

    /// The places this dataset has observations for.
    pub fn places(&self) -> impl Iterator<Item = &str> {
        self.observations.keys().map(String::as_str)
    }
}

/// `(Dataset, Solution) -> f64`: a goodness-of-fit measure the optimizer
/// minimises.
pub trait Loss {
    /// Evaluates the loss of `solution` against `dataset`, linearly
    /// interpolating `solution` at each observation time.
    fn evaluate(&self, dataset: &Dataset, solution: &Solution) -> f64;
}

fn residuals(dataset: &Dataset, solution: &Solution) -> Vec<f64> {
    let mut out = Vec::new();
    for place in dataset.places() {
        let series = dataset.series(place).unwrap();
        for (&t, &obs) in dataset.times().iter().zip(series) {
            let sim = solution.interpolate(t).get(place).copied().unwrap_or(0.0);
            out.push(sim - obs);
        }
    }
    out
}

/// Mean squared error over every observed `(time, place)` pair.
pub struct Mse;

impl Loss for Mse {
    fn evaluate(&self, dataset: &Dataset, solution: &Solution) -> f64 {
        let r = residuals(dataset, solution);
        if r.is_empty() {
            return 0.0;
        }
        r.iter().map(|e| e * e).sum::<f64>() / r.len() as f64
    }
}

/// Mean absolute error over every observed `(time, place)` pair.
pub struct Mae;

impl Loss for Mae {
    fn evaluate(&self, dataset: &Dataset, solution: &Solution) -> f64 {
        let r = residuals(dataset, solution);
        if r.is_empty() {
            return 0.0;
        }
        r.iter().map(|e| e.abs()).sum::<f64>() / r.len() as f64
    }
}

/// Mean squared error divided by the variance of the observations, making
/// losses comparable across places with different natural scales.
pub struct NormalizedMse;

impl Loss for NormalizedMse {
    fn evaluate(&self, dataset: &Dataset, solution: &Solution) -> f64 {
        let mut all_obs = Vec::new();
        for place in dataset.places() {
            all_obs.extend_from_slice(dataset.series(place).unwrap());
        }
        if all_obs.is_empty() {
            return 0.0;
        }
        let mean = all_obs.iter().sum::<f64>() / all_obs.len() as f64;
        let variance = all_obs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / all_obs.len() as f64;
        let mse = Mse.evaluate(dataset, solution);
        if variance > 0.0 { mse / variance } else { mse }
    }
}

/// The result of fitting a [`LearnableProblem`] to a [`Dataset`]: the best
/// parameter vector found, its loss trace, and summary statistics.
#[derive(Clone, Debug)]
pub struct FitResult {
    /// The best parameter vector the optimizer found.
    pub best_params: Vec<f64>,
    /// The best-so-far loss at each optimizer iteration.
    pub loss_trace: Vec<f64>,
    /// The loss at the problem's initial parameters.
    pub initial_loss: f64,
    /// The loss at `best_params`.
    pub final_loss: f64,
    /// The number of optimizer iterations run.
    pub iterations: usize,
}

/// Fits `problem`'s rate-function parameters to `dataset` by minimising
/// `loss` with Nelder-Mead. Leaves `problem` scattered with the best
/// parameters found, win or lose.
pub fn fit(
    problem: &mut LearnableProblem,
    dataset: &Dataset,
    loss: &dyn Loss,
    solver_opts: &Options,
    nm_opts: crate::optimize::NelderMeadOptions,
) -> Result<FitResult, DomainError> {
    let x0 = problem.params();

    let initial_loss = {
        problem.set_params(&x0)?;
        match problem.solve(solver_opts.clone()) {
            Ok(solution) => loss.evaluate(dataset, &solution),
            Err(_) => f64::INFINITY,
        }
    };

    let objective = |params: &[f64]| -> f64 {
        if problem.set_params(params).is_err() {
            return f64::INFINITY;
        }
        match problem.solve(solver_opts.clone()) {
            Ok(solution) => loss.evaluate(dataset, &solution),
            Err(_) => f64::INFINITY,
        }
    };

    let result = crate::optimize::minimize(x0, nm_opts, objective);
    problem.set_params(&result.best_params)?;

    Ok(FitResult {
        best_params: result.best_params,
        loss_trace: result.history,
        initial_loss,
        final_loss: result.best_value,
        iterations: result.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Arc as NetArc, Place, Transition};

    fn decay_net() -> StdArc<Net> {
        let mut net = Net::new();
        net.add_place(Place::new("A", 100.0)).unwrap();
        net.add_transition(Transition::new("decay")).unwrap();
        net.add_arc(NetArc::new("A", "decay", 1.0)).unwrap();
        StdArc::new(net)
    }

    #[test]
    fn linear_rate_func_round_trips_params() {
        let mut rf = LinearRateFunc::new(["A"], true).with_intercept_value(0.5).with_coefficient("A", 0.1);
        let params = rf.params();
        rf.set_params(&params).unwrap();
        assert_eq!(rf.params(), params);
    }

    #[test]
    fn linear_rate_func_rejects_wrong_length() {
        let mut rf = LinearRateFunc::new(["A"], true);
        assert!(rf.set_params(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn learnable_problem_gathers_params_in_sorted_transition_order() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 1.0)).unwrap();
        net.add_transition(Transition::new("zeta")).unwrap();
        net.add_transition(Transition::new("alpha")).unwrap();
        net.add_arc(NetArc::new("A", "zeta", 1.0)).unwrap();
        net.add_arc(NetArc::new("A", "alpha", 1.0)).unwrap();

        let mut funcs: BTreeMap<String, Box<dyn RateFunc>> = BTreeMap::new();
        funcs.insert(
            "zeta".to_string(),
            Box::new(LinearRateFunc::new(Vec::<String>::new(), true).with_intercept_value(9.0)),
        );
        funcs.insert(
            "alpha".to_string(),
            Box::new(LinearRateFunc::new(Vec::<String>::new(), true).with_intercept_value(1.0)),
        );

        let problem =
            LearnableProblem::new(StdArc::new(net), Marking::new(), (0.0, 1.0), funcs).unwrap();
        assert_eq!(problem.params(), vec![1.0, 9.0]);
    }

    #[test]
    fn learnable_decay_matches_constant_rate_decay() {
        let net = decay_net();
        let mut funcs: BTreeMap<String, Box<dyn RateFunc>> = BTreeMap::new();
        funcs.insert(
            "decay".to_string(),
            Box::new(LinearRateFunc::new(Vec::<String>::new(), true).with_intercept_value(0.1)),
        );
        let problem = LearnableProblem::new(
            net,
            Marking::from([("A".to_string(), 100.0)]),
            (0.0, 10.0),
            funcs,
        )
        .unwrap();
        let solution = problem.solve(Options::default()).unwrap();
        let final_a = solution.final_state()["A"];
        assert!((final_a - 100.0 * (-1.0_f64).exp()).abs() < 0.05);
    }
}
