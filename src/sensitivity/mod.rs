//! One-at-a-time rate impact, parameter sweeps, central-difference
//! gradients, and grid search over a [`Problem`](crate::ode::Problem)'s
//! rate map, with an optional parallel backend.
//!
//! Every analysis here reuses [`crate::solve`] as its only simulation
//! primitive: each re-simulates a perturbed
//! [`Problem`](crate::ode::Problem) built via `Problem::with_rates`, never
//! touching the solver's internals. The optional parallel fan-out uses
//! `rayon` (already a workspace dependency), since each perturbed
//! simulation is fully independent of the others.

use std::collections::BTreeMap;

use derive_more::Constructor;
use itertools::Itertools;

use crate::error::DomainError;
use crate::ode::Problem;
use crate::solver::{Options, Solution};

/// `Solution -> f64`: a scalar figure of merit a sensitivity analysis
/// optimises or compares across perturbations.
pub trait Scorer: Send + Sync {
    /// Scores a solution.
    fn score(&self, solution: &Solution) -> f64;
}

/// Scores a solution by the final token count of a single named place.
pub struct PlaceScorer {
    place: String,
}

impl PlaceScorer {
    /// Creates a scorer over `place`.
    pub fn new(place: impl Into<String>) -> Self {
        PlaceScorer { place: place.into() }
    }
}

impl Scorer for PlaceScorer {
    fn score(&self, solution: &Solution) -> f64 {
        solution.final_state().get(&self.place).copied().unwrap_or(0.0)
    }
}

/// One transition's impact on a [`Scorer`] when its rate is zeroed out.
#[derive(Clone, Debug, Constructor)]
pub struct ImpactEntry {
    /// The transition whose rate was zeroed.
    pub transition: String,
    /// The scorer's value with that transition's rate at zero.
    pub score: f64,
    /// `score - baseline_score`.
    pub impact: f64,
}

/// For each transition in `problem`, zeroes its rate, re-simulates, and
/// records the resulting score and its difference from the unperturbed
/// baseline. Entries are sorted by `|impact|` descending; ties preserve the
/// net's transition insertion order (Rust's `sort_by` is stable).
pub fn rate_impact(
    problem: &Problem,
    scorer: &dyn Scorer,
    opts: &Options,
) -> Result<Vec<ImpactEntry>, crate::error::SolveError> {
    let baseline = crate::solve(problem, opts.clone())?;
    let baseline_score = scorer.score(&baseline);

    let mut entries = Vec::new();
    for transition in problem.net().transitions() {
        let mut rates = problem.rates().clone();
        rates.insert(transition.name.clone(), 0.0);
        let perturbed = problem.with_rates(rates);
        let solution = crate::solve(&perturbed, opts.clone())?;
        let score = scorer.score(&solution);
        entries.push(ImpactEntry::new(transition.name.clone(), score, score - baseline_score));
    }
    entries.sort_by(|a, b| b.impact.abs().partial_cmp(&a.impact.abs()).unwrap());
    Ok(entries)
}

/// As [`rate_impact`], but fans the per-transition simulations out across a
/// `rayon` thread pool. Results are merged by index (via `collect` on an
/// `IndexedParallelIterator`), not arrival order, so the output is
/// identical to the sequential version before the final stable sort.
#[cfg(feature = "parallel")]
pub fn rate_impact_parallel(
    problem: &Problem,
    scorer: &(dyn Scorer + Sync),
    opts: &Options,
) -> Result<Vec<ImpactEntry>, crate::error::SolveError> {
    use rayon::prelude::*;

    let baseline = crate::solve(problem, opts.clone())?;
    let baseline_score = scorer.score(&baseline);

    let transitions: Vec<_> = problem.net().transitions().map(|t| t.name.clone()).collect();
    let mut entries: Vec<ImpactEntry> = transitions
        .par_iter()
        .map(|name| {
            let mut rates = problem.rates().clone();
            rates.insert(name.clone(), 0.0);
            let perturbed = problem.with_rates(rates);
            let solution = crate::solve(&perturbed, opts.clone())?;
            let score = scorer.score(&solution);
            Ok(ImpactEntry::new(name.clone(), score, score - baseline_score))
        })
        .collect::<Result<Vec<_>, crate::error::SolveError>>()?;
    entries.sort_by(|a, b| b.impact.abs().partial_cmp(&a.impact.abs()).unwrap());
    Ok(entries)
}

/// One value tried in a [`sweep`].
#[derive(Clone, Copy, Debug, Constructor)]
pub struct SweepEntry {
    /// The rate value simulated.
    pub value: f64,
    /// The resulting score.
    pub score: f64,
}

/// The result of sweeping one transition's rate across a list of values.
#[derive(Clone, Debug)]
pub struct SweepResult {
    /// One entry per value tried, in the order given.
    pub entries: Vec<SweepEntry>,
    /// The entry with the highest score.
    pub best: SweepEntry,
    /// The entry with the lowest score.
    pub worst: SweepEntry,
}

/// Simulates `problem` once per value in `values`, with `transition`'s rate
/// set to that value, and reports the score at each.
pub fn sweep(
    problem: &Problem,
    transition: &str,
    values: &[f64],
    scorer: &dyn Scorer,
    opts: &Options,
) -> Result<SweepResult, crate::error::SolveError> {
    if problem.net().transition(transition).is_none() {
        return Err(DomainError::UnknownTransition(transition.to_string()).into());
    }
    let mut entries = Vec::with_capacity(values.len());
    for &value in values {
        let mut rates = problem.rates().clone();
        rates.insert(transition.to_string(), value);
        let perturbed = problem.with_rates(rates);
        let solution = crate::solve(&perturbed, opts.clone())?;
        entries.push(SweepEntry::new(value, scorer.score(&solution)));
    }
    let best = *entries.iter().max_by(|a, b| a.score.partial_cmp(&b.score).unwrap()).unwrap();
    let worst = *entries.iter().min_by(|a, b| a.score.partial_cmp(&b.score).unwrap()).unwrap();
    Ok(SweepResult { entries, best, worst })
}

/// Estimates `d(score)/d(rate)` for `transition` by central difference.
///
/// The step defaults to 1% of the transition's current rate, or `0.01` if
/// that rate is zero. The minus branch is clamped at zero (a negative rate
/// is not physically meaningful), which can make the estimate asymmetric
/// near zero; this is documented, deliberate behaviour.
pub fn gradient(
    problem: &Problem,
    transition: &str,
    scorer: &dyn Scorer,
    opts: &Options,
    h: Option<f64>,
) -> Result<f64, crate::error::SolveError> {
    if problem.net().transition(transition).is_none() {
        return Err(DomainError::UnknownTransition(transition.to_string()).into());
    }
    let base_rate = problem.rates().get(transition).copied().unwrap_or(1.0);
    let step = h.unwrap_or(if base_rate == 0.0 { 0.01 } else { 0.01 * base_rate.abs() });

    let plus_rate = base_rate + step;
    let minus_rate = (base_rate - step).max(0.0);

    let mut rates_plus = problem.rates().clone();
    rates_plus.insert(transition.to_string(), plus_rate);
    let mut rates_minus = problem.rates().clone();
    rates_minus.insert(transition.to_string(), minus_rate);

    let solution_plus = crate::solve(&problem.with_rates(rates_plus), opts.clone())?;
    let solution_minus = crate::solve(&problem.with_rates(rates_minus), opts.clone())?;

    let denom = plus_rate - minus_rate;
    Ok((scorer.score(&solution_plus) - scorer.score(&solution_minus)) / denom)
}

/// One cell of a [`grid_search`]: the rate assignment tried and its score.
#[derive(Clone, Debug, Constructor)]
pub struct GridCell {
    /// The rate value assigned to each swept transition, keyed by name.
    pub rates: BTreeMap<String, f64>,
    /// The resulting score.
    pub score: f64,
}

/// The result of a [`grid_search`].
#[derive(Clone, Debug)]
pub struct GridSearchResult {
    /// One cell per combination in the flattened Cartesian product.
    pub cells: Vec<GridCell>,
    /// The index into `cells` with the highest score.
    pub best_index: usize,
}

/// Evaluates `scorer` over every combination in the Cartesian product of
/// `axes` (one `(transition, values)` pair per swept dimension).
///
/// `axes` is sorted lexicographically by transition name before flattening,
/// so that two calls with the same (possibly differently-ordered) axes
/// produce byte-identical `cells` and `best_index`.
pub fn grid_search(
    problem: &Problem,
    axes: &[(String, Vec<f64>)],
    scorer: &dyn Scorer,
    opts: &Options,
) -> Result<GridSearchResult, crate::error::SolveError> {
    let mut sorted_axes = axes.to_vec();
    sorted_axes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut cells = Vec::new();
    if sorted_axes.is_empty() {
        let solution = crate::solve(problem, opts.clone())?;
        cells.push(GridCell::new(BTreeMap::new(), scorer.score(&solution)));
    } else {
        let combos = sorted_axes
            .iter()
            .map(|(_, values)| values.clone())
            .multi_cartesian_product();
        for combo in combos {
            let mut rates = problem.rates().clone();
            let mut assignment = BTreeMap::new();
            for ((name, _), value) in sorted_axes.iter().zip(combo.iter()) {
                rates.insert(name.clone(), *value);
                assignment.insert(name.clone(), *value);
            }
            let perturbed = problem.with_rates(rates);
            let solution = crate::solve(&perturbed, opts.clone())?;
            cells.push(GridCell::new(assignment, scorer.score(&solution)));
        }
    }

    let best_index = cells
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);
    Ok(GridSearchResult { cells, best_index })
}

/// As [`grid_search`], but evaluates every cell across a `rayon` thread
/// pool. Cells are collected by index, so output is identical to the
/// sequential version.
#[cfg(feature = "parallel")]
pub fn grid_search_parallel(
    problem: &Problem,
    axes: &[(String, Vec<f64>)],
    scorer: &(dyn Scorer + Sync),
    opts: &Options,
) -> Result<GridSearchResult, crate::error::SolveError> {
    use rayon::prelude::*;

    let mut sorted_axes = axes.to_vec();
    sorted_axes.sort_by(|a, b| a.0.cmp(&b.0));

    let combos: Vec<Vec<f64>> = if sorted_axes.is_empty() {
        vec![Vec::new()]
    } else {
        sorted_axes.iter().map(|(_, values)| values.clone()).multi_cartesian_product().collect()
    };

    let cells: Vec<GridCell> = combos
        .par_iter()
        .map(|combo| {
            let mut rates = problem.rates().clone();
            let mut assignment = BTreeMap::new();
            for ((name, _), value) in sorted_axes.iter().zip(combo.iter()) {
                rates.insert(name.clone(), *value);
                assignment.insert(name.clone(), *value);
            }
            let perturbed = problem.with_rates(rates);
            let solution = crate::solve(&perturbed, opts.clone())?;
            Ok(GridCell::new(assignment, scorer.score(&solution)))
        })
        .collect::<Result<Vec<_>, crate::error::SolveError>>()?;

    let best_index = cells
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);
    Ok(GridSearchResult { cells, best_index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Arc as NetArc, Net, Place, RateMap, Transition};
    use std::sync::Arc as StdArc;

    fn decay_problem() -> Problem {
        let mut net = Net::new();
        net.add_place(Place::new("A", 100.0)).unwrap();
        net.add_transition(Transition::new("decay")).unwrap();
        net.add_arc(NetArc::new("A", "decay", 1.0)).unwrap();
        let mut rates = RateMap::new();
        rates.insert("decay".to_string(), 0.1);
        Problem::from_net_defaults(StdArc::new(net), (0.0, 10.0), rates).unwrap()
    }

    #[test]
    fn gradient_of_decay_rate_on_remaining_mass_is_negative() {
        let problem = decay_problem();
        let scorer = PlaceScorer::new("A");
        let g = gradient(&problem, "decay", &scorer, &Options::default(), Some(0.01)).unwrap();
        assert!(g < 0.0);
    }

    #[test]
    fn rate_impact_ranks_by_absolute_impact_descending() {
        let mut net = Net::new();
        net.add_place(Place::new("A", 100.0)).unwrap();
        net.add_place(Place::new("B", 100.0)).unwrap();
        net.add_transition(Transition::new("fast")).unwrap();
        net.add_transition(Transition::new("slow")).unwrap();
        net.add_arc(NetArc::new("A", "fast", 1.0)).unwrap();
        net.add_arc(NetArc::new("B", "slow", 1.0)).unwrap();
        let mut rates = RateMap::new();
        rates.insert("fast".to_string(), 1.0);
        rates.insert("slow".to_string(), 0.01);
        let problem = Problem::from_net_defaults(StdArc::new(net), (0.0, 10.0), rates).unwrap();

        let entries = rate_impact(&problem, &PlaceScorer::new("A"), &Options::default()).unwrap();
        assert_eq!(entries[0].transition, "fast");
    }

    #[test]
    fn grid_search_is_deterministic_across_axis_orderings() {
        let problem = decay_problem();
        let scorer = PlaceScorer::new("A");
        let axes_a =
            vec![("decay".to_string(), vec![0.05, 0.1, 0.2])];
        let result_a = grid_search(&problem, &axes_a, &scorer, &Options::default()).unwrap();
        let result_b = grid_search(&problem, &axes_a, &scorer, &Options::default()).unwrap();
        assert_eq!(result_a.best_index, result_b.best_index);
        let scores_a: Vec<f64> = result_a.cells.iter().map(|c| c.score).collect();
        let scores_b: Vec<f64> = result_b.cells.iter().map(|c| c.score).collect();
        assert_eq!(scores_a, scores_b);
    }

    #[test]
    fn sweep_rejects_unknown_transition() {
        let problem = decay_problem();
        let result =
            sweep(&problem, "nonexistent", &[0.1, 0.2], &PlaceScorer::new("A"), &Options::default());
        assert!(result.is_err());
    }
}
