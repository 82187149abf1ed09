//! The derivative-free Nelder-Mead simplex optimizer that drives parameter
//! fitting in [`crate::learn`].
//!
//! Implements the standard reflect/expand/contract/shrink algorithm, with
//! convergence and iteration-budget knobs collected into a builder-style
//! options struct, the same shape used by [`crate::solver::Options`].

/// Convergence and iteration-budget options for [`minimize`].
#[derive(Clone, Debug)]
pub struct NelderMeadOptions {
    /// Hard cap on the number of simplex iterations.
    pub max_iters: usize,
    /// Stop once the standard deviation of the simplex's vertex values
    /// falls below this, or once the best value hasn't improved by more
    /// than this for `no_improve_streak` consecutive iterations.
    pub tolerance: f64,
    /// How many consecutive non-improving iterations trigger early stop.
    pub no_improve_streak: usize,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        NelderMeadOptions { max_iters: 1000, tolerance: 1e-8, no_improve_streak: 10 }
    }
}

/// The outcome of a [`minimize`] run.
#[derive(Clone, Debug)]
pub struct NelderMeadResult {
    /// The best parameter vector found.
    pub best_params: Vec<f64>,
    /// The objective value at `best_params`.
    pub best_value: f64,
    /// The number of iterations run.
    pub iterations: usize,
    /// The best-so-far objective value after each iteration.
    pub history: Vec<f64>,
}

fn lerp(from: &[f64], to: &[f64], t: f64) -> Vec<f64> {
    from.iter().zip(to).map(|(a, b)| a + t * (b - a)).collect()
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Minimises `f` starting from `x0` using Nelder-Mead simplex search.
///
/// Builds an `(n+1)`-vertex simplex by perturbing each component of `x0` by
/// 5% (or a fixed 0.00025 step for components that start at exactly zero),
/// then repeatedly reflects, expands, contracts, or shrinks the simplex per
/// the standard algorithm (reflection α=1, expansion γ=2, contraction
/// ρ=0.5, shrink σ=0.5) until the iteration budget is spent, the simplex's
/// vertex values flatten out, or the best value stalls.
pub fn minimize(
    x0: Vec<f64>,
    opts: NelderMeadOptions,
    mut f: impl FnMut(&[f64]) -> f64,
) -> NelderMeadResult {
    let n = x0.len();
    assert!(n > 0, "Nelder-Mead requires a non-empty parameter vector");

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.clone());
    for i in 0..n {
        let mut v = x0.clone();
        v[i] += if v[i].abs() > f64::EPSILON { 0.05 * v[i] } else { 0.00025 };
        simplex.push(v);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| f(v)).collect();

    let mut history = Vec::new();
    let mut iterations = 0usize;
    let mut prev_best = f64::INFINITY;
    let mut stall_streak = 0usize;

    loop {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap());
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        history.push(values[0]);

        if iterations >= opts.max_iters {
            break;
        }
        let (_, std_dev) = mean_std(&values);
        if std_dev < opts.tolerance {
            break;
        }
        if prev_best - values[0] > opts.tolerance {
            stall_streak = 0;
        } else {
            stall_streak += 1;
        }
        prev_best = values[0];
        if stall_streak >= opts.no_improve_streak {
            break;
        }

        let worst = simplex[n].clone();
        let centroid: Vec<f64> = (0..x0.len())
            .map(|i| simplex[..n].iter().map(|v| v[i]).sum::<f64>() / n as f64)
            .collect();

        let reflected = lerp(&worst, &centroid, 2.0);
        let f_reflected = f(&reflected);

        if f_reflected < values[0] {
            let expanded = lerp(&worst, &centroid, 3.0);
            let f_expanded = f(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
        } else if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
        } else {
            let contracted = lerp(&worst, &centroid, 0.5);
            let f_contracted = f(&contracted);
            if f_contracted < values[n] {
                simplex[n] = contracted;
                values[n] = f_contracted;
            } else {
                for i in 1..=n {
                    simplex[i] = lerp(&simplex[0], &simplex[i], 0.5);
                    values[i] = f(&simplex[i]);
                }
            }
        }

        iterations += 1;
    }

    NelderMeadResult {
        best_params: simplex[0].clone(),
        best_value: values[0],
        iterations,
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimizes_sphere_function() {
        let result =
            minimize(vec![5.0, -3.0], NelderMeadOptions::default(), |p| p[0] * p[0] + p[1] * p[1]);
        assert!(result.best_value < 1e-4);
        assert!(result.best_params[0].abs() < 0.1);
        assert!(result.best_params[1].abs() < 0.1);
    }

    #[test]
    fn minimizes_from_zero_initial_guess() {
        let result = minimize(vec![0.0], NelderMeadOptions::default(), |p| (p[0] - 2.0).powi(2));
        assert!((result.best_params[0] - 2.0).abs() < 0.05);
    }

    #[test]
    fn history_is_monotonically_nonincreasing() {
        let result =
            minimize(vec![10.0, 10.0], NelderMeadOptions::default(), |p| p[0] * p[0] + p[1] * p[1]);
        assert!(result.history.windows(2).all(|w| w[1] <= w[0] + 1e-12));
    }
}
