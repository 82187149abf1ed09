//! The Tsit5 Butcher tableau and a single adaptive step.
//!
//! Coefficients are the published Tsitouras (2011) 5(4) pair — the same
//! constants used by most ODE libraries that offer a "Tsit5" method.

use nalgebra::DVector;

use crate::ode::OdeSystem;

const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.980_025_540_904_509_7;

const A21: f64 = 0.161;
const A31: f64 = -0.008_480_655_492_356_989;
const A32: f64 = 0.335_480_655_492_357;
const A41: f64 = 2.897_153_057_105_493_5;
const A42: f64 = -6.359_448_489_975_075;
const A43: f64 = 4.362_295_432_869_581_5;
const A51: f64 = 5.325_864_828_439_257;
const A52: f64 = -11.748_883_564_062_828;
const A53: f64 = 7.495_539_342_889_836_5;
const A54: f64 = -0.092_495_066_361_755_25;
const A61: f64 = 5.861_455_442_946_42;
const A62: f64 = -12.920_969_317_847_11;
const A63: f64 = 8.159_367_898_576_159;
const A64: f64 = -0.071_584_973_281_401;
const A65: f64 = -0.028_269_050_394_068_383;
const A71: f64 = 0.096_460_766_818_065_23;
const A72: f64 = 0.01;
const A73: f64 = 0.479_889_650_414_499_6;
const A74: f64 = 1.379_008_574_103_742;
const A75: f64 = -3.290_069_515_436_081;
const A76: f64 = 2.324_710_524_099_774;

// b7 = 0, and b_i = a7i for i = 1..6 (FSAL property).
const B1: f64 = A71;
const B2: f64 = A72;
const B3: f64 = A73;
const B4: f64 = A74;
const B5: f64 = A75;
const B6: f64 = A76;

// b_i - bhat_i, the embedded 4th-order error estimate weights.
const E1: f64 = -0.001_780_011_052_225_77;
const E2: f64 = -0.000_816_434_459_656_7;
const E3: f64 = 0.007_880_878_010_261_995;
const E4: f64 = -0.144_711_007_173_262_9;
const E5: f64 = 0.582_357_165_452_555_2;
const E6: f64 = -0.458_082_105_929_186_97;
const E7: f64 = 0.015_151_515_151_515_152;

/// The order of the Tsit5 method's leading (5th-order) solution. Used by the
/// PI step controller's exponents.
pub(crate) const ORDER: f64 = 5.0;

/// The outcome of attempting one adaptive Tsit5 step from `(t, y)` with
/// step size `h`.
pub(crate) struct StepAttempt {
    /// The proposed new state at `t + h`.
    pub y_new: DVector<f64>,
    /// The weighted RMS error norm; the step is accepted iff this is `<= 1`.
    pub err_norm: f64,
    /// `f(y_new)`, reused as the first stage of the next step (FSAL).
    pub k7: DVector<f64>,
}

/// Attempts one Tsit5 step. `k1` must equal `f(y)`; callers reuse the
/// previous step's `k7` here when the previous step was accepted and no
/// intervening callback mutated the state (the FSAL property), otherwise
/// they must recompute it.
pub(crate) fn step<Sys: OdeSystem>(
    sys: &Sys,
    y: &DVector<f64>,
    k1: &DVector<f64>,
    h: f64,
    atol: f64,
    rtol: f64,
) -> StepAttempt {
    let dim = sys.dim();
    let mut scratch = DVector::zeros(dim);

    scratch.copy_from(&(y + k1 * (h * A21)));
    let k2 = sys.eval(&scratch);

    scratch.copy_from(&(y + k1 * (h * A31) + &k2 * (h * A32)));
    let k3 = sys.eval(&scratch);

    scratch.copy_from(&(y + k1 * (h * A41) + &k2 * (h * A42) + &k3 * (h * A43)));
    let k4 = sys.eval(&scratch);

    scratch.copy_from(
        &(y + k1 * (h * A51) + &k2 * (h * A52) + &k3 * (h * A53) + &k4 * (h * A54)),
    );
    let k5 = sys.eval(&scratch);

    scratch.copy_from(
        &(y + k1 * (h * A61)
            + &k2 * (h * A62)
            + &k3 * (h * A63)
            + &k4 * (h * A64)
            + &k5 * (h * A65)),
    );
    let k6 = sys.eval(&scratch);

    let y_new = y
        + k1 * (h * B1)
        + &k2 * (h * B2)
        + &k3 * (h * B3)
        + &k4 * (h * B4)
        + &k5 * (h * B5)
        + &k6 * (h * B6);
    let k7 = sys.eval(&y_new);

    let err = k1 * (h * E1)
        + &k2 * (h * E2)
        + &k3 * (h * E3)
        + &k4 * (h * E4)
        + &k5 * (h * E5)
        + &k6 * (h * E6)
        + &k7 * (h * E7);

    let mut sum_sq = 0.0;
    for i in 0..dim {
        let w = atol + rtol * y[i].abs().max(y_new[i].abs());
        let scaled = err[i] / w;
        sum_sq += scaled * scaled;
    }
    let err_norm = (sum_sq / dim as f64).sqrt();

    StepAttempt { y_new, err_norm, k7 }
}

/// Estimates the state at the midpoint of a step via an auxiliary classical
/// RK4 half-step, reusing `f0` as that half-step's first stage. Independent
/// of the Tsit5 pair's own stages, so it costs three extra right-hand-side
/// evaluations; [`hermite_interpolate`] calls this lazily, only for steps a
/// dense-output query actually falls inside.
pub(crate) fn midpoint_estimate<Sys: OdeSystem>(
    sys: &Sys,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    h: f64,
) -> DVector<f64> {
    let hh = h / 2.0;
    let k2 = sys.eval(&(y0 * 1.0 + f0 * (hh / 2.0)));
    let k3 = sys.eval(&(y0 * 1.0 + &k2 * (hh / 2.0)));
    let k4 = sys.eval(&(y0 * 1.0 + &k3 * hh));
    y0 * 1.0
        + f0 * (hh / 6.0)
        + &k2 * (2.0 * hh / 6.0)
        + &k3 * (2.0 * hh / 6.0)
        + &k4 * (hh / 6.0)
}

/// Coefficients for a quartic Hermite-type interpolant between two accepted
/// steps, matching the state and derivative at both endpoints plus the
/// state at the step's midpoint (from [`midpoint_estimate`]). This is what
/// this crate calls its "dense interpolant": quartic rather than cubic in
/// `theta`, so between-sample output matches the leading solution's order.
pub(crate) fn hermite_interpolate(
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    y1: &DVector<f64>,
    f1: &DVector<f64>,
    y_mid: &DVector<f64>,
    h: f64,
    theta: f64,
) -> DVector<f64> {
    // Solve P(0)=y0, P'(0)=h f0, P(1)=y1, P'(1)=h f1, P(1/2)=y_mid for the
    // quartic P(theta) = y0 + h f0 theta + a2 theta^2 + a3 theta^3 + a4 theta^4.
    let d1 = y1 * 1.0 + y0 * -1.0 + f0 * (-h);
    let d2 = f1 * h + f0 * (-h);
    let d3 = y_mid * 16.0 + y0 * -16.0 + f0 * (-8.0 * h);

    let a2 = &d2 * 1.0 + &d3 * 1.0 + &d1 * -5.0;
    let a3 = &d1 * 14.0 + &d2 * -3.0 + &d3 * -2.0;
    let a4 = &d1 * -8.0 + &d2 * 2.0 + &d3 * 1.0;

    y0 * 1.0 + f0 * (h * theta) + &a2 * theta.powi(2) + &a3 * theta.powi(3) + a4 * theta.powi(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ode::OdeSystem;

    struct Exponential {
        rate: f64,
    }

    impl OdeSystem for Exponential {
        fn dim(&self) -> usize {
            1
        }

        fn rhs(&self, dy: &mut DVector<f64>, y: &DVector<f64>) {
            dy[0] = -self.rate * y[0];
        }
    }

    #[test]
    fn single_step_matches_exponential_decay_closely() {
        let sys = Exponential { rate: 1.0 };
        let y0 = DVector::from_vec(vec![1.0]);
        let k1 = sys.eval(&y0);
        let attempt = step(&sys, &y0, &k1, 0.1, 1e-9, 1e-9);
        let expected = (-0.1_f64).exp();
        assert!((attempt.y_new[0] - expected).abs() < 1e-8);
    }

    #[test]
    fn hermite_interpolate_reproduces_endpoints() {
        let y0 = DVector::from_vec(vec![1.0]);
        let y1 = DVector::from_vec(vec![2.0]);
        let f0 = DVector::from_vec(vec![0.5]);
        let f1 = DVector::from_vec(vec![0.25]);
        let y_mid = DVector::from_vec(vec![1.4]);
        let at_start = hermite_interpolate(&y0, &f0, &y1, &f1, &y_mid, 1.0, 0.0);
        let at_end = hermite_interpolate(&y0, &f0, &y1, &f1, &y_mid, 1.0, 1.0);
        assert!((at_start[0] - 1.0).abs() < 1e-12);
        assert!((at_end[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn hermite_interpolate_reproduces_midpoint() {
        let y0 = DVector::from_vec(vec![1.0]);
        let y1 = DVector::from_vec(vec![2.0]);
        let f0 = DVector::from_vec(vec![0.5]);
        let f1 = DVector::from_vec(vec![0.25]);
        let y_mid = DVector::from_vec(vec![1.4]);
        let at_mid = hermite_interpolate(&y0, &f0, &y1, &f1, &y_mid, 1.0, 0.5);
        assert!((at_mid[0] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn midpoint_estimate_matches_exponential_decay_closely() {
        let sys = Exponential { rate: 1.0 };
        let y0 = DVector::from_vec(vec![1.0]);
        let f0 = sys.eval(&y0);
        let mid = midpoint_estimate(&sys, &y0, &f0, 0.2);
        let expected = (-0.1_f64).exp();
        assert!((mid[0] - expected).abs() < 1e-6);
    }
}
