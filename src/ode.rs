//! Translation of a [`Net`] plus a rate map into an autonomous ODE
//! right-hand side, and the one-shot [`Problem`] that bundles them with an
//! initial marking and a time span.
//!
//! The flux through each transition follows the standard mass-action
//! formula: the product of its input places' concentrations, each raised to
//! its arc weight, times the transition's rate.

use std::sync::Arc as StdArc;

use nalgebra::DVector;
use num_traits::Zero;

use crate::error::DomainError;
use crate::net::{Marking, Net, RateMap};

/// A system of autonomous first-order ODEs: `dy/dt = f(y)`.
///
/// Has no explicit time argument because every system this crate solves is
/// time-invariant.
pub trait OdeSystem {
    /// The number of state variables.
    fn dim(&self) -> usize;

    /// Writes `f(y)` into `dy`. Implementations must not allocate on this
    /// path; it runs once per solver stage.
    fn rhs(&self, dy: &mut DVector<f64>, y: &DVector<f64>);

    /// Convenience wrapper around [`OdeSystem::rhs`] that allocates its own
    /// output vector. Used outside the solver's hot loop (equilibrium
    /// detection, sensitivity gradients).
    fn eval(&self, y: &DVector<f64>) -> DVector<f64> {
        let mut dy = DVector::zeros(self.dim());
        self.rhs(&mut dy, y);
        dy
    }
}

/// The mass-action right-hand side for a frozen net and a dense rate vector.
///
/// `flux(t) = rate[t] * product over input places p of max(y[p], 0)^weight`.
/// Negative markings are clamped to zero inside flux evaluation only, per
/// the documented source behaviour; the integrated state itself is never
/// clamped.
pub(crate) struct MassActionSystem {
    incidence: crate::net::Incidence,
    rates: Vec<f64>,
}

impl MassActionSystem {
    pub(crate) fn new(incidence: crate::net::Incidence, rates: Vec<f64>) -> Self {
        MassActionSystem { incidence, rates }
    }

    fn flux(&self, y: &DVector<f64>) -> Vec<f64> {
        self.incidence
            .transition_inputs
            .iter()
            .enumerate()
            .map(|(t, inputs)| {
                let mut f = self.rates[t];
                for &(p, w) in inputs {
                    let m = y[p].max(0.0);
                    f *= m.powf(w);
                }
                f
            })
            .collect()
    }
}

impl OdeSystem for MassActionSystem {
    fn dim(&self) -> usize {
        self.incidence.num_places()
    }

    fn rhs(&self, dy: &mut DVector<f64>, y: &DVector<f64>) {
        dy.fill(f64::zero());
        let flux = self.flux(y);
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

/// A one-shot simulation problem: an immutable net, an initial marking, a
/// time span, and a rate map. The solver never mutates a `Problem`.
#[derive(Clone)]
pub struct Problem {
    net: StdArc<Net>,
    initial: Marking,
    t0: f64,
    t1: f64,
    rates: RateMap,
}

impl Problem {
    /// Builds a problem, validating the time span and that the marking and
    /// rate map only reference places/transitions that exist in `net`.
    pub fn new(
        net: StdArc<Net>,
        initial: Marking,
        t_span: (f64, f64),
        rates: RateMap,
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
        for name in rates.keys() {
            if net.transition(name).is_none() {
                return Err(DomainError::UnknownTransition(name.clone()));
            }
        }
        Ok(Problem { net, initial, t0, t1, rates })
    }

    /// Builds a problem using the net's own declared initial marking.
    pub fn from_net_defaults(
        net: StdArc<Net>,
        t_span: (f64, f64),
        rates: RateMap,
    ) -> Result<Self, DomainError> {
        let initial = net.initial_marking();
        Self::new(net, initial, t_span, rates)
    }

    /// The underlying net.
    pub fn net(&self) -> &Net {
        &self.net
    }

    /// A clone of the underlying net handle, for callers that need their own
    /// `Arc`.
    pub fn net_handle(&self) -> StdArc<Net> {
        StdArc::clone(&self.net)
    }

    /// The initial marking.
    pub fn initial(&self) -> &Marking {
        &self.initial
    }

    /// The time span `(t0, t1)`.
    pub fn t_span(&self) -> (f64, f64) {
        (self.t0, self.t1)
    }

    /// The rate map.
    pub fn rates(&self) -> &RateMap {
        &self.rates
    }

    /// Replaces the rate map, returning a new problem (the original is
    /// untouched). Used by the sensitivity layer to run perturbed variants
    /// without mutating the base problem.
    pub fn with_rates(&self, rates: RateMap) -> Self {
        Problem {
            net: StdArc::clone(&self.net),
            initial: self.initial.clone(),
            t0: self.t0,
            t1: self.t1,
            rates,
        }
    }

    pub(crate) fn build_system(&self) -> (MassActionSystem, DVector<f64>) {
        let incidence = self.net.freeze();
        let dense_rates = incidence.dense_rates(&self.rates);
        let y0 = incidence.dense_marking(&self.initial);
        (MassActionSystem::new(incidence, dense_rates), y0)
    }

    pub(crate) fn incidence(&self) -> crate::net::Incidence {
        self.net.freeze()
    }
}
