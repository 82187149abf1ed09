//! Callbacks invoked by the solver after each accepted step.

use nalgebra::DVector;

/// Fires after every accepted integration step.
///
/// Lets a callback mutate the state in place, which the state-modification
/// built-in needs to implement dosing and similar discrete interventions.
///
/// `Send + Sync` supertraits (mirroring [`crate::sensitivity::Scorer`])
/// mean a boxed callback can sit inside an [`super::Options`] that is
/// itself moved into the streaming engine's worker thread or shared by
/// reference across the sensitivity layer's parallel workers.
pub trait Callback: Send + Sync {
    /// Called with the accepted step's time, state (mutable), and step
    /// size. Return `true` if the state was modified, so the solver knows
    /// to re-evaluate the right-hand side before continuing (the FSAL
    /// optimisation is otherwise invalid).
    fn on_accepted_step(&mut self, t: f64, y: &mut DVector<f64>, dt: f64) -> bool;
}

/// Invokes a user closure every time `t` crosses a multiple of `period`,
/// passing a read-only view of the state. Never mutates the state.
pub struct PeriodicCallback<F> {
    period: f64,
    next_fire: f64,
    action: F,
}

impl<F> PeriodicCallback<F>
where
    F: FnMut(f64, &DVector<f64>),
{
    /// Creates a periodic callback that first fires at `t0 + period`.
    pub fn new(t0: f64, period: f64, action: F) -> Self {
        PeriodicCallback { period, next_fire: t0 + period, action }
    }
}

impl<F> Callback for PeriodicCallback<F>
where
    F: FnMut(f64, &DVector<f64>) + Send + Sync,
{
    fn on_accepted_step(&mut self, t: f64, y: &mut DVector<f64>, _dt: f64) -> bool {
        while t >= self.next_fire {
            (self.action)(t, y);
            self.next_fire += self.period;
        }
        false
    }
}

/// Invokes a user closure that may mutate the state after each accepted
/// step. The solver re-evaluates the right-hand side at the new state
/// before taking its next step.
pub struct StateModCallback<F> {
    action: F,
}

impl<F> StateModCallback<F>
where
    F: FnMut(f64, &mut DVector<f64>),
{
    /// Creates a state-modification callback.
    pub fn new(action: F) -> Self {
        StateModCallback { action }
    }
}

impl<F> Callback for StateModCallback<F>
where
    F: FnMut(f64, &mut DVector<f64>) + Send + Sync,
{
    fn on_accepted_step(&mut self, t: f64, y: &mut DVector<f64>, _dt: f64) -> bool {
        (self.action)(t, y);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_callback_fires_at_multiples() {
        let mut count = 0;
        let mut cb = PeriodicCallback::new(0.0, 1.0, |_t, _y| count += 1);
        let mut y = DVector::from_vec(vec![0.0]);
        assert!(!cb.on_accepted_step(0.5, &mut y, 0.5));
        assert_eq!(count, 0);
        assert!(!cb.on_accepted_step(1.2, &mut y, 0.7));
        assert_eq!(count, 1);
    }

    #[test]
    fn state_mod_callback_reports_mutation() {
        let mut cb = StateModCallback::new(|_t, y: &mut DVector<f64>| y[0] = 42.0);
        let mut y = DVector::from_vec(vec![0.0]);
        assert!(cb.on_accepted_step(1.0, &mut y, 0.1));
        assert_eq!(y[0], 42.0);
    }
}
