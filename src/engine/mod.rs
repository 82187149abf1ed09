//! The long-running, rule-driven streaming simulation engine.
//!
//! A single background worker owns the engine's mutable marking; every
//! public accessor takes the same engine-level lock, and rule callbacks run
//! while that lock is held. The worker is a plain OS thread rather than an
//! async task, so it uses the synchronous `parking_lot::Mutex`/`Condvar`
//! pair instead of an async-runtime mutex.

use std::sync::Arc as StdArc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use derivative::Derivative;
use parking_lot::{Condvar, Mutex};
use tracing::{error, info};

use crate::error::RuleActionError;
use crate::net::{Marking, Net, RateMap};
use crate::ode::Problem;
use crate::solver::{Callback, Options};

/// A predicate over a [`Marking`], used as a rule's trigger condition.
pub type Condition = Box<dyn Fn(&Marking) -> bool + Send + Sync>;

/// A rule's side effect, run when its condition holds. Receives a mutable
/// view of the engine's marking so it can, for example, top up a place; most
/// actions only read.
pub type Action = Box<dyn FnMut(&mut Marking) -> Result<(), RuleActionError> + Send>;

/// `threshold_exceeded(place, value)`: true once `marking[place] > value`.
pub fn threshold_exceeded(place: impl Into<String>, value: f64) -> Condition {
    let place = place.into();
    Box::new(move |m: &Marking| m.get(&place).copied().unwrap_or(0.0) > value)
}

/// `threshold_below(place, value)`: true once `marking[place] < value`.
pub fn threshold_below(place: impl Into<String>, value: f64) -> Condition {
    let place = place.into();
    Box::new(move |m: &Marking| m.get(&place).copied().unwrap_or(0.0) < value)
}

/// A condition that holds iff every one of `conditions` holds.
pub fn all_of(conditions: Vec<Condition>) -> Condition {
    Box::new(move |m: &Marking| conditions.iter().all(|c| c(m)))
}

/// A condition that holds iff any one of `conditions` holds.
pub fn any_of(conditions: Vec<Condition>) -> Condition {
    Box::new(move |m: &Marking| conditions.iter().any(|c| c(m)))
}

/// A condition-action pair evaluated once per engine tick.
///
/// `condition` and `action` are trait objects with no `Debug` impl of their
/// own, so `Debug` is derived field-by-field via `derivative`: the closures
/// print as a fixed placeholder instead of being skipped, so a rule still
/// shows up in a derived `Debug` of whatever container holds it.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Rule {
    name: String,
    enabled: bool,
    #[derivative(Debug = "ignore")]
    condition: Condition,
    #[derivative(Debug = "ignore")]
    action: Action,
}

impl Rule {
    /// Creates an enabled rule.
    pub fn new(name: impl Into<String>, condition: Condition, action: Action) -> Self {
        Rule { name: name.into(), enabled: true, condition, action }
    }

    /// Sets whether the rule is enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The rule's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A cooperative cancellation signal shared between a caller and the
/// engine's background worker.
///
/// Observed at each loop iteration: the worker wakes from its `interval`
/// sleep immediately when cancelled, rather than waiting out the full
/// interval.
#[derive(Clone)]
pub struct CancelToken {
    state: StdArc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        CancelToken { state: StdArc::new((Mutex::new(false), Condvar::new())) }
    }

    /// Signals cancellation, waking any thread sleeping on this token.
    pub fn cancel(&self) {
        let mut cancelled = self.state.0.lock();
        *cancelled = true;
        self.state.1.notify_all();
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.state.0.lock()
    }

    /// Sleeps up to `timeout`, returning early if cancelled. Returns `true`
    /// if the token was cancelled (whether before the call or during the
    /// wait), `false` if the timeout elapsed first.
    fn sleep(&self, timeout: Duration) -> bool {
        let mut cancelled = self.state.0.lock();
        if *cancelled {
            return true;
        }
        self.state.1.wait_for(&mut cancelled, timeout);
        *cancelled
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    marking: Marking,
    rates: RateMap,
    rules: Vec<Rule>,
}

/// The streaming simulation engine: a net, a mutable marking guarded by a
/// single mutex, a rate map, and an ordered list of rules.
///
/// All read/write accessors acquire the engine-level lock, so the marking
/// has a single mutation point no matter which thread is calling in. The
/// net itself is treated as read-only for the engine's lifetime.
pub struct Engine {
    net: StdArc<Net>,
    inner: Mutex<Inner>,
    running: AtomicBool,
}

impl Engine {
    /// Creates an engine over `net`, starting from `initial` and `rates`.
    pub fn new(net: StdArc<Net>, initial: Marking, rates: RateMap) -> Self {
        Engine {
            net,
            inner: Mutex::new(Inner { marking: initial, rates, rules: Vec::new() }),
            running: AtomicBool::new(false),
        }
    }

    /// Creates an engine using the net's own declared initial marking and an
    /// empty (all-default) rate map.
    pub fn from_net_defaults(net: StdArc<Net>) -> Self {
        let initial = net.initial_marking();
        Engine::new(net, initial, RateMap::new())
    }

    /// Appends a rule. Rules fire in the order they were added.
    pub fn add_rule(&self, rule: Rule) {
        self.inner.lock().rules.push(rule);
    }

    /// A defensive copy of the current marking. Mutating the returned map
    /// never affects the engine.
    pub fn get_state(&self) -> Marking {
        self.inner.lock().marking.clone()
    }

    /// Atomically replaces the current marking.
    pub fn set_state(&self, marking: Marking) {
        self.inner.lock().marking = marking;
    }

    /// Merges `partial` into the engine's rate map, overriding any
    /// transitions it names and leaving the rest untouched.
    pub fn update_rates(&self, partial: RateMap) {
        self.inner.lock().rates.extend(partial);
    }

    /// Whether the background worker loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Advances the marking by one short-span integration and runs every
    /// enabled rule, in insertion order, against the result. Runs while
    /// holding the engine lock, so rule callbacks must be short and must
    /// not call back into the engine.
    fn advance_and_check_rules(&self, step: f64, solver_opts: &Options) {
        let mut inner = self.inner.lock();

        let problem = match Problem::new(
            StdArc::clone(&self.net),
            inner.marking.clone(),
            (0.0, step),
            inner.rates.clone(),
        ) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "engine failed to build a step problem");
                return;
            }
        };
        let solution = match crate::solve(&problem, solver_opts.clone()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "engine step failed to solve");
                return;
            }
        };
        inner.marking = solution.final_state().clone();

        let Inner { marking, rules, .. } = &mut *inner;
        for rule in rules.iter_mut().filter(|r| r.enabled) {
            if (rule.condition)(marking) {
                if let Err(e) = (rule.action)(marking) {
                    error!(rule = rule.name.as_str(), error = %e, "rule action failed");
                }
            }
        }
    }

    /// Batch mode: integrates the engine's current marking and rates over
    /// `[0, duration]` in one solver call, optionally firing `periodic` as
    /// the solver's callback. Does not mutate the engine's own state; it
    /// reads a consistent snapshot under the lock and returns an independent
    /// trajectory (see DESIGN.md for why batch mode is read-only).
    pub fn simulate(
        &self,
        duration: f64,
        periodic: Option<Box<dyn Callback>>,
        mut opts: Options,
    ) -> Result<crate::Solution, crate::SolveError> {
        let (marking, rates) = {
            let inner = self.inner.lock();
            (inner.marking.clone(), inner.rates.clone())
        };
        if let Some(cb) = periodic {
            opts.callbacks.push(cb);
        }
        let problem = Problem::new(StdArc::clone(&self.net), marking, (0.0, duration), rates)?;
        crate::solve(&problem, opts)
    }

    /// Streaming mode: spawns a background worker thread that repeatedly
    /// advances the marking by `step`, checks rules, and sleeps `interval`,
    /// until `cancel` is signalled. Returns the worker's `JoinHandle`.
    pub fn run(
        self: &StdArc<Self>,
        cancel: CancelToken,
        interval: Duration,
        step: f64,
    ) -> JoinHandle<()> {
        let engine = StdArc::clone(self);
        engine.running.store(true, Ordering::SeqCst);
        let solver_opts = Options::default().with_dt(step);
        thread::spawn(move || {
            info!("streaming engine worker started");
            while !cancel.is_cancelled() {
                engine.advance_and_check_rules(step, &solver_opts);
                if cancel.sleep(interval) {
                    break;
                }
            }
            engine.running.store(false, Ordering::SeqCst);
            info!("streaming engine worker stopped");
        })
    }
}
