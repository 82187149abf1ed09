//! Error taxonomy.
//!
//! Each failure surface gets its own `thiserror`-derived enum rather than one
//! catch-all error type, so a caller can match on exactly the failure modes
//! relevant to the operation it called.

use thiserror::Error;

/// A malformed net, detected at construction time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StructureError {
    /// Two places were added with the same name.
    #[error("duplicate place name `{0}`")]
    DuplicatePlace(String),

    /// Two transitions were added with the same name.
    #[error("duplicate transition name `{0}`")]
    DuplicateTransition(String),

    /// An arc referenced a source or target that is not a place or transition
    /// in the net.
    #[error("arc references unknown endpoint `{0}`")]
    UnknownEndpoint(String),

    /// An arc connected two places, two transitions, rather than a
    /// place and a transition.
    #[error("arc must connect a place and a transition, got `{0}` -> `{1}`")]
    InvalidArcDirection(String, String),

    /// An arc's weight was not strictly positive.
    #[error("arc weight must be strictly positive, got {0}")]
    NonPositiveWeight(f64),

    /// A place's capacity is smaller than its initial token count.
    #[error("place `{place}` capacity {capacity} is less than its initial tokens {initial}")]
    CapacityViolated {
        /// The offending place.
        place: String,
        /// The configured capacity.
        capacity: f64,
        /// The initial token count, which exceeds `capacity`.
        initial: f64,
    },
}

/// An invalid argument at a public API boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// The requested time span was empty or inverted.
    #[error("end time {t1} must be greater than start time {t0}")]
    InvalidTimeSpan {
        /// The requested start time.
        t0: f64,
        /// The requested end time, which did not exceed `t0`.
        t1: f64,
    },

    /// A marking or rate override named a place that does not exist.
    #[error("unknown place `{0}`")]
    UnknownPlace(String),

    /// A rate override named a transition that does not exist.
    #[error("unknown transition `{0}`")]
    UnknownTransition(String),

    /// A dataset's observation series did not match its time grid in length.
    #[error(
        "dataset observations for place `{place}` have length {got}, expected {expected} to match the time grid"
    )]
    DatasetLengthMismatch {
        /// The place whose observation series is mismatched.
        place: String,
        /// The length the observation series was expected to have.
        expected: usize,
        /// The length it actually had.
        got: usize,
    },

    /// A dataset's observation times were not strictly increasing.
    #[error("dataset times must be strictly increasing")]
    NonMonotonicTimes,

    /// A flat parameter vector did not match the length a `RateFunc` or
    /// `LearnableProblem` expected.
    #[error("parameter vector length mismatch: expected {expected}, got {got}")]
    ParamLengthMismatch {
        /// The expected parameter count.
        expected: usize,
        /// The parameter count actually supplied.
        got: usize,
    },

    /// A `LearnableProblem` was built without a `RateFunc` for one of the
    /// net's transitions.
    #[error("transition `{0}` has no registered rate function")]
    MissingRateFunc(String),
}

/// A failure while integrating the ODE system.
///
/// The solver never aborts the host process on these; they surface through a
/// [`Solution`](crate::solver::Solution)'s diagnostic field instead, and are
/// only returned directly from APIs (like constructing a `Problem`) that fail
/// synchronously before any integration has happened.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    /// A domain error at problem construction time.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The right-hand side produced a NaN or infinite value.
    #[error("non-finite value encountered in the right-hand side at t={t}")]
    NonFinite {
        /// The time at which the non-finite value was produced.
        t: f64,
    },

    /// The adaptive step size shrank below `dt_min` while trying to satisfy
    /// the error tolerance.
    #[error("step size shrank below dt_min ({dt_min}) while integrating at t={t}")]
    StepTooSmall {
        /// The configured minimum step size.
        dt_min: f64,
        /// The time at which the step size underflowed.
        t: f64,
    },

    /// The solver exhausted its step budget (`max_iters`) before reaching
    /// the end of the time span.
    #[error("exceeded the maximum iteration budget ({0})")]
    BudgetExceeded(usize),
}

/// A user-supplied [`Rule`](crate::engine::Rule) action reported failure.
///
/// The streaming engine logs this (via `tracing::error!`) and keeps running;
/// it is never propagated out of the engine's background worker.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("rule `{rule}` action failed: {message}")]
pub struct RuleActionError {
    /// The name of the rule whose action failed.
    pub rule: String,
    /// A human-readable description of the failure.
    pub message: String,
}
