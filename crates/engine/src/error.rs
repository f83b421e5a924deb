//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;

use crate::models::Event;

/// Structural problems found while validating a graph at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A relation, marking component or nesting references an undeclared event.
    #[error("{field} references unknown event '{event}'")]
    UnknownEvent {
        event: Event,
        field: &'static str,
    },

    /// An event is listed as the child of two different nestings.
    #[error("event '{child}' is nested under both '{first}' and '{second}'")]
    MultipleParents {
        child: Event,
        first: Event,
        second: Event,
    },

    /// `nestingsMap` disagrees with `nestings` for this child.
    #[error("nestingsMap entry for '{child}' does not match nestings")]
    InconsistentNestingMap { child: Event },

    /// Following parent links from this event leads back to itself.
    #[error("nesting hierarchy contains a cycle through '{0}'")]
    NestingCycle(Event),
}

/// Rejections reported by firing and time-step operations.
///
/// None of these are fatal: whenever one is returned the marking is exactly
/// as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticsError {
    /// The event is not declared in the graph.
    #[error("event '{0}' does not exist")]
    InvalidEvent(Event),

    /// The event is a nesting proxy; only atomic events are executable.
    #[error("event '{0}' is not an atomic event")]
    NotAtomic(Event),

    /// The event exists but its conditions or milestones are unsatisfied.
    #[error("event '{0}' is not enabled")]
    NotEnabled(Event),

    /// Advancing time by `requested` would pass a deadline due in `deadline`.
    #[error("time step of {requested:?} would miss a deadline in {deadline:?}")]
    DeadlineViolation {
        requested: Duration,
        deadline: Duration,
    },
}
