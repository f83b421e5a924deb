//! DCR execution engine.
//!
//! `DcrSemantics` owns a private, normalized copy of a [`DcrGraph`] and
//! drives it one step at a time:
//! 1. [`enabled`](DcrSemantics::enabled) evaluates conditions, delayed
//!    conditions and milestones against the current marking.
//! 2. [`execute`](DcrSemantics::execute) fires an enabled atomic event, or
//!    advances the logical clock when given a duration.
//! 3. [`is_accepting`](DcrSemantics::is_accepting) reports whether any
//!    included event is still pending.
//!
//! Every operation either applies its whole effect or leaves the marking
//! untouched and returns a [`SemanticsError`].  There is no scheduler: the
//! caller decides what to fire next.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, trace};

use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::error::{GraphError, SemanticsError};
use crate::models::{DcrGraph, Event, Marking};
use crate::nesting::is_nesting;
use crate::validate::{executed_time_caps, normalize_graph};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone, Default)]
pub struct SemanticsConfig {
    /// Emit a [`Diagnostic`] for every rejected operation and failed
    /// acceptance check.  Falls back to [`TracingSink`] when no sink is
    /// attached.
    pub verbose: bool,
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One step of a simulation: fire an event or let time pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Event(Event),
    Elapse(Duration),
}

impl Input {
    /// Advance the clock by whole days.
    pub fn days(days: u64) -> Self {
        Input::Elapse(Duration::from_secs(days.saturating_mul(86_400)))
    }
}

impl From<&str> for Input {
    fn from(event: &str) -> Self {
        Input::Event(event.to_owned())
    }
}

impl From<String> for Input {
    fn from(event: String) -> Self {
        Input::Event(event)
    }
}

impl From<Duration> for Input {
    fn from(duration: Duration) -> Self {
        Input::Elapse(duration)
    }
}

// ---------------------------------------------------------------------------
// DcrSemantics
// ---------------------------------------------------------------------------

/// A running DCR graph.
#[derive(Clone)]
pub struct DcrSemantics {
    pub(crate) graph: DcrGraph,
    /// Upper bound on `executedTime` per event; missing means zero.
    pub(crate) max_executed_time: BTreeMap<Event, Duration>,
    config: SemanticsConfig,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl fmt::Debug for DcrSemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DcrSemantics")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl DcrSemantics {
    /// Build an engine over an independent copy of `graph`.
    ///
    /// # Errors
    /// Any [`GraphError`] found by [`normalize_graph`].
    pub fn new(graph: &DcrGraph) -> Result<Self, GraphError> {
        Self::with_config(graph, SemanticsConfig::default())
    }

    pub fn with_config(graph: &DcrGraph, config: SemanticsConfig) -> Result<Self, GraphError> {
        let graph = normalize_graph(graph.clone())?;
        let max_executed_time = executed_time_caps(&graph);
        debug!(
            "engine built over {} events ({} nestings)",
            graph.events.len(),
            graph.nestings.len()
        );
        Ok(Self {
            graph,
            max_executed_time,
            config,
            sink: None,
        })
    }

    /// Route diagnostics to `sink` instead of `tracing`.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn graph(&self) -> &DcrGraph {
        &self.graph
    }

    pub fn marking(&self) -> &Marking {
        &self.graph.marking
    }

    pub fn into_graph(self) -> DcrGraph {
        self.graph
    }

    pub fn config(&self) -> &SemanticsConfig {
        &self.config
    }

    /// The value `executedTime[event]` saturates at.
    pub fn max_executed_time(&self, event: &str) -> Duration {
        self.max_executed_time.get(event).copied().unwrap_or_default()
    }

    /// True for declared events that are not nesting proxies.
    pub fn is_atomic(&self, event: &str) -> bool {
        self.graph.events.contains(event) && !is_nesting(&self.graph.nestings, event)
    }

    // -----------------------------------------------------------------------
    // Enablement
    // -----------------------------------------------------------------------

    /// Events permitted to fire now.
    ///
    /// Starts from the included set and removes events blocked by a
    /// condition, a delayed condition, or a milestone.  All three filters
    /// read the marking as it was at the start of the call.
    pub fn enabled(&self) -> BTreeSet<Event> {
        let graph = &self.graph;
        let marking = &graph.marking;
        let included = &marking.included;
        let mut enabled = included.clone();

        // Untimed conditions; a delayed-condition entry overrides these.
        for (event, prerequisites) in &graph.conditions_for {
            if graph.conditions_for_delays.contains_key(event) || !included.contains(event) {
                continue;
            }
            let blocked = prerequisites
                .iter()
                .any(|p| included.contains(p) && !marking.executed.contains(p));
            if blocked {
                enabled.remove(event);
            }
        }

        for (event, prerequisites) in &graph.conditions_for_delays {
            if !included.contains(event) {
                continue;
            }
            let blocked = prerequisites.iter().any(|(p, threshold)| {
                if !included.contains(p) {
                    return false;
                }
                if !marking.executed.contains(p) {
                    return true;
                }
                let elapsed = marking.executed_time.get(p).copied().unwrap_or_default();
                elapsed < *threshold
            });
            if blocked {
                enabled.remove(event);
            }
        }

        for (event, milestones) in &graph.milestones_for {
            if !included.contains(event) {
                continue;
            }
            let blocked = milestones
                .iter()
                .any(|m| included.contains(m) && marking.pending.contains(m));
            if blocked {
                enabled.remove(event);
            }
        }

        trace!("enabled events: {:?}", enabled);
        enabled
    }

    pub fn is_enabled(&self, event: &str) -> bool {
        self.enabled().contains(event)
    }

    // -----------------------------------------------------------------------
    // Acceptance
    // -----------------------------------------------------------------------

    /// Included events with an outstanding obligation.
    pub fn pending_included(&self) -> BTreeSet<Event> {
        self.graph.marking.pending_included()
    }

    /// True iff no included event is pending.
    pub fn is_accepting(&self) -> bool {
        let pending = self.pending_included();
        if pending.is_empty() {
            return true;
        }
        self.report(Diagnostic::NotAccepting { pending });
        false
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Fire an event or advance time.
    ///
    /// Returns the time that elapsed: zero for an event, the requested
    /// duration for a time step.
    ///
    /// # Errors
    /// - [`SemanticsError::InvalidEvent`] for an undeclared event.
    /// - [`SemanticsError::NotAtomic`] for a nesting proxy.
    /// - [`SemanticsError::NotEnabled`] when the event's guards fail.
    /// - [`SemanticsError::DeadlineViolation`] from [`time_step`](Self::time_step).
    pub fn execute(&mut self, input: impl Into<Input>) -> Result<Duration, SemanticsError> {
        let event = match input.into() {
            Input::Elapse(duration) => return self.time_step(duration),
            Input::Event(event) => event,
        };

        if !self.graph.events.contains(&event) {
            return Err(self.reject(SemanticsError::InvalidEvent(event)));
        }
        if !self.is_atomic(&event) {
            return Err(self.reject(SemanticsError::NotAtomic(event)));
        }
        if !self.is_enabled(&event) {
            return Err(self.reject(SemanticsError::NotEnabled(event)));
        }

        self.fire(&event);
        Ok(Duration::ZERO)
    }

    /// Fire `event` without checking its guards.
    ///
    /// This can break conditions and milestones; it only refuses events the
    /// graph does not declare.
    pub fn weak_execute(&mut self, event: &str) -> Result<(), SemanticsError> {
        if !self.graph.events.contains(event) {
            return Err(self.reject(SemanticsError::InvalidEvent(event.to_owned())));
        }
        self.fire(event);
        Ok(())
    }

    fn fire(&mut self, event: &str) {
        let graph = &mut self.graph;
        let marking = &mut graph.marking;

        marking.pending.remove(event);
        marking.executed.insert(event.to_owned());
        marking.executed_time.insert(event.to_owned(), Duration::ZERO);
        marking.pending_deadline.remove(event);

        if let Some(targets) = graph.excludes_to.get(event) {
            for target in targets {
                marking.included.remove(target);
            }
        }
        if let Some(targets) = graph.includes_to.get(event) {
            marking.included.extend(targets.iter().cloned());
        }
        if let Some(targets) = graph.response_to.get(event) {
            marking.pending.extend(targets.iter().cloned());
        }
        if let Some(targets) = graph.response_to_deadlines.get(event) {
            for (target, deadline) in targets {
                marking.pending.insert(target.clone());
                marking.pending_deadline.insert(target.clone(), *deadline);
            }
        }

        debug!("fired '{}'", event);
    }

    /// Advance the logical clock by `duration`.
    ///
    /// Deadlines count down (floored at zero) and executed times count up
    /// (capped per event).  A step that would overshoot the nearest deadline
    /// of an included pending event is refused as a whole.
    #[instrument(level = "debug", skip(self))]
    pub fn time_step(&mut self, duration: Duration) -> Result<Duration, SemanticsError> {
        if let Some(deadline) = self.find_next_deadline() {
            if duration > deadline {
                return Err(self.reject(SemanticsError::DeadlineViolation {
                    requested: duration,
                    deadline,
                }));
            }
        }

        let marking = &mut self.graph.marking;
        for remaining in marking.pending_deadline.values_mut() {
            *remaining = remaining.saturating_sub(duration);
        }
        for (event, elapsed) in marking.executed_time.iter_mut() {
            let cap = self.max_executed_time.get(event).copied().unwrap_or_default();
            *elapsed = elapsed.saturating_add(duration).min(cap);
        }

        debug!("advanced time by {:?}", duration);
        Ok(duration)
    }

    /// Smallest remaining deadline among included pending events.
    pub fn find_next_deadline(&self) -> Option<Duration> {
        let marking = &self.graph.marking;
        marking
            .pending_deadline
            .iter()
            .filter(|(event, _)| marking.included.contains(*event))
            .map(|(_, remaining)| *remaining)
            .min()
    }

    /// Smallest positive wait until an executed, included prerequisite
    /// satisfies one of its delay thresholds.  Informational only; it does
    /// not constrain [`time_step`](Self::time_step).
    pub fn find_next_delay(&self) -> Option<Duration> {
        let marking = &self.graph.marking;
        self.graph
            .conditions_for_delays
            .values()
            .flat_map(|prerequisites| prerequisites.iter())
            .filter(|(p, _)| marking.executed.contains(*p) && marking.included.contains(*p))
            .filter_map(|(p, threshold)| {
                let elapsed = marking.executed_time.get(p).copied().unwrap_or_default();
                threshold.checked_sub(elapsed).filter(|wait| !wait.is_zero())
            })
            .min()
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    fn report(&self, diagnostic: Diagnostic) {
        if !self.config.verbose {
            return;
        }
        match &self.sink {
            Some(sink) => sink.emit(&diagnostic),
            None => TracingSink.emit(&diagnostic),
        }
    }

    fn reject(&self, err: SemanticsError) -> SemanticsError {
        self.report(Diagnostic::Rejected(err.clone()));
        err
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingSink;
    use crate::models::Relation;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn set(events: &[&str]) -> BTreeSet<Event> {
        events.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn unguarded_included_events_are_enabled() {
        let engine = DcrSemantics::new(&DcrGraph::new(["a", "b"])).expect("valid");
        assert_eq!(engine.enabled(), set(&["a", "b"]));
    }

    #[test]
    fn excluded_events_are_never_enabled() {
        let mut graph = DcrGraph::new(["a", "b"]);
        graph.marking.included.remove("b");
        let engine = DcrSemantics::new(&graph).expect("valid");
        assert_eq!(engine.enabled(), set(&["a"]));
    }

    #[test]
    fn excluded_condition_does_not_block() {
        let mut graph = DcrGraph::new(["a", "b"]).with_relation(Relation::Condition, "b", "a");
        graph.marking.included.remove("a");
        let engine = DcrSemantics::new(&graph).expect("valid");
        assert!(engine.is_enabled("b"));
    }

    #[test]
    fn milestone_blocks_while_included_and_pending() {
        let mut graph = DcrGraph::new(["a", "b"]).with_relation(Relation::Milestone, "b", "a");
        graph.marking.pending.insert("a".into());
        let engine = DcrSemantics::new(&graph).expect("valid");
        assert!(!engine.is_enabled("b"));

        graph.marking.included.remove("a");
        let engine = DcrSemantics::new(&graph).expect("valid");
        assert!(engine.is_enabled("b"));
    }

    #[test]
    fn delayed_condition_waits_for_threshold() {
        let graph = DcrGraph::new(["a", "b"]).with_condition_delay("b", "a", secs(3));
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        assert!(!engine.is_enabled("b"));

        engine.execute("a").expect("a enabled");
        assert!(!engine.is_enabled("b"));
        assert_eq!(engine.find_next_delay(), Some(secs(3)));

        engine.time_step(secs(2)).expect("no deadline");
        assert!(!engine.is_enabled("b"));
        assert_eq!(engine.find_next_delay(), Some(secs(1)));

        engine.time_step(secs(1)).expect("no deadline");
        assert!(engine.is_enabled("b"));
        assert_eq!(engine.find_next_delay(), None);
    }

    #[test]
    fn excluded_delay_prerequisite_neither_blocks_nor_counts() {
        let graph = DcrGraph::new(["a", "b"]).with_condition_delay("b", "a", secs(3));
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        // Not yet executed: nothing to wait for.
        assert_eq!(engine.find_next_delay(), None);

        let mut excluded = graph.clone();
        excluded.marking.included.remove("a");
        let engine_without_a = DcrSemantics::new(&excluded).expect("valid");
        assert!(engine_without_a.is_enabled("b"));
        assert_eq!(engine_without_a.find_next_delay(), None);

        engine.execute("a").expect("a enabled");
        assert_eq!(engine.find_next_delay(), Some(secs(3)));
        engine.graph.marking.included.remove("a");
        assert_eq!(engine.find_next_delay(), None);
        assert!(engine.is_enabled("b"));
    }

    #[test]
    fn delayed_condition_overrides_untimed_condition() {
        // The untimed entry on `b` would block on `c`, but `b` carries a
        // delayed-condition entry, which takes its place.
        let graph = DcrGraph::new(["a", "b", "c"])
            .with_relation(Relation::Condition, "b", "c")
            .with_condition_delay("b", "a", Duration::ZERO);
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        engine.execute("a").expect("a enabled");
        assert!(engine.is_enabled("b"));
    }

    #[test]
    fn executed_time_is_capped_at_largest_threshold() {
        let graph = DcrGraph::new(["a", "b"]).with_condition_delay("b", "a", secs(4));
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        engine.execute("a").expect("a enabled");
        engine.time_step(secs(100)).expect("no deadline");
        assert_eq!(engine.marking().executed_time["a"], secs(4));
        assert_eq!(engine.max_executed_time("a"), secs(4));
    }

    #[test]
    fn firing_applies_include_exclude_and_response() {
        let graph = DcrGraph::new(["a", "b", "c", "d"])
            .with_relation(Relation::Exclude, "a", "b")
            .with_relation(Relation::Include, "a", "c")
            .with_relation(Relation::Response, "a", "d");
        let mut graph = graph;
        graph.marking.included.remove("c");

        let mut engine = DcrSemantics::new(&graph).expect("valid");
        engine.execute("a").expect("a enabled");

        let marking = engine.marking();
        assert_eq!(marking.included, set(&["a", "c", "d"]));
        assert_eq!(marking.pending, set(&["d"]));
        assert_eq!(marking.executed, set(&["a"]));
    }

    #[test]
    fn firing_an_obligation_clears_its_deadline() {
        let graph = DcrGraph::new(["a", "b"]).with_response_deadline("a", "b", secs(5));
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        engine.execute("a").expect("a enabled");
        assert_eq!(engine.find_next_deadline(), Some(secs(5)));

        engine.execute("b").expect("b enabled");
        assert!(!engine.marking().pending.contains("b"));
        assert!(engine.marking().pending_deadline.is_empty());
        assert_eq!(engine.find_next_deadline(), None);
    }

    #[test]
    fn excluded_deadline_does_not_constrain_time() {
        let graph = DcrGraph::new(["a", "b"])
            .with_response_deadline("a", "b", secs(5))
            .with_relation(Relation::Exclude, "a", "b");
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        engine.execute("a").expect("a enabled");

        assert_eq!(engine.find_next_deadline(), None);
        assert_eq!(engine.time_step(secs(60)), Ok(secs(60)));
        assert_eq!(engine.marking().pending_deadline["b"], Duration::ZERO);
    }

    #[test]
    fn unknown_event_is_rejected() {
        let mut engine = DcrSemantics::new(&DcrGraph::new(["a"])).expect("valid");
        assert_eq!(
            engine.execute("ghost"),
            Err(SemanticsError::InvalidEvent("ghost".into()))
        );
        assert_eq!(
            engine.weak_execute("ghost"),
            Err(SemanticsError::InvalidEvent("ghost".into()))
        );
    }

    #[test]
    fn nesting_proxy_is_not_executable() {
        let graph = DcrGraph::new(["g", "a"]).with_nesting("g", ["a"]);
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        assert!(!engine.is_atomic("g"));
        assert!(engine.is_atomic("a"));
        assert!(!engine.is_atomic("ghost"));
        assert_eq!(engine.execute("g"), Err(SemanticsError::NotAtomic("g".into())));
        assert!(engine.marking().executed.is_empty());
    }

    #[test]
    fn childless_nesting_entry_is_atomic() {
        let mut graph = DcrGraph::new(["g", "a"]);
        graph.nestings.insert("g".into(), BTreeSet::new());
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        assert!(engine.is_atomic("g"));
        assert_eq!(engine.execute("g"), Ok(Duration::ZERO));
    }

    #[test]
    fn into_graph_returns_the_advanced_marking() {
        let graph = DcrGraph::new(["a", "b"]).with_relation(Relation::Response, "a", "b");
        let mut engine = DcrSemantics::with_config(&graph, SemanticsConfig { verbose: true })
            .expect("valid");
        assert!(engine.config().verbose);
        engine.execute("a").expect("a enabled");

        let advanced = engine.into_graph();
        assert_eq!(advanced.marking.executed, set(&["a"]));
        assert_eq!(advanced.marking.pending, set(&["b"]));
        assert!(graph.marking.executed.is_empty());
    }

    #[test]
    fn weak_execute_ignores_guards() {
        let graph = DcrGraph::new(["a", "b"]).with_relation(Relation::Condition, "b", "a");
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        assert!(!engine.is_enabled("b"));
        engine.weak_execute("b").expect("declared event");
        assert!(engine.marking().executed.contains("b"));
    }

    #[test]
    fn integer_days_advance_time() {
        let graph = DcrGraph::new(["a", "b"]).with_response_deadline("a", "b", secs(2 * 86_400));
        let mut engine = DcrSemantics::new(&graph).expect("valid");
        engine.execute("a").expect("a enabled");
        assert_eq!(engine.execute(Input::days(1)), Ok(secs(86_400)));
        assert_eq!(engine.marking().pending_deadline["b"], secs(86_400));
        assert!(engine.execute(Input::days(2)).is_err());
    }

    #[test]
    fn quiet_engine_emits_no_diagnostics() {
        let sink = RecordingSink::new();
        let mut engine = DcrSemantics::new(&DcrGraph::new(["a"]))
            .expect("valid")
            .with_sink(Arc::new(sink.clone()));
        let _ = engine.execute("ghost");
        assert!(sink.is_empty());
    }

    #[test]
    fn verbose_engine_reports_rejections_and_acceptance() {
        let sink = RecordingSink::new();
        let graph = DcrGraph::new(["a", "b"])
            .with_relation(Relation::Condition, "b", "a")
            .with_relation(Relation::Response, "a", "b");
        let mut engine = DcrSemantics::with_config(&graph, SemanticsConfig { verbose: true })
            .expect("valid")
            .with_sink(Arc::new(sink.clone()));

        assert!(engine.execute("b").is_err());
        engine.execute("a").expect("a enabled");
        assert!(!engine.is_accepting());

        assert_eq!(
            sink.records(),
            vec![
                Diagnostic::Rejected(SemanticsError::NotEnabled("b".into())),
                Diagnostic::NotAccepting { pending: set(&["b"]) },
            ]
        );
    }
}
