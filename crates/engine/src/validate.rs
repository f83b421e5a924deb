//! Graph validation and normalization — run once when an engine is built.
//!
//! Rules enforced:
//! 1. Every event referenced by a relation, timed relation, marking
//!    component or nesting must be declared in `events`.
//! 2. Each child has at most one parent nesting, and `nestingsMap` (when
//!    supplied) is exactly the inverse of `nestings`.
//! 3. The nesting hierarchy is acyclic.
//!
//! Normalization then fills in what the exchange format lets callers omit:
//! the derived `nestingsMap`, a zero `executedTime` for executed events that
//! lack one, executed-time caps, and dropping deadlines of non-pending events.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::debug;

use crate::error::GraphError;
use crate::models::{DcrGraph, Event, Marking, Relation, TimedRelation};

/// Check the structural invariants of `graph` without modifying it.
///
/// # Errors
/// - [`GraphError::UnknownEvent`] if anything references an undeclared event.
/// - [`GraphError::MultipleParents`] if a child sits under two nestings.
/// - [`GraphError::InconsistentNestingMap`] if `nestingsMap` disagrees with `nestings`.
/// - [`GraphError::NestingCycle`] if the nesting hierarchy loops.
pub fn validate_graph(graph: &DcrGraph) -> Result<(), GraphError> {
    check_references(graph)?;
    let parents = derive_nestings_map(graph)?;
    check_acyclic(&parents)
}

/// Validate `graph` and bring it into the canonical form the engine runs on.
pub fn normalize_graph(mut graph: DcrGraph) -> Result<DcrGraph, GraphError> {
    check_references(&graph)?;
    let parents = derive_nestings_map(&graph)?;
    check_acyclic(&parents)?;
    graph.nestings_map = parents;

    let caps = executed_time_caps(&graph);
    let Marking {
        executed,
        pending,
        executed_time,
        pending_deadline,
        ..
    } = &mut graph.marking;

    executed_time.retain(|event, _| executed.contains(event));
    for event in executed.iter() {
        let cap = caps.get(event).copied().unwrap_or_default();
        let elapsed = executed_time.entry(event.clone()).or_default();
        *elapsed = (*elapsed).min(cap);
    }

    let before = pending_deadline.len();
    pending_deadline.retain(|event, _| pending.contains(event));
    if pending_deadline.len() != before {
        debug!(
            "dropped {} deadline(s) on events that are not pending",
            before - pending_deadline.len()
        );
    }

    Ok(graph)
}

/// Per-event cap on `executedTime`: the largest delay threshold for which the
/// event is a prerequisite.  Events that are never a delayed prerequisite
/// are absent, which callers read as a zero cap.
pub fn executed_time_caps(graph: &DcrGraph) -> BTreeMap<Event, Duration> {
    let mut caps: BTreeMap<Event, Duration> = BTreeMap::new();
    for prerequisites in graph.conditions_for_delays.values() {
        for (prerequisite, threshold) in prerequisites {
            let cap = caps.entry(prerequisite.clone()).or_default();
            *cap = (*cap).max(*threshold);
        }
    }
    caps
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn check_references(graph: &DcrGraph) -> Result<(), GraphError> {
    let known = |event: &Event, field: &'static str| {
        if graph.events.contains(event) {
            Ok(())
        } else {
            Err(GraphError::UnknownEvent {
                event: event.clone(),
                field,
            })
        }
    };

    for relation in Relation::ALL {
        let field = relation.field_name();
        for (source, targets) in graph.relation(relation) {
            known(source, field)?;
            for target in targets {
                known(target, field)?;
            }
        }
    }

    for relation in TimedRelation::ALL {
        let field = relation.field_name();
        for (source, targets) in graph.timed_relation(relation) {
            known(source, field)?;
            for target in targets.keys() {
                known(target, field)?;
            }
        }
    }

    let marking = &graph.marking;
    for (events, field) in [
        (&marking.included, "marking.included"),
        (&marking.executed, "marking.executed"),
        (&marking.pending, "marking.pending"),
    ] {
        for event in events {
            known(event, field)?;
        }
    }
    for event in marking.executed_time.keys() {
        known(event, "marking.executedTime")?;
    }
    for event in marking.pending_deadline.keys() {
        known(event, "marking.pendingDeadline")?;
    }

    for (parent, children) in &graph.nestings {
        known(parent, "nestings")?;
        for child in children {
            known(child, "nestings")?;
        }
    }
    for (child, parent) in &graph.nestings_map {
        known(child, "nestingsMap")?;
        known(parent, "nestingsMap")?;
    }

    Ok(())
}

/// Invert `nestings`, and check it against a caller-supplied `nestingsMap`.
fn derive_nestings_map(graph: &DcrGraph) -> Result<BTreeMap<Event, Event>, GraphError> {
    let mut parents: BTreeMap<Event, Event> = BTreeMap::new();
    for (parent, children) in &graph.nestings {
        for child in children {
            if let Some(first) = parents.insert(child.clone(), parent.clone()) {
                return Err(GraphError::MultipleParents {
                    child: child.clone(),
                    first,
                    second: parent.clone(),
                });
            }
        }
    }

    if !graph.nestings_map.is_empty() && graph.nestings_map != parents {
        let child = graph
            .nestings_map
            .keys()
            .chain(parents.keys())
            .find(|child| graph.nestings_map.get(*child) != parents.get(*child))
            .cloned()
            .unwrap_or_default();
        return Err(GraphError::InconsistentNestingMap { child });
    }

    Ok(parents)
}

fn check_acyclic(parents: &BTreeMap<Event, Event>) -> Result<(), GraphError> {
    // Events already proven to reach a root.
    let mut rooted: BTreeSet<&str> = BTreeSet::new();

    for start in parents.keys() {
        let mut path: BTreeSet<&str> = BTreeSet::new();
        let mut current = start.as_str();
        loop {
            if rooted.contains(current) {
                break;
            }
            if !path.insert(current) {
                return Err(GraphError::NestingCycle(current.to_owned()));
            }
            match parents.get(current) {
                Some(parent) => current = parent.as_str(),
                None => break,
            }
        }
        rooted.extend(path);
    }

    Ok(())
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn plain_graph_is_valid() {
        let graph = DcrGraph::new(["a", "b"]).with_relation(Relation::Condition, "b", "a");
        assert!(validate_graph(&graph).is_ok());
    }

    #[test]
    fn relation_to_unknown_event_is_rejected() {
        let graph = DcrGraph::new(["a"]).with_relation(Relation::Response, "a", "ghost");
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::UnknownEvent { event, field }) if event == "ghost" && field == "responseTo"
        ));
    }

    #[test]
    fn timed_relation_to_unknown_event_is_rejected() {
        let graph = DcrGraph::new(["a"]).with_response_deadline("a", "ghost", secs(1));
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::UnknownEvent { field, .. }) if field == "responseToDeadlines"
        ));
    }

    #[test]
    fn unknown_event_in_marking_is_rejected() {
        let mut graph = DcrGraph::new(["a"]);
        graph.marking.pending.insert("ghost".into());
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::UnknownEvent { field, .. }) if field == "marking.pending"
        ));
    }

    #[test]
    fn child_under_two_parents_is_rejected() {
        let graph = DcrGraph::new(["g", "h", "a"])
            .with_nesting("g", ["a"])
            .with_nesting("h", ["a"]);
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::MultipleParents { child, .. }) if child == "a"
        ));
    }

    #[test]
    fn mismatched_nestings_map_is_rejected() {
        let mut graph = DcrGraph::new(["g", "h", "a", "b"])
            .with_nesting("g", ["a"])
            .with_nesting("h", ["b"]);
        graph.nestings_map.insert("b".into(), "g".into());
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::InconsistentNestingMap { child }) if child == "b"
        ));
    }

    #[test]
    fn nesting_cycle_is_detected() {
        // g → h → g
        let graph = DcrGraph::new(["g", "h", "a"])
            .with_nesting("g", ["h", "a"])
            .with_nesting("h", ["g"]);
        assert!(matches!(validate_graph(&graph), Err(GraphError::NestingCycle(_))));
    }

    #[test]
    fn self_nesting_is_a_cycle() {
        let graph = DcrGraph::new(["g"]).with_nesting("g", ["g"]);
        assert!(matches!(validate_graph(&graph), Err(GraphError::NestingCycle(e)) if e == "g"));
    }

    #[test]
    fn normalize_derives_missing_nestings_map() {
        let mut graph = DcrGraph::new(["g", "a", "b"]).with_nesting("g", ["a", "b"]);
        graph.nestings_map.clear();
        let graph = normalize_graph(graph).expect("valid");
        assert_eq!(graph.nestings_map.get("a").map(String::as_str), Some("g"));
        assert_eq!(graph.nestings_map.get("b").map(String::as_str), Some("g"));
    }

    #[test]
    fn normalize_fills_and_caps_executed_time() {
        let mut graph = DcrGraph::new(["a", "b", "c"]).with_condition_delay("b", "a", secs(3));
        graph.marking.executed.extend(["a".to_string(), "c".to_string()]);
        graph.marking.executed_time.insert("a".into(), secs(10));

        let graph = normalize_graph(graph).expect("valid");
        assert_eq!(graph.marking.executed_time["a"], secs(3));
        assert_eq!(graph.marking.executed_time["c"], Duration::ZERO);
    }

    #[test]
    fn normalize_drops_deadlines_of_non_pending_events() {
        let mut graph = DcrGraph::new(["a", "b"]);
        graph.marking.pending.insert("a".into());
        graph.marking.pending_deadline.insert("a".into(), secs(2));
        graph.marking.pending_deadline.insert("b".into(), secs(4));

        let graph = normalize_graph(graph).expect("valid");
        assert_eq!(graph.marking.pending_deadline.len(), 1);
        assert!(graph.marking.pending_deadline.contains_key("a"));
    }

    #[test]
    fn caps_take_the_largest_threshold_per_prerequisite() {
        let graph = DcrGraph::new(["a", "b", "c"])
            .with_condition_delay("b", "a", secs(2))
            .with_condition_delay("c", "a", secs(7));
        let caps = executed_time_caps(&graph);
        assert_eq!(caps["a"], secs(7));
        assert!(!caps.contains_key("b"));
    }
}
