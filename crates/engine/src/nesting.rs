//! Nesting resolution — queries over the event hierarchy and the one-way
//! flattening of a nested graph into an equivalent atomic one.
//!
//! A nesting event is a proxy for its children.  Relations attached to a
//! proxy apply to every atomic event underneath it, which is exactly what
//! [`DcrSemantics::flatten_nestings`] materializes.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::debug;

use crate::models::{DcrGraph, Event, Relation, RelationMap, TimedRelation, TimedRelationMap};
use crate::semantics::DcrSemantics;
use crate::validate::executed_time_caps;

/// True when `event` has at least one child in `nestings`.
pub fn is_nesting(nestings: &RelationMap, event: &str) -> bool {
    nestings.get(event).is_some_and(|children| !children.is_empty())
}

/// The atomic descendants of `event`; an atomic event maps to itself.
///
/// Walks the child map with an explicit stack and skips anything already
/// visited, so a malformed cyclic hierarchy terminates.
pub fn atomic_leaves(nestings: &RelationMap, event: &str) -> BTreeSet<Event> {
    let mut leaves = BTreeSet::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<&str> = vec![event];

    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        match nestings.get(current) {
            Some(children) if !children.is_empty() => {
                stack.extend(children.iter().map(String::as_str));
            }
            _ => {
                leaves.insert(current.to_owned());
            }
        }
    }

    leaves
}

impl DcrSemantics {
    /// Direct children of `event`; empty for an atomic event.
    pub fn events_under_nesting(&self, event: &str) -> BTreeSet<Event> {
        self.graph.nestings.get(event).cloned().unwrap_or_default()
    }

    /// The root ancestor of `event`, or `event` itself when it has no parent.
    pub fn highest_nesting(&self, event: &str) -> Event {
        let mut current = event;
        while let Some(parent) = self.graph.nestings_map.get(current) {
            current = parent.as_str();
        }
        current.to_owned()
    }

    /// Parent → children, rebuilt from `nestingsMap`.
    pub fn reverse_nesting(&self) -> RelationMap {
        let mut reverse = RelationMap::new();
        for (child, parent) in &self.graph.nestings_map {
            reverse.entry(parent.clone()).or_default().insert(child.clone());
        }
        reverse
    }

    /// All atomic events reachable below `event`.
    pub fn atomic_events(&self, event: &str) -> BTreeSet<Event> {
        atomic_leaves(&self.reverse_nesting(), event)
    }

    /// Events that act as nesting proxies.
    pub fn nesting_events(&self) -> BTreeSet<Event> {
        self.graph
            .nestings
            .iter()
            .filter(|(_, children)| !children.is_empty())
            .map(|(parent, _)| parent.clone())
            .collect()
    }

    /// Replace every event of `trace` by its immediate nesting, leaving
    /// top-level events as they are.
    pub fn abstract_trace<I, E>(&self, trace: I) -> Vec<Event>
    where
        I: IntoIterator<Item = E>,
        E: AsRef<str>,
    {
        trace
            .into_iter()
            .map(|event| {
                let event = event.as_ref();
                self.graph
                    .nestings_map
                    .get(event)
                    .cloned()
                    .unwrap_or_else(|| event.to_owned())
            })
            .collect()
    }

    /// Rewrite the owned graph so that it contains atomic events only.
    ///
    /// Every relation sourced at a nesting is copied onto each of its
    /// leaves, and every nesting appearing as a target is replaced by its
    /// leaves.  `events` and `included` become the set of all leaves and the
    /// nesting maps are cleared.  This cannot be undone.
    pub fn flatten_nestings(&mut self) -> &DcrGraph {
        if self.nesting_events().is_empty() {
            return &self.graph;
        }

        let nestings = std::mem::take(&mut self.graph.nestings);
        self.graph.nestings_map.clear();

        let leaves: BTreeMap<&str, BTreeSet<Event>> = nestings
            .keys()
            .map(|nesting| (nesting.as_str(), atomic_leaves(&nestings, nesting)))
            .collect();
        let expand = |event: &Event| -> BTreeSet<Event> {
            match leaves.get(event.as_str()) {
                Some(atoms) => atoms.clone(),
                None => BTreeSet::from([event.clone()]),
            }
        };

        for relation in Relation::ALL {
            let old = std::mem::take(self.graph.relation_mut(relation));
            let mut new = RelationMap::new();
            for (source, targets) in &old {
                let expanded: BTreeSet<Event> = targets.iter().flat_map(&expand).collect();
                for atom in expand(source) {
                    new.entry(atom).or_default().extend(expanded.iter().cloned());
                }
            }
            *self.graph.relation_mut(relation) = new;
        }

        for relation in TimedRelation::ALL {
            // Keep the stricter bound when two entries land on one pair.
            let merge: fn(Duration, Duration) -> Duration = match relation {
                TimedRelation::ConditionDelay => Duration::max,
                TimedRelation::ResponseDeadline => Duration::min,
            };
            let old = std::mem::take(self.graph.timed_relation_mut(relation));
            let mut new = TimedRelationMap::new();
            for (source, targets) in &old {
                for atom in expand(source) {
                    let entry = new.entry(atom).or_default();
                    for (target, threshold) in targets {
                        for leaf in expand(target) {
                            entry
                                .entry(leaf)
                                .and_modify(|current| *current = merge(*current, *threshold))
                                .or_insert(*threshold);
                        }
                    }
                }
            }
            *self.graph.timed_relation_mut(relation) = new;
        }

        let atoms: BTreeSet<Event> = self.graph.events.iter().flat_map(&expand).collect();
        let marking = &mut self.graph.marking;
        marking.included = atoms.clone();
        marking.executed.retain(|e| atoms.contains(e));
        marking.pending.retain(|e| atoms.contains(e));
        marking.executed_time.retain(|e, _| atoms.contains(e));
        marking.pending_deadline.retain(|e, _| atoms.contains(e));
        self.graph.events = atoms;

        self.max_executed_time = executed_time_caps(&self.graph);
        for (event, elapsed) in self.graph.marking.executed_time.iter_mut() {
            let cap = self.max_executed_time.get(event).copied().unwrap_or_default();
            *elapsed = (*elapsed).min(cap);
        }

        debug!(
            "flattened {} nestings into {} atomic events",
            nestings.len(),
            self.graph.events.len()
        );
        &self.graph
    }
}
