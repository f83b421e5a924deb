//! Core domain models for the DCR engine.
//!
//! A [`DcrGraph`] is the plain-data description of a process model: its
//! events, the five untimed relations, the two timed relations, the nesting
//! hierarchy and the current [`Marking`].  The engine takes a private copy
//! of one of these at construction and only ever mutates that copy.
//!
//! The serde representation uses the camelCase field names of the exchange
//! format (`conditionsFor`, `responseToDeadlines`, `nestingsMap`, ...).
//! Every field is optional and defaults to an empty container.  Durations
//! are written as (fractional) seconds.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An event label.  Atomic events and nesting proxies share one namespace.
pub type Event = String;

/// Source event → set of target events.
pub type RelationMap = BTreeMap<Event, BTreeSet<Event>>;

/// Source event → (target event → threshold).
pub type TimedRelationMap = BTreeMap<Event, BTreeMap<Event, Duration>>;

// ---------------------------------------------------------------------------
// Relation
// ---------------------------------------------------------------------------

/// The five untimed relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    /// `conditionsFor[e]`: must have executed (while included) before `e`.
    Condition,
    /// `milestonesFor[e]`: must not be included and pending for `e` to fire.
    Milestone,
    /// `responseTo[e]`: become pending after `e` fires.
    Response,
    /// `includesTo[e]`: become included after `e` fires.
    Include,
    /// `excludesTo[e]`: become excluded after `e` fires.
    Exclude,
}

impl Relation {
    pub const ALL: [Relation; 5] = [
        Relation::Condition,
        Relation::Milestone,
        Relation::Response,
        Relation::Include,
        Relation::Exclude,
    ];

    /// Name of the field holding this relation in the exchange format.
    pub fn field_name(self) -> &'static str {
        match self {
            Relation::Condition => "conditionsFor",
            Relation::Milestone => "milestonesFor",
            Relation::Response => "responseTo",
            Relation::Include => "includesTo",
            Relation::Exclude => "excludesTo",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// The two timed relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimedRelation {
    /// `conditionsForDelays[e]`: prerequisite plus minimum elapsed time.
    ConditionDelay,
    /// `responseToDeadlines[e]`: obligation plus countdown deadline.
    ResponseDeadline,
}

impl TimedRelation {
    pub const ALL: [TimedRelation; 2] = [TimedRelation::ConditionDelay, TimedRelation::ResponseDeadline];

    pub fn field_name(self) -> &'static str {
        match self {
            TimedRelation::ConditionDelay => "conditionsForDelays",
            TimedRelation::ResponseDeadline => "responseToDeadlines",
        }
    }
}

// ---------------------------------------------------------------------------
// Marking
// ---------------------------------------------------------------------------

/// The mutable runtime state of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marking {
    #[serde(default)]
    pub included: BTreeSet<Event>,
    #[serde(default)]
    pub executed: BTreeSet<Event>,
    #[serde(default)]
    pub pending: BTreeSet<Event>,
    /// Time elapsed since each executed event last fired.
    #[serde(default, with = "durations::flat")]
    pub executed_time: BTreeMap<Event, Duration>,
    /// Remaining time before each timed obligation is violated.
    #[serde(default, with = "durations::flat")]
    pub pending_deadline: BTreeMap<Event, Duration>,
}

impl Marking {
    /// Events that are both pending and included: the active obligations.
    pub fn pending_included(&self) -> BTreeSet<Event> {
        self.pending.intersection(&self.included).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// DcrGraph
// ---------------------------------------------------------------------------

/// A complete DCR graph: structure plus marking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcrGraph {
    #[serde(default)]
    pub events: BTreeSet<Event>,
    #[serde(default)]
    pub conditions_for: RelationMap,
    #[serde(default)]
    pub milestones_for: RelationMap,
    #[serde(default)]
    pub response_to: RelationMap,
    #[serde(default)]
    pub includes_to: RelationMap,
    #[serde(default)]
    pub excludes_to: RelationMap,
    #[serde(default, with = "durations::nested")]
    pub conditions_for_delays: TimedRelationMap,
    #[serde(default, with = "durations::nested")]
    pub response_to_deadlines: TimedRelationMap,
    /// Nesting event → its direct children.
    #[serde(default)]
    pub nestings: RelationMap,
    /// Child → its immediate parent nesting.  Derived from `nestings` when
    /// left empty.
    #[serde(default)]
    pub nestings_map: BTreeMap<Event, Event>,
    #[serde(default)]
    pub marking: Marking,
}

impl DcrGraph {
    /// A graph over `events` with every event included and no relations.
    pub fn new<I, E>(events: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Event>,
    {
        let events: BTreeSet<Event> = events.into_iter().map(Into::into).collect();
        Self {
            marking: Marking {
                included: events.clone(),
                ..Marking::default()
            },
            events,
            ..Self::default()
        }
    }

    pub fn relation(&self, relation: Relation) -> &RelationMap {
        match relation {
            Relation::Condition => &self.conditions_for,
            Relation::Milestone => &self.milestones_for,
            Relation::Response => &self.response_to,
            Relation::Include => &self.includes_to,
            Relation::Exclude => &self.excludes_to,
        }
    }

    pub fn relation_mut(&mut self, relation: Relation) -> &mut RelationMap {
        match relation {
            Relation::Condition => &mut self.conditions_for,
            Relation::Milestone => &mut self.milestones_for,
            Relation::Response => &mut self.response_to,
            Relation::Include => &mut self.includes_to,
            Relation::Exclude => &mut self.excludes_to,
        }
    }

    pub fn timed_relation(&self, relation: TimedRelation) -> &TimedRelationMap {
        match relation {
            TimedRelation::ConditionDelay => &self.conditions_for_delays,
            TimedRelation::ResponseDeadline => &self.response_to_deadlines,
        }
    }

    pub fn timed_relation_mut(&mut self, relation: TimedRelation) -> &mut TimedRelationMap {
        match relation {
            TimedRelation::ConditionDelay => &mut self.conditions_for_delays,
            TimedRelation::ResponseDeadline => &mut self.response_to_deadlines,
        }
    }

    /// Add `source → target` to the given relation.
    ///
    /// For conditions and milestones the *source* is the guarded event and
    /// the target its prerequisite, matching the `conditionsFor[e]` layout.
    pub fn with_relation(mut self, relation: Relation, source: &str, target: &str) -> Self {
        self.relation_mut(relation)
            .entry(source.to_owned())
            .or_default()
            .insert(target.to_owned());
        self
    }

    /// `event` may only fire once `prerequisite` has been executed for at
    /// least `threshold`.
    pub fn with_condition_delay(mut self, event: &str, prerequisite: &str, threshold: Duration) -> Self {
        self.conditions_for_delays
            .entry(event.to_owned())
            .or_default()
            .insert(prerequisite.to_owned(), threshold);
        self
    }

    /// Firing `source` obliges `target` to fire within `deadline`.
    pub fn with_response_deadline(mut self, source: &str, target: &str, deadline: Duration) -> Self {
        self.response_to_deadlines
            .entry(source.to_owned())
            .or_default()
            .insert(target.to_owned(), deadline);
        self
    }

    /// Group `children` under the nesting event `parent`, keeping
    /// `nestings_map` in step.
    pub fn with_nesting<I, E>(mut self, parent: &str, children: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Event>,
    {
        for child in children {
            let child = child.into();
            self.nestings_map.insert(child.clone(), parent.to_owned());
            self.nestings.entry(parent.to_owned()).or_default().insert(child);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Duration (de)serialization as seconds
// ---------------------------------------------------------------------------

mod durations {
    use std::time::Duration;

    use serde::de::Error;

    fn to_duration<E: Error>(secs: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(secs)
            .map_err(|e| E::custom(format!("invalid duration {secs}: {e}")))
    }

    pub mod flat {
        use std::collections::BTreeMap;
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        use crate::models::Event;

        pub fn serialize<S: Serializer>(
            map: &BTreeMap<Event, Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            let secs: BTreeMap<&str, f64> =
                map.iter().map(|(k, v)| (k.as_str(), v.as_secs_f64())).collect();
            secs.serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<BTreeMap<Event, Duration>, D::Error> {
            let raw = BTreeMap::<Event, f64>::deserialize(deserializer)?;
            let mut out = BTreeMap::new();
            for (event, secs) in raw {
                out.insert(event, super::to_duration::<D::Error>(secs)?);
            }
            Ok(out)
        }
    }

    pub mod nested {
        use std::collections::BTreeMap;
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        use crate::models::{Event, TimedRelationMap};

        pub fn serialize<S: Serializer>(map: &TimedRelationMap, serializer: S) -> Result<S::Ok, S::Error> {
            let secs: BTreeMap<&str, BTreeMap<&str, f64>> = map
                .iter()
                .map(|(source, targets)| {
                    let inner = targets
                        .iter()
                        .map(|(t, d)| (t.as_str(), d.as_secs_f64()))
                        .collect();
                    (source.as_str(), inner)
                })
                .collect();
            secs.serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimedRelationMap, D::Error> {
            let raw = BTreeMap::<Event, BTreeMap<Event, f64>>::deserialize(deserializer)?;
            let mut out = TimedRelationMap::new();
            for (source, targets) in raw {
                let mut inner: BTreeMap<Event, Duration> = BTreeMap::new();
                for (target, secs) in targets {
                    inner.insert(target, super::to_duration::<D::Error>(secs)?);
                }
                out.insert(source, inner);
            }
            Ok(out)
        }
    }
}
