//! `dcr-engine` crate — DCR graph model, validation, and the execution engine.
//!
//! A [`DcrGraph`] is validated and copied into a [`DcrSemantics`], which the
//! caller then drives by querying [`DcrSemantics::enabled`], firing events
//! and advancing time.  Nested graphs can be flattened into an equivalent
//! atomic graph before simulation.

pub mod models;
pub mod error;
pub mod validate;
pub mod diagnostics;
pub mod semantics;
pub mod nesting;
pub mod replay;

pub use models::{DcrGraph, Event, Marking, Relation, RelationMap, TimedRelation, TimedRelationMap};
pub use error::{GraphError, SemanticsError};
pub use validate::{normalize_graph, validate_graph};
pub use diagnostics::{Diagnostic, DiagnosticSink, RecordingSink, TracingSink};
pub use semantics::{DcrSemantics, Input, SemanticsConfig};
pub use replay::{replay, replay_on, RejectedStep, ReplayReport};
