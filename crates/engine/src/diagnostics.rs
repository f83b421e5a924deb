//! Advisory diagnostics and the sinks that receive them.
//!
//! The engine never prints.  When [`SemanticsConfig::verbose`] is set it
//! hands a [`Diagnostic`] to its [`DiagnosticSink`] for every rejected
//! operation and every failed acceptance check.  Diagnostics are a side
//! channel only: the operation's return value carries the same information.
//!
//! [`SemanticsConfig::verbose`]: crate::semantics::SemanticsConfig::verbose

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::SemanticsError;
use crate::models::Event;

/// A human-readable warning emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A firing or time step was refused.
    Rejected(SemanticsError),
    /// `is_accepting` found active obligations.
    NotAccepting { pending: BTreeSet<Event> },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Rejected(err) => write!(f, "{err}"),
            Diagnostic::NotAccepting { pending } => {
                write!(f, "not accepting, there are pending included events {pending:?}")
            }
        }
    }
}

/// Receiver for engine diagnostics.
///
/// Implementations must not panic; the engine calls `emit` in the middle of
/// an operation and ignores whatever the sink does with the message.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: &Diagnostic);
}

/// Forwards every diagnostic to `tracing` at `WARN` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        warn!("{diagnostic}");
    }
}

/// A sink that records every diagnostic it receives.
///
/// Clones share the same buffer, so a test can keep one handle and give the
/// other to the engine.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<Diagnostic>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All diagnostics seen so far, in emission order.
    pub fn records(&self) -> Vec<Diagnostic> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        match self.records.lock() {
            Ok(mut records) => records.push(diagnostic.clone()),
            Err(poisoned) => poisoned.into_inner().push(diagnostic.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_clones_share_a_buffer() {
        let sink = RecordingSink::new();
        let handle = sink.clone();
        sink.emit(&Diagnostic::Rejected(SemanticsError::NotEnabled("a".into())));
        assert_eq!(handle.len(), 1);
        assert_eq!(
            handle.records()[0],
            Diagnostic::Rejected(SemanticsError::NotEnabled("a".into()))
        );
    }

    #[test]
    fn not_accepting_message_lists_obligations() {
        let diagnostic = Diagnostic::NotAccepting {
            pending: BTreeSet::from(["b".to_string()]),
        };
        assert!(diagnostic.to_string().contains("\"b\""));
    }
}
