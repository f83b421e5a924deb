//! Trace replay — drive an engine through a whole sequence of inputs.
//!
//! Rejected steps do not stop the replay; they are recorded with their
//! position and the run continues from the unchanged marking, which is how
//! a caller checks a recorded trace against a model in one call.

use tracing::{info, instrument};

use crate::error::{GraphError, SemanticsError};
use crate::models::{DcrGraph, Marking};
use crate::semantics::{DcrSemantics, Input, SemanticsConfig};

/// A step the engine refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedStep {
    /// Zero-based position in the replayed sequence.
    pub index: usize,
    pub input: Input,
    pub error: SemanticsError,
}

/// Outcome of replaying a sequence of inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Number of inputs the engine accepted.
    pub applied: usize,
    pub rejected: Vec<RejectedStep>,
    /// Whether the final marking has no included pending events.
    pub accepting: bool,
    pub marking: Marking,
}

impl ReplayReport {
    /// Every step was accepted and the run ended in an accepting marking.
    pub fn conforms(&self) -> bool {
        self.rejected.is_empty() && self.accepting
    }
}

/// Replay `steps` against a fresh engine built from `graph`.
///
/// # Errors
/// Returns a [`GraphError`] if `graph` fails validation; rejections of
/// individual steps are reported in the [`ReplayReport`] instead.
#[instrument(skip(graph, steps, config), fields(events = graph.events.len()))]
pub fn replay<I>(graph: &DcrGraph, steps: I, config: SemanticsConfig) -> Result<ReplayReport, GraphError>
where
    I: IntoIterator,
    I::Item: Into<Input>,
{
    let mut engine = DcrSemantics::with_config(graph, config)?;
    Ok(replay_on(&mut engine, steps))
}

/// Replay `steps` on an existing engine, leaving it in the final state.
pub fn replay_on<I>(engine: &mut DcrSemantics, steps: I) -> ReplayReport
where
    I: IntoIterator,
    I::Item: Into<Input>,
{
    let mut applied = 0;
    let mut rejected = Vec::new();

    for (index, step) in steps.into_iter().enumerate() {
        let input: Input = step.into();
        match engine.execute(input.clone()) {
            Ok(_) => applied += 1,
            Err(error) => rejected.push(RejectedStep { index, input, error }),
        }
    }

    let accepting = engine.is_accepting();
    info!(
        "replayed {} steps: {} applied, {} rejected, accepting = {}",
        applied + rejected.len(),
        applied,
        rejected.len(),
        accepting
    );

    ReplayReport {
        applied,
        rejected,
        accepting,
        marking: engine.marking().clone(),
    }
}
