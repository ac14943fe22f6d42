//! Decision router

use orchestra_core::{Decision, NextAction, Phase};

/// Map a planner decision to the next phase
///
/// Total: an unrecognized or missing action resolves to [`Phase::Report`].
pub fn route(decision: &Decision) -> Phase {
    match &decision.next_action {
        Some(NextAction::Query) => Phase::QueryGen,
        Some(NextAction::DynamicAnalysis) => Phase::DynamicAnalysis,
        Some(NextAction::Interpret) => Phase::Interpret,
        Some(NextAction::Report) => Phase::Report,
        Some(NextAction::Unrecognized(_)) | None => Phase::Report,
    }
}
