//! Canonical chain order and batch chain-progress reconstruction

use std::collections::BTreeMap;

use crate::state::ChainStage;
use crate::wlog::{EventKind, LogEntry};

/// The fixed workflow command sequence; out-of-order is judged against this
pub const CANONICAL_CHAIN: [&str; 8] = [
    "ideate",
    "plan",
    "acceptance",
    "red",
    "green",
    "refactor",
    "integration",
    "ship",
];

/// Position of a command in the canonical chain, if it participates
pub fn canonical_index(cmd: &str) -> Option<usize> {
    CANONICAL_CHAIN.iter().position(|c| cmd.eq_ignore_ascii_case(c))
}

/// Reconstruct chain progress from the full entry list
///
/// A command is active from its START until its own COMPLETE; FAILED leaves
/// it active and the failure surfaces as an issue instead. Ad-hoc commands
/// appear in the map too, they just have no canonical position.
pub fn compute_chain(entries: &[LogEntry]) -> BTreeMap<String, ChainStage> {
    let mut chain: BTreeMap<String, ChainStage> = CANONICAL_CHAIN
        .iter()
        .map(|cmd| (cmd.to_string(), ChainStage::Pending))
        .collect();

    for entry in entries {
        match entry.event {
            EventKind::Start => {
                let stage = chain.entry(entry.cmd.clone()).or_default();
                if *stage != ChainStage::Complete {
                    *stage = ChainStage::Active;
                }
            }
            EventKind::Complete => {
                chain.insert(entry.cmd.clone(), ChainStage::Complete);
            }
            _ => {}
        }
    }

    chain
}
