//! Analysis state and point-in-time progress snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle: Initial, then (Disassembling, Analyzing, Extended)* runs
/// ending in Idle. Hold overrides whatever the scheduler would report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisState {
    Initial,
    Hold,
    Idle,
    Disassembling,
    Analyzing,
    Extended,
}

impl AnalysisState {
    /// Disassembling or Analyzing: the states that carry a count/total pair.
    pub fn is_mid_flight(&self) -> bool {
        matches!(self, AnalysisState::Disassembling | AnalysisState::Analyzing)
    }
}

/// A function the pass is working on right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAnalysisInfo {
    pub function: u64,
    pub analysis_time_ms: u64,
    /// Times this function has been analyzed, this run included
    pub update_count: usize,
    /// Times this function has been queued for analysis
    pub submit_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisInfo {
    pub state: AnalysisState,
    /// Wall time spent in completed and current runs
    pub analysis_time_ms: u64,
    pub active_info: Vec<ActiveAnalysisInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub state: AnalysisState,
    pub count: usize,
    pub total: usize,
}

impl fmt::Display for AnalysisProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            AnalysisState::Initial => write!(f, "Initial"),
            AnalysisState::Hold => write!(f, "Hold"),
            AnalysisState::Idle => write!(f, "Idle"),
            AnalysisState::Disassembling => {
                write!(f, "Disassembling ({}/{})", self.count, self.total)
            }
            AnalysisState::Analyzing => write!(f, "Analyzing ({}/{})", self.count, self.total),
            AnalysisState::Extended => write!(f, "Extended Analysis"),
        }
    }
}
