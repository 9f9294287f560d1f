//! Island state and migration events

use serde::{Deserialize, Serialize};

/// One sub-population of the search.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Island {
    /// Island index
    pub island_id: u32,
    /// Number of member programs
    pub program_count: usize,
    /// Best composite score among members present in the snapshot
    pub best_score: f64,
    /// Program holding `best_score`
    pub best_program_id: Option<String>,
    /// Island generation counter
    pub current_generation: u64,
    /// Member ids, when the store lists them
    pub program_ids: Vec<String>,
}

/// A program moving between islands.
///
/// Readers always report these sorted ascending by `timestamp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MigrationEvent {
    /// When the move happened
    pub timestamp: f64,
    /// Program that moved
    pub program_id: String,
    /// Source island
    pub from_island: u32,
    /// Destination island
    pub to_island: u32,
    /// Program score at migration time
    pub score: f64,
}
