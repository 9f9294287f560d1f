//! Conversation entries - child-vs-parent comparison records

use serde::{Deserialize, Serialize};

/// One LLM exchange that produced a program, with its outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversationEntry {
    /// Child program
    pub program_id: String,
    /// Parent program
    pub parent_id: Option<String>,
    /// Iteration
    pub iteration: u64,
    /// Generation
    pub generation: u64,
    /// Island
    pub island_id: Option<u32>,
    /// Seconds since the epoch
    pub timestamp: f64,

    /// System prompt
    pub system_prompt: Option<String>,
    /// User prompt
    pub user_prompt: Option<String>,
    /// LLM response
    pub llm_response: Option<String>,

    /// Child score
    pub score: f64,
    /// Parent score
    pub parent_score: f64,
    /// `score - parent_score`
    pub improvement_delta: f64,
    /// Mutation/operator tag
    pub mutation_type: String,

    /// Diff carried by the record
    pub code_diff: Option<String>,
}
