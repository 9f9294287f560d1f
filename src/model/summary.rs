//! Summaries - pure aggregates regenerated from a snapshot on every request
//!
//! Nothing here is persisted or patched in place; a reader builds a fresh
//! value each call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One point of a per-generation series.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeSeriesPoint {
    /// Generation
    pub generation: u64,
    /// Value at that generation
    pub value: f64,
    /// Optional wall-clock time
    pub timestamp: f64,
}

/// One occupied MAP-Elites cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GridCell {
    /// Elite program
    pub program_id: String,
    /// Its composite score
    pub score: f64,
}

/// Feature-coordinate to elite mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MapElitesGrid {
    /// Cells keyed by coordinate string
    pub cells: BTreeMap<String, GridCell>,
    /// Feature statistics, passed through from the store
    pub feature_stats: serde_json::Value,
}

/// Score statistics and histories for one experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    /// Number of programs
    pub total_programs: usize,
    /// Best composite score
    pub best_score: f64,
    /// Mean composite score
    pub mean_score: f64,
    /// Median composite score
    pub median_score: f64,
    /// Highest generation
    pub current_generation: u64,
    /// Programs per minute over the elapsed span
    pub programs_per_minute: f64,
    /// Fraction of derivations that improved on their parent
    pub improvement_rate: f64,
    /// Seconds between the oldest and newest program
    pub time_elapsed: f64,

    /// Running maximum of the per-generation best (non-decreasing)
    pub best_score_history: Vec<TimeSeriesPoint>,
    /// Per-generation mean (not running)
    pub mean_score_history: Vec<TimeSeriesPoint>,
    /// Running-max best history per island
    pub per_island_best: BTreeMap<u32, Vec<TimeSeriesPoint>>,
    /// All scores, ascending
    pub score_distribution: Vec<f64>,

    /// MAP-Elites grid, when the store keeps feature maps
    pub map_elites_grid: Option<MapElitesGrid>,

    /// LLM calls recorded
    pub total_llm_calls: usize,
}

/// Cost accumulated per generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CostTimeSeriesPoint {
    /// Generation
    pub generation: u64,
    /// Running total over all generations up to this one
    pub cumulative_cost: f64,
    /// API cost in this generation
    pub api_cost: f64,
    /// Embedding cost in this generation
    pub embed_cost: f64,
    /// Novelty-check cost in this generation
    pub novelty_cost: f64,
    /// Meta-prompt cost in this generation
    pub meta_cost: f64,
}

/// Usage and yield of one LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelUsageStats {
    /// Model name
    pub model_name: String,
    /// Programs generated with it
    pub total_uses: usize,
    /// API cost attributed to it
    pub total_cost: f64,
    /// Derivations that beat the immediate parent
    pub improvements: usize,
    /// `improvements / total_uses`
    pub improvement_rate: f64,
    /// Mean child-minus-parent score over derivations with a known parent
    pub avg_score_delta: f64,
}

/// Model-selection posterior weights at one generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelPosteriorPoint {
    /// Generation
    pub generation: u64,
    /// Weight per model
    pub posteriors: BTreeMap<String, f64>,
}

/// LLM cost and model-usage breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsSummary {
    /// Sum of all four components
    pub total_cost: f64,
    /// API component
    pub total_api_cost: f64,
    /// Embedding component
    pub total_embed_cost: f64,
    /// Novelty component
    pub total_novelty_cost: f64,
    /// Meta component
    pub total_meta_cost: f64,
    /// Cumulative cost by ascending generation
    pub cost_time_series: Vec<CostTimeSeriesPoint>,
    /// Per-model usage, most used first
    pub model_usage: Vec<ModelUsageStats>,
    /// Posterior weights by ascending generation
    pub model_posteriors_over_time: Vec<ModelPosteriorPoint>,
    /// Patch-type frequency
    pub patch_type_distribution: BTreeMap<String, usize>,
}

/// Pairwise cosine similarity over the top programs' embeddings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSimilarity {
    /// Programs, by descending score
    pub program_ids: Vec<String>,
    /// Their scores
    pub scores: Vec<f64>,
    /// Their generations
    pub generations: Vec<u64>,
    /// Their islands
    pub islands: Vec<Option<u32>>,
    /// Their embedding clusters
    pub cluster_ids: Vec<Option<i64>>,
    /// `similarity_matrix[i][j]` = cosine(i, j)
    pub similarity_matrix: Vec<Vec<f64>>,
}
