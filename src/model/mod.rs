//! Unified Model
//!
//! The normalized entity set every reader produces and every consumer
//! reads, independent of the storage format underneath.
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (1) ──< Program (N) ──parent──> Program
//!      │                 │
//!      ├──< Island (N)   └──< MigrationRecord (N) ──flatten──> MigrationEvent
//!      │
//!      └── MetricsSummary / AnalyticsSummary / LineageTree (derived, never stored)
//! ```

mod conversation;
mod event;
mod experiment;
mod format;
mod island;
mod lineage;
mod program;
mod summary;

pub use conversation::ConversationEntry;
pub use event::{now_epoch_secs, ChangeEvent, EventType};
pub use experiment::{display_name, experiment_id, Experiment, ExperimentStatus, StatusThresholds};
pub use format::FormatName;
pub use island::{Island, MigrationEvent};
pub use lineage::{LineageNode, LineageTree};
pub use program::{
    composite_score, finite, finite_vector, json_finite, sanitize_metrics, Metrics,
    MigrationRecord, Program, ProgramBrief,
};
pub use summary::{
    AnalyticsSummary, CostTimeSeriesPoint, EmbeddingSimilarity, GridCell, MapElitesGrid,
    MetricsSummary, ModelPosteriorPoint, ModelUsageStats, TimeSeriesPoint,
};
