//! Aggregation Engine
//!
//! Pure functions shared by every reader. Each call takes a flat slice of
//! programs (or cost samples) and returns a freshly built summary; nothing
//! is retained between calls.
//!
//! ## Example
//!
//! ```rust
//! use evoscope::aggregate::metrics;
//! use evoscope::model::ProgramBrief;
//!
//! let programs = vec![
//!     ProgramBrief { id: "a".into(), score: 1.0, ..Default::default() },
//!     ProgramBrief { id: "b".into(), score: 2.0, ..Default::default() },
//! ];
//! let summary = metrics::summarize(&programs);
//! assert_eq!(summary.best_score, 2.0);
//! assert_eq!(summary.mean_score, 1.5);
//! ```

pub mod analytics;
pub mod islands;
pub mod lineage;
pub mod metrics;
pub mod similarity;

pub use analytics::CostSample;
