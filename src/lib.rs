//! # evoscope: Read-Only Ingestion for Evolutionary Program-Synthesis Runs
//!
//! **Version**: 0.1.0
//!
//! evoscope reads the records long-running evolutionary jobs leave on disk,
//! in either of two storage shapes, and serves them as one normalized model
//! with derived analytics and a debounced change-notification stream.
//!
//! ## Components
//!
//! - [`model`]: the unified entity set (programs, experiments, islands,
//!   lineage, summaries, change events)
//! - [`reader`]: the [`StoreReader`](reader::StoreReader) contract and its
//!   checkpoint-directory and SQLite implementations
//! - [`registry`]: late-registered format descriptors, detection and
//!   discovery
//! - [`aggregate`]: pure functions deriving lineage, score histories and
//!   cost analytics
//! - [`watch`]: the change-detection engine (poll or filesystem watch,
//!   shared debounce, failure-isolated subscribers)
//! - [`manager`]: discovery plus one cached reader per experiment
//!
//! Nothing here writes to a store.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use evoscope::{Config, ExperimentManager, FormatRegistry};
//!
//! let config = Config::builder().scan_root("runs").build()?;
//! let manager = ExperimentManager::new(Arc::new(FormatRegistry::with_builtin_formats()), config);
//! manager.scan();
//!
//! for experiment in manager.list_experiments() {
//!     let reader = manager.reader(&experiment.id).expect("just listed");
//!     let summary = reader.metrics_summary()?;
//!     println!("{}: best {:.3} over {} programs", experiment.name, summary.best_score, summary.total_programs);
//! }
//! # Ok::<(), evoscope::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod reader;
pub mod registry;
pub mod watch;

pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use manager::{ExperimentManager, RescanHandle};
pub use model::{ChangeEvent, EventType, Experiment, ExperimentStatus, FormatName, Program};
pub use reader::{Capabilities, StoreReader};
pub use registry::{ChangeStrategy, FormatDescriptor, FormatRegistry};
pub use watch::{ChangeEngine, WatchState};
