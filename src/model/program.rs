//! Program - one evolved candidate and its brief projection

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metric name to value. Non-finite inputs are stored as `None`.
pub type Metrics = BTreeMap<String, Option<f64>>;

/// One evolved candidate program.
///
/// ## Invariants
///
/// - `score` and every `Some` in `metrics` are finite.
/// - `children_count` is derived from the parent pointers of the snapshot
///   the program was read from; it is never taken from storage as-is.
/// - `code_diff` is only ever what the store carried. Nothing synthesises it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Program {
    /// Identifier, unique within one experiment
    pub id: String,
    /// Source code text
    pub code: String,
    /// Language tag
    pub language: String,

    /// Parent program, if any (forest, never a DAG)
    pub parent_id: Option<String>,
    /// Generation (0 for seeds)
    pub generation: u64,
    /// Island the program lives on
    pub island_id: Option<u32>,
    /// Creation time, seconds since the Unix epoch
    pub timestamp: f64,
    /// Iteration at which the program was found
    pub iteration_found: u64,

    /// Composite score (see the reader docs for how each format derives it)
    pub score: f64,
    /// Sanitised metrics
    pub metrics: Metrics,
    /// Whether the program passed correctness checks
    pub correct: bool,

    /// Complexity feature
    pub complexity: f64,
    /// Diversity feature
    pub diversity: f64,

    /// Diff against the parent, when the store recorded one
    pub code_diff: Option<String>,
    /// Free-text description of the change
    pub changes_description: String,

    /// Raw prompt payloads, keyed by mutation/operator tag
    pub prompts: Option<Value>,
    /// First LLM response found in the prompts
    pub llm_response: Option<String>,

    /// Artifact payload
    pub artifacts: Option<Value>,
    /// Evaluator feedback text
    pub text_feedback: Option<String>,

    /// 2D embedding projection
    pub embedding_2d: Option<Vec<f64>>,
    /// 3D embedding projection
    pub embedding_3d: Option<Vec<f64>>,
    /// Embedding cluster
    pub embedding_cluster_id: Option<i64>,

    /// Number of programs naming this one as parent (derived)
    pub children_count: usize,
    /// Archive membership
    pub in_archive: bool,
    /// Island moves, oldest first as stored
    pub migration_history: Vec<MigrationRecord>,
    /// Programs used as inspiration
    pub inspiration_ids: Vec<String>,

    /// Format-specific extras
    pub metadata: Map<String, Value>,
}

impl Program {
    /// Create a program with the given id and code; every other field
    /// takes its default (`language` is `"python"`, `correct` is true).
    #[must_use]
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            language: "python".to_string(),
            correct: true,
            ..Self::default()
        }
    }

    /// Project to the brief form used by lineage and metrics.
    #[must_use]
    pub fn brief(&self) -> ProgramBrief {
        ProgramBrief {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            generation: self.generation,
            island_id: self.island_id,
            score: self.score,
            timestamp: self.timestamp,
            correct: self.correct,
            complexity: self.complexity,
            in_archive: self.in_archive,
            children_count: self.children_count,
            changes_description: self.changes_description.clone(),
        }
    }
}

/// Minimal projection of a [`Program`] without code bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgramBrief {
    /// Program id
    pub id: String,
    /// Parent id
    pub parent_id: Option<String>,
    /// Generation
    pub generation: u64,
    /// Island
    pub island_id: Option<u32>,
    /// Composite score
    pub score: f64,
    /// Creation time, seconds since the Unix epoch
    pub timestamp: f64,
    /// Correctness flag
    pub correct: bool,
    /// Complexity feature
    pub complexity: f64,
    /// Archive membership
    pub in_archive: bool,
    /// Derived children count
    pub children_count: usize,
    /// Change description
    pub changes_description: String,
}

/// One island move recorded on a program.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MigrationRecord {
    /// When the move happened
    pub timestamp: f64,
    /// Source island
    pub from_island: u32,
    /// Destination island
    pub to_island: u32,
}

impl MigrationRecord {
    /// Parse one stored history entry. Entries that are not objects are
    /// rejected; missing or non-numeric fields fall back to zero.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let island = |key: &str| {
            obj.get(key)
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0)
        };
        Some(Self {
            timestamp: obj.get("timestamp").and_then(json_finite).unwrap_or(0.0),
            from_island: island("from_island"),
            to_island: island("to_island"),
        })
    }
}

/// `Some(v)` when `v` is finite.
#[must_use]
pub fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Finite numeric JSON value. Booleans and strings are not numbers.
#[must_use]
pub fn json_finite(value: &Value) -> Option<f64> {
    value.as_f64().and_then(finite)
}

/// Normalise a raw metrics object: finite numbers pass through, anything
/// else (NaN, infinities, strings, nulls, nested objects) becomes `None`.
#[must_use]
pub fn sanitize_metrics(raw: &Map<String, Value>) -> Metrics {
    raw.iter()
        .map(|(k, v)| (k.clone(), json_finite(v)))
        .collect()
}

/// Sum of the finite metric values; 0.0 for an empty map or when the sum
/// overflows.
#[must_use]
pub fn composite_score(metrics: &Metrics) -> f64 {
    finite(metrics.values().flatten().sum()).unwrap_or(0.0)
}

/// Convert a JSON array to a finite float vector. Any non-finite or
/// non-numeric component rejects the whole vector.
#[must_use]
pub fn finite_vector(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(json_finite).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_program_new_defaults() {
        let p = Program::new("a", "print(1)");
        assert_eq!(p.id, "a");
        assert_eq!(p.language, "python");
        assert!(p.correct);
        assert_eq!(p.children_count, 0);
    }

    #[test]
    fn test_sanitize_metrics_nulls_non_finite() {
        let raw = json!({"x": 1.5, "y": "n/a", "z": null, "flag": true});
        let metrics = sanitize_metrics(raw.as_object().unwrap());
        assert_eq!(metrics["x"], Some(1.5));
        assert_eq!(metrics["y"], None);
        assert_eq!(metrics["z"], None);
        assert_eq!(metrics["flag"], None);
        assert!((composite_score(&metrics) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_composite_score_overflow_is_zero() {
        let metrics: Metrics = [("a", 1e308), ("b", 1e308)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Some(v)))
            .collect();
        assert_eq!(composite_score(&metrics), 0.0);

        let negative: Metrics = [("a", -1e308), ("b", -1e308), ("c", 2.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Some(v)))
            .collect();
        assert_eq!(composite_score(&negative), 0.0);
    }

    #[test]
    fn test_finite_rejects_nan_and_inf() {
        assert_eq!(finite(f64::NAN), None);
        assert_eq!(finite(f64::INFINITY), None);
        assert_eq!(finite(2.0), Some(2.0));
    }

    #[test]
    fn test_migration_record_from_value() {
        let rec = MigrationRecord::from_value(&json!({"timestamp": 5.0, "from_island": 1, "to_island": 2}))
            .unwrap();
        assert_eq!(rec.from_island, 1);
        assert_eq!(rec.to_island, 2);
        assert!(MigrationRecord::from_value(&json!("garbage")).is_none());
    }

    #[test]
    fn test_finite_vector() {
        assert_eq!(finite_vector(&json!([1.0, 2.0])), Some(vec![1.0, 2.0]));
        assert_eq!(finite_vector(&json!([1.0, "x"])), None);
        assert_eq!(finite_vector(&json!({})), None);
    }
}
