//! LLM cost and model-usage analytics

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::model::{
    json_finite, AnalyticsSummary, CostTimeSeriesPoint, ModelPosteriorPoint, ModelUsageStats,
};

/// Cost-relevant slice of one program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostSample {
    /// Program id
    pub id: String,
    /// Parent id
    pub parent_id: Option<String>,
    /// Generation
    pub generation: u64,
    /// Composite score
    pub score: f64,
    /// API cost
    pub api_cost: f64,
    /// Embedding cost
    pub embed_cost: f64,
    /// Novelty-check cost
    pub novelty_cost: f64,
    /// Meta-prompt cost
    pub meta_cost: f64,
    /// Model that produced the program
    pub model_name: Option<String>,
    /// Model-selection posteriors at the time
    pub posteriors: Option<BTreeMap<String, f64>>,
    /// Patch tag (`diff`, `full`, `cross`, ...)
    pub patch_type: Option<String>,
}

impl CostSample {
    /// Extract cost fields from a program's metadata object.
    ///
    /// Recognised keys: `api_costs`, `embed_cost`, `novelty_cost`,
    /// `meta_cost`, `patch_type`, `model_name`, and under `llm_result`:
    /// `model_name` (preferred) and `model_posteriors`. Non-finite or
    /// non-numeric costs count as zero.
    #[must_use]
    pub fn from_metadata(
        id: impl Into<String>,
        parent_id: Option<String>,
        generation: u64,
        score: f64,
        meta: &Map<String, Value>,
    ) -> Self {
        let cost = |key: &str| meta.get(key).and_then(json_finite).unwrap_or(0.0);
        let llm = meta.get("llm_result").and_then(Value::as_object);
        let non_empty = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);

        let model_name = llm
            .and_then(|l| l.get("model_name"))
            .and_then(non_empty)
            .or_else(|| meta.get("model_name").and_then(non_empty));

        let posteriors = llm
            .and_then(|l| l.get("model_posteriors"))
            .and_then(Value::as_object)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.iter()
                    .filter_map(|(k, v)| json_finite(v).map(|w| (k.clone(), w)))
                    .collect()
            });

        Self {
            id: id.into(),
            parent_id,
            generation,
            score,
            api_cost: cost("api_costs"),
            embed_cost: cost("embed_cost"),
            novelty_cost: cost("novelty_cost"),
            meta_cost: cost("meta_cost"),
            model_name,
            posteriors,
            patch_type: meta.get("patch_type").and_then(non_empty),
        }
    }

    fn total(&self) -> f64 {
        self.api_cost + self.embed_cost + self.novelty_cost + self.meta_cost
    }
}

#[derive(Default)]
struct ModelAccumulator {
    uses: usize,
    cost: f64,
    improvements: usize,
    delta_sum: f64,
    delta_count: usize,
}

/// Build an [`AnalyticsSummary`] from samples in timestamp order.
///
/// When several samples in one generation carry posteriors, the last one
/// wins.
#[must_use]
pub fn summarize(samples: &[CostSample]) -> AnalyticsSummary {
    if samples.is_empty() {
        return AnalyticsSummary::default();
    }

    let scores: HashMap<&str, f64> = samples.iter().map(|s| (s.id.as_str(), s.score)).collect();

    let mut per_gen: BTreeMap<u64, CostTimeSeriesPoint> = BTreeMap::new();
    let mut models: BTreeMap<&str, ModelAccumulator> = BTreeMap::new();
    let mut posteriors: BTreeMap<u64, &BTreeMap<String, f64>> = BTreeMap::new();
    let mut patch_type_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut summary = AnalyticsSummary::default();

    for s in samples {
        summary.total_api_cost += s.api_cost;
        summary.total_embed_cost += s.embed_cost;
        summary.total_novelty_cost += s.novelty_cost;
        summary.total_meta_cost += s.meta_cost;

        let point = per_gen.entry(s.generation).or_insert_with(|| CostTimeSeriesPoint {
            generation: s.generation,
            ..CostTimeSeriesPoint::default()
        });
        point.api_cost += s.api_cost;
        point.embed_cost += s.embed_cost;
        point.novelty_cost += s.novelty_cost;
        point.meta_cost += s.meta_cost;

        if let Some(name) = s.model_name.as_deref() {
            let acc = models.entry(name).or_default();
            acc.uses += 1;
            acc.cost += s.api_cost;
            let parent_score = s.parent_id.as_deref().and_then(|p| scores.get(p));
            if let Some(&parent_score) = parent_score {
                let delta = s.score - parent_score;
                acc.delta_sum += delta;
                acc.delta_count += 1;
                if delta > 0.0 {
                    acc.improvements += 1;
                }
            }
        }

        if let Some(p) = &s.posteriors {
            posteriors.insert(s.generation, p);
        }
        if let Some(tag) = &s.patch_type {
            *patch_type_distribution.entry(tag.clone()).or_insert(0) += 1;
        }
    }

    let mut cumulative = 0.0;
    summary.cost_time_series = per_gen
        .into_values()
        .map(|mut point| {
            cumulative += point.api_cost + point.embed_cost + point.novelty_cost + point.meta_cost;
            point.cumulative_cost = cumulative;
            point
        })
        .collect();

    let mut model_usage: Vec<ModelUsageStats> = models
        .into_iter()
        .map(|(name, acc)| ModelUsageStats {
            model_name: name.to_string(),
            total_uses: acc.uses,
            total_cost: acc.cost,
            improvements: acc.improvements,
            improvement_rate: acc.improvements as f64 / acc.uses as f64,
            avg_score_delta: if acc.delta_count == 0 {
                0.0
            } else {
                acc.delta_sum / acc.delta_count as f64
            },
        })
        .collect();
    // stable: equal use counts stay in name order
    model_usage.sort_by(|a, b| b.total_uses.cmp(&a.total_uses));
    summary.model_usage = model_usage;

    summary.model_posteriors_over_time = posteriors
        .into_iter()
        .map(|(generation, p)| ModelPosteriorPoint {
            generation,
            posteriors: p.clone(),
        })
        .collect();
    summary.patch_type_distribution = patch_type_distribution;
    summary.total_cost = samples.iter().map(CostSample::total).sum();
    summary
}
