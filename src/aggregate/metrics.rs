//! Score statistics and per-generation histories

use std::collections::BTreeMap;

use crate::model::{MetricsSummary, ProgramBrief, TimeSeriesPoint};

/// Build a [`MetricsSummary`] from a program snapshot.
///
/// `improvement_rate`, `map_elites_grid` and the LLM counters are left at
/// their defaults; each reader fills them from its own sources.
#[must_use]
pub fn summarize(programs: &[ProgramBrief]) -> MetricsSummary {
    if programs.is_empty() {
        return MetricsSummary::default();
    }

    let mut scores: Vec<f64> = programs.iter().map(|p| p.score).collect();
    scores.sort_by(f64::total_cmp);

    let count = scores.len();
    let best_score = scores[count - 1];
    let mean_score = scores.iter().sum::<f64>() / count as f64;
    let median_score = median(&scores);

    let (t_min, t_max) = programs.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        (lo.min(p.timestamp), hi.max(p.timestamp))
    });
    let time_elapsed = (t_max - t_min).max(0.0);
    let programs_per_minute = if time_elapsed > 0.0 {
        count as f64 / (time_elapsed / 60.0)
    } else {
        0.0
    };

    let mut per_gen: BTreeMap<u64, GenerationStats> = BTreeMap::new();
    let mut per_island: BTreeMap<u32, BTreeMap<u64, GenerationStats>> = BTreeMap::new();
    for p in programs {
        per_gen.entry(p.generation).or_default().add(p);
        if let Some(island) = p.island_id {
            per_island
                .entry(island)
                .or_default()
                .entry(p.generation)
                .or_default()
                .add(p);
        }
    }

    let mean_score_history = per_gen
        .iter()
        .map(|(&generation, s)| TimeSeriesPoint {
            generation,
            value: s.sum / s.count as f64,
            timestamp: s.last_timestamp,
        })
        .collect();

    MetricsSummary {
        total_programs: count,
        best_score,
        mean_score,
        median_score,
        current_generation: per_gen.keys().next_back().copied().unwrap_or(0),
        programs_per_minute,
        improvement_rate: 0.0,
        time_elapsed,
        best_score_history: best_history(&per_gen),
        mean_score_history,
        per_island_best: per_island
            .iter()
            .map(|(&island, gens)| (island, best_history(gens)))
            .collect(),
        score_distribution: scores,
        map_elites_grid: None,
        total_llm_calls: 0,
    }
}

/// Fraction of `(parent_score, child_score)` derivations where the child
/// beat its parent; 0.0 when there are none.
#[must_use]
pub fn improvement_rate<I>(derivations: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (total, improved) = derivations
        .into_iter()
        .fold((0usize, 0usize), |(total, improved), (parent, child)| {
            (total + 1, improved + usize::from(child > parent))
        });
    if total == 0 {
        0.0
    } else {
        improved as f64 / total as f64
    }
}

/// Turn per-point values into a running maximum, in place.
///
/// The first point seeds the maximum, so all-negative series stay negative.
pub fn running_max(points: &mut [TimeSeriesPoint]) {
    let mut best = f64::NEG_INFINITY;
    for point in points {
        best = best.max(point.value);
        point.value = best;
    }
}

#[derive(Debug, Clone, Copy)]
struct GenerationStats {
    best: f64,
    sum: f64,
    count: usize,
    last_timestamp: f64,
}

impl Default for GenerationStats {
    fn default() -> Self {
        Self {
            best: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
            last_timestamp: 0.0,
        }
    }
}

impl GenerationStats {
    fn add(&mut self, p: &ProgramBrief) {
        self.best = self.best.max(p.score);
        self.sum += p.score;
        self.count += 1;
        self.last_timestamp = self.last_timestamp.max(p.timestamp);
    }
}

fn best_history(per_gen: &BTreeMap<u64, GenerationStats>) -> Vec<TimeSeriesPoint> {
    let mut points: Vec<TimeSeriesPoint> = per_gen
        .iter()
        .map(|(&generation, s)| TimeSeriesPoint {
            generation,
            value: s.best,
            timestamp: s.last_timestamp,
        })
        .collect();
    running_max(&mut points);
    points
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(id: &str, generation: u64, island: Option<u32>, score: f64, ts: f64) -> ProgramBrief {
        ProgramBrief {
            id: id.to_string(),
            generation,
            island_id: island,
            score,
            timestamp: ts,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_snapshot_is_zeroed() {
        let summary = summarize(&[]);
        assert_eq!(summary, MetricsSummary::default());
    }

    #[test]
    fn test_best_mean_median() {
        let programs = vec![
            brief("a", 0, None, 1.0, 0.0),
            brief("b", 0, None, 2.0, 0.0),
            brief("c", 1, None, 6.0, 0.0),
        ];
        let s = summarize(&programs);
        assert_eq!(s.total_programs, 3);
        assert_eq!(s.best_score, 6.0);
        assert_eq!(s.mean_score, 3.0);
        assert_eq!(s.median_score, 2.0);
        assert_eq!(s.score_distribution, vec![1.0, 2.0, 6.0]);
        assert_eq!(s.current_generation, 1);
    }

    #[test]
    fn test_even_median_averages_middle_pair() {
        let programs = vec![
            brief("a", 0, None, 1.0, 0.0),
            brief("b", 0, None, 2.0, 0.0),
            brief("c", 0, None, 3.0, 0.0),
            brief("d", 0, None, 10.0, 0.0),
        ];
        assert_eq!(summarize(&programs).median_score, 2.5);
    }

    #[test]
    fn test_throughput_uses_elapsed_minutes() {
        let programs = vec![
            brief("a", 0, None, 1.0, 1000.0),
            brief("b", 1, None, 1.0, 1060.0),
            brief("c", 2, None, 1.0, 1120.0),
        ];
        let s = summarize(&programs);
        assert_eq!(s.time_elapsed, 120.0);
        assert!((s.programs_per_minute - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_elapsed_has_zero_throughput() {
        let programs = vec![brief("a", 0, None, 1.0, 5.0), brief("b", 0, None, 1.0, 5.0)];
        assert_eq!(summarize(&programs).programs_per_minute, 0.0);
    }

    #[test]
    fn test_best_history_is_running_max_and_mean_is_not() {
        let programs = vec![
            brief("a", 0, None, 5.0, 0.0),
            brief("b", 1, None, 1.0, 0.0),
            brief("c", 1, None, 3.0, 0.0),
            brief("d", 2, None, 7.0, 0.0),
        ];
        let s = summarize(&programs);
        let best: Vec<f64> = s.best_score_history.iter().map(|p| p.value).collect();
        let mean: Vec<f64> = s.mean_score_history.iter().map(|p| p.value).collect();
        assert_eq!(best, vec![5.0, 5.0, 7.0]);
        assert_eq!(mean, vec![5.0, 2.0, 7.0]);
    }

    #[test]
    fn test_negative_scores_are_not_clamped() {
        let programs = vec![brief("a", 0, None, -3.0, 0.0), brief("b", 1, None, -1.0, 0.0)];
        let s = summarize(&programs);
        assert_eq!(s.best_score_history[0].value, -3.0);
        assert_eq!(s.best_score_history[1].value, -1.0);
    }

    #[test]
    fn test_per_island_running_max() {
        let programs = vec![
            brief("a", 0, Some(0), 4.0, 0.0),
            brief("b", 1, Some(0), 2.0, 0.0),
            brief("c", 0, Some(1), 1.0, 0.0),
            brief("d", 1, None, 9.0, 0.0),
        ];
        let s = summarize(&programs);
        let island0: Vec<f64> = s.per_island_best[&0].iter().map(|p| p.value).collect();
        assert_eq!(island0, vec![4.0, 4.0]);
        assert_eq!(s.per_island_best[&1].len(), 1);
        assert_eq!(s.per_island_best.len(), 2);
    }

    #[test]
    fn test_improvement_rate() {
        assert_eq!(improvement_rate(Vec::new()), 0.0);
        assert_eq!(improvement_rate(vec![(1.0, 2.0), (2.0, 1.0), (1.0, 1.0), (0.0, 0.5)]), 0.5);
    }
}
