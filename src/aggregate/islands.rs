//! Island state and migration flattening

use std::collections::{BTreeMap, HashMap};

use crate::model::{Island, MigrationEvent, MigrationRecord, ProgramBrief};

/// Islands from an explicit membership list (island index = list position).
///
/// Member ids missing from `programs` still count toward `program_count`
/// but cannot be the island's best. `generations[i]` is island `i`'s
/// generation counter, 0 when absent.
#[must_use]
pub fn from_membership(
    membership: &[Vec<String>],
    programs: &[ProgramBrief],
    generations: &[u64],
) -> Vec<Island> {
    let by_id: HashMap<&str, &ProgramBrief> = programs.iter().map(|p| (p.id.as_str(), p)).collect();

    membership
        .iter()
        .enumerate()
        .map(|(idx, ids)| {
            let best = ids
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .fold(None::<&ProgramBrief>, |best, p| match best {
                    Some(b) if b.score >= p.score => Some(b),
                    _ => Some(p),
                });
            Island {
                island_id: u32::try_from(idx).unwrap_or(u32::MAX),
                program_count: ids.len(),
                best_score: best.map_or(0.0, |p| p.score),
                best_program_id: best.map(|p| p.id.clone()),
                current_generation: generations.get(idx).copied().unwrap_or(0),
                program_ids: ids.clone(),
            }
        })
        .collect()
}

/// Islands grouped from each program's own island tag, ascending by id.
///
/// Programs without an island are ignored. The island's generation is the
/// highest generation among its members.
#[must_use]
pub fn from_programs(programs: &[ProgramBrief]) -> Vec<Island> {
    let mut islands: BTreeMap<u32, Island> = BTreeMap::new();
    for p in programs {
        let Some(island_id) = p.island_id else { continue };
        let island = islands.entry(island_id).or_insert_with(|| Island {
            island_id,
            best_score: f64::NEG_INFINITY,
            ..Island::default()
        });
        island.program_count += 1;
        island.current_generation = island.current_generation.max(p.generation);
        island.program_ids.push(p.id.clone());
        if p.score > island.best_score {
            island.best_score = p.score;
            island.best_program_id = Some(p.id.clone());
        }
    }
    islands.into_values().collect()
}

/// Flatten per-program migration histories into one event list, sorted
/// ascending by timestamp (stable for equal timestamps).
#[must_use]
pub fn flatten_migrations<'a, I>(histories: I) -> Vec<MigrationEvent>
where
    I: IntoIterator<Item = (&'a str, f64, &'a [MigrationRecord])>,
{
    let mut events: Vec<MigrationEvent> = histories
        .into_iter()
        .flat_map(|(program_id, score, history)| {
            history.iter().map(move |m| MigrationEvent {
                timestamp: m.timestamp,
                program_id: program_id.to_string(),
                from_island: m.from_island,
                to_island: m.to_island,
                score,
            })
        })
        .collect();
    events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(id: &str, island: Option<u32>, generation: u64, score: f64) -> ProgramBrief {
        ProgramBrief {
            id: id.to_string(),
            island_id: island,
            generation,
            score,
            ..Default::default()
        }
    }

    #[test]
    fn test_from_membership_picks_best_present_member() {
        let programs = vec![brief("a", Some(0), 0, 1.0), brief("b", Some(0), 1, 3.0)];
        let membership = vec![
            vec!["a".to_string(), "b".to_string(), "ghost".to_string()],
            vec![],
        ];
        let islands = from_membership(&membership, &programs, &[4]);
        assert_eq!(islands.len(), 2);
        assert_eq!(islands[0].program_count, 3);
        assert_eq!(islands[0].best_program_id.as_deref(), Some("b"));
        assert_eq!(islands[0].best_score, 3.0);
        assert_eq!(islands[0].current_generation, 4);
        assert_eq!(islands[1].best_program_id, None);
        assert_eq!(islands[1].current_generation, 0);
    }

    #[test]
    fn test_from_programs_groups_by_island() {
        let programs = vec![
            brief("a", Some(1), 2, -1.0),
            brief("b", Some(0), 5, 2.0),
            brief("c", Some(1), 7, -0.5),
            brief("d", None, 9, 100.0),
        ];
        let islands = from_programs(&programs);
        assert_eq!(islands.len(), 2);
        assert_eq!(islands[0].island_id, 0);
        assert_eq!(islands[1].program_count, 2);
        assert_eq!(islands[1].best_program_id.as_deref(), Some("c"));
        assert_eq!(islands[1].best_score, -0.5);
        assert_eq!(islands[1].current_generation, 7);
    }

    #[test]
    fn test_flatten_migrations_sorted() {
        let h1 = vec![MigrationRecord { timestamp: 30.0, from_island: 0, to_island: 1 }];
        let h2 = vec![
            MigrationRecord { timestamp: 10.0, from_island: 1, to_island: 2 },
            MigrationRecord { timestamp: 20.0, from_island: 2, to_island: 0 },
        ];
        let events = flatten_migrations(vec![("p1", 1.0, h1.as_slice()), ("p2", 2.0, h2.as_slice())]);
        let times: Vec<f64> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![10.0, 20.0, 30.0]);
        assert_eq!(events[2].program_id, "p1");
        assert_eq!(events[0].score, 2.0);
    }
}
