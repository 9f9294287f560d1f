//! Checkpoint directory reader
//!
//! Layout understood:
//!
//! ```text
//! <root>/
//! ├── config.yaml                  (optional)
//! ├── evolution_trace.jsonl        (optional, or traces/evolution_trace.jsonl)
//! └── checkpoints/                 (optional container)
//!     └── checkpoint_<n>/
//!         ├── metadata.json        islands, archive, best_program_id, ...
//!         └── programs/<id>.json   one document per program
//! ```
//!
//! Only the most recently modified checkpoint is read. Its parsed form is
//! cached and reused until the metadata document's mtime changes.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::json::{json_string, json_string_list, json_u32, json_u64, parse_relaxed};
use super::query::{paginate, sort_programs, ConversationQuery, Page, ProgramQuery};
use super::{load_yaml_config, modified_secs, StoreReader};
use crate::aggregate::{islands, lineage, metrics};
use crate::model::{
    composite_score, experiment_id, display_name, json_finite, now_epoch_secs, sanitize_metrics,
    ConversationEntry, Experiment, ExperimentStatus, FormatName, GridCell, Island, LineageTree,
    MapElitesGrid, MetricsSummary, MigrationEvent, MigrationRecord, Program, ProgramBrief,
    StatusThresholds,
};
use crate::Result;

const METADATA_FILE: &str = "metadata.json";
const PROGRAMS_DIR: &str = "programs";
const TRACE_FILE: &str = "evolution_trace.jsonl";

/// Reader for checkpoint-directory experiments.
pub struct CheckpointReader {
    root: PathBuf,
    format: FormatName,
    thresholds: StatusThresholds,
    cache: Mutex<Option<CacheEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Marker {
    checkpoint: PathBuf,
    metadata_mtime: Option<SystemTime>,
}

struct CacheEntry {
    marker: Marker,
    snapshot: Arc<Snapshot>,
}

#[derive(Default)]
struct Snapshot {
    checkpoint: Option<PathBuf>,
    metadata: CheckpointMetadata,
    programs: Vec<Program>,
    index: HashMap<String, usize>,
    traces: Vec<TraceEntry>,
}

impl Snapshot {
    fn briefs(&self) -> Vec<ProgramBrief> {
        self.programs.iter().map(Program::brief).collect()
    }

    fn score_of(&self, id: &str) -> Option<f64> {
        self.index.get(id).map(|&i| self.programs[i].score)
    }
}

#[derive(Debug, Default)]
struct CheckpointMetadata {
    islands: Vec<Vec<String>>,
    archive: HashSet<String>,
    best_program_id: Option<String>,
    last_iteration: u64,
    island_generations: Vec<u64>,
    feature_maps: Vec<Vec<(String, String)>>,
    feature_stats: Value,
}

impl CheckpointMetadata {
    fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key).unwrap_or(&Value::Null);
        let feature_maps = field("island_feature_maps")
            .as_array()
            .map(|maps| {
                maps.iter()
                    .filter_map(Value::as_object)
                    .map(|m| {
                        m.iter()
                            .filter_map(|(coord, id)| json_string(id).map(|id| (coord.clone(), id)))
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            islands: field("islands")
                .as_array()
                .map(|lists| lists.iter().map(json_string_list).collect())
                .unwrap_or_default(),
            archive: json_string_list(field("archive")).into_iter().collect(),
            best_program_id: json_string(field("best_program_id")),
            last_iteration: json_u64(field("last_iteration")).unwrap_or(0),
            island_generations: field("island_generations")
                .as_array()
                .map(|gens| gens.iter().map(|g| json_u64(g).unwrap_or(0)).collect())
                .unwrap_or_default(),
            feature_maps,
            feature_stats: value
                .get("feature_stats")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
        }
    }
}

/// One parent-to-child derivation from the trace log.
#[derive(Debug, Clone, Default)]
struct TraceEntry {
    child_id: String,
    parent_id: Option<String>,
    iteration: u64,
    generation: u64,
    island_id: Option<u32>,
    timestamp: f64,
    child_score: f64,
    parent_score: f64,
    system_prompt: Option<String>,
    user_prompt: Option<String>,
    llm_response: Option<String>,
    code_diff: Option<String>,
    mutation_type: String,
}

impl TraceEntry {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let score = |key: &str| {
            obj.get(key)
                .and_then(Value::as_object)
                .map_or(0.0, |m| composite_score(&sanitize_metrics(m)))
        };
        let prompt = obj.get("prompt").and_then(Value::as_object);
        let prompt_text = |key: &str| prompt.and_then(|p| p.get(key)).and_then(json_string);

        Some(Self {
            child_id: obj.get("child_id").and_then(json_string).unwrap_or_default(),
            parent_id: obj.get("parent_id").and_then(json_string),
            iteration: obj.get("iteration").and_then(json_u64).unwrap_or(0),
            generation: obj.get("generation").and_then(json_u64).unwrap_or(0),
            island_id: obj.get("island_id").and_then(json_u32),
            timestamp: obj.get("timestamp").and_then(json_finite).unwrap_or(0.0),
            child_score: score("child_metrics"),
            parent_score: score("parent_metrics"),
            system_prompt: prompt_text("system"),
            user_prompt: prompt_text("user"),
            llm_response: obj.get("llm_response").and_then(json_string),
            code_diff: obj.get("code_diff").and_then(json_string),
            mutation_type: obj
                .get("metadata")
                .and_then(|m| m.get("mutation_type"))
                .and_then(json_string)
                .unwrap_or_else(|| "diff".to_string()),
        })
    }

    fn to_conversation(&self) -> ConversationEntry {
        ConversationEntry {
            program_id: self.child_id.clone(),
            parent_id: self.parent_id.clone(),
            iteration: self.iteration,
            generation: self.generation,
            island_id: self.island_id,
            timestamp: self.timestamp,
            system_prompt: self.system_prompt.clone(),
            user_prompt: self.user_prompt.clone(),
            llm_response: self.llm_response.clone(),
            score: self.child_score,
            parent_score: self.parent_score,
            improvement_delta: self.child_score - self.parent_score,
            mutation_type: self.mutation_type.clone(),
            code_diff: self.code_diff.clone(),
        }
    }
}

impl CheckpointReader {
    /// Create a reader for the experiment rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, thresholds: StatusThresholds) -> Self {
        Self {
            root: root.into(),
            format: FormatName::from_static("openevolve"),
            thresholds,
            cache: Mutex::new(None),
        }
    }

    /// Report a different format name (for formats sharing this layout).
    #[must_use]
    pub fn with_format(mut self, format: FormatName) -> Self {
        self.format = format;
        self
    }

    /// Checkpoint directory currently being read, if any.
    #[must_use]
    pub fn current_checkpoint(&self) -> Option<PathBuf> {
        latest_checkpoint(&self.root)
    }

    /// Current snapshot, reloaded only when the checkpoint or its metadata
    /// mtime changed. The lock is never held during I/O.
    fn snapshot(&self) -> Arc<Snapshot> {
        let Some(checkpoint) = latest_checkpoint(&self.root) else {
            return Arc::new(Snapshot::default());
        };
        let marker = Marker {
            metadata_mtime: fs::metadata(checkpoint.join(METADATA_FILE))
                .and_then(|m| m.modified())
                .ok(),
            checkpoint,
        };

        if let Some(entry) = self.cache.lock().as_ref() {
            if entry.marker == marker {
                return Arc::clone(&entry.snapshot);
            }
        }

        let snapshot = Arc::new(load_snapshot(&self.root, &marker.checkpoint));
        info!(
            checkpoint = %marker.checkpoint.display(),
            programs = snapshot.programs.len(),
            traces = snapshot.traces.len(),
            "Loaded checkpoint"
        );
        *self.cache.lock() = Some(CacheEntry {
            marker,
            snapshot: Arc::clone(&snapshot),
        });
        snapshot
    }

    fn config(&self, checkpoint: Option<&Path>) -> Option<Value> {
        let mut candidates = vec![self.root.join("config.yaml"), self.root.join("config.yml")];
        if let Some(grandparent) = checkpoint.and_then(Path::parent).and_then(Path::parent) {
            candidates.push(grandparent.join("config.yaml"));
        }
        load_yaml_config(&candidates)
    }
}

impl StoreReader for CheckpointReader {
    fn format(&self) -> &FormatName {
        &self.format
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn experiment_info(&self) -> Result<Experiment> {
        let snapshot = self.snapshot();
        let last_modified = self.last_modified();

        let best_score = snapshot
            .metadata
            .best_program_id
            .as_deref()
            .and_then(|id| snapshot.score_of(id))
            .or_else(|| snapshot.programs.iter().map(|p| p.score).reduce(f64::max))
            .unwrap_or(0.0);

        Ok(Experiment {
            id: experiment_id(&self.format, &self.root),
            name: display_name(&self.root),
            framework: self.format.clone(),
            path: self.root.clone(),
            status: ExperimentStatus::infer(last_modified, now_epoch_secs(), self.thresholds),
            last_modified,
            total_programs: snapshot.programs.len(),
            best_score,
            current_generation: snapshot.programs.iter().map(|p| p.generation).max().unwrap_or(0),
            num_islands: snapshot.metadata.islands.len(),
            last_iteration: snapshot.metadata.last_iteration,
            config: self.config(snapshot.checkpoint.as_deref()),
        })
    }

    fn list_programs(&self, query: &ProgramQuery) -> Result<Page<Program>> {
        let snapshot = self.snapshot();
        let mut programs: Vec<Program> = snapshot
            .programs
            .iter()
            .filter(|p| query.filter.matches(p))
            .cloned()
            .collect();
        sort_programs(&mut programs, query.sort, query.direction);
        Ok(paginate(programs, query.pagination))
    }

    fn get_program(&self, id: &str) -> Result<Option<Program>> {
        let snapshot = self.snapshot();
        let Some(&i) = snapshot.index.get(id) else {
            return Ok(None);
        };
        let mut program = snapshot.programs[i].clone();
        if program.code_diff.is_none() {
            program.code_diff = snapshot
                .traces
                .iter()
                .find(|t| t.child_id == id)
                .and_then(|t| t.code_diff.clone());
        }
        Ok(Some(program))
    }

    fn list_programs_brief(&self) -> Result<Vec<ProgramBrief>> {
        Ok(self.snapshot().briefs())
    }

    fn list_conversations(&self, query: &ConversationQuery) -> Result<Page<ConversationEntry>> {
        let snapshot = self.snapshot();
        let mut entries: Vec<ConversationEntry> =
            snapshot.traces.iter().map(TraceEntry::to_conversation).collect();
        if entries.is_empty() {
            entries = snapshot.programs.iter().flat_map(prompt_conversations).collect();
        }

        entries.retain(|e| {
            (!query.improvements_only || e.improvement_delta > 0.0)
                && query.island_id.map_or(true, |i| e.island_id == Some(i))
        });
        entries.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        Ok(paginate(entries, query.pagination))
    }

    fn metrics_summary(&self) -> Result<MetricsSummary> {
        let snapshot = self.snapshot();
        let mut summary = metrics::summarize(&snapshot.briefs());
        summary.improvement_rate =
            metrics::improvement_rate(snapshot.traces.iter().map(|t| (t.parent_score, t.child_score)));
        summary.total_llm_calls = snapshot.traces.len();

        if !snapshot.metadata.feature_maps.is_empty() {
            let cells = snapshot
                .metadata
                .feature_maps
                .iter()
                .flatten()
                .filter_map(|(coord, id)| {
                    snapshot.score_of(id).map(|score| {
                        (
                            coord.clone(),
                            GridCell {
                                program_id: id.clone(),
                                score,
                            },
                        )
                    })
                })
                .collect();
            summary.map_elites_grid = Some(MapElitesGrid {
                cells,
                feature_stats: snapshot.metadata.feature_stats.clone(),
            });
        }
        Ok(summary)
    }

    fn islands_and_migrations(&self) -> Result<(Vec<Island>, Vec<MigrationEvent>)> {
        let snapshot = self.snapshot();
        let islands = islands::from_membership(
            &snapshot.metadata.islands,
            &snapshot.briefs(),
            &snapshot.metadata.island_generations,
        );
        let migrations = islands::flatten_migrations(
            snapshot
                .programs
                .iter()
                .map(|p| (p.id.as_str(), p.score, p.migration_history.as_slice())),
        );
        Ok((islands, migrations))
    }

    fn lineage(&self, root: Option<&str>) -> Result<LineageTree> {
        let snapshot = self.snapshot();
        let tree = lineage::build(&snapshot.briefs(), snapshot.metadata.best_program_id.as_deref());
        Ok(match root {
            Some(root) => lineage::restrict(tree, root),
            None => tree,
        })
    }

    fn search_code(&self, query: &str, max_results: usize) -> Result<Vec<Program>> {
        let needle = query.to_lowercase();
        Ok(self
            .snapshot()
            .programs
            .iter()
            .filter(|p| p.code.to_lowercase().contains(&needle))
            .take(max_results)
            .cloned()
            .collect())
    }

    fn last_modified(&self) -> f64 {
        latest_checkpoint(&self.root)
            .and_then(|cp| modified_secs(&cp.join(METADATA_FILE)))
            .unwrap_or(0.0)
    }
}

/// Most recently modified `checkpoint_*` directory: `root` itself, a direct
/// child, or a grandchild (e.g. under `checkpoints/`).
fn latest_checkpoint(root: &Path) -> Option<PathBuf> {
    if is_checkpoint_dir(root) {
        return Some(root.to_path_buf());
    }
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_dir() && is_checkpoint_dir(e.path()))
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((mtime, checkpoint_number(e.path()), e.into_path()))
        })
        .max()
        .map(|(_, _, path)| path)
}

fn is_checkpoint_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("checkpoint_"))
        && path.is_dir()
}

fn checkpoint_number(path: &Path) -> u64 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("checkpoint_"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn read_json(path: &Path) -> Option<Value> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Unreadable file");
            return None;
        }
    };
    match parse_relaxed(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping corrupt JSON");
            None
        }
    }
}

fn load_snapshot(root: &Path, checkpoint: &Path) -> Snapshot {
    let metadata_path = checkpoint.join(METADATA_FILE);
    let metadata = match read_json(&metadata_path) {
        Some(value) => CheckpointMetadata::from_value(&value),
        None => {
            if metadata_path.exists() {
                warn!(path = %metadata_path.display(), "Failed to read checkpoint metadata");
            }
            CheckpointMetadata::default()
        }
    };

    let mut programs = load_programs(&checkpoint.join(PROGRAMS_DIR));

    let island_of: HashMap<&str, u32> = metadata
        .islands
        .iter()
        .enumerate()
        .flat_map(|(idx, ids)| {
            let idx = u32::try_from(idx).unwrap_or(u32::MAX);
            ids.iter().map(move |id| (id.as_str(), idx))
        })
        .collect();
    for p in &mut programs {
        if let Some(&island) = island_of.get(p.id.as_str()) {
            p.island_id = Some(island);
        }
        p.in_archive = metadata.archive.contains(&p.id);
    }

    let counts = lineage::children_counts(programs.iter().map(|p| p.parent_id.as_deref()));
    let counts: HashMap<String, usize> = counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    for p in &mut programs {
        p.children_count = counts.get(&p.id).copied().unwrap_or(0);
    }

    let index = programs
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect();

    let mut trace_candidates = vec![root.join(TRACE_FILE), root.join("traces").join(TRACE_FILE)];
    if let Some(grandparent) = checkpoint.parent().and_then(Path::parent) {
        trace_candidates.push(grandparent.join(TRACE_FILE));
    }

    Snapshot {
        checkpoint: Some(checkpoint.to_path_buf()),
        metadata,
        programs,
        index,
        traces: load_traces(&trace_candidates),
    }
}

/// Every `*.json` program document, in file-name order. Later documents
/// with a duplicate id replace earlier ones.
fn load_programs(dir: &Path) -> Vec<Program> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut programs: Vec<Program> = Vec::with_capacity(files.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0usize;
    for path in files {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(program) = read_json(&path).and_then(|v| program_from_value(&v, &stem)) else {
            skipped += 1;
            continue;
        };
        match seen.get(&program.id) {
            Some(&i) => programs[i] = program,
            None => {
                seen.insert(program.id.clone(), programs.len());
                programs.push(program);
            }
        }
    }
    if skipped > 0 {
        warn!(dir = %dir.display(), skipped, "Skipped unreadable program files");
    }
    programs
}

fn program_from_value(value: &Value, fallback_id: &str) -> Option<Program> {
    let obj = value.as_object()?;
    let text = |key: &str| obj.get(key).and_then(json_string);
    let number = |key: &str| obj.get(key).and_then(json_finite).unwrap_or(0.0);

    let metrics = obj
        .get("metrics")
        .and_then(Value::as_object)
        .map(sanitize_metrics)
        .unwrap_or_default();
    let metadata = obj
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let prompts = obj.get("prompts").filter(|p| p.is_object()).cloned();

    let llm_response = prompts.as_ref().and_then(first_response);
    let artifacts = obj.get("artifacts_json").and_then(|raw| match raw {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(parse_relaxed(s).unwrap_or_else(|_| serde_json::json!({ "raw": s }))),
        other => Some(other.clone()),
    });
    let migration_history = obj
        .get("migration_history")
        .and_then(Value::as_array)
        .map(|h| h.iter().filter_map(MigrationRecord::from_value).collect())
        .unwrap_or_default();

    Some(Program {
        id: text("id").unwrap_or_else(|| fallback_id.to_string()),
        code: text("code").unwrap_or_default(),
        language: text("language").unwrap_or_else(|| "python".to_string()),
        parent_id: text("parent_id"),
        generation: obj.get("generation").and_then(json_u64).unwrap_or(0),
        island_id: metadata.get("island").and_then(json_u32),
        timestamp: number("timestamp"),
        iteration_found: obj.get("iteration_found").and_then(json_u64).unwrap_or(0),
        score: composite_score(&metrics),
        metrics,
        correct: true,
        complexity: number("complexity"),
        diversity: number("diversity"),
        code_diff: text("code_diff"),
        changes_description: text("changes_description").unwrap_or_default(),
        prompts,
        llm_response,
        artifacts,
        text_feedback: None,
        embedding_2d: None,
        embedding_3d: None,
        embedding_cluster_id: None,
        children_count: 0,
        in_archive: false,
        migration_history,
        inspiration_ids: Vec::new(),
        metadata,
    })
}

fn first_response(prompts: &Value) -> Option<String> {
    prompts.as_object()?.values().find_map(|entry| {
        entry
            .get("responses")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .and_then(json_string)
    })
}

/// One entry per stored prompt, keyed by mutation tag.
fn prompt_conversations(p: &Program) -> Vec<ConversationEntry> {
    let Some(prompts) = p.prompts.as_ref().and_then(Value::as_object) else {
        return Vec::new();
    };
    let parent_score = p
        .metadata
        .get("parent_metrics")
        .and_then(Value::as_object)
        .map_or(0.0, |m| composite_score(&sanitize_metrics(m)));

    prompts
        .iter()
        .filter(|(_, entry)| entry.is_object())
        .map(|(tag, entry)| ConversationEntry {
            program_id: p.id.clone(),
            parent_id: p.parent_id.clone(),
            iteration: p.iteration_found,
            generation: p.generation,
            island_id: p.island_id,
            timestamp: p.timestamp,
            system_prompt: entry.get("system").and_then(json_string),
            user_prompt: entry.get("user").and_then(json_string),
            llm_response: entry
                .get("responses")
                .and_then(Value::as_array)
                .and_then(|r| r.first())
                .and_then(json_string),
            score: p.score,
            parent_score,
            improvement_delta: p.score - parent_score,
            mutation_type: tag.clone(),
            code_diff: None,
        })
        .collect()
}

/// First existing trace log; malformed lines are skipped.
fn load_traces(candidates: &[PathBuf]) -> Vec<TraceEntry> {
    let Some(path) = candidates.iter().find(|p| p.is_file()) else {
        return Vec::new();
    };
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read trace log");
            return Vec::new();
        }
    };

    let mut skipped = 0usize;
    let traces: Vec<TraceEntry> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let entry = parse_relaxed(line).ok().and_then(|v| TraceEntry::from_value(&v));
            if entry.is_none() {
                skipped += 1;
            }
            entry
        })
        .collect();
    if skipped > 0 {
        debug!(path = %path.display(), skipped, "Skipped malformed trace lines");
    }
    traces
}
