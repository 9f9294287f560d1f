//! SQLite store reader
//!
//! The store is owned by a live writer, so this reader never holds a
//! connection across calls: each statement opens a read-only connection,
//! runs, and drops it. Lock contention is retried through [`RetryPolicy`].
//!
//! Schema consumed (columns missing from older stores read as absent):
//!
//! ```text
//! programs(id, code, language, parent_id, generation, island_idx, timestamp,
//!          combined_score, public_metrics, private_metrics, correct,
//!          complexity, code_diff, text_feedback, embedding,
//!          embedding_pca_2d, embedding_pca_3d, embedding_cluster_id,
//!          children_count, migration_history, archive_inspiration_ids,
//!          top_k_inspiration_ids, metadata)
//! archive(program_id)            optional
//! metadata_store(key, value)     optional
//! ```
//!
//! `score` is the stored `combined_score` column, not a metric sum.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{FromSql, Value as SqlValue};
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::json::parse_relaxed;
use super::query::{paginate, ConversationQuery, Page, ProgramQuery, SortDirection, SortKey};
use super::retry::RetryPolicy;
use super::{degrade, load_yaml_config, modified_secs, Capabilities, StoreReader};
use crate::aggregate::{analytics, islands, lineage, metrics, similarity, CostSample};
use crate::model::{
    display_name, experiment_id, finite, finite_vector, now_epoch_secs, sanitize_metrics,
    AnalyticsSummary, ConversationEntry, EmbeddingSimilarity, Experiment, ExperimentStatus,
    FormatName, Island, LineageTree, MetricsSummary, MigrationEvent, MigrationRecord, Program,
    ProgramBrief, StatusThresholds,
};
use crate::Result;

const CHILDREN_SUBQUERY: &str =
    "(SELECT COUNT(*) FROM programs c WHERE c.parent_id = p.id) AS derived_children_count";

/// Columns of the `programs` table. Older stores lack some of them; a
/// missing column is substituted with `NULL` so it reads as absent.
struct Columns(HashSet<String>);

impl Columns {
    fn has(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Value expression: `<table>.<name>` or `NULL`.
    fn value(&self, table: &str, name: &str) -> String {
        if self.has(name) {
            format!("{table}.{name}")
        } else {
            "NULL".to_string()
        }
    }

    /// Select-list entry keeping the column name.
    fn select(&self, table: &str, name: &str) -> String {
        if self.has(name) {
            format!("{table}.{name}")
        } else {
            format!("NULL AS {name}")
        }
    }

    fn select_all(&self, table: &str, names: &[&str]) -> String {
        names
            .iter()
            .map(|name| self.select(table, name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `expr` when it is a finite number, else 0. Matches how scores read back.
fn finite_sql(expr: &str) -> String {
    format!("(CASE WHEN abs({expr}) <= 1.7976931348623157e308 THEN {expr} ELSE 0 END)")
}

/// A `meta_<generation>.txt` summary stored next to the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    /// File name
    pub file_name: String,
    /// Generation parsed from the name (0 when unparseable)
    pub generation: u64,
    /// Full path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Reader for single-file SQLite experiments.
pub struct RelationalReader {
    path: PathBuf,
    format: FormatName,
    thresholds: StatusThresholds,
    retry: RetryPolicy,
    busy_timeout: Duration,
}

impl RelationalReader {
    /// Create a reader for the database at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, thresholds: StatusThresholds) -> Self {
        Self {
            path: path.into(),
            format: FormatName::from_static("shinkaevolve"),
            thresholds,
            retry: RetryPolicy::default(),
            busy_timeout: Duration::from_secs(1),
        }
    }

    /// Report a different format name (for formats sharing this schema).
    #[must_use]
    pub fn with_format(mut self, format: FormatName) -> Self {
        self.format = format;
        self
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override how long SQLite itself waits on a lock before reporting busy.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// `meta_<n>.txt` files next to the database, by file name.
    #[must_use]
    pub fn meta_files(&self) -> Vec<MetaFile> {
        let Some(dir) = self.path.parent() else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut files: Vec<MetaFile> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let file_name = entry.file_name().to_str()?.to_string();
                let generation = file_name.strip_prefix("meta_")?.strip_suffix(".txt")?;
                let generation = generation.parse().unwrap_or(0);
                Some(MetaFile {
                    generation,
                    size: entry.metadata().map(|m| m.len()).unwrap_or(0),
                    path: entry.path(),
                    file_name,
                })
            })
            .collect();
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        files
    }

    /// Content of `meta_<generation>.txt`, `None` when absent.
    #[must_use]
    pub fn meta_content(&self, generation: u64) -> Option<String> {
        let path = self.path.parent()?.join(format!("meta_{generation}.txt"));
        if !path.is_file() {
            return None;
        }
        std::fs::read_to_string(&path)
            .map_err(|e| warn!(path = %path.display(), error = %e, "Failed to read meta file"))
            .ok()
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// Run one statement on a fresh connection, with retry.
    fn query<T>(
        &self,
        op: &str,
        sql: &str,
        params: &[SqlValue],
        mut map: impl FnMut(&Row<'_>) -> T,
    ) -> Result<Vec<T>> {
        self.retry.run(op, || {
            let conn = self.connect()?;
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| Ok(map(row)))?;
            rows.collect()
        })
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self.query(
            "table_exists",
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[SqlValue::Text(table.to_string())],
            |_| (),
        )?;
        Ok(!rows.is_empty())
    }

    fn columns(&self) -> Result<Columns> {
        let names = self.query(
            "table_info",
            "SELECT name FROM pragma_table_info('programs')",
            &[],
            |row| col::<String>(row, "name"),
        )?;
        Ok(Columns(names.into_iter().flatten().collect()))
    }

    fn archive_ids(&self) -> Result<HashSet<String>> {
        if !self.table_exists("archive")? {
            return Ok(HashSet::new());
        }
        let ids = self.query("archive", "SELECT program_id FROM archive", &[], |row| {
            col::<String>(row, "program_id")
        })?;
        Ok(ids.into_iter().flatten().collect())
    }

    /// Run `f` when the store exists, degrading failures to `fallback`.
    fn guarded<T>(
        &self,
        op: &str,
        f: impl FnOnce() -> Result<T>,
        fallback: impl FnOnce() -> T,
    ) -> Result<T> {
        if !self.path.is_file() {
            return Ok(fallback());
        }
        degrade(op, f(), fallback)
    }

    fn briefs(&self) -> Result<Vec<ProgramBrief>> {
        let archive = self.archive_ids()?;
        let columns = self.columns()?.select_all(
            "p",
            &[
                "id",
                "parent_id",
                "generation",
                "island_idx",
                "combined_score",
                "timestamp",
                "correct",
                "complexity",
                "metadata",
            ],
        );
        let sql = format!("SELECT {columns}, {CHILDREN_SUBQUERY} FROM programs p ORDER BY p.rowid");
        self.query("briefs", &sql, &[], |row| {
            let id = col::<String>(row, "id").unwrap_or_default();
            ProgramBrief {
                in_archive: archive.contains(&id),
                parent_id: col(row, "parent_id"),
                generation: col_u64(row, "generation"),
                island_id: col_u32(row, "island_idx"),
                score: col_finite(row, "combined_score"),
                timestamp: col_finite(row, "timestamp"),
                correct: col_bool(row, "correct"),
                complexity: col_finite(row, "complexity"),
                children_count: col_usize(row, "derived_children_count"),
                changes_description: change_description(&col_json_object(row, "metadata")),
                id,
            }
        })
    }

    fn try_experiment_info(&self) -> Result<Experiment> {
        let columns = self.columns()?;
        let sql = format!(
            "SELECT COUNT(*) AS total, MAX({best}) AS best, MAX({generation}) AS generation, \
             COUNT(DISTINCT {island}) AS islands FROM programs p",
            best = finite_sql(&columns.value("p", "combined_score")),
            generation = columns.value("p", "generation"),
            island = columns.value("p", "island_idx"),
        );
        let counters = self.query(
            "experiment_info",
            &sql,
            &[],
            |row| {
                (
                    col_usize(row, "total"),
                    col_finite(row, "best"),
                    col_u64(row, "generation"),
                    col_usize(row, "islands"),
                )
            },
        )?;
        let (total_programs, best_score, current_generation, num_islands) =
            counters.into_iter().next().unwrap_or_default();

        let last_iteration = if self.table_exists("metadata_store")? {
            self.query(
                "last_iteration",
                "SELECT value FROM metadata_store WHERE key = 'last_iteration'",
                &[],
                |row| col_text_u64(row, "value"),
            )?
            .into_iter()
            .flatten()
            .next()
            .unwrap_or(0)
        } else {
            0
        };

        let last_modified = self.last_modified();
        Ok(Experiment {
            status: ExperimentStatus::infer(last_modified, now_epoch_secs(), self.thresholds),
            last_modified,
            total_programs,
            best_score,
            current_generation,
            num_islands,
            last_iteration,
            config: self.config(),
            ..Experiment::empty(self.format.clone(), &self.path)
        })
    }

    fn try_list_programs(&self, query: &ProgramQuery) -> Result<Page<Program>> {
        let f = &query.filter;
        let columns = self.columns()?;
        let score = finite_sql(&columns.value("p", "combined_score"));
        let island = columns.value("p", "island_idx");
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(island_id) = f.island_id {
            clauses.push(format!("{island} = ?"));
            params.push(SqlValue::Integer(i64::from(island_id)));
        }
        if let Some(g) = f.generation_min {
            clauses.push("p.generation >= ?".to_string());
            params.push(SqlValue::Integer(i64::try_from(g).unwrap_or(i64::MAX)));
        }
        if let Some(g) = f.generation_max {
            clauses.push("p.generation <= ?".to_string());
            params.push(SqlValue::Integer(i64::try_from(g).unwrap_or(i64::MAX)));
        }
        if let Some(s) = f.score_min {
            clauses.push(format!("{score} >= ?"));
            params.push(SqlValue::Real(s));
        }
        if f.correct_only {
            clauses.push(format!("{} = 1", columns.value("p", "correct")));
        }
        let archive = self.archive_ids()?;
        if f.archive_only {
            if archive.is_empty() {
                return Ok(Page::default());
            }
            clauses.push("p.id IN (SELECT program_id FROM archive)".to_string());
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let total = self
            .query(
                "count_programs",
                &format!("SELECT COUNT(*) AS total FROM programs p {where_sql}"),
                &params,
                |row| col_usize(row, "total"),
            )?
            .into_iter()
            .next()
            .unwrap_or(0);

        let order_col = match query.sort {
            SortKey::Generation => "p.generation".to_string(),
            SortKey::Score => score,
            SortKey::Timestamp => columns.value("p", "timestamp"),
            SortKey::Complexity => finite_sql(&columns.value("p", "complexity")),
            SortKey::Island => format!("COALESCE({island}, 0)"),
            SortKey::ChildrenCount => "derived_children_count".to_string(),
        };
        let direction = match query.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        let sql = format!(
            "SELECT p.*, {CHILDREN_SUBQUERY} FROM programs p {where_sql} \
             ORDER BY {order_col} {direction}, p.rowid ASC LIMIT ? OFFSET ?"
        );
        let pagination = query.pagination;
        params.push(SqlValue::Integer(i64::try_from(pagination.page_size).unwrap_or(i64::MAX)));
        params.push(SqlValue::Integer(i64::try_from(pagination.offset()).unwrap_or(i64::MAX)));

        let items = self.query("list_programs", &sql, &params, |row| {
            program_from_row(row, &archive)
        })?;
        Ok(Page { items, total })
    }

    fn try_get_program(&self, id: &str) -> Result<Option<Program>> {
        let archive = self.archive_ids()?;
        let sql = format!("SELECT p.*, {CHILDREN_SUBQUERY} FROM programs p WHERE p.id = ?");
        let rows = self.query("get_program", &sql, &[SqlValue::Text(id.to_string())], |row| {
            program_from_row(row, &archive)
        })?;
        Ok(rows.into_iter().next())
    }

    fn try_list_conversations(&self, query: &ConversationQuery) -> Result<Page<ConversationEntry>> {
        let columns = self.columns()?;
        let mut params = Vec::new();
        let where_sql = match query.island_id {
            Some(island) => {
                params.push(SqlValue::Integer(i64::from(island)));
                format!("WHERE {} = ?", columns.value("p", "island_idx"))
            }
            None => String::new(),
        };
        let sql = format!(
            "SELECT {selected}, {parent_score} AS parent_score \
             FROM programs p LEFT JOIN programs parent ON p.parent_id = parent.id \
             {where_sql} ORDER BY {timestamp} DESC, p.rowid ASC",
            selected = columns.select_all(
                "p",
                &[
                    "id",
                    "parent_id",
                    "generation",
                    "island_idx",
                    "timestamp",
                    "combined_score",
                    "code_diff",
                    "metadata",
                ],
            ),
            parent_score = columns.value("parent", "combined_score"),
            timestamp = columns.value("p", "timestamp"),
        );
        let mut entries = self.query("list_conversations", &sql, &params, |row| {
            let score = col_finite(row, "combined_score");
            let parent_score = col_finite(row, "parent_score");
            let generation = col_u64(row, "generation");
            let metadata = col_json_object(row, "metadata");
            ConversationEntry {
                program_id: col(row, "id").unwrap_or_default(),
                parent_id: col(row, "parent_id"),
                iteration: generation,
                generation,
                island_id: col_u32(row, "island_idx"),
                timestamp: col_finite(row, "timestamp"),
                system_prompt: None,
                user_prompt: None,
                llm_response: None,
                score,
                parent_score,
                improvement_delta: score - parent_score,
                mutation_type: metadata
                    .get("patch_type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                code_diff: col(row, "code_diff"),
            }
        })?;
        if query.improvements_only {
            entries.retain(|e| e.improvement_delta > 0.0);
        }
        entries.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        Ok(paginate(entries, query.pagination))
    }

    fn try_metrics_summary(&self) -> Result<MetricsSummary> {
        let briefs = self.briefs()?;
        let mut summary = metrics::summarize(&briefs);
        if !briefs.is_empty() {
            let improved = briefs.iter().filter(|p| p.score > 0.0 && p.correct).count();
            summary.improvement_rate = improved as f64 / briefs.len() as f64;
        }
        Ok(summary)
    }

    fn try_islands_and_migrations(&self) -> Result<(Vec<Island>, Vec<MigrationEvent>)> {
        let islands = islands::from_programs(&self.briefs()?);
        if !self.columns()?.has("migration_history") {
            return Ok((islands, Vec::new()));
        }
        let histories = self.query(
            "migrations",
            "SELECT id, combined_score, migration_history FROM programs \
             WHERE migration_history IS NOT NULL AND migration_history != '[]' ORDER BY rowid",
            &[],
            |row| {
                (
                    col::<String>(row, "id").unwrap_or_default(),
                    col_finite(row, "combined_score"),
                    migration_history(row),
                )
            },
        )?;
        let migrations = islands::flatten_migrations(
            histories
                .iter()
                .map(|(id, score, history)| (id.as_str(), *score, history.as_slice())),
        );
        Ok((islands, migrations))
    }

    fn try_lineage(&self, root: Option<&str>) -> Result<LineageTree> {
        let briefs = self.briefs()?;
        let best = briefs
            .iter()
            .fold(None::<&ProgramBrief>, |best, p| match best {
                Some(b) if b.score >= p.score => Some(b),
                _ => Some(p),
            })
            .map(|p| p.id.as_str());
        let tree = lineage::build(&briefs, best);
        Ok(match root {
            Some(root) => lineage::restrict(tree, root),
            None => tree,
        })
    }

    fn try_search_code(&self, query: &str, max_results: usize) -> Result<Vec<Program>> {
        let archive = self.archive_ids()?;
        let needle = query.to_lowercase();
        let sql = format!("SELECT p.*, {CHILDREN_SUBQUERY} FROM programs p ORDER BY p.rowid");
        self.retry.run("search_code", || {
            let conn = self.connect()?;
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut found = Vec::new();
            while found.len() < max_results {
                let Some(row) = rows.next()? else { break };
                let code = col::<String>(row, "code").unwrap_or_default();
                if code.to_lowercase().contains(&needle) {
                    found.push(program_from_row(row, &archive));
                }
            }
            Ok(found)
        })
    }

    fn try_analytics_summary(&self) -> Result<AnalyticsSummary> {
        let columns = self.columns()?;
        let sql = format!(
            "SELECT {selected} FROM programs p ORDER BY {timestamp}, p.rowid",
            selected = columns.select_all(
                "p",
                &["id", "parent_id", "generation", "combined_score", "metadata"],
            ),
            timestamp = columns.value("p", "timestamp"),
        );
        let samples = self.query(
            "analytics_summary",
            &sql,
            &[],
            |row| {
                CostSample::from_metadata(
                    col::<String>(row, "id").unwrap_or_default(),
                    col(row, "parent_id"),
                    col_u64(row, "generation"),
                    col_finite(row, "combined_score"),
                    &col_json_object(row, "metadata"),
                )
            },
        )?;
        Ok(analytics::summarize(&samples))
    }

    fn try_embedding_similarity(&self, max_programs: usize) -> Result<EmbeddingSimilarity> {
        let columns = self.columns()?;
        if !columns.has("embedding") {
            return Ok(EmbeddingSimilarity::default());
        }
        let sql = format!(
            "SELECT {selected} FROM programs p \
             WHERE p.embedding IS NOT NULL AND p.embedding != '[]' \
             ORDER BY {score} DESC, p.rowid ASC",
            selected = columns.select_all(
                "p",
                &[
                    "id",
                    "combined_score",
                    "generation",
                    "island_idx",
                    "embedding",
                    "embedding_cluster_id",
                ],
            ),
            score = finite_sql(&columns.value("p", "combined_score")),
        );
        let rows = self.query(
            "embedding_similarity",
            &sql,
            &[],
            |row| {
                let vector = col_json(row, "embedding")
                    .and_then(|v| finite_vector(&v))
                    .filter(|v| !v.is_empty())?;
                Some((
                    col::<String>(row, "id").unwrap_or_default(),
                    col_finite(row, "combined_score"),
                    col_u64(row, "generation"),
                    col_u32(row, "island_idx"),
                    col::<i64>(row, "embedding_cluster_id"),
                    vector,
                ))
            },
        )?;

        let valid: Vec<_> = rows.into_iter().flatten().take(max_programs).collect();
        if valid.len() < 2 {
            return Ok(EmbeddingSimilarity::default());
        }

        let mut result = EmbeddingSimilarity::default();
        let mut vectors = Vec::with_capacity(valid.len());
        for (id, score, generation, island, cluster, vector) in valid {
            result.program_ids.push(id);
            result.scores.push(score);
            result.generations.push(generation);
            result.islands.push(island);
            result.cluster_ids.push(cluster);
            vectors.push(vector);
        }
        result.similarity_matrix = similarity::cosine_matrix(&vectors);
        Ok(result)
    }

    fn config(&self) -> Option<Value> {
        let dir = self.path.parent()?;
        load_yaml_config(&[
            dir.join("config.yaml"),
            dir.join("config.yml"),
            dir.join(".hydra").join("config.yaml"),
            dir.join(".hydra").join("overrides.yaml"),
        ])
    }

    fn wal_path(&self) -> PathBuf {
        let mut wal = self.path.clone().into_os_string();
        wal.push("-wal");
        PathBuf::from(wal)
    }
}

impl StoreReader for RelationalReader {
    fn format(&self) -> &FormatName {
        &self.format
    }

    fn root(&self) -> &Path {
        &self.path
    }

    fn experiment_info(&self) -> Result<Experiment> {
        let empty = || Experiment::empty(self.format.clone(), &self.path);
        self.guarded("experiment_info", || self.try_experiment_info(), empty)
    }

    fn list_programs(&self, query: &ProgramQuery) -> Result<Page<Program>> {
        self.guarded("list_programs", || self.try_list_programs(query), Page::default)
    }

    fn get_program(&self, id: &str) -> Result<Option<Program>> {
        self.guarded("get_program", || self.try_get_program(id), || None)
    }

    fn list_programs_brief(&self) -> Result<Vec<ProgramBrief>> {
        self.guarded("list_programs_brief", || self.briefs(), Vec::new)
    }

    fn list_conversations(&self, query: &ConversationQuery) -> Result<Page<ConversationEntry>> {
        self.guarded("list_conversations", || self.try_list_conversations(query), Page::default)
    }

    fn metrics_summary(&self) -> Result<MetricsSummary> {
        self.guarded("metrics_summary", || self.try_metrics_summary(), MetricsSummary::default)
    }

    fn islands_and_migrations(&self) -> Result<(Vec<Island>, Vec<MigrationEvent>)> {
        self.guarded("islands_and_migrations", || self.try_islands_and_migrations(), Default::default)
    }

    fn lineage(&self, root: Option<&str>) -> Result<LineageTree> {
        self.guarded("lineage", || self.try_lineage(root), LineageTree::default)
    }

    fn search_code(&self, query: &str, max_results: usize) -> Result<Vec<Program>> {
        self.guarded("search_code", || self.try_search_code(query, max_results), Vec::new)
    }

    /// Newest of the database file and its write-ahead log.
    fn last_modified(&self) -> f64 {
        let Some(db) = modified_secs(&self.path) else {
            return 0.0;
        };
        modified_secs(&self.wal_path()).map_or(db, |wal| db.max(wal))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            analytics: true,
            embedding_similarity: true,
        }
    }

    fn analytics_summary(&self) -> Result<AnalyticsSummary> {
        self.guarded("analytics_summary", || self.try_analytics_summary(), AnalyticsSummary::default)
    }

    fn embedding_similarity(&self, max_programs: usize) -> Result<EmbeddingSimilarity> {
        self.guarded(
            "embedding_similarity",
            || self.try_embedding_similarity(max_programs),
            EmbeddingSimilarity::default,
        )
    }
}

fn program_from_row(row: &Row<'_>, archive: &HashSet<String>) -> Program {
    let mut metrics_raw = col_json_object(row, "public_metrics");
    metrics_raw.extend(col_json_object(row, "private_metrics"));
    let metrics = sanitize_metrics(&metrics_raw);

    let id = col::<String>(row, "id").unwrap_or_default();
    let metadata = col_json_object(row, "metadata");
    let embedding = |name: &str| {
        col_json(row, name)
            .and_then(|v| finite_vector(&v))
            .filter(|v| !v.is_empty())
    };
    let mut inspiration_ids = string_list(col_json(row, "archive_inspiration_ids"));
    inspiration_ids.extend(string_list(col_json(row, "top_k_inspiration_ids")));

    Program {
        in_archive: archive.contains(&id),
        code: col(row, "code").unwrap_or_default(),
        language: col::<String>(row, "language")
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "python".to_string()),
        parent_id: col(row, "parent_id"),
        generation: col_u64(row, "generation"),
        island_id: col_u32(row, "island_idx"),
        timestamp: col_finite(row, "timestamp"),
        iteration_found: col_u64(row, "generation"),
        score: col_finite(row, "combined_score"),
        metrics,
        correct: col_bool(row, "correct"),
        complexity: col_finite(row, "complexity"),
        diversity: 0.0,
        code_diff: col(row, "code_diff"),
        changes_description: change_description(&metadata),
        prompts: None,
        llm_response: None,
        artifacts: None,
        text_feedback: col(row, "text_feedback"),
        embedding_2d: embedding("embedding_pca_2d"),
        embedding_3d: embedding("embedding_pca_3d").filter(|v| v.len() == 3),
        embedding_cluster_id: col(row, "embedding_cluster_id"),
        children_count: col_usize(row, "derived_children_count"),
        migration_history: migration_history(row),
        inspiration_ids,
        metadata,
        id,
    }
}

fn migration_history(row: &Row<'_>) -> Vec<MigrationRecord> {
    col_json(row, "migration_history")
        .as_ref()
        .and_then(Value::as_array)
        .map(|h| h.iter().filter_map(MigrationRecord::from_value).collect())
        .unwrap_or_default()
}

fn change_description(metadata: &Map<String, Value>) -> String {
    metadata
        .get("patch_description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list(value: Option<Value>) -> Vec<String> {
    value.map(|v| super::json::json_string_list(&v)).unwrap_or_default()
}

/// Column by name; missing columns, NULLs and type mismatches read as `None`.
fn col<T: FromSql>(row: &Row<'_>, name: &str) -> Option<T> {
    row.get::<_, Option<T>>(name).ok().flatten()
}

fn col_finite(row: &Row<'_>, name: &str) -> f64 {
    col::<f64>(row, name).and_then(finite).unwrap_or(0.0)
}

fn col_u64(row: &Row<'_>, name: &str) -> u64 {
    col::<i64>(row, name)
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(0)
}

fn col_u32(row: &Row<'_>, name: &str) -> Option<u32> {
    col::<i64>(row, name).and_then(|v| u32::try_from(v).ok())
}

fn col_usize(row: &Row<'_>, name: &str) -> usize {
    col::<i64>(row, name)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(0)
}

fn col_bool(row: &Row<'_>, name: &str) -> bool {
    col::<i64>(row, name).is_some_and(|v| v != 0)
}

/// Integer stored either as INTEGER or as decimal TEXT.
fn col_text_u64(row: &Row<'_>, name: &str) -> Option<u64> {
    col::<i64>(row, name)
        .and_then(|v| u64::try_from(v).ok())
        .or_else(|| col::<String>(row, name).and_then(|s| s.trim().parse().ok()))
}

fn col_json(row: &Row<'_>, name: &str) -> Option<Value> {
    let text = col::<String>(row, name)?;
    if text.is_empty() {
        return None;
    }
    match parse_relaxed(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(column = name, error = %e, "Skipping malformed JSON column");
            None
        }
    }
}

fn col_json_object(row: &Row<'_>, name: &str) -> Map<String, Value> {
    match col_json(row, name) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
