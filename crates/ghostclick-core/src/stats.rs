//! Execution statistics: durable, thread-safe aggregation of per-task
//! and global outcomes for dashboards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Persist automatically on every Nth recorded execution. Amortizes
/// write volume against durability.
const AUTOSAVE_EVERY: u64 = 10;

/// Counters for one task (or the global aggregate).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStats {
    #[serde(default)]
    pub total_executions: u64,
    #[serde(default)]
    pub successful_clicks: u64,
    #[serde(default)]
    pub failed_matches: u64,
    #[serde(default)]
    pub total_match_time_ms: f64,
    /// RFC 3339 timestamp of the most recent execution.
    #[serde(default)]
    pub last_execution: Option<String>,
    /// Hour of day (0-23) to execution count.
    #[serde(default)]
    pub hourly_executions: HashMap<u8, u64>,
}

impl TaskStats {
    /// Fraction of executions that clicked, 0.0 when empty.
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.successful_clicks as f64 / self.total_executions as f64
    }

    /// Mean scan latency in milliseconds, 0.0 when empty.
    pub fn avg_match_time_ms(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.total_match_time_ms / self.total_executions as f64
    }

    fn record(&mut self, success: bool, match_time_ms: f64, hour: u8, timestamp: &str) {
        self.total_executions += 1;
        self.total_match_time_ms += match_time_ms;
        self.last_execution = Some(timestamp.to_string());
        if success {
            self.successful_clicks += 1;
        } else {
            self.failed_matches += 1;
        }
        *self.hourly_executions.entry(hour).or_insert(0) += 1;
    }
}

/// Global aggregate snapshot with derived metrics.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub total_executions: u64,
    pub successful_clicks: u64,
    pub failed_matches: u64,
    pub success_rate: f64,
    pub avg_match_time_ms: f64,
    /// Number of tasks with at least one recorded execution.
    pub active_tasks: usize,
    pub last_execution: Option<String>,
}

/// Most-recent-execution summary for one task.
#[derive(Debug, Clone, Serialize)]
pub struct RecentExecution {
    pub task_id: u64,
    pub last_execution: String,
    pub success_rate: f64,
    pub total_executions: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatsFile {
    #[serde(default)]
    global: TaskStats,
    #[serde(default)]
    tasks: HashMap<u64, TaskStats>,
}

/// Thread-safe tracker persisted as JSON. Uses its own mutex, shared
/// with no other component, so a stats write never blocks a task
/// mutation.
pub struct StatsTracker {
    stats_file: PathBuf,
    inner: Mutex<StatsFile>,
}

impl StatsTracker {
    /// Create a tracker backed by `stats_file`, loading any existing
    /// data. A missing or corrupt file never fails construction.
    pub fn new(stats_file: impl Into<PathBuf>) -> Self {
        let stats_file = stats_file.into();
        let inner = Mutex::new(load_lenient(&stats_file));
        Self { stats_file, inner }
    }

    /// Record one execution outcome for a task, updating both the
    /// per-task and global counters. Every 10th global execution
    /// triggers a save.
    pub fn record_execution(&self, task_id: u64, success: bool, match_time_ms: f64) {
        let now = local_now();
        let hour = now.hour();
        let timestamp = now
            .format(&Rfc3339)
            .unwrap_or_default();

        let should_save = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .tasks
                .entry(task_id)
                .or_default()
                .record(success, match_time_ms, hour, &timestamp);
            inner.global.record(success, match_time_ms, hour, &timestamp);
            inner.global.total_executions % AUTOSAVE_EVERY == 0
        };

        if should_save {
            self.save();
        }
    }

    /// Counters for one task; a zero-valued snapshot for unknown ids.
    pub fn task_stats(&self, task_id: u64) -> TaskStats {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .get(&task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Global aggregate with derived metrics.
    pub fn global_stats(&self) -> GlobalStats {
        let inner = self.inner.lock().unwrap();
        GlobalStats {
            total_executions: inner.global.total_executions,
            successful_clicks: inner.global.successful_clicks,
            failed_matches: inner.global.failed_matches,
            success_rate: inner.global.success_rate(),
            avg_match_time_ms: inner.global.avg_match_time_ms(),
            active_tasks: inner.tasks.len(),
            last_execution: inner.global.last_execution.clone(),
        }
    }

    /// Execution counts per hour of day, walking backward from the
    /// current hour modulo 24.
    pub fn hourly_distribution(&self, hours: usize) -> HashMap<u8, u64> {
        let inner = self.inner.lock().unwrap();
        let current_hour = local_now().hour() as i32;
        let mut distribution = HashMap::new();
        for i in 0..hours as i32 {
            let hour = (current_hour - i).rem_euclid(24) as u8;
            distribution.insert(
                hour,
                inner.global.hourly_executions.get(&hour).copied().unwrap_or(0),
            );
        }
        distribution
    }

    /// Per-task last-execution summaries, most recent first.
    pub fn recent_executions(&self, limit: usize) -> Vec<RecentExecution> {
        let inner = self.inner.lock().unwrap();
        let mut recent: Vec<RecentExecution> = inner
            .tasks
            .iter()
            .filter_map(|(&task_id, stats)| {
                stats.last_execution.as_ref().map(|ts| RecentExecution {
                    task_id,
                    last_execution: ts.clone(),
                    success_rate: stats.success_rate(),
                    total_executions: stats.total_executions,
                })
            })
            .collect();
        // RFC 3339 strings sort chronologically.
        recent.sort_by(|a, b| b.last_execution.cmp(&a.last_execution));
        recent.truncate(limit);
        recent
    }

    /// Clear one task's counters, or everything when `task_id` is
    /// `None`. Always persists afterward.
    pub fn clear_stats(&self, task_id: Option<u64>) {
        {
            let mut inner = self.inner.lock().unwrap();
            match task_id {
                Some(id) => {
                    inner.tasks.remove(&id);
                }
                None => {
                    inner.tasks.clear();
                    inner.global = TaskStats::default();
                }
            }
        }
        self.save();
    }

    /// Write the current state to disk. Failures are logged, never
    /// propagated; stats durability must not disturb task execution.
    pub fn save(&self) {
        let json = {
            let inner = self.inner.lock().unwrap();
            match serde_json::to_string_pretty(&*inner) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialize stats");
                    return;
                }
            }
        };

        if let Some(parent) = self.stats_file.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create stats directory");
                return;
            }
        }
        if let Err(e) = fs::write(&self.stats_file, json) {
            warn!(path = ?self.stats_file, error = %e, "failed to save stats");
        }
    }
}

/// Load the stats file, tolerating a missing file and malformed
/// entries: a broken per-task record is logged and skipped without
/// discarding the rest, so stats corruption never blocks startup.
fn load_lenient(path: &PathBuf) -> StatsFile {
    if !path.exists() {
        return StatsFile::default();
    }

    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) => {
            warn!(?path, error = %e, "failed to read stats file");
            return StatsFile::default();
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&json) {
        Ok(value) => value,
        Err(e) => {
            warn!(?path, error = %e, "stats file is not valid JSON, starting empty");
            return StatsFile::default();
        }
    };

    let mut file = StatsFile::default();
    if let Some(global) = value.get("global") {
        match serde_json::from_value(global.clone()) {
            Ok(global) => file.global = global,
            Err(e) => warn!(error = %e, "skipping malformed global stats"),
        }
    }
    if let Some(tasks) = value.get("tasks").and_then(|t| t.as_object()) {
        for (key, entry) in tasks {
            let Ok(task_id) = key.parse::<u64>() else {
                warn!(key, "skipping stats entry with non-numeric task id");
                continue;
            };
            match serde_json::from_value(entry.clone()) {
                Ok(stats) => {
                    file.tasks.insert(task_id, stats);
                }
                Err(e) => warn!(task_id, error = %e, "skipping malformed task stats"),
            }
        }
    }
    debug!(?path, tasks = file.tasks.len(), "loaded stats");
    file
}

fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Format an RFC 3339 timestamp as "now" / "N min ago" / "Nh ago" /
/// "Nd ago". Returns "unknown" when the timestamp does not parse.
pub fn format_time_ago(timestamp: &str) -> String {
    let Ok(then) = OffsetDateTime::parse(timestamp, &Rfc3339) else {
        return "unknown".to_string();
    };
    let elapsed = local_now() - then;
    let secs = elapsed.whole_seconds();
    if secs < 60 {
        "now".to_string()
    } else if secs < 3600 {
        format!("{} min ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", elapsed.whole_days())
    }
}
