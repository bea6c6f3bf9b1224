//! ghostclick-core: task model + concurrent scheduler + statistics.
//!
//! Design goal: keep this crate UI-agnostic and platform-agnostic.
//! Platform specific I/O (window enumeration, template matching, click
//! injection) lives in `ghostclick-platform` behind the capability
//! traits in [`capability`].

mod capability;
mod error;
mod manager;
mod profile;
mod stats;

pub use capability::{
    Capabilities, CapabilityError, InputInjector, Match, MatchRegion, NoopInjector,
    TemplateMatcher, WindowHandle, WindowLocator,
};
pub use error::{StorageError, StorageResult};
pub use manager::{
    Callbacks, ExecutionCallback, LogCallback, StatusCallback, TaskManager, TaskPatch,
    NO_WINDOW_BACKOFF, STATUS_NO_IMAGE, STATUS_NO_WINDOW, STATUS_STOPPED, STATUS_WAITING,
};
pub use profile::{get_app_data_dir, Profile, ProfileManager};
pub use stats::{format_time_ago, GlobalStats, RecentExecution, StatsTracker, TaskStats};

use serde::{Deserialize, Serialize};

/// A user-defined automation unit: watch a window for a template (or a
/// set of templates) and deliver a ghost click when it appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "TaskRecord", from = "TaskRecord")]
pub struct Task {
    /// Unique within a manager instance, monotonically assigned, never reused.
    pub id: u64,
    pub selector: WindowSelector,
    pub mode: TaskMode,
    /// Seconds between polling attempts when repeating. Must be > 0.
    pub interval_secs: f64,
    /// Minimum match confidence to accept a detection, in [0, 1].
    pub threshold: f32,
    /// Whether this task is eligible for bulk start.
    pub enabled: bool,
    /// Short free-form status for UI display ("Waiting", "73%", "Stopped").
    /// Mutated only by the execution loop and by stop.
    pub last_status: String,
}

impl Task {
    /// Whether the task keeps polling after a tick. MultiOption tasks
    /// always repeat.
    pub fn repeats(&self) -> bool {
        match &self.mode {
            TaskMode::Simple { repeat, .. } => *repeat,
            TaskMode::MultiOption { .. } => true,
        }
    }

    /// The click action this task performs.
    pub fn action(&self) -> ClickAction {
        match &self.mode {
            TaskMode::Simple { action, .. } => *action,
            TaskMode::MultiOption { action, .. } => *action,
        }
    }
}

/// How a task resolves its target window(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowSelector {
    /// Match by window title (partial, case-insensitive).
    ByTitle { pattern: String },
    /// Match by process name, with an optional extra title filter.
    /// `window_index` picks among multiple matches for single-window
    /// lookups; multi-window scans ignore it.
    ByProcess {
        process_name: String,
        title_filter: Option<String>,
        window_index: usize,
    },
}

/// What a task does once its window is found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskMode {
    /// Find a single template and click it.
    Simple {
        /// Template name, resolved to `<images_dir>/<name>.png`.
        template: String,
        action: ClickAction,
        repeat: bool,
    },
    /// Prompt handler: wait until every option template is visible at
    /// once (the prompt is confirmed), then click the selected one.
    MultiOption {
        options: Vec<PromptOption>,
        selected_index: usize,
        action: ClickAction,
    },
}

/// One response option of a prompt-handler task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptOption {
    pub name: String,
    /// Template name (no extension).
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickAction {
    Click,
    DoubleClick,
    RightClick,
}

impl Default for ClickAction {
    fn default() -> Self {
        Self::Click
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaskKind {
    Simple,
    PromptHandler,
}

impl Default for TaskKind {
    fn default() -> Self {
        Self::Simple
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WindowMethod {
    Title,
    Process,
}

impl Default for WindowMethod {
    fn default() -> Self {
        Self::Title
    }
}

/// Flat wire form of a [`Task`], matching the persisted JSON contract.
/// Missing fields take documented defaults on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: u64,
    #[serde(default)]
    pub window_title: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub action: ClickAction,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    task_type: TaskKind,
    #[serde(default)]
    window_method: WindowMethod,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<PromptOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<usize>,
}

fn default_interval() -> f64 {
    5.0
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.85
}

impl From<TaskRecord> for Task {
    fn from(rec: TaskRecord) -> Self {
        let selector = match rec.window_method {
            WindowMethod::Process => WindowSelector::ByProcess {
                process_name: rec.process_name.unwrap_or_default(),
                title_filter: rec.title_filter.filter(|f| !f.is_empty()),
                window_index: rec.window_index.unwrap_or(0),
            },
            WindowMethod::Title => WindowSelector::ByTitle {
                pattern: rec.window_title,
            },
        };

        // A prompt handler is only meaningful with a real choice;
        // fewer than two options degrades to a repeating simple task.
        let mode = match (rec.task_type, rec.options) {
            (TaskKind::PromptHandler, Some(options)) if options.len() >= 2 => {
                TaskMode::MultiOption {
                    options,
                    selected_index: rec.selected_option.unwrap_or(0),
                    action: rec.action,
                }
            }
            (TaskKind::PromptHandler, Some(mut options)) if !options.is_empty() => {
                TaskMode::Simple {
                    template: options.remove(0).image,
                    action: rec.action,
                    repeat: true,
                }
            }
            _ => TaskMode::Simple {
                template: rec.image_name,
                action: rec.action,
                repeat: rec.repeat,
            },
        };

        Task {
            id: rec.id,
            selector,
            mode,
            interval_secs: rec.interval,
            threshold: rec.threshold,
            enabled: rec.enabled,
            last_status: STATUS_WAITING.to_string(),
        }
    }
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        let mut rec = TaskRecord {
            id: task.id,
            window_title: String::new(),
            image_name: String::new(),
            action: task.action(),
            repeat: task.repeats(),
            interval: task.interval_secs,
            enabled: task.enabled,
            task_type: TaskKind::Simple,
            window_method: WindowMethod::Title,
            threshold: task.threshold,
            process_name: None,
            title_filter: None,
            window_index: None,
            options: None,
            selected_option: None,
        };

        match task.selector {
            WindowSelector::ByTitle { pattern } => {
                rec.window_title = pattern;
            }
            WindowSelector::ByProcess {
                process_name,
                title_filter,
                window_index,
            } => {
                rec.window_method = WindowMethod::Process;
                rec.process_name = Some(process_name);
                rec.title_filter = Some(title_filter.unwrap_or_default());
                rec.window_index = Some(window_index);
            }
        }

        match task.mode {
            TaskMode::Simple { template, .. } => {
                rec.image_name = template;
            }
            TaskMode::MultiOption {
                options,
                selected_index,
                ..
            } => {
                rec.task_type = TaskKind::PromptHandler;
                rec.options = Some(options);
                rec.selected_option = Some(selected_index);
            }
        }

        rec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_defaults_apply_on_load() {
        let task: Task =
            serde_json::from_str(r#"{"id": 3, "window_title": "Notepad", "image_name": "save"}"#)
                .unwrap();
        assert_eq!(task.id, 3);
        assert_eq!(task.threshold, 0.85);
        assert_eq!(task.interval_secs, 5.0);
        assert!(task.enabled);
        assert_eq!(task.action(), ClickAction::Click);
        assert!(!task.repeats());
        assert_eq!(
            task.selector,
            WindowSelector::ByTitle {
                pattern: "Notepad".into()
            }
        );
    }

    #[test]
    fn simple_task_round_trip() {
        let task = Task {
            id: 7,
            selector: WindowSelector::ByProcess {
                process_name: "Code.exe".into(),
                title_filter: Some("main".into()),
                window_index: 1,
            },
            mode: TaskMode::Simple {
                template: "ok_btn".into(),
                action: ClickAction::DoubleClick,
                repeat: true,
            },
            interval_secs: 2.5,
            threshold: 0.9,
            enabled: false,
            last_status: "whatever".into(),
        };

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.selector, task.selector);
        assert_eq!(back.mode, task.mode);
        assert_eq!(back.interval_secs, 2.5);
        assert_eq!(back.threshold, 0.9);
        assert!(!back.enabled);
        // last_status is not persisted
        assert_eq!(back.last_status, STATUS_WAITING);
    }

    #[test]
    fn prompt_handler_round_trip_and_wire_fields() {
        let task = Task {
            id: 1,
            selector: WindowSelector::ByTitle {
                pattern: "Game".into(),
            },
            mode: TaskMode::MultiOption {
                options: vec![
                    PromptOption {
                        name: "Yes".into(),
                        image: "btn_yes".into(),
                    },
                    PromptOption {
                        name: "No".into(),
                        image: "btn_no".into(),
                    },
                ],
                selected_index: 1,
                action: ClickAction::Click,
            },
            interval_secs: 1.0,
            threshold: 0.85,
            enabled: true,
            last_status: STATUS_WAITING.into(),
        };

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["task_type"], "prompt_handler");
        assert_eq!(value["repeat"], true);
        assert_eq!(value["selected_option"], 1);
        assert_eq!(value["options"][0]["image"], "btn_yes");
        // title-based tasks do not carry process fields
        assert!(value.get("process_name").is_none());

        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back.mode, task.mode);
        assert!(back.repeats());
    }

    #[test]
    fn prompt_handler_without_options_degrades_to_simple() {
        let task: Task = serde_json::from_str(
            r#"{"id": 2, "window_title": "X", "task_type": "prompt_handler"}"#,
        )
        .unwrap();
        assert!(matches!(task.mode, TaskMode::Simple { .. }));
    }

    #[test]
    fn prompt_handler_with_one_option_degrades_to_simple() {
        let task: Task = serde_json::from_str(
            r#"{"id": 2, "window_title": "X", "task_type": "prompt_handler",
                "options": [{"name": "OK", "image": "btn_ok"}]}"#,
        )
        .unwrap();
        match task.mode {
            TaskMode::Simple { template, repeat, .. } => {
                assert_eq!(template, "btn_ok");
                assert!(repeat);
            }
            other => panic!("expected Simple mode, got {other:?}"),
        }
    }
}
