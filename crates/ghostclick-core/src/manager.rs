//! Task scheduler: owns the task set and runs one worker per started
//! task, polling target windows for templates and dispatching ghost
//! clicks.

use crate::capability::{Capabilities, CapabilityError, WindowHandle};
use crate::error::StorageResult;
use crate::{ClickAction, PromptOption, Task, TaskMode, TaskRecord, WindowSelector};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Initial status of a freshly created task.
pub const STATUS_WAITING: &str = "Waiting";
/// No window matched the task's selector.
pub const STATUS_NO_WINDOW: &str = "No window";
/// Template image file is missing.
pub const STATUS_NO_IMAGE: &str = "No image";
/// Terminal status once a worker exits or is stopped.
pub const STATUS_STOPPED: &str = "Stopped";

/// Fixed retry wait when no window matches the selector. Deliberately
/// independent of the task's configured interval so absent windows do
/// not get hammered with enumeration calls.
pub const NO_WINDOW_BACKOFF: Duration = Duration::from_secs(2);

const LOG_KEY_NO_WINDOW: &str = "window_not_found";

/// Called when a task's visible status changes: `(task_id, status)`.
pub type StatusCallback = Arc<dyn Fn(u64, &str) + Send + Sync>;
/// Called with user-facing log lines.
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Called after every execution tick: `(task_id, success, elapsed_ms)`.
pub type ExecutionCallback = Arc<dyn Fn(u64, bool, f64) + Send + Sync>;

/// Observer callbacks. All of them may be invoked concurrently from
/// worker threads; their bodies are responsible for their own
/// thread-safety.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_status_update: Option<StatusCallback>,
    pub on_log: Option<LogCallback>,
    pub on_execution: Option<ExecutionCallback>,
}

/// Partial update for a task. `None` fields are left untouched;
/// invalid values are ignored field-by-field.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub selector: Option<WindowSelector>,
    pub mode: Option<TaskMode>,
    pub interval_secs: Option<f64>,
    pub threshold: Option<f32>,
    pub enabled: Option<bool>,
}

struct RunningWorker {
    stop: Sender<()>,
    generation: u64,
}

struct ManagerState {
    tasks: HashMap<u64, Task>,
    /// Presence in this map is the definition of "running". Dropping
    /// the sender disconnects the worker's token and stops it.
    running: HashMap<u64, RunningWorker>,
    /// Last logged status key per task, for log throttling.
    last_log_status: HashMap<u64, String>,
    next_id: u64,
    next_generation: u64,
}

/// Owns the task set and a pool of per-task worker threads.
///
/// One detached OS thread is spawned per running task; workers stop
/// cooperatively through a per-worker cancellation channel observed
/// before each scan, between option checks and during waits.
pub struct TaskManager {
    images_dir: PathBuf,
    caps: Capabilities,
    callbacks: Callbacks,
    state: Arc<Mutex<ManagerState>>,
}

impl TaskManager {
    /// Create a manager resolving template names under `images_dir`.
    /// Collaborators are injected by the composition root.
    pub fn new(images_dir: impl Into<PathBuf>, caps: Capabilities, callbacks: Callbacks) -> Self {
        Self {
            images_dir: images_dir.into(),
            caps,
            callbacks,
            state: Arc::new(Mutex::new(ManagerState {
                tasks: HashMap::new(),
                running: HashMap::new(),
                last_log_status: HashMap::new(),
                next_id: 1,
                next_generation: 0,
            })),
        }
    }

    /// Add a new task and return it. Has no effect on running state.
    ///
    /// MultiOption modes always repeat and require at least two
    /// options; fewer degrades to a repeating Simple task on the sole
    /// option's template. An out-of-range selected index is reset to
    /// 0. A non-positive interval falls back to 5 seconds.
    pub fn add_task(
        &self,
        selector: WindowSelector,
        mode: TaskMode,
        interval_secs: f64,
        threshold: f32,
    ) -> Task {
        let mode = match mode {
            TaskMode::MultiOption {
                mut options,
                selected_index,
                action,
            } => {
                if options.len() < 2 {
                    warn!(
                        count = options.len(),
                        "prompt handler needs at least two options, adding as simple task"
                    );
                    TaskMode::Simple {
                        template: options.pop().map(|o| o.image).unwrap_or_default(),
                        action,
                        repeat: true,
                    }
                } else {
                    TaskMode::MultiOption {
                        selected_index: if selected_index >= options.len() {
                            0
                        } else {
                            selected_index
                        },
                        options,
                        action,
                    }
                }
            }
            simple => simple,
        };

        let interval_secs = if interval_secs > 0.0 {
            interval_secs
        } else {
            warn!(interval_secs, "non-positive interval, using default");
            5.0
        };

        let mut state = self.state.lock().unwrap();
        let task = Task {
            id: state.next_id,
            selector,
            mode,
            interval_secs,
            threshold: threshold.clamp(0.0, 1.0),
            enabled: true,
            last_status: STATUS_WAITING.to_string(),
        };
        state.tasks.insert(task.id, task.clone());
        state.next_id += 1;
        task
    }

    /// Convenience constructor for prompt-handler tasks.
    pub fn add_prompt_handler(
        &self,
        selector: WindowSelector,
        options: Vec<PromptOption>,
        action: ClickAction,
        interval_secs: f64,
        threshold: f32,
    ) -> Task {
        self.add_task(
            selector,
            TaskMode::MultiOption {
                options,
                selected_index: 0,
                action,
            },
            interval_secs,
            threshold,
        )
    }

    /// Remove a task, stopping its worker if one is running.
    /// No-op for unknown ids.
    pub fn remove_task(&self, task_id: u64) {
        let mut state = self.state.lock().unwrap();
        state.running.remove(&task_id);
        state.last_log_status.remove(&task_id);
        state.tasks.remove(&task_id);
    }

    pub fn get_task(&self, task_id: u64) -> Option<Task> {
        self.state.lock().unwrap().tasks.get(&task_id).cloned()
    }

    /// All tasks, sorted by id.
    pub fn all_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().unwrap();
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Apply a partial update. Unknown ids and invalid field values
    /// are ignored.
    pub fn update_task(&self, task_id: u64, patch: TaskPatch) {
        let mut state = self.state.lock().unwrap();
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return;
        };

        if let Some(selector) = patch.selector {
            task.selector = selector;
        }
        if let Some(mut mode) = patch.mode {
            if let TaskMode::MultiOption {
                options,
                selected_index,
                ..
            } = &mut mode
            {
                if *selected_index >= options.len() {
                    *selected_index = 0;
                }
            }
            task.mode = mode;
        }
        if let Some(interval) = patch.interval_secs {
            if interval > 0.0 {
                task.interval_secs = interval;
            } else {
                warn!(task_id, interval, "ignoring non-positive interval");
            }
        }
        if let Some(threshold) = patch.threshold {
            if (0.0..=1.0).contains(&threshold) {
                task.threshold = threshold;
            } else {
                warn!(task_id, threshold, "ignoring out-of-range threshold");
            }
        }
        if let Some(enabled) = patch.enabled {
            task.enabled = enabled;
        }
    }

    /// Change the selected response of a prompt-handler task.
    /// Out-of-range indices and non-MultiOption tasks are ignored.
    pub fn set_selected_option(&self, task_id: u64, option_index: usize) {
        let message = {
            let mut state = self.state.lock().unwrap();
            let Some(task) = state.tasks.get_mut(&task_id) else {
                return;
            };
            match &mut task.mode {
                TaskMode::MultiOption {
                    options,
                    selected_index,
                    ..
                } if option_index < options.len() => {
                    *selected_index = option_index;
                    Some(format!(
                        "Task #{}: option changed to '{}'",
                        task_id, options[option_index].name
                    ))
                }
                _ => None,
            }
        };
        if let Some(msg) = message {
            self.emit_log(&msg);
        }
    }

    /// Start a worker for every enabled task that is not already
    /// running. Logs and does nothing when no task qualifies.
    pub fn start(&self) {
        let to_start: Vec<u64> = {
            let state = self.state.lock().unwrap();
            state
                .tasks
                .values()
                .filter(|t| t.enabled && !state.running.contains_key(&t.id))
                .map(|t| t.id)
                .collect()
        };

        if to_start.is_empty() {
            self.emit_log("No enabled tasks!");
            return;
        }

        for task_id in to_start {
            if self.spawn_worker(task_id) {
                self.emit_log(&format!("Task #{} started", task_id));
            }
        }
    }

    /// Start exactly one task's worker. Starting a running task is a
    /// no-op (runs-once semantics), starting an unknown id does
    /// nothing.
    pub fn start_single(&self, task_id: u64) {
        {
            let state = self.state.lock().unwrap();
            if !state.tasks.contains_key(&task_id) {
                return;
            }
            if state.running.contains_key(&task_id) {
                drop(state);
                self.emit_log(&format!("Task #{} is already running", task_id));
                return;
            }
        }
        self.spawn_worker(task_id);
    }

    /// Stop one running worker. Returns whether a worker was running.
    /// The worker exits within its current tick; the running-set entry
    /// is removed immediately.
    pub fn stop_single(&self, task_id: u64) -> bool {
        let stopped = {
            let mut state = self.state.lock().unwrap();
            let Some(worker) = state.running.remove(&task_id) else {
                return false;
            };
            // Wake the worker promptly; dropping the sender would also
            // disconnect its token at the next observation point.
            let _ = worker.stop.try_send(());
            state.last_log_status.remove(&task_id);
            if let Some(task) = state.tasks.get_mut(&task_id) {
                task.last_status = STATUS_STOPPED.to_string();
                true
            } else {
                false
            }
        };
        self.emit_log(&format!("Task #{} stopped", task_id));
        if stopped {
            self.emit_status(task_id, STATUS_STOPPED);
        }
        true
    }

    /// Stop every running worker, fire-and-forget. Safe to call twice.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        for (_, worker) in state.running.drain() {
            let _ = worker.stop.try_send(());
        }
        state.last_log_status.clear();
    }

    pub fn is_task_running(&self, task_id: u64) -> bool {
        self.state.lock().unwrap().running.contains_key(&task_id)
    }

    /// Serialize the full task set to a JSON file (array of records,
    /// ordered by id).
    pub fn save_tasks(&self, path: &Path) -> StorageResult<()> {
        let records: Vec<TaskRecord> = {
            let state = self.state.lock().unwrap();
            let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
            tasks.sort_by_key(|t| t.id);
            tasks.into_iter().map(TaskRecord::from).collect()
        };
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(path, json)?;
        info!(?path, count = records.len(), "saved tasks");
        Ok(())
    }

    /// Replace the in-memory task set with the file's contents and
    /// recompute the id counter as max(existing) + 1. A missing,
    /// unreadable or malformed file leaves the set unchanged and
    /// counts as zero tasks. Returns the number of tasks loaded.
    pub fn load_tasks(&self, path: &Path) -> StorageResult<usize> {
        if !path.exists() {
            debug!(?path, "task file does not exist, keeping current set");
            return Ok(0);
        }

        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                warn!(?path, error = %e, "failed to read task file, keeping current set");
                return Ok(0);
            }
        };
        let records: Vec<TaskRecord> = match serde_json::from_str(&json) {
            Ok(records) => records,
            Err(e) => {
                warn!(?path, error = %e, "failed to parse task file, keeping current set");
                return Ok(0);
            }
        };

        let mut state = self.state.lock().unwrap();
        state.tasks.clear();
        let count = records.len();
        for record in records {
            let task = Task::from(record);
            state.next_id = state.next_id.max(task.id + 1);
            state.tasks.insert(task.id, task);
        }
        info!(?path, count, "loaded tasks");
        Ok(count)
    }

    /// Stop everything and drop all tasks, resetting the id counter.
    pub fn clear_tasks(&self) {
        self.stop();
        let mut state = self.state.lock().unwrap();
        state.tasks.clear();
        state.next_id = 1;
    }

    /// Register the worker in the running-set and spawn its thread.
    /// Returns false if the task vanished or was already running.
    fn spawn_worker(&self, task_id: u64) -> bool {
        let (stop_tx, stop_rx) = bounded(1);
        let generation = {
            let mut state = self.state.lock().unwrap();
            if !state.tasks.contains_key(&task_id) || state.running.contains_key(&task_id) {
                return false;
            }
            let generation = state.next_generation;
            state.next_generation += 1;
            state.running.insert(
                task_id,
                RunningWorker {
                    stop: stop_tx,
                    generation,
                },
            );
            generation
        };

        let worker = Worker {
            task_id,
            generation,
            images_dir: self.images_dir.clone(),
            caps: self.caps.clone(),
            callbacks: self.callbacks.clone(),
            state: Arc::clone(&self.state),
        };
        let token = StopToken {
            rx: stop_rx,
            stopped: false,
        };

        let spawned = thread::Builder::new()
            .name(format!("ghostclick-task-{task_id}"))
            .spawn(move || worker.run(token));

        match spawned {
            Ok(_) => true,
            Err(e) => {
                warn!(task_id, error = %e, "failed to spawn worker thread");
                let mut state = self.state.lock().unwrap();
                if state.running.get(&task_id).map(|w| w.generation) == Some(generation) {
                    state.running.remove(&task_id);
                }
                false
            }
        }
    }

    fn emit_log(&self, msg: &str) {
        info!("{msg}");
        if let Some(cb) = &self.callbacks.on_log {
            cb(msg);
        }
    }

    fn emit_status(&self, task_id: u64, status: &str) {
        if let Some(cb) = &self.callbacks.on_status_update {
            cb(task_id, status);
        }
    }
}

/// Worker-side cancellation token. Disconnection of the manager-held
/// sender counts as a stop, so dropping the manager stops all workers.
struct StopToken {
    rx: Receiver<()>,
    stopped: bool,
}

impl StopToken {
    fn is_stopped(&mut self) -> bool {
        if self.stopped {
            return true;
        }
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.stopped = true;
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Interruptible wait. Returns true when stopped during the wait.
    fn wait(&mut self, timeout: Duration) -> bool {
        if self.stopped {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.stopped = true;
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Per-task execution loop. Runs on its own thread until cancelled or,
/// for non-repeating tasks, until one tick completes.
struct Worker {
    task_id: u64,
    generation: u64,
    images_dir: PathBuf,
    caps: Capabilities,
    callbacks: Callbacks,
    state: Arc<Mutex<ManagerState>>,
}

impl Worker {
    fn run(self, mut stop: StopToken) {
        self.log(format!("Task #{}: worker started", self.task_id));

        loop {
            if stop.is_stopped() {
                break;
            }
            // Fresh snapshot so UI edits take effect on the next tick.
            let Some(task) = self.snapshot() else {
                break;
            };
            let tick_start = Instant::now();

            let windows = self.caps.locator.find_all(&task.selector);
            if windows.is_empty() {
                self.set_status(STATUS_NO_WINDOW);
                let msg = match &task.selector {
                    WindowSelector::ByProcess { process_name, .. } => {
                        format!("Task #{}: process '{}' not found", self.task_id, process_name)
                    }
                    WindowSelector::ByTitle { pattern } => {
                        let short: String = pattern.chars().take(30).collect();
                        format!("Task #{}: window '{}' not found", self.task_id, short)
                    }
                };
                self.log_once(LOG_KEY_NO_WINDOW, msg);
                if !task.repeats() {
                    break;
                }
                if stop.wait(NO_WINDOW_BACKOFF) {
                    break;
                }
                continue;
            }

            // Windows are back; allow the not-found line to fire again.
            self.reset_log_state(Some(LOG_KEY_NO_WINDOW));
            self.set_status(&format!("Searching ({})...", windows.len()));

            let mut success = false;
            let mut best = 0.0_f32;

            for handle in windows {
                if stop.is_stopped() {
                    break;
                }
                let (found, confidence) = match &task.mode {
                    TaskMode::Simple {
                        template, action, ..
                    } => self.scan_simple(&task, template, *action, handle),
                    TaskMode::MultiOption {
                        options,
                        selected_index,
                        action,
                    } => self.scan_prompt(&task, options, *selected_index, *action, handle, &mut stop),
                };
                if found {
                    success = true;
                    best = confidence;
                    break;
                }
                if confidence > best {
                    best = confidence;
                }
            }

            let elapsed_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
            if let Some(cb) = &self.callbacks.on_execution {
                cb(self.task_id, success, elapsed_ms);
            }
            self.set_status(&format!("{:.0}%", best * 100.0));

            if !task.repeats() {
                self.log(format!("Task #{}: single execution finished", self.task_id));
                break;
            }

            self.set_status(&format!("{}s", task.interval_secs));
            if stop.wait(Duration::from_secs_f64(task.interval_secs)) {
                break;
            }
        }

        self.set_status(STATUS_STOPPED);
        self.log(format!("Task #{}: worker stopped", self.task_id));

        // Deregister, unless a stop/restart already replaced the entry.
        let mut state = self.state.lock().unwrap();
        if state.running.get(&self.task_id).map(|w| w.generation) == Some(self.generation) {
            state.running.remove(&self.task_id);
            state.last_log_status.remove(&self.task_id);
        }
    }

    /// One simple-mode detection attempt against one window.
    fn scan_simple(
        &self,
        task: &Task,
        template: &str,
        action: ClickAction,
        handle: WindowHandle,
    ) -> (bool, f32) {
        let path = self.template_path(template);
        if !path.exists() {
            self.set_status(STATUS_NO_IMAGE);
            self.log_once(
                &format!("image_missing_{template}"),
                format!("Task #{}: image '{}' does not exist", self.task_id, template),
            );
            return (false, 0.0);
        }

        match self.caps.matcher.check_visible(handle, &path, task.threshold) {
            Ok(m) if m.visible => match self.click_template(handle, &path, task.threshold, action)
            {
                Ok(true) => {
                    self.log(format!(
                        "Task #{}: clicked! ({:.0}%)",
                        self.task_id,
                        m.confidence * 100.0
                    ));
                    (true, m.confidence)
                }
                Ok(false) => (false, m.confidence),
                Err(e) => {
                    self.log(format!("Task #{}: {}", self.task_id, e));
                    (false, m.confidence)
                }
            },
            Ok(m) => (false, m.confidence),
            Err(e) => {
                self.log(format!("Task #{}: match failed: {}", self.task_id, e));
                (false, 0.0)
            }
        }
    }

    /// Prompt-handler protocol against one window: every option is
    /// checked independently, the prompt counts as confirmed only when
    /// all of them are visible at once, and only the selected option
    /// is clicked.
    fn scan_prompt(
        &self,
        task: &Task,
        options: &[PromptOption],
        selected_index: usize,
        action: ClickAction,
        handle: WindowHandle,
        stop: &mut StopToken,
    ) -> (bool, f32) {
        if options.is_empty() {
            self.log(format!("Task #{}: no options configured", self.task_id));
            return (false, 0.0);
        }

        let mut all_visible = true;
        let mut best = 0.0_f32;
        let mut visible_count = 0;

        for opt in options {
            if stop.is_stopped() {
                return (false, 0.0);
            }
            let path = self.template_path(&opt.image);
            if !path.exists() {
                all_visible = false;
                self.log_once(
                    &format!("image_missing_{}", opt.image),
                    format!("Task #{}: template '{}' not found", self.task_id, opt.image),
                );
                continue;
            }
            match self.caps.matcher.check_visible(handle, &path, task.threshold) {
                Ok(m) => {
                    if m.confidence > best {
                        best = m.confidence;
                    }
                    if m.visible {
                        visible_count += 1;
                    } else {
                        all_visible = false;
                    }
                }
                Err(e) => {
                    all_visible = false;
                    self.log(format!("Task #{}: match failed: {}", self.task_id, e));
                }
            }
        }

        if !all_visible {
            if visible_count > 0 {
                self.log_once(
                    &format!("partial_{}_{}", visible_count, options.len()),
                    format!(
                        "Task #{}: {}/{} options visible (waiting for all)",
                        self.task_id,
                        visible_count,
                        options.len()
                    ),
                );
            }
            return (false, best);
        }

        self.log(format!(
            "Task #{}: prompt confirmed! ({}/{} options visible)",
            self.task_id,
            options.len(),
            options.len()
        ));
        // Allow partial-visibility lines again once the prompt cycles.
        self.reset_log_state(None);

        let idx = if selected_index < options.len() {
            selected_index
        } else {
            0
        };
        let selected = &options[idx];
        let path = self.template_path(&selected.image);
        if !path.exists() {
            self.set_status(STATUS_NO_IMAGE);
            self.log(format!(
                "Task #{}: image for option '{}' does not exist",
                self.task_id, selected.name
            ));
            return (false, best);
        }

        self.set_status(&selected.name);
        match self.click_template(handle, &path, task.threshold, action) {
            Ok(true) => {
                self.log(format!(
                    "Task #{}: clicked '{}' ({:.0}%)",
                    self.task_id,
                    selected.name,
                    best * 100.0
                ));
                (true, best)
            }
            Ok(false) => (false, best),
            Err(e) => {
                self.log(format!("Task #{}: {}", self.task_id, e));
                (false, best)
            }
        }
    }

    /// Locate the template and ghost-click its center. Ok(false) means
    /// the matcher could not pin down a location this tick.
    fn click_template(
        &self,
        handle: WindowHandle,
        template: &Path,
        threshold: f32,
        action: ClickAction,
    ) -> Result<bool, CapabilityError> {
        match self.caps.matcher.find_location(handle, template, threshold)? {
            Some(region) => {
                let (x, y) = region.center();
                self.caps.injector.click(handle, x, y, action)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn template_path(&self, name: &str) -> PathBuf {
        self.images_dir.join(format!("{name}.png"))
    }

    fn snapshot(&self) -> Option<Task> {
        self.state.lock().unwrap().tasks.get(&self.task_id).cloned()
    }

    fn set_status(&self, status: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(task) = state.tasks.get_mut(&self.task_id) {
                task.last_status = status.to_string();
            }
        }
        debug!(task_id = self.task_id, status, "status update");
        if let Some(cb) = &self.callbacks.on_status_update {
            cb(self.task_id, status);
        }
    }

    fn log(&self, msg: String) {
        info!("{msg}");
        if let Some(cb) = &self.callbacks.on_log {
            cb(&msg);
        }
    }

    /// Log only on transitions: repeated identical states (keyed by
    /// `key`) are not re-logged every tick.
    fn log_once(&self, key: &str, msg: String) {
        let transition = {
            let mut state = self.state.lock().unwrap();
            if state.last_log_status.get(&self.task_id).map(String::as_str) != Some(key) {
                state
                    .last_log_status
                    .insert(self.task_id, key.to_string());
                true
            } else {
                false
            }
        };
        if transition {
            self.log(msg);
        }
    }

    /// Forget the dedup state, either for one key or entirely.
    fn reset_log_state(&self, key: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        match key {
            Some(k) => {
                if state.last_log_status.get(&self.task_id).map(String::as_str) == Some(k) {
                    state.last_log_status.remove(&self.task_id);
                }
            }
            None => {
                state.last_log_status.remove(&self.task_id);
            }
        }
    }
}
