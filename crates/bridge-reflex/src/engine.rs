//! The reflex engine tick loop: owns the loaded reflex set and drives the
//! trigger-check/action-execute cycle on a fixed schedule.

use crate::action::{ExecutionContext, ToolInvoker};
use crate::history::HistoryStore;
use crate::loader::{list_rule_filenames, load_directory};
use crate::reflex::Reflex;
use crate::trigger::TriggerEvent;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Duration};

/// How often the rules directory is rescanned for added/removed files.
const HOT_RELOAD_INTERVAL: Duration = Duration::from_secs(10);
/// How often the known-tools set is logged for visibility.
const TOOL_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// Trigger-check cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the set of loaded reflexes and drives the trigger-check/action-
/// execute cycle. IPC events are delivered through `ipc_tx`/an internal
/// receiver; the `bridge` binary wires its own event source into `ipc_tx`,
/// since IPC transport is out of this crate's scope.
pub struct ReflexEngine {
    reflexes: RwLock<HashMap<String, Arc<Reflex>>>,
    rules_dir: PathBuf,
    trashcan_dir: PathBuf,
    history: Arc<HistoryStore>,
    invoker: Arc<dyn ToolInvoker>,
    running_reflexes: Mutex<HashSet<String>>,
    known_filenames: Mutex<HashSet<String>>,
    ipc_tx: mpsc::UnboundedSender<(String, Value)>,
    ipc_rx: Mutex<mpsc::UnboundedReceiver<(String, Value)>>,
    state: RwLock<Value>,
}

impl ReflexEngine {
    #[must_use]
    pub fn new(rules_dir: PathBuf, history: Arc<HistoryStore>, invoker: Arc<dyn ToolInvoker>) -> Arc<Self> {
        let trashcan_dir = rules_dir.join("trashcan");
        let (ipc_tx, ipc_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            reflexes: RwLock::new(HashMap::new()),
            rules_dir,
            trashcan_dir,
            history,
            invoker,
            running_reflexes: Mutex::new(HashSet::new()),
            known_filenames: Mutex::new(HashSet::new()),
            ipc_tx,
            ipc_rx: Mutex::new(ipc_rx),
            state: RwLock::new(json!({})),
        })
    }

    #[must_use]
    pub fn ipc_sender(&self) -> mpsc::UnboundedSender<(String, Value)> {
        self.ipc_tx.clone()
    }

    pub fn add_reflex(&self, reflex: Reflex) {
        self.reflexes.write().insert(reflex.id.clone(), Arc::new(reflex));
    }

    pub fn remove_reflex(&self, id: &str) -> Option<Arc<Reflex>> {
        self.reflexes.write().remove(id)
    }

    #[must_use]
    pub fn get_reflex(&self, id: &str) -> Option<Arc<Reflex>> {
        self.reflexes.read().get(id).cloned()
    }

    #[must_use]
    pub fn list_reflexes(&self) -> Vec<Arc<Reflex>> {
        self.reflexes.read().values().cloned().collect()
    }

    pub fn enable_reflex(&self, id: &str) -> bool {
        if let Some(r) = self.get_reflex(id) {
            r.set_enabled(true);
            true
        } else {
            false
        }
    }

    pub fn disable_reflex(&self, id: &str) -> bool {
        if let Some(r) = self.get_reflex(id) {
            r.set_enabled(false);
            true
        } else {
            false
        }
    }

    /// Initial load of every `*.yaml`/`*.yml` rule file in `rules_dir`.
    pub async fn load_reflexes(&self) -> std::io::Result<()> {
        let (loaded, errors) = load_directory(&self.rules_dir, None)?;
        for err in &errors {
            tracing::warn!(file = %err.0.display(), error = %err.1, "failed to parse reflex rule file");
        }
        let mut map = self.reflexes.write();
        for reflex in loaded {
            map.insert(reflex.id.clone(), Arc::new(reflex));
        }
        *self.known_filenames.lock().await = list_rule_filenames(&self.rules_dir)?;
        Ok(())
    }

    /// Diffs the rule directory's filename set against what was last seen:
    /// new files are loaded and added, vanished files are removed.
    async fn hot_reload(&self) {
        let current = match list_rule_filenames(&self.rules_dir) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list reflex rule directory");
                return;
            }
        };
        let mut known = self.known_filenames.lock().await;

        let added: Vec<String> = current.difference(&known).cloned().collect();
        let removed: Vec<String> = known.difference(&current).cloned().collect();

        for filename in &added {
            let path = self.rules_dir.join(filename);
            let contents = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "failed to read new reflex rule file");
                    continue;
                }
            };
            match crate::loader::parse_reflex_file(&contents, &path, None) {
                Ok(reflex) => {
                    tracing::info!(id = %reflex.id, file = %path.display(), "hot-loaded new reflex");
                    self.add_reflex(reflex);
                }
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "failed to parse new reflex rule file"),
            }
        }

        for filename in &removed {
            let stem = PathBuf::from(filename).file_stem().and_then(|s| s.to_str()).map(str::to_string);
            if let Some(id) = stem {
                if self.remove_reflex(&id).is_some() {
                    tracing::info!(id = %id, "removed reflex whose rule file disappeared");
                }
            }
        }

        *known = current;
    }

    /// Checks and, if fired, runs one reflex against one event.
    async fn check_and_execute(&self, reflex: Arc<Reflex>, event: TriggerEvent) {
        if !reflex.is_enabled() || reflex.should_expire() || reflex.is_in_cooldown() {
            return;
        }

        let state = self.state.read().clone();
        let (fired, trigger_context) = reflex.trigger.check(&event, &state).await;
        if !fired {
            return;
        }

        {
            let mut running = self.running_reflexes.lock().await;
            if !running.insert(reflex.id.clone()) {
                return;
            }
        }

        let event_value = event.to_value();
        let ctx = ExecutionContext {
            event: &event_value,
            state: &state,
            trigger: &trigger_context,
            tools: &reflex.tools,
            invoker: self.invoker.as_ref(),
        };
        let result = reflex.action.execute(&ctx).await;

        reflex.increment_runs();
        if reflex.should_expire() {
            reflex.set_enabled(false);
        }

        let status = if result.success { "SUCCESS" } else { "ERROR" };
        let tool_calls_json: Value = result
            .tool_calls
            .iter()
            .map(|c| json!({"tool": c.tool, "args": c.args, "result": c.result, "error": c.error}))
            .collect();
        if let Err(e) = self
            .history
            .log_execution(
                &reflex.id,
                &reflex.name,
                reflex.trigger.trigger_type(),
                &trigger_context,
                reflex.action.action_type(),
                status,
                Some(result.text.as_str()),
                &tool_calls_json,
                result.error.as_deref(),
            )
            .await
        {
            tracing::warn!(reflex_id = %reflex.id, error = %e, "failed to write execution history record");
        }

        self.running_reflexes.lock().await.remove(&reflex.id);
    }

    /// Moves expired reflexes' source files into `trashcan/` and removes
    /// them from the live set.
    async fn cleanup_expired(&self) {
        let expired: Vec<Arc<Reflex>> = self.list_reflexes().into_iter().filter(|r| r.should_expire()).collect();
        if expired.is_empty() {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(&self.trashcan_dir) {
            tracing::warn!(error = %e, "failed to create trashcan directory");
            return;
        }
        for reflex in expired {
            if let Some(source) = &reflex.source_file {
                let source_path = PathBuf::from(source);
                if let Some(filename) = source_path.file_name() {
                    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
                    let dest = self.trashcan_dir.join(format!("{timestamp}_{}", filename.to_string_lossy()));
                    if let Err(e) = std::fs::rename(&source_path, &dest) {
                        tracing::warn!(file = %source_path.display(), error = %e, "failed to move expired reflex to trashcan");
                    }
                }
            }
            self.remove_reflex(&reflex.id);
        }
    }

    /// Runs the tick loop until `shutdown` resolves. Delivers one
    /// `ScheduleTick` per second plus any drained IPC events, then
    /// re-checks every reflex not already in-flight.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut tick = interval(TICK_INTERVAL);
        let mut hot_reload_tick = interval(HOT_RELOAD_INTERVAL);
        let mut tool_refresh_tick = interval(TOOL_REFRESH_INTERVAL);

        self.dispatch_event(TriggerEvent::Startup).await;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("reflex engine shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.dispatch_event(TriggerEvent::ScheduleTick).await;

                    let mut rx = self.ipc_rx.lock().await;
                    while let Ok((name, payload)) = rx.try_recv() {
                        drop(rx);
                        self.dispatch_event(TriggerEvent::Ipc { name, payload }).await;
                        rx = self.ipc_rx.lock().await;
                    }
                    drop(rx);

                    self.cleanup_expired().await;
                }
                _ = hot_reload_tick.tick() => {
                    self.hot_reload().await;
                }
                _ = tool_refresh_tick.tick() => {
                    tracing::debug!(known = self.invoker.known_tools().len(), "tool refresh tick");
                }
            }
        }
    }

    async fn dispatch_event(&self, event: TriggerEvent) {
        let reflexes = self.list_reflexes();
        let mut handles = Vec::with_capacity(reflexes.len());
        for reflex in reflexes {
            handles.push(self.check_and_execute(reflex, event.clone()));
        }
        futures::future::join_all(handles).await;
    }
}
