//! Countdown timers with spoken expiry.
//!
//! Timers persist in `<data_dir>/timers.json` so a restart re-arms them
//! (anything missed while the process was down fires immediately). Expiry
//! labels go out on a channel the pipeline consumes and speaks.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::{ChatterboxError, ChatterboxResult};
use crate::tools::{load_records, save_records, Tool};

const TIMERS_FILE: &str = "timers.json";

/// Spoken when a timer without a label expires.
pub const DEFAULT_TIMER_LABEL: &str = "计时结束";

/// One pending countdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    /// Monotonic id within the store.
    pub id: u64,
    /// Spoken label; empty means the default announcement.
    pub label: String,
    /// Expiry time.
    pub due_at: DateTime<Utc>,
}

struct TimerInner {
    path: PathBuf,
    timers: Mutex<Vec<Timer>>,
    due_tx: mpsc::Sender<String>,
}

/// Persistent timer service. Each timer gets a watcher task that pushes the
/// label onto the due channel at expiry.
pub struct TimerService {
    inner: Arc<TimerInner>,
}

impl TimerService {
    /// Loads persisted timers and re-arms them.
    ///
    /// Returns the service and the receiving end of the due channel; the
    /// pipeline speaks every label that arrives on it.
    pub fn open(data_dir: impl Into<PathBuf>) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (due_tx, due_rx) = mpsc::channel(16);
        let path = data_dir.into().join(TIMERS_FILE);
        let timers: Vec<Timer> = load_records(&path);
        let inner = Arc::new(TimerInner {
            path,
            timers: Mutex::new(timers),
            due_tx,
        });
        let pending = inner.timers.lock().clone();
        for timer in pending {
            arm(&inner, timer);
        }
        (Arc::new(Self { inner }), due_rx)
    }

    /// Creates a timer `seconds` from now and flushes the store.
    pub fn set(&self, seconds: u64, label: String) -> ChatterboxResult<Timer> {
        let due_at = Utc::now() + ChronoDuration::seconds(seconds as i64);
        let timer = {
            let mut timers = self.inner.timers.lock();
            let id = timers.iter().map(|t| t.id).max().unwrap_or(0) + 1;
            let timer = Timer { id, label, due_at };
            timers.push(timer.clone());
            save_records(&self.inner.path, &timers)?;
            timer
        };
        arm(&self.inner, timer.clone());
        Ok(timer)
    }

    /// All pending timers, soonest first.
    pub fn list(&self) -> Vec<Timer> {
        let mut timers = self.inner.timers.lock().clone();
        timers.sort_by_key(|t| t.due_at);
        timers
    }

    /// Cancels a timer by id. The watcher task notices the removal and
    /// stays silent.
    pub fn cancel(&self, id: u64) -> ChatterboxResult<bool> {
        let mut timers = self.inner.timers.lock();
        let before = timers.len();
        timers.retain(|t| t.id != id);
        let removed = timers.len() < before;
        if removed {
            save_records(&self.inner.path, &timers)?;
        }
        Ok(removed)
    }
}

fn arm(inner: &Arc<TimerInner>, timer: Timer) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let wait = (timer.due_at - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        // Cancelled while we slept?
        let still_pending = {
            let mut timers = inner.timers.lock();
            let before = timers.len();
            timers.retain(|t| t.id != timer.id);
            let fired = timers.len() < before;
            if fired {
                if let Err(e) = save_records(&inner.path, &timers) {
                    log::warn!("[Timer] Failed to flush after expiry: {e}");
                }
            }
            fired
        };
        if still_pending {
            let label = if timer.label.is_empty() {
                DEFAULT_TIMER_LABEL.to_string()
            } else {
                timer.label
            };
            let _ = inner.due_tx.send(label).await;
        }
    });
}

/// `set_timer`.
pub struct SetTimerTool {
    service: Arc<TimerService>,
}

impl SetTimerTool {
    /// Wires the tool.
    pub fn new(service: Arc<TimerService>) -> Self {
        Self { service }
    }
}

#[derive(Deserialize)]
struct SetTimerArgs {
    seconds: u64,
    #[serde(default)]
    label: String,
}

#[async_trait]
impl Tool for SetTimerTool {
    fn name(&self) -> &str {
        "set_timer"
    }
    fn description(&self) -> &str {
        "Start a countdown timer for a number of seconds."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "seconds": { "type": "integer", "minimum": 1 },
                "label": { "type": "string", "description": "What to announce at expiry" }
            },
            "required": ["seconds"]
        })
    }
    async fn execute(&self, args: &str) -> ChatterboxResult<String> {
        let args: SetTimerArgs =
            serde_json::from_str(args).map_err(|e| ChatterboxError::Tool(format!("bad arguments: {e}")))?;
        if args.seconds == 0 {
            return Err(ChatterboxError::Tool("seconds must be >= 1".to_string()));
        }
        let timer = self.service.set(args.seconds, args.label)?;
        Ok(json!({
            "success": true,
            "id": timer.id,
            "due_at": timer.due_at.to_rfc3339(),
        })
        .to_string())
    }
}

/// `list_timers`.
pub struct ListTimersTool {
    service: Arc<TimerService>,
}

impl ListTimersTool {
    /// Wires the tool.
    pub fn new(service: Arc<TimerService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for ListTimersTool {
    fn name(&self) -> &str {
        "list_timers"
    }
    fn description(&self) -> &str {
        "List running timers."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: &str) -> ChatterboxResult<String> {
        Ok(serde_json::to_string(&self.service.list())?)
    }
}

/// `cancel_timer`.
pub struct CancelTimerTool {
    service: Arc<TimerService>,
}

impl CancelTimerTool {
    /// Wires the tool.
    pub fn new(service: Arc<TimerService>) -> Self {
        Self { service }
    }
}

#[derive(Deserialize)]
struct CancelTimerArgs {
    id: u64,
}

#[async_trait]
impl Tool for CancelTimerTool {
    fn name(&self) -> &str {
        "cancel_timer"
    }
    fn description(&self) -> &str {
        "Cancel a running timer by id."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        })
    }
    async fn execute(&self, args: &str) -> ChatterboxResult<String> {
        let args: CancelTimerArgs =
            serde_json::from_str(args).map_err(|e| ChatterboxError::Tool(format!("bad arguments: {e}")))?;
        let removed = self.service.cancel(args.id)?;
        Ok(json!({ "success": removed }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn expired_timer_announces_its_label() {
        let dir = tempfile::tempdir().unwrap();
        let (service, mut due_rx) = TimerService::open(dir.path());
        service.set(0, "tea".into()).unwrap();
        let label = tokio::time::timeout(Duration::from_secs(2), due_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(label, "tea");
        assert!(service.list().is_empty());
    }

    #[tokio::test]
    async fn unlabelled_timer_uses_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let (service, mut due_rx) = TimerService::open(dir.path());
        service.set(0, String::new()).unwrap();
        let label = tokio::time::timeout(Duration::from_secs(2), due_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(label, DEFAULT_TIMER_LABEL);
    }

    #[tokio::test]
    async fn cancelled_timer_stays_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (service, mut due_rx) = TimerService::open(dir.path());
        let timer = service.set(1, "silent".into()).unwrap();
        assert!(service.cancel(timer.id).unwrap());
        let fired = tokio::time::timeout(Duration::from_millis(1500), due_rx.recv()).await;
        assert!(fired.is_err(), "cancelled timer should not fire");
    }

    #[tokio::test]
    async fn persisted_timers_rearm_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (service, _due_rx) = TimerService::open(dir.path());
            service.set(3600, "long".into()).unwrap();
        }
        let (service, _due_rx) = TimerService::open(dir.path());
        assert_eq!(service.list().len(), 1);
        assert_eq!(service.list()[0].label, "long");
    }
}
