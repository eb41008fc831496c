//! Alarm store and tools.
//!
//! Alarms persist in `<data_dir>/alarms.json` (a flat array, rewritten on
//! every mutation). The pipeline sweeps the store periodically and speaks
//! whatever has come due.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ChatterboxError, ChatterboxResult};
use crate::tools::{load_records, save_records, Tool};

const ALARMS_FILE: &str = "alarms.json";

/// One scheduled alarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    /// Monotonic id within the store.
    pub id: u64,
    /// When the alarm fires.
    pub time: DateTime<Utc>,
    /// Spoken label.
    pub label: String,
}

/// Persistent alarm store.
pub struct AlarmStore {
    path: PathBuf,
    alarms: Mutex<Vec<Alarm>>,
}

impl AlarmStore {
    /// Loads the store from `<data_dir>/alarms.json`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let path = data_dir.into().join(ALARMS_FILE);
        let alarms = load_records(&path);
        Self {
            path,
            alarms: Mutex::new(alarms),
        }
    }

    /// Adds an alarm and flushes the store.
    pub fn add(&self, time: DateTime<Utc>, label: String) -> ChatterboxResult<Alarm> {
        let mut alarms = self.alarms.lock();
        let id = alarms.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        let alarm = Alarm { id, time, label };
        alarms.push(alarm.clone());
        save_records(&self.path, &alarms)?;
        Ok(alarm)
    }

    /// All alarms, soonest first.
    pub fn list(&self) -> Vec<Alarm> {
        let mut alarms = self.alarms.lock().clone();
        alarms.sort_by_key(|a| a.time);
        alarms
    }

    /// Removes one alarm by id; flushes when something changed.
    pub fn remove(&self, id: u64) -> ChatterboxResult<bool> {
        let mut alarms = self.alarms.lock();
        let before = alarms.len();
        alarms.retain(|a| a.id != id);
        let removed = alarms.len() < before;
        if removed {
            save_records(&self.path, &alarms)?;
        }
        Ok(removed)
    }

    /// Pops every alarm due at or before `now`, flushing the remainder.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<Alarm> {
        let mut alarms = self.alarms.lock();
        let (due, remaining): (Vec<Alarm>, Vec<Alarm>) =
            alarms.drain(..).partition(|a| a.time <= now);
        *alarms = remaining;
        if !due.is_empty() {
            if let Err(e) = save_records(&self.path, &alarms) {
                log::warn!("[Alarm] Failed to flush after pop: {e}");
            }
        }
        due
    }
}

/// Parses an alarm time: RFC 3339, or a local `HH:MM` that means today
/// (tomorrow when the time already passed).
pub fn parse_alarm_time(input: &str) -> ChatterboxResult<DateTime<Utc>> {
    if let Ok(absolute) = DateTime::parse_from_rfc3339(input) {
        return Ok(absolute.with_timezone(&Utc));
    }
    let time = NaiveTime::parse_from_str(input, "%H:%M")
        .map_err(|_| ChatterboxError::Tool(format!("unparseable alarm time: {input}")))?;
    let now = Local::now();
    let mut candidate = now.date_naive().and_time(time);
    if candidate <= now.naive_local() {
        candidate += Duration::days(1);
    }
    let local = candidate
        .and_local_timezone(Local)
        .single()
        .ok_or_else(|| ChatterboxError::Tool(format!("ambiguous alarm time: {input}")))?;
    Ok(local.with_timezone(&Utc))
}

/// `set_alarm`.
pub struct SetAlarmTool {
    store: Arc<AlarmStore>,
}

impl SetAlarmTool {
    /// Wires the tool.
    pub fn new(store: Arc<AlarmStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct SetAlarmArgs {
    time: String,
    #[serde(default)]
    label: String,
}

#[async_trait]
impl Tool for SetAlarmTool {
    fn name(&self) -> &str {
        "set_alarm"
    }
    fn description(&self) -> &str {
        "Set an alarm at a time of day (HH:MM) or an RFC 3339 timestamp."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "time": { "type": "string", "description": "HH:MM or RFC 3339" },
                "label": { "type": "string", "description": "What to announce" }
            },
            "required": ["time"]
        })
    }
    async fn execute(&self, args: &str) -> ChatterboxResult<String> {
        let args: SetAlarmArgs =
            serde_json::from_str(args).map_err(|e| ChatterboxError::Tool(format!("bad arguments: {e}")))?;
        let time = parse_alarm_time(&args.time)?;
        let alarm = self.store.add(time, args.label)?;
        Ok(json!({
            "success": true,
            "id": alarm.id,
            "time": alarm.time.to_rfc3339(),
        })
        .to_string())
    }
}

/// `list_alarms`.
pub struct ListAlarmsTool {
    store: Arc<AlarmStore>,
}

impl ListAlarmsTool {
    /// Wires the tool.
    pub fn new(store: Arc<AlarmStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListAlarmsTool {
    fn name(&self) -> &str {
        "list_alarms"
    }
    fn description(&self) -> &str {
        "List all pending alarms."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: &str) -> ChatterboxResult<String> {
        Ok(serde_json::to_string(&self.store.list())?)
    }
}

/// `cancel_alarm`.
pub struct CancelAlarmTool {
    store: Arc<AlarmStore>,
}

impl CancelAlarmTool {
    /// Wires the tool.
    pub fn new(store: Arc<AlarmStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct CancelAlarmArgs {
    id: u64,
}

#[async_trait]
impl Tool for CancelAlarmTool {
    fn name(&self) -> &str {
        "cancel_alarm"
    }
    fn description(&self) -> &str {
        "Cancel a pending alarm by id."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        })
    }
    async fn execute(&self, args: &str) -> ChatterboxResult<String> {
        let args: CancelAlarmArgs =
            serde_json::from_str(args).map_err(|e| ChatterboxError::Tool(format!("bad arguments: {e}")))?;
        let removed = self.store.remove(args.id)?;
        Ok(json!({ "success": removed }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let time = Utc::now() + Duration::hours(1);
        {
            let store = AlarmStore::open(dir.path());
            store.add(time, "wake up".into()).unwrap();
        }
        let reloaded = AlarmStore::open(dir.path());
        let alarms = reloaded.list();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].label, "wake up");
    }

    #[test]
    fn pop_due_removes_only_past_alarms() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::open(dir.path());
        let now = Utc::now();
        store.add(now - Duration::minutes(1), "past".into()).unwrap();
        store.add(now + Duration::hours(1), "future".into()).unwrap();
        let due = store.pop_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].label, "past");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlarmStore::open(dir.path());
        let now = Utc::now();
        let a = store.add(now, "a".into()).unwrap();
        let b = store.add(now, "b".into()).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn rfc3339_time_is_accepted() {
        let parsed = parse_alarm_time("2026-08-01T07:30:00Z").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-08-01T07:30:00+00:00");
    }

    #[test]
    fn clock_time_lands_in_the_future() {
        let parsed = parse_alarm_time("07:30").unwrap();
        assert!(parsed > Utc::now() - Duration::minutes(1));
        assert!(parsed < Utc::now() + Duration::days(1) + Duration::minutes(1));
    }

    #[test]
    fn garbage_time_is_rejected() {
        assert!(parse_alarm_time("soonish").is_err());
    }
}
