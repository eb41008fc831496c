//! Voice memos persisted to `<data_dir>/memos.json`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ChatterboxError, ChatterboxResult};
use crate::tools::{load_records, save_records, Tool};

const MEMOS_FILE: &str = "memos.json";

/// One saved note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memo {
    /// Monotonic id within the store.
    pub id: u64,
    /// The note text.
    pub text: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Persistent memo store.
pub struct MemoStore {
    path: PathBuf,
    memos: Mutex<Vec<Memo>>,
}

impl MemoStore {
    /// Loads the store from `<data_dir>/memos.json`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let path = data_dir.into().join(MEMOS_FILE);
        let memos = load_records(&path);
        Self {
            path,
            memos: Mutex::new(memos),
        }
    }

    /// Adds a memo and flushes the store.
    pub fn add(&self, text: String) -> ChatterboxResult<Memo> {
        let mut memos = self.memos.lock();
        let id = memos.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        let memo = Memo {
            id,
            text,
            created_at: Utc::now(),
        };
        memos.push(memo.clone());
        save_records(&self.path, &memos)?;
        Ok(memo)
    }

    /// All memos, newest first.
    pub fn list(&self) -> Vec<Memo> {
        let mut memos = self.memos.lock().clone();
        memos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        memos
    }

    /// Removes a memo by id; flushes when something changed.
    pub fn remove(&self, id: u64) -> ChatterboxResult<bool> {
        let mut memos = self.memos.lock();
        let before = memos.len();
        memos.retain(|m| m.id != id);
        let removed = memos.len() < before;
        if removed {
            save_records(&self.path, &memos)?;
        }
        Ok(removed)
    }
}

/// `add_memo`.
pub struct AddMemoTool {
    store: Arc<MemoStore>,
}

impl AddMemoTool {
    /// Wires the tool.
    pub fn new(store: Arc<MemoStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct AddMemoArgs {
    text: String,
}

#[async_trait]
impl Tool for AddMemoTool {
    fn name(&self) -> &str {
        "add_memo"
    }
    fn description(&self) -> &str {
        "Save a short note."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, args: &str) -> ChatterboxResult<String> {
        let args: AddMemoArgs =
            serde_json::from_str(args).map_err(|e| ChatterboxError::Tool(format!("bad arguments: {e}")))?;
        let memo = self.store.add(args.text)?;
        Ok(json!({ "success": true, "id": memo.id }).to_string())
    }
}

/// `list_memos`.
pub struct ListMemosTool {
    store: Arc<MemoStore>,
}

impl ListMemosTool {
    /// Wires the tool.
    pub fn new(store: Arc<MemoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListMemosTool {
    fn name(&self) -> &str {
        "list_memos"
    }
    fn description(&self) -> &str {
        "List saved notes, newest first."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: &str) -> ChatterboxResult<String> {
        Ok(serde_json::to_string(&self.store.list())?)
    }
}

/// `delete_memo`.
pub struct DeleteMemoTool {
    store: Arc<MemoStore>,
}

impl DeleteMemoTool {
    /// Wires the tool.
    pub fn new(store: Arc<MemoStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct DeleteMemoArgs {
    id: u64,
}

#[async_trait]
impl Tool for DeleteMemoTool {
    fn name(&self) -> &str {
        "delete_memo"
    }
    fn description(&self) -> &str {
        "Delete a note by id."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "integer" } },
            "required": ["id"]
        })
    }
    async fn execute(&self, args: &str) -> ChatterboxResult<String> {
        let args: DeleteMemoArgs =
            serde_json::from_str(args).map_err(|e| ChatterboxError::Tool(format!("bad arguments: {e}")))?;
        let removed = self.store.remove(args.id)?;
        Ok(json!({ "success": removed }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_list_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoStore::open(dir.path());
        let memo = store.add("buy milk".into()).unwrap();
        assert_eq!(store.list().len(), 1);
        assert!(store.remove(memo.id).unwrap());
        assert!(store.list().is_empty());
        assert!(!store.remove(memo.id).unwrap());
    }

    #[test]
    fn memos_persist_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = MemoStore::open(dir.path());
            store.add("first".into()).unwrap();
            store.add("second".into()).unwrap();
        }
        let reloaded = MemoStore::open(dir.path());
        let memos = reloaded.list();
        assert_eq!(memos.len(), 2);
        assert_eq!(memos[0].text, "second");
    }
}
