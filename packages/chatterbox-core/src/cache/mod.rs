//! Size-bounded content-addressed MP3 store.
//!
//! Files live at `<cache_dir>/<cache_key>.mp3` (with `.mp3.tmp` during
//! download) and the index at `<cache_dir>/cache_index.json`. The index is
//! rewritten atomically on every structural change; entries whose file has
//! vanished are dropped at startup. Eviction removes entries in ascending
//! (play_count, last_played) order until the store fits the configured cap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ChatterboxError, ChatterboxResult};

const INDEX_FILE: &str = "cache_index.json";

/// One cached track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Provider song id (the part of the cache key after the provider).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Artist display name.
    pub artist: String,
    /// Album display name.
    pub album: String,
    /// Provider identifier (the part of the cache key before the first `_`).
    pub provider: String,
    /// File size in bytes.
    pub size: u64,
    /// When the file was committed.
    pub cached_at: DateTime<Utc>,
    /// Last successful playback.
    pub last_played: DateTime<Utc>,
    /// Playback count; absent in older indexes.
    #[serde(default)]
    pub play_count: u64,
}

/// Content-addressed MP3 cache with an LRU-ish eviction policy.
pub struct MusicCache {
    dir: PathBuf,
    max_bytes: u64,
    enabled: bool,
    index: RwLock<HashMap<String, CacheEntry>>,
}

impl MusicCache {
    /// Opens (or creates) the cache directory and loads the index.
    ///
    /// `max_size_mb == 0` disables the cache entirely: every lookup misses
    /// and every store is a no-op.
    pub fn open(dir: impl Into<PathBuf>, max_size_mb: u64) -> ChatterboxResult<Self> {
        let dir = dir.into();
        if max_size_mb == 0 {
            return Ok(Self {
                dir,
                max_bytes: 0,
                enabled: false,
                index: RwLock::new(HashMap::new()),
            });
        }
        std::fs::create_dir_all(&dir)?;
        let cache = Self {
            max_bytes: max_size_mb * 1024 * 1024,
            enabled: true,
            index: RwLock::new(load_index(&dir)),
            dir,
        };
        cache.validate_on_start();
        Ok(cache)
    }

    /// Whether the cache participates in playback at all.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Final path for a cache key.
    pub fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.mp3"))
    }

    /// In-flight download path for a cache key.
    pub fn temp_file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.mp3.tmp"))
    }

    /// Returns the file path for `key` if it is indexed and on disk.
    ///
    /// Read-only: the last-played touch is deferred to
    /// [`touch_last_played`](Self::touch_last_played).
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        if !self.index.read().contains_key(key) {
            return None;
        }
        let path = self.file_path(key);
        path.exists().then_some(path)
    }

    /// Records a committed file in the index, evicting as needed.
    ///
    /// The provider and song id are derived from the key
    /// (`<provider>_<song_id>`); the file size is read from disk.
    pub fn store(&self, key: &str, name: &str, artist: &str, album: &str) -> ChatterboxResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.file_path(key);
        let size = std::fs::metadata(&path)
            .map_err(|e| ChatterboxError::Cache(format!("stat {}: {e}", path.display())))?
            .len();
        let (provider, id) = key.split_once('_').unwrap_or((key, ""));
        let now = Utc::now();
        {
            let mut index = self.index.write();
            index.insert(
                key.to_string(),
                CacheEntry {
                    id: id.to_string(),
                    name: name.to_string(),
                    artist: artist.to_string(),
                    album: album.to_string(),
                    provider: provider.to_string(),
                    size,
                    cached_at: now,
                    last_played: now,
                    play_count: 0,
                },
            );
            self.evict_locked(&mut index);
        }
        self.save();
        log::info!("[Cache] Stored {key} ({size} bytes)");
        Ok(())
    }

    /// Bumps play statistics for `key` after a successful playback.
    pub fn touch_last_played(&self, key: &str) {
        if !self.enabled {
            return;
        }
        let mut changed = false;
        {
            let mut index = self.index.write();
            if let Some(entry) = index.get_mut(key) {
                entry.last_played = Utc::now();
                entry.play_count += 1;
                changed = true;
            }
        }
        if changed {
            self.save();
        }
    }

    /// Searches cached tracks by keyword, best match first.
    pub fn search(&self, keyword: &str) -> Vec<CacheEntry> {
        if !self.enabled {
            return Vec::new();
        }
        let query = keyword.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let words: Vec<&str> = query.split_whitespace().collect();
        let index = self.index.read();
        let mut scored: Vec<(i32, CacheEntry)> = index
            .iter()
            .filter(|(key, _)| self.file_path(key).exists())
            .filter_map(|(_, entry)| {
                let score = score_entry(entry, &query, &words);
                (score > 0).then(|| (score, entry.clone()))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.last_played.cmp(&a.1.last_played))
        });
        scored.into_iter().map(|(_, e)| e).collect()
    }

    /// All indexed entries, most recently played first.
    pub fn list(&self) -> Vec<CacheEntry> {
        let index = self.index.read();
        let mut entries: Vec<CacheEntry> = index.values().cloned().collect();
        entries.sort_by(|a, b| b.last_played.cmp(&a.last_played));
        entries
    }

    /// Deletes cached tracks whose name or artist matches `keyword`,
    /// skipping any entry whose artist is in `exclude_artists`.
    /// Returns the removed entries.
    pub fn delete(&self, keyword: &str, exclude_artists: &[String]) -> Vec<CacheEntry> {
        if !self.enabled {
            return Vec::new();
        }
        let query = keyword.trim().to_lowercase();
        let mut removed = Vec::new();
        {
            let mut index = self.index.write();
            let keys: Vec<String> = index
                .iter()
                .filter(|(_, entry)| {
                    let matches = entry.name.to_lowercase().contains(&query)
                        || entry.artist.to_lowercase().contains(&query);
                    let excluded = exclude_artists
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(&entry.artist));
                    matches && !excluded
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                if let Some(entry) = index.remove(&key) {
                    remove_file_quietly(&self.file_path(&key));
                    removed.push(entry);
                }
            }
        }
        if !removed.is_empty() {
            self.save();
        }
        removed
    }

    /// Deletes a single entry and its file.
    pub fn delete_by_key(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let removed = self.index.write().remove(key).is_some();
        if removed {
            remove_file_quietly(&self.file_path(key));
            self.save();
        }
        removed
    }

    /// Total bytes accounted in the index.
    pub fn total_bytes(&self) -> u64 {
        self.index.read().values().map(|e| e.size).sum()
    }

    /// Drops index entries whose file has gone missing.
    fn validate_on_start(&self) {
        let mut dropped = 0usize;
        {
            let mut index = self.index.write();
            let missing: Vec<String> = index
                .keys()
                .filter(|key| !self.file_path(key).exists())
                .cloned()
                .collect();
            for key in missing {
                // Malformed entry: logged at warn, repaired by removal.
                log::warn!("[Cache] Index entry {key} has no file, dropping");
                index.remove(&key);
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.save();
        }
    }

    /// Evicts entries (ascending play_count, then last_played) until the
    /// total size fits the cap. Caller holds the write lock and saves.
    fn evict_locked(&self, index: &mut HashMap<String, CacheEntry>) {
        let mut total: u64 = index.values().map(|e| e.size).sum();
        if total <= self.max_bytes {
            return;
        }
        let mut order: Vec<(String, u64, DateTime<Utc>, u64)> = index
            .iter()
            .map(|(k, e)| (k.clone(), e.play_count, e.last_played, e.size))
            .collect();
        order.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));
        for (key, _, _, size) in order {
            if total <= self.max_bytes {
                break;
            }
            log::info!("[Cache] Evicting {key} ({size} bytes)");
            remove_file_quietly(&self.file_path(&key));
            index.remove(&key);
            total = total.saturating_sub(size);
        }
    }

    /// Atomically rewrites the index file (temp file + rename).
    fn save(&self) {
        let snapshot = self.index.read().clone();
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        let write = || -> std::io::Result<()> {
            let contents = serde_json::to_string_pretty(&snapshot)?;
            std::fs::write(&tmp, contents)?;
            std::fs::rename(&tmp, &path)
        };
        if let Err(e) = write() {
            log::warn!("[Cache] Failed to save index: {e}");
        }
    }
}

fn load_index(dir: &Path) -> HashMap<String, CacheEntry> {
    let path = dir.join(INDEX_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            log::warn!("[Cache] Index unreadable, starting empty: {e}");
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

fn remove_file_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("[Cache] Failed to remove {}: {e}", path.display());
        }
    }
}

fn score_entry(entry: &CacheEntry, query: &str, words: &[&str]) -> i32 {
    let name = entry.name.to_lowercase();
    let artist = entry.artist.to_lowercase();
    let mut score = if name == query {
        10
    } else if name.contains(query) {
        5
    } else {
        0
    };
    if artist.contains(query) {
        score += 2;
    }
    if words.len() > 1
        && words
            .iter()
            .any(|w| w.chars().count() >= 2 && name.contains(w))
    {
        score += 3;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(cache: &MusicCache, key: &str, bytes: usize) {
        std::fs::write(cache.file_path(key), vec![0u8; bytes]).unwrap();
    }

    fn open_cache(dir: &Path, mb: u64) -> MusicCache {
        MusicCache::open(dir, mb).unwrap()
    }

    #[test]
    fn disabled_cache_misses_everything() {
        let cache = MusicCache::open("/tmp/never-created-chatterbox", 0).unwrap();
        assert!(!cache.enabled());
        assert!(cache.lookup("qq_1").is_none());
        assert!(cache.store("qq_1", "a", "b", "c").is_ok());
        assert!(cache.search("a").is_empty());
    }

    #[test]
    fn store_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 10);
        write_file(&cache, "qq_12345", 1000);
        cache.store("qq_12345", "晴天", "周杰伦", "叶惠美").unwrap();
        let path = cache.lookup("qq_12345").unwrap();
        assert_eq!(path, cache.file_path("qq_12345"));
        let entry = &cache.list()[0];
        assert_eq!(entry.provider, "qq");
        assert_eq!(entry.id, "12345");
        assert_eq!(entry.size, 1000);
    }

    #[test]
    fn fresh_process_observes_stored_entry() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open_cache(dir.path(), 10);
            write_file(&cache, "qq_1", 64);
            cache.store("qq_1", "song", "artist", "album").unwrap();
        }
        let reloaded = open_cache(dir.path(), 10);
        let entries = reloaded.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "song");
        assert_eq!(entries[0].play_count, 0);
    }

    #[test]
    fn startup_drops_entries_without_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open_cache(dir.path(), 10);
            write_file(&cache, "qq_1", 64);
            cache.store("qq_1", "song", "artist", "album").unwrap();
        }
        std::fs::remove_file(dir.path().join("qq_1.mp3")).unwrap();
        let reloaded = open_cache(dir.path(), 10);
        assert!(reloaded.list().is_empty());
        assert!(reloaded.lookup("qq_1").is_none());
    }

    #[test]
    fn lookup_does_not_mutate_play_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 10);
        write_file(&cache, "qq_1", 64);
        cache.store("qq_1", "song", "artist", "album").unwrap();
        cache.lookup("qq_1");
        assert_eq!(cache.list()[0].play_count, 0);
        cache.touch_last_played("qq_1");
        assert_eq!(cache.list()[0].play_count, 1);
    }

    #[test]
    fn eviction_removes_least_played_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1); // 1 MB cap
        write_file(&cache, "qq_1", 600 * 1024);
        cache.store("qq_1", "one", "a", "").unwrap();
        cache.touch_last_played("qq_1");
        write_file(&cache, "qq_2", 600 * 1024);
        cache.store("qq_2", "two", "b", "").unwrap();
        // qq_2 (play_count 0) is evicted even though it is newer.
        assert!(cache.lookup("qq_2").is_none());
        assert!(cache.lookup("qq_1").is_some());
        assert!(cache.total_bytes() <= 1024 * 1024);
    }

    #[test]
    fn search_ranks_exact_name_above_substring() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 10);
        write_file(&cache, "qq_1", 10);
        cache.store("qq_1", "晴天", "周杰伦", "").unwrap();
        write_file(&cache, "qq_2", 10);
        cache.store("qq_2", "晴天娃娃", "孙燕姿", "").unwrap();
        let results = cache.search("晴天");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "晴天");
        assert_eq!(results[1].name, "晴天娃娃");
    }

    #[test]
    fn search_skips_entries_whose_file_vanished() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 10);
        write_file(&cache, "qq_1", 10);
        cache.store("qq_1", "gone", "x", "").unwrap();
        std::fs::remove_file(cache.file_path("qq_1")).unwrap();
        assert!(cache.search("gone").is_empty());
    }

    #[test]
    fn multi_word_query_gets_word_bonus() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 10);
        write_file(&cache, "qq_1", 10);
        cache.store("qq_1", "yellow submarine", "the beatles", "").unwrap();
        let results = cache.search("yellow submarine beatles");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn delete_honors_artist_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 10);
        write_file(&cache, "qq_1", 10);
        cache.store("qq_1", "ballad", "keeper", "").unwrap();
        write_file(&cache, "qq_2", 10);
        cache.store("qq_2", "ballad two", "other", "").unwrap();
        let removed = cache.delete("ballad", &["keeper".to_string()]);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].artist, "other");
        assert!(cache.lookup("qq_1").is_some());
        assert!(cache.lookup("qq_2").is_none());
    }

    #[test]
    fn delete_by_key_removes_entry_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 10);
        write_file(&cache, "qq_1", 10);
        cache.store("qq_1", "song", "artist", "").unwrap();
        assert!(cache.delete_by_key("qq_1"));
        assert!(!cache.file_path("qq_1").exists());
        assert!(!cache.delete_by_key("qq_1"));
    }
}
