//! Play queue with a current cursor and three play modes.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How `next` advances past the current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    /// Advance and stop past the end.
    #[default]
    Sequence,
    /// Advance and wrap to the start.
    Loop,
    /// Repeat the current item.
    Single,
}

/// One queued song: display metadata plus a resolved URL and/or cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Display name.
    pub name: String,
    /// Artist display name.
    pub artist: String,
    /// Album display name.
    pub album: String,
    /// Resolved stream URL, when known.
    pub url: Option<String>,
    /// Cache key (`<provider>_<song_id>`), when known.
    pub cache_key: Option<String>,
}

struct Inner {
    items: Vec<PlaylistItem>,
    /// Current position; -1 means "before the first item".
    index: isize,
    mode: PlayMode,
}

/// Thread-safe playlist. The pipeline and the music tools share one handle.
pub struct Playlist {
    inner: Mutex<Inner>,
}

impl Playlist {
    /// Creates an empty playlist in sequence mode.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: Vec::new(),
                index: -1,
                mode: PlayMode::Sequence,
            }),
        }
    }

    /// Replaces the queue; the cursor lands on the first item.
    pub fn replace(&self, items: Vec<PlaylistItem>) {
        let mut inner = self.inner.lock();
        inner.index = if items.is_empty() { -1 } else { 0 };
        inner.items = items;
    }

    /// Replaces the queue with an explicit cursor (clamped into [-1, len)).
    pub fn replace_with_index(&self, items: Vec<PlaylistItem>, index: isize) {
        let mut inner = self.inner.lock();
        let max = items.len() as isize - 1;
        inner.index = index.clamp(-1, max.max(-1));
        inner.items = items;
    }

    /// The item under the cursor.
    pub fn current(&self) -> Option<PlaylistItem> {
        let inner = self.inner.lock();
        usize::try_from(inner.index)
            .ok()
            .and_then(|i| inner.items.get(i).cloned())
    }

    /// Advances per the play mode and returns the new current item.
    /// `None` means the queue is exhausted (or empty).
    pub fn next(&self) -> Option<PlaylistItem> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() {
            return None;
        }
        let len = inner.items.len() as isize;
        let next_index = match inner.mode {
            PlayMode::Sequence => {
                let candidate = inner.index + 1;
                if candidate >= len {
                    return None;
                }
                candidate
            }
            PlayMode::Loop => (inner.index + 1).rem_euclid(len),
            PlayMode::Single => inner.index.max(0),
        };
        inner.index = next_index;
        inner.items.get(next_index as usize).cloned()
    }

    /// Whether `next` would produce an item.
    pub fn has_next(&self) -> bool {
        let inner = self.inner.lock();
        if inner.items.is_empty() {
            return false;
        }
        match inner.mode {
            PlayMode::Sequence => inner.index + 1 < inner.items.len() as isize,
            PlayMode::Loop | PlayMode::Single => true,
        }
    }

    /// Sets the play mode.
    pub fn set_mode(&self, mode: PlayMode) {
        self.inner.lock().mode = mode;
    }

    /// The current play mode.
    pub fn mode(&self) -> PlayMode {
        self.inner.lock().mode
    }

    /// Queue length.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// True when the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Empties the queue and resets the cursor.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.index = -1;
    }

    /// Snapshot for pause bookkeeping: (items, cursor, mode).
    pub fn snapshot(&self) -> (Vec<PlaylistItem>, isize, PlayMode) {
        let inner = self.inner.lock();
        (inner.items.clone(), inner.index, inner.mode)
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> PlaylistItem {
        PlaylistItem {
            name: name.to_string(),
            artist: "artist".to_string(),
            album: String::new(),
            url: None,
            cache_key: Some(format!("qq_{name}")),
        }
    }

    #[test]
    fn next_on_empty_returns_none() {
        let playlist = Playlist::new();
        assert!(playlist.next().is_none());
        assert!(!playlist.has_next());
    }

    #[test]
    fn sequence_stops_past_the_end() {
        let playlist = Playlist::new();
        playlist.replace(vec![item("a"), item("b")]);
        assert_eq!(playlist.current().unwrap().name, "a");
        assert_eq!(playlist.next().unwrap().name, "b");
        assert!(playlist.next().is_none());
        // Cursor stays on the last item after a failed advance.
        assert_eq!(playlist.current().unwrap().name, "b");
    }

    #[test]
    fn loop_wraps_to_the_start() {
        let playlist = Playlist::new();
        playlist.replace(vec![item("a"), item("b")]);
        playlist.set_mode(PlayMode::Loop);
        assert_eq!(playlist.next().unwrap().name, "b");
        assert_eq!(playlist.next().unwrap().name, "a");
        assert!(playlist.has_next());
    }

    #[test]
    fn single_repeats_current() {
        let playlist = Playlist::new();
        playlist.replace(vec![item("a"), item("b")]);
        playlist.set_mode(PlayMode::Single);
        assert_eq!(playlist.next().unwrap().name, "a");
        assert_eq!(playlist.next().unwrap().name, "a");
    }

    #[test]
    fn replace_with_index_clamps_cursor() {
        let playlist = Playlist::new();
        playlist.replace_with_index(vec![item("a"), item("b")], 7);
        assert_eq!(playlist.current().unwrap().name, "b");
        playlist.replace_with_index(vec![item("a")], -5);
        assert!(playlist.current().is_none());
        assert_eq!(playlist.next().unwrap().name, "a");
    }

    #[test]
    fn clear_resets_cursor() {
        let playlist = Playlist::new();
        playlist.replace(vec![item("a")]);
        playlist.clear();
        assert!(playlist.current().is_none());
        assert_eq!(playlist.len(), 0);
    }
}
