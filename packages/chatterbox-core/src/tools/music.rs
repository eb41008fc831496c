//! Music tools: search/play, queue control, and pause/resume bookkeeping.
//!
//! The tools only prepare playback: they fill the playlist and return a
//! [`MusicToolResult`] whose URL or cache key the pipeline turns into an
//! actual streaming session. Catalog access goes through the
//! [`MusicProvider`] contract; the provider's `name()` is the first half of
//! every cache key.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::MusicCache;
use crate::error::{ChatterboxError, ChatterboxResult};
use crate::media::MediaPlayback;
use crate::playlist::{PlayMode, Playlist, PlaylistItem};
use crate::tools::Tool;

/// Tool names whose successful results the pipeline feeds into playback.
pub const PLAYBACK_TOOLS: [&str; 3] = ["play_music", "next_music", "resume_music"];

/// One catalog entry from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    /// Provider song id (numeric, as a string).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Artist display name.
    pub artist: String,
    /// Album display name.
    #[serde(default)]
    pub album: String,
}

/// Music catalog client: search and URL resolution.
#[async_trait]
pub trait MusicProvider: Send + Sync {
    /// Provider identifier; also the cache-key prefix.
    fn name(&self) -> &str;
    /// Searches the catalog.
    async fn search(&self, query: &str) -> ChatterboxResult<Vec<Song>>;
    /// Resolves a playable URL for a song id.
    async fn resolve_url(&self, song_id: &str) -> ChatterboxResult<String>;
}

/// Structured result every music tool returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MusicToolResult {
    /// Whether the request produced something playable (or a clean stop).
    pub success: bool,
    /// Display name of the selected song.
    #[serde(default)]
    pub song_name: String,
    /// Artist of the selected song.
    #[serde(default)]
    pub artist: String,
    /// Resolved stream URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Cache key of the selected song.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// Queue length after the tool ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_size: Option<usize>,
    /// Start offset in seconds (resume path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_sec: Option<f64>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MusicToolResult {
    /// Serializes the result for the tool message.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"success":false}"#.to_string())
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Snapshot of an interrupted music session. At most one exists; it is
/// cleared on explicit stop or on resume.
#[derive(Debug, Clone)]
pub struct PausedContext {
    /// Queue at pause time.
    pub items: Vec<PlaylistItem>,
    /// Cursor at pause time.
    pub index: isize,
    /// Play mode at pause time.
    pub mode: PlayMode,
    /// Cache key of the track that was playing.
    pub cache_key: Option<String>,
    /// Seconds into the track.
    pub position_sec: f64,
    /// When the pause happened.
    pub paused_at: DateTime<Utc>,
}

/// Shared slot holding the at-most-one paused context.
pub type PausedSlot = Arc<Mutex<Option<PausedContext>>>;

/// Builds the playlist items for a batch of provider search results.
fn items_from_songs(provider: &str, songs: &[Song]) -> Vec<PlaylistItem> {
    songs
        .iter()
        .map(|song| PlaylistItem {
            name: song.name.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            url: None,
            cache_key: Some(format!("{provider}_{}", song.id)),
        })
        .collect()
}

#[derive(Deserialize)]
struct PlayArgs {
    song: String,
    #[serde(default)]
    artist: String,
}

/// `play_music`: search, queue, and hand the first match to the pipeline.
pub struct PlayMusicTool {
    provider: Arc<dyn MusicProvider>,
    cache: Option<Arc<MusicCache>>,
    playlist: Arc<Playlist>,
}

impl PlayMusicTool {
    /// Wires the tool.
    pub fn new(
        provider: Arc<dyn MusicProvider>,
        cache: Option<Arc<MusicCache>>,
        playlist: Arc<Playlist>,
    ) -> Self {
        Self {
            provider,
            cache,
            playlist,
        }
    }

    async fn run(&self, args: &str) -> MusicToolResult {
        let args: PlayArgs = match serde_json::from_str(args) {
            Ok(a) => a,
            Err(e) => return MusicToolResult::failure(format!("bad arguments: {e}")),
        };
        let query = if args.artist.is_empty() {
            args.song.clone()
        } else {
            format!("{} {}", args.song, args.artist)
        };

        match self.provider.search(&query).await {
            Ok(songs) if !songs.is_empty() => {
                let items = items_from_songs(self.provider.name(), &songs);
                let first = items[0].clone();
                let size = items.len();
                self.playlist.replace(items);
                self.resolve(first, size).await
            }
            Ok(_) => self.from_cache(&query).await,
            Err(e) => {
                log::warn!("[Music] Provider search failed ({e}), trying cache");
                self.from_cache(&query).await
            }
        }
    }

    /// Provider unavailable or empty: fall back to locally cached tracks.
    async fn from_cache(&self, query: &str) -> MusicToolResult {
        let Some(cache) = &self.cache else {
            return MusicToolResult::failure(format!("no match for {query}"));
        };
        let hits = cache.search(query);
        if hits.is_empty() {
            return MusicToolResult::failure(format!("no match for {query}"));
        }
        let items: Vec<PlaylistItem> = hits
            .iter()
            .map(|entry| PlaylistItem {
                name: entry.name.clone(),
                artist: entry.artist.clone(),
                album: entry.album.clone(),
                url: None,
                cache_key: Some(format!("{}_{}", entry.provider, entry.id)),
            })
            .collect();
        let first = items[0].clone();
        let size = items.len();
        self.playlist.replace(items);
        MusicToolResult {
            success: true,
            song_name: first.name,
            artist: first.artist,
            url: None,
            cache_key: first.cache_key,
            playlist_size: Some(size),
            ..MusicToolResult::default()
        }
    }

    /// Resolves the first item: cached file wins, otherwise ask the
    /// provider for a URL.
    async fn resolve(&self, item: PlaylistItem, playlist_size: usize) -> MusicToolResult {
        let cache_key = item.cache_key.clone();
        let cached = cache_key
            .as_deref()
            .and_then(|key| self.cache.as_ref().and_then(|c| c.lookup(key)))
            .is_some();
        let url = if cached {
            None
        } else {
            let song_id = cache_key
                .as_deref()
                .and_then(|k| k.split_once('_'))
                .map(|(_, id)| id.to_string())
                .unwrap_or_default();
            match self.provider.resolve_url(&song_id).await {
                Ok(url) => Some(url),
                Err(e) => return MusicToolResult::failure(format!("resolve failed: {e}")),
            }
        };
        MusicToolResult {
            success: true,
            song_name: item.name,
            artist: item.artist,
            url,
            cache_key,
            playlist_size: Some(playlist_size),
            ..MusicToolResult::default()
        }
    }
}

#[async_trait]
impl Tool for PlayMusicTool {
    fn name(&self) -> &str {
        "play_music"
    }
    fn description(&self) -> &str {
        "Search for a song and start playing it. Queues all matches."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "song": { "type": "string", "description": "Song name to search for" },
                "artist": { "type": "string", "description": "Optional artist to narrow the search" }
            },
            "required": ["song"]
        })
    }
    async fn execute(&self, args: &str) -> ChatterboxResult<String> {
        Ok(self.run(args).await.to_json())
    }
}

/// `next_music`: advance the queue per its play mode.
pub struct NextMusicTool {
    provider: Arc<dyn MusicProvider>,
    cache: Option<Arc<MusicCache>>,
    playlist: Arc<Playlist>,
}

impl NextMusicTool {
    /// Wires the tool.
    pub fn new(
        provider: Arc<dyn MusicProvider>,
        cache: Option<Arc<MusicCache>>,
        playlist: Arc<Playlist>,
    ) -> Self {
        Self {
            provider,
            cache,
            playlist,
        }
    }

    async fn run(&self) -> MusicToolResult {
        let Some(item) = self.playlist.next() else {
            return MusicToolResult::failure("end of playlist");
        };
        resolve_item(&*self.provider, self.cache.as_ref(), &item, self.playlist.len()).await
    }
}

/// Resolves a playlist item into a playable result: an existing cached file
/// needs no URL; anything else asks the provider.
pub(crate) async fn resolve_item(
    provider: &dyn MusicProvider,
    cache: Option<&Arc<MusicCache>>,
    item: &PlaylistItem,
    playlist_size: usize,
) -> MusicToolResult {
    let cached = item
        .cache_key
        .as_deref()
        .and_then(|key| cache.and_then(|c| c.lookup(key)))
        .is_some();
    let url = if cached || item.url.is_some() {
        item.url.clone()
    } else {
        let song_id = item
            .cache_key
            .as_deref()
            .and_then(|k| k.split_once('_'))
            .map(|(_, id)| id.to_string())
            .unwrap_or_default();
        match provider.resolve_url(&song_id).await {
            Ok(url) => Some(url),
            Err(e) => return MusicToolResult::failure(format!("resolve failed: {e}")),
        }
    };
    MusicToolResult {
        success: true,
        song_name: item.name.clone(),
        artist: item.artist.clone(),
        url,
        cache_key: item.cache_key.clone(),
        playlist_size: Some(playlist_size),
        ..MusicToolResult::default()
    }
}

#[async_trait]
impl Tool for NextMusicTool {
    fn name(&self) -> &str {
        "next_music"
    }
    fn description(&self) -> &str {
        "Skip to the next song in the playlist."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: &str) -> ChatterboxResult<String> {
        Ok(self.run().await.to_json())
    }
}

/// `pause_music`: stop playback and snapshot the session for resume.
pub struct PauseMusicTool {
    player: Arc<dyn MediaPlayback>,
    playlist: Arc<Playlist>,
    paused: PausedSlot,
}

impl PauseMusicTool {
    /// Wires the tool.
    pub fn new(player: Arc<dyn MediaPlayback>, playlist: Arc<Playlist>, paused: PausedSlot) -> Self {
        Self {
            player,
            playlist,
            paused,
        }
    }
}

#[async_trait]
impl Tool for PauseMusicTool {
    fn name(&self) -> &str {
        "pause_music"
    }
    fn description(&self) -> &str {
        "Pause the current song, remembering the position for resume."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: &str) -> ChatterboxResult<String> {
        if !self.player.is_active() {
            return Ok(MusicToolResult::failure("nothing is playing").to_json());
        }
        let position = self.player.position();
        let (items, index, mode) = self.playlist.snapshot();
        let current = self.playlist.current();
        self.player.stop();
        let context = PausedContext {
            items,
            index,
            mode,
            cache_key: current.as_ref().and_then(|i| i.cache_key.clone()),
            position_sec: position,
            paused_at: Utc::now(),
        };
        *self.paused.lock() = Some(context);
        let result = MusicToolResult {
            success: true,
            song_name: current.as_ref().map(|i| i.name.clone()).unwrap_or_default(),
            artist: current.map(|i| i.artist).unwrap_or_default(),
            position_sec: Some(position),
            ..MusicToolResult::default()
        };
        Ok(result.to_json())
    }
}

/// `resume_music`: restore the paused session.
pub struct ResumeMusicTool {
    provider: Arc<dyn MusicProvider>,
    cache: Option<Arc<MusicCache>>,
    playlist: Arc<Playlist>,
    paused: PausedSlot,
}

impl ResumeMusicTool {
    /// Wires the tool.
    pub fn new(
        provider: Arc<dyn MusicProvider>,
        cache: Option<Arc<MusicCache>>,
        playlist: Arc<Playlist>,
        paused: PausedSlot,
    ) -> Self {
        Self {
            provider,
            cache,
            playlist,
            paused,
        }
    }
}

#[async_trait]
impl Tool for ResumeMusicTool {
    fn name(&self) -> &str {
        "resume_music"
    }
    fn description(&self) -> &str {
        "Resume the paused song from where it stopped."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: &str) -> ChatterboxResult<String> {
        let Some(context) = self.paused.lock().take() else {
            return Ok(MusicToolResult::failure("nothing is paused").to_json());
        };
        self.playlist
            .replace_with_index(context.items, context.index);
        self.playlist.set_mode(context.mode);
        let Some(item) = self.playlist.current() else {
            return Ok(MusicToolResult::failure("paused queue was empty").to_json());
        };
        let mut result = resolve_item(
            &*self.provider,
            self.cache.as_ref(),
            &item,
            self.playlist.len(),
        )
        .await;
        if result.success {
            result.position_sec = Some(context.position_sec);
        }
        Ok(result.to_json())
    }
}

/// `stop_music`: stop playback and clear all session state.
pub struct StopMusicTool {
    player: Arc<dyn MediaPlayback>,
    playlist: Arc<Playlist>,
    paused: PausedSlot,
}

impl StopMusicTool {
    /// Wires the tool.
    pub fn new(player: Arc<dyn MediaPlayback>, playlist: Arc<Playlist>, paused: PausedSlot) -> Self {
        Self {
            player,
            playlist,
            paused,
        }
    }
}

#[async_trait]
impl Tool for StopMusicTool {
    fn name(&self) -> &str {
        "stop_music"
    }
    fn description(&self) -> &str {
        "Stop music playback and clear the playlist."
    }
    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: &str) -> ChatterboxResult<String> {
        self.player.stop();
        self.playlist.clear();
        self.paused.lock().take();
        Ok(MusicToolResult {
            success: true,
            ..MusicToolResult::default()
        }
        .to_json())
    }
}

/// Parses a tool result as a music result, if it is one.
pub fn parse_music_result(result: &str) -> Option<MusicToolResult> {
    serde_json::from_str(result).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        songs: Vec<Song>,
        fail_search: bool,
    }

    #[async_trait]
    impl MusicProvider for FakeProvider {
        fn name(&self) -> &str {
            "qq"
        }
        async fn search(&self, _query: &str) -> ChatterboxResult<Vec<Song>> {
            if self.fail_search {
                Err(ChatterboxError::Network("offline".into()))
            } else {
                Ok(self.songs.clone())
            }
        }
        async fn resolve_url(&self, song_id: &str) -> ChatterboxResult<String> {
            Ok(format!("https://music.example/{song_id}.mp3"))
        }
    }

    fn song(id: &str, name: &str) -> Song {
        Song {
            id: id.to_string(),
            name: name.to_string(),
            artist: "周杰伦".to_string(),
            album: "叶惠美".to_string(),
        }
    }

    #[tokio::test]
    async fn play_music_queues_results_and_resolves_first() {
        let tool = PlayMusicTool::new(
            Arc::new(FakeProvider {
                songs: vec![song("12345", "晴天"), song("67890", "彩虹")],
                fail_search: false,
            }),
            None,
            Arc::new(Playlist::new()),
        );
        let result = parse_music_result(&tool.execute(r#"{"song":"晴天"}"#).await.unwrap()).unwrap();
        assert!(result.success);
        assert_eq!(result.song_name, "晴天");
        assert_eq!(result.cache_key.as_deref(), Some("qq_12345"));
        assert_eq!(result.url.as_deref(), Some("https://music.example/12345.mp3"));
        assert_eq!(result.playlist_size, Some(2));
    }

    #[tokio::test]
    async fn play_music_reports_no_match() {
        let tool = PlayMusicTool::new(
            Arc::new(FakeProvider {
                songs: vec![],
                fail_search: false,
            }),
            None,
            Arc::new(Playlist::new()),
        );
        let result = parse_music_result(&tool.execute(r#"{"song":"missing"}"#).await.unwrap()).unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no match"));
    }

    #[tokio::test]
    async fn next_music_advances_the_queue() {
        let playlist = Arc::new(Playlist::new());
        let provider = Arc::new(FakeProvider {
            songs: vec![],
            fail_search: false,
        });
        playlist.replace(vec![
            PlaylistItem {
                name: "one".into(),
                artist: "a".into(),
                album: String::new(),
                url: Some("https://music.example/1.mp3".into()),
                cache_key: Some("qq_1".into()),
            },
            PlaylistItem {
                name: "two".into(),
                artist: "a".into(),
                album: String::new(),
                url: None,
                cache_key: Some("qq_2".into()),
            },
        ]);
        let tool = NextMusicTool::new(provider, None, Arc::clone(&playlist));
        let result = parse_music_result(&tool.execute("{}").await.unwrap()).unwrap();
        assert!(result.success);
        assert_eq!(result.song_name, "two");
        assert_eq!(result.url.as_deref(), Some("https://music.example/2.mp3"));
        let result = parse_music_result(&tool.execute("{}").await.unwrap()).unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn resume_restores_queue_and_position() {
        let playlist = Arc::new(Playlist::new());
        let paused: PausedSlot = Arc::new(Mutex::new(Some(PausedContext {
            items: vec![PlaylistItem {
                name: "one".into(),
                artist: "a".into(),
                album: String::new(),
                url: Some("https://music.example/1.mp3".into()),
                cache_key: Some("qq_1".into()),
            }],
            index: 0,
            mode: PlayMode::Loop,
            cache_key: Some("qq_1".into()),
            position_sec: 42.5,
            paused_at: Utc::now(),
        })));
        let tool = ResumeMusicTool::new(
            Arc::new(FakeProvider {
                songs: vec![],
                fail_search: false,
            }),
            None,
            Arc::clone(&playlist),
            Arc::clone(&paused),
        );
        let result = parse_music_result(&tool.execute("{}").await.unwrap()).unwrap();
        assert!(result.success);
        assert_eq!(result.position_sec, Some(42.5));
        assert_eq!(playlist.mode(), PlayMode::Loop);
        // Cleared on successful resume.
        assert!(paused.lock().is_none());
        let again = parse_music_result(&tool.execute("{}").await.unwrap()).unwrap();
        assert!(!again.success);
    }

    #[test]
    fn playback_set_matches_contract() {
        assert!(PLAYBACK_TOOLS.contains(&"play_music"));
        assert!(PLAYBACK_TOOLS.contains(&"next_music"));
        assert!(PLAYBACK_TOOLS.contains(&"resume_music"));
        assert!(!PLAYBACK_TOOLS.contains(&"pause_music"));
    }
}
