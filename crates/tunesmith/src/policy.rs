//! The conversation policy: the instruction text the model reasons under, and the playlist
//! rules that are checked again before a playlist tool runs.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tera::Error as TeraError;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::ToolCall;
use crate::prompt_template::{load_prompt, read_template};

pub const DEFAULT_PLAYLIST_SIZE: usize = 10;
pub const MAX_PLAYLIST_SIZE: usize = 20;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Arguments that carry the tracks going into a playlist
const TRACK_LIST_KEYS: &[&str] = &[
    "trackIds",
    "track_ids",
    "trackUris",
    "track_uris",
    "uris",
    "tracks",
];

/// Arguments that say how many tracks a playlist should get
const TRACK_COUNT_KEYS: &[&str] = &["limit", "count", "track_count", "trackCount", "num_tracks"];

const PLAYLIST_ID_KEYS: &[&str] = &["playlistId", "playlist_id"];

const READ_ONLY_PREFIXES: &[&str] = &["get", "list", "search"];

#[derive(Serialize)]
struct ProviderNotes<'a> {
    name: &'a str,
    instructions: &'a str,
}

#[derive(Serialize)]
struct PolicyContext<'a> {
    default_playlist_size: usize,
    max_playlist_size: usize,
    providers: Vec<ProviderNotes<'a>>,
}

#[derive(Debug, Clone)]
pub struct ConversationPolicy {
    template: String,
    default_playlist_size: usize,
    max_playlist_size: usize,
}

impl Default for ConversationPolicy {
    fn default() -> Self {
        Self {
            template: SYSTEM_TEMPLATE.to_string(),
            default_playlist_size: DEFAULT_PLAYLIST_SIZE,
            max_playlist_size: MAX_PLAYLIST_SIZE,
        }
    }
}

impl ConversationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the instruction template; it is rendered once here so a broken file fails early
    pub fn with_template(mut self, template: impl Into<String>) -> Result<Self, TeraError> {
        self.template = template.into();
        self.render(&[])?;
        Ok(self)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TeraError> {
        let template = read_template(path.as_ref())?;
        Self::default().with_template(template)
    }

    pub fn with_playlist_sizes(mut self, default_size: usize, max_size: usize) -> Self {
        self.max_playlist_size = max_size.max(1);
        self.default_playlist_size = default_size.clamp(1, self.max_playlist_size);
        self
    }

    pub fn default_playlist_size(&self) -> usize {
        self.default_playlist_size
    }

    pub fn max_playlist_size(&self) -> usize {
        self.max_playlist_size
    }

    /// Render the system instructions, appending any notes the tool providers supplied
    pub fn render(&self, provider_notes: &[(String, String)]) -> Result<String, TeraError> {
        let context = PolicyContext {
            default_playlist_size: self.default_playlist_size,
            max_playlist_size: self.max_playlist_size,
            providers: provider_notes
                .iter()
                .map(|(name, instructions)| ProviderNotes { name, instructions })
                .collect(),
        };
        load_prompt(&self.template, &context)
    }

    /// Reject playlist tool calls that would break the size cap or repeat a track.
    ///
    /// `tally` holds the tracks already added during the current reply, so the cap and the
    /// no-repeat rule hold across several calls on the same playlist.
    pub fn check(&self, call: &ToolCall, tally: &PlaylistTally) -> AgentResult<()> {
        let name = call.name.to_lowercase();
        if !name.contains("playlist") {
            return Ok(());
        }
        let Some(args) = call.arguments.as_object() else {
            return Ok(());
        };

        for (key, tracks) in track_lists(args) {
            if tracks.len() > self.max_playlist_size {
                return Err(AgentError::InvalidParameters(format!(
                    "{} has {} tracks but a playlist may hold at most {}; retry with {} or fewer",
                    key,
                    tracks.len(),
                    self.max_playlist_size,
                    self.max_playlist_size
                )));
            }
            let mut seen = HashSet::new();
            for id in &tracks {
                if !seen.insert(id) {
                    return Err(AgentError::InvalidParameters(format!(
                        "{} lists {} more than once; a playlist must not repeat a track",
                        key, id
                    )));
                }
            }
        }

        if READ_ONLY_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return Ok(());
        }

        if let Some(playlist) = playlist_id(args) {
            let added = tally.added.get(&playlist);
            for (_, tracks) in track_lists(args) {
                if let Some(repeat) = tracks.iter().find(|id| added.is_some_and(|a| a.contains(*id))) {
                    return Err(AgentError::InvalidParameters(format!(
                        "{} was already added to playlist {}; a playlist must not repeat a track",
                        repeat, playlist
                    )));
                }
                let existing = added.map_or(0, HashSet::len);
                if existing + tracks.len() > self.max_playlist_size {
                    return Err(AgentError::InvalidParameters(format!(
                        "playlist {} already got {} tracks; adding {} more would exceed the cap of {}",
                        playlist,
                        existing,
                        tracks.len(),
                        self.max_playlist_size
                    )));
                }
            }
        }

        for key in TRACK_COUNT_KEYS {
            let Some(value) = args.get(*key).filter(|v| !v.is_null()) else {
                continue;
            };
            let count = as_count(value).ok_or_else(|| {
                AgentError::InvalidParameters(format!("{} must be a whole number, got {}", key, value))
            })?;
            if count > self.max_playlist_size as u64 {
                return Err(AgentError::InvalidParameters(format!(
                    "{} is {} but a playlist may hold at most {} tracks",
                    key, count, self.max_playlist_size
                )));
            }
        }
        Ok(())
    }
}

/// Tracks added to each playlist while answering one message
#[derive(Debug, Default)]
pub struct PlaylistTally {
    added: HashMap<String, HashSet<String>>,
}

impl PlaylistTally {
    /// Remember the tracks of a playlist call that went through
    pub fn record(&mut self, call: &ToolCall) {
        if !call.name.to_lowercase().contains("playlist") {
            return;
        }
        let Some(args) = call.arguments.as_object() else {
            return;
        };
        let Some(playlist) = playlist_id(args) else {
            return;
        };
        let added = self.added.entry(playlist).or_default();
        for (_, tracks) in track_lists(args) {
            added.extend(tracks);
        }
    }

    pub fn added_to(&self, playlist: &str) -> usize {
        self.added.get(playlist).map_or(0, HashSet::len)
    }
}

fn track_lists(args: &Map<String, Value>) -> Vec<(&'static str, Vec<String>)> {
    TRACK_LIST_KEYS
        .iter()
        .filter_map(|key| match args.get(*key) {
            Some(Value::Array(tracks)) => Some((*key, tracks.iter().map(track_id).collect())),
            _ => None,
        })
        .collect()
}

fn track_id(track: &Value) -> String {
    track
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| track.to_string())
}

fn playlist_id(args: &Map<String, Value>) -> Option<String> {
    PLAYLIST_ID_KEYS
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Models send counts as integers, whole floats or numeric strings
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            })
        }
        _ => None,
    }
}
