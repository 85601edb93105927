//! Data model.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// China Standard Time, a fixed +08:00 offset. All timestamps in this
/// system are time-zone-aware in CST.
pub fn cst() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("8h is a valid fixed offset")
}

pub type CstTime = DateTime<FixedOffset>;

/// A user-supplied download target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    User {
        uid: Option<String>,
        nickname: Option<String>,
    },
    SuperTopic {
        containerid: Option<String>,
        name: Option<String>,
    },
    Search {
        keyword: String,
    },
    Mid {
        mid: String,
    },
}

impl Target {
    /// Stable identity used for checkpoint/lock/stamp file naming. Must
    /// only be called once the target has been resolved (nickname -> uid,
    /// topic name -> containerid).
    pub fn target_key(&self) -> String {
        match self {
            Target::User { uid: Some(uid), .. } => format!("user:{uid}"),
            Target::User { uid: None, nickname } => {
                format!("user:{}", nickname.as_deref().unwrap_or("unknown"))
            }
            Target::SuperTopic {
                containerid: Some(c),
                ..
            } => format!("topic:{c}"),
            Target::SuperTopic {
                containerid: None,
                name,
            } => format!("topic:{}", name.as_deref().unwrap_or("unknown")),
            Target::Search { keyword } => format!("search:{keyword}"),
            Target::Mid { mid } => format!("mid:{mid}"),
        }
    }
}

/// A media type, as classified by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Picture,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Picture => "picture",
            MediaType::Video => "video",
        }
    }
}

/// A single media item within a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub media_type: MediaType,
    pub url: String,
    /// 0-based position within the post.
    pub index: usize,
    pub filename_hint: Option<String>,
}

/// A Weibo post. `raw` is retained verbatim for sidecar round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub mid: String,
    pub bid: Option<String>,
    pub text: String,
    pub created_at: CstTime,
    pub user_nickname: Option<String>,
    pub user_uid: Option<String>,
    pub media_items: Vec<MediaItem>,
    pub raw: serde_json::Value,
}

/// Persisted paginated-iterator state.
///
/// `version` is bumped whenever the on-disk shape changes. A mismatch is
/// treated the same as corruption: reject and restart, the safer default
/// over guessing at a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorState {
    pub version: u32,
    pub cursor: Option<String>,
    pub page: u32,
    pub seen_mids: Vec<String>,
    pub options_hash: String,
    pub timestamp: CstTime,
}

pub const CURSOR_STATE_VERSION: u32 = 1;

/// `target_key -> timestamp` map persisted for `--latest-stamps`.
pub type StampsMap = std::collections::HashMap<String, CstTime>;
