//! The immutable options record threaded through `HttpContext` and
//! `Orchestrator`. There is no process-wide mutable state besides the
//! interrupt flag, which `main.rs` owns and passes down explicitly.

use crate::http::captcha::CaptchaMode;
use crate::model::Target;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Options {
    pub targets: Vec<Target>,
    pub host: String,

    pub config_root: PathBuf,
    pub session_dir: PathBuf,

    pub cookie: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub sessionfile: Option<PathBuf>,
    pub load_cookies_browser: Option<String>,
    pub visitor_cookies: bool,

    pub no_videos: bool,
    pub no_pictures: bool,
    pub metadata_json: bool,
    pub post_metadata_txt: Option<String>,

    pub dirname_pattern: Option<String>,
    pub filename_pattern: Option<String>,

    pub count: usize,
    pub fast_update: bool,
    pub latest_stamps: Option<PathBuf>,
    pub no_resume: bool,
    pub request_interval: Option<f64>,
    pub captcha_mode: CaptchaMode,
    pub max_workers: usize,
}

impl Options {
    /// Deterministic digest over the options that would change which posts
    /// are yielded: target selectors and filters, but not output formatting
    /// (naming patterns, metadata flags) or transport knobs (worker count,
    /// request interval).
    pub fn options_hash(&self, target: &Target) -> String {
        let target_repr = serde_json::to_string(target).unwrap_or_default();
        crate::iterator::options_hash(&[
            &target_repr,
            if self.no_videos { "no_videos" } else { "videos" },
            if self.no_pictures { "no_pictures" } else { "pictures" },
        ])
    }
}

/// Default config root: `~/.config/weiboloader/`.
pub fn default_config_root() -> PathBuf {
    match std::env::var("WEIBOLOADER_HOME") {
        Ok(home) => PathBuf::from(home),
        Err(_) => dirs::home_dir()
            .map(|h| h.join(".config").join("weiboloader"))
            .unwrap_or_else(|| PathBuf::from(".weiboloader")),
    }
}
