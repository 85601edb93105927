//! Command-line surface, mirroring the teacher's `clap` derive style
//! (`src/commands/mod.rs`): one struct, one `derive(Parser)`, flags
//! converted into the immutable `Options` record downstream.

use crate::config::{default_config_root, Options};
use crate::http::captcha::CaptchaMode;
use crate::targets;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "weiboloader", version, about = "Batch media downloader for the Weibo mobile site")]
pub struct Cli {
    /// User (`@name` or uid), supertopic (`#name#`), search keyword, or
    /// `mid:...`. One or more.
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Mobile-site host to talk to.
    #[arg(long, default_value = "https://m.weibo.cn")]
    pub host: String,

    /// Config/checkpoint root directory. Defaults to `~/.config/weiboloader`.
    #[arg(long)]
    pub config_root: Option<PathBuf>,

    /// Directory session files are read from/written to.
    #[arg(long)]
    pub session_dir: Option<PathBuf>,

    /// Raw `Cookie` header value, e.g. `SUB=xxx; SUBP=yyy`.
    #[arg(long)]
    pub cookie: Option<String>,

    /// File containing a raw cookie string.
    #[arg(long)]
    pub cookie_file: Option<PathBuf>,

    /// Explicit session file to load (overrides auto-discovery).
    #[arg(long)]
    pub sessionfile: Option<PathBuf>,

    /// Load cookies from an installed browser's cookie jar (e.g. `chrome`,
    /// `firefox`); unused if `--cookie`/`--cookie-file`/`--sessionfile` is set.
    #[arg(long)]
    pub load_cookies_browser: Option<String>,

    /// Proceed without a logged-in session, using anonymous visitor cookies.
    #[arg(long)]
    pub visitor_cookies: bool,

    /// Skip video media entirely.
    #[arg(long)]
    pub no_videos: bool,

    /// Skip picture media entirely.
    #[arg(long)]
    pub no_pictures: bool,

    /// Write one `{mid}.json` sidecar per post with the raw API payload.
    #[arg(long)]
    pub metadata_json: bool,

    /// Write one `{mid}.txt` sidecar per post using this template
    /// (`{mid}`, `{text}`, `{date}`).
    #[arg(long)]
    pub post_metadata_txt: Option<String>,

    /// Destination directory template.
    #[arg(long)]
    pub dirname_pattern: Option<String>,

    /// Destination filename template.
    #[arg(long)]
    pub filename_pattern: Option<String>,

    /// Stop after this many posts per target (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub count: usize,

    /// Stop a target's run as soon as a pre-existing file is encountered.
    #[arg(long)]
    pub fast_update: bool,

    /// Path to a `target_key -> timestamp` JSON map used to stop once a
    /// post's `created_at` falls at or before the recorded stamp.
    #[arg(long)]
    pub latest_stamps: Option<PathBuf>,

    /// Ignore any existing checkpoint and start from the first page.
    #[arg(long)]
    pub no_resume: bool,

    /// Override the default minimum spacing between requests, in seconds.
    #[arg(long)]
    pub request_interval: Option<f64>,

    /// CAPTCHA handling strategy: `auto`, `browser`, `manual`, `skip`.
    #[arg(long, default_value = "manual")]
    pub captcha_mode: String,

    /// Maximum concurrent media downloads.
    #[arg(long, default_value_t = 4)]
    pub max_workers: usize,
}

impl Cli {
    pub fn into_options(self) -> anyhow::Result<Options> {
        let config_root = self.config_root.unwrap_or_else(default_config_root);
        let session_dir = self.session_dir.unwrap_or_else(|| config_root.join("sessions"));
        let captcha_mode: CaptchaMode = self
            .captcha_mode
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid --captcha-mode `{}`", self.captcha_mode))?;

        Ok(Options {
            targets: self.targets.iter().map(|t| targets::parse(t)).collect(),
            host: self.host,
            config_root,
            session_dir,
            cookie: self.cookie,
            cookie_file: self.cookie_file,
            sessionfile: self.sessionfile,
            load_cookies_browser: self.load_cookies_browser,
            visitor_cookies: self.visitor_cookies,
            no_videos: self.no_videos,
            no_pictures: self.no_pictures,
            metadata_json: self.metadata_json,
            post_metadata_txt: self.post_metadata_txt,
            dirname_pattern: self.dirname_pattern,
            filename_pattern: self.filename_pattern,
            count: self.count,
            fast_update: self.fast_update,
            latest_stamps: self.latest_stamps,
            no_resume: self.no_resume,
            request_interval: self.request_interval,
            captcha_mode,
            max_workers: self.max_workers.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["weiboloader", "@someone"]);
        assert_eq!(cli.targets, vec!["@someone".to_string()]);
        assert_eq!(cli.max_workers, 4);
        assert_eq!(cli.captcha_mode, "manual");
    }

    #[test]
    fn rejects_unknown_captcha_mode() {
        let cli = Cli::parse_from(["weiboloader", "--captcha-mode", "bogus", "@someone"]);
        assert!(cli.into_options().is_err());
    }
}
