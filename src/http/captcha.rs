//! CAPTCHA detection and routing.
//!
//! Solving back-ends themselves are out of scope; this module defines the
//! dispatch contract and the timeout/pause-resume plumbing around them,
//! grounded in the teacher's pattern of small capability traits dispatched
//! by a tagged mode (`utils/auth.rs`'s `CredentialProvider`).

use crate::events::{dispatch, EventSink};
use std::time::Duration;

/// `--captcha-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaMode {
    Auto,
    Browser,
    Manual,
    Skip,
}

impl std::str::FromStr for CaptchaMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(CaptchaMode::Auto),
            "browser" => Ok(CaptchaMode::Browser),
            "manual" => Ok(CaptchaMode::Manual),
            "skip" => Ok(CaptchaMode::Skip),
            other => Err(format!("unknown captcha mode: {other}")),
        }
    }
}

/// Default handler timeout: 300 s.
pub const CAPTCHA_HANDLER_TIMEOUT: Duration = Duration::from_secs(300);

/// A CAPTCHA solving backend. Implementors perform whatever out-of-band
/// interaction (opening a browser, prompting the terminal) is needed and
/// return once the challenge is believed resolved, or once their own
/// internal timeout elapses.
pub trait CaptchaHandler: Send + Sync {
    /// Attempts to resolve the challenge at `redirect_url`. Returns `Ok(())`
    /// if the caller should retry the original request once.
    fn resolve(&self, redirect_url: &str) -> anyhow::Result<()>;
}

/// `--captcha-mode=skip`: never attempts resolution.
pub struct SkipHandler;
impl CaptchaHandler for SkipHandler {
    fn resolve(&self, _redirect_url: &str) -> anyhow::Result<()> {
        anyhow::bail!("captcha mode is `skip`; refusing to solve")
    }
}

/// `--captcha-mode=manual`: the operator solves the CAPTCHA out of band
/// (e.g. in their own browser) and presses enter on stdin; a real terminal
/// UI is out of scope.
pub struct ManualHandler;
impl CaptchaHandler for ManualHandler {
    fn resolve(&self, redirect_url: &str) -> anyhow::Result<()> {
        tracing::warn!(redirect_url, "manual captcha resolution required");
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| anyhow::anyhow!("failed to read stdin: {e}"))?;
        Ok(())
    }
}

/// `--captcha-mode=browser`: delegates to an injected browser-automation
/// backend. The backend itself is an external collaborator; this type just
/// supplies the timeout and pause/resume framing around it.
pub struct BrowserHandler<F> {
    solve: F,
}

impl<F> BrowserHandler<F>
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(solve: F) -> Self {
        Self { solve }
    }
}

impl<F> CaptchaHandler for BrowserHandler<F>
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    fn resolve(&self, redirect_url: &str) -> anyhow::Result<()> {
        (self.solve)(redirect_url)
    }
}

/// Dispatches to the configured handler for `mode`, pausing/resuming any
/// progress renderer via the event bus, and bounding total time to
/// `CAPTCHA_HANDLER_TIMEOUT`. A timeout aborts the current target only.
pub fn handle_captcha(
    mode: CaptchaMode,
    handler: &dyn CaptchaHandler,
    redirect_url: &str,
    sink: &dyn EventSink,
) -> anyhow::Result<()> {
    if mode == CaptchaMode::Skip {
        anyhow::bail!("captcha encountered, mode=skip");
    }

    sink.pause();
    let (tx, rx) = std::sync::mpsc::channel();
    let redirect_url = redirect_url.to_string();
    let handler_ptr: *const (dyn CaptchaHandler + Sync) = handler as *const _;
    // SAFETY: the spawned thread is joined (via recv_timeout + join below)
    // before this function returns, and `handler` outlives that join.
    let handler_send = SendPtr(handler_ptr);
    let join = std::thread::spawn(move || {
        let handler: &dyn CaptchaHandler = unsafe { &*handler_send.0 };
        let result = handler.resolve(&redirect_url);
        let _ = tx.send(result);
    });

    let result = rx.recv_timeout(CAPTCHA_HANDLER_TIMEOUT);
    sink.resume();

    match result {
        Ok(inner) => {
            let _ = join.join();
            inner
        }
        Err(_) => {
            dispatch(
                sink,
                crate::events::Event::Stage {
                    target_key: String::new(),
                    stage: "captcha_timeout",
                },
            );
            anyhow::bail!("captcha handler timed out after {:?}", CAPTCHA_HANDLER_TIMEOUT)
        }
    }
}

struct SendPtr(*const (dyn CaptchaHandler + Sync));
unsafe impl Send for SendPtr {}

/// Detects an HTTP 418 or a redirect whose URL matches the verification
/// pattern.
pub fn is_captcha_response(status: u16, final_url: &str) -> bool {
    if status == 418 {
        return true;
    }
    captcha_redirect_pattern().is_match(final_url)
}

fn captcha_redirect_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"(?i)(verify|captcha)").expect("valid regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_418() {
        assert!(is_captcha_response(418, "https://m.weibo.cn/x"));
    }

    #[test]
    fn detects_verification_redirect() {
        assert!(is_captcha_response(200, "https://passport.weibo.cn/verify/sms"));
    }

    #[test]
    fn ignores_ordinary_redirect() {
        assert!(!is_captcha_response(200, "https://m.weibo.cn/u/123"));
    }

    #[test]
    fn skip_mode_never_resolves() {
        let err = handle_captcha(CaptchaMode::Skip, &SkipHandler, "https://x", &crate::events::NullEventSink);
        assert!(err.is_err());
    }
}
