//! HTTP context: cookie jar, session persistence, rate-controller
//! integration, CAPTCHA detection and routing, and a streaming request
//! helper with a per-request wall-clock deadline.
//!
//! Grounded in the teacher's `PHClient` (`src/api/client.rs`): a thin wrapper
//! around a `reqwest::blocking::Client` with a `create_request`/`send_request`
//! split and a typed error.

pub mod captcha;
pub mod login;

pub use login::{verify_login, LoginStatus};

use crate::error::HttpError;
use crate::events::EventSink;
use crate::rate::{Bucket, RateControl};
use captcha::{handle_captcha, is_captcha_response, CaptchaHandler, CaptchaMode};
use cookie_store::CookieStore;
use reqwest::blocking::{Client, Response};
use reqwest::Method;
use reqwest_cookie_store::CookieStoreMutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// `Request`'s per-call knobs.
pub struct RequestOptions {
    pub bucket: Bucket,
    pub allow_captcha: bool,
    pub retries: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

pub const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(60);

impl RequestOptions {
    pub fn api_default() -> Self {
        Self {
            bucket: Bucket::Api,
            allow_captcha: true,
            retries: 3,
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
        }
    }

    /// Media calls pass `allow_captcha=false` to avoid recursion.
    pub fn media_default() -> Self {
        Self {
            bucket: Bucket::Media,
            allow_captcha: false,
            retries: 2,
            connect_timeout: Duration::from_secs(15),
            read_timeout: STREAM_READ_TIMEOUT,
        }
    }
}

pub struct HttpContext {
    client: Client,
    cookie_store: Arc<CookieStoreMutex>,
    base_url: reqwest::Url,
    rate: Arc<dyn RateControl>,
    captcha_mode: CaptchaMode,
    captcha_handler: Arc<dyn CaptchaHandler>,
    sink: Arc<dyn EventSink>,
}

impl HttpContext {
    /// Builds the persistent client. Connection pool sized `>= max_workers`.
    pub fn new(
        base_url: &str,
        max_workers: usize,
        rate: Arc<dyn RateControl>,
        captcha_mode: CaptchaMode,
        captcha_handler: Arc<dyn CaptchaHandler>,
        sink: Arc<dyn EventSink>,
    ) -> anyhow::Result<Self> {
        let cookie_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookie_store.clone())
            .pool_max_idle_per_host(max_workers.max(1))
            .user_agent("Mozilla/5.0 (compatible; weiboloader)")
            .build()?;

        Ok(Self {
            client,
            cookie_store,
            base_url: reqwest::Url::parse(base_url)?,
            rate,
            captcha_mode,
            captcha_handler,
            sink,
        })
    }

    /// Explicit cookie string, e.g. `SUB=xxx; SUBP=yyy`. Routed through the
    /// same `Set-Cookie` ingestion path reqwest itself uses for response
    /// headers, via the `reqwest::cookie::CookieStore` trait
    /// `CookieStoreMutex` implements.
    pub fn install_cookie_string(&self, raw: &str) -> anyhow::Result<()> {
        use reqwest::cookie::CookieStore as _;
        use reqwest::header::HeaderValue;

        let headers: Vec<HeaderValue> = raw
            .split(';')
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .filter_map(|p| HeaderValue::from_str(p).ok())
            .collect();
        let mut iter = headers.iter();
        self.cookie_store.set_cookies(&mut iter, &self.base_url);
        Ok(())
    }

    /// Loads the most-recently-modified `session_{uid}.dat` under
    /// `session_dir`, or an explicit path.
    pub fn load_session(&self, path: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::open(path)?;
        let mut store = self.cookie_store.lock().unwrap();
        *store = CookieStore::load_json(std::io::BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("failed to parse session file: {e}"))?;
        Ok(())
    }

    pub fn find_latest_session(session_dir: &Path) -> Option<PathBuf> {
        let entries = std::fs::read_dir(session_dir).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("session_")
            })
            .filter_map(|e| {
                let modified = e.metadata().ok()?.modified().ok()?;
                Some((modified, e.path()))
            })
            .max_by_key(|(m, _)| *m)
            .map(|(_, path)| path)
    }

    /// Saved only when login is verified true; atomic write, matching the
    /// checkpoint/stamps pattern.
    pub fn save_session(&self, session_dir: &Path, uid: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(session_dir)?;
        let path = session_dir.join(format!("session_{uid}.dat"));
        let tmp = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            let store = self.cookie_store.lock().unwrap();
            store
                .save_json(&mut file)
                .map_err(|e| anyhow::anyhow!("failed to serialize session: {e}"))?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// The request pipeline: `WaitBefore(bucket) -> send -> Observe(bucket,
    /// status)`, with CAPTCHA routing gated by `allow_captcha`, and bounded
    /// retry on network or retryable-status errors.
    pub fn request(&self, method: Method, path: &str, opts: RequestOptions) -> Result<Response, HttpError> {
        let url = self.build_url(path);
        let mut attempt = 0;
        loop {
            self.rate.wait_before(opts.bucket);

            let result = self
                .client
                .request(method.clone(), url.clone())
                .timeout(opts.read_timeout)
                .connect_timeout(opts.connect_timeout)
                .send();

            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    self.rate.observe(opts.bucket, status);

                    if is_captcha_response(status, response.url().as_str()) {
                        if opts.allow_captcha {
                            let redirect = response.url().to_string();
                            if handle_captcha(
                                self.captcha_mode,
                                self.captcha_handler.as_ref(),
                                &redirect,
                                self.sink.as_ref(),
                            )
                            .is_ok()
                                && attempt == 0
                            {
                                attempt += 1;
                                continue;
                            }
                        }
                        return Err(HttpError::Captcha);
                    }

                    if response.status().is_success() {
                        return Ok(response);
                    }

                    if is_retryable(status) && attempt < opts.retries {
                        attempt += 1;
                        continue;
                    }

                    let url_str = response.url().to_string();
                    let body = response.text().unwrap_or_default();
                    return Err(HttpError::Status {
                        status,
                        url: url_str,
                        body,
                    });
                }
                Err(err) => {
                    if attempt < opts.retries {
                        attempt += 1;
                        continue;
                    }
                    return Err(HttpError::Request(err));
                }
            }
        }
    }

    /// Streaming GET used by the media downloader: no captcha routing
    /// (recursion guard), bucket=media.
    pub fn stream_get(&self, url: &str, deadline: std::time::Instant) -> Result<Response, HttpError> {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        let timeout = remaining.min(STREAM_READ_TIMEOUT).max(Duration::from_millis(1));
        self.request(
            Method::GET,
            url,
            RequestOptions {
                bucket: Bucket::Media,
                allow_captcha: false,
                retries: 2,
                connect_timeout: Duration::from_secs(15),
                read_timeout: timeout,
            },
        )
    }

    fn build_url(&self, path: &str) -> reqwest::Url {
        if path.starts_with("http://") || path.starts_with("https://") {
            reqwest::Url::parse(path).expect("absolute URL is valid")
        } else {
            self.base_url
                .join(path)
                .unwrap_or_else(|err| panic!("failed to build URL for path {path}: {err}"))
        }
    }
}

fn is_retryable(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(503));
        assert!(!is_retryable(404));
    }
}
