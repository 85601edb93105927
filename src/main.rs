use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weiboloader::cli::Cli;
use weiboloader::config::Options;
use weiboloader::events::{dispatch, Event, EventSink, TracingEventSink};
use weiboloader::http::captcha::{CaptchaHandler, CaptchaMode, ManualHandler, SkipHandler};
use weiboloader::http::{verify_login, HttpContext, LoginStatus};
use weiboloader::naming::DefaultNamer;
use weiboloader::orchestrator::Orchestrator;
use weiboloader::rate::{BucketParams, RateControl, RateController};

fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let cli = Cli::parse();
    let options = match cli.into_options() {
        Ok(o) => o,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            std::process::exit(2);
        }
    };

    let exit_code = run(options);
    std::process::exit(exit_code);
}

/// Wires the interrupt flag, rate controller, HTTP context, and session
/// bootstrap, then hands the resolved engine off to the orchestrator.
fn run(options: Options) -> i32 {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!(%err, "failed to install interrupt handler");
        }
    }

    let mut api_params = BucketParams::api_default();
    let mut media_params = BucketParams::media_default();
    if let Some(interval) = options.request_interval {
        let interval = std::time::Duration::from_secs_f64(interval.max(0.0));
        api_params.request_interval = interval;
        media_params.request_interval = interval;
    }
    let rate: Arc<dyn RateControl> =
        Arc::new(RateController::new(api_params, media_params, interrupted.clone()));

    let captcha_handler: Arc<dyn CaptchaHandler> = match options.captcha_mode {
        CaptchaMode::Skip => Arc::new(SkipHandler),
        CaptchaMode::Manual => Arc::new(ManualHandler),
        CaptchaMode::Auto | CaptchaMode::Browser => {
            tracing::warn!("no browser-automation backend wired in; falling back to manual captcha resolution");
            Arc::new(ManualHandler)
        }
    };

    let sink: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    let ctx = match HttpContext::new(
        &options.host,
        options.max_workers,
        rate,
        options.captcha_mode,
        captcha_handler,
        sink.clone(),
    ) {
        Ok(ctx) => Arc::new(ctx),
        Err(err) => {
            tracing::error!(%err, "failed to initialize http context");
            return 2;
        }
    };

    if let Err(err) = bootstrap_session(&ctx, &options) {
        tracing::error!(%err, "authentication failed");
        return 3;
    }

    let namer = Box::new(DefaultNamer::new(
        options.dirname_pattern.clone(),
        options.filename_pattern.clone(),
    ));

    let orchestrator = match Orchestrator::new(options, ctx, sink, interrupted, namer) {
        Ok(o) => o,
        Err(err) => {
            tracing::error!(%err, "failed to initialize engine");
            return 2;
        }
    };

    orchestrator.run()
}

/// Installs cookies from the configured source, verifies login, and
/// persists a fresh session file when verification succeeds. Returns an
/// error only when no credential source at all is configured and
/// `--visitor-cookies` was not requested.
fn bootstrap_session(ctx: &HttpContext, options: &Options) -> anyhow::Result<()> {
    let mut installed = false;

    if let Some(cookie) = &options.cookie {
        ctx.install_cookie_string(cookie)?;
        installed = true;
    } else if let Some(path) = &options.cookie_file {
        let raw = std::fs::read_to_string(path)?;
        ctx.install_cookie_string(raw.trim())?;
        installed = true;
    } else if let Some(path) = &options.sessionfile {
        ctx.load_session(path)?;
        installed = true;
    } else if options.load_cookies_browser.is_some() {
        tracing::warn!("--load-cookies-browser has no backend wired in; proceeding without it");
    } else if let Some(path) = HttpContext::find_latest_session(&options.session_dir) {
        ctx.load_session(&path)?;
        installed = true;
    }

    if !installed && !options.visitor_cookies {
        anyhow::bail!("no credential source configured; pass --cookie, --cookie-file, --sessionfile, or --visitor-cookies");
    }

    let status = verify_login(ctx);
    match &status {
        LoginStatus::Verified(uid) => {
            dispatch(
                &TracingEventSink,
                Event::LoginStatus {
                    verified: true,
                    uid: Some(uid.clone()),
                },
            );
            let _ = ctx.save_session(&options.session_dir, uid);
        }
        LoginStatus::NotLoggedIn => {
            dispatch(
                &TracingEventSink,
                Event::LoginStatus {
                    verified: false,
                    uid: None,
                },
            );
        }
        LoginStatus::Unknown => {
            tracing::debug!("login status could not be determined; proceeding");
        }
    }

    Ok(())
}
