//! Event bus contract.
//!
//! A sink never throws into the core: every emission is wrapped so a panicking
//! or erroring sink cannot break the engine. A null sink is always acceptable.

use crate::download::DownloadOutcome;

#[derive(Debug, Clone)]
pub enum Event {
    Stage {
        target_key: String,
        stage: &'static str,
    },
    TargetStart {
        target_key: String,
    },
    MediaDone {
        target_key: String,
        post_index: usize,
        filename: String,
        outcome: DownloadOutcome,
        media_done: usize,
        media_total: usize,
    },
    PostDone {
        target_key: String,
        post_index: usize,
        mid: String,
        timed_out: bool,
    },
    TargetDone {
        target_key: String,
        downloaded: usize,
        skipped: usize,
        failed: usize,
    },
    Interrupted {
        target_key: Option<String>,
    },
    LoginStatus {
        verified: bool,
        uid: Option<String>,
    },
}

/// The event sink trait. Implementors MUST NOT panic; the dispatch helper
/// below also catches unwinds defensively so a buggy sink can never take
/// the engine down with it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);

    /// Called by the CAPTCHA handler to suspend/resume any terminal
    /// progress renderer while a human solves a challenge.
    fn pause(&self) {}
    fn resume(&self) {}
}

/// Dispatches to a sink, swallowing panics so a misbehaving sink can never
/// propagate into the core.
pub fn dispatch(sink: &dyn EventSink, event: Event) {
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.emit(event)));
}

/// Always-acceptable no-op sink.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: Event) {}
}

/// Logs every event at `info`/`debug` via `tracing`, the way the teacher logs
/// command lifecycle events (`src/login.rs`, `src/commands/mod.rs`).
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Stage { target_key, stage } => {
                tracing::debug!(target_key, stage, "stage");
            }
            Event::TargetStart { target_key } => {
                tracing::info!(target_key, "target start");
            }
            Event::MediaDone {
                target_key,
                post_index,
                filename,
                outcome,
                media_done,
                media_total,
            } => {
                tracing::debug!(
                    target_key,
                    post_index,
                    filename,
                    ?outcome,
                    media_done,
                    media_total,
                    "media done"
                );
            }
            Event::PostDone {
                target_key,
                post_index,
                mid,
                timed_out,
            } => {
                tracing::debug!(target_key, post_index, mid, timed_out, "post done");
            }
            Event::TargetDone {
                target_key,
                downloaded,
                skipped,
                failed,
            } => {
                tracing::info!(
                    target_key,
                    downloaded,
                    skipped,
                    failed,
                    "target done"
                );
            }
            Event::Interrupted { target_key } => {
                tracing::warn!(?target_key, "interrupted");
            }
            Event::LoginStatus { verified, uid } => {
                tracing::info!(verified, ?uid, "login status");
            }
        }
    }
}
