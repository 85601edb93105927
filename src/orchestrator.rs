//! The orchestrator: per-target workflow binding the iterator, checkpoint
//! store, rate-gated HTTP context, and bounded worker pool together, with
//! fault isolation and interrupt-safe shutdown.

use crate::adapter::{self, WeiboSource};
use crate::checkpoint::{load_stamps, save_stamps, CheckpointStore, TargetLock};
use crate::config::Options;
use crate::download::{DownloadOutcome, DownloadStatus, MediaDownloader};
use crate::events::{dispatch, Event, EventSink};
use crate::http::HttpContext;
use crate::iterator::PaginatedIterator;
use crate::model::{CstTime, MediaType, Post, Target};
use crate::naming::{NameContext, Namer};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-post deadline: `max(60, media_count * 30)` seconds.
const PER_MEDIA_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_POST_DEADLINE: Duration = Duration::from_secs(60);
/// Bounded tick for the completion polling loop.
const POLL_TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Clone, Copy)]
pub struct TargetStats {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Orchestrator {
    options: Options,
    ctx: Arc<HttpContext>,
    sink: Arc<dyn EventSink>,
    interrupted: Arc<AtomicBool>,
    pool: rayon::ThreadPool,
    checkpoint: CheckpointStore,
    namer: Box<dyn Namer>,
}

impl Orchestrator {
    pub fn new(
        options: Options,
        ctx: Arc<HttpContext>,
        sink: Arc<dyn EventSink>,
        interrupted: Arc<AtomicBool>,
        namer: Box<dyn Namer>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_workers.max(1))
            .build()
            .context("failed to build worker pool")?;
        let checkpoint = CheckpointStore::new(options.config_root.clone());
        checkpoint.ensure_root().context("failed to create config root")?;

        Ok(Self {
            options,
            ctx,
            sink,
            interrupted,
            pool,
            checkpoint,
            namer,
        })
    }

    /// Runs every target sequentially: a failure on one target is reported
    /// but does not abort the batch. Returns the process exit code.
    pub fn run(&self) -> i32 {
        let mut any_failed = false;
        let targets = self.options.targets.clone();

        for target in targets {
            if self.interrupted.load(Ordering::SeqCst) {
                dispatch(self.sink.as_ref(), Event::Interrupted { target_key: None });
                return 5;
            }

            match self.run_target(&target) {
                Ok(_) => {}
                Err(OrchestratorError::Interrupted) => {
                    return 5;
                }
                Err(OrchestratorError::Other(err)) => {
                    tracing::error!(target = ?target, %err, "target failed");
                    any_failed = true;
                }
            }
        }

        if any_failed {
            1
        } else {
            0
        }
    }

    fn run_target(&self, target: &Target) -> Result<TargetStats, OrchestratorError> {
        // Step 1: resolve target, bind target_key.
        let resolved = self.resolve(target).map_err(OrchestratorError::Other)?;
        let target_key = resolved.target_key();
        dispatch(
            self.sink.as_ref(),
            Event::TargetStart {
                target_key: target_key.clone(),
            },
        );

        // Step 2: acquire the target lock; contention fails this target.
        let _lock = TargetLock::acquire(self.checkpoint.root(), &target_key)
            .map_err(|e| OrchestratorError::Other(e.into()))?;

        let options_hash = self.options.options_hash(&resolved);

        // Step 3: thaw unless --no-resume.
        let source = WeiboSource::new(&self.ctx, container_path(&resolved));
        let mut iter = if self.options.no_resume {
            PaginatedIterator::new(source, options_hash)
        } else {
            match self.checkpoint.load(&target_key, &options_hash) {
                Some(state) => PaginatedIterator::thaw(source, state)
                    .unwrap_or_else(|| PaginatedIterator::new(WeiboSource::new(&self.ctx, container_path(&resolved)), options_hash.clone())),
                None => PaginatedIterator::new(source, options_hash.clone()),
            }
        };

        // Step 4: destination directory + filename template.
        let dest_dir = self.namer.dest_dir(&resolved);
        std::fs::create_dir_all(&dest_dir)
            .map_err(|e| OrchestratorError::Other(anyhow::anyhow!("failed to create {dest_dir:?}: {e}")))?;

        let stamps_path = self.options.latest_stamps.clone();
        let mut stamps = stamps_path
            .as_ref()
            .map(|p| load_stamps(p))
            .unwrap_or_default();
        let cutoff: Option<CstTime> = stamps.get(&target_key).copied();

        let mut stats = TargetStats::default();
        let mut newest: Option<CstTime> = None;
        let mut posts_processed = 0usize;
        let mut post_index = 0usize;

        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                self.flush(&iter, &target_key, &mut stamps, stamps_path.as_deref(), newest);
                dispatch(
                    self.sink.as_ref(),
                    Event::Interrupted {
                        target_key: Some(target_key.clone()),
                    },
                );
                return Err(OrchestratorError::Interrupted);
            }

            // `--count N`: stop after N posts (0 = unlimited).
            if self.options.count != 0 && posts_processed >= self.options.count {
                break;
            }

            let post = match iter.next_post() {
                Ok(Some(p)) => p,
                Ok(None) => break,
                Err(err) => return Err(OrchestratorError::Other(err)),
            };

            // Incremental cutoff (`--latest-stamps`).
            if let Some(cutoff) = cutoff {
                if post.created_at <= cutoff {
                    break;
                }
            }

            newest = Some(newest.map_or(post.created_at, |n| n.max(post.created_at)));

            let (post_stats, timed_out, hit_fast_update) =
                self.process_post(&resolved, &post, post_index, &dest_dir);

            stats.downloaded += post_stats.downloaded;
            stats.skipped += post_stats.skipped;
            stats.failed += post_stats.failed;

            dispatch(
                self.sink.as_ref(),
                Event::PostDone {
                    target_key: target_key.clone(),
                    post_index,
                    mid: post.mid.clone(),
                    timed_out,
                },
            );

            // Checkpoint advances only if the post was not truncated by a
            // post-level timeout.
            if !timed_out {
                let state = iter.freeze();
                let _ = self.checkpoint.save(&target_key, &state);
            }

            post_index += 1;
            posts_processed += 1;

            if self.options.metadata_json || self.options.post_metadata_txt.is_some() {
                self.write_metadata_sidecars(&post, &dest_dir);
            }

            if hit_fast_update {
                break;
            }
        }

        self.flush(&iter, &target_key, &mut stamps, stamps_path.as_deref(), newest);

        dispatch(
            self.sink.as_ref(),
            Event::TargetDone {
                target_key,
                downloaded: stats.downloaded,
                skipped: stats.skipped,
                failed: stats.failed,
            },
        );

        Ok(stats)
    }

    fn flush(
        &self,
        iter: &PaginatedIterator<WeiboSource<'_>>,
        target_key: &str,
        stamps: &mut crate::model::StampsMap,
        stamps_path: Option<&std::path::Path>,
        newest: Option<CstTime>,
    ) {
        let state = iter.freeze();
        let _ = self.checkpoint.save(target_key, &state);

        if let (Some(path), Some(newest)) = (stamps_path, newest) {
            let entry = stamps.entry(target_key.to_string()).or_insert(newest);
            if newest > *entry {
                *entry = newest;
            }
            let _ = save_stamps(path, stamps);
        }
    }

    /// Builds media jobs for one post, dispatches them to the worker pool,
    /// and waits on a bounded polling loop.
    fn process_post(
        &self,
        target: &Target,
        post: &Post,
        post_index: usize,
        dest_dir: &std::path::Path,
    ) -> (TargetStats, bool, bool) {
        let jobs: Vec<(usize, PathBuf, String)> = post
            .media_items
            .iter()
            .filter(|m| match m.media_type {
                MediaType::Picture => !self.options.no_pictures,
                MediaType::Video => !self.options.no_videos,
            })
            .enumerate()
            .map(|(i, m)| {
                let ctx = NameContext {
                    target,
                    post,
                    media_type: m.media_type,
                    index: m.index,
                };
                let name = self.namer.filename(&ctx);
                let ext = extension_from_url(&m.url).unwrap_or_else(|| default_extension(m.media_type).to_string());
                let suffix = if post.media_items.len() > 1 {
                    format!("_{}", m.index)
                } else {
                    String::new()
                };
                let filename = format!("{name}{suffix}.{ext}");
                (i, dest_dir.join(filename), m.url.clone())
            })
            .collect();

        let mut stats = TargetStats::default();
        if jobs.is_empty() {
            return (stats, false, false);
        }

        let media_total = jobs.len();
        let (tx, rx) = mpsc::channel::<(PathBuf, DownloadOutcome)>();

        for (_, dest, url) in &jobs {
            let dest = dest.clone();
            let url = url.clone();
            let tx = tx.clone();
            let ctx = Arc::clone(&self.ctx);
            self.pool.spawn(move || {
                let downloader = MediaDownloader::new(&ctx);
                let outcome = downloader.download(&url, &dest);
                let _ = tx.send((dest, outcome));
            });
        }
        drop(tx);

        let post_deadline =
            Instant::now() + MIN_POST_DEADLINE.max(PER_MEDIA_TIMEOUT * media_total as u32);
        let mut media_done = 0usize;
        let mut timed_out = false;
        let mut saw_preexisting_skip = false;

        while media_done < media_total {
            if self.interrupted.load(Ordering::SeqCst) {
                break;
            }
            if Instant::now() >= post_deadline {
                timed_out = true;
                break;
            }
            match rx.recv_timeout(POLL_TICK) {
                Ok((path, outcome)) => {
                    media_done += 1;
                    match outcome.status {
                        DownloadStatus::Downloaded => stats.downloaded += 1,
                        DownloadStatus::Skipped => {
                            stats.skipped += 1;
                            saw_preexisting_skip = true;
                        }
                        DownloadStatus::Failed => stats.failed += 1,
                    }
                    dispatch(
                        self.sink.as_ref(),
                        Event::MediaDone {
                            target_key: target.target_key(),
                            post_index,
                            filename: path.display().to_string(),
                            outcome: outcome.clone(),
                            media_done,
                            media_total,
                        },
                    );
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        if timed_out {
            let remaining = media_total - media_done;
            stats.failed += remaining;
            for _ in 0..remaining {
                media_done += 1;
                dispatch(
                    self.sink.as_ref(),
                    Event::MediaDone {
                        target_key: target.target_key(),
                        post_index,
                        filename: String::new(),
                        outcome: DownloadOutcome {
                            status: DownloadStatus::Failed,
                            path: PathBuf::new(),
                        },
                        media_done,
                        media_total,
                    },
                );
            }
        }

        // `--fast-update`: stop the target right after this post if any job
        // returned SKIPPED due to a pre-existing file.
        let hit_fast_update = self.options.fast_update && saw_preexisting_skip;

        (stats, timed_out, hit_fast_update)
    }

    fn write_metadata_sidecars(&self, post: &Post, dest_dir: &std::path::Path) {
        if self.options.metadata_json {
            let path = dest_dir.join(format!("{}.json", post.mid));
            if let Ok(json) = serde_json::to_vec_pretty(&post.raw) {
                let _ = std::fs::write(path, json);
            }
        }
        if let Some(template) = &self.options.post_metadata_txt {
            let path = dest_dir.join(format!("{}.txt", post.mid));
            let text = template
                .replace("{mid}", &post.mid)
                .replace("{text}", &post.text)
                .replace("{date}", &post.created_at.to_rfc3339());
            let _ = std::fs::write(path, text);
        }
    }

    fn resolve(&self, target: &Target) -> Result<Target> {
        match target {
            Target::User { uid: None, nickname: Some(name) } => {
                let uid = adapter::resolve_uid(&self.ctx, name)?;
                Ok(Target::User {
                    uid: Some(uid),
                    nickname: Some(name.clone()),
                })
            }
            other => Ok(other.clone()),
        }
    }
}

enum OrchestratorError {
    Interrupted,
    Other(anyhow::Error),
}

fn container_path(target: &Target) -> String {
    match target {
        Target::User { uid: Some(uid), .. } => {
            format!("/api/container/getIndex?type=uid&value={uid}&containerid=107603{uid}")
        }
        Target::SuperTopic { containerid: Some(c), .. } => {
            format!("/api/container/getIndex?containerid={c}")
        }
        Target::SuperTopic { name: Some(name), .. } => {
            format!("/api/container/getIndex?containerid=100808&extparam={}", urlencoding::encode(name))
        }
        Target::Search { keyword } => {
            format!("/api/container/getIndex?containerid=100103&openact=10&q={}", urlencoding::encode(keyword))
        }
        Target::Mid { mid } => format!("/detail/{mid}"),
        _ => "/api/container/getIndex".to_string(),
    }
}

fn default_extension(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Picture => "jpg",
        MediaType::Video => "mp4",
    }
}

fn extension_from_url(url: &str) -> Option<String> {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .rsplit('.')
        .next()
        .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_extension() {
        assert_eq!(extension_from_url("https://x/a.jpg?foo=bar"), Some("jpg".into()));
        assert_eq!(extension_from_url("https://x/a"), None);
    }

    #[test]
    fn container_path_for_user() {
        let t = Target::User {
            uid: Some("42".into()),
            nickname: None,
        };
        assert!(container_path(&t).contains("value=42"));
    }
}
