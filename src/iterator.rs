//! Paginated, resumable, non-restartable `Post` iterator.

use crate::model::{cst, CursorState, Post, CURSOR_STATE_VERSION};
use anyhow::Result;
use chrono::TimeZone;
use std::collections::HashSet;

/// A single fetched page: the ordered posts the server returned, plus
/// whatever the iterator needs to ask for the next one.
pub struct Page {
    pub posts: Vec<Post>,
    pub next_cursor: Option<String>,
}

/// The paginated fetch operation, decoupled from the HTTP/adapter plumbing
/// so the iterator's dedup/freeze/thaw logic can be tested without a
/// network.
pub trait PageSource {
    fn fetch_page(&mut self, cursor: Option<&str>, page: u32) -> Result<Page>;
}

/// Produces a finite, lazy sequence of `Post`, deduplicated by `mid`.
pub struct PaginatedIterator<S: PageSource> {
    source: S,
    page: u32,
    cursor: Option<String>,
    seen_mids: HashSet<String>,
    options_hash: String,
    last_timestamp: Option<chrono::DateTime<chrono::FixedOffset>>,
    finished: bool,
    buffer: std::collections::VecDeque<Post>,
}

impl<S: PageSource> PaginatedIterator<S> {
    pub fn new(source: S, options_hash: String) -> Self {
        Self {
            source,
            page: 1,
            cursor: None,
            seen_mids: HashSet::new(),
            options_hash,
            last_timestamp: None,
            finished: false,
            buffer: std::collections::VecDeque::new(),
        }
    }

    /// Restores cursor/page/seen_mids from a checkpoint. The caller is
    /// responsible for verifying the options hash before calling this (the
    /// checkpoint store already discards on mismatch; this is a
    /// defense-in-depth check).
    pub fn thaw(source: S, state: CursorState) -> Option<Self> {
        if state.options_hash.is_empty() {
            return None;
        }
        Some(Self {
            source,
            page: state.page,
            cursor: state.cursor,
            seen_mids: state.seen_mids.into_iter().collect(),
            options_hash: state.options_hash,
            last_timestamp: None,
            finished: false,
            buffer: std::collections::VecDeque::new(),
        })
    }

    /// Returns the current `CursorState` without mutating iterator
    /// position. Idempotent across repeated calls.
    pub fn freeze(&self) -> CursorState {
        let mut seen: Vec<String> = self.seen_mids.iter().cloned().collect();
        seen.sort();
        CursorState {
            version: CURSOR_STATE_VERSION,
            cursor: self.cursor.clone(),
            page: self.page,
            seen_mids: seen,
            options_hash: self.options_hash.clone(),
            timestamp: self
                .last_timestamp
                .unwrap_or_else(|| cst().with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    fn fill_buffer(&mut self) -> Result<()> {
        while self.buffer.is_empty() && !self.finished {
            let page = self.source.fetch_page(self.cursor.as_deref(), self.page)?;
            if page.posts.is_empty() && page.next_cursor.is_none() {
                self.finished = true;
                break;
            }

            let mut survivors = Vec::new();
            for post in page.posts {
                if self.seen_mids.insert(post.mid.clone()) {
                    survivors.push(post);
                }
            }

            match page.next_cursor {
                Some(next) => self.cursor = Some(next),
                None => self.page += 1,
            }

            if survivors.is_empty() && page.next_cursor.is_none() {
                // No next cursor and nothing new survived dedup: treat as end.
                self.finished = true;
            }

            for post in survivors {
                self.last_timestamp = Some(post.created_at);
                self.buffer.push_back(post);
            }
        }
        Ok(())
    }

    /// Pulls the next post, or `None` once the server signals no more
    /// pages: an empty page with no next cursor.
    pub fn next_post(&mut self) -> Result<Option<Post>> {
        self.fill_buffer()?;
        Ok(self.buffer.pop_front())
    }
}

/// Deterministic digest over the run options that would change which posts
/// are yielded. Grounded in the teacher's `content_hash` helper
/// (`src/utils/files.rs`), which also hashes an ordered byte stream with
/// `sha2`.
pub fn options_hash(parts: &[&str]) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cst;
    use chrono::TimeZone;

    struct FakeSource {
        pages: Vec<Page>,
        calls: usize,
    }

    fn post(mid: &str, day: u32) -> Post {
        Post {
            mid: mid.to_string(),
            bid: None,
            text: String::new(),
            created_at: cst().with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            user_nickname: None,
            user_uid: None,
            media_items: vec![],
            raw: serde_json::json!({}),
        }
    }
    impl PageSource for FakeSource {
        fn fetch_page(&mut self, _cursor: Option<&str>, _page: u32) -> Result<Page> {
            if self.calls >= self.pages.len() {
                return Ok(Page {
                    posts: vec![],
                    next_cursor: None,
                });
            }
            let idx = self.calls;
            self.calls += 1;
            let p = &self.pages[idx];
            Ok(Page {
                posts: p.posts.clone(),
                next_cursor: p.next_cursor.clone(),
            })
        }
    }

    #[test]
    fn dedups_across_pages_and_terminates() {
        let source = FakeSource {
            pages: vec![
                Page {
                    posts: vec![post("1", 1), post("2", 2)],
                    next_cursor: Some("c1".into()),
                },
                Page {
                    posts: vec![post("2", 2), post("3", 3)],
                    next_cursor: None,
                },
            ],
            calls: 0,
        };
        let mut iter = PaginatedIterator::new(source, options_hash(&["a"]));
        let mut mids = vec![];
        while let Some(p) = iter.next_post().unwrap() {
            mids.push(p.mid);
        }
        assert_eq!(mids, vec!["1", "2", "3"]);
    }

    #[test]
    fn freeze_is_idempotent() {
        let source = FakeSource {
            pages: vec![Page {
                posts: vec![post("1", 1)],
                next_cursor: Some("c1".into()),
            }],
            calls: 0,
        };
        let mut iter = PaginatedIterator::new(source, options_hash(&["a"]));
        iter.next_post().unwrap();
        let f1 = iter.freeze();
        let f2 = iter.freeze();
        assert_eq!(
            serde_json::to_string(&f1).unwrap(),
            serde_json::to_string(&f2).unwrap()
        );
    }

    #[test]
    fn thaw_resumes_tail() {
        let source = FakeSource {
            pages: vec![Page {
                posts: vec![post("1", 1), post("2", 2)],
                next_cursor: None,
            }],
            calls: 0,
        };
        let mut iter = PaginatedIterator::new(source, options_hash(&["a"]));
        let first = iter.next_post().unwrap().unwrap();
        assert_eq!(first.mid, "1");
        let state = iter.freeze();

        let source2 = FakeSource {
            pages: vec![Page {
                posts: vec![post("1", 1), post("2", 2)],
                next_cursor: None,
            }],
            calls: 0,
        };
        let mut resumed = PaginatedIterator::thaw(source2, state).unwrap();
        let next = resumed.next_post().unwrap().unwrap();
        assert_eq!(next.mid, "2");
        assert!(resumed.next_post().unwrap().is_none());
    }
}
