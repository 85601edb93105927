//! Raw-JSON -> record parsing for the Weibo API. Response shapes are
//! treated as opaque by the engine and delegated here; missing critical
//! fields surface as `ApiSchemaError`.

use crate::error::ApiSchemaError;
use crate::http::{HttpContext, RequestOptions};
use crate::iterator::{Page, PageSource};
use crate::model::{cst, MediaItem, MediaType, Post};
use crate::rate::Bucket;
use chrono::TimeZone;
use serde_json::Value;

/// Picks the video URL by priority:
/// `stream_url_hd > mp4_720p_mp4 > mp4_hd_url > stream_url`.
fn pick_video_url(media: &Value) -> Option<String> {
    for key in ["stream_url_hd", "mp4_720p_mp4", "mp4_hd_url", "stream_url"] {
        if let Some(url) = media.get(key).and_then(Value::as_str) {
            if !url.is_empty() {
                return Some(url.to_string());
            }
        }
    }
    None
}

/// Parses one post's `pic_ids`/`pics`/`page_info` shape into ordered
/// `MediaItem`s.
fn parse_media_items(raw: &Value) -> Vec<MediaItem> {
    let mut items = Vec::new();
    let mut index = 0usize;

    if let Some(pics) = raw.get("pics").and_then(Value::as_array) {
        for pic in pics {
            if let Some(url) = pic
                .get("large")
                .and_then(|l| l.get("url"))
                .and_then(Value::as_str)
            {
                items.push(MediaItem {
                    media_type: MediaType::Picture,
                    url: url.to_string(),
                    index,
                    filename_hint: None,
                });
                index += 1;
            }
        }
    }

    if let Some(page_info) = raw.get("page_info") {
        if page_info.get("type").and_then(Value::as_str) == Some("video") {
            if let Some(media_info) = page_info.get("media_info") {
                if let Some(url) = pick_video_url(media_info) {
                    items.push(MediaItem {
                        media_type: MediaType::Video,
                        url,
                        index,
                        filename_hint: None,
                    });
                }
            }
        }
    }

    items
}

/// Weibo's `created_at` is e.g. `"Mon Jan 01 00:00:00 +0800 2024"`.
fn parse_created_at(raw: &Value) -> Result<chrono::DateTime<chrono::FixedOffset>, ApiSchemaError> {
    let s = raw
        .get("created_at")
        .and_then(Value::as_str)
        .ok_or(ApiSchemaError {
            field: "created_at",
            context: "post".to_string(),
        })?;
    chrono::DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y")
        .map(|dt| dt.with_timezone(&cst()))
        .map_err(|_| ApiSchemaError {
            field: "created_at",
            context: format!("unparseable timestamp `{s}`"),
        })
}

/// Converts one raw post object into a `Post`. Missing `mid` is a
/// critical-field failure; other fields fall back defensively.
pub fn parse_post(raw: Value) -> Result<Post, ApiSchemaError> {
    let mid = raw
        .get("id")
        .map(|v| match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        })
        .filter(|s| !s.is_empty())
        .ok_or(ApiSchemaError {
            field: "id",
            context: "post".to_string(),
        })?;

    let bid = raw.get("bid").and_then(Value::as_str).map(str::to_string);
    let text = raw
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let created_at = parse_created_at(&raw)?;
    let user = raw.get("user");
    let user_nickname = user
        .and_then(|u| u.get("screen_name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let user_uid = user
        .and_then(|u| u.get("id"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        })
        .filter(|s| !s.is_empty());
    let media_items = parse_media_items(&raw);

    Ok(Post {
        mid,
        bid,
        text,
        created_at,
        user_nickname,
        user_uid,
        media_items,
        raw,
    })
}

/// Parses one container-fetch response page into an ordered list of `Post`
/// plus the next-page signal.
pub fn parse_page(body: &Value) -> Result<Page, ApiSchemaError> {
    let cards = body
        .get("data")
        .and_then(|d| d.get("cards"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut posts = Vec::new();
    for card in cards {
        if let Some(mblog) = card.get("mblog") {
            posts.push(parse_post(mblog.clone())?);
        }
    }

    let next_cursor = body
        .get("data")
        .and_then(|d| d.get("cardlistInfo"))
        .and_then(|c| c.get("since_id"))
        .and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.as_i64() != Some(0) => Some(n.to_string()),
            _ => None,
        });

    Ok(Page { posts, next_cursor })
}

/// Resolves a nickname to a uid via the redirect rule.
pub fn resolve_uid(ctx: &HttpContext, nickname: &str) -> anyhow::Result<String> {
    let response = ctx.request(
        reqwest::Method::GET,
        &format!("/n/{}", urlencoding::encode(nickname)),
        RequestOptions {
            bucket: Bucket::Api,
            allow_captcha: true,
            retries: 2,
            connect_timeout: std::time::Duration::from_secs(15),
            read_timeout: std::time::Duration::from_secs(20),
        },
    )?;
    let final_url = response.url().clone();
    final_url
        .path_segments()
        .and_then(|mut segs| segs.find(|s| s.chars().all(|c| c.is_ascii_digit())))
        .map(str::to_string)
        .ok_or_else(|| {
            anyhow::anyhow!(ApiSchemaError {
                field: "uid",
                context: format!("could not resolve nickname `{nickname}` via redirect"),
            })
        })
}

/// A `PageSource` backed by the live HTTP context. Each target kind maps
/// to a distinct "paginated container fetch" endpoint; the exact container
/// ids are resolved once at target-resolution time and carried here.
pub struct WeiboSource<'a> {
    ctx: &'a HttpContext,
    container_path: String,
}

impl<'a> WeiboSource<'a> {
    pub fn new(ctx: &'a HttpContext, container_path: String) -> Self {
        Self { ctx, container_path }
    }
}

impl<'a> PageSource for WeiboSource<'a> {
    fn fetch_page(&mut self, cursor: Option<&str>, page: u32) -> anyhow::Result<Page> {
        let mut path = self.container_path.clone();
        let sep = if path.contains('?') { '&' } else { '?' };
        match cursor {
            Some(c) => path.push_str(&format!("{sep}since_id={c}")),
            None => path.push_str(&format!("{sep}page={page}")),
        }

        let response = self.ctx.request(
            reqwest::Method::GET,
            &path,
            RequestOptions::api_default(),
        )?;
        let body: Value = response.json()?;
        Ok(parse_page(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_picture_post() {
        let raw = serde_json::json!({
            "id": 123,
            "text": "hi",
            "created_at": "Mon Jan 01 00:00:00 +0800 2024",
            "user": {"id": 9, "screen_name": "tester"},
            "pics": [{"large": {"url": "https://x/1.jpg"}}],
        });
        let post = parse_post(raw).unwrap();
        assert_eq!(post.mid, "123");
        assert_eq!(post.media_items.len(), 1);
        assert_eq!(post.media_items[0].media_type as u8, MediaType::Picture as u8);
    }

    #[test]
    fn missing_id_is_schema_error() {
        let raw = serde_json::json!({"text": "hi"});
        assert!(parse_post(raw).is_err());
    }

    #[test]
    fn video_priority_picks_hd_stream() {
        let media = serde_json::json!({
            "stream_url": "low",
            "stream_url_hd": "hd",
            "mp4_hd_url": "mp4hd",
        });
        assert_eq!(pick_video_url(&media), Some("hd".to_string()));
    }
}
