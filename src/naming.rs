//! Destination naming. Filename/directory template expansion is treated as
//! a swappable collaborator: a concrete default implementation ships here
//! behind the `Namer` trait. Callers may swap in their own.

use crate::model::{MediaType, Post, Target};
use std::path::PathBuf;

pub struct NameContext<'a> {
    pub target: &'a Target,
    pub post: &'a Post,
    pub media_type: MediaType,
    pub index: usize,
}

pub trait Namer: Send + Sync {
    fn dest_dir(&self, target: &Target) -> PathBuf;
    fn filename(&self, ctx: &NameContext) -> String;
}

pub struct DefaultNamer {
    pub dirname_pattern: Option<String>,
    pub filename_pattern: Option<String>,
}

impl DefaultNamer {
    pub fn new(dirname_pattern: Option<String>, filename_pattern: Option<String>) -> Self {
        Self {
            dirname_pattern,
            filename_pattern,
        }
    }
}

impl Namer for DefaultNamer {
    /// Directory defaults: `./{nickname}/` for user, `./topic/{topic_name}/`
    /// for supertopic, `./search/{keyword}/` for search.
    fn dest_dir(&self, target: &Target) -> PathBuf {
        if let Some(pattern) = &self.dirname_pattern {
            return PathBuf::from(expand_target_vars(pattern, target));
        }
        match target {
            Target::User { nickname, uid } => {
                PathBuf::from(sanitize(nickname.as_deref().or(uid.as_deref()).unwrap_or("user")))
            }
            Target::SuperTopic { name, containerid } => PathBuf::from("topic").join(sanitize(
                name.as_deref().or(containerid.as_deref()).unwrap_or("topic"),
            )),
            Target::Search { keyword } => PathBuf::from("search").join(sanitize(keyword)),
            Target::Mid { mid } => PathBuf::from(sanitize(mid)),
        }
    }

    /// Filename default: `{date}_{name}`. Variables: `nickname, uid, mid,
    /// bid, date[:FORMAT], index[:PAD], text, type, name, topic_name,
    /// keyword`.
    fn filename(&self, ctx: &NameContext) -> String {
        let pattern = self
            .filename_pattern
            .clone()
            .unwrap_or_else(|| "{date}_{name}".to_string());
        let expanded = expand_filename_vars(&pattern, ctx);
        if expanded.is_empty() {
            sanitize(&ctx.post.mid)
        } else {
            expanded
        }
    }
}

/// Strips `\/:*?"<>|` from every substituted value. Idempotent: running it
/// twice yields the same result.
pub fn sanitize(input: &str) -> String {
    input.chars().filter(|c| !"\\/:*?\"<>|".contains(*c)).collect()
}

fn truncate_text(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn expand_target_vars(pattern: &str, target: &Target) -> String {
    let mut out = pattern.to_string();
    match target {
        Target::User { nickname, uid } => {
            out = out.replace("{nickname}", &sanitize(nickname.as_deref().unwrap_or("")));
            out = out.replace("{uid}", &sanitize(uid.as_deref().unwrap_or("")));
        }
        Target::SuperTopic { name, containerid } => {
            out = out.replace("{topic_name}", &sanitize(name.as_deref().unwrap_or("")));
            out = out.replace("{containerid}", &sanitize(containerid.as_deref().unwrap_or("")));
        }
        Target::Search { keyword } => {
            out = out.replace("{keyword}", &sanitize(keyword));
        }
        Target::Mid { mid } => {
            out = out.replace("{mid}", &sanitize(mid));
        }
    }
    out
}

/// Expands `{var}` and `{var:SPEC}` tokens (date format, index padding).
fn expand_filename_vars(pattern: &str, ctx: &NameContext) -> String {
    let re = token_regex();
    let post = ctx.post;
    re.replace_all(pattern, |caps: &regex::Captures| {
        let var = &caps[1];
        let spec = caps.get(2).map(|m| m.as_str());
        match var {
            "nickname" => sanitize(post.user_nickname.as_deref().unwrap_or("")),
            "uid" => sanitize(post.user_uid.as_deref().unwrap_or("")),
            "mid" => sanitize(&post.mid),
            "bid" => sanitize(post.bid.as_deref().unwrap_or("")),
            "date" => {
                let fmt = spec.unwrap_or("%Y-%m-%d");
                post.created_at.format(fmt).to_string()
            }
            "index" => {
                let pad: usize = spec.and_then(|s| s.parse().ok()).unwrap_or(2);
                format!("{:0width$}", ctx.index, width = pad)
            }
            "text" => sanitize(&truncate_text(&post.text, 50)),
            "type" => ctx.media_type.as_str().to_string(),
            "name" => sanitize(post.user_nickname.as_deref().unwrap_or(&post.mid)),
            "topic_name" => match ctx.target {
                Target::SuperTopic { name, .. } => sanitize(name.as_deref().unwrap_or("")),
                _ => String::new(),
            },
            "keyword" => match ctx.target {
                Target::Search { keyword } => sanitize(keyword),
                _ => String::new(),
            },
            _ => String::new(),
        }
    })
    .to_string()
}

fn token_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\{(\w+)(?::([^}]+))?\}").expect("valid regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cst;
    use chrono::TimeZone;

    fn post() -> Post {
        Post {
            mid: "123456".into(),
            bid: Some("abc".into()),
            text: "hello world".into(),
            created_at: cst().with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap(),
            user_nickname: Some("Some/User*Name".into()),
            user_uid: Some("9".into()),
            media_items: vec![],
            raw: serde_json::json!({}),
        }
    }

    #[test]
    fn sanitize_strips_forbidden_chars_and_is_idempotent() {
        let s1 = sanitize("a/b:c*d?e\"f<g>h|i");
        assert_eq!(s1, "abcdefghi");
        assert_eq!(sanitize(&s1), s1);
    }

    #[test]
    fn sanitize_falls_back_handled_by_caller_when_empty() {
        assert_eq!(sanitize("/:*?\"<>|"), "");
    }

    #[test]
    fn default_filename_uses_date_and_name() {
        let namer = DefaultNamer::new(None, None);
        let p = post();
        let target = Target::User {
            uid: Some("9".into()),
            nickname: Some("Some/User*Name".into()),
        };
        let ctx = NameContext {
            target: &target,
            post: &p,
            media_type: MediaType::Picture,
            index: 0,
        };
        let name = namer.filename(&ctx);
        assert_eq!(name, "2024-03-04_SomeUserName");
    }

    #[test]
    fn index_padding_and_text_truncation() {
        let namer = DefaultNamer::new(None, Some("{index:3}_{type}_{text}".into()));
        let p = post();
        let target = Target::User { uid: None, nickname: None };
        let ctx = NameContext {
            target: &target,
            post: &p,
            media_type: MediaType::Video,
            index: 7,
        };
        let name = namer.filename(&ctx);
        assert_eq!(name, "007_video_hello world");
    }

    #[test]
    fn empty_after_sanitization_falls_back_to_mid() {
        let namer = DefaultNamer::new(None, Some("{nickname}".into()));
        let mut p = post();
        p.user_nickname = Some("***".into());
        let target = Target::User { uid: None, nickname: None };
        let ctx = NameContext {
            target: &target,
            post: &p,
            media_type: MediaType::Picture,
            index: 0,
        };
        assert_eq!(namer.filename(&ctx), sanitize(&p.mid));
    }

    #[test]
    fn dest_dir_defaults_per_target_kind() {
        let namer = DefaultNamer::new(None, None);
        assert_eq!(
            namer.dest_dir(&Target::Search { keyword: "a/b".into() }),
            PathBuf::from("search").join("ab")
        );
        assert_eq!(
            namer.dest_dir(&Target::SuperTopic { containerid: None, name: Some("news".into()) }),
            PathBuf::from("topic").join("news")
        );
    }
}
