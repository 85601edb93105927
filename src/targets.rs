//! Target-string parsing. Thin by design: enough to drive the engine end
//! to end, not a hardened parser.

use crate::model::Target;

/// Parses one positional CLI argument into a `Target`.
///
/// Heuristics: a bare numeric string is a uid; `@name` is a nickname;
/// `#name#` is a supertopic name; a `10080...` containerid-shaped numeric
/// string of 16+ digits is a supertopic containerid; anything else is
/// treated as a search keyword.
pub fn parse(raw: &str) -> Target {
    let raw = raw.trim();

    if let Some(name) = raw.strip_prefix('@') {
        return Target::User {
            uid: None,
            nickname: Some(name.to_string()),
        };
    }

    if raw.starts_with('#') && raw.ends_with('#') && raw.len() > 2 {
        return Target::SuperTopic {
            containerid: None,
            name: Some(raw.trim_matches('#').to_string()),
        };
    }

    if raw.starts_with("mid:") {
        return Target::Mid {
            mid: raw.trim_start_matches("mid:").to_string(),
        };
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        if raw.len() >= 16 {
            return Target::SuperTopic {
                containerid: Some(raw.to_string()),
                name: None,
            };
        }
        return Target::User {
            uid: Some(raw.to_string()),
            nickname: None,
        };
    }

    Target::Search {
        keyword: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_is_uid() {
        assert_eq!(
            parse("1234567890"),
            Target::User {
                uid: Some("1234567890".into()),
                nickname: None
            }
        );
    }

    #[test]
    fn at_prefix_is_nickname() {
        assert_eq!(
            parse("@someone"),
            Target::User {
                uid: None,
                nickname: Some("someone".into())
            }
        );
    }

    #[test]
    fn hash_wrapped_is_supertopic_name() {
        assert_eq!(
            parse("#news#"),
            Target::SuperTopic {
                containerid: None,
                name: Some("news".into())
            }
        );
    }

    #[test]
    fn long_numeric_is_containerid() {
        assert_eq!(
            parse("1008081234567890"),
            Target::SuperTopic {
                containerid: Some("1008081234567890".into()),
                name: None
            }
        );
    }

    #[test]
    fn anything_else_is_search_keyword() {
        assert_eq!(
            parse("rust lang"),
            Target::Search {
                keyword: "rust lang".into()
            }
        );
    }
}
