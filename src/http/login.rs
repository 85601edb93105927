//! Login verifier.
//!
//! A single `GET /api/config` probe, tri-state, never throws.

use super::HttpContext;
use crate::rate::Bucket;
use serde::Deserialize;
use std::time::Duration;

/// `VerifyLogin`'s result: `{true, uid}`, `{false, nil}`, or
/// `{unknown, nil}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStatus {
    Verified(String),
    NotLoggedIn,
    Unknown,
}

#[derive(Deserialize)]
struct ConfigResponse {
    data: Option<ConfigData>,
}

#[derive(Deserialize)]
struct ConfigData {
    #[serde(default)]
    login: bool,
    uid: Option<serde_json::Value>,
}

/// Issues `GET /api/config` with `retries=1`, `allow_captcha=false`, a
/// 10s timeout; never throws.
pub fn verify_login(ctx: &HttpContext) -> LoginStatus {
    let result = ctx.request(
        reqwest::Method::GET,
        "/api/config",
        super::RequestOptions {
            bucket: Bucket::Api,
            allow_captcha: false,
            retries: 1,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
        },
    );

    let response = match result {
        Ok(r) => r,
        Err(_) => return LoginStatus::Unknown,
    };

    let body: Result<ConfigResponse, _> = response.json();
    match body {
        Ok(ConfigResponse {
            data: Some(ConfigData { login: true, uid: Some(uid) }),
        }) => {
            let uid_str = match uid {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                _ => return LoginStatus::Unknown,
            };
            LoginStatus::Verified(uid_str)
        }
        Ok(ConfigResponse {
            data: Some(ConfigData { login: false, .. }),
        }) => LoginStatus::NotLoggedIn,
        _ => LoginStatus::Unknown,
    }
}
