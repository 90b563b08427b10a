use std::sync::LazyLock;

use axum::http::{HeaderMap, header::USER_AGENT};
use regex::Regex;

use crate::store::Provenance;

const MAX_USER_AGENT_LEN: usize = 512;

static SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]{1,64}$").unwrap());

pub fn is_valid_slug(slug: &str) -> bool {
    SLUG.is_match(slug)
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect())
}

pub fn provenance(headers: &HeaderMap, source: &str) -> Provenance {
    Provenance {
        source: Some(source.to_string()),
        user_agent: user_agent(headers),
        ip: client_ip(headers),
    }
}
