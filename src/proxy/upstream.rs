//! Upstream request construction: target URL and header policy.

use axum::http::{header, HeaderMap, HeaderValue};

use crate::proxy::error::UpstreamError;
use crate::session::Session;

/// The part of `path` below `path_prefix` (`/p/<sid>`); empty maps to `/`.
pub fn sub_path<'a>(path: &'a str, path_prefix: &str) -> &'a str {
    match path.strip_prefix(path_prefix) {
        Some(rest) if rest.starts_with('/') => rest,
        _ => "/",
    }
}

/// `target + sub_path [+ ?query]`.
pub fn upstream_url(target: &str, sub_path: &str, query: Option<&str>) -> String {
    let mut url = String::with_capacity(target.len() + sub_path.len() + 16);
    url.push_str(target.trim_end_matches('/'));
    url.push_str(if sub_path.is_empty() { "/" } else { sub_path });
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(q);
    }
    url
}

/// Headers sent upstream. The session credential replaces any client
/// `Authorization`; nothing outside the allow list is forwarded.
pub fn upstream_headers(
    incoming: &HeaderMap,
    session: &Session,
    fallback_user_agent: &str,
) -> Result<HeaderMap, UpstreamError> {
    let mut headers = HeaderMap::new();

    let credential = HeaderValue::from_str(&session.credential)
        .map_err(|_| UpstreamError::InvalidRequest("credential is not a valid header value".into()))?;
    headers.insert(header::AUTHORIZATION, credential);

    let user_agent = incoming
        .get(header::USER_AGENT)
        .cloned()
        .or_else(|| HeaderValue::from_str(fallback_user_agent).ok())
        .unwrap_or_else(|| HeaderValue::from_static("Mozilla/5.0"));
    headers.insert(header::USER_AGENT, user_agent);

    let accept = incoming
        .get(header::ACCEPT)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*/*"));
    headers.insert(header::ACCEPT, accept);

    // copied verbatim when present
    for name in [header::ACCEPT_LANGUAGE, header::CONTENT_TYPE, header::COOKIE] {
        for value in incoming.get_all(&name) {
            headers.append(name.clone(), value.clone());
        }
    }

    if incoming.contains_key(header::REFERER) {
        if let Ok(origin) = HeaderValue::from_str(&session.target_url) {
            headers.insert(header::REFERER, origin);
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionMetadata;

    fn session() -> Session {
        Session {
            target_url: "https://b.example".into(),
            credential: "Bearer X".into(),
            metadata: SessionMetadata::default(),
            created_at: 0,
        }
    }

    #[test]
    fn splits_sub_path() {
        assert_eq!(sub_path("/p/sid/dash", "/p/sid"), "/dash");
        assert_eq!(sub_path("/p/sid/", "/p/sid"), "/");
        assert_eq!(sub_path("/p/sid", "/p/sid"), "/");
        assert_eq!(sub_path("/p/sid/a/b.css", "/p/sid"), "/a/b.css");
    }

    #[test]
    fn builds_upstream_url() {
        assert_eq!(upstream_url("https://b.example", "/dash", Some("x=1")), "https://b.example/dash?x=1");
        assert_eq!(upstream_url("https://b.example", "", None), "https://b.example/");
        assert_eq!(upstream_url("https://b.example/", "/a", Some("")), "https://b.example/a");
    }

    #[test]
    fn applies_header_policy() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client"));
        incoming.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        incoming.insert(header::COOKIE, HeaderValue::from_static("a=1"));
        incoming.insert(header::REFERER, HeaderValue::from_static("http://proxy/p/sid/x"));
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        incoming.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        incoming.insert("x-custom", HeaderValue::from_static("1"));

        let out = upstream_headers(&incoming, &session(), "Mozilla/5.0").unwrap();
        assert_eq!(out[header::AUTHORIZATION], "Bearer X");
        assert_eq!(out[header::USER_AGENT], "Mozilla/5.0");
        assert_eq!(out[header::ACCEPT], "*/*");
        assert_eq!(out[header::ACCEPT_LANGUAGE], "en");
        assert_eq!(out[header::COOKIE], "a=1");
        assert_eq!(out[header::REFERER], "https://b.example");
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::TRANSFER_ENCODING).is_none());
        assert!(out.get("x-custom").is_none());
    }

    #[test]
    fn forwards_client_user_agent_and_accept() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        incoming.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        let out = upstream_headers(&incoming, &session(), "Mozilla/5.0").unwrap();
        assert_eq!(out[header::USER_AGENT], "curl/8");
        assert_eq!(out[header::ACCEPT], "text/html");
        assert!(out.get(header::REFERER).is_none());
    }

    #[test]
    fn rejects_credentials_that_are_not_header_values() {
        let mut s = session();
        s.credential = "Bearer\nX".into();
        assert!(matches!(
            upstream_headers(&HeaderMap::new(), &s, "Mozilla/5.0"),
            Err(UpstreamError::InvalidRequest(_))
        ));
    }
}
