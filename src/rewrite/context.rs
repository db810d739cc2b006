//! Per-request rewrite parameters.

/// Path segment under which every session is addressed.
pub const PROXY_PATH_SEGMENT: &str = "/p/";

/// Parameters shared by every rewrite pass of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteContext {
    backend_origin: String,
    proxy_base: String,
    session_id: String,
}

impl RewriteContext {
    /// `backend_origin` and `proxy_base` are `scheme://host[:port]` without a
    /// trailing slash.
    pub fn new(
        backend_origin: impl Into<String>,
        proxy_base: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            backend_origin: trim_slash(backend_origin.into()),
            proxy_base: trim_slash(proxy_base.into()),
            session_id: session_id.into(),
        }
    }

    pub fn backend_origin(&self) -> &str {
        &self.backend_origin
    }

    pub fn proxy_base(&self) -> &str {
        &self.proxy_base
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `/p/<sid>`
    pub fn path_prefix(&self) -> String {
        format!("{}{}", PROXY_PATH_SEGMENT, self.session_id)
    }

    /// `<proxy-base>/p/<sid>`
    pub fn prefix(&self) -> String {
        format!("{}{}", self.proxy_base, self.path_prefix())
    }

    /// The backend origin in WebSocket scheme space.
    pub fn backend_ws_origin(&self) -> String {
        to_ws_scheme(&self.backend_origin)
    }

    /// The proxy prefix in WebSocket scheme space.
    pub fn ws_prefix(&self) -> String {
        to_ws_scheme(&self.prefix())
    }

    /// Prefix a root-relative path, unless it must be left alone: protocol
    /// relative (`//host`), not root-relative at all, or already under the
    /// session's proxy prefix.
    pub fn proxied_path(&self, path: &str) -> Option<String> {
        if !path.starts_with('/') || path.starts_with("//") {
            return None;
        }
        if self.is_proxy_path(path) {
            return None;
        }
        Some(format!("{}{}", self.prefix(), path))
    }

    /// True for `/p/<sid>` and anything below it.
    pub fn is_proxy_path(&self, path: &str) -> bool {
        let prefix = self.path_prefix();
        match path.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
            None => false,
        }
    }
}

fn trim_slash(mut value: String) -> String {
    while value.ends_with('/') {
        value.pop();
    }
    value
}

/// `http(s)` → `ws(s)`; other schemes unchanged.
pub fn to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}
