//! Content rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! upstream body + Content-Type
//!     → ContentKind::from_content_type
//!     → html.rs   (origin, link attributes, url(), <base>, snippet)
//!     → css.rs    (origin, url())
//!     → origin.rs (origin only: JavaScript / JSON)
//!     → passthrough for binary and unknown types
//! ```
//!
//! # Design Decisions
//! - Pure string functions parametrized by a [`RewriteContext`]; no I/O
//! - Best effort, not a security boundary: scripts can build URLs no static
//!   pass sees, so the interception snippet backs up the static passes
//! - Every pass is idempotent on its own output

pub mod context;
pub mod css;
pub mod html;
pub mod intercept;
pub mod origin;

pub use context::RewriteContext;
pub use css::rewrite_css;
pub use html::rewrite_html;
pub use intercept::interception_script;
pub use origin::substitute_origin;

/// How a response body is treated, decided from its `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    /// JavaScript or JSON: origin substitution only.
    Script,
    /// Images, fonts, media, archives: streamed byte-exact.
    Binary,
    /// Anything else: streamed unmodified.
    Other,
}

impl ContentKind {
    pub fn from_content_type(content_type: &str) -> Self {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("text/html") {
            ContentKind::Html
        } else if ct.contains("text/css") {
            ContentKind::Css
        } else if ct.contains("javascript") || ct.contains("ecmascript") || ct.contains("json") {
            ContentKind::Script
        } else if is_binary(&ct) {
            ContentKind::Binary
        } else {
            ContentKind::Other
        }
    }

    /// True when the body must be buffered and rewritten.
    pub fn is_rewritten(self) -> bool {
        matches!(self, ContentKind::Html | ContentKind::Css | ContentKind::Script)
    }
}

fn is_binary(ct: &str) -> bool {
    const MARKERS: &[&str] = &[
        "image/", "font/", "audio/", "video/", "woff", "ttf", "octet-stream", "application/pdf",
        "application/zip",
    ];
    MARKERS.iter().any(|m| ct.contains(m))
}

/// Apply the pass for `kind` to a textual body. `request_path` is the
/// sub-path below the session prefix. Returns `None` for kinds that pass
/// through untouched.
pub fn rewrite_body(
    kind: ContentKind,
    body: &str,
    ctx: &RewriteContext,
    request_path: &str,
) -> Option<String> {
    match kind {
        ContentKind::Html => Some(rewrite_html(body, ctx, request_path)),
        ContentKind::Css => Some(rewrite_css(body, ctx)),
        ContentKind::Script => Some(substitute_origin(body, ctx)),
        ContentKind::Binary | ContentKind::Other => None,
    }
}
