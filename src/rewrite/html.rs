//! HTML rewriting.
//!
//! Pass order: origin substitution, root-relative link attributes, CSS
//! `url()` references, then `<base>` insertion and snippet injection.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::rewrite::context::RewriteContext;
use crate::rewrite::css::rewrite_css_urls;
use crate::rewrite::intercept::interception_script;
use crate::rewrite::origin::substitute_origin;

static LINK_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?P<attr>\b(?:href|src|action|srcset))(?P<eq>\s*=\s*)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#,
    )
    .expect("valid link attribute regex")
});
static BASE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<base[\s>/]").expect("valid base tag regex"));
static HEAD_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("valid head open regex"));
static HEAD_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</head\s*>").expect("valid head close regex"));

/// Full HTML pass for a document served at `request_path` (the sub-path
/// below the session prefix, without query).
pub fn rewrite_html(input: &str, ctx: &RewriteContext, request_path: &str) -> String {
    let html = substitute_origin(input, ctx);
    let html = rewrite_link_attributes(&html, ctx);
    let html = rewrite_css_urls(&html, ctx);
    inject_head(&html, ctx, request_path)
}

/// Rewrite root-relative `href`, `src`, `action` and `srcset` values.
pub fn rewrite_link_attributes(input: &str, ctx: &RewriteContext) -> String {
    LINK_ATTR_RE
        .replace_all(input, |caps: &Captures| {
            let attr = &caps["attr"];
            let eq = &caps["eq"];
            let (quote, value) = match (caps.name("dq"), caps.name("sq")) {
                (Some(v), _) => ('"', v.as_str()),
                (None, Some(v)) => ('\'', v.as_str()),
                (None, None) => return caps[0].to_string(),
            };

            let rewritten = if attr.eq_ignore_ascii_case("srcset") {
                rewrite_srcset(value, ctx)
            } else {
                ctx.proxied_path(value)
            };

            match rewritten {
                Some(v) => format!("{attr}{eq}{quote}{v}{quote}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Rewrite every root-relative candidate of a `srcset` list.
fn rewrite_srcset(value: &str, ctx: &RewriteContext) -> Option<String> {
    let mut changed = false;
    let candidates: Vec<String> = value
        .split(',')
        .map(|candidate| {
            let trimmed = candidate.trim_start();
            let lead = &candidate[..candidate.len() - trimmed.len()];
            let url_end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
            let (url, descriptor) = trimmed.split_at(url_end);
            match ctx.proxied_path(url) {
                Some(proxied) => {
                    changed = true;
                    format!("{lead}{proxied}{descriptor}")
                }
                None => candidate.to_string(),
            }
        })
        .collect();

    changed.then(|| candidates.join(","))
}

/// The `<base href>` for a document: the proxy-prefixed directory of its path.
pub fn base_href(ctx: &RewriteContext, request_path: &str) -> String {
    let dir = match request_path.rfind('/') {
        Some(idx) => &request_path[..=idx],
        None => "/",
    };
    let dir = if dir.starts_with('/') { dir } else { "/" };
    format!("{}{}", ctx.prefix(), dir)
}

/// Insert `<base>` (when absent) after the opening head tag and the
/// interception snippet before the closing one.
fn inject_head(html: &str, ctx: &RewriteContext, request_path: &str) -> String {
    let script = interception_script(ctx);
    let mut head_start = String::new();
    if !BASE_TAG_RE.is_match(html) {
        head_start.push_str(&format!(
            "<base href=\"{}\">",
            base_href(ctx, request_path).replace('"', "%22")
        ));
    }

    let mut out = match HEAD_CLOSE_RE.find(html) {
        Some(close) => {
            let mut out = String::with_capacity(html.len() + script.len() + head_start.len());
            out.push_str(&html[..close.start()]);
            out.push_str(&script);
            out.push_str(&html[close.start()..]);
            out
        }
        None => {
            head_start.push_str(&script);
            html.to_string()
        }
    };

    if !head_start.is_empty() {
        match HEAD_OPEN_RE.find(&out) {
            Some(open) => out.insert_str(open.end(), &head_start),
            None => out.insert_str(0, &head_start),
        }
    }
    out
}
