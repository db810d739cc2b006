//! CSS rewriting: origin substitution plus root-relative `url(...)` references.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::rewrite::context::RewriteContext;
use crate::rewrite::origin::substitute_origin;

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*(?P<quote>["']?)(?P<url>/[^"')\s]*)["']?\s*\)"#).expect("valid CSS url regex")
});

/// Rewrite a standalone stylesheet.
pub fn rewrite_css(input: &str, ctx: &RewriteContext) -> String {
    rewrite_css_urls(&substitute_origin(input, ctx), ctx)
}

/// Rewrite root-relative `url()` references, keeping their quoting. Also used on
/// whole HTML documents to cover `<style>` blocks and `style` attributes.
pub fn rewrite_css_urls(input: &str, ctx: &RewriteContext) -> String {
    CSS_URL_RE
        .replace_all(input, |caps: &Captures| {
            let quote = caps.name("quote").map(|m| m.as_str()).unwrap_or_default();
            let url = caps.name("url").map(|m| m.as_str()).unwrap_or_default();
            match ctx.proxied_path(url) {
                Some(rewritten) => format!("url({quote}{rewritten}{quote})"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
