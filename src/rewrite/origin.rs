//! Plain origin substitution, used for every textual content type.

use crate::rewrite::context::RewriteContext;

/// Replace the backend origin (http and ws forms) with the proxy prefix.
///
/// An occurrence only counts when it ends at an origin boundary, so
/// `https://b.example.com` or `https://b.example:8443` are left alone when the
/// backend is `https://b.example`.
pub fn substitute_origin(input: &str, ctx: &RewriteContext) -> String {
    let once = replace_origin(input, ctx.backend_origin(), &ctx.prefix());
    replace_origin(&once, &ctx.backend_ws_origin(), &ctx.ws_prefix())
}

fn replace_origin(input: &str, origin: &str, replacement: &str) -> String {
    if origin.is_empty() || !input.contains(origin) {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for (start, matched) in input.match_indices(origin) {
        let end = start + matched.len();
        if !is_boundary(input[end..].chars().next()) {
            continue;
        }
        out.push_str(&input[last..start]);
        out.push_str(replacement);
        last = end;
    }
    out.push_str(&input[last..]);
    out
}

/// Characters that would extend a host name or introduce a port.
fn is_boundary(next: Option<char>) -> bool {
    match next {
        None => true,
        Some(c) => !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_')),
    }
}
