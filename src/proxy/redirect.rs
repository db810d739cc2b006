//! Redirect `Location` rewriting.

use url::Url;

/// Map a backend `Location` into proxy space.
///
/// The location is resolved against the backend origin plus the current
/// request path. Same-origin targets become `<path_prefix><path>[?query][#fragment]`;
/// foreign or unparseable ones return `None` and are passed through as-is.
pub fn rewrite_location(
    location: &str,
    target: &str,
    request_path: &str,
    path_prefix: &str,
) -> Option<String> {
    let origin = Url::parse(target).ok()?;
    let mut current = origin.clone();
    current.set_path(request_path);
    let resolved = current.join(location).ok()?;

    if resolved.origin() != origin.origin() {
        return None;
    }

    let mut out = format!("{}{}", path_prefix, resolved.path());
    if let Some(query) = resolved.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = resolved.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    Some(out)
}
