//! Browser-side interception snippet.
//!
//! Static rewriting cannot see URLs that page scripts assemble at runtime.
//! The snippet wraps `fetch`, `XMLHttpRequest.prototype.open` and the
//! `WebSocket` constructor so every URL they receive goes through the same
//! fix-up rules as the server-side passes.

use crate::rewrite::context::RewriteContext;

const TEMPLATE: &str = r#"<script>
(function() {
  var base = __BASE__;
  var target = __TARGET__;
  var wsBase = __WS_BASE__;
  var wsTarget = __WS_TARGET__;
  var passthrough = ['data:', 'blob:', 'mailto:', 'javascript:', '#'];

  function hasOrigin(url, origin) {
    if (url.indexOf(origin) !== 0) return false;
    var next = url.charAt(origin.length);
    return next === '' || next === '/' || next === '?' || next === '#';
  }

  function fix(url) {
    if (url === undefined || url === null) return url;
    url = String(url);
    for (var i = 0; i < passthrough.length; i++) {
      if (url.indexOf(passthrough[i]) === 0) return url;
    }
    if (url.indexOf(base) === 0) return url;
    if (hasOrigin(url, target)) return base + url.slice(target.length);
    if (url.charAt(0) === '/' && url.charAt(1) !== '/') return base + url;
    if (!/^[a-z][a-z0-9+.-]*:/i.test(url)) {
      try {
        var resolved = new URL(url, location.href).href;
        if (resolved.indexOf(base) === 0) return resolved;
        if (hasOrigin(resolved, target)) return base + resolved.slice(target.length);
        return resolved;
      } catch (e) {
        return url;
      }
    }
    return url;
  }

  function fixWs(url) {
    url = String(url);
    if (url.indexOf(wsBase) === 0) return url;
    if (hasOrigin(url, wsTarget)) return wsBase + url.slice(wsTarget.length);
    var fixed = fix(url);
    if (fixed.indexOf('https:') === 0) return 'wss:' + fixed.slice(6);
    if (fixed.indexOf('http:') === 0) return 'ws:' + fixed.slice(5);
    return fixed;
  }

  var origFetch = window.fetch;
  if (origFetch) {
    window.fetch = function(input, init) {
      if (typeof Request !== 'undefined' && input instanceof Request) {
        var fixedUrl = fix(input.url);
        if (fixedUrl !== input.url) input = new Request(fixedUrl, input);
        return origFetch.call(this, input, init);
      }
      return origFetch.call(this, fix(input), init);
    };
  }

  var origOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function(method, url) {
    var args = Array.prototype.slice.call(arguments);
    args[1] = fix(url);
    return origOpen.apply(this, args);
  };

  var OrigWebSocket = window.WebSocket;
  if (OrigWebSocket) {
    var PatchedWebSocket = function(url, protocols) {
      return protocols === undefined
        ? new OrigWebSocket(fixWs(url))
        : new OrigWebSocket(fixWs(url), protocols);
    };
    PatchedWebSocket.prototype = OrigWebSocket.prototype;
    PatchedWebSocket.CONNECTING = 0;
    PatchedWebSocket.OPEN = 1;
    PatchedWebSocket.CLOSING = 2;
    PatchedWebSocket.CLOSED = 3;
    window.WebSocket = PatchedWebSocket;
  }
})();
</script>"#;

/// Render the snippet for one response.
pub fn interception_script(ctx: &RewriteContext) -> String {
    TEMPLATE
        .replace("__WS_BASE__", &js_string(&ctx.ws_prefix()))
        .replace("__WS_TARGET__", &js_string(&ctx.backend_ws_origin()))
        .replace("__BASE__", &js_string(&ctx.prefix()))
        .replace("__TARGET__", &js_string(ctx.backend_origin()))
}

/// A JavaScript string literal that cannot terminate the surrounding
/// `<script>` element. Slashes are escaped, so the literal origin text never
/// appears in the rewritten document.
fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('/', "\\/")
}
