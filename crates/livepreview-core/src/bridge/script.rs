//! Frame-side console interceptor.

/// Wraps `console.log/info/warn/error` plus the global error and
/// unhandled-rejection handlers, posting each call to the parent window as
/// a `console` bridge message. Guarded so a second injection is a no-op.
pub const INTERCEPTOR_SCRIPT: &str = r#"(function () {
  if (window.__livepreviewConsoleBridge) return;
  window.__livepreviewConsoleBridge = true;

  function render(args) {
    return Array.prototype.map.call(args, function (value) {
      if (value instanceof Error) return value.stack || value.message;
      if (typeof value === "object") {
        try { return JSON.stringify(value); } catch (_) { return String(value); }
      }
      return String(value);
    }).join(" ");
  }

  function forward(level, message) {
    try {
      window.parent.postMessage({ type: "console", level: level, message: message }, "*");
    } catch (_) {}
  }

  [["log", "log"], ["info", "log"], ["warn", "warn"], ["error", "error"]].forEach(function (pair) {
    var original = console[pair[0]];
    console[pair[0]] = function () {
      forward(pair[1], render(arguments));
      return original.apply(console, arguments);
    };
  });

  window.addEventListener("error", function (event) {
    var where = event.filename ? " (" + event.filename + ":" + event.lineno + ")" : "";
    forward("error", "Uncaught " + (event.message || "error") + where);
  });

  window.addEventListener("unhandledrejection", function (event) {
    forward("error", "Unhandled rejection: " + render([event.reason]));
  });
})();"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_covers_console_and_global_handlers() {
        for needle in [
            "\"log\"",
            "\"warn\"",
            "\"error\"",
            "\"info\"",
            "unhandledrejection",
            "postMessage",
            "type: \"console\"",
        ] {
            assert!(INTERCEPTOR_SCRIPT.contains(needle), "missing {needle}");
        }
    }
}
