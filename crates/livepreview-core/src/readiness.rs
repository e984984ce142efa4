//! Readiness heuristics for sandbox process output.
//!
//! The sandbox's structured `ready` frame only proves the sandbox exists.
//! Whether the app server inside it is reachable can only be seen in the
//! free-text stdout of the build/dev tooling, so it is inferred here from
//! ordered substring rules.
//!
//! Matching is substring based. A line that merely echoes one of the
//! markers (an app printing "Local:" itself) is a false positive; the rules
//! accept that.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dev tooling detected from a server invocation line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Vite,
    Next,
    Generic,
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framework::Vite => write!(f, "Vite"),
            Framework::Next => write!(f, "Next.js"),
            Framework::Generic => write!(f, "dev"),
        }
    }
}

/// Status caption shown while the sandbox works
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusCaption {
    Building,
    TransformingModules,
    Rendering,
    Optimizing,
    StartingServer,
    StartingDevServer { framework: Framework },
    DevServerReady,
}

impl fmt::Display for StatusCaption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCaption::Building => write!(f, "Building..."),
            StatusCaption::TransformingModules => write!(f, "Transforming modules..."),
            StatusCaption::Rendering => write!(f, "Rendering..."),
            StatusCaption::Optimizing => write!(f, "Optimizing..."),
            StatusCaption::StartingServer => write!(f, "Starting server..."),
            StatusCaption::StartingDevServer {
                framework: Framework::Generic,
            } => write!(f, "Starting dev server..."),
            StatusCaption::StartingDevServer { framework } => {
                write!(f, "Starting {framework} dev server...")
            }
            StatusCaption::DevServerReady => write!(f, "Dev server ready"),
        }
    }
}

/// Result of inspecting one log line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub caption: Option<StatusCaption>,
    pub reachable: bool,
}

/// Substrings of an `error` frame that stop the loading indicator
pub const FATAL_ERROR_MARKERS: [&str; 3] = ["failed", "ERR!", "ENOENT"];

const BUILD_MARKERS: &[&str] = &[
    "vite build",
    "building for production",
    "next build",
    "creating an optimized production build",
];
const TRANSFORM_MARKERS: &[&str] = &["transforming"];
const RENDER_MARKERS: &[&str] = &["rendering chunks", "generating static pages"];
const OPTIMIZE_MARKERS: &[&str] = &["gzip", "finalizing page optimization", "optimizing"];
const START_MARKERS: &[&str] = &["preview", "start"];
const DEV_SERVER_MARKERS: &[&str] = &[
    "next dev",
    "vite dev",
    "> vite",
    "npm run dev",
    "pnpm dev",
    "pnpm run dev",
    "yarn dev",
    "bun dev",
    "bun run dev",
];
const DEV_READY_MARKERS: &[&str] = &["compiled successfully", "ready"];

/// Marker printed by Vite next to its local URL
const VITE_LOCAL_ARROW: &str = "➜";
const VITE_LOCAL_LABEL: &str = "Local:";
const NEXT_URL_MARKERS: &[&str] = &["- Local:", "- Network:"];
const CUSTOM_SERVER_MARKER: &str = "production server running";

/// Classify a `log` line: which caption applies (first rule wins) and,
/// independently, whether it shows the app server is reachable.
pub fn classify(line: &str) -> Classification {
    Classification {
        caption: caption_for(line),
        reachable: is_reachable(line),
    }
}

/// Ordered caption rules over the lowercased line
pub fn caption_for(line: &str) -> Option<StatusCaption> {
    let lowered = line.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    if has(BUILD_MARKERS) {
        Some(StatusCaption::Building)
    } else if has(TRANSFORM_MARKERS) {
        Some(StatusCaption::TransformingModules)
    } else if has(RENDER_MARKERS) {
        Some(StatusCaption::Rendering)
    } else if has(OPTIMIZE_MARKERS) {
        Some(StatusCaption::Optimizing)
    } else if has(START_MARKERS) {
        Some(StatusCaption::StartingServer)
    } else if has(DEV_SERVER_MARKERS) {
        Some(StatusCaption::StartingDevServer {
            framework: detect_framework(&lowered),
        })
    } else if has(DEV_READY_MARKERS) {
        Some(StatusCaption::DevServerReady)
    } else {
        None
    }
}

fn detect_framework(lowered: &str) -> Framework {
    if lowered.contains("next") {
        Framework::Next
    } else if lowered.contains("vite") {
        Framework::Vite
    } else {
        Framework::Generic
    }
}

/// Any one reachability marker is enough
pub fn is_reachable(line: &str) -> bool {
    let vite = line.contains(VITE_LOCAL_ARROW) && line.contains(VITE_LOCAL_LABEL);
    let next = NEXT_URL_MARKERS.iter().any(|m| line.contains(m))
        && (line.contains("http://") || line.contains("https://"));
    let custom = line.to_lowercase().contains(CUSTOM_SERVER_MARKER);
    vite || next || custom
}

/// Case-sensitive check against [`FATAL_ERROR_MARKERS`]
pub fn is_fatal_error(message: &str) -> bool {
    FATAL_ERROR_MARKERS.iter().any(|m| message.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_captions() {
        assert_eq!(
            caption_for("vite v5.0.8 building for production..."),
            Some(StatusCaption::Building)
        );
        assert_eq!(
            caption_for("   Creating an optimized production build ..."),
            Some(StatusCaption::Building)
        );
        assert_eq!(
            caption_for("transforming (42) src/App.tsx"),
            Some(StatusCaption::TransformingModules)
        );
        assert_eq!(
            caption_for("rendering chunks (3)..."),
            Some(StatusCaption::Rendering)
        );
        assert_eq!(
            caption_for("   Generating static pages (0/5) ..."),
            Some(StatusCaption::Rendering)
        );
        assert_eq!(
            caption_for("dist/assets/index.js  143.20 kB │ gzip: 46.10 kB"),
            Some(StatusCaption::Optimizing)
        );
        assert_eq!(
            caption_for("   Finalizing page optimization ..."),
            Some(StatusCaption::Optimizing)
        );
    }

    #[test]
    fn test_first_rule_wins() {
        // Mentions both a build step and transforming; build comes first.
        assert_eq!(
            caption_for("vite build: transforming..."),
            Some(StatusCaption::Building)
        );
        // "ready - started server" hits the generic start rule before ready.
        assert_eq!(
            caption_for("ready - started server on 0.0.0.0:3000"),
            Some(StatusCaption::StartingServer)
        );
    }

    #[test]
    fn test_server_captions() {
        assert_eq!(
            caption_for("> vite preview --port 4173"),
            Some(StatusCaption::StartingServer)
        );
        assert_eq!(
            caption_for("> next dev -p 3000"),
            Some(StatusCaption::StartingDevServer {
                framework: Framework::Next
            })
        );
        assert_eq!(
            caption_for("> vite --host"),
            Some(StatusCaption::StartingDevServer {
                framework: Framework::Vite
            })
        );
        assert_eq!(
            caption_for("Running npm run dev"),
            Some(StatusCaption::StartingDevServer {
                framework: Framework::Generic
            })
        );
        assert_eq!(
            caption_for("  VITE v5.0.8  ready in 412 ms"),
            Some(StatusCaption::DevServerReady)
        );
        assert_eq!(
            caption_for("webpack compiled successfully"),
            Some(StatusCaption::DevServerReady)
        );
        assert_eq!(caption_for("added 312 packages in 9s"), None);
    }

    #[test]
    fn test_caption_display() {
        assert_eq!(
            StatusCaption::StartingDevServer {
                framework: Framework::Next
            }
            .to_string(),
            "Starting Next.js dev server..."
        );
        assert_eq!(
            StatusCaption::StartingDevServer {
                framework: Framework::Generic
            }
            .to_string(),
            "Starting dev server..."
        );
        assert_eq!(StatusCaption::DevServerReady.to_string(), "Dev server ready");
    }

    #[test]
    fn test_reachability_markers() {
        assert!(is_reachable("  ➜  Local:   http://localhost:5173/"));
        assert!(is_reachable("- Local: http://localhost:3000"));
        assert!(is_reachable("   - Network:      http://10.0.0.4:3000"));
        assert!(is_reachable("Production server running on port 3000"));

        assert!(!is_reachable("- Local:"));
        assert!(!is_reachable("  ➜  Network: use --host to expose"));
        assert!(!is_reachable("ready in 300ms"));
    }

    #[test]
    fn test_reachability_is_independent_of_caption() {
        let result = classify("  ➜  Local:   http://localhost:5173/");
        assert!(result.reachable);
        assert_eq!(result.caption, None);

        let result = classify("- Local: http://localhost:3000 (ready)");
        assert!(result.reachable);
        assert_eq!(result.caption, Some(StatusCaption::DevServerReady));
    }

    #[test]
    fn test_echoed_marker_is_a_false_positive() {
        // Application code printing the marker still counts.
        assert!(is_reachable("console: - Local: https://example.com"));
    }

    #[test]
    fn test_fatal_error_markers() {
        assert!(is_fatal_error("npm ERR! missing script: dev"));
        assert!(is_fatal_error("ENOENT: no such file or directory"));
        assert!(is_fatal_error("Build failed with 2 errors"));

        assert!(!is_fatal_error("warning: peer dependency"));
        assert!(!is_fatal_error("Build FAILED"));
        assert!(!is_fatal_error("npm err! lowercase"));
    }
}
