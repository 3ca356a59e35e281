//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep sass-gpt on a single cooperative timeline:
//! - No worker threads: everything runs as tokio tasks
//! - No sleeping outside the reveal scheduler and the scripted backend
//!
//! The scanners here are shared by the tests under `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const SOURCE_ROOTS: [&str; 2] = ["sass/core/src", "sass/server/src"];

/// A forbidden pattern found in production code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File, relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Every `.rs` file under the production roots, as workspace-relative paths
#[must_use]
pub fn source_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in SOURCE_ROOTS {
        for entry in walkdir::WalkDir::new(root.join(dir))
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
    }
    files.sort();
    files
}

/// Lines of production code: comments stripped, `#[cfg(test)]` tails dropped.
///
/// Test modules sit at the end of each file, so everything from the first
/// `#[cfg(test)]` on is test code.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .collect()
}

/// Find production lines matching any of `patterns`, skipping allowed files
#[must_use]
pub fn scan(patterns: &[&str], allowed: &[&str]) -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();
    for path in source_files() {
        let unix = path.to_string_lossy().replace('\\', "/");
        if allowed.iter().any(|a| unix.ends_with(a)) {
            continue;
        }
        let Ok(content) = fs::read_to_string(root.join(&path)) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if patterns.iter().any(|p| code.contains(p)) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_drop_tests_and_comments() {
        let code = "fn a() {} // sleep(1)\n#[cfg(test)]\nmod tests { fn b() { sleep(1) } }";
        let lines = production_lines(code);
        assert_eq!(lines, vec![(1, "fn a() {} ")]);
    }

    #[test]
    fn test_sources_found() {
        let files = source_files();
        assert!(files.iter().any(|f| f.ends_with("reveal/engine.rs")));
        assert!(files.iter().any(|f| f.ends_with("main.rs")));
    }
}
