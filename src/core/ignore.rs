//! Ignore-manifest rules
//!
//! Each directory may carry a `.buildignore` file with one glob pattern per
//! line. Blank lines and lines starting with `#` are skipped. Patterns are
//! anchored to the directory that declares them, so `drivers/*` in
//! `/proj/.buildignore` only ever matches below `/proj/drivers`.
//!
//! Glob syntax follows shell fnmatch: `*` matches any run of characters
//! (including `/`), `?` matches one character and `[...]` / `[!...]` match a
//! character class.

use std::path::Path;

use regex::Regex;

use crate::error::ScanError;

/// A single anchored pattern
#[derive(Debug, Clone)]
struct IgnoreRule {
    /// Pattern as written, joined onto its directory
    pattern: String,
    /// Compiled matcher
    regex: Regex,
}

/// Accumulated ignore rules for one scan
#[derive(Debug, Clone, Default)]
pub struct IgnoreRuleSet {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRuleSet {
    /// Create an empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are present
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Add the patterns of an ignore manifest located in `dir`
    pub fn add_manifest(&mut self, dir: &Path, content: &str, file: &Path) -> Result<(), ScanError> {
        for pattern in parse_manifest(content) {
            self.add_pattern(dir, pattern)
                .map_err(|error| ScanError::InvalidPattern {
                    file: file.to_path_buf(),
                    pattern: pattern.to_string(),
                    error,
                })?;
        }
        Ok(())
    }

    /// Add one pattern anchored to `dir`
    ///
    /// Only the pattern is a glob; the directory matches literally.
    pub fn add_pattern(&mut self, dir: &Path, pattern: &str) -> Result<(), String> {
        let dir = normalize(dir);
        let dir = dir.trim_end_matches('/');
        let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
        let expr = format!("^{}/{}$", regex::escape(dir), glob_to_regex(pattern));
        let regex = Regex::new(&expr).map_err(|e| e.to_string())?;
        self.rules.push(IgnoreRule {
            pattern: format!("{dir}/{pattern}"),
            regex,
        });
        Ok(())
    }

    /// Append every rule of `other`
    pub fn extend(&mut self, other: &IgnoreRuleSet) {
        self.rules.extend(other.rules.iter().cloned());
    }

    /// Whether `path` is matched by any rule
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let path = normalize(path);
        self.rules.iter().any(|rule| rule.regex.is_match(&path))
    }

    /// Anchored patterns, for reporting
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.pattern.as_str())
    }
}

/// Extract the patterns of an ignore manifest
pub fn parse_manifest(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Path as a `/`-separated string
fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Translate an fnmatch-style glob into an unanchored regular expression
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Find the closing bracket; an unterminated class is a literal '['
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '!' || chars[j] == '^') {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str("\\[");
                } else {
                    let mut class: String = chars[i + 1..j].iter().collect();
                    if let Some(rest) = class.strip_prefix('!') {
                        class = format!("^{rest}");
                    }
                    out.push('[');
                    out.push_str(&class.replace('\\', "\\\\"));
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out
}
