//! Make-rule dependency files
//!
//! Compilers write the headers a translation unit pulled in as a make rule:
//!
//! ```text
//! build/main.o: src/main.c src/board.h \
//!   src/my\ dir/config.h
//! ```
//!
//! Only the first rule is read. `\` + newline joins lines and `\ ` is a
//! literal space inside a path.

use std::path::{Path, PathBuf};

/// Parse the prerequisites of the first rule
pub fn parse(content: &str) -> Vec<PathBuf> {
    let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");
    let Some(rule) = joined.lines().find(|l| !l.trim().is_empty()) else {
        return Vec::new();
    };
    let Some(prerequisites) = split_target(rule) else {
        return Vec::new();
    };
    split_words(prerequisites).into_iter().map(PathBuf::from).collect()
}

/// Read and parse a dependency file, `None` if it does not exist
pub fn read(path: &Path) -> Option<Vec<PathBuf>> {
    std::fs::read_to_string(path).ok().map(|content| parse(&content))
}

/// Everything after the `target:` separator
///
/// A colon followed by a path separator (`C:\`, `C:/`) belongs to a drive
/// letter, not to the rule.
fn split_target(rule: &str) -> Option<&str> {
    let bytes = rule.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b':' {
            continue;
        }
        let drive = i == 1 || (i >= 2 && bytes[i - 2].is_ascii_whitespace());
        let next_is_sep = matches!(bytes.get(i + 1), Some(b'\\' | b'/'));
        if drive && next_is_sep {
            continue;
        }
        return Some(&rule[i + 1..]);
    }
    None
}

/// Split on unescaped whitespace, unescaping `\ `
fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                current.push(' ');
                chars.next();
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
