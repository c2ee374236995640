//! Conflict classification from git's merge output and porcelain status.
//!
//! The heuristics are string matching by nature; they sit behind
//! [`ConflictClassifier`] so the planner and orchestrator never see them.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{ConflictInfo, ConflictKind, ConflictedPath, MergeFailure};

/// Turns a stopped merge into structured [`ConflictInfo`].
///
/// Implementations must not fail: anything unrecognised degrades to
/// [`ConflictKind::Unknown`].
pub trait ConflictClassifier: Send + Sync {
    fn classify(&self, failure: &MergeFailure) -> ConflictInfo;
}

/// Default classifier.
///
/// Paths come from the unmerged entries of `git status --porcelain`; the kind
/// of each path comes from the matching `CONFLICT (...)` line of the merge
/// output, falling back to the two-letter status code.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitStatusClassifier;

impl GitStatusClassifier {
    pub fn new() -> Self {
        Self
    }
}

/// A parsed `CONFLICT (<type>): <message>` line.
#[derive(Debug)]
struct ConflictLine {
    kind: ConflictKind,
    /// Path named explicitly by the message, when the format allows it.
    path: Option<String>,
    message: String,
}

static CONFLICT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CONFLICT \(([^)]+)\): (.*)$").expect("valid conflict regex"));

static MERGE_CONFLICT_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Merge conflict in (.+)$").expect("valid conflict regex"));

static DELETED_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?) deleted in .+ and modified in ").expect("valid conflict regex")
});

fn kind_for_label(label: &str) -> ConflictKind {
    let label = label.to_ascii_lowercase();
    if label.contains("rename") {
        ConflictKind::Rename
    } else if label == "content" || label == "add/add" {
        ConflictKind::Content
    } else if label == "modify/delete" || label == "delete/modify" {
        ConflictKind::DeleteModify
    } else {
        ConflictKind::Unknown
    }
}

fn parse_conflict_lines(output: &str) -> Vec<ConflictLine> {
    output
        .lines()
        .filter_map(|line| {
            let caps = CONFLICT_LINE.captures(line.trim())?;
            let kind = kind_for_label(&caps[1]);
            let message = caps[2].to_string();
            let path = match kind {
                ConflictKind::Content => MERGE_CONFLICT_IN
                    .captures(&message)
                    .map(|c| c[1].trim().to_string()),
                ConflictKind::DeleteModify => DELETED_IN
                    .captures(&message)
                    .map(|c| c[1].trim().to_string()),
                _ => None,
            };
            Some(ConflictLine {
                kind,
                path,
                message,
            })
        })
        .collect()
}

/// Unmerged entries of `git status --porcelain` v1, in reported order.
fn parse_unmerged(status: &str) -> Vec<(String, String)> {
    const UNMERGED: [&str; 7] = ["DD", "AU", "UD", "UA", "DU", "AA", "UU"];
    status
        .lines()
        .filter_map(|line| {
            let code = line.get(..2)?;
            let rest = line.get(2..)?.trim_start();
            if !UNMERGED.contains(&code) || rest.is_empty() {
                return None;
            }
            Some((code.to_string(), unquote(rest)))
        })
        .collect()
}

/// Undo git's C-style path quoting, e.g. `"caf\303\251.txt"` to `café.txt`.
///
/// Octal escapes are raw bytes of a UTF-8 sequence, so they are collected
/// before decoding.
fn unquote(path: &str) -> String {
    let Some(inner) = path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) else {
        return path.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut rest = inner.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        rest = tail;
        if byte != b'\\' {
            bytes.push(byte);
            continue;
        }
        let Some((&escape, tail)) = rest.split_first() else {
            bytes.push(byte);
            break;
        };
        rest = tail;
        let decoded = match escape {
            b'a' => 0x07,
            b'b' => 0x08,
            b't' => b'\t',
            b'n' => b'\n',
            b'v' => 0x0b,
            b'f' => 0x0c,
            b'r' => b'\r',
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                for _ in 0..2 {
                    match rest.first() {
                        Some(&digit @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(digit - b'0');
                            rest = &rest[1..];
                        }
                        _ => break,
                    }
                }
                (value & 0xff) as u8
            }
            // `\"` and `\\`
            other => other,
        };
        bytes.push(decoded);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn kind_for_code(code: &str) -> ConflictKind {
    match code {
        "UU" | "AA" => ConflictKind::Content,
        "DU" | "UD" => ConflictKind::DeleteModify,
        _ => ConflictKind::Unknown,
    }
}

/// Structural conflicts outrank content ones when summarising.
fn severity(kind: ConflictKind) -> u8 {
    match kind {
        ConflictKind::Unknown => 0,
        ConflictKind::Content => 1,
        ConflictKind::DeleteModify => 2,
        ConflictKind::Rename => 3,
    }
}

fn overall_kind(files: &[ConflictedPath]) -> ConflictKind {
    files
        .iter()
        .map(|f| f.kind)
        .max_by_key(|k| severity(*k))
        .unwrap_or(ConflictKind::Unknown)
}

impl ConflictClassifier for GitStatusClassifier {
    fn classify(&self, failure: &MergeFailure) -> ConflictInfo {
        let lines = parse_conflict_lines(&failure.output);
        let unmerged = parse_unmerged(&failure.status);

        let files: Vec<ConflictedPath> = if unmerged.is_empty() {
            // No status snapshot: fall back to the paths the merge output named.
            let mut files: Vec<ConflictedPath> = Vec::new();
            for line in &lines {
                if let Some(path) = &line.path {
                    if !files.iter().any(|f| &f.path == path) {
                        files.push(ConflictedPath {
                            path: path.clone(),
                            kind: line.kind,
                        });
                    }
                }
            }
            files
        } else {
            unmerged
                .into_iter()
                .map(|(code, path)| {
                    let from_line = lines
                        .iter()
                        .find(|l| l.path.as_deref() == Some(path.as_str()))
                        .or_else(|| lines.iter().find(|l| l.message.contains(path.as_str())))
                        .map(|l| l.kind)
                        .filter(|k| *k != ConflictKind::Unknown);
                    let kind = from_line.unwrap_or_else(|| kind_for_code(&code));
                    ConflictedPath { path, kind }
                })
                .collect()
        };

        let kind = overall_kind(&files);
        ConflictInfo { files, kind }
    }
}
