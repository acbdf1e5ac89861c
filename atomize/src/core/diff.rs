//! Pure unified-diff helpers: hashing, file membership, per-file sections.
//!
//! Sections are compared byte-for-byte between the snapshot and the staged
//! diff, so splitting must be exact: a section runs from its `diff --git`
//! line up to (not including) the next one. Caller-supplied text is compared
//! through [`normalized_sections`] instead, since its blob ids and path
//! quoting follow whatever settings produced it.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

const HEADER_PREFIX: &str = "diff --git ";

/// Stable content hash for diff text, rendered as `sha256:<hex>`.
pub fn diff_hash(diff: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(diff.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Ordered, de-duplicated list of paths touched by `diff`.
pub fn diff_files(diff: &str) -> Vec<String> {
    let mut files = Vec::new();
    for line in diff.lines() {
        let Some(rest) = line.strip_prefix(HEADER_PREFIX) else {
            continue;
        };
        if let Some(path) = parse_header_path(rest)
            && !files.contains(&path)
        {
            files.push(path);
        }
    }
    files
}

/// Split `diff` into per-file sections keyed by path.
///
/// A path that appears in more than one section keeps the concatenation of
/// its sections in order of appearance.
pub fn split_sections(diff: &str) -> BTreeMap<String, String> {
    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in diff.split_inclusive('\n') {
        if let Some(rest) = line.strip_prefix(HEADER_PREFIX) {
            if let Some((path, text)) = current.take() {
                sections.entry(path).or_default().push_str(&text);
            }
            let path = parse_header_path(rest.trim_end_matches('\n'))
                .unwrap_or_else(|| rest.trim().to_string());
            current = Some((path, line.to_string()));
            continue;
        }
        if let Some((_, text)) = current.as_mut() {
            text.push_str(line);
        }
    }
    if let Some((path, text)) = current {
        sections.entry(path).or_default().push_str(&text);
    }
    sections
}

/// Per-file sections with the rendering-dependent header lines removed.
///
/// `diff --git`, `index`, `---` and `+++` lines before the first hunk are
/// dropped; mode lines and hunk content are kept verbatim.
pub fn normalized_sections(diff: &str) -> BTreeMap<String, String> {
    split_sections(diff)
        .into_iter()
        .map(|(path, text)| (path, normalize_section(&text)))
        .collect()
}

fn normalize_section(section: &str) -> String {
    let mut out = String::with_capacity(section.len());
    let mut in_body = false;
    for line in section.split_inclusive('\n') {
        if line.starts_with(HEADER_PREFIX) {
            in_body = false;
            continue;
        }
        if line.starts_with("@@") || line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            in_body = true;
        }
        let variable = ["index ", "--- ", "+++ "].iter().any(|p| line.starts_with(p));
        if in_body || !variable {
            out.push_str(line);
        }
    }
    out
}

/// Extract the post-image path from the remainder of a `diff --git` header.
///
/// Handles quoted paths and paths containing spaces. Returns `None` for
/// `/dev/null` or malformed headers.
fn parse_header_path(rest: &str) -> Option<String> {
    let rest = rest.trim_end();
    if rest.starts_with('"') {
        return parse_quoted_pair(rest);
    }

    // Non-rename headers repeat the same path: `a/<p> b/<p>`.
    if rest.len() >= 5 && (rest.len() - 5) % 2 == 0 {
        let len = (rest.len() - 5) / 2;
        if let (Some(a), Some(b)) = (rest.get(2..2 + len), rest.get(len + 5..))
            && rest.starts_with("a/")
            && rest.get(2 + len..len + 5) == Some(" b/")
            && a == b
        {
            return non_null(a);
        }
    }

    let (_, b_path) = rest.rsplit_once(" b/")?;
    non_null(b_path)
}

fn parse_quoted_pair(rest: &str) -> Option<String> {
    let mut parts = Vec::new();
    let mut remaining = rest;
    while !remaining.is_empty() {
        remaining = remaining.trim_start();
        if let Some(stripped) = remaining.strip_prefix('"') {
            let end = closing_quote(stripped)?;
            parts.push(unescape(&stripped[..end]));
            remaining = &stripped[end + 1..];
        } else {
            let end = remaining.find(' ').unwrap_or(remaining.len());
            parts.push(remaining[..end].to_string());
            remaining = &remaining[end..];
        }
    }
    let b_path = parts.get(1).or_else(|| parts.first())?;
    let stripped = b_path
        .strip_prefix("b/")
        .or_else(|| b_path.strip_prefix("a/"))
        .unwrap_or(b_path);
    non_null(stripped)
}

fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in s.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(idx),
            _ => escaped = false,
        }
    }
    None
}

/// Undo git's C-style path quoting, including `\NNN` octal byte runs.
fn unescape(s: &str) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(s.len());
    let mut bytes = s.bytes().peekable();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match bytes.peek() {
                        Some(&(next @ b'0'..=b'7')) => {
                            value = value * 8 + u32::from(next - b'0');
                            bytes.next();
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            Some(b'a') => out.push(0x07),
            Some(b'b') => out.push(0x08),
            Some(b't') => out.push(b'\t'),
            Some(b'n') => out.push(b'\n'),
            Some(b'v') => out.push(0x0b),
            Some(b'f') => out.push(0x0c),
            Some(b'r') => out.push(b'\r'),
            Some(other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn non_null(path: &str) -> Option<String> {
    if path.is_empty() || path == "/dev/null" || path == "dev/null" {
        None
    } else {
        Some(path.to_string())
    }
}
