//! Canonical pair identity and exclusion matching.
//!
//! Every pair of same-type units maps to a single key
//! `"{type}|{a}|{b}"` with `a <= b` lexicographically, so the key is
//! independent of pair order. Labels are chosen per unit-type to survive
//! reformatting:
//!
//! - CLASS: the repo-relative file path
//! - FUNCTION: `"{qualifiedName}(arity:{N})"`
//! - BLOCK: SHA-1 of the code with comments and whitespace stripped
//!
//! Class excludes are path-based and matched as globs; function and block
//! excludes are content-derived and matched exactly, so a sloppy pattern
//! can never mass-exclude them.

use globset::GlobBuilder;
use sha1::{Digest, Sha1};

use crate::types::{IndexUnit, UnitType, UnitSummary};

/// Canonical label for one side of a pair key.
pub fn unit_label(unit_type: UnitType, name: &str, file_path: &str, code: &str) -> String {
    match unit_type {
        UnitType::Class => file_path.to_string(),
        UnitType::Function => canonical_function_signature(name, code),
        UnitType::Block => block_content_hash(code),
    }
}

/// Canonical, order-insensitive key for a pair of same-type units.
///
/// Returns `None` when the unit types differ; such pairs are never formed.
pub fn pair_key_for_units(left: &IndexUnit, right: &IndexUnit) -> Option<String> {
    if left.unit_type != right.unit_type {
        return None;
    }
    let a = unit_label(left.unit_type, &left.name, &left.file_path, &left.code);
    let b = unit_label(right.unit_type, &right.name, &right.file_path, &right.code);
    Some(compose_key(left.unit_type, a, b))
}

/// Pair key for report-carried unit summaries.
pub fn pair_key_for_summaries(left: &UnitSummary, right: &UnitSummary) -> Option<String> {
    if left.unit_type != right.unit_type {
        return None;
    }
    let a = unit_label(left.unit_type, &left.name, &left.file_path, &left.code);
    let b = unit_label(right.unit_type, &right.name, &right.file_path, &right.code);
    Some(compose_key(left.unit_type, a, b))
}

fn compose_key(unit_type: UnitType, a: String, b: String) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}|{}|{}", unit_type.as_str(), first, second)
}

/// Parse a pair key into `(type, a, b)` in canonical sorted form.
///
/// Returns `None` on malformed input: wrong part count or unknown type.
pub fn parse_pair_key(key: &str) -> Option<(UnitType, String, String)> {
    let mut parts = key.split('|');
    let unit_type = UnitType::parse(parts.next()?)?;
    let a = parts.next()?.to_string();
    let b = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }
    if a <= b {
        Some((unit_type, a, b))
    } else {
        Some((unit_type, b, a))
    }
}

/// Match an actual pair key against a user-supplied exclude pattern.
///
/// CLASS patterns glob both sides (dot-files allowed) in both orderings;
/// FUNCTION and BLOCK patterns compare exactly in both orderings.
pub fn pair_key_matches(actual: &str, pattern: &str) -> bool {
    let Some((actual_type, aa, ab)) = parse_pair_key(actual) else {
        return false;
    };
    let Some((pattern_type, pa, pb)) = parse_pair_key(pattern) else {
        return false;
    };
    if actual_type != pattern_type {
        return false;
    }

    match actual_type {
        UnitType::Class => {
            (glob_matches(&pa, &aa) && glob_matches(&pb, &ab))
                || (glob_matches(&pa, &ab) && glob_matches(&pb, &aa))
        }
        UnitType::Function | UnitType::Block => {
            (pa == aa && pb == ab) || (pa == ab && pb == aa)
        }
    }
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    match GlobBuilder::new(pattern).build() {
        Ok(glob) => glob.compile_matcher().is_match(value),
        Err(_) => pattern == value,
    }
}

// ---------------------------------------------------------------------------
// Function signatures
// ---------------------------------------------------------------------------

/// `"{qualifiedName}(arity:{N})"` where N is the parameter count parsed from
/// the first `(...)` in the code.
///
/// Reformatting and body edits leave the signature unchanged; renaming the
/// qualifier invalidates it, which is intentional.
pub fn canonical_function_signature(qualified_name: &str, code: &str) -> String {
    format!("{}(arity:{})", qualified_name, parameter_arity(code))
}

/// Count comma-separated parameters inside the first parenthesized group.
///
/// Nested parentheses (annotation arguments, lambda defaults) do not split
/// parameters. An empty group is arity 0.
fn parameter_arity(code: &str) -> usize {
    let Some(open) = code.find('(') else {
        return 0;
    };

    let mut depth = 0usize;
    let mut commas = 0usize;
    let mut non_whitespace = false;
    for ch in code[open..].chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            ',' if depth == 1 => commas += 1,
            c if depth >= 1 && !c.is_whitespace() => non_whitespace = true,
            _ => {}
        }
    }

    if non_whitespace {
        commas + 1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Block hashes
// ---------------------------------------------------------------------------

/// SHA-1 hex digest of block code with comments and all whitespace removed.
///
/// Two blocks differing only in comments or layout hash identically.
pub fn block_content_hash(code: &str) -> String {
    let normalized = strip_comments_and_whitespace(code);
    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Remove `//` line comments, `/* */` block comments, and every whitespace
/// character. String and char literals are preserved verbatim so comment
/// markers inside them are not treated as comments.
fn strip_comments_and_whitespace(code: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Normal,
        LineComment,
        BlockComment,
        Str,
        Char,
    }

    let mut out = String::with_capacity(code.len());
    let mut state = State::Normal;
    let mut chars = code.chars().peekable();

    while let Some(ch) = chars.next() {
        match state {
            State::Normal => match ch {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                '"' => {
                    out.push(ch);
                    state = State::Str;
                }
                '\'' => {
                    out.push(ch);
                    state = State::Char;
                }
                c if c.is_whitespace() => {}
                c => out.push(c),
            },
            State::LineComment => {
                if ch == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Normal;
                }
            }
            State::Str => {
                out.push(ch);
                if ch == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if ch == '"' {
                    state = State::Normal;
                }
            }
            State::Char => {
                out.push(ch);
                if ch == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if ch == '\'' {
                    state = State::Normal;
                }
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Short ids
// ---------------------------------------------------------------------------

/// Opaque per-report identifier for a duplicate group.
///
/// First 12 hex chars of the SHA-1 of the group id; stable for a given pair
/// of unit ids, short enough to type.
pub fn short_id(group_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(group_id.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}
