use std::borrow::Cow;

use itertools::Itertools;
use regex::Regex;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Flags for [`normalize_text`]. Each step is independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub lowercase: bool,
    pub strip_accents: bool,
    pub trim: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            lowercase: true,
            strip_accents: true,
            trim: true,
        }
    }
}

/// Returns a lowercase representation, reusing the original string if already lowercase.
pub fn lowercase(input: &str) -> Cow<'_, str> {
    if input.chars().all(|ch| !ch.is_uppercase()) {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(input.to_lowercase())
    }
}

/// Trims leading/trailing whitespace while borrowing the original when unchanged.
pub fn trim(input: &str) -> Cow<'_, str> {
    Cow::Borrowed(input.trim())
}

/// Trims and folds every internal whitespace run into a single space.
pub fn collapse_whitespace(input: &str) -> Cow<'_, str> {
    let collapsed = input.split_whitespace().join(" ");
    if collapsed == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(collapsed)
    }
}

/// Decomposes to NFD and drops combining marks (`José` -> `Jose`).
pub fn strip_accents(input: &str) -> Cow<'_, str> {
    if input.is_ascii() {
        return Cow::Borrowed(input);
    }
    Cow::Owned(input.nfd().filter(|c| !is_combining_mark(*c)).collect())
}

/// Accent stripping, then lowercasing, then whitespace trimming. The fixed
/// order makes the result a fixed point for every flag combination.
pub fn normalize_text(input: &str, options: NormalizeOptions) -> String {
    let mut text = input.to_string();
    if options.strip_accents
        && let Cow::Owned(stripped) = strip_accents(&text)
    {
        text = stripped;
    }
    if options.lowercase
        && let Cow::Owned(lowered) = lowercase(&text)
    {
        text = lowered;
    }
    if options.trim
        && let Cow::Owned(collapsed) = collapse_whitespace(&text)
    {
        text = collapsed;
    }
    text
}

/// Applies a regex replacement while avoiding allocation when there are no matches.
pub fn regex_replace<'a>(value: &'a str, regex: &Regex, replacement: &str) -> Cow<'a, str> {
    if regex.is_match(value) {
        Cow::Owned(regex.replace_all(value, replacement).into_owned())
    } else {
        Cow::Borrowed(value)
    }
}

/// Removes every non-overlapping match, leaving surrounding text untouched.
pub fn remove_matches<'a>(value: &'a str, regex: &Regex) -> Cow<'a, str> {
    regex_replace(value, regex, "")
}

/// Drops leading zeros from all-digit strings; `"000"` becomes `"0"`.
pub fn strip_leading_zeros(value: &str) -> Cow<'_, str> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Cow::Borrowed(value);
    }
    let stripped = value.trim_start_matches('0');
    if stripped.is_empty() {
        Cow::Borrowed("0")
    } else {
        Cow::Borrowed(stripped)
    }
}

/// Splits on `delimiter` and trims every part.
pub fn split_trimmed<'a>(value: &'a str, delimiter: &str) -> Vec<&'a str> {
    value.split(delimiter).map(str::trim).collect()
}

/// Returns the trimmed part at `index`, if present.
pub fn split_part<'a>(value: &'a str, delimiter: &str, index: usize) -> Option<&'a str> {
    split_trimmed(value, delimiter).get(index).copied()
}

/// Joins the trimmed parts from `start` onwards, if there are any.
pub fn split_rest(value: &str, delimiter: &str, start: usize, join_with: &str) -> Option<String> {
    let parts = split_trimmed(value, delimiter);
    if parts.len() > start {
        Some(parts[start..].join(join_with))
    } else {
        None
    }
}
