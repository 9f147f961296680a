//! Identifier synthesis.

use once_cell::sync::Lazy;
use regex::Regex;

static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z])([A-Z0-9])").expect("camel boundary pattern"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.\-/;]").expect("separator pattern"));
static NON_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("ident pattern"));

/// Upper-case the first character.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// PascalCase a name, treating every non-alphanumeric character as a word
/// break: `"device-name"` → `"DeviceName"`.
pub fn pascal(s: &str) -> String {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(capitalize)
        .collect()
}

/// Name for a schema nested under `parent` at `child`.
pub fn nested_name(parent: &str, child: &str) -> String {
    format!("{}{}", pascal(parent), pascal(child))
}

/// Safe constant identifier for an enum value.
///
/// Keeps the last `:`-separated segment, spells `+` as `_plus`, turns `.`,
/// `-`, `/` and `;` into `_`, breaks camelCase with `_`, upper-cases, and
/// prefixes `V` when the result would start with a digit.
pub fn enum_key(value: &str) -> String {
    let last = value.rsplit(':').next().unwrap_or(value);
    let key = last.replace('+', "_plus");
    let key = SEPARATORS.replace_all(&key, "_");
    let key = CAMEL_BOUNDARY.replace_all(&key, "${1}_${2}");
    let key = NON_IDENT.replace_all(&key, "_").to_uppercase();

    match key.chars().next() {
        None => "EMPTY".to_string(),
        Some(c) if c.is_ascii_digit() => format!("V{}", key),
        Some(_) => key,
    }
}
