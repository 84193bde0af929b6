/// Glyph some managers print when a column was too narrow for its value.
pub const ELLIPSIS: char = '…';

pub fn truncated(text: &str) -> bool {
    text.contains(ELLIPSIS)
}

pub fn strip_ellipsis(text: &str) -> String {
    text.replace(ELLIPSIS, "")
}

/// Derives a readable display name from a package id, for managers whose
/// output carries no separate name column.
pub fn format_as_name(id: &str) -> String {
    let cleaned = id
        .replace(".install", "")
        .replace(".portable", "")
        .replace(['-', '_'], " ");
    let last_segment = cleaned.rsplit('/').next().unwrap_or(cleaned.as_str());

    last_segment
        .split(' ')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
