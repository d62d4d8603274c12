//! Greedy word wrap with a pluggable width measure.

/// Width of `text` in characters.
///
/// Used for the plain-text `max_line_length` mode.
pub fn char_width(text: &str) -> u32 {
    text.chars().count() as u32
}

/// Wrap `text` into lines no wider than `max_width` according to `measure`.
///
/// A single word wider than `max_width` is emitted on its own line rather
/// than split or dropped. Non-empty input always yields at least one line.
pub fn wrap<M>(text: &str, max_width: u32, measure: M) -> Vec<String>
where
    M: Fn(&str) -> u32,
{
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }

        let candidate = format!("{current} {word}");
        if measure(&candidate) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }

    lines
}
