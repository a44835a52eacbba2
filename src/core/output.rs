//! Bounded terminal rendering helpers.
//!
//! Keeps report output readable: long diagnostic lists are clipped, long
//! messages collapsed to one line.

/// Collapse whitespace and bound a message to `max_chars`.
pub fn squeeze(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Render up to `max_items` entries, noting how many were clipped.
pub fn clip_list(items: &[String], max_items: usize, max_chars: usize) -> String {
    if items.is_empty() {
        return String::new();
    }
    let shown = items
        .iter()
        .take(max_items)
        .map(|m| squeeze(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if items.len() > max_items {
        format!("{} (+{} more)", shown, items.len() - max_items)
    } else {
        shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squeeze_collapses_and_bounds() {
        assert_eq!(squeeze("a\n  b   c", 100), "a b c");
        assert_eq!(squeeze("abcdef", 3), "abc...");
    }

    #[test]
    fn test_clip_list_counts_overflow() {
        let items: Vec<String> = (0..7).map(|i| format!("m{}", i)).collect();
        let rendered = clip_list(&items, 5, 20);
        assert!(rendered.ends_with("(+2 more)"));
    }
}
