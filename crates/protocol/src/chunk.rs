//! Reply chunking by UTF-8 byte budget.

/// Hard per-message ceiling enforced by the platform.
pub const TRANSPORT_MAX_BYTES: usize = 2048;

/// Default chunk budget; leaves room for the `[i/n] ` prefix and status glyphs.
pub const DEFAULT_CHUNK_BYTES: usize = 1500;

/// Split `text` into ordered pieces of at most `max_bytes` bytes each,
/// never cutting inside a code point. Concatenating the pieces yields `text`.
///
/// A character wider than `max_bytes` (possible only for budgets under 4)
/// is emitted alone as an over-budget piece.
pub fn split(text: &str, max_bytes: usize) -> Vec<&str> {
    if text.len() <= max_bytes {
        return vec![text];
    }

    let mut chunks = Vec::with_capacity(text.len() / max_bytes.max(1) + 1);
    let mut rest = text;
    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(text: &str, max: usize) -> Vec<&str> {
        let chunks = split(text, max);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(
                chunk.len() <= max || chunk.chars().count() == 1,
                "chunk too long"
            );
            assert!(!chunk.is_empty() || text.is_empty());
        }
        chunks
    }

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split("hello", 1500), vec!["hello"]);
        assert_eq!(split("", 1500), vec![""]);
        let exact = "a".repeat(1500);
        assert_eq!(split(&exact, 1500), vec![exact.as_str()]);
    }

    #[test]
    fn ascii_splits_at_budget() {
        let text = "a".repeat(3001);
        let chunks = check(&text, 1500);
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            vec![1500, 1500, 1]
        );
    }

    #[test]
    fn never_splits_inside_code_point() {
        // Three-byte characters against a budget that is not a multiple of 3.
        let text = "中文消息".repeat(200);
        let chunks = check(&text, 1000);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() % 3 == 0));
        assert_eq!(chunks[0].len(), 999);
    }

    #[test]
    fn mixed_widths_reassemble() {
        let text = "ok ✅ 完成 🚀 done ".repeat(300);
        for max in [5, 7, 64, 1500, 2047] {
            check(&text, max);
        }
    }

    #[test]
    fn small_budgets_are_respected() {
        assert_eq!(check("abcdef", 2), vec!["ab", "cd", "ef"]);
        assert_eq!(check("abc", 1), vec!["a", "b", "c"]);
    }

    #[test]
    fn character_wider_than_budget_stands_alone() {
        assert_eq!(check("🚀🚀", 1), vec!["🚀", "🚀"]);
        assert_eq!(check("a中b", 2), vec!["a", "中", "b"]);
    }
}
