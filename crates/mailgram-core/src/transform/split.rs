//! Splitting long text into message-sized chunks.

/// Telegram's text message limit, in characters.
pub const TELEGRAM_TEXT_LIMIT: usize = 4096;

/// Default chunk size; leaves room for the part marker.
pub const DEFAULT_MAX_CHUNK: usize = TELEGRAM_TEXT_LIMIT - 30;

/// Splits `text` into chunks of at most `max` characters.
///
/// A chunk ends after the last line break inside the window when there is
/// one (a break at the very start does not count), otherwise it is cut hard
/// at `max` characters. Blank lines following a line-break cut are dropped.
/// When more than one chunk results, each gets a `\n(part i/N)` suffix that
/// is not counted against `max`.
///
/// Empty input yields a single empty chunk.
#[must_use]
pub fn split_for_delivery(text: &str, max: usize) -> Vec<String> {
    let pieces = split_raw(text, max);
    let total = pieces.len();
    if total <= 1 {
        return vec![pieces.first().copied().unwrap_or_default().to_string()];
    }
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| format!("{piece}\n{}", part_marker(i + 1, total)))
        .collect()
}

/// Marker appended to a chunk of a multi-part split.
#[must_use]
pub fn part_marker(index: usize, total: usize) -> String {
    format!("(part {index}/{total})")
}

fn split_raw(text: &str, max: usize) -> Vec<&str> {
    let max = max.max(1);
    let mut pieces = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let Some((window_end, _)) = rest.char_indices().nth(max) else {
            pieces.push(rest);
            break;
        };

        let window = &rest[..window_end];
        match window.rfind('\n') {
            Some(newline) if newline > 0 => {
                let cut = newline + 1;
                pieces.push(&rest[..cut]);
                rest = rest[cut..].trim_start_matches('\n');
            }
            _ => {
                pieces.push(window);
                rest = &rest[window_end..];
            }
        }
    }

    pieces
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strip_marker(chunk: &str, total: usize) -> &str {
        if total <= 1 {
            return chunk;
        }
        let (body, marker) = chunk.rsplit_once('\n').unwrap();
        assert!(marker.starts_with("(part ") && marker.ends_with(&format!("/{total})")));
        body
    }

    #[test]
    fn test_empty_input_is_one_empty_chunk() {
        assert_eq!(split_for_delivery("", 10), vec![String::new()]);
    }

    #[test]
    fn test_fitting_text_has_no_marker() {
        assert_eq!(split_for_delivery("hello", 5), vec!["hello".to_string()]);
    }

    #[test]
    fn test_cuts_after_last_newline() {
        let chunks = split_for_delivery("aaaa\nbbbb\ncccc", 12);
        assert_eq!(
            chunks,
            vec!["aaaa\nbbbb\n\n(part 1/2)", "cccc\n(part 2/2)"]
        );
    }

    #[test]
    fn test_hard_cut_without_newline() {
        let chunks = split_for_delivery("abcdefghij", 4);
        assert_eq!(
            chunks,
            vec!["abcd\n(part 1/3)", "efgh\n(part 2/3)", "ij\n(part 3/3)"]
        );
    }

    #[test]
    fn test_leading_newline_does_not_count() {
        let chunks = split_for_delivery("\nabcdef", 4);
        assert_eq!(chunks[0], "\nabc\n(part 1/2)");
    }

    #[test]
    fn test_blank_lines_after_cut_are_dropped() {
        let chunks = split_for_delivery("abc\n\n\n\ndef", 5);
        assert_eq!(chunks, vec!["abc\n\n\n(part 1/2)", "def\n(part 2/2)"]);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "é".repeat(10);
        let chunks = split_for_delivery(&text, 5);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("ééééé\n"));
    }

    #[test]
    fn test_nine_thousand_chars_default() {
        let text = "x".repeat(9000);
        assert_eq!(
            split_for_delivery(&text, DEFAULT_MAX_CHUNK).len(),
            9000_usize.div_ceil(DEFAULT_MAX_CHUNK)
        );
    }

    /// `true` if `joined` is `text` with some newlines removed, each of them
    /// directly after another newline of `text`.
    fn drops_only_repeated_newlines(text: &str, joined: &str) -> bool {
        let mut expected = joined.chars().peekable();
        let mut previous = None;
        for ch in text.chars() {
            if expected.peek() == Some(&ch) {
                expected.next();
            } else if ch != '\n' || previous != Some('\n') {
                return false;
            }
            previous = Some(ch);
        }
        expected.next().is_none()
    }

    #[test]
    fn test_drops_only_repeated_newlines() {
        assert!(drops_only_repeated_newlines("a\n\n\nb", "a\nb"));
        assert!(drops_only_repeated_newlines("a\nb", "a\nb"));
        assert!(!drops_only_repeated_newlines("a\nb", "ab"));
        assert!(!drops_only_repeated_newlines("ab", "a"));
    }

    proptest! {
        #[test]
        fn prop_chunks_fit_and_lose_only_blank_lines(
            text in "([a-zé ]{0,12}\n{0,3}){0,40}",
            max in 1usize..30,
        ) {
            let chunks = split_for_delivery(&text, max);
            let total = chunks.len();
            let mut joined = String::new();
            for chunk in &chunks {
                let body = strip_marker(chunk, total);
                prop_assert!(total == 1 || body.chars().count() <= max);
                joined.push_str(body);
            }
            prop_assert!(drops_only_repeated_newlines(&text, &joined));
        }

        #[test]
        fn prop_chunks_reassemble_without_blank_lines(
            text in "([a-zé ]{1,12}\n?){0,40}",
            max in 1usize..30,
        ) {
            let chunks = split_for_delivery(&text, max);
            let total = chunks.len();
            let joined: String = chunks.iter().map(|c| strip_marker(c, total)).collect();
            prop_assert_eq!(joined, text);
        }
    }
}
