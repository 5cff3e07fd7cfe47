//! Keeps transition details and failure reasons to a single bounded line.

/// Longest detail written into one transition log record.
pub const DETAIL_CHAR_LIMIT: usize = 240;

const ELLIPSIS: &str = "...";

/// Collapses whitespace runs (including newlines from HTTP error bodies) into
/// single spaces and cuts the result to at most `limit` characters.
///
/// Returns the flattened text and whether it was cut.
pub fn single_line(text: &str, limit: usize) -> (String, bool) {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= limit {
        return (flattened, false);
    }

    let keep = limit.saturating_sub(ELLIPSIS.len());
    let mut truncated: String = flattened.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    (truncated, true)
}

/// [`single_line`] with the log record limit, discarding the flag.
pub fn detail(text: &str) -> String {
    single_line(text, DETAIL_CHAR_LIMIT).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through() {
        let (result, truncated) = single_line("rate limited", 20);
        assert_eq!(result, "rate limited");
        assert!(!truncated);
    }

    #[test]
    fn newlines_are_flattened() {
        let body = "{\n  \"error\": \"agent not found\"\n}\n";
        assert_eq!(detail(body), "{ \"error\": \"agent not found\" }");
    }

    #[test]
    fn long_text_is_cut_with_ellipsis() {
        let body = "x".repeat(500);
        let (result, truncated) = single_line(&body, 40);
        assert!(truncated);
        assert_eq!(result.chars().count(), 40);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let body = "é".repeat(30);
        let (result, truncated) = single_line(&body, 10);
        assert!(truncated);
        assert_eq!(result, format!("{}...", "é".repeat(7)));
    }
}
