//! Make upstream response bodies safe to store in errors and logs.

/// Longest body excerpt kept in an error, in characters.
pub const MAX_EXCERPT_CHARS: usize = 500;

const SECRET_PREFIXES: [&str; 2] = ["sk-", "Bearer "];
const REDACTED: &str = "[REDACTED]";

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Replace API-key-looking tokens (`sk-...`, `Bearer ...`) with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    let mut out = input.to_string();

    for prefix in SECRET_PREFIXES {
        let mut from = 0;
        while let Some(rel) = out[from..].find(prefix) {
            let start = from + rel;
            let token_start = start + prefix.len();
            let token_len: usize = out[token_start..]
                .chars()
                .take_while(|c| is_token_char(*c))
                .map(char::len_utf8)
                .sum();

            // A bare prefix is just text.
            if token_len == 0 {
                from = token_start;
                continue;
            }

            out.replace_range(token_start..token_start + token_len, REDACTED);
            from = token_start + REDACTED.len();
        }
    }

    out
}

/// Redact and cut `body` to at most `max_chars` characters, marking the cut with `...`.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    let redacted = redact_secrets(body.trim());
    match redacted.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &redacted[..cut]),
        None => redacted,
    }
}

/// [`excerpt`] with the default limit.
pub fn body_excerpt(body: &str) -> String {
    excerpt(body, MAX_EXCERPT_CHARS)
}
