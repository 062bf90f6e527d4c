//! Wake word matching
//!
//! Splits a transcript into the wake token and the spoken command that follows it.
//! Matching is case-insensitive and requires the token to sit on word boundaries
//! at both ends, so a token embedded in a longer word ("computerized",
//! "supercomputer") is not an occurrence at all.

/// Outcome of matching a transcript against the wake token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeMatch {
    /// Wake token not present as a whole word
    NoMatch,
    /// Wake token present with nothing after it
    Empty,
    /// Command text following the wake token, original casing preserved
    Command(String),
}

impl WakeMatch {
    /// Command text, if any
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Command(text) => Some(text),
            Self::NoMatch | Self::Empty => None,
        }
    }
}

/// Matches transcripts against a single wake token
#[derive(Debug, Clone)]
pub struct WakeWordMatcher {
    token: String,
}

impl WakeWordMatcher {
    /// Create a matcher for the given wake token
    ///
    /// The token is trimmed and lowercased.
    #[must_use]
    pub fn new(token: &str) -> Self {
        let token = token.trim().to_lowercase();
        tracing::debug!(wake_word = %token, "wake word matcher initialized");
        Self { token }
    }

    /// The normalized wake token
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Match a transcript
    ///
    /// The first whole-word occurrence of the token splits the transcript; any
    /// text before it (filler words) is ignored. Embedded occurrences are skipped
    /// rather than ending the search, so `"computerized computer: go"` yields
    /// `Command("go")`.
    #[must_use]
    pub fn match_transcript(&self, transcript: &str) -> WakeMatch {
        if self.token.is_empty() {
            return WakeMatch::NoMatch;
        }

        let mut previous: Option<char> = None;
        for (start, current) in transcript.char_indices() {
            let at_boundary = previous.is_none_or(is_separator);
            previous = Some(current);
            if !at_boundary {
                continue;
            }
            let Some(len) = prefix_len_ci(&transcript[start..], &self.token) else {
                continue;
            };

            let rest = &transcript[start + len..];
            match rest.chars().next() {
                None => return WakeMatch::Empty,
                Some(c) if is_separator(c) => {
                    let command = rest.trim_start_matches(is_separator).trim_end();
                    if command.is_empty() {
                        return WakeMatch::Empty;
                    }
                    tracing::debug!(wake_word = %self.token, command, "wake word matched");
                    return WakeMatch::Command(command.to_string());
                }
                Some(_) => {}
            }
        }

        WakeMatch::NoMatch
    }
}

/// Byte length of `haystack`'s prefix that equals `needle` ignoring case
fn prefix_len_ci(haystack: &str, needle: &str) -> Option<usize> {
    let mut hay = haystack.char_indices();
    let mut consumed = 0;

    for n in needle.chars() {
        let (idx, h) = hay.next()?;
        if !h.to_lowercase().eq(n.to_lowercase()) {
            return None;
        }
        consumed = idx + h.len_utf8();
    }

    Some(consumed)
}

fn is_separator(c: char) -> bool {
    c.is_whitespace()
        || c.is_ascii_punctuation()
        || matches!(c, '…' | '—' | '–' | '“' | '”' | '‘' | '’' | '¿' | '¡' | '«' | '»')
}
