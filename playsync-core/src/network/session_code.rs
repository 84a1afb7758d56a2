//! Session Code Generation and Parsing
//!
//! Human-friendly codes naming the gossipsub topic a coordinator and its
//! clients share.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Characters used in session codes (unambiguous, uppercase)
/// Excludes: 0/O, 1/I/L, 5/S, 2/Z to avoid confusion
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

/// Session code length (8 chars = ~282 trillion combinations with 27-char alphabet)
const CODE_LENGTH: usize = 8;

/// A session code clients use to find their coordinator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

impl SessionCode {
    /// Generate a random session code
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let code = (0..CODE_LENGTH)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        SessionCode(code)
    }

    /// Get the normalized code (no separator)
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a session code from user input
    ///
    /// Normalizes to uppercase, drops separators and validates the alphabet.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() != CODE_LENGTH {
            return None;
        }

        if normalized.bytes().all(|b| ALPHABET.contains(&b)) {
            Some(SessionCode(normalized))
        } else {
            None
        }
    }

    /// Gossipsub topic for this session
    pub fn topic(&self) -> String {
        format!("playsync-session-{}", self.0)
    }
}

impl FromStr for SessionCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::InvalidSessionCode(s.to_string()))
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // XXXX-XXXX for readability
        write!(f, "{}-{}", &self.0[..4], &self.0[4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_code_parse() {
        let code = SessionCode::parse("ABCD-EFGH").unwrap();
        assert_eq!(code.as_str(), "ABCDEFGH");

        let code = SessionCode::parse("abcd efgh").unwrap();
        assert_eq!(code.as_str(), "ABCDEFGH");

        assert!(SessionCode::parse("ABC").is_none());
        assert!(SessionCode::parse("ABCDEFGHJ").is_none());
        // 0 and O are not in the alphabet
        assert!(SessionCode::parse("ABCD-EFG0").is_none());
    }

    #[test]
    fn test_session_code_display_and_topic() {
        let code: SessionCode = "abcdefgh".parse().unwrap();
        assert_eq!(code.to_string(), "ABCD-EFGH");
        assert_eq!(code.topic(), "playsync-session-ABCDEFGH");
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        let err = "nope".parse::<SessionCode>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidSessionCode(s) if s == "nope"));
    }

    #[test]
    fn test_random_code() {
        let code1 = SessionCode::random();
        let code2 = SessionCode::random();
        assert_ne!(code1, code2);
        assert_eq!(code1.as_str().len(), 8);
        assert!(SessionCode::parse(code1.as_str()).is_some());
    }
}
