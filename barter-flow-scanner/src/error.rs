use thiserror::Error;

/// All errors generated in `barter-flow-scanner`.
///
/// The scanning pipeline itself is infallible: malformed ticks and division by
/// zero resolve to deterministic fallbacks. Errors only surface at the
/// configuration and I/O edges.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("invalid rule bounds: {0}")]
    InvalidRuleBounds(String),

    #[error("unknown rule preset: {0}")]
    UnknownPreset(String),

    #[error("invalid config value for {key}: {value}")]
    Config { key: String, value: String },

    #[error("scanner runtime stopped")]
    RuntimeStopped,

    #[error("failed to decode market input: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScannerError {
    /// Determine if the error means the scanner can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScannerError::RuntimeStopped | ScannerError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_error_is_terminal() {
        struct TestCase {
            input: ScannerError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: runtime gone
                input: ScannerError::RuntimeStopped,
                expected: true,
            },
            TestCase {
                // TC1: bad config is recoverable by the caller
                input: ScannerError::Config {
                    key: "SCANNER_DECAY".to_string(),
                    value: "abc".to_string(),
                },
                expected: false,
            },
            TestCase {
                // TC2: a single undecodable line is skipped
                input: ScannerError::from(serde_json::from_str::<u8>("x").unwrap_err()),
                expected: false,
            },
            TestCase {
                // TC3: broken input stream
                input: ScannerError::from(std::io::Error::other("closed")),
                expected: true,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_terminal();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
