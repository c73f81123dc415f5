//! Program store
//!
//! A `Program` is the immutable snapshot of a loaded instruction/data stream.
//! Machines copy it into working memory on construction and on every reset,
//! so it is the sole source of truth for re-runs.

use std::str::FromStr;

use crate::error::MachineError;

/// Immutable, ordered sequence of signed integer words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    words: Vec<i64>,
}

impl Program {
    /// Parse a program from its text form: one line of comma-separated
    /// base-10 signed integers. Surrounding whitespace is trimmed, and
    /// whitespace around individual words is tolerated.
    pub fn parse(text: &str) -> Result<Self, MachineError> {
        let words = text
            .trim()
            .split(',')
            .map(|token| {
                let token = token.trim();
                token
                    .parse::<i64>()
                    .map_err(|_| MachineError::InvalidProgramText {
                        token: token.to_string(),
                    })
            })
            .collect::<Result<Vec<i64>, MachineError>>()?;

        Ok(Self { words })
    }

    pub fn words(&self) -> &[i64] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl FromStr for Program {
    type Err = MachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_words() {
        let program = Program::parse("1,9,10,3,2,3,11,0,99,30,40,50").unwrap();
        assert_eq!(program.words()[..4], [1, 9, 10, 3]);
        assert_eq!(program.len(), 12);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let program = Program::parse("  109, -1 ,99\n").unwrap();
        assert_eq!(program.words(), &[109, -1, 99]);
    }

    #[test]
    fn rejects_non_integer_tokens() {
        let err = Program::parse("1,two,3").unwrap_err();
        assert_eq!(
            err,
            MachineError::InvalidProgramText {
                token: "two".to_string()
            }
        );
    }

    #[test]
    fn parses_via_from_str() {
        let program: Program = "104,0,99".parse().unwrap();
        assert_eq!(program.words(), &[104, 0, 99]);
    }
}
