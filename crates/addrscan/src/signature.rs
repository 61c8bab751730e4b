//! Signature text compilation.
//!
//! Signature text is a whitespace separated list of tokens, each either two
//! hex digits or the wildcard `??`:
//!
//! ```text
//! 48 8B C4 55 41 54 ?? ?? 48 81 EC
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const WILDCARD: &str = "??";

/// A compiled byte pattern. `mask[i]` is `true` where `bytes[i]` must match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledSignature {
    bytes: Vec<u8>,
    mask: Vec<bool>,
}

impl CompiledSignature {
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();

        for token in pattern.split_whitespace() {
            if token == WILDCARD {
                bytes.push(0);
                mask.push(false);
                continue;
            }

            if token.len() != 2 {
                return Err(Error::invalid_pattern(
                    pattern,
                    format!("token '{}' is not two characters", token),
                ));
            }
            if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::invalid_pattern(
                    pattern,
                    format!("token '{}' is not a hex byte", token),
                ));
            }

            let value = u8::from_str_radix(token, 16)
                .map_err(|e| Error::invalid_pattern(pattern, format!("token '{}': {}", token, e)))?;
            bytes.push(value);
            mask.push(true);
        }

        if bytes.is_empty() {
            return Err(Error::invalid_pattern(pattern, "pattern is empty"));
        }

        Ok(Self { bytes, mask })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; compiled signatures have at least one token.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn literal_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Position and value of the first non-wildcard byte.
    pub fn first_literal(&self) -> Option<(usize, u8)> {
        self.mask
            .iter()
            .position(|&m| m)
            .map(|pos| (pos, self.bytes[pos]))
    }

    /// Whether the signature matches `haystack` starting at `index`.
    #[inline]
    pub fn matches_at(&self, haystack: &[u8], index: usize) -> bool {
        let Some(window) = haystack.get(index..index + self.len()) else {
            return false;
        };

        window
            .iter()
            .zip(self.bytes.iter().zip(&self.mask))
            .all(|(&actual, (&expected, &literal))| !literal || actual == expected)
    }
}

impl FromStr for CompiledSignature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CompiledSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (byte, literal)) in self.bytes.iter().zip(&self.mask).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if *literal {
                write!(f, "{:02X}", byte)?;
            } else {
                f.write_str(WILDCARD)?;
            }
        }
        Ok(())
    }
}
