//! Rune names, spaced names and rune identifiers.
//!
//! A rune name is a modified base-26 integer: `A` is 0, `Z` is 25, `AA` is 26
//! and so on. Spacers are carried separately as a bitfield where bit `i` means
//! "a spacer follows letter `i`".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::CodecError;

/// Characters accepted as spacers in a spaced rune string.
pub const SPACER_CHARS: [char; 2] = ['•', '.'];

/// Canonical spacer used when displaying a spaced rune.
pub const SPACER: char = '•';

/// Returns true if `c` is accepted as a spacer.
pub fn is_spacer(c: char) -> bool {
    SPACER_CHARS.contains(&c)
}

/// A rune name encoded as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Rune(pub u128);

impl Rune {
    /// Number of letters in the display form of this rune.
    pub fn letter_count(self) -> usize {
        self.to_string().len()
    }
}

impl fmt::Display for Rune {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut n = self.0;
        if n == u128::MAX {
            return write!(f, "BCGDENLQRQWDSLRUGSNLBTMFIJAV");
        }

        n += 1;
        let mut letters = Vec::new();
        while n > 0 {
            let index = ((n - 1) % 26) as u8;
            letters.push(char::from(b'A' + index));
            n = (n - 1) / 26;
        }

        letters.iter().rev().try_for_each(|c| write!(f, "{}", c))
    }
}

impl FromStr for Rune {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(CodecError::InvalidRuneName(s.to_string()));
        }

        let mut x = 0u128;
        for (i, c) in s.chars().enumerate() {
            if i > 0 {
                x = x
                    .checked_add(1)
                    .ok_or_else(|| CodecError::InvalidRuneName(s.to_string()))?;
            }
            x = x
                .checked_mul(26)
                .ok_or_else(|| CodecError::InvalidRuneName(s.to_string()))?;
            match c {
                'A'..='Z' => {
                    x = x
                        .checked_add(u128::from(c as u8 - b'A'))
                        .ok_or_else(|| CodecError::InvalidRuneName(s.to_string()))?;
                }
                _ => return Err(CodecError::InvalidRuneName(s.to_string())),
            }
        }

        Ok(Rune(x))
    }
}

/// A rune together with its spacer bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SpacedRune {
    pub rune: Rune,
    pub spacers: u32,
}

impl SpacedRune {
    pub fn new(rune: Rune, spacers: u32) -> Self {
        Self { rune, spacers }
    }
}

impl FromStr for SpacedRune {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut letters = String::new();
        let mut spacers = 0u32;

        for c in s.chars() {
            if c.is_ascii_uppercase() {
                letters.push(c);
            } else if is_spacer(c) {
                let flag = letters
                    .len()
                    .checked_sub(1)
                    .and_then(|shift| u32::try_from(shift).ok())
                    .and_then(|shift| 1u32.checked_shl(shift))
                    .ok_or_else(|| CodecError::InvalidRuneName(s.to_string()))?;

                if spacers & flag != 0 {
                    return Err(CodecError::InvalidRuneName(s.to_string()));
                }
                spacers |= flag;
            } else {
                return Err(CodecError::InvalidRuneName(s.to_string()));
            }
        }

        // a spacer after the final letter is a trailing spacer
        if letters.is_empty() || 32 - spacers.leading_zeros() >= letters.len() as u32 {
            return Err(CodecError::InvalidRuneName(s.to_string()));
        }

        Ok(SpacedRune {
            rune: letters.parse()?,
            spacers,
        })
    }
}

impl fmt::Display for SpacedRune {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rune = self.rune.to_string();

        for (i, c) in rune.chars().enumerate() {
            write!(f, "{}", c)?;

            if i < rune.len() - 1 && self.spacers & (1 << i) != 0 {
                write!(f, "{}", SPACER)?;
            }
        }

        Ok(())
    }
}

/// Identifier of an etched rune: the block height and transaction index of
/// its etching transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RuneId {
    pub block: u64,
    pub tx: u32,
}

impl RuneId {
    /// Returns `None` for the invalid `block == 0, tx > 0` combination.
    pub fn new(block: u64, tx: u32) -> Option<Self> {
        let id = RuneId { block, tx };
        if id.block == 0 && id.tx > 0 {
            return None;
        }
        Some(id)
    }

    /// Delta from `self` to `next` as written in an edict body.
    pub fn delta(self, next: RuneId) -> Option<(u128, u128)> {
        let block = next.block.checked_sub(self.block)?;

        let tx = if block == 0 {
            next.tx.checked_sub(self.tx)?
        } else {
            next.tx
        };

        Some((block.into(), tx.into()))
    }

    /// Apply an edict delta to `self`.
    pub fn next(self, block: u128, tx: u128) -> Option<RuneId> {
        RuneId::new(
            self.block.checked_add(block.try_into().ok()?)?,
            if block == 0 {
                self.tx.checked_add(tx.try_into().ok()?)?
            } else {
                tx.try_into().ok()?
            },
        )
    }
}

impl fmt::Display for RuneId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.tx)
    }
}
