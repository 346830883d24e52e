//! Runestone codec
//!
//! A runestone is the rune protocol message carried in an OP_RETURN output:
//!
//! ```text
//! OP_RETURN OP_PUSHNUM_13 <payload push>...
//! ```
//!
//! The payload is a sequence of LEB128 integers read as `tag value` pairs. Tag
//! zero (`Body`) ends the fields and starts the edict list, four integers per
//! edict. Odd tags are optional and skipped when unknown; even tags are
//! mandatory and an unknown even tag makes the message invalid.
//!
//! # Security Considerations
//!
//! `decode` parses data observed on chain. It never indexes past the end of the
//! input, never panics, and reports every malformation as a [`CodecError`].
//! Callers scanning foreign transactions treat a `CodecError` as "not a rune".
//!
//! # Usage
//!
//! ```
//! use runeforge_common::runestone::{Etching, Runestone};
//!
//! let runestone = Runestone {
//!     etching: Some(Etching {
//!         rune: Some("TEST".parse().unwrap()),
//!         divisibility: Some(8),
//!         premine: Some(1_000_000),
//!         ..Default::default()
//!     }),
//!     ..Default::default()
//! };
//!
//! let payload = runestone.encode().unwrap();
//! assert_eq!(Runestone::decode(&payload).unwrap(), runestone);
//! ```

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{self, Instruction, PushBytes, Script, ScriptBuf};
use bitcoin::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::logging::{log_codec, LogLevel};

pub mod rune;
pub mod varint;

pub use rune::{Rune, RuneId, SpacedRune};

/// Protocol identifier following OP_RETURN.
pub const MAGIC_NUMBER: opcodes::All = opcodes::all::OP_PUSHNUM_13;

/// Ceiling for the data carried by the OP_RETURN output, magic included.
pub const MAX_OP_RETURN_DATA: usize = 80;

/// Bytes taken by the magic marker.
pub const MAGIC_LEN: usize = 1;

/// Maximum decimal places a rune may declare.
pub const MAX_DIVISIBILITY: u8 = 38;

/// Spacers may sit after any of the first 27 letters.
pub const MAX_SPACERS: u32 = 0b0000_0111_1111_1111_1111_1111_1111_1111;

/// Errors produced while encoding or decoding runestones
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload of {size} bytes exceeds the {max}-byte OP_RETURN limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("varint is not terminated")]
    VarintUnterminated,

    #[error("varint is longer than 19 bytes")]
    VarintOverlong,

    #[error("varint overflows 128 bits")]
    VarintOverflow,

    #[error("tag {0} has no value")]
    TruncatedField(u128),

    #[error("tag {0} appears more than once")]
    DuplicateTag(u128),

    #[error("unrecognized even tag {0}")]
    UnrecognizedEvenTag(u128),

    #[error("unrecognized flags {0:#x}")]
    UnrecognizedFlag(u128),

    #[error("tag {0} present without the flag that enables it")]
    FieldWithoutFlag(u128),

    #[error("value {value} out of range for tag {tag}")]
    ValueOutOfRange { tag: u128, value: u128 },

    #[error("divisibility {0} exceeds maximum of 38")]
    DivisibilityOutOfRange(u128),

    #[error("spacers {0:#x} exceed maximum")]
    SpacersOutOfRange(u128),

    #[error("symbol {0:#x} is not a valid character")]
    InvalidSymbol(u128),

    #[error("premine plus minted supply overflows")]
    SupplyOverflow,

    #[error("invalid rune id")]
    InvalidRuneId,

    #[error("edict body has {0} trailing integers")]
    TrailingIntegers(usize),

    #[error("invalid rune name: {0}")]
    InvalidRuneName(String),

    #[error("script contains a non-push opcode after the protocol marker")]
    Opcode,

    #[error("script could not be parsed")]
    InvalidScript,
}

/// Payload field tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Body = 0,
    Divisibility = 1,
    Flags = 2,
    Spacers = 3,
    Rune = 4,
    Symbol = 5,
    Premine = 6,
    Cap = 8,
    Amount = 10,
    HeightStart = 12,
    HeightEnd = 14,
    OffsetStart = 16,
    OffsetEnd = 18,
    Mint = 20,
    Pointer = 22,
    Nop = 127,
}

impl Tag {
    const KNOWN: [Tag; 16] = [
        Tag::Body,
        Tag::Divisibility,
        Tag::Flags,
        Tag::Spacers,
        Tag::Rune,
        Tag::Symbol,
        Tag::Premine,
        Tag::Cap,
        Tag::Amount,
        Tag::HeightStart,
        Tag::HeightEnd,
        Tag::OffsetStart,
        Tag::OffsetEnd,
        Tag::Mint,
        Tag::Pointer,
        Tag::Nop,
    ];

    fn from_u128(value: u128) -> Option<Tag> {
        Self::KNOWN.iter().copied().find(|tag| u128::from(*tag) == value)
    }

    fn encode(self, value: u128, payload: &mut Vec<u8>) {
        varint::encode_to_vec(self.into(), payload);
        varint::encode_to_vec(value, payload);
    }

    fn encode_option<T: Into<u128>>(self, value: Option<T>, payload: &mut Vec<u8>) {
        if let Some(value) = value {
            self.encode(value.into(), payload);
        }
    }
}

impl From<Tag> for u128 {
    fn from(tag: Tag) -> Self {
        tag as u128
    }
}

/// Bits of the `Flags` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Etching = 0,
    Terms = 1,
    Turbo = 2,
}

impl Flag {
    fn mask(self) -> u128 {
        1 << self as u128
    }

    fn take(self, flags: &mut u128) -> bool {
        let set = *flags & self.mask() != 0;
        *flags &= !self.mask();
        set
    }

    fn set(self, flags: &mut u128) {
        *flags |= self.mask()
    }
}

/// Open-mint terms of an etching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Terms {
    /// Units minted per mint transaction
    pub amount: Option<u128>,
    /// Maximum number of mints
    pub cap: Option<u128>,
    /// Absolute block height window (start, end)
    pub height: (Option<u64>, Option<u64>),
    /// Window relative to the etching block (start, end)
    pub offset: (Option<u64>, Option<u64>),
}

impl Terms {
    /// Total units that open minting can ever create.
    pub fn mintable(&self) -> Option<u128> {
        self.cap.unwrap_or_default().checked_mul(self.amount.unwrap_or_default())
    }
}

/// Definition of a new rune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Etching {
    pub divisibility: Option<u8>,
    pub premine: Option<u128>,
    pub rune: Option<Rune>,
    pub spacers: Option<u32>,
    pub symbol: Option<char>,
    pub terms: Option<Terms>,
    pub turbo: bool,
}

impl Etching {
    /// Maximum supply, `None` on overflow.
    pub fn supply(&self) -> Option<u128> {
        let premine = self.premine.unwrap_or_default();
        let mintable = match self.terms {
            Some(terms) => terms.mintable()?,
            None => 0,
        };
        premine.checked_add(mintable)
    }

    /// The spaced name, if the etching names its rune.
    pub fn spaced_rune(&self) -> Option<SpacedRune> {
        self.rune
            .map(|rune| SpacedRune::new(rune, self.spacers.unwrap_or_default()))
    }
}

/// Transfer of runes to an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edict {
    pub id: RuneId,
    pub amount: u128,
    pub output: u32,
}

/// The decoded rune protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Runestone {
    pub edicts: Vec<Edict>,
    pub etching: Option<Etching>,
    pub mint: Option<RuneId>,
    pub pointer: Option<u32>,
}

impl Runestone {
    /// Encode the payload (without the OP_RETURN and magic prefix).
    ///
    /// Fails with [`CodecError::PayloadTooLarge`] when magic plus payload does
    /// not fit in [`MAX_OP_RETURN_DATA`] bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();

        if let Some(etching) = self.etching {
            check_etching_ranges(&etching)?;

            let mut flags = 0;
            Flag::Etching.set(&mut flags);
            if etching.terms.is_some() {
                Flag::Terms.set(&mut flags);
            }
            if etching.turbo {
                Flag::Turbo.set(&mut flags);
            }

            Tag::Flags.encode(flags, &mut payload);
            Tag::Rune.encode_option(etching.rune.map(|rune| rune.0), &mut payload);
            Tag::Divisibility.encode_option(etching.divisibility, &mut payload);
            Tag::Spacers.encode_option(etching.spacers, &mut payload);
            Tag::Symbol.encode_option(etching.symbol, &mut payload);
            Tag::Premine.encode_option(etching.premine, &mut payload);

            if let Some(terms) = etching.terms {
                Tag::Amount.encode_option(terms.amount, &mut payload);
                Tag::Cap.encode_option(terms.cap, &mut payload);
                Tag::HeightStart.encode_option(terms.height.0, &mut payload);
                Tag::HeightEnd.encode_option(terms.height.1, &mut payload);
                Tag::OffsetStart.encode_option(terms.offset.0, &mut payload);
                Tag::OffsetEnd.encode_option(terms.offset.1, &mut payload);
            }
        }

        if let Some(id) = self.mint {
            if RuneId::new(id.block, id.tx).is_none() {
                return Err(CodecError::InvalidRuneId);
            }
            Tag::Mint.encode(id.block.into(), &mut payload);
            Tag::Mint.encode(id.tx.into(), &mut payload);
        }

        Tag::Pointer.encode_option(self.pointer, &mut payload);

        if !self.edicts.is_empty() {
            varint::encode_to_vec(Tag::Body.into(), &mut payload);

            let mut edicts = self.edicts.clone();
            edicts.sort_by_key(|edict| edict.id);

            let mut previous = RuneId::default();
            for edict in edicts {
                let (block, tx) = previous.delta(edict.id).ok_or(CodecError::InvalidRuneId)?;
                varint::encode_to_vec(block, &mut payload);
                varint::encode_to_vec(tx, &mut payload);
                varint::encode_to_vec(edict.amount, &mut payload);
                varint::encode_to_vec(edict.output.into(), &mut payload);
                previous = edict.id;
            }
        }

        let size = MAGIC_LEN + payload.len();
        if size > MAX_OP_RETURN_DATA {
            log_codec(
                LogLevel::Warn,
                "runestone does not fit in an OP_RETURN",
                Some(json!({ "size": size, "max": MAX_OP_RETURN_DATA })),
            );
            return Err(CodecError::PayloadTooLarge {
                size,
                max: MAX_OP_RETURN_DATA,
            });
        }

        Ok(payload)
    }

    /// Decode a payload produced by [`Runestone::encode`] or read from chain.
    pub fn decode(payload: &[u8]) -> Result<Runestone, CodecError> {
        let integers = varint::decode_all(payload)?;

        let mut fields: BTreeMap<u128, Vec<u128>> = BTreeMap::new();
        let mut body = None;
        let mut i = 0;

        while i < integers.len() {
            let tag = integers[i];

            if tag == u128::from(Tag::Body) {
                body = Some(&integers[i + 1..]);
                break;
            }

            let value = *integers.get(i + 1).ok_or(CodecError::TruncatedField(tag))?;
            fields.entry(tag).or_default().push(value);
            i += 2;
        }

        for (&tag, values) in &fields {
            match Tag::from_u128(tag) {
                Some(Tag::Mint) => {
                    if values.len() != 2 {
                        return Err(CodecError::DuplicateTag(tag));
                    }
                }
                Some(Tag::Nop) => {}
                Some(_) => {
                    if values.len() > 1 {
                        return Err(CodecError::DuplicateTag(tag));
                    }
                }
                None if tag % 2 == 0 => return Err(CodecError::UnrecognizedEvenTag(tag)),
                None => {}
            }
        }

        let single = |tag: Tag| fields.get(&u128::from(tag)).map(|values| values[0]);

        let mut flags = single(Tag::Flags).unwrap_or_default();
        let has_etching = Flag::Etching.take(&mut flags);
        let has_terms = Flag::Terms.take(&mut flags);
        let turbo = Flag::Turbo.take(&mut flags);

        if flags != 0 {
            return Err(CodecError::UnrecognizedFlag(flags));
        }

        if has_terms && !has_etching {
            return Err(CodecError::FieldWithoutFlag(u128::from(Tag::Flags)));
        }

        let etching = if has_etching {
            let etching = Etching {
                divisibility: single(Tag::Divisibility)
                    .map(|value| {
                        u8::try_from(value)
                            .ok()
                            .filter(|d| *d <= MAX_DIVISIBILITY)
                            .ok_or(CodecError::DivisibilityOutOfRange(value))
                    })
                    .transpose()?,
                premine: single(Tag::Premine),
                rune: single(Tag::Rune).map(Rune),
                spacers: single(Tag::Spacers)
                    .map(|value| {
                        u32::try_from(value)
                            .ok()
                            .filter(|s| *s <= MAX_SPACERS)
                            .ok_or(CodecError::SpacersOutOfRange(value))
                    })
                    .transpose()?,
                symbol: single(Tag::Symbol)
                    .map(|value| {
                        u32::try_from(value)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or(CodecError::InvalidSymbol(value))
                    })
                    .transpose()?,
                terms: if has_terms {
                    Some(Terms {
                        amount: single(Tag::Amount),
                        cap: single(Tag::Cap),
                        height: (
                            single_u64(&single, Tag::HeightStart)?,
                            single_u64(&single, Tag::HeightEnd)?,
                        ),
                        offset: (
                            single_u64(&single, Tag::OffsetStart)?,
                            single_u64(&single, Tag::OffsetEnd)?,
                        ),
                    })
                } else {
                    None
                },
                turbo,
            };

            if etching.supply().is_none() {
                return Err(CodecError::SupplyOverflow);
            }

            Some(etching)
        } else {
            None
        };

        // even etching fields are meaningless without the flags enabling them
        let etching_tags = [Tag::Rune, Tag::Premine];
        let terms_tags = [
            Tag::Cap,
            Tag::Amount,
            Tag::HeightStart,
            Tag::HeightEnd,
            Tag::OffsetStart,
            Tag::OffsetEnd,
        ];
        for tag in etching_tags.iter().filter(|_| !has_etching) {
            if single(*tag).is_some() {
                return Err(CodecError::FieldWithoutFlag(u128::from(*tag)));
            }
        }
        for tag in terms_tags.iter().filter(|_| !has_terms) {
            if single(*tag).is_some() {
                return Err(CodecError::FieldWithoutFlag(u128::from(*tag)));
            }
        }

        let mint = match fields.get(&u128::from(Tag::Mint)) {
            Some(values) => {
                let block = u64::try_from(values[0]).map_err(|_| CodecError::ValueOutOfRange {
                    tag: Tag::Mint.into(),
                    value: values[0],
                })?;
                let tx = u32::try_from(values[1]).map_err(|_| CodecError::ValueOutOfRange {
                    tag: Tag::Mint.into(),
                    value: values[1],
                })?;
                Some(RuneId::new(block, tx).ok_or(CodecError::InvalidRuneId)?)
            }
            None => None,
        };

        let pointer = single(Tag::Pointer)
            .map(|value| {
                u32::try_from(value).map_err(|_| CodecError::ValueOutOfRange {
                    tag: Tag::Pointer.into(),
                    value,
                })
            })
            .transpose()?;

        let edicts = match body {
            Some(integers) => decode_edicts(integers)?,
            None => Vec::new(),
        };

        Ok(Runestone {
            edicts,
            etching,
            mint,
            pointer,
        })
    }

    /// Build the complete OP_RETURN script.
    pub fn to_script(&self) -> Result<ScriptBuf, CodecError> {
        let payload = self.encode()?;

        let push: &PushBytes = payload
            .as_slice()
            .try_into()
            .map_err(|_| CodecError::PayloadTooLarge {
                size: MAGIC_LEN + payload.len(),
                max: MAX_OP_RETURN_DATA,
            })?;

        Ok(script::Builder::new()
            .push_opcode(opcodes::all::OP_RETURN)
            .push_opcode(MAGIC_NUMBER)
            .push_slice(push)
            .into_script())
    }

    /// Extract the payload from a script.
    ///
    /// Returns `Ok(None)` for scripts that are not runestones at all.
    pub fn payload_from_script(script: &Script) -> Result<Option<Vec<u8>>, CodecError> {
        let mut instructions = script.instructions();

        if instructions.next() != Some(Ok(Instruction::Op(opcodes::all::OP_RETURN))) {
            return Ok(None);
        }

        if instructions.next() != Some(Ok(Instruction::Op(MAGIC_NUMBER))) {
            return Ok(None);
        }

        let mut payload = Vec::new();
        for result in instructions {
            match result {
                Ok(Instruction::PushBytes(push)) => payload.extend_from_slice(push.as_bytes()),
                Ok(Instruction::Op(_)) => return Err(CodecError::Opcode),
                Err(_) => return Err(CodecError::InvalidScript),
            }
        }

        Ok(Some(payload))
    }

    /// Decode the runestone carried by `script`, if any.
    pub fn from_script(script: &Script) -> Result<Option<Runestone>, CodecError> {
        match Self::payload_from_script(script)? {
            Some(payload) => Self::decode(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Find and decode the first runestone output of a transaction.
    pub fn decipher(transaction: &Transaction) -> Result<Option<Runestone>, CodecError> {
        for output in &transaction.output {
            if let Some(payload) = Self::payload_from_script(&output.script_pubkey)? {
                return Self::decode(&payload).map(Some).map_err(|e| {
                    log_codec(
                        LogLevel::Debug,
                        "malformed runestone",
                        Some(json!({ "txid": transaction.txid().to_string(), "error": e.to_string() })),
                    );
                    e
                });
            }
        }
        Ok(None)
    }
}

fn single_u64(
    single: &impl Fn(Tag) -> Option<u128>,
    tag: Tag,
) -> Result<Option<u64>, CodecError> {
    single(tag)
        .map(|value| {
            u64::try_from(value).map_err(|_| CodecError::ValueOutOfRange {
                tag: tag.into(),
                value,
            })
        })
        .transpose()
}

fn decode_edicts(integers: &[u128]) -> Result<Vec<Edict>, CodecError> {
    let remainder = integers.len() % 4;
    if remainder != 0 {
        return Err(CodecError::TrailingIntegers(remainder));
    }

    let mut edicts = Vec::with_capacity(integers.len() / 4);
    let mut id = RuneId::default();

    for chunk in integers.chunks_exact(4) {
        id = id.next(chunk[0], chunk[1]).ok_or(CodecError::InvalidRuneId)?;
        let output = u32::try_from(chunk[3]).map_err(|_| CodecError::ValueOutOfRange {
            tag: Tag::Body.into(),
            value: chunk[3],
        })?;
        edicts.push(Edict {
            id,
            amount: chunk[2],
            output,
        });
    }

    Ok(edicts)
}

fn check_etching_ranges(etching: &Etching) -> Result<(), CodecError> {
    if let Some(divisibility) = etching.divisibility {
        if divisibility > MAX_DIVISIBILITY {
            return Err(CodecError::DivisibilityOutOfRange(divisibility.into()));
        }
    }

    if let Some(spacers) = etching.spacers {
        if spacers > MAX_SPACERS {
            return Err(CodecError::SpacersOutOfRange(spacers.into()));
        }
    }

    if etching.supply().is_none() {
        return Err(CodecError::SupplyOverflow);
    }

    Ok(())
}
