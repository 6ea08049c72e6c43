//! Locking scripts: construction of the standard output templates and classification of
//! an arbitrary script back into a [`ScriptType`] and its committed payload.

use std::fmt;
use std::io::{self, Read, Write};

use crate::encoding::Vector;
use crate::ScriptType;

/// Script opcodes used by the standard output templates.
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_CHECKSIG: u8 = 0xac;
}

use opcodes::*;

/// Appends the minimal push of `data` to `buf`.
pub fn push_data(buf: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        buf.push(len as u8);
    } else if len <= 0xff {
        buf.push(OP_PUSHDATA1);
        buf.push(len as u8);
    } else if len <= 0xffff {
        buf.push(OP_PUSHDATA2);
        buf.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        buf.push(OP_PUSHDATA4);
        buf.extend_from_slice(&(len as u32).to_le_bytes());
    }
    buf.extend_from_slice(data);
}

/// Iterates over the data pushes in a script, returning `None` for the whole script when
/// a non-push opcode or a truncated push is encountered.
pub fn parse_pushes(script: &[u8]) -> Option<Vec<&[u8]>> {
    let mut pushes = vec![];
    let mut i = 0;
    while i < script.len() {
        let op = script[i];
        i += 1;
        let len = match op {
            n if n < OP_PUSHDATA1 => n as usize,
            OP_PUSHDATA1 => {
                let n = *script.get(i)? as usize;
                i += 1;
                n
            }
            OP_PUSHDATA2 => {
                let b = script.get(i..i + 2)?;
                i += 2;
                u16::from_le_bytes([b[0], b[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let b = script.get(i..i + 4)?;
                i += 4;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
            _ => return None,
        };
        pushes.push(script.get(i..i + len)?);
        i += len;
    }
    Some(pushes)
}

/// A serialized Bitcoin script.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Script(pub Vec<u8>);

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Script").field(&hex::encode(&self.0)).finish()
    }
}

impl AsRef<[u8]> for Script {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Script {
    pub fn read<R: Read>(reader: R) -> io::Result<Self> {
        Vector::read_bytes(reader).map(Script)
    }

    pub fn write<W: Write>(&self, writer: W) -> io::Result<()> {
        Vector::write_bytes(writer, &self.0)
    }

    /// The length of this script when serialized with its CompactSize prefix.
    pub fn serialized_size(&self) -> usize {
        Vector::serialized_size_of_bytes(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds the locking script for the given script type, committing to `payload`.
    ///
    /// The payload is the public key for P2PK, the 20-byte hash for P2PKH, P2SH, P2WPKH
    /// and P2WPKH(SH) (where it is the hash of the redeem script), and the 32-byte witness
    /// program for P2WSH and P2TR. Returns `None` for types that have no such template or
    /// a payload of the wrong length.
    pub fn locking(script_type: ScriptType, payload: &[u8]) -> Option<Script> {
        let mut s = vec![];
        match (script_type, payload.len()) {
            (ScriptType::P2pkh, 20) => {
                s.extend_from_slice(&[OP_DUP, OP_HASH160]);
                push_data(&mut s, payload);
                s.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            }
            (ScriptType::P2pk, 33) | (ScriptType::P2pk, 65) => {
                push_data(&mut s, payload);
                s.push(OP_CHECKSIG);
            }
            (ScriptType::P2sh, 20) | (ScriptType::P2wpkhSh, 20) => {
                s.push(OP_HASH160);
                push_data(&mut s, payload);
                s.push(OP_EQUAL);
            }
            (ScriptType::P2wpkh, 20) | (ScriptType::P2wsh, 32) => {
                s.push(OP_0);
                push_data(&mut s, payload);
            }
            (ScriptType::P2tr, 32) => {
                s.push(OP_1);
                push_data(&mut s, payload);
            }
            _ => return None,
        }
        Some(Script(s))
    }

    /// Builds a witness program script for the given version and program bytes.
    pub fn witness_program(version: u8, program: &[u8]) -> Option<Script> {
        if version > 16 || !(2..=40).contains(&program.len()) {
            return None;
        }
        let mut s = vec![if version == 0 { OP_0 } else { OP_1 + version - 1 }];
        push_data(&mut s, program);
        Some(Script(s))
    }

    /// Builds an `OP_RETURN` output script carrying the given pushes.
    pub fn null_data<'a>(pushes: impl IntoIterator<Item = &'a [u8]>) -> Script {
        let mut s = vec![OP_RETURN];
        for p in pushes {
            push_data(&mut s, p);
        }
        Script(s)
    }

    /// Returns the P2WPKH program nested in a P2WPKH(SH) redeem script for the given
    /// public key hash.
    pub fn nested_witness_redeem_script(pubkey_hash: &[u8; 20]) -> Script {
        let mut s = vec![OP_0];
        push_data(&mut s, pubkey_hash);
        Script(s)
    }

    /// Classifies this script into one of the standard templates.
    ///
    /// A P2SH output cannot be distinguished from a nested SegWit output by its locking
    /// script alone, so this always reports [`ScriptType::P2sh`] for those.
    pub fn script_type(&self) -> ScriptType {
        self.classify().map_or(ScriptType::Unknown, |(t, _)| t)
    }

    /// Returns the script type and the payload it commits to, as accepted by
    /// [`Script::locking`].
    pub fn classify(&self) -> Option<(ScriptType, &[u8])> {
        let s = &self.0[..];
        match s {
            [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
                Some((ScriptType::P2pkh, hash))
            }
            [OP_HASH160, 20, hash @ .., OP_EQUAL] if hash.len() == 20 => {
                Some((ScriptType::P2sh, hash))
            }
            [OP_0, 20, program @ ..] if program.len() == 20 => Some((ScriptType::P2wpkh, program)),
            [OP_0, 32, program @ ..] if program.len() == 32 => Some((ScriptType::P2wsh, program)),
            [OP_1, 32, program @ ..] if program.len() == 32 => Some((ScriptType::P2tr, program)),
            [len, key @ .., OP_CHECKSIG]
                if (*len == 33 || *len == 65) && key.len() == *len as usize =>
            {
                Some((ScriptType::P2pk, key))
            }
            [OP_RETURN, rest @ ..] => Some((ScriptType::NullData, rest)),
            _ => None,
        }
    }

    /// Returns the data pushes of an `OP_RETURN` output, or `None` if this is not a
    /// push-only null-data script.
    pub fn null_data_pushes(&self) -> Option<Vec<&[u8]>> {
        match self.0.split_first() {
            Some((&OP_RETURN, rest)) => parse_pushes(rest),
            _ => None,
        }
    }
}
