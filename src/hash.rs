// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Content-hash and push-data encoding primitives shared by the script compiler, the address
//! deriver and the spend finalizer.
//!
//! The content-hash used everywhere is `HASH160`, i.e. `RIPEMD160(SHA256(data))`, the same
//! function the `OP_HASH160` opcode computes on-chain.

use std::fmt;
use std::str::FromStr;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{read_scriptint, Builder, Instruction};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::util::key::PublicKey;

use serde::ser::{Serialize, Serializer};
use serde::{de, Deserialize, Deserializer};

use crate::consensus::{self, CanonicalBytes};

/// Length in bytes of a `HASH160` digest.
pub const HASH160_LEN: usize = 20;

/// Computes `RIPEMD160(SHA256(data))`.
pub fn hash160(data: &[u8]) -> [u8; HASH160_LEN] {
    hash160::Hash::hash(data).into_inner()
}

/// The 20-byte content-hash of a participant public key, called the recipient digest. The
/// locking script only commits to digests, public keys are revealed when spending.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; HASH160_LEN]);

impl Digest {
    /// Create a digest from raw bytes, fails if the slice is not exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, consensus::Error> {
        let mut inner = [0u8; HASH160_LEN];
        if bytes.len() != HASH160_LEN {
            return Err(consensus::Error::InvalidDigestLength(bytes.len()));
        }
        inner.copy_from_slice(bytes);
        Ok(Self(inner))
    }

    /// Derive the recipient digest of a public key, serialized as it will be revealed in the
    /// unlocking stack.
    pub fn from_public_key(pubkey: &PublicKey) -> Self {
        Self(hash160(&pubkey.to_bytes()))
    }

    /// Return the inner bytes.
    pub fn to_bytes(&self) -> [u8; HASH160_LEN] {
        self.0
    }
}

impl From<[u8; HASH160_LEN]> for Digest {
    fn from(bytes: [u8; HASH160_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

impl FromStr for Digest {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        consensus::from_hex(s)
    }
}

impl CanonicalBytes for Digest {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        Self::from_slice(bytes)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Digest, D::Error>
    where
        D: Deserializer<'de>,
    {
        Digest::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

/// Push data on the builder with the minimal encoding required by the standardness rules for
/// unlocking scripts: the empty vector becomes `OP_0`, a single byte in `1..=16` becomes
/// `OP_1..OP_16`, `0x81` becomes `OP_1NEGATE`, everything else the smallest direct push.
///
/// The value left on the stack by the interpreter is the same in every case.
pub fn push_minimal(builder: Builder, data: &[u8]) -> Builder {
    match data {
        [] => builder.push_int(0),
        [n @ 1..=16] => builder.push_int(*n as i64),
        [0x81] => builder.push_int(-1),
        _ => builder.push_slice(data),
    }
}

/// Return the stack element a push instruction leaves on the stack, or `None` if the
/// instruction is not a push.
pub fn pushed_value(instruction: &Instruction) -> Option<Vec<u8>> {
    match instruction {
        Instruction::PushBytes(bytes) => Some(bytes.to_vec()),
        Instruction::Op(op) => {
            let code = op.into_u8();
            let one = opcodes::all::OP_PUSHNUM_1.into_u8();
            let sixteen = opcodes::all::OP_PUSHNUM_16.into_u8();
            if code >= one && code <= sixteen {
                Some(vec![code - one + 1])
            } else if *op == opcodes::all::OP_PUSHNUM_NEG1 {
                Some(vec![0x81])
            } else {
                None
            }
        }
    }
}

/// Decode a script number pushed by the instruction, as `OP_0`, `OP_1..OP_16` or a direct push
/// of a minimally encoded little-endian sign-magnitude number up to 4 bytes.
pub fn read_script_number(instruction: &Instruction) -> Result<i64, consensus::Error> {
    match instruction {
        Instruction::PushBytes(bytes) => read_scriptint(bytes)
            .map_err(|_| consensus::Error::ParseFailed("Invalid script number")),
        Instruction::Op(_) => match pushed_value(instruction) {
            Some(v) if v == [0x81] => Ok(-1),
            Some(v) => Ok(v[0] as i64),
            None => Err(consensus::Error::ParseFailed("Not a script number push")),
        },
    }
}
