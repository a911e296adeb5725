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

//! Relative timelock unit and encoding to use in the contract script (`OP_CSV` operand) and in
//! the refund input `nSequence` field.
//!
//! Only the block-based mode of BIP-68 is produced: the type flag (bit 22) and the disable flag
//! (bit 31) are cleared and the number of confirmations is stored in the low 16 bits.

use crate::consensus::{self, CanonicalBytes};

use std::fmt::Debug;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer};

/// Highest number of confirmations a block-based relative timelock can express.
pub const MAX_CONFIRMATIONS: u32 = 0xffff;

/// Sequence value of inputs that do not enforce any relative timelock.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

impl FromStr for CSVTimelock {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let x = s
            .trim_end_matches(" blocks")
            .parse::<u32>()
            .map_err(|_| consensus::Error::ParseFailed("Failed parsing CSV timelock"))?;
        CSVTimelock::encode(x)
    }
}

/// An `OP_CSV` value (32-bits integer) to use in transactions and scripts, always block-based.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug, Copy, Display, Serialize)]
#[display("{0} blocks")]
pub struct CSVTimelock(u32);

impl CSVTimelock {
    /// Encode a relative delay expressed in number of confirmations. Fails with
    /// [`consensus::Error::TimelockOutOfRange`] above [`MAX_CONFIRMATIONS`].
    pub fn encode(confirmations: u32) -> Result<Self, consensus::Error> {
        if confirmations > MAX_CONFIRMATIONS {
            return Err(consensus::Error::TimelockOutOfRange(confirmations));
        }
        Ok(Self(confirmations & SEQUENCE_LOCKTIME_MASK))
    }

    /// Decode a raw sequence value, the exact inverse of [`CSVTimelock::encode`]. Fails if the
    /// value is disabled, time-based or has bits set outside the block count.
    pub fn decode(sequence: u32) -> Result<Self, consensus::Error> {
        let timelock = Self(sequence);
        timelock.confirmations()?;
        Ok(timelock)
    }

    /// Return the number of confirmations the timelock enforces.
    pub fn confirmations(&self) -> Result<u16, consensus::Error> {
        if self.0 & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0
            || self.0 & SEQUENCE_LOCKTIME_TYPE_FLAG != 0
            || self.0 & !SEQUENCE_LOCKTIME_MASK != 0
        {
            return Err(consensus::Error::TimelockOutOfRange(self.0));
        }
        Ok((self.0 & SEQUENCE_LOCKTIME_MASK) as u16)
    }

    /// Return the value of the check sequence verify.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Return the value of nSequence that disable `CHECK_SEQUENCE_VERIFY`.
    pub fn disable() -> u32 {
        SEQUENCE_LOCKTIME_DISABLE_FLAG
    }
}

impl<'de> Deserialize<'de> for CSVTimelock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        CSVTimelock::decode(value).map_err(de::Error::custom)
    }
}

impl CanonicalBytes for CSVTimelock {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        bitcoin::consensus::encode::serialize(&self.0)
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        CSVTimelock::decode(
            bitcoin::consensus::encode::deserialize(bytes).map_err(consensus::Error::new)?,
        )
    }
}
