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

//! Consensus encoding errors and the canonical bytes representation used to exchange contract
//! parameters (digests, commitments, timelocks and scripts) between participants.
//!
//! Implementation on blockchain foreign types with [`CanonicalBytes`] must follow the strict
//! consensus encoding from the blockchain itself, without any length prefix.

use thiserror::Error;

use std::error;
use std::io;

/// Encoding and decoding errors and data validation errors raised while building the contract.
/// These errors are always fatal to the current request and are never retried.
#[derive(Error, Debug)]
pub enum Error {
    /// A recipient digest is not exactly 20 bytes long.
    #[error("Invalid recipient digest length: {0} bytes, expected 20")]
    InvalidDigestLength(usize),
    /// A hash commitment is not exactly 20 bytes long.
    #[error("Invalid commitment length: {0} bytes, expected 20")]
    InvalidCommitmentLength(usize),
    /// The requested relative delay is not representable as a block-based relative timelock.
    #[error("Timelock out of range: {0}")]
    TimelockOutOfRange(u32),
    /// The script does not follow the expected contract template.
    #[error("Wrong script template: {0}")]
    WrongTemplate(&'static str),
    /// The type is not defined in the consensus.
    #[error("Unknown consensus type")]
    UnknownType,
    /// And I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// A generic parsing error.
    #[error("Parsing error: {0}")]
    ParseFailed(&'static str),
    /// Any Consensus error not part of this list.
    #[error("Consensus error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new error of type [`Self::Other`] with an arbitrary payload. Useful to carry
    /// lower-level errors.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Error`, returning its inner error (if any).
    ///
    /// If this [`enum@Error`] was constructed via [`new`] then this function will return [`Some`],
    /// otherwise it will return [`None`].
    ///
    /// [`new`]: Error::new
    ///
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }
}

/// Data represented in a canonical bytes format. The implementer **MUST** use the strict encoding
/// dictated by the blockchain consensus without any length prefix.
pub trait CanonicalBytes {
    /// Returns the canonical bytes representation of the element.
    fn as_canonical_bytes(&self) -> Vec<u8>;

    /// Parse a supposedly canonical bytes representation of an element and return it, return an
    /// error if not canonical.
    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized;
}

impl<T> CanonicalBytes for Option<T>
where
    T: CanonicalBytes,
{
    fn as_canonical_bytes(&self) -> Vec<u8> {
        match self {
            Some(t) => t.as_canonical_bytes(),
            None => vec![],
        }
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized,
    {
        match bytes.len() {
            0 => Ok(None),
            _ => Ok(Some(T::from_canonical_bytes(bytes)?)),
        }
    }
}

impl CanonicalBytes for bitcoin::Transaction {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        bitcoin::consensus::encode::serialize(self)
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized,
    {
        bitcoin::consensus::encode::deserialize(bytes).map_err(Error::new)
    }
}

/// Decode a hex string into a canonical element.
pub fn from_hex<T: CanonicalBytes>(s: &str) -> Result<T, Error> {
    let bytes = hex::decode(s.trim()).map_err(|_| Error::ParseFailed("Invalid hex string"))?;
    T::from_canonical_bytes(&bytes)
}

/// Encode a canonical element into a hex string.
pub fn to_hex<T: CanonicalBytes + ?Sized>(data: &T) -> String {
    hex::encode(data.as_canonical_bytes())
}
