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

//! Participant key material and the hash commitment of the contract.
//!
//! A [`Secret`] is only known by the payee until the claim transaction reveals it on-chain, the
//! [`Commitment`] embedded in the script is always derived from it and never stored on its own
//! when the secret is known.

use std::error;
use std::fmt;
use std::str::FromStr;

use bitcoin::secp256k1::{ecdsa::Signature, Message, Secp256k1, SecretKey};
use bitcoin::util::key::{PrivateKey, PublicKey};

use serde::ser::{Serialize, Serializer};
use serde::{de, Deserialize, Deserializer};
use thiserror::Error;

use crate::consensus::{self, CanonicalBytes};
use crate::hash::{hash160, Digest, HASH160_LEN};

/// List of cryptographic errors that can be encountered when loading key material or signing.
#[derive(Error, Debug)]
pub enum Error {
    /// The key material cannot be decoded or is not valid.
    #[error("The key is not valid")]
    InvalidKey,
    /// Any cryptographic error not part of this list.
    #[error("Cryptographic error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new cryptographic error of type [`Self::Other`] with an arbitrary payload.
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

/// The preimage revealed by the payee to claim the funds. Arbitrary bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Return the secret bytes as they are pushed in the unlocking stack.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Compute the commitment to embed in the locking script.
    pub fn commitment(&self) -> Commitment {
        Commitment(hash160(&self.0))
    }

    /// Check that the secret opens the given commitment.
    pub fn verify(&self, commitment: &Commitment) -> bool {
        &self.commitment() == commitment
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.0.len())
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Secret {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl AsRef<[u8]> for Secret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The 20-byte `HASH160` of a [`Secret`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment([u8; HASH160_LEN]);

impl Commitment {
    /// Create a commitment from raw bytes, fails with
    /// [`consensus::Error::InvalidCommitmentLength`] if not exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, consensus::Error> {
        if bytes.len() != HASH160_LEN {
            return Err(consensus::Error::InvalidCommitmentLength(bytes.len()));
        }
        let mut inner = [0u8; HASH160_LEN];
        inner.copy_from_slice(bytes);
        Ok(Self(inner))
    }

    pub fn to_bytes(&self) -> [u8; HASH160_LEN] {
        self.0
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Commitment({})", self)
    }
}

impl FromStr for Commitment {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        consensus::from_hex(s)
    }
}

impl CanonicalBytes for Commitment {
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

impl Serialize for Commitment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Commitment {
    fn deserialize<D>(deserializer: D) -> Result<Commitment, D::Error>
    where
        D: Deserializer<'de>,
    {
        Commitment::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

/// A participant signing capability: secret key, public key and the recipient digest of the
/// public key. Created once and never mutated.
#[derive(Clone)]
pub struct Identity {
    secret_key: SecretKey,
    public_key: PublicKey,
    digest: Digest,
}

impl Identity {
    /// Load an identity from a secret key, the public key is serialized compressed.
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(
            &secp,
            &secret_key,
        ));
        Self::from_parts(secret_key, public_key)
    }

    /// Load an identity from a WIF encoded private key. The compression flag of the WIF decides
    /// how the public key is revealed and thus hashed.
    pub fn from_wif(wif: &str) -> Result<Self, Error> {
        let private_key = PrivateKey::from_wif(wif.trim()).map_err(|_| Error::InvalidKey)?;
        let secp = Secp256k1::signing_only();
        let public_key = private_key.public_key(&secp);
        Ok(Self::from_parts(private_key.inner, public_key))
    }

    fn from_parts(secret_key: SecretKey, public_key: PublicKey) -> Self {
        Self {
            secret_key,
            digest: Digest::from_public_key(&public_key),
            public_key,
        }
    }

    /// The public identifier revealed in the unlocking stack.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The recipient digest committed in the locking script.
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Produce a low-R ECDSA signature over a 32-byte signature hash.
    pub fn sign(&self, sighash: &[u8]) -> Result<Signature, Error> {
        let message = Message::from_slice(sighash).map_err(Error::new)?;
        let secp = Secp256k1::signing_only();
        Ok(secp.sign_ecdsa_low_r(&message, &self.secret_key))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .field("digest", &self.digest)
            .finish()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for Identity {}
