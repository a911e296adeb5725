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

//! Hashlock Core library
//!
//! A two-party Hash-Time-Locked Contract (HTLC) engine for Bitcoin-like UTXO ledgers. Funds sent
//! to the contract's P2SH address can be claimed by the payee revealing a secret preimage, or
//! refunded to the payer once a relative timelock has matured.
//!
//! The crate is organized leaves first:
//!
//! - [`hash`] and [`consensus`]: content-hash and push-data encoding primitives,
//! - [`timelock`]: BIP-68 relative timelock encoding,
//! - [`script`]: the two-branch locking script compiler,
//! - [`address`]: P2SH address derivation,
//! - [`transaction`]: spend assembly, signing and branch finalization,
//! - [`service`]: external collaborators (transaction templates, UTXOs, broadcast),
//! - [`swap`]: the orchestrator tying everything into one pipeline.
//!
//! ```rust
//! use hashlock_core::blockchain::Network;
//! use hashlock_core::crypto::Secret;
//! use hashlock_core::script::LockingScript;
//! use hashlock_core::timelock::CSVTimelock;
//!
//!# fn main() -> Result<(), hashlock_core::Error> {
//! let secret = Secret::from("swap-secret");
//! let timelock = CSVTimelock::encode(10)?;
//! let script = LockingScript::compile(
//!     &[0u8; 20],
//!     &[0x11u8; 20],
//!     secret.commitment().as_ref(),
//!     timelock,
//! )?;
//! let address = hashlock_core::address::derive(&script, Network::Testnet);
//! assert_eq!("2Mx9P4FTMPxrh7ggipRxWxzaVCV4MbmHBMX", address.to_string());
//!# Ok(())
//!# }
//! ```

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate serde;

use thiserror::Error;

pub mod address;
pub mod blockchain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod hash;
pub mod script;
pub mod service;
pub mod swap;
pub mod timelock;
pub mod transaction;

/// A list of possible errors when preparing, finalizing or broadcasting an HTLC spend with the
/// **Hashlock** stack. Each error can have multiple level down to the collaborator
/// implementation.
#[derive(Error, Debug)]
pub enum Error {
    /// An encoding error: bad digest, commitment or timelock, or a script not following the
    /// contract template.
    #[error("Consensus error: {0}")]
    Consensus(#[from] consensus::Error),
    /// A cryptographic error during key manipulation.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] crypto::Error),
    /// A spend transaction error, finalizer invoked out of order or invalid inputs.
    #[error("Transaction error: {0}")]
    Transaction(#[from] transaction::Error),
    /// An external collaborator error.
    #[error("Service error: {0}")]
    Service(#[from] service::Error),
    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),
}

/// The categories of failures an orchestrator can react to. Only [`ErrorCategory::Network`] is
/// worth retrying, everything else is terminal for the current request.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[display(Debug)]
pub enum ErrorCategory {
    /// Bad digest, commitment, timelock or script; never retried.
    Encoding,
    /// Transient transport failure; retried with backoff, then surfaced.
    Network,
    /// Well-formed error returned by a collaborator; surfaced immediately.
    Response,
    /// Finalizer invoked out of order, or preimage mismatch.
    State,
    /// The submitter rejected the transaction; the transaction itself remains valid.
    Broadcast,
    /// Invalid local configuration or key material.
    Config,
}

impl Error {
    /// Return the category of the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Consensus(_) => ErrorCategory::Encoding,
            Self::Crypto(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Transaction(_) => ErrorCategory::State,
            Self::Service(e) => e.category(),
        }
    }
}
