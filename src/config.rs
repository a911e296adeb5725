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

//! Configuration of one HTLC instance, loaded from a TOML file.
//!
//! See `config.example.toml` at the root of the repository for a complete file.

use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use bitcoin::util::key::PublicKey;
use thiserror::Error;

use crate::blockchain::Network;
use crate::consensus;
use crate::crypto::{self, Commitment, Identity, Secret};
use crate::hash::Digest;
use crate::script::HtlcParams;
use crate::service::{counterparty, retry, EsploraClient, RetryPolicy};
use crate::swap::PaymentMode;
use crate::timelock::CSVTimelock;

/// A list of possible errors when loading the configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// The file cannot be read.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// The file is not a valid configuration.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// Neither the secret nor its commitment is set.
    #[error("Either secret or commitment must be set")]
    MissingCommitment,
    /// Both the secret and the commitment are set and do not match.
    #[error("The secret does not match the commitment")]
    CommitmentMismatch,
    /// The private key is required to spend.
    #[error("Missing private key (wif)")]
    MissingKey,
    /// Invalid contract parameter.
    #[error("Invalid parameter: {0}")]
    Consensus(#[from] consensus::Error),
    /// Invalid key material.
    #[error("Invalid key: {0}")]
    Crypto(#[from] crypto::Error),
}

/// Counterparty API access.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CounterpartyConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl Default for CounterpartyConfig {
    fn default() -> Self {
        Self {
            url: counterparty::DEFAULT_URL.into(),
            user: "rpc".into(),
            password: "1234".into(),
        }
    }
}

/// Esplora API access, defaults to the public instance of the network.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EsploraConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// Retry policy of the collaborator calls.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: retry::DEFAULT_INITIAL_DELAY.as_millis() as u64,
            max_delay_ms: retry::DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Configuration of one HTLC instance and of the services used to spend it.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub network: Network,
    /// Refund delay in confirmations.
    pub timelock: u32,
    pub payee_pubkey: PublicKey,
    pub payer_pubkey: PublicKey,
    /// This participant's private key, WIF encoded.
    #[serde(default)]
    pub wif: Option<String>,
    /// The secret as UTF-8, known by the payee.
    #[serde(default)]
    pub secret: Option<String>,
    /// The commitment, required when the secret is unknown.
    #[serde(default)]
    pub commitment: Option<Commitment>,
    pub payment: PaymentMode,
    #[serde(default)]
    pub counterparty: CounterpartyConfig,
    #[serde(default)]
    pub esplora: EsploraConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        content.parse()
    }

    pub fn secret(&self) -> Option<Secret> {
        self.secret.as_deref().map(Secret::from)
    }

    /// The commitment of the secret if known, the configured commitment otherwise. Both must
    /// agree when both are set.
    pub fn commitment(&self) -> Result<Commitment, Error> {
        match (self.secret(), self.commitment) {
            (Some(secret), Some(commitment)) if !secret.verify(&commitment) => {
                Err(Error::CommitmentMismatch)
            }
            (Some(secret), _) => Ok(secret.commitment()),
            (None, Some(commitment)) => Ok(commitment),
            (None, None) => Err(Error::MissingCommitment),
        }
    }

    /// Validate and build the contract parameters.
    pub fn htlc_params(&self) -> Result<HtlcParams, Error> {
        Ok(HtlcParams {
            payee: Digest::from_public_key(&self.payee_pubkey),
            payer: Digest::from_public_key(&self.payer_pubkey),
            commitment: self.commitment()?,
            timelock: CSVTimelock::encode(self.timelock)?,
        })
    }

    /// Load this participant's identity.
    pub fn identity(&self) -> Result<Identity, Error> {
        let wif = self.wif.as_deref().ok_or(Error::MissingKey)?;
        Ok(Identity::from_wif(wif)?)
    }

    pub fn esplora_url(&self) -> String {
        self.esplora
            .url
            .clone()
            .unwrap_or_else(|| EsploraClient::default_url(self.network).to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.into()
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
