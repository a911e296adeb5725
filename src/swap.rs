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

//! HTLC orchestrator: one contract instance and the single pipeline spending it.
//!
//! ```text
//! resolve UTXO ─┐
//!               ├─> assemble ─> sign ─> finalize ══> broadcast
//! template ─────┘
//! ```
//!
//! The UTXO and the template are independent reads and are fetched concurrently, each under the
//! retry policy. [`Htlc::prepare`] never writes to the network: [`Htlc::broadcast`] is the only
//! irreversible step and only accepts a [`FinalizedSpend`].

use bitcoin::util::address::Address;
use bitcoin::{OutPoint, Txid};

use crate::address;
use crate::blockchain::Network;
use crate::crypto::{Identity, Secret};
use crate::script::{Branch, HtlcParams, LockingScript};
use crate::service::{
    self, retry, PreimageDiscovery, RetryPolicy, Submitter, TemplateProvider, TemplateRequest,
    UtxoResolver,
};
use crate::transaction::{self, FinalizedSpend, Utxo};
use crate::Error;

/// Data encoding of the Counterparty payload in sweep transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[display("pubkeyhash")]
    PubkeyHash,
    #[display("multisig")]
    Multisig,
}

/// What the spend transfers out of the contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaymentMode {
    /// Send a quantity of a single asset.
    Send {
        /// Asset name, e.g. `XCP`.
        asset: String,
        /// Quantity in base units.
        quantity: u64,
    },
    /// Sweep every asset of the address, `flags` selects balances (1) and ownerships (2).
    Sweep {
        flags: u8,
        #[serde(default)]
        encoding: Option<Encoding>,
    },
}

/// Everything needed to spend the contract through one branch.
#[derive(Debug, Clone)]
pub struct SpendRequest {
    /// Which branch is spent.
    pub branch: Branch,
    /// The spender, payee for a claim and payer for a refund.
    pub identity: Identity,
    /// Required for a claim.
    pub secret: Option<Secret>,
    /// Where the funds go.
    pub destination: Address,
    pub mode: PaymentMode,
    /// Explicit input sequence, `None` selects the branch default.
    pub sequence: Option<u32>,
}

/// One HTLC instance. Many instances can coexist in the same process, nothing is global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Htlc {
    params: HtlcParams,
    script: LockingScript,
    network: Network,
}

impl Htlc {
    /// Compile the contract for the network.
    pub fn new(params: HtlcParams, network: Network) -> Result<Self, Error> {
        let script = LockingScript::from_params(&params)?;
        Ok(Self {
            params,
            script,
            network,
        })
    }

    pub fn params(&self) -> &HtlcParams {
        &self.params
    }

    pub fn script(&self) -> &LockingScript {
        &self.script
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The P2SH address to fund.
    pub fn address(&self) -> Address {
        address::derive(&self.script, self.network)
    }

    /// Resolve the contract UTXO and fetch the template concurrently, then assemble, sign and
    /// finalize the spend. Nothing is broadcast.
    ///
    /// When the template spends another unspent output of the contract than the resolved one,
    /// that output is spent instead. Template inputs are never used without the resolver
    /// confirming them.
    pub async fn prepare<P, R>(
        &self,
        request: &SpendRequest,
        provider: &P,
        resolver: &R,
        policy: &RetryPolicy,
    ) -> Result<FinalizedSpend, Error>
    where
        P: TemplateProvider + ?Sized,
        R: UtxoResolver + ?Sized,
    {
        self.check(request)?;

        let source = self.address();
        let template_request = TemplateRequest {
            source: source.clone(),
            destination: request.destination.clone(),
            identifier: *request.identity.public_key(),
            mode: request.mode.clone(),
        };
        log::debug!("Preparing {} spend from {}", request.branch, source);

        let (utxo, template) = tokio::try_join!(
            retry(policy, "UTXO resolution", || resolver.resolve(&source)),
            retry(policy, "Template creation", || provider
                .create_template(&template_request)),
        )?;
        let utxo = match template.input.first().map(|txin| txin.previous_output) {
            Some(outpoint) if !outpoint.is_null() && outpoint != utxo.outpoint() => {
                self.prefer_outpoint(&source, &outpoint, utxo, resolver, policy)
                    .await?
            }
            _ => utxo,
        };
        log::debug!(
            "Template carries {} outputs, spending {}",
            template.output.len(),
            utxo.outpoint()
        );

        let spend = transaction::assemble(
            &self.script,
            request.branch,
            &utxo,
            template.output,
            request.sequence,
            &request.identity,
        )?;
        Ok(spend.finalize(request.secret.as_ref())?)
    }

    /// Hand the finalized spend to the submitter. Resubmitting the same spend is safe.
    pub async fn broadcast<S>(
        &self,
        spend: &FinalizedSpend,
        submitter: &S,
        policy: &RetryPolicy,
    ) -> Result<Txid, Error>
    where
        S: Submitter + ?Sized,
    {
        let txid = retry(policy, "Broadcast", || submitter.submit(spend.transaction())).await?;
        log::debug!("Broadcast {} spend {}", spend.branch(), txid);
        Ok(txid)
    }

    /// Recover the secret from a claim of this contract.
    pub async fn discover_secret<D>(
        &self,
        txid: &Txid,
        discovery: &D,
        policy: &RetryPolicy,
    ) -> Result<Secret, Error>
    where
        D: PreimageDiscovery + ?Sized,
    {
        let secret = retry(policy, "Preimage discovery", || {
            discovery.discover(txid, &self.script)
        })
        .await?;
        if !secret.verify(&self.params.commitment) {
            return Err(transaction::Error::PreimageMismatch.into());
        }
        Ok(secret)
    }

    // The provider may bind its data payload to the outpoint its template spends, spend the same
    // one when the resolver confirms it is an unspent contract output.
    async fn prefer_outpoint<R>(
        &self,
        source: &Address,
        outpoint: &OutPoint,
        resolved: Utxo,
        resolver: &R,
        policy: &RetryPolicy,
    ) -> Result<Utxo, Error>
    where
        R: UtxoResolver + ?Sized,
    {
        match retry(policy, "UTXO resolution", || {
            resolver.resolve_outpoint(source, outpoint)
        })
        .await
        {
            Ok(utxo) => Ok(utxo),
            Err(service::Error::NotFound(_)) => {
                log::debug!(
                    "Template input {} is not a contract output, keeping {}",
                    outpoint,
                    resolved.outpoint()
                );
                Ok(resolved)
            }
            Err(e) => Err(e.into()),
        }
    }

    // Fail before any network round-trip on inputs the finalizer would reject.
    fn check(&self, request: &SpendRequest) -> Result<(), transaction::Error> {
        if request.identity.digest() != self.script.digest_for(request.branch) {
            return Err(transaction::Error::IdentityMismatch(request.branch));
        }
        match request.branch {
            Branch::Claim => match &request.secret {
                None => Err(transaction::Error::MissingPreimage),
                Some(secret) if !secret.verify(&self.params.commitment) => {
                    Err(transaction::Error::PreimageMismatch)
                }
                Some(secret) => transaction::check_element(secret.as_bytes()),
            },
            Branch::Refund => {
                let expected = self.params.timelock.as_u32();
                match request.sequence {
                    Some(found) if found != expected => {
                        Err(transaction::Error::SequenceMismatch { expected, found })
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}
