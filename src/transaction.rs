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

//! Spend assembly, signing and branch finalization of the HTLC output.
//!
//! A [`SpendTx`] goes through three states: assembled by [`SpendTx::new`] with its single input
//! bound to the contract UTXO and the outputs carried over from an external template, signed by
//! [`SpendTx::sign`] with the identity the branch requires, and finalized by
//! [`SpendTx::finalize`] into an immutable [`FinalizedSpend`] carrying the unlocking script.
//!
//! ```text
//! claim:  <sig> <payee pubkey> <secret> OP_0 <locking script>
//! refund: <sig> <payer pubkey> OP_1 <locking script>
//! ```

use std::error;

use bitcoin::blockdata::script::{Builder, Script};
use bitcoin::blockdata::transaction::{OutPoint, Transaction, TxIn, TxOut};
use bitcoin::util::psbt::{self, PartiallySignedTransaction};
use bitcoin::{Txid, Witness};
use thiserror::Error;

use crate::consensus::{self, CanonicalBytes};
use crate::crypto::{self, Identity, Secret};
use crate::hash::{push_minimal, pushed_value, Digest};
use crate::script::{Branch, LockingScript};
use crate::timelock::SEQUENCE_FINAL;

pub mod sighash;

use sighash::{sign_input, TxInRef};

/// Transaction version of the spend, required for relative timelocks to be enforced.
pub const TX_VERSION: i32 = 2;

/// Consensus limit on the size of a single stack element, the locking script included.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Standardness limit on the size of an unlocking script.
pub const MAX_STANDARD_SCRIPTSIG_SIZE: usize = 1650;

/// A list of possible errors when assembling, signing or finalizing a spend.
#[derive(Error, Debug)]
pub enum Error {
    /// The UTXO cannot be spent by the contract.
    #[error("UTXO is not spendable: {0}")]
    UtxoUnspendable(String),
    /// The template does not carry any output.
    #[error("Missing outputs to carry over")]
    MissingOutputs,
    /// The input does not exist in the transaction.
    #[error("Missing input {0}")]
    MissingInput(usize),
    /// The refund input sequence does not match the script timelock.
    #[error("Sequence mismatch: expected {expected:#010x}, found {found:#010x}")]
    SequenceMismatch {
        /// The timelock committed in the script.
        expected: u32,
        /// The sequence supplied or found on the input.
        found: u32,
    },
    /// The identity is not the one the script assigns to the branch.
    #[error("Identity does not match the {0} branch recipient")]
    IdentityMismatch(Branch),
    /// Signature production failed.
    #[error("Signing failed: {0}")]
    SigningFailed(crypto::Error),
    /// Missing signature data.
    #[error("Missing signature")]
    MissingSignature,
    /// The claim branch is finalized without the secret, or no secret is revealed.
    #[error("Missing preimage")]
    MissingPreimage,
    /// The secret does not open the script commitment.
    #[error("Preimage does not match the commitment")]
    PreimageMismatch,
    /// An unlocking stack element or the whole unlocking script exceeds the ledger limit.
    #[error("Unlocking data too large: {size} bytes, limit is {limit}")]
    UnlockingTooLarge {
        /// Size of the offending element or script.
        size: usize,
        /// The limit it exceeds.
        limit: usize,
    },
    /// The locking script is not valid.
    #[error("Invalid locking script: {0}")]
    Consensus(#[from] consensus::Error),
    /// Partially signed transaction error
    #[error("Partially signed transaction error: `{0}`")]
    Psbt(#[from] psbt::Error),
    /// Any transaction error not part of this list.
    #[error("Transaction error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new transaction error of type other with an arbitrary payload.
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

/// An unspent output paying to the contract, as returned by a UTXO resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// Transaction id of the funding transaction.
    pub txid: Txid,
    /// Output index in the funding transaction.
    pub vout: u32,
    /// Value of the output in satoshis.
    pub value: u64,
    /// Serialized funding transaction.
    pub raw_tx: Vec<u8>,
}

impl Utxo {
    /// The funding output spent by the contract input.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    /// Parse the funding transaction.
    pub fn transaction(&self) -> Result<Transaction, Error> {
        Transaction::from_canonical_bytes(&self.raw_tx)
            .map_err(|e| Error::UtxoUnspendable(format!("cannot parse raw transaction: {}", e)))
    }
}

/// A spend of the contract output, assembled and possibly signed but not finalized.
#[derive(Debug, Clone)]
pub struct SpendTx {
    psbt: PartiallySignedTransaction,
    script: LockingScript,
    branch: Branch,
}

impl SpendTx {
    /// Bind a single input to the UTXO and copy the outputs verbatim.
    ///
    /// For [`Branch::Refund`] the input sequence is the script timelock, `None` selects it and a
    /// different value fails with [`Error::SequenceMismatch`]. For [`Branch::Claim`] the sequence
    /// defaults to [`SEQUENCE_FINAL`].
    pub fn new(
        script: &LockingScript,
        branch: Branch,
        utxo: &Utxo,
        outputs: Vec<TxOut>,
        sequence: Option<u32>,
    ) -> Result<Self, Error> {
        let prev_tx = utxo.transaction()?;
        if prev_tx.txid() != utxo.txid {
            return Err(Error::UtxoUnspendable(format!(
                "raw transaction {} does not match txid {}",
                prev_tx.txid(),
                utxo.txid
            )));
        }
        let prev_out = prev_tx.output.get(utxo.vout as usize).ok_or_else(|| {
            Error::UtxoUnspendable(format!("output {} does not exist", utxo.vout))
        })?;
        if prev_out.script_pubkey != script.script_pubkey() {
            return Err(Error::UtxoUnspendable(
                "output does not pay to the locking script".into(),
            ));
        }
        if prev_out.value != utxo.value {
            return Err(Error::UtxoUnspendable(format!(
                "output value {} does not match {}",
                prev_out.value, utxo.value
            )));
        }
        if outputs.is_empty() {
            return Err(Error::MissingOutputs);
        }

        let sequence = match branch {
            Branch::Refund => {
                let expected = script.params().timelock.as_u32();
                match sequence {
                    Some(found) if found != expected => {
                        return Err(Error::SequenceMismatch { expected, found })
                    }
                    _ => expected,
                }
            }
            Branch::Claim => sequence.unwrap_or(SEQUENCE_FINAL),
        };

        let unsigned_tx = Transaction {
            version: TX_VERSION,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: utxo.outpoint(),
                script_sig: Script::new(),
                sequence,
                witness: Witness::new(),
            }],
            output: outputs,
        };

        let mut psbt = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx)?;
        psbt.inputs[0].non_witness_utxo = Some(prev_tx);
        psbt.inputs[0].redeem_script = Some(script.as_script().clone());

        log::debug!(
            "Assembled {} spend of {} with sequence {:#010x}",
            branch,
            utxo.outpoint(),
            sequence
        );

        Ok(Self {
            psbt,
            script: script.clone(),
            branch,
        })
    }

    /// Sign the input with the identity the script assigns to the branch: the payee for
    /// [`Branch::Claim`], the payer for [`Branch::Refund`].
    pub fn sign(&mut self, identity: &Identity) -> Result<(), Error> {
        if identity.digest() != self.script.digest_for(self.branch) {
            return Err(Error::IdentityMismatch(self.branch));
        }
        let txin = TxInRef::new(&self.psbt.unsigned_tx, 0)?;
        let sig = sign_input(txin, self.script.as_script(), identity)?;
        self.psbt.inputs[0]
            .partial_sigs
            .insert(*identity.public_key(), sig);
        log::debug!("Signed {} spend with {}", self.branch, identity.public_key());
        Ok(())
    }

    /// The branch this spend unlocks.
    pub fn branch(&self) -> Branch {
        self.branch
    }

    /// Build the unlocking script for the branch and freeze the transaction. The secret is
    /// required for [`Branch::Claim`] and must open the script commitment, it is ignored for
    /// [`Branch::Refund`].
    pub fn finalize(mut self, secret: Option<&Secret>) -> Result<FinalizedSpend, Error> {
        let digest = self.script.digest_for(self.branch);
        let (pubkey, sig) = self.psbt.inputs[0]
            .partial_sigs
            .iter()
            .find(|(pubkey, _)| Digest::from_public_key(pubkey) == digest)
            .map(|(pubkey, sig)| (*pubkey, *sig))
            .ok_or(Error::MissingSignature)?;

        let mut stack = vec![sig.to_vec(), pubkey.to_bytes()];
        match self.branch {
            Branch::Claim => {
                let secret = secret.ok_or(Error::MissingPreimage)?;
                if !secret.verify(&self.script.params().commitment) {
                    return Err(Error::PreimageMismatch);
                }
                stack.push(secret.as_bytes().to_vec());
            }
            Branch::Refund => {
                let expected = self.script.params().timelock.as_u32();
                let found = self.psbt.unsigned_tx.input[0].sequence;
                if found != expected {
                    return Err(Error::SequenceMismatch { expected, found });
                }
            }
        }
        let redeem = self.script.to_bytes();
        for element in stack.iter().chain(std::iter::once(&redeem)) {
            check_element(element)?;
        }

        // selector last, the script pops it first
        let script_sig = stack
            .iter()
            .fold(Builder::new(), |builder, element| {
                push_minimal(builder, element)
            })
            .push_opcode(self.branch.selector_opcode())
            .push_slice(&redeem)
            .into_script();
        if script_sig.len() > MAX_STANDARD_SCRIPTSIG_SIZE {
            return Err(Error::UnlockingTooLarge {
                size: script_sig.len(),
                limit: MAX_STANDARD_SCRIPTSIG_SIZE,
            });
        }
        stack.push(self.branch.selector());
        self.psbt.inputs[0].final_script_sig = Some(script_sig);

        let tx = self.psbt.extract_tx();
        log::debug!("Finalized {} spend {}", self.branch, tx.txid());

        Ok(FinalizedSpend {
            tx,
            branch: self.branch,
            stack,
        })
    }
}

/// Fails with [`Error::UnlockingTooLarge`] if the data cannot be pushed as a single stack
/// element.
pub fn check_element(data: &[u8]) -> Result<(), Error> {
    if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
        return Err(Error::UnlockingTooLarge {
            size: data.len(),
            limit: MAX_SCRIPT_ELEMENT_SIZE,
        });
    }
    Ok(())
}

/// Bind the UTXO, copy the outputs and sign with the identity in one step.
pub fn assemble(
    script: &LockingScript,
    branch: Branch,
    utxo: &Utxo,
    outputs: Vec<TxOut>,
    sequence: Option<u32>,
    identity: &Identity,
) -> Result<SpendTx, Error> {
    let mut spend = SpendTx::new(script, branch, utxo, outputs, sequence)?;
    spend.sign(identity)?;
    Ok(spend)
}

/// A finalized spend ready to be handed to a submitter. No further mutation is possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedSpend {
    tx: Transaction,
    branch: Branch,
    stack: Vec<Vec<u8>>,
}

impl FinalizedSpend {
    /// The branch the unlocking script selects.
    pub fn branch(&self) -> Branch {
        self.branch
    }

    /// The unlocking stack elements, bottom first, without the locking script.
    pub fn unlocking_stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    /// The fully signed transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Identifier the ledger assigns to the spend.
    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }

    /// Consensus serialization of the transaction.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.tx.as_canonical_bytes()
    }

    /// Serialized transaction as hex, the format submitters expect.
    pub fn to_hex(&self) -> String {
        consensus::to_hex(&self.tx)
    }
}

/// Recover the secret from a claim spend of the locking script. Fails with
/// [`Error::MissingPreimage`] if no input of the transaction claims the script, and with
/// [`Error::PreimageMismatch`] if the revealed bytes do not open the commitment.
pub fn extract_preimage(tx: &Transaction, script: &LockingScript) -> Result<Secret, Error> {
    let redeem = script.to_bytes();
    for input in &tx.input {
        let elements = match unlocking_elements(&input.script_sig) {
            Some(elements) => elements,
            None => continue,
        };
        match elements.as_slice() {
            [_sig, _pubkey, secret, selector, last]
                if last == &redeem && selector == &Branch::Claim.selector() =>
            {
                let secret = Secret::from(secret.clone());
                if !secret.verify(&script.params().commitment) {
                    return Err(Error::PreimageMismatch);
                }
                return Ok(secret);
            }
            _ => continue,
        }
    }
    Err(Error::MissingPreimage)
}

fn unlocking_elements(script_sig: &Script) -> Option<Vec<Vec<u8>>> {
    script_sig
        .instructions()
        .map(|ins| ins.ok().and_then(|ins| pushed_value(&ins)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use bitcoin::secp256k1::SecretKey;

    use crate::timelock::CSVTimelock;

    fn identity(byte: u8) -> Identity {
        Identity::from_secret_key(SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    struct Fixture {
        payee: Identity,
        payer: Identity,
        secret: Secret,
        script: LockingScript,
        utxo: Utxo,
        outputs: Vec<TxOut>,
    }

    fn fixture() -> Fixture {
        fixture_with(Secret::from("swap-secret"))
    }

    fn fixture_with(secret: Secret) -> Fixture {
        let payee = identity(0x01);
        let payer = identity(0x02);
        let script = LockingScript::compile(
            payee.digest().as_ref(),
            payer.digest().as_ref(),
            secret.commitment().as_ref(),
            CSVTimelock::encode(10).unwrap(),
        )
        .unwrap();
        let funding = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::default(),
                script_sig: Script::new(),
                sequence: SEQUENCE_FINAL,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: 5_000,
                    script_pubkey: Script::new(),
                },
                TxOut {
                    value: 100_000,
                    script_pubkey: script.script_pubkey(),
                },
            ],
        };
        let utxo = Utxo {
            txid: funding.txid(),
            vout: 1,
            value: 100_000,
            raw_tx: funding.as_canonical_bytes(),
        };
        let outputs = vec![
            TxOut {
                value: 546,
                script_pubkey: Script::from(vec![0x6a, 0x04, 0xde, 0xad, 0xbe, 0xef]),
            },
            TxOut {
                value: 90_000,
                script_pubkey: Script::from(vec![0x51]),
            },
        ];
        Fixture {
            payee,
            payer,
            secret,
            script,
            utxo,
            outputs,
        }
    }

    #[test]
    fn claim_finalization() {
        let f = fixture();
        let spend = assemble(
            &f.script,
            Branch::Claim,
            &f.utxo,
            f.outputs.clone(),
            None,
            &f.payee,
        )
        .unwrap();
        let finalized = spend.finalize(Some(&f.secret)).unwrap();

        let stack = finalized.unlocking_stack();
        assert_eq!(stack.len(), 4);
        assert_eq!(stack[1], f.payee.public_key().to_bytes());
        assert_eq!(stack[2], b"swap-secret".to_vec());
        assert_eq!(stack[3], Vec::<u8>::new());

        let tx = finalized.transaction();
        assert_eq!(tx.version, 2);
        assert_eq!(tx.lock_time, 0);
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].previous_output, f.utxo.outpoint());
        assert_eq!(tx.input[0].sequence, SEQUENCE_FINAL);
        assert_eq!(tx.output, f.outputs);

        let elements = unlocking_elements(&tx.input[0].script_sig).unwrap();
        assert_eq!(&elements[..4], stack);
        assert_eq!(elements[4], f.script.to_bytes());
        assert_eq!(finalized.branch(), Branch::Claim);
        assert_eq!(finalized.txid(), tx.txid());
        assert_eq!(finalized.to_hex(), hex::encode(finalized.to_bytes()));
    }

    #[test]
    fn refund_finalization() {
        let f = fixture();
        let spend = assemble(
            &f.script,
            Branch::Refund,
            &f.utxo,
            f.outputs.clone(),
            None,
            &f.payer,
        )
        .unwrap();
        // the secret is never pushed on the refund path
        let finalized = spend.finalize(Some(&f.secret)).unwrap();

        let stack = finalized.unlocking_stack();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack[1], f.payer.public_key().to_bytes());
        assert_eq!(stack[2], vec![0x01]);
        assert!(stack.iter().all(|e| e != b"swap-secret"));

        let tx = finalized.transaction();
        assert_eq!(tx.input[0].sequence, f.script.params().timelock.as_u32());
        assert_eq!(tx.input[0].sequence, 10);
        let script_sig = tx.input[0].script_sig.as_bytes();
        assert!(!script_sig
            .windows(b"swap-secret".len())
            .any(|w| w == b"swap-secret"));
    }

    #[test]
    fn refund_sequence_mismatch() {
        let f = fixture();
        let res = SpendTx::new(
            &f.script,
            Branch::Refund,
            &f.utxo,
            f.outputs.clone(),
            Some(11),
        );
        assert!(matches!(
            res,
            Err(Error::SequenceMismatch {
                expected: 10,
                found: 11
            })
        ));
        assert!(SpendTx::new(&f.script, Branch::Refund, &f.utxo, f.outputs, Some(10)).is_ok());
    }

    #[test]
    fn preimage_mismatch() {
        let f = fixture();
        let spend = assemble(
            &f.script,
            Branch::Claim,
            &f.utxo,
            f.outputs.clone(),
            None,
            &f.payee,
        )
        .unwrap();
        let mut bytes = f.secret.as_bytes().to_vec();
        bytes[0] ^= 0x80;
        let wrong = Secret::from(bytes);
        assert!(matches!(
            spend.clone().finalize(Some(&wrong)),
            Err(Error::PreimageMismatch)
        ));
        assert!(matches!(spend.finalize(None), Err(Error::MissingPreimage)));
    }

    #[test]
    fn finalize_requires_signature() {
        let f = fixture();
        let spend = SpendTx::new(&f.script, Branch::Claim, &f.utxo, f.outputs.clone(), None)
            .unwrap();
        assert!(matches!(
            spend.finalize(Some(&f.secret)),
            Err(Error::MissingSignature)
        ));
        let spend = SpendTx::new(&f.script, Branch::Refund, &f.utxo, f.outputs, None).unwrap();
        assert!(matches!(spend.finalize(None), Err(Error::MissingSignature)));
    }

    #[test]
    fn wrong_identity_cannot_sign() {
        let f = fixture();
        let mut spend = SpendTx::new(&f.script, Branch::Claim, &f.utxo, f.outputs.clone(), None)
            .unwrap();
        assert!(matches!(
            spend.sign(&f.payer),
            Err(Error::IdentityMismatch(Branch::Claim))
        ));
        let mut spend = SpendTx::new(&f.script, Branch::Refund, &f.utxo, f.outputs, None).unwrap();
        assert!(matches!(
            spend.sign(&f.payee),
            Err(Error::IdentityMismatch(Branch::Refund))
        ));
    }

    #[test]
    fn unspendable_utxos() {
        let f = fixture();
        let mut utxo = f.utxo.clone();
        utxo.raw_tx = vec![0x00, 0x01];
        assert!(matches!(
            SpendTx::new(&f.script, Branch::Claim, &utxo, f.outputs.clone(), None),
            Err(Error::UtxoUnspendable(_))
        ));
        let mut utxo = f.utxo.clone();
        utxo.vout = 0;
        assert!(matches!(
            SpendTx::new(&f.script, Branch::Claim, &utxo, f.outputs.clone(), None),
            Err(Error::UtxoUnspendable(_))
        ));
        let mut utxo = f.utxo.clone();
        utxo.vout = 2;
        assert!(matches!(
            SpendTx::new(&f.script, Branch::Claim, &utxo, f.outputs.clone(), None),
            Err(Error::UtxoUnspendable(_))
        ));
        let mut utxo = f.utxo.clone();
        utxo.value = 1;
        assert!(matches!(
            SpendTx::new(&f.script, Branch::Claim, &utxo, f.outputs.clone(), None),
            Err(Error::UtxoUnspendable(_))
        ));
        assert!(matches!(
            SpendTx::new(&f.script, Branch::Claim, &f.utxo, vec![], None),
            Err(Error::MissingOutputs)
        ));
    }

    #[test]
    fn recover_preimage_from_claim() {
        let f = fixture();
        let claim = assemble(
            &f.script,
            Branch::Claim,
            &f.utxo,
            f.outputs.clone(),
            None,
            &f.payee,
        )
        .unwrap()
        .finalize(Some(&f.secret))
        .unwrap();
        let secret = extract_preimage(claim.transaction(), &f.script).unwrap();
        assert_eq!(secret, f.secret);

        let refund = assemble(
            &f.script,
            Branch::Refund,
            &f.utxo,
            f.outputs,
            None,
            &f.payer,
        )
        .unwrap()
        .finalize(None)
        .unwrap();
        assert!(matches!(
            extract_preimage(refund.transaction(), &f.script),
            Err(Error::MissingPreimage)
        ));
    }

    #[test]
    fn element_size_limit() {
        assert!(check_element(&[0u8; MAX_SCRIPT_ELEMENT_SIZE]).is_ok());
        assert!(matches!(
            check_element(&[0u8; MAX_SCRIPT_ELEMENT_SIZE + 1]),
            Err(Error::UnlockingTooLarge {
                size: 521,
                limit: 520
            })
        ));
    }

    #[test]
    fn oversized_secret_cannot_be_finalized() {
        let f = fixture_with(Secret::from(vec![0x42u8; 600]));
        let spend = assemble(
            &f.script,
            Branch::Claim,
            &f.utxo,
            f.outputs.clone(),
            None,
            &f.payee,
        )
        .unwrap();
        assert!(matches!(
            spend.finalize(Some(&f.secret)),
            Err(Error::UnlockingTooLarge {
                size: 600,
                limit: 520
            })
        ));
    }

    #[test]
    fn largest_secret_stays_standard() {
        let f = fixture_with(Secret::from(vec![0x42u8; MAX_SCRIPT_ELEMENT_SIZE]));
        let finalized = assemble(
            &f.script,
            Branch::Claim,
            &f.utxo,
            f.outputs.clone(),
            None,
            &f.payee,
        )
        .unwrap()
        .finalize(Some(&f.secret))
        .unwrap();
        let script_sig = &finalized.transaction().input[0].script_sig;
        assert!(script_sig.len() <= MAX_STANDARD_SCRIPTSIG_SIZE);
        assert_eq!(
            extract_preimage(finalized.transaction(), &f.script).unwrap(),
            f.secret
        );
    }
}
