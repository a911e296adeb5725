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

//! Legacy (pre-segwit) signature hash and signing of the spend input. The P2SH redeem script is
//! used as script code, the amount is not committed.

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{EcdsaSighashType, Transaction};
use bitcoin::util::ecdsa::EcdsaSig;
use bitcoin::Sighash;

use crate::crypto::Identity;
use crate::transaction::Error;

/// A borrowed reference to a transaction input.
#[derive(Debug, Copy, Clone)]
pub struct TxInRef<'a> {
    transaction: &'a Transaction,
    index: usize,
}

impl<'a> TxInRef<'a> {
    /// Constructs a reference to the input with the given index of the given transaction, fails
    /// if the input does not exist.
    pub fn new(transaction: &'a Transaction, index: usize) -> Result<TxInRef<'a>, Error> {
        if transaction.input.len() <= index {
            return Err(Error::MissingInput(index));
        }
        Ok(TxInRef { transaction, index })
    }

    /// Returns a reference to the borrowed transaction.
    pub fn transaction(&self) -> &Transaction {
        self.transaction
    }

    /// Returns the index of input.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Computes the legacy signature hash of the input with `script` as script code.
pub fn signature_hash(txin: TxInRef, script: &Script, sighash_type: EcdsaSighashType) -> Sighash {
    txin.transaction()
        .signature_hash(txin.index(), script, sighash_type as u32)
}

/// Computes the `SIGHASH_ALL` signature of the input for the identity, serialized with its
/// sighash flag as it is pushed in the unlocking script.
pub fn sign_input(txin: TxInRef, script: &Script, identity: &Identity) -> Result<EcdsaSig, Error> {
    let sighash = signature_hash(txin, script, EcdsaSighashType::All);
    let sig = identity.sign(&sighash[..]).map_err(Error::SigningFailed)?;
    Ok(EcdsaSig {
        sig,
        hash_ty: EcdsaSighashType::All,
    })
}
