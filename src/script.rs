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

//! The two-branch HTLC locking script compiler and template parser.
//!
//! The compiled program is:
//!
//! ```text
//! OP_IF
//!     <timelock> OP_CSV OP_DROP
//!     OP_DUP OP_HASH160 <payer digest> OP_EQUALVERIFY OP_CHECKSIG
//! OP_ELSE
//!     OP_HASH160 <commitment> OP_EQUALVERIFY
//!     OP_DUP OP_HASH160 <payee digest> OP_EQUALVERIFY OP_CHECKSIG
//! OP_ENDIF
//! ```
//!
//! The branch is selected by the top element of the unlocking stack: true executes the refund
//! path under `OP_IF`, false executes the claim path under `OP_ELSE`.

use std::convert::TryFrom;
use std::str::FromStr;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction, Instructions, Script};
use bitcoin::ScriptHash;

use crate::consensus::{self, CanonicalBytes};
use crate::crypto::Commitment;
use crate::hash::{read_script_number, Digest};
use crate::timelock::CSVTimelock;

/// The two mutually exclusive ways of spending the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// The payee spends by revealing the secret.
    #[display("claim")]
    #[serde(alias = "payee", alias = "bob")]
    Claim,
    /// The payer spends after the relative timelock matured.
    #[display("refund")]
    #[serde(alias = "payer", alias = "alice")]
    Refund,
}

impl Branch {
    /// The opcode pushed last in the unlocking stack to select the branch.
    pub fn selector_opcode(&self) -> opcodes::All {
        match self {
            Branch::Claim => opcodes::all::OP_PUSHBYTES_0,
            Branch::Refund => opcodes::all::OP_PUSHNUM_1,
        }
    }

    /// The stack element left by [`Branch::selector_opcode`].
    pub fn selector(&self) -> Vec<u8> {
        match self {
            Branch::Claim => vec![],
            Branch::Refund => vec![0x01],
        }
    }
}

impl FromStr for Branch {
    type Err = consensus::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claim" | "payee" | "bob" => Ok(Branch::Claim),
            "refund" | "payer" | "alice" => Ok(Branch::Refund),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// The parameters committed in a locking script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HtlcParams {
    /// Recipient digest of the payee, allowed to claim with the secret.
    pub payee: Digest,
    /// Recipient digest of the payer, allowed to refund after the timelock.
    pub payer: Digest,
    /// Hash commitment of the secret.
    pub commitment: Commitment,
    /// Relative timelock of the refund branch.
    pub timelock: CSVTimelock,
}

/// A compiled HTLC locking script, used as the redeem script of a P2SH output. Immutable once
/// compiled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockingScript {
    script: Script,
    params: HtlcParams,
}

impl LockingScript {
    /// Compile the locking script from raw parameters. Digests and commitment must be exactly 20
    /// bytes and the timelock must be a block-based relative timelock.
    pub fn compile(
        payee_digest: &[u8],
        payer_digest: &[u8],
        commitment: &[u8],
        timelock: CSVTimelock,
    ) -> Result<Self, consensus::Error> {
        let params = HtlcParams {
            payee: Digest::from_slice(payee_digest)?,
            payer: Digest::from_slice(payer_digest)?,
            commitment: Commitment::from_slice(commitment)?,
            timelock,
        };
        Self::from_params(&params)
    }

    /// Compile the locking script from typed parameters.
    pub fn from_params(params: &HtlcParams) -> Result<Self, consensus::Error> {
        params.timelock.confirmations()?;
        let script = Builder::new()
            .push_opcode(opcodes::all::OP_IF)
            .push_int(params.timelock.as_u32().into())
            .push_opcode(opcodes::all::OP_CSV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_opcode(opcodes::all::OP_DUP)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(params.payer.as_ref())
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .push_opcode(opcodes::all::OP_ELSE)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(params.commitment.as_ref())
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_DUP)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(params.payee.as_ref())
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .push_opcode(opcodes::all::OP_ENDIF)
            .into_script();
        Ok(Self {
            script,
            params: *params,
        })
    }

    /// Parse a script and return it as a locking script if and only if it follows the exact
    /// contract template with canonical pushes.
    pub fn from_script(s: &Script) -> Result<Self, consensus::Error> {
        use bitcoin::blockdata::opcodes::all;

        let mut ints = s.instructions();
        expect_op(&mut ints, all::OP_IF, "Missing IF opcode")?;
        let timelock = read_script_number(&next(&mut ints)?)
            .map_err(|_| consensus::Error::WrongTemplate("Missing timelock"))?;
        let timelock = u32::try_from(timelock)
            .map_err(|_| consensus::Error::WrongTemplate("Negative timelock"))?;
        let timelock = CSVTimelock::decode(timelock)?;
        expect_op(&mut ints, all::OP_CSV, "Missing CSV opcode")?;
        expect_op(&mut ints, all::OP_DROP, "Missing DROP opcode")?;
        expect_op(&mut ints, all::OP_DUP, "Missing DUP opcode")?;
        expect_op(&mut ints, all::OP_HASH160, "Missing HASH160 opcode")?;
        let payer = Digest::from_slice(expect_push(&mut ints, "Missing payer digest")?)?;
        expect_op(&mut ints, all::OP_EQUALVERIFY, "Missing EQUALVERIFY opcode")?;
        expect_op(&mut ints, all::OP_CHECKSIG, "Missing CHECKSIG opcode")?;
        expect_op(&mut ints, all::OP_ELSE, "Missing ELSE opcode")?;
        expect_op(&mut ints, all::OP_HASH160, "Missing HASH160 opcode")?;
        let commitment = Commitment::from_slice(expect_push(&mut ints, "Missing commitment")?)?;
        expect_op(&mut ints, all::OP_EQUALVERIFY, "Missing EQUALVERIFY opcode")?;
        expect_op(&mut ints, all::OP_DUP, "Missing DUP opcode")?;
        expect_op(&mut ints, all::OP_HASH160, "Missing HASH160 opcode")?;
        let payee = Digest::from_slice(expect_push(&mut ints, "Missing payee digest")?)?;
        expect_op(&mut ints, all::OP_EQUALVERIFY, "Missing EQUALVERIFY opcode")?;
        expect_op(&mut ints, all::OP_CHECKSIG, "Missing CHECKSIG opcode")?;
        expect_op(&mut ints, all::OP_ENDIF, "Missing ENDIF opcode")?;
        if ints.next().is_some() {
            return Err(consensus::Error::WrongTemplate("Trailing data after ENDIF"));
        }

        let compiled = Self::from_params(&HtlcParams {
            payee,
            payer,
            commitment,
            timelock,
        })?;
        // same template, only the push encodings can differ
        if &compiled.script != s {
            return Err(consensus::Error::WrongTemplate("Non-canonical push"));
        }
        Ok(compiled)
    }

    /// The compiled program, used as P2SH redeem script.
    pub fn as_script(&self) -> &Script {
        &self.script
    }

    /// Serialized script bytes, pushed as the last element of the unlocking script.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.script.to_bytes()
    }

    /// The parameters committed in the script.
    pub fn params(&self) -> &HtlcParams {
        &self.params
    }

    /// The recipient digest allowed to sign for the branch.
    pub fn digest_for(&self, branch: Branch) -> Digest {
        match branch {
            Branch::Claim => self.params.payee,
            Branch::Refund => self.params.payer,
        }
    }

    /// `HASH160` of the serialized script.
    pub fn script_hash(&self) -> ScriptHash {
        self.script.script_hash()
    }

    /// The P2SH output script paying to this locking script.
    pub fn script_pubkey(&self) -> Script {
        self.script.to_p2sh()
    }
}

impl CanonicalBytes for LockingScript {
    fn as_canonical_bytes(&self) -> Vec<u8> {
        self.to_bytes()
    }

    fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, consensus::Error>
    where
        Self: Sized,
    {
        Self::from_script(&Script::from(bytes.to_vec()))
    }
}

fn next<'a>(ints: &mut Instructions<'a>) -> Result<Instruction<'a>, consensus::Error> {
    ints.next()
        .ok_or(consensus::Error::WrongTemplate("Missing opcode"))
        .map_or_else(Err, |v| v.map_err(consensus::Error::new))
}

fn expect_op(
    ints: &mut Instructions,
    opcode: opcodes::All,
    err: &'static str,
) -> Result<(), consensus::Error> {
    match next(ints)? {
        Instruction::Op(op) if op == opcode => Ok(()),
        _ => Err(consensus::Error::WrongTemplate(err)),
    }
}

fn expect_push<'a>(
    ints: &mut Instructions<'a>,
    err: &'static str,
) -> Result<&'a [u8], consensus::Error> {
    match next(ints)? {
        Instruction::PushBytes(b) => Ok(b),
        _ => Err(consensus::Error::WrongTemplate(err)),
    }
}
