//! Minimal evaluator of legacy P2SH spends, restricted to the opcodes the HTLC uses. Executes
//! the unlocking script, checks the redeem script hash, then runs the redeem script against the
//! remaining stack with real signature and relative timelock checks.

use bitcoin::blockdata::opcodes::all;
use bitcoin::blockdata::script::{read_scriptint, Instruction, Script};
use bitcoin::secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};
use bitcoin::{Transaction, TxOut};

use hashlock_core::hash::{hash160, pushed_value};

const SEQUENCE_LOCKTIME_DISABLE_FLAG: i64 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: i64 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: i64 = 0x0000_ffff;

/// What happened during a successful evaluation.
#[derive(Debug)]
pub struct Trace {
    /// Condition popped by the first `OP_IF`, `true` runs the `IF` path.
    pub if_taken: Option<bool>,
    /// Elements pushed by the unlocking script, redeem script included.
    pub unlocking: Vec<Vec<u8>>,
}

fn cast_to_bool(v: &[u8]) -> bool {
    for (i, byte) in v.iter().enumerate() {
        if *byte != 0 {
            // negative zero
            return !(i == v.len() - 1 && *byte == 0x80);
        }
    }
    false
}

fn pop(stack: &mut Vec<Vec<u8>>) -> Result<Vec<u8>, String> {
    stack.pop().ok_or_else(|| "stack underflow".to_string())
}

/// Verify the spend of `prevout` by input `index` of `tx`.
pub fn verify(tx: &Transaction, index: usize, prevout: &TxOut) -> Result<Trace, String> {
    let input = tx.input.get(index).ok_or("missing input")?;
    let mut stack = vec![];
    for ins in input.script_sig.instructions() {
        let ins = ins.map_err(|e| e.to_string())?;
        stack.push(pushed_value(&ins).ok_or("unlocking script is not push only")?);
    }
    let unlocking = stack.clone();

    if !prevout.script_pubkey.is_p2sh() {
        return Err("previous output is not P2SH".into());
    }
    let redeem = pop(&mut stack)?;
    if prevout.script_pubkey.as_bytes()[2..22] != hash160(&redeem) {
        return Err("redeem script hash mismatch".into());
    }

    let redeem = Script::from(redeem);
    let if_taken = run(&redeem, &mut stack, tx, index)?;
    match stack.as_slice() {
        [top] if cast_to_bool(top) => Ok(Trace {
            if_taken,
            unlocking,
        }),
        [_] => Err("script evaluated to false".into()),
        _ => Err(format!("unclean stack: {} elements", stack.len())),
    }
}

fn run(
    script: &Script,
    stack: &mut Vec<Vec<u8>>,
    tx: &Transaction,
    index: usize,
) -> Result<Option<bool>, String> {
    let secp = Secp256k1::verification_only();
    let mut exec: Vec<bool> = vec![];
    let mut if_taken = None;

    for ins in script.instructions() {
        let ins = ins.map_err(|e| e.to_string())?;
        let executing = exec.iter().all(|b| *b);
        if let Some(value) = pushed_value(&ins) {
            if executing {
                stack.push(value);
            }
            continue;
        }
        let op = match ins {
            Instruction::Op(op) => op,
            Instruction::PushBytes(_) => unreachable!(),
        };
        match op {
            all::OP_IF | all::OP_NOTIF => {
                let mut cond = false;
                if executing {
                    cond = cast_to_bool(&pop(stack)?);
                    if op == all::OP_NOTIF {
                        cond = !cond;
                    }
                    if_taken.get_or_insert(cond);
                }
                exec.push(cond);
            }
            all::OP_ELSE => {
                let last = exec.last_mut().ok_or("ELSE without IF")?;
                *last = !*last;
            }
            all::OP_ENDIF => {
                exec.pop().ok_or("ENDIF without IF")?;
            }
            _ if !executing => {}
            all::OP_CSV => {
                let top = stack.last().ok_or("stack underflow")?;
                let n = read_scriptint(top).map_err(|e| format!("{:?}", e))?;
                if n < 0 {
                    return Err("negative CSV operand".into());
                }
                if n & SEQUENCE_LOCKTIME_DISABLE_FLAG == 0 {
                    let sequence = tx.input[index].sequence as i64;
                    if tx.version < 2 {
                        return Err("CSV requires version 2".into());
                    }
                    if sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
                        return Err("sequence disables relative locktime".into());
                    }
                    if n & SEQUENCE_LOCKTIME_TYPE_FLAG != sequence & SEQUENCE_LOCKTIME_TYPE_FLAG {
                        return Err("relative locktime type mismatch".into());
                    }
                    if sequence & SEQUENCE_LOCKTIME_MASK < n & SEQUENCE_LOCKTIME_MASK {
                        return Err("relative locktime not satisfied".into());
                    }
                }
            }
            all::OP_DROP => {
                pop(stack)?;
            }
            all::OP_DUP => {
                let top = stack.last().ok_or("stack underflow")?.clone();
                stack.push(top);
            }
            all::OP_HASH160 => {
                let top = pop(stack)?;
                stack.push(hash160(&top).to_vec());
            }
            all::OP_EQUAL | all::OP_EQUALVERIFY => {
                let a = pop(stack)?;
                let b = pop(stack)?;
                if op == all::OP_EQUALVERIFY {
                    if a != b {
                        return Err("EQUALVERIFY failed".into());
                    }
                } else {
                    stack.push(if a == b { vec![1] } else { vec![] });
                }
            }
            all::OP_CHECKSIG => {
                let pubkey = pop(stack)?;
                let sig = pop(stack)?;
                let valid = match sig.split_last() {
                    Some((hash_ty, der)) => {
                        let sighash = tx.signature_hash(index, script, *hash_ty as u32);
                        let msg = Message::from_slice(&sighash[..]).map_err(|e| e.to_string())?;
                        match (Signature::from_der(der), PublicKey::from_slice(&pubkey)) {
                            (Ok(sig), Ok(pk)) => secp.verify_ecdsa(&msg, &sig, &pk).is_ok(),
                            _ => false,
                        }
                    }
                    None => false,
                };
                stack.push(if valid { vec![1] } else { vec![] });
            }
            op => return Err(format!("unsupported opcode {:?}", op)),
        }
    }
    if !exec.is_empty() {
        return Err("unbalanced conditional".into());
    }
    Ok(if_taken)
}
