//! Instruction-level execution traces.
//!
//! The shape mirrors geth's `structLogs` (`debug_traceTransaction` with the
//! default struct logger): one entry per executed opcode, with the operand
//! stack as it stood *before* the opcode ran, top of stack last.

use alloy::primitives::{Address, B256, U256};
use serde::Deserialize;
use serde_json::Value;

use crate::error::LedgerError;
use crate::utils::hex::stack_word;

pub const SLOAD: &str = "SLOAD";

const MAX_CALL_DEPTH: usize = 1024;

/// Opcodes that open a frame running against the caller's storage.
const SHARED_STORAGE_CALLS: [&str; 2] = ["DELEGATECALL", "CALLCODE"];
/// Opcodes that open a frame running against another account's storage.
const FOREIGN_STORAGE_CALLS: [&str; 4] = ["CALL", "STATICCALL", "CREATE", "CREATE2"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeTraceEntry {
    pub pc: u64,
    pub op: String,
    pub depth: u64,
    /// Operand stack snapshot; the last element is the top.
    pub stack: Vec<U256>,
}

impl OpcodeTraceEntry {
    pub fn is_storage_read(&self) -> bool {
        self.op.eq_ignore_ascii_case(SLOAD)
    }

    pub fn stack_top(&self) -> Option<U256> {
        self.stack.last().copied()
    }
}

/// An immutable trace of one transaction against one contract.
#[derive(Debug, Clone)]
pub struct OpcodeTrace {
    tx_hash: B256,
    contract: Address,
    steps: Vec<OpcodeTraceEntry>,
}

impl OpcodeTrace {
    pub fn new(tx_hash: B256, contract: Address, steps: Vec<OpcodeTraceEntry>) -> Self {
        Self {
            tx_hash,
            contract,
            steps,
        }
    }

    pub fn tx_hash(&self) -> B256 {
        self.tx_hash
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn steps(&self) -> &[OpcodeTraceEntry] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn storage_reads(&self) -> impl DoubleEndedIterator<Item = &OpcodeTraceEntry> + '_ {
        self.steps.iter().filter(|s| s.is_storage_read())
    }

    /// Storage reads that hit the traced contract's own storage, in order.
    ///
    /// Frames opened by `CALL`/`STATICCALL`/`CREATE*` read someone else's
    /// storage and are skipped; `DELEGATECALL`/`CALLCODE` frames inherit the
    /// storage of the frame that opened them.
    pub fn own_storage_reads(&self) -> Vec<&OpcodeTraceEntry> {
        let Some(base) = self.steps.iter().map(|s| s.depth).min() else {
            return Vec::new();
        };
        // own[i]: frame at depth base + i runs against the traced storage
        let mut own = vec![true];
        let mut opened: Option<bool> = None;
        let mut reads = Vec::new();
        for step in &self.steps {
            let level = ((step.depth - base) as usize).min(MAX_CALL_DEPTH);
            if level >= own.len() {
                own.push(opened.take().unwrap_or(false));
                own.resize(level + 1, false);
            } else {
                own.truncate(level + 1);
            }
            let current = own[level];
            if current && step.is_storage_read() {
                reads.push(step);
            }
            opened = if SHARED_STORAGE_CALLS.iter().any(|op| step.op.eq_ignore_ascii_case(op)) {
                Some(current)
            } else if FOREIGN_STORAGE_CALLS.iter().any(|op| step.op.eq_ignore_ascii_case(op)) {
                Some(false)
            } else {
                None
            };
        }
        reads
    }
}

#[derive(Debug, Deserialize)]
struct RawStructLog {
    #[serde(default)]
    pc: u64,
    op: String,
    #[serde(default)]
    depth: u64,
    #[serde(default)]
    stack: Option<Vec<String>>,
}

/// Decode the result object of `debug_traceTransaction`.
///
/// A result without a `structLogs` array means the client did not run the
/// struct logger (tracing disabled, or a different tracer answered).
pub fn decode_struct_logs(result: &Value) -> Result<Vec<OpcodeTraceEntry>, LedgerError> {
    let logs = result
        .get("structLogs")
        .and_then(Value::as_array)
        .ok_or_else(|| LedgerError::Decode("trace result has no structLogs array".to_string()))?;

    let mut steps = Vec::with_capacity(logs.len());
    for (idx, raw) in logs.iter().enumerate() {
        let log: RawStructLog = serde_json::from_value(raw.clone())
            .map_err(|e| LedgerError::Decode(format!("structLogs[{idx}]: {e}")))?;
        let mut stack = Vec::new();
        for item in log.stack.unwrap_or_default() {
            let word = stack_word(&item).ok_or_else(|| {
                LedgerError::Decode(format!("structLogs[{idx}]: bad stack word `{item}`"))
            })?;
            stack.push(word);
        }
        steps.push(OpcodeTraceEntry {
            pc: log.pc,
            op: log.op,
            depth: log.depth,
            stack,
        });
    }
    Ok(steps)
}
