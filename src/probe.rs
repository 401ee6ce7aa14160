use std::sync::Arc;

use crate::error::{ForgeError, LedgerError, Result};
use crate::ledger::{Accessor, Account, LedgerClient};
use crate::trace::OpcodeTrace;
use crate::utils::error::compact_ledger_error;

/// Drives an accessor as a mined transaction to capture its opcode trace.
///
/// The probe transaction is real: it is mined and consumes the signer's nonce.
#[derive(Clone)]
pub struct OpcodeTraceProbe {
    ledger: Arc<dyn LedgerClient>,
}

impl OpcodeTraceProbe {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn probe(&self, accessor: &Accessor, signer: &Account) -> Result<OpcodeTrace> {
        if !signer.impersonable {
            return Err(ForgeError::ImpersonationFailed {
                account: signer.address,
                reason: "probe signer is not impersonable".to_string(),
            });
        }

        let tx_hash = self
            .ledger
            .send_transaction(signer.address, accessor)
            .await?;
        let outcome = self.ledger.wait_for_inclusion(tx_hash).await?;
        if !outcome.success {
            return Err(LedgerError::Reverted {
                tx_hash,
                reason: format!(
                    "accessor {:#x}::0x{} reverted when driven as a transaction",
                    accessor.contract,
                    hex::encode(accessor.selector)
                ),
            }
            .into());
        }

        let steps = self
            .ledger
            .debug_trace_transaction(tx_hash)
            .await
            .map_err(|err| ForgeError::TraceUnavailable {
                tx_hash,
                reason: compact_ledger_error(err),
            })?;

        tracing::debug!(
            "[PROBE] {} traced tx {:#x}: {} steps (block {:?})",
            self.ledger.name(),
            tx_hash,
            steps.len(),
            outcome.block_number
        );
        Ok(OpcodeTrace::new(tx_hash, accessor.contract, steps))
    }
}
