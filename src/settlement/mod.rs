//! Transfer settlement webhook
//!
//! The gateway reports status changes for transfers asynchronously. A
//! repayment on a gateway-capable loan only earns trust credit here, once
//! its transfer has actually completed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{PaymentError, PaymentResult};
use crate::ledger::LedgerStore;
use crate::models::{TransferStatus, TransferType};
use crate::trust::{CompletedPaymentEvent, PaymentMethod, TrustEngine};

/// Status change delivered by the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct TransferStatusEvent {
    #[serde(alias = "transferId")]
    pub transfer_id: String,
    pub status: TransferStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SettlementResult {
    pub transfer_id: String,
    pub status: TransferStatus,
    pub trust_score_updated: bool,
}

pub struct SettlementService {
    store: Arc<dyn LedgerStore>,
    trust: Arc<dyn TrustEngine>,
}

impl SettlementService {
    pub fn new(store: Arc<dyn LedgerStore>, trust: Arc<dyn TrustEngine>) -> Self {
        Self { store, trust }
    }

    pub async fn apply(&self, event: &TransferStatusEvent) -> PaymentResult<SettlementResult> {
        let transfer_id = event.transfer_id.trim();
        if transfer_id.is_empty() {
            return Err(PaymentError::Validation("transfer_id is required".to_string()));
        }

        let transfer = self
            .store
            .get_transfer(transfer_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Transfer {}", transfer_id)))?;

        self.store
            .update_transfer_status(transfer_id, event.status)
            .await?;

        tracing::info!(
            %transfer_id,
            loan_id = %transfer.loan_id,
            from = ?transfer.status,
            to = ?event.status,
            "Transfer status updated"
        );

        let mut result = SettlementResult {
            transfer_id: transfer_id.to_string(),
            status: event.status,
            trust_score_updated: false,
        };

        match (event.status, transfer.transfer_type) {
            (TransferStatus::Completed, TransferType::Repayment) => {
                result.trust_score_updated = self.credit_repayment(transfer_id).await?;
            }
            (TransferStatus::Failed, _) => {
                tracing::error!(
                    %transfer_id,
                    loan_id = %transfer.loan_id,
                    amount = %transfer.amount,
                    "Transfer failed; ledger needs manual reconciliation"
                );
            }
            _ => {}
        }

        Ok(result)
    }

    /// The deferred half of the trust update for gateway-rail repayments,
    /// whether the funding sources sit on the loan or on the profiles.
    /// Loans without connected sources were already credited by auto-pay.
    async fn credit_repayment(&self, transfer_id: &str) -> PaymentResult<bool> {
        let Some(due) = self.store.find_payment_by_transfer_id(transfer_id).await? else {
            tracing::warn!(%transfer_id, "Completed transfer matches no schedule item");
            return Ok(false);
        };

        if !due.is_gateway_capable() {
            return Ok(false);
        }
        let Some(borrower_id) = due.loan.borrower_id else {
            return Ok(false);
        };

        let update = self
            .trust
            .record_completed_payment(CompletedPaymentEvent {
                loan_id: due.loan.id,
                borrower_id,
                payment_id: due.schedule.payment_id,
                schedule_id: due.schedule.id,
                amount: due.schedule.amount,
                due_date: due.schedule.due_date,
                payment_method: PaymentMethod::Gateway,
                skip_user_stats: false,
            })
            .await;

        if let Some(error) = &update.error {
            tracing::warn!(%transfer_id, "Trust score update failed: {}", error);
        }
        Ok(update.trust_score_updated)
    }
}
