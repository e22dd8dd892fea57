//! Manual single-payment trigger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{check_gates, PaymentHandler, ProcessedPayment};
use crate::error::{PaymentError, PaymentResult};

/// Body of `POST /cron/auto-pay`; at least one id is required
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_target"))]
pub struct ManualTriggerRequest {
    #[serde(default, alias = "loanId")]
    pub loan_id: Option<Uuid>,
    #[serde(default, alias = "paymentId")]
    pub payment_id: Option<Uuid>,
}

fn validate_target(request: &ManualTriggerRequest) -> Result<(), ValidationError> {
    if request.loan_id.is_none() && request.payment_id.is_none() {
        let mut error = ValidationError::new("missing_target");
        error.message = Some(Cow::from("loan_id or payment_id is required"));
        return Err(error);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ManualFee {
    pub platform_fee: Decimal,
    pub gross_amount: Decimal,
    pub net_amount: Decimal,
    pub fee_type: String,
    pub fee_label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ManualTriggerResponse {
    pub success: bool,
    pub payment_id: Uuid,
    pub transfer_id: String,
    pub amount: Decimal,
    pub amount_remaining: Decimal,
    pub fee: ManualFee,
}

impl From<ProcessedPayment> for ManualTriggerResponse {
    fn from(payment: ProcessedPayment) -> Self {
        Self {
            success: true,
            payment_id: payment.schedule_id,
            transfer_id: payment.transfer_id,
            amount: payment.amount,
            amount_remaining: payment.amount_remaining,
            fee: ManualFee {
                platform_fee: payment.fee.platform_fee,
                gross_amount: payment.fee.gross_amount,
                net_amount: payment.fee.net_amount,
                fee_type: payment.fee.fee_type,
                fee_label: payment.fee.fee_label,
            },
        }
    }
}

impl PaymentHandler {
    /// Charge one installment on demand.
    ///
    /// A named payment is used as is; a loan resolves to its earliest
    /// unpaid installment due by today. Unlike the scheduled run, a payment
    /// that fails the pre-transfer checks is rejected with no side effects.
    pub async fn trigger(
        &self,
        request: &ManualTriggerRequest,
        now: DateTime<Utc>,
    ) -> PaymentResult<ManualTriggerResponse> {
        let due = match (request.payment_id, request.loan_id) {
            (Some(payment_id), _) => self
                .store
                .get_due_payment(payment_id)
                .await?
                .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", payment_id)))?,
            (None, Some(loan_id)) => self
                .store
                .earliest_unpaid_payment(loan_id, now.date_naive())
                .await?
                .ok_or_else(|| PaymentError::NotFound(format!("Due payment for loan {}", loan_id)))?,
            (None, None) => {
                return Err(PaymentError::Validation(
                    "loan_id or payment_id is required".to_string(),
                ))
            }
        };

        let sources = check_gates(&due).map_err(PaymentError::from)?;

        tracing::info!(
            schedule_id = %due.schedule.id,
            loan_id = %due.loan.id,
            "Manual auto-pay trigger"
        );

        let processed = self.charge(&due, &sources, now).await?;
        Ok(processed.into())
    }
}
