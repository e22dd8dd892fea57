//! Transfer gateway adapter
//!
//! The gateway moves money in two legs (payer to platform, platform to
//! payee) and reports every leg id. Callers only ever see the canonical id
//! of the final leg; the platform hop stays internal.

mod http;

pub use http::HttpTransferGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PaymentError, PaymentResult};
use crate::models::TransferType;

/// Metadata attached to a transfer so the gateway's records can be traced back
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferMetadata {
    pub loan_id: Uuid,
    pub payment_id: Uuid,
    #[serde(rename = "type")]
    pub transfer_type: TransferType,
}

#[derive(Debug, Clone)]
pub struct FacilitatedTransferRequest {
    pub source_funding_source_url: String,
    pub destination_funding_source_url: String,
    pub amount: Decimal,
    pub currency: String,
    pub metadata: TransferMetadata,
}

/// Platform fee split reported by the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeBreakdown {
    pub gross_amount: Decimal,
    pub platform_fee: Decimal,
    pub net_amount: Decimal,
    pub fee_type: String,
    pub fee_label: String,
}

impl FeeBreakdown {
    /// No platform fee taken
    pub fn none(amount: Decimal) -> Self {
        Self {
            gross_amount: amount,
            platform_fee: Decimal::ZERO,
            net_amount: amount,
            fee_type: "none".to_string(),
            fee_label: "No fee".to_string(),
        }
    }
}

/// An initiated transfer reduced to its canonical id
#[derive(Debug, Clone, PartialEq)]
pub struct FacilitatedTransfer {
    pub transfer_url: String,
    /// Id of the final leg; this is the id persisted and shown to users
    pub transfer_id: String,
    pub leg_ids: Vec<String>,
    pub fee: FeeBreakdown,
}

impl FacilitatedTransfer {
    /// Build from the raw gateway answer. The last leg id wins.
    pub fn from_legs(
        transfer_url: String,
        leg_ids: Vec<String>,
        fee: FeeBreakdown,
    ) -> PaymentResult<Self> {
        if transfer_url.trim().is_empty() {
            return Err(PaymentError::Gateway(
                "transfer initiation returned no transfer url".to_string(),
            ));
        }

        let leg_ids: Vec<String> = leg_ids
            .into_iter()
            .filter(|id| !id.trim().is_empty())
            .collect();

        let transfer_id = leg_ids.last().cloned().ok_or_else(|| {
            PaymentError::Gateway("transfer initiation returned no transfer ids".to_string())
        })?;

        Ok(Self {
            transfer_url,
            transfer_id,
            leg_ids,
            fee,
        })
    }
}

#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// Start a two-leg transfer. Not idempotent on the gateway side unless
    /// the implementation forwards an idempotency key.
    async fn initiate_facilitated_transfer(
        &self,
        request: &FacilitatedTransferRequest,
    ) -> PaymentResult<FacilitatedTransfer>;
}
