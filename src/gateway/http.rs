//! HTTP client for the facilitated-transfer API

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{FacilitatedTransfer, FacilitatedTransferRequest, FeeBreakdown, TransferGateway, TransferMetadata};
use crate::config::GatewayConfig;
use crate::error::{PaymentError, PaymentResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequestBody<'a> {
    source_funding_source_url: &'a str,
    destination_funding_source_url: &'a str,
    platform_funding_source_url: &'a str,
    amount: AmountBody<'a>,
    metadata: &'a TransferMetadata,
}

#[derive(Debug, Serialize)]
struct AmountBody<'a> {
    value: String,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponseBody {
    #[serde(default)]
    transfer_url: String,
    #[serde(default)]
    transfer_ids: Vec<String>,
    fee_info: Option<FeeInfoBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeInfoBody {
    gross_amount: Decimal,
    platform_fee: Decimal,
    net_amount: Decimal,
    fee_type: String,
    #[serde(default)]
    fee_label: String,
}

/// Gateway client speaking JSON over HTTPS
pub struct HttpTransferGateway {
    base_url: String,
    api_key: Option<String>,
    platform_funding_source_url: String,
    client: reqwest::Client,
}

impl HttpTransferGateway {
    pub fn new(config: &GatewayConfig) -> PaymentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            platform_funding_source_url: config.platform_funding_source_url.clone(),
            client,
        })
    }
}

#[async_trait]
impl TransferGateway for HttpTransferGateway {
    async fn initiate_facilitated_transfer(
        &self,
        request: &FacilitatedTransferRequest,
    ) -> PaymentResult<FacilitatedTransfer> {
        let body = TransferRequestBody {
            source_funding_source_url: &request.source_funding_source_url,
            destination_funding_source_url: &request.destination_funding_source_url,
            platform_funding_source_url: &self.platform_funding_source_url,
            amount: AmountBody {
                value: format_amount(request.amount),
                currency: &request.currency,
            },
            metadata: &request.metadata,
        };

        tracing::info!(
            loan_id = %request.metadata.loan_id,
            payment_id = %request.metadata.payment_id,
            amount = %request.amount,
            "Initiating facilitated transfer"
        );

        // The schedule item id doubles as the gateway idempotency key, so a
        // retried call for the same installment returns the original transfer.
        let mut http_request = self
            .client
            .post(format!("{}/facilitated-transfers", self.base_url))
            .header("Idempotency-Key", request.metadata.payment_id.to_string())
            .json(&body);

        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PaymentError::Gateway(format!(
                "transfer API returned {}: {}",
                status, error_text
            )));
        }

        let parsed: TransferResponseBody = response.json().await?;

        let fee = match parsed.fee_info {
            Some(info) => FeeBreakdown {
                gross_amount: info.gross_amount,
                platform_fee: info.platform_fee,
                net_amount: info.net_amount,
                fee_type: info.fee_type,
                fee_label: info.fee_label,
            },
            None => FeeBreakdown::none(request.amount),
        };

        FacilitatedTransfer::from_legs(parsed.transfer_url, parsed.transfer_ids, fee)
    }
}

/// Gateway amounts always carry two decimal places
fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount)
}
