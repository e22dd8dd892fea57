//! One auto-pay run over all due installments

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use super::{PaymentHandler, PaymentOutcome};
use crate::error::PaymentResult;
use crate::ledger::LedgerStore;
use crate::models::DuePayment;

/// Aggregate result of a run, as returned by `GET /cron/auto-pay`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub success: bool,
    pub date: NaiveDate,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl BatchSummary {
    fn empty(date: NaiveDate) -> Self {
        Self {
            success: true,
            date,
            processed: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            deferred: None,
            note: None,
        }
    }
}

/// Installments selected for this run
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub batch: Vec<DuePayment>,
    /// Due installments left for a later run
    pub deferred: usize,
}

/// Take at most `batch_size` installments in due-date order, no more than
/// one per loan. A loan's later installments wait for the next run so two
/// balance updates never race on the same loan.
pub fn plan_batch(due: Vec<DuePayment>, batch_size: usize) -> BatchPlan {
    let total = due.len();
    let mut seen_loans = HashSet::new();
    let mut batch = Vec::with_capacity(batch_size.min(total));

    for payment in due {
        if batch.len() >= batch_size {
            break;
        }
        if seen_loans.insert(payment.loan.id) {
            batch.push(payment);
        }
    }

    BatchPlan {
        deferred: total - batch.len(),
        batch,
    }
}

/// Runs the auto-pay job
#[derive(Clone)]
pub struct BatchProcessor {
    store: Arc<dyn LedgerStore>,
    handler: Arc<PaymentHandler>,
}

impl BatchProcessor {
    pub fn new(store: Arc<dyn LedgerStore>, handler: Arc<PaymentHandler>) -> Self {
        Self { store, handler }
    }

    pub fn handler(&self) -> &Arc<PaymentHandler> {
        &self.handler
    }

    /// Process everything due as of `now`.
    ///
    /// Only the initial fetch can fail the run. Each installment ends up
    /// processed, skipped or failed; a failure is counted and reported but
    /// never stops the remaining installments.
    pub async fn run(&self, now: DateTime<Utc>) -> PaymentResult<BatchSummary> {
        let today = now.date_naive();
        let due = self.store.fetch_due_payments(today).await?;
        let mut summary = BatchSummary::empty(today);

        if due.is_empty() {
            tracing::info!(%today, "No payments due");
            summary.note = Some("No payments due".to_string());
            return Ok(summary);
        }

        let config = self.handler.config();
        let due_count = due.len();
        let plan = plan_batch(due, config.batch_size);
        if plan.deferred > 0 {
            summary.deferred = Some(plan.deferred);
        }

        tracing::info!(
            %today,
            due = due_count,
            batch = plan.batch.len(),
            deferred = plan.deferred,
            concurrency = config.concurrency,
            "Starting auto-pay run"
        );

        for wave in plan.batch.chunks(config.concurrency) {
            let tasks = wave.iter().cloned().map(|payment| {
                let handler = Arc::clone(&self.handler);
                let schedule_id = payment.schedule.id;
                let task = tokio::spawn(async move { handler.process(&payment, now).await });
                (schedule_id, task)
            });
            let (ids, handles): (Vec<_>, Vec<_>) = tasks.unzip();

            // The next wave starts only once every task in this one has settled
            let results = join_all(handles).await;

            for (schedule_id, result) in ids.into_iter().zip(results) {
                match result {
                    Ok(Ok(PaymentOutcome::Processed(payment))) => {
                        summary.processed += 1;
                        tracing::info!(
                            %schedule_id,
                            loan_id = %payment.loan_id,
                            transfer_id = %payment.transfer_id,
                            "Payment processed"
                        );
                    }
                    Ok(Ok(PaymentOutcome::Skipped(reason))) => {
                        summary.skipped += 1;
                        tracing::info!(%schedule_id, reason = %reason.describe(), "Payment skipped");
                    }
                    Ok(Err(e)) => {
                        summary.failed += 1;
                        tracing::error!(%schedule_id, "Payment failed: {}", e);
                        summary.errors.push(format!("Payment {}: {}", schedule_id, e));
                    }
                    Err(join_error) => {
                        summary.failed += 1;
                        tracing::error!(%schedule_id, "Payment task aborted: {}", join_error);
                        summary
                            .errors
                            .push(format!("Payment {}: task aborted: {}", schedule_id, join_error));
                    }
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            deferred = plan.deferred,
            "Auto-pay run finished"
        );

        Ok(summary)
    }
}
