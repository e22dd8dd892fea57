//! Charge workflow for a single installment

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::{AutoPayConfig, LoanParty, PaymentOutcome, ProcessedPayment, SkipReason};
use crate::error::PaymentResult;
use crate::gateway::{FacilitatedTransfer, FacilitatedTransferRequest, TransferGateway, TransferMetadata};
use crate::ledger::LedgerStore;
use crate::models::{
    DuePayment, LoanBalanceUpdate, LoanStatus, NewNotification, NewPayment, NewTransfer, Party,
    SchedulePaidUpdate, TransferStatus, TransferType,
};
use crate::notifications::templates::{self, PaymentContext};
use crate::notifications::{EmailMessage, Notifier};
use crate::trust::{CompletedPaymentEvent, MissedPaymentEvent, PaymentMethod, TrustEngine};

/// Debit and credit handles for a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingSources {
    pub source: String,
    pub destination: String,
}

/// Pre-transfer checks, in order: already paid, already transferred,
/// both funding sources present. No side effects.
pub fn check_gates(due: &DuePayment) -> Result<FundingSources, SkipReason> {
    if due.schedule.is_paid {
        return Err(SkipReason::AlreadyPaid);
    }

    if let Some(transfer_id) = &due.schedule.transfer_id {
        return Err(SkipReason::AlreadyTransferred {
            transfer_id: transfer_id.clone(),
        });
    }

    let source = due
        .borrower_funding_source()
        .ok_or(SkipReason::MissingFundingSource(LoanParty::Borrower))?;
    let destination = due
        .lender_funding_source()
        .ok_or(SkipReason::MissingFundingSource(LoanParty::Lender))?;

    Ok(FundingSources {
        source: source.to_string(),
        destination: destination.to_string(),
    })
}

/// Applies the charge workflow to one installment
///
/// Transfer initiation, the transfer record and the schedule update must
/// all succeed; their errors are returned. Everything after that (audit
/// row, loan balance, trust score, emails) is best effort and only logged.
pub struct PaymentHandler {
    pub(super) store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn TransferGateway>,
    trust: Arc<dyn TrustEngine>,
    notifier: Arc<dyn Notifier>,
    config: AutoPayConfig,
}

impl PaymentHandler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn TransferGateway>,
        trust: Arc<dyn TrustEngine>,
        notifier: Arc<dyn Notifier>,
        config: AutoPayConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            trust,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &AutoPayConfig {
        &self.config
    }

    /// Scheduled path: skip what is not chargeable, route missing bank
    /// connections to the missed-payment path, charge the rest.
    pub async fn process(&self, due: &DuePayment, now: DateTime<Utc>) -> PaymentResult<PaymentOutcome> {
        let sources = match check_gates(due) {
            Ok(sources) => sources,
            Err(reason) => {
                if let SkipReason::MissingFundingSource(party) = &reason {
                    self.handle_missed(due, *party, now).await;
                }
                return Ok(PaymentOutcome::Skipped(reason));
            }
        };

        self.charge(due, &sources, now)
            .await
            .map(PaymentOutcome::Processed)
    }

    /// Move the money and record it. Callers must have run [`check_gates`].
    pub async fn charge(
        &self,
        due: &DuePayment,
        sources: &FundingSources,
        now: DateTime<Utc>,
    ) -> PaymentResult<ProcessedPayment> {
        let schedule = &due.schedule;
        let loan = &due.loan;

        let request = FacilitatedTransferRequest {
            source_funding_source_url: sources.source.clone(),
            destination_funding_source_url: sources.destination.clone(),
            amount: schedule.amount,
            currency: self.config.currency.clone(),
            metadata: TransferMetadata {
                loan_id: loan.id,
                payment_id: schedule.id,
                transfer_type: TransferType::Repayment,
            },
        };
        let transfer = self.gateway.initiate_facilitated_transfer(&request).await?;

        let inserted = self
            .store
            .upsert_transfer(&NewTransfer {
                dwolla_transfer_id: transfer.transfer_id.clone(),
                loan_id: loan.id,
                transfer_type: TransferType::Repayment,
                amount: schedule.amount,
                status: TransferStatus::Pending,
                platform_fee: transfer.fee.platform_fee,
                fee_type: transfer.fee.fee_type.clone(),
                gross_amount: transfer.fee.gross_amount,
                net_amount: transfer.fee.net_amount,
            })
            .await?;
        if !inserted {
            tracing::warn!(
                schedule_id = %schedule.id,
                transfer_id = %transfer.transfer_id,
                "Transfer record already existed"
            );
        }

        self.store
            .mark_schedule_paid(&SchedulePaidUpdate {
                schedule_id: schedule.id,
                transfer_id: transfer.transfer_id.clone(),
                paid_at: now,
                platform_fee: transfer.fee.platform_fee,
            })
            .await?;

        tracing::info!(
            schedule_id = %schedule.id,
            loan_id = %loan.id,
            transfer_id = %transfer.transfer_id,
            amount = %schedule.amount,
            "Transfer initiated"
        );

        let payment_id = self.record_payment(due, &transfer, now).await;
        let (amount_remaining, loan_completed) = self.settle_loan_balance(due, now).await;

        if due.is_gateway_capable() {
            tracing::debug!(
                schedule_id = %schedule.id,
                "Trust update deferred until the transfer settles"
            );
        } else if let Some(borrower_id) = loan.borrower_id {
            let update = self
                .trust
                .record_completed_payment(CompletedPaymentEvent {
                    loan_id: loan.id,
                    borrower_id,
                    payment_id,
                    schedule_id: schedule.id,
                    amount: schedule.amount,
                    due_date: schedule.due_date,
                    payment_method: PaymentMethod::Auto,
                    skip_user_stats: false,
                })
                .await;
            if let Some(error) = update.error {
                tracing::warn!(schedule_id = %schedule.id, "Trust score update failed: {}", error);
            }
        }

        self.notify_processed(due, &transfer, amount_remaining, loan_completed)
            .await;

        Ok(ProcessedPayment {
            schedule_id: schedule.id,
            loan_id: loan.id,
            transfer_id: transfer.transfer_id,
            amount: schedule.amount,
            amount_remaining,
            loan_completed,
            payment_id,
            fee: transfer.fee,
        })
    }

    async fn record_payment(
        &self,
        due: &DuePayment,
        transfer: &FacilitatedTransfer,
        now: DateTime<Utc>,
    ) -> Option<Uuid> {
        let fee = &transfer.fee;
        let note = format!(
            "Auto-pay transfer {} (gross ${:.2}, {} ${:.2}, net ${:.2})",
            transfer.transfer_id, fee.gross_amount, fee.fee_label, fee.platform_fee, fee.net_amount
        );

        let payment = NewPayment {
            loan_id: due.loan.id,
            schedule_id: due.schedule.id,
            amount: due.schedule.amount,
            payment_date: now,
            status: "completed".to_string(),
            transfer_id: transfer.transfer_id.clone(),
            note,
        };

        match self.store.insert_payment(&payment).await {
            Ok(payment_id) => {
                if let Err(e) = self
                    .store
                    .link_schedule_payment(due.schedule.id, payment_id)
                    .await
                {
                    tracing::warn!(schedule_id = %due.schedule.id, "Failed to link payment record: {}", e);
                }
                Some(payment_id)
            }
            Err(e) => {
                tracing::error!(schedule_id = %due.schedule.id, "Failed to insert payment record: {}", e);
                None
            }
        }
    }

    /// Returns the remaining balance and whether the loan is now complete
    async fn settle_loan_balance(&self, due: &DuePayment, now: DateTime<Utc>) -> (Decimal, bool) {
        match self.apply_to_loan(due, now).await {
            Ok(update) => {
                if update.status == LoanStatus::Completed {
                    tracing::info!(loan_id = %due.loan.id, "Loan fully repaid");
                }
                (update.amount_remaining, update.status == LoanStatus::Completed)
            }
            Err(e) => {
                tracing::error!(loan_id = %due.loan.id, "Failed to update loan balance: {}", e);
                let remaining = (due.loan.amount_remaining - due.schedule.amount).max(Decimal::ZERO);
                (remaining, false)
            }
        }
    }

    async fn apply_to_loan(&self, due: &DuePayment, now: DateTime<Utc>) -> PaymentResult<LoanBalanceUpdate> {
        let unpaid = self.store.count_unpaid_schedule_items(due.loan.id).await?;
        // Re-read so the balance reflects earlier runs, not the fetch snapshot
        let loan = self
            .store
            .get_loan(due.loan.id)
            .await?
            .unwrap_or_else(|| due.loan.clone());

        let update = loan.apply_payment(due.schedule.amount, unpaid, now);
        self.store.update_loan_balance(&update).await?;
        Ok(update)
    }

    /// Missed-payment path: mark the item, penalise the borrower and tell the lender
    async fn handle_missed(&self, due: &DuePayment, missing: LoanParty, now: DateTime<Utc>) {
        let schedule = &due.schedule;
        let loan = &due.loan;
        let reason = match missing {
            LoanParty::Borrower => "Borrower has no bank account connected",
            LoanParty::Lender => "Lender has no bank account connected",
        };

        tracing::warn!(
            schedule_id = %schedule.id,
            loan_id = %loan.id,
            missing = missing.as_str(),
            "Auto-pay skipped, marking payment missed"
        );

        let note = format!("Auto-pay failed: {}", reason);
        if let Err(e) = self.store.mark_schedule_missed(schedule.id, &note).await {
            tracing::error!(schedule_id = %schedule.id, "Failed to mark payment missed: {}", e);
        }

        if let Some(borrower_id) = loan.borrower_id {
            let update = self
                .trust
                .record_missed_payment(MissedPaymentEvent {
                    borrower_id,
                    loan_id: loan.id,
                    schedule_id: schedule.id,
                    days_overdue: schedule.days_overdue(now),
                })
                .await;
            if let Some(error) = update.error {
                tracing::warn!(schedule_id = %schedule.id, "Trust missed-payment update failed: {}", error);
            }

            if let Err(e) = self.downgrade_rating(borrower_id).await {
                tracing::error!(%borrower_id, "Failed to update borrower rating: {}", e);
            }
        }

        self.notify_missed(due, reason).await;
    }

    async fn downgrade_rating(&self, borrower_id: Uuid) -> PaymentResult<()> {
        let Some(profile) = self.store.register_missed_payment(borrower_id).await? else {
            return Ok(());
        };

        tracing::info!(
            %borrower_id,
            payments_missed = profile.payments_missed,
            rating = profile.borrower_rating.as_str(),
            "Borrower rating updated after missed payment"
        );
        Ok(())
    }

    fn context<'a>(&'a self, due: &'a DuePayment) -> PaymentContext<'a> {
        PaymentContext {
            app_url: &self.config.app_url,
            loan: &due.loan,
            amount: due.schedule.amount,
            due_date: due.schedule.due_date,
            borrower_name: due.borrower_name(),
            lender_name: due.lender_name(),
        }
    }

    async fn notify_processed(
        &self,
        due: &DuePayment,
        transfer: &FacilitatedTransfer,
        amount_remaining: Decimal,
        loan_completed: bool,
    ) {
        let ctx = self.context(due);

        if let Some(lender) = &due.lender {
            if let Some(to) = lender.email.as_deref() {
                let email = templates::payment_received(
                    to,
                    &ctx,
                    &transfer.transfer_id,
                    &transfer.fee,
                    amount_remaining,
                );
                self.deliver(due, lender, "payment_received", email).await;
            }
        }

        if let Some(borrower) = &due.borrower {
            if let Some(to) = borrower.email.as_deref() {
                let email = templates::payment_processed(
                    to,
                    &ctx,
                    &transfer.transfer_id,
                    amount_remaining,
                    loan_completed,
                );
                self.deliver(due, borrower, "payment_processed", email).await;
            }
        }
    }

    async fn notify_missed(&self, due: &DuePayment, reason: &str) {
        let ctx = self.context(due);

        if let Some(lender) = &due.lender {
            if let Some(to) = lender.email.as_deref() {
                let email = templates::payment_missed(to, &ctx, reason);
                self.deliver(due, lender, "payment_missed", email).await;
            }
        }

        if let Some(borrower) = &due.borrower {
            let notification = NewNotification {
                user_id: borrower.id,
                loan_id: due.loan.id,
                kind: "payment_missed".to_string(),
                title: "Auto-pay could not run".to_string(),
                message: format!(
                    "Your ${:.2} payment due {} was missed: {}",
                    due.schedule.amount, due.schedule.due_date, reason
                ),
            };
            if let Err(e) = self.store.record_notification(&notification).await {
                tracing::warn!(loan_id = %due.loan.id, "Failed to record notification: {}", e);
            }
        }
    }

    /// Send an email and record it; failures are logged only
    async fn deliver(&self, due: &DuePayment, recipient: &Party, kind: &str, email: EmailMessage) {
        if let Err(e) = self.notifier.send(&email).await {
            tracing::warn!(loan_id = %due.loan.id, kind, to = %email.to, "Failed to send email: {}", e);
        }

        let notification = NewNotification {
            user_id: recipient.id,
            loan_id: due.loan.id,
            kind: kind.to_string(),
            title: email.subject.clone(),
            message: format!("Email sent to {}", email.to),
        };
        if let Err(e) = self.store.record_notification(&notification).await {
            tracing::warn!(loan_id = %due.loan.id, kind, "Failed to record notification: {}", e);
        }
    }
}
