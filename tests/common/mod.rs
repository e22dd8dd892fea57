//! Shared fixtures for the auto-pay integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use autopay_server::autopay::{AutoPayConfig, BatchProcessor, PaymentHandler};
use autopay_server::error::{PaymentError, PaymentResult};
use autopay_server::gateway::{
    FacilitatedTransfer, FacilitatedTransferRequest, FeeBreakdown, TransferGateway,
};
use autopay_server::ledger::{InMemoryLedgerStore, LedgerStore};
use autopay_server::models::{
    BorrowerProfile, BorrowerRating, Loan, LoanStatus, Party, PaymentScheduleItem, ScheduleStatus,
};
use autopay_server::notifications::{EmailMessage, Notifier};
use autopay_server::settlement::SettlementService;
use autopay_server::trust::{CompletedPaymentEvent, MissedPaymentEvent, TrustEngine, TrustUpdate};

pub const APP_URL: &str = "https://app.example.com";

/// Fixed clock for every test run
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    now().date_naive()
}

// ============================================================================
// Fake collaborators
// ============================================================================

/// Gateway that answers with one transfer id per schedule item, the way a
/// provider honouring the idempotency key would
#[derive(Default)]
pub struct FakeGateway {
    calls: AtomicUsize,
    failing_sources: Mutex<HashSet<String>>,
    platform_fee: Mutex<Option<Decimal>>,
}

impl FakeGateway {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn fail_for_source(&self, source: &str) {
        self.failing_sources.lock().await.insert(source.to_string());
    }

    pub async fn charge_fee(&self, fee: Decimal) {
        *self.platform_fee.lock().await = Some(fee);
    }

    pub fn transfer_id_for(schedule_id: Uuid) -> String {
        format!("transfer-{}", schedule_id)
    }
}

#[async_trait]
impl TransferGateway for FakeGateway {
    async fn initiate_facilitated_transfer(
        &self,
        request: &FacilitatedTransferRequest,
    ) -> PaymentResult<FacilitatedTransfer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self
            .failing_sources
            .lock()
            .await
            .contains(&request.source_funding_source_url)
        {
            return Err(PaymentError::Gateway("insufficient funds".to_string()));
        }

        let fee = match *self.platform_fee.lock().await {
            Some(platform_fee) => FeeBreakdown {
                gross_amount: request.amount,
                platform_fee,
                net_amount: request.amount - platform_fee,
                fee_type: "fixed".to_string(),
                fee_label: "Platform fee".to_string(),
            },
            None => FeeBreakdown::none(request.amount),
        };

        let final_leg = Self::transfer_id_for(request.metadata.payment_id);
        FacilitatedTransfer::from_legs(
            format!("https://gateway.test/transfers/{}", final_leg),
            vec![format!("platform-{}", request.metadata.payment_id), final_leg],
            fee,
        )
    }
}

/// Trust engine that records events and absorbs duplicates per schedule item
#[derive(Default)]
pub struct RecordingTrust {
    completed: Mutex<Vec<CompletedPaymentEvent>>,
    missed: Mutex<Vec<MissedPaymentEvent>>,
}

impl RecordingTrust {
    pub async fn completed(&self) -> Vec<CompletedPaymentEvent> {
        self.completed.lock().await.clone()
    }

    pub async fn missed(&self) -> Vec<MissedPaymentEvent> {
        self.missed.lock().await.clone()
    }
}

#[async_trait]
impl TrustEngine for RecordingTrust {
    async fn record_completed_payment(&self, event: CompletedPaymentEvent) -> TrustUpdate {
        let mut completed = self.completed.lock().await;
        if completed.iter().any(|e| e.schedule_id == event.schedule_id) {
            return TrustUpdate::duplicate();
        }
        completed.push(event);
        TrustUpdate::updated()
    }

    async fn record_missed_payment(&self, event: MissedPaymentEvent) -> TrustUpdate {
        let mut missed = self.missed.lock().await;
        if missed.iter().any(|e| e.schedule_id == event.schedule_id) {
            return TrustUpdate::duplicate();
        }
        missed.push(event);
        TrustUpdate::updated()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingNotifier {
    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, to: &str) -> Vec<EmailMessage> {
        self.sent().await.into_iter().filter(|m| m.to == to).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &EmailMessage) -> PaymentResult<()> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub gateway: Arc<FakeGateway>,
    pub trust: Arc<RecordingTrust>,
    pub notifier: Arc<RecordingNotifier>,
    pub handler: Arc<PaymentHandler>,
    pub processor: Arc<BatchProcessor>,
    pub settlement: Arc<SettlementService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AutoPayConfig::new(
            AutoPayConfig::DEFAULT_BATCH_SIZE,
            AutoPayConfig::DEFAULT_CONCURRENCY,
            APP_URL.to_string(),
        ))
    }

    pub fn with_config(config: AutoPayConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let trust = Arc::new(RecordingTrust::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let ledger: Arc<dyn LedgerStore> = store.clone();
        let handler = Arc::new(PaymentHandler::new(
            ledger.clone(),
            gateway.clone(),
            trust.clone(),
            notifier.clone(),
            config,
        ));
        let processor = Arc::new(BatchProcessor::new(ledger.clone(), handler.clone()));
        let settlement = Arc::new(SettlementService::new(ledger, trust.clone()));

        Self {
            store,
            gateway,
            trust,
            notifier,
            handler,
            processor,
            settlement,
        }
    }
}

// ============================================================================
// Seed data
// ============================================================================

/// Where the bank connections of a seeded loan live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Funding {
    /// Handles stamped on the loan itself (gateway-capable)
    OnLoan,
    /// Handles only on the users' profiles
    OnProfiles,
    NoBorrowerSource,
    NoLenderSource,
}

pub struct SeededLoan {
    pub loan_id: Uuid,
    pub borrower_id: Uuid,
    pub lender_id: Uuid,
    pub borrower_email: String,
    pub lender_email: String,
    pub borrower_source: String,
    /// Installment ids in due-date order
    pub schedule_ids: Vec<Uuid>,
}

pub struct LoanSeed {
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub installment: Decimal,
    /// Days before `today()` of each installment; negative is in the future
    pub days_overdue: Vec<i64>,
    pub funding: Funding,
    pub invite_token: Option<String>,
    pub borrower_profile: BorrowerProfile,
    /// Reuse a borrower seeded by an earlier loan
    pub existing_borrower: Option<Uuid>,
}

impl LoanSeed {
    pub fn new(total_amount: Decimal, installment: Decimal, days_overdue: Vec<i64>) -> Self {
        Self {
            total_amount,
            amount_paid: Decimal::ZERO,
            installment,
            days_overdue,
            funding: Funding::OnLoan,
            invite_token: None,
            borrower_profile: BorrowerProfile::new(Uuid::nil()),
            existing_borrower: None,
        }
    }

    pub fn same_borrower_as(mut self, other: &SeededLoan) -> Self {
        self.existing_borrower = Some(other.borrower_id);
        self
    }

    pub fn funding(mut self, funding: Funding) -> Self {
        self.funding = funding;
        self
    }

    pub fn amount_paid(mut self, amount_paid: Decimal) -> Self {
        self.amount_paid = amount_paid;
        self
    }

    pub fn guest_lender(mut self, token: &str) -> Self {
        self.invite_token = Some(token.to_string());
        self
    }

    pub fn borrower_history(mut self, payments_missed: i32, rating: BorrowerRating) -> Self {
        self.borrower_profile.payments_missed = payments_missed;
        self.borrower_profile.borrower_rating = rating;
        self
    }
}

pub async fn seed_loan(store: &InMemoryLedgerStore, seed: LoanSeed) -> SeededLoan {
    let loan_id = Uuid::new_v4();
    let borrower_id = seed.existing_borrower.unwrap_or_else(Uuid::new_v4);
    let lender_id = Uuid::new_v4();
    let borrower_email = format!("borrower-{}@example.com", borrower_id);
    let lender_email = format!("lender-{}@example.com", lender_id);
    let borrower_source = format!("https://gateway.test/funding-sources/{}", borrower_id);
    let lender_source = format!("https://gateway.test/funding-sources/{}", lender_id);

    let (loan_borrower_source, loan_lender_source, profile_borrower_source, profile_lender_source) =
        match seed.funding {
            Funding::OnLoan => (Some(borrower_source.clone()), Some(lender_source.clone()), None, None),
            Funding::OnProfiles => (None, None, Some(borrower_source.clone()), Some(lender_source.clone())),
            Funding::NoBorrowerSource => (None, Some(lender_source.clone()), None, None),
            Funding::NoLenderSource => (Some(borrower_source.clone()), None, None, None),
        };

    if seed.existing_borrower.is_none() {
        let mut profile = seed.borrower_profile;
        profile.id = borrower_id;
        store
            .insert_user(
                Party {
                    id: Some(borrower_id),
                    name: "Bola Borrower".to_string(),
                    email: Some(borrower_email.clone()),
                    funding_source_url: profile_borrower_source,
                },
                Some(profile),
            )
            .await;
    }

    let guest = seed.invite_token.is_some();
    if !guest {
        store
            .insert_user(
                Party {
                    id: Some(lender_id),
                    name: "Lee Lender".to_string(),
                    email: Some(lender_email.clone()),
                    funding_source_url: profile_lender_source,
                },
                None,
            )
            .await;
    }

    let created = now() - Duration::days(90);
    store
        .insert_loan(Loan {
            id: loan_id,
            borrower_id: Some(borrower_id),
            lender_id: (!guest).then_some(lender_id),
            business_lender_id: None,
            amount: seed.total_amount,
            total_amount: seed.total_amount,
            amount_paid: seed.amount_paid,
            amount_remaining: seed.total_amount - seed.amount_paid,
            status: LoanStatus::Active,
            borrower_funding_source_url: loan_borrower_source,
            lender_funding_source_url: loan_lender_source,
            invite_token: seed.invite_token,
            invite_email: guest.then(|| lender_email.clone()),
            last_payment_at: None,
            completed_at: None,
            created_at: created,
            updated_at: created,
        })
        .await;

    let mut schedule_ids = Vec::new();
    let mut offsets = seed.days_overdue;
    offsets.sort_by(|a, b| b.cmp(a));
    for days in offsets {
        let id = Uuid::new_v4();
        store
            .insert_schedule_item(PaymentScheduleItem {
                id,
                loan_id,
                amount: seed.installment,
                due_date: today() - Duration::days(days),
                is_paid: false,
                status: ScheduleStatus::Scheduled,
                transfer_id: None,
                paid_at: None,
                platform_fee: None,
                payment_id: None,
                notes: None,
            })
            .await;
        schedule_ids.push(id);
    }

    SeededLoan {
        loan_id,
        borrower_id,
        lender_id,
        borrower_email,
        lender_email,
        borrower_source,
        schedule_ids,
    }
}

/// Count of rows by transfer id, for duplicate checks
pub fn count_by<T, K: std::hash::Hash + Eq>(items: &[T], key: impl Fn(&T) -> K) -> HashMap<K, usize> {
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(key(item)).or_insert(0) += 1;
    }
    counts
}
