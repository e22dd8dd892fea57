//! In-memory ledger store
//!
//! Thread-safe implementation over `RwLock`-guarded maps, used by tests and
//! local development. Conditional writes take the write lock for the whole
//! check-and-set so concurrent callers see the same guarantees as the
//! Postgres store.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::LedgerStore;
use crate::error::{PaymentError, PaymentResult};
use crate::models::{
    BorrowerProfile, DuePayment, Loan, LoanBalanceUpdate, LoanStatus,
    NewNotification, NewPayment, NewTransfer, Party, PaymentScheduleItem, ScheduleStatus,
    SchedulePaidUpdate, Transfer, TransferStatus,
};

/// Stored audit payment row
#[derive(Debug, Clone)]
pub struct StoredPayment {
    pub id: Uuid,
    pub payment: NewPayment,
}

#[derive(Debug, Clone)]
struct StoredUser {
    party: Party,
    profile: Option<BorrowerProfile>,
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    loans: Arc<RwLock<HashMap<Uuid, Loan>>>,
    schedule: Arc<RwLock<HashMap<Uuid, PaymentScheduleItem>>>,
    transfers: Arc<RwLock<HashMap<String, Transfer>>>,
    payments: Arc<RwLock<Vec<StoredPayment>>>,
    users: Arc<RwLock<HashMap<Uuid, StoredUser>>>,
    notifications: Arc<RwLock<Vec<NewNotification>>>,
    // failure injection
    failing_schedule_updates: Arc<RwLock<HashSet<Uuid>>>,
    fail_due_fetch: AtomicBool,
    fail_payment_inserts: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_loan(&self, loan: Loan) {
        self.loans.write().await.insert(loan.id, loan);
    }

    pub async fn insert_schedule_item(&self, item: PaymentScheduleItem) {
        self.schedule.write().await.insert(item.id, item);
    }

    /// Register a user; pass a profile for users who borrow
    pub async fn insert_user(&self, party: Party, profile: Option<BorrowerProfile>) {
        let Some(id) = party.id else {
            return;
        };
        self.users
            .write()
            .await
            .insert(id, StoredUser { party, profile });
    }

    pub async fn schedule_item(&self, id: Uuid) -> Option<PaymentScheduleItem> {
        self.schedule.read().await.get(&id).cloned()
    }

    pub async fn loan(&self, id: Uuid) -> Option<Loan> {
        self.loans.read().await.get(&id).cloned()
    }

    pub async fn transfers(&self) -> Vec<Transfer> {
        self.transfers.read().await.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<StoredPayment> {
        self.payments.read().await.clone()
    }

    pub async fn notifications(&self) -> Vec<NewNotification> {
        self.notifications.read().await.clone()
    }

    pub async fn borrower(&self, id: Uuid) -> Option<BorrowerProfile> {
        self.users
            .read()
            .await
            .get(&id)
            .and_then(|u| u.profile.clone())
    }

    /// Make `mark_schedule_paid` fail for this item
    pub async fn fail_schedule_update_for(&self, schedule_id: Uuid) {
        self.failing_schedule_updates
            .write()
            .await
            .insert(schedule_id);
    }

    pub fn fail_due_fetch(&self, fail: bool) {
        self.fail_due_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_payment_inserts(&self, fail: bool) {
        self.fail_payment_inserts.store(fail, Ordering::SeqCst);
    }

    /// Delay borrower profile writes, like a database round trip
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn assemble(&self, item: PaymentScheduleItem) -> Option<DuePayment> {
        let loan = self.loans.read().await.get(&item.loan_id).cloned()?;
        let users = self.users.read().await;

        let borrower = loan
            .borrower_id
            .and_then(|id| users.get(&id))
            .map(|u| u.party.clone());

        let lender = loan
            .lender_id
            .or(loan.business_lender_id)
            .and_then(|id| users.get(&id))
            .map(|u| u.party.clone())
            .or_else(|| {
                loan.invite_email.clone().map(|email| Party {
                    id: None,
                    name: String::new(),
                    email: Some(email),
                    funding_source_url: None,
                })
            });

        Some(DuePayment {
            schedule: item,
            loan,
            borrower,
            lender,
        })
    }

    async fn assemble_all(&self, items: Vec<PaymentScheduleItem>) -> Vec<DuePayment> {
        let mut due = Vec::with_capacity(items.len());
        for item in items {
            if let Some(payment) = self.assemble(item).await {
                due.push(payment);
            }
        }
        due
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn ping(&self) -> PaymentResult<()> {
        Ok(())
    }

    async fn fetch_due_payments(&self, today: NaiveDate) -> PaymentResult<Vec<DuePayment>> {
        if self.fail_due_fetch.load(Ordering::SeqCst) {
            return Err(PaymentError::Ledger("connection refused".to_string()));
        }

        let active_loans: HashSet<Uuid> = self
            .loans
            .read()
            .await
            .values()
            .filter(|l| l.status == LoanStatus::Active)
            .map(|l| l.id)
            .collect();

        let mut items: Vec<PaymentScheduleItem> = self
            .schedule
            .read()
            .await
            .values()
            .filter(|i| {
                !i.is_paid
                    && i.status != ScheduleStatus::Missed
                    && i.due_date <= today
                    && active_loans.contains(&i.loan_id)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));

        Ok(self.assemble_all(items).await)
    }

    async fn get_due_payment(&self, schedule_id: Uuid) -> PaymentResult<Option<DuePayment>> {
        let item = self.schedule.read().await.get(&schedule_id).cloned();
        match item {
            Some(item) => Ok(self.assemble(item).await),
            None => Ok(None),
        }
    }

    async fn earliest_unpaid_payment(
        &self,
        loan_id: Uuid,
        today: NaiveDate,
    ) -> PaymentResult<Option<DuePayment>> {
        let item = self
            .schedule
            .read()
            .await
            .values()
            .filter(|i| i.loan_id == loan_id && !i.is_paid && i.due_date <= today)
            .min_by_key(|i| i.due_date)
            .cloned();

        match item {
            Some(item) => Ok(self.assemble(item).await),
            None => Ok(None),
        }
    }

    async fn find_payment_by_transfer_id(
        &self,
        transfer_id: &str,
    ) -> PaymentResult<Option<DuePayment>> {
        let item = self
            .schedule
            .read()
            .await
            .values()
            .find(|i| i.transfer_id.as_deref() == Some(transfer_id))
            .cloned();

        match item {
            Some(item) => Ok(self.assemble(item).await),
            None => Ok(None),
        }
    }

    async fn upsert_transfer(&self, transfer: &NewTransfer) -> PaymentResult<bool> {
        let mut transfers = self.transfers.write().await;
        if transfers.contains_key(&transfer.dwolla_transfer_id) {
            return Ok(false);
        }

        let now = Utc::now();
        transfers.insert(
            transfer.dwolla_transfer_id.clone(),
            Transfer {
                id: Uuid::new_v4(),
                dwolla_transfer_id: transfer.dwolla_transfer_id.clone(),
                loan_id: transfer.loan_id,
                transfer_type: transfer.transfer_type,
                amount: transfer.amount,
                status: transfer.status,
                platform_fee: transfer.platform_fee,
                fee_type: transfer.fee_type.clone(),
                gross_amount: transfer.gross_amount,
                net_amount: transfer.net_amount,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(true)
    }

    async fn get_transfer(&self, transfer_id: &str) -> PaymentResult<Option<Transfer>> {
        Ok(self.transfers.read().await.get(transfer_id).cloned())
    }

    async fn update_transfer_status(
        &self,
        transfer_id: &str,
        status: TransferStatus,
    ) -> PaymentResult<bool> {
        let mut transfers = self.transfers.write().await;
        match transfers.get_mut(transfer_id) {
            Some(transfer) => {
                transfer.status = status;
                transfer.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_schedule_paid(&self, update: &SchedulePaidUpdate) -> PaymentResult<()> {
        if self
            .failing_schedule_updates
            .read()
            .await
            .contains(&update.schedule_id)
        {
            return Err(PaymentError::Ledger("statement timeout".to_string()));
        }

        let mut schedule = self.schedule.write().await;
        let item = schedule
            .get_mut(&update.schedule_id)
            .filter(|i| !i.is_paid && i.transfer_id.is_none())
            .ok_or_else(|| {
                PaymentError::Ledger(format!(
                    "schedule item {} was not updated for transfer {}",
                    update.schedule_id, update.transfer_id
                ))
            })?;

        item.is_paid = true;
        item.status = ScheduleStatus::Paid;
        item.transfer_id = Some(update.transfer_id.clone());
        item.paid_at = Some(update.paid_at);
        item.platform_fee = Some(update.platform_fee);
        Ok(())
    }

    async fn mark_schedule_missed(&self, schedule_id: Uuid, note: &str) -> PaymentResult<()> {
        if let Some(item) = self.schedule.write().await.get_mut(&schedule_id) {
            item.status = ScheduleStatus::Missed;
            item.notes = Some(note.to_string());
        }
        Ok(())
    }

    async fn insert_payment(&self, payment: &NewPayment) -> PaymentResult<Uuid> {
        if self.fail_payment_inserts.load(Ordering::SeqCst) {
            return Err(PaymentError::Ledger("payments insert rejected".to_string()));
        }

        let id = Uuid::new_v4();
        self.payments.write().await.push(StoredPayment {
            id,
            payment: payment.clone(),
        });
        Ok(id)
    }

    async fn link_schedule_payment(&self, schedule_id: Uuid, payment_id: Uuid) -> PaymentResult<()> {
        if let Some(item) = self.schedule.write().await.get_mut(&schedule_id) {
            item.payment_id = Some(payment_id);
        }
        Ok(())
    }

    async fn count_unpaid_schedule_items(&self, loan_id: Uuid) -> PaymentResult<i64> {
        let count = self
            .schedule
            .read()
            .await
            .values()
            .filter(|i| i.loan_id == loan_id && !i.is_paid)
            .count();
        Ok(count as i64)
    }

    async fn get_loan(&self, loan_id: Uuid) -> PaymentResult<Option<Loan>> {
        Ok(self.loans.read().await.get(&loan_id).cloned())
    }

    async fn update_loan_balance(&self, update: &LoanBalanceUpdate) -> PaymentResult<()> {
        let mut loans = self.loans.write().await;
        let loan = loans
            .get_mut(&update.loan_id)
            .ok_or_else(|| PaymentError::NotFound(format!("Loan {}", update.loan_id)))?;

        loan.amount_paid = update.amount_paid;
        loan.amount_remaining = update.amount_remaining;
        loan.status = update.status;
        loan.last_payment_at = Some(update.last_payment_at);
        if update.completed_at.is_some() {
            loan.completed_at = update.completed_at;
        }
        loan.updated_at = update.last_payment_at;
        Ok(())
    }

    async fn register_missed_payment(
        &self,
        borrower_id: Uuid,
    ) -> PaymentResult<Option<BorrowerProfile>> {
        self.simulate_latency().await;

        let mut users = self.users.write().await;
        let Some(profile) = users.get_mut(&borrower_id).and_then(|u| u.profile.as_mut()) else {
            return Ok(None);
        };
        profile.register_miss();
        Ok(Some(profile.clone()))
    }

    async fn record_notification(&self, notification: &NewNotification) -> PaymentResult<()> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }
}
