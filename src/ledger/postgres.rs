//! PostgreSQL ledger store

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::chrono::DateTime;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::LedgerStore;
use crate::db;
use crate::error::{PaymentError, PaymentResult};
use crate::models::{
    BorrowerProfile, DuePayment, Loan, LoanBalanceUpdate, LoanStatus,
    NewNotification, NewPayment, NewTransfer, Party, PaymentScheduleItem, ScheduleStatus,
    SchedulePaidUpdate, Transfer, TransferStatus,
};

const PROFILE_FOR_UPDATE: &str = r#"
    SELECT id, trust_score, payments_missed, borrower_rating, borrowing_tier,
           max_borrowing_amount, total_payments_made, payments_early,
           payments_on_time, payments_late, total_amount_repaid,
           current_outstanding_amount, loans_at_current_tier, total_loans_completed
    FROM users
    WHERE id = $1
    FOR UPDATE
"#;

/// Installment, loan, borrower and lender identity in one row
const DUE_PAYMENT_SELECT: &str = r#"
    SELECT
        ps.id AS schedule_id, ps.loan_id, ps.amount AS schedule_amount, ps.due_date,
        ps.is_paid, ps.status AS schedule_status, ps.transfer_id, ps.paid_at,
        ps.platform_fee, ps.payment_id, ps.notes,
        l.borrower_id, l.lender_id, l.business_lender_id, l.amount AS loan_amount,
        l.total_amount, l.amount_paid, l.amount_remaining, l.status AS loan_status,
        l.borrower_funding_source_url, l.lender_funding_source_url,
        l.invite_token, l.invite_email, l.last_payment_at, l.completed_at,
        l.created_at AS loan_created_at, l.updated_at AS loan_updated_at,
        b.full_name AS borrower_name, b.email AS borrower_email,
        b.dwolla_funding_source_url AS borrower_profile_funding_source,
        lu.full_name AS lender_name, lu.email AS lender_email,
        lu.dwolla_funding_source_url AS lender_profile_funding_source,
        bp.business_name, bp.contact_email AS business_email,
        bp.dwolla_funding_source_url AS business_funding_source
    FROM payment_schedule ps
    JOIN loans l ON l.id = ps.loan_id
    LEFT JOIN users b ON b.id = l.borrower_id
    LEFT JOIN users lu ON lu.id = l.lender_id
    LEFT JOIN business_profiles bp ON bp.id = l.business_lender_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct DuePaymentRow {
    schedule_id: Uuid,
    loan_id: Uuid,
    schedule_amount: Decimal,
    due_date: NaiveDate,
    is_paid: bool,
    schedule_status: ScheduleStatus,
    transfer_id: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    platform_fee: Option<Decimal>,
    payment_id: Option<Uuid>,
    notes: Option<String>,
    borrower_id: Option<Uuid>,
    lender_id: Option<Uuid>,
    business_lender_id: Option<Uuid>,
    loan_amount: Decimal,
    total_amount: Decimal,
    amount_paid: Decimal,
    amount_remaining: Decimal,
    loan_status: LoanStatus,
    borrower_funding_source_url: Option<String>,
    lender_funding_source_url: Option<String>,
    invite_token: Option<String>,
    invite_email: Option<String>,
    last_payment_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    loan_created_at: DateTime<Utc>,
    loan_updated_at: DateTime<Utc>,
    borrower_name: Option<String>,
    borrower_email: Option<String>,
    borrower_profile_funding_source: Option<String>,
    lender_name: Option<String>,
    lender_email: Option<String>,
    lender_profile_funding_source: Option<String>,
    business_name: Option<String>,
    business_email: Option<String>,
    business_funding_source: Option<String>,
}

impl From<DuePaymentRow> for DuePayment {
    fn from(row: DuePaymentRow) -> Self {
        let borrower = row.borrower_id.map(|id| Party {
            id: Some(id),
            name: row.borrower_name.unwrap_or_default(),
            email: row.borrower_email,
            funding_source_url: row.borrower_profile_funding_source,
        });

        // Individual lender, then business lender, then invited guest
        let lender = if let Some(id) = row.lender_id {
            Some(Party {
                id: Some(id),
                name: row.lender_name.unwrap_or_default(),
                email: row.lender_email,
                funding_source_url: row.lender_profile_funding_source,
            })
        } else if let Some(id) = row.business_lender_id {
            Some(Party {
                id: Some(id),
                name: row.business_name.unwrap_or_default(),
                email: row.business_email,
                funding_source_url: row.business_funding_source,
            })
        } else {
            row.invite_email.clone().map(|email| Party {
                id: None,
                name: String::new(),
                email: Some(email),
                funding_source_url: None,
            })
        };

        DuePayment {
            schedule: PaymentScheduleItem {
                id: row.schedule_id,
                loan_id: row.loan_id,
                amount: row.schedule_amount,
                due_date: row.due_date,
                is_paid: row.is_paid,
                status: row.schedule_status,
                transfer_id: row.transfer_id,
                paid_at: row.paid_at,
                platform_fee: row.platform_fee,
                payment_id: row.payment_id,
                notes: row.notes,
            },
            loan: Loan {
                id: row.loan_id,
                borrower_id: row.borrower_id,
                lender_id: row.lender_id,
                business_lender_id: row.business_lender_id,
                amount: row.loan_amount,
                total_amount: row.total_amount,
                amount_paid: row.amount_paid,
                amount_remaining: row.amount_remaining,
                status: row.loan_status,
                borrower_funding_source_url: row.borrower_funding_source_url,
                lender_funding_source_url: row.lender_funding_source_url,
                invite_token: row.invite_token,
                invite_email: row.invite_email,
                last_payment_at: row.last_payment_at,
                completed_at: row.completed_at,
                created_at: row.loan_created_at,
                updated_at: row.loan_updated_at,
            },
            borrower,
            lender,
        }
    }
}

/// Ledger store backed by the application's Postgres database
#[derive(Clone)]
pub struct PgLedgerStore {
    db_pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    fn due_payment_query(&self) -> QueryBuilder<'static, Postgres> {
        QueryBuilder::new(DUE_PAYMENT_SELECT)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ping(&self) -> PaymentResult<()> {
        db::check_health(&self.db_pool)
            .await
            .map_err(|e| PaymentError::Ledger(e.to_string()))
    }

    async fn fetch_due_payments(&self, today: NaiveDate) -> PaymentResult<Vec<DuePayment>> {
        let mut query = self.due_payment_query();
        query.push(" WHERE ps.is_paid = false AND ps.status <> 'missed' AND ps.due_date <= ");
        query.push_bind(today);
        query.push(" AND l.status = 'active' ORDER BY ps.due_date ASC, ps.id ASC");

        let rows = query
            .build_query_as::<DuePaymentRow>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(rows.into_iter().map(DuePayment::from).collect())
    }

    async fn get_due_payment(&self, schedule_id: Uuid) -> PaymentResult<Option<DuePayment>> {
        let mut query = self.due_payment_query();
        query.push(" WHERE ps.id = ");
        query.push_bind(schedule_id);

        let row = query
            .build_query_as::<DuePaymentRow>()
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(DuePayment::from))
    }

    async fn earliest_unpaid_payment(
        &self,
        loan_id: Uuid,
        today: NaiveDate,
    ) -> PaymentResult<Option<DuePayment>> {
        let mut query = self.due_payment_query();
        query.push(" WHERE ps.loan_id = ");
        query.push_bind(loan_id);
        query.push(" AND ps.is_paid = false AND ps.due_date <= ");
        query.push_bind(today);
        query.push(" ORDER BY ps.due_date ASC LIMIT 1");

        let row = query
            .build_query_as::<DuePaymentRow>()
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(DuePayment::from))
    }

    async fn find_payment_by_transfer_id(
        &self,
        transfer_id: &str,
    ) -> PaymentResult<Option<DuePayment>> {
        let mut query = self.due_payment_query();
        query.push(" WHERE ps.transfer_id = ");
        query.push_bind(transfer_id.to_string());

        let row = query
            .build_query_as::<DuePaymentRow>()
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(DuePayment::from))
    }

    async fn upsert_transfer(&self, transfer: &NewTransfer) -> PaymentResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO transfers (
                dwolla_transfer_id, loan_id, type, amount, status,
                platform_fee, fee_type, gross_amount, net_amount
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (dwolla_transfer_id) DO NOTHING
            "#,
        )
        .bind(&transfer.dwolla_transfer_id)
        .bind(transfer.loan_id)
        .bind(transfer.transfer_type)
        .bind(transfer.amount)
        .bind(transfer.status)
        .bind(transfer.platform_fee)
        .bind(&transfer.fee_type)
        .bind(transfer.gross_amount)
        .bind(transfer.net_amount)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_transfer(&self, transfer_id: &str) -> PaymentResult<Option<Transfer>> {
        let transfer =
            sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE dwolla_transfer_id = $1")
                .bind(transfer_id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(transfer)
    }

    async fn update_transfer_status(
        &self,
        transfer_id: &str,
        status: TransferStatus,
    ) -> PaymentResult<bool> {
        let result = sqlx::query(
            "UPDATE transfers SET status = $1, updated_at = $2 WHERE dwolla_transfer_id = $3",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(transfer_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_schedule_paid(&self, update: &SchedulePaidUpdate) -> PaymentResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_schedule
            SET is_paid = true, status = 'paid', transfer_id = $1,
                paid_at = $2, platform_fee = $3
            WHERE id = $4 AND is_paid = false AND transfer_id IS NULL
            "#,
        )
        .bind(&update.transfer_id)
        .bind(update.paid_at)
        .bind(update.platform_fee)
        .bind(update.schedule_id)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PaymentError::Ledger(format!(
                "schedule item {} was not updated for transfer {}",
                update.schedule_id, update.transfer_id
            )));
        }

        Ok(())
    }

    async fn mark_schedule_missed(&self, schedule_id: Uuid, note: &str) -> PaymentResult<()> {
        sqlx::query("UPDATE payment_schedule SET status = 'missed', notes = $1 WHERE id = $2")
            .bind(note)
            .bind(schedule_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn insert_payment(&self, payment: &NewPayment) -> PaymentResult<Uuid> {
        let (id,) = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO payments (loan_id, schedule_id, amount, payment_date, status, transfer_id, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(payment.loan_id)
        .bind(payment.schedule_id)
        .bind(payment.amount)
        .bind(payment.payment_date)
        .bind(&payment.status)
        .bind(&payment.transfer_id)
        .bind(&payment.note)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(id)
    }

    async fn link_schedule_payment(&self, schedule_id: Uuid, payment_id: Uuid) -> PaymentResult<()> {
        sqlx::query("UPDATE payment_schedule SET payment_id = $1 WHERE id = $2")
            .bind(payment_id)
            .bind(schedule_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn count_unpaid_schedule_items(&self, loan_id: Uuid) -> PaymentResult<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM payment_schedule WHERE loan_id = $1 AND is_paid = false",
        )
        .bind(loan_id)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(count)
    }

    async fn get_loan(&self, loan_id: Uuid) -> PaymentResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            SELECT id, borrower_id, lender_id, business_lender_id, amount, total_amount,
                   amount_paid, amount_remaining, status, borrower_funding_source_url,
                   lender_funding_source_url, invite_token, invite_email,
                   last_payment_at, completed_at, created_at, updated_at
            FROM loans
            WHERE id = $1
            "#,
        )
        .bind(loan_id)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(loan)
    }

    async fn update_loan_balance(&self, update: &LoanBalanceUpdate) -> PaymentResult<()> {
        sqlx::query(
            r#"
            UPDATE loans
            SET amount_paid = $1, amount_remaining = $2, status = $3,
                last_payment_at = $4, completed_at = COALESCE($5, completed_at),
                updated_at = $4
            WHERE id = $6
            "#,
        )
        .bind(update.amount_paid)
        .bind(update.amount_remaining)
        .bind(update.status)
        .bind(update.last_payment_at)
        .bind(update.completed_at)
        .bind(update.loan_id)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn register_missed_payment(
        &self,
        borrower_id: Uuid,
    ) -> PaymentResult<Option<BorrowerProfile>> {
        let mut tx = self.db_pool.begin().await?;

        let profile = sqlx::query_as::<_, BorrowerProfile>(PROFILE_FOR_UPDATE)
            .bind(borrower_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(mut profile) = profile else {
            return Ok(None);
        };

        profile.register_miss();
        sqlx::query("UPDATE users SET payments_missed = $1, borrower_rating = $2 WHERE id = $3")
            .bind(profile.payments_missed)
            .bind(profile.borrower_rating)
            .bind(borrower_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(profile))
    }

    async fn record_notification(&self, notification: &NewNotification) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (user_id, loan_id, type, title, message)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(notification.user_id)
        .bind(notification.loan_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.message)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }
}
