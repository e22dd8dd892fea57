//! Postgres-backed trust engine

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::scoring::{self, PaymentTiming};
use super::{CompletedPaymentEvent, MissedPaymentEvent, TrustEngine, TrustUpdate};
use crate::error::{PaymentError, PaymentResult};
use crate::models::{BorrowerProfile, LoanStatus};

const EVENT_PAYMENT_COMPLETED: &str = "payment_completed";
const EVENT_PAYMENT_MISSED: &str = "payment_missed";

/// Trust engine writing to the `users` and `trust_score_events` tables.
///
/// The dedup guard is a row in `trust_score_events` unique on
/// `(event_kind, schedule_id)`; only the call that inserts it goes on to
/// touch the borrower's profile.
#[derive(Clone)]
pub struct PgTrustEngine {
    db_pool: PgPool,
}

impl PgTrustEngine {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Claim the event. `false` means it was already applied.
    async fn claim_event(
        &self,
        event_kind: &str,
        schedule_id: Uuid,
        borrower_id: Uuid,
        loan_id: Uuid,
        payment_method: Option<&str>,
    ) -> PaymentResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO trust_score_events (event_kind, schedule_id, borrower_id, loan_id, payment_method)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_kind, schedule_id) DO NOTHING
            "#,
        )
        .bind(event_kind)
        .bind(schedule_id)
        .bind(borrower_id)
        .bind(loan_id)
        .bind(payment_method)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Drop a claim whose profile update failed so a later delivery can retry it
    async fn release_event(&self, event_kind: &str, schedule_id: Uuid) {
        let result = sqlx::query(
            "DELETE FROM trust_score_events WHERE event_kind = $1 AND schedule_id = $2",
        )
        .bind(event_kind)
        .bind(schedule_id)
        .execute(&self.db_pool)
        .await;

        if let Err(e) = result {
            tracing::error!(%schedule_id, event_kind, "Failed to release trust event claim: {}", e);
        }
    }

    async fn record_points(&self, event_kind: &str, schedule_id: Uuid, points: i32) -> PaymentResult<()> {
        sqlx::query(
            "UPDATE trust_score_events SET points = $1 WHERE event_kind = $2 AND schedule_id = $3",
        )
        .bind(points)
        .bind(event_kind)
        .bind(schedule_id)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    /// Locks the borrower's row until `conn`'s transaction ends
    async fn lock_profile(conn: &mut PgConnection, borrower_id: Uuid) -> PaymentResult<BorrowerProfile> {
        sqlx::query_as::<_, BorrowerProfile>(
            r#"
            SELECT id, trust_score, payments_missed, borrower_rating, borrowing_tier,
                   max_borrowing_amount, total_payments_made, payments_early,
                   payments_on_time, payments_late, total_amount_repaid,
                   current_outstanding_amount, loans_at_current_tier, total_loans_completed
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(borrower_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| PaymentError::NotFound(format!("Borrower {}", borrower_id)))
    }

    async fn save_profile(conn: &mut PgConnection, profile: &BorrowerProfile) -> PaymentResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET trust_score = $1, borrower_rating = $2, borrowing_tier = $3,
                max_borrowing_amount = $4, total_payments_made = $5, payments_early = $6,
                payments_on_time = $7, payments_late = $8, total_amount_repaid = $9,
                current_outstanding_amount = $10, loans_at_current_tier = $11,
                total_loans_completed = $12
            WHERE id = $13
            "#,
        )
        .bind(profile.trust_score)
        .bind(profile.borrower_rating)
        .bind(profile.borrowing_tier)
        .bind(profile.max_borrowing_amount)
        .bind(profile.total_payments_made)
        .bind(profile.payments_early)
        .bind(profile.payments_on_time)
        .bind(profile.payments_late)
        .bind(profile.total_amount_repaid)
        .bind(profile.current_outstanding_amount)
        .bind(profile.loans_at_current_tier)
        .bind(profile.total_loans_completed)
        .bind(profile.id)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn loan_completed(&self, loan_id: Uuid) -> PaymentResult<bool> {
        let status = sqlx::query_scalar::<_, LoanStatus>("SELECT status FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(status == Some(LoanStatus::Completed))
    }

    async fn apply_completed(&self, event: &CompletedPaymentEvent) -> PaymentResult<bool> {
        let claimed = self
            .claim_event(
                EVENT_PAYMENT_COMPLETED,
                event.schedule_id,
                event.borrower_id,
                event.loan_id,
                Some(event.payment_method.as_str()),
            )
            .await?;
        if !claimed {
            return Ok(false);
        }

        if let Err(e) = self.credit_completed(event).await {
            self.release_event(EVENT_PAYMENT_COMPLETED, event.schedule_id)
                .await;
            return Err(e);
        }
        Ok(true)
    }

    async fn credit_completed(&self, event: &CompletedPaymentEvent) -> PaymentResult<()> {
        let timing = PaymentTiming::classify(event.due_date, Utc::now().date_naive());
        let loan_completed = self.loan_completed(event.loan_id).await?;

        let mut tx = self.db_pool.begin().await?;
        let mut profile = Self::lock_profile(&mut tx, event.borrower_id).await?;

        let points = scoring::apply_completed(
            &mut profile,
            event.amount,
            timing,
            loan_completed,
            event.skip_user_stats,
        );
        Self::save_profile(&mut tx, &profile).await?;
        tx.commit().await?;
        self.record_points(EVENT_PAYMENT_COMPLETED, event.schedule_id, points)
            .await?;

        tracing::info!(
            borrower_id = %event.borrower_id,
            schedule_id = %event.schedule_id,
            method = event.payment_method.as_str(),
            points,
            trust_score = profile.trust_score,
            "Trust score credited"
        );
        Ok(())
    }

    async fn apply_missed(&self, event: &MissedPaymentEvent) -> PaymentResult<bool> {
        let claimed = self
            .claim_event(
                EVENT_PAYMENT_MISSED,
                event.schedule_id,
                event.borrower_id,
                event.loan_id,
                None,
            )
            .await?;
        if !claimed {
            return Ok(false);
        }

        if let Err(e) = self.penalise_missed(event).await {
            self.release_event(EVENT_PAYMENT_MISSED, event.schedule_id)
                .await;
            return Err(e);
        }
        Ok(true)
    }

    async fn penalise_missed(&self, event: &MissedPaymentEvent) -> PaymentResult<()> {
        let mut tx = self.db_pool.begin().await?;
        let mut profile = Self::lock_profile(&mut tx, event.borrower_id).await?;
        let points = scoring::apply_missed(&mut profile, event.days_overdue);

        // Only the score: the miss counter and rating belong to the auto-pay ladder
        sqlx::query("UPDATE users SET trust_score = $1 WHERE id = $2")
            .bind(profile.trust_score)
            .bind(profile.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.record_points(EVENT_PAYMENT_MISSED, event.schedule_id, points)
            .await?;

        tracing::info!(
            borrower_id = %event.borrower_id,
            schedule_id = %event.schedule_id,
            days_overdue = event.days_overdue,
            points,
            trust_score = profile.trust_score,
            "Trust score penalised"
        );
        Ok(())
    }
}

fn into_update(result: PaymentResult<bool>) -> TrustUpdate {
    match result {
        Ok(true) => TrustUpdate::updated(),
        Ok(false) => TrustUpdate::duplicate(),
        Err(e) => TrustUpdate::failed(e.to_string()),
    }
}

#[async_trait]
impl TrustEngine for PgTrustEngine {
    async fn record_completed_payment(&self, event: CompletedPaymentEvent) -> TrustUpdate {
        into_update(self.apply_completed(&event).await)
    }

    async fn record_missed_payment(&self, event: MissedPaymentEvent) -> TrustUpdate {
        into_update(self.apply_missed(&event).await)
    }
}
