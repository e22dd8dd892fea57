//! Trust score arithmetic
//!
//! Point weights are placeholders. The rest of the service only depends on
//! the sign of each adjustment.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::{BorrowerProfile, BorrowerRating};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Points for a payment made before its due date
const POINTS_EARLY: i32 = 4;

/// Points for a payment made on the due date or within the grace period
const POINTS_ON_TIME: i32 = 3;

/// Points for a late payment (still positive: the debt was paid)
const POINTS_LATE: i32 = 1;

/// Bonus when the payment closes out the loan
const POINTS_LOAN_COMPLETED: i32 = 10;

/// Base penalty for a missed payment
const PENALTY_MISSED: i32 = 5;

/// Extra penalty per full week overdue, capped by `MAX_OVERDUE_WEEKS`
const PENALTY_PER_OVERDUE_WEEK: i32 = 1;
const MAX_OVERDUE_WEEKS: i64 = 5;

/// Days after the due date that still count as on time
const LATE_GRACE_DAYS: i64 = 3;

const MIN_TRUST_SCORE: i32 = 0;
const MAX_TRUST_SCORE: i32 = 100;

/// Borrowing limits by tier (index 0 is tier 1)
const TIER_LIMITS: [i64; 5] = [150, 300, 600, 1200, 2500];

/// Completed loans needed at a tier before moving up
const LOANS_PER_TIER: i32 = 2;

/// Minimum score to be promoted to the next tier
const MIN_SCORE_FOR_PROMOTION: i32 = 60;

// ============================================================================
// Timing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTiming {
    Early,
    OnTime,
    Late,
}

impl PaymentTiming {
    pub fn classify(due_date: NaiveDate, paid_on: NaiveDate) -> Self {
        let days_late = (paid_on - due_date).num_days();
        if days_late < 0 {
            PaymentTiming::Early
        } else if days_late <= LATE_GRACE_DAYS {
            PaymentTiming::OnTime
        } else {
            PaymentTiming::Late
        }
    }

    fn points(&self) -> i32 {
        match self {
            PaymentTiming::Early => POINTS_EARLY,
            PaymentTiming::OnTime => POINTS_ON_TIME,
            PaymentTiming::Late => POINTS_LATE,
        }
    }
}

// ============================================================================
// Adjustments
// ============================================================================

/// Score change for a completed payment
pub fn completed_points(timing: PaymentTiming, loan_completed: bool) -> i32 {
    timing.points() + if loan_completed { POINTS_LOAN_COMPLETED } else { 0 }
}

/// Score change (negative) for a missed payment
pub fn missed_points(days_overdue: i64) -> i32 {
    let weeks = (days_overdue.max(0) / 7).min(MAX_OVERDUE_WEEKS) as i32;
    -(PENALTY_MISSED + weeks * PENALTY_PER_OVERDUE_WEEK)
}

/// Apply a completed payment to a borrower profile.
///
/// Ratings only move up here; downgrades happen on misses.
pub fn apply_completed(
    profile: &mut BorrowerProfile,
    amount: Decimal,
    timing: PaymentTiming,
    loan_completed: bool,
    skip_user_stats: bool,
) -> i32 {
    let points = completed_points(timing, loan_completed);
    profile.trust_score = clamp_score(profile.trust_score + points);

    if !skip_user_stats {
        profile.total_payments_made += 1;
        match timing {
            PaymentTiming::Early => profile.payments_early += 1,
            PaymentTiming::OnTime => profile.payments_on_time += 1,
            PaymentTiming::Late => profile.payments_late += 1,
        }
        profile.total_amount_repaid += amount;
        profile.current_outstanding_amount =
            (profile.current_outstanding_amount - amount).max(Decimal::ZERO);
    }

    if loan_completed {
        profile.total_loans_completed += 1;
        profile.loans_at_current_tier += 1;
        maybe_promote(profile);
    }

    let earned = rating_for_score(profile.trust_score);
    if rank(earned) < rank(profile.borrower_rating) {
        profile.borrower_rating = earned;
    }

    points
}

/// Apply a missed payment's score penalty. The miss counter and rating
/// ladder are handled separately by the auto-pay flow.
pub fn apply_missed(profile: &mut BorrowerProfile, days_overdue: i64) -> i32 {
    let points = missed_points(days_overdue);
    profile.trust_score = clamp_score(profile.trust_score + points);
    points
}

fn maybe_promote(profile: &mut BorrowerProfile) {
    let max_tier = TIER_LIMITS.len() as i32;
    if profile.borrowing_tier < max_tier
        && profile.loans_at_current_tier >= LOANS_PER_TIER
        && profile.trust_score >= MIN_SCORE_FOR_PROMOTION
    {
        profile.borrowing_tier += 1;
        profile.loans_at_current_tier = 0;
    }
    profile.max_borrowing_amount = tier_limit(profile.borrowing_tier);
}

pub fn tier_limit(tier: i32) -> Decimal {
    let index = (tier.clamp(1, TIER_LIMITS.len() as i32) - 1) as usize;
    Decimal::from(TIER_LIMITS[index])
}

pub fn rating_for_score(score: i32) -> BorrowerRating {
    match score {
        85..=i32::MAX => BorrowerRating::Great,
        70..=84 => BorrowerRating::Good,
        50..=69 => BorrowerRating::Neutral,
        35..=49 => BorrowerRating::Poor,
        20..=34 => BorrowerRating::Bad,
        _ => BorrowerRating::Worst,
    }
}

/// 0 is best
fn rank(rating: BorrowerRating) -> u8 {
    match rating {
        BorrowerRating::Great => 0,
        BorrowerRating::Good => 1,
        BorrowerRating::Neutral => 2,
        BorrowerRating::Poor => 3,
        BorrowerRating::Bad => 4,
        BorrowerRating::Worst => 5,
    }
}

fn clamp_score(score: i32) -> i32 {
    score.clamp(MIN_TRUST_SCORE, MAX_TRUST_SCORE)
}
