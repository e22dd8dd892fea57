//! Borrower rating downgrade ladder applied after a missed payment

use crate::models::BorrowerRating;

/// Rating after a miss, given the current rating and the miss count
/// *including* the new miss.
///
/// Three or more misses mean `Worst`, two mean `Bad`. A single miss only
/// pulls `Good`/`Great` down to `Neutral`; it never drops anyone below
/// neutral and leaves already-lower ratings as they are.
pub fn downgrade_after_miss(current: BorrowerRating, payments_missed: i32) -> BorrowerRating {
    match payments_missed {
        n if n >= 3 => BorrowerRating::Worst,
        2 => BorrowerRating::Bad,
        1 if matches!(current, BorrowerRating::Good | BorrowerRating::Great) => {
            BorrowerRating::Neutral
        }
        _ => current,
    }
}
