//! Auto-pay batch and manual trigger behaviour over the in-memory ledger

mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use uuid::Uuid;

use autopay_server::autopay::{
    AutoPayConfig, FundingSources, ManualTriggerRequest, PaymentOutcome, SkipReason,
};
use autopay_server::error::PaymentError;
use autopay_server::ledger::LedgerStore;
use autopay_server::models::{BorrowerRating, LoanStatus, ScheduleStatus, TransferStatus};
use autopay_server::trust::PaymentMethod;

use common::{
    count_by, now, seed_loan, FakeGateway, Funding, Harness, LoanSeed, APP_URL,
};

// ============================================================================
// Scheduled run
// ============================================================================

#[tokio::test]
async fn test_due_payment_is_charged_and_recorded() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![1, -30])).await;
    let schedule_id = loan.schedule_ids[0];

    let summary = h.processor.run(now()).await.unwrap();

    assert!(summary.success);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert!(summary.errors.is_empty());
    assert_eq!(summary.deferred, None);

    let expected_transfer = FakeGateway::transfer_id_for(schedule_id);
    let item = h.store.schedule_item(schedule_id).await.unwrap();
    assert!(item.is_paid);
    assert_eq!(item.status, ScheduleStatus::Paid);
    assert_eq!(item.transfer_id.as_deref(), Some(expected_transfer.as_str()));
    assert_eq!(item.paid_at, Some(now()));
    assert!(item.payment_id.is_some());

    let transfers = h.store.transfers().await;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].dwolla_transfer_id, expected_transfer);
    assert_eq!(transfers[0].status, TransferStatus::Pending);
    assert_eq!(transfers[0].amount, dec!(50));

    let payments = h.store.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].payment.status, "completed");
    assert_eq!(payments[0].payment.transfer_id, expected_transfer);
    assert_eq!(item.payment_id, Some(payments[0].id));

    let stored = h.store.loan(loan.loan_id).await.unwrap();
    assert_eq!(stored.amount_paid, dec!(50));
    assert_eq!(stored.amount_remaining, dec!(450));
    assert_eq!(stored.status, LoanStatus::Active);
    assert_eq!(stored.last_payment_at, Some(now()));

    assert_eq!(h.notifier.sent_to(&loan.lender_email).await.len(), 1);
    assert_eq!(h.notifier.sent_to(&loan.borrower_email).await.len(), 1);
    assert_eq!(h.store.notifications().await.len(), 2);
}

#[tokio::test]
async fn test_second_run_charges_nothing() {
    let h = Harness::new();
    seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![2])).await;

    let first = h.processor.run(now()).await.unwrap();
    assert_eq!(first.processed, 1);

    let second = h.processor.run(now()).await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.note.as_deref(), Some("No payments due"));
    assert_eq!(h.gateway.calls(), 1);
    assert_eq!(h.store.transfers().await.len(), 1);
}

#[tokio::test]
async fn test_future_installments_are_not_charged() {
    let h = Harness::new();
    seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![-1, -31])).await;

    let summary = h.processor.run(now()).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.note.as_deref(), Some("No payments due"));
    assert_eq!(h.gateway.calls(), 0);
}

#[tokio::test]
async fn test_installment_due_today_is_charged() {
    let h = Harness::new();
    seed_loan(&h.store, LoanSeed::new(dec!(100), dec!(100), vec![0])).await;

    let summary = h.processor.run(now()).await.unwrap();
    assert_eq!(summary.processed, 1);
}

#[tokio::test]
async fn test_concurrent_processing_of_one_item_moves_money_once() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![3])).await;
    let due = h
        .store
        .get_due_payment(loan.schedule_ids[0])
        .await
        .unwrap()
        .unwrap();

    let (a, b) = tokio::join!(h.handler.process(&due, now()), h.handler.process(&due, now()));

    let processed = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Ok(PaymentOutcome::Processed(_))))
        .count();
    let failed = [&a, &b].iter().filter(|r| r.is_err()).count();
    assert_eq!(processed, 1);
    assert_eq!(failed, 1);

    let transfers = h.store.transfers().await;
    assert_eq!(transfers.len(), 1);
    let counts = count_by(&transfers, |t| t.dwolla_transfer_id.clone());
    assert!(counts.values().all(|&n| n == 1));

    let stored = h.store.loan(loan.loan_id).await.unwrap();
    assert_eq!(stored.amount_paid, dec!(50));
}

#[tokio::test]
async fn test_batch_size_caps_the_run() {
    let h = Harness::new();
    for _ in 0..40 {
        seed_loan(&h.store, LoanSeed::new(dec!(100), dec!(10), vec![1])).await;
    }

    let first = h.processor.run(now()).await.unwrap();
    assert_eq!(first.processed, 25);
    assert_eq!(first.deferred, Some(15));

    let second = h.processor.run(now()).await.unwrap();
    assert_eq!(second.processed, 15);
    assert_eq!(second.deferred, None);
    assert_eq!(h.gateway.calls(), 40);
}

#[tokio::test]
async fn test_one_installment_per_loan_per_run() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(300), dec!(100), vec![14, 7, -7])).await;

    let first = h.processor.run(now()).await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(first.deferred, Some(1));
    assert!(h.store.schedule_item(loan.schedule_ids[0]).await.unwrap().is_paid);
    assert!(!h.store.schedule_item(loan.schedule_ids[1]).await.unwrap().is_paid);

    let second = h.processor.run(now()).await.unwrap();
    assert_eq!(second.processed, 1);
    assert_eq!(second.deferred, None);

    let stored = h.store.loan(loan.loan_id).await.unwrap();
    assert_eq!(stored.amount_paid, dec!(200));
    assert_eq!(stored.amount_remaining, dec!(100));
    assert_eq!(stored.status, LoanStatus::Active);
}

#[tokio::test]
async fn test_small_concurrency_still_processes_everything() {
    let h = Harness::with_config(AutoPayConfig::new(10, 1, APP_URL.to_string()));
    for _ in 0..4 {
        seed_loan(&h.store, LoanSeed::new(dec!(100), dec!(25), vec![1])).await;
    }

    let summary = h.processor.run(now()).await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.deferred, None);
}

#[tokio::test]
async fn test_gateway_failure_is_isolated() {
    let h = Harness::new();
    let mut loans = Vec::new();
    for _ in 0..10 {
        loans.push(seed_loan(&h.store, LoanSeed::new(dec!(100), dec!(50), vec![2])).await);
    }
    let bad = &loans[2];
    h.gateway.fail_for_source(&bad.borrower_source).await;

    let summary = h.processor.run(now()).await.unwrap();

    assert!(summary.success);
    assert_eq!(summary.processed, 9);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with(&format!("Payment {}:", bad.schedule_ids[0])));
    assert!(summary.errors[0].contains("insufficient funds"));

    let failed_item = h.store.schedule_item(bad.schedule_ids[0]).await.unwrap();
    assert!(!failed_item.is_paid);
    assert!(failed_item.transfer_id.is_none());
    assert_eq!(failed_item.status, ScheduleStatus::Scheduled);

    for loan in loans.iter().filter(|l| l.loan_id != bad.loan_id) {
        assert!(h.store.schedule_item(loan.schedule_ids[0]).await.unwrap().is_paid);
    }
    assert_eq!(h.store.transfers().await.len(), 9);
}

#[tokio::test]
async fn test_failed_schedule_update_leaves_transfer_record() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(100), dec!(50), vec![1])).await;
    h.store.fail_schedule_update_for(loan.schedule_ids[0]).await;

    let summary = h.processor.run(now()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(h.store.transfers().await.len(), 1);
    assert!(h.store.payments().await.is_empty());
    assert_eq!(h.store.loan(loan.loan_id).await.unwrap().amount_paid, Decimal::ZERO);
    assert!(h.notifier.sent().await.is_empty());
}

#[tokio::test]
async fn test_audit_row_failure_does_not_fail_payment() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(100), dec!(50), vec![1])).await;
    h.store.fail_payment_inserts(true);

    let summary = h.processor.run(now()).await.unwrap();

    assert_eq!(summary.processed, 1);
    let item = h.store.schedule_item(loan.schedule_ids[0]).await.unwrap();
    assert!(item.is_paid);
    assert!(item.payment_id.is_none());
    assert_eq!(h.store.loan(loan.loan_id).await.unwrap().amount_paid, dec!(50));
}

#[tokio::test]
async fn test_fetch_failure_aborts_run() {
    let h = Harness::new();
    seed_loan(&h.store, LoanSeed::new(dec!(100), dec!(50), vec![1])).await;
    h.store.fail_due_fetch(true);

    let err = h.processor.run(now()).await.unwrap_err();
    assert!(matches!(err, PaymentError::Ledger(_)));
    assert_eq!(h.gateway.calls(), 0);
}

// ============================================================================
// Loan balance
// ============================================================================

#[tokio::test]
async fn test_rounding_remainder_completes_loan() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(100.40), dec!(50), vec![1, -30]).amount_paid(dec!(50)),
    )
    .await;

    let summary = h.processor.run(now()).await.unwrap();
    assert_eq!(summary.processed, 1);

    let stored = h.store.loan(loan.loan_id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Completed);
    assert_eq!(stored.amount_paid, dec!(100));
    assert_eq!(stored.amount_remaining, Decimal::ZERO);
    assert_eq!(stored.completed_at, Some(now()));

    let borrower_mail = h.notifier.sent_to(&loan.borrower_email).await;
    assert_eq!(borrower_mail.len(), 1);
    assert_eq!(borrower_mail[0].subject, "Your loan is fully repaid");
}

#[tokio::test]
async fn test_last_installment_completes_loan() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(200), dec!(100), vec![1]).amount_paid(dec!(90)),
    )
    .await;

    h.processor.run(now()).await.unwrap();

    let stored = h.store.loan(loan.loan_id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Completed);
    assert_eq!(stored.amount_remaining, dec!(10));
}

#[tokio::test]
async fn test_completed_loan_is_not_fetched_again() {
    let h = Harness::new();
    seed_loan(&h.store, LoanSeed::new(dec!(50), dec!(50), vec![1])).await;

    h.processor.run(now()).await.unwrap();
    let summary = h.processor.run(now()).await.unwrap();
    assert_eq!(summary.note.as_deref(), Some("No payments due"));
}

// ============================================================================
// Missing bank connection
// ============================================================================

#[tokio::test]
async fn test_missing_borrower_source_marks_payment_missed() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![10]).funding(Funding::NoBorrowerSource),
    )
    .await;
    let schedule_id = loan.schedule_ids[0];

    let summary = h.processor.run(now()).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.gateway.calls(), 0);
    assert!(h.store.transfers().await.is_empty());

    let item = h.store.schedule_item(schedule_id).await.unwrap();
    assert_eq!(item.status, ScheduleStatus::Missed);
    assert!(!item.is_paid);
    assert!(item.transfer_id.is_none());
    assert_eq!(
        item.notes.as_deref(),
        Some("Auto-pay failed: Borrower has no bank account connected")
    );

    let missed = h.trust.missed().await;
    assert_eq!(missed.len(), 1);
    assert_eq!(missed[0].schedule_id, schedule_id);
    assert_eq!(missed[0].days_overdue, 10);

    let profile = h.store.borrower(loan.borrower_id).await.unwrap();
    assert_eq!(profile.payments_missed, 1);

    let lender_mail = h.notifier.sent_to(&loan.lender_email).await;
    assert_eq!(lender_mail.len(), 1);
    assert!(lender_mail[0].subject.contains("$50.00"));

    let stored = h.store.loan(loan.loan_id).await.unwrap();
    assert_eq!(stored.amount_remaining, dec!(500));

    let notifications = h.store.notifications().await;
    assert!(notifications
        .iter()
        .any(|n| n.kind == "payment_missed" && n.user_id == Some(loan.borrower_id)));
}

#[tokio::test]
async fn test_missed_payment_is_not_retried() {
    let h = Harness::new();
    seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![3]).funding(Funding::NoLenderSource),
    )
    .await;

    let first = h.processor.run(now()).await.unwrap();
    assert_eq!(first.skipped, 1);

    let second = h.processor.run(now()).await.unwrap();
    assert_eq!(second.note.as_deref(), Some("No payments due"));
    assert_eq!(h.trust.missed().await.len(), 1);
}

#[tokio::test]
async fn test_third_miss_drops_rating_to_worst() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![5])
            .funding(Funding::NoLenderSource)
            .borrower_history(2, BorrowerRating::Good),
    )
    .await;

    h.processor.run(now()).await.unwrap();

    let profile = h.store.borrower(loan.borrower_id).await.unwrap();
    assert_eq!(profile.payments_missed, 3);
    assert_eq!(profile.borrower_rating, BorrowerRating::Worst);
}

#[tokio::test]
async fn test_first_miss_softens_good_rating() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![5])
            .funding(Funding::NoBorrowerSource)
            .borrower_history(0, BorrowerRating::Great),
    )
    .await;

    h.processor.run(now()).await.unwrap();

    let profile = h.store.borrower(loan.borrower_id).await.unwrap();
    assert_eq!(profile.payments_missed, 1);
    assert_eq!(profile.borrower_rating, BorrowerRating::Neutral);
}

#[tokio::test]
async fn test_misses_on_two_loans_of_one_borrower_both_count() {
    let h = Harness::new();
    h.store.set_latency(Duration::from_millis(20));
    let first = seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![4])
            .funding(Funding::NoBorrowerSource)
            .borrower_history(0, BorrowerRating::Good),
    )
    .await;
    seed_loan(
        &h.store,
        LoanSeed::new(dec!(300), dec!(30), vec![4])
            .funding(Funding::NoBorrowerSource)
            .same_borrower_as(&first),
    )
    .await;

    let summary = h.processor.run(now()).await.unwrap();
    assert_eq!(summary.skipped, 2);

    let profile = h.store.borrower(first.borrower_id).await.unwrap();
    assert_eq!(profile.payments_missed, 2);
    assert_eq!(profile.borrower_rating, BorrowerRating::Bad);
}

// ============================================================================
// Trust credit
// ============================================================================

#[tokio::test]
async fn test_gateway_loan_defers_trust_credit() {
    let h = Harness::new();
    seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![1])).await;

    h.processor.run(now()).await.unwrap();

    assert!(h.trust.completed().await.is_empty());
}

#[tokio::test]
async fn test_profile_funded_loan_defers_trust_credit() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![1]).funding(Funding::OnProfiles),
    )
    .await;

    let summary = h.processor.run(now()).await.unwrap();
    assert_eq!(summary.processed, 1);

    let transfers = h.store.transfers().await;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].status, TransferStatus::Pending);
    assert_eq!(
        transfers[0].dwolla_transfer_id,
        FakeGateway::transfer_id_for(loan.schedule_ids[0])
    );
    assert!(h.trust.completed().await.is_empty());
}

#[tokio::test]
async fn test_loan_without_connected_sources_gets_immediate_trust_credit() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![1]).funding(Funding::NoBorrowerSource),
    )
    .await;
    let mut due = h
        .store
        .get_due_payment(loan.schedule_ids[0])
        .await
        .unwrap()
        .unwrap();
    due.loan.lender_funding_source_url = None;
    assert!(!due.is_gateway_capable());

    let sources = FundingSources {
        source: "https://gateway.test/funding-sources/manual-debit".to_string(),
        destination: "https://gateway.test/funding-sources/manual-credit".to_string(),
    };
    let processed = h.handler.charge(&due, &sources, now()).await.unwrap();
    assert_eq!(processed.schedule_id, loan.schedule_ids[0]);

    let completed = h.trust.completed().await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].schedule_id, loan.schedule_ids[0]);
    assert_eq!(completed[0].borrower_id, loan.borrower_id);
    assert_eq!(completed[0].payment_method, PaymentMethod::Auto);
    assert_eq!(completed[0].amount, dec!(50));
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_guest_lender_email_links_guest_page() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![1]).guest_lender("guest-token-1"),
    )
    .await;

    let summary = h.processor.run(now()).await.unwrap();
    assert_eq!(summary.processed, 1);

    let lender_mail = h.notifier.sent_to(&loan.lender_email).await;
    assert_eq!(lender_mail.len(), 1);
    assert!(lender_mail[0]
        .html
        .contains(&format!("{}/loans/guest/guest-token-1", APP_URL)));
}

#[tokio::test]
async fn test_platform_fee_is_reported() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![1])).await;
    h.gateway.charge_fee(dec!(1.25)).await;

    h.processor.run(now()).await.unwrap();

    let item = h.store.schedule_item(loan.schedule_ids[0]).await.unwrap();
    assert_eq!(item.platform_fee, Some(dec!(1.25)));
    let transfers = h.store.transfers().await;
    assert_eq!(transfers[0].net_amount, dec!(48.75));
    assert!(h.store.payments().await[0].payment.note.contains("$48.75"));
}

// ============================================================================
// Manual trigger
// ============================================================================

#[tokio::test]
async fn test_manual_trigger_by_payment_id() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![1])).await;
    let schedule_id = loan.schedule_ids[0];

    let response = h
        .handler
        .trigger(
            &ManualTriggerRequest {
                loan_id: None,
                payment_id: Some(schedule_id),
            },
            now(),
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.payment_id, schedule_id);
    assert_eq!(response.transfer_id, FakeGateway::transfer_id_for(schedule_id));
    assert_eq!(response.amount, dec!(50));
    assert_eq!(response.amount_remaining, dec!(450));
    assert_eq!(response.fee.fee_type, "none");
}

#[tokio::test]
async fn test_manual_trigger_by_loan_picks_earliest_due() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(300), dec!(100), vec![3, 20])).await;

    let response = h
        .handler
        .trigger(
            &ManualTriggerRequest {
                loan_id: Some(loan.loan_id),
                payment_id: None,
            },
            now(),
        )
        .await
        .unwrap();

    assert_eq!(response.payment_id, loan.schedule_ids[0]);
}

#[tokio::test]
async fn test_manual_trigger_rejects_paid_item() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![1])).await;
    let request = ManualTriggerRequest {
        loan_id: None,
        payment_id: Some(loan.schedule_ids[0]),
    };

    h.handler.trigger(&request, now()).await.unwrap();
    let err = h.handler.trigger(&request, now()).await.unwrap_err();

    // Paid is checked first
    assert!(matches!(err, PaymentError::AlreadyPaid));
    assert_eq!(h.gateway.calls(), 1);
}

#[tokio::test]
async fn test_manual_trigger_missing_source_has_no_side_effects() {
    let h = Harness::new();
    let loan = seed_loan(
        &h.store,
        LoanSeed::new(dec!(500), dec!(50), vec![4]).funding(Funding::NoLenderSource),
    )
    .await;

    let err = h
        .handler
        .trigger(
            &ManualTriggerRequest {
                loan_id: Some(loan.loan_id),
                payment_id: None,
            },
            now(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::MissingFundingSource(_)));
    let item = h.store.schedule_item(loan.schedule_ids[0]).await.unwrap();
    assert_eq!(item.status, ScheduleStatus::Scheduled);
    assert!(h.trust.missed().await.is_empty());
    assert!(h.notifier.sent().await.is_empty());
    assert_eq!(h.store.borrower(loan.borrower_id).await.unwrap().payments_missed, 0);
}

#[tokio::test]
async fn test_manual_trigger_unknown_payment() {
    let h = Harness::new();

    let err = h
        .handler
        .trigger(
            &ManualTriggerRequest {
                loan_id: None,
                payment_id: Some(Uuid::new_v4()),
            },
            now(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::NotFound(_)));
}

#[tokio::test]
async fn test_scheduled_skip_reports_existing_transfer() {
    let h = Harness::new();
    let loan = seed_loan(&h.store, LoanSeed::new(dec!(500), dec!(50), vec![1])).await;
    let mut due = h
        .store
        .get_due_payment(loan.schedule_ids[0])
        .await
        .unwrap()
        .unwrap();
    due.schedule.transfer_id = Some("transfer-earlier".to_string());

    let outcome = h.handler.process(&due, now()).await.unwrap();

    assert_eq!(
        outcome,
        PaymentOutcome::Skipped(SkipReason::AlreadyTransferred {
            transfer_id: "transfer-earlier".to_string()
        })
    );
    assert_eq!(h.gateway.calls(), 0);
}
