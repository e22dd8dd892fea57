//! Email templates for repayment events
//!
//! Loans with an invite token belong to a guest lender who has no account;
//! their emails link to the guest loan page instead of the dashboard.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::EmailMessage;
use crate::gateway::FeeBreakdown;
use crate::models::Loan;

/// Shared details for every repayment email
#[derive(Debug, Clone)]
pub struct PaymentContext<'a> {
    pub app_url: &'a str,
    pub loan: &'a Loan,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub borrower_name: &'a str,
    pub lender_name: &'a str,
}

impl PaymentContext<'_> {
    fn lender_link(&self) -> String {
        let base = self.app_url.trim_end_matches('/');
        match self.loan.invite_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => format!("{}/loans/guest/{}", base, token),
            None => format!("{}/loans/{}", base, self.loan.id),
        }
    }

    fn borrower_link(&self) -> String {
        format!("{}/loans/{}", self.app_url.trim_end_matches('/'), self.loan.id)
    }
}

fn money(amount: Decimal) -> String {
    format!("${:.2}", amount)
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn layout(heading: &str, body: &str, link: &str, cta: &str) -> String {
    format!(
        r#"<!DOCTYPE html><html><body style="font-family:Arial,sans-serif;color:#1f2937">
<h2>{heading}</h2>
{body}
<p><a href="{link}" style="background:#059669;color:#fff;padding:10px 18px;border-radius:6px;text-decoration:none">{cta}</a></p>
</body></html>"#
    )
}

/// Lender email: an installment was collected for them
pub fn payment_received(
    to: &str,
    ctx: &PaymentContext<'_>,
    transfer_id: &str,
    fee: &FeeBreakdown,
    amount_remaining: Decimal,
) -> EmailMessage {
    let borrower = escape_html(ctx.borrower_name);
    let mut body = format!(
        "<p>Hi {lender},</p>\
         <p>{borrower} just made a payment of <strong>{amount}</strong> on your loan.</p>\
         <p>Transfer ID: {transfer_id}<br>You receive: {net} ({label})<br>Remaining balance: {remaining}</p>",
        lender = escape_html(ctx.lender_name),
        amount = money(ctx.amount),
        net = money(fee.net_amount),
        label = escape_html(&fee.fee_label),
        remaining = money(amount_remaining),
    );

    let cta = if ctx.loan.is_guest_loan() {
        body.push_str(
            "<p>Funds usually arrive within 1-3 business days. \
             Create a free account to track every repayment in one place.</p>",
        );
        "View loan"
    } else {
        body.push_str("<p>Funds usually arrive within 1-3 business days.</p>");
        "Open dashboard"
    };

    EmailMessage {
        to: to.to_string(),
        subject: format!("Payment received: {} from {}", money(ctx.amount), ctx.borrower_name),
        html: layout("Payment received", &body, &ctx.lender_link(), cta),
    }
}

/// Borrower email: their installment was charged
pub fn payment_processed(
    to: &str,
    ctx: &PaymentContext<'_>,
    transfer_id: &str,
    amount_remaining: Decimal,
    loan_completed: bool,
) -> EmailMessage {
    let mut body = format!(
        "<p>Hi {borrower},</p>\
         <p>Your scheduled payment of <strong>{amount}</strong> due {due} has been processed.</p>\
         <p>Transfer ID: {transfer_id}<br>Remaining balance: {remaining}</p>",
        borrower = escape_html(ctx.borrower_name),
        amount = money(ctx.amount),
        due = ctx.due_date.format("%B %-d, %Y"),
        remaining = money(amount_remaining),
    );

    if loan_completed {
        body.push_str("<p>That was your final payment. Your loan is fully repaid.</p>");
    }
    if ctx.loan.is_guest_loan() {
        body.push_str(&format!(
            "<p>We've let {} know by email.</p>",
            escape_html(ctx.lender_name)
        ));
    }

    let subject = if loan_completed {
        "Your loan is fully repaid".to_string()
    } else {
        format!("Payment processed: {}", money(ctx.amount))
    };

    EmailMessage {
        to: to.to_string(),
        subject,
        html: layout("Payment processed", &body, &ctx.borrower_link(), "View loan"),
    }
}

/// Lender email: an installment could not be collected
pub fn payment_missed(to: &str, ctx: &PaymentContext<'_>, reason: &str) -> EmailMessage {
    let body = format!(
        "<p>Hi {lender},</p>\
         <p>The payment of <strong>{amount}</strong> from {borrower} due {due} could not be collected.</p>\
         <p>Reason: {reason}</p>\
         <p>We've let the borrower know and will keep you updated.</p>",
        lender = escape_html(ctx.lender_name),
        amount = money(ctx.amount),
        borrower = escape_html(ctx.borrower_name),
        due = ctx.due_date.format("%B %-d, %Y"),
        reason = escape_html(reason),
    );

    let cta = if ctx.loan.is_guest_loan() {
        "View loan"
    } else {
        "Open dashboard"
    };

    EmailMessage {
        to: to.to_string(),
        subject: format!("Missed payment: {} from {}", money(ctx.amount), ctx.borrower_name),
        html: layout("Payment missed", &body, &ctx.lender_link(), cta),
    }
}
