use payment_orchestrator::domain::payment::{
    Payment, PaymentOperation, PaymentStatus, ProcessPaymentRequest,
};
use payment_orchestrator::error::{ErrorCode, PaymentError};
use rust_decimal_macros::dec;

fn expected(from: PaymentStatus, op: PaymentOperation) -> Option<PaymentStatus> {
    use PaymentOperation::*;
    use PaymentStatus::*;
    match (from, op) {
        (Pending, MarkReady) => Some(Ready),
        (Ready, Process) => Some(Completed),
        (Pending, Cancel) | (Ready, Cancel) => Some(Cancelled),
        (Completed, Refund) => Some(Refunded),
        (Pending, Fail) | (Ready, Fail) | (Completed, Fail) => Some(Failed),
        _ => None,
    }
}

fn payment_in(status: PaymentStatus) -> Payment {
    let mut p = Payment::pending("cust-1", "USD", None);
    p.status = status;
    if status == PaymentStatus::Completed {
        p.amount = dec!(100.00);
    }
    p
}

#[test]
fn guard_covers_every_status_and_operation() {
    for status in PaymentStatus::ALL {
        for op in PaymentOperation::ALL {
            assert_eq!(
                op.next_status(status),
                expected(status, op),
                "{} from {}",
                op.as_str(),
                status
            );
        }
    }
}

#[test]
fn terminal_statuses_accept_no_operation() {
    for status in PaymentStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
        for op in PaymentOperation::ALL {
            assert!(op.next_status(status).is_none(), "{} should be final", status);
        }
    }
    assert!(!PaymentStatus::Completed.is_terminal());
}

#[test]
fn rejected_transition_reports_invalid_state_and_leaves_payment_untouched() {
    let mut p = payment_in(PaymentStatus::Pending);
    let before = p.clone();
    let err = p
        .complete(&ProcessPaymentRequest {
            qr_code: "qr".to_string(),
            merchant_id: "m".to_string(),
            amount: dec!(10),
            description: None,
        })
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidPaymentState);
    assert_eq!(p, before);
}

#[test]
fn completion_stamps_merchant_and_amount() {
    let mut p = payment_in(PaymentStatus::Ready);
    assert_eq!(p.amount, dec!(0));
    p.complete(&ProcessPaymentRequest {
        qr_code: "qr".to_string(),
        merchant_id: "merchant-7".to_string(),
        amount: dec!(100.00),
        description: Some("coffee".to_string()),
    })
    .unwrap();

    assert_eq!(p.status, PaymentStatus::Completed);
    assert_eq!(p.amount, dec!(100.00));
    assert_eq!(p.merchant_id.as_deref(), Some("merchant-7"));
}

#[test]
fn refund_cannot_exceed_original_amount() {
    let mut p = payment_in(PaymentStatus::Completed);
    let err = p.refund(dec!(100.01)).unwrap_err();
    assert!(matches!(err, PaymentError::RefundExceedsAmount { .. }));
    assert_eq!(p.status, PaymentStatus::Completed);

    p.refund(dec!(100.00)).unwrap();
    assert_eq!(p.status, PaymentStatus::Refunded);
    assert_eq!(p.refunded_amount, Some(dec!(100.00)));
}

#[test]
fn second_refund_reports_state_before_amount() {
    let mut p = payment_in(PaymentStatus::Completed);
    p.refund(dec!(40.00)).unwrap();

    let err = p.refund(dec!(500.00)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPaymentState);
}

#[test]
fn fail_records_error_details() {
    let mut p = payment_in(PaymentStatus::Ready);
    p.fail("WALLET_SERVICE_ERROR", "reversal failed").unwrap();
    assert_eq!(p.status, PaymentStatus::Failed);
    assert_eq!(p.error_code.as_deref(), Some("WALLET_SERVICE_ERROR"));

    let mut refunded = payment_in(PaymentStatus::Refunded);
    assert!(refunded.fail("X", "y").is_err());
}

#[test]
fn status_round_trips_through_its_wire_name() {
    for status in PaymentStatus::ALL {
        assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(PaymentStatus::parse("SETTLED"), None);
}
