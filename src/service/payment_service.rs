use crate::clients::{
    QrCodeService, QrStatus, QrToken, UserDirectory, WalletService, QR_CODE_SERVICE, USER_SERVICE, WALLET_SERVICE,
};
use crate::domain::event::PaymentEvent;
use crate::domain::idempotency::IdempotencyScope;
use crate::domain::payment::{
    InitiatePaymentRequest, Payment, PaymentOperation, PaymentStatus, ProcessPaymentRequest, RefundPaymentRequest,
};
use crate::error::{ErrorCode, PaymentError};
use crate::repo::PaymentStore;
use crate::service::idempotency::{request_hash, IdempotencyGuard};
use crate::service::outbox_writer;
use crate::service::resilient_caller::ResilientCaller;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

const MAX_AMOUNT_SCALE: u32 = 2;

/// The payment use cases. Each one runs the same way: idempotency lookup,
/// outbound calls with no transaction open, then one short transaction that
/// changes the payment and appends its outbox event together.
#[derive(Clone)]
pub struct PaymentService {
    pub store: Arc<dyn PaymentStore>,
    pub idempotency: IdempotencyGuard,
    pub users: Arc<dyn UserDirectory>,
    pub qr_codes: Arc<dyn QrCodeService>,
    pub wallets: Arc<dyn WalletService>,
    pub caller: ResilientCaller,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        users: Arc<dyn UserDirectory>,
        qr_codes: Arc<dyn QrCodeService>,
        wallets: Arc<dyn WalletService>,
        caller: ResilientCaller,
    ) -> Self {
        Self {
            idempotency: IdempotencyGuard::new(store.clone()),
            store,
            users,
            qr_codes,
            wallets,
            caller,
        }
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Payment, PaymentError> {
        self.store
            .find_by_id(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))
    }

    pub async fn initiate(
        &self,
        req: InitiatePaymentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Payment, PaymentError> {
        validate_initiate(&req)?;
        let scope = IdempotencyScope::Initiate;
        let hash = request_hash(&req, None);
        if let Some(existing) = self.idempotency.resolve(scope, idempotency_key, &hash, None).await? {
            return Ok(existing);
        }

        let users = &self.users;
        let customer_id = req.customer_id.as_str();
        let valid = self
            .caller
            .call(USER_SERVICE, || users.validate_conditions(customer_id))
            .await?;
        if !valid {
            return Err(PaymentError::rejected(
                ErrorCode::UserValidationFailed,
                format!("user {} is inactive or does not meet payment conditions", req.customer_id),
            ));
        }

        let payment = Payment::pending(&req.customer_id, &req.currency, idempotency_key.map(str::to_string));
        let mut tx = self.store.begin().await?;
        let inserted = tx.insert_payment(&payment).await?;
        if !inserted || !IdempotencyGuard::bind(&mut *tx, scope, idempotency_key, &hash, payment.payment_id).await? {
            drop(tx);
            return self.replay(scope, idempotency_key, &hash, None).await;
        }
        outbox_writer::append(&mut *tx, &PaymentEvent::created(&payment)).await?;
        tx.commit().await?;

        tracing::info!(payment_id = %payment.payment_id, customer_id = %payment.customer_id, "payment initiated");
        Ok(payment)
    }

    /// PENDING → READY once the customer's QR code has been issued.
    pub async fn mark_ready(&self, payment_id: Uuid) -> Result<Payment, PaymentError> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))?;
        payment.mark_ready()?;
        tx.update_payment(&payment).await?;
        tx.commit().await?;

        tracing::info!(payment_id = %payment_id, "payment ready for scan");
        Ok(payment)
    }

    pub async fn process(
        &self,
        payment_id: Uuid,
        req: ProcessPaymentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Payment, PaymentError> {
        validate_process(&req)?;
        let scope = IdempotencyScope::Process;
        let hash = request_hash(&req, Some(payment_id));
        if let Some(existing) = self
            .idempotency
            .resolve(scope, idempotency_key, &hash, Some(payment_id))
            .await?
        {
            return Ok(existing);
        }

        let payment = self.get_payment(payment_id).await?;
        payment.ensure(PaymentOperation::Process)?;

        let qr_codes = &self.qr_codes;
        let code = req.qr_code.as_str();
        let token = self.caller.call(QR_CODE_SERVICE, || qr_codes.validate(code)).await?;
        check_qr_token(&token, payment_id, Utc::now())?;

        let wallets = &self.wallets;
        let customer_id = payment.customer_id.as_str();
        let amount = req.amount;
        self.caller
            .call(WALLET_SERVICE, || wallets.deduct(customer_id, amount))
            .await?;

        match self.commit_completion(payment_id, &req, idempotency_key, &hash).await {
            Ok(Some(completed)) => {
                tracing::info!(
                    payment_id = %payment_id,
                    merchant_id = %req.merchant_id,
                    amount = %req.amount,
                    "payment completed"
                );
                Ok(completed)
            }
            Ok(None) => {
                self.reverse_debit(&payment, amount).await;
                self.replay(scope, idempotency_key, &hash, Some(payment_id)).await
            }
            Err(err) => {
                self.reverse_debit(&payment, amount).await;
                if let Ok(Some(existing)) = self
                    .idempotency
                    .resolve(scope, idempotency_key, &hash, Some(payment_id))
                    .await
                {
                    return Ok(existing);
                }
                Err(err)
            }
        }
    }

    /// Pure status flip: no money has moved before completion.
    pub async fn cancel(&self, payment_id: Uuid, idempotency_key: Option<&str>) -> Result<Payment, PaymentError> {
        let scope = IdempotencyScope::Cancel;
        let hash = request_hash(&(), Some(payment_id));
        if let Some(existing) = self
            .idempotency
            .resolve(scope, idempotency_key, &hash, Some(payment_id))
            .await?
        {
            return Ok(existing);
        }

        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))?;
        payment.cancel()?;
        if !IdempotencyGuard::bind(&mut *tx, scope, idempotency_key, &hash, payment_id).await? {
            drop(tx);
            return self.replay(scope, idempotency_key, &hash, Some(payment_id)).await;
        }
        tx.update_payment(&payment).await?;
        tx.commit().await?;

        tracing::info!(payment_id = %payment_id, "payment cancelled");
        Ok(payment)
    }

    pub async fn refund(
        &self,
        payment_id: Uuid,
        req: RefundPaymentRequest,
        idempotency_key: Option<&str>,
    ) -> Result<Payment, PaymentError> {
        validate_amount(req.amount, "refund amount")?;
        let scope = IdempotencyScope::Refund;
        let hash = request_hash(&req, Some(payment_id));
        if let Some(existing) = self
            .idempotency
            .resolve(scope, idempotency_key, &hash, Some(payment_id))
            .await?
        {
            return Ok(existing);
        }

        let payment = self.get_payment(payment_id).await?;
        payment.ensure_refundable(req.amount)?;

        let wallets = &self.wallets;
        let customer_id = payment.customer_id.as_str();
        let amount = req.amount;
        let reason = req
            .reason
            .clone()
            .unwrap_or_else(|| format!("refund:{}", payment_id));
        let reason_ref = reason.as_str();
        self.caller
            .call(WALLET_SERVICE, || wallets.credit(customer_id, amount, reason_ref))
            .await?;

        match self.commit_refund(payment_id, &req, idempotency_key, &hash).await {
            Ok(Some(refunded)) => {
                tracing::info!(payment_id = %payment_id, amount = %req.amount, "payment refunded");
                Ok(refunded)
            }
            Ok(None) => {
                self.reverse_credit(&payment, amount).await;
                self.replay(scope, idempotency_key, &hash, Some(payment_id)).await
            }
            Err(err) => {
                self.reverse_credit(&payment, amount).await;
                if let Ok(Some(existing)) = self
                    .idempotency
                    .resolve(scope, idempotency_key, &hash, Some(payment_id))
                    .await
                {
                    return Ok(existing);
                }
                Err(err)
            }
        }
    }

    /// `Ok(None)` when a concurrent request bound the idempotency key first.
    async fn commit_completion(
        &self,
        payment_id: Uuid,
        req: &ProcessPaymentRequest,
        idempotency_key: Option<&str>,
        hash: &str,
    ) -> Result<Option<Payment>, PaymentError> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))?;
        payment.complete(req)?;
        if !IdempotencyGuard::bind(&mut *tx, IdempotencyScope::Process, idempotency_key, hash, payment_id).await? {
            return Ok(None);
        }
        tx.update_payment(&payment).await?;
        outbox_writer::append(&mut *tx, &PaymentEvent::completed(&payment)).await?;
        tx.commit().await?;
        Ok(Some(payment))
    }

    async fn commit_refund(
        &self,
        payment_id: Uuid,
        req: &RefundPaymentRequest,
        idempotency_key: Option<&str>,
        hash: &str,
    ) -> Result<Option<Payment>, PaymentError> {
        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))?;
        payment.refund(req.amount)?;
        if !IdempotencyGuard::bind(&mut *tx, IdempotencyScope::Refund, idempotency_key, hash, payment_id).await? {
            return Ok(None);
        }
        tx.update_payment(&payment).await?;
        outbox_writer::append(&mut *tx, &PaymentEvent::refunded(&payment, req.reason.clone())).await?;
        tx.commit().await?;
        Ok(Some(payment))
    }

    async fn replay(
        &self,
        scope: IdempotencyScope,
        idempotency_key: Option<&str>,
        hash: &str,
        target: Option<Uuid>,
    ) -> Result<Payment, PaymentError> {
        self.idempotency
            .resolve(scope, idempotency_key, hash, target)
            .await?
            .ok_or_else(|| PaymentError::DuplicateRequest("idempotency key is held by a concurrent request".to_string()))
    }

    /// The wallet was debited but the completion did not commit.
    async fn reverse_debit(&self, payment: &Payment, amount: Decimal) {
        let wallets = &self.wallets;
        let customer_id = payment.customer_id.as_str();
        let reason = format!("reversal:{}", payment.payment_id);
        let reason_ref = reason.as_str();
        match self
            .caller
            .call(WALLET_SERVICE, || wallets.credit(customer_id, amount, reason_ref))
            .await
        {
            Ok(()) => tracing::warn!(payment_id = %payment.payment_id, amount = %amount, "wallet debit reversed"),
            Err(e) => {
                tracing::error!(
                    payment_id = %payment.payment_id,
                    amount = %amount,
                    "wallet debit reversal failed: {}",
                    e
                );
                self.record_failure(payment.payment_id, payment.status, ErrorCode::WalletServiceError, &e.to_string())
                    .await;
            }
        }
    }

    /// The wallet was credited but the refund did not commit.
    async fn reverse_credit(&self, payment: &Payment, amount: Decimal) {
        let wallets = &self.wallets;
        let customer_id = payment.customer_id.as_str();
        match self
            .caller
            .call(WALLET_SERVICE, || wallets.deduct(customer_id, amount))
            .await
        {
            Ok(()) => tracing::warn!(payment_id = %payment.payment_id, amount = %amount, "refund credit reversed"),
            Err(e) => {
                tracing::error!(
                    payment_id = %payment.payment_id,
                    amount = %amount,
                    "refund credit reversal failed: {}",
                    e
                );
                self.record_failure(payment.payment_id, payment.status, ErrorCode::WalletServiceError, &e.to_string())
                    .await;
            }
        }
    }

    /// Best effort: marks the payment FAILED so the stranded money movement is
    /// visible on the record. Skipped when another request moved the payment
    /// on since `observed`; the stranded amount is then this request's, not
    /// the record's, and stays in the log only.
    async fn record_failure(&self, payment_id: Uuid, observed: PaymentStatus, code: ErrorCode, message: &str) {
        let result: Result<(), PaymentError> = async {
            let mut tx = self.store.begin().await?;
            let mut payment = tx
                .lock_payment(payment_id)
                .await?
                .ok_or(PaymentError::NotFound(payment_id))?;
            if payment.status != observed {
                tracing::error!(
                    payment_id = %payment_id,
                    observed = %observed,
                    current = %payment.status,
                    "payment moved on under a failed reversal, leaving record unchanged"
                );
                return Ok(());
            }
            payment.fail(code.as_str(), message)?;
            tx.update_payment(&payment).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(payment_id = %payment_id, "could not record payment failure: {}", e);
        }
    }
}

fn validate_initiate(req: &InitiatePaymentRequest) -> Result<(), PaymentError> {
    if req.customer_id.trim().is_empty() {
        return Err(PaymentError::InvalidRequest("customer_id is required".to_string()));
    }
    if req.currency.len() != 3 || !req.currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(PaymentError::InvalidRequest(
            "currency must be a three letter ISO code".to_string(),
        ));
    }
    Ok(())
}

fn validate_process(req: &ProcessPaymentRequest) -> Result<(), PaymentError> {
    if req.qr_code.trim().is_empty() {
        return Err(PaymentError::InvalidRequest("qr_code is required".to_string()));
    }
    if req.merchant_id.trim().is_empty() {
        return Err(PaymentError::InvalidRequest("merchant_id is required".to_string()));
    }
    validate_amount(req.amount, "amount")
}

/// Amounts are stored as NUMERIC(18, 2); a finer amount would be rounded on
/// write and no longer match what the wallet moved.
fn validate_amount(amount: Decimal, field: &str) -> Result<(), PaymentError> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidRequest(format!("{} must be positive", field)));
    }
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(PaymentError::InvalidRequest(format!(
            "{} has more than {} decimal places",
            field, MAX_AMOUNT_SCALE
        )));
    }
    Ok(())
}

fn check_qr_token(token: &QrToken, payment_id: Uuid, now: DateTime<Utc>) -> Result<(), PaymentError> {
    if token.payment_id != payment_id {
        return Err(PaymentError::rejected(
            ErrorCode::QrCodeMismatch,
            "qr code was issued for a different payment",
        ));
    }
    match token.status {
        QrStatus::Active if token.expires_at > now => Ok(()),
        QrStatus::Active | QrStatus::Expired => Err(PaymentError::rejected(
            ErrorCode::QrCodeExpired,
            "qr code has expired",
        )),
        QrStatus::Used | QrStatus::Unknown => Err(PaymentError::rejected(
            ErrorCode::QrCodeInvalid,
            "qr code is no longer active",
        )),
    }
}
