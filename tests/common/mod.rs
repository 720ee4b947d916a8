#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use payment_orchestrator::bus::EventBus;
use payment_orchestrator::circuit::registry::CircuitBreakerRegistry;
use payment_orchestrator::circuit::state::CircuitThresholds;
use payment_orchestrator::clients::{CallError, QrCodeService, QrStatus, QrToken, UserDirectory, WalletService};
use payment_orchestrator::domain::payment::{InitiatePaymentRequest, Payment, ProcessPaymentRequest};
use payment_orchestrator::error::ErrorCode;
use payment_orchestrator::repo::memory::MemoryStore;
use payment_orchestrator::repo::PaymentStore;
use payment_orchestrator::service::payment_service::PaymentService;
use payment_orchestrator::service::resilient_caller::ResilientCaller;
use payment_orchestrator::service::retry_orchestrator::RetryConfig;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Scripted replies for a collaborator: queued results first, then the
/// fallback forever.
pub struct Script<T: Clone> {
    queue: Mutex<VecDeque<Result<T, CallError>>>,
    fallback: Mutex<Result<T, CallError>>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    pub fn always(result: Result<T, CallError>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, result: Result<T, CallError>) {
        self.queue.lock().unwrap().push_back(result);
    }

    pub fn set_fallback(&self, result: Result<T, CallError>) {
        *self.fallback.lock().unwrap() = result;
    }

    pub fn next(&self) -> Result<T, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.queue.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn transient() -> CallError {
    CallError::Transient("connection reset".to_string())
}

pub struct MockUsers {
    pub script: Script<bool>,
}

impl MockUsers {
    pub fn valid() -> Self {
        Self {
            script: Script::always(Ok(true)),
        }
    }
}

#[async_trait]
impl UserDirectory for MockUsers {
    async fn validate_conditions(&self, _user_id: &str) -> Result<bool, CallError> {
        self.script.next()
    }
}

pub struct MockQr {
    pub tokens: Mutex<HashMap<String, QrToken>>,
    pub outage: Script<()>,
}

impl MockQr {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            outage: Script::always(Ok(())),
        }
    }

    pub fn issue(&self, code: &str, payment_id: Uuid) {
        self.set(
            code,
            QrToken {
                payment_id,
                status: QrStatus::Active,
                expires_at: Utc::now() + ChronoDuration::minutes(5),
            },
        );
    }

    pub fn set(&self, code: &str, token: QrToken) {
        self.tokens.lock().unwrap().insert(code.to_string(), token);
    }

    pub fn calls(&self) -> usize {
        self.outage.calls()
    }
}

#[async_trait]
impl QrCodeService for MockQr {
    async fn validate(&self, code: &str) -> Result<QrToken, CallError> {
        self.outage.next()?;
        self.tokens
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| CallError::rejected(ErrorCode::QrCodeInvalid, "unknown qr code"))
    }
}

pub struct MockWallet {
    pub deduct: Script<()>,
    pub credit: Script<()>,
    pub deducted: Mutex<Vec<Decimal>>,
    pub credited: Mutex<Vec<(Decimal, String)>>,
    /// Cancels this payment while the debit is in flight.
    pub cancel_on_deduct: Mutex<Option<(MemoryStore, Uuid)>>,
    /// Completes this payment, as a competing request would, while the
    /// debit is in flight.
    pub complete_on_deduct: Mutex<Option<(MemoryStore, Uuid)>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self {
            deduct: Script::always(Ok(())),
            credit: Script::always(Ok(())),
            deducted: Mutex::new(Vec::new()),
            credited: Mutex::new(Vec::new()),
            cancel_on_deduct: Mutex::new(None),
            complete_on_deduct: Mutex::new(None),
        }
    }

    pub fn deducted(&self) -> Vec<Decimal> {
        self.deducted.lock().unwrap().clone()
    }

    pub fn credited(&self) -> Vec<(Decimal, String)> {
        self.credited.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletService for MockWallet {
    async fn deduct(&self, _user_id: &str, amount: Decimal) -> Result<(), CallError> {
        let racing = self.cancel_on_deduct.lock().unwrap().take();
        if let Some((store, payment_id)) = racing {
            let mut tx = store.begin().await.unwrap();
            let mut payment = tx.lock_payment(payment_id).await.unwrap().unwrap();
            payment.cancel().unwrap();
            tx.update_payment(&payment).await.unwrap();
            tx.commit().await.unwrap();
        }
        let competing = self.complete_on_deduct.lock().unwrap().take();
        if let Some((store, payment_id)) = competing {
            let mut tx = store.begin().await.unwrap();
            let mut payment = tx.lock_payment(payment_id).await.unwrap().unwrap();
            payment.complete(&process_request(payment_id, amount)).unwrap();
            tx.update_payment(&payment).await.unwrap();
            tx.commit().await.unwrap();
        }
        self.deduct.next()?;
        self.deducted.lock().unwrap().push(amount);
        Ok(())
    }

    async fn credit(&self, _user_id: &str, amount: Decimal, reason: &str) -> Result<(), CallError> {
        self.credit.next()?;
        self.credited.lock().unwrap().push((amount, reason.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub trace_context: Option<String>,
}

/// Records every publish. Fails on demand, either always or for given keys.
#[derive(Default)]
pub struct RecordingBus {
    pub published: Mutex<Vec<Published>>,
    pub fail_all: AtomicBool,
    pub fail_keys: Mutex<HashSet<String>>,
    pub attempts: AtomicUsize,
}

impl RecordingBus {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn fail_for(&self, key: &str) {
        self.fail_keys.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
        trace_context: Option<&str>,
    ) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) || self.fail_keys.lock().unwrap().contains(key) {
            anyhow::bail!("broker unavailable");
        }
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.clone(),
            trace_context: trace_context.map(str::to_string),
        });
        Ok(())
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        add_jitter: false,
        ..RetryConfig::default()
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub users: Arc<MockUsers>,
    pub qr: Arc<MockQr>,
    pub wallet: Arc<MockWallet>,
    pub breakers: CircuitBreakerRegistry,
    pub service: PaymentService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CircuitThresholds::default(), fast_retry())
    }

    pub fn with(thresholds: CircuitThresholds, retry: RetryConfig) -> Self {
        let store = MemoryStore::new();
        let users = Arc::new(MockUsers::valid());
        let qr = Arc::new(MockQr::new());
        let wallet = Arc::new(MockWallet::new());
        let breakers = CircuitBreakerRegistry::new(thresholds);
        let caller = ResilientCaller::new(breakers.clone(), retry, Duration::from_millis(200));
        let service = PaymentService::new(
            Arc::new(store.clone()),
            users.clone(),
            qr.clone(),
            wallet.clone(),
            caller,
        );
        Self {
            store,
            users,
            qr,
            wallet,
            breakers,
            service,
        }
    }

    pub async fn initiate(&self) -> Payment {
        self.service
            .initiate(
                InitiatePaymentRequest {
                    customer_id: "cust-1".to_string(),
                    currency: "USD".to_string(),
                },
                None,
            )
            .await
            .unwrap()
    }

    /// A READY payment with an active QR code `qr-<payment id>`.
    pub async fn ready_payment(&self) -> Payment {
        let payment = self.initiate().await;
        self.qr.issue(&qr_code_for(payment.payment_id), payment.payment_id);
        self.service.mark_ready(payment.payment_id).await.unwrap()
    }

    pub async fn completed_payment(&self, amount: Decimal) -> Payment {
        let payment = self.ready_payment().await;
        self.service
            .process(payment.payment_id, process_request(payment.payment_id, amount), None)
            .await
            .unwrap()
    }
}

pub fn qr_code_for(payment_id: Uuid) -> String {
    format!("qr-{}", payment_id)
}

pub fn process_request(payment_id: Uuid, amount: Decimal) -> ProcessPaymentRequest {
    ProcessPaymentRequest {
        qr_code: qr_code_for(payment_id),
        merchant_id: "merchant-7".to_string(),
        amount,
        description: Some("coffee".to_string()),
    }
}
