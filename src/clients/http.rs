use crate::clients::{CallError, QrCodeService, QrToken, UserDirectory, WalletService};
use crate::error::ErrorCode;
use crate::trace::{self, TRACEPARENT_HEADER};
use reqwest::{RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub struct HttpUserDirectory {
    pub base_url: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

pub struct HttpQrCodeService {
    pub base_url: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

pub struct HttpWalletService {
    pub base_url: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ConditionsReply {
    valid: bool,
}

#[derive(Debug, Deserialize, Default)]
struct RejectionReply {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait::async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn validate_conditions(&self, user_id: &str) -> Result<bool, CallError> {
        let url = format!("{}/users/{}/conditions", self.base_url, user_id);
        let resp = send(self.client.get(url), self.timeout_ms).await?;
        match resp.status() {
            s if s.is_success() => {
                let reply: ConditionsReply = resp
                    .json()
                    .await
                    .map_err(|e| CallError::Transient(format!("malformed user reply: {}", e)))?;
                Ok(reply.valid)
            }
            StatusCode::NOT_FOUND => Err(CallError::rejected(
                ErrorCode::UserValidationFailed,
                format!("user {} not found", user_id),
            )),
            s => Err(classify_failure(s, resp, ErrorCode::UserValidationFailed).await),
        }
    }
}

#[async_trait::async_trait]
impl QrCodeService for HttpQrCodeService {
    async fn validate(&self, code: &str) -> Result<QrToken, CallError> {
        let url = format!("{}/qr-codes/validate", self.base_url);
        let resp = send(self.client.post(url).json(&json!({ "code": code })), self.timeout_ms).await?;
        match resp.status() {
            s if s.is_success() => resp
                .json::<QrToken>()
                .await
                .map_err(|e| CallError::Transient(format!("malformed qr reply: {}", e))),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Err(CallError::rejected(
                ErrorCode::QrCodeInvalid,
                "qr code is not recognised",
            )),
            s => Err(classify_failure(s, resp, ErrorCode::QrCodeInvalid).await),
        }
    }
}

#[async_trait::async_trait]
impl WalletService for HttpWalletService {
    async fn deduct(&self, user_id: &str, amount: Decimal) -> Result<(), CallError> {
        let url = format!("{}/wallets/{}/deduct", self.base_url, user_id);
        let body = json!({ "amount": amount.to_string() });
        let resp = send(self.client.post(url).json(&body), self.timeout_ms).await?;
        if resp.status().is_success() {
            return Ok(());
        }
        Err(classify_failure(resp.status(), resp, ErrorCode::WalletServiceError).await)
    }

    async fn credit(&self, user_id: &str, amount: Decimal, reason: &str) -> Result<(), CallError> {
        let url = format!("{}/wallets/{}/credit", self.base_url, user_id);
        let body = json!({ "amount": amount.to_string(), "reason": reason });
        let resp = send(self.client.post(url).json(&body), self.timeout_ms).await?;
        if resp.status().is_success() {
            return Ok(());
        }
        Err(classify_failure(resp.status(), resp, ErrorCode::WalletServiceError).await)
    }
}

async fn send(req: RequestBuilder, timeout_ms: u64) -> Result<Response, CallError> {
    let mut req = req.timeout(Duration::from_millis(timeout_ms));
    if let Some(ctx) = trace::current() {
        req = req.header(TRACEPARENT_HEADER, ctx.child().to_string());
    }
    req.send().await.map_err(|e| {
        if e.is_timeout() {
            CallError::Transient("request timed out".to_string())
        } else {
            CallError::Transient(format!("network error: {}", e))
        }
    })
}

/// 5xx, 408 and 429 are transient; any other non-success reply is a
/// rejection. A rejection body may name a more specific code.
async fn classify_failure(status: StatusCode, resp: Response, fallback: ErrorCode) -> CallError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        return CallError::Transient(format!("HTTP_{}", status.as_u16()));
    }

    let reply: RejectionReply = resp.json().await.unwrap_or_default();
    let code = match reply.code.as_deref() {
        Some("INSUFFICIENT_BALANCE") => ErrorCode::InsufficientBalance,
        Some("QR_CODE_EXPIRED") => ErrorCode::QrCodeExpired,
        Some("QR_CODE_INVALID") => ErrorCode::QrCodeInvalid,
        Some("USER_VALIDATION_FAILED") => ErrorCode::UserValidationFailed,
        _ => fallback,
    };
    let message = reply
        .message
        .map(|m| m.chars().take(200).collect())
        .unwrap_or_else(|| format!("rejected with HTTP_{}", status.as_u16()));
    CallError::Rejected { code, message }
}
