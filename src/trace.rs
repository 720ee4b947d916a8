//! W3C trace context carried across the async outbox boundary.
//!
//! Requests run inside [`scope`], which makes their context the *current* one
//! for the task. The outbox writer reads it with [`current`] and stores the
//! `traceparent` string beside the event; the relay later derives a child
//! span from it so delivery stays in the originating trace.

use axum::http::HeaderMap;
use rand::Rng;
use std::fmt;
use std::future::Future;

pub const TRACEPARENT_HEADER: &str = "traceparent";

tokio::task_local! {
    static CURRENT: TraceContext;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub flags: u8,
}

impl TraceContext {
    /// Starts a new sampled trace.
    pub fn generate() -> Self {
        Self {
            trace_id: random_hex(16),
            span_id: random_hex(8),
            flags: 0x01,
        }
    }

    /// Parses `version-traceid-spanid-flags`. All-zero ids are invalid.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != "00" {
            return None;
        }
        if !is_hex(trace_id, 32) || !is_hex(span_id, 16) || !is_hex(flags, 2) {
            return None;
        }
        if trace_id.bytes().all(|b| b == b'0') || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            flags: u8::from_str_radix(flags, 16).ok()?,
        })
    }

    /// Same trace, fresh span id.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_hex(8),
            flags: self.flags,
        }
    }

    /// The incoming `traceparent` header if valid, otherwise a new trace.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
            .unwrap_or_else(Self::generate)
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }
}

pub async fn scope<F: Future>(ctx: TraceContext, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}

pub fn current() -> Option<TraceContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let s: String = (0..bytes)
            .map(|_| format!("{:02x}", rng.gen::<u8>()))
            .collect();
        if s.bytes().any(|b| b != b'0') {
            return s;
        }
    }
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_traceparent() {
        let raw = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        let ctx = TraceContext::parse(raw).unwrap();
        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.flags, 1);
        assert_eq!(ctx.to_string(), raw);
    }

    #[test]
    fn rejects_malformed_traceparent() {
        assert!(TraceContext::parse("garbage").is_none());
        assert!(TraceContext::parse("01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01").is_none());
        assert!(TraceContext::parse("00-00000000000000000000000000000000-b7ad6b7169203331-01").is_none());
        assert!(TraceContext::parse("00-0af7651916cd43dd8448eb211c80319c-b7ad6b71-01").is_none());
    }

    #[test]
    fn child_keeps_trace_and_changes_span() {
        let parent = TraceContext::generate();
        let child = parent.child();
        assert_eq!(child.trace_id, parent.trace_id);
        assert_ne!(child.span_id, parent.span_id);
        assert!(TraceContext::parse(&child.to_string()).is_some());
    }

    #[tokio::test]
    async fn current_is_visible_inside_scope_only() {
        assert!(current().is_none());
        let ctx = TraceContext::generate();
        let seen = scope(ctx.clone(), async { current() }).await;
        assert_eq!(seen, Some(ctx));
    }

    #[test]
    fn missing_header_starts_new_trace() {
        let headers = HeaderMap::new();
        let ctx = TraceContext::from_headers(&headers);
        assert_eq!(ctx.trace_id.len(), 32);
    }
}
