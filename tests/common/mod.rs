//! Shared test `Transport` stubs, used across the integration test files.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use pacer::descriptor::OperationDescriptor;
use pacer::error::PacerError;
use pacer::protocol::{RequestSpec, ResponseEvent, Transport};

/// Responds with a fixed status after an optional fixed delay, counting
/// requests seen and recording every status handed out.
pub struct StubTransport {
    status: u16,
    delay: Option<std::time::Duration>,
    rx_bytes: u64,
    count: AtomicU64,
    seen: Mutex<Vec<u16>>,
}

impl StubTransport {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            delay: None,
            rx_bytes: 0,
            count: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(status: u16, delay: std::time::Duration) -> Self {
        Self {
            status,
            delay: Some(delay),
            rx_bytes: 0,
            count: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rx_bytes(mut self, rx_bytes: u64) -> Self {
        self.rx_bytes = rx_bytes;
        self
    }

    /// Returns status 0 once after `after_n` successful requests have
    /// already been served, then stays at the normal status (only matters
    /// for the caller's first read after that point; a fatal response ends
    /// the run before a second read happens).
    pub fn refuse_after(after_n: u64) -> RefuseAfter {
        RefuseAfter {
            after_n,
            count: AtomicU64::new(0),
        }
    }

    /// Serves `status` normally except every `nth` request (1-indexed),
    /// which gets `miss_status` instead.
    pub fn every_nth_misses(status: u16, miss_status: u16, nth: u64) -> EveryNth {
        EveryNth {
            status,
            miss_status,
            nth,
            count: AtomicU64::new(0),
        }
    }

    pub fn seen_statuses(&self) -> Vec<u16> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for StubTransport {
    async fn send_request(&self, spec: RequestSpec) -> Result<ResponseEvent, PacerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.count.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(self.status);
        Ok(ResponseEvent {
            seq: spec.seq,
            method: spec.method,
            status: self.status,
            rx_bytes: self.rx_bytes,
        })
    }
}

pub struct RefuseAfter {
    after_n: u64,
    count: AtomicU64,
}

#[async_trait::async_trait]
impl Transport for RefuseAfter {
    async fn send_request(&self, spec: RequestSpec) -> Result<ResponseEvent, PacerError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        let status = if n == self.after_n { 0 } else { 200 };
        Ok(ResponseEvent {
            seq: spec.seq,
            method: spec.method,
            status,
            rx_bytes: 64,
        })
    }
}

pub struct EveryNth {
    status: u16,
    miss_status: u16,
    nth: u64,
    count: AtomicU64,
}

#[async_trait::async_trait]
impl Transport for EveryNth {
    async fn send_request(&self, spec: RequestSpec) -> Result<ResponseEvent, PacerError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let status = if n % self.nth == 0 {
            self.miss_status
        } else {
            self.status
        };
        Ok(ResponseEvent {
            seq: spec.seq,
            method: spec.method,
            status,
            rx_bytes: 32,
        })
    }
}

pub fn descriptor() -> OperationDescriptor {
    OperationDescriptor {
        hostname: "localhost".to_string(),
        port: "80".to_string(),
        method: "GET".to_string(),
        path: "/".to_string(),
        headers: HashMap::new(),
    }
}
