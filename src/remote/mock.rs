//! An in-process stand-in for the config service.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ConfigRequest, ConfigResponse, ConfigTransport};
use crate::error::TransportError;
use crate::schedule::MetricConfig;

/// Serves a settable response and records every request.
#[derive(Default)]
pub struct MockTransport {
    response: Mutex<ConfigResponse>,
    failures: Mutex<VecDeque<TransportError>>,
    requests: Mutex<Vec<ConfigRequest>>,
    calls: AtomicUsize,
    fail_close: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn serving(config: &MetricConfig) -> Self {
        let transport = Self::default();
        transport.set_config(config);
        transport
    }

    pub fn set_config(&self, config: &MetricConfig) {
        self.set_response(ConfigResponse::from_config(config));
    }

    pub fn set_response(&self, response: ConfigResponse) {
        *self.response.lock() = response;
    }

    /// Makes the next call fail with `err`. Failures queue up.
    pub fn fail_next(&self, err: TransportError) {
        self.failures.lock().push_back(err);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConfigRequest> {
        self.requests.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigTransport for MockTransport {
    async fn get_config(&self, request: ConfigRequest) -> Result<ConfigResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.response.lock().clone())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
