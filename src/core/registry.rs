// src/core/registry.rs — In-flight request tracking shared by all channels
//
// Redirects back to the calling app wait until this registry drains, so the
// emptiness signal is a `watch` channel rather than a polled flag.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::infra::errors::ConnectError;

/// Request ids currently being served, with their method names.
pub struct PendingRequestRegistry {
    requests: Mutex<HashMap<String, String>>,
    in_flight: watch::Sender<usize>,
}

impl Default for PendingRequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequestRegistry {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            requests: Mutex::new(HashMap::new()),
            in_flight,
        }
    }

    fn requests(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, id: &str, method: &str) {
        let mut requests = self.requests();
        requests.insert(id.to_string(), method.to_string());
        self.in_flight.send_replace(requests.len());
    }

    /// Remove a request, returning its method if it was registered.
    pub fn remove(&self, id: &str) -> Option<String> {
        let mut requests = self.requests();
        let removed = requests.remove(id);
        self.in_flight.send_replace(requests.len());
        removed
    }

    pub fn lookup(&self, id: &str) -> Option<String> {
        self.requests().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.requests().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut requests = self.requests();
        requests.clear();
        self.in_flight.send_replace(0);
    }

    /// Suspend until no request is in flight.
    pub async fn await_empty(&self) -> Result<(), ConnectError> {
        let mut rx = self.in_flight.subscribe();
        rx.wait_for(|count| *count == 0)
            .await
            .map(|_| ())
            .map_err(|e| ConnectError::RegistryWaitFailure(e.to_string()))
    }
}
