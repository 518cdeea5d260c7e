//! Best-effort refresh of the server list from a signed remote payload.

use parking_lot::Mutex;
use server_list::{ServerStore, SignedServerList};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RemoteListConfig;
use crate::http::{HttpRequest, HttpRequester, ProxyMode};
use crate::stop::StopInfo;

#[derive(Debug)]
pub struct RemoteListFetcher {
    config: RemoteListConfig,
    next_attempt: Mutex<Option<Instant>>,
}

impl RemoteListFetcher {
    pub fn new(config: RemoteListConfig) -> Self {
        Self { config, next_attempt: Mutex::new(None) }
    }

    /// Whether a fetch would be attempted now.
    pub fn due(&self) -> bool {
        self.config.enabled() && self.next_attempt.lock().map_or(true, |t| Instant::now() >= t)
    }

    /// Fetch, verify and merge. Returns the number of entries merged; every
    /// failure is logged and reported as zero.
    pub fn fetch(&self, store: &ServerStore, requester: &dyn HttpRequester, stop: &StopInfo) -> usize {
        if !self.config.enabled() {
            return 0;
        }
        {
            let mut next = self.next_attempt.lock();
            let now = Instant::now();
            if next.map_or(false, |t| now < t) {
                debug!("remote server list fetch not due");
                return 0;
            }
            *next = Some(now + self.config.failure_cooldown());
        }

        let mut req = HttpRequest::get(&self.config.host, self.config.port, &self.config.path);
        req.proxy = ProxyMode::Direct;
        let body = match requester.request(&req, stop) {
            Ok(b) => b,
            Err(e) => {
                if !e.is_stopped() {
                    warn!(error = %e, "remote server list fetch failed");
                }
                return 0;
            }
        };
        let lines = match SignedServerList::from_json(&body).and_then(|s| s.verify(&self.config.public_key_hex)) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "remote server list rejected");
                return 0;
            }
        };
        store.add_entries_to_list(&lines, None);
        *self.next_attempt.lock() = Some(Instant::now() + self.config.success_cooldown());
        info!(entries = lines.len(), "remote server list merged");
        lines.len()
    }
}
