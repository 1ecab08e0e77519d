// Remote Worker Trigger
//
// Computes the fully-qualified URL for a named module/version of the
// service and fires the start request. The remote handler answers before
// its drain loop finishes, so this call returns as soon as the lock
// decision is known.

use siphon_core::error::{AppError, Result};
use tracing::info;

/// What the remote trigger route answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReply {
    Started,
    /// A drain loop was already active on the remote instance
    Locked,
}

pub struct TriggerClient {
    http: reqwest::Client,
    scheme: String,
    /// Service domain; module/version are prepended as subdomains
    domain: String,
}

impl TriggerClient {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            scheme: "https".to_string(),
            domain: domain.into(),
        }
    }

    /// Override the URL scheme (plain http for local stacks)
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Start route URL on `module`, optionally pinned to `version`
    pub fn worker_url(
        &self,
        module: &str,
        version: Option<&str>,
        queue: &str,
        delay_secs: Option<u64>,
    ) -> String {
        let host = match version {
            Some(version) => format!("{}.{}.{}", version, module, self.domain),
            None => format!("{}.{}", module, self.domain),
        };
        let mut url = format!(
            "{}://{}/_queue/workers/{}/start",
            self.scheme, host, queue
        );
        if let Some(delay) = delay_secs {
            url.push_str(&format!("?delay={}", delay));
        }
        url
    }

    /// Trigger a drain loop on a remote instance of the service
    pub async fn start_worker(
        &self,
        module: &str,
        version: Option<&str>,
        queue: &str,
        delay_secs: Option<u64>,
    ) -> Result<TriggerReply> {
        let url = self.worker_url(module, version, queue, delay_secs);
        info!(url = %url, "Triggering remote drain loop");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Queue(format!("trigger fetch failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Queue(format!("trigger response unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(AppError::Queue(format!(
                "trigger returned {}: {}",
                status, body
            )));
        }

        if body == "locked" {
            Ok(TriggerReply::Locked)
        } else {
            Ok(TriggerReply::Started)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_url_includes_module_and_version() {
        let client = TriggerClient::new("queue.example.com");
        assert_eq!(
            client.worker_url("workers", Some("v2"), "mail", None),
            "https://v2.workers.queue.example.com/_queue/workers/mail/start"
        );
        assert_eq!(
            client.worker_url("workers", None, "mail", Some(30)),
            "https://workers.queue.example.com/_queue/workers/mail/start?delay=30"
        );
    }

    #[test]
    fn scheme_override_applies() {
        let client = TriggerClient::new("localhost:8473").with_scheme("http");
        assert_eq!(
            client.worker_url("svc", None, "default", None),
            "http://svc.localhost:8473/_queue/workers/default/start"
        );
    }
}
