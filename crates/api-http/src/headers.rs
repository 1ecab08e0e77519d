// Dispatch headers set by the trusted queue mechanism

use axum::http::HeaderMap;

/// Authenticity marker: present only on requests originating from the
/// queue dispatch mechanism
pub const QUEUE_NAME_HEADER: &str = "X-Taskqueue-Queue-Name";

/// Number of times the current task has been retried
pub const RETRY_COUNT_HEADER: &str = "X-Taskqueue-Retry-Count";

/// Present on requests made by the scheduler
pub const CRON_HEADER: &str = "X-Taskqueue-Cron";

/// Application id of another service instance making an inbound request
pub const INBOUND_APP_HEADER: &str = "X-Taskqueue-Inbound-App-Id";

/// Header value as UTF-8, when present and readable
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Retry count of the currently running task; `None` when unknown
pub fn task_retry_count(headers: &HeaderMap) -> Option<u32> {
    header_str(headers, RETRY_COUNT_HEADER)?.parse().ok()
}
