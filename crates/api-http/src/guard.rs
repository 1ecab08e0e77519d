// Request Access Guards
//
// Tagged predicate tree over dispatch headers. Leaves test who made the
// request; `And`/`Or` combine them and evaluation is a straightforward
// recursion.

use axum::http::{HeaderMap, StatusCode};

use crate::headers::{header_str, CRON_HEADER, INBOUND_APP_HEADER, QUEUE_NAME_HEADER};

/// Who is allowed to reach a route
#[derive(Debug, Clone)]
pub enum AccessTest {
    /// Request was made by the scheduler
    Cron,
    /// Request was made by a task queue; an empty list permits any queue
    TaskQueue(Vec<String>),
    /// Request was made by another service instance; an empty list
    /// permits any instance that carries the inbound-app header
    InboundApp(Vec<String>),
    And(Box<AccessTest>, Box<AccessTest>),
    Or(Box<AccessTest>, Box<AccessTest>),
}

impl AccessTest {
    pub fn and(self, other: AccessTest) -> AccessTest {
        AccessTest::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: AccessTest) -> AccessTest {
        AccessTest::Or(Box::new(self), Box::new(other))
    }

    /// Evaluate the tree against the request headers
    pub fn allows(&self, headers: &HeaderMap) -> bool {
        match self {
            AccessTest::Cron => headers.contains_key(CRON_HEADER),
            AccessTest::TaskQueue(names) => match header_str(headers, QUEUE_NAME_HEADER) {
                Some(queue) => names.is_empty() || names.iter().any(|n| n == queue),
                None => false,
            },
            AccessTest::InboundApp(ids) => match header_str(headers, INBOUND_APP_HEADER) {
                Some(app) => ids.is_empty() || ids.iter().any(|id| id == app),
                None => false,
            },
            AccessTest::And(a, b) => a.allows(headers) && b.allows(headers),
            AccessTest::Or(a, b) => a.allows(headers) || b.allows(headers),
        }
    }
}

/// Route-level check; handlers early-return the error response
pub fn require(
    test: &AccessTest,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, &'static str)> {
    if test.allows(headers) {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, "Forbidden"))
    }
}
