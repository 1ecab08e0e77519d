//! HTTP Surface
//!
//! Push endpoints are dispatched by the queue service as POSTs against
//! their bound paths; pull workers are started by a fire-and-forget GET
//! on the trigger route. Access guards and the remote trigger client
//! live here too.

pub mod guard;
pub mod headers;
pub mod routes;
pub mod server;
pub mod trigger;

pub use routes::{router, AppState};
pub use server::{serve, HttpServerConfig};
pub use trigger::{TriggerClient, TriggerReply};
