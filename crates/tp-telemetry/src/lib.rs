//! Logging and request-tracing setup, shared by `tp-daemon` and anything
//! else that needs to stand the process up consistently.

pub mod logging;
pub mod request_id;
