mod client;
mod dispatch;

pub use client::{DEFAULT_TIMEOUT, create_client, request_timeout};
pub use dispatch::{BodyPayload, DispatchOutcome, HttpResponse, execute_request};
