//! The client for the external tax engine REST API.
//!
//! This module contains everything related to talking to the tax engine:
//! - A typed retry policy with exponential backoff
//! - The HTTP client that performs JSON calls and parses the response envelope
//!
//! The client only knows how to reach the engine and when to give up;
//! offline fallbacks (the outbox, the response cache) belong to callers.

mod client;
mod retry;

pub use client::{BackendClient, Envelope, RawResponse};
pub use retry::RetryPolicy;
