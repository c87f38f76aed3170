//! Payguard: resilience layer for payment API clients
//!
//! Classifies every failed call (network, timeout, challenge page, rate
//! limit, auth, validation, server, client), retries what can be retried with
//! exponential backoff and jitter, and turns what cannot into a structured
//! error with recovery guidance and a diagnostic report.
//!
//! # Quick Start
//!
//! ```no_run
//! use payguard::prelude::*;
//!
//! # async fn example() -> payguard::error::Result<()> {
//! let client = ResilientClient::from_config(ResilienceConfig::default())?;
//! let response = client
//!     .send(HttpRequest::get("https://api.example.com/v1/payments/pay_123"))
//!     .await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod detect;
pub mod error;
pub mod handler;
pub mod interceptor;
pub mod prelude;
pub mod retry;
pub mod transport;

#[cfg(feature = "cli")]
pub mod cli;
