//! Client for a queue-backed remote command service.
//!
//! Commands are admitted by a per-caller [`rate_limit::RateLimiter`],
//! submitted to the queue, polled until they reach a terminal state and
//! their result fetched, all through a [`transport::RetryingTransport`]
//! that absorbs transient failures. [`facade::CommandExecutor`] is the
//! entry point that ties these together.

pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod facade;
pub mod rate_limit;
pub mod sanitize;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{AsyncCommandClient, ExecuteOptions, PollPolicy};
pub use config::{ConfigProvider, StaticConfig};
pub use error::{ErrorPayload, ExecError, LimitType};
pub use facade::{CommandExecutor, CommandOutcome, RunOptions};
pub use rate_limit::{RateDecision, RateLimiter, RateStatus};
pub use store::{JsonFileStore, KvStore, MemoryStore};
pub use transport::{
    HttpRequest, HttpResponse, HttpSend, ReqwestSender, RetryPolicy, RetryingTransport,
};
