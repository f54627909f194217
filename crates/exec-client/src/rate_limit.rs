//! Per-caller sliding window limits on command submission.
//!
//! Each caller has a persisted list of submission timestamps. A submission
//! is admitted only while both the trailing minute and trailing hour hold
//! fewer entries than their limits.
//!
//! The record is read, changed and written back without a lock, since the
//! store has no transactional update. Two concurrent admits for the same
//! caller can both see spare capacity and both pass, so the limit is soft
//! under concurrency.

use crate::error::{ExecError, LimitType};
use crate::store::KvStore;
use protocol::config::RateLimitConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use system_utils::clock::Clock;
use tracing::{info, warn};

pub const MINUTE_WINDOW_MS: u64 = 60_000;
pub const HOUR_WINDOW_MS: u64 = 3_600_000;
/// Shared identity for callers that cannot be identified.
pub const FALLBACK_CALLER: &str = "anonymous";
const KEY_PREFIX: &str = "rate-limit:";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRecord {
    #[serde(default)]
    pub timestamps: Vec<u64>,
}

impl RateLimitRecord {
    fn decode(value: Value, key: &str) -> Self {
        if let Value::Array(_) = value {
            if let Ok(timestamps) = serde_json::from_value::<Vec<u64>>(value.clone()) {
                return Self { timestamps };
            }
        }
        match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                warn!(key, error = %err, "discarding unreadable rate limit record");
                Self::default()
            }
        }
    }
}

/// Counts for one caller at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Timestamps still inside the hour window, in stored order.
    pub pruned: Vec<u64>,
    pub minute_count: u32,
    pub hour_count: u32,
    pub oldest_in_minute: Option<u64>,
    pub oldest_in_hour: Option<u64>,
}

/// Prunes entries outside the hour window and counts both windows.
pub fn snapshot(timestamps: &[u64], now_ms: u64) -> WindowSnapshot {
    let hour_start = now_ms.saturating_sub(HOUR_WINDOW_MS);
    let minute_start = now_ms.saturating_sub(MINUTE_WINDOW_MS);
    let pruned: Vec<u64> = timestamps
        .iter()
        .copied()
        .filter(|ts| *ts > hour_start)
        .collect();
    let in_minute = pruned.iter().copied().filter(|ts| *ts > minute_start);
    WindowSnapshot {
        minute_count: in_minute.clone().count() as u32,
        hour_count: pruned.len() as u32,
        oldest_in_minute: in_minute.min(),
        oldest_in_hour: pruned.iter().copied().min(),
        pruned,
    }
}

/// Whole seconds until `oldest` leaves a window of `window_ms`, at least one.
pub fn retry_after_secs(oldest: u64, window_ms: u64, now_ms: u64) -> u64 {
    let remaining_ms = oldest.saturating_add(window_ms).saturating_sub(now_ms);
    remaining_ms.div_ceil(1_000).max(1)
}

/// Which window, if any, blocks another submission.
pub fn blocking_window(
    snapshot: &WindowSnapshot,
    limits: &RateLimitConfig,
    now_ms: u64,
) -> Option<(LimitType, u64)> {
    if snapshot.minute_count >= limits.per_minute {
        let oldest = snapshot.oldest_in_minute.unwrap_or(now_ms);
        return Some((
            LimitType::Minute,
            retry_after_secs(oldest, MINUTE_WINDOW_MS, now_ms),
        ));
    }
    if snapshot.hour_count >= limits.per_hour {
        let oldest = snapshot.oldest_in_hour.unwrap_or(now_ms);
        return Some((LimitType::Hour, retry_after_secs(oldest, HOUR_WINDOW_MS, now_ms)));
    }
    None
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Remaining {
    pub minute: u32,
    pub hour: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: Remaining,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_type: Option<LimitType>,
}

impl RateDecision {
    /// Converts a denial into the error callers propagate.
    pub fn into_result(self) -> Result<Remaining, ExecError> {
        match (self.allowed, self.limit_type, self.retry_after_secs) {
            (true, _, _) => Ok(self.remaining),
            (false, Some(limit_type), Some(retry_after)) => {
                Err(ExecError::rate_limited(limit_type, retry_after))
            }
            (false, limit_type, retry_after) => Err(ExecError::rate_limited(
                limit_type.unwrap_or(LimitType::Minute),
                retry_after.unwrap_or(1),
            )),
        }
    }
}

/// Read-only view of a caller's quota.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateStatus {
    pub caller_id: String,
    pub per_minute: u32,
    pub per_hour: u32,
    pub minute_used: u32,
    pub hour_used: u32,
    pub remaining: Remaining,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_type: Option<LimitType>,
}

pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    limits: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, limits: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            limits,
        }
    }

    /// Admits or rejects one submission, recording it when admitted.
    pub async fn admit(&self, caller_id: Option<&str>) -> Result<RateDecision, ExecError> {
        let caller = resolve_caller(caller_id);
        let key = record_key(caller);
        let record = self.load(&key).await?;
        let now_ms = self.clock.now_ms();
        let mut window = snapshot(&record.timestamps, now_ms);

        if let Some((limit_type, retry_after)) = blocking_window(&window, &self.limits, now_ms) {
            self.save(&key, window.pruned.clone()).await?;
            info!(
                caller,
                limit_type = limit_type.as_str(),
                retry_after_secs = retry_after,
                minute_count = window.minute_count,
                hour_count = window.hour_count,
                "command rate limited"
            );
            let err = ExecError::rate_limited(limit_type, retry_after);
            return Ok(RateDecision {
                allowed: false,
                remaining: self.remaining(&window),
                error: Some(err.to_string()),
                retry_after_secs: Some(retry_after),
                limit_type: Some(limit_type),
            });
        }

        window.pruned.push(now_ms);
        window.minute_count += 1;
        window.hour_count += 1;
        let remaining = self.remaining(&window);
        self.save(&key, window.pruned).await?;
        Ok(RateDecision {
            allowed: true,
            remaining,
            error: None,
            retry_after_secs: None,
            limit_type: None,
        })
    }

    /// Same counts as [`RateLimiter::admit`] without recording anything.
    pub async fn status(&self, caller_id: Option<&str>) -> Result<RateStatus, ExecError> {
        let caller = resolve_caller(caller_id);
        let record = self.load(&record_key(caller)).await?;
        let now_ms = self.clock.now_ms();
        let window = snapshot(&record.timestamps, now_ms);
        let blocked = blocking_window(&window, &self.limits, now_ms);
        Ok(RateStatus {
            caller_id: caller.to_string(),
            per_minute: self.limits.per_minute,
            per_hour: self.limits.per_hour,
            minute_used: window.minute_count,
            hour_used: window.hour_count,
            remaining: self.remaining(&window),
            retry_after_secs: blocked.map(|(_, secs)| secs),
            limit_type: blocked.map(|(limit_type, _)| limit_type),
        })
    }

    fn remaining(&self, window: &WindowSnapshot) -> Remaining {
        Remaining {
            minute: self.limits.per_minute.saturating_sub(window.minute_count),
            hour: self.limits.per_hour.saturating_sub(window.hour_count),
        }
    }

    async fn load(&self, key: &str) -> Result<RateLimitRecord, ExecError> {
        Ok(self
            .store
            .get(key)
            .await?
            .map(|value| RateLimitRecord::decode(value, key))
            .unwrap_or_default())
    }

    async fn save(&self, key: &str, timestamps: Vec<u64>) -> Result<(), ExecError> {
        let value = serde_json::to_value(RateLimitRecord { timestamps })
            .map_err(|err| ExecError::Store(err.to_string()))?;
        self.store.set(key, value).await
    }
}

fn resolve_caller(caller_id: Option<&str>) -> &str {
    caller_id
        .map(str::trim)
        .filter(|caller| !caller.is_empty())
        .unwrap_or(FALLBACK_CALLER)
}

fn record_key(caller: &str) -> String {
    format!("{KEY_PREFIX}{caller}")
}
