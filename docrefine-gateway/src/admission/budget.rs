//! Calendar-period token budgets per caller identity.
//!
//! Unlike the sliding window in [`super::rate_limit`], budgets reset on
//! calendar boundaries (start of UTC day, start of UTC month). Usage is
//! recomputed by summing a per-identifier spend-event log rather than kept
//! as a running counter, so a missed decrement can never make the numbers
//! drift.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Snapshot of an identifier's consumption against its ceilings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub daily_used: u64,
    pub daily_limit: u64,
    pub monthly_used: u64,
    pub monthly_limit: u64,
}

impl BudgetUsage {
    pub fn daily_remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.daily_used)
    }

    pub fn monthly_remaining(&self) -> u64 {
        self.monthly_limit.saturating_sub(self.monthly_used)
    }
}

/// Outcome of a budget check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDecision {
    /// Whether the requested spend fits both ceilings
    pub allowed: bool,
    /// First violated limit, if any
    pub reason: Option<String>,
    /// Usage at the time of the check (excluding the requested spend)
    pub budget: BudgetUsage,
}

/// Tracks per-identifier token spend against daily and monthly ceilings.
///
/// Spend is recorded only after the underlying call succeeds; checks never
/// mutate the log. Events older than the current month's start are pruned
/// on each touch, bounding memory per identifier.
pub struct TokenBudgetTracker {
    spend: DashMap<String, VecDeque<(DateTime<Utc>, u64)>>,
}

impl TokenBudgetTracker {
    pub fn new() -> Self {
        Self {
            spend: DashMap::new(),
        }
    }

    /// Check whether `requested_tokens` fits both the daily and monthly
    /// ceiling for `identifier`. Daily is checked first and the first
    /// violated limit is reported.
    pub fn check_budget(
        &self,
        identifier: &str,
        requested_tokens: u64,
        daily_limit: u64,
        monthly_limit: u64,
    ) -> BudgetDecision {
        let now = Utc::now();
        let day_start = start_of_day(now);
        let month_start = start_of_month(now);

        let mut entry = self.spend.entry(identifier.to_string()).or_default();
        let events = entry.value_mut();
        while events.front().is_some_and(|(ts, _)| *ts < month_start) {
            events.pop_front();
        }

        let monthly_used: u64 = events.iter().map(|(_, n)| *n).sum();
        let daily_used: u64 = events
            .iter()
            .filter(|(ts, _)| *ts >= day_start)
            .map(|(_, n)| *n)
            .sum();

        let budget = BudgetUsage {
            daily_used,
            daily_limit,
            monthly_used,
            monthly_limit,
        };

        let reason = if daily_used + requested_tokens > daily_limit {
            Some("Daily token limit exceeded".to_string())
        } else if monthly_used + requested_tokens > monthly_limit {
            Some("Monthly token limit exceeded".to_string())
        } else {
            None
        };

        if let Some(reason) = &reason {
            debug!(
                identifier,
                requested_tokens, daily_used, monthly_used, "{reason}"
            );
        }

        BudgetDecision {
            allowed: reason.is_none(),
            reason,
            budget,
        }
    }

    /// Record a completed spend for `identifier`. Call only after the
    /// underlying operation succeeded.
    pub fn record_spend(&self, identifier: &str, tokens: u64) {
        let now = Utc::now();
        let month_start = start_of_month(now);

        let mut entry = self.spend.entry(identifier.to_string()).or_default();
        let events = entry.value_mut();
        while events.front().is_some_and(|(ts, _)| *ts < month_start) {
            events.pop_front();
        }
        events.push_back((now, tokens));
    }

    /// Number of identifiers with at least one recorded spend event.
    pub fn tracked_identifiers(&self) -> usize {
        self.spend.len()
    }
}

impl Default for TokenBudgetTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}
