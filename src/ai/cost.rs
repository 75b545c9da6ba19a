//! Cost controller: gates every LLM call against per-scan and per-day caps.
//!
//! Flow per call attempt: `gate` (check limits, reserve the maximum possible
//! cost) → execute → `settle` with the actual cost (or a refund on transport
//! failure). The ledger lives behind a single mutex so the caps can never be
//! exceeded by parallel arbitration.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use crate::core::config::{CostConfig, CostControlMode};
use crate::core::errors::CmError;

/// Process-wide spending record. Monotonic except across
/// [`CostController::reset_scan_stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct CostLedger {
    pub scan_calls: u32,
    pub scan_cost: f64,
    pub daily_cost: f64,
    pub alltime_cost: f64,
    pub last_reset: DateTime<Utc>,
    day: NaiveDate,
}

impl CostLedger {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            scan_calls: 0,
            scan_cost: 0.0,
            daily_cost: 0.0,
            alltime_cost: 0.0,
            last_reset: now,
            day: now.date_naive(),
        }
    }
}

/// Outcome of the pre-call gate.
#[derive(Debug)]
pub enum GateDecision {
    /// Proceed; the maximum possible cost has been reserved.
    Proceed(Reservation),
    /// Do not call; silently resolve with rules (Fallback mode past caps,
    /// or RulesOnly mode).
    Unavailable(&'static str),
    /// Do not call; surface the error (Budget mode past caps).
    Rejected(CmError),
}

/// Token for one reserved call. Must be settled or cancelled.
#[derive(Debug, PartialEq)]
pub struct Reservation {
    reserved: f64,
}

/// Budgeted gate in front of the LLM client.
#[derive(Debug)]
pub struct CostController {
    config: CostConfig,
    ledger: Mutex<CostLedger>,
}

impl CostController {
    #[must_use]
    pub fn new(config: CostConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(CostLedger::new(Utc::now())),
        }
    }

    /// Whether calls are possible at all in the configured mode.
    #[must_use]
    pub fn mode(&self) -> CostControlMode {
        self.config.mode
    }

    /// Check limits and reserve the maximum possible cost of one call.
    pub fn gate(&self, now: DateTime<Utc>) -> GateDecision {
        if self.config.mode == CostControlMode::RulesOnly {
            return GateDecision::Unavailable("mode is rules_only");
        }

        let mut ledger = self.ledger.lock();
        roll_day(&mut ledger, now);

        if self.config.mode != CostControlMode::Unlimited {
            let reserve = self.config.max_cost_per_call;
            let over_calls = ledger.scan_calls >= self.config.max_calls_per_scan;
            let over_scan_budget =
                ledger.scan_cost + reserve > self.config.max_budget_per_scan;
            let over_daily_budget =
                ledger.daily_cost + reserve > self.config.max_budget_per_day;

            if over_calls || over_scan_budget || over_daily_budget {
                return match self.config.mode {
                    CostControlMode::Budget => GateDecision::Rejected(CmError::BudgetExhausted {
                        details: limit_description(over_calls, over_scan_budget),
                    }),
                    _ => GateDecision::Unavailable("budget caps reached"),
                };
            }
        }

        ledger.scan_calls += 1;
        ledger.scan_cost += self.config.max_cost_per_call;
        ledger.daily_cost += self.config.max_cost_per_call;
        ledger.alltime_cost += self.config.max_cost_per_call;
        GateDecision::Proceed(Reservation {
            reserved: self.config.max_cost_per_call,
        })
    }

    /// Replace the reservation with the actual cost of the call.
    pub fn settle(&self, reservation: Reservation, actual_cost: f64) {
        let delta = actual_cost - reservation.reserved;
        let mut ledger = self.ledger.lock();
        ledger.scan_cost = (ledger.scan_cost + delta).max(0.0);
        ledger.daily_cost = (ledger.daily_cost + delta).max(0.0);
        ledger.alltime_cost = (ledger.alltime_cost + delta).max(0.0);
    }

    /// Refund a reservation whose call never consumed tokens. The attempt
    /// still counts against `max_calls_per_scan`.
    pub fn refund(&self, reservation: Reservation) {
        self.settle(reservation, 0.0);
    }

    /// Keep the full reserved amount as the call's cost. Used when the wire
    /// protocol reports no usage figure; reserving the maximum and committing
    /// it never under-counts.
    pub fn commit(&self, reservation: Reservation) {
        let amount = reservation.reserved;
        self.settle(reservation, amount);
    }

    /// Zero the per-scan counters (start of a new scan).
    pub fn reset_scan_stats(&self) {
        let mut ledger = self.ledger.lock();
        ledger.scan_calls = 0;
        ledger.scan_cost = 0.0;
        ledger.last_reset = Utc::now();
    }

    /// Current ledger snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CostLedger {
        self.ledger.lock().clone()
    }
}

fn roll_day(ledger: &mut CostLedger, now: DateTime<Utc>) {
    let today = now.date_naive();
    if today != ledger.day {
        ledger.day = today;
        ledger.daily_cost = 0.0;
    }
}

fn limit_description(over_calls: bool, over_scan_budget: bool) -> String {
    if over_calls {
        "max_calls_per_scan reached".to_string()
    } else if over_scan_budget {
        "max_budget_per_scan reached".to_string()
    } else {
        "max_budget_per_day reached".to_string()
    }
}
