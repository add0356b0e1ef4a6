//! Derived analysis
//!
//! Pure functions over answers already collected: time-allocation banding,
//! portfolio health composition, trend deltas between two snapshots and
//! re-setup trigger evaluation. Nothing here talks to a collaborator.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BetStatus, Direction, Problem, TriggerKind};

/// Inclusive band that is accepted without comment.
const VALID_MIN: u32 = 95;
const VALID_MAX: u32 = 105;
/// Outer band that is accepted with a warning.
const WARNING_MIN: u32 = 90;
const WARNING_MAX: u32 = 110;

const DEPRECIATING_MAJORITY_PERCENT: f64 = 50.0;
const DEPRECIATING_TREND_POINTS: i64 = 15;
const STALE_PORTFOLIO_DAYS: i64 = 365;
const BET_MISS_STREAK: usize = 2;

//
// ================= Time Allocation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AllocationBand {
    Valid,
    Warning,
    Error,
}

impl AllocationBand {
    pub fn for_total(total: u32) -> Self {
        if (VALID_MIN..=VALID_MAX).contains(&total) {
            AllocationBand::Valid
        } else if (WARNING_MIN..=WARNING_MAX).contains(&total) {
            AllocationBand::Warning
        } else {
            AllocationBand::Error
        }
    }

    pub fn permits_proceed(&self) -> bool {
        !matches!(self, AllocationBand::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationCheck {
    pub total: u32,
    pub band: AllocationBand,
    pub message: Option<String>,
}

pub fn check_allocation(allocations: &[u32]) -> AllocationCheck {
    let total: u32 = allocations.iter().sum();
    let band = AllocationBand::for_total(total);

    let message = match band {
        AllocationBand::Valid => None,
        AllocationBand::Warning => Some(format!(
            "Allocations total {}%. Close enough to proceed, but check the numbers.",
            total
        )),
        AllocationBand::Error => Some(format!(
            "Allocations total {}%. Adjust them to land between {}% and {}%.",
            total, WARNING_MIN, WARNING_MAX
        )),
    };

    AllocationCheck {
        total,
        band,
        message,
    }
}

//
// ================= Portfolio Health =================
//

/// Allocation points attributable to each direction. Points sum to the
/// portfolio's total allocation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthComposition {
    pub appreciating: u32,
    pub depreciating: u32,
    pub stable: u32,
}

impl HealthComposition {
    pub fn from_problems(problems: &[Problem]) -> Self {
        let mut health = HealthComposition::default();

        for problem in problems {
            let points = problem.time_allocation_percent.unwrap_or(0);
            match problem.direction {
                Some(Direction::Appreciating) => health.appreciating += points,
                Some(Direction::Depreciating) => health.depreciating += points,
                Some(Direction::Stable) => health.stable += points,
                None => {}
            }
        }

        health
    }

    pub fn total(&self) -> u32 {
        self.appreciating + self.depreciating + self.stable
    }

    pub fn points(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Appreciating => self.appreciating,
            Direction::Depreciating => self.depreciating,
            Direction::Stable => self.stable,
        }
    }

    /// Share of the total as a percentage; zero for an empty portfolio.
    pub fn share(&self, direction: Direction) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        f64::from(self.points(direction)) * 100.0 / f64::from(total)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthTrend {
    pub previous: HealthComposition,
    pub current: HealthComposition,
    pub appreciating_change: i64,
    pub depreciating_change: i64,
    pub stable_change: i64,
}

pub fn health_trend(previous: HealthComposition, current: HealthComposition) -> HealthTrend {
    let delta = |d: Direction| i64::from(current.points(d)) - i64::from(previous.points(d));

    HealthTrend {
        previous,
        current,
        appreciating_change: delta(Direction::Appreciating),
        depreciating_change: delta(Direction::Depreciating),
        stable_change: delta(Direction::Stable),
    }
}

//
// ================= Re-setup Triggers =================
//

#[derive(Debug, Clone)]
pub struct TriggerInput<'a> {
    pub current: HealthComposition,
    pub trend: Option<&'a HealthTrend>,
    pub portfolio_created_at: Option<DateTime<Utc>>,
    /// Most recent first.
    pub recent_bet_statuses: &'a [BetStatus],
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FiredTrigger {
    pub kind: TriggerKind,
    pub detail: String,
}

pub fn evaluate_triggers(input: &TriggerInput<'_>) -> Vec<FiredTrigger> {
    let mut fired = Vec::new();
    let current = &input.current;

    let depreciating_share = current.share(Direction::Depreciating);
    if depreciating_share > DEPRECIATING_MAJORITY_PERCENT {
        fired.push(FiredTrigger {
            kind: TriggerKind::DepreciatingMajority,
            detail: format!(
                "{:.0}% of your time goes to depreciating problems",
                depreciating_share
            ),
        });
    }

    if let Some(trend) = input.trend {
        if trend.depreciating_change >= DEPRECIATING_TREND_POINTS {
            fired.push(FiredTrigger {
                kind: TriggerKind::DepreciatingTrend,
                detail: format!(
                    "Depreciating allocation grew by {} points since the last review",
                    trend.depreciating_change
                ),
            });
        }
    }

    if current.total() > 0 && current.appreciating == 0 {
        fired.push(FiredTrigger {
            kind: TriggerKind::NoAppreciating,
            detail: "No time is allocated to appreciating problems".to_string(),
        });
    }

    if let Some(created_at) = input.portfolio_created_at {
        let age = input.now - created_at;
        if age > Duration::days(STALE_PORTFOLIO_DAYS) {
            fired.push(FiredTrigger {
                kind: TriggerKind::StalePortfolio,
                detail: format!("Portfolio was last set up {} days ago", age.num_days()),
            });
        }
    }

    let misses = input
        .recent_bet_statuses
        .iter()
        .take_while(|s| matches!(s, BetStatus::Wrong | BetStatus::Expired))
        .count();
    if misses >= BET_MISS_STREAK {
        fired.push(FiredTrigger {
            kind: TriggerKind::RepeatedBetMiss,
            detail: format!("The last {} bets were wrong or expired", misses),
        });
    }

    fired
}
