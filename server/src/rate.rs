//! Per-user placement budgets
//!
//! Two interchangeable policies share one contract: given the stored budget
//! and the current time, decide whether a placement is allowed and produce
//! the budget to persist. Nothing here ticks in the background. Refill is
//! derived lazily from the stored refill anchor each time a budget is read
//! or consumed, so repeated evaluation with the same `now` is a no-op.

use crate::error::PlaceError;
use serde::{Deserialize, Serialize};
use shared::{refill_turns, BudgetView};

/// Active rate-limiting policy, selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePolicy {
    /// One placement per `cooldown_ms`
    Cooldown { cooldown_ms: u64 },
    /// Up to `max_turns` banked placements, one regained per `refill_ms`
    TurnRefill { max_turns: u32, refill_ms: u64 },
}

/// Stored accounting for one user. The shape follows the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Budget {
    Cooldown {
        last_placed_at: Option<u64>,
    },
    Turns {
        turns_remaining: u32,
        /// Refill anchor; `None` while refill is dormant
        last_turn_refill: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied(Denial),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Carries the refreshed budget so the client can resynchronise
    NoTurns(BudgetView),
    Cooldown { wait_ms: u64 },
}

impl From<Denial> for PlaceError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::NoTurns(view) => PlaceError::NoTurns(view),
            Denial::Cooldown { wait_ms } => PlaceError::Cooldown { wait_ms },
        }
    }
}

impl RatePolicy {
    /// Budget of a brand-new account
    pub fn fresh_budget(&self) -> Budget {
        match *self {
            RatePolicy::Cooldown { .. } => Budget::Cooldown {
                last_placed_at: None,
            },
            RatePolicy::TurnRefill { max_turns, .. } => Budget::Turns {
                turns_remaining: max_turns,
                last_turn_refill: None,
            },
        }
    }

    /// Coerces a stored budget into the shape this policy understands.
    ///
    /// A budget written under the other policy is replaced by a fresh one.
    /// Turn counts are clamped to `max_turns` and a full bank drops its anchor.
    pub fn conform(&self, budget: Budget) -> Budget {
        match (*self, budget) {
            (RatePolicy::Cooldown { .. }, Budget::Cooldown { .. }) => budget,
            (
                RatePolicy::TurnRefill { max_turns, .. },
                Budget::Turns {
                    turns_remaining,
                    last_turn_refill,
                },
            ) => {
                if turns_remaining >= max_turns {
                    Budget::Turns {
                        turns_remaining: max_turns,
                        last_turn_refill: None,
                    }
                } else {
                    Budget::Turns {
                        turns_remaining,
                        last_turn_refill,
                    }
                }
            }
            _ => self.fresh_budget(),
        }
    }

    /// Applies any refill due at `now` without consuming anything
    pub fn refresh(&self, budget: Budget, now: u64) -> Budget {
        match (*self, self.conform(budget)) {
            (
                RatePolicy::TurnRefill {
                    max_turns,
                    refill_ms,
                },
                Budget::Turns {
                    turns_remaining,
                    last_turn_refill,
                },
            ) => {
                let (turns_remaining, last_turn_refill) =
                    refill_turns(turns_remaining, last_turn_refill, now, max_turns, refill_ms);
                Budget::Turns {
                    turns_remaining,
                    last_turn_refill,
                }
            }
            (_, conformed) => conformed,
        }
    }

    /// Attempts to spend one placement at `now`.
    ///
    /// Returns the decision together with the budget to persist. On denial the
    /// returned budget is only the refreshed one and need not be saved.
    pub fn consume(&self, budget: Budget, now: u64) -> (RateDecision, Budget) {
        let budget = self.refresh(budget, now);
        match (*self, budget) {
            (RatePolicy::Cooldown { cooldown_ms }, Budget::Cooldown { last_placed_at }) => {
                if let Some(last) = last_placed_at {
                    let elapsed = now.saturating_sub(last);
                    if elapsed < cooldown_ms {
                        let wait_ms = cooldown_ms - elapsed;
                        return (RateDecision::Denied(Denial::Cooldown { wait_ms }), budget);
                    }
                }
                (
                    RateDecision::Allowed,
                    Budget::Cooldown {
                        last_placed_at: Some(now),
                    },
                )
            }
            (
                RatePolicy::TurnRefill { .. },
                Budget::Turns {
                    turns_remaining,
                    last_turn_refill,
                },
            ) => {
                if turns_remaining == 0 {
                    let view = self.view(budget, now);
                    return (RateDecision::Denied(Denial::NoTurns(view)), budget);
                }
                let turns_remaining = turns_remaining - 1;
                let last_turn_refill = if turns_remaining == 0 {
                    Some(now)
                } else {
                    last_turn_refill
                };
                (
                    RateDecision::Allowed,
                    Budget::Turns {
                        turns_remaining,
                        last_turn_refill,
                    },
                )
            }
            // refresh() always conforms the shape to the policy
            (_, other) => (RateDecision::Allowed, other),
        }
    }

    /// Client-facing snapshot of an already refreshed budget
    pub fn view(&self, budget: Budget, now: u64) -> BudgetView {
        match (*self, self.conform(budget)) {
            (RatePolicy::Cooldown { cooldown_ms }, Budget::Cooldown { last_placed_at }) => {
                let left_ms = last_placed_at
                    .map(|last| cooldown_ms.saturating_sub(now.saturating_sub(last)))
                    .unwrap_or(0);
                BudgetView::Cooldown { left_ms }
            }
            (
                RatePolicy::TurnRefill {
                    max_turns,
                    refill_ms,
                },
                Budget::Turns {
                    turns_remaining,
                    last_turn_refill,
                },
            ) => BudgetView::Turns {
                turns_remaining,
                last_turn_refill,
                max_turns,
                refill_ms,
            },
            (RatePolicy::Cooldown { .. }, _) => BudgetView::Cooldown { left_ms: 0 },
            (
                RatePolicy::TurnRefill {
                    max_turns,
                    refill_ms,
                },
                _,
            ) => BudgetView::Turns {
                turns_remaining: max_turns,
                last_turn_refill: None,
                max_turns,
                refill_ms,
            },
        }
    }
}

/// Policy plus the single identity exempt from it
#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: RatePolicy,
    admin: String,
}

impl RateLimiter {
    pub fn new(policy: RatePolicy, admin: impl Into<String>) -> Self {
        Self {
            policy,
            admin: admin.into(),
        }
    }

    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    pub fn is_exempt(&self, username: &str) -> bool {
        username == self.admin
    }

    /// The admin always passes and its budget is returned untouched
    pub fn consume(&self, username: &str, budget: Budget, now: u64) -> (RateDecision, Budget) {
        if self.is_exempt(username) {
            return (RateDecision::Allowed, budget);
        }
        self.policy.consume(budget, now)
    }

    pub fn refresh(&self, username: &str, budget: Budget, now: u64) -> Budget {
        if self.is_exempt(username) {
            return budget;
        }
        self.policy.refresh(budget, now)
    }

    /// `None` for the admin, who has no budget to show
    pub fn view(&self, username: &str, budget: Budget, now: u64) -> Option<BudgetView> {
        if self.is_exempt(username) {
            return None;
        }
        Some(self.policy.view(budget, now))
    }
}
