//! Client-side view of the placement budget
//!
//! The server only sends a budget when it changes. Between updates the
//! client projects refill forward from the anchor with the same arithmetic
//! the server uses, so the countdown needs no timer messages.

use shared::{refill_turns, BudgetView};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetTracker {
    view: BudgetView,
    /// Local time the view arrived, for cooldown countdowns
    received_at: u64,
}

impl BudgetTracker {
    pub fn new(view: BudgetView, received_at: u64) -> Self {
        Self { view, received_at }
    }

    pub fn view(&self) -> BudgetView {
        self.view
    }

    /// Turns available at `now`, or None under the cooldown policy
    pub fn turns_at(&self, now: u64) -> Option<u32> {
        match self.view {
            BudgetView::Turns {
                turns_remaining,
                last_turn_refill,
                max_turns,
                refill_ms,
            } => Some(refill_turns(turns_remaining, last_turn_refill, now, max_turns, refill_ms).0),
            BudgetView::Cooldown { .. } => None,
        }
    }

    /// Milliseconds until the next placement is possible or the next turn
    /// arrives. Zero when a placement is possible right now.
    pub fn wait_ms(&self, now: u64) -> u64 {
        match self.view {
            BudgetView::Turns {
                turns_remaining,
                last_turn_refill,
                max_turns,
                refill_ms,
            } => {
                let (turns, anchor) =
                    refill_turns(turns_remaining, last_turn_refill, now, max_turns, refill_ms);
                match anchor {
                    _ if turns > 0 => 0,
                    Some(anchor) => (anchor + refill_ms).saturating_sub(now),
                    // Empty with no anchor never refills
                    None => u64::MAX,
                }
            }
            BudgetView::Cooldown { left_ms } => {
                left_ms.saturating_sub(now.saturating_sub(self.received_at))
            }
        }
    }

    /// Fraction of the way to the next turn. 1.0 when the bank is full,
    /// 0.0 while refill is dormant below capacity.
    pub fn refill_progress(&self, now: u64) -> f64 {
        match self.view {
            BudgetView::Turns {
                turns_remaining,
                last_turn_refill,
                max_turns,
                refill_ms,
            } => {
                let (turns, anchor) =
                    refill_turns(turns_remaining, last_turn_refill, now, max_turns, refill_ms);
                match anchor {
                    Some(anchor) if refill_ms > 0 => {
                        now.saturating_sub(anchor) as f64 / refill_ms as f64
                    }
                    Some(_) => 0.0,
                    None if turns >= max_turns => 1.0,
                    None => 0.0,
                }
            }
            BudgetView::Cooldown { left_ms } => {
                if left_ms == 0 {
                    return 1.0;
                }
                let elapsed = now.saturating_sub(self.received_at).min(left_ms);
                elapsed as f64 / left_ms as f64
            }
        }
    }

    pub fn can_place(&self, now: u64) -> bool {
        self.wait_ms(now) == 0
    }

    pub fn describe(&self, now: u64) -> String {
        match self.view {
            BudgetView::Turns { max_turns, .. } => {
                let turns = self.turns_at(now).unwrap_or(0);
                match self.next_turn_ms(now) {
                    Some(next) if turns < max_turns => format!(
                        "{}/{} turns, next in {:.1}s",
                        turns,
                        max_turns,
                        next as f64 / 1000.0
                    ),
                    _ => format!("{}/{} turns", turns, max_turns),
                }
            }
            BudgetView::Cooldown { .. } => match self.wait_ms(now) {
                0 => "ready".to_string(),
                wait => format!("cooling down, {:.1}s left", wait as f64 / 1000.0),
            },
        }
    }

    /// Time until the next refilled turn; None unless refill is running
    fn next_turn_ms(&self, now: u64) -> Option<u64> {
        match self.view {
            BudgetView::Turns {
                turns_remaining,
                last_turn_refill,
                max_turns,
                refill_ms,
            } => {
                let (_, anchor) =
                    refill_turns(turns_remaining, last_turn_refill, now, max_turns, refill_ms);
                anchor.map(|anchor| (anchor + refill_ms).saturating_sub(now))
            }
            BudgetView::Cooldown { .. } => None,
        }
    }
}
