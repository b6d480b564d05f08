//! Placement coordination
//!
//! A placement walks a fixed pipeline: resolve identity, validate the
//! request, take the user's lock, consult the rate limiter, persist the
//! account, commit the cell and hand the result to the fanout. Rejections
//! stop the pipeline before anything is written and are reported to the
//! requester alone.
//!
//! Locks are always taken in the order reset gate → user → cell. The cell
//! lock is held while the broadcast is enqueued, so observers see updates
//! for one cell in the order the grid committed them.

use crate::clock::Clock;
use crate::error::{CoordinateFault, PlaceError, StoreError};
use crate::fanout::Fanout;
use crate::grid::{Cell, GridStore};
use crate::identity::{Connection, IdentityService};
use crate::locks::KeyedLocks;
use crate::rate::{RateDecision, RateLimiter};
use log::{debug, error, info, warn};
use shared::{normalize_color, AccountView, Packet, Pixel};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One inbound `place_pixel` call, coordinates exactly as the client sent them
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRequest {
    pub x: f64,
    pub y: f64,
    pub color: String,
}

/// A committed placement, as broadcast to every observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelUpdate {
    pub x: u16,
    pub y: u16,
    pub color: String,
    pub user: String,
    pub updated_at: u64,
}

impl PixelUpdate {
    pub fn to_packet(&self) -> Packet {
        Packet::PixelUpdate {
            x: self.x,
            y: self.y,
            color: self.color.clone(),
            user: self.user.clone(),
            updated_at: self.updated_at,
        }
    }
}

impl From<&Cell> for PixelUpdate {
    fn from(cell: &Cell) -> Self {
        Self {
            x: cell.x,
            y: cell.y,
            color: cell.color.clone(),
            user: cell.placed_by.clone(),
            updated_at: cell.updated_at,
        }
    }
}

/// Checks that both coordinates are whole numbers inside the grid
pub fn validate_coordinates(x: f64, y: f64, grid_size: u16) -> Result<(u16, u16), PlaceError> {
    let axis = |v: f64| -> Result<u16, PlaceError> {
        if !v.is_finite() || v.fract() != 0.0 {
            return Err(PlaceError::InvalidCoordinates(CoordinateFault::NotInteger));
        }
        if v < 0.0 || v >= f64::from(grid_size) {
            return Err(PlaceError::InvalidCoordinates(CoordinateFault::OutOfBounds));
        }
        Ok(v as u16)
    };
    Ok((axis(x)?, axis(y)?))
}

pub struct Coordinator {
    grid: Arc<dyn GridStore>,
    identity: Arc<dyn IdentityService>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    fanout: Fanout,
    grid_size: u16,
    user_locks: KeyedLocks<String>,
    cell_locks: KeyedLocks<(u16, u16)>,
    /// Shared by every request, exclusive only for purge
    reset_gate: RwLock<()>,
}

impl Coordinator {
    pub fn new(
        grid: Arc<dyn GridStore>,
        identity: Arc<dyn IdentityService>,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
        fanout: Fanout,
        grid_size: u16,
    ) -> Self {
        Self {
            grid,
            identity,
            limiter,
            clock,
            fanout,
            grid_size,
            user_locks: KeyedLocks::new(),
            cell_locks: KeyedLocks::new(),
            reset_gate: RwLock::new(()),
        }
    }

    pub fn grid_size(&self) -> u16 {
        self.grid_size
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Places one pixel on behalf of `connection`.
    ///
    /// On success the update has already been broadcast and the requester's
    /// budget unicast by the time this returns.
    pub async fn place(
        &self,
        connection: &Connection,
        request: &PlacementRequest,
    ) -> Result<PixelUpdate, PlaceError> {
        let username = self
            .identity
            .resolve_current_user(connection)
            .ok_or(PlaceError::NotAuthenticated)?;
        let (x, y) = validate_coordinates(request.x, request.y, self.grid_size)?;
        let color = normalize_color(&request.color).ok_or(PlaceError::InvalidColor)?;

        let _gate = self.reset_gate.read().await;
        let _user_guard = self.user_locks.lock(&username).await;

        let prior = self
            .identity
            .load_account(&username)?
            .ok_or(PlaceError::UserNotFound)?;

        let now = self.clock.now_ms();
        let (decision, budget) = self.limiter.consume(&username, prior.budget, now);
        if let RateDecision::Denied(denial) = decision {
            return Err(denial.into());
        }

        let mut account = prior.clone();
        account.budget = budget;
        account.pixels_placed += 1;
        account.last_placed_at = Some(now);
        self.identity.save_account(&account)?;

        let update = {
            let _cell_guard = self.cell_locks.lock(&(x, y)).await;
            // stamped under the cell lock so stamps follow commit order
            let committed_at = self.clock.now_ms().max(now);
            let write = match self.grid.upsert(x, y, &color, &username, committed_at) {
                Ok(write) => write,
                Err(e) => {
                    if let Err(restore) = self.identity.save_account(&prior) {
                        error!("Failed to restore account {}: {}", username, restore);
                    }
                    return Err(e.into());
                }
            };
            let update = PixelUpdate::from(&write.cell);
            self.fanout.broadcast(update.to_packet());
            update
        };

        if let Some(view) = self.limiter.view(&username, account.budget, now) {
            self.fanout.send(connection.addr, view.into_packet());
        }

        debug!(
            "{} placed {} at ({}, {})",
            update.user, update.color, update.x, update.y
        );
        Ok(update)
    }

    /// Runs a placement and reports a rejection to the requester only
    pub async fn handle_place(&self, connection: &Connection, request: PlacementRequest) {
        if let Err(e) = self.place(connection, &request).await {
            match &e {
                PlaceError::Store(store) => {
                    error!("Placement by client {} failed: {}", connection.client_id, store)
                }
                other => debug!(
                    "Rejected placement from client {}: {}",
                    connection.client_id, other
                ),
            }
            self.fanout.send(
                connection.addr,
                Packet::Error {
                    code: e.code(),
                    budget: e.budget(),
                },
            );
        }
    }

    /// Account summary with any refill due applied and persisted
    pub async fn me(&self, connection: &Connection) -> Result<AccountView, PlaceError> {
        let username = self
            .identity
            .resolve_current_user(connection)
            .ok_or(PlaceError::NotAuthenticated)?;

        let _gate = self.reset_gate.read().await;
        let _user_guard = self.user_locks.lock(&username).await;

        let mut account = self
            .identity
            .load_account(&username)?
            .ok_or(PlaceError::UserNotFound)?;

        let now = self.clock.now_ms();
        let refreshed = self.limiter.refresh(&username, account.budget, now);
        if refreshed != account.budget {
            account.budget = refreshed;
            self.identity.save_account(&account)?;
        }

        Ok(AccountView {
            budget: self.limiter.view(&username, account.budget, now),
            custom_colors: account.custom_colors.to_vec(),
            pixels_placed: account.pixels_placed,
            username: account.username,
        })
    }

    /// Records a picked color at the front of the user's palette
    pub async fn save_color(
        &self,
        connection: &Connection,
        color: &str,
    ) -> Result<Vec<String>, PlaceError> {
        let username = self
            .identity
            .resolve_current_user(connection)
            .ok_or(PlaceError::NotAuthenticated)?;
        let color = normalize_color(color).ok_or(PlaceError::InvalidColor)?;

        let _gate = self.reset_gate.read().await;
        let _user_guard = self.user_locks.lock(&username).await;

        let mut account = self
            .identity
            .load_account(&username)?
            .ok_or(PlaceError::UserNotFound)?;
        account.custom_colors.remember(color);
        self.identity.save_account(&account)?;

        Ok(account.custom_colors.to_vec())
    }

    /// Full canvas for initial sync, most recent first
    pub fn snapshot(&self) -> Result<Vec<Pixel>, StoreError> {
        Ok(self.grid.read_all()?.iter().map(Cell::to_pixel).collect())
    }

    /// Wipes every cell, account and session. Admin only.
    pub async fn purge(&self, connection: &Connection) -> Result<usize, PlaceError> {
        let username = self
            .identity
            .resolve_current_user(connection)
            .ok_or(PlaceError::NotAuthenticated)?;
        if !self.limiter.is_exempt(&username) {
            warn!("Purge refused for {}", username);
            return Err(PlaceError::NotAuthenticated);
        }

        let _gate = self.reset_gate.write().await;
        let cells = self.grid.purge()?;
        // the canvas is already empty, observers must hear about it
        self.fanout.broadcast(Packet::Purged);
        self.prune_locks();

        match self.identity.remove_all() {
            Ok(accounts) => {
                info!("Purged {} cells and {} accounts", cells, accounts);
                Ok(cells)
            }
            Err(e) => {
                error!("Purged {} cells but accounts remain: {}", cells, e);
                Err(e.into())
            }
        }
    }

    /// Drops per-user and per-cell locks nobody currently holds
    pub fn prune_locks(&self) {
        self.user_locks.prune();
        self.cell_locks.prune();
    }
}
