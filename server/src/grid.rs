//! Canvas storage
//!
//! The grid keeps exactly one record per coordinate. Writes are
//! last-committed-wins with no merging: two placements racing on the same
//! cell both succeed and the store converges on whichever committed last.

use crate::error::StoreError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared::Pixel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub x: u16,
    pub y: u16,
    pub color: String,
    pub placed_by: String,
    pub updated_at: u64,
}

impl Cell {
    /// Public view without authorship, as sent during initial sync
    pub fn to_pixel(&self) -> Pixel {
        Pixel {
            x: self.x,
            y: self.y,
            color: self.color.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Result of one committed upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub prior_color: Option<String>,
    pub cell: Cell,
}

/// Durable coordinate → cell mapping with atomic per-coordinate upsert.
///
/// A cell's `updated_at` never moves backwards: a write stamped earlier than
/// the value it replaces takes the replaced stamp instead.
pub trait GridStore: Send + Sync {
    fn upsert(
        &self,
        x: u16,
        y: u16,
        color: &str,
        writer: &str,
        now: u64,
    ) -> Result<CellWrite, StoreError>;

    fn get(&self, x: u16, y: u16) -> Result<Option<Cell>, StoreError>;

    /// Every cell, most recently updated first
    fn read_all(&self) -> Result<Vec<Cell>, StoreError>;

    /// Removes every cell and returns how many there were
    fn purge(&self) -> Result<usize, StoreError>;

    fn cell_count(&self) -> Result<usize, StoreError>;
}

/// In-process grid on a sharded map, so unrelated cells never share a lock
#[derive(Debug, Default)]
pub struct MemoryGridStore {
    cells: DashMap<(u16, u16), Cell>,
}

impl MemoryGridStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GridStore for MemoryGridStore {
    fn upsert(
        &self,
        x: u16,
        y: u16,
        color: &str,
        writer: &str,
        now: u64,
    ) -> Result<CellWrite, StoreError> {
        let stamp = |updated_at: u64| Cell {
            x,
            y,
            color: color.to_string(),
            placed_by: writer.to_string(),
            updated_at,
        };

        let write = match self.cells.entry((x, y)) {
            Entry::Occupied(mut occupied) => {
                let cell = stamp(now.max(occupied.get().updated_at));
                let prior = occupied.insert(cell.clone());
                CellWrite {
                    prior_color: Some(prior.color),
                    cell,
                }
            }
            Entry::Vacant(vacant) => {
                let cell = stamp(now);
                vacant.insert(cell.clone());
                CellWrite {
                    prior_color: None,
                    cell,
                }
            }
        };

        Ok(write)
    }

    fn get(&self, x: u16, y: u16) -> Result<Option<Cell>, StoreError> {
        Ok(self.cells.get(&(x, y)).map(|cell| cell.value().clone()))
    }

    fn read_all(&self) -> Result<Vec<Cell>, StoreError> {
        let mut cells: Vec<Cell> = self.cells.iter().map(|cell| cell.value().clone()).collect();
        cells.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(cells)
    }

    fn purge(&self) -> Result<usize, StoreError> {
        let count = self.cells.len();
        self.cells.clear();
        Ok(count)
    }

    fn cell_count(&self) -> Result<usize, StoreError> {
        Ok(self.cells.len())
    }
}
