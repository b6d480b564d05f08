//! Local mirror of the shared canvas
//!
//! The mirror is filled by the chunked snapshot and kept current by
//! broadcast updates. UDP may deliver a snapshot chunk after a newer
//! broadcast for the same cell, so a cell only ever moves forward in time.

use log::debug;
use shared::{Packet, Pixel};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorCell {
    pub color: String,
    pub updated_at: u64,
    /// Known only for cells seen through a live update
    pub placed_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CanvasMirror {
    size: u16,
    cells: HashMap<(u16, u16), MirrorCell>,
    received_chunks: HashSet<u32>,
    total_chunks: Option<u32>,
}

impl CanvasMirror {
    pub fn new(size: u16) -> Self {
        Self {
            size,
            cells: HashMap::new(),
            received_chunks: HashSet::new(),
            total_chunks: None,
        }
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    /// Applies any canvas-affecting packet; returns true if the mirror changed
    pub fn apply(&mut self, packet: &Packet) -> bool {
        match packet {
            Packet::PixelUpdate {
                x,
                y,
                color,
                user,
                updated_at,
            } => self.merge(*x, *y, color, *updated_at, Some(user)),
            Packet::Pixels {
                chunk,
                total_chunks,
                pixels,
            } => self.apply_chunk(*chunk, *total_chunks, pixels),
            Packet::Purged => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    fn apply_chunk(&mut self, chunk: u32, total_chunks: u32, pixels: &[Pixel]) -> bool {
        if self.total_chunks != Some(total_chunks) {
            self.received_chunks.clear();
            self.total_chunks = Some(total_chunks);
        }
        self.received_chunks.insert(chunk);
        debug!(
            "Canvas chunk {}/{} ({} pixels)",
            chunk + 1,
            total_chunks,
            pixels.len()
        );

        let mut changed = false;
        for pixel in pixels {
            changed |= self.merge(pixel.x, pixel.y, &pixel.color, pixel.updated_at, None);
        }
        changed
    }

    fn merge(
        &mut self,
        x: u16,
        y: u16,
        color: &str,
        updated_at: u64,
        placed_by: Option<&String>,
    ) -> bool {
        if x >= self.size || y >= self.size {
            return false;
        }

        match self.cells.get(&(x, y)) {
            Some(existing) if existing.updated_at > updated_at => false,
            _ => {
                self.cells.insert(
                    (x, y),
                    MirrorCell {
                        color: color.to_string(),
                        updated_at,
                        placed_by: placed_by.cloned(),
                    },
                );
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// True once every chunk of the latest snapshot has arrived
    pub fn is_synced(&self) -> bool {
        match self.total_chunks {
            Some(total) => self.received_chunks.len() as u32 >= total,
            None => false,
        }
    }

    /// Forgets snapshot progress before requesting a new one
    pub fn begin_sync(&mut self) {
        self.received_chunks.clear();
        self.total_chunks = None;
    }

    pub fn get(&self, x: u16, y: u16) -> Option<&MirrorCell> {
        self.cells.get(&(x, y))
    }

    pub fn painted(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(x: u16, y: u16, color: &str, updated_at: u64) -> Packet {
        Packet::PixelUpdate {
            x,
            y,
            color: color.to_string(),
            user: "alice".to_string(),
            updated_at,
        }
    }

    fn pixel(x: u16, y: u16, color: &str, updated_at: u64) -> Pixel {
        Pixel {
            x,
            y,
            color: color.to_string(),
            updated_at,
        }
    }

    #[test]
    fn test_live_update_painted() {
        let mut canvas = CanvasMirror::new(128);
        assert!(canvas.apply(&update(1, 2, "#FF0000", 10)));

        let cell = canvas.get(1, 2).unwrap();
        assert_eq!(cell.color, "#FF0000");
        assert_eq!(cell.placed_by.as_deref(), Some("alice"));
        assert_eq!(canvas.painted(), 1);
    }

    #[test]
    fn test_stale_snapshot_does_not_overwrite() {
        let mut canvas = CanvasMirror::new(128);
        canvas.apply(&update(0, 0, "#00FF00", 200));

        let changed = canvas.apply(&Packet::Pixels {
            chunk: 0,
            total_chunks: 1,
            pixels: vec![pixel(0, 0, "#FF0000", 100)],
        });

        assert!(!changed);
        assert_eq!(canvas.get(0, 0).unwrap().color, "#00FF00");
    }

    #[test]
    fn test_same_timestamp_takes_later_arrival() {
        let mut canvas = CanvasMirror::new(128);
        canvas.apply(&update(3, 3, "#000001", 50));
        canvas.apply(&update(3, 3, "#000002", 50));
        assert_eq!(canvas.get(3, 3).unwrap().color, "#000002");
    }

    #[test]
    fn test_sync_completes_after_all_chunks() {
        let mut canvas = CanvasMirror::new(128);
        canvas.begin_sync();
        assert!(!canvas.is_synced());

        canvas.apply(&Packet::Pixels {
            chunk: 1,
            total_chunks: 2,
            pixels: vec![pixel(5, 5, "#123456", 1)],
        });
        assert!(!canvas.is_synced());

        canvas.apply(&Packet::Pixels {
            chunk: 0,
            total_chunks: 2,
            pixels: vec![pixel(6, 6, "#654321", 2)],
        });
        assert!(canvas.is_synced());
        assert_eq!(canvas.painted(), 2);
    }

    #[test]
    fn test_purge_clears() {
        let mut canvas = CanvasMirror::new(128);
        canvas.apply(&update(1, 1, "#FFFFFF", 1));
        assert!(canvas.apply(&Packet::Purged));
        assert_eq!(canvas.painted(), 0);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut canvas = CanvasMirror::new(16);
        assert!(!canvas.apply(&update(16, 0, "#FFFFFF", 1)));
        assert!(!canvas.apply(&Packet::Heartbeat));
        assert_eq!(canvas.painted(), 0);
    }
}
