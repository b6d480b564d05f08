//! # Pixel Canvas Client Library
//!
//! This library provides a headless client for the shared pixel canvas. It
//! connects over UDP, authenticates, keeps a local mirror of the canvas
//! and tracks the account's placement budget between server updates.
//!
//! ## Architecture Overview
//!
//! ### Local Mirror
//! The full canvas is downloaded once in datagram-sized chunks and then
//! kept current by the server's broadcasts. Because UDP may reorder a late
//! snapshot chunk behind a fresher broadcast, each mirrored cell keeps its
//! timestamp and never moves backwards.
//!
//! ### Budget Projection
//! The server reports the budget only when it changes. The client projects
//! refill forward from the last refill anchor with the same arithmetic the
//! server uses, so a countdown to the next turn needs no extra traffic.
//!
//! ## Module Organization
//!
//! ### Canvas Module (`canvas`)
//! - Snapshot chunk assembly and sync completion
//! - Live pixel updates and purge handling
//!
//! ### Budget Module (`budget`)
//! - Projected turns and time to next placement
//! - Refill progress for display
//!
//! ### Network Module (`network`)
//! - UDP socket management and connection handling
//! - Request/reply helpers for every account and canvas operation
//! - Watch loop with heartbeats
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", 128, Duration::from_secs(2)).await?;
//!     client.connect().await?;
//!     client.login("alice", "hunter2").await?;
//!
//!     client.sync_canvas().await?;
//!     client.place(10.0, 20.0, "#FF8800").await?;
//!
//!     let account = client.me().await?;
//!     println!("{} has placed {} pixels", account.username, account.pixels_placed);
//!     Ok(())
//! }
//! ```

pub mod budget;
pub mod canvas;
pub mod network;
