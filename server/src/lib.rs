//! # Pixel Canvas Server Library
//!
//! This library provides the authoritative server for a shared pixel canvas.
//! Many clients watch one grid of colored cells and place pixels on it, each
//! account limited in how fast it may place by a configurable rate policy.
//!
//! ## Core Responsibilities
//!
//! ### Placement Coordination
//! Every placement is validated, charged against the placing account's
//! budget, committed to the grid and then announced. A rejected placement
//! leaves no trace: the grid, the account and the observers are untouched
//! and only the requester hears about it.
//!
//! ### Rate Limiting
//! Two interchangeable policies share one contract:
//! - **Turn refill**: a bank of turns, one regained per refill interval,
//!   computed lazily from a stored anchor timestamp
//! - **Cooldown**: a fixed wait between consecutive placements
//!
//! The configured admin account bypasses both.
//!
//! ### Broadcast Fanout
//! Confirmed placements go to every connected observer in commit order.
//! Budget updates and rejections are unicast to the requester.
//!
//! ## Architecture Design
//!
//! ### Task Per Request
//! The network loop decodes each datagram and hands engine work to its own
//! tokio task. Concurrency is bounded by keyed locks rather than a global
//! one: requests from one account serialize on that account's lock and
//! writes to one cell serialize on that cell's lock. Different accounts
//! placing on different cells never wait on each other.
//!
//! ### UDP-Based Communication
//! Uses UDP sockets with bincode-encoded [`shared::Packet`]s. A single
//! sender task owns outbound delivery, which is what keeps broadcast order
//! identical for every observer.
//!
//! ### Pull-Based Time
//! Nothing ticks in the background. Budgets are recomputed from stored
//! timestamps through an injected [`clock::Clock`] whenever they are read
//! or spent, so tests can drive time explicitly.
//!
//! ## Module Organization
//!
//! - `grid`: cell storage with atomic per-coordinate upsert
//! - `rate`: rate policies, budgets and the admin-aware limiter
//! - `accounts`: user accounts, credentials and custom color palettes
//! - `identity`: connection-to-user resolution and the session directory
//! - `locks`: per-key async mutexes
//! - `coordinator`: the placement pipeline and account operations
//! - `fanout`: the ordered outbound queue
//! - `client_manager`: connected observer roster and timeouts
//! - `network`: UDP transport and packet dispatch
//! - `config`: command line and environment configuration
//! - `clock`: wall and manual clocks
//! - `error`: error types and their wire codes
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Binds the socket and builds in-memory stores for grid and accounts
//!     let mut server = Server::new(&config).await?;
//!
//!     // Runs until the process is stopped:
//!     // - receives and dispatches client packets
//!     // - delivers broadcasts and unicasts in enqueue order
//!     // - drops clients that stop sending heartbeats
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod client_manager;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod grid;
pub mod identity;
pub mod locks;
pub mod network;
pub mod rate;
