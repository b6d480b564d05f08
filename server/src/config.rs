//! Command line and environment configuration for the canvas server

use crate::error::ConfigError;
use crate::rate::RatePolicy;
use clap::{Parser, ValueEnum};
use shared::{ADMIN_USERNAME, DEFAULT_COOLDOWN_MS, GRID_SIZE, MAX_TURNS, TURN_REFILL_MS};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyKind {
    /// Banked turns with periodic refill
    Turns,
    /// Fixed wait between placements
    Cooldown,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server host address
    #[arg(short = 'H', long, env = "PIXEL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "PIXEL_PORT", default_value = "8080")]
    pub port: u16,

    /// Width and height of the square canvas
    #[arg(long, env = "PIXEL_GRID_SIZE", default_value_t = GRID_SIZE)]
    pub grid_size: u16,

    /// Rate limiting policy
    #[arg(long, env = "PIXEL_POLICY", value_enum, default_value_t = PolicyKind::Turns)]
    pub policy: PolicyKind,

    /// Turn bank capacity (turns policy)
    #[arg(long, env = "PIXEL_MAX_TURNS", default_value_t = MAX_TURNS)]
    pub max_turns: u32,

    /// Milliseconds to regain one turn (turns policy)
    #[arg(long, env = "PIXEL_REFILL_MS", default_value_t = TURN_REFILL_MS)]
    pub refill_ms: u64,

    /// Milliseconds between placements (cooldown policy)
    #[arg(long, env = "PIXEL_COOLDOWN_MS", default_value_t = DEFAULT_COOLDOWN_MS)]
    pub cooldown_ms: u64,

    /// Account exempt from rate limiting and allowed to purge
    #[arg(long, env = "PIXEL_ADMIN_USERNAME", default_value = ADMIN_USERNAME)]
    pub admin_username: String,

    /// Creates the admin account at startup when set
    #[arg(long, env = "PIXEL_ADMIN_PASSWORD")]
    pub admin_password: Option<String>,

    /// Maximum number of connected clients
    #[arg(short, long, env = "PIXEL_MAX_CLIENTS", default_value = "256")]
    pub max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, env = "PIXEL_CLIENT_TIMEOUT_SECS", default_value = "30")]
    pub client_timeout_secs: u64,
}

/// Validated server settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub grid_size: u16,
    pub policy: RatePolicy,
    pub admin_username: String,
    pub admin_password: Option<String>,
    pub max_clients: usize,
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            grid_size: GRID_SIZE,
            policy: RatePolicy::TurnRefill {
                max_turns: MAX_TURNS,
                refill_ms: TURN_REFILL_MS,
            },
            admin_username: ADMIN_USERNAME.to_string(),
            admin_password: None,
            max_clients: 256,
            client_timeout: Duration::from_secs(30),
        }
    }
}

impl TryFrom<Args> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.grid_size == 0 {
            return Err(ConfigError::Invalid("grid size must be at least 1"));
        }
        if args.max_clients == 0 {
            return Err(ConfigError::Invalid("max clients must be at least 1"));
        }
        if args.client_timeout_secs == 0 {
            return Err(ConfigError::Invalid("client timeout must be at least 1s"));
        }
        if args.admin_username.is_empty() {
            return Err(ConfigError::Invalid("admin username must not be empty"));
        }

        let policy = match args.policy {
            PolicyKind::Turns => {
                if args.max_turns == 0 {
                    return Err(ConfigError::Invalid("max turns must be at least 1"));
                }
                if args.refill_ms == 0 {
                    return Err(ConfigError::Invalid("refill interval must be at least 1ms"));
                }
                RatePolicy::TurnRefill {
                    max_turns: args.max_turns,
                    refill_ms: args.refill_ms,
                }
            }
            PolicyKind::Cooldown => RatePolicy::Cooldown {
                cooldown_ms: args.cooldown_ms,
            },
        };

        Ok(Self {
            bind_addr: format!("{}:{}", args.host, args.port),
            grid_size: args.grid_size,
            policy,
            admin_username: args.admin_username,
            admin_password: args.admin_password.filter(|p| !p.is_empty()),
            max_clients: args.max_clients,
            client_timeout: Duration::from_secs(args.client_timeout_secs),
        })
    }
}
