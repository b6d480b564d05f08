use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PROTOCOL_VERSION: u32 = 1;
pub const GRID_SIZE: u16 = 128;
pub const MAX_TURNS: u32 = 64;
pub const TURN_REFILL_MS: u64 = 10_000;
pub const DEFAULT_COOLDOWN_MS: u64 = 5_000;
pub const MAX_CUSTOM_COLORS: usize = 6;
pub const ADMIN_USERNAME: &str = "admin";

/// Pixels carried by one `Packet::Pixels` datagram.
pub const PIXELS_PER_CHUNK: usize = 32;

/// Receive buffer size used by both ends of the connection.
pub const MAX_DATAGRAM: usize = 2048;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Heartbeat,
    Disconnect,
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Logout,
    AuthProbe,
    PlacePixel {
        x: f64,
        y: f64,
        color: String,
    },
    SaveColor {
        color: String,
    },
    Me,
    FetchPixels,
    Purge,

    Connected {
        client_id: u32,
    },
    Disconnected {
        reason: String,
    },
    AuthStatus {
        authenticated: bool,
        username: Option<String>,
    },
    Account(AccountView),
    PixelUpdate {
        x: u16,
        y: u16,
        color: String,
        user: String,
        updated_at: u64,
    },
    TurnsUpdate {
        turns_remaining: u32,
        last_turn_refill: Option<u64>,
        max_turns: u32,
        refill_ms: u64,
    },
    Cooldown {
        left_ms: u64,
    },
    CustomColors {
        colors: Vec<String>,
    },
    Pixels {
        chunk: u32,
        total_chunks: u32,
        pixels: Vec<Pixel>,
    },
    Purged,
    Error {
        code: ErrorCode,
        budget: Option<BudgetView>,
    },
}

/// One painted cell as sent to clients for initial sync.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Pixel {
    pub x: u16,
    pub y: u16,
    pub color: String,
    pub updated_at: u64,
}

/// A user's remaining placement budget as seen by that user.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum BudgetView {
    Turns {
        turns_remaining: u32,
        last_turn_refill: Option<u64>,
        max_turns: u32,
        refill_ms: u64,
    },
    Cooldown {
        left_ms: u64,
    },
}

impl BudgetView {
    /// Wraps the view in the packet the requesting connection receives
    pub fn into_packet(self) -> Packet {
        match self {
            BudgetView::Turns {
                turns_remaining,
                last_turn_refill,
                max_turns,
                refill_ms,
            } => Packet::TurnsUpdate {
                turns_remaining,
                last_turn_refill,
                max_turns,
                refill_ms,
            },
            BudgetView::Cooldown { left_ms } => Packet::Cooldown { left_ms },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccountView {
    pub username: String,
    pub pixels_placed: u64,
    /// `None` for the rate-exempt admin account
    pub budget: Option<BudgetView>,
    pub custom_colors: Vec<String>,
}

/// Reason codes reported to the requesting connection only.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotAuth,
    InvalidCoords,
    OutOfBounds,
    InvalidColor,
    UserNotFound,
    NoTurns,
    Cooldown,
    Server,
    Missing,
    Exists,
    InvalidCredentials,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotAuth => "not-auth",
            ErrorCode::InvalidCoords => "invalid-coords",
            ErrorCode::OutOfBounds => "out-of-bounds",
            ErrorCode::InvalidColor => "invalid-color",
            ErrorCode::UserNotFound => "user-not-found",
            ErrorCode::NoTurns => "no-turns",
            ErrorCode::Cooldown => "cooldown",
            ErrorCode::Server => "server",
            ErrorCode::Missing => "missing",
            ErrorCode::Exists => "exists",
            ErrorCode::InvalidCredentials => "invalid",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a `#RRGGBB` color and returns it uppercased.
pub fn normalize_color(color: &str) -> Option<String> {
    let digits = color.strip_prefix('#')?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(color.to_ascii_uppercase())
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Grants whole refill intervals elapsed since the anchor.
///
/// The anchor advances by exactly the granted intervals so partial progress
/// toward the next turn carries over. Reaching `max_turns` clears it.
pub fn refill_turns(
    turns_remaining: u32,
    last_turn_refill: Option<u64>,
    now: u64,
    max_turns: u32,
    refill_ms: u64,
) -> (u32, Option<u64>) {
    let anchor = match last_turn_refill {
        Some(anchor) if turns_remaining < max_turns && refill_ms > 0 => anchor,
        _ => return (turns_remaining, last_turn_refill),
    };

    let whole_intervals = now.saturating_sub(anchor) / refill_ms;
    if whole_intervals == 0 {
        return (turns_remaining, last_turn_refill);
    }

    let granted = whole_intervals.min(u64::from(max_turns - turns_remaining)) as u32;
    let turns = turns_remaining + granted;
    if turns >= max_turns {
        (max_turns, None)
    } else {
        (turns, Some(anchor + whole_intervals * refill_ms))
    }
}
