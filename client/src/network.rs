use crate::budget::BudgetTracker;
use crate::canvas::CanvasMirror;
use bincode::{deserialize, serialize};
use log::{debug, info, warn};
use shared::{
    now_millis, AccountView, BudgetView, ErrorCode, Packet, MAX_DATAGRAM, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout_at, Instant};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid server address: {0}")]
    Address(#[from] std::net::AddrParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Malformed packet: {0}")]
    Codec(#[from] bincode::Error),

    #[error("No reply from server within {0:?}")]
    Timeout(Duration),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Server rejected request: {code}")]
    Rejected {
        code: ErrorCode,
        budget: Option<BudgetView>,
    },
}

/// Headless canvas client over UDP
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    client_id: Option<u32>,
    username: Option<String>,
    reply_timeout: Duration,

    pub canvas: CanvasMirror,
    pub budget: Option<BudgetTracker>,
    pub custom_colors: Vec<String>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        grid_size: u16,
        reply_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            client_id: None,
            username: None,
            reply_timeout,
            canvas: CanvasMirror::new(grid_size),
            budget: None,
            custom_colors: Vec::new(),
        })
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Waits for the next datagram from the server until `deadline`
    async fn recv_packet(&self, deadline: Instant) -> Result<Packet, ClientError> {
        let mut buffer = [0u8; MAX_DATAGRAM];
        loop {
            let (len, addr) = timeout_at(deadline, self.socket.recv_from(&mut buffer))
                .await
                .map_err(|_| ClientError::Timeout(self.reply_timeout))??;
            if addr != self.server_addr {
                debug!("Ignoring datagram from {}", addr);
                continue;
            }
            return Ok(deserialize::<Packet>(&buffer[0..len])?);
        }
    }

    /// Folds a server packet into local state
    pub fn handle_packet(&mut self, packet: &Packet) {
        if self.canvas.apply(packet) {
            return;
        }

        match packet {
            Packet::Connected { client_id } => {
                info!("Connected! Client ID: {}", client_id);
                self.client_id = Some(*client_id);
            }
            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.client_id = None;
                self.username = None;
            }
            Packet::AuthStatus { username, .. } => {
                self.username = username.clone();
            }
            Packet::Account(view) => {
                self.username = Some(view.username.clone());
                self.custom_colors = view.custom_colors.clone();
                self.budget = view.budget.map(|b| BudgetTracker::new(b, now_millis()));
            }
            Packet::TurnsUpdate {
                turns_remaining,
                last_turn_refill,
                max_turns,
                refill_ms,
            } => {
                self.budget = Some(BudgetTracker::new(
                    BudgetView::Turns {
                        turns_remaining: *turns_remaining,
                        last_turn_refill: *last_turn_refill,
                        max_turns: *max_turns,
                        refill_ms: *refill_ms,
                    },
                    now_millis(),
                ));
            }
            Packet::Cooldown { left_ms } => {
                self.budget = Some(BudgetTracker::new(
                    BudgetView::Cooldown { left_ms: *left_ms },
                    now_millis(),
                ));
            }
            Packet::CustomColors { colors } => {
                self.custom_colors = colors.clone();
            }
            Packet::Error {
                budget: Some(budget),
                ..
            } => {
                self.budget = Some(BudgetTracker::new(*budget, now_millis()));
            }
            _ => {}
        }
    }

    /// Receives and applies packets until `done` accepts one, which is
    /// returned. Server errors and disconnects end the wait early.
    async fn await_reply<F>(&mut self, mut done: F) -> Result<Packet, ClientError>
    where
        F: FnMut(&Packet) -> bool,
    {
        let deadline = Instant::now() + self.reply_timeout;
        loop {
            let packet = self.recv_packet(deadline).await?;
            self.handle_packet(&packet);

            if done(&packet) {
                return Ok(packet);
            }
            match packet {
                Packet::Error { code, budget } => {
                    return Err(ClientError::Rejected { code, budget });
                }
                Packet::Disconnected { reason } => return Err(ClientError::Disconnected(reason)),
                _ => {}
            }
        }
    }

    pub async fn connect(&mut self) -> Result<u32, ClientError> {
        info!("Connecting to {}...", self.server_addr);
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await?;

        match self.await_reply(|p| matches!(p, Packet::Connected { .. })).await? {
            Packet::Connected { client_id } => Ok(client_id),
            other => Err(ClientError::Disconnected(format!(
                "unexpected reply {:?}",
                other
            ))),
        }
    }

    async fn authenticate(&mut self, packet: Packet) -> Result<String, ClientError> {
        self.send_packet(&packet).await?;
        self.await_reply(|p| matches!(p, Packet::AuthStatus { .. })).await?;
        self.username.clone().ok_or_else(|| ClientError::Rejected {
            code: ErrorCode::NotAuth,
            budget: None,
        })
    }

    pub async fn register(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<String, ClientError> {
        self.authenticate(Packet::Register {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, ClientError> {
        self.authenticate(Packet::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    pub async fn logout(&mut self) -> Result<(), ClientError> {
        self.send_packet(&Packet::Logout).await?;
        self.await_reply(|p| matches!(p, Packet::AuthStatus { .. })).await?;
        Ok(())
    }

    /// Asks the server which user this connection is bound to
    pub async fn probe(&mut self) -> Result<Option<String>, ClientError> {
        self.send_packet(&Packet::AuthProbe).await?;
        self.await_reply(|p| matches!(p, Packet::AuthStatus { .. })).await?;
        Ok(self.username.clone())
    }

    pub async fn me(&mut self) -> Result<AccountView, ClientError> {
        self.send_packet(&Packet::Me).await?;
        match self.await_reply(|p| matches!(p, Packet::Account(_))).await? {
            Packet::Account(view) => Ok(view),
            other => Err(ClientError::Disconnected(format!(
                "unexpected reply {:?}",
                other
            ))),
        }
    }

    /// Places a pixel and waits to see it confirmed by the broadcast
    pub async fn place(&mut self, x: f64, y: f64, color: &str) -> Result<(), ClientError> {
        self.send_packet(&Packet::PlacePixel {
            x,
            y,
            color: color.to_string(),
        })
        .await?;

        let me = self.username.clone();
        self.await_reply(|p| match p {
            Packet::PixelUpdate {
                x: px,
                y: py,
                user,
                ..
            } => f64::from(*px) == x && f64::from(*py) == y && Some(user) == me.as_ref(),
            _ => false,
        })
        .await?;
        Ok(())
    }

    pub async fn save_color(&mut self, color: &str) -> Result<Vec<String>, ClientError> {
        self.send_packet(&Packet::SaveColor {
            color: color.to_string(),
        })
        .await?;
        self.await_reply(|p| matches!(p, Packet::CustomColors { .. })).await?;
        Ok(self.custom_colors.clone())
    }

    /// Downloads the full canvas into the local mirror
    pub async fn sync_canvas(&mut self) -> Result<(), ClientError> {
        self.canvas.begin_sync();
        self.send_packet(&Packet::FetchPixels).await?;

        let deadline = Instant::now() + self.reply_timeout;
        while !self.canvas.is_synced() {
            let packet = self.recv_packet(deadline).await?;
            self.handle_packet(&packet);
        }
        info!("Canvas synced: {} painted cells", self.canvas.painted());
        Ok(())
    }

    pub async fn purge(&mut self) -> Result<(), ClientError> {
        self.send_packet(&Packet::Purge).await?;
        self.await_reply(|p| matches!(p, Packet::Purged)).await?;
        Ok(())
    }

    /// Follows live updates, keeping the connection alive with heartbeats.
    /// Every applied packet is passed to `on_packet`.
    pub async fn watch<F>(&mut self, mut on_packet: F) -> Result<(), ClientError>
    where
        F: FnMut(&Client, &Packet),
    {
        let mut heartbeat = interval(Duration::from_secs(1));
        let mut buffer = [0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    let (len, _) = result?;
                    match deserialize::<Packet>(&buffer[0..len]) {
                        Ok(packet) => {
                            self.handle_packet(&packet);
                            on_packet(self, &packet);
                            if let Packet::Disconnected { reason } = packet {
                                return Err(ClientError::Disconnected(reason));
                            }
                        }
                        Err(e) => warn!("Failed to decode packet: {}", e),
                    }
                },

                _ = heartbeat.tick() => {
                    self.send_packet(&Packet::Heartbeat).await?;
                },
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.client_id.take().is_some() {
            self.send_packet(&Packet::Disconnect).await?;
        }
        Ok(())
    }
}
