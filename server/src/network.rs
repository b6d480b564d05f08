//! Server network layer: UDP transport, request dispatch and fanout delivery

use crate::accounts::MemoryAccountStore;
use crate::client_manager::ClientManager;
use crate::clock::SystemClock;
use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, PlacementRequest};
use crate::error::{AuthError, PlaceError};
use crate::fanout::{Fanout, FanoutMessage};
use crate::grid::MemoryGridStore;
use crate::identity::{Connection, IdentityService, SessionDirectory};
use crate::rate::RateLimiter;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, Pixel, MAX_DATAGRAM, PIXELS_PER_CHUNK, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
}

/// Splits the full canvas into datagram-sized `Pixels` packets.
///
/// An empty canvas still yields one empty chunk so the receiver knows the
/// sync is complete.
pub fn chunk_pixels(pixels: Vec<Pixel>) -> Vec<Packet> {
    if pixels.is_empty() {
        return vec![Packet::Pixels {
            chunk: 0,
            total_chunks: 1,
            pixels,
        }];
    }

    let total_chunks = pixels.len().div_ceil(PIXELS_PER_CHUNK) as u32;
    pixels
        .chunks(PIXELS_PER_CHUNK)
        .enumerate()
        .map(|(chunk, slice)| Packet::Pixels {
            chunk: chunk as u32,
            total_chunks,
            pixels: slice.to_vec(),
        })
        .collect()
}

/// Canvas server tying the UDP socket to the placement engine
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    identity: Arc<SessionDirectory>,
    coordinator: Arc<Coordinator>,
    fanout: Fanout,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    fanout_rx: Option<mpsc::UnboundedReceiver<FanoutMessage>>,
}

impl Server {
    pub async fn new(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let identity = Arc::new(SessionDirectory::new(
            Arc::new(MemoryAccountStore::new()),
            config.policy,
        ));
        if let Some(password) = &config.admin_password {
            if identity.seed(&config.admin_username, password)? {
                info!("Created admin account {}", config.admin_username);
            }
        }

        let (fanout, fanout_rx) = Fanout::channel();
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(MemoryGridStore::new()),
            identity.clone(),
            RateLimiter::new(config.policy, config.admin_username.clone()),
            Arc::new(SystemClock),
            fanout.clone(),
            config.grid_size,
        ));

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            identity,
            coordinator,
            fanout,
            server_tx,
            server_rx,
            fanout_rx: Some(fanout_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the single task that drains the fanout queue onto the socket
    fn spawn_network_sender(&mut self) {
        let Some(mut fanout_rx) = self.fanout_rx.take() else {
            warn!("Network sender already running");
            return;
        };
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            while let Some(message) = fanout_rx.recv().await {
                match message {
                    FanoutMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    FanoutMessage::BroadcastPacket { packet } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts and drops idle engine locks
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let coordinator = Arc::clone(&self.coordinator);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;
                coordinator.prune_locks();

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Resolves the sender to a connected client, refreshing its activity
    async fn connection_for(&self, addr: SocketAddr) -> Option<Connection> {
        let mut clients = self.clients.write().await;
        let client_id = clients.find_client_by_addr(addr)?;
        clients.touch(client_id);
        Some(Connection { client_id, addr })
    }

    async fn handle_connect(&self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.fanout.send(
                addr,
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
            );
            return;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };

        let response = match client_id {
            Some(client_id) => Packet::Connected { client_id },
            None => Packet::Disconnected {
                reason: "Server full".to_string(),
            },
        };
        self.fanout.send(addr, response);
    }

    /// Processes one inbound packet. Engine work runs in its own task.
    async fn handle_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            self.handle_connect(client_version, addr).await;
            return;
        }

        let Some(connection) = self.connection_for(addr).await else {
            debug!("Packet from unconnected address {}", addr);
            self.fanout.send(
                addr,
                Packet::Disconnected {
                    reason: "Not connected".to_string(),
                },
            );
            return;
        };

        match packet {
            Packet::Heartbeat => {}

            Packet::Disconnect => {
                let mut clients = self.clients.write().await;
                clients.remove_client(&connection.client_id);
                self.identity.drop_connection(connection.client_id);
            }

            Packet::Register { username, password } => {
                let result = self.identity.register(&connection, &username, &password);
                self.reply_auth(&connection, result.map(|account| account.username));
            }

            Packet::Login { username, password } => {
                let result = self.identity.login(&connection, &username, &password);
                self.reply_auth(&connection, result.map(|account| account.username));
            }

            Packet::Logout => {
                self.identity.logout(&connection);
                self.fanout.send(
                    addr,
                    Packet::AuthStatus {
                        authenticated: false,
                        username: None,
                    },
                );
            }

            Packet::AuthProbe => {
                let username = self.identity.resolve_current_user(&connection);
                self.fanout.send(
                    addr,
                    Packet::AuthStatus {
                        authenticated: username.is_some(),
                        username,
                    },
                );
            }

            Packet::PlacePixel { x, y, color } => {
                let coordinator = Arc::clone(&self.coordinator);
                tokio::spawn(async move {
                    coordinator
                        .handle_place(&connection, PlacementRequest { x, y, color })
                        .await;
                });
            }

            Packet::SaveColor { color } => {
                let coordinator = Arc::clone(&self.coordinator);
                let fanout = self.fanout.clone();
                tokio::spawn(async move {
                    let reply = match coordinator.save_color(&connection, &color).await {
                        Ok(colors) => Packet::CustomColors { colors },
                        Err(e) => error_packet(&e),
                    };
                    fanout.send(connection.addr, reply);
                });
            }

            Packet::Me => {
                let coordinator = Arc::clone(&self.coordinator);
                let fanout = self.fanout.clone();
                tokio::spawn(async move {
                    let reply = match coordinator.me(&connection).await {
                        Ok(view) => Packet::Account(view),
                        Err(e) => error_packet(&e),
                    };
                    fanout.send(connection.addr, reply);
                });
            }

            Packet::FetchPixels => {
                let coordinator = Arc::clone(&self.coordinator);
                let fanout = self.fanout.clone();
                tokio::spawn(async move {
                    match coordinator.snapshot() {
                        Ok(pixels) => {
                            for packet in chunk_pixels(pixels) {
                                fanout.send(connection.addr, packet);
                            }
                        }
                        Err(e) => {
                            error!("Failed to read canvas: {}", e);
                            fanout.send(connection.addr, error_packet(&PlaceError::from(e)));
                        }
                    }
                });
            }

            Packet::Purge => {
                let coordinator = Arc::clone(&self.coordinator);
                let fanout = self.fanout.clone();
                tokio::spawn(async move {
                    if let Err(e) = coordinator.purge(&connection).await {
                        fanout.send(connection.addr, error_packet(&e));
                    }
                });
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    fn reply_auth(&self, connection: &Connection, result: Result<String, AuthError>) {
        let reply = match result {
            Ok(username) => Packet::AuthStatus {
                authenticated: true,
                username: Some(username),
            },
            Err(e) => {
                if let AuthError::Store(store) = &e {
                    error!("Account store failure: {}", store);
                }
                Packet::Error {
                    code: e.code(),
                    budget: None,
                }
            }
        };
        self.fanout.send(connection.addr, reply);
    }

    /// Main server loop dispatching network events
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::ClientTimeout { client_id } => {
                    if self.identity.drop_connection(client_id) {
                        info!("Ended session of timed out client {}", client_id);
                    }
                }
            }
        }

        info!("Server shutting down");
        Ok(())
    }
}

fn error_packet(e: &PlaceError) -> Packet {
    Packet::Error {
        code: e.code(),
        budget: e.budget(),
    }
}
