//! Integration tests for the canvas server, client and protocol
//!
//! These tests run a real server on a loopback UDP port and drive it through
//! the client library, plus engine-level scenarios wired from public parts.

use bincode::{deserialize, serialize};
use client::network::{Client, ClientError};
use server::config::ServerConfig;
use server::network::Server;
use server::rate::RatePolicy;
use shared::{BudgetView, ErrorCode, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const ADMIN_PASSWORD: &str = "root";

fn test_config(policy: RatePolicy) -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        policy,
        admin_password: Some(ADMIN_PASSWORD.to_string()),
        ..ServerConfig::default()
    }
}

fn turns(max_turns: u32) -> RatePolicy {
    RatePolicy::TurnRefill {
        max_turns,
        refill_ms: 600_000,
    }
}

async fn start_server(config: ServerConfig) -> SocketAddr {
    let mut server = Server::new(&config).await.expect("Failed to start server");
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

async fn connected(addr: SocketAddr) -> Client {
    let mut client = Client::new(&addr.to_string(), 128, Duration::from_secs(2))
        .await
        .unwrap();
    client.connect().await.unwrap();
    client
}

async fn registered(addr: SocketAddr, username: &str) -> Client {
    let mut client = connected(addr).await;
    client.register(username, "pw").await.unwrap();
    client
}

async fn admin(addr: SocketAddr) -> Client {
    let mut client = connected(addr).await;
    client.login("admin", ADMIN_PASSWORD).await.unwrap();
    client
}

/// Collects everything `client` receives for `window`
async fn observe(client: &mut Client, window: Duration) -> Vec<Packet> {
    let mut seen = Vec::new();
    let _ = timeout(window, client.watch(|_, packet| seen.push(packet.clone()))).await;
    seen
}

fn rejection(
    result: Result<impl std::fmt::Debug, ClientError>,
) -> (ErrorCode, Option<BudgetView>) {
    match result {
        Err(ClientError::Rejected { code, budget }) => (code, budget),
        other => panic!("Expected rejection, got {:?}", other),
    }
}

/// PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Raw datagrams from an unconnected address are refused
    #[tokio::test]
    async fn unconnected_address_is_told_to_connect() {
        let addr = start_server(test_config(turns(64))).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        socket
            .send_to(&serialize(&Packet::Me).unwrap(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("No reply")
            .unwrap();
        match deserialize::<Packet>(&buf[..len]).unwrap() {
            Packet::Disconnected { reason } => assert_eq!(reason, "Not connected"),
            other => panic!("Wrong packet type received: {:?}", other),
        }
    }

    /// Clients speaking another protocol version are turned away
    #[tokio::test]
    async fn version_mismatch_rejected() {
        let addr = start_server(test_config(turns(64))).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION + 1,
        };
        socket
            .send_to(&serialize(&connect).unwrap(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("No reply")
            .unwrap();
        assert!(matches!(
            deserialize::<Packet>(&buf[..len]).unwrap(),
            Packet::Disconnected { .. }
        ));
    }

    /// Garbage datagrams are dropped without taking the server down
    #[tokio::test]
    async fn malformed_datagram_ignored() {
        let addr = start_server(test_config(turns(64))).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(&[0xFF; 7], addr).await.unwrap();

        let client = connected(addr).await;
        assert!(client.client_id().is_some());
    }
}

/// ACCOUNT TESTS
mod account_tests {
    use super::*;

    #[tokio::test]
    async fn register_login_probe_logout() {
        let addr = start_server(test_config(turns(64))).await;

        let mut alice = registered(addr, "alice").await;
        assert_eq!(alice.probe().await.unwrap(), Some("alice".to_string()));

        alice.logout().await.unwrap();
        assert_eq!(alice.probe().await.unwrap(), None);

        let (code, _) = rejection(alice.login("alice", "wrong").await);
        assert_eq!(code, ErrorCode::InvalidCredentials);

        assert_eq!(alice.login("alice", "pw").await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn duplicate_and_missing_fields() {
        let addr = start_server(test_config(turns(64))).await;
        registered(addr, "bob").await;

        let mut other = connected(addr).await;
        let (code, _) = rejection(other.register("bob", "pw").await);
        assert_eq!(code, ErrorCode::Exists);

        let (code, _) = rejection(other.register("", "pw").await);
        assert_eq!(code, ErrorCode::Missing);
    }

    #[tokio::test]
    async fn me_and_palette() {
        let addr = start_server(test_config(turns(64))).await;
        let mut alice = registered(addr, "alice").await;

        let account = alice.me().await.unwrap();
        assert_eq!(account.username, "alice");
        assert_eq!(account.pixels_placed, 0);
        assert!(matches!(
            account.budget,
            Some(BudgetView::Turns {
                turns_remaining: 64,
                last_turn_refill: None,
                ..
            })
        ));

        for color in ["#111111", "#222222", "#111111"] {
            alice.save_color(color).await.unwrap();
        }
        assert_eq!(alice.custom_colors, vec!["#111111", "#222222"]);

        let (code, _) = rejection(alice.save_color("red").await);
        assert_eq!(code, ErrorCode::InvalidColor);
    }
}

/// PLACEMENT TESTS
mod placement_tests {
    use super::*;

    /// A places red, then B places green on the same cell: every observer
    /// sees both updates in commit order and the canvas ends green
    #[tokio::test]
    async fn same_cell_commit_order_end_to_end() {
        let addr = start_server(test_config(turns(64))).await;
        let mut watcher = connected(addr).await;
        watcher.sync_canvas().await.unwrap();

        let mut a = registered(addr, "a").await;
        let mut b = registered(addr, "b").await;
        a.place(7.0, 7.0, "#ff0000").await.unwrap();
        b.place(7.0, 7.0, "#00FF00").await.unwrap();

        let updates: Vec<(String, String)> = observe(&mut watcher, Duration::from_millis(300))
            .await
            .into_iter()
            .filter_map(|p| match p {
                Packet::PixelUpdate { color, user, .. } => Some((color, user)),
                _ => None,
            })
            .collect();
        assert_eq!(
            updates,
            vec![
                ("#FF0000".to_string(), "a".to_string()),
                ("#00FF00".to_string(), "b".to_string())
            ]
        );
        assert_eq!(watcher.canvas.get(7, 7).unwrap().color, "#00FF00");

        let mut late = connected(addr).await;
        late.sync_canvas().await.unwrap();
        assert_eq!(late.canvas.get(7, 7).unwrap().color, "#00FF00");
        assert_eq!(late.canvas.painted(), 1);
    }

    #[tokio::test]
    async fn invalid_requests_rejected_without_effect() {
        let addr = start_server(test_config(turns(64))).await;

        let mut anonymous = connected(addr).await;
        let (code, _) = rejection(anonymous.place(0.0, 0.0, "#FFFFFF").await);
        assert_eq!(code, ErrorCode::NotAuth);

        let mut alice = registered(addr, "alice").await;
        let (code, _) = rejection(alice.place(-1.0, 0.0, "#FFFFFF").await);
        assert_eq!(code, ErrorCode::OutOfBounds);

        let (code, _) = rejection(alice.place(0.5, 0.0, "#FFFFFF").await);
        assert_eq!(code, ErrorCode::InvalidCoords);

        let (code, _) = rejection(alice.place(0.0, 0.0, "red").await);
        assert_eq!(code, ErrorCode::InvalidColor);

        assert_eq!(alice.me().await.unwrap().pixels_placed, 0);
        let mut viewer = connected(addr).await;
        viewer.sync_canvas().await.unwrap();
        assert_eq!(viewer.canvas.painted(), 0);
    }

    #[tokio::test]
    async fn turn_exhaustion_reports_budget() {
        let addr = start_server(test_config(turns(2))).await;
        let mut alice = registered(addr, "alice").await;

        alice.place(0.0, 0.0, "#000001").await.unwrap();
        alice.place(1.0, 0.0, "#000002").await.unwrap();

        let (code, budget) = rejection(alice.place(2.0, 0.0, "#000003").await);
        assert_eq!(code, ErrorCode::NoTurns);
        match budget {
            Some(BudgetView::Turns {
                turns_remaining: 0,
                last_turn_refill: Some(_),
                max_turns: 2,
                ..
            }) => {}
            other => panic!("Expected exhausted turns snapshot, got {:?}", other),
        }

        let mut viewer = connected(addr).await;
        viewer.sync_canvas().await.unwrap();
        assert_eq!(viewer.canvas.painted(), 2);
        assert!(viewer.canvas.get(2, 0).is_none());
    }

    #[tokio::test]
    async fn cooldown_policy_end_to_end() {
        let addr = start_server(test_config(RatePolicy::Cooldown {
            cooldown_ms: 60_000,
        }))
        .await;
        let mut alice = registered(addr, "alice").await;

        alice.place(3.0, 3.0, "#ABCDEF").await.unwrap();
        let (code, budget) = rejection(alice.place(4.0, 3.0, "#ABCDEF").await);
        assert_eq!(code, ErrorCode::Cooldown);
        match budget {
            Some(BudgetView::Cooldown { left_ms }) => assert!(left_ms > 0 && left_ms <= 60_000),
            other => panic!("Expected cooldown metadata, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn admin_bypasses_rate_limit_and_syncs_in_chunks() {
        let addr = start_server(test_config(turns(1))).await;
        let mut root = admin(addr).await;

        for i in 0..70u16 {
            root.place(f64::from(i % 128), f64::from(i / 128), "#C0FFEE")
                .await
                .unwrap();
        }
        assert_eq!(root.me().await.unwrap().budget, None);

        let mut viewer = connected(addr).await;
        viewer.sync_canvas().await.unwrap();
        assert_eq!(viewer.canvas.painted(), 70);
    }

    #[tokio::test]
    async fn purge_is_admin_only() {
        let addr = start_server(test_config(turns(64))).await;
        let mut alice = registered(addr, "alice").await;
        alice.place(9.0, 9.0, "#123456").await.unwrap();

        let (code, _) = rejection(alice.purge().await);
        assert_eq!(code, ErrorCode::NotAuth);

        let mut root = admin(addr).await;
        root.purge().await.unwrap();

        let (code, _) = rejection(alice.me().await);
        assert_eq!(code, ErrorCode::NotAuth);

        let mut viewer = connected(addr).await;
        viewer.sync_canvas().await.unwrap();
        assert_eq!(viewer.canvas.painted(), 0);
    }
}

/// ENGINE TESTS
mod engine_tests {
    use client::canvas::CanvasMirror;
    use server::accounts::{MemoryAccountStore, UserAccount};
    use server::clock::ManualClock;
    use server::coordinator::{Coordinator, PlacementRequest};
    use server::error::{PlaceError, StoreError};
    use server::fanout::{Fanout, FanoutMessage};
    use server::grid::{GridStore, MemoryGridStore};
    use server::identity::{Connection, IdentityService, SessionDirectory};
    use server::rate::{RateLimiter, RatePolicy};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    const T: u64 = 1_700_000_000_000;

    /// Holds one user's first account save until released, so that user's
    /// placement commits after a placement that started later
    struct StalledSaves {
        inner: SessionDirectory,
        stalled_user: String,
        stalled: AtomicBool,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl IdentityService for StalledSaves {
        fn resolve_current_user(&self, connection: &Connection) -> Option<String> {
            self.inner.resolve_current_user(connection)
        }

        fn load_account(&self, username: &str) -> Result<Option<UserAccount>, StoreError> {
            self.inner.load_account(username)
        }

        fn save_account(&self, account: &UserAccount) -> Result<(), StoreError> {
            if account.username == self.stalled_user && !self.stalled.swap(true, Ordering::SeqCst)
            {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.inner.save_account(account)
        }

        fn remove_all(&self) -> Result<usize, StoreError> {
            self.inner.remove_all()
        }
    }

    /// Alice reads the clock first but commits last: the observer's mirror
    /// and the store must both end on her color
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delayed_committer_keeps_mirror_consistent() {
        let policy = RatePolicy::TurnRefill {
            max_turns: 64,
            refill_ms: 10_000,
        };
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let identity = Arc::new(StalledSaves {
            inner: SessionDirectory::new(Arc::new(MemoryAccountStore::new()), policy),
            stalled_user: "alice".to_string(),
            stalled: AtomicBool::new(false),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let grid = Arc::new(MemoryGridStore::new());
        let clock = Arc::new(ManualClock::new(T));
        let (fanout, mut rx) = Fanout::channel();
        let coordinator = Arc::new(Coordinator::new(
            grid.clone(),
            identity.clone(),
            RateLimiter::new(policy, "admin"),
            clock.clone(),
            fanout,
            128,
        ));

        let alice = Connection {
            client_id: 1,
            addr: "127.0.0.1:5001".parse().unwrap(),
        };
        let bob = Connection {
            client_id: 2,
            addr: "127.0.0.1:5002".parse().unwrap(),
        };
        identity.inner.register(&alice, "alice", "pw").unwrap();
        identity.inner.register(&bob, "bob", "pw").unwrap();
        let request = |color: &str| PlacementRequest {
            x: 0.0,
            y: 0.0,
            color: color.to_string(),
        };

        let alice_task = {
            let coordinator = Arc::clone(&coordinator);
            let red = request("#FF0000");
            tokio::spawn(async move { coordinator.place(&alice, &red).await })
        };
        tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .expect("alice never reached her account save");

        clock.set(T + 100);
        coordinator.place(&bob, &request("#00FF00")).await.unwrap();

        release_tx.send(()).unwrap();
        alice_task.await.unwrap().unwrap();

        let mut mirror = CanvasMirror::new(128);
        let mut stamps = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let FanoutMessage::BroadcastPacket { packet } = message {
                if let shared::Packet::PixelUpdate { updated_at, .. } = &packet {
                    stamps.push(*updated_at);
                }
                mirror.apply(&packet);
            }
        }

        let stored = grid.get(0, 0).unwrap().unwrap();
        assert_eq!(stored.color, "#FF0000");
        assert_eq!(stamps.len(), 2);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(stored.updated_at, *stamps.last().unwrap());
        assert_eq!(mirror.get(0, 0).unwrap().color, stored.color);
    }

    /// Exhaust, wait out part of an interval, and confirm the remainder
    /// carries over into the next turn
    #[tokio::test]
    async fn refill_remainder_survives_placements() {
        let policy = RatePolicy::TurnRefill {
            max_turns: 1,
            refill_ms: 10_000,
        };
        let identity = Arc::new(SessionDirectory::new(
            Arc::new(MemoryAccountStore::new()),
            policy,
        ));
        let grid = Arc::new(MemoryGridStore::new());
        let clock = Arc::new(ManualClock::new(T));
        let (fanout, _rx) = Fanout::channel();
        let coordinator = Coordinator::new(
            grid.clone(),
            identity.clone(),
            RateLimiter::new(policy, "admin"),
            clock.clone(),
            fanout,
            128,
        );

        let conn = Connection {
            client_id: 1,
            addr: "127.0.0.1:5000".parse().unwrap(),
        };
        identity.register(&conn, "alice", "pw").unwrap();
        let request = |x: f64| PlacementRequest {
            x,
            y: 0.0,
            color: "#FFFFFF".to_string(),
        };

        coordinator.place(&conn, &request(0.0)).await.unwrap();
        assert!(matches!(
            coordinator.place(&conn, &request(1.0)).await,
            Err(PlaceError::NoTurns(_))
        ));

        clock.set(T + 9_999);
        assert!(coordinator.place(&conn, &request(1.0)).await.is_err());

        clock.set(T + 10_000);
        coordinator.place(&conn, &request(1.0)).await.unwrap();
        assert_eq!(grid.cell_count().unwrap(), 2);
    }
}
