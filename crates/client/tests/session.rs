use std::sync::Arc;
use std::time::Duration;

use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use towerlink::{
    AccountInfo, FloorInfo, G2Id, LoginResponse, NotificationBody, ObjectList, Packet,
    PacketCodec, PacketHeader, PlayerActiveObjInfo, RequestBody, RequestCmd, ResponseBody,
    ServiceInfo, Tile, TileCell, TilePos, ViewportTiles, Way9,
};
use towerlink_client::net::{read_frame, write_frame};
use towerlink_client::{
    ClientConfig, ClientError, RenderSink, SessionConnection, SessionState, TowerClient, World,
    WorldSnapshot,
};

const FLOOR: G2Id = G2Id(7);

/// Scripted tower on the far end of an in-memory pipe. Heartbeats are
/// answered automatically so tests only see the requests they care about.
struct FakeServer {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    codec: PacketCodec,
}

impl FakeServer {
    fn new() -> (Self, DuplexStream) {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = split(server);
        (
            Self {
                reader,
                writer,
                codec: PacketCodec::default(),
            },
            client,
        )
    }

    /// Next request of any kind, heartbeats included.
    async fn next_frame(&mut self) -> Option<(PacketHeader, RequestBody)> {
        let frame = read_frame(&mut self.reader).await.ok()??;
        let packet = self.codec.decode(&frame).ok()?;
        let body = RequestBody::decode(&packet.header, &packet.body).ok()?;
        Some((packet.header, body))
    }

    async fn next_request(&mut self) -> Option<(PacketHeader, RequestBody)> {
        loop {
            let (header, body) = self.next_frame().await?;
            if let RequestBody::Heartbeat { client_time_ns } = body {
                let reply = ResponseBody::Heartbeat {
                    client_time_ns,
                    server_time_ns: client_time_ns + 1_000,
                };
                self.respond(RequestCmd::Heartbeat, header.pid, reply).await;
                continue;
            }
            return Some((header, body));
        }
    }

    async fn respond(&mut self, cmd: RequestCmd, pid: u32, body: ResponseBody) {
        let packet = body.into_packet(cmd, pid).unwrap();
        self.send(&packet).await;
    }

    async fn notify(&mut self, body: NotificationBody) {
        let packet = body.into_packet().unwrap();
        self.send(&packet).await;
    }

    async fn send(&mut self, packet: &Packet) {
        let data = self.codec.encode(packet).unwrap();
        self.send_raw(&data).await;
    }

    async fn send_raw(&mut self, data: &[u8]) {
        write_frame(&mut self.writer, data).await.unwrap();
    }

    async fn accept_login(&mut self, data_version: &str) {
        let (header, body) = self.next_request().await.expect("login request");
        assert!(matches!(body, RequestBody::Login { .. }));

        let login = LoginResponse {
            service_info: ServiceInfo {
                service_name: "fake tower".into(),
                protocol_version: towerlink::SERVICE_PROTOCOL_VERSION.into(),
                data_version: data_version.into(),
            },
            account: AccountInfo {
                session_id: "session-1".into(),
                nickname: "tester".into(),
                commands: vec![
                    RequestCmd::Heartbeat as u16,
                    RequestCmd::Move as u16,
                    RequestCmd::Action as u16,
                    RequestCmd::Logout as u16,
                ],
            },
        };
        self.respond(RequestCmd::Login, header.pid, ResponseBody::Login(login))
            .await;
    }

    async fn enter_floor(&mut self) {
        self.notify(NotificationBody::EnterFloor(FloorInfo {
            id: FLOOR,
            name: "first".into(),
            width: 32,
            height: 32,
            turn_per_sec: 2.0,
        }))
        .await;
    }

    async fn object_list(&mut self, floor_id: G2Id, time_ns: i64, hp: i32) {
        self.notify(NotificationBody::ObjectList(ObjectList {
            time_ns,
            floor_id,
            player: Some(PlayerActiveObjInfo {
                id: G2Id(1),
                pos: TilePos::new(3, 3),
                hp,
                hp_max: 100,
                ..Default::default()
            }),
            active_objs: Vec::new(),
            carry_objs: Vec::new(),
            field_objs: Vec::new(),
        }))
        .await;
    }

    async fn viewport(&mut self, time_ns: i64) {
        self.notify(NotificationBody::VpTiles(ViewportTiles {
            time_ns,
            floor_id: FLOOR,
            vp_x: 3,
            vp_y: 3,
            cells: vec![
                TileCell::new(TilePos::new(3, 3), Tile::ROOM),
                TileCell::new(TilePos::new(4, 3), Tile::WALL),
            ],
        }))
        .await;
    }
}

fn test_config() -> ClientConfig {
    ClientConfig {
        nickname: "tester".into(),
        heartbeat_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

async fn connect(config: ClientConfig) -> (SessionConnection, FakeServer) {
    let (mut server, stream) = FakeServer::new();
    let (conn, _) = tokio::join!(
        SessionConnection::connect(stream, config, World::new()),
        server.accept_login(towerlink::DATA_VERSION),
    );
    (conn.unwrap().0, server)
}

fn turn_sink() -> (Arc<dyn RenderSink>, mpsc::UnboundedReceiver<WorldSnapshot>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn RenderSink> = Arc::new(move |snapshot: &WorldSnapshot| {
        let _ = tx.send(snapshot.clone());
    });
    (sink, rx)
}

#[tokio::test]
async fn test_handshake_matching_versions() {
    let (mut server, stream) = FakeServer::new();
    let (result, _) = tokio::join!(
        SessionConnection::connect(stream, test_config(), World::new()),
        server.accept_login(towerlink::DATA_VERSION),
    );

    let (conn, session) = result.unwrap();
    assert_eq!(conn.state(), SessionState::Connected);
    assert_eq!(session.session_id, "session-1");
    assert!(session.version_mismatches.is_empty());
    assert!(!session.is_degraded());
    assert!(session.can_use(RequestCmd::Move));
}

#[tokio::test]
async fn test_data_version_mismatch_still_connects() {
    let (mut server, stream) = FakeServer::new();
    let (result, _) = tokio::join!(
        SessionConnection::connect(stream, test_config(), World::new()),
        server.accept_login("1999.1.1"),
    );

    let (conn, session) = result.unwrap();
    assert_eq!(conn.state(), SessionState::Connected);
    assert_eq!(session.version_mismatches.len(), 1);
    assert_eq!(session.version_mismatches[0].what, "data version");
    assert_eq!(session.version_mismatches[0].server, "1999.1.1");
    assert!(conn.session().unwrap().is_degraded());
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out() {
    let config = ClientConfig {
        request_timeout: Duration::from_secs(2),
        ..test_config()
    };
    let (conn, mut server) = connect(config).await;

    let started = Instant::now();
    let (result, request) = tokio::join!(
        conn.request(RequestBody::Move { dir: Way9::North }),
        server.next_request(),
    );

    assert!(started.elapsed() >= Duration::from_secs(2));
    let (header, _) = request.unwrap();
    match result {
        Err(ClientError::Timeout { pid, timeout }) => {
            assert_eq!(pid, header.pid);
            assert_eq!(timeout, Duration::from_secs(2));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(conn.pending_requests(), 0);
    assert!(conn.is_connected());

    // A late response for the expired pid is dropped.
    server
        .respond(RequestCmd::Move, header.pid, ResponseBody::Ack)
        .await;
    let (result, _) = tokio::join!(
        conn.request(RequestBody::Move { dir: Way9::South }),
        async {
            let (header, _) = server.next_request().await.unwrap();
            server
                .respond(RequestCmd::Move, header.pid, ResponseBody::Ack)
                .await;
        },
    );
    assert_eq!(result.unwrap(), ResponseBody::Ack);
}

#[tokio::test]
async fn test_close_drains_pending_requests() {
    let (conn, mut server) = connect(test_config()).await;

    let waiting = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(RequestBody::Move { dir: Way9::East }).await }
    });
    server.next_request().await.unwrap();
    assert_eq!(conn.pending_requests(), 1);

    conn.close();
    conn.close();

    assert!(matches!(
        waiting.await.unwrap(),
        Err(ClientError::ConnectionClosed)
    ));
    assert_eq!(conn.state(), SessionState::Disconnected);
    assert!(conn.session().is_none());
    assert!(matches!(
        conn.request(RequestBody::Logout).await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn test_server_eof_closes_session() {
    let (conn, server) = connect(test_config()).await;
    drop(server);

    conn.closed().await;
    assert_eq!(conn.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_bad_packets_do_not_kill_session() {
    let (conn, mut server) = connect(test_config()).await;

    server.send_raw(&[0xde, 0xad, 0xbe, 0xef]).await;
    let unknown = Packet::new(PacketHeader::notification(999), vec![1, 2, 3]);
    server.send(&unknown).await;

    let (result, _) = tokio::join!(conn.request(RequestBody::Logout), async {
        let (header, body) = server.next_request().await.unwrap();
        assert_eq!(body, RequestBody::Logout);
        server
            .respond(RequestCmd::Logout, header.pid, ResponseBody::Ack)
            .await;
    });

    assert_eq!(result.unwrap(), ResponseBody::Ack);
    assert!(conn.is_connected());
    assert!(conn.stats().packets_dropped >= 1);
}

#[tokio::test]
async fn test_server_error_response() {
    let (conn, mut server) = connect(test_config()).await;

    let (result, _) = tokio::join!(conn.request(RequestBody::AiPlay { on: true }), async {
        let (header, _) = server.next_request().await.unwrap();
        let reply = ResponseBody::Error {
            code: towerlink::ErrorCode::NotPermitted,
            message: "no ai for you".into(),
        };
        server.respond(RequestCmd::AiPlay, header.pid, reply).await;
    });

    assert!(matches!(
        result,
        Err(ClientError::Server {
            code: towerlink::ErrorCode::NotPermitted,
            ..
        })
    ));
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_rate_limit_per_turn() {
    let (mut server, stream) = FakeServer::new();
    let config = ClientConfig {
        moves_per_turn: 2,
        ..test_config()
    };
    let (sink, _turns) = turn_sink();

    let server_task = tokio::spawn(async move {
        server.accept_login(towerlink::DATA_VERSION).await;
        let mut moves = 0;
        while let Some((header, body)) = server.next_request().await {
            if let RequestBody::Move { .. } = body {
                moves += 1;
            }
            server
                .respond(body.cmd(), header.pid, ResponseBody::Ack)
                .await;
        }
        moves
    });

    let client = TowerClient::start(stream, config, sink).await.unwrap();
    let mut results = Vec::new();
    for _ in 0..3 {
        results.push(client.submit_move(Way9::North).await);
    }

    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(
        results[2],
        Err(ClientError::RateLimited {
            kind: "move",
            limit: 2
        })
    ));

    client.shutdown();
    drop(client);
    assert_eq!(server_task.await.unwrap(), 2);
}

#[tokio::test]
async fn test_turn_completes_in_either_order() {
    let (mut server, stream) = FakeServer::new();
    let (sink, mut turns) = turn_sink();

    let (client, _) = tokio::join!(
        TowerClient::start(stream, test_config(), sink),
        server.accept_login(towerlink::DATA_VERSION),
    );
    let client = client.unwrap();

    server.enter_floor().await;
    server.viewport(100).await;
    server.object_list(FLOOR, 100, 100).await;

    let first = turns.recv().await.unwrap();
    assert_eq!(first.turn, 1);
    assert_eq!(first.player.as_ref().unwrap().hp, 100);
    let floor = first.current_floor().unwrap();
    assert_eq!(floor.tile(TilePos::new(4, 3)), Tile::WALL);

    server.object_list(FLOOR, 200, 90).await;
    server.viewport(200).await;

    let second = turns.recv().await.unwrap();
    assert_eq!(second.turn, 2);
    assert_eq!(second.hp_diff, -10);
    assert_eq!(client.snapshot().turn, 2);
}

#[tokio::test]
async fn test_stale_object_lists_ignored() {
    let (mut server, stream) = FakeServer::new();
    let (sink, mut turns) = turn_sink();

    let (client, _) = tokio::join!(
        TowerClient::start(stream, test_config(), sink),
        server.accept_login(towerlink::DATA_VERSION),
    );
    let client = client.unwrap();

    server.enter_floor().await;
    server.viewport(100).await;
    server.object_list(FLOOR, 100, 100).await;
    assert_eq!(turns.recv().await.unwrap().turn, 1);

    // Older timestamp, then another floor entirely.
    server.object_list(FLOOR, 50, 1).await;
    server.object_list(G2Id(99), 300, 1).await;

    server.viewport(200).await;
    server.object_list(FLOOR, 200, 95).await;

    let snapshot = turns.recv().await.unwrap();
    assert_eq!(snapshot.turn, 2);
    assert_eq!(snapshot.player.as_ref().unwrap().hp, 95);
    assert_eq!(snapshot.hp_diff, -5);
    assert_eq!(snapshot.turn_time_ns, 200);
    assert_eq!(client.snapshot().turn, 2);
}

#[tokio::test]
async fn test_moves_refused_while_dead() {
    let (mut server, stream) = FakeServer::new();
    let (sink, _turns) = turn_sink();

    let (client, _) = tokio::join!(
        TowerClient::start(stream, test_config(), sink),
        server.accept_login(towerlink::DATA_VERSION),
    );
    let client = client.unwrap();

    server.notify(NotificationBody::Death).await;
    // Any round trip guarantees the death notification was applied first.
    let (result, _) = tokio::join!(client.set_ai_play(false), async {
        let (header, _) = server.next_request().await.unwrap();
        server
            .respond(RequestCmd::AiPlay, header.pid, ResponseBody::Ack)
            .await;
    });
    result.unwrap();

    assert!(client.snapshot().waiting_rebirth);
    assert!(matches!(
        client.submit_move(Way9::West).await,
        Err(ClientError::WaitingRebirth)
    ));
}

#[tokio::test]
async fn test_sink_snapshot_matches_its_turn() {
    let (mut server, stream) = FakeServer::new();
    let (sink, mut turns) = turn_sink();

    let (client, _) = tokio::join!(
        TowerClient::start(stream, test_config(), sink),
        server.accept_login(towerlink::DATA_VERSION),
    );
    let client = client.unwrap();

    // A finished turn immediately followed by half of the next one.
    server.enter_floor().await;
    server.viewport(100).await;
    server.object_list(FLOOR, 100, 100).await;
    server.object_list(FLOOR, 200, 10).await;

    let first = turns.recv().await.unwrap();
    assert_eq!(first.turn, 1);
    assert_eq!(first.turn_time_ns, 100);
    assert_eq!(first.player.as_ref().unwrap().hp, 100);
    drop(client);
}

#[tokio::test(start_paused = true)]
async fn test_one_heartbeat_in_flight() {
    let (mut server, stream) = FakeServer::new();
    let config = ClientConfig {
        heartbeat_interval: Duration::from_secs(1),
        ..test_config()
    };
    let (sink, _turns) = turn_sink();

    let (client, _) = tokio::join!(
        TowerClient::start(stream, config, sink),
        server.accept_login(towerlink::DATA_VERSION),
    );
    let client = client.unwrap();

    let (header, body) = server.next_frame().await.unwrap();
    let RequestBody::Heartbeat { client_time_ns } = body else {
        panic!("expected heartbeat, got {:?}", body);
    };

    // Several ticks pass while the first heartbeat is unanswered.
    assert!(
        timeout(Duration::from_millis(4500), server.next_frame())
            .await
            .is_err()
    );
    assert_eq!(client.jitter_stats().heartbeats, 0);

    let offset_ns = 5_000_000;
    let reply = ResponseBody::Heartbeat {
        client_time_ns,
        server_time_ns: client_time_ns + offset_ns,
    };
    server.respond(RequestCmd::Heartbeat, header.pid, reply).await;

    while client.jitter_stats().heartbeats == 0 {
        sleep(Duration::from_millis(10)).await;
    }
    let stats = client.jitter_stats();
    assert_eq!(stats.heartbeats, 1);
    assert!(stats.ping >= Duration::from_millis(4400));

    let expected_skew = offset_ns - stats.ping.as_nanos() as i64 / 2;
    assert!((stats.clock_skew_ns - expected_skew).abs() < 1_000_000);

    // Ticking resumes once the reply is in.
    let (_, body) = server.next_frame().await.unwrap();
    assert!(matches!(body, RequestBody::Heartbeat { .. }));
}
