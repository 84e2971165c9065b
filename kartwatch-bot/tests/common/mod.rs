#![allow(dead_code)]

use kartwatch_bot::packet::{AskPacket, PlayerInfoPacket};
use kartwatch_bot::{
    GameSpeed, Packet, PlayerInfo, RefuseReason, Remote, ServerFlags, ServerInfo,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Helper to build the server info a fake server reports
pub fn server_info(name: &str, players: u8) -> ServerInfo {
    ServerInfo {
        application: "RingRacers".to_string(),
        version: 2,
        subversion: 3,
        commit: [0xde, 0xad, 0xbe, 0xef],
        gametype_name: "Race".to_string(),
        server_name: name.to_string(),
        number_of_players: players,
        max_players: 16,
        modified_game: false,
        cheats_enabled: false,
        avg_mobiums: 5000,
        game_speed: GameSpeed::Normal,
        flags: ServerFlags::DEDICATED,
        refuse_reason: RefuseReason::Ok,
        time: 35 * 600,
        level_time: 35 * 90,
        map_title: "Sunbeam Paradise".to_string(),
        map_md5: [0xab; 16],
        actnum: 1,
        is_zone: true,
        number_of_files: 0,
        http_source: String::new(),
    }
}

pub fn player(num: u8, name: &str) -> PlayerInfo {
    PlayerInfo {
        num,
        name: name.to_string(),
        team: 0,
        score: 10 * u32::from(num),
        time_in_server: 120,
    }
}

/// Encoded server-info reply
pub fn info_datagram(name: &str, players: u8) -> Vec<u8> {
    Packet::ServerInfo(Box::new(server_info(name, players))).encode()
}

/// Encoded player-info reply for the given slots, padded with empty slots
pub fn roster_datagram(players: &[PlayerInfo]) -> Vec<u8> {
    Packet::PlayerInfo(PlayerInfoPacket::new(players.to_vec())).encode()
}

/// An ask echoed back, which is not an answer
pub fn ask_datagram() -> Vec<u8> {
    Packet::Ask(AskPacket::default()).encode()
}

/// Both replies for a server with `names` racing
pub fn full_answer(name: &str, names: &[&str]) -> Vec<Vec<u8>> {
    let players: Vec<PlayerInfo> = names
        .iter()
        .enumerate()
        .map(|(i, n)| player(i as u8, n))
        .collect();
    vec![
        info_datagram(name, players.len() as u8),
        roster_datagram(&players),
    ]
}

/// A game server on localhost that answers the n-th ask (0-based) with
/// whatever `script(n)` returns.
pub struct FakeServer {
    pub addr: SocketAddr,
    asks: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn spawn<F>(script: F) -> Self
    where
        F: Fn(usize) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        Self::spawn_delayed(Duration::ZERO, script).await
    }

    /// Like [`FakeServer::spawn`], but holds every answer back for `delay`.
    pub async fn spawn_delayed<F>(delay: Duration, script: F) -> Self
    where
        F: Fn(usize) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake server");
        let addr = socket.local_addr().expect("Fake server has no address");
        let asks = Arc::new(AtomicUsize::new(0));
        let counter = asks.clone();

        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                if !matches!(Packet::decode(&buf[..len]), Ok(Packet::Ask(_))) {
                    continue;
                }
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                for datagram in script(n) {
                    let _ = socket.send_to(&datagram, from).await;
                }
            }
        });

        Self { addr, asks, handle }
    }

    /// A server that never answers
    pub async fn silent() -> Self {
        Self::spawn(|_| Vec::new()).await
    }

    /// A server that always answers with the same roster
    pub async fn answering(name: &'static str, names: &'static [&'static str]) -> Self {
        Self::spawn(move |_| full_answer(name, names)).await
    }

    pub fn remote(&self) -> Remote {
        self.addr.into()
    }

    pub fn asks(&self) -> usize {
        self.asks.load(Ordering::SeqCst)
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
