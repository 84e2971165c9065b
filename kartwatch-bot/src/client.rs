//! Querying a single game server.
//!
//! A knock sends an ask over a fresh UDP socket and folds the replies into an
//! [`Accumulator`] until it holds the server info plus as many roster entries
//! as the info advertises. Each attempt waits up to the attempt timeout; an
//! attempt that ends without completing the answer re-sends the ask, since a
//! server that dropped part of its answer will send all of it again. The whole
//! knock never outlives `attempt_timeout * tries`.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use arrayvec::ArrayVec;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::info::{PlayerInfo, ServerInfo};
use crate::packet::{AskPacket, Packet};
use crate::remote::Remote;

pub const DEFAULT_TRIES: u32 = 5;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// Round-trip samples kept per server.
pub const PING_WINDOW: usize = 5;

// Replies are well under 1 KiB
const MAX_DATAGRAM: usize = 2048;

#[derive(Debug, Error)]
pub enum KnockError {
    #[error("no complete answer after {attempts} attempts")]
    Connect { attempts: u32 },

    #[error("could not resolve {remote}: {source}")]
    Resolve {
        remote: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// A complete answer to a knock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub info: ServerInfo,
    pub players: Vec<PlayerInfo>,
}

/// Replies gathered so far during a knock.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    info: Option<ServerInfo>,
    players: Vec<PlayerInfo>,
}

impl Accumulator {
    /// Folds one decoded reply in. Empty slots are dropped; a slot number seen
    /// twice keeps the newer entry.
    pub fn fold(mut self, packet: Packet) -> Self {
        match packet {
            Packet::ServerInfo(info) => self.info = Some(*info),
            Packet::PlayerInfo(page) => {
                for player in page.slots.into_iter().filter(|p| !p.is_empty()) {
                    match self.players.iter_mut().find(|p| p.num == player.num) {
                        Some(existing) => *existing = player,
                        None => self.players.push(player),
                    }
                }
            }
            Packet::Ask(_) => {}
        }
        self
    }

    pub fn is_complete(&self) -> bool {
        self.info
            .as_ref()
            .is_some_and(|info| self.players.len() >= usize::from(info.number_of_players))
    }

    /// The answer, if complete.
    pub fn finish(self) -> Option<Answer> {
        if !self.is_complete() {
            return None;
        }
        Some(Answer {
            info: self.info?,
            players: self.players,
        })
    }
}

/// Most recent round-trip times in milliseconds, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingWindow {
    samples: ArrayVec<u32, PING_WINDOW>,
}

impl PingWindow {
    pub fn push(&mut self, millis: u32) {
        if self.samples.is_full() {
            self.samples.remove(0);
        }
        self.samples.push(millis);
    }

    pub fn samples(&self) -> &[u32] {
        &self.samples
    }

    /// Mean of the samples, `None` before the first one.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let total: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        Some(total as f64 / self.samples.len() as f64)
    }
}

/// Outcome of a knock plus the round-trip times measured along the way,
/// which are worth keeping even when the knock failed.
#[derive(Debug)]
pub struct Knock {
    pub result: Result<Answer, KnockError>,
    pub rtt_samples: Vec<u32>,
}

/// Retry policy for knocks.
#[derive(Debug, Clone, Copy)]
pub struct Knocker {
    tries: u32,
    attempt_timeout: Duration,
}

impl Default for Knocker {
    fn default() -> Self {
        Self::new(DEFAULT_TRIES, DEFAULT_ATTEMPT_TIMEOUT)
    }
}

impl Knocker {
    pub fn new(tries: u32, attempt_timeout: Duration) -> Self {
        Self {
            tries: tries.max(1),
            attempt_timeout,
        }
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Hard limit on the duration of one knock.
    pub fn deadline(&self) -> Duration {
        self.attempt_timeout * self.tries
    }

    /// Asks `remote` for its status.
    pub async fn knock(&self, remote: &Remote) -> Knock {
        let addr = match remote.resolve().await {
            Ok(addr) => addr,
            Err(source) => {
                return Knock {
                    result: Err(KnockError::Resolve {
                        remote: remote.to_string(),
                        source,
                    }),
                    rtt_samples: Vec::new(),
                };
            }
        };

        let mut rtt_samples = Vec::new();
        let result = self.knock_addr(addr, &mut rtt_samples).await;
        Knock {
            result,
            rtt_samples,
        }
    }

    async fn knock_addr(
        &self,
        addr: SocketAddr,
        rtt_samples: &mut Vec<u32>,
    ) -> Result<Answer, KnockError> {
        // The socket lives for this knock only and is closed on every return
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;

        let ask = Packet::Ask(AskPacket::default()).encode();
        let deadline = Instant::now() + self.deadline();
        let mut acc = Accumulator::default();
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut attempts = 0;

        'attempts: while attempts < self.tries && Instant::now() < deadline {
            attempts += 1;

            let sent_at = Instant::now();
            if let Err(err) = socket.send(&ask).await {
                warn!(remote = %addr, attempt = attempts, error = %err, "failed to send ask");
                continue;
            }
            let attempt_end = (sent_at + self.attempt_timeout).min(deadline);
            let mut answered = false;

            // Keep listening on this attempt for the rest of a split answer
            loop {
                let len = match timeout_at(attempt_end, socket.recv(&mut buf)).await {
                    Ok(Ok(len)) => len,
                    // A refused port reports here once per ask, keep waiting for the attempt
                    Ok(Err(err)) => {
                        warn!(remote = %addr, attempt = attempts, error = %err, "receive failed");
                        continue;
                    }
                    Err(_) => {
                        debug!(remote = %addr, attempt = attempts, "attempt timed out");
                        break;
                    }
                };

                let packet = match Packet::decode(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(err) => {
                        warn!(remote = %addr, attempt = attempts, error = %err, "ignoring bad datagram");
                        continue;
                    }
                };

                let is_reply = matches!(packet, Packet::ServerInfo(_) | Packet::PlayerInfo(_));
                if is_reply && !answered {
                    answered = true;
                    let rtt = u32::try_from(sent_at.elapsed().as_millis()).unwrap_or(u32::MAX);
                    rtt_samples.push(rtt);
                }

                acc = acc.fold(packet);
                if acc.is_complete() {
                    break 'attempts;
                }
            }
        }

        let answer = acc.finish().ok_or(KnockError::Connect { attempts })?;
        debug!(
            remote = %addr,
            attempts,
            players = answer.players.len(),
            "knock answered"
        );
        Ok(answer)
    }
}
