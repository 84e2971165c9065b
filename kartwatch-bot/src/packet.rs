//! Wire format of the server query protocol.
//!
//! Every datagram starts with an 8 byte header:
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 4    | checksum (little-endian)      |
//! | 4      | 2    | ack fields, always zero here  |
//! | 6      | 1    | packet type tag               |
//! | 7      | 1    | reserved                      |
//!
//! followed by the payload of the tagged type. Multi-byte integers are
//! little-endian and the payload has no padding.

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::cstr;
use crate::info::{GameSpeed, PlayerInfo, RefuseReason, ServerFlags, ServerInfo};

pub const HEADER_LEN: usize = 8;
/// Protocol version sent in asks.
pub const PROTOCOL_VERSION: u8 = 2;
/// Player slots carried by one player-info reply.
pub const MAX_PLAYERS: usize = 16;

const CHECKSUM_SEED: u32 = 0x1234567;
const TYPE_OFFSET: usize = 6;

const TAG_ASK: u8 = 12;
const TAG_SERVER_INFO: u8 = 13;
const TAG_PLAYER_INFO: u8 = 14;

const ASK_LEN: usize = 5;
const SERVER_INFO_LEN: usize = 404;
const PLAYER_SLOT_LEN: usize = 36;
const PLAYER_INFO_LEN: usize = PLAYER_SLOT_LEN * MAX_PLAYERS;

const GAME_SPEED_MASK: u8 = 0x03;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame too short ({len} bytes)")]
    FrameTooShort { len: usize },

    #[error("bad checksum (header says {expected:#010x}, computed {got:#010x})")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("unknown packet type {tag}")]
    UnknownPacketType { tag: u8 },

    #[error("{kind} payload truncated (expected {expected} bytes, got {got})")]
    Truncated {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid {field} value {value}")]
    InvalidField { field: &'static str, value: u8 },
}

/// Request for a server's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AskPacket {
    pub version: u8,
    /// Unused by servers, always sent as zero.
    pub time: u32,
}

impl Default for AskPacket {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            time: 0,
        }
    }
}

/// One page of the player roster. Always holds exactly [`MAX_PLAYERS`]
/// slots; unused slots are [`PlayerInfo::empty`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfoPacket {
    pub slots: ArrayVec<PlayerInfo, MAX_PLAYERS>,
}

impl PlayerInfoPacket {
    /// Builds a page from up to [`MAX_PLAYERS`] players, padding the rest with
    /// empty slots. Extra players are dropped.
    pub fn new(players: impl IntoIterator<Item = PlayerInfo>) -> Self {
        let mut slots: ArrayVec<PlayerInfo, MAX_PLAYERS> =
            players.into_iter().take(MAX_PLAYERS).collect();
        while !slots.is_full() {
            slots.push(PlayerInfo::empty());
        }
        Self { slots }
    }

    /// Slots that hold a player.
    pub fn players(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.slots.iter().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Ask(AskPacket),
    ServerInfo(Box<ServerInfo>),
    PlayerInfo(PlayerInfoPacket),
}

impl Packet {
    fn tag(&self) -> u8 {
        match self {
            Packet::Ask(_) => TAG_ASK,
            Packet::ServerInfo(_) => TAG_SERVER_INFO,
            Packet::PlayerInfo(_) => TAG_PLAYER_INFO,
        }
    }

    /// Serializes the packet, checksum included.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + SERVER_INFO_LEN);
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 0, self.tag(), 0]);

        match self {
            Packet::Ask(ask) => {
                buf.push(ask.version);
                buf.extend_from_slice(&ask.time.to_le_bytes());
            }
            Packet::ServerInfo(info) => encode_server_info(&mut buf, info),
            Packet::PlayerInfo(page) => {
                for player in &page.slots {
                    encode_player(&mut buf, player);
                }
            }
        }

        let sum = checksum(&buf);
        buf[..4].copy_from_slice(&sum.to_le_bytes());
        buf
    }

    /// Validates and parses a datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::FrameTooShort { len: buf.len() });
        }

        let expected = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let got = checksum(buf);
        if expected != got {
            return Err(PacketError::ChecksumMismatch { expected, got });
        }

        let payload = &buf[HEADER_LEN..];
        match buf[TYPE_OFFSET] {
            TAG_ASK => {
                let mut r = Reader::new("ask", payload, ASK_LEN)?;
                Ok(Packet::Ask(AskPacket {
                    version: r.u8(),
                    time: r.u32(),
                }))
            }
            TAG_SERVER_INFO => Ok(Packet::ServerInfo(Box::new(decode_server_info(payload)?))),
            TAG_PLAYER_INFO => {
                let mut r = Reader::new("player-info", payload, PLAYER_INFO_LEN)?;
                let slots = (0..MAX_PLAYERS).map(|_| decode_player(&mut r)).collect();
                Ok(Packet::PlayerInfo(PlayerInfoPacket { slots }))
            }
            tag => Err(PacketError::UnknownPacketType { tag }),
        }
    }
}

/// Checksum of a datagram: every byte after the checksum field, weighted by
/// its 1-based position, summed onto a fixed seed with 32-bit wraparound.
pub fn checksum(buf: &[u8]) -> u32 {
    buf.iter()
        .skip(4)
        .zip(1u32..)
        .fold(CHECKSUM_SEED, |acc, (&b, i)| {
            acc.wrapping_add(u32::from(b).wrapping_mul(i))
        })
}

fn encode_server_info(buf: &mut Vec<u8>, info: &ServerInfo) {
    let kartvars = info.game_speed as u8 | info.flags.bits();

    buf.push(0xFF);
    buf.push(PROTOCOL_VERSION);
    cstr::write(buf, &info.application, 16);
    buf.push(info.version);
    buf.push(info.subversion);
    buf.extend_from_slice(&info.commit);
    buf.push(info.number_of_players);
    buf.push(info.max_players);
    buf.push(info.refuse_reason as u8);
    cstr::write(buf, &info.gametype_name, 24);
    buf.push(info.modified_game.into());
    buf.push(info.cheats_enabled.into());
    buf.push(kartvars);
    buf.push(info.number_of_files);
    buf.extend_from_slice(&info.time.to_le_bytes());
    buf.extend_from_slice(&info.level_time.to_le_bytes());
    cstr::write(buf, &info.server_name, 32);
    cstr::write(buf, &info.map_title, 33);
    buf.extend_from_slice(&info.map_md5);
    buf.push(info.actnum);
    buf.push(info.is_zone.into());
    cstr::write(buf, &info.http_source, 256);
    buf.extend_from_slice(&info.avg_mobiums.to_le_bytes());
}

fn decode_server_info(payload: &[u8]) -> Result<ServerInfo, PacketError> {
    let mut r = Reader::new("server-info", payload, SERVER_INFO_LEN)?;

    r.skip(1); // always 0xFF
    r.skip(1); // packet version
    let application = r.cstr(16);
    let version = r.u8();
    let subversion = r.u8();
    let commit = r.array();
    let number_of_players = r.u8();
    let max_players = r.u8();
    let refuse_reason = r.u8();
    let gametype_name = r.cstr(24);
    let modified_game = r.u8() != 0;
    let cheats_enabled = r.u8() != 0;
    let kartvars = r.u8();
    let number_of_files = r.u8();
    let time = r.u32();
    let level_time = r.u32();
    let server_name = r.cstr(32);
    let map_title = r.cstr(33);
    let map_md5 = r.array();
    let actnum = r.u8();
    let is_zone = r.u8() != 0;
    let http_source = r.cstr(256);
    let avg_mobiums = r.u16();
    // The needed-files list follows; it is not tracked.

    let game_speed = GameSpeed::try_from(kartvars & GAME_SPEED_MASK).map_err(|value| {
        PacketError::InvalidField {
            field: "game speed",
            value,
        }
    })?;
    let refuse_reason =
        RefuseReason::try_from(refuse_reason).map_err(|value| PacketError::InvalidField {
            field: "refuse reason",
            value,
        })?;

    Ok(ServerInfo {
        application,
        version,
        subversion,
        commit,
        gametype_name,
        server_name,
        number_of_players,
        max_players,
        modified_game,
        cheats_enabled,
        avg_mobiums,
        game_speed,
        flags: ServerFlags::from_bits_truncate(kartvars),
        refuse_reason,
        time,
        level_time,
        map_title,
        map_md5,
        actnum,
        is_zone,
        number_of_files,
        http_source,
    })
}

fn encode_player(buf: &mut Vec<u8>, player: &PlayerInfo) {
    buf.push(player.num);
    cstr::write(buf, &player.name, 22);
    buf.extend_from_slice(&[0; 4]); // address, never populated
    buf.push(player.team);
    buf.push(0xFF); // skin, deprecated
    buf.push(0); // colour, deprecated
    buf.extend_from_slice(&player.score.to_le_bytes());
    buf.extend_from_slice(&player.time_in_server.to_le_bytes());
}

fn decode_player(r: &mut Reader<'_>) -> PlayerInfo {
    let num = r.u8();
    let name = r.cstr(22);
    r.skip(4);
    let team = r.u8();
    r.skip(2);
    let score = r.u32();
    let time_in_server = r.u16();

    PlayerInfo {
        num,
        name,
        team,
        score,
        time_in_server,
    }
}

/// Cursor over a payload whose fixed length was checked up front, so the
/// individual reads cannot run past the end.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(kind: &'static str, buf: &'a [u8], expected: usize) -> Result<Self, PacketError> {
        if buf.len() < expected {
            return Err(PacketError::Truncated {
                kind,
                expected,
                got: buf.len(),
            });
        }
        Ok(Self { buf, pos: 0 })
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        bytes
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N));
        out
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.array())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    fn cstr(&mut self, width: usize) -> String {
        cstr::read(self.take(width))
    }
}
