//! Status polling for Ring Racers servers.
//!
//! [`packet`] speaks the UDP query protocol, [`client`] performs one query
//! ("knock") against a server and [`watcher`] keeps a set of registered
//! servers refreshed in the background.

pub mod client;
pub mod config;
pub mod cstr;
pub mod helpers;
pub mod info;
pub mod packet;
pub mod remote;
pub mod watcher;

pub use client::{Answer, KnockError, Knocker};
pub use info::{GameSpeed, PlayerInfo, RefuseReason, ServerFlags, ServerInfo};
pub use packet::{Packet, PacketError};
pub use remote::{DEFAULT_PORT, Remote, RemoteError};
pub use watcher::{ServerStatus, WatchError, WatchedServer, Watcher};
