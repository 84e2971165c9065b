//! Decoded server and player status records.

use std::fmt;

use bitflags::bitflags;

/// Slot number marking an unused player slot.
pub const EMPTY_SLOT: u8 = 255;

/// Why a server would refuse a joining player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefuseReason {
    Ok = 0,
    JoinsDisabled = 1,
    Full = 2,
}

impl TryFrom<u8> for RefuseReason {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::JoinsDisabled),
            2 => Ok(Self::Full),
            other => Err(other),
        }
    }
}

/// Game speed, also known as the gear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameSpeed {
    Easy = 0,
    Normal = 1,
    Hard = 2,
}

impl TryFrom<u8> for GameSpeed {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Easy),
            1 => Ok(Self::Normal),
            2 => Ok(Self::Hard),
            other => Err(other),
        }
    }
}

impl fmt::Display for GameSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gear = match self {
            Self::Easy => "Gear 1",
            Self::Normal => "Gear 2",
            Self::Hard => "Gear 3",
        };
        f.write_str(gear)
    }
}

bitflags! {
    /// Server flags packed into the high bits of the kartvars byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ServerFlags: u8 {
        const LOTS_OF_ADDONS = 0x20;
        const DEDICATED = 0x40;
        const VOICE_ENABLED = 0x80;
    }
}

/// Status of a game server as reported in a server-info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    // Identification
    pub application: String,
    pub version: u8,
    pub subversion: u8,
    /// Leading bytes of the build's commit hash
    pub commit: [u8; 4],

    // General settings
    pub gametype_name: String,
    /// May contain colour codes, see [`crate::cstr::strip_colors`]
    pub server_name: String,
    pub number_of_players: u8,
    pub max_players: u8,
    pub modified_game: bool,
    pub cheats_enabled: bool,
    pub avg_mobiums: u16,
    pub game_speed: GameSpeed,
    pub flags: ServerFlags,
    pub refuse_reason: RefuseReason,

    // Current level
    pub time: u32,
    pub level_time: u32,
    pub map_title: String,
    pub map_md5: [u8; 16],
    pub actnum: u8,
    pub is_zone: bool,

    // Addons
    pub number_of_files: u8,
    pub http_source: String,
}

impl ServerInfo {
    pub fn commit_hex(&self) -> String {
        hex(&self.commit)
    }

    pub fn map_md5_hex(&self) -> String {
        hex(&self.map_md5)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One player slot from a player-info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub num: u8,
    pub name: String,
    pub team: u8,
    pub score: u32,
    pub time_in_server: u16,
}

impl PlayerInfo {
    /// An unused slot.
    pub fn empty() -> Self {
        Self {
            num: EMPTY_SLOT,
            name: String::new(),
            team: 0,
            score: 0,
            time_in_server: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num == EMPTY_SLOT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_truncate_unknown_bits() {
        let flags = ServerFlags::from_bits_truncate(0xFF);
        assert!(flags.contains(ServerFlags::LOTS_OF_ADDONS));
        assert!(flags.contains(ServerFlags::DEDICATED));
        assert!(flags.contains(ServerFlags::VOICE_ENABLED));
        assert_eq!(flags.bits(), 0xE0);

        let flags = ServerFlags::from_bits_truncate(0x41);
        assert_eq!(flags, ServerFlags::DEDICATED);
        assert!(!flags.contains(ServerFlags::DEDICATED | ServerFlags::VOICE_ENABLED));
    }

    #[test]
    fn test_flags_ignore_game_speed_bits() {
        // Gear 3 on a dedicated voice server
        let kartvars = 0x02 | 0x40 | 0x80;
        let flags = ServerFlags::from_bits_truncate(kartvars);
        assert_eq!(flags, ServerFlags::DEDICATED | ServerFlags::VOICE_ENABLED);
        assert_eq!(flags.bits(), 0xC0);
        assert!(!flags.contains(ServerFlags::LOTS_OF_ADDONS));
    }

    #[test]
    fn test_enum_ranges() {
        assert_eq!(GameSpeed::try_from(2), Ok(GameSpeed::Hard));
        assert_eq!(GameSpeed::try_from(3), Err(3));
        assert_eq!(RefuseReason::try_from(1), Ok(RefuseReason::JoinsDisabled));
        assert_eq!(RefuseReason::try_from(9), Err(9));
    }

    #[test]
    fn test_empty_slot() {
        let mut player = PlayerInfo::empty();
        assert!(player.is_empty());

        player.num = 0;
        assert!(!player.is_empty());
    }
}
