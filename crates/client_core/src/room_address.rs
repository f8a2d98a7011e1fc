use std::fmt;

use shared::domain::{EntityId, RoomKind};
use tracing::warn;

use crate::{error::SyncError, roster::RosterEntry};

/// Suffix that marks a group conversation in the single-string room encoding.
pub const GROUP_SUFFIX: &str = "_GROUP";

/// A conversation target: one contact, one group, or a server-named room.
///
/// The string form (`"<id>"` or `"<id>_GROUP"`) is only produced for the wire
/// fields that carry a single room string; everything inside the client works
/// with the tagged pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomAddress {
    pub kind: RoomKind,
    pub target_id: EntityId,
}

impl RoomAddress {
    pub fn direct(target_id: impl Into<EntityId>) -> Self {
        Self {
            kind: RoomKind::Direct,
            target_id: target_id.into(),
        }
    }

    pub fn group(target_id: impl Into<EntityId>) -> Self {
        Self {
            kind: RoomKind::Group,
            target_id: target_id.into(),
        }
    }

    pub fn named(room: impl Into<EntityId>) -> Self {
        Self {
            kind: RoomKind::Named,
            target_id: room.into(),
        }
    }

    pub fn for_entry(entry: &RosterEntry) -> Self {
        Self {
            kind: entry.kind(),
            target_id: entry.entity_id().clone(),
        }
    }

    pub fn encode(&self) -> String {
        match self.kind {
            RoomKind::Direct | RoomKind::Named => self.target_id.as_str().to_string(),
            RoomKind::Group => format!("{}{GROUP_SUFFIX}", self.target_id),
        }
    }

    /// Strict decoding. Rejects strings whose meaning depends on how the
    /// suffix is matched: an empty target, or a target that itself carries
    /// the group suffix.
    pub fn try_decode(room: &str) -> Result<Self, SyncError> {
        let malformed = || SyncError::MalformedAddress {
            room: room.to_string(),
        };
        match room.strip_suffix(GROUP_SUFFIX) {
            Some(prefix) if prefix.is_empty() || prefix.contains(GROUP_SUFFIX) => Err(malformed()),
            Some(prefix) => Ok(Self::group(prefix)),
            None if room.is_empty() => Err(malformed()),
            None => Ok(Self::direct(room)),
        }
    }

    /// Best-effort decoding: ambiguous strings are logged and read as a direct
    /// conversation with the whole string as target.
    pub fn decode(room: &str) -> Self {
        match Self::try_decode(room) {
            Ok(address) => address,
            Err(err) => {
                warn!(room, error = %err, "room address: falling back to direct target");
                Self::direct(room)
            }
        }
    }
}

impl fmt::Display for RoomAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

pub fn encode(target: &RosterEntry) -> String {
    RoomAddress::for_entry(target).encode()
}

pub fn decode(room: &str) -> RoomAddress {
    RoomAddress::decode(room)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_entries_carry_the_suffix() {
        let group = RosterEntry::Group {
            entity_id: EntityId::from("g1"),
            display_name: "Ops".into(),
        };
        assert_eq!(encode(&group), "g1_GROUP");
        assert_eq!(decode("g1_GROUP"), RoomAddress::group("g1"));
    }

    #[test]
    fn direct_entries_encode_to_the_raw_id() {
        let user = RosterEntry::User {
            entity_id: EntityId::from("u1"),
            display_name: "Alice".into(),
            uuid_code: None,
        };
        let room = encode(&user);
        assert_eq!(room, "u1");
        assert_eq!(decode(&room), RoomAddress::direct("u1"));
    }

    #[test]
    fn anything_without_the_suffix_is_direct() {
        assert_eq!(decode("g1_GROUPS"), RoomAddress::direct("g1_GROUPS"));
        assert_eq!(decode("AB12CD34"), RoomAddress::direct("AB12CD34"));
    }

    #[test]
    fn ambiguous_rooms_are_rejected_strictly_and_fall_back_to_direct() {
        assert_eq!(
            RoomAddress::try_decode("team_GROUP_GROUP"),
            Err(SyncError::MalformedAddress {
                room: "team_GROUP_GROUP".into()
            })
        );
        assert_eq!(
            decode("team_GROUP_GROUP"),
            RoomAddress::direct("team_GROUP_GROUP")
        );
        assert!(RoomAddress::try_decode("_GROUP").is_err());
        assert!(RoomAddress::try_decode("").is_err());
    }

    #[test]
    fn display_matches_the_wire_encoding() {
        assert_eq!(RoomAddress::group("g7").to_string(), "g7_GROUP");
        assert_eq!(RoomAddress::named("AB12CD34").to_string(), "AB12CD34");
    }
}
