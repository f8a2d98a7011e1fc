use std::collections::HashMap;

use shared::{
    domain::{EntityId, RoomKind, UuidCode},
    protocol::{GroupRecord, UserRecord},
};
use tracing::{debug, warn};

use crate::room_address::GROUP_SUFFIX;

/// Appended to the display name of the logged-in user's own roster row.
pub const SELF_MARKER: &str = "(You)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEntry {
    User {
        entity_id: EntityId,
        display_name: String,
        uuid_code: Option<UuidCode>,
    },
    Group {
        entity_id: EntityId,
        display_name: String,
    },
}

impl RosterEntry {
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::User { entity_id, .. } | Self::Group { entity_id, .. } => entity_id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::User { display_name, .. } | Self::Group { display_name, .. } => display_name,
        }
    }

    pub fn kind(&self) -> RoomKind {
        match self {
            Self::User { .. } => RoomKind::Direct,
            Self::Group { .. } => RoomKind::Group,
        }
    }

    pub fn uuid_code(&self) -> Option<&UuidCode> {
        match self {
            Self::User { uuid_code, .. } => uuid_code.as_ref(),
            Self::Group { .. } => None,
        }
    }
}

impl From<UserRecord> for RosterEntry {
    fn from(value: UserRecord) -> Self {
        Self::User {
            entity_id: value.entity_id,
            display_name: value.full_name,
            uuid_code: value.uuid_code,
        }
    }
}

impl From<GroupRecord> for RosterEntry {
    fn from(value: GroupRecord) -> Self {
        Self::Group {
            entity_id: value.entity_id,
            display_name: value.group_name,
        }
    }
}

/// Contacts and groups visible to the logged-in user, as of the latest
/// server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterStore {
    entries: HashMap<EntityId, RosterEntry>,
    order: Vec<EntityId>,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole roster. Nothing from the previous snapshot survives.
    pub fn apply_snapshot(&mut self, users: Vec<UserRecord>, groups: Vec<GroupRecord>) {
        let mut entries = HashMap::with_capacity(users.len() + groups.len());
        let mut order = Vec::with_capacity(users.len() + groups.len());

        let incoming = users
            .into_iter()
            .map(RosterEntry::from)
            .chain(groups.into_iter().map(RosterEntry::from));
        for entry in incoming {
            let entity_id = entry.entity_id().clone();
            if entity_id.as_str().contains(GROUP_SUFFIX) {
                warn!(
                    entity_id = %entity_id,
                    "roster: identifier contains the group suffix; its room address is ambiguous"
                );
            }
            if entries.insert(entity_id.clone(), entry).is_some() {
                warn!(entity_id = %entity_id, "roster: duplicate identifier in snapshot, last entry wins");
            } else {
                order.push(entity_id);
            }
        }

        debug!(entries = order.len(), "roster: snapshot applied");
        self.entries = entries;
        self.order = order;
    }

    pub fn lookup(&self, entity_id: &EntityId) -> Option<&RosterEntry> {
        self.entries.get(entity_id)
    }

    /// Presentation name for a roster row; the user's own row gets
    /// [`SELF_MARKER`] appended.
    pub fn display_name(&self, entity_id: &EntityId, self_id: &EntityId) -> Option<String> {
        let entry = self.lookup(entity_id)?;
        if entity_id == self_id {
            Some(format!("{}{SELF_MARKER}", entry.display_name()))
        } else {
            Some(entry.display_name().to_string())
        }
    }

    pub fn users(&self) -> impl Iterator<Item = &RosterEntry> {
        self.in_order()
            .filter(|entry| matches!(entry, RosterEntry::User { .. }))
    }

    pub fn groups(&self) -> impl Iterator<Item = &RosterEntry> {
        self.in_order()
            .filter(|entry| matches!(entry, RosterEntry::Group { .. }))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn in_order(&self) -> impl Iterator<Item = &RosterEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> UserRecord {
        UserRecord {
            entity_id: EntityId::from(id),
            full_name: name.into(),
            email: None,
            uuid_code: None,
        }
    }

    fn group(id: &str, name: &str) -> GroupRecord {
        GroupRecord {
            entity_id: EntityId::from(id),
            group_name: name.into(),
        }
    }

    #[test]
    fn lookup_and_self_marker() {
        let mut roster = RosterStore::new();
        roster.apply_snapshot(vec![user("u1", "Alice")], Vec::new());

        let alice = roster.lookup(&EntityId::from("u1")).expect("alice");
        assert_eq!(alice.display_name(), "Alice");
        assert_eq!(
            roster.display_name(&"u1".into(), &"u1".into()).as_deref(),
            Some("Alice(You)")
        );
        assert_eq!(
            roster.display_name(&"u1".into(), &"u9".into()).as_deref(),
            Some("Alice")
        );
        // presentation only, the stored entry is untouched
        assert_eq!(
            roster.lookup(&"u1".into()).map(RosterEntry::display_name),
            Some("Alice")
        );
    }

    #[test]
    fn snapshot_replaces_everything() {
        let mut roster = RosterStore::new();
        roster.apply_snapshot(vec![user("u1", "Alice")], vec![group("g1", "Ops")]);
        roster.apply_snapshot(vec![user("u2", "Bob")], Vec::new());

        assert!(roster.lookup(&"u1".into()).is_none());
        assert!(roster.lookup(&"g1".into()).is_none());
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.groups().count(), 0);
    }

    #[test]
    fn applying_the_same_snapshot_twice_is_idempotent() {
        let users = vec![user("u1", "Alice"), user("u2", "Bob")];
        let groups = vec![group("g1", "Ops")];

        let mut once = RosterStore::new();
        once.apply_snapshot(users.clone(), groups.clone());
        let mut twice = once.clone();
        twice.apply_snapshot(users, groups);

        assert_eq!(once, twice);
    }

    #[test]
    fn tabs_keep_snapshot_order() {
        let mut roster = RosterStore::new();
        roster.apply_snapshot(
            vec![user("u2", "Bob"), user("u1", "Alice")],
            vec![group("g1", "Ops")],
        );
        let names: Vec<_> = roster.users().map(RosterEntry::display_name).collect();
        assert_eq!(names, ["Bob", "Alice"]);
        assert_eq!(
            roster.groups().next().map(RosterEntry::kind),
            Some(RoomKind::Group)
        );
    }

    #[test]
    fn unknown_ids_have_no_display_name() {
        let roster = RosterStore::new();
        assert_eq!(roster.display_name(&"ghost".into(), &"u1".into()), None);
    }
}
