use super::{Result, RoutingError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Recovery state of a single shard copy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ShardRoutingState {
    Unassigned,
    Initializing,
    Started,
    Relocating,
}

impl ShardRoutingState {
    pub const ALL: [ShardRoutingState; 4] = [
        ShardRoutingState::Unassigned,
        ShardRoutingState::Initializing,
        ShardRoutingState::Started,
        ShardRoutingState::Relocating,
    ];

    /// Stable one-byte tag used by the binary codec.
    pub fn tag(self) -> u8 {
        match self {
            Self::Unassigned => 0,
            Self::Initializing => 1,
            Self::Started => 2,
            Self::Relocating => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Unassigned),
            1 => Some(Self::Initializing),
            2 => Some(Self::Started),
            3 => Some(Self::Relocating),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ShardRole {
    Primary,
    Replica,
}

impl ShardRole {
    pub fn tag(self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Replica => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Primary),
            1 => Some(Self::Replica),
            _ => None,
        }
    }
}

/// Assignment of one shard copy to a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardRouting {
    pub shard_id: u32,
    /// `None` while the copy is unassigned.
    pub node_id: Option<String>,
    pub role: ShardRole,
    pub state: ShardRoutingState,
    /// Target node while the copy is relocating.
    pub relocating_node_id: Option<String>,
}

impl ShardRouting {
    pub fn unassigned(shard_id: u32, role: ShardRole) -> Self {
        Self {
            shard_id,
            node_id: None,
            role,
            state: ShardRoutingState::Unassigned,
            relocating_node_id: None,
        }
    }

    pub fn initializing(shard_id: u32, role: ShardRole, node_id: impl Into<String>) -> Self {
        Self {
            shard_id,
            node_id: Some(node_id.into()),
            role,
            state: ShardRoutingState::Initializing,
            relocating_node_id: None,
        }
    }

    pub fn started(shard_id: u32, role: ShardRole, node_id: impl Into<String>) -> Self {
        Self {
            shard_id,
            node_id: Some(node_id.into()),
            role,
            state: ShardRoutingState::Started,
            relocating_node_id: None,
        }
    }

    pub fn relocating(
        shard_id: u32,
        role: ShardRole,
        node_id: impl Into<String>,
        target_node_id: impl Into<String>,
    ) -> Self {
        Self {
            shard_id,
            node_id: Some(node_id.into()),
            role,
            state: ShardRoutingState::Relocating,
            relocating_node_id: Some(target_node_id.into()),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role == ShardRole::Primary
    }

    pub fn assigned(&self) -> bool {
        self.node_id.is_some()
    }
}

/// Identity of a partition: a human name and an immutable unique id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionIdentity {
    pub name: String,
    pub uuid: String,
}

impl PartitionIdentity {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
        }
    }

    /// Creates an identity with a freshly generated v4 uuid.
    pub fn generate(name: impl Into<String>) -> Self {
        Self::new(name, uuid::Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for PartitionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.name, self.uuid)
    }
}

/// Routing table of one partition. Never mutated once built.
///
/// Deserialization runs the same checks as [`RoutingGroup::new`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RoutingGroupParts")]
pub struct RoutingGroup {
    identity: PartitionIdentity,
    shards: Vec<ShardRouting>,
}

#[derive(Deserialize)]
struct RoutingGroupParts {
    identity: PartitionIdentity,
    shards: Vec<ShardRouting>,
}

impl TryFrom<RoutingGroupParts> for RoutingGroup {
    type Error = RoutingError;

    fn try_from(parts: RoutingGroupParts) -> Result<Self> {
        Self::new(parts.identity, parts.shards)
    }
}

impl RoutingGroup {
    /// Builds a validated group.
    ///
    /// Checks for:
    /// - non-empty partition name and uuid,
    /// - no two primaries for the same shard id,
    /// - assigned copies carrying a non-empty node id,
    /// - relocation targets only on relocating copies.
    pub fn new(identity: PartitionIdentity, shards: Vec<ShardRouting>) -> Result<Self> {
        if identity.name.trim().is_empty() {
            return Err(RoutingError::InvalidRouting(
                "partition name must not be empty".to_string(),
            ));
        }
        if identity.uuid.trim().is_empty() {
            return Err(RoutingError::InvalidRouting(format!(
                "partition uuid for '{}' must not be empty",
                identity.name
            )));
        }

        let mut primaries = HashSet::new();
        for shard in &shards {
            if shard.is_primary() && !primaries.insert(shard.shard_id) {
                return Err(RoutingError::InvalidRouting(format!(
                    "Shard {} of {} has more than one primary",
                    shard.shard_id, identity
                )));
            }
            match (&shard.node_id, shard.state) {
                (Some(_), ShardRoutingState::Unassigned) => {
                    return Err(RoutingError::InvalidRouting(format!(
                        "Shard {} of {} is unassigned but names a node",
                        shard.shard_id, identity
                    )));
                }
                (None, state) if state != ShardRoutingState::Unassigned => {
                    return Err(RoutingError::InvalidRouting(format!(
                        "Shard {} of {} is {:?} without a node",
                        shard.shard_id, identity, state
                    )));
                }
                (Some(node), _) if node.trim().is_empty() => {
                    return Err(RoutingError::InvalidRouting(format!(
                        "Node id for shard {} of {} must not be empty",
                        shard.shard_id, identity
                    )));
                }
                _ => {}
            }
            let relocating = shard.state == ShardRoutingState::Relocating;
            if relocating != shard.relocating_node_id.is_some() {
                return Err(RoutingError::InvalidRouting(format!(
                    "Shard {} of {} has an inconsistent relocation target",
                    shard.shard_id, identity
                )));
            }
        }

        Ok(Self { identity, shards })
    }

    pub fn empty(identity: PartitionIdentity) -> Result<Self> {
        Self::new(identity, Vec::new())
    }

    pub fn identity(&self) -> &PartitionIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn uuid(&self) -> &str {
        &self.identity.uuid
    }

    pub fn shards(&self) -> &[ShardRouting] {
        &self.shards
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn primary(&self, shard_id: u32) -> Option<&ShardRouting> {
        self.shards
            .iter()
            .find(|shard| shard.shard_id == shard_id && shard.is_primary())
    }
}

/// Routing of every partition at one cluster-state version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullRoutingState {
    version: u64,
    groups: BTreeMap<String, Arc<RoutingGroup>>,
}

impl FullRoutingState {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            groups: BTreeMap::new(),
        }
    }

    /// Builds a state from groups; a later group with the same name replaces an earlier one.
    pub fn from_groups<I>(version: u64, groups: I) -> Self
    where
        I: IntoIterator<Item = Arc<RoutingGroup>>,
    {
        let mut state = Self::new(version);
        for group in groups {
            state.groups.insert(group.name().to_string(), group);
        }
        state
    }

    /// Returns a copy of this state at `version` with `group` added or replaced.
    pub fn with_group(&self, version: u64, group: Arc<RoutingGroup>) -> Self {
        let mut next = self.clone();
        next.version = version;
        next.groups.insert(group.name().to_string(), group);
        next
    }

    /// Returns a copy of this state at `version` without partition `name`.
    pub fn without_group(&self, version: u64, name: &str) -> Self {
        let mut next = self.clone();
        next.version = version;
        next.groups.remove(name);
        next
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RoutingGroup>> {
        self.groups.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Arc<RoutingGroup>> {
        self.groups.values()
    }

    pub fn partition_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub(crate) fn insert(&mut self, group: Arc<RoutingGroup>) {
        self.groups.insert(group.name().to_string(), group);
    }
}

/// Durable reference to one partition's routing file, as embedded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct UploadedGroupMetadata {
    pub partition_name: String,
    pub partition_id: String,
    pub uploaded_file_path: String,
}

impl UploadedGroupMetadata {
    pub fn new(
        partition_name: impl Into<String>,
        partition_id: impl Into<String>,
        uploaded_file_path: impl Into<String>,
    ) -> Self {
        Self {
            partition_name: partition_name.into(),
            partition_id: partition_id.into(),
            uploaded_file_path: uploaded_file_path.into(),
        }
    }

    pub fn identity(&self) -> PartitionIdentity {
        PartitionIdentity::new(self.partition_name.clone(), self.partition_id.clone())
    }
}
