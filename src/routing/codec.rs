//! Binary encoding of one partition's routing table.
//!
//! Layout (little endian):
//!
//! ```text
//! magic "IRTB" | codec version u32 | body length u32 | body | FNV-1a-64(body) u64
//! ```
//!
//! The body is MessagePack. Shard roles and states travel as one-byte tags so an
//! unknown tag is reported as corruption instead of being silently mapped.

use crate::core::{
    PartitionIdentity, Result, RoutingError, RoutingGroup, ShardRole, ShardRouting,
    ShardRoutingState,
};
use crate::storage::payload_checksum;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

pub const ROUTING_CODEC_MAGIC: &[u8; 4] = b"IRTB";
pub const ROUTING_CODEC_VERSION: u32 = 1;

/// Bodies larger than this are rejected before allocating.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct EncodedGroup {
    name: String,
    uuid: String,
    shards: Vec<EncodedShard>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedShard {
    shard_id: u32,
    node_id: Option<String>,
    role: u8,
    state: u8,
    relocating_node_id: Option<String>,
}

impl From<&ShardRouting> for EncodedShard {
    fn from(shard: &ShardRouting) -> Self {
        Self {
            shard_id: shard.shard_id,
            node_id: shard.node_id.clone(),
            role: shard.role.tag(),
            state: shard.state.tag(),
            relocating_node_id: shard.relocating_node_id.clone(),
        }
    }
}

impl EncodedShard {
    fn into_shard(self) -> Result<ShardRouting> {
        let role = ShardRole::from_tag(self.role).ok_or_else(|| {
            RoutingError::CorruptPayload(format!(
                "unknown role tag {} for shard {}",
                self.role, self.shard_id
            ))
        })?;
        let state = ShardRoutingState::from_tag(self.state).ok_or_else(|| {
            RoutingError::CorruptPayload(format!(
                "unknown shard state tag {} for shard {}",
                self.state, self.shard_id
            ))
        })?;
        Ok(ShardRouting {
            shard_id: self.shard_id,
            node_id: self.node_id,
            role,
            state,
            relocating_node_id: self.relocating_node_id,
        })
    }
}

/// Serializes `group` into a self-delimiting byte stream.
pub fn encode(group: &RoutingGroup) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_to(group, &mut out)?;
    Ok(out)
}

pub fn encode_to<W: Write>(group: &RoutingGroup, writer: &mut W) -> Result<()> {
    let encoded = EncodedGroup {
        name: group.name().to_string(),
        uuid: group.uuid().to_string(),
        shards: group.shards().iter().map(EncodedShard::from).collect(),
    };
    let body = rmp_serde::to_vec(&encoded).map_err(|e| {
        RoutingError::EncodeFailure(format!("serializing {}: {}", group.identity(), e))
    })?;
    let len = body_length(body.len(), group.identity())?;

    let write_err =
        |e: io::Error| RoutingError::BlobStoreError(format!("Failed to write routing: {}", e));
    writer.write_all(ROUTING_CODEC_MAGIC).map_err(write_err)?;
    writer
        .write_all(&ROUTING_CODEC_VERSION.to_le_bytes())
        .map_err(write_err)?;
    writer.write_all(&len.to_le_bytes()).map_err(write_err)?;
    writer.write_all(&body).map_err(write_err)?;
    writer
        .write_all(&payload_checksum(&body).to_le_bytes())
        .map_err(write_err)?;
    Ok(())
}

fn body_length(len: usize, identity: &PartitionIdentity) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        RoutingError::EncodeFailure(format!("body of {} bytes for {} is too large", len, identity))
    })
}

/// Reads one encoded group from `reader` and checks it belongs to `identity`.
///
/// Consumes exactly the encoded bytes; trailing data is left unread.
pub fn decode<R: Read>(reader: &mut R, identity: &PartitionIdentity) -> Result<RoutingGroup> {
    let mut magic = [0u8; 4];
    read_exact(reader, &mut magic, "magic")?;
    if &magic != ROUTING_CODEC_MAGIC {
        return Err(RoutingError::CorruptPayload(format!(
            "bad magic {:?} for {}",
            magic, identity
        )));
    }

    let version = read_u32(reader, "codec version")?;
    if version != ROUTING_CODEC_VERSION {
        return Err(RoutingError::CorruptPayload(format!(
            "unsupported codec version {} for {}",
            version, identity
        )));
    }

    let len = read_u32(reader, "body length")? as usize;
    if len > MAX_BODY_BYTES {
        return Err(RoutingError::CorruptPayload(format!(
            "body length {} exceeds limit for {}",
            len, identity
        )));
    }
    let mut body = vec![0u8; len];
    read_exact(reader, &mut body, "body")?;

    let mut checksum = [0u8; 8];
    read_exact(reader, &mut checksum, "checksum")?;
    let expected = u64::from_le_bytes(checksum);
    let actual = payload_checksum(&body);
    if expected != actual {
        return Err(RoutingError::CorruptPayload(format!(
            "checksum mismatch for {}: stored {:016x}, computed {:016x}",
            identity, expected, actual
        )));
    }

    let encoded: EncodedGroup = rmp_serde::from_slice(&body).map_err(|e| {
        RoutingError::CorruptPayload(format!("undecodable body for {}: {}", identity, e))
    })?;
    if encoded.name != identity.name || encoded.uuid != identity.uuid {
        return Err(RoutingError::CorruptPayload(format!(
            "payload belongs to [{}/{}], expected {}",
            encoded.name, encoded.uuid, identity
        )));
    }

    let shards = encoded
        .shards
        .into_iter()
        .map(EncodedShard::into_shard)
        .collect::<Result<Vec<_>>>()?;
    RoutingGroup::new(identity.clone(), shards)
        .map_err(|e| RoutingError::CorruptPayload(format!("invalid routing decoded: {}", e)))
}

pub fn decode_bytes(bytes: &[u8], identity: &PartitionIdentity) -> Result<RoutingGroup> {
    let mut reader = bytes;
    decode(&mut reader, identity)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            RoutingError::CorruptPayload(format!("stream truncated while reading {}", what))
        }
        _ => RoutingError::BlobStoreError(format!("Failed to read {}: {}", what, e)),
    })
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes, what)?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PartitionIdentity {
        PartitionIdentity::new("orders", "Xb3kq1")
    }

    fn sample_group() -> RoutingGroup {
        RoutingGroup::new(
            identity(),
            vec![
                ShardRouting::started(0, ShardRole::Primary, "node-a"),
                ShardRouting::initializing(0, ShardRole::Replica, "node-b"),
                ShardRouting::relocating(1, ShardRole::Primary, "node-b", "node-c"),
                ShardRouting::unassigned(1, ShardRole::Replica),
            ],
        )
        .unwrap()
    }

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(ROUTING_CODEC_MAGIC);
        out.extend_from_slice(&ROUTING_CODEC_VERSION.to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(&payload_checksum(body).to_le_bytes());
        out
    }

    #[test]
    fn round_trips_every_shard_state() {
        let group = sample_group();
        let bytes = encode(&group).unwrap();
        assert_eq!(decode_bytes(&bytes, &identity()).unwrap(), group);
    }

    #[test]
    fn round_trips_empty_group() {
        let group = RoutingGroup::empty(identity()).unwrap();
        let bytes = encode(&group).unwrap();
        let decoded = decode_bytes(&bytes, &identity()).unwrap();
        assert_eq!(decoded, group);
        assert_eq!(decoded.shard_count(), 0);
    }

    #[test]
    fn decode_is_self_delimiting() {
        let first = sample_group();
        let second = RoutingGroup::empty(identity()).unwrap();
        let mut stream = encode(&first).unwrap();
        encode_to(&second, &mut stream).unwrap();

        let mut reader = stream.as_slice();
        assert_eq!(decode(&mut reader, &identity()).unwrap(), first);
        assert_eq!(decode(&mut reader, &identity()).unwrap(), second);
        assert!(reader.is_empty());
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let bytes = encode(&sample_group()).unwrap();
        for cut in [0, 3, 8, 12, bytes.len() - 1] {
            let err = decode_bytes(&bytes[..cut], &identity()).unwrap_err();
            assert!(
                matches!(err, RoutingError::CorruptPayload(_)),
                "cut at {} gave {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn unknown_state_tag_is_corrupt() {
        let body = rmp_serde::to_vec(&EncodedGroup {
            name: identity().name,
            uuid: identity().uuid,
            shards: vec![EncodedShard {
                shard_id: 0,
                node_id: Some("node-a".to_string()),
                role: ShardRole::Primary.tag(),
                state: 9,
                relocating_node_id: None,
            }],
        })
        .unwrap();
        let err = decode_bytes(&frame(&body), &identity()).unwrap_err();
        assert!(matches!(err, RoutingError::CorruptPayload(msg) if msg.contains("state tag 9")));
    }

    #[test]
    fn unknown_role_tag_is_corrupt() {
        let body = rmp_serde::to_vec(&EncodedGroup {
            name: identity().name,
            uuid: identity().uuid,
            shards: vec![EncodedShard {
                shard_id: 3,
                node_id: Some("node-a".to_string()),
                role: 5,
                state: ShardRoutingState::Started.tag(),
                relocating_node_id: None,
            }],
        })
        .unwrap();
        let err = decode_bytes(&frame(&body), &identity()).unwrap_err();
        assert!(matches!(
            err,
            RoutingError::CorruptPayload(msg) if msg.contains("role tag 5 for shard 3")
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_body_is_an_encode_failure() {
        assert_eq!(body_length(42, &identity()).unwrap(), 42);
        let err = body_length(u32::MAX as usize + 1, &identity()).unwrap_err();
        assert!(matches!(err, RoutingError::EncodeFailure(msg) if msg.contains("too large")));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut bytes = encode(&sample_group()).unwrap();
        bytes[14] ^= 0xff;
        assert!(matches!(
            decode_bytes(&bytes, &identity()),
            Err(RoutingError::CorruptPayload(_))
        ));
    }

    #[test]
    fn foreign_identity_is_rejected() {
        let bytes = encode(&sample_group()).unwrap();
        let other = PartitionIdentity::new("orders", "another-uuid");
        assert!(matches!(
            decode_bytes(&bytes, &other),
            Err(RoutingError::CorruptPayload(_))
        ));
    }

    #[test]
    fn unsupported_version_is_corrupt() {
        let mut bytes = encode(&sample_group()).unwrap();
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            decode_bytes(&bytes, &identity()),
            Err(RoutingError::CorruptPayload(msg)) if msg.contains("version 7")
        ));
    }
}
