//! Binary wire protocol for peer links.
//!
//! Envelope layout (after a 4-byte big-endian length prefix):
//! `version(1) | type(1) | timestamp_ms(8) | node_id(32) | signature(64) | payload`.
//! The signature covers everything except itself. Exactly one protocol
//! version is active at a time; a mismatched version is rejected before the
//! payload is even decoded and the peer is disconnected.

use crate::crypto::{verify_signature, NodeIdentity};
use crate::error::{NodeError, NodeResult};
use crate::mesh::message::MeshMessage;
use crate::types::{now_ms, NodeId, PROTOCOL_VERSION};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum allowed frame size (4MB) — prevents memory exhaustion attacks.
pub const MAX_FRAME_SIZE: u32 = 4 * 1024 * 1024;

const ENVELOPE_HEADER_SIZE: usize = 1 + 1 + 8 + 32 + 64;

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub version: u8,
    pub kind: u8,
    pub timestamp_ms: u64,
    pub node_id: NodeId,
    pub signature: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Build and sign an envelope around a mesh message.
    pub fn seal(identity: &NodeIdentity, message: &MeshMessage) -> NodeResult<Self> {
        let payload = bincode::serialize(message)
            .map_err(|e| NodeError::Transient(format!("message serialization: {e}")))?;
        let timestamp_ms = now_ms();
        let node_id = identity.node_id();
        let signature = identity.sign(&signed_region(
            PROTOCOL_VERSION,
            message.kind(),
            timestamp_ms,
            &node_id,
            &payload,
        ));

        Ok(Self {
            version: PROTOCOL_VERSION,
            kind: message.kind(),
            timestamp_ms,
            node_id,
            signature,
            payload,
        })
    }

    /// Verify the envelope signature and decode the payload into the closed
    /// message union. Any failure is a protocol violation attributed to the
    /// sending node.
    pub fn open(&self) -> NodeResult<MeshMessage> {
        let sender = hex::encode(self.node_id);
        if self.version != PROTOCOL_VERSION {
            return Err(NodeError::protocol(
                Some(&sender),
                format!(
                    "protocol version {} not supported (active: {})",
                    self.version, PROTOCOL_VERSION
                ),
            ));
        }

        verify_signature(
            &self.node_id,
            &signed_region(
                self.version,
                self.kind,
                self.timestamp_ms,
                &self.node_id,
                &self.payload,
            ),
            &self.signature,
        )
        .map_err(|_| NodeError::protocol(Some(&sender), "envelope signature invalid"))?;

        let message: MeshMessage = bincode::deserialize(&self.payload)
            .map_err(|e| NodeError::protocol(Some(&sender), format!("malformed payload: {e}")))?;

        if message.kind() != self.kind {
            return Err(NodeError::protocol(
                Some(&sender),
                "envelope type does not match payload",
            ));
        }
        Ok(message)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.version);
        buf.put_u8(self.kind);
        buf.put_u64(self.timestamp_ms);
        buf.put_slice(&self.node_id);
        buf.put_slice(&self.signature);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> NodeResult<Self> {
        if bytes.len() < ENVELOPE_HEADER_SIZE {
            return Err(NodeError::protocol(None, "truncated envelope"));
        }
        let mut buf = bytes;
        let version = buf.get_u8();
        let kind = buf.get_u8();
        let timestamp_ms = buf.get_u64();
        let mut node_id = [0u8; 32];
        buf.copy_to_slice(&mut node_id);
        let mut signature = vec![0u8; 64];
        buf.copy_to_slice(&mut signature);
        let payload = buf.to_vec();

        Ok(Self {
            version,
            kind,
            timestamp_ms,
            node_id,
            signature,
            payload,
        })
    }
}

fn signed_region(
    version: u8,
    kind: u8,
    timestamp_ms: u64,
    node_id: &NodeId,
    payload: &[u8],
) -> Vec<u8> {
    let mut region = Vec::with_capacity(10 + 32 + payload.len());
    region.push(version);
    region.push(kind);
    region.extend_from_slice(&timestamp_ms.to_be_bytes());
    region.extend_from_slice(node_id);
    region.extend_from_slice(payload);
    region
}

/// Write an envelope as a length-prefixed frame.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> NodeResult<()> {
    let frame = envelope.encode();
    let len = frame.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(NodeError::Transient(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
        )));
    }

    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| NodeError::Transient(format!("write frame length: {e}")))?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| NodeError::Transient(format!("write frame: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| NodeError::Transient(format!("flush: {e}")))?;
    Ok(())
}

/// Read a length-prefixed envelope. Returns Ok(None) on clean EOF.
pub async fn read_envelope<R: AsyncRead + Unpin>(reader: &mut R) -> NodeResult<Option<Envelope>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NodeError::Transient(format!("read frame length: {e}"))),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(NodeError::protocol(
            None,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }

    let mut frame = vec![0u8; len as usize];
    reader
        .read_exact(&mut frame)
        .await
        .map_err(|e| NodeError::Transient(format!("read frame: {e}")))?;

    Envelope::decode(&frame).map(Some)
}
