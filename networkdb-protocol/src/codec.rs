//! Frame encoding: `type: u8 ‖ data: bytes`, with compound frames packed as
//! `count: u8 ‖ (len: u16 ‖ body)*` per §6.3.

use thiserror::Error;

use crate::message::{Message, MessageKind};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("truncated frame")]
    Truncated,
    #[error("compound frame carries more than 255 inner frames")]
    CompoundTooLarge,
    #[error("inner frame too large for a u16 length prefix ({0} bytes)")]
    FrameTooLarge(usize),
    #[error("bincode decode error: {0}")]
    Decode(#[from] bincode::Error),
}

/// Encode a message as a self-contained frame ready to hand to a `Transport`.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let kind = MessageKind::of(message);
    let mut out = Vec::with_capacity(64);
    out.push(kind as u8);
    let body = bincode::serialize(message)?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a frame produced by [`encode_frame`]. The tag is checked against
/// the decoded variant only implicitly — `bincode` will fail to parse a body
/// that doesn't match the enum discriminant encoded internally, so the
/// leading tag byte mainly exists for cheap dispatch without a full decode
/// (e.g. transmit-queue dedup, metrics) and is re-validated here.
pub fn decode_frame(frame: &[u8]) -> Result<Message, ProtocolError> {
    let (&tag, body) = frame.split_first().ok_or(ProtocolError::Truncated)?;
    let kind = MessageKind::from_tag(tag).ok_or(ProtocolError::UnknownTag(tag))?;
    let message: Message = bincode::deserialize(body)?;
    debug_assert_eq!(MessageKind::of(&message), kind, "frame tag/body mismatch");
    Ok(message)
}

/// Pack N already-encoded frames as `count: u8 ‖ (len: u16 ‖ body)*`.
pub fn pack_compound(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames.iter().map(|f| f.len() + 2).sum::<usize>() + 1);
    out.push(frames.len().min(u8::MAX as usize) as u8);
    for frame in frames.iter().take(u8::MAX as usize) {
        let len = frame.len().min(u16::MAX as usize) as u16;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&frame[..len as usize]);
    }
    out
}

/// Inverse of [`pack_compound`].
pub fn unpack_compound(bytes: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut cursor = bytes;
    let &count = cursor.first().ok_or(ProtocolError::Truncated)?;
    cursor = &cursor[1..];

    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if cursor.len() < 2 {
            return Err(ProtocolError::Truncated);
        }
        let len = u16::from_be_bytes([cursor[0], cursor[1]]) as usize;
        cursor = &cursor[2..];
        if cursor.len() < len {
            return Err(ProtocolError::Truncated);
        }
        frames.push(cursor[..len].to_vec());
        cursor = &cursor[len..];
    }
    Ok(frames)
}

/// Build a [`Message::Compound`] frame directly from already-encoded inner
/// frames, splitting into multiple compounds if more than 255 are supplied
/// or the packed size would not fit a single gossip packet.
pub fn pack_into_compounds(frames: Vec<Vec<u8>>, max_packet_bytes: usize) -> Vec<Vec<u8>> {
    let mut compounds = Vec::new();
    let mut batch: Vec<Vec<u8>> = Vec::new();
    let mut batch_bytes = 1usize; // leading count byte

    for frame in frames {
        if frame.len() > u16::MAX as usize {
            tracing::warn!(len = frame.len(), "dropping oversized inner frame from compound");
            continue;
        }
        let added = frame.len() + 2;
        let would_overflow_size = batch_bytes + added > max_packet_bytes && !batch.is_empty();
        let would_overflow_count = batch.len() >= u8::MAX as usize;
        if would_overflow_size || would_overflow_count {
            compounds.push(std::mem::take(&mut batch));
            batch_bytes = 1;
        }
        batch_bytes += added;
        batch.push(frame);
    }
    if !batch.is_empty() {
        compounds.push(batch);
    }

    compounds
        .into_iter()
        .filter_map(|frames| {
            let message = Message::Compound(crate::message::CompoundPayload { frames });
            encode_frame(&message).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{LamportTime, NodeId};
    use crate::message::{NetworkEventKind, NetworkEventPayload};

    fn sample_network_event(ltime: LamportTime) -> Message {
        Message::NetworkEvent(NetworkEventPayload {
            kind: NetworkEventKind::Join,
            ltime,
            node: NodeId::random(),
            network: "n1".into(),
        })
    }

    #[test]
    fn round_trips_a_frame() {
        let msg = sample_network_event(42);
        let frame = encode_frame(&msg).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        match decoded {
            Message::NetworkEvent(payload) => assert_eq!(payload.ltime, 42),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn compound_round_trips_arbitrary_frame_counts() {
        let frames: Vec<Vec<u8>> = (0..10)
            .map(|i| encode_frame(&sample_network_event(i)).unwrap())
            .collect();
        let packed = pack_compound(&frames);
        let unpacked = unpack_compound(&packed).unwrap();
        assert_eq!(frames, unpacked);
    }

    #[test]
    fn decode_frame_rejects_truncated_input() {
        assert!(decode_frame(&[]).is_err());
    }

    #[test]
    fn decode_frame_rejects_unknown_tag() {
        assert!(matches!(
            decode_frame(&[200, 1, 2, 3]),
            Err(ProtocolError::UnknownTag(200))
        ));
    }
}
