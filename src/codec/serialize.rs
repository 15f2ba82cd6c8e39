//! Serializers that rebuild canonical MQTT bytes on the receive path, fed by
//! the link codec's decoded fields and drained by the engine through the
//! reassembly buffer.

use super::types::{PacketType, PublishFields, QoS, TransportError};
use super::varint;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of CONNACK, PUBACK and UNSUBACK.
pub const SIZE_OF_SIMPLE_ACK: usize = 4;

/// Size of SUBACK. Exactly one ack is produced per request, so the size is
/// always 5.
pub const SIZE_OF_SUB_ACK: usize = 5;

/// Size of PINGRESP (and the other empty-body packets).
pub const SIZE_OF_PING: usize = 2;

// Publish flags in the packed link layout (dup shares bit 2 with QoS).
const PUBLISH_FLAG_RETAIN_MASK: u8 = 0x01;
const PUBLISH_FLAG_QOS1_MASK: u8 = 0x02;
const PUBLISH_FLAG_DUP_MASK: u8 = 0x04;

/// SUBACK success return code: granted QoS 1.
const SUBACK_SUCCESS: u8 = 0x01;

/// Serializes one of the fixed 4-byte acks (CONNACK, PUBACK, UNSUBACK).
/// Packet identifier 0 is reserved and rejected for PUBACK; CONNACK carries
/// no identifier and passes 0.
pub fn ack(packet_type: PacketType, pid: u16) -> Result<[u8; SIZE_OF_SIMPLE_ACK], TransportError> {
    if pid == 0 && packet_type == PacketType::Puback {
        tracing::error!("Packet ID cannot be 0.");
        return Err(TransportError::BadParameter("zero packet identifier"));
    }

    let [hi, lo] = pid.to_be_bytes();
    Ok([packet_type.to_fixed_header_byte(), 0x02, hi, lo])
}

/// Serializes a SUBACK with the single fixed success reason byte.
pub fn suback(pid: u16) -> Result<[u8; SIZE_OF_SUB_ACK], TransportError> {
    if pid == 0 {
        tracing::error!("Packet ID cannot be 0.");
        return Err(TransportError::BadParameter("zero packet identifier"));
    }

    let [hi, lo] = pid.to_be_bytes();
    Ok([
        PacketType::Suback.to_fixed_header_byte(),
        0x03,
        hi,
        lo,
        SUBACK_SUCCESS,
    ])
}

/// Serializes a PINGRESP. No failure modes.
pub fn pingresp() -> [u8; SIZE_OF_PING] {
    [PacketType::Pingresp.to_fixed_header_byte(), 0x00]
}

/// Serializes a full PUBLISH in canonical MQTT bytes, ready to be pushed
/// into the reassembly buffer. QoS 1 requires a nonzero packet identifier.
pub fn publish(fields: &PublishFields, payload: &[u8]) -> Result<Bytes, TransportError> {
    let pid = match (fields.qos, fields.pid) {
        (QoS::AtMostOnce, _) => None,
        (QoS::AtLeastOnce, Some(pid)) if pid != 0 => Some(pid),
        (QoS::AtLeastOnce, _) => {
            tracing::error!("A QoS 1 publish requires a nonzero packet identifier.");
            return Err(TransportError::BadParameter("zero packet identifier"));
        }
    };

    let mut flags = PacketType::Publish.to_fixed_header_byte();
    if fields.dup {
        flags |= PUBLISH_FLAG_DUP_MASK;
    }
    if fields.retain {
        flags |= PUBLISH_FLAG_RETAIN_MASK;
    }
    if fields.qos == QoS::AtLeastOnce {
        flags |= PUBLISH_FLAG_QOS1_MASK;
    }

    let mut remaining_length = 2 + fields.topic.len() + payload.len();
    if pid.is_some() {
        remaining_length += 2;
    }
    let remaining_length = u32::try_from(remaining_length)
        .ok()
        .filter(|len| *len <= varint::MAX_REMAINING_LENGTH)
        .ok_or(TransportError::InvalidLength)?;

    let mut bytes =
        BytesMut::with_capacity(1 + varint::encoded_len(remaining_length) + remaining_length as usize);
    bytes.put_u8(flags);
    varint::encode(remaining_length, &mut bytes);
    bytes.put_u16(fields.topic.len() as u16);
    bytes.put_slice(&fields.topic);
    if let Some(pid) = pid {
        bytes.put_u16(pid);
    }
    bytes.put_slice(payload);

    Ok(bytes.freeze())
}
