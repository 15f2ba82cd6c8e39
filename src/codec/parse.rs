//! Stateless parsers that recover semantic fields from canonical MQTT byte
//! ranges handed to the send path. Every parser walks the fixed-header
//! layout with explicit offsets and fails closed on any read past the
//! supplied range.

use super::types::{
    qos_from_wire, ConnectFields, PublishFields, PublishParse, QoS, SubscriptionRequest,
    TransportError, WillFields,
};
use super::varint;
use bytes::Bytes;

/// Largest number of topic filters accepted in one SUBSCRIBE/UNSUBSCRIBE.
pub const MAX_SUBS_PER_PACKET: usize = 8;

// Connect flag bit masks, per [MQTT-3.1.2].
const CLEAN_SESSION_MASK: u8 = 0x02;
const WILL_FLAG_MASK: u8 = 0x04;
const WILL_QOS_MASK: u8 = 0x18;
const WILL_RETAIN_MASK: u8 = 0x20;
const PASSWORD_MASK: u8 = 0x40;
const USERNAME_MASK: u8 = 0x80;

// Publish flag bit masks. The link's packed layout shares bit 2 between the
// QoS field and the duplicate flag; QoS must be decoded first from bits 1-2,
// dup separately from bit 2.
const PUBLISH_FLAG_RETAIN_MASK: u8 = 0x01;
const PUBLISH_FLAG_QOS_MASK: u8 = 0x06;
const PUBLISH_FLAG_DUP_MASK: u8 = 0x04;

/// Whether a topic-filter list packet carries a requested-QoS byte per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeKind {
    Subscribe,
    Unsubscribe,
}

/// Bounds-checked reader over a borrowed byte range.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, TransportError> {
        let byte = *self.buf.get(self.pos).ok_or(TransportError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, TransportError> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], TransportError> {
        let end = self.pos.checked_add(len).ok_or(TransportError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(TransportError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads a 2-byte-length-prefixed field.
    fn read_prefixed(&mut self) -> Result<&'a [u8], TransportError> {
        let len = self.read_u16()? as usize;
        self.read_slice(len)
    }

    fn read_remaining_length(&mut self) -> Result<u32, TransportError> {
        let (value, consumed) = varint::decode(&self.buf[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }
}

/// Parses a canonical CONNECT packet into borrowed semantic fields.
pub fn parse_connect(buf: &[u8]) -> Result<ConnectFields<'_>, TransportError> {
    let mut reader = Reader::new(buf);

    let first_byte = reader.read_u8()?;
    debug_assert_eq!(first_byte & 0xF0, 0x10);
    let remaining_length = reader.read_remaining_length()? as usize;

    if reader.remaining() < remaining_length {
        return Err(TransportError::Truncated);
    }

    let protocol_name = reader.read_prefixed()?;
    if protocol_name != b"MQTT" {
        tracing::error!("The protocol name of a connect packet must be \"MQTT\".");
        return Err(TransportError::BadParameter("bad protocol name"));
    }

    // The service level of the packet must be 4, see [MQTT-3.1.2-2].
    let protocol_level = reader.read_u8()?;
    if protocol_level != 4 {
        tracing::error!(protocol_level, "The service level of a connect packet must be 4.");
        return Err(TransportError::BadParameter("unsupported protocol level"));
    }

    let connect_flags = reader.read_u8()?;

    // The LSB is reserved and must be 0, see [MQTT-3.1.2-3].
    if connect_flags & 0x01 != 0 {
        tracing::error!("LSB of the connect flags byte must be 0.");
        return Err(TransportError::BadParameter("reserved connect flag set"));
    }

    let clean_session = connect_flags & CLEAN_SESSION_MASK == CLEAN_SESSION_MASK;
    let will_flag = connect_flags & WILL_FLAG_MASK == WILL_FLAG_MASK;
    let will_qos = qos_from_wire((connect_flags & WILL_QOS_MASK) >> 3);
    let will_retain = connect_flags & WILL_RETAIN_MASK == WILL_RETAIN_MASK;
    let password_flag = connect_flags & PASSWORD_MASK == PASSWORD_MASK;
    let username_flag = connect_flags & USERNAME_MASK == USERNAME_MASK;

    let keep_alive = reader.read_u16()?;

    // Client identifier is required, see [MQTT-3.1.3-3].
    let client_id = reader.read_prefixed()?;
    if client_id.is_empty() {
        tracing::error!("A client identifier must be present in a connect packet.");
        return Err(TransportError::BadParameter("empty client identifier"));
    }

    let will = if will_flag {
        let topic = reader.read_prefixed()?;
        if topic.is_empty() {
            tracing::error!("The will flag was set but no will topic was given.");
            return Err(TransportError::BadParameter("empty will topic"));
        }
        let payload = reader.read_prefixed()?;

        Some(WillFields {
            topic,
            payload,
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = if username_flag {
        let username = reader.read_prefixed()?;
        if username.is_empty() {
            tracing::error!("The username flag was set but no username was given.");
            return Err(TransportError::BadParameter("empty username"));
        }
        Some(username)
    } else {
        None
    };

    let password = if password_flag {
        let password = reader.read_prefixed()?;
        if password.is_empty() {
            tracing::error!("The password flag was set but no password was given.");
            return Err(TransportError::BadParameter("empty password"));
        }
        Some(password)
    } else {
        None
    };

    Ok(ConnectFields {
        client_id,
        username,
        password,
        keep_alive,
        clean_session,
        will,
    })
}

/// Parses an outbound PUBLISH byte range. The topic is copied into an owned
/// buffer; the payload stays borrowed. Reports `Pending` when the range ends
/// before the declared payload, leaving the payload for a later call.
pub fn parse_publish(buf: &[u8]) -> Result<PublishParse<'_>, TransportError> {
    let mut reader = Reader::new(buf);

    let first_byte = reader.read_u8()?;
    debug_assert_eq!(first_byte & 0xF0, 0x30);
    let flags = first_byte & 0x0F;

    let retain = flags & PUBLISH_FLAG_RETAIN_MASK == PUBLISH_FLAG_RETAIN_MASK;

    // QoS decodes first from bits 1-2; bit 2 then doubles as the dup flag.
    // A QoS field of exactly 2 cannot be honored and is rejected outright.
    let qos = match (flags & PUBLISH_FLAG_QOS_MASK) >> 1 {
        0 => QoS::AtMostOnce,
        2 => {
            tracing::error!("QoS 2 publishes are not supported over the link.");
            return Err(TransportError::BadParameter("QoS 2 publish"));
        }
        _ => QoS::AtLeastOnce,
    };
    let dup = flags & PUBLISH_FLAG_DUP_MASK == PUBLISH_FLAG_DUP_MASK;

    let remaining_length = reader.read_remaining_length()? as usize;
    let variable_header_start = reader.pos();

    // Topic ownership is taken here: when the payload is deferred, the
    // caller's range will not survive until it arrives.
    let topic = Bytes::copy_from_slice(reader.read_prefixed()?);

    let pid = match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce => Some(reader.read_u16()?),
    };

    let variable_header_len = reader.pos() - variable_header_start;
    let payload_len = remaining_length
        .checked_sub(variable_header_len)
        .ok_or(TransportError::Truncated)?;

    let fields = PublishFields {
        dup,
        qos,
        retain,
        pid,
        topic,
    };

    if reader.remaining() < payload_len {
        Ok(PublishParse::Pending {
            fields,
            expected_payload_len: payload_len,
        })
    } else {
        let payload = reader.read_slice(payload_len)?;
        Ok(PublishParse::Complete { fields, payload })
    }
}

/// Parses a SUBSCRIBE or UNSUBSCRIBE packet into its packet identifier and
/// topic-filter list. Entries borrow the input and are consumed by the link
/// encoder before the call returns to the engine.
pub fn parse_subscribe(
    buf: &[u8],
    kind: SubscribeKind,
) -> Result<(u16, Vec<SubscriptionRequest<'_>>), TransportError> {
    let mut reader = Reader::new(buf);

    let _first_byte = reader.read_u8()?;
    let remaining_length = reader.read_remaining_length()? as usize;

    if reader.remaining() < remaining_length {
        return Err(TransportError::Truncated);
    }

    let pid = reader.read_u16()?;

    // The topic filter list spans what is left after the identifier.
    let mut list_remaining = remaining_length
        .checked_sub(2)
        .ok_or(TransportError::Truncated)?;

    let mut requests = Vec::new();

    while list_remaining > 0 {
        if requests.len() == MAX_SUBS_PER_PACKET {
            tracing::error!(
                max = MAX_SUBS_PER_PACKET,
                "Too many topic filters in one subscribe packet."
            );
            return Err(TransportError::BadParameter("too many topic filters"));
        }

        let entry_start = reader.pos();

        let filter = reader.read_prefixed()?;
        let qos = match kind {
            SubscribeKind::Subscribe => qos_from_wire(reader.read_u8()? & 0x03),
            SubscribeKind::Unsubscribe => QoS::AtMostOnce,
        };

        requests.push(SubscriptionRequest { filter, qos });

        let entry_len = reader.pos() - entry_start;
        list_remaining = list_remaining
            .checked_sub(entry_len)
            .ok_or(TransportError::Truncated)?;
    }

    // Topic filters must exist in a subscribe packet, see [MQTT-3.8.3-3].
    if requests.is_empty() {
        tracing::error!("Topic filters must exist in a subscribe packet.");
        return Err(TransportError::BadParameter("no topic filters"));
    }

    Ok((pid, requests))
}

/// Parses an outbound PUBACK (fixed 4-byte ack) into its packet identifier.
pub fn parse_puback(buf: &[u8]) -> Result<u16, TransportError> {
    let mut reader = Reader::new(buf);

    let _first_byte = reader.read_u8()?;
    let remaining_length = reader.read_u8()?;
    if remaining_length != 2 {
        return Err(TransportError::BadParameter("bad puback length"));
    }

    let pid = reader.read_u16()?;
    if pid == 0 {
        tracing::error!("Packet ID cannot be 0.");
        return Err(TransportError::BadParameter("zero packet identifier"));
    }

    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn prefixed(field: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + field.len());
        out.extend_from_slice(&(field.len() as u16).to_be_bytes());
        out.extend_from_slice(field);
        out
    }

    fn connect_packet(flags: u8, level: u8, client_id: &[u8], tail: &[&[u8]]) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.extend_from_slice(&prefixed(b"MQTT"));
        body.put_u8(level);
        body.put_u8(flags);
        body.put_u16(60); // keep-alive
        body.extend_from_slice(&prefixed(client_id));
        for field in tail {
            body.extend_from_slice(&prefixed(field));
        }

        let mut packet = BytesMut::new();
        packet.put_u8(0x10);
        varint::encode(body.len() as u32, &mut packet);
        packet.extend_from_slice(&body);
        packet.to_vec()
    }

    #[test]
    fn connect_minimal() {
        let packet = connect_packet(CLEAN_SESSION_MASK, 4, b"client-1", &[]);
        let fields = parse_connect(&packet).unwrap();

        assert_eq!(fields.client_id, b"client-1");
        assert!(fields.clean_session);
        assert_eq!(fields.keep_alive, 60);
        assert_eq!(fields.username, None);
        assert_eq!(fields.password, None);
        assert_eq!(fields.will, None);
    }

    #[test]
    fn connect_with_will_username_password() {
        let flags = CLEAN_SESSION_MASK
            | WILL_FLAG_MASK
            | (1 << 3) // will QoS 1
            | WILL_RETAIN_MASK
            | USERNAME_MASK
            | PASSWORD_MASK;
        let packet = connect_packet(
            flags,
            4,
            b"client-1",
            &[b"will/topic", b"gone", b"user", b"hunter2"],
        );
        let fields = parse_connect(&packet).unwrap();

        let will = fields.will.expect("will fields");
        assert_eq!(will.topic, b"will/topic");
        assert_eq!(will.payload, b"gone");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
        assert_eq!(fields.username, Some(&b"user"[..]));
        assert_eq!(fields.password, Some(&b"hunter2"[..]));
    }

    #[test]
    fn connect_will_qos2_coerced() {
        let flags = WILL_FLAG_MASK | (2 << 3);
        let packet = connect_packet(flags, 4, b"client-1", &[b"will/topic", b"gone"]);
        let fields = parse_connect(&packet).unwrap();
        assert_eq!(fields.will.unwrap().qos, QoS::AtLeastOnce);
    }

    #[test]
    fn connect_rejects_wrong_protocol_level() {
        let packet = connect_packet(0, 5, b"client-1", &[]);
        assert_eq!(
            parse_connect(&packet),
            Err(TransportError::BadParameter("unsupported protocol level"))
        );
    }

    #[test]
    fn connect_rejects_reserved_flag() {
        let packet = connect_packet(0x01, 4, b"client-1", &[]);
        assert_eq!(
            parse_connect(&packet),
            Err(TransportError::BadParameter("reserved connect flag set"))
        );
    }

    #[test]
    fn connect_rejects_empty_client_id() {
        let packet = connect_packet(CLEAN_SESSION_MASK, 4, b"", &[]);
        assert_eq!(
            parse_connect(&packet),
            Err(TransportError::BadParameter("empty client identifier"))
        );
    }

    #[test]
    fn connect_rejects_flagged_empty_username() {
        let packet = connect_packet(USERNAME_MASK, 4, b"client-1", &[b""]);
        assert_eq!(
            parse_connect(&packet),
            Err(TransportError::BadParameter("empty username"))
        );
    }

    #[test]
    fn connect_rejects_wrong_protocol_name() {
        let mut packet = connect_packet(CLEAN_SESSION_MASK, 4, b"client-1", &[]);
        // Protocol name field sits right after the fixed header.
        packet[4..8].copy_from_slice(b"MQXX");
        assert_eq!(
            parse_connect(&packet),
            Err(TransportError::BadParameter("bad protocol name"))
        );
    }

    #[test]
    fn connect_rejects_flagged_empty_will_topic() {
        let packet = connect_packet(WILL_FLAG_MASK, 4, b"client-1", &[b"", b"gone"]);
        assert_eq!(
            parse_connect(&packet),
            Err(TransportError::BadParameter("empty will topic"))
        );
    }

    #[test]
    fn connect_rejects_flagged_empty_password() {
        let packet = connect_packet(PASSWORD_MASK, 4, b"client-1", &[b""]);
        assert_eq!(
            parse_connect(&packet),
            Err(TransportError::BadParameter("empty password"))
        );
    }

    #[test]
    fn connect_rejects_declared_length_past_range() {
        let mut packet = connect_packet(0, 4, b"client-1", &[]);
        packet.truncate(packet.len() - 3);
        assert_eq!(parse_connect(&packet), Err(TransportError::Truncated));
    }

    #[test]
    fn connect_client_id_may_contain_protocol_name_byte() {
        // 'M' (77) inside earlier fields must not confuse header location.
        let packet = connect_packet(CLEAN_SESSION_MASK, 4, b"MQTT-M-client", &[]);
        let fields = parse_connect(&packet).unwrap();
        assert_eq!(fields.client_id, b"MQTT-M-client");
    }

    fn publish_packet(flags: u8, topic: &[u8], pid: Option<u16>, payload: &[u8]) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.extend_from_slice(&prefixed(topic));
        if let Some(pid) = pid {
            body.put_u16(pid);
        }
        body.extend_from_slice(payload);

        let mut packet = BytesMut::new();
        packet.put_u8(0x30 | flags);
        varint::encode(body.len() as u32, &mut packet);
        packet.extend_from_slice(&body);
        packet.to_vec()
    }

    #[test]
    fn publish_qos0_complete() {
        let packet = publish_packet(0x00, b"a/b", None, b"hello");
        match parse_publish(&packet).unwrap() {
            PublishParse::Complete { fields, payload } => {
                assert_eq!(&fields.topic[..], b"a/b");
                assert_eq!(fields.qos, QoS::AtMostOnce);
                assert_eq!(fields.pid, None);
                assert!(!fields.dup);
                assert!(!fields.retain);
                assert_eq!(payload, b"hello");
            }
            other => panic!("expected complete publish, got {other:?}"),
        }
    }

    #[test]
    fn publish_qos1_retain_complete() {
        let packet = publish_packet(0x03, b"a/b", Some(7), b"payload");
        match parse_publish(&packet).unwrap() {
            PublishParse::Complete { fields, payload } => {
                assert_eq!(fields.qos, QoS::AtLeastOnce);
                assert_eq!(fields.pid, Some(7));
                assert!(fields.retain);
                assert_eq!(payload, b"payload");
            }
            other => panic!("expected complete publish, got {other:?}"),
        }
    }

    #[test]
    fn publish_dup_shares_bit_two_with_qos() {
        // Flags 0b0110: QoS decodes to 1 (bit 1), dup from bit 2.
        let packet = publish_packet(0x06, b"a/b", Some(7), b"x");
        match parse_publish(&packet).unwrap() {
            PublishParse::Complete { fields, .. } => {
                assert_eq!(fields.qos, QoS::AtLeastOnce);
                assert!(fields.dup);
            }
            other => panic!("expected complete publish, got {other:?}"),
        }
    }

    #[test]
    fn publish_rejects_qos2() {
        let packet = publish_packet(0x04, b"a/b", Some(7), b"x");
        assert_eq!(
            parse_publish(&packet),
            Err(TransportError::BadParameter("QoS 2 publish"))
        );
    }

    #[test]
    fn publish_header_without_payload_is_pending() {
        let full = publish_packet(0x02, b"a/b", Some(9), b"late payload");
        let header_only = &full[..full.len() - b"late payload".len()];
        match parse_publish(header_only).unwrap() {
            PublishParse::Pending {
                fields,
                expected_payload_len,
            } => {
                assert_eq!(&fields.topic[..], b"a/b");
                assert_eq!(fields.pid, Some(9));
                assert_eq!(expected_payload_len, b"late payload".len());
            }
            other => panic!("expected pending publish, got {other:?}"),
        }
    }

    #[test]
    fn publish_empty_payload_is_complete() {
        let packet = publish_packet(0x00, b"a/b", None, b"");
        assert!(matches!(
            parse_publish(&packet).unwrap(),
            PublishParse::Complete { payload: b"", .. }
        ));
    }

    #[test]
    fn publish_remaining_length_shorter_than_header_is_truncated() {
        // Declared remaining length of 1 cannot hold the topic field.
        let packet = [0x30, 0x01, 0x00, 0x03, b'a', b'/', b'b'];
        assert_eq!(parse_publish(&packet), Err(TransportError::Truncated));
    }

    fn subscribe_packet(first_byte: u8, pid: u16, entries: &[(&[u8], Option<u8>)]) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u16(pid);
        for (filter, qos) in entries {
            body.extend_from_slice(&prefixed(filter));
            if let Some(qos) = qos {
                body.put_u8(*qos);
            }
        }

        let mut packet = BytesMut::new();
        packet.put_u8(first_byte);
        varint::encode(body.len() as u32, &mut packet);
        packet.extend_from_slice(&body);
        packet.to_vec()
    }

    #[test]
    fn subscribe_multiple_filters_in_order() {
        let packet = subscribe_packet(
            0x82,
            0x1234,
            &[(b"a/b", Some(0)), (b"c/#", Some(1)), (b"d", Some(2))],
        );
        let (pid, requests) = parse_subscribe(&packet, SubscribeKind::Subscribe).unwrap();

        assert_eq!(pid, 0x1234);
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].filter, b"a/b");
        assert_eq!(requests[0].qos, QoS::AtMostOnce);
        assert_eq!(requests[1].filter, b"c/#");
        assert_eq!(requests[1].qos, QoS::AtLeastOnce);
        // Requested QoS 2 coerces to QoS 1.
        assert_eq!(requests[2].filter, b"d");
        assert_eq!(requests[2].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn unsubscribe_filters_have_no_qos_byte() {
        let packet = subscribe_packet(0xA2, 5, &[(b"a/b", None), (b"c", None)]);
        let (pid, requests) = parse_subscribe(&packet, SubscribeKind::Unsubscribe).unwrap();

        assert_eq!(pid, 5);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].filter, b"a/b");
        assert_eq!(requests[1].filter, b"c");
    }

    #[test]
    fn subscribe_without_filters_is_rejected() {
        let packet = subscribe_packet(0x82, 5, &[]);
        assert_eq!(
            parse_subscribe(&packet, SubscribeKind::Subscribe),
            Err(TransportError::BadParameter("no topic filters"))
        );
    }

    #[test]
    fn subscribe_over_capacity_is_rejected() {
        let entries: Vec<(&[u8], Option<u8>)> =
            (0..MAX_SUBS_PER_PACKET + 1).map(|_| (&b"t"[..], Some(0))).collect();
        let packet = subscribe_packet(0x82, 5, &entries);
        assert_eq!(
            parse_subscribe(&packet, SubscribeKind::Subscribe),
            Err(TransportError::BadParameter("too many topic filters"))
        );
    }

    #[test]
    fn subscribe_capacity_checked_before_entry_is_read() {
        // The over-limit entry declares more filter bytes than exist; the
        // bound still wins because it is enforced before the entry is read.
        let mut body = BytesMut::new();
        body.put_u16(5);
        for _ in 0..MAX_SUBS_PER_PACKET {
            body.extend_from_slice(&prefixed(b"t"));
            body.put_u8(0);
        }
        body.put_u16(10);
        body.put_u8(b't');

        let mut packet = BytesMut::new();
        packet.put_u8(0x82);
        varint::encode(body.len() as u32, &mut packet);
        packet.extend_from_slice(&body);

        assert_eq!(
            parse_subscribe(&packet, SubscribeKind::Subscribe),
            Err(TransportError::BadParameter("too many topic filters"))
        );
    }

    #[test]
    fn subscribe_truncated_filter_fails_closed() {
        let mut packet = subscribe_packet(0x82, 5, &[(b"a/long/filter", Some(0))]);
        packet.truncate(packet.len() - 4);
        assert_eq!(
            parse_subscribe(&packet, SubscribeKind::Subscribe),
            Err(TransportError::Truncated)
        );
    }

    #[test]
    fn puback_round_trip() {
        assert_eq!(parse_puback(&[0x40, 0x02, 0x12, 0x34]), Ok(0x1234));
    }

    #[test]
    fn puback_rejects_zero_pid_and_bad_length() {
        assert_eq!(
            parse_puback(&[0x40, 0x02, 0x00, 0x00]),
            Err(TransportError::BadParameter("zero packet identifier"))
        );
        assert_eq!(
            parse_puback(&[0x40, 0x03, 0x12, 0x34]),
            Err(TransportError::BadParameter("bad puback length"))
        );
        assert_eq!(parse_puback(&[0x40, 0x02]), Err(TransportError::Truncated));
    }
}
