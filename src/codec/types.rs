use bytes::Bytes;
use num_enum::TryFromPrimitive;

/// Errors produced while translating between canonical MQTT bytes and the
/// link's compact frames. Collaborator codec and channel implementations
/// report through the same set.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("malformed packet: {0}")]
    BadParameter(&'static str),
    #[error("packet data ends before the declared length")]
    Truncated,
    #[error("remaining length field exceeds the four byte maximum")]
    InvalidLength,
    #[error("packet type cannot be sent from the client side of the link")]
    SendFailed,
    #[error("packet type cannot be accepted from the server side of the link")]
    RecvFailed,
    #[error("out of buffer space")]
    NoMemory,
    #[error("timed out waiting on the link")]
    Timeout,
}

/// Delivery guarantee level. QoS 2 is unsupported end-to-end, so it is not
/// representable here; wire values of 2 are either rejected (PUBLISH) or
/// coerced to QoS 1 (CONNECT will, SUBSCRIBE options) at the parse boundary.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

/// The closed set of MQTT 3.1.1 control packet types, keyed by the high
/// nibble of the fixed header's first byte.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Pubrec = 5,
    Pubrel = 6,
    Pubcomp = 7,
    Subscribe = 8,
    Suback = 9,
    Unsubscribe = 10,
    Unsuback = 11,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// The fixed-header type byte with flag bits clear, e.g. CONNECT = 0x10.
    pub fn to_fixed_header_byte(self) -> u8 {
        (self as u8) << 4
    }

    /// Extracts the packet type from the first byte of a fixed header.
    pub fn from_fixed_header_byte(byte: u8) -> Result<Self, TransportError> {
        Self::try_from(byte >> 4).map_err(|_| TransportError::BadParameter("unknown packet type"))
    }
}

/// Fields parsed out of a CONNECT packet. All slices borrow the caller's
/// input buffer and must not outlive the parse-then-encode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFields<'a> {
    pub client_id: &'a [u8],
    pub username: Option<&'a [u8]>,
    pub password: Option<&'a [u8]>,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<WillFields<'a>>,
}

/// Last-will message carried inside CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillFields<'a> {
    pub topic: &'a [u8],
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

/// Header fields of a PUBLISH. The topic is an owned copy: when the payload
/// is deferred to a later send call, the input range the topic was parsed
/// from is no longer valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFields {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub pid: Option<u16>,
    pub topic: Bytes,
}

/// Result of parsing an outbound PUBLISH byte range.
#[derive(Debug, PartialEq, Eq)]
pub enum PublishParse<'a> {
    /// The whole packet, payload included, was present in the range.
    Complete {
        fields: PublishFields,
        payload: &'a [u8],
    },
    /// Header and topic were present but the payload was not; it arrives in
    /// a later send call of exactly `expected_payload_len` bytes.
    Pending {
        fields: PublishFields,
        expected_payload_len: usize,
    },
}

/// One topic filter requested by a SUBSCRIBE or UNSUBSCRIBE packet. The
/// filter borrows the input buffer. UNSUBSCRIBE entries carry no requested
/// QoS; the field is left at `AtMostOnce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest<'a> {
    pub filter: &'a [u8],
    pub qos: QoS,
}

/// A PUBLISH decoded from an inbound link frame, ready for re-encoding into
/// canonical MQTT bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPublish {
    pub fields: PublishFields,
    pub payload: Bytes,
}

/// Converts a 2-bit wire QoS value, coercing unsupported levels to QoS 1
/// with a diagnostic. Used where the protocol allows the field but the link
/// cannot honor it (CONNECT will, SUBSCRIBE options).
pub(crate) fn qos_from_wire(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => {
            tracing::warn!(value, "QoS 2 is not supported over the link, defaulting to QoS 1");
            QoS::AtLeastOnce
        }
    }
}
