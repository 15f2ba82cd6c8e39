//! Collaborator seams: the physical channel and the link-specific codec that
//! converts between semantic packet fields and the compact wire format
//! exchanged over it. Both are supplied by the link runtime; their internals
//! are out of scope here.

use crate::codec::{
    ConnectFields, InboundPublish, PacketType, PublishFields, SubscriptionRequest, TransportError,
};
use bytes::Bytes;

/// A message-oriented channel that delivers whole frames. Implementations
/// are called from both the engine thread (send) and the link's callback
/// context (peek/consume) and must synchronize internally.
pub trait Channel {
    /// Sends one encoded frame, returning the number of bytes the channel
    /// accepted.
    fn send(&self, frame: &[u8]) -> Result<usize, TransportError>;

    /// A zero-copy snapshot of the frame currently waiting in the channel's
    /// receive buffer, without consuming it.
    fn peek(&self) -> Result<Bytes, TransportError>;

    /// Discards `len` consumed bytes from the channel's receive buffer.
    /// Called only after the frame's translation has been committed to the
    /// reassembly buffer.
    fn consume(&self, len: usize) -> Result<(), TransportError>;
}

/// The link-specific serializer/deserializer. The transcoder hands it
/// already-parsed semantic structures and trusts it to produce and consume
/// the compact wire format.
pub trait LinkCodec {
    fn serialize_connect(&self, connect: &ConnectFields<'_>) -> Result<Bytes, TransportError>;

    fn serialize_publish(
        &self,
        publish: &PublishFields,
        payload: &[u8],
    ) -> Result<Bytes, TransportError>;

    fn serialize_puback(&self, pid: u16) -> Result<Bytes, TransportError>;

    fn serialize_subscribe(
        &self,
        pid: u16,
        requests: &[SubscriptionRequest<'_>],
    ) -> Result<Bytes, TransportError>;

    fn serialize_unsubscribe(
        &self,
        pid: u16,
        requests: &[SubscriptionRequest<'_>],
    ) -> Result<Bytes, TransportError>;

    fn serialize_pingreq(&self) -> Result<Bytes, TransportError>;

    fn serialize_disconnect(&self) -> Result<Bytes, TransportError>;

    /// The MQTT packet type announced by an inbound frame.
    fn packet_type(&self, frame: &[u8]) -> Result<PacketType, TransportError>;

    fn deserialize_connack(&self, frame: &[u8]) -> Result<(), TransportError>;

    fn deserialize_puback(&self, frame: &[u8]) -> Result<u16, TransportError>;

    fn deserialize_publish(&self, frame: &[u8]) -> Result<InboundPublish, TransportError>;

    fn deserialize_suback(&self, frame: &[u8]) -> Result<u16, TransportError>;

    fn deserialize_unsuback(&self, frame: &[u8]) -> Result<u16, TransportError>;

    fn deserialize_pingresp(&self, frame: &[u8]) -> Result<(), TransportError>;
}
