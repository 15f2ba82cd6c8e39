//! linkmq bridges a byte-stream MQTT 3.1.1 client engine onto a
//! message-oriented, capacity-limited wireless link.
//!
//! The engine writes canonical MQTT bytes through [`MqttLinkTransport::send`]
//! and drains canonical MQTT bytes through [`MqttLinkTransport::receive`]; in
//! between, the transport parses the semantic fields out of each control
//! packet, hands them to a link-specific [`LinkCodec`] for the compact wire
//! format, and exchanges whole frames over a [`Channel`]. Only QoS 0 and 1
//! are supported over the link; QoS 2 traffic is rejected in both directions.

mod buffer;
mod codec;
mod link;
mod transport;

pub use buffer::ReassemblyBuffer;
pub use codec::{
    parse, serialize, varint, ConnectFields, InboundPublish, PacketType, PublishFields,
    PublishParse, QoS, SubscribeKind, SubscriptionRequest, TransportError, WillFields,
    MAX_SUBS_PER_PACKET,
};
pub use link::{Channel, LinkCodec};
pub use transport::{MqttLinkTransport, TransportConfig};
