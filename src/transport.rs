//! The transcoding dispatcher: routes canonical MQTT byte ranges from the
//! engine out to the link codec, and inbound link frames back into canonical
//! MQTT bytes queued in the reassembly buffer.

use crate::buffer::ReassemblyBuffer;
use crate::codec::{
    parse, serialize, PacketType, PublishFields, PublishParse, SubscribeKind, TransportError,
};
use crate::link::{Channel, LinkCodec};
use bytes::Bytes;
use std::sync::Mutex;
use std::time::Duration;

/// Tuning knobs for one transport context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Capacity of the reassembly buffer in bytes.
    pub buffer_capacity: usize,
    /// Bound on every blocking point: reassembly-buffer pushes and pops.
    pub transfer_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            transfer_timeout: Duration::from_millis(1000),
        }
    }
}

/// Continuation slot for an outbound PUBLISH whose payload has not arrived
/// yet. A second concurrent pending publish is unrepresentable.
#[derive(Debug)]
enum PublishState {
    Idle,
    AwaitingPayload {
        fields: PublishFields,
        expected_payload_len: usize,
    },
}

/// Per-link transcoder context. The engine side calls `send`/`receive`; the
/// link runtime calls `on_channel_data` from its callback context. The
/// reassembly buffer is the only state shared between the two paths; the
/// continuation slot is touched by the outbound path alone, behind an
/// uncontended lock.
pub struct MqttLinkTransport<C, S> {
    channel: C,
    codec: S,
    buffer: ReassemblyBuffer,
    publish_state: Mutex<PublishState>,
    transfer_timeout: Duration,
}

impl<C: Channel, S: LinkCodec> MqttLinkTransport<C, S> {
    pub fn new(channel: C, codec: S) -> Self {
        Self::with_config(channel, codec, TransportConfig::default())
    }

    pub fn with_config(channel: C, codec: S, config: TransportConfig) -> Self {
        Self {
            channel,
            codec,
            buffer: ReassemblyBuffer::new(config.buffer_capacity),
            publish_state: Mutex::new(PublishState::Idle),
            transfer_timeout: config.transfer_timeout,
        }
    }

    /// Transport-interface write. Returns the number of input bytes
    /// forwarded; 0 on any failure (the diagnostic carries the detail) and
    /// 0 while a split publish is still waiting for its payload.
    pub fn send(&self, buf: &[u8]) -> usize {
        match self.try_send(buf) {
            Ok(consumed) => consumed,
            Err(err) => {
                tracing::error!(%err, "no data was forwarded to the channel");
                0
            }
        }
    }

    /// Like [`send`](Self::send), but surfaces the error.
    pub fn try_send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.publish_state.lock().unwrap();

        // A pending publish claims every byte of the next call, whatever its
        // first byte happens to look like.
        if matches!(*state, PublishState::AwaitingPayload { .. }) {
            return self.finish_pending_publish(&mut state, buf);
        }

        let first_byte = *buf.first().ok_or(TransportError::Truncated)?;
        let packet_type = PacketType::from_fixed_header_byte(first_byte)?;

        let frame = match packet_type {
            PacketType::Connect => {
                tracing::debug!("processing outgoing CONNECT");
                let connect = parse::parse_connect(buf)?;
                self.codec.serialize_connect(&connect)?
            }
            PacketType::Publish => {
                tracing::debug!("processing outgoing PUBLISH");
                match parse::parse_publish(buf)? {
                    PublishParse::Complete { fields, payload } => {
                        self.codec.serialize_publish(&fields, payload)?
                    }
                    PublishParse::Pending {
                        fields,
                        expected_payload_len,
                    } => {
                        *state = PublishState::AwaitingPayload {
                            fields,
                            expected_payload_len,
                        };
                        return Ok(0);
                    }
                }
            }
            PacketType::Puback => {
                tracing::debug!("processing outgoing PUBACK");
                let pid = parse::parse_puback(buf)?;
                self.codec.serialize_puback(pid)?
            }
            PacketType::Subscribe => {
                tracing::debug!("processing outgoing SUBSCRIBE");
                let (pid, requests) = parse::parse_subscribe(buf, SubscribeKind::Subscribe)?;
                self.codec.serialize_subscribe(pid, &requests)?
            }
            PacketType::Unsubscribe => {
                tracing::debug!("processing outgoing UNSUBSCRIBE");
                let (pid, requests) = parse::parse_subscribe(buf, SubscribeKind::Unsubscribe)?;
                self.codec.serialize_unsubscribe(pid, &requests)?
            }
            PacketType::Pingreq => {
                tracing::debug!("processing outgoing PINGREQ");
                self.codec.serialize_pingreq()?
            }
            PacketType::Disconnect => {
                tracing::debug!("processing outgoing DISCONNECT");
                self.codec.serialize_disconnect()?
            }
            PacketType::Pubrec | PacketType::Pubrel | PacketType::Pubcomp => {
                tracing::error!("only QoS 0 and 1 are supported over the link");
                return Err(TransportError::SendFailed);
            }
            PacketType::Connack
            | PacketType::Suback
            | PacketType::Unsuback
            | PacketType::Pingresp => {
                tracing::error!(?packet_type, "a server to client only packet was sent");
                return Err(TransportError::BadParameter("server to client only packet"));
            }
        };
        drop(state);

        self.send_frame(frame)?;
        Ok(buf.len())
    }

    /// Second half of a split publish: the call is, by contract with the
    /// engine, exactly the deferred payload.
    fn finish_pending_publish(
        &self,
        state: &mut PublishState,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        let PublishState::AwaitingPayload {
            fields,
            expected_payload_len,
        } = std::mem::replace(state, PublishState::Idle)
        else {
            unreachable!("checked by caller");
        };

        assert_eq!(
            payload.len(),
            expected_payload_len,
            "engine delivered a split publish payload of the wrong length"
        );

        let frame = self.codec.serialize_publish(&fields, payload)?;
        self.send_frame(frame)?;
        Ok(payload.len())
    }

    fn send_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        let sent = self.channel.send(&frame)?;
        if sent != frame.len() {
            tracing::error!(
                expected = frame.len(),
                sent,
                "could not send the whole frame through the channel"
            );
            return Err(TransportError::SendFailed);
        }
        Ok(())
    }

    /// Transport-interface read: a bounded-wait pop from the reassembly
    /// buffer. May return fewer bytes than requested; 0 on timeout.
    pub fn receive(&self, buf: &mut [u8]) -> usize {
        self.buffer.pop(buf, self.transfer_timeout)
    }

    /// Inbound entry point, invoked by the link runtime whenever the channel
    /// holds a complete frame. Translates the frame to canonical MQTT bytes,
    /// commits them to the reassembly buffer, and only then consumes the
    /// frame from the channel, so a failed push leaves the channel data
    /// available for diagnostics.
    pub fn on_channel_data(&self) -> Result<(), TransportError> {
        let frame = self.channel.peek()?;
        let packet_type = self.codec.packet_type(&frame)?;

        let result = self.translate_inbound(packet_type, &frame);
        match result {
            Ok(()) => self.channel.consume(frame.len()),
            Err(err) => {
                tracing::error!(
                    %err,
                    ?packet_type,
                    "error receiving data from the channel, no data was recorded"
                );
                Err(err)
            }
        }
    }

    fn translate_inbound(
        &self,
        packet_type: PacketType,
        frame: &[u8],
    ) -> Result<(), TransportError> {
        let timeout = self.transfer_timeout;
        match packet_type {
            PacketType::Connack => {
                tracing::debug!("processing incoming CONNACK from channel");
                self.codec.deserialize_connack(frame)?;
                // Packet ID is not used in connack.
                let ack = serialize::ack(PacketType::Connack, 0)?;
                self.buffer.push(&ack, timeout)
            }
            PacketType::Puback => {
                tracing::debug!("processing incoming PUBACK from channel");
                let pid = self.codec.deserialize_puback(frame)?;
                let ack = serialize::ack(PacketType::Puback, pid)?;
                self.buffer.push(&ack, timeout)
            }
            PacketType::Publish => {
                tracing::debug!("processing incoming PUBLISH from channel");
                let publish = self.codec.deserialize_publish(frame)?;
                let bytes = serialize::publish(&publish.fields, &publish.payload)?;
                self.buffer.push(&bytes, timeout)
            }
            PacketType::Suback => {
                tracing::debug!("processing incoming SUBACK from channel");
                let pid = self.codec.deserialize_suback(frame)?;
                let ack = serialize::suback(pid)?;
                self.buffer.push(&ack, timeout)
            }
            PacketType::Unsuback => {
                tracing::debug!("processing incoming UNSUBACK from channel");
                let pid = self.codec.deserialize_unsuback(frame)?;
                let ack = serialize::ack(PacketType::Unsuback, pid)?;
                self.buffer.push(&ack, timeout)
            }
            PacketType::Pingresp => {
                tracing::debug!("processing incoming PINGRESP from channel");
                self.codec.deserialize_pingresp(frame)?;
                self.buffer.push(&serialize::pingresp(), timeout)
            }
            PacketType::Pubrec | PacketType::Pubrel | PacketType::Pubcomp => {
                tracing::error!("only QoS 0 and 1 are supported over the link");
                Err(TransportError::RecvFailed)
            }
            PacketType::Connect
            | PacketType::Subscribe
            | PacketType::Unsubscribe
            | PacketType::Pingreq
            | PacketType::Disconnect => {
                tracing::error!(?packet_type, "received a client to server only packet");
                Err(TransportError::BadParameter("client to server only packet"))
            }
        }
    }

    #[cfg(test)]
    fn publish_pending(&self) -> bool {
        matches!(
            *self.publish_state.lock().unwrap(),
            PublishState::AwaitingPayload { .. }
        )
    }
}
