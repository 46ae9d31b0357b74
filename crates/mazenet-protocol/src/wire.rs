//! The [`Protocol`] bundle: registry + codec, turning typed messages into
//! outbound frames and inbound bytes back into envelopes.

use std::sync::Arc;

use mazenet_transport::Frame;

use crate::{
    BincodeCodec, Binding, ClockPing, Codec, Dead, DisplayName,
    EntityAssigned, Envelope, Handshake, HandshakeAccepted, HandshakeRejected,
    Health, IdentityAnnounce, MapData, MoveIntent, Position, ProtocolError,
    RegistryError, ReplicationBatch, SerializationRegistry, ServerTime,
    WireType,
};

/// Every binding of the closed message and component set.
pub fn standard_bindings() -> Vec<Binding> {
    vec![
        Binding::self_describing::<Handshake>(),
        Binding::self_describing::<HandshakeAccepted>(),
        Binding::self_describing::<HandshakeRejected>(),
        Binding::self_describing::<IdentityAnnounce>(),
        Binding::self_describing::<EntityAssigned>(),
        Binding::self_describing::<ClockPing>(),
        Binding::self_describing::<ServerTime>(),
        Binding::self_describing::<MapData>(),
        Binding::self_describing::<MoveIntent>(),
        Binding::self_describing::<ReplicationBatch>(),
        Binding::plain_fields::<Position>(),
        Binding::plain_fields::<DisplayName>(),
        Binding::plain_fields::<Health>(),
        Binding::plain_fields::<Dead>(),
    ]
}

/// The registry and envelope codec, shared by every connection.
#[derive(Debug)]
pub struct Protocol<C: Codec = BincodeCodec> {
    registry: Arc<SerializationRegistry>,
    codec: C,
}

impl Protocol {
    /// Builds the registry for the full message and component set.
    ///
    /// # Errors
    /// [`RegistryError`] if the binding list is inconsistent. Callers
    /// treat this as fatal.
    pub fn standard() -> Result<Self, RegistryError> {
        let mut registry = SerializationRegistry::new();
        registry.register_batch(standard_bindings())?;
        Ok(Self::with_registry(Arc::new(registry), BincodeCodec))
    }
}

impl<C: Codec> Protocol<C> {
    pub fn with_registry(registry: Arc<SerializationRegistry>, codec: C) -> Self {
        Self { registry, codec }
    }

    pub fn registry(&self) -> &Arc<SerializationRegistry> {
        &self.registry
    }

    /// Wraps a typed message in an envelope on its declared channel.
    pub fn envelope<T: WireType>(
        &self,
        seq: u64,
        message: &T,
    ) -> Result<Envelope, ProtocolError> {
        Ok(Envelope {
            seq,
            channel: T::CHANNEL,
            tag: T::TAG,
            body: self.registry.encode(message)?,
        })
    }

    /// Encodes a typed message as a ready-to-queue frame. Lane and delivery
    /// come from the type.
    pub fn frame<T: WireType>(
        &self,
        seq: u64,
        message: &T,
    ) -> Result<Frame, ProtocolError> {
        let envelope = self.envelope(seq, message)?;
        Ok(Frame {
            lane: T::CHANNEL.into(),
            delivery: T::DELIVERY,
            bytes: self.codec.encode(&envelope)?,
        })
    }

    /// Decodes the envelope of one inbound frame. The body stays encoded.
    pub fn open(&self, bytes: &[u8]) -> Result<Envelope, ProtocolError> {
        self.codec.decode(bytes)
    }

    /// Opens a frame and decodes its body as `T`.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] if the frame carries another type.
    pub fn open_as<T: WireType>(&self, bytes: &[u8]) -> Result<T, ProtocolError> {
        let envelope = self.open(bytes)?;
        if envelope.tag != T::TAG {
            return Err(ProtocolError::InvalidMessage(format!(
                "expected {} ({}), got {}",
                T::NAME,
                T::TAG,
                envelope.tag
            )));
        }
        self.registry.decode_as(&envelope.body)
    }
}

#[cfg(test)]
mod tests {
    use mazenet_transport::{Delivery, Lane};

    use super::*;
    use crate::{Channel, ComponentBlob, EntityId, EntityState, Strategy};

    #[test]
    fn test_standard_registers_every_type() {
        let protocol = Protocol::standard().unwrap();
        let registry = protocol.registry();

        assert_eq!(registry.len(), standard_bindings().len());
        assert_eq!(
            registry.strategy_of(Position::TAG),
            Some(Strategy::PlainFields)
        );
        assert_eq!(
            registry.strategy_of(MapData::TAG),
            Some(Strategy::SelfDescribing)
        );
    }

    #[test]
    fn test_registering_standard_set_twice_fails_whole_batch() {
        let mut registry = SerializationRegistry::new();
        registry.register_batch(standard_bindings()).unwrap();

        let result = registry.register_batch(standard_bindings());

        match result {
            Err(RegistryError::PartialFailure { failed }) => {
                assert_eq!(failed.len(), standard_bindings().len());
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }
        assert_eq!(registry.len(), standard_bindings().len());
    }

    #[test]
    fn test_frame_takes_lane_from_type() {
        let protocol = Protocol::standard().unwrap();

        let control = protocol
            .frame(1, &ServerTime { server_time: 10 })
            .unwrap();
        let batch = protocol
            .frame(
                7,
                &ReplicationBatch {
                    tick: 7,
                    server_time: 350,
                    full: false,
                    entities: vec![],
                    removed: vec![EntityId(3)],
                },
            )
            .unwrap();

        assert_eq!(control.lane, Lane::Control);
        assert_eq!(control.delivery, Delivery::Reliable);
        assert_eq!(batch.lane, Lane::Replication);
    }

    #[test]
    fn test_open_reads_back_envelope() {
        let protocol = Protocol::standard().unwrap();
        let frame = protocol
            .frame(
                4,
                &IdentityAnnounce {
                    name: "Alice".into(),
                },
            )
            .unwrap();

        let envelope = protocol.open(&frame.bytes).unwrap();

        assert_eq!(envelope.seq, 4);
        assert_eq!(envelope.channel, Channel::Control);
        assert_eq!(envelope.tag, IdentityAnnounce::TAG);
    }

    #[test]
    fn test_open_as_wrong_type_returns_invalid_message() {
        let protocol = Protocol::standard().unwrap();
        let frame = protocol.frame(1, &Handshake { version: 1 }).unwrap();

        let result = protocol.open_as::<HandshakeAccepted>(&frame.bytes);

        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_replication_batch_carries_plain_field_components() {
        let protocol = Protocol::standard().unwrap();
        let registry = protocol.registry();
        let position = Position { x: 2, y: 5 };
        let batch = ReplicationBatch {
            tick: 1,
            server_time: 50,
            full: true,
            entities: vec![EntityState {
                entity: EntityId(1),
                components: vec![ComponentBlob {
                    tag: Position::TAG,
                    body: registry.encode(&position).unwrap(),
                }],
            }],
            removed: vec![],
        };

        let frame = protocol.frame(1, &batch).unwrap();
        let back: ReplicationBatch = protocol.open_as(&frame.bytes).unwrap();
        let blob = &back.entities[0].components[0];
        let decoded: Position = registry.decode_as(&blob.body).unwrap();

        assert_eq!(decoded, position);
    }
}
