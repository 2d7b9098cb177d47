//! Envelope, payload and reschedule metadata, with their wire format.
//!
//! ```text
//! envelope: destination u32 | kind u8 | type_tag u32 | entity u64 |
//!           bytes (u32 len + bytes) | has_target u8 [| target coord] |
//!           field i32 (-1 = none) | ordering i32 | time f64 |
//!           interval f64 | hops u8
//! coord:    dims u32 | i32 × dims
//! batch:    count u32 | envelope × count
//! ```

use tessera_core::{ByteReader, ByteWriter, CodecError, Coord, EntityId, FieldId, PartitionId, Wire};

/// What a payload carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// A passive object placed into a field cell on arrival.
    Object,
    /// An agent stepped once after arrival.
    OneShotAgent,
    /// An agent stepped repeatedly after arrival.
    RepeatingAgent,
}

impl PayloadKind {
    /// True for either agent kind.
    pub fn is_agent(self) -> bool {
        !matches!(self, PayloadKind::Object)
    }

    fn tag(self) -> u8 {
        match self {
            PayloadKind::Object => 0,
            PayloadKind::OneShotAgent => 1,
            PayloadKind::RepeatingAgent => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(PayloadKind::Object),
            1 => Ok(PayloadKind::OneShotAgent),
            2 => Ok(PayloadKind::RepeatingAgent),
            other => Err(CodecError::InvalidTag {
                what: "payload kind",
                value: u32::from(other),
            }),
        }
    }
}

/// The moved thing, already encoded by its owner.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    /// Agent or object.
    pub kind: PayloadKind,
    /// Selects the decoder on the receiving side.
    pub type_tag: u32,
    /// Stable identity across moves.
    pub entity: EntityId,
    /// Encoded state.
    pub bytes: Vec<u8>,
}

/// How to schedule an agent on arrival.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reschedule {
    /// Tie-break among agents due at the same time; lower first.
    pub ordering: i32,
    /// Absolute time of the next step. Negative means as soon as
    /// possible.
    pub time: f64,
    /// Steps between repeats. Zero or negative means one-shot.
    pub interval: f64,
}

impl Reschedule {
    /// Step once, as soon as possible.
    pub const ASAP: Reschedule = Reschedule {
        ordering: 0,
        time: -1.0,
        interval: 0.0,
    };

    /// Step every `interval` ticks, starting as soon as possible.
    pub fn repeating(interval: f64) -> Self {
        Self {
            interval,
            ..Self::ASAP
        }
    }

    /// True if the agent repeats.
    pub fn is_repeating(&self) -> bool {
        self.interval > 0.0
    }
}

impl Default for Reschedule {
    fn default() -> Self {
        Self::ASAP
    }
}

/// A payload in transit.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Final partition.
    pub destination: PartitionId,
    /// What is moving.
    pub payload: Payload,
    /// Coordinate to place the payload at on arrival.
    pub target: Option<Coord>,
    /// Field to place an object into on arrival.
    pub field: Option<FieldId>,
    /// Scheduling on arrival (agents only).
    pub reschedule: Reschedule,
    /// Exchanges travelled so far.
    pub hops: u8,
}

impl Envelope {
    /// An agent envelope bound for `destination`, arriving at `target`.
    pub fn agent(
        destination: PartitionId,
        entity: EntityId,
        type_tag: u32,
        bytes: Vec<u8>,
        target: Coord,
        reschedule: Reschedule,
    ) -> Self {
        let kind = if reschedule.is_repeating() {
            PayloadKind::RepeatingAgent
        } else {
            PayloadKind::OneShotAgent
        };
        Self {
            destination,
            payload: Payload {
                kind,
                type_tag,
                entity,
                bytes,
            },
            target: Some(target),
            field: None,
            reschedule,
            hops: 0,
        }
    }

    /// An object envelope placed into `field` at `target` on arrival.
    pub fn object(
        destination: PartitionId,
        entity: EntityId,
        type_tag: u32,
        bytes: Vec<u8>,
        field: FieldId,
        target: Coord,
    ) -> Self {
        Self {
            destination,
            payload: Payload {
                kind: PayloadKind::Object,
                type_tag,
                entity,
                bytes,
            },
            target: Some(target),
            field: Some(field),
            reschedule: Reschedule::default(),
            hops: 0,
        }
    }

    /// The moved entity.
    pub fn entity(&self) -> EntityId {
        self.payload.entity
    }
}

impl Wire for Envelope {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.destination.0);
        w.write_u8(self.payload.kind.tag());
        w.write_u32_le(self.payload.type_tag);
        w.write_u64_le(self.payload.entity.raw());
        w.write_length_prefixed_bytes(&self.payload.bytes);
        match &self.target {
            Some(t) => {
                w.write_u8(1);
                t.encode(w);
            }
            None => w.write_u8(0),
        }
        w.write_i32_le(self.field.map_or(-1, |f| f.0 as i32));
        w.write_i32_le(self.reschedule.ordering);
        w.write_f64_le(self.reschedule.time);
        w.write_f64_le(self.reschedule.interval);
        w.write_u8(self.hops);
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let destination = PartitionId(r.read_u32_le()?);
        let kind = PayloadKind::from_tag(r.read_u8()?)?;
        let type_tag = r.read_u32_le()?;
        let entity = EntityId::from_raw(r.read_u64_le()?);
        let bytes = r.read_length_prefixed_bytes()?.to_vec();
        let target = match r.read_u8()? {
            0 => None,
            1 => Some(Coord::decode(r)?),
            other => {
                return Err(CodecError::InvalidTag {
                    what: "has_target",
                    value: u32::from(other),
                })
            }
        };
        let field = match r.read_i32_le()? {
            -1 => None,
            f if f >= 0 => Some(FieldId(f as u32)),
            other => {
                return Err(CodecError::InvalidTag {
                    what: "field",
                    value: other as u32,
                })
            }
        };
        let reschedule = Reschedule {
            ordering: r.read_i32_le()?,
            time: r.read_f64_le()?,
            interval: r.read_f64_le()?,
        };
        let hops = r.read_u8()?;
        Ok(Self {
            destination,
            payload: Payload {
                kind,
                type_tag,
                entity,
                bytes,
            },
            target,
            field,
            reschedule,
            hops,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::codec::{from_bytes, to_bytes};

    fn sample() -> Envelope {
        Envelope::agent(
            PartitionId(3),
            EntityId::new(1, 9),
            7,
            vec![1, 2, 3],
            Coord::from_slice(&[51, 50]),
            Reschedule::repeating(2.0),
        )
    }

    #[test]
    fn layout_is_little_endian_and_fixed() {
        let bytes = to_bytes(&sample());
        assert_eq!(&bytes[0..4], &[3, 0, 0, 0]);
        assert_eq!(bytes[4], 2, "repeating agent tag");
        assert_eq!(&bytes[5..9], &[7, 0, 0, 0]);
        assert_eq!(&bytes[9..17], &EntityId::new(1, 9).raw().to_le_bytes());
        // 4 + 1 + 4 + 8 + (4 + 3) + (1 + 4 + 8) + 4 + 4 + 8 + 8 + 1
        assert_eq!(bytes.len(), 62);
        assert_eq!(*bytes.last().unwrap(), 0, "hops");
    }

    #[test]
    fn batch_decodes_in_order() {
        let mut obj = Envelope::object(
            PartitionId(0),
            EntityId::new(2, 0),
            1,
            to_bytes(&5u32),
            FieldId(4),
            Coord::from_slice(&[0, 0]),
        );
        obj.hops = 3;
        let batch = vec![sample(), obj.clone()];
        let back: Vec<Envelope> = from_bytes(&to_bytes(&batch)).unwrap();
        assert_eq!(back, batch);
        assert_eq!(back[1].field, Some(FieldId(4)));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut bytes = to_bytes(&sample());
        bytes[4] = 9;
        match from_bytes::<Envelope>(&bytes) {
            Err(CodecError::InvalidTag { what: "payload kind", value: 9 }) => {}
            other => panic!("expected InvalidTag, got {other:?}"),
        }
    }

    #[test]
    fn truncated_batch_is_rejected() {
        let bytes = to_bytes(&vec![sample()]);
        assert!(from_bytes::<Vec<Envelope>>(&bytes[..bytes.len() - 1]).is_err());
    }
}
