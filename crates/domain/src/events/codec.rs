//! Binary wire codec for domain events.
//!
//! Layout: `[tag: u8][schema_version: u8][bincode body]`. The body uses
//! fixed-width integers and rejects trailing bytes, so a truncated payload
//! (missing field) or an oversized one fails instead of defaulting.

use bincode::Options;
use thiserror::Error;

use super::DomainEvent;

const HEADER_LEN: usize = 2;

/// Errors produced while encoding or decoding an event payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload shorter than the header.
    #[error("Payload too short: {len} bytes")]
    Truncated { len: usize },

    /// Payload carries another event type.
    #[error("Unexpected event tag for {event_type}: expected {expected}, found {actual}")]
    UnexpectedTag {
        event_type: &'static str,
        expected: u8,
        actual: u8,
    },

    /// Schema version this build does not understand.
    #[error("Unsupported schema version {version} for {event_type}")]
    UnsupportedVersion {
        event_type: &'static str,
        version: u8,
    },

    /// The body could not be encoded or decoded.
    #[error("Malformed event body: {0}")]
    Malformed(#[from] bincode::Error),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encodes an event into its wire representation.
pub fn encode_event<E: DomainEvent>(event: &E) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![E::TAG, E::SCHEMA_VERSION];
    options().serialize_into(&mut buf, event)?;
    Ok(buf)
}

/// Decodes an event from its wire representation.
pub fn decode_event<E: DomainEvent>(bytes: &[u8]) -> Result<E, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated { len: bytes.len() });
    }

    let (tag, version) = (bytes[0], bytes[1]);
    if tag != E::TAG {
        return Err(CodecError::UnexpectedTag {
            event_type: E::EVENT_TYPE,
            expected: E::TAG,
            actual: tag,
        });
    }
    if version != E::SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion {
            event_type: E::EVENT_TYPE,
            version,
        });
    }

    Ok(options().deserialize(&bytes[HEADER_LEN..])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OrderPaid, PaymentDetails, PaymentMethod, ShipAssembled};
    use common::{OrderId, TransactionId, UserId};

    fn order_paid() -> OrderPaid {
        OrderPaid::new(
            OrderId::new(),
            UserId::new(),
            PaymentDetails {
                method: PaymentMethod::InvestorMoney,
                transaction_id: TransactionId::new(),
            },
        )
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let event = order_paid();
        let bytes = encode_event(&event).unwrap();
        assert_eq!(&bytes[..2], &[OrderPaid::TAG, OrderPaid::SCHEMA_VERSION]);

        let decoded: OrderPaid = decode_event(&bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_truncated_body_fails() {
        let bytes = encode_event(&ShipAssembled::new(OrderId::new(), UserId::new(), 7)).unwrap();

        // Drop the trailing build_time field.
        let result = decode_event::<ShipAssembled>(&bytes[..bytes.len() - 8]);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_trailing_bytes_fail() {
        let mut bytes = encode_event(&order_paid()).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_event::<OrderPaid>(&bytes),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_event_type_fails() {
        let bytes = encode_event(&order_paid()).unwrap();
        assert!(matches!(
            decode_event::<ShipAssembled>(&bytes),
            Err(CodecError::UnexpectedTag {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_schema_version_fails() {
        let mut bytes = encode_event(&order_paid()).unwrap();
        bytes[1] = 99;
        assert!(matches!(
            decode_event::<OrderPaid>(&bytes),
            Err(CodecError::UnsupportedVersion { version: 99, .. })
        ));
    }

    #[test]
    fn test_short_or_empty_payload_fails() {
        assert!(matches!(
            decode_event::<OrderPaid>(&[]),
            Err(CodecError::Truncated { len: 0 })
        ));
        assert!(matches!(
            decode_event::<OrderPaid>(&[OrderPaid::TAG]),
            Err(CodecError::Truncated { len: 1 })
        ));
    }

    #[test]
    fn test_unknown_payment_method_variant_fails() {
        let event = order_paid();
        let mut bytes = encode_event(&event).unwrap();
        // Body: event_id, order_id, user_id (8-byte length + 16 bytes each),
        // then the u32 payment method variant index.
        let variant_offset = HEADER_LEN + 3 * 24;
        bytes[variant_offset..variant_offset + 4].copy_from_slice(&42u32.to_le_bytes());

        assert!(decode_event::<OrderPaid>(&bytes).is_err());
    }
}
