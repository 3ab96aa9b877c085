use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "fleet.car.registered").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// The closed set of event kinds a consumer knows how to decode.
///
/// Implemented by domain event sum types. Stored events whose type name is not
/// listed decode to [`Decoded::Unknown`] instead of failing, so consumers keep
/// working when newer producers add event kinds.
pub trait EventKinds: Event + DeserializeOwned {
    const EVENT_TYPES: &'static [&'static str];

    fn is_known(event_type: &str) -> bool {
        Self::EVENT_TYPES.contains(&event_type)
    }
}

/// Result of decoding a stored payload into a sum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<E> {
    Known(E),
    Unknown { event_type: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to deserialize '{event_type}' payload: {reason}")]
pub struct DecodeError {
    pub event_type: String,
    pub reason: String,
}

/// Decode a stored payload, tagging unrecognized event types as unknown.
///
/// A recognized type whose payload does not deserialize, or deserializes into
/// a different kind than its tag, is an error: that is corruption or a schema
/// bug, not forward compatibility.
pub fn decode_event<E: EventKinds>(
    event_type: &str,
    payload: &JsonValue,
) -> Result<Decoded<E>, DecodeError> {
    if !E::is_known(event_type) {
        return Ok(Decoded::Unknown {
            event_type: event_type.to_string(),
        });
    }

    let event: E = serde_json::from_value(payload.clone()).map_err(|e| DecodeError {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })?;
    if event.event_type() != event_type {
        return Err(DecodeError {
            event_type: event_type.to_string(),
            reason: format!("payload holds a '{}' event", event.event_type()),
        });
    }
    Ok(Decoded::Known(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    enum LampEvent {
        SwitchedOn { at: DateTime<Utc> },
        SwitchedOff { at: DateTime<Utc> },
    }

    impl Event for LampEvent {
        fn event_type(&self) -> &'static str {
            match self {
                LampEvent::SwitchedOn { .. } => "lamp.switched_on",
                LampEvent::SwitchedOff { .. } => "lamp.switched_off",
            }
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            match self {
                LampEvent::SwitchedOn { at } | LampEvent::SwitchedOff { at } => *at,
            }
        }
    }

    impl EventKinds for LampEvent {
        const EVENT_TYPES: &'static [&'static str] = &["lamp.switched_on", "lamp.switched_off"];
    }

    #[test]
    fn known_event_decodes() {
        let ev = LampEvent::SwitchedOn { at: Utc::now() };
        let payload = serde_json::to_value(&ev).unwrap();
        let decoded = decode_event::<LampEvent>("lamp.switched_on", &payload).unwrap();
        assert_eq!(decoded, Decoded::Known(ev));
    }

    #[test]
    fn unknown_event_type_is_tagged_not_failed() {
        let decoded =
            decode_event::<LampEvent>("lamp.dimmed", &serde_json::json!({"level": 3})).unwrap();
        assert_eq!(
            decoded,
            Decoded::Unknown {
                event_type: "lamp.dimmed".to_string()
            }
        );
    }

    #[test]
    fn payload_of_another_kind_is_an_error() {
        let payload = serde_json::to_value(LampEvent::SwitchedOn { at: Utc::now() }).unwrap();
        let err = decode_event::<LampEvent>("lamp.switched_off", &payload).unwrap_err();
        assert_eq!(err.event_type, "lamp.switched_off");
        assert!(err.reason.contains("lamp.switched_on"));
    }

    #[test]
    fn malformed_known_payload_is_an_error() {
        let err =
            decode_event::<LampEvent>("lamp.switched_on", &serde_json::json!({"nope": 1}))
                .unwrap_err();
        assert_eq!(err.event_type, "lamp.switched_on");
    }
}
