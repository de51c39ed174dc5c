//! Payload descriptors and their translation to/from capability structures.
//!
//! A [`PayloadDescriptor`] is the abstract record exchanged out-of-band
//! between peers (comparable to one SDP `a=rtpmap` + `a=fmtp` pair). The
//! media graph speaks in [`Structure`]s named `application/x-rtp`:
//!
//! | Descriptor field | Structure field | Type |
//! |------------------|-----------------|------|
//! | `kind` | `media` | string (`audio` / `video`) |
//! | `payload_type` | `payload` | int |
//! | `encoding_name` | `encoding-name` | string |
//! | `clock_rate` | `clock-rate` | int |
//! | `channels` | `encoding-params` | string |
//! | `parameters` | any other field | string |
//!
//! Theora and Vorbis carry their codec setup in a `configuration`
//! parameter. Descriptors hold it hex-encoded (safe for any signalling
//! channel); structures hold it base64-encoded, as the RTP payloaders
//! emit it.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::MediaKind;
use super::caps::{FieldValue, Structure};
use crate::error::{PayloadErrorKind, Result, SessionError};

/// Sentinel payload type meaning "not yet negotiated".
pub const PAYLOAD_TYPE_UNSET: i32 = -1;

/// Name of every RTP capability structure.
pub const RTP_CAPS_NAME: &str = "application/x-rtp";

/// First dynamic payload type (RFC 3551 §6). Dynamic types must carry an
/// encoding name.
pub const FIRST_DYNAMIC_PAYLOAD_TYPE: i32 = 96;

/// Structure fields that map to dedicated descriptor fields, or that describe
/// the sender's RTP stream state rather than the payload format.
const RESERVED_FIELDS: &[&str] = &[
    "media",
    "payload",
    "encoding-name",
    "clock-rate",
    "encoding-params",
    "ssrc",
    "clock-base",
    "seqnum-base",
];

const CONFIGURATION_PARAM: &str = "configuration";

/// Abstract codec/payload negotiation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDescriptor {
    pub kind: MediaKind,
    /// RTP payload type in `0..=127`, or [`PAYLOAD_TYPE_UNSET`].
    pub payload_type: i32,
    pub encoding_name: String,
    pub clock_rate: Option<u32>,
    pub channels: Option<u32>,
    /// Free-form codec parameters, in the order they were negotiated.
    pub parameters: Vec<(String, String)>,
}

impl PayloadDescriptor {
    /// An empty, not-yet-negotiated descriptor.
    pub fn unset(kind: MediaKind) -> Self {
        Self {
            kind,
            payload_type: PAYLOAD_TYPE_UNSET,
            encoding_name: String::new(),
            clock_rate: None,
            channels: None,
            parameters: Vec::new(),
        }
    }

    pub fn new(kind: MediaKind, payload_type: i32, encoding_name: &str) -> Self {
        Self {
            payload_type,
            encoding_name: encoding_name.to_string(),
            ..Self::unset(kind)
        }
    }

    pub fn with_clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = Some(clock_rate);
        self
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters.push((name.to_string(), value.to_string()));
        self
    }

    /// Whether the payload type has been negotiated.
    pub fn is_negotiated(&self) -> bool {
        self.payload_type != PAYLOAD_TYPE_UNSET
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode as an `application/x-rtp` structure.
    ///
    /// Fails when the payload type is unset or out of range, when a dynamic
    /// payload type has no encoding name, when a parameter is named after a
    /// dedicated field, or when a Theora/Vorbis `configuration` parameter is
    /// not valid hex.
    pub fn to_structure(&self) -> Result<Structure> {
        if !self.is_negotiated() {
            return Err(SessionError::Payload(PayloadErrorKind::MissingPayloadType));
        }
        check_payload_type(self.payload_type)?;
        if self.payload_type >= FIRST_DYNAMIC_PAYLOAD_TYPE && self.encoding_name.is_empty() {
            return Err(SessionError::Payload(
                PayloadErrorKind::MissingEncodingName(self.payload_type),
            ));
        }

        let mut s = Structure::new(RTP_CAPS_NAME)
            .with("media", self.kind.as_str())
            .with("payload", self.payload_type);
        if !self.encoding_name.is_empty() {
            s.set("encoding-name", self.encoding_name.as_str());
        }
        if let Some(rate) = self.clock_rate {
            s.set("clock-rate", rate as i32);
        }
        if let Some(channels) = self.channels {
            s.set("encoding-params", channels.to_string());
        }

        for (name, value) in &self.parameters {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                return Err(SessionError::Payload(PayloadErrorKind::ReservedParameter(
                    name.clone(),
                )));
            }
            if name == CONFIGURATION_PARAM && carries_binary_configuration(&self.encoding_name) {
                let raw = hex::decode(value)
                    .map_err(|_| SessionError::Payload(PayloadErrorKind::InvalidConfiguration))?;
                if raw.is_empty() {
                    return Err(SessionError::Payload(PayloadErrorKind::InvalidConfiguration));
                }
                s.set(name, BASE64_STANDARD.encode(raw));
            } else {
                s.set(name, value.as_str());
            }
        }

        Ok(s)
    }

    /// Decode an `application/x-rtp` structure, typically the negotiated
    /// output caps of a payloader.
    pub fn from_structure(s: &Structure) -> Result<Self> {
        if !s.has_name(RTP_CAPS_NAME) {
            return Err(SessionError::Payload(PayloadErrorKind::NotRtp(
                s.name().to_string(),
            )));
        }

        let kind = s
            .get_str("media")
            .and_then(MediaKind::from_media_type)
            .ok_or(SessionError::Payload(PayloadErrorKind::InvalidMedia))?;

        let payload_type = s
            .get_int("payload")
            .ok_or(SessionError::Payload(PayloadErrorKind::MissingPayloadType))?;
        check_payload_type(payload_type)?;

        let encoding_name = s.get_str("encoding-name").unwrap_or_default().to_string();
        if encoding_name.is_empty() && payload_type >= FIRST_DYNAMIC_PAYLOAD_TYPE {
            return Err(SessionError::Payload(
                PayloadErrorKind::MissingEncodingName(payload_type),
            ));
        }

        let clock_rate = s
            .get_int("clock-rate")
            .and_then(|rate| u32::try_from(rate).ok());

        let channels = match s.get("encoding-params") {
            Some(FieldValue::Str(text)) => text.trim().parse().ok(),
            Some(FieldValue::Int(v)) => u32::try_from(*v).ok(),
            Some(FieldValue::UInt(v)) => Some(*v),
            None => None,
        };

        let mut parameters = Vec::new();
        for (name, value) in s.fields() {
            if RESERVED_FIELDS.contains(&name) {
                continue;
            }
            let value = if name == CONFIGURATION_PARAM && carries_binary_configuration(&encoding_name)
            {
                let raw = BASE64_STANDARD
                    .decode(value.to_plain_string())
                    .map_err(|_| SessionError::Payload(PayloadErrorKind::InvalidConfiguration))?;
                hex::encode(raw)
            } else {
                value.to_plain_string()
            };
            parameters.push((name.to_string(), value));
        }

        Ok(Self {
            kind,
            payload_type,
            encoding_name,
            clock_rate,
            channels,
            parameters,
        })
    }
}

fn check_payload_type(pt: i32) -> Result<()> {
    if (0..=127).contains(&pt) {
        Ok(())
    } else {
        Err(SessionError::Payload(
            PayloadErrorKind::PayloadTypeOutOfRange(pt),
        ))
    }
}

fn carries_binary_configuration(encoding_name: &str) -> bool {
    encoding_name.eq_ignore_ascii_case("THEORA") || encoding_name.eq_ignore_ascii_case("VORBIS")
}
