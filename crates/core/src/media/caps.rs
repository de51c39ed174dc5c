//! Capability structures in the GStreamer caps text form.
//!
//! A [`Structure`] is a media type name followed by ordered, typed fields:
//!
//! ```text
//! application/x-rtp, media=(string)audio, clock-rate=(int)16000, encoding-name=(string)SPEEX, payload=(int)110
//! └── name ───────┘  └── field ────────┘
//! ```
//!
//! This is the "wire format" of payload negotiation between a producer and a
//! receiver: everything round-trips through string-typed key/value text, with
//! no binary framing. Supported value types are `string`, `int` and `uint`;
//! unannotated values are inferred (integer if it parses, string otherwise).

use std::fmt;
use std::str::FromStr;

use crate::error::{CapsParseErrorKind, SessionError};

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Int(i32),
    UInt(u32),
}

impl FieldValue {
    /// Type annotation used in the text form.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Str(_) => "string",
            FieldValue::Int(_) => "int",
            FieldValue::UInt(_) => "uint",
        }
    }

    /// The value rendered without its type annotation or quoting.
    pub fn to_plain_string(&self) -> String {
        match self {
            FieldValue::Str(s) => s.clone(),
            FieldValue::Int(v) => v.to_string(),
            FieldValue::UInt(v) => v.to_string(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.type_name())?;
        match self {
            FieldValue::Str(s) if needs_quoting(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")
            }
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::UInt(v) => write!(f, "{v}"),
        }
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '+'))
}

/// A named, ordered set of typed fields.
///
/// Field order is preserved; [`set`](Self::set) replaces an existing field in
/// place rather than moving it to the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    name: String,
    fields: Vec<(String, FieldValue)>,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.name == name
    }

    /// Split the name into its two MIME parts (`audio/x-speex` → `("audio", "x-speex")`).
    ///
    /// Returns `None` unless the name has exactly two non-empty parts.
    pub fn mime_parts(&self) -> Option<(&str, &str)> {
        let mut parts = self.name.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(subtype), None) if !kind.is_empty() && !subtype.is_empty() => {
                Some((kind, subtype))
            }
            _ => None,
        }
    }

    /// Set a field, replacing any existing value with the same name.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// String value of a field; `None` if absent or not a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        match self.get(field)? {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value of a field. `uint` values that fit in `i32` are accepted.
    pub fn get_int(&self, field: &str) -> Option<i32> {
        match self.get(field)? {
            FieldValue::Int(v) => Some(*v),
            FieldValue::UInt(v) => i32::try_from(*v).ok(),
            FieldValue::Str(_) => None,
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        let pos = self.fields.iter().position(|(name, _)| name == field)?;
        Some(self.fields.remove(pos).1)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (name, value) in &self.fields {
            write!(f, ", {name}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for Structure {
    type Err = SessionError;

    /// Parse the caps text form. A trailing `;` (as printed by GStreamer for
    /// single-structure caps) is tolerated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_end_matches(';').trim();
        let mut tokens = split_top_level(s)?.into_iter();

        let name = match tokens.next() {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return Err(parse_error(CapsParseErrorKind::Empty)),
        };

        let mut structure = Structure::new(name);
        for token in tokens {
            let token = token.trim();
            let eq = token
                .find('=')
                .ok_or_else(|| parse_error(CapsParseErrorKind::MissingEquals))?;
            let field = token[..eq].trim();
            let value = parse_value(token[eq + 1..].trim())?;
            structure.set(field, value);
        }
        Ok(structure)
    }
}

fn parse_error(kind: CapsParseErrorKind) -> SessionError {
    SessionError::CapsParse { kind }
}

/// Split on commas that are not inside a quoted string.
fn split_top_level(s: &str) -> Result<Vec<String>, SessionError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            ',' if !in_quotes => tokens.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err(parse_error(CapsParseErrorKind::UnterminatedString));
    }
    tokens.push(current);
    Ok(tokens)
}

fn parse_value(raw: &str) -> Result<FieldValue, SessionError> {
    let (type_name, body) = match raw.strip_prefix('(') {
        Some(rest) => {
            let close = rest
                .find(')')
                .ok_or_else(|| parse_error(CapsParseErrorKind::UnknownType))?;
            (Some(rest[..close].trim()), rest[close + 1..].trim())
        }
        None => (None, raw),
    };

    let quoted = body.starts_with('"');
    let text = if quoted { unquote(body)? } else { body.to_string() };

    match type_name {
        Some("string" | "str" | "s") => Ok(FieldValue::Str(text)),
        Some("int" | "i") => text
            .parse()
            .map(FieldValue::Int)
            .map_err(|_| parse_error(CapsParseErrorKind::InvalidNumber)),
        Some("uint" | "u") => text
            .parse()
            .map(FieldValue::UInt)
            .map_err(|_| parse_error(CapsParseErrorKind::InvalidNumber)),
        Some(_) => Err(parse_error(CapsParseErrorKind::UnknownType)),
        None if !quoted => Ok(text
            .parse()
            .map(FieldValue::Int)
            .unwrap_or(FieldValue::Str(text))),
        None => Ok(FieldValue::Str(text)),
    }
}

fn unquote(body: &str) -> Result<String, SessionError> {
    let inner = body
        .strip_prefix('"')
        .and_then(|b| b.strip_suffix('"'))
        .ok_or_else(|| parse_error(CapsParseErrorKind::UnterminatedString))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_typed_fields() {
        let s = Structure::new("application/x-rtp")
            .with("media", "audio")
            .with("clock-rate", 16000)
            .with("payload", 110);
        assert_eq!(
            s.to_string(),
            "application/x-rtp, media=(string)audio, clock-rate=(int)16000, payload=(int)110"
        );
    }

    #[test]
    fn parses_gstreamer_caps_string() {
        let s: Structure = "application/x-rtp, media=(string)video, clock-rate=(int)90000, \
                            encoding-name=(string)THEORA, payload=(int)96, ssrc=(uint)3735928559;"
            .parse()
            .unwrap();
        assert_eq!(s.name(), "application/x-rtp");
        assert_eq!(s.get_str("media"), Some("video"));
        assert_eq!(s.get_int("clock-rate"), Some(90000));
        assert_eq!(s.get("ssrc"), Some(&FieldValue::UInt(3_735_928_559)));
        assert_eq!(s.get_int("ssrc"), None, "does not fit i32");
    }

    #[test]
    fn quoted_strings_survive_round_trip() {
        let s = Structure::new("application/x-rtp")
            .with("delivery-method", "inline, \"quoted\"")
            .with("empty", "");
        let text = s.to_string();
        let parsed: Structure = text.parse().unwrap();
        assert_eq!(parsed, s);
    }

    #[test]
    fn unannotated_values_are_inferred() {
        let s: Structure = "video/x-raw, width=320, format=BGRx".parse().unwrap();
        assert_eq!(s.get("width"), Some(&FieldValue::Int(320)));
        assert_eq!(s.get_str("format"), Some("BGRx"));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut s = Structure::new("x").with("a", 1).with("b", 2);
        s.set("a", 3);
        let names: Vec<_> = s.fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(s.get_int("a"), Some(3));
    }

    #[test]
    fn mime_parts_requires_two_parts() {
        assert_eq!(
            Structure::new("audio/x-speex").mime_parts(),
            Some(("audio", "x-speex"))
        );
        assert_eq!(Structure::new("audio").mime_parts(), None);
        assert_eq!(Structure::new("a/b/c").mime_parts(), None);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            "".parse::<Structure>(),
            Err(SessionError::CapsParse {
                kind: CapsParseErrorKind::Empty
            })
        ));
        assert!(matches!(
            "x, novalue".parse::<Structure>(),
            Err(SessionError::CapsParse {
                kind: CapsParseErrorKind::MissingEquals
            })
        ));
        assert!(matches!(
            "x, rate=(fraction)30/1".parse::<Structure>(),
            Err(SessionError::CapsParse {
                kind: CapsParseErrorKind::UnknownType
            })
        ));
        assert!(matches!(
            "x, rate=(int)abc".parse::<Structure>(),
            Err(SessionError::CapsParse {
                kind: CapsParseErrorKind::InvalidNumber
            })
        ));
        assert!(matches!(
            "x, s=(string)\"open".parse::<Structure>(),
            Err(SessionError::CapsParse {
                kind: CapsParseErrorKind::UnterminatedString
            })
        ));
    }
}
