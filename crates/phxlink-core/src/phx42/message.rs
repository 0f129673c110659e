//! Line codec for the phx42 ASCII protocol.
//!
//! Wire form: `"<role> <type> <params?> <unparsed?>\r\n"`. The host role
//! tag is the fixed four bytes `ZUzu`; the message type is a four-character
//! ASCII code; parameters are a comma-separated list of `KEY=VALUE` pairs;
//! an optional free-form trailer follows. Trailing spaces are trimmed when
//! parameters and trailer are both empty.

use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Host→device role tag.
pub const HOST_TAG: &str = "ZUzu";
/// Longest role tag tolerated on inbound lines (allows a future variant).
pub const MAX_ROLE_LEN: usize = 5;

/// Message type codes.
pub mod msg {
    /// Comm check / heartbeat.
    pub const CHEK: &str = "CHEK";
    /// Enable or disable a periodic stream.
    pub const PRPT: &str = "PRPT";
    /// Set a periodic stream's interval.
    pub const TRPT: &str = "TRPT";
    /// Request a single report.
    pub const SRPT: &str = "SRPT";
    /// Readings report.
    pub const RDNG: &str = "RDNG";
    /// Drive levels report.
    pub const DRVL: &str = "DRVL";
    /// Real-time clock.
    pub const TIME: &str = "TIME";
    /// FID readings report.
    pub const FIDR: &str = "FIDR";
    /// Error response to a request.
    pub const EROR: &str = "EROR";
    /// Spontaneous error.
    pub const SERR: &str = "SERR";
    /// Firmware version.
    pub const VERS: &str = "VERS";
    /// Device-initiated shutdown notice.
    pub const SHUT: &str = "SHUT";
    /// Start or abort the auto-ignition sequence.
    pub const AIGS: &str = "AIGS";
    /// Battery status report.
    pub const BATS: &str = "BATS";
    /// Remaining warmup time.
    pub const WUTM: &str = "WUTM";
}

/// Every message type the deframer accepts.
pub const RECOGNIZED_TYPES: [&str; 15] = [
    msg::CHEK,
    msg::PRPT,
    msg::TRPT,
    msg::SRPT,
    msg::RDNG,
    msg::DRVL,
    msg::TIME,
    msg::FIDR,
    msg::EROR,
    msg::SERR,
    msg::VERS,
    msg::SHUT,
    msg::AIGS,
    msg::BATS,
    msg::WUTM,
];

/// Whether a type code belongs to the recognized set.
pub fn is_recognized(msg_type: &str) -> bool {
    RECOGNIZED_TYPES.contains(&msg_type)
}

/// Errors raised while parsing one inbound line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("empty line")]
    Empty,
    #[error("role tag too long: {0:?}")]
    RoleTooLong(String),
    #[error("missing message type")]
    MissingType,
    #[error("unrecognized message type: {0:?}")]
    UnknownType(String),
    #[error("malformed key=value pair: {0:?}")]
    BadPair(String),
}

/// One ASCII protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Four-character type code.
    pub msg_type: String,
    /// `KEY=VALUE` parameters in wire order.
    pub parameters: Vec<(String, String)>,
    /// Optional free-form trailer.
    pub unparsed: Option<String>,
}

impl Message {
    /// A bare message with no parameters.
    pub fn new(msg_type: &str) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            parameters: Vec::new(),
            unparsed: None,
        }
    }

    /// A message with the given parameters.
    pub fn with_params(msg_type: &str, params: &[(&str, &str)]) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            parameters: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            unparsed: None,
        }
    }

    /// Look up a parameter value by key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Encode as a CR-LF terminated host line.
    pub fn encode(&self) -> Vec<u8> {
        let mut line = String::new();
        line.push_str(HOST_TAG);
        line.push(' ');
        line.push_str(&self.msg_type);

        if !self.parameters.is_empty() {
            line.push(' ');
            let joined: Vec<String> = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            line.push_str(&joined.join(","));
        }
        if let Some(trailer) = &self.unparsed {
            line.push(' ');
            line.push_str(trailer);
        }

        let mut bytes = line.trim_end().as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    /// Parse an inbound line (terminator already stripped).
    pub fn parse(line: &str) -> Result<Message, LineError> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            return Err(LineError::Empty);
        }

        let mut tokens = trimmed.split(' ').filter(|t| !t.is_empty());
        let role = tokens.next().ok_or(LineError::Empty)?;
        if role.len() > MAX_ROLE_LEN {
            return Err(LineError::RoleTooLong(role.to_string()));
        }

        let msg_type = tokens.next().ok_or(LineError::MissingType)?;
        if !is_recognized(msg_type) {
            return Err(LineError::UnknownType(msg_type.to_string()));
        }

        let rest: Vec<&str> = tokens.collect();
        let (parameters, unparsed) = match rest.split_first() {
            None => (Vec::new(), None),
            Some((first, tail)) if first.contains('=') => {
                let mut params = Vec::new();
                for pair in first.split(',') {
                    let (k, v) = pair
                        .split_once('=')
                        .ok_or_else(|| LineError::BadPair(pair.to_string()))?;
                    params.push((k.to_string(), v.to_string()));
                }
                let trailer = if tail.is_empty() {
                    None
                } else {
                    Some(tail.join(" "))
                };
                (params, trailer)
            }
            Some(_) => (Vec::new(), Some(rest.join(" "))),
        };

        Ok(Message {
            msg_type: msg_type.to_string(),
            parameters,
            unparsed,
        })
    }
}

/// Accumulates inbound bytes until a CR-LF terminated line completes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one byte; yields the completed line (terminator stripped,
    /// lossily decoded) once the last two bytes are CR-LF.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        self.buf.push(byte);
        if self.buf.ends_with(b"\r\n") {
            self.buf.truncate(self.buf.len() - 2);
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            Some(line)
        } else {
            None
        }
    }
}

/// RTC wire format: `yyyy/MM/dd_HH:mm:ss`.
const RTC_FORMAT: &[time::format_description::FormatItem<'static>] =
    format_description!("[year]/[month]/[day]_[hour]:[minute]:[second]");

/// Render a timestamp in the device's RTC format.
pub fn format_rtc(t: OffsetDateTime) -> String {
    PrimitiveDateTime::new(t.date(), t.time())
        .format(&RTC_FORMAT)
        .expect("RTC format is infallible for valid datetimes")
}

/// Parse a timestamp in the device's RTC format, as UTC.
pub fn parse_rtc(s: &str) -> Result<OffsetDateTime, LineError> {
    PrimitiveDateTime::parse(s, &RTC_FORMAT)
        .map(|p| p.assume_utc())
        .map_err(|_| LineError::BadPair(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_encode_bare() {
        let bytes = Message::new(msg::CHEK).encode();
        assert_eq!(bytes, b"ZUzu CHEK\r\n");
    }

    #[test]
    fn test_encode_with_params() {
        let bytes = Message::with_params(msg::PRPT, &[("TYPE", "RDNG"), ("EN", "0")]).encode();
        assert_eq!(bytes, b"ZUzu PRPT TYPE=RDNG,EN=0\r\n");
    }

    #[test]
    fn test_time_roundtrip() {
        let sent = Message::with_params(msg::TIME, &[("TS", "2020/01/02_03:04:05")]);
        let line = String::from_utf8(sent.encode()).unwrap();
        let parsed = Message::parse(&line).unwrap();
        assert_eq!(parsed.msg_type, msg::TIME);
        assert_eq!(parsed.param("TS"), Some("2020/01/02_03:04:05"));
        assert_eq!(parsed.unparsed, None);
    }

    #[test]
    fn test_parse_unparsed_trailer() {
        let parsed = Message::parse("phx42 VERS fw 1.23 build 7").unwrap();
        assert_eq!(parsed.msg_type, msg::VERS);
        assert!(parsed.parameters.is_empty());
        assert_eq!(parsed.unparsed.as_deref(), Some("fw 1.23 build 7"));
    }

    #[test]
    fn test_parse_params_and_trailer() {
        let parsed = Message::parse("phx42 EROR TYPE=FIDR,CODE=22 sorry").unwrap();
        assert_eq!(parsed.param("TYPE"), Some("FIDR"));
        assert_eq!(parsed.param("CODE"), Some("22"));
        assert_eq!(parsed.unparsed.as_deref(), Some("sorry"));
    }

    #[test]
    fn test_parse_rejects_long_role() {
        let err = Message::parse("phx42toolong RDNG CALPPM=1.00").unwrap_err();
        assert!(matches!(err, LineError::RoleTooLong(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let err = Message::parse("phx42 XXXX A=1").unwrap_err();
        assert_eq!(err, LineError::UnknownType("XXXX".to_string()));
    }

    #[test]
    fn test_parse_rejects_bad_pair() {
        let err = Message::parse("phx42 RDNG CALPPM=1.00,JUNK").unwrap_err();
        assert!(matches!(err, LineError::BadPair(_)));
    }

    #[test]
    fn test_line_buffer_splits_on_crlf() {
        let mut buf = LineBuffer::new();
        let mut lines = Vec::new();
        for &b in b"phx42 CHEK\r\nphx42 RDNG CALPPM=1.50\r\n" {
            if let Some(line) = buf.push(b) {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec!["phx42 CHEK", "phx42 RDNG CALPPM=1.50"]);
    }

    #[test]
    fn test_line_buffer_bare_lf_does_not_split() {
        let mut buf = LineBuffer::new();
        for &b in b"phx42 CHEK\n" {
            assert!(buf.push(b).is_none());
        }
    }

    #[test]
    fn test_rtc_roundtrip() {
        let t = datetime!(2020-01-02 03:04:05 UTC);
        let s = format_rtc(t);
        assert_eq!(s, "2020/01/02_03:04:05");
        assert_eq!(parse_rtc(&s).unwrap(), t);
    }
}
