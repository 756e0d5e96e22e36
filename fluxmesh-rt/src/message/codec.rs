//! Wire codec for broker payloads.
//!
//! Broker input and output each configure an independent
//! `(encoding, format)` pair; both ends of a topic must agree. The format
//! turns a value into text, the encoding turns that text into bytes.

// Layer 1: Standard library imports
use std::io::{Read, Write};
use std::str::FromStr;

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown payload encoding: {0}")]
    UnknownEncoding(String),

    #[error("unknown payload format: {0}")]
    UnknownFormat(String),

    #[error("payload is not valid {format}: {reason}")]
    Malformed { format: &'static str, reason: String },

    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("gzip error: {0}")]
    Gzip(#[from] std::io::Error),

    #[error("payload is not valid utf-8")]
    Utf8,
}

/// Byte-level transport encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadEncoding {
    #[default]
    Utf8,
    Base64,
    Gzip,
    None,
}

impl FromStr for PayloadEncoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "utf-8" | "utf8" => Ok(PayloadEncoding::Utf8),
            "base64" => Ok(PayloadEncoding::Base64),
            "gzip" => Ok(PayloadEncoding::Gzip),
            "none" => Ok(PayloadEncoding::None),
            other => Err(CodecError::UnknownEncoding(other.to_string())),
        }
    }
}

/// Textual payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Json,
    Yaml,
    Text,
}

impl FromStr for PayloadFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(PayloadFormat::Json),
            "yaml" => Ok(PayloadFormat::Yaml),
            "text" => Ok(PayloadFormat::Text),
            other => Err(CodecError::UnknownFormat(other.to_string())),
        }
    }
}

fn format_value(value: &Value, format: PayloadFormat) -> Result<String, CodecError> {
    match format {
        PayloadFormat::Json => serde_json::to_string(value).map_err(|e| CodecError::Malformed {
            format: "json",
            reason: e.to_string(),
        }),
        PayloadFormat::Yaml => serde_yaml::to_string(value).map_err(|e| CodecError::Malformed {
            format: "yaml",
            reason: e.to_string(),
        }),
        PayloadFormat::Text => Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    }
}

fn parse_value(text: &str, format: PayloadFormat) -> Result<Value, CodecError> {
    match format {
        PayloadFormat::Json => serde_json::from_str(text).map_err(|e| CodecError::Malformed {
            format: "json",
            reason: e.to_string(),
        }),
        PayloadFormat::Yaml => serde_yaml::from_str(text).map_err(|e| CodecError::Malformed {
            format: "yaml",
            reason: e.to_string(),
        }),
        PayloadFormat::Text => Ok(Value::String(text.to_string())),
    }
}

/// Serialize a payload value into wire bytes.
pub fn encode_payload(
    value: &Value,
    encoding: PayloadEncoding,
    format: PayloadFormat,
) -> Result<Vec<u8>, CodecError> {
    let text = format_value(value, format)?;
    match encoding {
        PayloadEncoding::Utf8 | PayloadEncoding::None => Ok(text.into_bytes()),
        PayloadEncoding::Base64 => Ok(BASE64.encode(text.as_bytes()).into_bytes()),
        PayloadEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(text.as_bytes())?;
            Ok(encoder.finish()?)
        }
    }
}

/// Parse wire bytes back into a payload value.
pub fn decode_payload(
    bytes: &[u8],
    encoding: PayloadEncoding,
    format: PayloadFormat,
) -> Result<Value, CodecError> {
    let text = match encoding {
        PayloadEncoding::Utf8 | PayloadEncoding::None => {
            String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::Utf8)?
        }
        PayloadEncoding::Base64 => {
            let raw = BASE64.decode(bytes)?;
            String::from_utf8(raw).map_err(|_| CodecError::Utf8)?
        }
        PayloadEncoding::Gzip => {
            let mut decoder = GzDecoder::new(bytes);
            let mut text = String::new();
            decoder.read_to_string(&mut text)?;
            text
        }
    };
    parse_value(&text, format)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Value {
        json!({"id": 7, "tags": ["a", "b"], "nested": {"ok": true}})
    }

    #[test]
    fn json_round_trips_through_every_encoding() {
        for encoding in [
            PayloadEncoding::Utf8,
            PayloadEncoding::Base64,
            PayloadEncoding::Gzip,
        ] {
            let bytes = encode_payload(&sample(), encoding, PayloadFormat::Json).unwrap();
            let back = decode_payload(&bytes, encoding, PayloadFormat::Json).unwrap();
            assert_eq!(back, sample(), "encoding {encoding:?}");
        }
    }

    #[test]
    fn yaml_round_trip() {
        let bytes = encode_payload(&sample(), PayloadEncoding::Utf8, PayloadFormat::Yaml).unwrap();
        let back = decode_payload(&bytes, PayloadEncoding::Utf8, PayloadFormat::Yaml).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn text_format_passes_strings_through() {
        let value = json!("plain message");
        let bytes = encode_payload(&value, PayloadEncoding::Utf8, PayloadFormat::Text).unwrap();
        assert_eq!(bytes, b"plain message");
        let back = decode_payload(&bytes, PayloadEncoding::Utf8, PayloadFormat::Text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn gzip_output_is_compressed_and_recoverable() {
        let value = json!({"body": "x".repeat(4096)});
        let bytes = encode_payload(&value, PayloadEncoding::Gzip, PayloadFormat::Json).unwrap();
        assert!(bytes.len() < 4096);
        let back = decode_payload(&bytes, PayloadEncoding::Gzip, PayloadFormat::Json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = decode_payload(b"{not json", PayloadEncoding::Utf8, PayloadFormat::Json);
        assert!(matches!(err, Err(CodecError::Malformed { format: "json", .. })));
    }

    #[test]
    fn encoding_and_format_names_parse() {
        assert_eq!("utf-8".parse::<PayloadEncoding>().unwrap(), PayloadEncoding::Utf8);
        assert_eq!("base64".parse::<PayloadEncoding>().unwrap(), PayloadEncoding::Base64);
        assert_eq!("gzip".parse::<PayloadEncoding>().unwrap(), PayloadEncoding::Gzip);
        assert_eq!("none".parse::<PayloadEncoding>().unwrap(), PayloadEncoding::None);
        assert!("zstd".parse::<PayloadEncoding>().is_err());

        assert_eq!("json".parse::<PayloadFormat>().unwrap(), PayloadFormat::Json);
        assert_eq!("yaml".parse::<PayloadFormat>().unwrap(), PayloadFormat::Yaml);
        assert_eq!("text".parse::<PayloadFormat>().unwrap(), PayloadFormat::Text);
        assert!("xml".parse::<PayloadFormat>().is_err());
    }
}
