//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Deadprop.
//
// Deadprop is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Deadprop is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Deadprop. If not, see <http://www.gnu.org/licenses/>.

//! Encoding of property values into attribute values.
//!
//! The storage format has changed over time:
//!
//! 1. Plain XML text.
//! 2. XML compressed with zlib, due to limits on attribute value size.
//! 3. A generic binary object encoding (CBOR of the element tree), for speed.
//! 4. Back to zlib-compressed XML for interoperability and size.
//!
//! Only the current format is ever written, but all of them are read. Callers
//! are expected to rewrite anything that did not come back as
//! `Format::Current`.

use super::document::{Element, ValueSerializer, XmlSerializer};
use crate::support::compression;
use crate::support::error::Error;

/// How many raw bytes of an undecodable value to include in the error.
pub const CORRUPT_SNIPPET_LEN: usize = 64;

/// The on-disk formats a value can be found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// zlib-compressed canonical text.
    Current,
    /// Uncompressed canonical text.
    LegacyText,
    /// CBOR of the element tree, compressed or not.
    LegacyBinary,
}

/// Formats in the order they are attempted when reading.
pub const READ_ORDER: [Format; 3] =
    [Format::Current, Format::LegacyText, Format::LegacyBinary];

impl Format {
    pub fn is_legacy(self) -> bool {
        Format::Current != self
    }

    fn try_decode(
        self,
        raw: &[u8],
        inflated: Option<&[u8]>,
        serializer: &dyn ValueSerializer,
    ) -> Option<Element> {
        match self {
            Format::Current => {
                serializer.from_canonical_text(inflated?).ok()
            }
            Format::LegacyText => serializer.from_canonical_text(raw).ok(),
            Format::LegacyBinary => {
                serde_cbor::from_slice(inflated.unwrap_or(raw)).ok()
            }
        }
    }
}

/// A decoded value tagged with the format it was found in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub format: Format,
    pub value: Element,
}

impl Decoded {
    pub fn is_legacy(&self) -> bool {
        self.format.is_legacy()
    }
}

pub struct ValueCodec {
    serializer: Box<dyn ValueSerializer>,
}

impl Default for ValueCodec {
    fn default() -> Self {
        ValueCodec::new(Box::new(XmlSerializer))
    }
}

impl ValueCodec {
    pub fn new(serializer: Box<dyn ValueSerializer>) -> Self {
        ValueCodec { serializer }
    }

    /// Encode `value` in the current format.
    pub fn encode(&self, value: &Element) -> Result<Vec<u8>, Error> {
        let text = self.serializer.to_canonical_text(value);
        Ok(compression::deflate(text.as_bytes())?)
    }

    /// Decode `raw`, which was read from the attribute for `key`.
    ///
    /// `key` is only used for error reporting.
    pub fn decode(&self, key: &str, raw: &[u8]) -> Result<Decoded, Error> {
        let inflated = compression::inflate(raw);
        let inflated = inflated.as_deref();

        READ_ORDER
            .iter()
            .find_map(|&format| {
                format
                    .try_decode(raw, inflated, &*self.serializer)
                    .map(|value| Decoded { format, value })
            })
            .ok_or_else(|| Error::CorruptPropertyValue {
                key: key.to_owned(),
                len: raw.len(),
                snippet: snippet(raw),
            })
    }
}

fn snippet(raw: &[u8]) -> String {
    let bounded = &raw[..raw.len().min(CORRUPT_SNIPPET_LEN)];
    let mut escaped: String = bounded
        .iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect();
    if bounded.len() < raw.len() {
        escaped.push_str("...");
    }
    escaped
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    use crate::props::name::PropertyName;

    fn sample() -> Element {
        Element::new(PropertyName::new("ns1", "color")).with_text("blue")
    }

    #[test]
    fn current_format() {
        let codec = ValueCodec::default();
        let encoded = codec.encode(&sample()).unwrap();
        assert_eq!(0x78, encoded[0]);

        let decoded = codec.decode("k", &encoded).unwrap();
        assert_eq!(Format::Current, decoded.format);
        assert!(!decoded.is_legacy());
        assert_eq!(sample(), decoded.value);
    }

    #[test]
    fn legacy_text_format() {
        let decoded = ValueCodec::default()
            .decode("k", b"<?xml version='1.0'?><color xmlns='ns1'>blue</color>")
            .unwrap();
        assert_eq!(Format::LegacyText, decoded.format);
        assert!(decoded.is_legacy());
        assert_eq!(sample(), decoded.value);
    }

    #[test]
    fn legacy_binary_format() {
        let codec = ValueCodec::default();
        let cbor = serde_cbor::to_vec(&sample()).unwrap();

        let decoded = codec.decode("k", &cbor).unwrap();
        assert_eq!(Format::LegacyBinary, decoded.format);
        assert_eq!(sample(), decoded.value);

        let compressed = compression::deflate(&cbor).unwrap();
        let decoded = codec.decode("k", &compressed).unwrap();
        assert_eq!(Format::LegacyBinary, decoded.format);
        assert_eq!(sample(), decoded.value);
    }

    #[test]
    fn compressed_garbage_is_corrupt() {
        let compressed = compression::deflate(b"neither xml nor cbor").unwrap();
        assert_matches!(
            Err(Error::CorruptPropertyValue { .. }),
            ValueCodec::default().decode("k", &compressed)
        );
    }

    #[test]
    fn corrupt_value_carries_snippet() {
        let mut raw = b"\x01not a value\n".to_vec();
        raw.extend(std::iter::repeat(b'z').take(100));

        match ValueCodec::default().decode("user.{DAV:}foo", &raw) {
            Err(Error::CorruptPropertyValue { key, len, snippet }) => {
                assert_eq!("user.{DAV:}foo", key);
                assert_eq!(raw.len(), len);
                assert!(snippet.starts_with("\\x01not a value\\n"));
                assert!(snippet.ends_with("z..."));
            }
            r => panic!("Unexpected result: {:?}", r),
        }
    }

    proptest! {
        #[test]
        fn current_format_preserves_values(
            text in "[^\\x00-\\x1F\\x7F]{1,80}",
            attr in "[^\\x00-\\x1F\\x7F]{0,20}",
            nested in prop::bool::ANY,
        ) {
            let mut value = Element::new(PropertyName::new("DAV:", "displayname"))
                .with_attribute(PropertyName::new("urn:x", "note"), attr);
            value = if nested {
                value.with_child(
                    Element::new(PropertyName::new("ns1", "inner"))
                        .with_text(text))
            } else {
                value.with_text(text)
            };

            let codec = ValueCodec::default();
            let decoded = codec.decode("k", &codec.encode(&value).unwrap())
                .unwrap();
            prop_assert_eq!(Format::Current, decoded.format);
            prop_assert_eq!(value, decoded.value);
        }
    }
}
