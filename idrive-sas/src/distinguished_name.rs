// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! X.500 distinguished names.
//!
//! Certificates are identified by the Common Name of their subject. Names are
//! rendered in the RFC 2253 string form (most significant RDN last, special
//! characters backslash escaped) and attributes are looked up by splitting
//! that string on unescaped separators, so a value such as
//! `CN=Example\, Inc` stays one field.

use {
    crate::asn1::{children, raw_tlv},
    bcder::{encode::Values, Mode},
    der::{
        asn1::{AnyRef, ObjectIdentifier},
        Decode, Tag, Tagged,
    },
    std::fmt::{Display, Formatter},
    x509_certificate::rfc3280::Name,
};

pub const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// Attribute types that have a keyword in the string form.
const KEYWORDS: [(ObjectIdentifier, &str); 9] = [
    (OID_COMMON_NAME, "CN"),
    (ObjectIdentifier::new_unwrap("2.5.4.6"), "C"),
    (ObjectIdentifier::new_unwrap("2.5.4.7"), "L"),
    (ObjectIdentifier::new_unwrap("2.5.4.8"), "ST"),
    (ObjectIdentifier::new_unwrap("2.5.4.9"), "STREET"),
    (ObjectIdentifier::new_unwrap("2.5.4.10"), "O"),
    (ObjectIdentifier::new_unwrap("2.5.4.11"), "OU"),
    (ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.1"), "UID"),
    (ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.25"), "DC"),
];

/// A single `type=value` pair of a relative distinguished name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NameAttribute {
    oid: ObjectIdentifier,
    /// Decoded value, if it is one of the directory string types.
    text: Option<String>,
    /// Encoded value, used for non-string values.
    encoded: Vec<u8>,
}

impl NameAttribute {
    fn from_der(value: AnyRef<'_>) -> Result<Self, der::Error> {
        value.tag().assert_eq(Tag::Sequence)?;

        let fields = children(value.value())?;
        if fields.len() != 2 {
            return Err(Tag::Sequence.value_error());
        }

        let oid = fields[0].decode_as::<ObjectIdentifier>()?;
        let text = directory_string(&fields[1]);
        let encoded = raw_tlv(&fields[1])?;

        Ok(Self { oid, text, encoded })
    }

    pub fn oid(&self) -> &ObjectIdentifier {
        &self.oid
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The attribute type keyword, or the dotted OID if it has none.
    pub fn keyword(&self) -> String {
        KEYWORDS
            .iter()
            .find(|(oid, _)| *oid == self.oid)
            .map(|(_, keyword)| keyword.to_string())
            .unwrap_or_else(|| self.oid.to_string())
    }

    fn rfc2253_value(&self) -> String {
        match &self.text {
            Some(text) => escape_value(text),
            None => format!("#{}", hex::encode(&self.encoded)),
        }
    }
}

fn directory_string(value: &AnyRef<'_>) -> Option<String> {
    match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String => {
            std::str::from_utf8(value.value()).ok().map(String::from)
        }
        Tag::TeletexString => Some(value.value().iter().map(|b| *b as char).collect()),
        Tag::BmpString => {
            if value.value().len() % 2 != 0 {
                return None;
            }
            let units = value
                .value()
                .chunks(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect::<Vec<_>>();
            String::from_utf16(&units).ok()
        }
        _ => None,
    }
}

/// A parsed X.500 name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DistinguishedName {
    rdns: Vec<Vec<NameAttribute>>,
}

impl DistinguishedName {
    /// Parse a DER encoded `Name`.
    pub fn from_der(data: &[u8]) -> Result<Self, der::Error> {
        Self::from_value(AnyRef::from_der(data)?)
    }

    fn from_value(name: AnyRef<'_>) -> Result<Self, der::Error> {
        name.tag().assert_eq(Tag::Sequence)?;

        let rdns = children(name.value())?
            .into_iter()
            .map(|rdn| {
                rdn.tag().assert_eq(Tag::Set)?;
                children(rdn.value())?
                    .into_iter()
                    .map(NameAttribute::from_der)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, der::Error>>()?;

        Ok(Self { rdns })
    }

    /// Convert a name parsed by `x509-certificate`, such as a certificate subject.
    pub fn from_name(name: &Name) -> Result<Self, der::Error> {
        Self::from_der(name.encode_ref().to_captured(Mode::Der).as_slice())
    }

    /// Relative distinguished names in encoded order (most significant first).
    pub fn rdns(&self) -> impl Iterator<Item = &[NameAttribute]> {
        self.rdns.iter().map(|rdn| rdn.as_slice())
    }

    /// The RFC 2253 string form of this name.
    ///
    /// Attributes of a multi-valued RDN are also listed in reverse, as
    /// openssl and `X500Principal` print them.
    pub fn rfc2253(&self) -> String {
        self.rdns
            .iter()
            .rev()
            .map(|rdn| {
                rdn.iter()
                    .rev()
                    .map(|attribute| {
                        format!("{}={}", attribute.keyword(), attribute.rfc2253_value())
                    })
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The Common Name (OID 2.5.4.3), if present.
    pub fn common_name(&self) -> Option<String> {
        common_name(&self.rfc2253())
    }
}

impl Display for DistinguishedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rfc2253())
    }
}

fn escape_value(value: &str) -> String {
    let count = value.chars().count();
    let mut escaped = String::with_capacity(value.len());

    for (i, c) in value.chars().enumerate() {
        let needs_escape = match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' => true,
            '#' => i == 0,
            ' ' => i == 0 || i + 1 == count,
            _ => false,
        };

        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

/// Undo RFC 2253 escaping, including `\XX` hex pairs.
fn unescape_value(value: &str) -> String {
    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        let Some(next) = chars.next() else {
            bytes.push(b'\\');
            break;
        };

        let hex_pair = chars
            .peek()
            .filter(|second| next.is_ascii_hexdigit() && second.is_ascii_hexdigit())
            .and_then(|second| u8::from_str_radix(&format!("{next}{second}"), 16).ok());

        match hex_pair {
            Some(byte) => {
                chars.next();
                bytes.push(byte);
            }
            None => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Trim surrounding whitespace that is not escaped.
fn trim_value(value: &str) -> &str {
    let value = value.trim_start();
    let trimmed = value.trim_end();

    let trailing_backslashes = trimmed.chars().rev().take_while(|c| *c == '\\').count();
    if trailing_backslashes % 2 == 1 && trimmed.len() < value.len() {
        let escaped_len = value[trimmed.len()..]
            .chars()
            .next()
            .map(char::len_utf8)
            .unwrap_or(0);
        &value[..trimmed.len() + escaped_len]
    } else {
        trimmed
    }
}

/// Split on `separator` wherever it is not escaped by a backslash.
fn split_unescaped(value: &str, separator: char) -> Vec<&str> {
    let mut pieces = vec![];
    let mut start = 0;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == separator {
            pieces.push(&value[start..i]);
            start = i + c.len_utf8();
        }
    }
    pieces.push(&value[start..]);

    pieces
}

/// Split a string form name into its relative distinguished names.
pub fn split_rdns(dn: &str) -> Vec<&str> {
    if dn.trim().is_empty() {
        vec![]
    } else {
        split_unescaped(dn, ',')
    }
}

/// Turn string form RDNs into `(type, value)` pairs with values unescaped.
///
/// Multi-valued RDNs contribute one pair per `+` separated attribute.
pub fn parse_rdn_pieces<'a>(rdns: impl IntoIterator<Item = &'a str>) -> Vec<(String, String)> {
    rdns.into_iter()
        .flat_map(|rdn| split_unescaped(rdn, '+'))
        .filter_map(|attribute| {
            let pieces = split_unescaped(attribute, '=');
            let key = pieces.first()?.trim();
            if key.is_empty() || pieces.len() < 2 {
                return None;
            }
            // Any further unescaped '=' belongs to the value.
            let value = &attribute[pieces[0].len() + 1..];

            Some((key.to_string(), unescape_value(trim_value(value))))
        })
        .collect()
}

/// Look up an attribute of a string form name by keyword.
///
/// When the keyword repeats, the last occurrence wins.
pub fn find_attribute(dn: &str, keyword: &str) -> Option<String> {
    parse_rdn_pieces(split_rdns(dn))
        .into_iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(keyword))
        .last()
        .map(|(_, value)| value)
}

/// The Common Name of a string form name.
pub fn common_name(dn: &str) -> Option<String> {
    find_attribute(dn, "CN")
}
