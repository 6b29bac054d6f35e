// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Low-level DER helpers shared by the name and PKCS#7 code.
//!
//! PKCS#7 edits need to re-emit untouched fields byte for byte, so values
//! are walked as raw tag/length/value triples rather than decoded into
//! typed structures.

use der::{asn1::AnyRef, Encode, Reader, SliceReader, Tag, TagNumber};

/// Split the content octets of a constructed value into its elements.
pub(crate) fn children(content: &[u8]) -> Result<Vec<AnyRef<'_>>, der::Error> {
    let mut reader = SliceReader::new(content)?;
    let mut values = vec![];

    while !reader.is_finished() {
        values.push(reader.decode::<AnyRef<'_>>()?);
    }

    Ok(values)
}

/// Encode a complete value from a tag and its content octets.
pub(crate) fn encode_tlv(tag: Tag, content: &[u8]) -> Result<Vec<u8>, der::Error> {
    AnyRef::new(tag, content)?.to_der()
}

/// The re-encoded tag, length and content of a parsed value.
pub(crate) fn raw_tlv(value: &AnyRef<'_>) -> Result<Vec<u8>, der::Error> {
    value.to_der()
}

pub(crate) fn context_tag(number: u8, constructed: bool) -> Tag {
    Tag::ContextSpecific {
        constructed,
        number: TagNumber::new(number),
    }
}

/// Whether `tag` is the given context specific tag, regardless of form.
pub(crate) fn is_context_tag(tag: Tag, number: u8) -> bool {
    matches!(tag, Tag::ContextSpecific { number: n, .. } if n.value() == number)
}
