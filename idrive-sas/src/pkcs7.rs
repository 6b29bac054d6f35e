// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PKCS#7 `SignedData` certificate envelopes.
//!
//! Head units receive certificate chains as degenerate PKCS#7 `SignedData`
//! structures. Vendor bundles may also carry CRLs and signer infos, which
//! must survive an edit untouched. So instead of decoding into a typed
//! model and re-encoding it, [SignedCertificateEnvelope] holds every field
//! except the certificate list as the raw DER it was read from.
//!
//! ```asn.1
//! ContentInfo ::= SEQUENCE {
//!   contentType ContentType,
//!   content [0] EXPLICIT ANY DEFINED BY contentType }
//!
//! SignedData ::= SEQUENCE {
//!   version CMSVersion,
//!   digestAlgorithms DigestAlgorithmIdentifiers,
//!   encapContentInfo EncapsulatedContentInfo,
//!   certificates [0] IMPLICIT CertificateSet OPTIONAL,
//!   crls [1] IMPLICIT RevocationInfoChoices OPTIONAL,
//!   signerInfos SignerInfos }
//! ```

use {
    crate::{
        asn1::{children, context_tag, encode_tlv, is_context_tag, raw_tlv},
        certificate::Certificate,
        error::SasError,
    },
    der::{
        asn1::{AnyRef, ObjectIdentifier},
        Decode, Encode, Tag, Tagged,
    },
    log::{debug, warn},
    pem::{EncodeConfig, LineEnding, Pem},
};

/// Content type of PKCS#7 `SignedData`.
pub const OID_SIGNED_DATA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// Content type of PKCS#7 `Data`.
pub const OID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");

/// PEM labels PKCS#7 data is found under.
const PEM_TAGS: &[&str] = &["PKCS7", "CMS"];

/// An entry in the `certificates` field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CertificateChoice {
    /// A plain X.509 certificate.
    Certificate(Certificate),
    /// Any other choice (attribute certificates and the like), as raw DER.
    Other(Vec<u8>),
}

impl CertificateChoice {
    pub fn certificate(&self) -> Option<&Certificate> {
        match self {
            Self::Certificate(cert) => Some(cert),
            Self::Other(_) => None,
        }
    }

    fn to_der(&self) -> Vec<u8> {
        match self {
            Self::Certificate(cert) => cert.der().to_vec(),
            Self::Other(data) => data.clone(),
        }
    }
}

/// A PKCS#7 `SignedData` structure, open for editing of its certificates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedCertificateEnvelope {
    version: Vec<u8>,
    digest_algorithms: Vec<u8>,
    encapsulated_content: Vec<u8>,
    certificates: Option<Vec<CertificateChoice>>,
    crls: Option<Vec<u8>>,
    signer_infos: Vec<u8>,
}

impl SignedCertificateEnvelope {
    /// Construct a degenerate envelope holding only certificates.
    ///
    /// This is the shape `openssl crl2pkcs7 -nocrl` produces: version 1, no
    /// digest algorithms, empty `Data` content and no signers.
    pub fn new(certificates: impl IntoIterator<Item = Certificate>) -> Result<Self, SasError> {
        let encapsulated_content = encode_tlv(Tag::Sequence, &OID_DATA.to_der()?)?;

        Ok(Self {
            version: encode_tlv(Tag::Integer, &[1])?,
            digest_algorithms: encode_tlv(Tag::Set, &[])?,
            encapsulated_content,
            certificates: Some(
                certificates
                    .into_iter()
                    .map(CertificateChoice::Certificate)
                    .collect(),
            ),
            crls: None,
            signer_infos: encode_tlv(Tag::Set, &[])?,
        })
    }

    /// Parse a DER encoded `ContentInfo` wrapping `SignedData`.
    pub fn from_der(data: &[u8]) -> Result<Self, SasError> {
        let content_info = AnyRef::from_der(data)?;
        content_info.tag().assert_eq(Tag::Sequence)?;

        let fields = children(content_info.value())?;
        let (content_type, content) = match fields.as_slice() {
            [content_type, content] => (content_type, content),
            _ => {
                return Err(SasError::EnvelopeMalformed(format!(
                    "ContentInfo has {} fields",
                    fields.len()
                )))
            }
        };

        if content_type.decode_as::<ObjectIdentifier>()? != OID_SIGNED_DATA {
            return Err(SasError::EnvelopeNotFound);
        }
        if !is_context_tag(content.tag(), 0) {
            return Err(SasError::EnvelopeMalformed(format!(
                "unexpected content tag {}",
                content.tag()
            )));
        }

        let signed_data = match children(content.value())?.as_slice() {
            [signed_data] => *signed_data,
            _ => {
                return Err(SasError::EnvelopeMalformed(
                    "explicit content must hold a single value".into(),
                ))
            }
        };
        signed_data.tag().assert_eq(Tag::Sequence)?;

        Self::from_signed_data_fields(children(signed_data.value())?)
    }

    fn from_signed_data_fields(fields: Vec<AnyRef<'_>>) -> Result<Self, SasError> {
        let mut fields = fields.into_iter().peekable();

        let mut required = |name: &str, tag: Tag| -> Result<Vec<u8>, SasError> {
            let value = fields
                .next()
                .ok_or_else(|| SasError::EnvelopeMalformed(format!("missing {name}")))?;
            if value.tag() != tag {
                return Err(SasError::EnvelopeMalformed(format!(
                    "{name} has tag {}; expected {tag}",
                    value.tag()
                )));
            }

            Ok(raw_tlv(&value)?)
        };

        let version = required("version", Tag::Integer)?;
        let digest_algorithms = required("digestAlgorithms", Tag::Set)?;
        let encapsulated_content = required("encapContentInfo", Tag::Sequence)?;

        let certificates = match fields.next_if(|value| is_context_tag(value.tag(), 0)) {
            Some(value) => Some(
                children(value.value())?
                    .into_iter()
                    .map(|choice| {
                        let data = raw_tlv(&choice)?;

                        if choice.tag() == Tag::Sequence {
                            Ok(CertificateChoice::Certificate(Certificate::from_der(data)?))
                        } else {
                            debug!("retaining certificate choice with tag {}", choice.tag());
                            Ok(CertificateChoice::Other(data))
                        }
                    })
                    .collect::<Result<Vec<_>, SasError>>()?,
            ),
            None => None,
        };

        let crls = fields
            .next_if(|value| is_context_tag(value.tag(), 1))
            .map(|value| raw_tlv(&value))
            .transpose()?;

        let signer_infos = match fields.next() {
            Some(value) if value.tag() == Tag::Set => raw_tlv(&value)?,
            Some(value) => {
                return Err(SasError::EnvelopeMalformed(format!(
                    "signerInfos has tag {}",
                    value.tag()
                )))
            }
            None => return Err(SasError::EnvelopeMalformed("missing signerInfos".into())),
        };

        if fields.next().is_some() {
            return Err(SasError::EnvelopeMalformed(
                "trailing fields after signerInfos".into(),
            ));
        }

        Ok(Self {
            version,
            digest_algorithms,
            encapsulated_content,
            certificates,
            crls,
            signer_infos,
        })
    }

    /// Parse PEM (`PKCS7` or `CMS` blocks) or DER data.
    ///
    /// The first PEM block carrying one of those labels is used.
    pub fn from_pem_or_der(data: &[u8]) -> Result<Self, SasError> {
        if !is_pem(data) {
            return Self::from_der(data);
        }

        let blocks = pem::parse_many(data)?;
        let block = blocks
            .iter()
            .find(|block| PEM_TAGS.contains(&block.tag()))
            .ok_or(SasError::EnvelopeNotFound)?;

        if blocks.len() > 1 {
            warn!(
                "using first {} block of {} PEM blocks",
                block.tag(),
                blocks.len()
            );
        }

        Self::from_der(block.contents())
    }

    /// The `certificates` entries, in order.
    ///
    /// `None` if the field is absent.
    pub fn certificate_choices(&self) -> Option<&[CertificateChoice]> {
        self.certificates.as_deref()
    }

    /// X.509 certificates, in order, skipping other certificate choices.
    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates
            .iter()
            .flatten()
            .filter_map(CertificateChoice::certificate)
    }

    /// The raw `[1] IMPLICIT` CRL field, tag included.
    pub fn crls(&self) -> Option<&[u8]> {
        self.crls.as_deref()
    }

    /// The raw `signerInfos` SET, tag included.
    pub fn signer_infos(&self) -> &[u8] {
        &self.signer_infos
    }

    /// Replace the X.509 certificates.
    ///
    /// Certificate choices that are not plain X.509 certificates are kept
    /// and follow the new certificates. No other field is touched.
    pub fn replace_certificates(&mut self, certificates: impl IntoIterator<Item = Certificate>) {
        let others = self
            .certificates
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter(|choice| matches!(choice, CertificateChoice::Other(_)));

        let choices = certificates
            .into_iter()
            .map(CertificateChoice::Certificate)
            .chain(others)
            .collect::<Vec<_>>();

        self.certificates = Some(choices);
    }

    /// Encode to DER, emitting untouched fields exactly as they were read.
    pub fn to_der(&self) -> Result<Vec<u8>, SasError> {
        let mut signed_data = vec![];
        signed_data.extend_from_slice(&self.version);
        signed_data.extend_from_slice(&self.digest_algorithms);
        signed_data.extend_from_slice(&self.encapsulated_content);

        if let Some(choices) = &self.certificates {
            let content = choices
                .iter()
                .flat_map(CertificateChoice::to_der)
                .collect::<Vec<_>>();
            signed_data.extend(encode_tlv(context_tag(0, true), &content)?);
        }
        if let Some(crls) = &self.crls {
            signed_data.extend_from_slice(crls);
        }
        signed_data.extend_from_slice(&self.signer_infos);

        let signed_data = encode_tlv(Tag::Sequence, &signed_data)?;

        let mut content_info = OID_SIGNED_DATA.to_der()?;
        content_info.extend(encode_tlv(context_tag(0, true), &signed_data)?);

        Ok(encode_tlv(Tag::Sequence, &content_info)?)
    }

    /// Encode as a `PKCS7` PEM block with CRLF line endings.
    pub fn to_pem(&self) -> Result<String, SasError> {
        Ok(encode_pkcs7_pem(self.to_der()?))
    }
}

pub(crate) fn is_pem(data: &[u8]) -> bool {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());

    data[start..].starts_with(b"-----BEGIN ")
}

/// Encode DER as a `PKCS7` PEM block: CRLF line endings, 64 column body.
pub(crate) fn encode_pkcs7_pem(der: Vec<u8>) -> String {
    pem::encode_config(
        &Pem::new("PKCS7", der),
        EncodeConfig::new().set_line_ending(LineEnding::CRLF),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    const APP_BUNDLE: &[u8] = include_bytes!("testdata/app_bundle.p7b");
    const APP_BUNDLE_CRL: &[u8] = include_bytes!("testdata/app_bundle_crl.p7b");
    const ANDROID_CRL: &[u8] = include_bytes!("testdata/android.crl");

    fn common_names(envelope: &SignedCertificateEnvelope) -> Vec<String> {
        envelope
            .certificates()
            .map(|cert| cert.common_name().unwrap())
            .collect()
    }

    #[test]
    fn parse_bundle() {
        let envelope = SignedCertificateEnvelope::from_pem_or_der(APP_BUNDLE).unwrap();

        assert_eq!(
            common_names(&envelope),
            vec!["a4a_app_X", "a4a_android-ca", "a4a_root-ca"]
        );
        assert!(envelope.crls().is_none());
        assert_eq!(envelope.signer_infos(), &[0x31, 0x00]);
    }

    #[test]
    fn der_round_trip_is_exact() {
        for data in [APP_BUNDLE, APP_BUNDLE_CRL] {
            let der = pem::parse(data).unwrap().into_contents();
            let envelope = SignedCertificateEnvelope::from_der(&der).unwrap();

            assert_eq!(envelope.to_der().unwrap(), der);
        }
    }

    #[test]
    fn crl_field_is_raw() {
        let envelope = SignedCertificateEnvelope::from_pem_or_der(APP_BUNDLE_CRL).unwrap();
        let crl = pem::parse(ANDROID_CRL).unwrap().into_contents();

        let field = envelope.crls().unwrap();
        assert_eq!(field[0], 0xa1);
        assert!(field.ends_with(&crl));
    }

    #[test]
    fn new_matches_degenerate_layout() {
        let source = SignedCertificateEnvelope::from_pem_or_der(APP_BUNDLE).unwrap();
        let envelope =
            SignedCertificateEnvelope::new(source.certificates().cloned()).unwrap();

        assert_eq!(envelope, source);
        assert_eq!(
            envelope.to_der().unwrap(),
            pem::parse(APP_BUNDLE).unwrap().into_contents()
        );
    }

    #[test]
    fn replace_keeps_other_fields() {
        let mut envelope = SignedCertificateEnvelope::from_pem_or_der(APP_BUNDLE_CRL).unwrap();
        let original = envelope.clone();

        let root = envelope.certificates().last().cloned().unwrap();
        envelope.replace_certificates([root]);

        assert_eq!(common_names(&envelope), vec!["a4a_root-ca"]);
        assert_eq!(envelope.crls(), original.crls());
        assert_eq!(envelope.signer_infos(), original.signer_infos());

        let reparsed = SignedCertificateEnvelope::from_der(&envelope.to_der().unwrap()).unwrap();
        assert_eq!(reparsed, envelope);
    }

    #[test]
    fn other_choices_survive() {
        let mut envelope = SignedCertificateEnvelope::from_pem_or_der(APP_BUNDLE).unwrap();

        // [2] IMPLICIT stand-in for an attribute certificate.
        let other = vec![0xa2, 0x03, 0x02, 0x01, 0x05];
        let mut choices = envelope.certificate_choices().unwrap().to_vec();
        choices.insert(1, CertificateChoice::Other(other.clone()));
        envelope.certificates = Some(choices);

        let reparsed = SignedCertificateEnvelope::from_der(&envelope.to_der().unwrap()).unwrap();
        assert_eq!(reparsed.certificates().count(), 3);
        assert_eq!(reparsed.certificate_choices().unwrap().len(), 4);

        let mut replaced = reparsed.clone();
        replaced.replace_certificates(reparsed.certificates().take(1).cloned());
        assert_eq!(
            replaced.certificate_choices().unwrap()[1],
            CertificateChoice::Other(other)
        );
    }

    #[test]
    fn pem_output_uses_crlf() {
        let envelope = SignedCertificateEnvelope::from_pem_or_der(APP_BUNDLE).unwrap();
        let pem = envelope.to_pem().unwrap();

        assert!(pem.starts_with("-----BEGIN PKCS7-----\r\n"));
        assert!(pem.ends_with("-----END PKCS7-----\r\n"));
        assert!(pem
            .split("\r\n")
            .all(|line| line.len() <= 64 && !line.contains('\n')));

        let reparsed = SignedCertificateEnvelope::from_pem_or_der(pem.as_bytes()).unwrap();
        assert_eq!(reparsed, envelope);
    }

    #[test]
    fn reject_non_envelopes() {
        assert!(SignedCertificateEnvelope::from_der(&[0x30, 0x00]).is_err());
        assert!(SignedCertificateEnvelope::from_pem_or_der(b"garbage").is_err());

        // ContentInfo of type Data.
        let mut content_info = OID_DATA.to_der().unwrap();
        content_info.extend(encode_tlv(context_tag(0, true), &[0x04, 0x00]).unwrap());
        let data = encode_tlv(Tag::Sequence, &content_info).unwrap();
        assert!(matches!(
            SignedCertificateEnvelope::from_der(&data),
            Err(SasError::EnvelopeNotFound)
        ));

        // A certificate rather than an envelope.
        assert!(SignedCertificateEnvelope::from_pem_or_der(include_bytes!(
            "testdata/root.crt"
        ))
        .is_err());
    }
}
