// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! X.509 certificates as carried in head unit bundles.

use {
    crate::{distinguished_name::DistinguishedName, error::SasError},
    std::fmt::{Debug, Formatter},
    x509_certificate::CapturedX509Certificate,
};

/// An immutable parsed X.509 certificate.
///
/// Equality is defined by the encoded bytes.
#[derive(Clone)]
pub struct Certificate {
    inner: CapturedX509Certificate,
    subject: DistinguishedName,
}

impl Certificate {
    /// Construct an instance by parsing DER data.
    pub fn from_der(data: impl Into<Vec<u8>>) -> Result<Self, SasError> {
        let inner = CapturedX509Certificate::from_der(data)?;
        let subject = DistinguishedName::from_name(inner.subject_name())?;

        Ok(Self { inner, subject })
    }

    /// Construct an instance from the first `CERTIFICATE` block of PEM data.
    pub fn from_pem(data: impl AsRef<[u8]>) -> Result<Self, SasError> {
        let block = pem::parse_many(data)?
            .into_iter()
            .find(|pem| pem.tag() == "CERTIFICATE")
            .ok_or_else(|| {
                SasError::EnvelopeMalformed("no CERTIFICATE block in PEM data".into())
            })?;

        Self::from_der(block.contents())
    }

    /// The DER encoding this certificate was parsed from.
    pub fn der(&self) -> &[u8] {
        self.inner.constructed_data()
    }

    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    pub fn issuer(&self) -> Result<DistinguishedName, SasError> {
        Ok(DistinguishedName::from_name(self.inner.issuer_name())?)
    }

    /// Whether subject and issuer are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.inner.issuer_name() == self.inner.subject_name()
    }

    /// The subject Common Name, the de facto identifier of vendor certificates.
    pub fn common_name(&self) -> Option<String> {
        self.subject.common_name()
    }

    pub fn as_x509(&self) -> &CapturedX509Certificate {
        &self.inner
    }

    /// Encode as a PEM `CERTIFICATE` block.
    pub fn encode_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der().to_vec()))
    }
}

impl Debug for Certificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &format_args!("{}", self.subject))
            .field("der_len", &self.der().len())
            .finish()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der() == other.der()
    }
}

impl Eq for Certificate {}

impl TryFrom<CapturedX509Certificate> for Certificate {
    type Error = SasError;

    fn try_from(inner: CapturedX509Certificate) -> Result<Self, Self::Error> {
        let subject = DistinguishedName::from_name(inner.subject_name())?;

        Ok(Self { inner, subject })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_pem_certificate() {
        let cert = Certificate::from_pem(include_bytes!("testdata/root.crt")).unwrap();

        assert_eq!(cert.common_name().as_deref(), Some("a4a_root-ca"));
        assert_eq!(cert.subject().to_string(), "CN=a4a_root-ca,O=BMW Group");

        let again = Certificate::from_pem(cert.encode_pem()).unwrap();
        assert_eq!(again, cert);
        assert_eq!(again.der(), cert.der());
    }

    #[test]
    fn certificates_compare_by_encoding() {
        let root = Certificate::from_pem(include_bytes!("testdata/root.crt")).unwrap();
        let app = Certificate::from_pem(include_bytes!("testdata/app.crt")).unwrap();

        assert_ne!(root, app);
        assert_eq!(app.common_name().as_deref(), Some("a4a_app_X"));

        assert!(root.is_self_issued());
        assert!(!app.is_self_issued());
        assert_eq!(
            app.issuer().unwrap().common_name().as_deref(),
            Some("a4a_android-ca")
        );
    }

    #[test]
    fn names_render_like_openssl() {
        let cert = Certificate::from_pem(include_bytes!("testdata/comma.crt")).unwrap();

        assert_eq!(
            cert.subject().to_string(),
            r"CN=a4a_app_Comma\, Inc+OU=Connected,O=Example\, Inc."
        );
        assert_eq!(
            cert.issuer().unwrap().to_string(),
            "CN=a4a_android-ca,O=BMW Group"
        );
        assert_eq!(cert.common_name().as_deref(), Some("a4a_app_Comma, Inc"));
        assert!(!cert.is_self_issued());
    }

    #[test]
    fn reject_garbage() {
        assert!(Certificate::from_der(vec![0x30, 0x03, 0x02, 0x01, 0x01]).is_err());
        assert!(Certificate::from_pem(b"no pem here").is_err());
    }
}
