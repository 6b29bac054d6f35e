// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loading and serializing certificate collections.
//!
//! There are two paths. The collection path ([load_collection],
//! [serialize_collection]) only cares about the ordered list of
//! certificates and treats malformed input as "no certificates". The
//! envelope path ([load_envelope], [serialize_envelope]) round-trips the
//! complete PKCS#7 structure and reports malformed input as an error.

use {
    crate::{
        certificate::Certificate,
        error::SasError,
        pkcs7::{encode_pkcs7_pem, is_pem, SignedCertificateEnvelope},
    },
    log::{debug, warn},
};

/// Load the certificates in a PEM or DER encoded collection.
///
/// PEM input may hold any mix of `PKCS7` and `CERTIFICATE` blocks; other
/// blocks are ignored. DER input is either a PKCS#7 `ContentInfo` or a single
/// certificate. Certificate choices other than X.509 certificates are
/// skipped.
///
/// Returns `None` if the data cannot be parsed.
pub fn load_collection(data: &[u8]) -> Option<Vec<Certificate>> {
    match try_load_collection(data) {
        Ok(certs) => {
            debug!("loaded {} certificates", certs.len());
            Some(certs)
        }
        Err(e) => {
            warn!("unable to load certificate collection: {}", e);
            None
        }
    }
}

fn try_load_collection(data: &[u8]) -> Result<Vec<Certificate>, SasError> {
    if !is_pem(data) {
        return match SignedCertificateEnvelope::from_der(data) {
            Ok(envelope) => Ok(envelope.certificates().cloned().collect()),
            Err(SasError::EnvelopeNotFound) => Ok(vec![Certificate::from_der(data)?]),
            Err(e) => match Certificate::from_der(data) {
                Ok(cert) => Ok(vec![cert]),
                Err(_) => Err(e),
            },
        };
    }

    let mut certs = vec![];
    let mut recognized = false;

    for block in pem::parse_many(data)? {
        match block.tag() {
            "PKCS7" | "CMS" => {
                let envelope = SignedCertificateEnvelope::from_der(block.contents())?;
                certs.extend(envelope.certificates().cloned());
            }
            "CERTIFICATE" => {
                certs.push(Certificate::from_der(block.contents())?);
            }
            tag => {
                debug!("ignoring {} PEM block", tag);
                continue;
            }
        }
        recognized = true;
    }

    if recognized {
        Ok(certs)
    } else {
        Err(SasError::EnvelopeNotFound)
    }
}

/// The Common Name of a certificate's subject, if it has one.
pub fn common_name(cert: &Certificate) -> Option<String> {
    cert.common_name()
}

/// Serialize certificates as a fresh PKCS#7 PEM bundle.
///
/// The bundle carries no CRLs or signer infos.
pub fn serialize_collection<'a>(
    certs: impl IntoIterator<Item = &'a Certificate>,
) -> Result<Vec<u8>, SasError> {
    serialize_envelope(&SignedCertificateEnvelope::new(certs.into_iter().cloned())?)
}

/// Load a complete PKCS#7 `SignedData` structure from PEM or DER.
pub fn load_envelope(data: &[u8]) -> Result<SignedCertificateEnvelope, SasError> {
    SignedCertificateEnvelope::from_pem_or_der(data)
}

/// Serialize a PKCS#7 structure as PEM, preserving every field.
pub fn serialize_envelope(envelope: &SignedCertificateEnvelope) -> Result<Vec<u8>, SasError> {
    Ok(encode_pkcs7_pem(envelope.to_der()?).into_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    const APP_BUNDLE: &[u8] = include_bytes!("testdata/app_bundle.p7b");
    const APP_BUNDLE_CRL: &[u8] = include_bytes!("testdata/app_bundle_crl.p7b");

    fn names(certs: &[Certificate]) -> Vec<String> {
        certs.iter().filter_map(common_name).collect()
    }

    #[test]
    fn load_pem_bundle() {
        let certs = load_collection(APP_BUNDLE).unwrap();

        assert_eq!(
            names(&certs),
            vec!["a4a_app_X", "a4a_android-ca", "a4a_root-ca"]
        );
    }

    #[test]
    fn load_der_inputs() {
        let der = pem::parse(APP_BUNDLE).unwrap().into_contents();
        assert_eq!(load_collection(&der).unwrap().len(), 3);

        let cert = pem::parse(include_bytes!("testdata/root.crt").as_slice())
            .unwrap()
            .into_contents();
        assert_eq!(names(&load_collection(&cert).unwrap()), vec!["a4a_root-ca"]);
    }

    #[test]
    fn load_mixed_pem_blocks() {
        let mut data = include_bytes!("testdata/root.crt").to_vec();
        data.extend_from_slice(include_bytes!("testdata/android.crl"));
        data.extend_from_slice(include_bytes!("testdata/vendor_bundle_next.p7b"));

        assert_eq!(
            names(&load_collection(&data).unwrap()),
            vec![
                "a4a_root-ca",
                "a4a_root-ca",
                "a4a_app_BMWTouchCommand_Connection_00.00.11"
            ]
        );
    }

    #[test]
    fn load_unparseable() {
        assert!(load_collection(b"").is_none());
        assert!(load_collection(b"not a certificate").is_none());
        assert!(load_collection(include_bytes!("testdata/android.crl")).is_none());
        assert!(load_collection(&[0x30, 0x03, 0x02, 0x01, 0x01]).is_none());
    }

    #[test]
    fn collection_round_trip() {
        let certs = load_collection(APP_BUNDLE_CRL).unwrap();

        for count in 1..=certs.len() {
            let subset = &certs[certs.len() - count..];
            let serialized = serialize_collection(subset).unwrap();

            assert_eq!(load_collection(&serialized).unwrap(), subset);
        }

        let mut reversed = certs.clone();
        reversed.reverse();
        assert_eq!(
            load_collection(&serialize_collection(&reversed).unwrap()).unwrap(),
            reversed
        );
    }

    #[test]
    fn serialize_collection_framing() {
        let certs = load_collection(APP_BUNDLE).unwrap();
        let serialized = String::from_utf8(serialize_collection(&certs).unwrap()).unwrap();

        assert!(serialized.starts_with("-----BEGIN PKCS7-----\r\n"));
        assert!(serialized.ends_with("\r\n-----END PKCS7-----\r\n"));

        let body = serialized.split("\r\n").collect::<Vec<_>>();
        let body = &body[1..body.len() - 2];
        assert!(body[..body.len() - 1].iter().all(|line| line.len() == 64));
        assert!(!body.last().unwrap().is_empty());
    }

    #[test]
    fn envelope_round_trip() {
        let envelope = load_envelope(APP_BUNDLE_CRL).unwrap();
        let serialized = serialize_envelope(&envelope).unwrap();

        assert_eq!(load_envelope(&serialized).unwrap(), envelope);
        assert_eq!(
            pem::parse(&serialized).unwrap().contents(),
            pem::parse(APP_BUNDLE_CRL).unwrap().contents()
        );
    }

    #[test]
    fn envelope_errors_are_loud() {
        assert!(load_envelope(b"").is_err());
        assert!(load_envelope(b"-----BEGIN PKCS7-----\r\nAAAA\r\n-----END PKCS7-----\r\n").is_err());
        assert!(load_envelope(include_bytes!("testdata/app.crt")).is_err());
    }
}
