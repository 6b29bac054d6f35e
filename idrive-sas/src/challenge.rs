// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing head unit challenges.
//!
//! The head unit sends a 16 byte challenge and expects an MD5withRSA
//! (PKCS#1 v1.5) signature back. Newer `APP_AUTH` certificates sign the
//! challenge XORed with `MD5(02 00 00 00)` instead of the challenge itself.
//! The head unit does not negotiate algorithms, so MD5 it is.

use {
    crate::error::SasError,
    clap::ValueEnum,
    log::debug,
    md5::{Digest, Md5},
    once_cell::sync::Lazy,
    rsa::{
        pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, traits::PublicKeyParts,
        Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
    },
    serde::{Deserialize, Serialize},
    std::str::FromStr,
};

/// Length of challenges issued by head units.
pub const CHALLENGE_LENGTH: usize = 16;

/// Mask applied to challenges signed with `APP_AUTH` certificates.
static APP_AUTH_MASK: Lazy<Vec<u8>> = Lazy::new(|| Md5::digest([0x02, 0x00, 0x00, 0x00]).to_vec());

/// An RSA private key used to answer challenges.
#[derive(Clone, Debug)]
pub struct SigningKey {
    key: RsaPrivateKey,
}

impl SigningKey {
    /// Construct an instance by parsing PKCS#8 DER data.
    pub fn from_pkcs8_der(data: impl AsRef<[u8]>) -> Result<Self, SasError> {
        let key = RsaPrivateKey::from_pkcs8_der(data.as_ref())
            .map_err(|e| SasError::KeyParse(format!("when parsing PKCS#8 data: {e}")))?;

        Ok(Self { key })
    }

    /// Construct an instance by parsing PKCS#1 DER data.
    pub fn from_pkcs1_der(data: impl AsRef<[u8]>) -> Result<Self, SasError> {
        let key = RsaPrivateKey::from_pkcs1_der(data.as_ref())
            .map_err(|e| SasError::KeyParse(format!("when parsing PKCS#1 data: {e}")))?;

        Ok(Self { key })
    }

    /// Construct an instance from DER data in either PKCS#8 or PKCS#1 form.
    pub fn from_der(data: impl AsRef<[u8]>) -> Result<Self, SasError> {
        Self::from_pkcs8_der(data.as_ref()).or_else(|_| Self::from_pkcs1_der(data.as_ref()))
    }

    /// Construct an instance from a `PRIVATE KEY` or `RSA PRIVATE KEY` PEM block.
    pub fn from_pem(data: impl AsRef<[u8]>) -> Result<Self, SasError> {
        for block in pem::parse_many(data)? {
            match block.tag() {
                "PRIVATE KEY" => return Self::from_pkcs8_der(block.contents()),
                "RSA PRIVATE KEY" => return Self::from_pkcs1_der(block.contents()),
                tag => debug!("ignoring {} PEM block", tag),
            }
        }

        Err(SasError::KeyParse("no private key PEM block found".into()))
    }

    /// Length in bytes of signatures made with this key.
    pub fn signature_len(&self) -> usize {
        self.key.size()
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    pub fn as_rsa(&self) -> &RsaPrivateKey {
        &self.key
    }
}

impl From<RsaPrivateKey> for SigningKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self { key }
    }
}

/// Kind of app certificate, as announced in the vendor's app metadata.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateType {
    /// Challenges are signed as-is.
    #[default]
    Legacy,
    /// Challenges are masked before signing.
    AppAuth,
}

impl CertificateType {
    pub fn apply_xor(&self) -> bool {
        matches!(self, Self::AppAuth)
    }
}

impl FromStr for CertificateType {
    type Err = SasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "LEGACY" => Ok(Self::Legacy),
            "APP_AUTH" => Ok(Self::AppAuth),
            _ => Err(SasError::CliBadArgs(format!(
                "unknown certificate type {s}; expected LEGACY or APP_AUTH"
            ))),
        }
    }
}

/// The message actually signed for a challenge.
pub fn challenge_message(challenge: &[u8], apply_xor: bool) -> Vec<u8> {
    if apply_xor {
        challenge
            .iter()
            .zip(APP_AUTH_MASK.iter().cycle())
            .map(|(a, b)| a ^ b)
            .collect()
    } else {
        challenge.to_vec()
    }
}

/// Sign a challenge with MD5withRSA, optionally masking it first.
pub fn sign_challenge(
    key: &SigningKey,
    challenge: &[u8],
    apply_xor: bool,
) -> Result<Vec<u8>, SasError> {
    if challenge.len() != CHALLENGE_LENGTH {
        debug!(
            "signing {} byte challenge; head units issue {} bytes",
            challenge.len(),
            CHALLENGE_LENGTH
        );
    }

    let digest = Md5::digest(challenge_message(challenge, apply_xor));

    Ok(key.key.sign(Pkcs1v15Sign::new::<Md5>(), &digest)?)
}

/// Sign a challenge the way certificates of `certificate_type` require.
pub fn sign_challenge_for(
    key: &SigningKey,
    challenge: &[u8],
    certificate_type: CertificateType,
) -> Result<Vec<u8>, SasError> {
    debug!("signing challenge for {:?} certificate", certificate_type);

    sign_challenge(key, challenge, certificate_type.apply_xor())
}

/// Verify a challenge signature against a public key.
pub fn verify_challenge(
    key: &RsaPublicKey,
    challenge: &[u8],
    apply_xor: bool,
    signature: &[u8],
) -> Result<(), SasError> {
    let digest = Md5::digest(challenge_message(challenge, apply_xor));

    Ok(key.verify(Pkcs1v15Sign::new::<Md5>(), &digest, signature)?)
}

#[cfg(test)]
mod test {
    use super::*;

    const CHALLENGE: [u8; 16] = [
        0x6d, 0x58, 0x5f, 0x14, 0x72, 0x72, 0x19, 0x75, 0x4e, 0x73, 0x19, 0x38, 0x61, 0x2f, 0x50,
        0x78,
    ];

    fn app_key() -> SigningKey {
        SigningKey::from_pem(include_bytes!("testdata/app.key")).unwrap()
    }

    #[test]
    fn app_auth_mask() {
        assert_eq!(hex::encode(&*APP_AUTH_MASK), "f2dd0dedb2c260419ece4a9e03b2e828");
        assert_eq!(
            hex::encode(challenge_message(&CHALLENGE, true)),
            "9f8552f9c0b07934d0bd53a6629db850"
        );
        assert_eq!(challenge_message(&CHALLENGE, false), CHALLENGE);
    }

    #[test]
    fn mask_cycles_for_long_challenges() {
        let message = challenge_message(&[0u8; 20], true);

        assert_eq!(&message[0..16], APP_AUTH_MASK.as_slice());
        assert_eq!(&message[16..], &APP_AUTH_MASK[0..4]);
    }

    #[test]
    fn reference_signatures() -> Result<(), SasError> {
        let key = app_key();

        let plain = sign_challenge(&key, &CHALLENGE, false)?;
        let masked = sign_challenge(&key, &CHALLENGE, true)?;

        assert_eq!(plain, include_bytes!("testdata/sig_plain.bin"));
        assert_eq!(masked, include_bytes!("testdata/sig_xor.bin"));

        assert_ne!(plain, masked);
        assert_eq!(plain.len(), masked.len());
        assert_eq!(plain.len(), key.signature_len());
        assert_eq!(plain.len(), 192);

        verify_challenge(&key.public_key(), &CHALLENGE, false, &plain)?;
        verify_challenge(&key.public_key(), &CHALLENGE, true, &masked)?;
        assert!(verify_challenge(&key.public_key(), &CHALLENGE, true, &plain).is_err());

        Ok(())
    }

    #[test]
    fn certificate_types() -> Result<(), SasError> {
        let key = app_key();

        assert_eq!(
            sign_challenge_for(&key, &CHALLENGE, CertificateType::AppAuth)?,
            include_bytes!("testdata/sig_xor.bin")
        );
        assert_eq!(
            sign_challenge_for(&key, &CHALLENGE, CertificateType::Legacy)?,
            include_bytes!("testdata/sig_plain.bin")
        );

        assert_eq!("APP_AUTH".parse::<CertificateType>()?, CertificateType::AppAuth);
        assert_eq!("app-auth".parse::<CertificateType>()?, CertificateType::AppAuth);
        assert_eq!("Legacy".parse::<CertificateType>()?, CertificateType::Legacy);
        assert!("APPAUTH".parse::<CertificateType>().is_err());

        Ok(())
    }

    #[test]
    fn key_formats() {
        let key = app_key();
        let pkcs8 = pem::parse(include_bytes!("testdata/app.key").as_slice())
            .unwrap()
            .into_contents();

        assert_eq!(
            SigningKey::from_pkcs8_der(&pkcs8).unwrap().as_rsa(),
            key.as_rsa()
        );
        assert_eq!(SigningKey::from_der(&pkcs8).unwrap().as_rsa(), key.as_rsa());

        let err = SigningKey::from_pkcs1_der(&pkcs8).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Keystore);

        assert!(SigningKey::from_pem(include_bytes!("testdata/app.crt")).is_err());
    }
}
