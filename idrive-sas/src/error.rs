// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Coarse classification of [SasError] values.
///
/// The handshake involves several independent parties (the app bundle, the
/// vendor security service, the keystore and the head unit), so callers
/// usually want to know which of them produced bad input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The obfuscated passphrase token could not be decoded.
    Decode,
    /// Certificate or PKCS#7 data was malformed.
    Parse,
    /// The signature operation failed.
    Signing,
    /// The PKCS#12 container could not be opened.
    Keystore,
    /// Configuration could not be loaded.
    Config,
    /// Filesystem I/O failed.
    Io,
    /// Bad command line usage.
    Cli,
}

/// Unified error type for the crate.
#[derive(Debug, Error)]
pub enum SasError {
    #[error("token is not valid base64: {0}")]
    TokenBase64(#[from] base64::DecodeError),

    #[error("token is too small: {0} bytes")]
    TokenTooShort(usize),

    #[error("high byte found at {0}")]
    TokenHighByte(usize),

    #[error("out of bounds {index} when decoding token at {offset} (package name has {length} characters)")]
    TokenIndexOutOfBounds {
        index: i8,
        offset: usize,
        length: usize,
    },

    #[error("passphrase cannot be encoded: {0}")]
    PassphraseUnencodable(String),

    #[error("package name cannot be used for encoding: {0}")]
    PackageNameUnusable(String),

    #[error("ASN.1 error: {0}")]
    Der(#[from] der::Error),

    #[error("X.509 certificate error: {0}")]
    X509(#[from] x509_certificate::X509CertificateError),

    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    #[error("malformed PKCS#7 data: {0}")]
    EnvelopeMalformed(String),

    #[error("no PKCS#7 SignedData found in input")]
    EnvelopeNotFound,

    #[error("error parsing PFX data: {0}")]
    KeystoreParse(String),

    #[error("incorrect keystore password")]
    KeystoreBadPassword,

    #[error("incorrect key password")]
    KeystoreBadKeyPassword,

    #[error("unable to parse private key: {0}")]
    KeyParse(String),

    #[error("signing failed: {0}")]
    Signing(#[from] rsa::Error),

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad arguments: {0}")]
    CliBadArgs(String),
}

impl From<figment::Error> for SasError {
    fn from(e: figment::Error) -> Self {
        Self::Config(Box::new(e))
    }
}

impl SasError {
    /// Which party or layer this error should be attributed to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TokenBase64(_)
            | Self::TokenTooShort(_)
            | Self::TokenHighByte(_)
            | Self::TokenIndexOutOfBounds { .. }
            | Self::PassphraseUnencodable(_)
            | Self::PackageNameUnusable(_) => ErrorKind::Decode,
            Self::Der(_)
            | Self::X509(_)
            | Self::Pem(_)
            | Self::EnvelopeMalformed(_)
            | Self::EnvelopeNotFound => ErrorKind::Parse,
            Self::KeystoreParse(_)
            | Self::KeystoreBadPassword
            | Self::KeystoreBadKeyPassword
            | Self::KeyParse(_) => ErrorKind::Keystore,
            Self::Signing(_) => ErrorKind::Signing,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::CliBadArgs(_) => ErrorKind::Cli,
        }
    }
}
