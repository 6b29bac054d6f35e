// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Security access handshake for BMW/Mini iDrive head units.
//!
//! Companion apps authenticate to the head unit in two steps. First they
//! upload a PKCS#7 certificate bundle: the app's own bundle with the vendor
//! root removed and the vendor's touch command certificate spliced in (see
//! [merge]). Then they answer a 16 byte challenge with an MD5withRSA
//! signature made with the app's private key (see [challenge]).
//!
//! The private key ships in a PKCS#12 keystore ([keystore]) whose passphrase
//! is distributed in obfuscated form ([passphrase]).
//!
//! Every operation is a pure transformation of in-memory buffers. Fetching
//! the vendor bundle from the vendor's security service is left to callers.

mod asn1;
pub mod certificate;
pub mod challenge;
pub mod cli;
pub mod distinguished_name;
pub mod error;
pub mod keystore;
pub mod merge;
pub mod passphrase;
pub mod pkcs7;
pub mod services;
pub mod store;

pub use {
    certificate::Certificate,
    challenge::{sign_challenge, sign_challenge_for, CertificateType, SigningKey},
    error::{ErrorKind, SasError},
    merge::{merge_vendor_cert, merge_vendor_cert_preserving_envelope, MergeStrategy},
    passphrase::decode_passphrase,
    pkcs7::SignedCertificateEnvelope,
    store::{common_name, load_collection, load_envelope, serialize_collection, serialize_envelope},
};
