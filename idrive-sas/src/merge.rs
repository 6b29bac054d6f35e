// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Splicing the vendor's touch command certificate into an app bundle.
//!
//! Apps ship a PKCS#7 bundle with their own certificate chain, which ends at
//! the vendor root. Before it is sent to the head unit, the root is removed
//! and the `a4a_app_BMWTouchCommand_Connection` certificate obtained from the
//! vendor's security service is appended.
//!
//! Head unit firmwares differ in how much of the bundle they validate, so two
//! output forms exist. [merge_vendor_cert] writes the merged list into a fresh
//! bundle. [merge_vendor_cert_preserving_envelope] edits the app's own
//! envelope, leaving its CRLs and signer infos byte for byte as they were.

use {
    crate::{
        certificate::Certificate,
        error::SasError,
        store::{load_collection, load_envelope, serialize_collection, serialize_envelope},
    },
    clap::ValueEnum,
    log::{info, warn},
    serde::{Deserialize, Serialize},
};

/// Common Name of the vendor root certificate removed from app bundles.
pub const VENDOR_ROOT_COMMON_NAME: &str = "a4a_root-ca";

/// Common Name prefix of the vendor certificates added to app bundles.
pub const TOUCH_COMMAND_COMMON_NAME_PREFIX: &str = "a4a_app_BMWTouchCommand_Connection";

/// How a merged certificate list is written out.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// A fresh PKCS#7 bundle holding only the certificates.
    #[default]
    Flat,
    /// The app bundle's envelope with only its certificates replaced.
    PreserveEnvelope,
}

/// Combine app and vendor certificates.
///
/// App certificates are kept in order, minus any named
/// [VENDOR_ROOT_COMMON_NAME]. Vendor certificates whose Common Name starts
/// with [TOUCH_COMMAND_COMMON_NAME_PREFIX] follow, unless the exact same
/// certificate is already present, so merging an already merged bundle again
/// changes nothing.
pub fn merge_certificates(app: &[Certificate], vendor: &[Certificate]) -> Vec<Certificate> {
    let mut merged = app
        .iter()
        .filter(|cert| {
            if cert.common_name().as_deref() == Some(VENDOR_ROOT_COMMON_NAME) {
                info!("removing {} from app certificates", cert.subject());
                false
            } else {
                true
            }
        })
        .cloned()
        .collect::<Vec<_>>();

    let mut selected = 0;
    for cert in vendor {
        let is_touch_command = cert
            .common_name()
            .map(|cn| cn.starts_with(TOUCH_COMMAND_COMMON_NAME_PREFIX))
            .unwrap_or(false);

        if !is_touch_command {
            continue;
        }
        selected += 1;

        if merged.contains(cert) {
            info!("{} already present; not adding again", cert.subject());
        } else {
            info!("adding vendor certificate {}", cert.subject());
            merged.push(cert.clone());
        }
    }

    if selected == 0 {
        warn!(
            "vendor bundle holds no {}* certificate",
            TOUCH_COMMAND_COMMON_NAME_PREFIX
        );
    }

    merged
}

/// Merge the vendor certificate into an app bundle, producing a fresh bundle.
///
/// Either input failing to parse contributes no certificates.
pub fn merge_vendor_cert(app_bundle: &[u8], vendor_bundle: &[u8]) -> Result<Vec<u8>, SasError> {
    let app = load_collection(app_bundle).unwrap_or_default();
    let vendor = load_collection(vendor_bundle).unwrap_or_default();

    serialize_collection(&merge_certificates(&app, &vendor))
}

/// Merge the vendor certificate into an app bundle, editing its envelope.
///
/// Everything in the app bundle except the certificate list is emitted
/// unchanged. Fails if the app bundle is not a PKCS#7 `SignedData`
/// structure. An unparseable vendor bundle contributes no certificates.
pub fn merge_vendor_cert_preserving_envelope(
    app_bundle: &[u8],
    vendor_bundle: &[u8],
) -> Result<Vec<u8>, SasError> {
    let mut envelope = load_envelope(app_bundle)?;
    let app = envelope.certificates().cloned().collect::<Vec<_>>();
    let vendor = load_collection(vendor_bundle).unwrap_or_default();

    envelope.replace_certificates(merge_certificates(&app, &vendor));

    serialize_envelope(&envelope)
}

/// Merge using the given output form.
pub fn merge_with_strategy(
    strategy: MergeStrategy,
    app_bundle: &[u8],
    vendor_bundle: &[u8],
) -> Result<Vec<u8>, SasError> {
    match strategy {
        MergeStrategy::Flat => merge_vendor_cert(app_bundle, vendor_bundle),
        MergeStrategy::PreserveEnvelope => {
            merge_vendor_cert_preserving_envelope(app_bundle, vendor_bundle)
        }
    }
}
