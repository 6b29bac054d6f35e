// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PKCS#12 keystores holding an app's key and certificates.

use {
    crate::{certificate::Certificate, challenge::SigningKey, error::SasError},
    log::{debug, warn},
    zeroize::Zeroizing,
};

/// PKCS#12 `keyBag`, a private key without encryption.
const KEY_BAG_OID: &[u64] = &[1, 2, 840, 113549, 1, 12, 10, 1, 1];

fn bmp_string(s: &str) -> Zeroizing<Vec<u8>> {
    let utf16: Vec<u16> = s.encode_utf16().collect();

    let mut bytes = Zeroizing::new(Vec::with_capacity(utf16.len() * 2 + 2));
    for c in utf16 {
        bytes.push((c / 256) as u8);
        bytes.push((c % 256) as u8);
    }
    bytes.push(0x00);
    bytes.push(0x00);

    bytes
}

/// A bag found while walking a keystore.
enum Entry {
    Key(SigningKey),
    Certificate(Certificate),
}

/// Open a keystore and decode every key and certificate bag, in order.
fn read_entries(data: &[u8], passphrase: &str) -> Result<Vec<Entry>, SasError> {
    let pfx = p12::PFX::parse(data)
        .map_err(|e| SasError::KeystoreParse(format!("data does not appear to be PFX: {e:?}")))?;

    if !pfx.verify_mac(passphrase) {
        return Err(SasError::KeystoreBadPassword);
    }

    let data = match pfx.auth_safe {
        p12::ContentInfo::Data(data) => data,
        _ => {
            return Err(SasError::KeystoreParse(
                "unexpected PFX content info".to_string(),
            ));
        }
    };

    let content_infos = yasna::parse_der(&data, |reader| {
        reader.collect_sequence_of(p12::ContentInfo::parse)
    })
    .map_err(|e| SasError::KeystoreParse(format!("failed parsing inner ContentInfo: {e:?}")))?;

    let bmp_password = bmp_string(passphrase);
    let mut entries = vec![];

    for content in content_infos {
        let bags_data = match content {
            p12::ContentInfo::Data(inner) => inner,
            p12::ContentInfo::EncryptedData(encrypted) => {
                encrypted.data(&bmp_password).ok_or_else(|| {
                    SasError::KeystoreParse("failed decrypting inner EncryptedData".to_string())
                })?
            }
            p12::ContentInfo::OtherContext(_) => {
                warn!("skipping unsupported content in keystore");
                continue;
            }
        };

        let bags = yasna::parse_ber(&bags_data, |reader| {
            reader.collect_sequence_of(p12::SafeBag::parse)
        })
        .map_err(|e| {
            SasError::KeystoreParse(format!("failed parsing SafeBag within inner Data: {e:?}"))
        })?;

        for bag in bags {
            match bag.bag {
                p12::SafeBagKind::CertBag(p12::CertBag::X509(cert_data)) => {
                    entries.push(Entry::Certificate(Certificate::from_der(cert_data)?));
                }
                p12::SafeBagKind::CertBag(p12::CertBag::SDSI(_)) => {
                    debug!("skipping SDSI certificate bag");
                }
                p12::SafeBagKind::Pkcs8ShroudedKeyBag(key_bag) => {
                    let decrypted = Zeroizing::new(
                        key_bag
                            .decrypt(&bmp_password)
                            .ok_or(SasError::KeystoreBadKeyPassword)?,
                    );

                    entries.push(Entry::Key(SigningKey::from_pkcs8_der(decrypted.as_slice())?));
                }
                p12::SafeBagKind::OtherBagKind(other) => {
                    if other.bag_id.components().as_slice() == KEY_BAG_OID {
                        warn!("skipping unencrypted private key bag; only shrouded keys are read");
                    } else {
                        warn!("skipping unsupported bag type {} in keystore", other.bag_id);
                    }
                }
            }
        }
    }

    Ok(entries)
}

/// Load the first private key from PKCS#12 data.
///
/// Returns `None` if the keystore holds no private key.
pub fn load_private_key(data: &[u8], passphrase: &str) -> Result<Option<SigningKey>, SasError> {
    let key = read_entries(data, passphrase)?
        .into_iter()
        .find_map(|entry| match entry {
            Entry::Key(key) => Some(key),
            Entry::Certificate(_) => None,
        });

    if key.is_none() {
        warn!("keystore holds no private key");
    }

    Ok(key)
}

/// Load every X.509 certificate from PKCS#12 data, in keystore order.
pub fn load_public_certs(data: &[u8], passphrase: &str) -> Result<Vec<Certificate>, SasError> {
    let certs = read_entries(data, passphrase)?
        .into_iter()
        .filter_map(|entry| match entry {
            Entry::Certificate(cert) => Some(cert),
            Entry::Key(_) => None,
        })
        .collect::<Vec<_>>();

    debug!("loaded {} certificates from keystore", certs.len());

    Ok(certs)
}
