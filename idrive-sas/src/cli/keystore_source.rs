// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        certificate::Certificate,
        challenge::SigningKey,
        error::SasError,
        keystore::{load_private_key, load_public_certs},
        passphrase::decode_passphrase,
    },
    clap::Args,
    log::{info, warn},
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
    zeroize::Zeroizing,
};

/// Read the first line of a file holding a secret.
pub fn read_secret_file(path: impl AsRef<Path>) -> Result<Zeroizing<String>, SasError> {
    let data = Zeroizing::new(std::fs::read_to_string(path.as_ref())?);

    Ok(Zeroizing::new(
        data.lines()
            .next()
            .ok_or_else(|| SasError::CliBadArgs("password file appears to be empty".into()))?
            .to_string(),
    ))
}

/// Where to find the PKCS#12 keystore and how to unlock it.
///
/// The passphrase is either given directly or derived from an obfuscation
/// token and the package name it was issued for.
#[derive(Args, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeystoreSource {
    /// Path to a .p12/PFX file containing the app's key and certificate
    #[arg(long = "p12-file", alias = "pfx-file", value_name = "PATH")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// The password to use to open the --p12-file file
    #[arg(
        long = "p12-password",
        alias = "pfx-password",
        group = "p12-password",
        value_name = "SECRET"
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Path to file containing password for opening --p12-file file
    #[arg(
        long = "p12-password-file",
        alias = "pfx-password-file",
        group = "p12-password",
        value_name = "PATH"
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_path: Option<PathBuf>,

    /// Obfuscation token to derive the --p12-file password from
    #[arg(long = "p12-token", group = "p12-password", value_name = "BASE64")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Package name the --p12-token was issued for
    #[arg(long = "p12-package-name", value_name = "NAME")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
}

impl KeystoreSource {
    /// Resolve the keystore passphrase.
    pub fn passphrase(&self) -> Result<Zeroizing<String>, SasError> {
        if let Some(password) = &self.password {
            Ok(Zeroizing::new(password.clone()))
        } else if let Some(path) = &self.password_path {
            read_secret_file(path)
        } else if let Some(token) = &self.token {
            let package_name = self.package_name.as_deref().ok_or_else(|| {
                SasError::CliBadArgs("a package name is required to decode the token".into())
            })?;
            info!("deriving keystore password for {}", package_name);

            Ok(Zeroizing::new(decode_passphrase(token, package_name)?))
        } else {
            Err(SasError::CliBadArgs(
                "no keystore password, password file or token configured".into(),
            ))
        }
    }

    fn read(&self) -> Result<(Vec<u8>, Zeroizing<String>), SasError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| SasError::CliBadArgs("no keystore configured".into()))?;

        if self.token.is_none() && self.package_name.is_some() {
            warn!("package name given without a token; ignoring it");
        }

        Ok((std::fs::read(path)?, self.passphrase()?))
    }

    /// Load the private key from the keystore.
    pub fn signing_key(&self) -> Result<SigningKey, SasError> {
        let (data, passphrase) = self.read()?;

        load_private_key(&data, &passphrase)?
            .ok_or_else(|| SasError::CliBadArgs("keystore holds no private key".into()))
    }

    /// Load the certificates from the keystore.
    pub fn certificates(&self) -> Result<Vec<Certificate>, SasError> {
        let (data, passphrase) = self.read()?;

        load_public_certs(&data, &passphrase)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TOKEN: &str = concat!(
        "AAABAAsASgB+AF4AeQAmADEAJAAgAGoAaQByAGwAJAArAAcAUQAkAEcAEAA3AG8A",
        "JwAFAFoAVgBpAGIAZgBhAGYAbQBlAHoALABNAEQAMAA/ACYAbgBGAFQASABfAEAA",
        "RgAKADAAdAApAHAAOgBWAF8AfwB5AGkAcAAEAFAAYwBaAGAARgBFAGMAbwArAE0A",
        "OgBeAEcAAgA0ACIAKwBeAEAAYgA="
    );

    fn keystore_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("src")
            .join("testdata")
            .join("app.p12")
    }

    #[test]
    fn passphrase_sources() {
        let source = KeystoreSource {
            password: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(source.passphrase().unwrap().as_str(), "secret");

        let source = KeystoreSource {
            token: Some(TOKEN.into()),
            package_name: Some("de.bmw.a4a.BMWAppKit".into()),
            ..Default::default()
        };
        assert!(source.passphrase().unwrap().starts_with("sw6+xm:ZG"));

        let source = KeystoreSource {
            token: Some(TOKEN.into()),
            ..Default::default()
        };
        assert!(matches!(source.passphrase(), Err(SasError::CliBadArgs(_))));

        assert!(KeystoreSource::default().passphrase().is_err());
    }

    #[test]
    fn load_from_token() {
        let source = KeystoreSource {
            path: Some(keystore_path()),
            token: Some(TOKEN.into()),
            package_name: Some("de.bmw.a4a.BMWAppKit".into()),
            ..Default::default()
        };

        assert_eq!(source.signing_key().unwrap().signature_len(), 192);
        assert_eq!(source.certificates().unwrap().len(), 1);

        let source = KeystoreSource {
            package_name: Some("de.bmw.a4a".into()),
            ..source
        };
        assert!(matches!(
            source.signing_key(),
            Err(SasError::TokenIndexOutOfBounds { .. })
        ));
    }
}
