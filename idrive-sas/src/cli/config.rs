// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        challenge::CertificateType, cli::keystore_source::KeystoreSource, error::SasError,
        merge::MergeStrategy,
    },
    figment::{
        providers::{Env, Format, Serialized, Toml},
        Figment,
    },
    log::debug,
    serde::{Deserialize, Serialize},
    std::{
        ops::{Deref, DerefMut},
        path::Path,
    },
};

const CONFIG_FILE_NAME: &str = "idrive-sas.toml";

/// Configuration file profile definition.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// The app's PKCS#12 keystore.
    #[serde(default)]
    pub keystore: KeystoreSource,

    /// Configuration for the merge-certificates command.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Configuration for the sign-challenge command.
    #[serde(default)]
    pub challenge: ChallengeConfig,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// How merged bundles are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MergeStrategy>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChallengeConfig {
    /// Kind of certificate the keystore holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_type: Option<CertificateType>,
}

/// Used to instantiate [Config] instances.
#[derive(Clone)]
pub struct ConfigBuilder {
    loader: Figment,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            loader: Figment::new(),
        }
    }
}

impl Deref for ConfigBuilder {
    type Target = Figment;

    fn deref(&self) -> &Self::Target {
        &self.loader
    }
}

impl DerefMut for ConfigBuilder {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.loader
    }
}

impl ConfigBuilder {
    /// Add the $XDG_CONFIG/idrive-sas/idrive-sas.toml user config file if it exists.
    pub fn with_user_config_file(mut self) -> Self {
        if let Some(base) = dirs::config_dir() {
            let p = base.join("idrive-sas").join(CONFIG_FILE_NAME);
            debug!("registering user config file: {}", p.display());

            self.loader = self.loader.merge(Toml::file(p).nested());
        }

        self
    }

    /// Merge a config file from `pwd`/idrive-sas.toml.
    pub fn with_cwd_config_file(mut self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            let p = cwd.join(CONFIG_FILE_NAME);
            debug!("registering cwd config file: {}", p.display());

            self.loader = self.loader.merge(Toml::file(p).nested());
        }

        self
    }

    /// Merge with environment variables.
    ///
    /// Nested keys are separated by `__`, e.g. `IDRIVE_SAS_KEYSTORE__PACKAGE_NAME`.
    ///
    /// Must be called after [Self::profile()] to ensure environment variables
    /// are mapped to the current profile.
    pub fn with_env_prefix(mut self) -> Self {
        debug!("registering IDRIVE_SAS_ environment variable config source");
        let env = Env::prefixed("IDRIVE_SAS_")
            .split("__")
            .profile(self.loader.profile().to_string());

        self.loader = self.loader.merge(env);
        self
    }

    /// Add a TOML config file to this instance.
    pub fn toml_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        debug!("registering custom config file: {}", path.display());
        self.loader = self.loader.merge(Toml::file(path).nested());
        self
    }

    /// Add a TOML string config to this instance.
    pub fn toml_string(mut self, data: &str) -> Self {
        debug!("registering TOML string config data");
        self.loader = self.loader.merge(Toml::string(data).nested());
        self
    }

    /// Merge a [Config] struct into this builder
    pub fn with_config_struct(mut self, config: Config) -> Self {
        debug!("registering config struct");
        let serialized = Serialized::defaults(config).profile(self.loader.profile().to_string());

        self.loader = self.loader.merge(serialized);
        self
    }

    /// Load the named profile instead of the `[default]` profile.
    pub fn profile(mut self, profile: String) -> Self {
        self.loader = self.loader.select(profile);
        self
    }

    /// Obtain a config profile.
    pub fn config(self) -> Result<Config, SasError> {
        Ok(self.loader.extract()?)
    }
}
