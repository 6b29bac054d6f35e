// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vendor apps hosting the security service, and where app bundles keep
//! their certificates.

use {
    log::debug,
    std::{
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
    },
};

const MINE_SERVICE_CLASS: &str = "com.bmwgroup.connected.core.services.security.CarSecurityService";

/// Vendor apps known to expose the security service.
///
/// Any of them that is installed can hand out the vendor certificate bundle
/// and sign challenges.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KnownSecurityService {
    BMWClassicUSA,
    MiniClassicUSA,
    BMWClassic,
    MiniClassic,
    BMWConnectedNA,
    MiniConnectedNA,
    BMWConnected,
    MiniConnected,
    BMWMine,
    MiniMine,
    J29Mine,
    BMWMineNA,
    MiniMineNA,
    J29MineNA,
}

impl KnownSecurityService {
    pub fn all() -> &'static [Self] {
        &[
            Self::BMWClassicUSA,
            Self::MiniClassicUSA,
            Self::BMWClassic,
            Self::MiniClassic,
            Self::BMWConnectedNA,
            Self::MiniConnectedNA,
            Self::BMWConnected,
            Self::MiniConnected,
            Self::BMWMine,
            Self::MiniMine,
            Self::J29Mine,
            Self::BMWMineNA,
            Self::MiniMineNA,
            Self::J29MineNA,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BMWClassicUSA => "BMWClassicUSA",
            Self::MiniClassicUSA => "MiniClassicUSA",
            Self::BMWClassic => "BMWClassic",
            Self::MiniClassic => "MiniClassic",
            Self::BMWConnectedNA => "BMWConnectedNA",
            Self::MiniConnectedNA => "MiniConnectedNA",
            Self::BMWConnected => "BMWConnected",
            Self::MiniConnected => "MiniConnected",
            Self::BMWMine => "BMWMine",
            Self::MiniMine => "MiniMine",
            Self::J29Mine => "J29Mine",
            Self::BMWMineNA => "BMWMineNA",
            Self::MiniMineNA => "MiniMineNA",
            Self::J29MineNA => "J29MineNA",
        }
    }

    /// Fully qualified name of the service component.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::BMWClassicUSA => "com.bmwgroup.connected.bmw.usa.SECURITY_SERVICE",
            Self::MiniClassicUSA => "com.bmwgroup.connected.mini.usa.SECURITY_SERVICE",
            Self::BMWClassic => "com.bmwgroup.connected.bmw.SECURITY_SERVICE",
            Self::MiniClassic => "com.bmwgroup.connected.mini.SECURITY_SERVICE",
            Self::BMWConnectedNA => "de.bmw.connected.na.SECURITY_SERVICE",
            Self::MiniConnectedNA => "de.mini.connected.na.SECURITY_SERVICE",
            Self::BMWConnected => "de.bmw.connected.SECURITY_SERVICE",
            Self::MiniConnected => "de.mini.connected.SECURITY_SERVICE",
            Self::BMWMine
            | Self::MiniMine
            | Self::J29Mine
            | Self::BMWMineNA
            | Self::MiniMineNA
            | Self::J29MineNA => MINE_SERVICE_CLASS,
        }
    }

    /// Package name of the app hosting the service.
    ///
    /// The older apps name their service inside their own package. The
    /// "mobile20" apps share one service class and need an explicit package.
    pub fn package_name(&self) -> &'static str {
        match self {
            Self::BMWMine => "de.bmw.connected.mobile20.row",
            Self::MiniMine => "de.mini.connected.mobile20.row",
            Self::J29Mine => "de.j29.connected.mobile20.row",
            Self::BMWMineNA => "de.bmw.connected.mobile20.na",
            Self::MiniMineNA => "de.mini.connected.mobile20.na",
            Self::J29MineNA => "de.j29.connected.mobile20.na",
            _ => {
                let class_name = self.class_name();
                class_name
                    .rfind('.')
                    .map(|pos| &class_name[..pos])
                    .unwrap_or(class_name)
            }
        }
    }

    /// Services whose name starts with `brand_hint`, ignoring case.
    ///
    /// An empty hint matches every service.
    pub fn matching_brand(brand_hint: &str) -> impl Iterator<Item = Self> + '_ {
        let hint = brand_hint.to_ascii_lowercase();

        Self::all()
            .iter()
            .copied()
            .filter(move |service| service.name().to_ascii_lowercase().starts_with(&hint))
    }
}

impl Display for KnownSecurityService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Locations an app's certificate bundle is looked up at, most specific first.
///
/// The brand is lower-cased.
pub fn app_certificate_asset_paths(app_name: &str, brand: &str) -> Vec<String> {
    vec![
        format!(
            "carapplications/{app_name}/rhmi/{}/{app_name}.p7b",
            brand.to_lowercase()
        ),
        format!("carapplications/{app_name}/{app_name}.p7b"),
    ]
}

/// Find an app's certificate bundle in an extracted assets directory.
pub fn find_app_certificate(assets_dir: &Path, app_name: &str, brand: &str) -> Option<PathBuf> {
    app_certificate_asset_paths(app_name, brand)
        .into_iter()
        .map(|path| assets_dir.join(path))
        .find(|path| {
            debug!("looking for app certificate at {}", path.display());
            path.is_file()
        })
}
