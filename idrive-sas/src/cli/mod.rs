// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod config;
pub mod keystore_source;

use {
    crate::{
        certificate::Certificate,
        challenge::{sign_challenge_for, CertificateType, CHALLENGE_LENGTH},
        cli::{
            config::{ChallengeConfig, Config, ConfigBuilder, MergeConfig},
            keystore_source::{read_secret_file, KeystoreSource},
        },
        error::SasError,
        merge::{merge_with_strategy, MergeStrategy},
        passphrase::{decode_passphrase, encode_passphrase},
        services::{find_app_certificate, KnownSecurityService},
        store::{load_collection, load_envelope, serialize_collection},
    },
    clap::{ArgAction, Args, Parser, Subcommand},
    log::{info, warn, LevelFilter},
    std::{io::Write, path::PathBuf},
};

/// Holds state to pass to CLI commands.
pub struct Context {
    pub config: Config,
}

pub trait CliCommand {
    /// Obtain the current command arguments normalized to a [Config] instance.
    fn as_config(&self) -> Result<Option<Config>, SasError> {
        Ok(None)
    }

    /// Runs the command.
    fn run(&self, context: &Context) -> Result<(), SasError>;
}

/// Write command output to a file or, if no path is given, stdout.
fn write_output(path: Option<&PathBuf>, data: &[u8]) -> Result<(), SasError> {
    if let Some(path) = path {
        info!("writing {}", path.display());
        std::fs::write(path, data)?;
    } else {
        std::io::stdout().write_all(data)?;
    }

    Ok(())
}

fn print_certificate(index: usize, cert: &Certificate) -> Result<(), SasError> {
    let x509 = cert.as_x509();

    println!("# {}", index);
    println!("subject:          {}", cert.subject());
    println!(
        "common name:      {}",
        cert.common_name().unwrap_or_else(|| "<none>".into())
    );
    println!("issuer:           {}", cert.issuer()?);
    println!("self-issued:      {}", cert.is_self_issued());
    println!("not before:       {}", x509.validity_not_before());
    println!("not after:        {}", x509.validity_not_after());
    println!("DER length:       {}", cert.der().len());

    Ok(())
}

#[derive(Args, Clone, Debug)]
#[group(required = true, multiple = false)]
struct TokenSource {
    /// Base64 obfuscation token
    #[arg(long, value_name = "BASE64")]
    token: Option<String>,

    /// Path to a file holding the base64 obfuscation token
    #[arg(long, value_name = "PATH")]
    token_file: Option<PathBuf>,
}

impl TokenSource {
    fn resolve(&self) -> Result<String, SasError> {
        if let Some(token) = &self.token {
            Ok(token.clone())
        } else if let Some(path) = &self.token_file {
            Ok(std::fs::read_to_string(path)?)
        } else {
            Err(SasError::CliBadArgs("no token given".into()))
        }
    }
}

#[derive(Parser)]
struct DecodePassphrase {
    #[command(flatten)]
    token: TokenSource,

    /// Package name the token was issued for
    #[arg(long, value_name = "NAME")]
    package_name: String,
}

impl CliCommand for DecodePassphrase {
    fn run(&self, _context: &Context) -> Result<(), SasError> {
        let passphrase = decode_passphrase(&self.token.resolve()?, &self.package_name)?;

        println!("{}", passphrase);

        Ok(())
    }
}

#[derive(Parser)]
struct EncodePassphrase {
    /// The passphrase to obfuscate
    #[arg(long, group = "secret", value_name = "SECRET")]
    passphrase: Option<String>,

    /// Path to a file whose first line is the passphrase to obfuscate
    #[arg(long, group = "secret", value_name = "PATH")]
    passphrase_file: Option<PathBuf>,

    /// Package name the token will be decoded with
    #[arg(long, value_name = "NAME")]
    package_name: String,
}

impl CliCommand for EncodePassphrase {
    fn run(&self, _context: &Context) -> Result<(), SasError> {
        let passphrase = if let Some(passphrase) = &self.passphrase {
            zeroize::Zeroizing::new(passphrase.clone())
        } else if let Some(path) = &self.passphrase_file {
            read_secret_file(path)?
        } else {
            return Err(SasError::CliBadArgs(
                "one of --passphrase or --passphrase-file is required".into(),
            ));
        };

        let token = encode_passphrase(&passphrase, &self.package_name, &mut rand::thread_rng())?;

        println!("{}", token);

        Ok(())
    }
}

#[derive(Parser)]
struct PrintCertificates {
    /// Path to PEM or DER certificate data
    path: PathBuf,
}

impl CliCommand for PrintCertificates {
    fn run(&self, _context: &Context) -> Result<(), SasError> {
        let data = std::fs::read(&self.path)?;

        let certs = load_collection(&data).ok_or_else(|| {
            SasError::CliBadArgs(format!(
                "{} does not contain certificates",
                self.path.display()
            ))
        })?;

        for (i, cert) in certs.iter().enumerate() {
            print_certificate(i, cert)?;
        }

        // Bundles may carry more than certificates; say so.
        if let Ok(envelope) = load_envelope(&data) {
            let others = envelope
                .certificate_choices()
                .unwrap_or_default()
                .iter()
                .filter(|choice| choice.certificate().is_none())
                .count();

            if others > 0 {
                println!("other certificate choices: {}", others);
            }
            if let Some(crls) = envelope.crls() {
                println!("CRL data:         {} bytes", crls.len());
            }
            if envelope.signer_infos().len() > 2 {
                println!("signer info data: {} bytes", envelope.signer_infos().len());
            }
        }

        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
#[group(required = true, multiple = false)]
struct AppBundleSource {
    /// Path to the app's PKCS#7 certificate bundle
    #[arg(long, value_name = "PATH")]
    app_bundle: Option<PathBuf>,

    /// Extracted app assets directory to find the app's bundle in
    #[arg(long, value_name = "PATH", requires = "app_name")]
    assets_dir: Option<PathBuf>,
}

#[derive(Parser)]
struct MergeCertificates {
    #[command(flatten)]
    app: AppBundleSource,

    /// Name of the app under carapplications/ in --assets-dir
    #[arg(long, value_name = "NAME")]
    app_name: Option<String>,

    /// Brand to prefer when looking up the app's bundle in --assets-dir
    #[arg(long, default_value = "common", value_name = "BRAND")]
    brand: String,

    /// Path to the vendor's PKCS#7 certificate bundle
    #[arg(long, value_name = "PATH")]
    vendor_bundle: PathBuf,

    /// How the merged bundle is written
    #[arg(long)]
    strategy: Option<MergeStrategy>,

    /// Path to write the merged bundle to. Defaults to stdout
    #[arg(long, short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,
}

impl MergeCertificates {
    fn app_bundle_path(&self) -> Result<PathBuf, SasError> {
        if let Some(path) = &self.app.app_bundle {
            return Ok(path.clone());
        }

        match (&self.app.assets_dir, &self.app_name) {
            (Some(dir), Some(name)) => find_app_certificate(dir, name, &self.brand)
                .ok_or_else(|| {
                    SasError::CliBadArgs(format!(
                        "no certificate bundle for {} in {}",
                        name,
                        dir.display()
                    ))
                }),
            _ => Err(SasError::CliBadArgs(
                "--assets-dir requires --app-name".into(),
            )),
        }
    }
}

impl CliCommand for MergeCertificates {
    fn as_config(&self) -> Result<Option<Config>, SasError> {
        Ok(Some(Config {
            merge: MergeConfig {
                strategy: self.strategy,
            },
            ..Default::default()
        }))
    }

    fn run(&self, context: &Context) -> Result<(), SasError> {
        let strategy = context.config.merge.strategy.unwrap_or_default();

        let app_path = self.app_bundle_path()?;
        info!("reading app bundle from {}", app_path.display());
        let app = std::fs::read(&app_path)?;
        let vendor = std::fs::read(&self.vendor_bundle)?;

        info!("merging with {:?} strategy", strategy);
        let merged = merge_with_strategy(strategy, &app, &vendor)?;

        if load_collection(&merged).map(|c| c.is_empty()).unwrap_or(true) {
            warn!("merged bundle holds no certificates");
        }

        write_output(self.output.as_ref(), &merged)
    }
}

#[derive(Parser)]
struct ExportCertificates {
    #[command(flatten)]
    keystore: KeystoreSource,

    /// Path to write the PKCS#7 bundle to. Defaults to stdout
    #[arg(long, short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,
}

impl CliCommand for ExportCertificates {
    fn as_config(&self) -> Result<Option<Config>, SasError> {
        Ok(Some(Config {
            keystore: self.keystore.clone(),
            ..Default::default()
        }))
    }

    fn run(&self, context: &Context) -> Result<(), SasError> {
        let certs = context.config.keystore.certificates()?;

        if certs.is_empty() {
            warn!("keystore holds no certificates");
        }

        write_output(self.output.as_ref(), &serialize_collection(&certs)?)
    }
}

#[derive(Parser)]
struct SignChallenge {
    #[command(flatten)]
    keystore: KeystoreSource,

    /// Hex encoded challenge issued by the head unit
    #[arg(long, value_name = "HEX")]
    challenge: String,

    /// Kind of certificate the keystore holds
    #[arg(long)]
    certificate_type: Option<CertificateType>,
}

impl CliCommand for SignChallenge {
    fn as_config(&self) -> Result<Option<Config>, SasError> {
        Ok(Some(Config {
            keystore: self.keystore.clone(),
            challenge: ChallengeConfig {
                certificate_type: self.certificate_type,
            },
            ..Default::default()
        }))
    }

    fn run(&self, context: &Context) -> Result<(), SasError> {
        let challenge = hex::decode(self.challenge.trim())
            .map_err(|e| SasError::CliBadArgs(format!("challenge is not hex: {e}")))?;

        if challenge.len() != CHALLENGE_LENGTH {
            warn!(
                "challenge is {} bytes; head units issue {} byte challenges",
                challenge.len(),
                CHALLENGE_LENGTH
            );
        }

        let certificate_type = context.config.challenge.certificate_type.unwrap_or_default();
        let key = context.config.keystore.signing_key()?;

        let signature = sign_challenge_for(&key, &challenge, certificate_type)?;

        println!("{}", hex::encode(signature));

        Ok(())
    }
}

#[derive(Parser)]
struct KnownServices {
    /// Only print services whose name starts with this brand, ignoring case
    #[arg(long)]
    brand: Option<String>,
}

impl CliCommand for KnownServices {
    fn run(&self, _context: &Context) -> Result<(), SasError> {
        for service in KnownSecurityService::matching_brand(self.brand.as_deref().unwrap_or("")) {
            println!(
                "{} {} {}",
                service.name(),
                service.package_name(),
                service.class_name()
            );
        }

        Ok(())
    }
}

#[derive(Subcommand)]
enum Subcommands {
    /// Derive a keystore passphrase from an obfuscation token
    DecodePassphrase(DecodePassphrase),

    /// Obfuscate a keystore passphrase into a token
    EncodePassphrase(EncodePassphrase),

    /// Print information about certificates in PEM or DER data
    PrintCertificates(PrintCertificates),

    /// Splice the vendor's touch command certificate into an app bundle
    ///
    /// The vendor root (`a4a_root-ca`) is removed from the app's certificates
    /// and vendor certificates named `a4a_app_BMWTouchCommand_Connection*`
    /// are appended.
    ///
    /// With `--strategy flat` a new bundle holding only the certificates is
    /// written. With `--strategy preserve-envelope` the app bundle's own
    /// PKCS#7 structure is kept and only its certificates are replaced.
    #[command(verbatim_doc_comment)]
    MergeCertificates(MergeCertificates),

    /// Write the certificates of a PKCS#12 keystore as a PKCS#7 bundle
    ExportCertificates(ExportCertificates),

    /// Sign a head unit challenge with the keystore's private key
    SignChallenge(SignChallenge),

    /// Print the vendor apps known to host the security service
    KnownServices(KnownServices),
}

impl Subcommands {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Subcommands::DecodePassphrase(c) => c,
            Subcommands::EncodePassphrase(c) => c,
            Subcommands::PrintCertificates(c) => c,
            Subcommands::MergeCertificates(c) => c,
            Subcommands::ExportCertificates(c) => c,
            Subcommands::SignChallenge(c) => c,
            Subcommands::KnownServices(c) => c,
        }
    }
}

/// Certificate bundling and challenge signing for iDrive head units
#[derive(Parser)]
#[command(author, version, arg_required_else_help = true)]
struct Cli {
    /// Explicit configuration file to load.
    ///
    /// If provided, the default configuration files are not loaded, even
    /// if they exist.
    ///
    /// Can be specified multiple times. Files are loaded/merged in the order
    /// given.
    ///
    /// The special value `/dev/null` can be used to specify an empty/null
    /// config file. It can be used to short-circuit loading of default config
    /// files.
    #[arg(short = 'C', long = "config-file", global = true)]
    config_path: Vec<PathBuf>,

    /// Configuration profile to load.
    ///
    /// If not specified, the implicit "default" profile is loaded.
    #[arg(short = 'P', long, global = true)]
    profile: Option<String>,

    /// Increase logging verbosity. Can be specified multiple times
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Subcommands,
}

impl Cli {
    pub fn config_builder(&self) -> ConfigBuilder {
        let mut config = ConfigBuilder::default();

        config = if self.config_path.is_empty() {
            config.with_user_config_file().with_cwd_config_file()
        } else {
            for path in &self.config_path {
                if path.display().to_string() == "/dev/null" {
                    break;
                }

                config = config.toml_file(path);
            }

            config
        };

        if let Some(profile) = &self.profile {
            config = config.profile(profile.to_string());
        }

        // Environment variables override config files.
        config.with_env_prefix()
    }
}

pub fn main_impl() -> Result<(), SasError> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    let mut config_builder = cli.config_builder();

    let command = cli.command.as_cli_command();

    if let Some(config) = command.as_config()? {
        config_builder = config_builder.with_config_struct(config);
    }

    let config = config_builder.config()?;

    let context = Context { config };

    command.run(&context)
}
