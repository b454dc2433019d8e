//! Command-line interface for recursive app bundle code signing.
//!
//! Assembles a signing identity from PEM/DER credentials or an existing
//! PKCS#12 container, then signs the bundle and every nested signable unit
//! through the configured external signing tool.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use appsign::authority::ProcessAuthority;
use appsign::identity::{IdentityBuilder, SigningIdentity};
use appsign::orchestrator::SigningOrchestrator;
use appsign::profile::ProvisioningProfile;
use appsign::Entitlements;
use clap::Parser;
use log::info;

#[derive(Parser)]
#[command(name = "appsign")]
#[command(about = "Recursive app bundle code signing")]
struct Cli {
    /// App bundle to sign
    bundle: PathBuf,

    /// Certificate file (PEM or DER)
    #[arg(short = 'c', long)]
    certificate: Option<PathBuf>,

    /// Private key file (PEM or DER)
    #[arg(short = 'k', long)]
    private_key: Option<PathBuf>,

    /// Existing PKCS#12 container
    #[arg(short = 'p', long)]
    pkcs12: Option<PathBuf>,

    /// Password for the container
    #[arg(long)]
    password: Option<String>,

    /// Provisioning profile to embed into units that carry one
    #[arg(short = 'm', long)]
    profile: Option<PathBuf>,

    /// Bundle identifier override for the root unit
    #[arg(short = 'b', long)]
    bundle_id: Option<String>,

    /// Entitlements plist applied to units without their own descriptor
    #[arg(short = 'e', long)]
    entitlements: Option<PathBuf>,

    /// Include the platform anchor certificates in the assembled container
    #[arg(long)]
    platform_anchors: bool,

    /// External signing tool invoked per unit
    #[arg(long, default_value = "codesign")]
    tool: PathBuf,
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();

    let identity = load_identity(&cli)?;
    let authority = ProcessAuthority::new(&cli.tool);

    let mut orchestrator = SigningOrchestrator::new(&authority, &identity);
    if let Some(ref path) = cli.profile {
        let profile = ProvisioningProfile::from_path(path)
            .with_context(|| format!("reading provisioning profile {}", path.display()))?;
        orchestrator = orchestrator.provisioning_profile(profile);
    }
    if let Some(ref bundle_id) = cli.bundle_id {
        orchestrator = orchestrator.bundle_identifier(bundle_id);
    }
    if let Some(ref path) = cli.entitlements {
        orchestrator = orchestrator.default_entitlements(load_entitlements(path)?);
    }

    let report = orchestrator
        .sign_all(&cli.bundle)
        .with_context(|| format!("signing {}", cli.bundle.display()))?;

    for result in report.results() {
        match &result.status {
            appsign::SignStatus::Signed => info!("signed {}", result.path.display()),
            appsign::SignStatus::Failed(reason) => {
                eprintln!("failed: {} ({reason})", result.path.display())
            }
        }
    }

    if report.is_success() {
        println!("Signed: {}", cli.bundle.display());
    }
    Ok(ExitCode::from(report.status_code() as u8))
}

fn load_identity(cli: &Cli) -> Result<SigningIdentity> {
    let password = cli.password.as_deref().unwrap_or("");

    if let Some(ref p12_path) = cli.pkcs12 {
        if cli.certificate.is_some() || cli.private_key.is_some() {
            bail!("cannot combine --pkcs12 with --certificate/--private-key");
        }
        let container = std::fs::read(p12_path)
            .with_context(|| format!("reading container {}", p12_path.display()))?;
        return Ok(SigningIdentity::from_container(container, password)?);
    }

    let (cert_path, key_path) = match (&cli.certificate, &cli.private_key) {
        (Some(c), Some(k)) => (c, k),
        _ => bail!("provide either --pkcs12 or both --certificate and --private-key"),
    };

    let cert = std::fs::read(cert_path)
        .with_context(|| format!("reading certificate {}", cert_path.display()))?;
    let key = std::fs::read(key_path)
        .with_context(|| format!("reading private key {}", key_path.display()))?;

    let identity = IdentityBuilder::new(cert, key)
        .password(password)
        .include_platform_anchors(cli.platform_anchors)
        .assemble()?;
    Ok(identity)
}

fn load_entitlements(path: &PathBuf) -> Result<Entitlements> {
    let data = std::fs::read(path)
        .with_context(|| format!("reading entitlements {}", path.display()))?;
    let value: plist::Value =
        plist::from_bytes(&data).context("parsing entitlements plist")?;
    value
        .into_dictionary()
        .context("entitlements plist is not a dictionary")
}
