use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use elder_core::{
    serialize, CanonicalHeader, ElderId, KeyId, QuorumSignature, RevocationAuthorization,
    SigningIdentity,
};
use elder_keys::RegistrySnapshot;
use elder_node::{generate_sample_config, AuthorityConfig, ElderService, NodeConfig};
use elder_quorum::verify_quorum;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command.config_path() {
        Some(path) => Some(load_config(path)?),
        None => None,
    };
    let level = match &config {
        Some(config) => config.log_level()?,
        None => Level::INFO,
    };

    // Initialize logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    match (cli.command, config) {
        (Commands::Init { output }, _) => init_config(output)?,
        (
            Commands::Verify {
                header,
                quorum,
                snapshot,
            },
            _,
        ) => verify(&header, &quorum, &snapshot)?,
        (command, Some(config)) => run_command(command, config).await?,
        (_, None) => bail!("command requires a configuration file"),
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<NodeConfig> {
    if !path.exists() {
        bail!(
            "Configuration file not found: {}. Run 'elder init' to create one.",
            path.display()
        );
    }
    NodeConfig::load(path)
}

/// Initialize a new configuration file
fn init_config(output: PathBuf) -> Result<()> {
    info!("Generating sample configuration");

    let (config, authority) = generate_sample_config();
    config.save(&output)?;

    info!("Configuration saved to {:?}", output);

    println!("\nConfiguration file created: {}", output.display());
    println!("Revocation authority secret: {}", authority.secret_hex().as_str());
    println!("\nWARNING: Keep the authority secret and the master key safe.");
    println!("\nTo enroll an Elder key, run:");
    println!("  elder keygen --config {} --elder elder_0", output.display());

    Ok(())
}

fn read_header(path: &Path) -> Result<Vec<u8>> {
    let json = std::fs::read_to_string(path)?;
    let header: CanonicalHeader = serialize::from_json(&json)?;
    Ok(header.to_canonical_bytes())
}

fn write_or_print(out: Option<PathBuf>, json: String) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(&path, json)?;
            info!("Written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Verify offline against a snapshot file
fn verify(header: &Path, quorum: &Path, snapshot: &Path) -> Result<()> {
    let header = read_header(header)?;
    let quorum: QuorumSignature = serialize::from_json(&std::fs::read_to_string(quorum)?)?;
    let snapshot: RegistrySnapshot = serialize::from_json(&std::fs::read_to_string(snapshot)?)?;

    let verdict = verify_quorum(&header, &quorum, &snapshot);
    println!("{}", serialize::to_json_pretty(&verdict)?);
    if !verdict.valid {
        bail!("quorum signature is not valid");
    }
    Ok(())
}

fn authority_identity(config: &NodeConfig, secret: &str) -> Result<SigningIdentity> {
    let algorithm = match &config.revocation_authority {
        AuthorityConfig::Designated { algorithm, .. } => *algorithm,
        AuthorityConfig::ElderQuorum => config.algorithm,
    };
    Ok(SigningIdentity::from_secret_hex(algorithm, secret)?)
}

async fn run_command(command: Commands, config: NodeConfig) -> Result<()> {
    let master = config.master_key()?;
    let service = ElderService::open(config.clone(), &master).await?;

    match command {
        Commands::Keygen { elder, .. } => {
            let record = service.enroll_key(&ElderId::new(elder)).await?;
            println!("Generated key {} ({})", record.key_id, record.algorithm);
            println!("  Public key: {}", hex::encode(&record.public_key));
            println!("  Expires at: {}", record.expires_at);
        }
        Commands::Rotate { elder, .. } => {
            let record = service.rotate_key(&ElderId::new(elder)).await?;
            println!("Rotated to key {}", record.key_id);
        }
        Commands::Revoke {
            key_id,
            reason,
            authority_secret,
            cosigners,
            ..
        } => {
            let key_id = KeyId::from_hex(&key_id)?;
            let now = service.now();
            let authorization = match &config.revocation_authority {
                AuthorityConfig::Designated { name, .. } => {
                    let Some(secret) = authority_secret else {
                        bail!("--authority-secret is required for a designated authority");
                    };
                    let identity = authority_identity(&config, &secret)?;
                    RevocationAuthorization::designated(name, &identity, &key_id, &reason, now)?
                }
                AuthorityConfig::ElderQuorum => {
                    let mut authorization = RevocationAuthorization::new(now);
                    for elder in cosigners {
                        let elder = ElderId::new(elder);
                        service
                            .cosign_revocation(&elder, &key_id, &reason, &mut authorization)
                            .await?;
                    }
                    authorization
                }
            };
            let entry = service.revoke_key(&key_id, &reason, authorization).await?;
            println!("{}", serialize::to_json_pretty(&entry)?);
        }
        Commands::Sign {
            elder, header, out, ..
        } => {
            let header = read_header(&header)?;
            let signature = service.sign_block(&header, &ElderId::new(elder)).await?;
            write_or_print(out, serialize::to_json_pretty(&signature)?)?;
        }
        Commands::Snapshot { height, .. } => {
            let snapshot = service.pin_snapshot(height).await?;
            println!("{}", serialize::to_json_pretty(&*snapshot)?);
        }
        Commands::RotationDue { .. } => {
            let due = service.rotation_due().await?;
            if due.is_empty() {
                println!("No keys due for rotation");
            }
            for key_id in due {
                let entry = service.lifecycle().get(&key_id).await?;
                println!("{}  {}  expires {}", key_id, entry.owner_id, entry.expires_at);
            }
        }
        Commands::ExpireDue { .. } => {
            for key_id in service.expire_due().await? {
                println!("Expired {}", key_id);
            }
        }
        Commands::ExportRevocations {
            authority_secret,
            endorsers,
            out,
            ..
        } => {
            let identity = authority_identity(&config, &authority_secret)?;
            let endorsers: Vec<ElderId> = endorsers.into_iter().map(ElderId::new).collect();
            let list = service.export_revocations(&identity, &endorsers).await?;
            write_or_print(out, list.to_json()?)?;
        }
        Commands::Init { .. } | Commands::Verify { .. } => {}
    }

    Ok(())
}
