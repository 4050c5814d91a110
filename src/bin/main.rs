//! hamip-sync binary entry point.

use clap::Parser;
use hamip_sync::config::read_api_key;
use hamip_sync::{
    fetch_desired, telemetry, Config, HamnetDbClient, PowerDnsClient, RecordDeriver,
    StaticOverrides, SyncError, SyncOptions, ZoneConfig, ZoneSync,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Sync HamnetDB host records into PowerDNS zones.
#[derive(Parser, Debug)]
#[command(name = "hamip-sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "hamip-sync.toml")]
    config: PathBuf,

    /// Only sync the zone with this name.
    #[arg(short, long)]
    zone: Option<String>,

    /// Compute and log the changes without applying them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("HAMIP_SYNC")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    config.validate()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    let zones = select_zones(&config, args.zone.as_deref())?;

    info!(
        config_file = %args.config.display(),
        zones = zones.len(),
        dry_run = args.dry_run,
        "Starting hamip-sync"
    );

    let failed = run(&config, &zones, args.dry_run).await;

    // Shutdown telemetry
    telemetry::shutdown();

    if failed > 0 {
        error!(failed, "hamip-sync finished with failed zones");
        return Ok(ExitCode::FAILURE);
    }

    info!("hamip-sync complete");
    Ok(ExitCode::SUCCESS)
}

fn select_zones<'a>(
    config: &'a Config,
    only: Option<&str>,
) -> Result<Vec<&'a ZoneConfig>, SyncError> {
    let Some(only) = only else {
        return Ok(config.zones.iter().collect());
    };
    let wanted = hamip_sync::record::normalize_fqdn(only);
    let zones: Vec<_> = config.zones.iter().filter(|z| z.fqdn() == wanted).collect();
    if zones.is_empty() {
        return Err(SyncError::Config(format!("zone {only} is not configured")));
    }
    Ok(zones)
}

/// Run every zone; returns the number of failed zones.
async fn run(config: &Config, zones: &[&ZoneConfig], dry_run: bool) -> usize {
    // Credentials first, before anything touches the network.
    let mut keys = Vec::with_capacity(zones.len());
    for zone in zones {
        match read_api_key(&zone.api_key_file) {
            Ok(key) => keys.push(key),
            Err(e) => {
                error!(zone = %zone.name, error = %e, "cannot read API key");
                return zones.len();
            }
        }
    }

    let deriver = RecordDeriver::new(&config.derive);
    let desired = match HamnetDbClient::new(config.registry.clone()) {
        Ok(registry) => fetch_desired(&registry, &deriver, config.derive.dhcp).await,
        Err(e) => Err(e),
    };
    let desired = match desired {
        Ok(desired) => desired,
        Err(e) => {
            error!(error = %e, "cannot build desired state");
            return zones.len();
        }
    };

    let mut failed = 0;
    for (zone, key) in zones.iter().zip(keys) {
        if let Err(e) = sync_zone(zone, key, &desired, dry_run).await {
            report_failure(zone, &e);
            failed += 1;
        }
    }
    failed
}

async fn sync_zone(
    zone: &ZoneConfig,
    api_key: String,
    desired: &hamip_sync::ZoneRecords,
    dry_run: bool,
) -> Result<(), SyncError> {
    let fqdn = zone.fqdn();
    let overrides = match &zone.overrides_file {
        Some(path) => StaticOverrides::load(path, &fqdn)?,
        None => StaticOverrides::empty(),
    };
    let client = PowerDnsClient::new(zone, api_key)?;
    let options = SyncOptions::from_config(zone, dry_run);

    let report = ZoneSync::new(&fqdn, &client, overrides, options)
        .run(desired)
        .await?;
    if !report.truncated.is_none() {
        warn!(
            zone = %report.zone,
            removals_dropped = report.truncated.removals,
            replacements_dropped = report.truncated.replacements,
            "change set was capped; run again to converge"
        );
    }
    Ok(())
}

fn report_failure(zone: &ZoneConfig, e: &SyncError) {
    match e {
        SyncError::Patch(failure) => {
            error!(
                zone = %zone.name,
                phase = %failure.phase,
                batch = failure.batch,
                status = ?failure.status,
                operations = failure.operations,
                applied_batches = failure.applied_batches,
                body = %failure.body,
                payload = %failure.payload,
                "patch rejected"
            );
        }
        other => error!(zone = %zone.name, error = %other, "zone sync failed"),
    }
}
