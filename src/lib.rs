//! hamip-sync - keeps a PowerDNS zone in line with the HamnetDB registry.
//!
//! HamnetDB lists the hosts and subnets of the amateur-radio IP network
//! (44.0.0.0/8). This crate derives a `name -> record` mapping from those
//! entries, diffs it against the records a zone currently serves, and pushes
//! the difference through the zone-management API in bounded batches.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           hamip-sync                             │
//! │                                                                  │
//! │  ┌────────────────┐   ┌───────────────┐   ┌──────────────────┐   │
//! │  │ RegistryFetcher│──▶│ RecordDeriver │──▶│ layer_desired    │   │
//! │  │ (HamnetDB)     │   │ (heuristics)  │   │ + static + tag   │   │
//! │  └────────────────┘   └───────────────┘   └────────┬─────────┘   │
//! │                                                    ▼             │
//! │  ┌────────────────┐                       ┌──────────────────┐   │
//! │  │ ZoneReader     │──────────────────────▶│ Reconciler       │   │
//! │  │ (GET zone)     │                       │ (ChangeSet)      │   │
//! │  └────────────────┘                       └────────┬─────────┘   │
//! │                                                    ▼             │
//! │                    PATCH batches          ┌──────────────────┐   │
//! │  zone API ◀───────────────────────────────│ PatchApplier     │   │
//! │                                           └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use hamip_sync::{fetch_desired, HamnetDbClient, PowerDnsClient, RecordDeriver};
//! use hamip_sync::{StaticOverrides, SyncOptions, ZoneSync};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hamip_sync::SyncError> {
//!     let config: hamip_sync::Config = load_config();
//!     let registry = HamnetDbClient::new(config.registry.clone())?;
//!     let deriver = RecordDeriver::new(&config.derive);
//!     let desired = fetch_desired(&registry, &deriver, false).await?;
//!
//!     for zone in &config.zones {
//!         let key = hamip_sync::config::read_api_key(&zone.api_key_file)?;
//!         let client = PowerDnsClient::new(zone, key)?;
//!         let options = SyncOptions::from_config(zone, false);
//!         let run = ZoneSync::new(&zone.name, &client, StaticOverrides::empty(), options);
//!         run.run(&desired).await?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod apply;
pub mod config;
pub mod derive;
pub mod error;
mod http;
pub mod metrics;
pub mod overrides;
pub mod reconcile;
pub mod record;
pub mod registry;
pub mod sync;
pub mod telemetry;
pub mod zone;

// Re-export main types
pub use apply::{PatchApplier, ZoneTransport};
pub use config::{Config, DeriveConfig, RegistryConfig, TelemetryConfig, ZoneConfig};
pub use derive::RecordDeriver;
pub use error::SyncError;
pub use overrides::StaticOverrides;
pub use reconcile::{reconcile, ChangeSet, Reconciler};
pub use record::{RecordType, ResourceRecord, ZoneRecords};
pub use registry::{HamnetDbClient, RawHostEntry, RawSubnetEntry, RegistryFetcher};
pub use sync::{fetch_desired, Phase, SyncOptions, SyncReport, ZoneSync};
pub use zone::{PowerDnsClient, ZoneReader, ZoneSnapshot};
