//! Turns registry entries into the desired `name -> record` mapping.
//!
//! ## Derivation rules
//!
//! ```text
//! {site: oe3xnr, name: web.oe3xnr, ip: 44.143.60.66, aliases: "www.oe3xnr,aprs.oe3xnr"}
//!   → web.oe3xnr.hamip.at.   A      44.143.60.66
//!   → www.oe3xnr.hamip.at.   CNAME  web.oe3xnr.hamip.at.
//!   → aprs.oe3xnr.hamip.at.  CNAME  web.oe3xnr.hamip.at.
//!   → oe3xnr.hamip.at.       CNAME  www.oe3xnr.hamip.at.   (site default)
//! ```
//!
//! - every insert is first-writer-wins; a later entry never replaces a name
//! - `x.<canonical_site>.hamip.at.` is also published as `x.hamip.at.`
//! - alias `news-global.<site>` also yields `news.hamip.at.`
//! - each site without its own record points at `www`, `web`, `bb` or
//!   `router` (first one resolving to an A record), else at the
//!   lexicographically smallest name under the site

use ipnet::Ipv4Net;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::DeriveConfig;
use crate::error::SyncError;
use crate::record::{RecordType, ResourceRecord, ZoneRecords};
use crate::registry::{RawHostEntry, RawSubnetEntry};

/// Candidate labels for a site's default record, highest priority first.
const SITE_DEFAULT_LABELS: [&str; 4] = ["www", "web", "bb", "router"];

/// Marker label of a rollup alias (`<label>-global.<site>`).
const ROLLUP_MARKER: &str = "-global.";

/// Public-IP name (`NNN-NNN-NNN-NNN-inetip.<name>`), anywhere in an owner name.
static PUBLIC_IP_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]{3})-([0-9]{3})-([0-9]{3})-([0-9]{3})-inetip\.([\w.-]+)")
        .expect("public-IP name pattern compiles")
});

/// Longest CNAME chain followed when checking a site default candidate.
const MAX_CNAME_HOPS: usize = 8;

type SiteFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Derives records from registry entries.
pub struct RecordDeriver {
    suffix: String,
    ttl: u32,
    canonical_site: Option<String>,
    public_ip_names: bool,
    site_filter: SiteFilter,
}

impl RecordDeriver {
    /// Create a deriver from configuration. The site filter is a prefix match
    /// on `site_prefix`; an empty prefix accepts every site.
    pub fn new(config: &DeriveConfig) -> Self {
        let prefix = config.site_prefix.trim().to_ascii_lowercase();
        Self {
            suffix: config.normalized_suffix(),
            ttl: config.ttl,
            canonical_site: config
                .canonical_site
                .as_deref()
                .map(|site| site.trim().to_ascii_lowercase())
                .filter(|site| !site.is_empty()),
            public_ip_names: config.public_ip_names,
            site_filter: Box::new(move |site| site.to_ascii_lowercase().starts_with(&prefix)),
        }
    }

    /// Replace the site filter predicate.
    pub fn with_site_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.site_filter = Box::new(filter);
        self
    }

    /// Suffix in `.domain.tld.` form.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Derive records from host entries.
    pub fn derive_hosts(&self, entries: &[RawHostEntry]) -> ZoneRecords {
        let mut records = ZoneRecords::new();
        let mut sites = BTreeSet::new();

        for entry in entries.iter().filter(|entry| (self.site_filter)(&entry.site)) {
            let site = entry.site.trim().to_ascii_lowercase();
            if !site.is_empty() {
                sites.insert(site.clone());
            }
            if entry.deleted {
                continue;
            }
            self.derive_entry(entry, &site, &mut records);
        }

        if self.public_ip_names {
            self.derive_public_ip_names(&mut records);
        }

        for site in &sites {
            self.derive_site_default(site, &mut records);
        }

        debug!(
            entries = entries.len(),
            sites = sites.len(),
            records = records.len(),
            "derived host records"
        );
        records
    }

    /// Derive `dhcp-a-b-c-d.<site>` A records for subnet DHCP ranges.
    ///
    /// A subnet's site is taken from the first host address of the network
    /// that carries an A record in `hosts`; subnets with no such host are
    /// skipped.
    pub fn derive_dhcp(
        &self,
        subnets: &[RawSubnetEntry],
        hosts: &ZoneRecords,
    ) -> Result<ZoneRecords, SyncError> {
        let site_by_ip = self.site_domains_by_ip(hosts);
        let mut records = ZoneRecords::new();

        for subnet in subnets.iter().filter(|subnet| !subnet.deleted) {
            let range = subnet.dhcp_range.trim();
            if range.is_empty() {
                continue;
            }
            let (start, end) = parse_dhcp_range(range)?;
            let begin = subnet.begin_ip.ok_or_else(|| {
                SyncError::RegistryFetch(format!("subnet {} has a DHCP range but no begin_ip", subnet.cidr))
            })?;

            let Ok(network) = subnet.cidr.trim().parse::<Ipv4Net>() else {
                warn!(cidr = %subnet.cidr, "skipping subnet with malformed CIDR");
                continue;
            };
            let mut hosts = network.hosts();
            let Some(first) = hosts.next() else {
                continue;
            };
            let last = hosts.next_back().unwrap_or(first);
            let Some((_, site_domain)) = site_by_ip.range(first..=last).next() else {
                debug!(cidr = %subnet.cidr, "no named host in subnet, skipping DHCP range");
                continue;
            };

            let [a, b, c, _] = Ipv4Addr::from(begin).octets();
            for d in start..=end {
                let name = format!("dhcp-{a}-{b}-{c}-{d}.{site_domain}");
                let ip = Ipv4Addr::new(a, b, c, d).to_string();
                self.put(&mut records, name, ResourceRecord::a(ip, self.ttl));
            }
        }

        debug!(subnets = subnets.len(), records = records.len(), "derived DHCP records");
        Ok(records)
    }

    fn derive_entry(&self, entry: &RawHostEntry, site: &str, records: &mut ZoneRecords) {
        let name = entry.name.trim();
        if name.is_empty() {
            return;
        }
        let host = self.qualify(name);
        let ip = entry.ip.trim();

        if !ip.is_empty() && self.put(records, host.clone(), ResourceRecord::a(ip, self.ttl)) {
            if let Some(canonical) = self.canonical_name(&host) {
                self.put(records, canonical, ResourceRecord::a(ip, self.ttl));
            }
        }

        for alias in entry.alias_names() {
            let alias = self.qualify(alias);
            if alias == host || records.contains(&alias) {
                continue;
            }
            self.put(records, alias.clone(), ResourceRecord::cname(&host, self.ttl));

            if let Some(rollup) = self.rollup_name(&alias, site) {
                self.put(records, rollup, ResourceRecord::cname(&host, self.ttl));
            }
        }
    }

    /// `x.<canonical_site><suffix>` → `x<suffix>`.
    fn canonical_name(&self, host: &str) -> Option<String> {
        let marker = self.canonical_site.as_ref()?;
        let tail = format!(".{}{}", marker, self.suffix);
        let label = host.strip_suffix(&tail)?;
        (!label.is_empty()).then(|| format!("{}{}", label, self.suffix))
    }

    /// `<label>-global.<site><suffix>` → `<label><suffix>`.
    fn rollup_name(&self, alias: &str, site: &str) -> Option<String> {
        if site.is_empty() {
            return None;
        }
        let tail = format!("{}{}{}", ROLLUP_MARKER, site, self.suffix);
        let label = alias.strip_suffix(&tail)?;
        (!label.is_empty()).then(|| format!("{}{}", label, self.suffix))
    }

    fn derive_public_ip_names(&self, records: &mut ZoneRecords) {
        let found: Vec<(String, Ipv4Addr)> = records
            .names()
            .filter_map(|name| parse_public_ip_name(name).map(|(ip, rest)| (rest.to_string(), ip)))
            .collect();

        for (name, ip) in found {
            self.put(records, name, ResourceRecord::a(ip.to_string(), self.ttl));
        }
    }

    fn derive_site_default(&self, site: &str, records: &mut ZoneRecords) {
        let site_domain = format!("{}{}", site, self.suffix);
        if records.contains(&site_domain) {
            return;
        }

        if let Some(target) = site_default_target(records, &site_domain) {
            debug!(site, target = %target, "site default");
            self.put(records, site_domain, ResourceRecord::cname(&target, self.ttl));
        }
    }

    /// Map each A record address to its site domain (`<site><suffix>`).
    /// The first name in lexicographic order wins for a shared address.
    fn site_domains_by_ip(&self, hosts: &ZoneRecords) -> BTreeMap<Ipv4Addr, String> {
        let mut index = BTreeMap::new();
        for (name, record) in hosts.iter() {
            if record.record_type != RecordType::A {
                continue;
            }
            let Ok(ip) = record.content.parse::<Ipv4Addr>() else {
                continue;
            };
            let Some(relative) = name.strip_suffix(self.suffix.as_str()) else {
                continue;
            };
            let Some(site) = relative.rsplit('.').next().filter(|site| !site.is_empty()) else {
                continue;
            };
            index
                .entry(ip)
                .or_insert_with(|| format!("{}{}", site, self.suffix));
        }
        index
    }

    fn qualify(&self, name: &str) -> String {
        format!(
            "{}{}",
            name.trim().trim_end_matches('.').to_ascii_lowercase(),
            self.suffix
        )
    }

    /// Check-then-insert that also enforces record invariants.
    fn put(&self, records: &mut ZoneRecords, name: String, record: ResourceRecord) -> bool {
        if let Err(reason) = record.check(&name) {
            debug!(%reason, "skipping invalid derived record");
            return false;
        }
        records.insert_if_absent(name, record)
    }
}

fn site_default_target(records: &ZoneRecords, site_domain: &str) -> Option<String> {
    let preferred = SITE_DEFAULT_LABELS
        .iter()
        .map(|label| format!("{label}.{site_domain}"))
        .find(|candidate| resolves_to_a(records, candidate));

    preferred.or_else(|| {
        let tail = format!(".{site_domain}");
        records
            .names()
            .find(|name| name.ends_with(&tail))
            .map(str::to_string)
    })
}

/// True if `name` is an A record, or a CNAME chain within `records` ending at one.
fn resolves_to_a(records: &ZoneRecords, name: &str) -> bool {
    let mut current = name;
    for _ in 0..MAX_CNAME_HOPS {
        match records.get(current) {
            Some(record) if record.record_type == RecordType::A => return true,
            Some(record) if record.record_type == RecordType::Cname => current = &record.content,
            _ => return false,
        }
    }
    false
}

/// `185-236-164-044-inetip.wx.oe3gwu.hamip.at.` → (185.236.164.44, `wx.oe3gwu.hamip.at.`).
///
/// The first occurrence of the pattern counts, wherever it starts.
fn parse_public_ip_name(name: &str) -> Option<(Ipv4Addr, &str)> {
    let captures = PUBLIC_IP_NAME.captures(name)?;
    let mut octets = [0u8; 4];
    for (i, octet) in octets.iter_mut().enumerate() {
        *octet = captures.get(i + 1)?.as_str().parse().ok()?;
    }
    let rest = captures.get(5)?.as_str();
    Some((Ipv4Addr::from(octets), rest))
}

fn parse_dhcp_range(range: &str) -> Result<(u8, u8), SyncError> {
    let malformed = || SyncError::RegistryFetch(format!("malformed DHCP range: {range}"));
    let (start, end) = range.split_once('-').ok_or_else(malformed)?;
    let start = start.trim().parse::<u8>().map_err(|_| malformed())?;
    let end = end.trim().parse::<u8>().map_err(|_| malformed())?;
    Ok((start, end))
}
