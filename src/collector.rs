// cteractl - CLI for CTERA Portal and Edge Filer administration
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Gathers the status report row for a single filer.
//!
//! Every column is read independently. A failed lookup turns into a sentinel
//! for that column only, so a filer that answers nothing still produces a
//! complete row.

use crate::field::{
    NA, NOT_APPLICABLE, field, field_or, lookup, run_command, scalar, try_run_command,
};
use crate::record::StatusRecord;
use crate::session::{DeviceRef, PortalSession};
use regex::Regex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Subtrees fetched in the single batched round trip.
pub const BATCH_PATHS: &[&str] = &[
    "/config/cloudsync",
    "/proc/cloudsync",
    "/config/logging",
    "/config/device",
    "/status/device",
    "/status/storage",
    "/config/cachingGateway",
    "/status/fileservices",
    "/config/fileservices",
    "/config/time",
    "/proc/time",
    "/proc/perfMonitor",
];

const LICENSE_PATH: &str = "/config/device/activeLicenseType";
const NETWORK_STATUS_PATH: &str = "/status/network/ports/0";
const DEBUG_LEVEL_COMMAND: &str = "dbg level";
const DB_FILE: &str = "/var/lib/ctera/db/ctera.db";
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Measure the local database file, which briefly enables the remote shell.
    pub db_size: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self { db_size: true }
    }
}

pub fn collect(
    session: &mut dyn PortalSession,
    device: &DeviceRef,
    options: &CollectOptions,
) -> StatusRecord {
    let tree = match session.get_multi(device, BATCH_PATHS) {
        Ok(tree) => tree,
        Err(err) => {
            warn!(
                tenant = %device.tenant,
                device = %device.name,
                error = %format!("{err:#}"),
                "batched status fetch failed"
            );
            Value::Null
        }
    };
    let network = match session.remote_get(device, NETWORK_STATUS_PATH) {
        Ok(network) => network,
        Err(err) => {
            debug!(device = %device.name, error = %format!("{err:#}"), "network status unavailable");
            Value::Null
        }
    };
    let get = |paths: &[&str]| field_or(&tree, paths, NOT_APPLICABLE);
    let or_na = |value: Option<String>| value.unwrap_or_else(|| NOT_APPLICABLE.to_string());

    let firmware = field(&tree, "status.device.runningFirmware").ok();
    let mac = field(&tree, "status.device.MacAddress").ok();
    let samples = lookup(&tree, "proc.perfMonitor.samples").ok();

    let debug_output = run_command(session, device, DEBUG_LEVEL_COMMAND);
    let metalog_setting = if debug_output == NOT_APPLICABLE {
        debug_output
    } else {
        or_na(debug_level(&debug_output))
    };
    let license = license(session, device, &tree);
    let db_size = if options.db_size {
        database_size(session, device, mac.as_deref(), firmware.as_deref())
    } else {
        NOT_APPLICABLE.to_string()
    };

    StatusRecord {
        tenant: device.tenant.clone(),
        name: device.name.clone(),
        cloudsync_status: get(&["proc.cloudsync.serviceStatus.id"]),
        self_scan_interval_hours: get(&["config.cloudsync.selfScanIntervalInHours"]),
        uploading_files: get(&["proc.cloudsync.serviceStatus.uploadingFiles"]),
        scanning_files: get(&["proc.cloudsync.serviceStatus.scanningFiles"]),
        self_verification_scanning_files: get(&[
            "proc.cloudsync.serviceStatus.selfVerificationscanningFiles",
        ]),
        metalog_setting,
        audit_logs_status: get(&["config.logging.files.mode"]),
        location: get(&["config.device.location"]),
        audit_logs_path: get(&["config.logging.files.path"]),
        metalog_max_size: get(&[
            "config.logging.metalog.maxFileSize",
            "config.logging.log2File.maxFileSize",
        ]),
        metalog_max_files: get(&[
            "config.logging.metalog.maxfiles",
            "config.logging.log2File.maxfiles",
        ]),
        firmware: or_na(firmware),
        license,
        eviction_percentage: get(&["config.cachingGateway.maxFilesBlocksInCachePercentage"]),
        volume_storage: or_na(volume_storage(&tree)),
        serial_number: get(&["status.device.SerialNumber"]),
        mac: or_na(mac),
        ip_config: or_na(ip_config(&network)),
        dns_primary: field_or(&network, &["ip.DNSServer1"], NOT_APPLICABLE),
        dns_secondary: field_or(&network, &["ip.DNSServer2"], NOT_APPLICABLE),
        ad_domain_status: get(&["status.fileservices.cifs.joinStatus"]),
        ad_mapping: or_na(ad_mapping(&tree)),
        alerts: or_na(alerts(&tree)),
        time_servers: or_na(time_servers(&tree)),
        uptime: get(&["proc.time.uptime"]),
        current_performance: or_na(current_performance(&tree)),
        max_cpu: max_metric(samples, "cpu"),
        max_memory: max_metric(samples, "memUsage"),
        db_size,
    }
}

/// License type from the dedicated query, else from the device status, whose
/// value may be wrapped as `{"current": ...}`.
fn license(session: &mut dyn PortalSession, device: &DeviceRef, tree: &Value) -> String {
    match session.remote_get(device, LICENSE_PATH) {
        Ok(value) => {
            if let Some(text) = scalar(&value).filter(|s| !s.trim().is_empty()) {
                return text;
            }
            debug!(device = %device.name, "license query returned no license type");
        }
        Err(err) => {
            debug!(device = %device.name, error = %format!("{err:#}"), "license query failed");
        }
    }

    let secondary = match lookup(tree, "status.device.license") {
        Ok(Value::Object(map)) => map.get("current").and_then(scalar),
        Ok(value) => scalar(value),
        Err(err) => {
            debug!(%err, "license fallback failed");
            None
        }
    };
    secondary.unwrap_or_else(|| NOT_APPLICABLE.to_string())
}

/// Extracts the current level from `dbg level` output.
///
/// The level sits at characters -28..-18 counted from the end of the output.
/// That offset assumes a fixed-width trailer; when the output is too short or
/// the window is blank, a `level: <word>` pattern is tried instead.
pub fn debug_level(output: &str) -> Option<String> {
    let chars: Vec<char> = output.chars().collect();
    if chars.len() >= 28 {
        let window: String = chars[chars.len() - 28..chars.len() - 18].iter().collect();
        if !window.trim().is_empty() {
            return Some(window);
        }
    }

    static LEVEL: OnceLock<Regex> = OnceLock::new();
    let level =
        LEVEL.get_or_init(|| Regex::new(r"(?i)level\s*[:=]\s*(\w+)").expect("static regex"));
    match level.captures(output) {
        Some(caps) => Some(caps[1].to_string()),
        None => {
            debug!(output, "debug level output format changed");
            None
        }
    }
}

/// `"<max>%"` over `samples[*][key]`, or [`NA`] without samples.
pub fn max_metric(samples: Option<&Value>, key: &str) -> String {
    let max = samples
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|sample| sample.get(key).and_then(Value::as_f64))
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))));

    match max {
        Some(v) => format!("{}%", percent(v)),
        None => NA.to_string(),
    }
}

fn percent(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

fn current_performance(tree: &Value) -> Option<String> {
    let current = lookup(tree, "proc.perfMonitor.current").ok()?;
    let cpu = current.get("cpu").and_then(Value::as_f64)?;
    let memory = current.get("memUsage").and_then(Value::as_f64)?;
    Some(format!("CPU {}%, Memory {}%", percent(cpu), percent(memory)))
}

/// Volume capacities are reported in MB.
fn volume_storage(tree: &Value) -> Option<String> {
    let volumes = lookup(tree, "status.storage.volumes").ok()?.as_array()?;
    let parts: Vec<String> = volumes
        .iter()
        .filter_map(|volume| {
            let name = volume.get("name").and_then(Value::as_str)?;
            let used = volume.get("usedCapacity").and_then(Value::as_f64)?;
            let total = volume.get("totalCapacity").and_then(Value::as_f64)?;
            Some(format!("{name}: {:.2}/{:.2} GB", used / 1024.0, total / 1024.0))
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

fn ip_config(network: &Value) -> Option<String> {
    let ip = network.get("ip")?;
    let address = ip.get("address").and_then(Value::as_str)?;
    let mut out = address.to_string();
    if let Some(mask) = ip.get("netmask").and_then(Value::as_str) {
        out.push('/');
        out.push_str(mask);
    }
    if let Some(gateway) = ip.get("gateway").and_then(Value::as_str) {
        out.push_str(" via ");
        out.push_str(gateway);
    }
    let mode = match ip.get("DHCPMode").and_then(Value::as_str) {
        Some(mode) if mode.eq_ignore_ascii_case("enabled") => "DHCP",
        Some(_) => "Static",
        None => return Some(out),
    };
    Some(format!("{out} ({mode})"))
}

fn ad_mapping(tree: &Value) -> Option<String> {
    let entries = lookup(tree, "config.fileservices.cifs.idMapping.map")
        .ok()?
        .as_array()?;
    let parts: Vec<String> = entries
        .iter()
        .filter_map(|entry| {
            let domain = entry.get("domainFlatName").and_then(Value::as_str)?;
            let min = entry.get("minID").and_then(scalar)?;
            let max = entry.get("maxID").and_then(scalar)?;
            Some(format!("{domain}:{min}-{max}"))
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

fn alerts(tree: &Value) -> Option<String> {
    let alerts = lookup(tree, "config.logging.alert.alerts").ok()?.as_array()?;
    if alerts.is_empty() {
        return Some("None".to_string());
    }
    let names: Vec<&str> = alerts
        .iter()
        .filter_map(|a| a.get("name").and_then(Value::as_str))
        .collect();
    (!names.is_empty()).then(|| names.join("; "))
}

fn time_servers(tree: &Value) -> Option<String> {
    match lookup(tree, "config.time.NTPServer").ok()? {
        Value::Array(servers) => {
            let names: Vec<String> = servers.iter().filter_map(scalar).collect();
            (!names.is_empty()).then(|| names.join("; "))
        }
        other => scalar(other),
    }
}

/// One-time code accepted by the filer for enabling its remote shell.
pub fn shell_code(mac: &str, firmware: &str) -> String {
    let digest = Sha256::digest(format!("{mac}-{firmware}").as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// Byte count from `stat` output (`Size: 1234   Blocks: ...`).
pub fn parse_stat_size(output: &str) -> Option<u64> {
    static SIZE: OnceLock<Regex> = OnceLock::new();
    let size = SIZE.get_or_init(|| Regex::new(r"Size:\s*(\d+)").expect("static regex"));
    size.captures(output)?[1].parse().ok()
}

fn database_size(
    session: &mut dyn PortalSession,
    device: &DeviceRef,
    mac: Option<&str>,
    firmware: Option<&str>,
) -> String {
    let (Some(mac), Some(firmware)) = (mac, firmware) else {
        debug!(device = %device.name, "no MAC/firmware; skipping database size");
        return NOT_APPLICABLE.to_string();
    };

    let code = shell_code(mac, firmware);
    let enable = json!({ "code": code });
    if let Err(err) = session.execute(device, "/config/device", "startTelnetd", enable) {
        warn!(device = %device.name, error = %format!("{err:#}"), "could not enable remote shell");
        // The filer may have opened the shell before the call failed
        disable_shell(session, device);
        return NOT_APPLICABLE.to_string();
    }

    let size = match try_run_command(session, device, &format!("exec stat {DB_FILE}")) {
        Ok(output) => {
            let parsed = parse_stat_size(&output);
            if parsed.is_none() {
                debug!(device = %device.name, output = %output, "unrecognised stat output");
            }
            parsed
        }
        Err(err) => {
            debug!(device = %device.name, %err, "stat failed");
            None
        }
    };

    disable_shell(session, device);

    match size {
        Some(bytes) => format!("{:.2} GB", bytes as f64 / GIB),
        None => NOT_APPLICABLE.to_string(),
    }
}

fn disable_shell(session: &mut dyn PortalSession, device: &DeviceRef) {
    if let Err(err) = session.execute(device, "/config/device", "stopTelnetd", Value::Null) {
        warn!(device = %device.name, error = %format!("{err:#}"), "could not disable remote shell");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{COLUMNS, is_sentinel};
    use crate::testing::FakePortal;

    fn device() -> DeviceRef {
        DeviceRef {
            name: "f1".into(),
            tenant: "t1".into(),
            connected: true,
        }
    }

    fn column<'a>(record: &'a StatusRecord, name: &str) -> &'a str {
        let idx = COLUMNS.iter().position(|c| *c == name).unwrap();
        record.fields()[idx]
    }

    fn healthy_tree() -> Value {
        json!({
            "config": {
                "cloudsync": {"selfScanIntervalInHours": 24},
                "logging": {
                    "files": {"mode": "enabled", "path": "/logs/audit"},
                    "metalog": {"maxFileSize": 50, "maxfiles": 10},
                    "alert": {"alerts": [{"name": "disk"}, {"name": "sync"}]}
                },
                "device": {"location": "Rack 4"},
                "cachingGateway": {"maxFilesBlocksInCachePercentage": 80},
                "fileservices": {"cifs": {"idMapping": {"map": [
                    {"domainFlatName": "CORP", "minID": 200000, "maxID": 5000000}
                ]}}},
                "time": {"NTPServer": ["0.pool.ntp.org", "1.pool.ntp.org"]}
            },
            "proc": {
                "cloudsync": {"serviceStatus": {
                    "id": "Synced",
                    "uploadingFiles": 3,
                    "scanningFiles": 0,
                    "selfVerificationscanningFiles": 1
                }},
                "time": {"uptime": "12 days, 3:04"},
                "perfMonitor": {
                    "current": {"cpu": 12, "memUsage": 40.5},
                    "samples": [
                        {"cpu": 10, "memUsage": 30},
                        {"cpu": 55, "memUsage": 61},
                        {"cpu": 3, "memUsage": 20}
                    ]
                }
            },
            "status": {
                "device": {
                    "runningFirmware": "7.6.1234.5",
                    "SerialNumber": "SN123",
                    "MacAddress": "00:0c:29:aa:bb:cc",
                    "license": {"current": "EV32"}
                },
                "storage": {"volumes": [
                    {"name": "main", "usedCapacity": 512, "totalCapacity": 2048}
                ]},
                "fileservices": {"cifs": {"joinStatus": 0}},
                "network": {"ports": [{"ip": {
                    "address": "10.0.0.5",
                    "netmask": "255.255.255.0",
                    "gateway": "10.0.0.1",
                    "DHCPMode": "disabled",
                    "DNSServer1": "10.0.0.2",
                    "DNSServer2": "10.0.0.3"
                }}]}
            }
        })
    }

    #[test]
    fn collects_every_column_from_a_healthy_filer() {
        let level_output = format!("{}{:<10}{}", "x".repeat(40), "info", "-".repeat(18));
        let mut portal = FakePortal::new()
            .tenant("t1")
            .device("t1", "f1", true)
            .tree("f1", healthy_tree())
            .command("f1", "dbg level", json!(level_output))
            .command(
                "f1",
                &format!("exec stat {DB_FILE}"),
                json!("  File: ctera.db\n  Size: 2147483648  Blocks: 8  IO Block: 4096"),
            );

        let record = collect(&mut portal, &device(), &CollectOptions::default());

        assert_eq!(column(&record, "Tenant"), "t1");
        assert_eq!(column(&record, "CloudSync Status"), "Synced");
        assert_eq!(column(&record, "selfScanIntervalInHours"), "24");
        assert_eq!(column(&record, "uploadingFiles"), "3");
        assert_eq!(column(&record, "MetaLogsSetting"), "info      ");
        assert_eq!(column(&record, "AuditLogsStatus"), "enabled");
        assert_eq!(column(&record, "MetaLogMaxSize"), "50");
        assert_eq!(column(&record, "CurrentFirmware"), "7.6.1234.5");
        assert_eq!(column(&record, "License"), "EV32");
        assert_eq!(column(&record, "CurrentVolumeStorage"), "main: 0.50/2.00 GB");
        assert_eq!(
            column(&record, "IP Config"),
            "10.0.0.5/255.255.255.0 via 10.0.0.1 (Static)"
        );
        assert_eq!(column(&record, "DNS Server2"), "10.0.0.3");
        assert_eq!(column(&record, "AD Domain Status"), "0");
        assert_eq!(column(&record, "AD Mapping"), "CORP:200000-5000000");
        assert_eq!(column(&record, "Alerts"), "disk; sync");
        assert_eq!(column(&record, "TimeServer"), "0.pool.ntp.org; 1.pool.ntp.org");
        assert_eq!(column(&record, "Current Performance"), "CPU 12%, Memory 40.5%");
        assert_eq!(column(&record, "Max CPU"), "55%");
        assert_eq!(column(&record, "Max Memory"), "61%");
        assert_eq!(column(&record, "DB Size"), "2.00 GB");
    }

    #[test]
    fn total_failure_still_yields_a_full_row() {
        let mut portal = FakePortal::new()
            .tenant("t1")
            .device("t1", "f1", true)
            .fail("get_multi:f1");

        let record = collect(&mut portal, &device(), &CollectOptions::default());
        let fields = record.fields();

        assert_eq!(fields.len(), COLUMNS.len());
        assert_eq!(fields[0], "t1");
        assert_eq!(fields[1], "f1");
        for (name, value) in COLUMNS.iter().zip(fields.iter()).skip(2) {
            assert!(is_sentinel(value), "{name} = {value}");
        }
        assert_eq!(record, StatusRecord::unavailable(&device()));
    }

    #[test]
    fn metalog_size_falls_back_to_log2file() {
        let mut portal = FakePortal::new().tenant("t1").device("t1", "f1", true).tree(
            "f1",
            json!({"config": {"logging": {"log2File": {"maxFileSize": 100, "maxfiles": 5}}}}),
        );

        let record = collect(&mut portal, &device(), &CollectOptions { db_size: false });
        assert_eq!(record.metalog_max_size, "100");
        assert_eq!(record.metalog_max_files, "5");
    }

    #[test]
    fn license_prefers_query_then_unwraps_current() {
        let mut tree = healthy_tree();
        tree["config"]["device"]["activeLicenseType"] = json!("EV64");
        let mut portal = FakePortal::new()
            .tenant("t1")
            .device("t1", "f1", true)
            .tree("f1", tree);
        assert_eq!(license(&mut portal, &device(), &healthy_tree()), "EV64");

        // healthy_tree has no activeLicenseType, so the query fails
        let mut portal = FakePortal::new().tree("f1", healthy_tree());
        assert_eq!(license(&mut portal, &device(), &healthy_tree()), "EV32");

        let plain = json!({"status": {"device": {"license": "EV8"}}});
        assert_eq!(license(&mut portal, &device(), &plain), "EV8");
        assert_eq!(license(&mut portal, &device(), &json!({})), NOT_APPLICABLE);
    }

    #[test]
    fn max_metric_handles_samples_and_absence() {
        let samples = json!([{"cpu": 10}, {"cpu": 55}, {"cpu": 3}]);
        assert_eq!(max_metric(Some(&samples), "cpu"), "55%");
        assert_eq!(max_metric(Some(&json!([])), "cpu"), NA);
        assert_eq!(max_metric(None, "cpu"), NA);
        assert_eq!(max_metric(Some(&json!([{"cpu": 12.34}])), "cpu"), "12.3%");
        assert_eq!(max_metric(Some(&json!([{"memUsage": 1}])), "cpu"), NA);
    }

    #[test]
    fn debug_level_uses_fixed_window_then_pattern() {
        let output = format!("{}{}{}", "header ", "debug     ", "x".repeat(18));
        assert_eq!(debug_level(&output).as_deref(), Some("debug     "));

        assert_eq!(debug_level("Level: warning").as_deref(), Some("warning"));
        assert_eq!(debug_level("short"), None);
    }

    #[test]
    fn stat_size_is_parsed_from_free_text() {
        let output = "  File: /var/lib/ctera/db/ctera.db\n  Size: 734003200\tBlocks: 1433608";
        assert_eq!(parse_stat_size(output), Some(734_003_200));
        assert_eq!(parse_stat_size("stat: cannot stat"), None);
    }

    #[test]
    fn remote_shell_is_disabled_even_when_stat_fails() {
        let mut portal = FakePortal::new()
            .tenant("t1")
            .device("t1", "f1", true)
            .tree("f1", healthy_tree());
        let calls = portal.calls();

        let size = database_size(&mut portal, &device(), Some("00:11"), Some("7.6"));

        assert_eq!(size, NOT_APPLICABLE);
        let calls = calls.borrow();
        let start = calls.iter().position(|c| c == "execute:f1:startTelnetd").unwrap();
        let stop = calls.iter().position(|c| c == "execute:f1:stopTelnetd").unwrap();
        assert!(start < stop);
    }

    #[test]
    fn remote_shell_is_disabled_when_enabling_fails() {
        let mut portal = FakePortal::new()
            .tenant("t1")
            .device("t1", "f1", true)
            .fail("execute:f1:startTelnetd");
        let calls = portal.calls();

        let size = database_size(&mut portal, &device(), Some("00:11"), Some("7.6"));

        assert_eq!(size, NOT_APPLICABLE);
        assert_eq!(
            *calls.borrow(),
            vec!["execute:f1:startTelnetd", "execute:f1:stopTelnetd"]
        );
    }

    #[test]
    fn database_size_is_skipped_without_identity() {
        let mut portal = FakePortal::new();
        let calls = portal.calls();
        assert_eq!(database_size(&mut portal, &device(), None, Some("7.6")), NOT_APPLICABLE);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn shell_code_is_stable_and_short() {
        let a = shell_code("00:0c:29:aa:bb:cc", "7.6.1234.5");
        assert_eq!(a.len(), 8);
        assert_eq!(a, shell_code("00:0c:29:aa:bb:cc", "7.6.1234.5"));
        assert_ne!(a, shell_code("00:0c:29:aa:bb:cd", "7.6.1234.5"));
    }
}
