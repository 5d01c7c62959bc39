use crate::field::{NA, NOT_APPLICABLE};
use crate::session::DeviceRef;

pub const COLUMN_COUNT: usize = 31;

/// Report header; `StatusRecord::fields` yields values in this order.
pub const COLUMNS: [&str; COLUMN_COUNT] = [
    "Tenant",
    "Filer Name",
    "CloudSync Status",
    "selfScanIntervalInHours",
    "uploadingFiles",
    "scanningFiles",
    "selfVerificationscanningFiles",
    "MetaLogsSetting",
    "AuditLogsStatus",
    "DeviceLocation",
    "AuditLogsPath",
    "MetaLogMaxSize",
    "MetaLogMaxFiles",
    "CurrentFirmware",
    "License",
    "EvictionPercentage",
    "CurrentVolumeStorage",
    "SN",
    "MAC",
    "IP Config",
    "DNS Server1",
    "DNS Server2",
    "AD Domain Status",
    "AD Mapping",
    "Alerts",
    "TimeServer",
    "uptime",
    "Current Performance",
    "Max CPU",
    "Max Memory",
    "DB Size",
];

/// One report row for one filer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub tenant: String,
    pub name: String,
    pub cloudsync_status: String,
    pub self_scan_interval_hours: String,
    pub uploading_files: String,
    pub scanning_files: String,
    pub self_verification_scanning_files: String,
    pub metalog_setting: String,
    pub audit_logs_status: String,
    pub location: String,
    pub audit_logs_path: String,
    pub metalog_max_size: String,
    pub metalog_max_files: String,
    pub firmware: String,
    pub license: String,
    pub eviction_percentage: String,
    pub volume_storage: String,
    pub serial_number: String,
    pub mac: String,
    pub ip_config: String,
    pub dns_primary: String,
    pub dns_secondary: String,
    pub ad_domain_status: String,
    pub ad_mapping: String,
    pub alerts: String,
    pub time_servers: String,
    pub uptime: String,
    pub current_performance: String,
    pub max_cpu: String,
    pub max_memory: String,
    pub db_size: String,
}

impl StatusRecord {
    /// A row for a filer nothing could be read from.
    pub fn unavailable(device: &DeviceRef) -> Self {
        let na = || NOT_APPLICABLE.to_string();
        Self {
            tenant: device.tenant.clone(),
            name: device.name.clone(),
            cloudsync_status: na(),
            self_scan_interval_hours: na(),
            uploading_files: na(),
            scanning_files: na(),
            self_verification_scanning_files: na(),
            metalog_setting: na(),
            audit_logs_status: na(),
            location: na(),
            audit_logs_path: na(),
            metalog_max_size: na(),
            metalog_max_files: na(),
            firmware: na(),
            license: na(),
            eviction_percentage: na(),
            volume_storage: na(),
            serial_number: na(),
            mac: na(),
            ip_config: na(),
            dns_primary: na(),
            dns_secondary: na(),
            ad_domain_status: na(),
            ad_mapping: na(),
            alerts: na(),
            time_servers: na(),
            uptime: na(),
            current_performance: na(),
            max_cpu: NA.to_string(),
            max_memory: NA.to_string(),
            db_size: na(),
        }
    }

    pub fn fields(&self) -> [&str; COLUMN_COUNT] {
        [
            &self.tenant,
            &self.name,
            &self.cloudsync_status,
            &self.self_scan_interval_hours,
            &self.uploading_files,
            &self.scanning_files,
            &self.self_verification_scanning_files,
            &self.metalog_setting,
            &self.audit_logs_status,
            &self.location,
            &self.audit_logs_path,
            &self.metalog_max_size,
            &self.metalog_max_files,
            &self.firmware,
            &self.license,
            &self.eviction_percentage,
            &self.volume_storage,
            &self.serial_number,
            &self.mac,
            &self.ip_config,
            &self.dns_primary,
            &self.dns_secondary,
            &self.ad_domain_status,
            &self.ad_mapping,
            &self.alerts,
            &self.time_servers,
            &self.uptime,
            &self.current_performance,
            &self.max_cpu,
            &self.max_memory,
            &self.db_size,
        ]
    }
}

pub fn is_sentinel(value: &str) -> bool {
    value == NOT_APPLICABLE || value == NA
}
