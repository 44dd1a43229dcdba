//! DeviceDiagnostics: inspect the attached device and classify readiness.
//!
//! Each facet is probed independently. A facet whose commands fail becomes
//! [`Probe::Unknown`] and the rest of the inspection carries on.

use crate::config::DiagnosticsConfig;
use crate::device::DeviceLink;
use crate::error::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Outcome of one facet probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe<T> {
    Known(T),
    Unknown(String),
}

impl<T> Probe<T> {
    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Probe::Known(value),
            Err(e) => Probe::Unknown(e.to_string()),
        }
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Probe::Known(value) => Some(value),
            Probe::Unknown(_) => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Probe::Known(_))
    }
}

// ============================================
// Facets
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub model: String,
    pub manufacturer: String,
    pub brand: String,
    pub device: String,
    pub android_version: String,
    pub sdk: Option<u32>,
    pub serial: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemResources {
    pub total_ram_mb: Option<u64>,
    pub cpu_cores: usize,
}

/// SELinux enforcement as reported by `getenforce`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelinuxMode {
    Enforcing,
    Permissive,
    Disabled,
    Other(String),
}

impl SelinuxMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Enforcing" => SelinuxMode::Enforcing,
            "Permissive" => SelinuxMode::Permissive,
            "Disabled" => SelinuxMode::Disabled,
            other => SelinuxMode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SelinuxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelinuxMode::Enforcing => f.write_str("Enforcing"),
            SelinuxMode::Permissive => f.write_str("Permissive"),
            SelinuxMode::Disabled => f.write_str("Disabled"),
            SelinuxMode::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityPosture {
    pub usb_debugging: bool,
    pub developer_options: bool,
    pub selinux: SelinuxMode,
    pub encrypted: bool,
    pub secure_boot: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Connectivity {
    /// `adb get-state`: device, unauthorized, offline...
    pub state: String,
    pub usb_config: String,
    pub usb_state: String,
}

/// One attached target as seen by the last inspection. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub serial: Option<String>,
    pub identity: Probe<Identity>,
    pub system: Probe<SystemResources>,
    pub security: Probe<SecurityPosture>,
    pub storage: Probe<StorageInfo>,
    pub connectivity: Probe<Connectivity>,
    /// Permissions granted to the shell package
    pub permissions: Probe<BTreeSet<String>>,
}

impl Device {
    pub fn sdk(&self) -> Option<u32> {
        self.identity.known().and_then(|i| i.sdk)
    }

    pub fn usb_debugging(&self) -> Option<bool> {
        self.security.known().map(|s| s.usb_debugging)
    }

    pub fn selinux(&self) -> Option<&SelinuxMode> {
        self.security.known().map(|s| &s.selinux)
    }

    pub fn free_storage_mb(&self) -> Option<u64> {
        self.storage.known().map(|s| s.free_mb)
    }

    pub fn connection_state(&self) -> Option<&str> {
        self.connectivity.known().map(|c| c.state.as_str())
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .known()
            .map(|p| p.contains(permission))
            .unwrap_or(false)
    }
}

/// Readiness verdict. Issues block injection, warnings do not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub is_ready: bool,
}

// ============================================
// Inspection
// ============================================

pub struct DeviceDiagnostics<'a> {
    link: &'a DeviceLink,
    config: &'a DiagnosticsConfig,
    shell_package: &'a str,
}

impl<'a> DeviceDiagnostics<'a> {
    pub fn new(link: &'a DeviceLink, config: &'a DiagnosticsConfig, shell_package: &'a str) -> Self {
        Self {
            link,
            config,
            shell_package,
        }
    }

    /// Probe every facet. Never fails; failed facets are `Unknown`.
    pub fn inspect(&self) -> Device {
        let props = self.link.getprops();
        let props_ref = props.as_ref().ok();

        let identity = match &props {
            Ok(props) => Probe::Known(identity_from_props(props)),
            Err(e) => Probe::Unknown(e.to_string()),
        };

        let device = Device {
            serial: self.link.serial().map(str::to_string),
            identity,
            system: Probe::from_result(self.system_resources()),
            security: Probe::from_result(self.security_posture(props_ref)),
            storage: Probe::from_result(self.storage()),
            connectivity: Probe::from_result(self.connectivity(props_ref)),
            permissions: Probe::from_result(self.granted_permissions()),
        };

        tracing::info!(
            sdk = ?device.sdk(),
            usb_debugging = ?device.usb_debugging(),
            selinux = ?device.selinux(),
            free_mb = ?device.free_storage_mb(),
            state = ?device.connection_state(),
            "device inspected"
        );
        device
    }

    fn system_resources(&self) -> Result<SystemResources> {
        let meminfo = self.link.shell("cat /proc/meminfo")?;
        let cpuinfo = self.link.shell("cat /proc/cpuinfo")?;
        Ok(SystemResources {
            total_ram_mb: parse_mem_total_mb(&meminfo),
            cpu_cores: count_processors(&cpuinfo),
        })
    }

    fn security_posture(&self, props: Option<&BTreeMap<String, String>>) -> Result<SecurityPosture> {
        let adb_enabled = self.link.shell("settings get global adb_enabled")?;
        let dev_options = self
            .link
            .shell("settings get global development_settings_enabled")?;
        let selinux = self.link.shell("getenforce")?;
        let prop = |key: &str| props.and_then(|p| p.get(key)).map(|v| v.trim().to_string());

        Ok(SecurityPosture {
            usb_debugging: adb_enabled.trim() == "1",
            developer_options: dev_options.trim() == "1",
            selinux: SelinuxMode::parse(&selinux),
            encrypted: prop("ro.crypto.state").as_deref() == Some("encrypted"),
            secure_boot: prop("ro.boot.secure_boot").as_deref() == Some("1"),
        })
    }

    fn storage(&self) -> Result<StorageInfo> {
        let df = self.link.shell("df /data")?;
        parse_df(&df).ok_or_else(|| crate::Error::CommandFailed {
            command: "df /data".to_string(),
            status: Some(0),
            stderr: "unrecognized df output".to_string(),
        })
    }

    fn connectivity(&self, props: Option<&BTreeMap<String, String>>) -> Result<Connectivity> {
        let output = self.link.run_raw(&["get-state"], self.link.timeout())?;
        let state = if output.success() {
            output.stdout.trim().to_string()
        } else if output.stderr.contains("unauthorized") {
            "unauthorized".to_string()
        } else if output.stderr.contains("offline") {
            "offline".to_string()
        } else {
            return Err(crate::Error::CommandFailed {
                command: "get-state".to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        };
        let prop = |key: &str| {
            props
                .and_then(|p| p.get(key))
                .cloned()
                .unwrap_or_default()
        };
        Ok(Connectivity {
            state,
            usb_config: prop("sys.usb.config"),
            usb_state: prop("sys.usb.state"),
        })
    }

    fn granted_permissions(&self) -> Result<BTreeSet<String>> {
        let output = self
            .link
            .shell_unchecked(&format!("dumpsys package {}", self.shell_package))?;
        if !output.success() {
            return Err(crate::Error::CommandFailed {
                command: format!("dumpsys package {}", self.shell_package),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(parse_granted_permissions(&output.stdout))
    }

    /// Sort findings into blocking issues and non-blocking warnings
    pub fn classify(&self, device: &Device) -> Readiness {
        classify(device, self.config)
    }
}

pub fn classify(device: &Device, config: &DiagnosticsConfig) -> Readiness {
    let mut readiness = Readiness::default();

    if let Some(sdk) = device.sdk() {
        if sdk < config.min_sdk {
            readiness
                .issues
                .push(format!("Android API level {} is below {}", sdk, config.min_sdk));
            readiness
                .recommendations
                .push(format!("Use a device running API level {} or newer", config.min_sdk));
        }
    }

    match device.usb_debugging() {
        Some(false) => {
            readiness.issues.push("USB debugging not enabled".to_string());
            readiness
                .recommendations
                .push("Enable USB debugging in Developer Options (or run `stagehand fix`)".to_string());
        }
        Some(true) => {}
        None => {
            readiness
                .warnings
                .push("USB debugging state unknown".to_string());
        }
    }

    if device.connection_state() == Some("unauthorized") {
        readiness.issues.push("Device unauthorized".to_string());
        readiness
            .recommendations
            .push("Accept the RSA key prompt on the device".to_string());
    }

    if let Some(free) = device.free_storage_mb() {
        if free < config.low_storage_mb {
            readiness
                .warnings
                .push(format!("Low storage space ({} MB free)", free));
            readiness
                .recommendations
                .push("Free up storage space".to_string());
        }
    }

    if device.selinux() == Some(&SelinuxMode::Enforcing) {
        readiness.warnings.push("SELinux is enforcing".to_string());
        readiness
            .recommendations
            .push("Consider setting SELinux to permissive".to_string());
    }

    readiness.is_ready = readiness.issues.is_empty();
    readiness
}

// ============================================
// Parsers
// ============================================

fn identity_from_props(props: &BTreeMap<String, String>) -> Identity {
    let get = |key: &str| {
        props
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string())
    };
    Identity {
        model: get("ro.product.model"),
        manufacturer: get("ro.product.manufacturer"),
        brand: get("ro.product.brand"),
        device: get("ro.product.device"),
        android_version: get("ro.build.version.release"),
        sdk: props
            .get("ro.build.version.sdk")
            .and_then(|v| v.trim().parse().ok()),
        serial: get("ro.serialno"),
    }
}

fn parse_mem_total_mb(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb / 1024)
    })
}

fn count_processors(cpuinfo: &str) -> usize {
    cpuinfo
        .lines()
        .filter(|line| {
            line.split_once(':')
                .map(|(key, _)| key.trim() == "processor")
                .unwrap_or(false)
        })
        .count()
}

/// Parse `df /data` (1K blocks) into megabytes.
fn parse_df(df: &str) -> Option<StorageInfo> {
    df.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let mounted_on_data = fields.last() == Some(&"/data")
            || fields.first().map(|f| f.ends_with("/data")).unwrap_or(false);
        if !mounted_on_data || fields.len() < 4 {
            return None;
        }
        let total: u64 = fields[1].parse().ok()?;
        let used: u64 = fields[2].parse().ok()?;
        let free: u64 = fields[3].parse().ok()?;
        Some(StorageInfo {
            total_mb: total / 1024,
            used_mb: used / 1024,
            free_mb: free / 1024,
        })
    })
}

/// Permissions listed as `name: granted=true` in `dumpsys package` output.
pub fn parse_granted_permissions(dumpsys: &str) -> BTreeSet<String> {
    dumpsys
        .lines()
        .filter_map(|line| {
            let (name, state) = line.trim().split_once(':')?;
            if state.contains("granted=true") && name.contains('.') {
                Some(name.trim().to_string())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{link, ScriptedTransport};
    use crate::device::CommandOutput;

    const PROPS: &str = "[ro.product.model]: [SM-G991U]\n[ro.product.manufacturer]: [samsung]\n\
        [ro.build.version.release]: [13]\n[ro.build.version.sdk]: [33]\n\
        [ro.crypto.state]: [encrypted]\n[sys.usb.config]: [mtp,adb]\n";

    fn healthy() -> ScriptedTransport {
        ScriptedTransport::new()
            .on("shell getprop", CommandOutput::ok(PROPS))
            .on("/proc/meminfo", CommandOutput::ok("MemTotal:        7812345 kB\n"))
            .on(
                "/proc/cpuinfo",
                CommandOutput::ok("processor\t: 0\nBogoMIPS\t: 38.40\nprocessor\t: 1\n"),
            )
            .on("adb_enabled", CommandOutput::ok("1\n"))
            .on("development_settings_enabled", CommandOutput::ok("1\n"))
            .on("getenforce", CommandOutput::ok("Enforcing\n"))
            .on(
                "df /data",
                CommandOutput::ok(
                    "Filesystem 1K-blocks Used Available Use% Mounted on\n\
                     /dev/block/dm-9 115712000 40960000 74752000 36% /data\n",
                ),
            )
            .on("get-state", CommandOutput::ok("device\n"))
            .on(
                "dumpsys package",
                CommandOutput::ok(
                    "    runtime permissions:\n      android.permission.READ_SMS: granted=true\n\
                     android.permission.WRITE_SMS: granted=false\n",
                ),
            )
    }

    #[test]
    fn test_inspect_healthy_device() {
        let link = link(healthy());
        let config = DiagnosticsConfig::default();
        let diagnostics = DeviceDiagnostics::new(&link, &config, "com.android.shell");
        let device = diagnostics.inspect();

        assert_eq!(device.sdk(), Some(33));
        assert_eq!(device.usb_debugging(), Some(true));
        assert_eq!(device.selinux(), Some(&SelinuxMode::Enforcing));
        assert_eq!(device.free_storage_mb(), Some(73000));
        assert_eq!(device.system.known().unwrap().cpu_cores, 2);
        assert_eq!(device.system.known().unwrap().total_ram_mb, Some(7629));
        assert!(device.security.known().unwrap().encrypted);
        assert_eq!(device.connectivity.known().unwrap().usb_config, "mtp,adb");
        assert!(device.has_permission("android.permission.READ_SMS"));
        assert!(!device.has_permission("android.permission.WRITE_SMS"));

        let readiness = diagnostics.classify(&device);
        assert!(readiness.is_ready);
        assert_eq!(readiness.warnings, vec!["SELinux is enforcing".to_string()]);
    }

    #[test]
    fn test_failed_probe_is_unknown() {
        let transport = healthy_with_timeout_on("df /data");
        let link = link(transport);
        let config = DiagnosticsConfig::default();
        let device = DeviceDiagnostics::new(&link, &config, "com.android.shell").inspect();
        assert!(!device.storage.is_known());
        assert!(device.identity.is_known());
        assert!(device.security.is_known());
    }

    fn healthy_with_timeout_on(needle: &str) -> ScriptedTransport {
        // Rules match first-wins, so the timeout must precede the canned answers
        let scripted = ScriptedTransport::new().timeout_on(needle);
        scripted
            .on("shell getprop", CommandOutput::ok(PROPS))
            .on("adb_enabled", CommandOutput::ok("1\n"))
            .on("getenforce", CommandOutput::ok("Permissive\n"))
            .on("get-state", CommandOutput::ok("device\n"))
    }

    fn device_with(sdk: Option<u32>, usb: Option<bool>, free_mb: Option<u64>, state: &str) -> Device {
        Device {
            serial: None,
            identity: Probe::Known(Identity {
                sdk,
                ..Default::default()
            }),
            system: Probe::Unknown("skipped".to_string()),
            security: match usb {
                Some(usb_debugging) => Probe::Known(SecurityPosture {
                    usb_debugging,
                    developer_options: usb_debugging,
                    selinux: SelinuxMode::Permissive,
                    encrypted: false,
                    secure_boot: false,
                }),
                None => Probe::Unknown("timed out".to_string()),
            },
            storage: match free_mb {
                Some(free_mb) => Probe::Known(StorageInfo {
                    total_mb: free_mb * 2,
                    used_mb: free_mb,
                    free_mb,
                }),
                None => Probe::Unknown("skipped".to_string()),
            },
            connectivity: Probe::Known(Connectivity {
                state: state.to_string(),
                ..Default::default()
            }),
            permissions: Probe::Known(BTreeSet::new()),
        }
    }

    #[test]
    fn test_classify_blocking_issues() {
        let config = DiagnosticsConfig::default();
        let readiness = classify(&device_with(Some(19), Some(false), Some(5000), "device"), &config);
        assert!(!readiness.is_ready);
        assert_eq!(readiness.issues.len(), 2);
        assert_eq!(readiness.recommendations.len(), 2);

        let readiness = classify(&device_with(Some(30), Some(true), Some(5000), "unauthorized"), &config);
        assert!(!readiness.is_ready);
        assert_eq!(readiness.issues, vec!["Device unauthorized".to_string()]);
    }

    #[test]
    fn test_classify_warnings_do_not_block() {
        let config = DiagnosticsConfig::default();
        let readiness = classify(&device_with(Some(30), None, Some(500), "device"), &config);
        assert!(readiness.is_ready);
        assert_eq!(readiness.warnings.len(), 2);
        assert!(readiness.warnings[0].contains("unknown"));
        assert!(readiness.warnings[1].contains("Low storage"));
    }

    #[test]
    fn test_parse_df_variants() {
        let df = "Filesystem 1K-blocks Used Available Use% Mounted on\n\
                  /dev/block/by-name/userdata 2048000 1024000 1024000 50% /data\n";
        assert_eq!(parse_df(df).unwrap().free_mb, 1000);
        assert!(parse_df("df: /data: No such file or directory\n").is_none());
    }
}
