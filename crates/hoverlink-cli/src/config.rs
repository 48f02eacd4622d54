//! Reads/writes `~/.hoverlink/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hoverlink_hal::udp::UdpConfig;
use hoverlink_middleware::RelayDirections;
use hoverlink_runtime::{CommunicationConfig, LinkPlan, PwmProfile, SchedulerConfig};
use hoverlink_types::PeerAddress;

/// Serial connection to the motor controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSection {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Second port mirrored onto `port` in `passthrough` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_port: Option<String>,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud: default_baud(),
            console_port: None,
        }
    }
}

/// UDP stand-in for the radio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpSection {
    #[serde(default = "default_udp_bind")]
    pub bind: String,
    #[serde(default = "default_udp_broadcast")]
    pub broadcast: String,
    /// This node's peer address, `aa:bb:cc:dd:ee:ff`.
    #[serde(default = "default_node_address")]
    pub address: String,
}

impl Default for UdpSection {
    fn default() -> Self {
        Self {
            bind: default_udp_bind(),
            broadcast: default_udp_broadcast(),
            address: default_node_address(),
        }
    }
}

/// Persisted configuration stored in `~/.hoverlink/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// `wired`, `wireless`, `relay` or `passthrough`.
    #[serde(default)]
    pub mode: LinkPlan,

    #[serde(default = "default_control_period_ms")]
    pub control_period_ms: u64,

    /// Upper bound on one peer scan.
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,

    /// Log a markup line for every frame crossing a transport.
    #[serde(default)]
    pub markup: bool,

    /// Publish and print periodic telemetry snapshots.
    #[serde(default)]
    pub telemetry: bool,

    /// Bench profile: wide PWM limits, enable re-sent periodically.
    #[serde(default)]
    pub test_run: bool,

    /// Replace the serial port with an in-process hoverboard double.
    #[serde(default)]
    pub sim: bool,

    #[serde(default)]
    pub serial: SerialSection,

    #[serde(default)]
    pub udp: UdpSection,
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud() -> u32 {
    115_200
}
fn default_udp_bind() -> String {
    "0.0.0.0:47800".to_string()
}
fn default_udp_broadcast() -> String {
    "255.255.255.255:47800".to_string()
}
fn default_node_address() -> String {
    "02:00:00:00:00:01".to_string()
}
fn default_control_period_ms() -> u64 {
    30
}
fn default_scan_window_ms() -> u64 {
    200
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: LinkPlan::default(),
            control_period_ms: default_control_period_ms(),
            scan_window_ms: default_scan_window_ms(),
            markup: false,
            telemetry: false,
            test_run: false,
            sim: false,
            serial: SerialSection::default(),
            udp: UdpSection::default(),
        }
    }
}

impl Config {
    /// What the runtime consumes.
    pub fn communication(&self) -> CommunicationConfig {
        CommunicationConfig {
            plan: self.mode,
            relay_directions: RelayDirections::BOTH,
            scheduler: SchedulerConfig {
                control_period: Duration::from_millis(self.control_period_ms.max(1)),
                publish_telemetry: self.telemetry,
            },
            scan_window: Duration::from_millis(self.scan_window_ms),
            profile: if self.test_run {
                PwmProfile::TestRun
            } else {
                PwmProfile::Standard
            },
            registry_capacity: 1,
        }
    }

    pub fn udp_config(&self) -> Result<UdpConfig, String> {
        let bind: SocketAddr = self
            .udp
            .bind
            .parse()
            .map_err(|e| format!("Invalid udp.bind '{}': {}", self.udp.bind, e))?;
        let broadcast: SocketAddr = self
            .udp
            .broadcast
            .parse()
            .map_err(|e| format!("Invalid udp.broadcast '{}': {}", self.udp.broadcast, e))?;
        let address: PeerAddress = self
            .udp
            .address
            .parse()
            .map_err(|e| format!("Invalid udp.address: {}", e))?;
        Ok(UdpConfig {
            bind,
            broadcast,
            address,
        })
    }
}

/// Return the path to `~/.hoverlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".hoverlink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
/// `HOVERLINK_*` overrides are applied on top of the file.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// `wired` / `wireless` / `relay` / `passthrough`.
pub fn parse_mode(value: &str) -> Option<LinkPlan> {
    match value.trim().to_ascii_lowercase().as_str() {
        "wired" => Some(LinkPlan::WiredOnly),
        "wireless" => Some(LinkPlan::WirelessOnly),
        "relay" => Some(LinkPlan::Relay),
        "passthrough" => Some(LinkPlan::Passthrough),
        _ => None,
    }
}

/// Apply `HOVERLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HOVERLINK_SERIAL_PORT` | `serial.port` |
/// | `HOVERLINK_BAUD` | `serial.baud` |
/// | `HOVERLINK_MODE` | `mode` |
/// | `HOVERLINK_CONTROL_PERIOD_MS` | `control_period_ms` |
/// | `HOVERLINK_UDP_BIND` | `udp.bind` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HOVERLINK_SERIAL_PORT") {
        cfg.serial.port = v;
    }
    if let Ok(v) = std::env::var("HOVERLINK_BAUD")
        && let Ok(baud) = v.parse::<u32>()
    {
        cfg.serial.baud = baud;
    }
    if let Ok(v) = std::env::var("HOVERLINK_MODE")
        && let Some(mode) = parse_mode(&v)
    {
        cfg.mode = mode;
    }
    if let Ok(v) = std::env::var("HOVERLINK_CONTROL_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
        && ms > 0
    {
        cfg.control_period_ms = ms;
    }
    if let Ok(v) = std::env::var("HOVERLINK_UDP_BIND") {
        cfg.udp.bind = v;
    }
}

/// Save the config to disk, creating `~/.hoverlink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_custom_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            mode: LinkPlan::Relay,
            markup: true,
            sim: true,
            serial: SerialSection {
                port: "/dev/ttyACM1".into(),
                baud: 57_600,
                console_port: Some("/dev/ttyUSB1".into()),
            },
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.mode, LinkPlan::Relay);
        assert!(loaded.markup);
        assert_eq!(loaded.serial.port, "/dev/ttyACM1");
        assert_eq!(loaded.serial.baud, 57_600);
        assert_eq!(loaded.serial.console_port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(loaded.control_period_ms, 30);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mode = \"wireless\"\n[udp]\nbind = \"127.0.0.1:0\"\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.mode, LinkPlan::WirelessOnly);
        assert_eq!(loaded.udp.bind, "127.0.0.1:0");
        assert_eq!(loaded.udp.broadcast, default_udp_broadcast());
        assert_eq!(loaded.serial, SerialSection::default());
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_hoverlink_dir() {
        let p = config_path_for_home("/home/rider");
        assert!(p.to_string_lossy().contains(".hoverlink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn communication_maps_flags() {
        let cfg = Config {
            control_period_ms: 50,
            test_run: true,
            telemetry: true,
            ..Config::default()
        };
        let comm = cfg.communication();
        assert_eq!(comm.scheduler.control_period, Duration::from_millis(50));
        assert!(comm.scheduler.publish_telemetry);
        assert_eq!(comm.profile, PwmProfile::TestRun);
        assert_eq!(comm.plan, LinkPlan::WiredOnly);
    }

    #[test]
    fn udp_config_rejects_bad_address() {
        let mut cfg = Config::default();
        assert!(cfg.udp_config().is_ok());
        cfg.udp.address = "not-a-mac".into();
        assert!(cfg.udp_config().is_err());
    }

    #[test]
    fn parse_mode_accepts_known_names() {
        assert_eq!(parse_mode("Relay"), Some(LinkPlan::Relay));
        assert_eq!(parse_mode(" wired "), Some(LinkPlan::WiredOnly));
        assert_eq!(parse_mode("passthrough"), Some(LinkPlan::Passthrough));
        assert_eq!(parse_mode("bluetooth"), None);
    }

    // Env-var tests share one test so they cannot race each other.
    #[test]
    fn apply_env_overrides_reads_hoverlink_vars() {
        // SAFETY: the only test in this crate touching HOVERLINK_* variables.
        unsafe {
            std::env::set_var("HOVERLINK_SERIAL_PORT", "/dev/ttyS3");
            std::env::set_var("HOVERLINK_BAUD", "not-a-number");
            std::env::set_var("HOVERLINK_MODE", "relay");
            std::env::set_var("HOVERLINK_CONTROL_PERIOD_MS", "0");
            std::env::set_var("HOVERLINK_UDP_BIND", "127.0.0.1:9");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.serial.port, "/dev/ttyS3");
        assert_eq!(cfg.serial.baud, default_baud());
        assert_eq!(cfg.mode, LinkPlan::Relay);
        assert_eq!(cfg.control_period_ms, 30);
        assert_eq!(cfg.udp.bind, "127.0.0.1:9");
        unsafe {
            for var in [
                "HOVERLINK_SERIAL_PORT",
                "HOVERLINK_BAUD",
                "HOVERLINK_MODE",
                "HOVERLINK_CONTROL_PERIOD_MS",
                "HOVERLINK_UDP_BIND",
            ] {
                std::env::remove_var(var);
            }
        }
    }
}
