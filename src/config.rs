//! Configuration for the mmwave-io daemon
//!
//! Two configuration sources exist side by side: the daemon's own TOML
//! settings file ([`AppConfig`]) and the TI-style `.cfg` command script
//! ([`RadarConfig`]) that is replayed verbatim over the sensor's CLI
//! port and mined for the handful of parameters the data path needs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Number of LVDS lanes on the DCA1000 capture path
pub const LVDS_LANES: usize = 4;

// =============================================================================
// Daemon settings (TOML)
// =============================================================================

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub hardware: HardwareConfig,
    pub radar: RadarSettings,
    pub streamer: StreamerSettings,
    pub dca1000: Dca1000Settings,
    pub performance: RadarPerformance,
    pub listeners: ListenersConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

/// Hardware configuration (serial ports)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardwareConfig {
    /// Sensor CLI (command) serial port
    pub cli_port: String,
    /// Sensor data serial port (serial streaming only)
    pub data_port: String,
}

/// Radar firmware settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadarSettings {
    /// Path to the `.cfg` command script replayed over the CLI port
    pub config_path: String,
    /// Demo firmware SDK version ("2.1" or "3.5"); selects the frame
    /// header layout and the detected-points wire format
    pub sdk_version: String,
}

/// Frame source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSource {
    /// Demo firmware frames over the sensor's data serial port
    Serial,
    /// Raw ADC capture over Ethernet via the DCA1000
    Ethernet,
}

/// Streamer settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamerSettings {
    pub source: FrameSource,
    /// Log per-frame statistics
    pub verbose: bool,
}

/// DCA1000 capture card addressing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dca1000Settings {
    /// FPGA address (factory default 192.168.33.180)
    pub fpga_ip: String,
    /// Local address on the capture network (factory default 192.168.33.30)
    pub system_ip: String,
    /// Command/response UDP port
    pub cmd_port: u16,
    /// Raw data UDP port
    pub data_port: u16,
}

/// Derived radar performance constants
///
/// Computed offline from the `.cfg` script; the daemon only consumes
/// them (scaling decoded point clouds, sizing FFT products).
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RadarPerformance {
    /// Meters per range index
    pub range_idx_to_m: f64,
    /// Maximum unambiguous range in meters
    pub range_max_m: f64,
    /// Meters-per-second per doppler index
    pub vel_idx_to_m_per_s: f64,
    /// Maximum unambiguous velocity in meters per second
    pub vel_max_m_per_s: f64,
    /// Range FFT size
    pub num_range_bins: u32,
    /// Doppler FFT size
    pub num_doppler_bins: u32,
}

/// One external product listener
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerEndpoint {
    pub enabled: bool,
    pub port: u16,
}

/// External TCP listener configuration, one endpoint per product
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenersConfig {
    /// Master switch; when false no processor accepts connections
    pub enabled: bool,
    /// Shared secret exchanged before any product data is sent
    pub authkey: String,
    pub point_cloud: ListenerEndpoint,
    pub adc_cube: ListenerEndpoint,
    pub range_azimuth: ListenerEndpoint,
    pub range_doppler: ListenerEndpoint,
}

/// Runtime behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Fixed run duration in seconds; 0 means run until interrupted
    pub duration_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout, stderr, or file path)
    pub output: String,
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Default configuration for an IWR1443 + DCA1000 bench setup
    ///
    /// Suitable for testing and development. Production deployments
    /// should use a proper TOML configuration file.
    pub fn iwr1443_defaults() -> Self {
        Self {
            hardware: HardwareConfig {
                cli_port: "/dev/ttyACM0".to_string(),
                data_port: "/dev/ttyACM1".to_string(),
            },
            radar: RadarSettings {
                config_path: "configs/iwr_demo.cfg".to_string(),
                sdk_version: "2.1".to_string(),
            },
            streamer: StreamerSettings {
                source: FrameSource::Serial,
                verbose: false,
            },
            dca1000: Dca1000Settings {
                fpga_ip: "192.168.33.180".to_string(),
                system_ip: "192.168.33.30".to_string(),
                cmd_port: 4096,
                data_port: 4098,
            },
            performance: RadarPerformance {
                range_idx_to_m: 0.0443,
                range_max_m: 11.33,
                vel_idx_to_m_per_s: 0.1257,
                vel_max_m_per_s: 2.01,
                num_range_bins: 256,
                num_doppler_bins: 32,
            },
            listeners: ListenersConfig {
                enabled: false,
                authkey: "DCA1000_client".to_string(),
                point_cloud: ListenerEndpoint {
                    enabled: true,
                    port: 6000,
                },
                adc_cube: ListenerEndpoint {
                    enabled: true,
                    port: 6001,
                },
                range_azimuth: ListenerEndpoint {
                    enabled: false,
                    port: 6002,
                },
                range_doppler: ListenerEndpoint {
                    enabled: false,
                    port: 6003,
                },
            },
            runtime: RuntimeConfig { duration_secs: 20 },
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::iwr1443_defaults()
    }
}

// =============================================================================
// Radar .cfg command script
// =============================================================================

/// One command line of the `.cfg` script with named parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigBlock {
    pub name: String,
    pub params: Vec<(String, String)>,
}

impl ConfigBlock {
    /// Look up a parameter value by name
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parsed radar `.cfg` script: an ordered mapping from command name to
/// named parameters, preserving file order and duplicate commands
/// (chirpCfg legitimately repeats)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadarConfig {
    blocks: Vec<ConfigBlock>,
}

/// Parameter names for the `.cfg` commands the data path reads.
/// Everything else keeps positional `argN` names so ordering survives.
fn param_names(command: &str) -> Option<&'static [&'static str]> {
    match command {
        "profileCfg" => Some(&[
            "profileId",
            "startFreq",
            "idleTime",
            "adcStartTime",
            "rampEndTime",
            "txOutPower",
            "txPhaseShifter",
            "freqSlopeConst",
            "txStartTime",
            "numAdcSamples",
            "digOutSampleRate",
            "hpfCornerFreq1",
            "hpfCornerFreq2",
            "rxGain",
        ]),
        "frameCfg" => Some(&[
            "chirpStartIndex",
            "chirpEndIndex",
            "numLoops",
            "numFrames",
            "framePeriodicity",
            "triggerSelect",
            "frameTriggerDelay",
        ]),
        "channelCfg" => Some(&["rxChannelEn", "txChannelEn", "cascading"]),
        "chirpCfg" => Some(&[
            "startIndex",
            "endIndex",
            "profile",
            "startFreqVariation",
            "freqSlopeVariation",
            "idleTimeVariation",
            "adcStartTimeVariation",
            "txEnable",
        ]),
        _ => None,
    }
}

impl RadarConfig {
    /// Load and parse a `.cfg` command script
    pub fn from_cfg_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_cfg_str(&contents)
    }

    /// Parse `.cfg` text: one command per line, `%` comments, blank
    /// lines ignored
    pub fn from_cfg_str(text: &str) -> Result<Self> {
        let mut blocks = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let name = match parts.next() {
                Some(n) => n.to_string(),
                None => continue,
            };
            let names = param_names(&name);
            let params = parts
                .enumerate()
                .map(|(i, value)| {
                    let key = names
                        .and_then(|n| n.get(i).copied())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("arg{}", i));
                    (key, value.to_string())
                })
                .collect();
            blocks.push(ConfigBlock { name, params });
        }
        Ok(RadarConfig { blocks })
    }

    /// All blocks in file order
    pub fn blocks(&self) -> &[ConfigBlock] {
        &self.blocks
    }

    /// First block with the given command name
    pub fn get(&self, command: &str) -> Option<&ConfigBlock> {
        self.blocks.iter().find(|b| b.name == command)
    }

    fn required_param(&self, command: &str, key: &str) -> Result<&str> {
        self.get(command)
            .and_then(|b| b.param(key))
            .ok_or_else(|| Error::InvalidParameter(format!("{} {} missing", command, key)))
    }

    fn param_u32(&self, command: &str, key: &str) -> Result<u32> {
        let raw = self.required_param(command, key)?;
        raw.parse::<u32>().map_err(|_| {
            Error::InvalidParameter(format!("{} {}: not an integer: {}", command, key, raw))
        })
    }

    /// ADC samples per chirp (profileCfg)
    pub fn adc_samples(&self) -> Result<u32> {
        self.param_u32("profileCfg", "numAdcSamples")
    }

    /// Chirps per frame: configured chirp range times the loop count
    /// (frameCfg)
    pub fn chirps_per_frame(&self) -> Result<u32> {
        let start = self.param_u32("frameCfg", "chirpStartIndex")?;
        let end = self.param_u32("frameCfg", "chirpEndIndex")?;
        if end < start {
            return Err(Error::InvalidParameter(format!(
                "frameCfg chirp range inverted: {}..{}",
                start, end
            )));
        }
        let loops = self.param_u32("frameCfg", "numLoops")?;
        Ok((end - start + 1) * loops)
    }

    /// Raw capture size of one frame in bytes: complex int16 samples
    /// across all LVDS lanes
    pub fn bytes_per_frame(&self) -> Result<usize> {
        let samples = self.adc_samples()? as usize;
        let chirps = self.chirps_per_frame()? as usize;
        // 2 bytes per int16, 2 int16 per complex sample
        Ok(samples * chirps * LVDS_LANES * 2 * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: &str = "\
% Demo configuration
sensorStop
flushCfg
dfeDataOutputMode 1
channelCfg 15 7 0
profileCfg 0 77 7 3 24 0 0 98 1 64 9142 0 0 30
chirpCfg 0 0 0 0 0 0 0 1
chirpCfg 1 1 0 0 0 0 0 4

frameCfg 0 1 32 0 100 1 0
sensorStart
";

    #[test]
    fn test_default_config() {
        let config = AppConfig::iwr1443_defaults();
        assert_eq!(config.hardware.cli_port, "/dev/ttyACM0");
        assert_eq!(config.hardware.data_port, "/dev/ttyACM1");
        assert_eq!(config.streamer.source, FrameSource::Serial);
        assert_eq!(config.dca1000.cmd_port, 4096);
        assert_eq!(config.dca1000.data_port, 4098);
        assert!(!config.listeners.enabled);
        assert_eq!(config.runtime.duration_secs, 20);
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::iwr1443_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        // Should contain all sections
        assert!(toml_string.contains("[hardware]"));
        assert!(toml_string.contains("[radar]"));
        assert!(toml_string.contains("[streamer]"));
        assert!(toml_string.contains("[dca1000]"));
        assert!(toml_string.contains("[performance]"));
        assert!(toml_string.contains("[listeners.point_cloud]"));
        assert!(toml_string.contains("[logging]"));

        // Should contain key values
        assert!(toml_string.contains("cli_port = \"/dev/ttyACM0\""));
        assert!(toml_string.contains("fpga_ip = \"192.168.33.180\""));
        assert!(toml_string.contains("source = \"serial\""));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::iwr1443_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(parsed.hardware.cli_port, config.hardware.cli_port);
        assert_eq!(parsed.streamer.source, config.streamer.source);
        assert_eq!(parsed.listeners.authkey, config.listeners.authkey);
        assert_eq!(
            parsed.performance.num_doppler_bins,
            config.performance.num_doppler_bins
        );
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[hardware]
cli_port = "/dev/ttyUSB0"
data_port = "/dev/ttyUSB1"

[radar]
config_path = "radar.cfg"
sdk_version = "3.5"

[streamer]
source = "ethernet"
verbose = true

[dca1000]
fpga_ip = "192.168.33.180"
system_ip = "192.168.33.30"
cmd_port = 4096
data_port = 4098

[performance]
range_idx_to_m = 0.05
range_max_m = 12.8
vel_idx_to_m_per_s = 0.13
vel_max_m_per_s = 2.1
num_range_bins = 128
num_doppler_bins = 16

[listeners]
enabled = true
authkey = "secret"

[listeners.point_cloud]
enabled = true
port = 7000

[listeners.adc_cube]
enabled = false
port = 7001

[listeners.range_azimuth]
enabled = false
port = 7002

[listeners.range_doppler]
enabled = false
port = 7003

[runtime]
duration_secs = 0

[logging]
level = "debug"
output = "stdout"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.hardware.cli_port, "/dev/ttyUSB0");
        assert_eq!(config.streamer.source, FrameSource::Ethernet);
        assert_eq!(config.radar.sdk_version, "3.5");
        assert!(config.listeners.enabled);
        assert_eq!(config.listeners.point_cloud.port, 7000);
        assert_eq!(config.runtime.duration_secs, 0);
    }

    #[test]
    fn test_cfg_parse_order_and_comments() {
        let config = RadarConfig::from_cfg_str(CFG).unwrap();
        let names: Vec<&str> = config.blocks().iter().map(|b| b.name.as_str()).collect();
        // Comment and blank lines dropped, order preserved, duplicates kept
        assert_eq!(
            names,
            vec![
                "sensorStop",
                "flushCfg",
                "dfeDataOutputMode",
                "channelCfg",
                "profileCfg",
                "chirpCfg",
                "chirpCfg",
                "frameCfg",
                "sensorStart"
            ]
        );
    }

    #[test]
    fn test_cfg_named_params() {
        let config = RadarConfig::from_cfg_str(CFG).unwrap();
        let profile = config.get("profileCfg").unwrap();
        assert_eq!(profile.param("numAdcSamples"), Some("64"));
        assert_eq!(profile.param("rxGain"), Some("30"));
        let frame = config.get("frameCfg").unwrap();
        assert_eq!(frame.param("numLoops"), Some("32"));
        // Unknown commands fall back to positional names
        let dfe = config.get("dfeDataOutputMode").unwrap();
        assert_eq!(dfe.param("arg0"), Some("1"));
    }

    #[test]
    fn test_bytes_per_frame() {
        let config = RadarConfig::from_cfg_str(CFG).unwrap();
        // chirps 0..1 x 32 loops = 64 chirps, 64 samples, 4 lanes, 4 B
        assert_eq!(config.chirps_per_frame().unwrap(), 64);
        assert_eq!(config.bytes_per_frame().unwrap(), 64 * 64 * 4 * 4);
    }

    #[test]
    fn test_bytes_per_frame_requires_blocks() {
        let config = RadarConfig::from_cfg_str("sensorStop\n").unwrap();
        assert!(config.bytes_per_frame().is_err());
    }
}
