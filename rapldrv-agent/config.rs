use std::cmp::Ordering;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use rapldrv_raw::rapl::RAPL_REGISTERS;

use crate::error::{RaplDrvError, Result};

/// Well-known address the service is reachable under
pub const DEFAULT_DEVICE_PATH: &str = "/run/rapldrv.sock";

/// Logical name the device is registered with
pub const DEVICE_NAME: &str = "RAPLDriver";

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Socket path callers open before issuing requests
    pub device_path: PathBuf,
    /// Logical CPU whose MSRs are read
    pub cpu: u32,
    /// Registers reachable through the real access path; `None` forwards every register
    pub allow_list: Option<RegisterSet>,
    /// Route out-direct control codes through the function-code table
    pub direct_io: bool,
    /// Debug only: after a direct read, overwrite the register with the current timestamp
    pub write_back: bool,
    /// Serve from the in-memory register file instead of `/dev/cpu/*/msr`
    pub simulate: bool,
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            cpu: 0,
            allow_list: None,
            direct_io: false,
            write_back: false,
            simulate: false,
            metrics_addr: None,
        }
    }
}

impl DriverConfig {
    pub fn new(device_path: impl Into<PathBuf>, cpu: u32) -> Self {
        Self {
            device_path: device_path.into(),
            cpu,
            ..Default::default()
        }
    }

    /// Reject combinations that cannot be honoured
    pub fn validate(&self) -> Result<()> {
        if self.write_back && !self.direct_io {
            return Err(RaplDrvError::ConfigError(
                "write-back requires the direct I/O protocol to be enabled".to_string(),
            ));
        }

        if let Some(allow) = &self.allow_list {
            if allow.is_empty() {
                return Err(RaplDrvError::ConfigError(
                    "allow-list is empty; omit it to forward every register".to_string(),
                ));
            }
        }

        if !self.simulate {
            let online = Self::detect_online_cpus();
            if !online.contains(&self.cpu) {
                tracing::warn!("CPU {} is not listed as online ({:?})", self.cpu, online);
            }
        }

        Ok(())
    }

    /// Detect online CPUs from /sys/devices/system/cpu/online
    pub fn detect_online_cpus() -> Vec<u32> {
        std::fs::read_to_string("/sys/devices/system/cpu/online")
            .ok()
            .and_then(|s| Self::parse_cpu_list(&s))
            .unwrap_or_else(|| {
                tracing::warn!("Failed to detect online CPUs, assuming CPU 0 only");
                vec![0]
            })
    }

    /// Parse CPU list like "0-3,8-11" into Vec<u32>
    fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
        let mut cpus = Vec::new();
        for part in s.trim().split(',') {
            if let Some((start, end)) = part.split_once('-') {
                let start: u32 = start.parse().ok()?;
                let end: u32 = end.parse().ok()?;
                cpus.extend(start..=end);
            } else {
                cpus.push(part.parse().ok()?);
            }
        }
        Some(cpus)
    }
}

/// A set of register numbers kept as sorted, disjoint inclusive ranges
///
/// Membership is a binary search over the ranges, so a list spanning the
/// whole 32-bit register space costs one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterSet {
    ranges: Vec<RangeInclusive<u32>>,
}

impl RegisterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, register: u32) {
        self.insert_range(register..=register);
    }

    /// Add `range`, merging it with overlapping or adjacent ranges
    pub fn insert_range(&mut self, range: RangeInclusive<u32>) {
        if range.is_empty() {
            return;
        }
        self.ranges.push(range);
        self.ranges.sort_by_key(|r| *r.start());

        let mut merged: Vec<RangeInclusive<u32>> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if *range.start() <= last.end().saturating_add(1) => {
                    if range.end() > last.end() {
                        *last = *last.start()..=*range.end();
                    }
                }
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }

    pub fn contains(&self, register: u32) -> bool {
        self.ranges
            .binary_search_by(|r| {
                if *r.end() < register {
                    Ordering::Less
                } else if *r.start() > register {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            })
            .is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of registers in the set
    pub fn len(&self) -> u64 {
        self.ranges
            .iter()
            .map(|r| u64::from(*r.end()) - u64::from(*r.start()) + 1)
            .sum()
    }

    pub fn ranges(&self) -> &[RangeInclusive<u32>] {
        &self.ranges
    }
}

impl FromIterator<u32> for RegisterSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = RegisterSet::new();
        for register in iter {
            set.insert(register);
        }
        set
    }
}

/// Parse a list of register specs like ["0x606", "0x610-0x611", "rapl"]
///
/// Supports:
/// - Single registers, decimal or `0x` hex: "1553", "0x611"
/// - Inclusive ranges: "0x610-0x614"
/// - Comma-separated lists: "0x606,0x611"
/// - The keyword `rapl` for every register in the RAPL catalogue
///
/// Unlike CPU lists, a malformed entry is an error: silently dropping
/// an entry would widen or narrow the privileged register set unnoticed.
pub fn parse_register_list(inputs: &[String]) -> Result<RegisterSet> {
    let mut result = RegisterSet::new();

    for input in inputs {
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if part.eq_ignore_ascii_case("rapl") {
                for (addr, _) in RAPL_REGISTERS.iter() {
                    result.insert(*addr);
                }
                continue;
            }

            if let Some((start_str, end_str)) = part.split_once('-') {
                let start = parse_register(start_str)?;
                let end = parse_register(end_str)?;
                if start > end {
                    return Err(RaplDrvError::ParseError(format!(
                        "register range {part} is reversed"
                    )));
                }
                result.insert_range(start..=end);
            } else {
                result.insert(parse_register(part)?);
            }
        }
    }

    Ok(result)
}

/// Parse one register number, decimal or `0x`-prefixed hex
pub fn parse_register(s: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };

    parsed.map_err(|e| RaplDrvError::ParseError(format!("invalid register number '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register() {
        assert_eq!(parse_register("0x611").unwrap(), 0x611);
        assert_eq!(parse_register("0X606").unwrap(), 0x606);
        assert_eq!(parse_register(" 1553 ").unwrap(), 1553);
        assert!(parse_register("0xZZ").is_err());
        assert!(parse_register("").is_err());
    }

    #[test]
    fn test_parse_register_list() {
        let regs =
            parse_register_list(&["0x606,0x610-0x611".to_string(), "0x639".to_string()]).unwrap();
        assert_eq!(regs.ranges(), &[0x606..=0x606, 0x610..=0x611, 0x639..=0x639]);
        assert_eq!(regs.len(), 4);
        assert!(regs.contains(0x610));
        assert!(!regs.contains(0x607));
    }

    #[test]
    fn test_parse_full_width_register_range() {
        let start = std::time::Instant::now();
        let regs = parse_register_list(&["0-0xFFFFFFFF".to_string()]).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(1));

        assert_eq!(regs.ranges().len(), 1);
        assert_eq!(regs.len(), 1u64 << 32);
        for register in [0, 1, 0x611, 0xC000_0080, u32::MAX] {
            assert!(regs.contains(register));
        }
    }

    #[test]
    fn test_register_set_merges_ranges() {
        let mut regs = RegisterSet::new();
        regs.insert_range(0x610..=0x614);
        regs.insert_range(0x600..=0x605);
        regs.insert(0x606);
        regs.insert_range(0x612..=0x619);
        regs.insert_range(0x700..=u32::MAX);
        regs.insert(u32::MAX);

        assert_eq!(
            regs.ranges(),
            &[0x600..=0x606, 0x610..=0x619, 0x700..=u32::MAX]
        );
        assert!(regs.contains(0x603));
        assert!(!regs.contains(0x607));
        assert!(!regs.contains(0x60F));
        assert!(regs.contains(0x619));
        assert!(!regs.contains(0x6FF));
        assert!(regs.contains(0x8000_0000));
        assert!(!RegisterSet::new().contains(0));
    }

    #[test]
    fn test_parse_register_list_rapl_keyword() {
        let regs = parse_register_list(&["rapl".to_string()]).unwrap();
        assert_eq!(regs.len(), RAPL_REGISTERS.len() as u64);
        assert!(regs.contains(0x611));
    }

    #[test]
    fn test_parse_register_list_rejects_garbage() {
        assert!(parse_register_list(&["0x606,oops".to_string()]).is_err());
        assert!(parse_register_list(&["0x611-0x606".to_string()]).is_err());
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(
            DriverConfig::parse_cpu_list("0-3,8\n"),
            Some(vec![0, 1, 2, 3, 8])
        );
        assert_eq!(DriverConfig::parse_cpu_list("x"), None);
    }

    #[test]
    fn test_validate() {
        let mut config = DriverConfig {
            simulate: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.write_back = true;
        assert!(config.validate().is_err());

        config.direct_io = true;
        assert!(config.validate().is_ok());

        config.allow_list = Some(RegisterSet::new());
        assert!(config.validate().is_err());
    }
}
