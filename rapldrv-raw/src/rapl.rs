//! RAPL (Running Average Power Limit) register definitions
//!
//! RAPL provides energy consumption monitoring and power limiting for
//! several power domains (package, cores, graphics, DRAM, platform).
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Section 15.10: Platform Specific Power Management Support

use crate::register::RegisterLayout;

/// MSR addresses for RAPL
pub mod msr {
    /// RAPL Power Unit MSR - Defines energy, power, and time units
    pub const MSR_RAPL_POWER_UNIT: u32 = 0x606;

    /// Package Power Limit - Configure package power limits
    pub const MSR_PKG_POWER_LIMIT: u32 = 0x610;

    /// Package Energy Status - Total package energy consumption
    pub const MSR_PKG_ENERGY_STATUS: u32 = 0x611;

    /// Package Power Info - Package TDP and limits
    pub const MSR_PKG_POWER_INFO: u32 = 0x614;

    /// DRAM Power Limit - Memory power limits
    pub const MSR_DRAM_POWER_LIMIT: u32 = 0x618;

    /// DRAM Energy Status - Memory controller energy consumption
    pub const MSR_DRAM_ENERGY_STATUS: u32 = 0x619;

    /// PP0 Power Limit - Core power limits
    pub const MSR_PP0_POWER_LIMIT: u32 = 0x638;

    /// PP0 Energy Status - Core energy consumption
    pub const MSR_PP0_ENERGY_STATUS: u32 = 0x639;

    /// PP1 Energy Status - Uncore (graphics) energy consumption
    pub const MSR_PP1_ENERGY_STATUS: u32 = 0x641;

    /// Platform Energy Status - Whole platform (PSys) energy consumption
    pub const MSR_PLATFORM_ENERGY_STATUS: u32 = 0x64D;
}

/// Every RAPL register with its conventional name, ordered by address
pub const RAPL_REGISTERS: &[(u32, &str)] = &[
    (msr::MSR_RAPL_POWER_UNIT, "MSR_RAPL_POWER_UNIT"),
    (msr::MSR_PKG_POWER_LIMIT, "MSR_PKG_POWER_LIMIT"),
    (msr::MSR_PKG_ENERGY_STATUS, "MSR_PKG_ENERGY_STATUS"),
    (msr::MSR_PKG_POWER_INFO, "MSR_PKG_POWER_INFO"),
    (msr::MSR_DRAM_POWER_LIMIT, "MSR_DRAM_POWER_LIMIT"),
    (msr::MSR_DRAM_ENERGY_STATUS, "MSR_DRAM_ENERGY_STATUS"),
    (msr::MSR_PP0_POWER_LIMIT, "MSR_PP0_POWER_LIMIT"),
    (msr::MSR_PP0_ENERGY_STATUS, "MSR_PP0_ENERGY_STATUS"),
    (msr::MSR_PP1_ENERGY_STATUS, "MSR_PP1_ENERGY_STATUS"),
    (msr::MSR_PLATFORM_ENERGY_STATUS, "MSR_PLATFORM_ENERGY_STATUS"),
];

/// Conventional name of a RAPL register
pub fn register_name(address: u32) -> Option<&'static str> {
    RAPL_REGISTERS
        .iter()
        .find(|(addr, _)| *addr == address)
        .map(|(_, name)| *name)
}

/// RAPL Power Unit Register layout
///
/// Defines the units for energy, power, and time measurements.
///
/// ## Register Format
///
/// | Bits   | Field        | Description                           |
/// |--------|--------------|---------------------------------------|
/// | 0-3    | power_units  | Power units (1/2^PU watts)            |
/// | 4-7    | reserved     |                                       |
/// | 8-12   | energy_units | Energy units (1/2^ESU joules)         |
/// | 13-15  | reserved     |                                       |
/// | 16-19  | time_units   | Time units (1/2^TU seconds)           |
/// | 20-63  | reserved     |                                       |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaplPowerUnit {
    /// Power units: watts = value * (1.0 / 2^power_units)
    pub power_units: u8,

    /// Energy units: joules = value * (1.0 / 2^energy_units)
    pub energy_units: u8,

    /// Time units: seconds = value * (1.0 / 2^time_units)
    pub time_units: u8,
}

impl RegisterLayout for RaplPowerUnit {
    const ADDRESS: u32 = msr::MSR_RAPL_POWER_UNIT;

    fn to_msr_value(&self) -> u64 {
        (self.power_units as u64 & 0x0F)
            | ((self.energy_units as u64 & 0x1F) << 8)
            | ((self.time_units as u64 & 0x0F) << 16)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            power_units: (value & 0x0F) as u8,
            energy_units: ((value >> 8) & 0x1F) as u8,
            time_units: ((value >> 16) & 0x0F) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.power_units > 15 {
            return Err("Power units must be <= 15 (4 bits)");
        }
        if self.energy_units > 31 {
            return Err("Energy units must be <= 31 (5 bits)");
        }
        if self.time_units > 15 {
            return Err("Time units must be <= 15 (4 bits)");
        }
        Ok(())
    }
}

impl RaplPowerUnit {
    /// Get power unit multiplier (watts per LSB)
    pub fn power_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.power_units) as f64
    }

    /// Get energy unit multiplier (joules per LSB)
    pub fn energy_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.energy_units) as f64
    }

    /// Get time unit multiplier (seconds per LSB)
    pub fn time_unit_multiplier(&self) -> f64 {
        1.0 / (1u64 << self.time_units) as f64
    }
}

/// Package Power Limit Register layout
///
/// ## Register Format
///
/// | Bits   | Field          | Description                        |
/// |--------|----------------|------------------------------------|
/// | 0-14   | power_limit_1  | Power limit 1 (power units)        |
/// | 15     | enable_1       | Enable power limit 1               |
/// | 16     | clamp_1        | Clamp to power limit 1             |
/// | 17-23  | time_window_1  | Time window 1                      |
/// | 32-46  | power_limit_2  | Power limit 2 (power units)        |
/// | 47     | enable_2       | Enable power limit 2               |
/// | 48     | clamp_2        | Clamp to power limit 2             |
/// | 49-55  | time_window_2  | Time window 2                      |
/// | 63     | lock           | Lock register                      |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaplPowerLimit {
    pub power_limit_1: u16,
    pub enable_1: bool,
    pub clamp_1: bool,
    pub time_window_1: u8,
    pub power_limit_2: u16,
    pub enable_2: bool,
    pub clamp_2: bool,
    pub time_window_2: u8,

    /// Lock register (prevents further writes until reset)
    pub lock: bool,
}

impl RegisterLayout for RaplPowerLimit {
    const ADDRESS: u32 = msr::MSR_PKG_POWER_LIMIT;

    fn to_msr_value(&self) -> u64 {
        (self.power_limit_1 as u64 & 0x7FFF)
            | (if self.enable_1 { 1 << 15 } else { 0 })
            | (if self.clamp_1 { 1 << 16 } else { 0 })
            | ((self.time_window_1 as u64 & 0x7F) << 17)
            | ((self.power_limit_2 as u64 & 0x7FFF) << 32)
            | (if self.enable_2 { 1 << 47 } else { 0 })
            | (if self.clamp_2 { 1 << 48 } else { 0 })
            | ((self.time_window_2 as u64 & 0x7F) << 49)
            | (if self.lock { 1 << 63 } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            power_limit_1: (value & 0x7FFF) as u16,
            enable_1: (value & (1 << 15)) != 0,
            clamp_1: (value & (1 << 16)) != 0,
            time_window_1: ((value >> 17) & 0x7F) as u8,
            power_limit_2: ((value >> 32) & 0x7FFF) as u16,
            enable_2: (value & (1 << 47)) != 0,
            clamp_2: (value & (1 << 48)) != 0,
            time_window_2: ((value >> 49) & 0x7F) as u8,
            lock: (value & (1 << 63)) != 0,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.power_limit_1 > 0x7FFF {
            return Err("Power limit 1 must be <= 0x7FFF (15 bits)");
        }
        if self.time_window_1 > 127 {
            return Err("Time window 1 must be <= 127 (7 bits)");
        }
        if self.power_limit_2 > 0x7FFF {
            return Err("Power limit 2 must be <= 0x7FFF (15 bits)");
        }
        if self.time_window_2 > 127 {
            return Err("Time window 2 must be <= 127 (7 bits)");
        }
        Ok(())
    }
}

impl RaplPowerLimit {
    /// Power limit 1 in watts
    pub fn limit_1_watts(&self, unit: &RaplPowerUnit) -> f64 {
        self.power_limit_1 as f64 * unit.power_unit_multiplier()
    }

    /// Power limit 2 in watts
    pub fn limit_2_watts(&self, unit: &RaplPowerUnit) -> f64 {
        self.power_limit_2 as f64 * unit.power_unit_multiplier()
    }
}

/// Energy status counter (package, PP0, PP1, DRAM or platform)
///
/// Bits 0-31 hold a free-running energy counter in energy units that wraps
/// around at 2^32. Bits 32-63 are reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyStatus {
    pub total_energy_consumed: u32,
}

impl RegisterLayout for EnergyStatus {
    const ADDRESS: u32 = msr::MSR_PKG_ENERGY_STATUS;

    fn to_msr_value(&self) -> u64 {
        self.total_energy_consumed as u64
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            total_energy_consumed: value as u32,
        }
    }
}

impl EnergyStatus {
    /// Counter ticks elapsed since `earlier`, accounting for one wraparound
    pub fn ticks_since(&self, earlier: &EnergyStatus) -> u32 {
        self.total_energy_consumed
            .wrapping_sub(earlier.total_energy_consumed)
    }

    /// Energy elapsed since `earlier`, in joules
    pub fn joules_since(&self, earlier: &EnergyStatus, unit: &RaplPowerUnit) -> f64 {
        self.ticks_since(earlier) as f64 * unit.energy_unit_multiplier()
    }

    /// Counter value in joules
    pub fn joules(&self, unit: &RaplPowerUnit) -> f64 {
        self.total_energy_consumed as f64 * unit.energy_unit_multiplier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::decode_as;

    #[test]
    fn test_rapl_power_unit_decode() {
        // Typical client part: 1/8 W, 1/16384 J (61 uJ), 1/1024 s
        let unit = RaplPowerUnit::from_msr_value(0x000A_0E03);

        assert_eq!(unit.power_units, 3);
        assert_eq!(unit.energy_units, 14);
        assert_eq!(unit.time_units, 10);
        assert_eq!(unit.to_msr_value(), 0x000A_0E03);
        assert!(unit.validate().is_ok());
    }

    #[test]
    fn test_rapl_power_unit_multipliers() {
        let unit = RaplPowerUnit {
            power_units: 3,
            energy_units: 14,
            time_units: 10,
        };

        assert_eq!(unit.power_unit_multiplier(), 1.0 / 8.0);
        assert_eq!(unit.energy_unit_multiplier(), 1.0 / 16384.0);
        assert_eq!(unit.time_unit_multiplier(), 1.0 / 1024.0);
    }

    #[test]
    fn test_rapl_power_limit_fields() {
        let limit = RaplPowerLimit {
            power_limit_1: 120,
            enable_1: true,
            clamp_1: true,
            time_window_1: 50,
            power_limit_2: 200,
            enable_2: true,
            clamp_2: false,
            time_window_2: 60,
            lock: true,
        };

        let value = limit.to_msr_value();
        assert_ne!(value & (1 << 63), 0);
        assert_eq!(RaplPowerLimit::from_msr_value(value), limit);

        let unit = RaplPowerUnit {
            power_units: 3,
            ..Default::default()
        };
        assert_eq!(limit.limit_1_watts(&unit), 15.0);
        assert_eq!(limit.limit_2_watts(&unit), 25.0);
    }

    #[test]
    fn test_energy_status_wraparound() {
        let before = EnergyStatus {
            total_energy_consumed: u32::MAX - 9,
        };
        let after = EnergyStatus::from_msr_value(0xFFFF_FFFF_0000_0005);

        assert_eq!(after.total_energy_consumed, 5);
        assert_eq!(after.ticks_since(&before), 15);

        let unit = RaplPowerUnit {
            energy_units: 0,
            ..Default::default()
        };
        assert_eq!(after.joules_since(&before, &unit), 15.0);
    }

    #[test]
    fn test_decode_as_checks_address() {
        assert!(decode_as::<RaplPowerUnit>(msr::MSR_RAPL_POWER_UNIT, 0xA0E03).is_some());
        assert!(decode_as::<RaplPowerUnit>(msr::MSR_PKG_POWER_LIMIT, 0xA0E03).is_none());
    }

    #[test]
    fn test_register_names() {
        assert_eq!(
            register_name(msr::MSR_PKG_ENERGY_STATUS),
            Some("MSR_PKG_ENERGY_STATUS")
        );
        assert_eq!(register_name(0x10), None);
        assert!(RAPL_REGISTERS.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
