use rapldrv_raw::rapl::msr;

use crate::function_table;

function_table! {
    /// Function codes of the direct-I/O protocol variant
    ///
    /// In this variant the register is chosen by the control code's function
    /// selector; the input buffer is ignored.
    pub enum DirectFunction {
        PowerUnit => ("PowerUnit", 0xBEB, msr::MSR_RAPL_POWER_UNIT),
        PackagePowerLimit => ("PackagePowerLimit", 0xBEC, msr::MSR_PKG_POWER_LIMIT),
        PackageEnergyStatus => ("PackageEnergyStatus", 0xBED, msr::MSR_PKG_ENERGY_STATUS),
    }
}

/// Settings of the direct-I/O variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectIo {
    /// After each read, overwrite the register with the current timestamp.
    /// Mutates hardware state on a read path; debugging aid only.
    pub write_back: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_lookup() {
        assert_eq!(
            DirectFunction::from_function(0xBEB),
            Some(DirectFunction::PowerUnit)
        );
        assert_eq!(
            DirectFunction::from_function(0xBED).map(|f| f.register()),
            Some(msr::MSR_PKG_ENERGY_STATUS)
        );
        assert_eq!(DirectFunction::from_function(0xBEE), None);
        assert_eq!(DirectFunction::from_function(0), None);
    }
}
