// CPU vendor detection and MSR device checks

use once_cell::sync::Lazy;
use std::path::Path;

use rapldrv_raw::msr::msr_device_path;

#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// Family 6 models with RAPL MSRs, Sandy Bridge onwards
const RAPL_MODELS: &[u32] = &[
    0x2A, 0x2D, // Sandy Bridge, Sandy Bridge-EP
    0x3A, 0x3E, // Ivy Bridge, Ivy Bridge-EP
    0x3C, 0x3F, 0x45, 0x46, // Haswell
    0x3D, 0x47, 0x4F, 0x56, // Broadwell
    0x4E, 0x5E, 0x55, // Skylake, Skylake-SP
    0x8E, 0x9E, 0xA5, 0xA6, // Kaby Lake, Comet Lake
    0x66, 0x7D, 0x7E, 0x6A, 0x6C, // Cannon Lake, Ice Lake
    0x8C, 0x8D, 0xA7, // Tiger Lake, Rocket Lake
    0x97, 0x9A, 0xBE, 0xB7, 0xBA, 0xBF, // Alder Lake, Raptor Lake
    0x8F, 0xCF, 0xAD, 0xAE, 0xAF, // Sapphire/Emerald/Granite Rapids, Sierra Forest
    0xAA, 0xAC, 0xC5, 0xC6, 0xBD, // Meteor Lake, Arrow Lake, Lunar Lake
    0x37, 0x4C, 0x4D, 0x5C, 0x5F, 0x7A, // Silvermont, Airmont, Goldmont
    0x86, 0x96, 0x9C, // Tremont
    0x57, 0x85, // Xeon Phi
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuInfo {
    pub vendor: String,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
}

impl CpuInfo {
    pub fn is_intel(&self) -> bool {
        self.vendor == "GenuineIntel"
    }

    /// Westmere and Nehalem-EX (0x2C, 0x2E, 0x2F) sort after Sandy Bridge but lack RAPL
    pub fn has_rapl(&self) -> bool {
        self.is_intel() && self.family == 0x6 && RAPL_MODELS.contains(&self.model)
    }

    fn from_leaves(leaf0: (u32, u32, u32, u32), leaf1_eax: u32) -> Self {
        let (_max, ebx, ecx, edx) = leaf0;
        let mut vendor = Vec::with_capacity(12);
        vendor.extend_from_slice(&ebx.to_le_bytes());
        vendor.extend_from_slice(&edx.to_le_bytes());
        vendor.extend_from_slice(&ecx.to_le_bytes());
        let vendor = String::from_utf8_lossy(&vendor)
            .trim_end_matches('\0')
            .to_string();

        let eax = leaf1_eax;
        let stepping = eax & 0xF;
        let model = (eax >> 4) & 0xF;
        let family = (eax >> 8) & 0xF;
        let extended_model = (eax >> 16) & 0xF;
        let extended_family = (eax >> 20) & 0xFF;

        let display_family = if family == 0xF {
            family + extended_family
        } else {
            family
        };

        let display_model = if family == 0x6 || family == 0xF {
            (extended_model << 4) + model
        } else {
            model
        };

        Self {
            vendor,
            family: display_family,
            model: display_model,
            stepping,
        }
    }
}

pub static CPU_INFO: Lazy<CpuInfo> = Lazy::new(|| {
    let leaf0 = cpuid(0, 0);
    let (leaf1_eax, _, _, _) = cpuid(1, 0);
    CpuInfo::from_leaves(leaf0, leaf1_eax)
});

/// Problems found while probing the MSR device of a CPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsrDeviceIssue {
    /// The `msr` kernel module is not loaded (or the CPU does not exist)
    Missing(String),
    /// The device exists but this process may not open it
    PermissionDenied(String),
}

impl std::fmt::Display for MsrDeviceIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsrDeviceIssue::Missing(path) => write!(
                f,
                "Cannot access {path}: the MSR kernel module may not be loaded (run: sudo modprobe msr)"
            ),
            MsrDeviceIssue::PermissionDenied(path) => write!(
                f,
                "Permission denied accessing {path}: run as root or grant CAP_SYS_RAWIO"
            ),
        }
    }
}

/// Check that the MSR device of `cpu` exists and can be opened
pub fn check_msr_device(cpu: u32) -> std::result::Result<(), MsrDeviceIssue> {
    let msr_path = msr_device_path(cpu);
    if !Path::new(&msr_path).exists() {
        return Err(MsrDeviceIssue::Missing(msr_path));
    }

    if let Err(e) = std::fs::File::open(&msr_path) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            return Err(MsrDeviceIssue::PermissionDenied(msr_path));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_intel_leaves() {
        // "GenuineIntel" split across EBX, EDX, ECX; Skylake-SP signature 0x50654
        let leaf0 = (0x16, 0x756E_6547, 0x6C65_746E, 0x4965_6E69);
        let info = CpuInfo::from_leaves(leaf0, 0x0005_0654);

        assert_eq!(info.vendor, "GenuineIntel");
        assert_eq!(info.family, 0x6);
        assert_eq!(info.model, 0x55);
        assert_eq!(info.stepping, 4);
        assert!(info.has_rapl());
    }

    #[test]
    fn test_rapl_model_list() {
        let leaf0 = (0x16, 0x756E_6547, 0x6C65_746E, 0x4965_6E69);

        // Sandy Bridge 0x206A7
        assert!(CpuInfo::from_leaves(leaf0, 0x0002_06A7).has_rapl());
        // Westmere-EP 0x206C2, Nehalem-EX 0x206E6, Westmere-EX 0x206F2
        for signature in [0x0002_06C2, 0x0002_06E6, 0x0002_06F2] {
            let info = CpuInfo::from_leaves(leaf0, signature);
            assert!(info.model > 0x2A);
            assert!(!info.has_rapl(), "model 0x{:X}", info.model);
        }
    }

    #[test]
    fn test_non_intel_has_no_rapl() {
        // "AuthenticAMD", Zen 2 signature 0x830F10
        let leaf0 = (0x10, 0x6874_7541, 0x444D_4163, 0x6974_6E65);
        let info = CpuInfo::from_leaves(leaf0, 0x0083_0F10);

        assert_eq!(info.vendor, "AuthenticAMD");
        assert_eq!(info.family, 0x17);
        assert!(!info.has_rapl());
    }

    #[test]
    fn test_missing_device() {
        assert!(matches!(
            check_msr_device(u32::MAX),
            Err(MsrDeviceIssue::Missing(_))
        ));
    }
}
