//! Host DTB (Device Tree Blob) parsing
//!
//! Discovers the physical GIC (flavor, distributor and redistributor
//! bases), the console UART and the CPU count from the host DTB.
//!
//! The `fdt` crate does zero-copy parsing, no heap allocation needed.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::GicVersion;
use crate::platform::{GICD_BASE, GICR_BASE, MAX_SMP_CPUS, UART_BASE};

const GICV3_COMPATIBLE: &[&str] = &["arm,gic-v3"];
const GICV2_COMPATIBLE: &[&str] = &["arm,cortex-a15-gic", "arm,gic-400"];

/// Runtime-discovered platform information from host DTB.
///
/// Starts from QEMU virt defaults so everything works even if DTB
/// parsing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformInfo {
    /// UART (PL011) base address
    pub uart_base: u64,
    pub gic_version: GicVersion,
    /// GIC distributor base address
    pub gicd_base: u64,
    /// GIC redistributor base address (first frame), GICv3 only
    pub gicr_base: u64,
    /// GIC redistributor region size (total)
    pub gicr_size: u64,
    /// Number of CPUs discovered from /cpus node, capped at MAX_SMP_CPUS
    pub num_cpus: usize,
}

impl PlatformInfo {
    pub const fn qemu_virt() -> Self {
        Self {
            uart_base: UART_BASE as u64,
            gic_version: GicVersion::V3,
            gicd_base: GICD_BASE,
            gicr_base: GICR_BASE,
            gicr_size: 0,
            num_cpus: 4,
        }
    }
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self::qemu_virt()
    }
}

/// Parse a DTB held in memory. `None` if it is not a valid FDT.
pub fn parse(blob: &[u8]) -> Option<PlatformInfo> {
    let fdt = fdt::Fdt::new(blob).ok()?;
    Some(from_fdt(&fdt))
}

fn from_fdt(fdt: &fdt::Fdt) -> PlatformInfo {
    let mut info = PlatformInfo::qemu_virt();

    if let Some(reg) = fdt
        .find_compatible(&["arm,pl011"])
        .and_then(|n| n.reg())
        .and_then(|mut r| r.next())
    {
        info.uart_base = reg.starting_address as u64;
    }

    // GICv3: reg = <GICD_base GICD_size GICR_base GICR_size>
    // GICv2: reg = <GICD_base GICD_size GICC_base GICC_size ...>
    if let Some(gic) = fdt.find_compatible(GICV3_COMPATIBLE) {
        info.gic_version = GicVersion::V3;
        if let Some(mut regs) = gic.reg() {
            if let Some(gicd) = regs.next() {
                info.gicd_base = gicd.starting_address as u64;
            }
            if let Some(gicr) = regs.next() {
                info.gicr_base = gicr.starting_address as u64;
                info.gicr_size = gicr.size.unwrap_or(0) as u64;
            }
        }
    } else if let Some(gic) = fdt.find_compatible(GICV2_COMPATIBLE) {
        info.gic_version = GicVersion::V2;
        info.gicr_base = 0;
        if let Some(gicd) = gic.reg().and_then(|mut r| r.next()) {
            info.gicd_base = gicd.starting_address as u64;
        }
    }

    let cpu_count = fdt.cpus().count();
    if cpu_count > 0 {
        info.num_cpus = cpu_count.min(MAX_SMP_CPUS);
    }
    info
}

struct PlatformInfoCell {
    inner: UnsafeCell<PlatformInfo>,
    initialized: AtomicBool,
}

// Safety: Written once during single-threaded boot, read-only after.
unsafe impl Sync for PlatformInfoCell {}

static PLATFORM_INFO: PlatformInfoCell = PlatformInfoCell {
    inner: UnsafeCell::new(PlatformInfo::qemu_virt()),
    initialized: AtomicBool::new(false),
};

/// Initialize platform info from the host DTB at `dtb_addr`. Called once
/// on the boot CPU before secondaries start.
///
/// # Safety
/// `dtb_addr` must be null or point to readable memory holding an FDT.
pub unsafe fn init(dtb_addr: usize) {
    if dtb_addr == 0 {
        return;
    }
    // Safety: caller guarantees a readable FDT header at dtb_addr.
    let Ok(fdt) = (unsafe { fdt::Fdt::from_ptr(dtb_addr as *const u8) }) else {
        return;
    };
    let info = from_fdt(&fdt);
    unsafe { *PLATFORM_INFO.inner.get() = info };
    PLATFORM_INFO.initialized.store(true, Ordering::Release);
}

/// Returns true if DTB was successfully parsed.
pub fn is_initialized() -> bool {
    PLATFORM_INFO.initialized.load(Ordering::Acquire)
}

/// Get platform info. Always available; returns defaults if DTB parsing failed.
pub fn platform_info() -> &'static PlatformInfo {
    unsafe { &*PLATFORM_INFO.inner.get() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_not_a_dtb() {
        assert_eq!(parse(&[0u8; 64]), None);
        assert_eq!(parse(&[]), None);
    }

    #[test]
    fn defaults_until_initialized() {
        assert!(!is_initialized());
        assert_eq!(*platform_info(), PlatformInfo::qemu_virt());
        assert_eq!(platform_info().gic_version, GicVersion::V3);
    }
}
