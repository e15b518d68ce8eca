/// ARM Generic Interrupt Controller v3 backends
///
/// - `GicV3VirtualInterface`: ICH_*_EL2 system registers of this core
/// - `GicV3Distributor`: the physical GICD, for passthrough interrupts
///
/// Both assume EL2 with the GICv3 system register interface enabled.

use core::arch::asm;

use crate::arch::ich::{IchHcr, IchMisr};
use crate::arch::traits::{PhysRoute, PhysicalGic, VirtualInterface};
use crate::sync::SpinLock;

macro_rules! read_sysreg {
    ($name:literal) => {{
        let v: u64;
        unsafe {
            asm!(concat!("mrs {v}, ", $name), v = out(reg) v, options(nostack, nomem));
        }
        v
    }};
}

macro_rules! write_sysreg {
    ($name:literal, $val:expr) => {{
        let v: u64 = $val;
        unsafe {
            asm!(concat!("msr ", $name, ", {v}"), v = in(reg) v, options(nostack, nomem));
        }
    }};
}

macro_rules! lr_read {
    ($n:expr; $($i:literal),*) => {
        match $n {
            $($i => {
                let v: u64;
                unsafe {
                    asm!(concat!("mrs {v}, ICH_LR", $i, "_EL2"), v = out(reg) v, options(nostack, nomem));
                }
                v
            })*
            _ => 0,
        }
    };
}

macro_rules! lr_write {
    ($n:expr, $val:expr; $($i:literal),*) => {{
        let v: u64 = $val;
        match $n {
            $($i => unsafe {
                asm!(concat!("msr ICH_LR", $i, "_EL2, {v}"), v = in(reg) v, options(nostack, nomem));
            })*
            _ => {}
        }
    }};
}

/// GICv3 Virtual Interface (ICH_*_EL2 of the calling core)
pub struct GicV3VirtualInterface;

impl GicV3VirtualInterface {
    /// Read ICH_VTR_EL2 - VGIC Type Register
    #[inline]
    pub fn read_vtr() -> u32 {
        read_sysreg!("ICH_VTR_EL2") as u32
    }

    /// Clear all list registers and leave the interface disabled.
    pub fn reset(&self) {
        for i in 0..self.num_lrs() {
            self.write_lr(i, 0);
        }
        self.set_hcr(IchHcr::empty());
        unsafe { asm!("isb", options(nostack, nomem)) };
    }
}

impl VirtualInterface for GicV3VirtualInterface {
    fn num_lrs(&self) -> usize {
        // Bits [4:0] = ListRegs - 1
        ((Self::read_vtr() & 0x1F) + 1) as usize
    }

    fn read_lr(&self, n: usize) -> u64 {
        lr_read!(n; 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15)
    }

    fn write_lr(&self, n: usize, value: u64) {
        lr_write!(n, value; 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15);
        unsafe { asm!("isb", options(nostack, nomem)) };
    }

    fn elrsr(&self) -> u64 {
        read_sysreg!("ICH_ELRSR_EL2")
    }

    fn eisr(&self) -> u64 {
        read_sysreg!("ICH_EISR_EL2")
    }

    fn misr(&self) -> IchMisr {
        IchMisr::from_bits_retain(read_sysreg!("ICH_MISR_EL2") as u32)
    }

    fn hcr(&self) -> IchHcr {
        IchHcr::from_bits_retain(read_sysreg!("ICH_HCR_EL2") as u32)
    }

    fn set_hcr(&self, hcr: IchHcr) {
        write_sysreg!("ICH_HCR_EL2", hcr.bits() as u64);
        unsafe { asm!("isb", options(nostack, nomem)) };
    }
}

// Physical GICD register offsets
const GICD_ISENABLER: usize = 0x100;
const GICD_ICENABLER: usize = 0x180;
const GICD_ISPENDR: usize = 0x200;
const GICD_ICPENDR: usize = 0x280;
const GICD_ISACTIVER: usize = 0x300;
const GICD_ICACTIVER: usize = 0x380;
const GICD_IPRIORITYR: usize = 0x400;
const GICD_ICFGR: usize = 0xC00;
const GICD_IROUTER: usize = 0x6000;
const GICD_IROUTER_IRM: u64 = 1 << 31;

/// Physical GICv3 distributor
pub struct GicV3Distributor {
    base: usize,
    /// Serializes read-modify-write of ICFGR.
    cfg_lock: SpinLock<()>,
}

impl GicV3Distributor {
    pub const fn new(base: u64) -> Self {
        Self {
            base: base as usize,
            cfg_lock: SpinLock::new(()),
        }
    }

    #[inline]
    fn read32(&self, off: usize) -> u32 {
        unsafe { core::ptr::read_volatile((self.base + off) as *const u32) }
    }

    #[inline]
    fn write32(&self, off: usize, val: u32) {
        unsafe { core::ptr::write_volatile((self.base + off) as *mut u32, val) }
    }

    #[inline]
    fn write_bit(&self, set_reg: usize, clear_reg: usize, intid: u32, set: bool) {
        let reg = if set { set_reg } else { clear_reg };
        self.write32(reg + (intid as usize / 32) * 4, 1 << (intid % 32));
    }
}

impl PhysicalGic for GicV3Distributor {
    fn set_enable(&self, intid: u32, enable: bool) {
        self.write_bit(GICD_ISENABLER, GICD_ICENABLER, intid, enable);
    }

    fn set_priority(&self, intid: u32, prio: u8) {
        let addr = self.base + GICD_IPRIORITYR + intid as usize;
        unsafe { core::ptr::write_volatile(addr as *mut u8, prio) }
    }

    fn set_config(&self, intid: u32, cfg: u8) {
        let _guard = self.cfg_lock.lock();
        let off = GICD_ICFGR + (intid as usize / 16) * 4;
        let shift = (intid % 16) * 2;
        let val = (self.read32(off) & !(0b11 << shift)) | (((cfg & 0b11) as u32) << shift);
        self.write32(off, val);
    }

    fn set_pending(&self, intid: u32, pending: bool) {
        self.write_bit(GICD_ISPENDR, GICD_ICPENDR, intid, pending);
    }

    fn set_active(&self, intid: u32, active: bool) {
        self.write_bit(GICD_ISACTIVER, GICD_ICACTIVER, intid, active);
    }

    fn set_route(&self, intid: u32, route: PhysRoute) {
        // Aff0 of MPIDR is the physical CPU number on this platform.
        let router = match route {
            PhysRoute::Cpu(cpu) => cpu as u64,
            PhysRoute::Mask(mask) if mask != 0 => mask.trailing_zeros() as u64,
            PhysRoute::Any => GICD_IROUTER_IRM,
            _ => return,
        };
        let addr = self.base + GICD_IROUTER + intid as usize * 8;
        unsafe { core::ptr::write_volatile(addr as *mut u64, router) }
    }

    fn send_sgi(&self, cpu: usize, sgi: u32) {
        // ICC_SGI1R_EL1: INTID [27:24], TargetList [15:0] for Aff0 < 16
        let val = ((sgi as u64 & 0xF) << 24) | (1u64 << (cpu & 0xF));
        write_sysreg!("ICC_SGI1R_EL1", val);
        unsafe { asm!("isb", options(nostack, nomem)) };
    }
}
