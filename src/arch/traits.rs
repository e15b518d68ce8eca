//! Architecture-Portable Trait Definitions
//!
//! The vGIC core only ever touches hardware through these traits. The
//! GICv3 system-register/MMIO backends implement them on target; the
//! software model in `arch::soft` implements them everywhere else.

use super::ich::{IchHcr, IchMisr};

/// Where the physical distributor delivers a passthrough interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhysRoute {
    /// Exactly one physical CPU.
    Cpu(usize),
    /// A bitmap of physical CPUs (GICv2 ITARGETSR style).
    Mask(u64),
    /// Any participating CPU (1-of-N, IROUTER.IRM).
    Any,
    /// No valid physical target yet.
    Invalid,
}

/// Per-core virtual CPU interface (ICH_*_EL2 on GICv3).
///
/// Only code running on the owning physical CPU may call these.
/// List register values use the ICH_LR<n>_EL2 layout.
pub trait VirtualInterface: Send + Sync {
    fn num_lrs(&self) -> usize;
    fn read_lr(&self, n: usize) -> u64;
    fn write_lr(&self, n: usize, value: u64);
    /// Empty list register status, bit n = LR n usable.
    fn elrsr(&self) -> u64;
    /// End-of-interrupt status, bit n = LR n completed with maintenance.
    fn eisr(&self) -> u64;
    fn misr(&self) -> IchMisr;
    fn hcr(&self) -> IchHcr;
    fn set_hcr(&self, hcr: IchHcr);
}

/// Physical distributor state mirrored for hardware-backed interrupts.
pub trait PhysicalGic: Send + Sync {
    fn set_enable(&self, intid: u32, enable: bool);
    fn set_priority(&self, intid: u32, prio: u8);
    fn set_config(&self, intid: u32, cfg: u8);
    fn set_pending(&self, intid: u32, pending: bool);
    fn set_active(&self, intid: u32, active: bool);
    fn set_route(&self, intid: u32, route: PhysRoute);
    /// Raise a physical SGI on another core.
    fn send_sgi(&self, cpu: usize, sgi: u32);
}

/// Guest general-purpose register file of a trapped vCPU.
///
/// Register 31 is XZR in load/store encodings: reads return zero and
/// writes are dropped.
pub trait GuestRegs {
    fn get_reg(&self, n: u8) -> u64;
    fn set_reg(&mut self, n: u8, val: u64);
}

impl GuestRegs for [u64; 31] {
    fn get_reg(&self, n: u8) -> u64 {
        self.get(n as usize).copied().unwrap_or(0)
    }

    fn set_reg(&mut self, n: u8, val: u64) {
        if let Some(r) = self.get_mut(n as usize) {
            *r = val;
        }
    }
}
