//! Device Emulation Framework
//!
//! Routes trapped guest accesses to emulated devices via enum dispatch.
//! Each VM registers the windows of its virtual GIC here at creation.

pub mod gic;

use crate::arch::GuestRegs;
use crate::percpu::Pcpu;
use crate::platform::{GICD_SIZE, GICR_STRIDE};

/// A trapped guest load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulAccess {
    /// Faulting guest-physical address.
    pub addr: u64,
    /// Access size in bytes (1, 2, 4, or 8).
    pub width: u8,
    pub write: bool,
    /// Guest register written from or loaded into (31 = XZR).
    pub reg: u8,
    /// Sign-extend narrow loads.
    pub sign_ext: bool,
    /// Register is 64-bit (Xt); a 32-bit (Wt) result has its top half clear.
    pub reg64: bool,
}

/// Trait for MMIO-accessible devices
///
/// - `handle()` gets the full access; the device works out its own offset
/// - Return `false` for accesses the guest must take an abort for
pub trait MmioDevice {
    fn handle(&self, cpu: &Pcpu, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool;
    fn base_address(&self) -> u64;
    fn size(&self) -> u64;

    fn contains(&self, addr: u64) -> bool {
        let base = self.base_address();
        addr >= base && addr < base + self.size()
    }
}

// ── Enum dispatch ──────────────────────────────────────────────────

/// Virtual GIC distributor window.
pub struct GicdWindow {
    base: u64,
}

/// Virtual GIC redistributor windows, one stride per vCPU.
pub struct GicrWindow {
    base: u64,
    num_vcpus: usize,
}

impl MmioDevice for GicdWindow {
    fn handle(&self, cpu: &Pcpu, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
        gic::distributor::gicd_access(cpu, acc, regs)
    }

    fn base_address(&self) -> u64 {
        self.base
    }

    fn size(&self) -> u64 {
        GICD_SIZE
    }
}

impl MmioDevice for GicrWindow {
    fn handle(&self, cpu: &Pcpu, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
        gic::redistributor::gicr_access(cpu, acc, regs)
    }

    fn base_address(&self) -> u64 {
        self.base
    }

    fn size(&self) -> u64 {
        GICR_STRIDE * self.num_vcpus as u64
    }
}

/// Device variant enum, one variant per supported device type.
pub enum Device {
    Gicd(GicdWindow),
    Gicr(GicrWindow),
}

impl MmioDevice for Device {
    fn handle(&self, cpu: &Pcpu, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
        match self {
            Device::Gicd(d) => d.handle(cpu, acc, regs),
            Device::Gicr(d) => d.handle(cpu, acc, regs),
        }
    }

    fn base_address(&self) -> u64 {
        match self {
            Device::Gicd(d) => d.base_address(),
            Device::Gicr(d) => d.base_address(),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Device::Gicd(d) => d.size(),
            Device::Gicr(d) => d.size(),
        }
    }
}

// ── Device Manager ─────────────────────────────────────────────────

const MAX_DEVICES: usize = 4;

/// MMIO Device Manager: routes accesses to registered devices by address.
pub struct DeviceManager {
    devices: [Option<Device>; MAX_DEVICES],
    count: usize,
}

impl DeviceManager {
    pub const fn new() -> Self {
        Self {
            devices: [const { None }; MAX_DEVICES],
            count: 0,
        }
    }

    /// Register a device. Returns slot index on success.
    pub fn register_device(&mut self, dev: Device) -> Option<usize> {
        if self.count >= MAX_DEVICES {
            return None;
        }
        let idx = self.count;
        self.devices[idx] = Some(dev);
        self.count += 1;
        Some(idx)
    }

    /// Register the distributor window and, with `num_vcpus > 0`, the
    /// redistributor windows.
    pub fn attach_vgic(&mut self, gicd_base: u64, gicr_base: u64, num_vcpus: usize) {
        self.register_device(Device::Gicd(GicdWindow { base: gicd_base }));
        if num_vcpus > 0 {
            self.register_device(Device::Gicr(GicrWindow { base: gicr_base, num_vcpus }));
        }
    }

    /// Handle MMIO access by scanning registered devices. Accesses
    /// outside every window are unhandled.
    pub fn handle_mmio(&self, cpu: &Pcpu, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
        self.devices
            .iter()
            .flatten()
            .find(|dev| dev.contains(acc.addr))
            .is_some_and(|dev| dev.handle(cpu, acc, regs))
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
