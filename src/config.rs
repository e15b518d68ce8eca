//! Static VM partition tables.
//!
//! The boot loader hands these in before any VM starts. Everything is
//! checked up front; a VM whose table does not validate never runs.

use alloc::vec::Vec;

use crate::error::VgicError;
use crate::platform::{
    GICD_BASE, GICR_BASE, GIC_MAX_INTERRUPTS, GIC_PRIVATE_INTERRUPTS, MAX_SMP_CPUS,
};

/// Largest VM id the cross-core message payload can carry.
pub const MAX_VM_ID: usize = 0xFF;

/// Guest-visible controller flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GicVersion {
    /// Legacy: ITARGETSR bitmaps, GICD_SGIR, private banks in the distributor.
    V2,
    /// Affinity routing: IROUTER, redistributors, ICC_SGI1R_EL1.
    V3,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VgicConfig {
    pub version: GicVersion,
    /// Implemented interrupt lines, private ones included.
    pub interrupt_num: usize,
    /// Guest-physical base of the distributor window.
    pub gicd_base: u64,
    /// Guest-physical base of the first redistributor (GICv3 only).
    pub gicr_base: u64,
}

impl VgicConfig {
    /// GICv3 laid out like QEMU virt.
    pub fn v3(interrupt_num: usize) -> Self {
        Self {
            version: GicVersion::V3,
            interrupt_num,
            gicd_base: GICD_BASE,
            gicr_base: GICR_BASE,
        }
    }

    pub fn v2(interrupt_num: usize) -> Self {
        Self {
            version: GicVersion::V2,
            interrupt_num,
            gicd_base: GICD_BASE,
            gicr_base: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    pub id: usize,
    /// Physical CPU of each vCPU, indexed by vCPU id.
    pub cpu_affinity: Vec<usize>,
    pub vgic: VgicConfig,
    /// Physical SPIs passed straight through to this VM.
    pub hw_interrupts: Vec<u32>,
}

impl VmConfig {
    /// Check a single VM's table.
    pub fn validate(&self) -> Result<(), VgicError> {
        let vm = self.id;
        if vm > MAX_VM_ID {
            return Err(VgicError::VmIdOutOfRange { vm });
        }
        if self.cpu_affinity.is_empty() {
            return Err(VgicError::NoVcpus { vm });
        }
        if self.cpu_affinity.len() > MAX_SMP_CPUS {
            return Err(VgicError::TooManyVcpus {
                vm,
                count: self.cpu_affinity.len(),
                max: MAX_SMP_CPUS,
            });
        }
        for (i, &cpu) in self.cpu_affinity.iter().enumerate() {
            if cpu >= MAX_SMP_CPUS {
                return Err(VgicError::InvalidCpu { vm, cpu });
            }
            if self.cpu_affinity[..i].contains(&cpu) {
                return Err(VgicError::CpuConflict { cpu, first: vm, second: vm });
            }
        }

        let count = self.vgic.interrupt_num;
        if !(GIC_PRIVATE_INTERRUPTS..=GIC_MAX_INTERRUPTS).contains(&count) {
            return Err(VgicError::InterruptCount {
                vm,
                count,
                min: GIC_PRIVATE_INTERRUPTS,
                max: GIC_MAX_INTERRUPTS,
            });
        }

        for (i, &irq) in self.hw_interrupts.iter().enumerate() {
            let irq_idx = irq as usize;
            if irq_idx < GIC_PRIVATE_INTERRUPTS || irq_idx >= count {
                return Err(VgicError::InvalidHwInterrupt { vm, irq });
            }
            if self.hw_interrupts[..i].contains(&irq) {
                return Err(VgicError::InterruptConflict { irq, first: vm, second: vm });
            }
        }
        Ok(())
    }
}

/// Check every VM table and the partitioning between them: no physical
/// CPU and no passthrough interrupt may belong to two VMs.
pub fn validate_partitions(vms: &[VmConfig]) -> Result<(), VgicError> {
    for (i, cfg) in vms.iter().enumerate() {
        cfg.validate()?;
        for other in &vms[..i] {
            if other.id == cfg.id {
                return Err(VgicError::DuplicateVm { vm: cfg.id });
            }
            if let Some(&cpu) = cfg
                .cpu_affinity
                .iter()
                .find(|cpu| other.cpu_affinity.contains(cpu))
            {
                return Err(VgicError::CpuConflict { cpu, first: other.id, second: cfg.id });
            }
            if let Some(&irq) = cfg
                .hw_interrupts
                .iter()
                .find(|irq| other.hw_interrupts.contains(irq))
            {
                return Err(VgicError::InterruptConflict { irq, first: other.id, second: cfg.id });
            }
        }
    }
    Ok(())
}
