//! Virtual CPU (vCPU) Management
//!
//! A vCPU is pinned to one physical CPU for the VM's lifetime. Its
//! interrupt-side state is the private bank and redistributor in `vgic`.

use crate::config::GicVersion;
use crate::devices::gic::VgicCpu;

/// Virtual CPU
pub struct Vcpu {
    /// Index within the VM; also its Aff0 and redistributor number.
    pub id: usize,
    /// Physical CPU this vCPU runs on.
    pub phys_id: usize,
    pub vgic: VgicCpu,
}

impl Vcpu {
    /// Create a vCPU and its private interrupts.
    pub fn new(id: usize, phys_id: usize, version: GicVersion) -> Self {
        Self {
            id,
            phys_id,
            vgic: VgicCpu::new(id, phys_id, version),
        }
    }
}
