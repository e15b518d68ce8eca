//! Virtual Machine Management
//!
//! A [`Vm`] is a static partition: a fixed set of vCPUs pinned to
//! physical CPUs, a virtual GIC sized from its configuration, and the
//! passthrough interrupts it owns on the physical GIC.

use alloc::sync::Arc;
use alloc::vec::Vec;
use log::info;

use crate::arch::PhysicalGic;
use crate::config::{GicVersion, VmConfig};
use crate::devices::gic::{routing, Vgic, VgicInt};
use crate::devices::DeviceManager;
use crate::error::VgicError;
use crate::ipi::CpuMsgBus;
use crate::vcpu::Vcpu;

/// Virtual Machine
pub struct Vm {
    /// Unique identifier for this VM
    pub id: usize,
    vcpus: Vec<Vcpu>,
    pub vgic: Vgic,
    /// Emulated MMIO windows
    devices: DeviceManager,
    gic: Arc<dyn PhysicalGic>,
    bus: Arc<CpuMsgBus>,
}

impl Vm {
    /// Build a VM from its validated partition table: allocate the
    /// interrupt records, create the vCPUs, register the GIC windows and
    /// claim the passthrough interrupts.
    pub fn new(
        cfg: &VmConfig,
        gic: Arc<dyn PhysicalGic>,
        bus: Arc<CpuMsgBus>,
    ) -> Result<Arc<Self>, VgicError> {
        cfg.validate()?;
        if let Some(&cpu) = cfg.cpu_affinity.iter().find(|&&c| c >= bus.num_cpus()) {
            return Err(VgicError::InvalidCpu { vm: cfg.id, cpu });
        }

        let vgic = Vgic::new(&cfg.vgic, &cfg.cpu_affinity);
        let vcpus: Vec<Vcpu> = cfg
            .cpu_affinity
            .iter()
            .enumerate()
            .map(|(id, &pcpu)| Vcpu::new(id, pcpu, cfg.vgic.version))
            .collect();

        let mut devices = DeviceManager::new();
        let gicr_frames = match cfg.vgic.version {
            GicVersion::V3 => vcpus.len(),
            GicVersion::V2 => 0,
        };
        devices.attach_vgic(cfg.vgic.gicd_base, cfg.vgic.gicr_base, gicr_frames);

        let vm = Self {
            id: cfg.id,
            vcpus,
            vgic,
            devices,
            gic,
            bus,
        };
        for &irq in &cfg.hw_interrupts {
            vm.set_hw(irq)?;
        }
        info!(
            "VM {}: {} vCPUs on {:?}, {} passthrough interrupts",
            vm.id,
            vm.vcpus.len(),
            cfg.cpu_affinity,
            cfg.hw_interrupts.len()
        );
        Ok(Arc::new(vm))
    }

    pub fn vcpus(&self) -> &[Vcpu] {
        &self.vcpus
    }

    pub fn vcpu(&self, id: usize) -> Option<&Vcpu> {
        self.vcpus.get(id)
    }

    pub fn vcpu_count(&self) -> usize {
        self.vcpus.len()
    }

    /// Bit n set for every vCPU n.
    pub fn vcpu_mask(&self) -> u64 {
        (1u64 << self.vcpus.len()) - 1
    }

    /// Physical CPU running vCPU `vcpu`.
    pub fn pcpu_of(&self, vcpu: usize) -> Option<usize> {
        self.vcpus.get(vcpu).map(|v| v.phys_id)
    }

    /// vCPU pinned to physical CPU `pcpu`.
    pub fn vcpu_on(&self, pcpu: usize) -> Option<usize> {
        self.vcpus.iter().find(|v| v.phys_id == pcpu).map(|v| v.id)
    }

    /// Interrupt record for `id` as seen by `vcpu`: its own private bank
    /// below 32, the shared table above.
    pub fn get_int(&self, vcpu: usize, id: u32) -> Option<&VgicInt> {
        if (id as usize) >= self.vgic.nr_irqs {
            return None;
        }
        if crate::devices::gic::interrupt::is_private(id) {
            self.vcpu(vcpu)?.vgic.private_int(id)
        } else {
            self.vgic.shared_int(id)
        }
    }

    /// Back shared interrupt `id` by the physical line of the same number
    /// and align the physical routing with the virtual one.
    pub fn set_hw(&self, id: u32) -> Result<(), VgicError> {
        let int = self
            .vgic
            .shared_int(id)
            .ok_or(VgicError::InvalidHwInterrupt { vm: self.id, irq: id })?;
        let mut s = int.lock();
        s.hw = true;
        s.phys = routing::phys_route(self, int, &s);
        self.gic.set_route(id, s.phys);
        Ok(())
    }

    pub fn gic(&self) -> &dyn PhysicalGic {
        &*self.gic
    }

    pub fn bus(&self) -> &CpuMsgBus {
        &self.bus
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }
}
