//! Per-physical-CPU context.
//!
//! A `Pcpu` binds one physical CPU to the vCPU pinned on it and to that
//! core's list-register interface. Every vGIC operation runs against the
//! `Pcpu` of the core executing it.

use alloc::sync::Arc;
use log::{debug, warn};

use crate::arch::decode::SysRegAccess;
use crate::arch::ich::IchHcr;
use crate::arch::{GuestRegs, VirtualInterface};
use crate::devices::gic::{self, maintenance, msg, sysreg};
use crate::devices::EmulAccess;
use crate::error::VgicError;
use crate::ipi::MsgHandler;
use crate::vcpu::Vcpu;
use crate::vm::Vm;

pub struct Pcpu {
    /// Physical CPU id (MPIDR_EL1.Aff0).
    pub id: usize,
    vm: Arc<Vm>,
    vcpu_id: usize,
    gich: Arc<dyn VirtualInterface>,
}

impl Pcpu {
    /// Bind physical CPU `id` to the vCPU of `vm` pinned there and
    /// program its virtual interface.
    pub fn attach(id: usize, vm: Arc<Vm>, gich: Arc<dyn VirtualInterface>) -> Result<Self, VgicError> {
        let vcpu_id = vm.vcpu_on(id).ok_or(VgicError::NotOnCpu { vm: vm.id, cpu: id })?;
        let mut hcr = IchHcr::LRENPIE;
        if vm.vgic.enabled() {
            hcr |= IchHcr::EN;
        }
        gich.set_hcr(hcr);
        debug!("cpu {}: VM {} vCPU {}, {} list registers", id, vm.id, vcpu_id, gich.num_lrs());
        Ok(Self { id, vm, vcpu_id, gich })
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vcpu_id(&self) -> usize {
        self.vcpu_id
    }

    pub fn vcpu(&self) -> &Vcpu {
        // attach() checked the vCPU exists and the VM never drops one.
        &self.vm.vcpus()[self.vcpu_id]
    }

    pub fn gich(&self) -> &dyn VirtualInterface {
        &*self.gich
    }

    /// Set ICH_HCR.En, which gates all virtual interrupt delivery.
    pub fn set_vgic_enable(&self, enable: bool) {
        let hcr = self.gich.hcr();
        self.gich.set_hcr(if enable { hcr | IchHcr::EN } else { hcr - IchHcr::EN });
    }

    /// Re-read the distributor enable into ICH_HCR.En.
    pub fn sync_enable(&self) {
        self.set_vgic_enable(self.vm.vgic.enabled());
    }

    /// Trapped data abort on an emulated window. `false` means the guest
    /// gets the abort.
    pub fn handle_mmio(&self, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
        let handled = self.vm.devices().handle_mmio(self, acc, regs);
        if !handled {
            warn!(
                "cpu {}: unhandled {} of {} bytes at {:#x}",
                self.id,
                if acc.write { "write" } else { "read" },
                acc.width,
                acc.addr
            );
        }
        handled
    }

    /// Trapped MSR/MRS.
    pub fn handle_sysreg(&self, acc: &SysRegAccess, regs: &mut dyn GuestRegs) -> bool {
        sysreg::sysreg_access(self, acc, regs)
    }

    /// A physical interrupt assigned to this VM fired here, or a device
    /// model raised a virtual one.
    pub fn inject(&self, intid: u32) {
        gic::inject(self, intid);
    }

    /// ICH maintenance interrupt.
    pub fn maintenance(&self) {
        maintenance::handle_maintenance(self);
    }

    /// Drain this core's message queue. Returns the number handled.
    pub fn poll_messages(&self) -> usize {
        let mut handled = 0;
        while let Some(m) = self.vm.bus().recv(self.id) {
            match m.handler {
                MsgHandler::Vgic => msg::handle_msg(self, &m),
            }
            handled += 1;
        }
        handled
    }
}
