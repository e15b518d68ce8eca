//! Virtual ARM Generic Interrupt Controller
//!
//! Each VM sees its own distributor (and, for GICv3, one redistributor
//! per vCPU) while the physical GIC stays shared. Interrupt records live
//! in `Vgic` (shared lines) and `VgicCpu` (SGIs/PPIs of one vCPU); the
//! list registers of each core are scheduled by `list_regs`.
//!
//! Lock order: distributor/redistributor lock, interrupt lock, a second
//! interrupt lock (eviction victim or stale LR occupant), spill list lock.

pub mod distributor;
pub mod interrupt;
pub mod list_regs;
pub mod maintenance;
pub mod msg;
pub mod ownership;
pub mod redistributor;
pub mod regs;
pub mod routing;
pub mod spilled;
pub mod sysreg;

use alloc::boxed::Box;
use log::{info, trace, warn};

use crate::arch::PhysRoute;
use crate::config::{GicVersion, VgicConfig};
use crate::percpu::Pcpu;
use crate::platform::{GIC_PRIVATE_INTERRUPTS, MAX_LIST_REGS};
use crate::sync::SpinLock;

pub use interrupt::{IrqState, VgicInt, VgicIntState};
pub use redistributor::GicrState;
pub use regs::RegGroup;
pub use spilled::SpillList;

use msg::{VgicEvent, VgicMsgData};

/// Distributor state outside the interrupt records.
pub struct GicdState {
    pub ctlr: u32,
}

/// Per-VM distributor.
pub struct Vgic {
    pub version: GicVersion,
    /// Implemented INTIDs are 0..nr_irqs.
    pub nr_irqs: usize,
    /// Shared interrupts, index = INTID - 32.
    shared: Box<[VgicInt]>,
    gicd: SpinLock<GicdState>,
    typer: u32,
    pub gicd_base: u64,
    pub gicr_base: u64,
    /// Spilled shared interrupts.
    pub spilled: SpillList,
}

impl Vgic {
    /// Build the distributor of a VM whose vCPU n runs on `pcpus[n]`.
    /// The configuration has been validated.
    pub fn new(cfg: &VgicConfig, pcpus: &[usize]) -> Self {
        let first_cpu = pcpus.first().map_or(PhysRoute::Invalid, |&c| PhysRoute::Cpu(c));
        let shared = (GIC_PRIVATE_INTERRUPTS..cfg.interrupt_num)
            .map(|id| VgicInt::shared(id as u32, first_cpu))
            .collect();
        let typer = distributor::typer_value(cfg.version, cfg.interrupt_num, pcpus.len());
        info!(
            "vgic: {:?} distributor at {:#x}, {} interrupts, {} vCPUs",
            cfg.version,
            cfg.gicd_base,
            cfg.interrupt_num,
            pcpus.len()
        );
        Self {
            version: cfg.version,
            nr_irqs: cfg.interrupt_num,
            shared,
            gicd: SpinLock::new(GicdState { ctlr: 0 }),
            typer,
            gicd_base: cfg.gicd_base,
            gicr_base: cfg.gicr_base,
            spilled: SpillList::new(),
        }
    }

    pub fn shared_int(&self, id: u32) -> Option<&VgicInt> {
        (id as usize)
            .checked_sub(GIC_PRIVATE_INTERRUPTS)
            .and_then(|i| self.shared.get(i))
    }

    pub fn shared_ints(&self) -> &[VgicInt] {
        &self.shared
    }

    /// GICv2 SGIs keep one pending bit per requesting vCPU.
    pub fn is_legacy_sgi(&self, int: &VgicInt) -> bool {
        self.version == GicVersion::V2 && int.is_sgi()
    }

    /// Distributor forwards interrupts to the CPU interfaces.
    pub fn enabled(&self) -> bool {
        self.gicd.lock().ctlr & distributor::CTLR_ENABLE_MASK != 0
    }
}

/// Per-vCPU part of the vGIC: the private bank and its redistributor.
pub struct VgicCpu {
    private: Box<[VgicInt]>,
    gicr: SpinLock<GicrState>,
    /// Spilled SGIs/PPIs of this vCPU.
    pub spilled: SpillList,
    /// Last interrupt written to each list register of this vCPU's core.
    curr_lrs: SpinLock<[Option<u32>; MAX_LIST_REGS]>,
}

impl VgicCpu {
    pub fn new(vcpu: usize, pcpu: usize, version: GicVersion) -> Self {
        let private = (0..GIC_PRIVATE_INTERRUPTS as u32)
            .map(|id| VgicInt::private(id, vcpu, pcpu, version))
            .collect();
        Self {
            private,
            gicr: SpinLock::new(GicrState::new()),
            spilled: SpillList::new(),
            curr_lrs: SpinLock::new([None; MAX_LIST_REGS]),
        }
    }

    pub fn private_int(&self, id: u32) -> Option<&VgicInt> {
        self.private.get(id as usize)
    }

    pub fn private_ints(&self) -> &[VgicInt] {
        &self.private
    }

    pub fn waker(&self) -> u32 {
        self.gicr.lock().waker
    }

    /// Record `id` as the occupant of `lr`, returning the previous one.
    pub(crate) fn swap_lr_occupant(&self, lr: usize, id: u32) -> Option<u32> {
        self.curr_lrs.lock().get_mut(lr)?.replace(id)
    }
}

/// Make `intid` pending for the vCPU running on `cpu` and present it.
///
/// Hardware-backed interrupts are taken over directly when free and
/// forwarded to the owning core otherwise. Software interrupts go through
/// the same path as a guest write to ISPENDR, SGIs as a request from the
/// running vCPU.
pub fn inject(cpu: &Pcpu, intid: u32) {
    let vm = cpu.vm();
    let vcpu = cpu.vcpu_id();
    let Some(int) = vm.get_int(vcpu, intid) else {
        warn!("vgic: cpu {} inject of unimplemented int {}", cpu.id, intid);
        return;
    };

    let mut s = int.lock();
    if !s.hw {
        drop(s);
        if int.is_sgi() {
            raise_sgi(cpu, intid, vcpu);
        } else {
            regs::set_field(cpu, RegGroup::Ispendr, int, 1);
        }
        return;
    }

    if ownership::try_acquire(vcpu, &mut s) {
        // The physical line only fires again after the guest deactivated
        // it, so any LR still naming it is finished.
        list_regs::remove_lr(cpu, int, &mut s);
        s.state = s.state.with_pending(true);
        routing::route(cpu, int, &mut s);
        ownership::release(vcpu, vm.vgic.version, int, &mut s);
    } else if let Some(owner) = s.owner {
        let vgicr = int.home.unwrap_or(owner);
        drop(s);
        if let Some(pcpu) = vm.pcpu_of(owner) {
            let data = VgicMsgData { vm_id: vm.id, vgicr, intid, group: 0, value: 0 };
            msg::send(cpu, pcpu, VgicEvent::Inject, data);
        }
    }
}

/// Make SGI `intid` of the vCPU running on `cpu` pending at the request
/// of vCPU `source`.
pub(crate) fn raise_sgi(cpu: &Pcpu, intid: u32, source: usize) {
    let vm = cpu.vm();
    let Some(int) = vm.get_int(cpu.vcpu_id(), intid) else {
        return;
    };
    if vm.vgic.is_legacy_sgi(int) {
        regs::set_field(cpu, RegGroup::Spendsgir, int, 1 << source);
    } else {
        regs::set_field(cpu, RegGroup::Ispendr, int, 1);
    }
}

/// Raise SGI `intid` on every vCPU in `targets` (bit n = vCPU n).
pub fn send_sgi(cpu: &Pcpu, intid: u32, targets: u64) {
    let vm = cpu.vm();
    let me = cpu.vcpu_id();
    for vcpu in vm.vcpus().iter().filter(|v| targets & (1 << v.id) != 0) {
        trace!("vgic: vcpu {} sends SGI {} to vcpu {}", me, intid, vcpu.id);
        if vcpu.id == me {
            raise_sgi(cpu, intid, me);
        } else {
            let data = VgicMsgData {
                vm_id: vm.id,
                vgicr: vcpu.id,
                intid,
                group: 0,
                value: me as u32,
            };
            msg::send(cpu, vcpu.phys_id, VgicEvent::Inject, data);
        }
    }
}
