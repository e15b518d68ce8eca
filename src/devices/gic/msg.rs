//! Cross-core vGIC requests.
//!
//! A core never touches another core's list registers. Whatever must
//! happen there is packed into a `CpuMsg` and handled by that core at its
//! next poll point.

use log::{error, warn};

use super::interrupt::{is_sgi, IrqState};
use super::regs::{self, RegGroup};
use super::{list_regs, ownership, routing};
use crate::ipi::{CpuMsg, MsgHandler};
use crate::percpu::Pcpu;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum VgicEvent {
    /// Distributor enable changed; resync ICH_HCR.En.
    UpdateEnable = 0,
    /// Take the interrupt if it is free and present it.
    Route = 1,
    /// Inject on the owning core.
    Inject = 2,
    /// Redo a register field write on the owning core.
    SetReg = 3,
}

impl TryFrom<u32> for VgicEvent {
    type Error = u32;

    fn try_from(event: u32) -> Result<Self, u32> {
        match event {
            0 => Ok(VgicEvent::UpdateEnable),
            1 => Ok(VgicEvent::Route),
            2 => Ok(VgicEvent::Inject),
            3 => Ok(VgicEvent::SetReg),
            other => Err(other),
        }
    }
}

const VM_SHIFT: u32 = 56;
const VGICR_SHIFT: u32 = 48;
const INTID_SHIFT: u32 = 38;
const INTID_MASK: u64 = 0x3FF;
const GROUP_SHIFT: u32 = 32;
const GROUP_MASK: u64 = 0x3F;

/// Message payload. `vgicr` names the vCPU whose private bank holds the
/// interrupt, or the sender for shared interrupts. INJECT of an SGI
/// carries the requesting vCPU in `value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VgicMsgData {
    pub vm_id: usize,
    pub vgicr: usize,
    pub intid: u32,
    pub group: u8,
    pub value: u32,
}

impl VgicMsgData {
    pub fn pack(&self) -> u64 {
        ((self.vm_id as u64 & 0xFF) << VM_SHIFT)
            | ((self.vgicr as u64 & 0xFF) << VGICR_SHIFT)
            | ((self.intid as u64 & INTID_MASK) << INTID_SHIFT)
            | ((self.group as u64 & GROUP_MASK) << GROUP_SHIFT)
            | self.value as u64
    }

    pub fn unpack(data: u64) -> Self {
        Self {
            vm_id: (data >> VM_SHIFT) as usize & 0xFF,
            vgicr: (data >> VGICR_SHIFT) as usize & 0xFF,
            intid: ((data >> INTID_SHIFT) & INTID_MASK) as u32,
            group: ((data >> GROUP_SHIFT) & GROUP_MASK) as u8,
            value: data as u32,
        }
    }
}

/// Post a request to physical CPU `pcpu`. Only a CPU without a queue
/// refuses it, which is a partitioning bug; it is logged.
pub fn send(cpu: &Pcpu, pcpu: usize, event: VgicEvent, data: VgicMsgData) {
    let msg = CpuMsg {
        handler: MsgHandler::Vgic,
        event: event as u32,
        data: data.pack(),
    };
    if let Err(e) = cpu.vm().bus().send(pcpu, msg) {
        error!("vgic: cpu {} dropped {:?} for int {}: {}", cpu.id, event, data.intid, e);
    }
}

/// Send to every other core running a vCPU of this VM.
pub fn broadcast(cpu: &Pcpu, event: VgicEvent, data: VgicMsgData) {
    for vcpu in cpu.vm().vcpus() {
        if vcpu.phys_id != cpu.id {
            send(cpu, vcpu.phys_id, event, data);
        }
    }
}

pub fn handle_msg(cpu: &Pcpu, msg: &CpuMsg) {
    let vm = cpu.vm();
    let data = VgicMsgData::unpack(msg.data);
    if data.vm_id != vm.id {
        warn!("vgic: cpu {} got a message for VM {}, runs VM {}", cpu.id, data.vm_id, vm.id);
        return;
    }
    let Ok(event) = VgicEvent::try_from(msg.event) else {
        warn!("vgic: cpu {} unknown event {}", cpu.id, msg.event);
        return;
    };

    match event {
        VgicEvent::UpdateEnable => cpu.sync_enable(),
        VgicEvent::Route => {
            let Some(int) = vm.get_int(data.vgicr, data.intid) else {
                return;
            };
            let vcpu = cpu.vcpu_id();
            let mut s = int.lock();
            if !ownership::try_acquire(vcpu, &mut s) {
                return;
            }
            // Never routed on from here; the sender asked every target.
            let wanted = !s.in_lr && s.state != IrqState::Invalid;
            if wanted && routing::vcpu_targets(vm, int, &s) & (1 << vcpu) != 0 {
                list_regs::add_lr(cpu, int, &mut s);
            }
            ownership::release(vcpu, vm.vgic.version, int, &mut s);
        }
        VgicEvent::Inject if is_sgi(data.intid) => {
            super::raise_sgi(cpu, data.intid, data.value as usize)
        }
        VgicEvent::Inject => super::inject(cpu, data.intid),
        VgicEvent::SetReg => {
            let (Some(group), Some(int)) =
                (RegGroup::from_id(data.group), vm.get_int(data.vgicr, data.intid))
            else {
                warn!("vgic: cpu {} bad SET_REG for int {}", cpu.id, data.intid);
                return;
            };
            regs::set_field(cpu, group, int, data.value as u64);
        }
    }
}
