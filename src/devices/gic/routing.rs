//! Target resolution and the routing decision.

use super::interrupt::{VgicInt, VgicIntState, IrqState, IROUTER_IRM};
use super::msg::{self, VgicEvent, VgicMsgData};
use super::{list_regs, ownership};
use crate::arch::PhysRoute;
use crate::config::GicVersion;
use crate::percpu::Pcpu;
use crate::vm::Vm;

/// vCPU named by an IROUTER value. vCPU n has affinity 0.0.0.n.
pub fn route_vcpu(vm: &Vm, route: u64) -> Option<usize> {
    if route & 0x00FF_FF00 != 0 {
        return None;
    }
    let vcpu = (route & 0xFF) as usize;
    (vcpu < vm.vcpu_count()).then_some(vcpu)
}

/// vCPUs the interrupt may be delivered to, bit n = vCPU n.
pub fn vcpu_targets(vm: &Vm, int: &VgicInt, s: &VgicIntState) -> u64 {
    if let Some(home) = int.home {
        return 1 << home;
    }
    match vm.vgic.version {
        GicVersion::V2 => s.targets as u64 & vm.vcpu_mask(),
        GicVersion::V3 if s.route & IROUTER_IRM != 0 => vm.vcpu_mask(),
        GicVersion::V3 => route_vcpu(vm, s.route).map_or(0, |v| 1 << v),
    }
}

/// Physical CPUs running the given vCPUs.
pub fn pcpu_mask(vm: &Vm, vcpus: u64) -> u64 {
    vm.vcpus()
        .iter()
        .filter(|v| vcpus & (1 << v.id) != 0)
        .fold(0, |acc, v| acc | (1 << v.phys_id))
}

/// Physical delivery matching the virtual target configuration.
pub fn phys_route(vm: &Vm, int: &VgicInt, s: &VgicIntState) -> PhysRoute {
    if let Some(home) = int.home {
        return vm.pcpu_of(home).map_or(PhysRoute::Invalid, PhysRoute::Cpu);
    }
    match vm.vgic.version {
        GicVersion::V2 => match pcpu_mask(vm, vcpu_targets(vm, int, s)) {
            0 => PhysRoute::Invalid,
            mask => PhysRoute::Mask(mask),
        },
        GicVersion::V3 if s.route & IROUTER_IRM != 0 => PhysRoute::Any,
        GicVersion::V3 => route_vcpu(vm, s.route)
            .and_then(|v| vm.pcpu_of(v))
            .map_or(PhysRoute::Invalid, PhysRoute::Cpu),
    }
}

/// Present the interrupt to the guest: take a list register here if this
/// vCPU is a target, and hand it to the other targets' cores if it did
/// not land here. The caller owns the interrupt and holds its lock.
pub fn route(cpu: &Pcpu, int: &VgicInt, s: &mut VgicIntState) {
    if list_regs::get_state(cpu, int, s) == IrqState::Invalid || !s.enabled {
        return;
    }

    let vm = cpu.vm();
    let me = 1u64 << cpu.vcpu_id();
    let targets = vcpu_targets(vm, int, s);
    if targets & me != 0 {
        list_regs::add_lr(cpu, int, s);
    }

    let others = targets & !me;
    if s.in_lr || others == 0 {
        return;
    }
    if !ownership::release(cpu.vcpu_id(), vm.vgic.version, int, s) {
        return;
    }
    let data = VgicMsgData {
        vm_id: vm.id,
        vgicr: int.home.unwrap_or(cpu.vcpu_id()),
        intid: int.id,
        group: 0,
        value: 0,
    };
    let pcpus = pcpu_mask(vm, others);
    for pcpu in (0..u64::BITS as usize).filter(|&c| pcpus & (1 << c) != 0) {
        msg::send(cpu, pcpu, VgicEvent::Route, data);
    }
}
