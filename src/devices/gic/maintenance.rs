//! ICH maintenance interrupt.
//!
//! Runs on the core that took the interrupt, against that core's list
//! registers and the vCPU running there.

use log::trace;

use super::interrupt::IrqState;
use super::list_regs::{self, ListReg};
use super::{ownership, routing};
use crate::arch::ich::{IchHcr, IchMisr};
use crate::percpu::Pcpu;

pub fn handle_maintenance(cpu: &Pcpu) {
    let misr = cpu.gich().misr();
    trace!("vgic: cpu {} maintenance {:?}", cpu.id, misr);

    if misr.contains(IchMisr::EOI) {
        eoi_maintenance(cpu);
    }
    // Deactivations the list registers missed come before refilling, so
    // an interrupt the guest already completed is not presented again.
    if misr.contains(IchMisr::LRENP) {
        let gich = cpu.gich();
        let count = gich.hcr().eoi_count();
        gich.set_hcr(gich.hcr() - IchHcr::EOICOUNT);
        for _ in 0..count {
            list_regs::eoi_spilled_active(cpu);
        }
    }
    if misr.intersects(IchMisr::NP | IchMisr::U) {
        list_regs::refill(cpu, misr.contains(IchMisr::NP));
    }
}

/// Retire list registers whose interrupt the guest completed.
fn eoi_maintenance(cpu: &Pcpu) {
    let gich = cpu.gich();
    let vm = cpu.vm();
    let vcpu = cpu.vcpu_id();
    let eisr = gich.eisr();

    for lr_ind in (0..gich.num_lrs()).filter(|&i| eisr & (1 << i) != 0) {
        let lr = ListReg(gich.read_lr(lr_ind));
        gich.write_lr(lr_ind, 0);

        let Some(int) = vm.get_int(vcpu, lr.vintid()) else {
            continue;
        };
        let mut s = int.lock();
        if !(ownership::owns(vcpu, &s) && s.in_lr && s.lr == lr_ind) {
            continue;
        }
        s.in_lr = false;
        s.state = lr.state();
        // Requesters of a GICv2 SGI still waiting go in next.
        if vm.vgic.is_legacy_sgi(int) && s.sgi_sources != 0 {
            s.state = s.state.with_pending(true);
        }
        if s.state == IrqState::Invalid {
            ownership::release(vcpu, vm.vgic.version, int, &mut s);
        } else {
            routing::route(cpu, int, &mut s);
        }
    }
}
