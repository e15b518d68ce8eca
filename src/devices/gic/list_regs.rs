//! List register management.
//!
//! The list registers of a core are only touched from that core, always
//! with the interrupt's lock held and with the interrupt owned by the
//! vCPU running there.

use alloc::vec::Vec;
use log::{error, trace};

use super::interrupt::{VgicInt, VgicIntState, IrqState, CFG_EDGE};
use super::{ownership, routing, spilled};
use crate::arch::ich::{self, IchHcr};
use crate::percpu::Pcpu;

/// One ICH_LR<n>_EL2 value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListReg(pub u64);

impl ListReg {
    pub fn new(id: u32, s: &VgicIntState, private: bool) -> Self {
        let mut state = s.state;
        let mut lr = id as u64 | ((s.prio as u64) << ich::LR_PRIO_SHIFT);
        if s.group1 {
            lr |= ich::LR_GROUP1;
        }
        if s.hw {
            // A hardware LR cannot be pending and active at once.
            if state == IrqState::PendingActive {
                state = IrqState::Active;
            }
            lr |= ich::LR_HW | ((id as u64) << ich::LR_PINTID_SHIFT);
        } else if !private {
            lr |= ich::LR_EOI;
        }
        ListReg(lr | ((state.bits() as u64) << ich::LR_STATE_SHIFT))
    }

    /// GICv2 SGI: one requester per list register. An active instance
    /// goes in alone; otherwise the lowest pending requester is taken
    /// off `s.sgi_sources`. Requesters left behind ask for EOI
    /// maintenance so they are presented next.
    pub fn legacy_sgi(id: u32, s: &mut VgicIntState) -> Self {
        let mut lr = id as u64 | ((s.prio as u64) << ich::LR_PRIO_SHIFT);
        if s.group1 {
            lr |= ich::LR_GROUP1;
        }
        let (state, source) = if s.state.is_active() {
            (IrqState::Active, s.sgi_active_source)
        } else if s.sgi_sources != 0 {
            let source = s.sgi_sources.trailing_zeros() as u8;
            s.sgi_sources &= !(1 << source);
            (IrqState::Pending, source)
        } else {
            (s.state, 0)
        };
        lr |= ((source as u64) << ich::LR_SGI_SOURCE_SHIFT) & ich::LR_SGI_SOURCE_MASK;
        if s.sgi_sources != 0 {
            lr |= ich::LR_EOI;
        }
        ListReg(lr | ((state.bits() as u64) << ich::LR_STATE_SHIFT))
    }

    pub fn vintid(self) -> u32 {
        (self.0 & ich::LR_INTID_MASK) as u32
    }

    /// Requesting vCPU of a GICv2 SGI.
    pub fn sgi_source(self) -> u8 {
        ((self.0 & ich::LR_SGI_SOURCE_MASK) >> ich::LR_SGI_SOURCE_SHIFT) as u8
    }

    pub fn state(self) -> IrqState {
        IrqState::from_bits(self.0 >> ich::LR_STATE_SHIFT)
    }

    pub fn prio(self) -> u8 {
        (self.0 >> ich::LR_PRIO_SHIFT) as u8
    }

    pub fn is_hw(self) -> bool {
        self.0 & ich::LR_HW != 0
    }
}

fn first_free_lr(cpu: &Pcpu) -> Option<usize> {
    let gich = cpu.gich();
    let elrsr = gich.elrsr();
    (0..gich.num_lrs()).find(|&i| elrsr & (1 << i) != 0)
}

/// Current state, read from the list register while the interrupt sits
/// in one of ours.
pub fn get_state(cpu: &Pcpu, int: &VgicInt, s: &VgicIntState) -> IrqState {
    if s.in_lr && ownership::owns(cpu.vcpu_id(), s) {
        let lr = ListReg(cpu.gich().read_lr(s.lr));
        if lr.vintid() == int.id {
            return lr.state();
        }
    }
    s.state
}

/// Requesters of a GICv2 SGI with an instance pending, the one held in
/// a list register included. Bit n = vCPU n.
pub fn sgi_pending_sources(cpu: &Pcpu, int: &VgicInt, s: &VgicIntState) -> u8 {
    let mut sources = s.sgi_sources;
    if s.in_lr && ownership::owns(cpu.vcpu_id(), s) {
        let lr = ListReg(cpu.gich().read_lr(s.lr));
        if lr.vintid() == int.id && lr.state().is_pending() {
            sources |= 1 << lr.sgi_source();
        }
    }
    sources
}

/// Hand the requester a GICv2 SGI list register held back to the
/// software state. `s.state` already holds the list register's state.
fn restore_sgi_source(s: &mut VgicIntState, lr: ListReg) {
    let source = lr.sgi_source();
    if lr.state().is_active() {
        s.sgi_active_source = source;
    }
    if lr.state().is_pending() {
        s.sgi_sources |= 1 << source;
    }
    if s.sgi_sources != 0 {
        s.state = s.state.with_pending(true);
    }
}

/// Write the interrupt into slot `lr_ind`.
///
/// # Panics
/// Panics if the running vCPU does not own the interrupt.
fn write_lr(cpu: &Pcpu, int: &VgicInt, s: &mut VgicIntState, lr_ind: usize) {
    let vcpu = cpu.vcpu_id();
    if !ownership::owns(vcpu, s) {
        error!(
            "vgic: cpu {} writing LR{} for int {} owned by {:?}",
            cpu.id, lr_ind, int.id, s.owner
        );
        panic!("vgic: list register write without ownership");
    }

    // The slot may still be credited to an interrupt whose hardware LR
    // completed without maintenance.
    if let Some(prev_id) = cpu.vcpu().vgic.swap_lr_occupant(lr_ind, int.id) {
        if prev_id != int.id {
            if let Some(prev) = cpu.vm().get_int(vcpu, prev_id) {
                let mut ps = prev.lock();
                if ownership::owns(vcpu, &ps) && ps.in_lr && ps.lr == lr_ind {
                    ps.in_lr = false;
                    ps.state = IrqState::Invalid;
                    ownership::release(vcpu, cpu.vm().vgic.version, prev, &mut ps);
                }
            }
        }
    }

    let lr = if cpu.vm().vgic.is_legacy_sgi(int) {
        ListReg::legacy_sgi(int.id, s)
    } else {
        ListReg::new(int.id, s, int.is_private())
    };
    cpu.gich().write_lr(lr_ind, lr.0);
    s.state = IrqState::Invalid;
    s.in_lr = true;
    s.lr = lr_ind;
    spilled::unspill(cpu.vm(), int, s);
    trace!("vgic: cpu {} LR{} <- int {} {:#x}", cpu.id, lr_ind, int.id, lr.0);
}

/// Pick the list register to evict for a new arrival, or `None` when
/// nothing may go.
///
/// The lowest priority (then highest id) active and pending entries are
/// both candidates. A pending entry is only taken while at least one
/// other pending entry stays resident.
fn select_victim(cpu: &Pcpu) -> Option<usize> {
    let gich = cpu.gich();
    let mut pend: Option<(u8, u32, usize)> = None;
    let mut act: Option<(u8, u32, usize)> = None;
    let mut pend_found = 0;

    let lower = |cand: (u8, u32), cur: Option<(u8, u32, usize)>| match cur {
        None => true,
        Some((prio, id, _)) => cand.0 > prio || (cand.0 == prio && cand.1 > id),
    };

    for i in 0..gich.num_lrs() {
        let lr = ListReg(gich.read_lr(i));
        let cand = (lr.prio(), lr.vintid());
        let state = lr.state();
        if state.is_active() {
            if lower(cand, act) {
                act = Some((cand.0, cand.1, i));
            }
        } else if state.is_pending() {
            pend_found += 1;
            if lower(cand, pend) {
                pend = Some((cand.0, cand.1, i));
            }
        }
    }

    let victim = if pend_found > 1 { pend } else { act };
    victim.map(|(_, _, i)| i)
}

/// Move the occupant of `lr_ind` to its spill list.
fn evict(cpu: &Pcpu, lr_ind: usize) {
    let vcpu = cpu.vcpu_id();
    let vid = ListReg(cpu.gich().read_lr(lr_ind)).vintid();
    let Some(victim) = cpu.vm().get_int(vcpu, vid) else {
        cpu.gich().write_lr(lr_ind, 0);
        return;
    };

    let mut vs = victim.lock();
    if ownership::owns(vcpu, &vs) && vs.in_lr && vs.lr == lr_ind {
        remove_lr(cpu, victim, &mut vs);
        spilled::spill(cpu, victim, &mut vs);
        ownership::release(vcpu, cpu.vm().vgic.version, victim, &mut vs);
        trace!("vgic: cpu {} evicted int {} from LR{}", cpu.id, vid, lr_ind);
    } else {
        cpu.gich().write_lr(lr_ind, 0);
    }
}

/// Place an enabled interrupt in a list register of this core, evicting
/// a less important entry when all are in use. When nothing can be
/// evicted the interrupt is spilled and `false` returned; it stays
/// pending and comes back through maintenance.
pub fn add_lr(cpu: &Pcpu, int: &VgicInt, s: &mut VgicIntState) -> bool {
    if !s.enabled || s.in_lr || !ownership::owns(cpu.vcpu_id(), s) {
        return false;
    }

    let lr_ind = first_free_lr(cpu).or_else(|| {
        let victim = select_victim(cpu)?;
        evict(cpu, victim);
        Some(victim)
    });

    match lr_ind {
        Some(i) => {
            write_lr(cpu, int, s, i);
            true
        }
        None => {
            spilled::spill(cpu, int, s);
            false
        }
    }
}

/// Take the interrupt out of its list register, keeping whatever state
/// the guest left in it. Returns whether a slot was released.
pub fn remove_lr(cpu: &Pcpu, int: &VgicInt, s: &mut VgicIntState) -> bool {
    if !s.in_lr || !ownership::owns(cpu.vcpu_id(), s) {
        return false;
    }
    s.in_lr = false;

    let gich = cpu.gich();
    let lr = ListReg(gich.read_lr(s.lr));
    if lr.vintid() != int.id {
        return false;
    }
    gich.write_lr(s.lr, 0);
    s.state = lr.state();
    if cpu.vm().vgic.is_legacy_sgi(int) {
        restore_sgi_source(s, lr);
    }

    // Level lines backed by hardware are re-signalled by the distributor.
    let edge = s.cfg & CFG_EDGE != 0 || !s.hw;
    if s.state.is_pending() && s.enabled && edge {
        gich.set_hcr(gich.hcr() | IchHcr::NPIE);
    }
    true
}

/// Fill free list registers from the spill lists, highest priority first.
/// `pending_only` restricts the candidates to pending interrupts (the NP
/// maintenance case). Maintenance requests are dropped once nothing
/// eligible is left.
pub fn refill(cpu: &Pcpu, pending_only: bool) {
    let vcpu = cpu.vcpu_id();
    let vm = cpu.vm();
    let mut skipped: Vec<u32> = Vec::new();

    let eligible = |int: &VgicInt, s: &VgicIntState| {
        let wanted = if pending_only {
            s.state.is_pending()
        } else {
            s.state != IrqState::Invalid
        };
        wanted
            && s.enabled
            && s.owner.map_or(true, |o| o == vcpu)
            && routing::vcpu_targets(vm, int, s) & (1 << vcpu) != 0
    };

    while first_free_lr(cpu).is_some() {
        let Some(id) = spilled::highest_prio(cpu, &skipped, eligible) else {
            let gich = cpu.gich();
            gich.set_hcr(gich.hcr() - (IchHcr::NPIE | IchHcr::UIE));
            return;
        };
        let Some(int) = vm.get_int(vcpu, id) else {
            skipped.push(id);
            continue;
        };

        let mut s = int.lock();
        let added = s.spilled
            && eligible(int, &s)
            && ownership::try_acquire(vcpu, &mut s)
            && add_lr(cpu, int, &mut s);
        if !added {
            // Raced with another core; try the next candidate.
            ownership::release(vcpu, vm.vgic.version, int, &mut s);
            skipped.push(id);
        }
    }
}

/// Complete a guest EOI that matched no list register: the highest
/// priority spilled active interrupt is the one being deactivated.
pub fn eoi_spilled_active(cpu: &Pcpu) {
    let vcpu = cpu.vcpu_id();
    let vm = cpu.vm();
    let Some(id) = spilled::highest_prio(cpu, &[], |_, s| {
        s.state.is_active() && s.owner.map_or(true, |o| o == vcpu)
    }) else {
        return;
    };
    let Some(int) = vm.get_int(vcpu, id) else {
        return;
    };

    let mut s = int.lock();
    if !s.spilled || !ownership::try_acquire(vcpu, &mut s) {
        return;
    }
    s.state = s.state.with_active(false);
    if s.hw {
        vm.gic().set_active(int.id, false);
    }
    if s.state == IrqState::Invalid {
        spilled::unspill(vm, int, &mut s);
    } else {
        routing::route(cpu, int, &mut s);
    }
    ownership::release(vcpu, vm.vgic.version, int, &mut s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::PhysRoute;

    #[test]
    fn hw_lr_drops_pending_half() {
        let int = VgicInt::shared(40, PhysRoute::Invalid);
        let mut s = int.lock();
        s.hw = true;
        s.prio = 0xA0;
        s.state = IrqState::PendingActive;
        let lr = ListReg::new(40, &s, false);
        assert!(lr.is_hw());
        assert_eq!(lr.state(), IrqState::Active);
        assert_eq!(lr.prio(), 0xA0);
        assert_eq!((lr.0 & ich::LR_PINTID_MASK) >> ich::LR_PINTID_SHIFT, 40);
    }

    #[test]
    fn shared_software_lr_requests_eoi_maintenance() {
        let int = VgicInt::shared(45, PhysRoute::Invalid);
        let mut s = int.lock();
        s.state = IrqState::Pending;
        s.group1 = true;
        let lr = ListReg::new(45, &s, false);
        assert_ne!(lr.0 & ich::LR_EOI, 0);
        assert_ne!(lr.0 & ich::LR_GROUP1, 0);
        assert_eq!(lr.vintid(), 45);

        let private = ListReg::new(27, &s, true);
        assert_eq!(private.0 & ich::LR_EOI, 0);
    }

    #[test]
    fn legacy_sgi_takes_one_requester_at_a_time() {
        let int = VgicInt::private(3, 0, 0, crate::config::GicVersion::V2);
        let mut s = int.lock();
        s.state = IrqState::Pending;
        s.sgi_sources = 0b0110;

        let lr = ListReg::legacy_sgi(3, &mut s);
        assert_eq!(lr.vintid(), 3);
        assert_eq!(lr.sgi_source(), 1);
        assert_eq!(lr.state(), IrqState::Pending);
        assert_ne!(lr.0 & ich::LR_EOI, 0);
        assert_eq!(s.sgi_sources, 0b0100);

        let lr = ListReg::legacy_sgi(3, &mut s);
        assert_eq!(lr.sgi_source(), 2);
        assert_eq!(lr.0 & ich::LR_EOI, 0);
        assert_eq!(s.sgi_sources, 0);

        // An active instance keeps its requester and leaves the rest
        // waiting.
        s.state = IrqState::PendingActive;
        s.sgi_active_source = 5;
        s.sgi_sources = 0b1;
        let lr = ListReg::legacy_sgi(3, &mut s);
        assert_eq!(lr.state(), IrqState::Active);
        assert_eq!(lr.sgi_source(), 5);
        assert_eq!(s.sgi_sources, 0b1);
        assert_ne!(lr.0 & ich::LR_EOI, 0);
    }
}
