//! Spill lists.
//!
//! Interrupts that are pending or active but hold no list register wait
//! here: private ones on their vCPU's list, shared ones on the VM's.
//! List locks are leaves: taken after the interrupt lock, never held
//! while taking another lock.

use alloc::vec::Vec;
use log::trace;

use super::interrupt::{VgicInt, VgicIntState};
use crate::arch::ich::IchHcr;
use crate::percpu::Pcpu;
use crate::sync::SpinLock;
use crate::vm::Vm;

pub struct SpillList {
    ids: SpinLock<Vec<u32>>,
}

impl SpillList {
    pub const fn new() -> Self {
        Self { ids: SpinLock::new(Vec::new()) }
    }

    fn push(&self, id: u32) {
        let mut ids = self.ids.lock();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn remove(&self, id: u32) {
        self.ids.lock().retain(|&i| i != id);
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.ids.lock().clone()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SpillList {
    fn default() -> Self {
        Self::new()
    }
}

fn list_for<'a>(vm: &'a Vm, int: &VgicInt) -> Option<&'a SpillList> {
    match int.home {
        Some(vcpu) => vm.vcpu(vcpu).map(|v| &v.vgic.spilled),
        None => Some(&vm.vgic.spilled),
    }
}

/// Park an interrupt that lost (or never got) a list register, and arm
/// the maintenance interrupt that will bring it back.
pub fn spill(cpu: &Pcpu, int: &VgicInt, s: &mut VgicIntState) {
    if !s.spilled {
        if let Some(list) = list_for(cpu.vm(), int) {
            list.push(int.id);
            s.spilled = true;
            trace!("vgic: cpu {} spilled int {} ({:?})", cpu.id, int.id, s.state);
        }
    }

    let mut hcr = cpu.gich().hcr();
    if s.state.is_pending() {
        hcr |= IchHcr::NPIE;
    }
    if s.state.is_active() {
        hcr |= IchHcr::UIE;
    }
    cpu.gich().set_hcr(hcr);
}

pub fn unspill(vm: &Vm, int: &VgicInt, s: &mut VgicIntState) {
    if !s.spilled {
        return;
    }
    if let Some(list) = list_for(vm, int) {
        list.remove(int.id);
    }
    s.spilled = false;
}

/// Pick the highest priority (lowest value, then lowest id) spilled
/// interrupt this vCPU can see that satisfies `pred`.
///
/// Lists are snapshotted under their own lock; each candidate is then
/// inspected under its interrupt lock alone.
pub fn highest_prio<F>(cpu: &Pcpu, skip: &[u32], pred: F) -> Option<u32>
where
    F: Fn(&VgicInt, &VgicIntState) -> bool,
{
    let vm = cpu.vm();
    let private = cpu.vcpu().vgic.spilled.snapshot();
    let shared = vm.vgic.spilled.snapshot();

    let mut best: Option<(u8, u32)> = None;
    for id in private.into_iter().chain(shared) {
        if skip.contains(&id) {
            continue;
        }
        let Some(int) = vm.get_int(cpu.vcpu_id(), id) else {
            continue;
        };
        let s = int.lock();
        if !s.spilled || !pred(int, &s) {
            continue;
        }
        if best.map_or(true, |b| (s.prio, id) < b) {
            best = Some((s.prio, id));
        }
    }
    best.map(|(_, id)| id)
}
