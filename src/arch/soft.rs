//! Software model of the GIC hardware seams.
//!
//! `SoftVirtualInterface` keeps real ICH_LR<n> values and derives
//! ELRSR/EISR/MISR from them the way the CPU interface does, so the vGIC
//! core runs unmodified on a host. `guest_ack`/`guest_eoi` play the part
//! of the guest's ICC_IAR1/ICC_EOIR1 accesses. `SoftGic` records what the
//! core pushes to the physical distributor.

use alloc::vec;
use alloc::vec::Vec;

use super::ich::{self, IchHcr, IchMisr};
use super::traits::{PhysRoute, PhysicalGic, VirtualInterface};
use crate::platform::{GIC_MAX_INTERRUPTS, MAX_LIST_REGS};
use crate::sync::SpinLock;

const STATE_PENDING: u64 = 1 << ich::LR_STATE_SHIFT;
const STATE_ACTIVE: u64 = 2 << ich::LR_STATE_SHIFT;

struct SoftLrs {
    lrs: Vec<u64>,
    hcr: IchHcr,
}

pub struct SoftVirtualInterface {
    inner: SpinLock<SoftLrs>,
}

impl SoftVirtualInterface {
    pub fn new(num_lrs: usize) -> Self {
        let num_lrs = num_lrs.clamp(1, MAX_LIST_REGS);
        Self {
            inner: SpinLock::new(SoftLrs {
                lrs: vec![0; num_lrs],
                hcr: IchHcr::empty(),
            }),
        }
    }

    /// Guest reads ICC_IAR1: the highest priority pending-only LR becomes
    /// active. Returns its vINTID, which for a GICv2 SGI carries the
    /// requesting CPU in bits [12:10] as GICC_IAR does.
    pub fn guest_ack(&self) -> Option<u32> {
        let mut hw = self.inner.lock();
        if !hw.hcr.contains(IchHcr::EN) {
            return None;
        }
        let best = hw
            .lrs
            .iter()
            .enumerate()
            .filter(|(_, &lr)| lr & ich::LR_STATE_MASK == STATE_PENDING)
            .min_by_key(|(_, &lr)| ((lr >> ich::LR_PRIO_SHIFT) & 0xFF, lr & ich::LR_VINTID_MASK))
            .map(|(i, _)| i)?;
        let lr = &mut hw.lrs[best];
        *lr = (*lr & !ich::LR_STATE_MASK) | STATE_ACTIVE;
        Some((*lr & ich::LR_VINTID_MASK) as u32)
    }

    /// Guest writes ICC_EOIR1 with EOImode 0 (drop + deactivate). An EOI
    /// that matches no active LR bumps ICH_HCR.EOIcount.
    pub fn guest_eoi(&self, intid: u32) {
        let mut guard = self.inner.lock();
        let hw = &mut *guard;
        let slot = hw.lrs.iter_mut().find(|lr| {
            **lr & ich::LR_VINTID_MASK == intid as u64 && **lr & STATE_ACTIVE != 0
        });
        match slot {
            Some(lr) => *lr &= !STATE_ACTIVE,
            None => {
                let count = (hw.hcr.eoi_count() + 1) & 0x1F;
                let bits = (hw.hcr.bits() & !IchHcr::EOICOUNT.bits())
                    | (count << IchHcr::EOICOUNT_SHIFT);
                hw.hcr = IchHcr::from_bits_retain(bits);
            }
        }
    }

    /// INTIDs currently held in a non-empty LR, in LR order.
    pub fn resident(&self) -> Vec<u32> {
        self.inner
            .lock()
            .lrs
            .iter()
            .filter(|&&lr| lr & ich::LR_STATE_MASK != 0)
            .map(|&lr| (lr & ich::LR_INTID_MASK) as u32)
            .collect()
    }
}

impl VirtualInterface for SoftVirtualInterface {
    fn num_lrs(&self) -> usize {
        self.inner.lock().lrs.len()
    }

    fn read_lr(&self, n: usize) -> u64 {
        self.inner.lock().lrs.get(n).copied().unwrap_or(0)
    }

    fn write_lr(&self, n: usize, value: u64) {
        if let Some(lr) = self.inner.lock().lrs.get_mut(n) {
            *lr = value;
        }
    }

    fn elrsr(&self) -> u64 {
        self.inner
            .lock()
            .lrs
            .iter()
            .enumerate()
            .filter(|(_, &lr)| ich::lr_is_empty(lr))
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }

    fn eisr(&self) -> u64 {
        self.inner
            .lock()
            .lrs
            .iter()
            .enumerate()
            .filter(|(_, &lr)| ich::lr_needs_eoi(lr))
            .fold(0, |acc, (i, _)| acc | (1 << i))
    }

    fn misr(&self) -> IchMisr {
        let hw = self.inner.lock();
        let mut misr = IchMisr::empty();
        if hw.lrs.iter().any(|&lr| ich::lr_needs_eoi(lr)) {
            misr |= IchMisr::EOI;
        }
        let valid = hw.lrs.iter().filter(|&&lr| lr & ich::LR_STATE_MASK != 0).count();
        if hw.hcr.contains(IchHcr::UIE) && valid <= 1 {
            misr |= IchMisr::U;
        }
        if hw.hcr.contains(IchHcr::LRENPIE) && hw.hcr.eoi_count() != 0 {
            misr |= IchMisr::LRENP;
        }
        let any_pending = hw.lrs.iter().any(|&lr| lr & STATE_PENDING != 0);
        if hw.hcr.contains(IchHcr::NPIE) && !any_pending {
            misr |= IchMisr::NP;
        }
        misr
    }

    fn hcr(&self) -> IchHcr {
        self.inner.lock().hcr
    }

    fn set_hcr(&self, hcr: IchHcr) {
        self.inner.lock().hcr = hcr;
    }
}

/// Snapshot of one physical interrupt line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SoftLine {
    pub enabled: bool,
    pub prio: u8,
    pub cfg: u8,
    pub pending: bool,
    pub active: bool,
    pub route: PhysRoute,
}

struct SoftGicState {
    lines: Vec<SoftLine>,
    enable_writes: usize,
    sgis: Vec<(usize, u32)>,
}

/// Recording physical distributor.
pub struct SoftGic {
    inner: SpinLock<SoftGicState>,
}

impl SoftGic {
    pub fn new() -> Self {
        let line = SoftLine {
            enabled: false,
            prio: 0,
            cfg: 0,
            pending: false,
            active: false,
            route: PhysRoute::Invalid,
        };
        Self {
            inner: SpinLock::new(SoftGicState {
                lines: vec![line; GIC_MAX_INTERRUPTS],
                enable_writes: 0,
                sgis: Vec::new(),
            }),
        }
    }

    pub fn line(&self, intid: u32) -> Option<SoftLine> {
        self.inner.lock().lines.get(intid as usize).copied()
    }

    /// Number of enable/disable writes pushed so far.
    pub fn enable_writes(&self) -> usize {
        self.inner.lock().enable_writes
    }

    /// Every physical SGI raised so far, as (target cpu, sgi).
    pub fn sent_sgis(&self) -> Vec<(usize, u32)> {
        self.inner.lock().sgis.clone()
    }

    fn with_line(&self, intid: u32, f: impl FnOnce(&mut SoftLine)) {
        if let Some(line) = self.inner.lock().lines.get_mut(intid as usize) {
            f(line);
        }
    }
}

impl Default for SoftGic {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalGic for SoftGic {
    fn set_enable(&self, intid: u32, enable: bool) {
        self.inner.lock().enable_writes += 1;
        self.with_line(intid, |l| l.enabled = enable);
    }

    fn set_priority(&self, intid: u32, prio: u8) {
        self.with_line(intid, |l| l.prio = prio);
    }

    fn set_config(&self, intid: u32, cfg: u8) {
        self.with_line(intid, |l| l.cfg = cfg);
    }

    fn set_pending(&self, intid: u32, pending: bool) {
        self.with_line(intid, |l| l.pending = pending);
    }

    fn set_active(&self, intid: u32, active: bool) {
        self.with_line(intid, |l| l.active = active);
    }

    fn set_route(&self, intid: u32, route: PhysRoute) {
        self.with_line(intid, |l| l.route = route);
    }

    fn send_sgi(&self, cpu: usize, sgi: u32) {
        self.inner.lock().sgis.push((cpu, sgi));
    }
}
