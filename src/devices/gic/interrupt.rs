//! Per-interrupt records.
//!
//! One `VgicInt` exists per implemented interrupt: shared interrupts live
//! in the VM's distributor, SGIs and PPIs in each vCPU's private bank.
//! Everything mutable sits behind the interrupt's own lock.

use crate::arch::PhysRoute;
use crate::config::GicVersion;
use crate::platform::{GIC_MAX_SGIS, GIC_PRIVATE_INTERRUPTS};
use crate::sync::{SpinLock, SpinLockGuard};

/// Implemented priority bits (GIC-400 / 5-bit ICH_VTR.PRIbits).
pub const PRIO_MASK: u8 = 0xF8;
/// ICFGR field value for edge-triggered.
pub const CFG_EDGE: u8 = 0b10;
/// IROUTER bits a guest may set: IRM and Aff2..Aff0. Aff3 is RAZ/WI.
pub const IROUTER_MASK: u64 = 0x8000_0000 | 0x00FF_FFFF;
pub const IROUTER_IRM: u64 = 1 << 31;

pub const fn is_private(intid: u32) -> bool {
    (intid as usize) < GIC_PRIVATE_INTERRUPTS
}

pub const fn is_sgi(intid: u32) -> bool {
    (intid as usize) < GIC_MAX_SGIS
}

/// Pending/active state, encoded like the ICH_LR State field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum IrqState {
    #[default]
    Invalid = 0b00,
    Pending = 0b01,
    Active = 0b10,
    PendingActive = 0b11,
}

impl IrqState {
    pub const fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0b00 => IrqState::Invalid,
            0b01 => IrqState::Pending,
            0b10 => IrqState::Active,
            _ => IrqState::PendingActive,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub const fn is_pending(self) -> bool {
        self.bits() & 0b01 != 0
    }

    pub const fn is_active(self) -> bool {
        self.bits() & 0b10 != 0
    }

    pub const fn with_pending(self, pending: bool) -> Self {
        let bits = if pending { self.bits() | 0b01 } else { self.bits() & !0b01 };
        Self::from_bits(bits as u64)
    }

    pub const fn with_active(self, active: bool) -> Self {
        let bits = if active { self.bits() | 0b10 } else { self.bits() & !0b10 };
        Self::from_bits(bits as u64)
    }
}

/// Mutable part of an interrupt. Only touched with `VgicInt::lock` held.
#[derive(Clone, Debug)]
pub struct VgicIntState {
    /// vCPU allowed to place this interrupt in its list registers.
    pub owner: Option<usize>,
    /// Software copy; stale while `in_lr` (the LR holds the truth).
    pub state: IrqState,
    pub enabled: bool,
    pub prio: u8,
    pub cfg: u8,
    pub group1: bool,
    /// GICv2 ITARGETSR, bit n = vCPU n.
    pub targets: u8,
    /// GICv3 IROUTER, Aff0 = vCPU id.
    pub route: u64,
    /// Physical delivery derived from `targets`/`route`.
    pub phys: PhysRoute,
    /// Backed by the physical line with the same INTID.
    pub hw: bool,
    pub in_lr: bool,
    pub lr: usize,
    /// Sitting on a spill list.
    pub spilled: bool,
    /// GICv2 SGI: vCPUs with a request not yet in a list register.
    pub sgi_sources: u8,
    /// GICv2 SGI: requester of the active instance.
    pub sgi_active_source: u8,
}

pub struct VgicInt {
    pub id: u32,
    /// vCPU whose private bank holds this interrupt.
    pub home: Option<usize>,
    state: SpinLock<VgicIntState>,
}

impl VgicInt {
    /// A shared interrupt, delivered to vCPU 0 until the guest says otherwise.
    pub fn shared(id: u32, phys: PhysRoute) -> Self {
        Self {
            id,
            home: None,
            state: SpinLock::new(VgicIntState {
                owner: None,
                state: IrqState::Invalid,
                enabled: false,
                prio: 0,
                cfg: 0,
                group1: false,
                targets: 1,
                route: 0,
                phys,
                hw: false,
                in_lr: false,
                lr: 0,
                spilled: false,
                sgi_sources: 0,
                sgi_active_source: 0,
            }),
        }
    }

    /// An SGI/PPI of `vcpu`, owned by it from the start.
    pub fn private(id: u32, vcpu: usize, pcpu: usize, version: GicVersion) -> Self {
        let sgi = is_sgi(id);
        Self {
            id,
            home: Some(vcpu),
            state: SpinLock::new(VgicIntState {
                owner: Some(vcpu),
                state: IrqState::Invalid,
                // GICv2 SGIs cannot be disabled.
                enabled: sgi && version == GicVersion::V2,
                prio: 0,
                cfg: if sgi { CFG_EDGE } else { 0 },
                group1: false,
                targets: 1 << vcpu,
                route: vcpu as u64,
                phys: PhysRoute::Cpu(pcpu),
                hw: false,
                in_lr: false,
                lr: 0,
                spilled: false,
                sgi_sources: 0,
                sgi_active_source: 0,
            }),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, VgicIntState> {
        self.state.lock()
    }

    pub fn is_private(&self) -> bool {
        self.home.is_some()
    }

    pub fn is_sgi(&self) -> bool {
        is_sgi(self.id)
    }
}
