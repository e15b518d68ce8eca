//! GICv3 virtual CPU interface register layouts.

use bitflags::bitflags;

bitflags! {
    /// ICH_HCR_EL2
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IchHcr: u32 {
        /// Virtual CPU interface enable.
        const EN = 1 << 0;
        /// Underflow maintenance interrupt enable.
        const UIE = 1 << 1;
        /// EOI of an interrupt not in the list registers.
        const LRENPIE = 1 << 2;
        /// No-pending maintenance interrupt enable.
        const NPIE = 1 << 3;
        const VGRP0EIE = 1 << 4;
        const VGRP0DIE = 1 << 5;
        const VGRP1EIE = 1 << 6;
        const VGRP1DIE = 1 << 7;
        const EOICOUNT = 0x1F << 27;
    }
}

impl IchHcr {
    pub const EOICOUNT_SHIFT: u32 = 27;

    /// Guest EOIs that found no matching list register.
    pub fn eoi_count(self) -> u32 {
        (self.bits() & Self::EOICOUNT.bits()) >> Self::EOICOUNT_SHIFT
    }
}

bitflags! {
    /// ICH_MISR_EL2
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IchMisr: u32 {
        const EOI = 1 << 0;
        const U = 1 << 1;
        const LRENP = 1 << 2;
        const NP = 1 << 3;
        const VGRP0E = 1 << 4;
        const VGRP0D = 1 << 5;
        const VGRP1E = 1 << 6;
        const VGRP1D = 1 << 7;
    }
}

// ICH_LR<n>_EL2 fields
pub const LR_STATE_SHIFT: u32 = 62;
pub const LR_STATE_MASK: u64 = 0b11 << LR_STATE_SHIFT;
pub const LR_HW: u64 = 1 << 61;
pub const LR_GROUP1: u64 = 1 << 60;
pub const LR_PRIO_SHIFT: u32 = 48;
pub const LR_PINTID_SHIFT: u32 = 32;
pub const LR_PINTID_MASK: u64 = 0x1FFF << LR_PINTID_SHIFT;
/// Maintenance on EOI; only meaningful when HW is clear.
pub const LR_EOI: u64 = 1 << 41;
pub const LR_VINTID_MASK: u64 = 0xFFFF_FFFF;
/// INTID part of vINTID. For a GICv2 guest's SGI, bits [12:10] name the
/// requesting CPU, as GICD_IAR shows it.
pub const LR_INTID_MASK: u64 = 0x3FF;
pub const LR_SGI_SOURCE_SHIFT: u32 = 10;
pub const LR_SGI_SOURCE_MASK: u64 = 0x7 << LR_SGI_SOURCE_SHIFT;

/// True when the LR may be reused without losing anything
/// (ICH_ELRSR_EL2 semantics).
pub const fn lr_is_empty(lr: u64) -> bool {
    lr & LR_STATE_MASK == 0 && (lr & LR_HW != 0 || lr & LR_EOI == 0)
}

/// True when the LR completed and requested maintenance
/// (ICH_EISR_EL2 semantics).
pub const fn lr_needs_eoi(lr: u64) -> bool {
    lr & LR_STATE_MASK == 0 && lr & LR_HW == 0 && lr & LR_EOI != 0
}
