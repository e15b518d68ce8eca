/// Virtual GIC Redistributor (GICR)
///
/// One 128KB region per vCPU:
///   - RD frame   (0x00000..0x0FFFF): CTLR, IIDR, TYPER, STATUSR, WAKER, ID
///   - SGI frame  (0x10000..0x1FFFF): the banked SGI/PPI registers, laid out
///     like the distributor's first register of each group
///
/// Any vCPU may program any redistributor; the frame's vCPU picks the
/// private bank, not the vCPU doing the access.

use log::warn;

use super::distributor::{id_access, GIC_IIDR};
use super::regs::{self, RegGroup};
use crate::arch::GuestRegs;
use crate::config::GicVersion;
use crate::devices::EmulAccess;
use crate::percpu::Pcpu;
use crate::platform::GICR_STRIDE;

const SGI_FRAME: u64 = 0x10000;

// ── RD frame register offsets ────────────────────────────────────────
const GICR_CTLR: u64 = 0x0000;
const GICR_IIDR: u64 = 0x0004;
const GICR_TYPER: u64 = 0x0008; // 64-bit
const GICR_TYPER_HI: u64 = 0x000C;
const GICR_STATUSR: u64 = 0x0010;
const GICR_WAKER: u64 = 0x0014;
const GICR_ID_BASE: u64 = 0xFFD0;

/// ProcessorSleep=1, ChildrenAsleep=1 at reset
pub const WAKER_RESET: u32 = 0x6;
const WAKER_PROCESSOR_SLEEP: u32 = 1 << 1;
const WAKER_CHILDREN_ASLEEP: u32 = 1 << 2;

/// Per-redistributor state outside the interrupt records.
pub struct GicrState {
    pub waker: u32,
}

impl GicrState {
    pub const fn new() -> Self {
        Self { waker: WAKER_RESET }
    }
}

impl Default for GicrState {
    fn default() -> Self {
        Self::new()
    }
}

/// Build GICR_TYPER value for a given vCPU
///
/// GICR_TYPER layout (GICv3 architecture):
///   [63:32] Affinity_Value (Aff3[63:56], Aff2[55:48], Aff1[47:40], Aff0[39:32])
///   [23:8]  Processor_Number
///   [4]     Last (1 = last redistributor in this series)
pub fn typer_value(vcpu_id: usize, num_vcpus: usize) -> u64 {
    let aff0 = (vcpu_id as u64) << 32;
    let proc_num = (vcpu_id as u64) << 8;
    let last = if vcpu_id + 1 == num_vcpus { 1u64 << 4 } else { 0 };
    aff0 | proc_num | last
}

/// Emulate a trapped access to the redistributor windows.
pub fn gicr_access(cpu: &Pcpu, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
    let vm = cpu.vm();
    if vm.vgic.version != GicVersion::V3 {
        return false;
    }
    let off = acc.addr.wrapping_sub(vm.vgic.gicr_base);
    let vcpu_id = (off / GICR_STRIDE) as usize;
    let Some(vcpu) = vm.vcpu(vcpu_id) else {
        warn!("vgic: GICR access at {:#x} beyond the last redistributor", acc.addr);
        return false;
    };
    let frame_off = off % GICR_STRIDE;

    let mut gicr = vcpu.vgic.gicr.lock();
    if frame_off < SGI_FRAME {
        rd_access(cpu, vcpu_id, &mut gicr, frame_off, acc, regs)
    } else {
        sgi_access(cpu, vcpu_id, frame_off - SGI_FRAME, acc, regs)
    }
}

fn rd_access(
    cpu: &Pcpu,
    vcpu_id: usize,
    st: &mut GicrState,
    off: u64,
    acc: &EmulAccess,
    regs: &mut dyn GuestRegs,
) -> bool {
    let wide = off == GICR_TYPER && acc.width == 8;
    if !(acc.width == 4 || wide) || off % acc.width as u64 != 0 {
        warn!("vgic: bad {}-byte GICR access at {:#x}", acc.width, off);
        return false;
    }
    if off >= GICR_ID_BASE {
        return id_access(GicVersion::V3, off, acc, regs);
    }

    if acc.write {
        if off == GICR_WAKER {
            // Only ProcessorSleep is writable; ChildrenAsleep follows it.
            st.waker = if regs.get_reg(acc.reg) as u32 & WAKER_PROCESSOR_SLEEP != 0 {
                WAKER_PROCESSOR_SLEEP | WAKER_CHILDREN_ASLEEP
            } else {
                0
            };
        }
        return true;
    }

    let typer = typer_value(vcpu_id, cpu.vm().vcpu_count());
    let val = match off {
        GICR_CTLR | GICR_STATUSR => 0,
        GICR_IIDR => GIC_IIDR as u64,
        GICR_TYPER if wide => typer,
        GICR_TYPER => typer & 0xFFFF_FFFF,
        GICR_TYPER_HI => typer >> 32,
        GICR_WAKER => st.waker as u64,
        _ => 0,
    };
    regs::write_back(regs, acc, val);
    true
}

fn sgi_access(cpu: &Pcpu, vcpu_id: usize, off: u64, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
    let Some(info) = regs::lookup(off) else {
        return regs::razwi(regs, acc);
    };
    if !info.access_ok(acc) {
        warn!("vgic: bad {}-byte GICR SGI frame access at {:#x}", acc.width, off);
        return false;
    }
    match info.group {
        RegGroup::Igroupr
        | RegGroup::Isenabler
        | RegGroup::Icenabler
        | RegGroup::Ispendr
        | RegGroup::Icpendr
        | RegGroup::Isactiver
        | RegGroup::Icactiver
        | RegGroup::Ipriorityr
        | RegGroup::Icfgr => regs::generic_access(cpu, info, off, acc, regs, Some(vcpu_id)),
        _ => regs::razwi(regs, acc),
    }
}
