/// Virtual GIC Distributor (GICD)
///
/// Global registers (CTLR, TYPER, IIDR), the banked per-interrupt groups,
/// GICv3 IROUTER, GICv2 SGIR and the ID block. The whole window is
/// serialised by the VM's distributor lock; per-interrupt locks are taken
/// underneath it.

use log::warn;

use super::interrupt::is_private;
use super::msg::{self, VgicEvent, VgicMsgData};
use super::regs::{self, RegGroup, RegGroupInfo};
use super::GicdState;
use crate::arch::GuestRegs;
use crate::config::GicVersion;
use crate::devices::EmulAccess;
use crate::percpu::Pcpu;
use crate::platform::GICD_SIZE;

const GICD_CTLR: u64 = 0x000;
const GICD_TYPER: u64 = 0x004;
const GICD_IIDR: u64 = 0x008;
const GICD_IROUTER_BASE: u64 = 0x6000;

/// EnableGrp0 | EnableGrp1 (GICv2), EnableGrp1NS on GICv3.
pub const CTLR_ENABLE_MASK: u32 = 0b11;
/// Affinity routing, always on for GICv3 guests.
pub const CTLR_ARE_NS: u32 = 1 << 4;
/// Implementer: ARM (0x43B), revision 0, variant 0, product 0
pub const GIC_IIDR: u32 = 0x0000_043B;

/// GICv2 ID block sits at 0xFD0 of its 4K window.
const V2_ID_BASE: u64 = 0xFD0;
const V2_ID_END: u64 = 0x1000;

const SGIR_FILTER_LIST: u64 = 0;
const SGIR_FILTER_OTHERS: u64 = 1;
const SGIR_FILTER_SELF: u64 = 2;

/// GICD_TYPER for `nr_irqs` lines and `vcpus` CPUs.
///
/// ITLinesNumber[4:0] = ceil(N/32) - 1, CPUNumber[7:5] = vCPUs - 1 and,
/// for GICv3, IDbits[23:19] = 9 (10 bit INTIDs, no LPIs).
pub fn typer_value(version: GicVersion, nr_irqs: usize, vcpus: usize) -> u32 {
    let it_lines = (nr_irqs.div_ceil(32) as u32).saturating_sub(1) & 0x1F;
    let cpu_num = (vcpus.saturating_sub(1) as u32 & 0x7) << 5;
    let id_bits = match version {
        GicVersion::V3 => 9 << 19,
        GicVersion::V2 => 0,
    };
    it_lines | cpu_num | id_bits
}

/// Peripheral/component ID registers, keyed by offset within the last 4K.
/// PIDR2.ArchRev[7:4] reports the GIC version.
pub fn id_reg(version: GicVersion, off: u64) -> u32 {
    match off & 0xFFF {
        0xFE8 => match version {
            GicVersion::V2 => 0x20,
            GicVersion::V3 => 0x30,
        },
        0xFF0 => 0x0D,
        0xFF4 => 0xF0,
        0xFF8 => 0x05,
        0xFFC => 0xB1,
        _ => 0,
    }
}

pub(super) fn id_access(version: GicVersion, off: u64, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
    if !acc.write {
        regs::write_back(regs, acc, id_reg(version, off) as u64);
    }
    true
}

/// Emulate a trapped access to the distributor window.
pub fn gicd_access(cpu: &Pcpu, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
    let vgic = &cpu.vm().vgic;
    let off = acc.addr.wrapping_sub(vgic.gicd_base);
    if off >= GICD_SIZE {
        return false;
    }

    if vgic.version == GicVersion::V2 && (V2_ID_BASE..V2_ID_END).contains(&off) {
        if acc.width != 4 || off % 4 != 0 {
            return false;
        }
        return id_access(vgic.version, off, acc, regs);
    }

    let Some(info) = regs::lookup(off) else {
        warn!("vgic: GICD access to unimplemented offset {:#x}", off);
        return false;
    };
    if !info.access_ok(acc) {
        warn!("vgic: bad {}-byte GICD access at {:#x}", acc.width, off);
        return false;
    }

    let mut gicd = vgic.gicd.lock();
    dispatch(cpu, info, off, acc, regs, &mut gicd)
}

fn dispatch(
    cpu: &Pcpu,
    info: &RegGroupInfo,
    off: u64,
    acc: &EmulAccess,
    regs: &mut dyn GuestRegs,
    gicd: &mut GicdState,
) -> bool {
    let version = cpu.vm().vgic.version;
    match (info.group, version) {
        (RegGroup::Misc, _) => misc_access(cpu, gicd, off, acc, regs),
        (RegGroup::Id, _) => id_access(version, off, acc, regs),
        (RegGroup::Sgir, GicVersion::V2) => sgir_access(cpu, acc, regs),
        (RegGroup::Irouter, GicVersion::V3) => irouter_access(cpu, off, acc, regs),
        (RegGroup::Itargetsr | RegGroup::Cpendsgir | RegGroup::Spendsgir, GicVersion::V2) => {
            regs::generic_access(cpu, info, off, acc, regs, None)
        }
        (RegGroup::Sgir | RegGroup::Irouter | RegGroup::Itargetsr, _)
        | (RegGroup::Cpendsgir | RegGroup::Spendsgir, _)
        | (RegGroup::Igrpmodr | RegGroup::Nsacr, _) => regs::razwi(regs, acc),
        _ => regs::generic_access(cpu, info, off, acc, regs, None),
    }
}

fn misc_access(
    cpu: &Pcpu,
    gicd: &mut GicdState,
    off: u64,
    acc: &EmulAccess,
    regs: &mut dyn GuestRegs,
) -> bool {
    let vm = cpu.vm();
    if !acc.write {
        let val = match off {
            GICD_CTLR => match vm.vgic.version {
                GicVersion::V3 => gicd.ctlr | CTLR_ARE_NS,
                GicVersion::V2 => gicd.ctlr,
            },
            GICD_TYPER => vm.vgic.typer,
            GICD_IIDR => GIC_IIDR,
            _ => 0,
        };
        regs::write_back(regs, acc, val as u64);
        return true;
    }

    if off == GICD_CTLR {
        let prev = gicd.ctlr;
        gicd.ctlr = regs.get_reg(acc.reg) as u32 & CTLR_ENABLE_MASK;
        let enabled = gicd.ctlr != 0;
        if enabled != (prev != 0) {
            cpu.set_vgic_enable(enabled);
            let data = VgicMsgData { vm_id: vm.id, vgicr: cpu.vcpu_id(), intid: 0, group: 0, value: 0 };
            msg::broadcast(cpu, VgicEvent::UpdateEnable, data);
        }
    }
    true
}

/// GICv2 software generated interrupt register (write only).
fn sgir_access(cpu: &Pcpu, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
    if !acc.write {
        return regs::razwi(regs, acc);
    }
    let val = regs.get_reg(acc.reg);
    let vm = cpu.vm();
    let me = 1u64 << cpu.vcpu_id();
    let intid = (val & 0xF) as u32;
    let targets = match (val >> 24) & 0b11 {
        SGIR_FILTER_LIST => (val >> 16) & 0xFF,
        SGIR_FILTER_OTHERS => vm.vcpu_mask() & !me,
        SGIR_FILTER_SELF => me,
        _ => 0,
    };
    super::send_sgi(cpu, intid, targets & vm.vcpu_mask());
    true
}

/// GICv3 IROUTER<n>: one 64-bit register per SPI, reachable as a dword
/// or as two words.
fn irouter_access(cpu: &Pcpu, off: u64, acc: &EmulAccess, regs: &mut dyn GuestRegs) -> bool {
    let vm = cpu.vm();
    let id = ((off - GICD_IROUTER_BASE) / 8) as u32;
    if id as usize >= vm.vgic.nr_irqs {
        warn!("vgic: IROUTER of unimplemented int {}", id);
        return false;
    }
    if is_private(id) {
        return regs::razwi(regs, acc);
    }
    let Some(int) = vm.get_int(cpu.vcpu_id(), id) else {
        return false;
    };

    let upper = off & 0x4 != 0;
    let route = int.lock().route;
    if !acc.write {
        let val = match (acc.width, upper) {
            (8, _) => route,
            (_, false) => route & 0xFFFF_FFFF,
            (_, true) => route >> 32,
        };
        regs::write_back(regs, acc, val);
        return true;
    }

    let val = regs.get_reg(acc.reg);
    let new = match (acc.width, upper) {
        (8, _) => val,
        (_, false) => (route & 0xFFFF_FFFF_0000_0000) | (val & 0xFFFF_FFFF),
        (_, true) => (route & 0x0000_0000_FFFF_FFFF) | (val << 32),
    };
    regs::set_field(cpu, RegGroup::Irouter, int, new);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typer_encodes_lines_and_cpus() {
        assert_eq!(typer_value(GicVersion::V3, 64, 2), 1 | (1 << 5) | (9 << 19));
        assert_eq!(typer_value(GicVersion::V2, 96, 4), 2 | (3 << 5));
        assert_eq!(typer_value(GicVersion::V2, 50, 1), 1);
    }

    #[test]
    fn id_block_matches_both_layouts() {
        assert_eq!(id_reg(GicVersion::V3, 0xFFE8), 0x30);
        assert_eq!(id_reg(GicVersion::V2, 0xFE8), 0x20);
        assert_eq!(id_reg(GicVersion::V3, 0xFFFC), 0xB1);
        assert_eq!(id_reg(GicVersion::V3, 0xFFD0), 0);
    }
}
