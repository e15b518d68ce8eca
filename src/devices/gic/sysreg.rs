//! GICv3 CPU interface registers trapped to EL2.

use log::warn;

use crate::arch::decode::{SysRegAccess, ICC_SGI1R_EL1, ICC_SRE_EL1};
use crate::arch::GuestRegs;
use crate::percpu::Pcpu;

/// SRE | DFB | DIB: system register interface only, bypass disabled.
pub const ICC_SRE_VALUE: u64 = 0x7;

const SGI1R_TARGETS_MASK: u64 = 0xFFFF;
const SGI1R_AFF1_SHIFT: u32 = 16;
const SGI1R_INTID_SHIFT: u32 = 24;
const SGI1R_AFF2_SHIFT: u32 = 32;
const SGI1R_IRM: u64 = 1 << 40;
const SGI1R_RS_SHIFT: u32 = 44;
const SGI1R_AFF3_SHIFT: u32 = 48;

/// vCPUs named by an ICC_SGI1R_EL1 value. vCPU n has affinity 0.0.0.n,
/// so a non-zero Aff1..Aff3 matches nobody.
pub fn sgi1r_targets(val: u64, me: usize, vcpu_mask: u64) -> u64 {
    if val & SGI1R_IRM != 0 {
        return vcpu_mask & !(1 << me);
    }
    let aff = ((val >> SGI1R_AFF1_SHIFT) & 0xFF)
        | ((val >> SGI1R_AFF2_SHIFT) & 0xFF)
        | ((val >> SGI1R_AFF3_SHIFT) & 0xFF);
    if aff != 0 {
        return 0;
    }
    let rs = (val >> SGI1R_RS_SHIFT) & 0xF;
    let list = val & SGI1R_TARGETS_MASK;
    // Range selector moves the list in 16-vCPU steps.
    match rs {
        0..=3 => (list << (rs * 16)) & vcpu_mask,
        _ => 0,
    }
}

/// Emulate a trapped MSR/MRS. Returns false for registers this module
/// does not own.
pub fn sysreg_access(cpu: &Pcpu, acc: &SysRegAccess, regs: &mut dyn GuestRegs) -> bool {
    match acc.id {
        ICC_SGI1R_EL1 => {
            if acc.read {
                // Write-only register.
                regs.set_reg(acc.reg, 0);
                return true;
            }
            let val = regs.get_reg(acc.reg);
            let intid = ((val >> SGI1R_INTID_SHIFT) & 0xF) as u32;
            let targets = sgi1r_targets(val, cpu.vcpu_id(), cpu.vm().vcpu_mask());
            super::send_sgi(cpu, intid, targets);
            true
        }
        ICC_SRE_EL1 => {
            if acc.read {
                regs.set_reg(acc.reg, ICC_SRE_VALUE);
            }
            true
        }
        other => {
            warn!("vgic: unhandled system register {:?}", other);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_list_and_broadcast() {
        // INTID 3 to vCPUs 1 and 2
        let val = (3 << SGI1R_INTID_SHIFT) | 0b110;
        assert_eq!(sgi1r_targets(val, 0, 0xF), 0b110);
        assert_eq!(sgi1r_targets(SGI1R_IRM, 1, 0xF), 0b1101);
        // Aff1 = 1 names a cluster nobody lives in.
        assert_eq!(sgi1r_targets((1 << SGI1R_AFF1_SHIFT) | 1, 0, 0xF), 0);
        // Targets beyond the VM are dropped.
        assert_eq!(sgi1r_targets(0xFF, 0, 0x3), 0x3);
        assert_eq!(sgi1r_targets((1 << SGI1R_RS_SHIFT) | 1, 0, 0xF), 0);
    }
}
