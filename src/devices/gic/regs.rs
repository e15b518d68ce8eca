//! Register groups and the per-interrupt field accessors behind them.
//!
//! Every banked register (one field per interrupt) goes through
//! `generic_access`: it splits the access into fields and hands each one
//! to `set_field` or `RegGroup::read_field` under the interrupt's lock.

use log::{trace, warn};

use super::interrupt::{VgicInt, VgicIntState, IrqState, CFG_EDGE, IROUTER_MASK, PRIO_MASK};
use super::msg::{self, VgicEvent, VgicMsgData};
use super::{list_regs, ownership, routing, spilled};
use crate::arch::GuestRegs;
use crate::config::GicVersion;
use crate::devices::EmulAccess;
use crate::percpu::Pcpu;
use crate::vm::Vm;

/// Register group. The discriminant travels in SET_REG messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RegGroup {
    Misc = 0,
    Igroupr = 1,
    Isenabler = 2,
    Icenabler = 3,
    Ispendr = 4,
    Icpendr = 5,
    Isactiver = 6,
    Icactiver = 7,
    Ipriorityr = 8,
    Itargetsr = 9,
    Icfgr = 10,
    Igrpmodr = 11,
    Nsacr = 12,
    Sgir = 13,
    Cpendsgir = 14,
    Spendsgir = 15,
    Irouter = 16,
    Id = 17,
}

const B: u8 = 1;
const W: u8 = 4;
const D: u8 = 8;

/// Static description of one register group.
#[derive(Clone, Copy, Debug)]
pub struct RegGroupInfo {
    pub group: RegGroup,
    /// Window offset of the first register.
    pub base: u64,
    pub size: u64,
    /// Allowed access sizes in bytes, OR'ed together.
    pub widths: u8,
    /// Bits per interrupt, 0 for registers that are not banked.
    pub field_width: u8,
}

const fn grp(group: RegGroup, base: u64, size: u64, widths: u8, field_width: u8) -> RegGroupInfo {
    RegGroupInfo { group, base, size, widths, field_width }
}

/// Distributor layout. The first eight entries tile 0x000..0x3FF in
/// 0x80 steps and are looked up by index.
pub static REG_GROUPS: [RegGroupInfo; 18] = [
    grp(RegGroup::Misc, 0x000, 0x80, W, 0),
    grp(RegGroup::Igroupr, 0x080, 0x80, W, 1),
    grp(RegGroup::Isenabler, 0x100, 0x80, W, 1),
    grp(RegGroup::Icenabler, 0x180, 0x80, W, 1),
    grp(RegGroup::Ispendr, 0x200, 0x80, W, 1),
    grp(RegGroup::Icpendr, 0x280, 0x80, W, 1),
    grp(RegGroup::Isactiver, 0x300, 0x80, W, 1),
    grp(RegGroup::Icactiver, 0x380, 0x80, W, 1),
    grp(RegGroup::Ipriorityr, 0x400, 0x400, B | W, 8),
    grp(RegGroup::Itargetsr, 0x800, 0x400, B | W, 8),
    grp(RegGroup::Icfgr, 0xC00, 0x100, W, 2),
    grp(RegGroup::Igrpmodr, 0xD00, 0x100, W, 1),
    grp(RegGroup::Nsacr, 0xE00, 0x100, W, 2),
    grp(RegGroup::Sgir, 0xF00, 0x4, W, 0),
    grp(RegGroup::Cpendsgir, 0xF10, 0x10, B | W, 8),
    grp(RegGroup::Spendsgir, 0xF20, 0x10, B | W, 8),
    grp(RegGroup::Irouter, 0x6000, 0x2000, W | D, 64),
    grp(RegGroup::Id, 0xFFD0, 0x30, W, 0),
];

/// Find the group covering window offset `off`.
pub fn lookup(off: u64) -> Option<&'static RegGroupInfo> {
    if off < 0x400 {
        return REG_GROUPS.get((off >> 7) as usize);
    }
    REG_GROUPS[8..]
        .iter()
        .find(|g| off >= g.base && off < g.base + g.size)
}

impl RegGroupInfo {
    /// Width is allowed for the group and the access is naturally aligned.
    pub fn access_ok(&self, acc: &EmulAccess) -> bool {
        acc.width.is_power_of_two()
            && self.widths & acc.width != 0
            && acc.addr % acc.width as u64 == 0
    }
}

impl RegGroup {
    pub fn from_id(id: u8) -> Option<Self> {
        REG_GROUPS.get(id as usize).map(|g| g.group)
    }

    /// Writing zero to these fields has no effect.
    pub fn ignores_zero(self) -> bool {
        matches!(
            self,
            RegGroup::Isenabler
                | RegGroup::Icenabler
                | RegGroup::Ispendr
                | RegGroup::Icpendr
                | RegGroup::Isactiver
                | RegGroup::Icactiver
                | RegGroup::Cpendsgir
                | RegGroup::Spendsgir
        )
    }

    /// Guest-visible field value. Takes the lock holder's view of the
    /// state, which may come from a list register.
    pub fn read_field(self, cpu: &Pcpu, int: &VgicInt, s: &VgicIntState) -> u64 {
        match self {
            RegGroup::Igroupr => s.group1 as u64,
            RegGroup::Isenabler | RegGroup::Icenabler => s.enabled as u64,
            RegGroup::Ispendr | RegGroup::Icpendr => {
                (list_regs::get_state(cpu, int, s).is_pending() || s.sgi_sources != 0) as u64
            }
            RegGroup::Isactiver | RegGroup::Icactiver => {
                list_regs::get_state(cpu, int, s).is_active() as u64
            }
            RegGroup::Ipriorityr => s.prio as u64,
            RegGroup::Itargetsr => match int.home {
                Some(vcpu) => 1 << vcpu,
                None => s.targets as u64,
            },
            RegGroup::Icfgr => s.cfg as u64,
            RegGroup::Irouter => s.route,
            RegGroup::Cpendsgir | RegGroup::Spendsgir => {
                list_regs::sgi_pending_sources(cpu, int, s) as u64
            }
            _ => 0,
        }
    }

    /// Apply a guest write to the software state. Returns whether the
    /// field changed.
    pub fn update_field(self, vm: &Vm, int: &VgicInt, s: &mut VgicIntState, val: u64) -> bool {
        match self {
            RegGroup::Igroupr => replace(&mut s.group1, val & 1 != 0),
            RegGroup::Isenabler if val != 0 => replace(&mut s.enabled, true),
            // SGIs cannot be disabled on GICv2.
            RegGroup::Icenabler if val != 0 => {
                if vm.vgic.version == GicVersion::V2 && int.is_sgi() {
                    false
                } else {
                    replace(&mut s.enabled, false)
                }
            }
            // GICv2 SGI pending state is per requester, set through
            // SPENDSGIR/CPENDSGIR only.
            RegGroup::Ispendr | RegGroup::Icpendr if vm.vgic.is_legacy_sgi(int) => false,
            RegGroup::Ispendr if val != 0 => {
                let state = s.state.with_pending(true);
                replace(&mut s.state, state)
            }
            RegGroup::Icpendr if val != 0 => {
                let state = s.state.with_pending(false);
                replace(&mut s.state, state)
            }
            RegGroup::Isactiver if val != 0 => {
                let state = s.state.with_active(true);
                replace(&mut s.state, state)
            }
            RegGroup::Icactiver if val != 0 => {
                let state = s.state.with_active(false);
                replace(&mut s.state, state)
            }
            RegGroup::Ipriorityr => replace(&mut s.prio, val as u8 & PRIO_MASK),
            RegGroup::Itargetsr if !int.is_private() => {
                let targets = (val as u64 & vm.vcpu_mask()) as u8;
                let changed = replace(&mut s.targets, targets);
                s.phys = routing::phys_route(vm, int, s);
                changed
            }
            // SGI configuration is fixed; bit 0 is reserved.
            RegGroup::Icfgr if !int.is_sgi() => replace(&mut s.cfg, val as u8 & CFG_EDGE),
            RegGroup::Irouter if !int.is_private() => {
                let changed = replace(&mut s.route, val & IROUTER_MASK);
                s.phys = routing::phys_route(vm, int, s);
                changed
            }
            RegGroup::Spendsgir if int.is_sgi() => {
                let sources = s.sgi_sources | (val & vm.vcpu_mask()) as u8;
                if sources != 0 {
                    s.state = s.state.with_pending(true);
                }
                replace(&mut s.sgi_sources, sources)
            }
            RegGroup::Cpendsgir if int.is_sgi() => {
                let sources = s.sgi_sources & !(val as u8);
                if sources == 0 {
                    s.state = s.state.with_pending(false);
                }
                replace(&mut s.sgi_sources, sources)
            }
            _ => false,
        }
    }

    /// Mirror a changed field of a hardware-backed interrupt to the
    /// physical distributor.
    pub fn update_hw(self, vm: &Vm, int: &VgicInt, s: &VgicIntState) {
        let gic = vm.gic();
        match self {
            RegGroup::Isenabler | RegGroup::Icenabler => gic.set_enable(int.id, s.enabled),
            RegGroup::Ispendr | RegGroup::Icpendr => gic.set_pending(int.id, s.state.is_pending()),
            RegGroup::Isactiver | RegGroup::Icactiver => {
                gic.set_active(int.id, s.state.is_active())
            }
            RegGroup::Ipriorityr => gic.set_priority(int.id, s.prio),
            RegGroup::Icfgr => gic.set_config(int.id, s.cfg),
            RegGroup::Itargetsr | RegGroup::Irouter => gic.set_route(int.id, s.phys),
            _ => {}
        }
    }
}

fn replace<T: PartialEq>(field: &mut T, val: T) -> bool {
    let changed = *field != val;
    *field = val;
    changed
}

/// Write one field of one interrupt. Done here if this vCPU can own the
/// interrupt, otherwise forwarded to the core of the vCPU that does.
pub fn set_field(cpu: &Pcpu, group: RegGroup, int: &VgicInt, val: u64) {
    let vm = cpu.vm();
    let vcpu = cpu.vcpu_id();
    let mut s = int.lock();

    if ownership::try_acquire(vcpu, &mut s) {
        list_regs::remove_lr(cpu, int, &mut s);
        if group.update_field(vm, int, &mut s, val) && s.hw {
            group.update_hw(vm, int, &s);
        }
        if s.spilled && s.state == IrqState::Invalid {
            spilled::unspill(vm, int, &mut s);
        }
        routing::route(cpu, int, &mut s);
        ownership::release(vcpu, vm.vgic.version, int, &mut s);
        return;
    }

    let Some(owner) = s.owner else {
        return;
    };
    drop(s);
    let Some(pcpu) = vm.pcpu_of(owner) else {
        return;
    };
    trace!("vgic: cpu {} forwards {:?} of int {} to cpu {}", cpu.id, group, int.id, pcpu);
    let data = VgicMsgData {
        vm_id: vm.id,
        vgicr: int.home.unwrap_or(owner),
        intid: int.id,
        group: group as u8,
        value: val as u32,
    };
    msg::send(cpu, pcpu, VgicEvent::SetReg, data);
}

/// Store a read result into the guest register. Narrow loads that asked
/// for it are sign-extended to the register's width; a W register gets
/// its upper half cleared.
pub fn write_back(regs: &mut dyn GuestRegs, acc: &EmulAccess, val: u64) {
    let bits = acc.width as u32 * 8;
    let mut val = if bits < 64 { val & ((1u64 << bits) - 1) } else { val };
    if acc.sign_ext && bits < 64 {
        let shift = 64 - bits;
        val = (((val << shift) as i64) >> shift) as u64;
        if !acc.reg64 {
            val &= 0xFFFF_FFFF;
        }
    }
    regs.set_reg(acc.reg, val);
}

/// Read-as-zero, writes ignored.
pub fn razwi(regs: &mut dyn GuestRegs, acc: &EmulAccess) -> bool {
    if !acc.write {
        write_back(regs, acc, 0);
    }
    true
}

/// Banked register access covering one field per interrupt.
///
/// `gicr` is the redistributor the access came through, `None` for the
/// distributor. Returns false (unhandled) when the first field names an
/// interrupt the VM does not implement; fields past the end are ignored.
pub fn generic_access(
    cpu: &Pcpu,
    info: &RegGroupInfo,
    off: u64,
    acc: &EmulAccess,
    regs: &mut dyn GuestRegs,
    gicr: Option<usize>,
) -> bool {
    let vm = cpu.vm();
    let fw = info.field_width as u64;
    let first = ((off - info.base) * 8 / fw) as u32;

    // Affinity routing: private banks live in the redistributors only,
    // and a redistributor has nothing else.
    let private = super::interrupt::is_private(first);
    if vm.vgic.version == GicVersion::V3 && gicr.is_some() != private {
        return razwi(regs, acc);
    }
    if first as usize >= vm.vgic.nr_irqs {
        warn!("vgic: {:?} access to int {} beyond {}", info.group, first, vm.vgic.nr_irqs);
        return false;
    }

    let vcpu = gicr.unwrap_or(cpu.vcpu_id());
    let count = acc.width as u64 * 8 / fw;
    let mask = if fw == 64 { u64::MAX } else { (1u64 << fw) - 1 };
    let val = if acc.write { regs.get_reg(acc.reg) } else { 0 };
    let mut out = 0u64;

    for i in 0..count {
        let Some(int) = vm.get_int(vcpu, first + i as u32) else {
            break;
        };
        let shift = i * fw;
        if acc.write {
            let field = (val >> shift) & mask;
            if field == 0 && info.group.ignores_zero() {
                continue;
            }
            set_field(cpu, info.group, int, field);
        } else {
            let s = int.lock();
            out |= (info.group.read_field(cpu, int, &s) & mask) << shift;
        }
    }

    if !acc.write {
        write_back(regs, acc, out);
    }
    true
}
