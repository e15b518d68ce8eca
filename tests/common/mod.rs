//! Shared harness: one VM on the software GIC model, vCPU n pinned to
//! physical CPU n, messages delivered by explicit draining.

#![allow(dead_code)]

use std::sync::Arc;

use vgic::arch::soft::{SoftGic, SoftVirtualInterface};
use vgic::arch::VirtualInterface;
use vgic::devices::gic::VgicInt;
use vgic::{CpuMsgBus, EmulAccess, Pcpu, VgicConfig, Vm, VmConfig};

pub const GICD_CTLR: u64 = 0x000;
pub const GICD_IGROUPR: u64 = 0x080;
pub const GICD_ISENABLER: u64 = 0x100;
pub const GICD_ICENABLER: u64 = 0x180;
pub const GICD_ISPENDR: u64 = 0x200;
pub const GICD_ICPENDR: u64 = 0x280;
pub const GICD_ISACTIVER: u64 = 0x300;
pub const GICD_ICACTIVER: u64 = 0x380;
pub const GICD_IPRIORITYR: u64 = 0x400;
pub const GICD_ITARGETSR: u64 = 0x800;
pub const GICD_ICFGR: u64 = 0xC00;
pub const GICD_SGIR: u64 = 0xF00;
pub const GICD_IROUTER: u64 = 0x6000;

pub const GICR_STRIDE: u64 = 0x2_0000;
pub const GICR_SGI_FRAME: u64 = 0x1_0000;

pub struct Rig {
    pub gic: Arc<SoftGic>,
    pub bus: Arc<CpuMsgBus>,
    pub vm: Arc<Vm>,
    pub gichs: Vec<Arc<SoftVirtualInterface>>,
    pub cpus: Vec<Pcpu>,
}

impl Rig {
    pub fn new(vgic: VgicConfig, vcpus: usize, lrs: usize) -> Self {
        Self::with_hw(vgic, vcpus, lrs, Vec::new())
    }

    pub fn with_hw(vgic: VgicConfig, vcpus: usize, lrs: usize, hw: Vec<u32>) -> Self {
        let gic = Arc::new(SoftGic::new());
        let bus = Arc::new(CpuMsgBus::with_doorbell(vcpus, gic.clone()));
        let cfg = VmConfig {
            id: 3,
            cpu_affinity: (0..vcpus).collect(),
            vgic,
            hw_interrupts: hw,
        };
        let vm = Vm::new(&cfg, gic.clone(), bus.clone()).expect("valid VM");
        let gichs: Vec<_> = (0..vcpus)
            .map(|_| Arc::new(SoftVirtualInterface::new(lrs)))
            .collect();
        let cpus = gichs
            .iter()
            .enumerate()
            .map(|(i, g)| Pcpu::attach(i, vm.clone(), g.clone()).expect("vCPU on cpu"))
            .collect();
        Self { gic, bus, vm, gichs, cpus }
    }

    pub fn gicd(&self, off: u64) -> u64 {
        self.vm.vgic.gicd_base + off
    }

    pub fn gicr(&self, vcpu: usize, off: u64) -> u64 {
        self.vm.vgic.gicr_base + vcpu as u64 * GICR_STRIDE + off
    }

    pub fn gicr_sgi(&self, vcpu: usize, off: u64) -> u64 {
        self.gicr(vcpu, GICR_SGI_FRAME + off)
    }

    pub fn write(&self, cpu: usize, addr: u64, width: u8, val: u64) -> bool {
        let mut regs = [0u64; 31];
        regs[1] = val;
        let acc = EmulAccess { addr, width, write: true, reg: 1, sign_ext: false, reg64: true };
        self.cpus[cpu].handle_mmio(&acc, &mut regs)
    }

    pub fn read(&self, cpu: usize, addr: u64, width: u8) -> Option<u64> {
        let mut regs = [0u64; 31];
        regs[2] = 0xDEAD_BEEF;
        let acc = EmulAccess { addr, width, write: false, reg: 2, sign_ext: false, reg64: true };
        self.cpus[cpu].handle_mmio(&acc, &mut regs).then_some(regs[2])
    }

    /// Deliver messages until every queue is empty.
    pub fn drain(&self) {
        loop {
            let handled: usize = self.cpus.iter().map(|c| c.poll_messages()).sum();
            if handled == 0 {
                break;
            }
        }
    }

    /// Turn the distributor on from CPU 0 and let the others follow.
    pub fn enable_distributor(&self) {
        assert!(self.write(0, self.gicd(GICD_CTLR), 4, 0b10));
        self.drain();
    }

    /// Enable, prioritise and route shared interrupt `id` to `vcpu` (GICv3).
    pub fn setup_spi(&self, id: u32, prio: u8, vcpu: usize) {
        assert!(self.write(0, self.gicd(GICD_IROUTER + id as u64 * 8), 8, vcpu as u64));
        assert!(self.write(0, self.gicd(GICD_IPRIORITYR + id as u64), 1, prio as u64));
        let reg = GICD_ISENABLER + (id as u64 / 32) * 4;
        assert!(self.write(0, self.gicd(reg), 4, 1 << (id % 32)));
        self.drain();
    }

    pub fn maintenance(&self, cpu: usize) {
        self.cpus[cpu].maintenance();
        self.drain();
    }

    pub fn resident(&self, cpu: usize) -> Vec<u32> {
        let mut ids = self.gichs[cpu].resident();
        ids.sort_unstable();
        ids
    }

    pub fn shared(&self, id: u32) -> &VgicInt {
        self.vm.vgic.shared_int(id).expect("shared interrupt")
    }

    pub fn free_lrs(&self, cpu: usize) -> u32 {
        self.gichs[cpu].elrsr().count_ones()
    }
}
