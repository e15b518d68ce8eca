//! End-to-end interrupt life cycles on the software GIC model.

mod common;

use std::sync::Arc;

use common::*;
use vgic::arch::soft::{SoftGic, SoftVirtualInterface};
use vgic::arch::VirtualInterface;
use vgic::devices::gic::list_regs::ListReg;
use vgic::devices::gic::IrqState;
use vgic::{CpuMsgBus, GicVersion, Pcpu, VgicConfig, VgicError, Vm, VmConfig};

/// Every enabled shared interrupt is in exactly one place: a list
/// register, a spill list, or idle.
fn assert_conserved(rig: &Rig) {
    let resident: Vec<u32> = (0..rig.cpus.len()).flat_map(|c| rig.resident(c)).collect();
    let spilled = rig.vm.vgic.spilled.snapshot();
    for int in rig.vm.vgic.shared_ints() {
        let s = int.lock();
        if !s.enabled {
            continue;
        }
        let in_lr = resident.iter().filter(|&&id| id == int.id).count();
        let in_list = spilled.iter().filter(|&&id| id == int.id).count();
        let idle = (s.state == IrqState::Invalid && !s.in_lr && !s.spilled) as usize;
        assert_eq!(in_lr + in_list + idle, 1, "int {} ({:?})", int.id, s.state);
    }
}

#[test]
fn disabled_before_ack_is_not_presented() {
    let rig = Rig::new(VgicConfig::v3(64), 2, 4);
    rig.enable_distributor();
    let isenabler = rig.gicr_sgi(0, GICD_ISENABLER);
    let icenabler = rig.gicr_sgi(0, GICD_ICENABLER);
    let ispendr = rig.gicr_sgi(0, GICD_ISPENDR);

    // Test 1: SGI 10 pending and resident
    assert!(rig.write(0, isenabler, 4, 1 << 10));
    rig.cpus[0].inject(10);
    assert_eq!(rig.resident(0), vec![10]);

    // Test 2: disabled before the guest took it
    assert!(rig.write(0, icenabler, 4, 1 << 10));
    assert!(rig.resident(0).is_empty());
    assert_eq!(rig.read(0, ispendr, 4), Some(1 << 10));
    assert!(rig.vm.vcpu(0).unwrap().vgic.spilled.is_empty());

    // Test 3: maintenance does not bring it back
    rig.maintenance(0);
    assert!(rig.resident(0).is_empty());

    // Test 4: no longer pending, so enabling it again presents nothing
    assert!(rig.write(0, rig.gicr_sgi(0, GICD_ICPENDR), 4, 1 << 10));
    assert!(rig.write(0, isenabler, 4, 1 << 10));
    assert!(rig.resident(0).is_empty());
    assert_eq!(rig.read(0, ispendr, 4), Some(0));
}

#[test]
fn re_enabled_while_pending_is_presented_again() {
    let rig = Rig::new(VgicConfig::v3(64), 2, 4);
    rig.enable_distributor();
    let isenabler = rig.gicr_sgi(0, GICD_ISENABLER);

    assert!(rig.write(0, isenabler, 4, 1 << 10));
    rig.cpus[0].inject(10);
    assert!(rig.write(0, rig.gicr_sgi(0, GICD_ICENABLER), 4, 1 << 10));
    assert!(rig.resident(0).is_empty());

    assert!(rig.write(0, isenabler, 4, 1 << 10));
    assert_eq!(rig.resident(0), vec![10]);
    assert_eq!(rig.gichs[0].guest_ack(), Some(10));
}

#[test]
fn contended_list_registers_conserve_interrupts() {
    let rig = Rig::new(VgicConfig::v3(64), 2, 2);
    rig.enable_distributor();
    for id in 40..48u32 {
        let prio = 0x40 + ((id * 3) % 8) as u8 * 8;
        rig.setup_spi(id, prio, (id % 2) as usize);
    }

    for id in 40..48 {
        rig.cpus[0].inject(id);
        rig.drain();
        assert_conserved(&rig);
    }
    assert!(!rig.vm.vgic.spilled.is_empty());

    // Guests service everything, one interrupt per core per round
    for _ in 0..32 {
        for cpu in 0..2 {
            if let Some(id) = rig.gichs[cpu].guest_ack() {
                rig.gichs[cpu].guest_eoi(id);
                rig.maintenance(cpu);
            }
            assert_conserved(&rig);
        }
    }

    assert!(rig.vm.vgic.spilled.is_empty());
    for cpu in 0..2 {
        assert!(rig.resident(cpu).is_empty());
    }
    for int in rig.vm.vgic.shared_ints() {
        let s = int.lock();
        assert_eq!(s.state, IrqState::Invalid, "int {}", int.id);
        assert_eq!(s.owner, None, "int {}", int.id);
    }
}

#[test]
fn passthrough_interrupt_uses_hardware_deactivation() {
    let rig = Rig::with_hw(VgicConfig::v3(64), 2, 4, vec![40]);
    rig.enable_distributor();
    rig.setup_spi(40, 0x80, 0);

    // Test 1: the list register links the physical line
    rig.cpus[0].inject(40);
    assert_eq!(rig.resident(0), vec![40]);
    let lr = ListReg(rig.gichs[0].read_lr(0));
    assert!(lr.is_hw());
    assert_eq!(lr.vintid(), 40);

    // Test 2: guest deactivation needs no maintenance; the line fires again
    assert_eq!(rig.gichs[0].guest_ack(), Some(40));
    rig.gichs[0].guest_eoi(40);
    assert_eq!(rig.gichs[0].eisr(), 0);
    assert!(rig.resident(0).is_empty());
    rig.cpus[0].inject(40);
    assert_eq!(rig.resident(0), vec![40]);
}

#[test]
fn passthrough_interrupt_on_the_wrong_core_is_forwarded() {
    let rig = Rig::with_hw(VgicConfig::v3(64), 2, 4, vec![40]);
    rig.enable_distributor();
    rig.setup_spi(40, 0x80, 1);

    rig.cpus[1].inject(40);
    assert_eq!(rig.resident(1), vec![40]);
    assert_eq!(rig.shared(40).lock().owner, Some(1));

    rig.cpus[0].inject(40);
    assert_eq!(rig.bus.pending(1), 1);
    assert!(rig.resident(0).is_empty());
    rig.drain();
    assert_eq!(rig.resident(1), vec![40]);
}

#[test]
fn gicv2_private_interrupts_stay_home() {
    let rig = Rig::new(VgicConfig::v2(64), 2, 4);
    rig.enable_distributor();
    let ppi = rig.vm.vcpu(1).unwrap().vgic.private_int(27).unwrap();

    assert!(rig.write(1, rig.gicd(GICD_ISENABLER), 4, 1 << 27));
    rig.cpus[1].inject(27);
    assert_eq!(rig.resident(1), vec![27]);
    assert_eq!(rig.gichs[1].guest_ack(), Some(27));
    rig.gichs[1].guest_eoi(27);
    rig.maintenance(1);

    assert!(rig.write(1, rig.gicd(GICD_ICENABLER), 4, 1 << 27));
    assert_eq!(ppi.lock().owner, Some(1));
}

#[test]
fn bad_partitions_never_start() {
    let gic = Arc::new(SoftGic::new());
    let bus = Arc::new(CpuMsgBus::new(2));
    let cfg = |cpus: Vec<usize>, hw: Vec<u32>| VmConfig {
        id: 1,
        cpu_affinity: cpus,
        vgic: VgicConfig::v3(64),
        hw_interrupts: hw,
    };

    // Test 1: a physical CPU the message bus does not know
    let err = Vm::new(&cfg(vec![0, 5], vec![]), gic.clone(), bus.clone()).err();
    assert_eq!(err, Some(VgicError::InvalidCpu { vm: 1, cpu: 5 }));

    // Test 2: passthrough beyond the VM's interrupt range
    let err = Vm::new(&cfg(vec![0], vec![70]), gic.clone(), bus.clone()).err();
    assert_eq!(err, Some(VgicError::InvalidHwInterrupt { vm: 1, irq: 70 }));

    // Test 3: a core that runs no vCPU of the VM
    let vm = Vm::new(&cfg(vec![0], vec![]), gic, bus).unwrap();
    assert_eq!(vm.vgic.version, GicVersion::V3);
    let gich = Arc::new(SoftVirtualInterface::new(4));
    let err = Pcpu::attach(1, vm, gich).err();
    assert_eq!(err.map(|e| e.to_string()), Some("physical CPU 1 runs no vCPU of VM 1".into()));
}

#[test]
fn multi_target_spi_waits_when_every_target_is_full() {
    // One list register per core, each taken by a pending SGI that
    // cannot be evicted for an equal newcomer.
    let rig = Rig::new(VgicConfig::v2(64), 2, 1);
    rig.enable_distributor();
    for cpu in 0..2 {
        assert!(rig.write(cpu, rig.gicd(GICD_SGIR), 4, (2 << 24) | 1));
        assert_eq!(rig.resident(cpu), vec![1]);
    }
    assert!(rig.write(0, rig.gicd(GICD_ITARGETSR + 40), 1, 0b11));
    assert!(rig.write(0, rig.gicd(GICD_ISENABLER + 4), 4, 1 << 8));

    // Test 1: both targets are asked once, neither bounces it back
    assert!(rig.write(0, rig.gicd(GICD_ISPENDR + 4), 4, 1 << 8));
    rig.drain();
    assert_eq!(rig.bus.pending(0) + rig.bus.pending(1), 0);
    {
        let s = rig.shared(40).lock();
        assert_eq!(s.owner, None);
        assert!(s.spilled);
        assert!(!s.in_lr);
        assert!(s.state.is_pending());
    }
    assert_eq!(rig.resident(0), vec![1]);
    assert_eq!(rig.resident(1), vec![1]);

    // Test 2: the first target to free a slot takes it
    assert_eq!(rig.gichs[1].guest_ack(), Some(1 | (1 << 10)));
    rig.gichs[1].guest_eoi(1 | (1 << 10));
    rig.maintenance(1);
    assert_eq!(rig.resident(1), vec![40]);
    assert_eq!(rig.shared(40).lock().owner, Some(1));
    assert!(!rig.shared(40).lock().spilled);

    // Test 3: the other target finds nothing left to take
    assert_eq!(rig.gichs[0].guest_ack(), Some(1));
    rig.gichs[0].guest_eoi(1);
    rig.maintenance(0);
    assert!(rig.resident(0).is_empty());
    assert_conserved(&rig);
}
