//! List register scheduling: eviction, spilling and refill.

mod common;

use common::*;
use vgic::arch::VirtualInterface;
use vgic::devices::gic::IrqState;
use vgic::VgicConfig;

/// Interrupts 40..45, 40 the least important, 45 the most.
fn prio_of(id: u32) -> u8 {
    0x80 + (45 - id as u8) * 8
}

fn setup_ladder(rig: &Rig) {
    rig.enable_distributor();
    for id in 40..=45 {
        rig.setup_spi(id, prio_of(id), 0);
    }
}

#[test]
fn free_list_registers_fill_then_evict_lowest_pending() {
    let rig = Rig::new(VgicConfig::v3(64), 2, 4);
    setup_ladder(&rig);

    // Test 1: first four land in free list registers.
    for id in 40..=43 {
        rig.cpus[0].inject(id);
    }
    assert_eq!(rig.resident(0), vec![40, 41, 42, 43]);
    assert_eq!(rig.free_lrs(0), 0);

    // Test 2: each later arrival evicts the least important pending one.
    rig.cpus[0].inject(44);
    rig.cpus[0].inject(45);
    assert_eq!(rig.resident(0), vec![42, 43, 44, 45]);
    assert!(rig.vm.vgic.spilled.contains(40));
    assert!(rig.vm.vgic.spilled.contains(41));

    // Test 3: a spilled interrupt keeps its pending state and drops ownership.
    let s = rig.shared(40).lock();
    assert_eq!(s.state, IrqState::Pending);
    assert!(!s.in_lr);
    assert_eq!(s.owner, None);
}

#[test]
fn two_active_residents_leave_the_two_most_important_pending() {
    let rig = Rig::new(VgicConfig::v3(64), 2, 4);
    setup_ladder(&rig);
    rig.setup_spi(50, 0x10, 0);
    rig.setup_spi(51, 0x10, 0);

    // Occupy two list registers with interrupts the guest is servicing.
    rig.cpus[0].inject(50);
    assert_eq!(rig.gichs[0].guest_ack(), Some(50));
    rig.cpus[0].inject(51);
    assert_eq!(rig.gichs[0].guest_ack(), Some(51));

    for id in 40..=45 {
        rig.cpus[0].inject(id);
    }

    assert_eq!(rig.resident(0), vec![44, 45, 50, 51]);
    for id in 40..=43 {
        assert!(rig.vm.vgic.spilled.contains(id), "int {} not spilled", id);
    }
    assert_eq!(rig.vm.vgic.spilled.len(), 4);
}

#[test]
fn sole_pending_resident_is_kept_over_active_victim() {
    let rig = Rig::new(VgicConfig::v3(64), 1, 2);
    rig.enable_distributor();
    rig.setup_spi(40, 0x80, 0);
    rig.setup_spi(41, 0x20, 0);
    rig.setup_spi(42, 0x40, 0);

    // LR0: 41 active (more important), LR1: 40 pending.
    rig.cpus[0].inject(41);
    assert_eq!(rig.gichs[0].guest_ack(), Some(41));
    rig.cpus[0].inject(40);

    // Only one pending resident exists, so the active one goes.
    rig.cpus[0].inject(42);
    assert_eq!(rig.resident(0), vec![40, 42]);
    assert!(rig.vm.vgic.spilled.contains(41));

    // An active interrupt is never released while spilled.
    let s = rig.shared(41).lock();
    assert_eq!(s.state, IrqState::Active);
    assert_eq!(s.owner, Some(0));
}

#[test]
fn no_pending_maintenance_refills_by_priority() {
    let rig = Rig::new(VgicConfig::v3(64), 2, 4);
    setup_ladder(&rig);
    for id in 40..=45 {
        rig.cpus[0].inject(id);
    }

    // Guest services the four residents, most important first.
    for expected in [45, 44, 43, 42] {
        assert_eq!(rig.gichs[0].guest_ack(), Some(expected));
        rig.gichs[0].guest_eoi(expected);
        rig.maintenance(0);
    }

    // Last EOI raised NP as well: both spilled interrupts come back.
    assert_eq!(rig.resident(0), vec![40, 41]);
    assert!(rig.vm.vgic.spilled.is_empty());
    assert_eq!(rig.gichs[0].guest_ack(), Some(41));
    assert_eq!(rig.shared(45).lock().owner, None);
}

#[test]
fn eoi_of_spilled_active_interrupt_deactivates_it() {
    let rig = Rig::new(VgicConfig::v3(64), 1, 1);
    rig.enable_distributor();
    rig.setup_spi(40, 0x80, 0);
    rig.setup_spi(41, 0x40, 0);

    rig.cpus[0].inject(40);
    assert_eq!(rig.gichs[0].guest_ack(), Some(40));

    // 41 preempts: active 40 is the only victim.
    rig.cpus[0].inject(41);
    assert_eq!(rig.resident(0), vec![41]);
    assert!(rig.vm.vgic.spilled.contains(40));

    assert_eq!(rig.gichs[0].guest_ack(), Some(41));
    rig.gichs[0].guest_eoi(41);
    // No list register holds 40: EOIcount goes up.
    rig.gichs[0].guest_eoi(40);
    rig.maintenance(0);

    assert!(rig.resident(0).is_empty());
    assert!(rig.vm.vgic.spilled.is_empty());
    let s = rig.shared(40).lock();
    assert_eq!(s.state, IrqState::Invalid);
    assert_eq!(s.owner, None);
    drop(s);
    assert_eq!(rig.gichs[0].hcr().eoi_count(), 0);
}

#[test]
fn eviction_never_takes_more_important_active_entry() {
    let rig = Rig::new(VgicConfig::v3(96), 1, 4);
    rig.enable_distributor();
    rig.setup_spi(60, 0x10, 0);
    rig.setup_spi(61, 0x90, 0);
    rig.setup_spi(62, 0x50, 0);
    rig.setup_spi(63, 0x58, 0);
    rig.setup_spi(64, 0x08, 0);
    rig.setup_spi(65, 0x00, 0);

    rig.cpus[0].inject(60);
    rig.cpus[0].inject(61);
    assert_eq!(rig.gichs[0].guest_ack(), Some(60));
    assert_eq!(rig.gichs[0].guest_ack(), Some(61));
    rig.cpus[0].inject(62);
    rig.cpus[0].inject(63);

    // Two pending residents: the less important pending one goes.
    rig.cpus[0].inject(64);
    assert_eq!(rig.resident(0), vec![60, 61, 62, 64]);
    assert!(rig.vm.vgic.spilled.contains(63));

    // With a single pending resident left, the least important active
    // entry goes, never 60.
    assert_eq!(rig.gichs[0].guest_ack(), Some(64));
    rig.cpus[0].inject(65);
    assert_eq!(rig.resident(0), vec![60, 62, 64, 65]);
    assert!(rig.vm.vgic.spilled.contains(61));
    assert_eq!(rig.shared(61).lock().owner, Some(0));
}
