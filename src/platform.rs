//! Platform/Board Constants (QEMU virt machine)
//!
//! Board-specific addresses and hard limits for the interrupt
//! virtualization layer live here.

// ── Cores ────────────────────────────────────────────────────────────
/// Physical cores the hypervisor can partition.
pub const MAX_SMP_CPUS: usize = 8;

// ── UART (PL011) ─────────────────────────────────────────────────────
pub const UART_BASE: usize = 0x0900_0000;

// ── GIC ──────────────────────────────────────────────────────────────
pub const GICD_BASE: u64 = 0x0800_0000;
pub const GICD_SIZE: u64 = 0x1_0000;
pub const GICR_BASE: u64 = 0x080A_0000;
/// One RD frame + one SGI frame per redistributor.
pub const GICR_STRIDE: u64 = 0x2_0000;

/// INTIDs 1020..1023 are special; nothing above 1019 is a real line.
pub const GIC_MAX_INTERRUPTS: usize = 1020;
/// SGIs + PPIs, banked per core.
pub const GIC_PRIVATE_INTERRUPTS: usize = 32;
pub const GIC_MAX_SGIS: usize = 16;

/// ICH_VTR_EL2.ListRegs is 5 bits wide, the GICv2 GICH block tops out at 64.
pub const MAX_LIST_REGS: usize = 64;

/// Physical SGI used as the cross-core message doorbell.
pub const IPI_DOORBELL_SGI: u32 = 1;
/// Preallocated ring of each core's inbound message queue.
pub const IPI_QUEUE_DEPTH: usize = 64;
