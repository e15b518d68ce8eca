//! Virtual GIC core of a static-partitioning hypervisor.
//!
//! Each VM gets its own GICv2 or GICv3 distributor (and redistributors)
//! while the physical GIC and the per-core list registers are shared
//! out between VMs. Hardware is reached through the traits in
//! [`arch::traits`]; [`arch::soft`] models it for hosted use.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod devices;
pub mod dtb;
pub mod error;
pub mod ipi;
#[cfg(target_arch = "aarch64")]
pub mod logger;
pub mod percpu;
pub mod platform;
pub mod sync;
#[cfg(target_arch = "aarch64")]
pub mod uart;
pub mod vcpu;
pub mod vm;

pub use config::{validate_partitions, GicVersion, VgicConfig, VmConfig};
pub use devices::EmulAccess;
pub use error::{IpiError, VgicError};
pub use ipi::{CpuMsg, CpuMsgBus, MsgHandler};
pub use percpu::Pcpu;
pub use vm::Vm;
