//! Architecture-specific code
//!
//! `traits` is the seam the vGIC core is written against. `soft` is a
//! host-side model of it; `aarch64` drives the real GICv3.

pub mod decode;
pub mod ich;
pub mod soft;
pub mod traits;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

pub use traits::{GuestRegs, PhysRoute, PhysicalGic, VirtualInterface};
