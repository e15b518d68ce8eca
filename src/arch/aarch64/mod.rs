//! ARM64/AArch64 architecture support
//!
//! GICv3 backends for the hardware traits.

pub mod peripherals;
