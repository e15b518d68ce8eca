//! ARM64 Peripheral Drivers

pub mod gicv3;

pub use gicv3::{GicV3Distributor, GicV3VirtualInterface};
