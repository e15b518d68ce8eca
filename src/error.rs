//! Errors surfaced to the VM builder and the messaging layer.
//!
//! Guest protocol violations are not errors here: the emulation paths
//! report them as unhandled accesses and the trap layer aborts the guest.

use thiserror::Error;

/// Static configuration problems, detected before a VM is started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VgicError {
    #[error("VM {vm} has no vCPUs")]
    NoVcpus { vm: usize },
    #[error("VM {vm} requests {count} vCPUs, at most {max} are supported")]
    TooManyVcpus { vm: usize, count: usize, max: usize },
    #[error("VM {vm} places a vCPU on physical CPU {cpu}, which does not exist")]
    InvalidCpu { vm: usize, cpu: usize },
    #[error("physical CPU {cpu} is assigned to both VM {first} and VM {second}")]
    CpuConflict { cpu: usize, first: usize, second: usize },
    #[error("VM {vm} requests {count} interrupts, supported range is {min}..={max}")]
    InterruptCount { vm: usize, count: usize, min: usize, max: usize },
    #[error("VM {vm} cannot pass through interrupt {irq}")]
    InvalidHwInterrupt { vm: usize, irq: u32 },
    #[error("physical interrupt {irq} is assigned to both VM {first} and VM {second}")]
    InterruptConflict { irq: u32, first: usize, second: usize },
    #[error("VM id {vm} does not fit in a cross-core message")]
    VmIdOutOfRange { vm: usize },
    #[error("VM id {vm} is used twice")]
    DuplicateVm { vm: usize },
    #[error("physical CPU {cpu} runs no vCPU of VM {vm}")]
    NotOnCpu { vm: usize, cpu: usize },
}

/// Cross-core message delivery failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IpiError {
    #[error("physical CPU {0} has no message queue")]
    InvalidTarget(usize),
}
