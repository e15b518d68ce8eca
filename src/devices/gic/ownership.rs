//! Single-writer token for an interrupt's list register presence.
//!
//! Callers hold the interrupt lock. Ownership is a relation keyed by vCPU
//! id; it never keeps anything alive.

use super::interrupt::{VgicInt, VgicIntState};
use crate::config::GicVersion;

pub fn owns(vcpu: usize, s: &VgicIntState) -> bool {
    s.owner == Some(vcpu)
}

/// Claim the interrupt if it is free; succeed if `vcpu` already owns it.
pub fn try_acquire(vcpu: usize, s: &mut VgicIntState) -> bool {
    match s.owner {
        Some(owner) => owner == vcpu,
        None => {
            s.owner = Some(vcpu);
            true
        }
    }
}

/// Give the interrupt up. Refused while it sits in a list register or is
/// active, and for GICv2 private interrupts, which never change core.
/// Returns whether ownership was dropped.
pub fn release(vcpu: usize, version: GicVersion, int: &VgicInt, s: &mut VgicIntState) -> bool {
    if !owns(vcpu, s) || s.in_lr || s.state.is_active() {
        return false;
    }
    if version == GicVersion::V2 && int.is_private() {
        return false;
    }
    s.owner = None;
    true
}
