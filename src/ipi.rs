//! Inter-processor messages.
//!
//! Each physical CPU owns an inbound queue: a ring of `IPI_QUEUE_DEPTH`
//! entries allocated up front, plus a backlog that only grows while the
//! ring is full. Senders push and ring the doorbell SGI; the receiver
//! drains its queue at its next poll point. Nothing is ever dropped, and
//! delivery is FIFO per (sender, receiver) pair.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::warn;

use crate::arch::PhysicalGic;
use crate::error::IpiError;
use crate::platform::{IPI_DOORBELL_SGI, IPI_QUEUE_DEPTH};
use crate::sync::SpinLock;

/// Subsystem a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgHandler {
    Vgic,
}

/// Fixed-size message: handler, event code, packed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMsg {
    pub handler: MsgHandler,
    pub event: u32,
    pub data: u64,
}

/// Inbound queue of one CPU. Every backlog entry is younger than every
/// ring entry.
struct Inbox {
    ring: VecDeque<CpuMsg>,
    backlog: VecDeque<CpuMsg>,
}

pub struct CpuMsgBus {
    queues: Vec<SpinLock<Inbox>>,
    doorbell: Option<Arc<dyn PhysicalGic>>,
}

impl CpuMsgBus {
    /// Queues for `num_cpus` physical CPUs, no doorbell (receivers poll).
    pub fn new(num_cpus: usize) -> Self {
        Self {
            queues: (0..num_cpus)
                .map(|_| {
                    SpinLock::new(Inbox {
                        ring: VecDeque::with_capacity(IPI_QUEUE_DEPTH),
                        backlog: VecDeque::new(),
                    })
                })
                .collect(),
            doorbell: None,
        }
    }

    /// Raise `IPI_DOORBELL_SGI` on the target after every send.
    pub fn with_doorbell(num_cpus: usize, gic: Arc<dyn PhysicalGic>) -> Self {
        Self {
            doorbell: Some(gic),
            ..Self::new(num_cpus)
        }
    }

    pub fn num_cpus(&self) -> usize {
        self.queues.len()
    }

    /// Queue `msg` for `target`. Only an unknown target fails.
    pub fn send(&self, target: usize, msg: CpuMsg) -> Result<(), IpiError> {
        let queue = self.queues.get(target).ok_or(IpiError::InvalidTarget(target))?;
        {
            let mut q = queue.lock();
            if q.ring.len() < IPI_QUEUE_DEPTH && q.backlog.is_empty() {
                q.ring.push_back(msg);
            } else {
                if q.backlog.is_empty() {
                    warn!("ipi: queue of cpu {} is full, backlogging", target);
                }
                q.backlog.push_back(msg);
            }
        }
        if let Some(gic) = &self.doorbell {
            gic.send_sgi(target, IPI_DOORBELL_SGI);
        }
        Ok(())
    }

    /// Oldest message for `cpu`.
    pub fn recv(&self, cpu: usize) -> Option<CpuMsg> {
        let mut q = self.queues.get(cpu)?.lock();
        let msg = q.ring.pop_front()?;
        if let Some(next) = q.backlog.pop_front() {
            q.ring.push_back(next);
        }
        Some(msg)
    }

    /// Messages waiting for `cpu`, backlog included.
    pub fn pending(&self, cpu: usize) -> usize {
        self.queues.get(cpu).map_or(0, |q| {
            let q = q.lock();
            q.ring.len() + q.backlog.len()
        })
    }

    /// Messages for `cpu` that found its ring full.
    pub fn backlogged(&self, cpu: usize) -> usize {
        self.queues.get(cpu).map_or(0, |q| q.lock().backlog.len())
    }
}
