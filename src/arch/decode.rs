/// ARM64 trap syndrome decoding for interrupt controller emulation
///
/// Turns a data abort on an emulated GIC window into an `EmulAccess`,
/// and a trapped MSR/MRS into a `SysRegAccess`.

use crate::devices::EmulAccess;

/// ESR_EL2.EC for a trapped MSR/MRS/system instruction.
pub const EC_SYSREG: u32 = 0x18;
/// ESR_EL2.EC for a data abort taken from a lower exception level.
pub const EC_DABT_LOW: u32 = 0x24;

/// Decoded load/store instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmioAccess {
    /// Load instruction: LDR, LDRB, LDRH, LDRSW, etc.
    Load {
        reg: u8,  // Destination register (0-31, 31 = XZR)
        size: u8, // Access size in bytes (1, 2, 4, 8)
        sign_extend: bool,
        reg64: bool, // Xt destination; Wt otherwise
    },
    /// Store instruction: STR, STRB, STRH, etc.
    Store {
        reg: u8,  // Source register (0-31, 31 = XZR)
        size: u8, // Access size in bytes (1, 2, 4, 8)
    },
}

impl MmioAccess {
    /// Decode an instruction that caused a data abort
    ///
    /// # Arguments
    /// * `insn` - The 32-bit instruction encoding
    /// * `iss` - Instruction Specific Syndrome from ESR_EL2
    ///
    /// # Returns
    /// * `Some(MmioAccess)` if successfully decoded
    /// * `None` if instruction is not a supported load/store
    pub fn decode(insn: u32, iss: u32) -> Option<Self> {
        let isv = (iss >> 24) & 1;
        if isv == 0 {
            // ISS not valid, need to decode instruction manually
            return Self::decode_instruction(insn);
        }

        let sas = (iss >> 22) & 0x3; // 00=byte, 01=half, 10=word, 11=double
        let sse = (iss >> 21) & 1;
        let srt = ((iss >> 16) & 0x1F) as u8;
        let sf = (iss >> 15) & 1;
        let wnr = (iss >> 6) & 1;
        let size = 1u8 << sas;

        if wnr == 1 {
            Some(MmioAccess::Store { reg: srt, size })
        } else {
            Some(MmioAccess::Load {
                reg: srt,
                size,
                sign_extend: sse != 0,
                reg64: sf != 0,
            })
        }
    }

    /// Decode instruction manually when ISV is not valid
    fn decode_instruction(insn: u32) -> Option<Self> {
        // Load/Store register (unsigned immediate)
        // size|111|0|01|opc|imm12|Rn|Rt
        if (insn & 0x3B00_0000) != 0x3900_0000 {
            return None;
        }
        let size_bits = (insn >> 30) & 0x3;
        let size = 1u8 << size_bits;
        let rt = (insn & 0x1F) as u8;
        let opc = (insn >> 22) & 0x3;

        match opc {
            0 => Some(MmioAccess::Store { reg: rt, size }),
            1 => Some(MmioAccess::Load {
                reg: rt,
                size,
                sign_extend: false,
                reg64: size_bits == 3,
            }),
            // LDRSB/LDRSH/LDRSW into Xt; size 3 is PRFM
            2 if size_bits < 3 => Some(MmioAccess::Load {
                reg: rt,
                size,
                sign_extend: true,
                reg64: true,
            }),
            // LDRSB/LDRSH into Wt
            3 if size_bits < 2 => Some(MmioAccess::Load {
                reg: rt,
                size,
                sign_extend: true,
                reg64: false,
            }),
            _ => None,
        }
    }

    /// Get the register number
    pub fn reg(&self) -> u8 {
        match self {
            MmioAccess::Load { reg, .. } => *reg,
            MmioAccess::Store { reg, .. } => *reg,
        }
    }

    /// Get the access size in bytes
    pub fn size(&self) -> u8 {
        match self {
            MmioAccess::Load { size, .. } => *size,
            MmioAccess::Store { size, .. } => *size,
        }
    }

    pub fn is_store(&self) -> bool {
        matches!(self, MmioAccess::Store { .. })
    }

    /// Whether the transfer register is an X register. Stores take the
    /// width from the access size.
    pub fn reg64(&self) -> bool {
        match self {
            MmioAccess::Load { reg64, .. } => *reg64,
            MmioAccess::Store { size, .. } => *size == 8,
        }
    }

    /// Combine with the faulting IPA into the emulation descriptor.
    pub fn at(&self, addr: u64) -> EmulAccess {
        EmulAccess {
            addr,
            width: self.size(),
            write: self.is_store(),
            reg: self.reg(),
            sign_ext: matches!(self, MmioAccess::Load { sign_extend: true, .. }),
            reg64: self.reg64(),
        }
    }
}

/// Encoded system register identifier (Op0, Op1, CRn, CRm, Op2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysRegId {
    pub op0: u8,
    pub op1: u8,
    pub crn: u8,
    pub crm: u8,
    pub op2: u8,
}

pub const ICC_SGI1R_EL1: SysRegId = SysRegId { op0: 3, op1: 0, crn: 12, crm: 11, op2: 5 };
pub const ICC_SRE_EL1: SysRegId = SysRegId { op0: 3, op1: 0, crn: 12, crm: 12, op2: 5 };

/// A trapped MSR/MRS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysRegAccess {
    pub id: SysRegId,
    /// Guest register transferred (31 = XZR).
    pub reg: u8,
    /// MRS (guest reads the system register).
    pub read: bool,
}

impl SysRegAccess {
    /// Decode the ISS of an EC 0x18 trap.
    pub fn decode(iss: u32) -> Self {
        Self {
            id: SysRegId {
                op0: ((iss >> 20) & 0x3) as u8,
                op2: ((iss >> 17) & 0x7) as u8,
                op1: ((iss >> 14) & 0x7) as u8,
                crn: ((iss >> 10) & 0xF) as u8,
                crm: ((iss >> 1) & 0xF) as u8,
            },
            reg: ((iss >> 5) & 0x1F) as u8,
            read: iss & 1 != 0,
        }
    }
}
