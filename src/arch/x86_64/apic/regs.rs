//! Mapa de registradores e vetores do Local APIC.
//!
//! Offsets são os do modo xAPIC (MMIO). No modo x2APIC o mesmo registrador
//! é o MSR `X2APIC_MSR_BASE + (offset >> 4)`.

use bitflags::bitflags;

// --- MSR IA32_APIC_BASE ---
pub const IA32_APIC_BASE: u32 = 0x1B;
pub const BASE_BSP: u64 = 1 << 8;
pub const BASE_X2_ENABLE: u64 = 1 << 10;
pub const BASE_GLOBAL_ENABLE: u64 = 1 << 11;
pub const BASE_ADDRESS_MASK: u64 = 0xFFFF_F000;

/// Primeiro MSR do bloco x2APIC.
pub const X2APIC_MSR_BASE: u32 = 0x800;

// --- Offsets ---
pub const REG_ID: usize = 0x020;
pub const REG_TPR: usize = 0x080;
pub const REG_EOI: usize = 0x0B0;
pub const REG_LD: usize = 0x0D0;
pub const REG_DF: usize = 0x0E0;
pub const REG_SIV: usize = 0x0F0;
pub const REG_ESR: usize = 0x280;
pub const REG_ICR_LOW: usize = 0x300;
pub const REG_ICR_HIGH: usize = 0x310;
pub const REG_LVT_TIMER: usize = 0x320;
pub const REG_LVT_THERMAL: usize = 0x330;
pub const REG_LVT_PERFORMANCE_COUNTER: usize = 0x340;
pub const REG_LVT_LINT0: usize = 0x350;
pub const REG_LVT_LINT1: usize = 0x360;
pub const REG_LVT_ERR: usize = 0x370;
pub const REG_TIMER_INITIAL_COUNT: usize = 0x380;
pub const REG_TIMER_CURRENT_COUNT: usize = 0x390;
pub const REG_TIMER_CONFIGURATION: usize = 0x3E0;

/// Tamanho da janela MMIO do xAPIC.
pub const MMIO_WINDOW_SIZE: usize = 0x1000;

/// MSR x2APIC de um offset xAPIC.
#[inline]
pub const fn x2_msr(offset: usize) -> u32 {
    X2APIC_MSR_BASE + (offset >> 4) as u32
}

// --- Vetores ---
pub const IRQ_VECTOR_BASE: u8 = 0x50;
pub const TIMER_VECTOR: u8 = 0xFC;
pub const IPI_VECTOR: u8 = 0xFD;
pub const ERROR_VECTOR: u8 = 0xFE;
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// Software enable no SIV.
pub const SIV_SOFTWARE_ENABLE: u32 = 1 << 8;

/// Destination Format: modelo flat.
pub const DF_FLAT_MODEL: u32 = 0xF000_0000;

/// Delivery status (pending) no ICR low.
pub const ICR_DELIVERY_PENDING: u32 = 1 << 12;

/// Divide configuration: divisor 16.
pub const TIMER_DIVIDE_BY_16: u32 = 0b0011;
pub const TIMER_DIVIDE_MASK: u32 = 0b1011;
pub const TIMER_DIVISOR: u64 = 16;

/// Modo de entrega (ICR bits 8..10, LVT bits 8..10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryMode {
    Fixed = 0,
    LowPriority = 1,
    Smi = 2,
    Nmi = 4,
    Init = 5,
    StartUp = 6,
    ExtInt = 7,
}

impl DeliveryMode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Self::Fixed,
            1 => Self::LowPriority,
            2 => Self::Smi,
            4 => Self::Nmi,
            5 => Self::Init,
            6 => Self::StartUp,
            7 => Self::ExtInt,
            _ => return None,
        })
    }
}

bitflags! {
    /// Bits de controle de uma entrada LVT.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LvtFlags: u32 {
        const TRIGGER_LEVEL = 1 << 14;
        const MASKED = 1 << 16;
        const TIMER_PERIODIC = 1 << 17;
        const TIMER_TSC_DEADLINE = 1 << 18;
    }
}

/// Valor de uma entrada LVT: vetor + modo de entrega + flags.
#[inline]
pub fn lvt(vector: u8, mode: DeliveryMode, flags: LvtFlags) -> u32 {
    vector as u32 | ((mode as u32) << 8) | flags.bits()
}

/// Modo do timer local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot,
    Periodic,
    TscDeadline,
}

impl TimerMode {
    pub fn lvt_flags(self) -> LvtFlags {
        match self {
            Self::OneShot => LvtFlags::empty(),
            Self::Periodic => LvtFlags::TIMER_PERIODIC,
            Self::TscDeadline => LvtFlags::TIMER_TSC_DEADLINE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x2_msr_mapping() {
        assert_eq!(x2_msr(REG_ID), 0x802);
        assert_eq!(x2_msr(REG_ICR_LOW), 0x830);
        assert_eq!(x2_msr(REG_TIMER_CURRENT_COUNT), 0x839);
        assert_eq!(x2_msr(REG_TIMER_CONFIGURATION), 0x83E);
    }

    #[test]
    fn test_lvt_encoding() {
        assert_eq!(lvt(ERROR_VECTOR, DeliveryMode::Fixed, LvtFlags::empty()), 0xFE);
        assert_eq!(
            lvt(0, DeliveryMode::ExtInt, LvtFlags::MASKED),
            (7 << 8) | (1 << 16)
        );
        assert_eq!(
            lvt(TIMER_VECTOR, DeliveryMode::Fixed, TimerMode::Periodic.lvt_flags()),
            0xFC | (1 << 17)
        );
    }
}
