//! Interrupt Command Register (ICR).
//!
//! Construído a cada IPI e nunca persistido. Layout do dword baixo:
//!
//! ```text
//! 0..7   vetor          8..10  delivery mode     11  destination mode
//! 12     pending (RO)   14     level             15  trigger mode
//! 18..19 shorthand
//! ```
//!
//! Destino: xAPIC no dword alto bits 24..31; x2APIC nos bits 32..63 do MSR.

use super::regs::DeliveryMode;
use crate::klib::bits::{get_field, set_field};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationMode {
    Physical = 0,
    Logical = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Deassert = 0,
    Assert = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Edge = 0,
    Level = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shorthand {
    None = 0,
    SelfOnly = 1,
    AllIncludingSelf = 2,
    AllExcludingSelf = 3,
}

impl Shorthand {
    fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            1 => Self::SelfOnly,
            2 => Self::AllIncludingSelf,
            3 => Self::AllExcludingSelf,
            _ => Self::None,
        }
    }
}

/// Comando de IPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icr {
    pub vector: u8,
    pub destination: u32,
    pub delivery_mode: DeliveryMode,
    pub destination_mode: DestinationMode,
    pub level: Level,
    pub trigger_mode: TriggerMode,
    pub shorthand: Shorthand,
}

impl Icr {
    /// IPI fixo para um APIC ID (modo físico).
    pub fn fixed(vector: u8, apic_id: u32) -> Self {
        Self {
            vector,
            destination: apic_id,
            delivery_mode: DeliveryMode::Fixed,
            destination_mode: DestinationMode::Physical,
            level: Level::Assert,
            trigger_mode: TriggerMode::Edge,
            shorthand: Shorthand::None,
        }
    }

    /// IPI fixo para todas as CPUs exceto a atual.
    pub fn broadcast(vector: u8) -> Self {
        Self {
            shorthand: Shorthand::AllExcludingSelf,
            ..Self::fixed(vector, 0)
        }
    }

    /// INIT para todos exceto a CPU atual.
    pub fn init_all_excluding_self() -> Self {
        Self {
            delivery_mode: DeliveryMode::Init,
            ..Self::broadcast(0)
        }
    }

    /// STARTUP para todos exceto a CPU atual; `vector` é a página do trampoline.
    pub fn startup_all_excluding_self(vector: u8) -> Self {
        Self {
            delivery_mode: DeliveryMode::StartUp,
            ..Self::broadcast(vector)
        }
    }

    /// INIT para um único APIC ID.
    pub fn init(apic_id: u32) -> Self {
        Self {
            delivery_mode: DeliveryMode::Init,
            ..Self::fixed(0, apic_id)
        }
    }

    /// STARTUP para um único APIC ID.
    pub fn startup(vector: u8, apic_id: u32) -> Self {
        Self {
            delivery_mode: DeliveryMode::StartUp,
            ..Self::fixed(vector, apic_id)
        }
    }

    /// Dword baixo (comum aos dois modos).
    pub fn low(&self) -> u32 {
        let mut v = 0u64;
        v = set_field(v, 0, 8, self.vector as u64);
        v = set_field(v, 8, 3, self.delivery_mode as u64);
        v = set_field(v, 11, 1, self.destination_mode as u64);
        v = set_field(v, 14, 1, self.level as u64);
        v = set_field(v, 15, 1, self.trigger_mode as u64);
        v = set_field(v, 18, 2, self.shorthand as u64);
        v as u32
    }

    /// Dword alto do xAPIC (destino de 8 bits).
    pub fn xapic_high(&self) -> u32 {
        (self.destination & 0xFF) << 24
    }

    /// Valor de 64 bits do MSR ICR do x2APIC.
    pub fn x2_value(&self) -> u64 {
        ((self.destination as u64) << 32) | self.low() as u64
    }

    /// Decodifica um valor x2APIC (útil para inspeção de logs de IPI).
    pub fn from_x2_value(raw: u64) -> Option<Self> {
        Some(Self {
            vector: get_field(raw, 0, 8) as u8,
            destination: get_field(raw, 32, 32) as u32,
            delivery_mode: DeliveryMode::from_bits(get_field(raw, 8, 3) as u8)?,
            destination_mode: if get_field(raw, 11, 1) == 1 {
                DestinationMode::Logical
            } else {
                DestinationMode::Physical
            },
            level: if get_field(raw, 14, 1) == 1 {
                Level::Assert
            } else {
                Level::Deassert
            },
            trigger_mode: if get_field(raw, 15, 1) == 1 {
                TriggerMode::Level
            } else {
                TriggerMode::Edge
            },
            shorthand: Shorthand::from_bits(get_field(raw, 18, 2)),
        })
    }
}
