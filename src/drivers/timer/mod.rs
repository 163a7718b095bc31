//! # Timers de Hardware
//!
//! Interface única de capacidades (`HardwareTimer`) implementada por cada
//! dispositivo; o `registry` escolhe quem assume cada papel.
//!
//! | Dispositivo | Arquivo | Periódico | Consulta precisa |
//! |-------------|---------|-----------|------------------|
//! | PIT 8254 | `pit.rs` | sim | não |
//! | RTC (CMOS) | `rtc.rs` | sim (2..8192 Hz, potências de 2) | não |
//! | HPET | `hpet.rs` | por comparador | sim (main counter) |
//! | APIC timer | `arch::x86_64::apic::timer` | sim (por CPU) | não |

pub mod hpet;
pub mod pit;
pub mod registry;
pub mod rtc;

use bitflags::bitflags;

use crate::sys::KResult;

pub use registry::{TimerRegistry, TimerRoles};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Pit,
    Rtc,
    HpetComparator,
    LocalApic,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerCapabilities: u32 {
        /// Suporta modo periódico
        const PERIODIC = 1 << 0;
        /// Tem contador livre consultável entre interrupções
        const PRECISE_QUERY = 1 << 1;
        /// Uma instância por CPU (APIC timer)
        const PER_CPU = 1 << 2;
    }
}

/// Período de interrupção exato: `units / units_per_second` segundos.
///
/// A frequência em Hz é truncada; o relógio avança pelo período real para
/// não acumular deriva (PIT: 4773 / 1193182 s, não 1/249 s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPeriod {
    pub units: u64,
    pub units_per_second: u64,
}

impl TickPeriod {
    /// Período de um dispositivo que interrompe exatamente a `frequency` Hz.
    pub const fn hertz(frequency: u64) -> Self {
        Self {
            units: 1,
            units_per_second: frequency,
        }
    }

    /// Duração do período em nanossegundos (truncada).
    pub fn as_nanos(&self) -> u64 {
        if self.units_per_second == 0 {
            return 0;
        }
        (self.units as u128 * 1_000_000_000 / self.units_per_second as u128) as u64
    }
}

/// Contador livre de alta resolução (HPET main counter).
pub trait PreciseCounter: Sync {
    /// Frequência do contador.
    fn ticks_per_second(&self) -> u64;

    /// Dobra o avanço do contador desde a última atualização em
    /// `(seconds, ticks)` e retorna os nanossegundos decorridos.
    ///
    /// Com `query_only` o ponto de referência interno não avança (leitores).
    fn update_time(&self, seconds: &mut u64, ticks: &mut u32, query_only: bool) -> u64;
}

/// Capacidades comuns de um timer de hardware.
pub trait HardwareTimer: Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> TimerKind;
    fn capabilities(&self) -> TimerCapabilities;
    fn interrupt_vector(&self) -> u8;

    fn is_periodic(&self) -> bool;
    fn set_periodic(&self);
    fn set_non_periodic(&self);
    fn disable(&self);

    /// Frequência de interrupção atual (Hz).
    fn frequency(&self) -> u64;
    fn is_capable_of_frequency(&self, frequency: u64) -> bool;
    fn calculate_nearest_possible_frequency(&self, frequency: u64) -> u64;

    /// Programa a frequência mais próxima de `frequency` e retorna a obtida.
    fn try_to_set_frequency(&self, frequency: u64) -> KResult<u64>;

    /// Período real entre interrupções.
    fn tick_period(&self) -> TickPeriod {
        TickPeriod::hertz(self.frequency())
    }

    /// Confirma a interrupção no dispositivo (ex: leitura do registrador C do RTC).
    fn acknowledge(&self) {}

    fn is_periodic_capable(&self) -> bool {
        self.capabilities().contains(TimerCapabilities::PERIODIC)
    }

    /// Contador preciso associado, se houver.
    fn precise_counter(&self) -> Option<&'static dyn PreciseCounter> {
        None
    }
}

/// Identidade de um timer (endereço do objeto), comparável sem lock.
#[inline]
pub fn timer_id(timer: &dyn HardwareTimer) -> usize {
    timer as *const dyn HardwareTimer as *const () as usize
}

/// Divisor inteiro mais próximo de `base / target`, limitado a `[min, max]`.
pub(crate) fn nearest_divisor(base: u64, target: u64, min: u64, max: u64) -> u64 {
    if target == 0 {
        return max;
    }
    let divisor = (base + target / 2) / target;
    divisor.clamp(min, max)
}
