//! Driver do PIT (Programmable Interval Timer) - Intel 8253/8254.
//!
//! Timer legado da arquitetura x86. Sem HPET, é o time-keeper do sistema.
//!
//! # Limitações
//! - Frequência base fixa de ~1.19 MHz, divisor de 16 bits (>= ~18.2 Hz).
//! - Depende do IRQ 0.
//! - Não tem contador consultável com precisão (usar HPET para isso).

use ::core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{nearest_divisor, HardwareTimer, TickPeriod, TimerCapabilities, TimerKind};
use crate::arch::x86_64::apic::regs::IRQ_VECTOR_BASE;
use crate::arch::PortIo;
use crate::sys::{KResult, KernelError};

/// Frequência base do oscilador do PIT (1.193182 MHz).
pub const BASE_FREQUENCY: u64 = 1_193_182;

// Portas de I/O do PIT
const PORT_CHANNEL0: u16 = 0x40; // Canal 0 (System Timer)
const PORT_COMMAND: u16 = 0x43; // Registrador de Comando

/// Canal 0, lobyte/hibyte, modo 3 (square wave), binário.
const COMMAND_PERIODIC: u8 = 0x36;
/// Canal 0, lobyte/hibyte, modo 0 (interrupt on terminal count).
const COMMAND_ONE_SHOT: u8 = 0x30;

const IRQ: u8 = 0;

/// Driver do Programmable Interval Timer.
pub struct Pit {
    ports: &'static dyn PortIo,
    frequency: AtomicU64,
    /// Divisor programado no canal 0 (0 = não programado)
    divisor: AtomicU64,
    periodic: AtomicBool,
    enabled: AtomicBool,
}

impl Pit {
    pub fn new(ports: &'static dyn PortIo) -> Self {
        Self {
            ports,
            frequency: AtomicU64::new(0),
            divisor: AtomicU64::new(0),
            periodic: AtomicBool::new(true),
            enabled: AtomicBool::new(false),
        }
    }

    fn program(&self, divisor: u64) {
        let command = if self.periodic.load(Ordering::Acquire) {
            COMMAND_PERIODIC
        } else {
            COMMAND_ONE_SHOT
        };
        // Divisor 65536 é codificado como 0
        let raw = (divisor & 0xFFFF) as u16;
        self.ports.outb(PORT_COMMAND, command);
        self.ports.outb(PORT_CHANNEL0, (raw & 0xFF) as u8);
        self.ports.outb(PORT_CHANNEL0, (raw >> 8) as u8);
        crate::ktrace!("(PIT) Divisor programado: ", divisor);
    }

    fn divisor_for(frequency: u64) -> u64 {
        nearest_divisor(BASE_FREQUENCY, frequency, 1, 65536)
    }
}

impl HardwareTimer for Pit {
    fn name(&self) -> &'static str {
        "PIT"
    }

    fn kind(&self) -> TimerKind {
        TimerKind::Pit
    }

    fn capabilities(&self) -> TimerCapabilities {
        TimerCapabilities::PERIODIC
    }

    fn interrupt_vector(&self) -> u8 {
        IRQ_VECTOR_BASE + IRQ
    }

    fn is_periodic(&self) -> bool {
        self.periodic.load(Ordering::Acquire)
    }

    fn set_periodic(&self) {
        self.periodic.store(true, Ordering::Release);
    }

    fn set_non_periodic(&self) {
        self.periodic.store(false, Ordering::Release);
    }

    fn disable(&self) {
        // Modo one-shot sem recarga: para de gerar ticks
        self.ports.outb(PORT_COMMAND, COMMAND_ONE_SHOT);
        self.enabled.store(false, Ordering::Release);
        crate::kdebug!("(PIT) Desabilitado");
    }

    fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Acquire)
    }

    fn is_capable_of_frequency(&self, frequency: u64) -> bool {
        frequency > 0 && frequency <= BASE_FREQUENCY
    }

    fn calculate_nearest_possible_frequency(&self, frequency: u64) -> u64 {
        BASE_FREQUENCY / Self::divisor_for(frequency)
    }

    fn try_to_set_frequency(&self, frequency: u64) -> KResult<u64> {
        if !self.is_capable_of_frequency(frequency) {
            crate::kwarn!("(PIT) Frequência inválida: ", frequency);
            return Err(KernelError::InvalidArgument);
        }
        let divisor = Self::divisor_for(frequency);
        self.program(divisor);
        let actual = BASE_FREQUENCY / divisor;
        self.divisor.store(divisor, Ordering::Release);
        self.frequency.store(actual, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
        crate::kinfo!("(PIT) Frequência configurada (Hz): ", actual);
        Ok(actual)
    }

    fn tick_period(&self) -> TickPeriod {
        match self.divisor.load(Ordering::Acquire) {
            0 => TickPeriod::hertz(0),
            divisor => TickPeriod {
                units: divisor,
                units_per_second: BASE_FREQUENCY,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock::{leak, MockPorts};

    #[test]
    fn test_rate_generator_programming() {
        let ports = leak(MockPorts::new());
        let pit = Pit::new(ports);
        let actual = pit.try_to_set_frequency(1000).unwrap();
        assert_eq!(actual, BASE_FREQUENCY / 1193);
        assert_eq!(
            ports.writes(),
            alloc::vec![(0x43, 0x36), (0x40, (1193 & 0xFF) as u8), (0x40, (1193 >> 8) as u8)]
        );
    }

    #[test]
    fn test_nearest_frequency_snaps() {
        let ports = leak(MockPorts::new());
        let pit = Pit::new(ports);
        // Abaixo de ~18.2 Hz o divisor satura em 65536
        assert_eq!(pit.calculate_nearest_possible_frequency(1), BASE_FREQUENCY / 65536);
        assert_eq!(pit.calculate_nearest_possible_frequency(250), BASE_FREQUENCY / 4773);
        assert_eq!(pit.try_to_set_frequency(0), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_tick_period_follows_divisor() {
        let ports = leak(MockPorts::new());
        let pit = Pit::new(ports);
        assert_eq!(pit.tick_period(), TickPeriod::hertz(0));

        // 250 Hz pedidos: divisor 4773, ~249.985 Hz reais, 249 reportados
        assert_eq!(pit.try_to_set_frequency(250), Ok(249));
        assert_eq!(
            pit.tick_period(),
            TickPeriod {
                units: 4773,
                units_per_second: BASE_FREQUENCY
            }
        );
    }
}
