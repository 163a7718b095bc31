//! RTC (Real Time Clock) via CMOS.
//!
//! Dois usos:
//! - Interrupção periódica (IRQ 8) em potências de dois de 2 a 8192 Hz.
//!   No caminho legado é o timer de sistema.
//! - `boot_time()`: data/hora do CMOS convertida para segundos Unix, usada
//!   como relógio de parede inicial.

use ::core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{HardwareTimer, TimerCapabilities, TimerKind};
use crate::arch::x86_64::apic::regs::IRQ_VECTOR_BASE;
use crate::arch::PortIo;
use crate::klib::bits::bcd_to_binary;
use crate::sys::{KResult, KernelError};

const CMOS_INDEX: u16 = 0x70;
const CMOS_DATA: u16 = 0x71;
/// Bit 7 do índice desabilita NMI durante o acesso.
const NMI_DISABLE: u8 = 0x80;

const REG_SECONDS: u8 = 0x00;
const REG_MINUTES: u8 = 0x02;
const REG_HOURS: u8 = 0x04;
const REG_DAY: u8 = 0x07;
const REG_MONTH: u8 = 0x08;
const REG_YEAR: u8 = 0x09;
const REG_A: u8 = 0x0A;
const REG_B: u8 = 0x0B;
const REG_C: u8 = 0x0C;
const REG_CENTURY: u8 = 0x32;

const A_UPDATE_IN_PROGRESS: u8 = 1 << 7;
const A_RATE_MASK: u8 = 0x0F;
const B_PERIODIC_INTERRUPT: u8 = 1 << 6;
const B_BINARY: u8 = 1 << 2;
const B_24_HOUR: u8 = 1 << 1;
const HOUR_PM: u8 = 0x80;

/// Oscilador de 32.768 kHz; frequência = 32768 >> (rate - 1).
const BASE_FREQUENCY: u64 = 32_768;
const MIN_RATE: u8 = 3; // 8192 Hz
const MAX_RATE: u8 = 15; // 2 Hz

const IRQ: u8 = 8;

pub struct Rtc {
    ports: &'static dyn PortIo,
    frequency: AtomicU64,
    enabled: AtomicBool,
}

impl Rtc {
    pub fn new(ports: &'static dyn PortIo) -> Self {
        Self {
            ports,
            frequency: AtomicU64::new(0),
            enabled: AtomicBool::new(false),
        }
    }

    fn read(&self, reg: u8) -> u8 {
        self.ports.outb(CMOS_INDEX, reg | NMI_DISABLE);
        self.ports.inb(CMOS_DATA)
    }

    fn write(&self, reg: u8, value: u8) {
        self.ports.outb(CMOS_INDEX, reg | NMI_DISABLE);
        self.ports.outb(CMOS_DATA, value);
    }

    const fn rate_frequency(rate: u8) -> u64 {
        BASE_FREQUENCY >> (rate - 1)
    }

    /// Rate cuja frequência é a mais próxima de `frequency`.
    fn nearest_rate(frequency: u64) -> u8 {
        let mut best = MAX_RATE;
        for rate in MIN_RATE..=MAX_RATE {
            let diff = Self::rate_frequency(rate).abs_diff(frequency);
            if diff < Self::rate_frequency(best).abs_diff(frequency) {
                best = rate;
            }
        }
        best
    }

    fn set_periodic_interrupt(&self, enabled: bool) {
        let b = self.read(REG_B);
        let b = if enabled {
            b | B_PERIODIC_INTERRUPT
        } else {
            b & !B_PERIODIC_INTERRUPT
        };
        self.write(REG_B, b);
        // Limpa interrupção pendente
        self.read(REG_C);
    }

    /// Lê data/hora do CMOS e converte para segundos desde 1970-01-01 UTC.
    pub fn boot_time(&self) -> u64 {
        while self.read(REG_A) & A_UPDATE_IN_PROGRESS != 0 {
            ::core::hint::spin_loop();
        }

        let status_b = self.read(REG_B);
        let decode = |raw: u8| {
            if status_b & B_BINARY != 0 {
                raw
            } else {
                bcd_to_binary(raw)
            }
        };

        let second = decode(self.read(REG_SECONDS));
        let minute = decode(self.read(REG_MINUTES));
        let raw_hour = self.read(REG_HOURS);
        let day = decode(self.read(REG_DAY));
        let month = decode(self.read(REG_MONTH));
        let year = decode(self.read(REG_YEAR));
        let century = decode(self.read(REG_CENTURY));

        let mut hour = decode(raw_hour & !HOUR_PM);
        if status_b & B_24_HOUR == 0 {
            // 12 h: 12 AM = 0, 12 PM = 12
            hour %= 12;
            if raw_hour & HOUR_PM != 0 {
                hour += 12;
            }
        }

        let full_year = if (19..=99).contains(&century) {
            century as u64 * 100 + year as u64
        } else {
            2000 + year as u64
        };

        let seconds = unix_seconds(
            full_year,
            month as u64,
            day as u64,
            hour as u64,
            minute as u64,
            second as u64,
        );
        crate::kinfo!("(RTC) Hora de boot (Unix): ", seconds);
        seconds
    }
}

/// Segundos Unix de uma data civil (calendário gregoriano, UTC).
pub fn unix_seconds(year: u64, month: u64, day: u64, hour: u64, minute: u64, second: u64) -> u64 {
    let month = month.clamp(1, 12);
    let day = day.max(1);
    // Ano começando em março: fevereiro é o último mês
    let y = if month <= 2 { year - 1 } else { year };
    let era = y / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe;
    // 719468 = dias de 0000-03-01 até 1970-01-01
    let days = days.saturating_sub(719_468);
    days * 86_400 + hour * 3600 + minute * 60 + second
}

impl HardwareTimer for Rtc {
    fn name(&self) -> &'static str {
        "RTC"
    }

    fn kind(&self) -> TimerKind {
        TimerKind::Rtc
    }

    fn capabilities(&self) -> TimerCapabilities {
        TimerCapabilities::PERIODIC
    }

    fn interrupt_vector(&self) -> u8 {
        IRQ_VECTOR_BASE + IRQ
    }

    fn is_periodic(&self) -> bool {
        true
    }

    fn set_periodic(&self) {}

    fn set_non_periodic(&self) {}

    fn disable(&self) {
        self.set_periodic_interrupt(false);
        self.enabled.store(false, Ordering::Release);
        crate::kdebug!("(RTC) Interrupção periódica desabilitada");
    }

    fn acknowledge(&self) {
        // Sem ler o registrador C o RTC não gera a próxima interrupção
        self.read(REG_C);
    }

    fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Acquire)
    }

    fn is_capable_of_frequency(&self, frequency: u64) -> bool {
        let range = Self::rate_frequency(MAX_RATE)..=Self::rate_frequency(MIN_RATE);
        frequency.is_power_of_two() && range.contains(&frequency)
    }

    fn calculate_nearest_possible_frequency(&self, frequency: u64) -> u64 {
        Self::rate_frequency(Self::nearest_rate(frequency))
    }

    fn try_to_set_frequency(&self, frequency: u64) -> KResult<u64> {
        if frequency == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let rate = Self::nearest_rate(frequency);
        let a = self.read(REG_A);
        self.write(REG_A, (a & !A_RATE_MASK) | rate);
        self.set_periodic_interrupt(true);

        let actual = Self::rate_frequency(rate);
        self.frequency.store(actual, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
        crate::kinfo!("(RTC) Frequência configurada (Hz): ", actual);
        Ok(actual)
    }
}
