//! Timer do Local APIC.
//!
//! Calibrado uma vez no BSP contra o delay da CPU e depois programado por
//! cada CPU no seu próprio LAPIC (`enable_local_timer`). Assume o papel de
//! timer de sistema quando a calibração é aceita.

use ::core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::lapic::LocalApic;
use super::regs::{TimerMode, TIMER_DIVISOR, TIMER_VECTOR};
use crate::drivers::timer::{HardwareTimer, TimerCapabilities, TimerKind};
use crate::sys::{KResult, KernelError};

/// Janela de calibração.
const CALIBRATION_US: u64 = 100_000;
/// Contagem inicial usada na calibração.
const CALIBRATION_COUNT: u32 = 0xFFFF_FFFF;
/// Barramento abaixo disso é tratado como calibração inválida.
const MIN_BUS_FREQUENCY: u64 = 1_000_000;

pub struct ApicTimer {
    apic: &'static LocalApic,
    /// Ticks do timer por segundo (já dividido por 16)
    rate: u64,
    reload: AtomicU32,
    frequency: AtomicU64,
    periodic: AtomicBool,
}

impl ApicTimer {
    /// Mede a taxa do timer: one-shot mascarado, 100 ms de delay, contagem
    /// consumida x 10.
    pub fn calibrate(apic: &'static LocalApic) -> KResult<Self> {
        crate::kdebug!("(APIC) Calibrando timer local...");
        apic.setup_local_timer(CALIBRATION_COUNT, TimerMode::OneShot, false);
        apic.cpu().microseconds_delay(CALIBRATION_US);
        let remaining = apic.timer_current_count();
        apic.setup_local_timer(0, TimerMode::OneShot, false);

        let consumed = (CALIBRATION_COUNT - remaining) as u64;
        let rate = consumed * (1_000_000 / CALIBRATION_US);
        let bus = rate * TIMER_DIVISOR;
        if bus < MIN_BUS_FREQUENCY {
            crate::kwarn!("(APIC) Calibração rejeitada, barramento (Hz): ", bus);
            return Err(KernelError::TimerUnavailable);
        }

        crate::kinfo!("(APIC) Timer calibrado (ticks/s): ", rate);
        Ok(Self {
            apic,
            rate,
            reload: AtomicU32::new(0),
            frequency: AtomicU64::new(0),
            periodic: AtomicBool::new(true),
        })
    }

    /// Taxa calibrada (ticks do timer por segundo).
    pub fn rate(&self) -> u64 {
        self.rate
    }

    fn mode(&self) -> TimerMode {
        if self.periodic.load(Ordering::Acquire) {
            TimerMode::Periodic
        } else {
            TimerMode::OneShot
        }
    }

    fn reload_for(&self, frequency: u64) -> u64 {
        (self.rate / frequency.max(1)).clamp(1, u32::MAX as u64)
    }

    /// Programa o timer no LAPIC da CPU atual com a frequência corrente.
    pub fn enable_local_timer(&self) {
        let reload = self.reload.load(Ordering::Acquire);
        if reload == 0 {
            return;
        }
        self.apic.setup_local_timer(reload, self.mode(), true);
    }
}

impl HardwareTimer for ApicTimer {
    fn name(&self) -> &'static str {
        "APIC"
    }

    fn kind(&self) -> TimerKind {
        TimerKind::LocalApic
    }

    fn capabilities(&self) -> TimerCapabilities {
        TimerCapabilities::PERIODIC | TimerCapabilities::PER_CPU
    }

    fn interrupt_vector(&self) -> u8 {
        TIMER_VECTOR
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
        self.apic.setup_local_timer(0, TimerMode::OneShot, false);
    }

    /// EOI no LAPIC local.
    fn acknowledge(&self) {
        self.apic.end_of_interrupt();
    }

    fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Acquire)
    }

    fn is_capable_of_frequency(&self, frequency: u64) -> bool {
        frequency > 0 && frequency <= self.rate
    }

    fn calculate_nearest_possible_frequency(&self, frequency: u64) -> u64 {
        self.rate / self.reload_for(frequency)
    }

    fn try_to_set_frequency(&self, frequency: u64) -> KResult<u64> {
        if !self.is_capable_of_frequency(frequency) {
            return Err(KernelError::InvalidArgument);
        }
        let reload = self.reload_for(frequency);
        let actual = self.rate / reload;
        self.reload.store(reload as u32, Ordering::Release);
        self.frequency.store(actual, Ordering::Release);
        self.enable_local_timer();
        crate::kinfo!("(APIC) Timer local (Hz): ", actual);
        Ok(actual)
    }
}
