//! HPET (High Precision Event Timer).
//!
//! - Main counter livre, consultável a qualquer momento: é a fonte precisa
//!   do relógio (`PreciseCounter`).
//! - Cada comparador é um `HardwareTimer` independente; alguns suportam modo
//!   periódico.
//! - Legacy replacement fica desligado: os comparadores usam a rota de IRQ
//!   anunciada em `Tn_INT_ROUTE_CAP`.

use ::core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloc::vec::Vec;
use bitflags::bitflags;

use super::{nearest_divisor, HardwareTimer, PreciseCounter, TimerCapabilities, TimerKind};
use crate::arch::x86_64::apic::regs::IRQ_VECTOR_BASE;
use crate::klib::bits::{get_field, set_field};
use crate::klib::mmio::MmioWindow;
use crate::mm::{MemoryManager, PAGE_SIZE};
use crate::sys::{KResult, KernelError};

const REG_CAPABILITIES: usize = 0x000;
const REG_CONFIGURATION: usize = 0x010;
const REG_MAIN_COUNTER: usize = 0x0F0;

const fn timer_config(n: usize) -> usize {
    0x100 + 0x20 * n
}

const fn timer_comparator(n: usize) -> usize {
    0x108 + 0x20 * n
}

/// Período máximo permitido pela especificação (100 ns em femtossegundos).
const MAX_PERIOD_FS: u64 = 100_000_000;
const FEMTOS_PER_SECOND: u64 = 1_000_000_000_000_000;
const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Máximo de comparadores endereçáveis na janela de 4 KiB.
const MAX_COMPARATORS: usize = 32;

bitflags! {
    /// GCAP_ID (bits baixos).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HpetCapabilities: u64 {
        const COUNTER_64BIT = 1 << 13;
        const LEGACY_REPLACEMENT = 1 << 15;
    }
}

bitflags! {
    /// GEN_CONF.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HpetConfig: u64 {
        const ENABLE = 1 << 0;
        const LEGACY_REPLACEMENT = 1 << 1;
    }
}

bitflags! {
    /// Tn_CONF_CAP.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ComparatorConfig: u64 {
        const LEVEL_TRIGGERED = 1 << 1;
        const INTERRUPT_ENABLE = 1 << 2;
        const PERIODIC = 1 << 3;
        const PERIODIC_CAPABLE = 1 << 4;
        const SIZE_64BIT = 1 << 5;
        const VALUE_SET = 1 << 6;
    }
}

pub struct Hpet {
    regs: MmioWindow,
    period_fs: u64,
    frequency: u64,
    counter_64bit: bool,
    comparator_count: usize,
    last_counter: AtomicU64,
}

impl Hpet {
    /// Mapeia e valida o HPET em `phys`, desliga legacy replacement e liga o
    /// main counter.
    pub fn probe(memory: &dyn MemoryManager, phys: u64) -> KResult<Self> {
        let regs = memory.map_mmio(phys, PAGE_SIZE).map_err(|e| {
            crate::kerror!("(HPET) Falha ao mapear registradores em ", phys);
            e
        })?;
        Self::from_window(regs)
    }

    /// Inicializa sobre uma janela já mapeada.
    pub fn from_window(regs: MmioWindow) -> KResult<Self> {
        let caps = regs.read_u64(REG_CAPABILITIES);
        let period_fs = get_field(caps, 32, 32);
        if period_fs == 0 || period_fs > MAX_PERIOD_FS {
            crate::kwarn!("(HPET) Período inválido (fs): ", period_fs);
            return Err(KernelError::TimerUnavailable);
        }

        let counter_64bit = HpetCapabilities::from_bits_truncate(caps)
            .contains(HpetCapabilities::COUNTER_64BIT);
        let comparator_count = (get_field(caps, 8, 5) as usize + 1).min(MAX_COMPARATORS);
        let frequency = FEMTOS_PER_SECOND / period_fs;

        let hpet = Self {
            regs,
            period_fs,
            frequency,
            counter_64bit,
            comparator_count,
            last_counter: AtomicU64::new(0),
        };

        // Parar, zerar e religar o main counter sem legacy replacement
        let mut config = HpetConfig::from_bits_retain(regs.read_u64(REG_CONFIGURATION));
        config.remove(HpetConfig::ENABLE | HpetConfig::LEGACY_REPLACEMENT);
        regs.write_u64(REG_CONFIGURATION, config.bits());
        regs.write_u64(REG_MAIN_COUNTER, 0);
        config.insert(HpetConfig::ENABLE);
        regs.write_u64(REG_CONFIGURATION, config.bits());

        crate::kinfo!("(HPET) Frequência do main counter (Hz): ", frequency);
        crate::kdebug!("(HPET) Comparadores: ", comparator_count);
        Ok(hpet)
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn period_fs(&self) -> u64 {
        self.period_fs
    }

    pub fn is_counter_64bit(&self) -> bool {
        self.counter_64bit
    }

    pub fn comparator_count(&self) -> usize {
        self.comparator_count
    }

    pub fn read_main_counter(&self) -> u64 {
        if self.counter_64bit {
            self.regs.read_u64(REG_MAIN_COUNTER)
        } else {
            self.regs.read_u32(REG_MAIN_COUNTER) as u64
        }
    }

    /// Cria um `HardwareTimer` por comparador.
    pub fn comparators(&'static self) -> Vec<HpetComparator> {
        (0..self.comparator_count)
            .map(|index| HpetComparator::new(self, index))
            .collect()
    }
}

impl PreciseCounter for Hpet {
    fn ticks_per_second(&self) -> u64 {
        self.frequency
    }

    fn update_time(&self, seconds: &mut u64, ticks: &mut u32, query_only: bool) -> u64 {
        let current = self.read_main_counter();
        let last = self.last_counter.load(Ordering::Acquire);
        let delta = if self.counter_64bit {
            current.wrapping_sub(last)
        } else {
            // Contador de 32 bits deu a volta
            (current as u32).wrapping_sub(last as u32) as u64
        };

        let total = *ticks as u64 + delta;
        *seconds += total / self.frequency;
        *ticks = (total % self.frequency) as u32;

        if !query_only {
            self.last_counter.store(current, Ordering::Release);
        }

        ((delta as u128 * NANOS_PER_SECOND as u128) / self.frequency as u128) as u64
    }
}

/// Um comparador do HPET.
pub struct HpetComparator {
    hpet: &'static Hpet,
    index: usize,
    periodic_capable: bool,
    route: u8,
    periodic: AtomicBool,
    frequency: AtomicU64,
}

impl HpetComparator {
    fn new(hpet: &'static Hpet, index: usize) -> Self {
        let raw = hpet.regs.read_u64(timer_config(index));
        let config = ComparatorConfig::from_bits_truncate(raw);
        let route_cap = get_field(raw, 32, 32) as u32;
        // Primeira rota anunciada; sem anúncio, rota convencional após o IRQ 0/8
        let route = if route_cap != 0 {
            route_cap.trailing_zeros() as u8
        } else {
            2 + index as u8
        };
        let periodic_capable = config.contains(ComparatorConfig::PERIODIC_CAPABLE);
        Self {
            hpet,
            index,
            periodic_capable,
            route,
            periodic: AtomicBool::new(periodic_capable),
            frequency: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn config(&self) -> u64 {
        self.hpet.regs.read_u64(timer_config(self.index))
    }

    fn set_config(&self, value: u64) {
        self.hpet.regs.write_u64(timer_config(self.index), value);
    }

    fn period_ticks(&self, frequency: u64) -> u64 {
        nearest_divisor(self.hpet.frequency, frequency, 1, u32::MAX as u64)
    }
}

impl HardwareTimer for HpetComparator {
    fn name(&self) -> &'static str {
        "HPET"
    }

    fn kind(&self) -> TimerKind {
        TimerKind::HpetComparator
    }

    fn capabilities(&self) -> TimerCapabilities {
        let mut caps = TimerCapabilities::PRECISE_QUERY;
        if self.periodic_capable {
            caps |= TimerCapabilities::PERIODIC;
        }
        caps
    }

    fn interrupt_vector(&self) -> u8 {
        IRQ_VECTOR_BASE + self.route
    }

    fn is_periodic(&self) -> bool {
        self.periodic.load(Ordering::Acquire)
    }

    fn set_periodic(&self) {
        if self.periodic_capable {
            self.periodic.store(true, Ordering::Release);
        }
    }

    fn set_non_periodic(&self) {
        self.periodic.store(false, Ordering::Release);
    }

    fn disable(&self) {
        let mut config = ComparatorConfig::from_bits_retain(self.config());
        config.remove(ComparatorConfig::INTERRUPT_ENABLE);
        self.set_config(config.bits());
        crate::kdebug!("(HPET) Comparador desabilitado: ", self.index);
    }

    fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Acquire)
    }

    fn is_capable_of_frequency(&self, frequency: u64) -> bool {
        frequency > 0 && frequency <= self.hpet.frequency
    }

    fn calculate_nearest_possible_frequency(&self, frequency: u64) -> u64 {
        self.hpet.frequency / self.period_ticks(frequency)
    }

    fn try_to_set_frequency(&self, frequency: u64) -> KResult<u64> {
        if !self.is_capable_of_frequency(frequency) {
            return Err(KernelError::InvalidArgument);
        }
        let ticks = self.period_ticks(frequency);
        let periodic = self.is_periodic();

        let mut config = ComparatorConfig::from_bits_retain(self.config());
        config.remove(ComparatorConfig::LEVEL_TRIGGERED | ComparatorConfig::PERIODIC);
        config.insert(ComparatorConfig::INTERRUPT_ENABLE);
        if periodic {
            config.insert(ComparatorConfig::PERIODIC | ComparatorConfig::VALUE_SET);
        }
        let raw = set_field(config.bits(), 9, 5, self.route as u64);
        self.set_config(raw);

        let first = self.hpet.read_main_counter().wrapping_add(ticks);
        let comparator = timer_comparator(self.index);
        self.hpet.regs.write_u64(comparator, first);
        if periodic {
            // Com VALUE_SET a segunda escrita define o período do acumulador
            self.hpet.regs.write_u64(comparator, ticks);
        }

        let actual = self.hpet.frequency / ticks;
        self.frequency.store(actual, Ordering::Release);
        crate::kinfo!("(HPET) Comparador configurado (Hz): ", actual);
        Ok(actual)
    }

    fn precise_counter(&self) -> Option<&'static dyn PreciseCounter> {
        Some(self.hpet)
    }
}
