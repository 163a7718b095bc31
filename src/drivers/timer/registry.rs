//! Registro de timers e atribuição de papéis.
//!
//! Três papéis, cada um com no máximo um dono:
//! - `TIME_KEEPER`: avança o relógio (`TimeKeeping`).
//! - `SYSTEM`: tick do scheduler.
//! - `PROFILE`: amostragem de profiling (opcional).
//!
//! A tabela de papéis guarda apenas a identidade do dispositivo em atômicos;
//! o despacho de IRQ consulta sem lock. A lista de dispositivos é fixada na
//! seleção, e a única adição posterior é o timer do APIC (`promote_system_timer`).

use ::core::sync::atomic::{AtomicUsize, Ordering};

use alloc::vec::Vec;
use bitflags::bitflags;
use spin::{Mutex, Once};

use super::{timer_id, HardwareTimer, PreciseCounter, TickPeriod, TimerCapabilities};
use crate::sys::{KResult, KernelError};

/// Frequência alvo do timer de sistema.
pub const OPTIMAL_TICKS_PER_SECOND: u64 = 250;
/// Profiling desligado: o timer de profile fica quase parado.
pub const PROFILE_FREQUENCY_IDLE: u64 = 1;
/// Profiling ligado.
pub const PROFILE_FREQUENCY_ACTIVE: u64 = 1000;
/// RTC como timer de sistema no caminho legado.
pub const LEGACY_SYSTEM_FREQUENCY: u64 = 1024;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerRoles: u8 {
        const TIME_KEEPER = 1 << 0;
        const SYSTEM = 1 << 1;
        const PROFILE = 1 << 2;
    }
}

/// Política de seleção (vinda da linha de comando).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Comparadores periódicos do HPET podem ser usados em modo periódico
    pub allow_periodic: bool,
    /// Timer de profile já nasce em `PROFILE_FREQUENCY_ACTIVE`
    pub profiling: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            allow_periodic: true,
            profiling: false,
        }
    }
}

/// Timers legados do PC (sempre presentes em x86).
#[derive(Clone, Copy)]
pub struct LegacyTimers {
    pub pit: &'static dyn HardwareTimer,
    pub rtc: &'static dyn HardwareTimer,
}

pub struct TimerRegistry {
    devices: Vec<&'static dyn HardwareTimer>,
    /// Timer do APIC, adicionado após a calibração
    promoted: Once<&'static dyn HardwareTimer>,
    time_keeper: AtomicUsize,
    system: AtomicUsize,
    profile: AtomicUsize,
    /// Contador livre do time-keeper original (HPET)
    precise: Option<&'static dyn PreciseCounter>,
    profile_refs: Mutex<u32>,
    legacy: bool,
}

impl TimerRegistry {
    fn empty(devices: Vec<&'static dyn HardwareTimer>, legacy: bool) -> Self {
        Self {
            devices,
            promoted: Once::new(),
            time_keeper: AtomicUsize::new(0),
            system: AtomicUsize::new(0),
            profile: AtomicUsize::new(0),
            precise: None,
            profile_refs: Mutex::new(0),
            legacy,
        }
    }

    /// Escolhe os dispositivos de cada papel.
    ///
    /// `candidates` são os timers não legados (comparadores do HPET). Sem
    /// candidatos utilizáveis recorre aos legados; sem nenhum dos dois o
    /// resultado é `TimerUnavailable`, que o chamador trata como fatal.
    pub fn select(
        candidates: &[&'static dyn HardwareTimer],
        legacy: Option<LegacyTimers>,
        policy: SelectionPolicy,
    ) -> KResult<Self> {
        if !candidates.is_empty() {
            match Self::select_precise(candidates, policy) {
                Ok(registry) => return Ok(registry),
                Err(e) => crate::kwarn!("(Time) Timers precisos inutilizáveis: ", e as u64),
            }
        }

        match legacy {
            Some(legacy) => Self::select_legacy(legacy),
            None => {
                crate::kerror!("(Time) Nenhum timer de hardware disponível");
                Err(KernelError::TimerUnavailable)
            }
        }
    }

    fn select_precise(
        candidates: &[&'static dyn HardwareTimer],
        policy: SelectionPolicy,
    ) -> KResult<Self> {
        let mut periodic = Vec::new();
        let mut non_periodic = Vec::new();
        for &timer in candidates {
            if policy.allow_periodic && timer.is_periodic_capable() {
                timer.set_periodic();
                periodic.push(timer);
            } else {
                timer.set_non_periodic();
                non_periodic.push(timer);
            }
        }
        crate::kdebug!("(Time) Timers periódicos: ", periodic.len());
        crate::kdebug!("(Time) Timers one-shot: ", non_periodic.len());

        // Preferência: periódicos primeiro
        let ordered: Vec<_> = periodic.into_iter().chain(non_periodic).collect();
        let mut remaining = ordered.iter().copied();
        let system = remaining.next().ok_or(KernelError::TimerUnavailable)?;
        system.try_to_set_frequency(OPTIMAL_TICKS_PER_SECOND)?;

        let mut registry = Self::empty(ordered.clone(), false);
        registry.precise = system.precise_counter();
        registry.system.store(timer_id(system), Ordering::Release);
        registry.time_keeper.store(timer_id(system), Ordering::Release);

        if let Some(profile) = remaining.next() {
            let target = if policy.profiling {
                PROFILE_FREQUENCY_ACTIVE
            } else {
                PROFILE_FREQUENCY_IDLE
            };
            match profile.try_to_set_frequency(target) {
                Ok(_) => {
                    registry.profile.store(timer_id(profile), Ordering::Release);
                    if policy.profiling {
                        *registry.profile_refs.lock() = 1;
                    }
                }
                Err(_) => crate::kwarn!("(Time) Timer de profile rejeitou a frequência"),
            }
        }

        for timer in remaining {
            timer.disable();
        }

        crate::kinfo!("(Time) Time-keeper: comparador HPET, Hz=", system.frequency());
        Ok(registry)
    }

    fn select_legacy(legacy: LegacyTimers) -> KResult<Self> {
        legacy.pit.set_periodic();
        legacy.pit.try_to_set_frequency(OPTIMAL_TICKS_PER_SECOND).map_err(|_| {
            crate::kerror!("(Time) PIT não aceitou a frequência do sistema");
            KernelError::TimerUnavailable
        })?;

        let registry = Self::empty(alloc::vec![legacy.pit, legacy.rtc], true);
        registry.time_keeper.store(timer_id(legacy.pit), Ordering::Release);

        let system = match legacy.rtc.try_to_set_frequency(LEGACY_SYSTEM_FREQUENCY) {
            Ok(_) => legacy.rtc,
            Err(_) => {
                crate::kwarn!("(Time) RTC indisponível, PIT acumula o tick de sistema");
                legacy.pit
            }
        };
        registry.system.store(timer_id(system), Ordering::Release);

        crate::kinfo!("(Time) Modo legado: PIT time-keeper, Hz=", legacy.pit.frequency());
        Ok(registry)
    }

    /// Todos os dispositivos registrados (incluindo o promovido).
    pub fn devices(&self) -> impl Iterator<Item = &'static dyn HardwareTimer> + '_ {
        self.devices.iter().copied().chain(self.promoted.get().copied())
    }

    fn find(&self, id: usize) -> Option<&'static dyn HardwareTimer> {
        if id == 0 {
            return None;
        }
        self.devices().find(|timer| timer_id(*timer) == id)
    }

    pub fn time_keeper(&self) -> Option<&'static dyn HardwareTimer> {
        self.find(self.time_keeper.load(Ordering::Acquire))
    }

    pub fn system_timer(&self) -> Option<&'static dyn HardwareTimer> {
        self.find(self.system.load(Ordering::Acquire))
    }

    pub fn profile_timer(&self) -> Option<&'static dyn HardwareTimer> {
        self.find(self.profile.load(Ordering::Acquire))
    }

    /// Papéis ocupados por `timer`.
    pub fn roles_of(&self, timer: &dyn HardwareTimer) -> TimerRoles {
        let id = timer_id(timer);
        let mut roles = TimerRoles::empty();
        if self.time_keeper.load(Ordering::Acquire) == id {
            roles |= TimerRoles::TIME_KEEPER;
        }
        if self.system.load(Ordering::Acquire) == id {
            roles |= TimerRoles::SYSTEM;
        }
        if self.profile.load(Ordering::Acquire) == id {
            roles |= TimerRoles::PROFILE;
        }
        roles
    }

    /// Dispositivo com papel que interrompe em `vector`.
    pub fn device_for_vector(&self, vector: u8) -> Option<&'static dyn HardwareTimer> {
        self.devices()
            .find(|timer| timer.interrupt_vector() == vector && !self.roles_of(*timer).is_empty())
    }

    /// Contador livre para consultas precisas (HPET), se houver.
    pub fn precise_counter(&self) -> Option<&'static dyn PreciseCounter> {
        self.precise
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// O time-keeper interrompe em todas as CPUs (APIC timer): só o BSP
    /// atualiza o relógio.
    pub fn time_keeper_is_per_cpu(&self) -> bool {
        self.time_keeper()
            .is_some_and(|t| t.capabilities().contains(TimerCapabilities::PER_CPU))
    }

    /// Ticks por segundo do relógio: frequência do contador preciso, ou a
    /// frequência de interrupção do time-keeper.
    pub fn ticks_per_second(&self) -> u64 {
        if let Some(counter) = self.precise {
            return counter.ticks_per_second();
        }
        self.time_keeper().map_or(0, |t| t.frequency())
    }

    /// Unidade e passo do relógio: com contador preciso, o próprio contador;
    /// senão o período real de interrupção do time-keeper.
    pub fn clock_period(&self) -> TickPeriod {
        if let Some(counter) = self.precise {
            return TickPeriod::hertz(counter.ticks_per_second());
        }
        self.time_keeper().map_or(TickPeriod::hertz(0), |t| t.tick_period())
    }

    /// Passa o papel de sistema para o timer do APIC calibrado.
    ///
    /// Se o timer de sistema anterior também era o time-keeper preciso, o
    /// papel de time-keeper acompanha (o relógio continua lendo o HPET, mas
    /// só a partir do BSP). O dispositivo que ficar sem papel é desligado.
    pub fn promote_system_timer(&self, timer: &'static dyn HardwareTimer) -> KResult<u64> {
        if self.promoted.is_completed() {
            return Err(KernelError::InvalidArgument);
        }
        timer.set_periodic();
        let frequency = timer.try_to_set_frequency(OPTIMAL_TICKS_PER_SECOND)?;
        self.promoted.call_once(|| timer);

        let id = timer_id(timer);
        let old = self.system_timer();
        self.system.store(id, Ordering::Release);

        if let Some(old) = old {
            let old_id = timer_id(old);
            if self.time_keeper.load(Ordering::Acquire) == old_id && self.precise.is_some() {
                self.time_keeper.store(id, Ordering::Release);
                crate::kinfo!("(Time) Time-keeper movido para o timer do APIC");
            }
            if self.roles_of(old).is_empty() {
                old.disable();
            }
        }

        crate::kok!("(Time) Timer do APIC é o timer de sistema, Hz=", frequency);
        Ok(frequency)
    }

    /// Liga a amostragem de profiling (contagem de referências).
    pub fn enable_profile_timer(&self) -> bool {
        let Some(timer) = self.profile_timer() else {
            return false;
        };
        let mut refs = self.profile_refs.lock();
        if *refs == 0 && timer.try_to_set_frequency(PROFILE_FREQUENCY_ACTIVE).is_err() {
            return false;
        }
        *refs += 1;
        true
    }

    /// Desliga quando a última referência sai.
    pub fn disable_profile_timer(&self) -> bool {
        let Some(timer) = self.profile_timer() else {
            return false;
        };
        let mut refs = self.profile_refs.lock();
        if *refs == 0 {
            return false;
        }
        *refs -= 1;
        if *refs == 0 {
            return timer.try_to_set_frequency(PROFILE_FREQUENCY_IDLE).is_ok();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock::{leak, MockCounter, MockTimer};

    fn comparators() -> (&'static MockTimer, &'static MockTimer, &'static MockTimer) {
        let counter = leak(MockCounter::new(100_000_000));
        (
            leak(MockTimer::periodic(0x52).precise(counter)),
            leak(MockTimer::one_shot(0x53).precise(counter)),
            leak(MockTimer::one_shot(0x54).precise(counter)),
        )
    }

    fn legacy() -> (&'static MockTimer, &'static MockTimer) {
        (leak(MockTimer::periodic(0x50)), leak(MockTimer::periodic(0x58)))
    }

    #[test]
    fn test_precise_selection_assigns_roles() {
        let (c0, c1, c2) = comparators();
        let registry =
            TimerRegistry::select(&[c2, c1, c0], None, SelectionPolicy::default()).unwrap();

        assert_eq!(registry.roles_of(c0), TimerRoles::TIME_KEEPER | TimerRoles::SYSTEM);
        assert_eq!(registry.roles_of(c2), TimerRoles::PROFILE);
        assert_eq!(registry.roles_of(c1), TimerRoles::empty());
        assert_eq!(c0.frequency(), OPTIMAL_TICKS_PER_SECOND);
        assert_eq!(c2.frequency(), PROFILE_FREQUENCY_IDLE);
        assert!(c1.is_disabled());
        assert_eq!(registry.ticks_per_second(), 100_000_000);
        assert_eq!(registry.clock_period(), TickPeriod::hertz(100_000_000));
        assert!(!registry.is_legacy());
    }

    #[test]
    fn test_periodic_disallowed_uses_one_shot() {
        let (c0, c1, _) = comparators();
        let policy = SelectionPolicy {
            allow_periodic: false,
            profiling: true,
        };
        let registry = TimerRegistry::select(&[c0, c1], None, policy).unwrap();
        assert!(!c0.is_periodic());
        assert_eq!(registry.roles_of(c0), TimerRoles::TIME_KEEPER | TimerRoles::SYSTEM);
        assert_eq!(registry.roles_of(c1), TimerRoles::PROFILE);
        assert_eq!(c1.frequency(), PROFILE_FREQUENCY_ACTIVE);
    }

    #[test]
    fn test_legacy_fallback() {
        let (pit, rtc) = legacy();
        let registry = TimerRegistry::select(
            &[],
            Some(LegacyTimers { pit, rtc }),
            SelectionPolicy::default(),
        )
        .unwrap();
        assert!(registry.is_legacy());
        assert_eq!(registry.roles_of(pit), TimerRoles::TIME_KEEPER);
        assert_eq!(registry.roles_of(rtc), TimerRoles::SYSTEM);
        assert_eq!(rtc.frequency(), LEGACY_SYSTEM_FREQUENCY);
        assert_eq!(registry.ticks_per_second(), OPTIMAL_TICKS_PER_SECOND);
        assert_eq!(registry.clock_period(), TickPeriod::hertz(OPTIMAL_TICKS_PER_SECOND));
        assert!(registry.precise_counter().is_none());
        assert!(registry.device_for_vector(0x58).is_some());
    }

    #[test]
    fn test_legacy_pit_programmed_once_at_real_period() {
        use crate::arch::mock::MockPorts;
        use crate::drivers::timer::pit::{Pit, BASE_FREQUENCY};

        let ports = leak(MockPorts::new());
        let pit = leak(Pit::new(ports));
        let rtc = leak(MockTimer::periodic(0x58));
        let registry = TimerRegistry::select(
            &[],
            Some(LegacyTimers { pit, rtc }),
            SelectionPolicy::default(),
        )
        .unwrap();

        // Um único comando + divisor (4773) no canal 0
        let channel0: Vec<_> = ports
            .writes()
            .into_iter()
            .filter(|(port, _)| *port == 0x40)
            .collect();
        assert_eq!(
            channel0,
            alloc::vec![(0x40, (4773 & 0xFF) as u8), (0x40, (4773 >> 8) as u8)]
        );
        assert_eq!(registry.ticks_per_second(), 249);
        assert_eq!(
            registry.clock_period(),
            TickPeriod {
                units: 4773,
                units_per_second: BASE_FREQUENCY
            }
        );
    }

    #[test]
    fn test_no_timer_is_unavailable() {
        assert_eq!(
            TimerRegistry::select(&[], None, SelectionPolicy::default()).err(),
            Some(KernelError::TimerUnavailable)
        );
    }

    #[test]
    fn test_promotion_moves_precise_time_keeper() {
        let (c0, c1, _) = comparators();
        let registry = TimerRegistry::select(&[c0, c1], None, SelectionPolicy::default()).unwrap();
        let apic = leak(MockTimer::periodic(0xFC).per_cpu());

        assert_eq!(registry.promote_system_timer(apic), Ok(OPTIMAL_TICKS_PER_SECOND));
        assert_eq!(registry.roles_of(apic), TimerRoles::TIME_KEEPER | TimerRoles::SYSTEM);
        assert!(c0.is_disabled());
        assert!(registry.time_keeper_is_per_cpu());
        // Relógio continua lendo o contador do HPET
        assert_eq!(registry.ticks_per_second(), 100_000_000);
        assert_eq!(registry.promote_system_timer(apic), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_promotion_in_legacy_keeps_pit() {
        let (pit, rtc) = legacy();
        let registry = TimerRegistry::select(
            &[],
            Some(LegacyTimers { pit, rtc }),
            SelectionPolicy::default(),
        )
        .unwrap();
        let apic = leak(MockTimer::periodic(0xFC).per_cpu());
        registry.promote_system_timer(apic).unwrap();
        assert_eq!(registry.roles_of(pit), TimerRoles::TIME_KEEPER);
        assert_eq!(registry.roles_of(apic), TimerRoles::SYSTEM);
        assert!(rtc.is_disabled());
        assert!(!pit.is_disabled());
        assert!(!registry.time_keeper_is_per_cpu());
    }

    #[test]
    fn test_profile_reference_count() {
        let (c0, c1, _) = comparators();
        let registry = TimerRegistry::select(&[c0, c1], None, SelectionPolicy::default()).unwrap();
        assert!(!registry.disable_profile_timer());
        assert!(registry.enable_profile_timer());
        assert!(registry.enable_profile_timer());
        assert_eq!(c1.frequency(), PROFILE_FREQUENCY_ACTIVE);
        assert!(registry.disable_profile_timer());
        assert_eq!(c1.frequency(), PROFILE_FREQUENCY_ACTIVE);
        assert!(registry.disable_profile_timer());
        assert_eq!(c1.frequency(), PROFILE_FREQUENCY_IDLE);
    }
}
