//! Tempo e Timers
//!
//! `TimeManagement` junta o registro de timers, o relógio (`clock`) e a
//! TimePage. O despacho de IRQ é por papel:
//!
//! | Papel | Ação |
//! |-------|------|
//! | time-keeper | avança o relógio e republica a TimePage (só no BSP se o timer for por CPU) |
//! | sistema | `scheduler.timer_tick()` |
//! | profile | `scheduler.profile_tick()` |

pub mod clock;
pub mod timepage;

use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Once;

use crate::arch::traits::{without_interrupts, CpuOps, InterruptDispatch, IrqHandler, PortIo};
use crate::arch::x86_64::apic::regs::TIMER_VECTOR;
use crate::arch::x86_64::apic::{ApicTimer, LocalApic};
use crate::core::boot::cmdline::BootConfig;
use crate::drivers::timer::hpet::Hpet;
use crate::drivers::timer::pit::Pit;
use crate::drivers::timer::registry::{LegacyTimers, SelectionPolicy};
use crate::drivers::timer::rtc::Rtc;
use crate::drivers::timer::{HardwareTimer, TimerRegistry, TimerRoles};
use crate::mm::MemoryManager;
use crate::sched::SchedulerHooks;
use crate::sys::{KResult, KernelError};

pub use clock::{ClockId, Precision, TimeKeeping, TimeSpec, CLOCK_ID_COUNT};
pub use timepage::{TimePage, TimePageFrame};

pub struct TimeManagement {
    cpu: &'static dyn CpuOps,
    scheduler: &'static dyn SchedulerHooks,
    registry: TimerRegistry,
    clock: TimeKeeping,
    time_page: &'static TimePageFrame,
    bsp_apic_id: u32,
    apic_timer: Once<&'static ApicTimer>,
}

impl TimeManagement {
    /// Detecta os timers e escolhe os papéis. O relógio de parede começa no
    /// valor do CMOS.
    ///
    /// `TimerUnavailable` aqui é fatal para o chamador.
    pub fn initialize(
        cpu: &'static dyn CpuOps,
        memory: &dyn MemoryManager,
        ports: &'static dyn PortIo,
        scheduler: &'static dyn SchedulerHooks,
        config: &BootConfig,
        hpet_base: Option<u64>,
    ) -> KResult<Self> {
        let pit: &'static Pit = Box::leak(Box::new(Pit::new(ports)));
        let rtc: &'static Rtc = Box::leak(Box::new(Rtc::new(ports)));

        let mut candidates: Vec<&'static dyn HardwareTimer> = Vec::new();
        match hpet_base {
            Some(_) if config.legacy_time => {
                crate::kinfo!("(Time) HPET ignorado (time=legacy)");
            }
            Some(base) => match Hpet::probe(memory, base) {
                Ok(hpet) => {
                    let hpet: &'static Hpet = Box::leak(Box::new(hpet));
                    for comparator in hpet.comparators() {
                        candidates.push(Box::leak(Box::new(comparator)));
                    }
                }
                Err(e) => crate::kwarn!("(Time) HPET indisponível: ", e as u64),
            },
            None => crate::kdebug!("(Time) Plataforma sem HPET"),
        }

        let policy = SelectionPolicy {
            allow_periodic: config.allow_periodic_hpet,
            profiling: config.profiling,
        };
        let registry = TimerRegistry::select(&candidates, Some(LegacyTimers { pit, rtc }), policy)?;

        let bsp_apic_id = cpu.current_id();
        let time = Self::from_registry(registry, cpu, scheduler, bsp_apic_id);
        time.set_wall_clock(TimeSpec::from_seconds(rtc.boot_time() as i64));
        Ok(time)
    }

    /// Monta a fachada sobre um registro já selecionado.
    pub fn from_registry(
        registry: TimerRegistry,
        cpu: &'static dyn CpuOps,
        scheduler: &'static dyn SchedulerHooks,
        bsp_apic_id: u32,
    ) -> Self {
        let clock = TimeKeeping::new(registry.clock_period(), registry.precise_counter());
        crate::kdebug!("(Time) Ticks por segundo: ", registry.ticks_per_second());
        Self {
            cpu,
            scheduler,
            registry,
            clock,
            time_page: Box::leak(Box::new(TimePageFrame::new())),
            bsp_apic_id,
            apic_timer: Once::new(),
        }
    }

    /// Registra o handler dos vetores dos timers com papel.
    pub fn start(&'static self, interrupts: &dyn InterruptDispatch) -> KResult<()> {
        for timer in self.registry.devices() {
            if self.registry.roles_of(timer).is_empty() {
                continue;
            }
            interrupts.register_interrupt_handler(timer.interrupt_vector(), self)?;
            crate::kdebug!("(Time) Handler registrado no vetor ", timer.interrupt_vector());
        }
        Ok(())
    }

    /// Calibra o timer do APIC e o promove a timer de sistema.
    ///
    /// Falha na calibração não é fatal: o timer de sistema anterior fica.
    pub fn promote_apic_timer(
        &'static self,
        apic: &'static LocalApic,
        interrupts: &dyn InterruptDispatch,
    ) -> KResult<u64> {
        if self.apic_timer.is_completed() {
            return Err(KernelError::InvalidArgument);
        }
        let timer = ApicTimer::calibrate(apic)?;
        let timer: &'static ApicTimer = *self.apic_timer.call_once(|| &*Box::leak(Box::new(timer)));
        interrupts.register_interrupt_handler(TIMER_VECTOR, self)?;
        self.registry.promote_system_timer(timer)
    }

    /// Configuração de tempo da CPU `cpu` (APs: timer local do APIC).
    pub fn initialize_cpu(&self, cpu: u32) {
        if cpu == 0 {
            return;
        }
        if let Some(timer) = self.apic_timer.get() {
            if !self.registry.roles_of(*timer).is_empty() {
                timer.enable_local_timer();
            }
        }
    }

    /// Callback de interrupção de `timer` na CPU atual.
    pub fn on_timer_interrupt(&self, timer: &dyn HardwareTimer, on_bsp: bool) {
        let roles = self.registry.roles_of(timer);
        if roles.contains(TimerRoles::TIME_KEEPER)
            && (on_bsp || !self.registry.time_keeper_is_per_cpu())
        {
            self.clock.increment_time_since_boot();
            self.publish_time_page();
        }
        if roles.contains(TimerRoles::SYSTEM) {
            self.scheduler.timer_tick();
        }
        if roles.contains(TimerRoles::PROFILE) {
            self.scheduler.profile_tick();
        }
    }

    fn publish_time_page(&self) {
        let mut clocks = [TimeSpec::ZERO; CLOCK_ID_COUNT];
        let monotonic = self.clock.monotonic_time(Precision::Coarse);
        let realtime = self.clock.wall_clock_time(Precision::Coarse);
        for id in ClockId::ALL {
            clocks[id as usize] = if id.is_realtime() { realtime } else { monotonic };
        }
        // SAFETY: só o handler do time-keeper publica, numa única CPU.
        unsafe { self.time_page.page.publish(clocks) };
    }

    pub fn current_time(&self, clock: ClockId) -> TimeSpec {
        let precision = clock.precision();
        if clock.is_realtime() {
            self.clock.wall_clock_time(precision)
        } else {
            self.clock.monotonic_time(precision)
        }
    }

    pub fn monotonic_time(&self, precision: Precision) -> TimeSpec {
        self.clock.monotonic_time(precision)
    }

    pub fn wall_clock_time(&self, precision: Precision) -> TimeSpec {
        self.clock.wall_clock_time(precision)
    }

    /// Roda com interrupções desabilitadas: o handler do time-keeper escreve
    /// no mesmo seqlock e giraria para sempre no lock de escrita.
    pub fn set_wall_clock(&self, now: TimeSpec) {
        without_interrupts(self.cpu, || self.clock.set_wall_clock(now));
    }

    pub fn uptime_ms(&self) -> u64 {
        self.clock.uptime_ms()
    }

    /// Frequência do contador preciso ou, sem ele, do time-keeper (Hz).
    pub fn ticks_per_second(&self) -> u64 {
        self.registry.ticks_per_second()
    }

    pub fn can_query_precise_time(&self) -> bool {
        self.clock.can_query_precise_time()
    }

    pub fn remaining_epoch_time_adjustment(&self) -> i64 {
        self.clock.remaining_epoch_time_adjustment()
    }

    pub fn set_remaining_epoch_time_adjustment(&self, nanos: i64) {
        without_interrupts(self.cpu, || {
            self.clock.set_remaining_epoch_time_adjustment(nanos)
        });
    }

    pub fn enable_profile_timer(&self) -> bool {
        self.registry.enable_profile_timer()
    }

    pub fn disable_profile_timer(&self) -> bool {
        self.registry.disable_profile_timer()
    }

    pub fn registry(&self) -> &TimerRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &TimeKeeping {
        &self.clock
    }

    pub fn time_page(&self) -> &'static TimePage {
        &self.time_page.page
    }
}

impl IrqHandler for TimeManagement {
    fn handle_irq(&self, vector: u8) {
        let Some(timer) = self.registry.device_for_vector(vector) else {
            crate::ktrace!("(Time) IRQ de timer sem papel: ", vector);
            return;
        };
        let on_bsp = self.cpu.current_id() == self.bsp_apic_id;
        self.on_timer_interrupt(timer, on_bsp);
        timer.acknowledge();
    }
}
