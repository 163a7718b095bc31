//! # Kernel Context
//!
//! Estado do núcleo SMP/Tempo montado uma única vez pelo BSP e passado
//! explicitamente depois disso. O único acesso global é o `ap_kernel_entry`,
//! que chega do trampoline sem argumentos Rust.
//!
//! ## Sequência no BSP
//!
//! ```text
//! new():          cmdline → LAPIC (opcional) → topologia → timers
//! bsp_bring_up(): handlers de timer → enable(0) → timer do APIC → APs
//! ```
//!
//! Falhas recuperáveis degradam o sistema (sem APIC, uma CPU, timer
//! legado). `TimerUnavailable` e violações de protocolo sobem como `Err`;
//! `boot()` as transforma em panic.

use alloc::boxed::Box;
use spin::Once;

use crate::arch::traits::{CpuOps, InterruptDispatch, PortIo};
use crate::arch::x86_64::apic::LocalApic;
use crate::core::boot::cmdline::{BootConfig, CommandLine};
use crate::core::smp::bringup;
use crate::core::smp::ipi::{self, IpiTarget};
use crate::core::smp::{CpuTopology, ProcessorDescriptor, SmpState};
use crate::core::time::{ClockId, Precision, TimeManagement, TimeSpec};
use crate::drivers::serial::SerialSink;
use crate::mm::MemoryManager;
use crate::sched::SchedulerHooks;
use crate::sys::{KResult, KernelError};

/// Colaboradores fornecidos pelo kernel hospedeiro.
#[derive(Clone, Copy)]
pub struct Platform {
    pub cpu: &'static dyn CpuOps,
    pub memory: &'static dyn MemoryManager,
    pub interrupts: &'static dyn InterruptDispatch,
    pub scheduler: &'static dyn SchedulerHooks,
    pub ports: &'static dyn PortIo,
}

/// Dados de firmware/bootloader.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformTables {
    pub cmdline: &'static str,
    /// Tabela MADT completa (com header ACPI)
    pub madt: Option<&'static [u8]>,
    /// Endereço físico dos registradores do HPET (tabela ACPI "HPET")
    pub hpet_base: Option<u64>,
    /// Base do mapeamento do kernel (copiada para os APs)
    pub kernel_map_base: u64,
}

pub struct KernelContext {
    platform: Platform,
    tables: PlatformTables,
    cmdline: CommandLine,
    config: BootConfig,
    apic: Option<&'static LocalApic>,
    smp: SmpState,
    time: TimeManagement,
}

static CONTEXT: Once<KernelContext> = Once::new();

impl KernelContext {
    /// Detecta o hardware do BSP e escolhe os timers. Nada é habilitado
    /// ainda (ver `bsp_bring_up`).
    pub fn new(platform: Platform, tables: PlatformTables) -> KResult<Self> {
        let cmdline = CommandLine::parse(tables.cmdline);
        let config = BootConfig::from_cmdline(&cmdline);

        let apic = match LocalApic::init(
            platform.cpu,
            platform.interrupts,
            platform.memory,
            config.apic,
        ) {
            Ok(apic) => Some(&*Box::leak(Box::new(apic))),
            Err(e) => {
                crate::kwarn!("(APIC) Seguindo sem Local APIC: ", e as u64);
                None
            }
        };

        let bsp_apic_id = platform.cpu.current_id();
        let topology = if config.smp && apic.is_some() {
            CpuTopology::discover(tables.madt, bsp_apic_id).unwrap_or_else(|_| {
                crate::kwarn!("(SMP) Topologia indisponível, seguindo com uma CPU");
                CpuTopology::uniprocessor(bsp_apic_id)
            })
        } else {
            CpuTopology::uniprocessor(bsp_apic_id)
        };
        crate::kinfo!("(SMP) CPUs habilitadas: ", topology.enabled_count());

        let time = TimeManagement::initialize(
            platform.cpu,
            platform.memory,
            platform.ports,
            platform.scheduler,
            &config,
            tables.hpet_base,
        )?;

        Ok(Self {
            platform,
            tables,
            cmdline,
            config,
            apic,
            smp: SmpState::new(topology),
            time,
        })
    }

    /// Publica o contexto global (lido pelo `ap_kernel_entry`).
    ///
    /// Uma segunda instalação é violação de protocolo.
    pub fn install(self) -> KResult<&'static Self> {
        if CONTEXT.is_completed() {
            crate::kerror!("(Boot) Contexto instalado duas vezes");
            return Err(KernelError::ProtocolViolation);
        }
        Ok(CONTEXT.call_once(|| self))
    }

    pub fn try_get() -> Option<&'static Self> {
        CONTEXT.get()
    }

    /// Caminho completo do BSP. Erros fatais param o kernel aqui.
    pub fn boot(platform: Platform, tables: PlatformTables) -> &'static Self {
        crate::core::logging::set_sink(Box::leak(Box::new(SerialSink::new(platform.ports))));

        let context = match Self::new(platform, tables).and_then(Self::install) {
            Ok(context) => context,
            Err(e) => panic!("(Boot) Falha fatal na inicialização: {}", e),
        };
        match context.bsp_bring_up() {
            Ok(online) => crate::kok!("(Boot) CPUs online: ", online),
            Err(e) => panic!("(Boot) Falha fatal no bring-up: {}", e),
        }
        context
    }

    /// Habilita o BSP e inicia os APs. Retorna o número de CPUs online.
    pub fn bsp_bring_up(&'static self) -> KResult<u32> {
        let interrupts = self.platform.interrupts;
        self.time.start(interrupts)?;

        if let Some(apic) = self.apic {
            apic.enable(0)?;
            if let Err(e) = self.time.promote_apic_timer(apic, interrupts) {
                crate::kwarn!("(Time) Timer do APIC não promovido: ", e as u64);
            }
        }
        self.time.initialize_cpu(0);

        let online = if self.config.smp && self.apic.is_some() {
            match bringup::boot_secondary_processors(self) {
                Ok(online) => online,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    crate::kwarn!("(SMP) Seguindo com uma CPU: ", e as u64);
                    1
                }
            }
        } else {
            crate::kinfo!("(SMP) Bring-up desabilitado");
            1
        };

        #[cfg(feature = "self_test")]
        if !crate::core::test::run_core_tests(self).all_passed() {
            crate::kwarn!("(Core) Self-test com falhas");
        }

        Ok(online)
    }

    /// Lado do AP (ver `bringup::ap_entry`).
    pub fn ap_entry(&self, descriptor: &ProcessorDescriptor, cpu: u32) -> KResult<()> {
        bringup::ap_entry(self, descriptor, cpu)
    }

    /// Entrega a CPU ao scheduler.
    pub fn enter_idle(&self, cpu: u32) -> ! {
        self.platform.scheduler.enter_idle(cpu)
    }

    // --- Acessores ---

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn tables(&self) -> &PlatformTables {
        &self.tables
    }

    pub fn cmdline(&self) -> &CommandLine {
        &self.cmdline
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    pub fn apic(&self) -> Option<&'static LocalApic> {
        self.apic
    }

    pub fn smp(&self) -> &SmpState {
        &self.smp
    }

    pub fn time(&self) -> &TimeManagement {
        &self.time
    }

    pub fn online_cpus(&self) -> usize {
        self.smp.online_count()
    }

    // --- Operações de APIC ---

    /// Programa o LAPIC da CPU atual (idempotente).
    pub fn enable_cpu(&self, cpu: u32) -> KResult<()> {
        let apic = self.apic.ok_or(KernelError::HardwareAbsent)?;
        apic.enable(cpu)
    }

    pub fn send_interprocessor_interrupt(&self, cpu: u32) -> bool {
        self.apic
            .is_some_and(|apic| ipi::send_ipi(apic, IpiTarget::Single(cpu)))
    }

    pub fn broadcast_interprocessor_interrupt(&self) -> bool {
        self.apic
            .is_some_and(|apic| ipi::send_ipi(apic, IpiTarget::AllButSelf))
    }

    pub fn end_of_interrupt(&self) {
        if let Some(apic) = self.apic {
            apic.end_of_interrupt();
        }
    }

    // --- Tempo ---

    pub fn monotonic_time(&self, precision: Precision) -> TimeSpec {
        self.time.monotonic_time(precision)
    }

    pub fn wall_clock_time(&self, precision: Precision) -> TimeSpec {
        self.time.wall_clock_time(precision)
    }

    pub fn current_time(&self, clock: ClockId) -> TimeSpec {
        self.time.current_time(clock)
    }

    pub fn set_wall_clock(&self, now: TimeSpec) {
        self.time.set_wall_clock(now);
    }
}
