/// Arquivo: x86_64/apic/lapic.rs
///
/// Propósito: Driver para o Local APIC (LAPIC).
/// Cada core possui seu próprio LAPIC. Funções principais:
/// - Programar ID lógico, formato de destino, SIV e a Local Vector Table.
/// - Gerar IPIs (INIT/STARTUP no bring-up, IPIs fixos depois).
/// - Enviar sinal de End of Interrupt (EOI).
/// - Servir de base para o timer local (ver `timer.rs`).
///
/// Detalhes de Implementação:
/// - Usa MSR `IA32_APIC_BASE` para habilitar globalmente (e o modo x2APIC).
/// - xAPIC: registradores via `MmioWindow`. x2APIC: um MSR por registrador,
///   ICR como um único MSR de 64 bits.
/// - A espera por `delivery pending` no ICR não tem timeout: um APIC travado
///   prende o chamador para sempre. O hook de polling só observa.
use ::core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::icr::Icr;
use super::regs::*;
use crate::arch::traits::{CpuOps, InterruptDispatch, IrqHandler};
use crate::core::smp::percpu::MAX_CPUS;
use crate::klib::mmio::MmioWindow;
use crate::mm::MemoryManager;
use crate::sync::spin_wait::{spin_until, PollHook, PollObserver, SpinSite};
use crate::sys::{KResult, KernelError};

/// Atraso entre verificações do bit pending do ICR.
const ICR_POLL_DELAY_US: u64 = 200;

/// Marca de APIC ID ainda desconhecido.
const NO_APIC_ID: u32 = u32::MAX;

/// Estado do LAPIC de uma CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApicState {
    /// Base mapeada e habilitada globalmente, LVT ainda não programada nesta CPU
    BaseMapped,
    /// `enable(cpu)` concluído nesta CPU
    Enabled,
}

/// Caminho de acesso aos registradores.
#[derive(Clone, Copy)]
enum Access {
    X2,
    Mmio(MmioWindow),
}

/// Controlador Local APIC (uma instância compartilhada, registradores por CPU).
pub struct LocalApic {
    cpu: &'static dyn CpuOps,
    interrupts: &'static dyn InterruptDispatch,
    access: Access,
    base: u64,
    apic_ids: [AtomicU32; MAX_CPUS],
    enabled_cpus: AtomicU64,
    handlers_registered: AtomicBool,
    smp_ipis_enabled: AtomicBool,
    ipis_received: AtomicU64,
    errors: AtomicU64,
    poll: PollObserver,
}

impl LocalApic {
    /// Detecta, mapeia e habilita globalmente o LAPIC do BSP.
    ///
    /// `HardwareAbsent` sem APIC/MSR (ou `apic=off`); `AllocationFailure` se a
    /// janela MMIO não puder ser mapeada. Em ambos os casos o sistema segue
    /// sem APIC e sem SMP.
    pub fn init(
        cpu: &'static dyn CpuOps,
        interrupts: &'static dyn InterruptDispatch,
        memory: &dyn MemoryManager,
        allowed: bool,
    ) -> KResult<Self> {
        if !allowed {
            crate::kwarn!("(APIC) Desabilitado pela linha de comando");
            return Err(KernelError::HardwareAbsent);
        }

        let features = cpu.features();
        if !features.contains(crate::arch::CpuFeatures::APIC | crate::arch::CpuFeatures::MSR) {
            crate::kwarn!("(APIC) CPU sem Local APIC ou MSR");
            return Err(KernelError::HardwareAbsent);
        }

        let x2 = features.contains(crate::arch::CpuFeatures::X2APIC);
        // SAFETY: IA32_APIC_BASE existe quando CPUID reporta APIC + MSR.
        let base = unsafe { cpu.read_msr(IA32_APIC_BASE) } & BASE_ADDRESS_MASK;

        let access = if x2 {
            Access::X2
        } else {
            let window = memory.map_mmio(base, MMIO_WINDOW_SIZE).map_err(|_| {
                crate::kerror!("(APIC) Falha ao mapear registradores em ", base);
                KernelError::AllocationFailure
            })?;
            Access::Mmio(window)
        };

        let apic = Self {
            cpu,
            interrupts,
            access,
            base,
            apic_ids: [const { AtomicU32::new(NO_APIC_ID) }; MAX_CPUS],
            enabled_cpus: AtomicU64::new(0),
            handlers_registered: AtomicBool::new(false),
            smp_ipis_enabled: AtomicBool::new(false),
            ipis_received: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            poll: PollObserver::new(),
        };
        apic.set_base(base);

        if x2 {
            crate::kinfo!("(APIC) Modo x2APIC, base=", base);
        } else {
            crate::kinfo!("(APIC) Modo xAPIC, base=", base);
        }
        Ok(apic)
    }

    pub fn is_x2(&self) -> bool {
        matches!(self.access, Access::X2)
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub(crate) fn cpu(&self) -> &'static dyn CpuOps {
        self.cpu
    }

    /// Instala o observador das esperas pelo ICR.
    pub fn install_poll_hook(&self, hook: PollHook) -> bool {
        self.poll.install(hook)
    }

    // --- MSR de base ---

    pub fn get_base(&self) -> u64 {
        // SAFETY: MSR arquitetural, presença verificada em `init`.
        unsafe { self.cpu.read_msr(IA32_APIC_BASE) & BASE_ADDRESS_MASK }
    }

    pub fn set_base(&self, base: u64) {
        let mut flags = BASE_GLOBAL_ENABLE;
        if self.is_x2() {
            flags |= BASE_X2_ENABLE;
        }
        // SAFETY: base veio do próprio MSR; apenas ligamos enable/x2.
        unsafe { self.cpu.write_msr(IA32_APIC_BASE, (base & BASE_ADDRESS_MASK) | flags) };
    }

    // --- Registradores ---

    pub fn read_register(&self, offset: usize) -> u32 {
        match self.access {
            // SAFETY: MSRs do bloco x2APIC existem com x2 habilitado.
            Access::X2 => unsafe { self.cpu.read_msr(x2_msr(offset)) as u32 },
            Access::Mmio(window) => window.read_u32(offset),
        }
    }

    pub fn write_register(&self, offset: usize, value: u32) {
        match self.access {
            // SAFETY: MSRs do bloco x2APIC existem com x2 habilitado.
            Access::X2 => unsafe { self.cpu.write_msr(x2_msr(offset), value as u64) },
            Access::Mmio(window) => window.write_u32(offset, value),
        }
    }

    /// Espera o bit delivery-pending do ICR limpar. Retorna quantas
    /// verificações foram feitas.
    pub fn wait_for_pending_icr(&self) -> u64 {
        spin_until(
            || self.read_register(REG_ICR_LOW) & ICR_DELIVERY_PENDING == 0,
            || self.cpu.microseconds_delay(ICR_POLL_DELAY_US),
            &self.poll,
            SpinSite::IcrPending,
        )
    }

    /// Espera o ICR ficar livre e emite o comando.
    ///
    /// Retorna o número de verificações de pending feitas antes da escrita.
    pub fn write_icr(&self, icr: &Icr) -> u64 {
        let checks = self.wait_for_pending_icr();
        match self.access {
            // SAFETY: ICR x2APIC é um único MSR de 64 bits.
            Access::X2 => unsafe { self.cpu.write_msr(x2_msr(REG_ICR_LOW), icr.x2_value()) },
            Access::Mmio(window) => {
                // A escrita no dword baixo dispara o envio: alto primeiro
                window.write_u32(REG_ICR_HIGH, icr.xapic_high());
                window.write_u32(REG_ICR_LOW, icr.low());
            }
        }
        checks
    }

    // --- Habilitação por CPU ---

    /// Programa o LAPIC da CPU atual como CPU lógica `cpu`.
    ///
    /// Idempotente: chamar duas vezes deixa os mesmos valores em LVT/SIV/ESR.
    /// Os handlers de spurious/erro/IPI são registrados uma única vez (CPU 0).
    pub fn enable(&'static self, cpu: u32) -> KResult<()> {
        if cpu as usize >= MAX_CPUS {
            return Err(KernelError::InvalidArgument);
        }

        let apic_id = if self.is_x2() {
            // Cada CPU liga o modo x2 no seu próprio MSR de base
            self.set_base(self.get_base());
            self.read_register(REG_ID)
        } else {
            // ID lógico (modelo flat): bits 24..31 do LD
            let ld = (self.read_register(REG_LD) & 0x00FF_FFFF) | (cpu << 24);
            self.write_register(REG_LD, ld);
            crate::ktrace!("(APIC) LD=", self.read_register(REG_LD));
            self.read_register(REG_ID) >> 24
        };
        self.apic_ids[cpu as usize].store(apic_id, Ordering::Release);

        if !self.is_x2() {
            self.write_register(REG_DF, DF_FLAT_MODEL);
        }

        if cpu == 0 && !self.handlers_registered.swap(true, Ordering::AcqRel) {
            self.interrupts.register_interrupt_handler(SPURIOUS_VECTOR, self)?;
            self.interrupts.register_interrupt_handler(ERROR_VECTOR, self)?;
            self.interrupts.register_interrupt_handler(IPI_VECTOR, self)?;
        }

        // Software enable + vetor espúrio
        self.write_register(REG_SIV, SPURIOUS_VECTOR as u32 | SIV_SOFTWARE_ENABLE);
        self.write_register(
            REG_LVT_ERR,
            lvt(ERROR_VECTOR, DeliveryMode::Fixed, LvtFlags::empty()),
        );

        // Mascarar tudo exceto LINT1 (NMI, level) e erro
        self.write_register(
            REG_LVT_TIMER,
            lvt(TIMER_VECTOR, DeliveryMode::Fixed, LvtFlags::MASKED),
        );
        self.write_register(REG_LVT_THERMAL, lvt(0, DeliveryMode::Fixed, LvtFlags::MASKED));
        self.write_register(
            REG_LVT_PERFORMANCE_COUNTER,
            lvt(0, DeliveryMode::Fixed, LvtFlags::MASKED),
        );
        self.write_register(REG_LVT_LINT0, lvt(0, DeliveryMode::ExtInt, LvtFlags::MASKED));
        self.write_register(
            REG_LVT_LINT1,
            lvt(0, DeliveryMode::Nmi, LvtFlags::TRIGGER_LEVEL),
        );

        self.write_register(REG_TPR, 0);

        self.enabled_cpus.fetch_or(1 << cpu, Ordering::AcqRel);
        crate::kdebug!("(APIC) Habilitado na CPU ", cpu);
        Ok(())
    }

    pub fn state(&self, cpu: u32) -> ApicState {
        if cpu as usize >= MAX_CPUS {
            return ApicState::BaseMapped;
        }
        if self.enabled_cpus.load(Ordering::Acquire) & (1 << cpu) != 0 {
            ApicState::Enabled
        } else {
            ApicState::BaseMapped
        }
    }

    // --- IPIs ---

    /// Registra o APIC ID de hardware de uma CPU lógica (vindo da topologia).
    pub fn register_processor(&self, cpu: u32, apic_id: u32) {
        if let Some(slot) = self.apic_ids.get(cpu as usize) {
            slot.store(apic_id, Ordering::Release);
        }
    }

    pub fn apic_id_of(&self, cpu: u32) -> Option<u32> {
        let id = self.apic_ids.get(cpu as usize)?.load(Ordering::Acquire);
        (id != NO_APIC_ID).then_some(id)
    }

    /// Libera o envio de IPIs fixos (feito pelo BSP após o handshake).
    pub fn enable_smp_ipis(&self) {
        self.smp_ipis_enabled.store(true, Ordering::Release);
    }

    pub fn smp_ipis_enabled(&self) -> bool {
        self.smp_ipis_enabled.load(Ordering::Acquire)
    }

    /// INIT IPI para todas as outras CPUs.
    pub fn send_init_all_excluding_self(&self) {
        self.write_icr(&Icr::init_all_excluding_self());
    }

    /// STARTUP IPI para todas as outras CPUs. `vector` = endereço do trampoline >> 12.
    pub fn send_startup_all_excluding_self(&self, vector: u8) {
        self.write_icr(&Icr::startup_all_excluding_self(vector));
    }

    /// INIT IPI para um APIC ID.
    pub fn send_init(&self, apic_id: u32) {
        self.write_icr(&Icr::init(apic_id));
    }

    /// STARTUP IPI para um APIC ID.
    pub fn send_startup(&self, apic_id: u32, vector: u8) {
        self.write_icr(&Icr::startup(vector, apic_id));
    }

    /// IPI fixo para a CPU lógica `cpu`. Descartado (false) antes de o BSP
    /// liberar IPIs ou se o APIC ID for desconhecido.
    pub fn send_ipi(&self, cpu: u32) -> bool {
        if !self.smp_ipis_enabled() {
            return false;
        }
        let Some(apic_id) = self.apic_id_of(cpu) else {
            crate::kwarn!("(APIC) IPI para CPU sem APIC ID: ", cpu);
            return false;
        };
        self.write_icr(&Icr::fixed(IPI_VECTOR, apic_id));
        true
    }

    /// IPI fixo para todas as outras CPUs.
    pub fn broadcast_ipi(&self) -> bool {
        if !self.smp_ipis_enabled() {
            return false;
        }
        self.write_icr(&Icr::broadcast(IPI_VECTOR));
        true
    }

    #[inline]
    pub fn end_of_interrupt(&self) {
        self.write_register(REG_EOI, 0);
    }

    // --- Timer local ---

    /// Programa o timer do LAPIC da CPU atual (divisor 16).
    pub fn setup_local_timer(&self, initial_count: u32, mode: TimerMode, enabled: bool) {
        let mut flags = mode.lvt_flags();
        if !enabled {
            flags |= LvtFlags::MASKED;
        }
        self.write_register(REG_LVT_TIMER, lvt(TIMER_VECTOR, DeliveryMode::Fixed, flags));

        let config = self.read_register(REG_TIMER_CONFIGURATION);
        self.write_register(
            REG_TIMER_CONFIGURATION,
            (config & !TIMER_DIVIDE_MASK) | TIMER_DIVIDE_BY_16,
        );
        self.write_register(REG_TIMER_INITIAL_COUNT, initial_count);
    }

    pub fn timer_current_count(&self) -> u32 {
        self.read_register(REG_TIMER_CURRENT_COUNT)
    }

    /// IPIs recebidos por esta instância (todas as CPUs).
    pub fn ipis_received(&self) -> u64 {
        self.ipis_received.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl IrqHandler for LocalApic {
    fn handle_irq(&self, vector: u8) {
        match vector {
            // Espúrio: sem EOI
            SPURIOUS_VECTOR => crate::ktrace!("(APIC) Interrupção espúria"),
            ERROR_VECTOR => {
                // ESR só é atualizado após uma escrita
                self.write_register(REG_ESR, 0);
                let esr = self.read_register(REG_ESR);
                self.errors.fetch_add(1, Ordering::Relaxed);
                crate::kerror!("(APIC) Erro, ESR=", esr);
                self.end_of_interrupt();
            }
            _ => {
                self.ipis_received.fetch_add(1, Ordering::Relaxed);
                self.end_of_interrupt();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock::{leak, MockCpu, MockInterrupts, MockMemory};
    use crate::arch::CpuFeatures;

    fn x2_apic(cpu: &'static MockCpu) -> &'static LocalApic {
        let irqs = leak(MockInterrupts::new());
        let memory = leak(MockMemory::new());
        leak(LocalApic::init(cpu, irqs, memory, true).unwrap())
    }

    #[test]
    fn test_init_rejects_missing_apic() {
        let cpu = leak(MockCpu::new(CpuFeatures::MSR));
        let irqs = leak(MockInterrupts::new());
        let memory = leak(MockMemory::new());
        assert_eq!(
            LocalApic::init(cpu, irqs, memory, true).err(),
            Some(KernelError::HardwareAbsent)
        );
        let cpu = leak(MockCpu::x2apic());
        assert_eq!(
            LocalApic::init(cpu, irqs, memory, false).err(),
            Some(KernelError::HardwareAbsent)
        );
    }

    #[test]
    fn test_mapping_failure_aborts_enablement() {
        let cpu = leak(MockCpu::xapic());
        let irqs = leak(MockInterrupts::new());
        let memory = leak(MockMemory::new());
        memory.fail_mmio();
        assert_eq!(
            LocalApic::init(cpu, irqs, memory, true).err(),
            Some(KernelError::AllocationFailure)
        );
    }

    #[test]
    fn test_base_msr_enable_bits() {
        let cpu = leak(MockCpu::x2apic());
        let apic = x2_apic(cpu);
        let raw = cpu.msr(IA32_APIC_BASE);
        assert_eq!(raw & BASE_ADDRESS_MASK, 0xFEE0_0000);
        assert_ne!(raw & BASE_GLOBAL_ENABLE, 0);
        assert_ne!(raw & BASE_X2_ENABLE, 0);
        assert!(apic.is_x2());
    }

    #[test]
    fn test_write_icr_checks_pending_k_plus_one_times() {
        for k in [0u64, 1, 3, 10] {
            let cpu = leak(MockCpu::x2apic());
            let apic = x2_apic(cpu);
            cpu.set_icr_pending_polls(k);
            let before = cpu.icr_reads();
            let checks = apic.write_icr(&Icr::fixed(IPI_VECTOR, 2));
            assert_eq!(checks, k + 1);
            assert_eq!(cpu.icr_reads() - before, k + 1);
            assert_eq!(cpu.icr_log().len(), 1);
        }
    }

    #[test]
    fn test_enable_is_idempotent() {
        let cpu = leak(MockCpu::xapic());
        let irqs = leak(MockInterrupts::new());
        let memory = leak(MockMemory::new());
        let apic = leak(LocalApic::init(cpu, irqs, memory, true).unwrap());

        apic.enable(0).unwrap();
        let once = memory.mmio_snapshot(apic.base());
        apic.enable(0).unwrap();
        let twice = memory.mmio_snapshot(apic.base());

        assert_eq!(once, twice);
        assert_eq!(irqs.registrations(), 3);
        assert_eq!(apic.state(0), ApicState::Enabled);

        let word = |off: usize| u32::from_le_bytes(once[off..off + 4].try_into().unwrap());
        assert_eq!(word(REG_SIV), 0x1FF);
        assert_eq!(word(REG_LVT_ERR), ERROR_VECTOR as u32);
        assert_eq!(word(REG_LVT_TIMER) & LvtFlags::MASKED.bits(), LvtFlags::MASKED.bits());
        // LINT1 entrega NMI, não um vetor fixo
        let lint1 = word(REG_LVT_LINT1);
        assert_eq!((lint1 >> 8) & 0b111, DeliveryMode::Nmi as u32);
        assert_eq!(lint1 & LvtFlags::MASKED.bits(), 0);
        assert_eq!(lint1, lvt(0, DeliveryMode::Nmi, LvtFlags::TRIGGER_LEVEL));
        assert_eq!(word(REG_DF), DF_FLAT_MODEL);
        assert_eq!(word(REG_LD) >> 24, 0);
    }

    #[test]
    fn test_ipis_dropped_until_smp_enabled() {
        let cpu = leak(MockCpu::x2apic());
        let apic = x2_apic(cpu);
        apic.register_processor(1, 7);
        assert!(!apic.send_ipi(1));
        assert!(!apic.broadcast_ipi());
        assert!(cpu.icr_log().is_empty());

        apic.enable_smp_ipis();
        assert!(apic.send_ipi(1));
        // CPU sem APIC ID conhecido
        assert!(!apic.send_ipi(5));
        let sent = Icr::from_x2_value(cpu.icr_log()[0]).unwrap();
        assert_eq!(sent.destination, 7);
        assert_eq!(sent.vector, IPI_VECTOR);
    }

    #[test]
    fn test_enable_records_x2_apic_id() {
        let cpu = leak(MockCpu::x2apic());
        cpu.set_apic_id(9);
        let apic = x2_apic(cpu);
        apic.enable(0).unwrap();
        assert_eq!(apic.apic_id_of(0), Some(9));
        assert_eq!(apic.enable(MAX_CPUS as u32), Err(KernelError::InvalidArgument));
    }
}
