//! Interface Abstrata de CPU (HAL).
//! Define as operações de processador que o bring-up SMP e o timekeeping usam.

use bitflags::bitflags;

bitflags! {
    /// Recursos de CPU relevantes para APIC e timers (CPUID).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuFeatures: u32 {
        /// Local APIC presente (CPUID.1:EDX[9])
        const APIC = 1 << 0;
        /// x2APIC suportado (CPUID.1:ECX[21])
        const X2APIC = 1 << 1;
        /// RDMSR/WRMSR (CPUID.1:EDX[5])
        const MSR = 1 << 2;
        /// Time Stamp Counter (CPUID.1:EDX[4])
        const TSC = 1 << 3;
        /// Modo TSC-deadline do timer do APIC (CPUID.1:ECX[24])
        const TSC_DEADLINE = 1 << 4;
        /// TSC invariante (CPUID.80000007:EDX[8])
        const INVARIANT_TSC = 1 << 5;
    }
}

/// Registradores de controle copiados para os APs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlRegisters {
    pub cr0: u64,
    pub cr3: u64,
    pub cr4: u64,
}

/// Bases e limites da GDT/IDT do BSP (resultado de SGDT/SIDT).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorPointers {
    pub gdt_base: u64,
    pub gdt_limit: u16,
    pub idt_base: u64,
    pub idt_limit: u16,
}

/// Operações de processador.
///
/// Todas as operações agem sobre a CPU que as executa.
pub trait CpuOps: Sync {
    /// Recursos detectados via CPUID.
    fn features(&self) -> CpuFeatures;

    /// Lê um Model Specific Register.
    ///
    /// # Safety
    /// Ler um MSR reservado causa #GP.
    unsafe fn read_msr(&self, msr: u32) -> u64;

    /// Escreve um Model Specific Register.
    ///
    /// # Safety
    /// Escrever valores inválidos causa #GP ou corrompe o estado da CPU.
    unsafe fn write_msr(&self, msr: u32, value: u64);

    /// Busy-wait de `us` microssegundos.
    fn microseconds_delay(&self, us: u64);

    /// Invalida toda a TLB local (recarrega CR3).
    fn flush_entire_tlb_local(&self);

    fn control_registers(&self) -> ControlRegisters;

    fn descriptor_pointers(&self) -> DescriptorPointers;

    /// APIC ID físico da CPU atual.
    fn current_id(&self) -> u32;

    /// Flag IF (RFLAGS bit 9) da CPU atual.
    fn interrupts_enabled(&self) -> bool;

    /// CLI.
    ///
    /// # Safety
    /// O chamador restaura o estado anterior; ver `without_interrupts`.
    unsafe fn disable_interrupts(&self);

    /// STI.
    ///
    /// # Safety
    /// Só com IDT válida e handlers prontos.
    unsafe fn enable_interrupts(&self);

    /// Hint de spin loop (PAUSE).
    fn relax(&self) {
        ::core::hint::spin_loop();
    }
}

/// Executa `f` com interrupções desabilitadas na CPU atual e restaura o
/// estado anterior (aninhável).
pub fn without_interrupts<R>(cpu: &dyn CpuOps, f: impl FnOnce() -> R) -> R {
    let was_enabled = cpu.interrupts_enabled();
    if was_enabled {
        // SAFETY: o estado é restaurado abaixo.
        unsafe { cpu.disable_interrupts() };
    }
    let result = f();
    if was_enabled {
        // SAFETY: estavam habilitadas na entrada.
        unsafe { cpu.enable_interrupts() };
    }
    result
}
