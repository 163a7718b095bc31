//! Implementação x86_64 das operações de CPU (HAL).
//!
//! Usa Assembly inline para CPUID, MSRs, registradores de controle e
//! SGDT/SIDT.
//!
//! # Segurança
//! Esta implementação assume que o código está rodando em modo longo (64-bit)
//! e nível de privilégio de kernel (Ring 0).

use ::core::arch::asm;

use crate::arch::traits::cpu::{ControlRegisters, CpuFeatures, CpuOps, DescriptorPointers};

/// Porta de POST: cada escrita leva ~1 µs no barramento ISA.
const POST_PORT: u16 = 0x80;

pub struct X64Cpu;

/// Resultado de uma execução do CPUID (EAX, EBX, ECX, EDX).
#[derive(Debug, Clone, Copy)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Formato de SGDT/SIDT.
#[repr(C, packed)]
#[derive(Default)]
struct PseudoDescriptor {
    limit: u16,
    base: u64,
}

impl X64Cpu {
    /// Executa a instrução CPUID.
    pub fn cpuid(leaf: u32, subleaf: u32) -> CpuidResult {
        let eax: u32;
        let ebx: u32;
        let ecx: u32;
        let edx: u32;

        // SAFETY: CPUID não acessa memória. RBX é reservado pelo LLVM, por
        // isso o push/pop manual.
        unsafe {
            asm!(
                "push rbx",
                "cpuid",
                "mov {0:e}, ebx",
                "pop rbx",
                out(reg) ebx,
                inout("eax") leaf => eax,
                inout("ecx") subleaf => ecx,
                out("edx") edx,
                options(nomem, preserves_flags),
            );
        }
        CpuidResult { eax, ebx, ecx, edx }
    }

    fn max_leaf(base: u32) -> u32 {
        Self::cpuid(base, 0).eax
    }

    #[inline]
    fn post_delay() {
        // SAFETY: escrita na porta de POST não tem efeito além do atraso.
        unsafe {
            asm!("out dx, al", in("dx") POST_PORT, in("al") 0u8, options(nomem, nostack));
        }
    }
}

impl CpuOps for X64Cpu {
    fn features(&self) -> CpuFeatures {
        let leaf1 = Self::cpuid(1, 0);
        let mut features = CpuFeatures::empty();
        if leaf1.edx & (1 << 9) != 0 {
            features |= CpuFeatures::APIC;
        }
        if leaf1.edx & (1 << 5) != 0 {
            features |= CpuFeatures::MSR;
        }
        if leaf1.edx & (1 << 4) != 0 {
            features |= CpuFeatures::TSC;
        }
        if leaf1.ecx & (1 << 21) != 0 {
            features |= CpuFeatures::X2APIC;
        }
        if leaf1.ecx & (1 << 24) != 0 {
            features |= CpuFeatures::TSC_DEADLINE;
        }
        if Self::max_leaf(0x8000_0000) >= 0x8000_0007
            && Self::cpuid(0x8000_0007, 0).edx & (1 << 8) != 0
        {
            features |= CpuFeatures::INVARIANT_TSC;
        }
        features
    }

    #[inline]
    unsafe fn read_msr(&self, msr: u32) -> u64 {
        let (high, low): (u32, u32);
        asm!(
            "rdmsr",
            in("ecx") msr,
            out("eax") low,
            out("edx") high,
            options(nomem, nostack, preserves_flags),
        );
        ((high as u64) << 32) | (low as u64)
    }

    #[inline]
    unsafe fn write_msr(&self, msr: u32, value: u64) {
        asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") value as u32,
            in("edx") (value >> 32) as u32,
            options(nostack, preserves_flags),
        );
    }

    fn microseconds_delay(&self, us: u64) {
        for _ in 0..us {
            Self::post_delay();
        }
    }

    fn flush_entire_tlb_local(&self) {
        // SAFETY: recarregar o mesmo CR3 só invalida entradas não globais.
        unsafe {
            asm!(
                "mov {tmp}, cr3",
                "mov cr3, {tmp}",
                tmp = out(reg) _,
                options(nostack, preserves_flags),
            );
        }
    }

    fn control_registers(&self) -> ControlRegisters {
        let (cr0, cr3, cr4): (u64, u64, u64);
        // SAFETY: leitura de registradores de controle em Ring 0.
        unsafe {
            asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
            asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
            asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
        }
        ControlRegisters { cr0, cr3, cr4 }
    }

    fn descriptor_pointers(&self) -> DescriptorPointers {
        let mut gdtr = PseudoDescriptor::default();
        let mut idtr = PseudoDescriptor::default();
        // SAFETY: SGDT/SIDT escrevem 10 bytes no destino.
        unsafe {
            asm!(
                "sgdt [{}]",
                in(reg) &mut gdtr as *mut PseudoDescriptor,
                options(nostack, preserves_flags),
            );
            asm!(
                "sidt [{}]",
                in(reg) &mut idtr as *mut PseudoDescriptor,
                options(nostack, preserves_flags),
            );
        }
        DescriptorPointers {
            gdt_base: gdtr.base,
            gdt_limit: gdtr.limit,
            idt_base: idtr.base,
            idt_limit: idtr.limit,
        }
    }

    /// APIC ID da CPU atual: folha 0xB (x2APIC, 32 bits) quando existe,
    /// senão o Initial APIC ID da folha 1 (bits 24..31 de EBX).
    fn current_id(&self) -> u32 {
        if Self::max_leaf(0) >= 0xB {
            let topology = Self::cpuid(0xB, 0);
            if topology.ebx != 0 {
                return topology.edx;
            }
        }
        Self::cpuid(1, 0).ebx >> 24
    }

    fn interrupts_enabled(&self) -> bool {
        let rflags: u64;
        // SAFETY: só lê RFLAGS pela pilha.
        unsafe {
            asm!("pushfq", "pop {}", out(reg) rflags, options(nomem, preserves_flags));
        }
        rflags & (1 << 9) != 0
    }

    #[inline]
    unsafe fn disable_interrupts(&self) {
        asm!("cli", options(nomem, nostack));
    }

    #[inline]
    unsafe fn enable_interrupts(&self) {
        asm!("sti", options(nomem, nostack));
    }

    #[inline]
    fn relax(&self) {
        // SAFETY: PAUSE é só uma dica ao processador.
        unsafe {
            asm!("pause", options(nomem, nostack, preserves_flags));
        }
    }
}
