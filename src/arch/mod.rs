//! # Hardware Abstraction Layer (HAL)
//!
//! O módulo `arch` é a ponte entre a lógica de SMP/tempo e o hardware real.
//! Instruções privilegiadas (CPUID, MSR, CR3, port I/O) ficam atrás dos traits
//! de `traits/`; o núcleo recebe implementações como `&'static dyn Trait`.
//!
//! ## Arquitetura e Fluxo
//! 1. `x86_64::cpu::X64Cpu` e `x86_64::ports::X64Ports` implementam os traits
//!    com assembly inline (apenas em `target_arch = "x86_64"`).
//! 2. O driver do Local APIC, o parser da MADT e o trampoline dos APs vivem em
//!    `x86_64/`, mas só falam com o hardware através dos traits e de
//!    `klib::mmio::MmioWindow`.
//! 3. Em testes de host, `mock` fornece CPUs, memória e portas simuladas.

pub mod traits;
pub mod x86_64;

#[cfg(test)]
pub mod mock;

pub use traits::*;
