//! Anvil: Núcleo SMP e Timekeeping do Forge.
//!
//! Ponto central de exportação dos módulos.
//! Reúne o bring-up multiprocessador (Local APIC + handshake dos APs)
//! e o relógio lock-free (seqlock + TimePage).

#![cfg_attr(not(test), no_std)]

// Habilitar alocação dinâmica (Vec/Box/Arc)
extern crate alloc;

// --- Módulos de Baixo Nível (Hardware) ---
pub mod arch; // HAL (CPU, APIC, ACPI, Trampoline)
pub mod drivers; // Timers de hardware (PIT, RTC, HPET) e serial

// --- Módulos Centrais ---
pub mod core; // Contexto, logging, SMP, tempo
pub mod klib; // Utilitários internos (MMIO, bits, self-test)
pub mod mm; // Contrato com o gerenciador de memória
pub mod sched; // Contrato com o scheduler
pub mod sync; // Seqlock e hooks de espera
pub mod sys; // Erros

pub use crate::core::context::KernelContext;
pub use crate::sys::error::{KResult, KernelError};
