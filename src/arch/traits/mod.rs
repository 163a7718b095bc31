//! Traits do Hardware Abstraction Layer (HAL).
//! Interfaces que o núcleo SMP/Tempo usa para falar com o hardware e com os
//! subsistemas vizinhos (dispatch de interrupções).

pub mod cpu;
pub mod interrupts;
pub mod ports;

// Re-exportar para facilitar uso: `use crate::arch::traits::CpuOps;`
pub use cpu::{without_interrupts, ControlRegisters, CpuFeatures, CpuOps, DescriptorPointers};
pub use interrupts::{InterruptDispatch, IrqHandler};
pub use ports::PortIo;
