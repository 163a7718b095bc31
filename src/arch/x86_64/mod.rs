//! Implementação x86_64
//!
//! Tabelas ACPI, Local APIC, trampoline dos APs e as implementações reais
//! de `CpuOps`/`PortIo`.

pub mod acpi;
pub mod apic;
pub mod smp;

#[cfg(target_arch = "x86_64")]
pub mod cpu;
#[cfg(target_arch = "x86_64")]
pub mod ports;

#[cfg(target_arch = "x86_64")]
pub use cpu::X64Cpu;
#[cfg(target_arch = "x86_64")]
pub use ports::X64Ports;
