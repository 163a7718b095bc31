/// Arquivo: x86_64/apic/mod.rs
///
/// Propósito: Local APIC (LAPIC), um por core. Gerencia interrupções locais,
/// IPIs (incluindo a sequência INIT/STARTUP do bring-up) e o timer local.
///
/// Módulos contidos:
/// - `regs`: Offsets, vetores e encoding da LVT.
/// - `icr`: Interrupt Command Register.
/// - `lapic`: Controlador (xAPIC via MMIO ou x2APIC via MSR).
/// - `timer`: Timer local calibrado.
pub mod icr;
pub mod lapic;
pub mod regs;
pub mod timer;

pub use icr::Icr;
pub use lapic::{ApicState, LocalApic};
pub use timer::ApicTimer;
