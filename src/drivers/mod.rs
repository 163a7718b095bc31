//! # Drivers do núcleo SMP/Tempo
//!
//! Apenas os dispositivos que o bring-up e o timekeeping usam diretamente.
//!
//! | Driver | Arquivo | Uso |
//! |--------|---------|-----|
//! | Serial | `serial.rs` | UART 16550 (COM1), sink dos logs |
//! | PIT | `timer/pit.rs` | Time-keeper legado |
//! | RTC | `timer/rtc.rs` | Timer de sistema legado + hora de boot |
//! | HPET | `timer/hpet.rs` | Time-keeper preciso |
//!
//! O timer do Local APIC fica em `arch::x86_64::apic::timer`, junto do
//! controlador.

pub mod serial; // UART 16550 - Logs
pub mod timer; // PIT, RTC, HPET + registro de papéis
