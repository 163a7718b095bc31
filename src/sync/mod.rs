//! # Synchronization Primitives
//!
//! Primitivas de sincronização do núcleo SMP/Tempo.
//!
//! ## Hierarquia de Uso
//!
//! ```text
//! spin::Mutex  → Estado de configuração (registry de timers, escritores do seqlock)
//! spin::Once   → Estado construído uma única vez (sink de log, contexto, hooks)
//! SeqLock      → Relógio: escritor único em IRQ, leitores sem lock
//! spin_wait    → Busy-poll sem prazo com hook de diagnóstico
//! ```
//!
//! ## Regras
//!
//! - Nada aqui dorme: o código roda no boot com IRQs mascaradas ou em
//!   contexto de interrupção.
//! - Leitores do seqlock nunca bloqueiam o escritor.

pub mod seqlock;
pub mod spin_wait;

pub use seqlock::{SeqCell, SeqLock, SeqWriteGuard};
pub use spin_wait::{spin_until, PollHook, PollObserver, SpinSite};
