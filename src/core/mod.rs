//! Core Module
//!
//! Lógica independente de arquitetura: bring-up SMP, timekeeping e o
//! contexto que liga os dois às interfaces de plataforma.

pub mod boot;
pub mod context;
pub mod logging;
pub mod smp;
pub mod time;

#[cfg(any(test, feature = "self_test"))]
pub mod test;
