//! Definições de Sistema.
//!
//! Contém os tipos de erro compartilhados pelo núcleo SMP/Tempo.

pub mod error;

pub use error::{KResult, KernelError};
