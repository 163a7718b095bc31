//! # Boot - Configuração de linha de comando
//!
//! Flags que habilitam ou desabilitam SMP, APIC e a fonte de tempo.

pub mod cmdline;
