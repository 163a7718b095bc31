/// Arquivo: core/smp/mod.rs
///
/// Propósito: Módulo de Multiprocessamento Simétrico (SMP).
/// Gerencia a descoberta, inicialização e comunicação entre múltiplos cores de CPU.
///
/// Módulos contidos:
/// - `percpu`: Descritores por CPU e ciclo de vida dos APs.
/// - `topology`: CPUs descritas pela MADT.
/// - `handshake`: Sincronização BSP/APs em duas fases.
/// - `bringup`: Inicialização de APs (Application Processors).
/// - `ipi`: Inter-Processor Interrupts.
pub mod bringup;
pub mod handshake;
pub mod ipi;
pub mod percpu;
pub mod topology;

use spin::Once;

pub use handshake::Handshake;
pub use percpu::{ApState, ProcessorDescriptor, ProcessorTable, MAX_CPUS};
pub use topology::{CpuId, CpuInfo, CpuTopology};

/// Estado SMP global: topologia fixa, handshake e a tabela de descritores
/// (criada uma única vez pelo bring-up).
pub struct SmpState {
    topology: CpuTopology,
    handshake: Handshake,
    processors: Once<ProcessorTable>,
}

impl SmpState {
    pub fn new(topology: CpuTopology) -> Self {
        Self {
            topology,
            handshake: Handshake::new(),
            processors: Once::new(),
        }
    }

    pub fn topology(&self) -> &CpuTopology {
        &self.topology
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn processors(&self) -> Option<&ProcessorTable> {
        self.processors.get()
    }

    /// Publica a tabela. `None` se já havia uma.
    pub(crate) fn install_processors(&self, table: ProcessorTable) -> Option<&ProcessorTable> {
        if self.processors.is_completed() {
            return None;
        }
        Some(self.processors.call_once(|| table))
    }

    /// CPUs com o bring-up completo (o BSP conta a partir do início do boot
    /// dos APs; sem tabela, só o BSP).
    pub fn online_count(&self) -> usize {
        self.processors
            .get()
            .map_or(1, |table| table.count_in(ApState::FullyEnabled))
    }
}
