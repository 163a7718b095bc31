//! Contrato com o framework de interrupções.
//!
//! O núcleo SMP/Tempo não define a tabela de vetores; apenas registra
//! handlers para os vetores que programa (APIC e timers).

use crate::sys::KResult;

/// Handler de um vetor de interrupção.
pub trait IrqHandler: Sync {
    /// Trata a interrupção `vector` na CPU atual.
    fn handle_irq(&self, vector: u8);
}

/// Registro de handlers fornecido pelo framework de interrupções.
pub trait InterruptDispatch: Sync {
    fn register_interrupt_handler(
        &self,
        vector: u8,
        handler: &'static dyn IrqHandler,
    ) -> KResult<()>;
}
