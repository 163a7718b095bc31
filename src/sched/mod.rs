//! # Contrato com o Scheduler
//!
//! A política de escalonamento está fora deste núcleo. O bring-up e o
//! timekeeping apenas consomem os ganchos abaixo.

use crate::sys::KResult;

/// Handle opaco de uma thread do scheduler.
pub type ThreadHandle = u64;

/// Ganchos fornecidos pelo scheduler.
pub trait SchedulerHooks: Sync {
    /// Cria a thread idle da CPU `cpu` (chamado no BSP antes dos IPIs).
    fn create_idle_thread(&self, cpu: u32) -> KResult<ThreadHandle>;

    /// Tick do timer de sistema (contexto de IRQ, CPU atual).
    fn timer_tick(&self);

    /// Tick do timer de profiling. Padrão: ignorado.
    fn profile_tick(&self) {}

    /// Entra no loop idle da CPU. Não retorna.
    fn enter_idle(&self, cpu: u32) -> !;
}
