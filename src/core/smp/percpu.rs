/// Arquivo: core/smp/percpu.rs
///
/// Propósito: Descritores por CPU (ProcessorDescriptor) e a tabela que os
/// contém. Cada CPU lógica tem exatamente um descritor, criado pelo BSP antes
/// dos IPIs e apontado pelo array de descritores do trampoline.
///
/// Detalhes de Implementação:
/// - A tabela é um `Box<[ProcessorDescriptor]>`: endereços estáveis, pois o
///   trampoline guarda ponteiros crus para os descritores dos APs.
/// - O estado do ciclo de vida do AP é um `AtomicU8` que só avança
///   (`NotStarted → InitSignaled → StartupSent → RunningPreHandshake →
///   HandshakeComplete → FullyEnabled`). Retroceder é violação de protocolo.
use ::core::sync::atomic::{AtomicU8, Ordering};

use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Once;

use super::topology::CpuTopology;
use crate::mm::KernelStack;
use crate::sched::ThreadHandle;
use crate::sys::{KResult, KernelError};

/// Número máximo de CPUs suportadas (largura da máscara de CPUs habilitadas).
pub const MAX_CPUS: usize = 64;

/// Ciclo de vida de um AP durante o bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ApState {
    NotStarted = 0,
    /// BSP prestes a enviar o INIT
    InitSignaled = 1,
    /// BSP prestes a enviar o primeiro STARTUP
    StartupSent = 2,
    /// AP em long mode, antes de sinalizar prontidão
    RunningPreHandshake = 3,
    /// AP liberado pelo BSP
    HandshakeComplete = 4,
    /// LAPIC e timer local habilitados
    FullyEnabled = 5,
}

impl ApState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::InitSignaled,
            2 => Self::StartupSent,
            3 => Self::RunningPreHandshake,
            4 => Self::HandshakeComplete,
            5 => Self::FullyEnabled,
            _ => Self::NotStarted,
        }
    }
}

/// Descritor de uma CPU lógica.
pub struct ProcessorDescriptor {
    cpu: u32,
    apic_id: u32,
    state: AtomicU8,
    idle_thread: Once<ThreadHandle>,
    boot_stack: Once<KernelStack>,
}

impl ProcessorDescriptor {
    pub fn new(cpu: u32, apic_id: u32) -> Self {
        Self {
            cpu,
            apic_id,
            state: AtomicU8::new(ApState::NotStarted as u8),
            idle_thread: Once::new(),
            boot_stack: Once::new(),
        }
    }

    /// Índice lógico (0 = BSP).
    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    pub fn apic_id(&self) -> u32 {
        self.apic_id
    }

    pub fn state(&self) -> ApState {
        ApState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Avança o estado. Qualquer transição que não seja para frente é
    /// `ProtocolViolation`.
    pub fn advance(&self, next: ApState) -> KResult<()> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .map(|_| ())
            .map_err(|current| {
                crate::kerror!("(SMP) Transição de estado inválida na CPU ", self.cpu);
                crate::kerror!("(SMP) Estado atual: ", current);
                KernelError::ProtocolViolation
            })
    }

    pub fn set_idle_thread(&self, handle: ThreadHandle) {
        self.idle_thread.call_once(|| handle);
    }

    pub fn idle_thread(&self) -> Option<ThreadHandle> {
        self.idle_thread.get().copied()
    }

    /// Stack de boot (vira a stack permanente da CPU após o handshake).
    pub fn set_boot_stack(&self, stack: KernelStack) {
        self.boot_stack.call_once(|| stack);
    }

    pub fn boot_stack(&self) -> Option<KernelStack> {
        self.boot_stack.get().copied()
    }
}

/// Todos os descritores, indexados pela CPU lógica.
pub struct ProcessorTable {
    descriptors: Box<[ProcessorDescriptor]>,
}

impl ProcessorTable {
    /// Um descritor por CPU habilitada da topologia. Falha de alocação
    /// aborta o bring-up inteiro.
    pub fn new(topology: &CpuTopology) -> KResult<Self> {
        let count = topology.enabled_count();
        let mut descriptors = Vec::new();
        descriptors
            .try_reserve_exact(count)
            .map_err(|_| KernelError::AllocationFailure)?;
        descriptors.extend(
            topology
                .cpus()
                .map(|info| ProcessorDescriptor::new(info.logical_id, info.apic_id)),
        );
        Ok(Self {
            descriptors: descriptors.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, cpu: u32) -> Option<&ProcessorDescriptor> {
        self.descriptors.get(cpu as usize)
    }

    pub fn bsp(&self) -> Option<&ProcessorDescriptor> {
        self.descriptors.first()
    }

    /// Descritores dos APs (CPU 1 em diante), na ordem do trampoline.
    pub fn aps(&self) -> &[ProcessorDescriptor] {
        self.descriptors.get(1..).unwrap_or(&[])
    }

    /// Avança todos os APs para `state`.
    pub fn advance_aps(&self, state: ApState) -> KResult<()> {
        self.aps().iter().try_for_each(|d| d.advance(state))
    }

    pub fn count_in(&self, state: ApState) -> usize {
        self.descriptors.iter().filter(|d| d.state() == state).count()
    }
}
