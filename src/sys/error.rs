//! Tipos de Erro do núcleo SMP/Tempo
//!
//! Taxonomia de falhas do bring-up e do timekeeping.
//! Erros recuperáveis degradam capacidade (uniprocessador, timer legado);
//! os fatais terminam o boot.

/// Erros do núcleo SMP e de tempo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Sem Local APIC ou sem suporte a MSR (fallback legado fora deste núcleo)
    HardwareAbsent,
    /// Falha ao alocar stacks, descritores ou regiões de bootstrap
    AllocationFailure,
    /// Tabela ACPI (MADT) ausente ou malformada
    TopologyUnavailable,
    /// Nenhum timer de hardware utilizável
    TimerUnavailable,
    /// Invariante do handshake ou do seqlock violado
    ProtocolViolation,
    /// Parâmetro rejeitado (frequência, índice de CPU)
    InvalidArgument,
}

impl KernelError {
    /// Retorna descrição legível do erro
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HardwareAbsent => "Local APIC/MSR ausente",
            Self::AllocationFailure => "Falha de alocação no bootstrap",
            Self::TopologyUnavailable => "Topologia ACPI indisponível",
            Self::TimerUnavailable => "Nenhum timer de hardware utilizável",
            Self::ProtocolViolation => "Violação de protocolo (handshake/seqlock)",
            Self::InvalidArgument => "Parâmetro inválido",
        }
    }

    /// Indica se o erro deve travar o boot.
    ///
    /// `TimerUnavailable` só é fatal quando não sobra nenhum timer; o chamador
    /// que recebe esse erro de uma fonte opcional (APIC timer) apenas registra.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TimerUnavailable | Self::ProtocolViolation)
    }
}

impl ::core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tipo Result específico do núcleo
pub type KResult<T> = Result<T, KernelError>;
