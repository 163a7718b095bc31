/// Arquivo: x86_64/acpi/mod.rs
///
/// Propósito: Suporte às tabelas ACPI necessárias ao bring-up.
/// Apenas a MADT (topologia de CPUs e APICs) é interpretada aqui; a tabela
/// chega do bootloader já localizada.
///
/// Módulos contidos:
/// - `madt`: Multiple APIC Description Table.
pub mod madt;

/// Soma de todos os bytes de uma tabela ACPI (válida quando == 0).
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
