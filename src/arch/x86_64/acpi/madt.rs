/// Arquivo: x86_64/acpi/madt.rs
///
/// Propósito: Parsing da Multiple APIC Description Table (MADT).
/// Esta tabela descreve todos os controladores de interrupção (Local APICs,
/// x2APICs e I/O APICs) presentes no sistema. É a fonte da topologia SMP.
///
/// Detalhes de Implementação:
/// - Valida assinatura, tamanho e checksum antes de iterar.
/// - Registros lidos com `read_unaligned` sobre as structs empacotadas.
/// - Tipos interpretados:
///   - Tipo 0: Processor Local APIC.
///   - Tipo 1: I/O APIC (apenas contado).
///   - Tipo 9: Processor Local x2APIC.
/// - Qualquer inconsistência resulta em `TopologyUnavailable`.
use ::core::mem::size_of;

use alloc::vec::Vec;

use crate::sys::{KResult, KernelError};

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct MadtHeader {
    pub signature: [u8; 4], // "APIC"
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: u32,
    pub creator_revision: u32,

    // Campos específicos MADT
    pub local_apic_address: u32, // Endereço físico base dos Local APICs
    pub flags: u32,              // Bit 0 = PCAT_COMPAT (tem PIC 8259?)
}

/// Cabeçalho genérico para registros da MADT
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct MadtEntryHeader {
    pub entry_type: u8,
    pub record_length: u8,
}

/// Tipo 0: Processor Local APIC
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct MadtLocalApic {
    pub header: MadtEntryHeader,
    pub acpi_processor_id: u8,
    pub apic_id: u8,
    pub flags: u32,
}

/// Tipo 9: Processor Local x2APIC
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct MadtLocalX2Apic {
    pub header: MadtEntryHeader,
    pub reserved: u16,
    pub x2apic_id: u32,
    pub flags: u32,
    pub acpi_processor_uid: u32,
}

pub const ENTRY_LOCAL_APIC: u8 = 0;
pub const ENTRY_IO_APIC: u8 = 1;
pub const ENTRY_LOCAL_X2APIC: u8 = 9;

/// Flags de processador (tipos 0 e 9).
pub const PROCESSOR_ENABLED: u32 = 1 << 0;
pub const PROCESSOR_ONLINE_CAPABLE: u32 = 1 << 1;

/// Processador descrito pela MADT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MadtProcessor {
    pub acpi_id: u32,
    pub apic_id: u32,
    pub enabled: bool,
    pub online_capable: bool,
    pub x2apic: bool,
}

/// Resultado do parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MadtInfo {
    pub local_apic_address: u32,
    pub processors: Vec<MadtProcessor>,
    pub io_apic_count: usize,
}

fn read_record<T: Copy>(bytes: &[u8], offset: usize) -> Option<T> {
    if offset.checked_add(size_of::<T>())? > bytes.len() {
        return None;
    }
    // SAFETY: limites verificados; structs empacotadas admitem leitura desalinhada.
    Some(unsafe { ::core::ptr::read_unaligned(bytes.as_ptr().add(offset) as *const T) })
}

/// Interpreta uma MADT completa (incluindo o cabeçalho SDT).
pub fn parse(bytes: &[u8]) -> KResult<MadtInfo> {
    let header: MadtHeader = read_record(bytes, 0).ok_or_else(|| {
        crate::kwarn!("(MADT) Tabela truncada");
        KernelError::TopologyUnavailable
    })?;

    if header.signature != *b"APIC" {
        crate::kwarn!("(MADT) Assinatura inválida");
        return Err(KernelError::TopologyUnavailable);
    }

    let length = header.length as usize;
    if length < size_of::<MadtHeader>() || length > bytes.len() {
        crate::kwarn!("(MADT) Tamanho inválido: ", length);
        return Err(KernelError::TopologyUnavailable);
    }
    let table = &bytes[..length];
    if super::checksum(table) != 0 {
        crate::kwarn!("(MADT) Checksum inválido");
        return Err(KernelError::TopologyUnavailable);
    }

    let mut info = MadtInfo {
        local_apic_address: header.local_apic_address,
        processors: Vec::new(),
        io_apic_count: 0,
    };

    let mut offset = size_of::<MadtHeader>();
    while offset < length {
        let entry: MadtEntryHeader =
            read_record(table, offset).ok_or(KernelError::TopologyUnavailable)?;
        let record_length = entry.record_length as usize;
        if record_length < size_of::<MadtEntryHeader>() || offset + record_length > length {
            crate::kwarn!("(MADT) Registro malformado no offset ", offset);
            return Err(KernelError::TopologyUnavailable);
        }
        let record = &table[offset..offset + record_length];

        match entry.entry_type {
            ENTRY_LOCAL_APIC => {
                let lapic: MadtLocalApic =
                    read_record(record, 0).ok_or(KernelError::TopologyUnavailable)?;
                let flags = lapic.flags;
                info.processors.push(MadtProcessor {
                    acpi_id: lapic.acpi_processor_id as u32,
                    apic_id: lapic.apic_id as u32,
                    enabled: flags & PROCESSOR_ENABLED != 0,
                    online_capable: flags & PROCESSOR_ONLINE_CAPABLE != 0,
                    x2apic: false,
                });
            }
            ENTRY_LOCAL_X2APIC => {
                let x2: MadtLocalX2Apic =
                    read_record(record, 0).ok_or(KernelError::TopologyUnavailable)?;
                let flags = x2.flags;
                info.processors.push(MadtProcessor {
                    acpi_id: x2.acpi_processor_uid,
                    apic_id: x2.x2apic_id,
                    enabled: flags & PROCESSOR_ENABLED != 0,
                    online_capable: flags & PROCESSOR_ONLINE_CAPABLE != 0,
                    x2apic: true,
                });
            }
            ENTRY_IO_APIC => info.io_apic_count += 1,
            _ => {}
        }
        offset += record_length;
    }

    crate::kdebug!("(MADT) Processadores: ", info.processors.len());
    crate::kdebug!("(MADT) I/O APICs: ", info.io_apic_count);
    Ok(info)
}

/// Construtor de MADTs sintéticas para testes.
#[cfg(test)]
pub mod builder {
    use super::*;

    pub struct MadtBuilder {
        records: Vec<u8>,
    }

    impl MadtBuilder {
        pub fn new() -> Self {
            Self { records: Vec::new() }
        }

        pub fn local_apic(mut self, acpi_id: u8, apic_id: u8, flags: u32) -> Self {
            self.records.extend_from_slice(&[ENTRY_LOCAL_APIC, 8, acpi_id, apic_id]);
            self.records.extend_from_slice(&flags.to_le_bytes());
            self
        }

        pub fn x2apic(mut self, x2apic_id: u32, flags: u32, uid: u32) -> Self {
            self.records.extend_from_slice(&[ENTRY_LOCAL_X2APIC, 16, 0, 0]);
            self.records.extend_from_slice(&x2apic_id.to_le_bytes());
            self.records.extend_from_slice(&flags.to_le_bytes());
            self.records.extend_from_slice(&uid.to_le_bytes());
            self
        }

        pub fn io_apic(mut self) -> Self {
            self.records.extend_from_slice(&[ENTRY_IO_APIC, 12, 0, 0]);
            self.records.extend_from_slice(&0xFEC0_0000u32.to_le_bytes());
            self.records.extend_from_slice(&0u32.to_le_bytes());
            self
        }

        /// Tabela completa com checksum corrigido.
        pub fn build(self) -> Vec<u8> {
            let length = (size_of::<MadtHeader>() + self.records.len()) as u32;
            let mut bytes = Vec::new();
            bytes.extend_from_slice(b"APIC");
            bytes.extend_from_slice(&length.to_le_bytes());
            bytes.push(4); // revision
            bytes.push(0); // checksum
            bytes.extend_from_slice(b"ANVIL ");
            bytes.extend_from_slice(b"ANVILTBL");
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
            bytes.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.extend_from_slice(&self.records);
            let sum = crate::arch::x86_64::acpi::checksum(&bytes);
            bytes[9] = 0u8.wrapping_sub(sum);
            bytes
        }
    }
}
