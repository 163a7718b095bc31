/// Arquivo: x86_64/ports.rs
///
/// Propósito: Port I/O legado do x86 (PIT, CMOS/RTC, COM1).
///
/// Detalhes de Implementação:
/// - Usa `core::arch::asm!` para emitir instruções `in` e `out`.
/// - `X64Ports` expõe as instruções pela trait `PortIo`, que é o que os
///   drivers de timer e a serial recebem.
use crate::arch::traits::PortIo;

/// Lê um byte de uma porta IO
#[inline]
pub fn inb(port: u16) -> u8 {
    let value: u8;
    // SAFETY: IO ports são operações privilegiadas mas seguras do ponto de vista de memória
    unsafe {
        ::core::arch::asm!(
            "in al, dx",
            in("dx") port,
            out("al") value,
            options(nomem, nostack)
        );
    }
    value
}

/// Escreve um byte em uma porta IO
#[inline]
pub fn outb(port: u16, value: u8) {
    // SAFETY: IO ports são operações privilegiadas mas seguras do ponto de vista de memória
    unsafe {
        ::core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") value,
            options(nomem, nostack)
        );
    }
}

/// Port I/O real.
pub struct X64Ports;

impl PortIo for X64Ports {
    #[inline]
    fn inb(&self, port: u16) -> u8 {
        inb(port)
    }

    #[inline]
    fn outb(&self, port: u16, value: u8) {
        outb(port, value)
    }
}
