// =============================================================================
// SERIAL DRIVER - SINK DE LOG
// =============================================================================
//
// Porta Serial (COM1, UART 16550) como destino dos macros de log.
//
// ARQUITETURA:
// - SEM Mutex/Spinlock - Escrita direta via `PortIo`
// - SEM core::fmt - Apenas strings já montadas pelos macros
// - SEM alocação
//
// NOTA IMPORTANTE:
// Este driver NÃO garante exclusão mútua entre CPUs. Com os APs online,
// linhas de log podem se intercalar. Isso é aceitável para debugging.
//
// =============================================================================

use crate::arch::PortIo;
use crate::core::logging::LogSink;

/// Porta base da COM1
pub const COM1: u16 = 0x3F8;

// Offsets dos registradores da UART
const REG_DATA: u16 = 0;
const REG_INTERRUPT_ENABLE: u16 = 1;
const REG_FIFO_CONTROL: u16 = 2;
const REG_LINE_CONTROL: u16 = 3;
const REG_MODEM_CONTROL: u16 = 4;
const REG_LINE_STATUS: u16 = 5;

/// Line Status: Transmitter Holding Register vazio
const LSR_THR_EMPTY: u8 = 0x20;

pub struct SerialSink {
    ports: &'static dyn PortIo,
    base: u16,
}

impl SerialSink {
    /// Programa a COM1: 38400 baud, 8N1, FIFO habilitado.
    pub fn new(ports: &'static dyn PortIo) -> Self {
        let sink = Self { ports, base: COM1 };
        sink.init();
        sink
    }

    fn init(&self) {
        // Desabilita interrupções
        self.out(REG_INTERRUPT_ENABLE, 0x00);
        // Habilita DLAB (divisor de baud rate)
        self.out(REG_LINE_CONTROL, 0x80);
        // Divisor 3 = 38400 baud
        self.out(REG_DATA, 0x03);
        self.out(REG_INTERRUPT_ENABLE, 0x00);
        // 8 bits, sem paridade, 1 stop bit
        self.out(REG_LINE_CONTROL, 0x03);
        // FIFO habilitado e limpo, limiar de 14 bytes
        self.out(REG_FIFO_CONTROL, 0xC7);
        // RTS/DSR
        self.out(REG_MODEM_CONTROL, 0x0B);
    }

    fn out(&self, reg: u16, value: u8) {
        self.ports.outb(self.base + reg, value);
    }

    fn is_transmit_empty(&self) -> bool {
        self.ports.inb(self.base + REG_LINE_STATUS) & LSR_THR_EMPTY != 0
    }

    pub fn write_byte(&self, byte: u8) {
        while !self.is_transmit_empty() {
            ::core::hint::spin_loop();
        }
        self.out(REG_DATA, byte);
    }
}

impl LogSink for SerialSink {
    fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
    }
}
