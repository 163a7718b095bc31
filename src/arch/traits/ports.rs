//! Port I/O legado (PIT, CMOS/RTC, COM1).

pub trait PortIo: Sync {
    fn inb(&self, port: u16) -> u8;
    fn outb(&self, port: u16, value: u8);

    /// Pequeno atraso de barramento (escrita na porta de POST 0x80).
    fn io_wait(&self) {
        self.outb(0x80, 0);
    }
}
