//! Trampoline dos APs (real mode → protected mode → long mode).
//!
//! Layout da região identity-mapped em `TRAMPOLINE_ADDRESS`:
//!
//! ```text
//! 0x0000  código do trampoline (copiado de `code()`)
//! 0x0F00  ApBootInfo (versionado, offsets fixos)
//! 0x0F60  pseudo-descritor GDTR do BSP (limit u16 + base u64)
//! 0x0F70  pseudo-descritor IDTR do BSP
//! 0x1000  [u64; N-1] topo das stacks
//!         [u64; N-1] ponteiros de ProcessorDescriptor
//! ```
//!
//! Cada AP pega seu índice com `lock xadd` em `ap_cpu_counter`, carrega a
//! stack e o descritor correspondentes e chama
//! `kernel_entry(descriptor, ap_index + 1)`. Um índice `>= ap_count` (CPU
//! fora da tabela) fica em `hlt` sem tocar nos arrays.

use ::core::mem::offset_of;

use crate::mm::PAGE_SIZE;

/// Endereço físico do trampoline (vetor de STARTUP 0x08).
pub const TRAMPOLINE_ADDRESS: u64 = 0x8000;
pub const STARTUP_VECTOR: u8 = (TRAMPOLINE_ADDRESS >> 12) as u8;

pub const BOOT_INFO_OFFSET: usize = 0xF00;
pub const GDTR_OFFSET: usize = 0xF60;
pub const IDTR_OFFSET: usize = 0xF70;
pub const ARRAYS_OFFSET: usize = 0x1000;

/// "APBI" em little endian.
pub const BOOT_INFO_MAGIC: u32 = u32::from_le_bytes(*b"APBI");
pub const BOOT_INFO_VERSION: u32 = 1;

/// Parâmetros compartilhados lidos pelo trampoline.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApBootInfo {
    pub magic: u32,
    pub version: u32,
    /// Incrementado atomicamente por cada AP para obter seu índice
    pub ap_cpu_counter: u32,
    pub ap_count: u32,
    pub cr0: u64,
    pub cr3: u64,
    pub cr4: u64,
    /// Endereço do pseudo-descritor GDTR
    pub gdtr: u64,
    /// Endereço do pseudo-descritor IDTR
    pub idtr: u64,
    pub kernel_map_base: u64,
    pub kernel_entry: u64,
    pub stacks_array: u64,
    pub descriptors_array: u64,
}

const _: () = assert!(BOOT_INFO_OFFSET + ::core::mem::size_of::<ApBootInfo>() <= GDTR_OFFSET);
const _: () = assert!(IDTR_OFFSET + 10 <= ARRAYS_OFFSET);

/// Endereço absoluto (identity) de um campo do `ApBootInfo`.
pub const fn field_address(offset: usize) -> u64 {
    TRAMPOLINE_ADDRESS + (BOOT_INFO_OFFSET + offset) as u64
}

/// Tamanho da região para `ap_count` APs, arredondado para páginas.
pub fn region_size(ap_count: usize) -> usize {
    crate::klib::align_up(ARRAYS_OFFSET + 2 * 8 * ap_count.max(1), PAGE_SIZE)
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
::core::arch::global_asm!(
    ".pushsection .rodata.ap_trampoline, \"a\"",
    ".global ap_trampoline_start",
    ".global ap_trampoline_end",
    ".code16",
    "ap_trampoline_start:",
    "    cli",
    "    cld",
    "    xor ax, ax",
    "    mov ds, ax",
    "    mov es, ax",
    "    mov ss, ax",
    "    lgdt [{base} + (2f - ap_trampoline_start)]",
    "    mov eax, cr0",
    "    or eax, 1",
    "    mov cr0, eax",
    // jmp far 0x08:3f (32 bits)
    "    .byte 0x66, 0xEA",
    "    .long {base} + (3f - ap_trampoline_start)",
    "    .word 0x08",
    ".code32",
    "3:",
    "    mov ax, 0x10",
    "    mov ds, ax",
    "    mov es, ax",
    "    mov ss, ax",
    // PAE
    "    mov eax, cr4",
    "    or eax, 0x20",
    "    mov cr4, eax",
    // CR3 do BSP (page tables abaixo de 4 GiB)
    "    mov eax, dword ptr [{cr3}]",
    "    mov cr3, eax",
    // EFER.LME | EFER.NXE
    "    mov ecx, 0xC0000080",
    "    rdmsr",
    "    or eax, 0x900",
    "    wrmsr",
    "    mov eax, cr0",
    "    or eax, 0x80000001",
    "    mov cr0, eax",
    // jmp far 0x18:4f (64 bits)
    "    .byte 0xEA",
    "    .long {base} + (4f - ap_trampoline_start)",
    "    .word 0x18",
    ".code64",
    "4:",
    "    xor eax, eax",
    "    mov ds, ax",
    "    mov es, ax",
    "    mov ss, ax",
    "    mov fs, ax",
    "    mov gs, ax",
    "    mov rax, qword ptr [{cr4}]",
    "    mov cr4, rax",
    "    mov rax, qword ptr [{cr0}]",
    "    mov cr0, rax",
    // Índice do AP; além de ap_count não há stack nem descritor
    "    mov eax, 1",
    "    lock xadd dword ptr [{counter}], eax",
    "    cmp eax, dword ptr [{ap_count}]",
    "    jae 5f",
    "    mov ebx, eax",
    "    mov rsi, qword ptr [{stacks}]",
    "    mov rsp, qword ptr [rsi + rbx * 8]",
    "    mov rax, qword ptr [{gdtr}]",
    "    lgdt [rax]",
    "    mov rax, qword ptr [{idtr}]",
    "    lidt [rax]",
    "    mov rsi, qword ptr [{descriptors}]",
    "    mov rdi, qword ptr [rsi + rbx * 8]",
    "    lea esi, [rbx + 1]",
    "    mov rax, qword ptr [{entry}]",
    "    xor ebp, ebp",
    "    call rax",
    "5:",
    "    cli",
    "    hlt",
    "    jmp 5b",
    ".align 8",
    "1:",
    "    .quad 0",
    "    .quad 0x00CF9A000000FFFF",
    "    .quad 0x00CF92000000FFFF",
    "    .quad 0x00AF9A000000FFFF",
    "2:",
    "    .word 2b - 1b - 1",
    "    .long {base} + (1b - ap_trampoline_start)",
    "ap_trampoline_end:",
    ".code64",
    ".popsection",
    base = const TRAMPOLINE_ADDRESS,
    cr0 = const field_address(offset_of!(ApBootInfo, cr0)),
    cr3 = const field_address(offset_of!(ApBootInfo, cr3)),
    cr4 = const field_address(offset_of!(ApBootInfo, cr4)),
    counter = const field_address(offset_of!(ApBootInfo, ap_cpu_counter)),
    ap_count = const field_address(offset_of!(ApBootInfo, ap_count)),
    stacks = const field_address(offset_of!(ApBootInfo, stacks_array)),
    descriptors = const field_address(offset_of!(ApBootInfo, descriptors_array)),
    gdtr = const field_address(offset_of!(ApBootInfo, gdtr)),
    idtr = const field_address(offset_of!(ApBootInfo, idtr)),
    entry = const field_address(offset_of!(ApBootInfo, kernel_entry)),
);

/// Código do trampoline a ser copiado para `TRAMPOLINE_ADDRESS`.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn code() -> &'static [u8] {
    extern "C" {
        static ap_trampoline_start: u8;
        static ap_trampoline_end: u8;
    }
    // SAFETY: símbolos delimitam o blob em .rodata definido acima.
    unsafe {
        let start = ::core::ptr::addr_of!(ap_trampoline_start);
        let end = ::core::ptr::addr_of!(ap_trampoline_end);
        ::core::slice::from_raw_parts(start, end.offset_from(start) as usize)
    }
}

/// Fora de bare metal: apenas `hlt; jmp $-1`.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn code() -> &'static [u8] {
    &[0xF4, 0xEB, 0xFD]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_info_layout() {
        assert_eq!(offset_of!(ApBootInfo, magic), 0);
        assert_eq!(offset_of!(ApBootInfo, ap_cpu_counter), 8);
        // Lido pelo trampoline para descartar índices fora da tabela
        assert_eq!(offset_of!(ApBootInfo, ap_count), 12);
        assert_eq!(field_address(offset_of!(ApBootInfo, ap_count)), 0x8F0C);
        assert_eq!(offset_of!(ApBootInfo, cr0), 16);
        assert_eq!(offset_of!(ApBootInfo, cr3), 24);
        assert_eq!(offset_of!(ApBootInfo, gdtr), 40);
        assert_eq!(offset_of!(ApBootInfo, kernel_entry), 64);
        assert_eq!(offset_of!(ApBootInfo, descriptors_array), 80);
        assert_eq!(::core::mem::size_of::<ApBootInfo>(), 88);
        assert_eq!(field_address(offset_of!(ApBootInfo, cr3)), 0x8F18);
    }

    #[test]
    fn test_startup_vector_and_region_size() {
        assert_eq!(STARTUP_VECTOR, 0x08);
        assert_eq!(region_size(3), 2 * PAGE_SIZE);
        assert_eq!(region_size(0), 2 * PAGE_SIZE);
        // 300 APs: 0x1000 + 4800 bytes
        assert_eq!(region_size(300), 3 * PAGE_SIZE);
        assert!(code().len() <= BOOT_INFO_OFFSET);
    }
}
