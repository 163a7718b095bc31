//! Kernel Library (KLib).
//!
//! Utilitários agnósticos de hardware para uso interno.
//! Funciona como uma extensão da `core` library.

pub mod bits;
pub mod mmio;
#[cfg(any(test, feature = "self_test"))]
pub mod test_framework;

/// Alinha um endereço para cima.
///
/// # Exemplo
/// `align_up(10, 4) -> 12`
#[inline]
pub const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// Verifica se um endereço está alinhado.
#[inline]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    (addr & (align - 1)) == 0
}
