//! Acesso a campos de bits em registradores.
//!
//! Substitui uniões de bit-fields por operações nomeadas de get/set
//! sobre o valor bruto. O layout de bits fica explícito em cada chamada.

/// Máscara com `width` bits menos significativos ligados.
#[inline]
pub const fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Lê o campo `[shift, shift + width)` de `value`.
#[inline]
pub const fn get_field(value: u64, shift: u32, width: u32) -> u64 {
    (value >> shift) & mask(width)
}

/// Retorna `value` com o campo `[shift, shift + width)` substituído por `field`.
///
/// Bits de `field` acima de `width` são descartados.
#[inline]
pub const fn set_field(value: u64, shift: u32, width: u32, field: u64) -> u64 {
    let m = mask(width) << shift;
    (value & !m) | ((field << shift) & m)
}

/// Converte um byte BCD (ex: 0x59) para binário (59).
#[inline]
pub const fn bcd_to_binary(value: u8) -> u8 {
    (value & 0x0F) + ((value >> 4) * 10)
}
