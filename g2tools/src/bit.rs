//! Bit-field tools for working with hardware record words

use std::ops::{BitAndAssign, BitOrAssign, BitXorAssign};
use num_traits::{FromPrimitive, PrimInt, Unsigned};

/// Bitwise set/clear/toggle/check/change and field extraction for u8 and u32
pub trait BitOps:
    PrimInt
    + BitAndAssign
    + BitOrAssign
    + BitXorAssign
    + FromPrimitive
    + Unsigned
{
    fn set(&mut self, b: usize);
    fn clear(&mut self, b: usize);
    fn toggle(&mut self, b: usize);
    fn change(&mut self, b: usize, x: bool);
    fn check(self, b: usize) -> bool;
    /// Extract `width` bits starting at bit `lo`
    fn field(self, lo: usize, width: usize) -> Self;
    /// Overwrite `width` bits starting at bit `lo`; excess bits of `x` are dropped
    fn put_field(&mut self, lo: usize, width: usize, x: Self);
}

/// All-ones mask of the lowest `width` bits, saturating at the type width
#[inline]
fn low_mask<T: PrimInt>(width: usize) -> T {
    let bits = T::zero().count_zeros() as usize;
    if width >= bits {
        !T::zero()
    } else {
        (T::one() << width) - T::one()
    }
}

impl BitOps for u8 {
    #[inline]
    fn set(&mut self, b: usize) {
        *self |= 1 << b;
    }

    #[inline]
    fn clear(&mut self, b: usize) {
        *self &= !(1 << b);
    }

    #[inline]
    fn toggle(&mut self, b: usize) {
        *self ^= 1 << b;
    }

    #[inline]
    fn change(&mut self, b: usize, x: bool) {
        *self = (*self & !(1 << b)) | ((x as u8) << b);
    }

    #[inline]
    fn check(self, b: usize) -> bool {
        return self >> b & 1 == 1;
    }

    #[inline]
    fn field(self, lo: usize, width: usize) -> Self {
        return (self >> lo) & low_mask::<u8>(width);
    }

    #[inline]
    fn put_field(&mut self, lo: usize, width: usize, x: Self) {
        let m = low_mask::<u8>(width);
        *self = (*self & !(m << lo)) | ((x & m) << lo);
    }
}

impl BitOps for u32 {
    #[inline]
    fn set(&mut self, b: usize) {
        *self |= 1 << b;
    }

    #[inline]
    fn clear(&mut self, b: usize) {
        *self &= !(1 << b);
    }

    #[inline]
    fn toggle(&mut self, b: usize) {
        *self ^= 1 << b;
    }

    #[inline]
    fn change(&mut self, b: usize, x: bool) {
        *self = (*self & !(1 << b)) | ((x as u32) << b);
    }

    #[inline]
    fn check(self, b: usize) -> bool {
        return self >> b & 1 == 1;
    }

    #[inline]
    fn field(self, lo: usize, width: usize) -> Self {
        return (self >> lo) & low_mask::<u32>(width);
    }

    #[inline]
    fn put_field(&mut self, lo: usize, width: usize, x: Self) {
        let m = low_mask::<u32>(width);
        *self = (*self & !(m << lo)) | ((x & m) << lo);
    }
}

/// Read a little-endian unsigned integer from up to four bytes of `buf`
/// starting at `lo`. Bytes past the end of `buf` read as zero.
pub fn le_uint(buf: &[u8], lo: usize, len: usize) -> u32 {
    let mut x = 0u32;
    for i in 0..len.min(4) {
        if let Some(&byte) = buf.get(lo + i) {
            x |= (byte as u32) << (8 * i);
        }
    }
    return x;
}

/// Write the low `len` bytes of `x` little-endian into `buf` starting at `lo`.
/// Bytes past the end of `buf` are skipped.
pub fn put_le_uint(buf: &mut [u8], lo: usize, len: usize, x: u32) {
    for i in 0..len.min(4) {
        if let Some(byte) = buf.get_mut(lo + i) {
            *byte = (x >> (8 * i)) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_ops() {
        // Exhaustively check all u8's
        for i in u8::MIN..=u8::MAX {
            for b in 0..8 {
                let mut x = i;
                let i_set = i | 1 << b;
                let i_clr = i & !(1 << b);

                assert_eq!(i.check(b), i >> b & 1 == 1);
                x.set(b);
                assert_eq!(x, i_set);
                x.clear(b);
                assert_eq!(x, i_clr);
                x.toggle(b);
                assert_eq!(x, i_set);
                x.toggle(b);
                assert_eq!(x, i_clr);
                x.change(b, true);
                assert_eq!(x, i_set);
            }
        }
        // Check some interesting u32's
        for &i in [u32::MIN, 1u32, 1337u32, u32::MAX].iter() {
            for b in 0..32 {
                let mut x = i;
                let i_set = i | 1 << b;
                let i_clr = i & !(1 << b);

                assert_eq!(i.check(b), i >> b & 1 == 1);
                x.set(b);
                assert_eq!(x, i_set);
                x.clear(b);
                assert_eq!(x, i_clr);
            }
        }
    }

    #[test]
    fn fields() {
        let w: u32 = 0b1_0000000_0111111 | (1 << 31);
        assert_eq!(w.field(0, 6), 0b111111);
        assert_eq!(w.field(0, 5), 0b11111);
        assert_eq!(w.field(6, 1), 0);
        assert_eq!(w.field(7, 25), (1 << 24) | (1 << 7));
        assert_eq!(u32::MAX.field(0, 32), u32::MAX);
        assert_eq!(u32::MAX.field(7, 32), u32::MAX >> 7);

        let mut x = 0u32;
        x.put_field(7, 25, u32::MAX);
        assert_eq!(x, u32::MAX << 7);
        x.put_field(0, 6, 0b101);
        assert_eq!(x.field(0, 6), 0b101);
        assert_eq!(x.field(7, 25), u32::MAX >> 7);

        let mut f = 0u8;
        f.put_field(3, 2, 0b11);
        assert_eq!(f, 0b11000);
    }

    #[test]
    fn little_endian_spans() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(le_uint(&buf, 0, 2), 0x0201);
        assert_eq!(le_uint(&buf, 1, 3), 0x040302);
        assert_eq!(le_uint(&buf, 1, 4), 0x05040302);
        // Short reads are zero-extended
        assert_eq!(le_uint(&buf, 3, 4), 0x0504);
        assert_eq!(le_uint(&buf, 9, 2), 0);

        let mut out = [0u8; 4];
        put_le_uint(&mut out, 1, 3, 0x00abcdef);
        assert_eq!(out, [0, 0xef, 0xcd, 0xab]);
        put_le_uint(&mut out, 3, 2, 0xffff);
        assert_eq!(out, [0, 0xef, 0xcd, 0xff]);
    }
}
