/// Fixed-width unsigned value type storable in a bit-transposed vector.
///
/// The engine only needs a handful of primitive moves: the declared bit
/// width, lossless round-tripping through `u64`, and wrapping addition for
/// the increment paths.
pub trait CodeValue:
    Copy + Default + PartialEq + Eq + PartialOrd + Ord + std::fmt::Debug + 'static
{
    const BITS: u32;

    fn to_u64(self) -> u64;

    /// Truncating conversion; callers only pass values produced by
    /// `to_u64` masked to `BITS`.
    fn from_u64(v: u64) -> Self;

    fn wrapping_add(self, rhs: Self) -> Self;
}

macro_rules! impl_code_value {
    ($($t:ty),*) => {
        $(impl CodeValue for $t {
            const BITS: u32 = <$t>::BITS;

            #[inline]
            fn to_u64(self) -> u64 {
                self as u64
            }

            #[inline]
            fn from_u64(v: u64) -> Self {
                v as $t
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }
        })*
    };
}

impl_code_value!(u8, u16, u32, u64);
