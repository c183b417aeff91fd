//! Key bounds and extraction-order comparators.

/// Types usable as ordering keys.
///
/// Keys are restricted to the primitive integers and floats: the front
/// sentinel of a [`SortedList`](crate::SortedList) stores a placeholder key,
/// built from [`Key::MIN`], and keys are copied freely between threads.
pub trait Key: Copy + PartialEq + PartialOrd {
    /// The least value of the key type, used as the sentinel placeholder.
    const MIN: Self;
}

macro_rules! impl_key {
    ($($t:ty => $min:expr,)*) => {
        $(
            impl Key for $t {
                const MIN: Self = $min;
            }
        )*
    };
}

impl_key! {
    u8 => u8::MIN,
    u16 => u16::MIN,
    u32 => u32::MIN,
    u64 => u64::MIN,
    u128 => u128::MIN,
    usize => usize::MIN,
    i8 => i8::MIN,
    i16 => i16::MIN,
    i32 => i32::MIN,
    i64 => i64::MIN,
    i128 => i128::MIN,
    isize => isize::MIN,
    f32 => f32::NEG_INFINITY,
    f64 => f64::NEG_INFINITY,
}

/// A strict less-than ordering over keys.
///
/// `less(a, b)` must be a pure strict weak order: no side effects, no
/// interior mutation, and never `less(a, a)`. The containers extract the
/// least element under this order first.
pub trait Compare<K> {
    /// Returns `true` if `a` orders strictly before `b`.
    fn less(&self, a: &K, b: &K) -> bool;
}

/// The natural ascending order: the smallest key is extracted first.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinFirst;

impl<K: PartialOrd> Compare<K> for MinFirst {
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        a < b
    }
}

/// The reversed order: the largest key is extracted first.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaxFirst;

impl<K: PartialOrd> Compare<K> for MaxFirst {
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        b < a
    }
}
