/// Lossless conversions between a newtype and the primitive it wraps.
#[macro_export]
macro_rules! newtype_from {
    ($($wrapper:ident => $primitive:ty),+ $(,)?) => {
        $(
            impl From<$primitive> for $wrapper {
                #[inline]
                fn from(value: $primitive) -> Self {
                    Self(value)
                }
            }

            impl From<$wrapper> for $primitive {
                #[inline]
                fn from(wrapper: $wrapper) -> Self {
                    wrapper.0
                }
            }
        )+
    };
}

/// Arithmetic for float newtypes: `+`/`-` against `Self` and the raw `f64`, negation and
/// the `abs`/`max`/`min` helpers candle math needs.
#[macro_export]
macro_rules! float_newtype_ops {
    (@bin $wrapper:ident, $tr:ident, $method:ident, $op:tt) => {
        impl std::ops::$tr for $wrapper {
            type Output = Self;

            #[inline]
            fn $method(self, rhs: Self) -> Self {
                Self(self.0 $op rhs.0)
            }
        }

        impl std::ops::$tr<f64> for $wrapper {
            type Output = Self;

            #[inline]
            fn $method(self, rhs: f64) -> Self {
                Self(self.0 $op rhs)
            }
        }
    };
    ($($wrapper:ident),+ $(,)?) => {
        $(
            $crate::float_newtype_ops!(@bin $wrapper, Add, add, +);
            $crate::float_newtype_ops!(@bin $wrapper, Sub, sub, -);

            impl std::ops::Neg for $wrapper {
                type Output = Self;

                #[inline]
                fn neg(self) -> Self {
                    Self(-self.0)
                }
            }

            impl $wrapper {
                pub fn abs(self) -> Self {
                    Self(self.0.abs())
                }

                pub fn max(self, other: Self) -> Self {
                    Self(self.0.max(other.0))
                }

                pub fn min(self, other: Self) -> Self {
                    Self(self.0.min(other.0))
                }
            }
        )+
    };
}
