//! Small bit-flag newtypes shared by terms, queries and instructions.

/// Declares a `Copy` bit-flag newtype with named constants and set operators.
macro_rules! bit_flags {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($repr:ty) {
            $(
                $(#[$flag_meta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name($repr);

        impl $name {
            $(
                $(#[$flag_meta])*
                pub const $flag: $name = $name($value);
            )*

            /// No flags set.
            pub const EMPTY: $name = $name(0);

            const NAMED: &'static [(&'static str, $name)] = &[
                $((stringify!($flag), $name($value)),)*
            ];

            /// Returns the raw bits.
            #[must_use]
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Creates flags from raw bits.
            #[must_use]
            pub const fn from_bits(bits: $repr) -> Self {
                Self(bits)
            }

            /// Returns true if every flag in `other` is set.
            #[must_use]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns true if any flag in `other` is set.
            #[must_use]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Returns true if no flag is set.
            #[must_use]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Sets the flags in `other`.
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Clears the flags in `other`.
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Sets or clears the flags in `other`.
            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = $name;

            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }

        impl std::ops::Not for $name {
            type Output = $name;

            fn not(self) -> $name {
                $name(!self.0)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                let mut first = true;
                for (name, flag) in Self::NAMED {
                    if self.contains(*flag) && !flag.is_empty() {
                        if !first {
                            write!(f, " | ")?;
                        }
                        write!(f, "{name}")?;
                        first = false;
                    }
                }
                write!(f, ")")
            }
        }
    };
}

pub(crate) use bit_flags;
