// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Internal declarative macros shared across the crate.

/// Declares a plain bit-set type with named constant flags.
///
/// The generated type stores its flags in a private `bits` field and supports
/// `|`, `&`, `contains`, `intersects` and a readable `Debug` output.
#[macro_export]
macro_rules! cadenza_bitflags {
    (
        $(#[$outer:meta])*
        $vis:vis struct $name:ident: $t:ty {
            $(
                $(#[$inner:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $t,
        }

        impl $name {
            $(
                $(#[$inner])*
                pub const $flag: Self = Self { bits: $value };
            )*

            /// Returns a set with no flags.
            pub const fn empty() -> Self {
                Self { bits: 0 }
            }

            /// Returns the raw bit representation.
            pub const fn bits(&self) -> $t {
                self.bits
            }

            /// Builds a set from raw bits, dropping bits that name no flag.
            pub const fn from_bits_truncate(bits: $t) -> Self {
                Self {
                    bits: bits & (0 $(| $value)*),
                }
            }

            /// Returns `true` if every flag in `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                self.bits & other.bits == other.bits
            }

            /// Returns `true` if `self` and `other` share at least one flag.
            pub const fn intersects(&self, other: Self) -> bool {
                self.bits & other.bits != 0
            }

            /// Returns `true` if no flag is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self { bits: self.bits | rhs.bits }
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.bits |= rhs.bits;
            }
        }

        impl ::std::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, rhs: Self) -> Self {
                Self { bits: self.bits & rhs.bits }
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                let mut first = true;
                $(
                    if self.contains(Self::$flag) && Self::$flag.bits != 0 {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        first = false;
                        f.write_str(stringify!($flag))?;
                    }
                )*
                if first {
                    f.write_str("empty")?;
                }
                f.write_str(")")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    cadenza_bitflags! {
        struct TestFlags: u32 {
            const A = 1 << 0;
            const B = 1 << 1;
        }
    }

    #[test]
    fn test_bitflags_combination_and_debug() {
        let flags = TestFlags::A | TestFlags::B;
        assert!(flags.contains(TestFlags::A));
        assert!(flags.intersects(TestFlags::B));
        assert!(!TestFlags::A.contains(flags));
        assert_eq!(format!("{flags:?}"), "TestFlags(A | B)");
        assert_eq!(format!("{:?}", TestFlags::empty()), "TestFlags(empty)");
        assert_eq!(TestFlags::from_bits_truncate(0xFF).bits(), 0b11);
    }
}
