mod error;

#[doc(hidden)]
/// This is a hidden module to make the macros defined on this crate available for the users.
pub mod __dependencies {
    pub use digest;
    pub use hex;
    pub use paste;
    pub use proptest;
    pub use sha2;
    pub use test_strategy;
    pub use thiserror::Error;
}

#[macro_export]
macro_rules! impl_associate_bytes_types {
    ($type:ty) => {
        impl std::hash::Hash for $type {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                std::hash::Hash::hash(&$crate::prelude::ToBytes::to_bytes(self), state);
            }
        }

        impl $crate::prelude::FromHex for $type {
            fn from_hex(input: &str) -> $crate::prelude::Result<Self> {
                let bytes = $crate::__dependencies::hex::decode(input)?;
                <Self as $crate::prelude::FromBytes>::from_bytes(&bytes)
            }
        }

        impl $crate::prelude::ToHex for $type {
            fn to_hex(&self) -> String {
                $crate::__dependencies::hex::encode(&$crate::prelude::ToBytes::to_bytes(self))
            }
        }
    };
}

#[macro_export]
macro_rules! test_to_bytes {
    ($type:ty) => {
        $crate::__dependencies::paste::paste! {
            mod [<test_to_bytes_$type:snake>] {
                use std::{ collections::hash_map::DefaultHasher, hash::Hasher };

                use $crate::__dependencies::{
                    proptest::prelude::*,
                    sha2::Sha256,
                    test_strategy,
                };

                use $crate::prelude::*;
                use super::$type;

                test_to_hex!($type);

                #[test]
                fn test_default_is_zero() {
                    assert!(<$type>::default().is_zero());
                }

                #[test_strategy::proptest(fork = false)]
                fn test_is_zero_is_same_as_zero_bytes(item: $type) {
                    prop_assert_eq!(
                        item.is_zero(),
                        item.to_bytes() == <$type>::default().to_bytes()
                    );
                }

                #[test_strategy::proptest(fork = false)]
                fn test_roundtrip(a: $type) {
                    prop_assert_eq!(a.clone(), <$type>::from_bytes(&a.to_bytes())?);
                }

                #[test_strategy::proptest(fork = false)]
                fn test_output_consistency(a: $type) {
                    prop_assert_eq!(a.to_bytes(), <$type>::from_bytes(&a.to_bytes())?.to_bytes());
                }

                #[test_strategy::proptest(fork = false)]
                fn test_is_different_on_different_objects(a: $type, b: $type) {
                    prop_assert_eq!(a == b, a.to_bytes() == b.to_bytes());
                }

                #[test_strategy::proptest(fork = false)]
                fn test_hash_consistency(a: $type, b: $type) {
                    prop_assert_eq!(
                        a == b,
                        a.hash_bytes::<Sha256>() == b.hash_bytes::<Sha256>()
                    );
                }

                #[test_strategy::proptest(fork = false)]
                fn test_std_hash_consistency(a: $type, b: $type) {
                    let mut hasher_a = DefaultHasher::new();
                    hasher_a.write(&a.to_bytes());

                    let mut hasher_b = DefaultHasher::new();
                    hasher_b.write(&b.to_bytes());

                    prop_assert_eq!(
                        a.hash_bytes::<Sha256>() == b.hash_bytes::<Sha256>(),
                        hasher_a.finish() == hasher_b.finish()
                    );
                }
            }
        }
    };
}

#[macro_export]
macro_rules! test_to_hex {
    ($type:ty) => {
        $crate::__dependencies::paste::paste! {
            mod [<test_to_hex_$type:snake>] {
                use $crate::__dependencies::{
                    proptest::prelude::*,
                    test_strategy,
                };

                use $crate::prelude::*;
                use super::$type;

                #[test_strategy::proptest(fork = false)]
                fn test_roundtrip(a: $type) {
                    prop_assert_eq!(a.clone(), <$type>::from_hex(&a.to_hex())?);
                }

                #[test_strategy::proptest(fork = false)]
                fn test_output_consistency(a: $type) {
                    prop_assert_eq!(a.to_hex(), <$type>::from_hex(&a.to_hex())?.to_hex());
                }

                #[test_strategy::proptest(fork = false)]
                fn test_is_different_on_different_objects(a: $type, b: $type) {
                    prop_assert_eq!(a == b, a.to_hex() == b.to_hex());
                }
            }
        }
    };
}

#[macro_export]
macro_rules! prop_assert_changes {
    ($action: expr, $value: expr) => {
        let old_value = $value.clone();

        prop_assert_eq!($value, old_value);

        $action;

        prop_assert_ne!($value, old_value);
    };
}

#[macro_export]
macro_rules! prop_assert_does_not_change {
    ($action: expr, $value: expr) => {
        let old_value = $value.clone();

        $action;

        prop_assert_eq!($value, old_value);
    };
}

pub mod hash;
pub mod key;
pub mod node;
pub mod prelude;
pub mod storage;
pub mod testing;
pub mod tree;
