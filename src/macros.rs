//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! On-page headers are `#[repr(C)]` zerocopy structs whose multi-byte
//! fields are little-endian wrappers. The macro generates a native-typed
//! getter and a `set_` method per field so callers never touch the
//! wrappers.
//!
//! ```ignore
//! use zerocopy::little_endian::{U16, U64};
//!
//! #[repr(C)]
//! struct PageHeader {
//!     lower: U16,
//!     dictionary_id: U64,
//! }
//!
//! impl PageHeader {
//!     zerocopy_accessors! {
//!         lower: u16,
//!         dictionary_id: u64,
//!     }
//! }
//!
//! // pub fn lower(&self) -> u16
//! // pub fn set_lower(&mut self, val: u16)
//! // pub fn dictionary_id(&self) -> u64
//! // pub fn set_dictionary_id(&mut self, val: u64)
//! ```

#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, $native:ty, $wrapper:ident) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> $native {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: $native) {
                self.$field = ::zerocopy::little_endian::$wrapper::new(val);
            }
        }
    };
    (@field $field:ident, u16) => {
        $crate::zerocopy_accessors!(@impl $field, u16, U16);
    };
    (@field $field:ident, u32) => {
        $crate::zerocopy_accessors!(@impl $field, u32, U32);
    };
    (@field $field:ident, u64) => {
        $crate::zerocopy_accessors!(@impl $field, u64, U64);
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@field $field, $ty);
        )*
    };
}
