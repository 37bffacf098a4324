//! Function pointer types that can be detoured

use crate::core::types::Address;

mod sealed {
    pub trait Sealed {}
}

/// A function pointer type usable as a detour target and replacement.
///
/// Implemented for `extern "C"` and `extern "system"` function pointers (plus
/// `extern "fastcall"` and `extern "thiscall"` on x86) of up to six
/// arguments, safe and `unsafe`. Target and replacement share one type, so a
/// signature mismatch fails to compile.
pub trait Function: Copy + Send + Sync + sealed::Sealed + 'static {
    /// Argument list as a tuple
    type Arguments;
    /// Return type
    type Output;

    /// Reinterprets a code address as this function type.
    ///
    /// # Safety
    /// `address` must hold code with exactly this signature and ABI.
    unsafe fn from_address(address: Address) -> Self;

    /// Entry point address
    fn to_address(&self) -> Address;

    /// Calls the function with a tuple of arguments.
    ///
    /// # Safety
    /// Any contract of the underlying function applies.
    unsafe fn call(&self, arguments: Self::Arguments) -> Self::Output;
}

macro_rules! impl_function {
    (@impl [$($prefix:tt)*] ($($name:ident: $ty:ident),*)) => {
        impl<Ret: 'static, $($ty: 'static),*> sealed::Sealed for $($prefix)* fn($($ty),*) -> Ret {}

        impl<Ret: 'static, $($ty: 'static),*> Function for $($prefix)* fn($($ty),*) -> Ret {
            type Arguments = ($($ty,)*);
            type Output = Ret;

            unsafe fn from_address(address: Address) -> Self {
                std::mem::transmute::<*const (), Self>(address.as_ptr::<()>())
            }

            fn to_address(&self) -> Address {
                Address::from_ptr(*self as *const ())
            }

            #[allow(clippy::unused_unit)]
            unsafe fn call(&self, ($($name,)*): Self::Arguments) -> Ret {
                (*self)($($name),*)
            }
        }
    };

    ($($name:ident: $ty:ident),*) => {
        impl_function!(@impl [extern "C"] ($($name: $ty),*));
        impl_function!(@impl [unsafe extern "C"] ($($name: $ty),*));
        impl_function!(@impl [extern "system"] ($($name: $ty),*));
        impl_function!(@impl [unsafe extern "system"] ($($name: $ty),*));

        #[cfg(target_arch = "x86")]
        impl_function!(@impl [extern "fastcall"] ($($name: $ty),*));
        #[cfg(target_arch = "x86")]
        impl_function!(@impl [unsafe extern "fastcall"] ($($name: $ty),*));
        #[cfg(target_arch = "x86")]
        impl_function!(@impl [extern "thiscall"] ($($name: $ty),*));
        #[cfg(target_arch = "x86")]
        impl_function!(@impl [unsafe extern "thiscall"] ($($name: $ty),*));
    };
}

impl_function!();
impl_function!(a0: A0);
impl_function!(a0: A0, a1: A1);
impl_function!(a0: A0, a1: A1, a2: A2);
impl_function!(a0: A0, a1: A1, a2: A2, a3: A3);
impl_function!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4);
impl_function!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5);

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    extern "system" fn answer() -> u32 {
        42
    }

    #[test]
    fn test_call_through_tuple() {
        let f: extern "C" fn(i32, i32) -> i32 = add;
        assert_eq!(unsafe { f.call((2, 3)) }, 5);

        let g: extern "system" fn() -> u32 = answer;
        assert_eq!(unsafe { g.call(()) }, 42);
    }

    #[test]
    fn test_address_round_trip() {
        let f: extern "C" fn(i32, i32) -> i32 = add;
        let address = f.to_address();
        assert!(!address.is_null());

        let back = unsafe { <extern "C" fn(i32, i32) -> i32 as Function>::from_address(address) };
        assert_eq!(unsafe { back.call((10, -4)) }, 6);
    }
}
