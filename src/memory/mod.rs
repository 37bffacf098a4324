//! Typed memory access over one address space
//!
//! [`MemoryAccess`] needs only raw byte transfer, allocation and protection
//! from an implementation. Every typed, array and string operation is built
//! on top of those and behaves the same for [`LocalMemory`] and
//! [`RemoteMemory`].

pub mod local;
pub mod protection;
pub mod remote;

pub use local::LocalMemory;
pub use protection::Protection;
pub use remote::RemoteMemory;

use crate::core::types::{
    Address, ArrayElement, MemoryError, MemoryResult, Primitive, PrimitiveTag, PrimitiveValue,
    StringEncoding,
};
use std::mem::size_of;

/// Bytes consumed by a string read when no bound is configured
pub const DEFAULT_MAX_STRING_BYTES: usize = 1024;

/// Typed read/write access to one address space
pub trait MemoryAccess: Send + Sync {
    /// Fills `buffer` from `address`; a short transfer is an error
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<()>;

    /// Writes all of `data` at `address`; a short transfer is an error
    fn write_bytes(&self, address: Address, data: &[u8]) -> MemoryResult<()>;

    fn allocate(
        &self,
        hint: Option<Address>,
        size: usize,
        protection: Protection,
    ) -> MemoryResult<Address>;

    fn free(&self, address: Address) -> MemoryResult<()>;

    /// Changes page protection and returns the previous protection
    fn protect(&self, address: Address, size: usize, protection: Protection)
        -> MemoryResult<Protection>;

    /// Makes freshly written code visible to the processor
    fn flush_instruction_cache(&self, _address: Address, _size: usize) -> MemoryResult<()> {
        Ok(())
    }

    /// Bound used by [`MemoryAccess::read_string_default`]
    fn max_string_bytes(&self) -> usize {
        DEFAULT_MAX_STRING_BYTES
    }

    /// Reads `len` bytes into a fresh buffer
    fn read_vec(&self, address: Address, len: usize) -> MemoryResult<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.read_bytes(address, &mut buffer)?;
        Ok(buffer)
    }

    fn read<T: Primitive>(&self, address: Address) -> MemoryResult<T>
    where
        Self: Sized,
    {
        let buffer = self.read_vec(address, T::SIZE)?;
        T::from_bytes(&buffer)
    }

    fn write<T: Primitive>(&self, address: Address, value: T) -> MemoryResult<()>
    where
        Self: Sized,
    {
        self.write_bytes(address, &value.to_bytes())
    }

    fn read_value(&self, address: Address, tag: PrimitiveTag) -> MemoryResult<PrimitiveValue> {
        let buffer = self.read_vec(address, tag.size())?;
        PrimitiveValue::from_bytes(tag, &buffer)
    }

    fn write_value(&self, address: Address, value: &PrimitiveValue) -> MemoryResult<()> {
        self.write_bytes(address, &value.to_bytes())
    }

    /// Copies a structure out of memory byte for byte. Pointer fields are
    /// not followed.
    ///
    /// # Safety
    /// Every bit pattern the memory may hold must be a valid `T`.
    unsafe fn read_struct<T: Copy>(&self, address: Address) -> MemoryResult<T>
    where
        Self: Sized,
    {
        let buffer = self.read_vec(address, size_of::<T>())?;
        Ok(std::ptr::read_unaligned(buffer.as_ptr() as *const T))
    }

    /// Copies a structure into memory byte for byte. Pointer fields are
    /// written as they are.
    ///
    /// # Safety
    /// `T` must have no padding bytes.
    unsafe fn write_struct<T: Copy>(&self, address: Address, value: &T) -> MemoryResult<()>
    where
        Self: Sized,
    {
        let bytes = std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>());
        self.write_bytes(address, bytes)
    }

    /// Reads `count` contiguous elements in one transfer
    fn read_array<T: ArrayElement>(&self, address: Address, count: usize) -> MemoryResult<Vec<T>>
    where
        Self: Sized,
    {
        let buffer = self.read_vec(address, array_span(address, count, T::SIZE)?)?;
        Ok(buffer.chunks_exact(T::SIZE).map(T::decode_exact).collect())
    }

    /// Writes `values` contiguously in one transfer
    fn write_array<T: ArrayElement>(&self, address: Address, values: &[T]) -> MemoryResult<()>
    where
        Self: Sized,
    {
        let mut bytes = vec![0u8; array_span(address, values.len(), T::SIZE)?];
        for (value, out) in values.iter().zip(bytes.chunks_exact_mut(T::SIZE)) {
            value.encode_into(out);
        }
        self.write_bytes(address, &bytes)
    }

    /// Reads `count` elements of a runtime tag
    fn read_array_values(
        &self,
        address: Address,
        tag: PrimitiveTag,
        count: usize,
    ) -> MemoryResult<Vec<PrimitiveValue>> {
        ensure_bulk_copy(tag)?;
        let buffer = self.read_vec(address, array_span(address, count, tag.size())?)?;
        buffer
            .chunks_exact(tag.size())
            .map(|chunk| PrimitiveValue::from_bytes(tag, chunk))
            .collect()
    }

    /// Writes same-tagged values contiguously
    fn write_array_values(&self, address: Address, values: &[PrimitiveValue]) -> MemoryResult<()> {
        let Some(first) = values.first() else {
            return Ok(());
        };
        let tag = first.tag();
        ensure_bulk_copy(tag)?;
        if let Some(other) = values.iter().find(|value| value.tag() != tag) {
            return Err(MemoryError::UnsupportedType(format!(
                "mixed array of {} and {}",
                tag,
                other.tag()
            )));
        }

        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_bytes()).collect();
        self.write_bytes(address, &bytes)
    }

    /// Reads a NUL-terminated string, consuming exactly `max_bytes`
    fn read_string(
        &self,
        address: Address,
        encoding: StringEncoding,
        max_bytes: usize,
    ) -> MemoryResult<String> {
        encoding.terminator_width()?;
        let buffer = self.read_vec(address, max_bytes)?;
        let text = encoding.scan_terminated(&buffer)?;
        encoding.decode(text)
    }

    /// [`MemoryAccess::read_string`] bounded by [`MemoryAccess::max_string_bytes`]
    fn read_string_default(
        &self,
        address: Address,
        encoding: StringEncoding,
    ) -> MemoryResult<String> {
        self.read_string(address, encoding, self.max_string_bytes())
    }

    fn write_string(
        &self,
        address: Address,
        value: &str,
        encoding: StringEncoding,
        append_terminator: bool,
    ) -> MemoryResult<()> {
        let bytes = encoding.encode(value, append_terminator)?;
        self.write_bytes(address, &bytes)
    }

    /// Reads the `index`-th function pointer of an object's virtual table
    fn vtable_entry(&self, object: Address, index: usize) -> MemoryResult<Address> {
        let table = Address::from_bytes(&self.read_vec(object, size_of::<usize>())?)?;
        let slot = table.add(array_span(table, index, size_of::<usize>())?);
        Address::from_bytes(&self.read_vec(slot, size_of::<usize>())?)
    }
}

/// Byte length of `count` elements at `address`; the range must not wrap
fn array_span(address: Address, count: usize, element_size: usize) -> MemoryResult<usize> {
    count
        .checked_mul(element_size)
        .filter(|len| address.as_usize().checked_add(*len).is_some())
        .ok_or_else(|| {
            MemoryError::InvalidAddress(format!(
                "{} elements of {} bytes at {} exceed the address space",
                count, element_size, address
            ))
        })
}

fn ensure_bulk_copy(tag: PrimitiveTag) -> MemoryResult<()> {
    if tag.supports_bulk_copy() {
        Ok(())
    } else {
        Err(MemoryError::UnsupportedType(format!("{} array", tag)))
    }
}
