//! Parameter structures carried into a foreign address space
//!
//! A [`ParameterBlock`] lays out a structure followed by the payloads its
//! pointer fields refer to. Before the block is copied into the foreign
//! process every pointer field is rewritten to point at its payload inside
//! the foreign copy.

use crate::core::types::{Address, MemoryError, MemoryResult, Primitive};
use std::ffi::CStr;
use std::mem::size_of;

const POINTER_SIZE: usize = size_of::<usize>();

/// What a pointer field refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointee {
    /// A fixed number of bytes
    Bytes(usize),
    /// A NUL-terminated byte string
    AnsiString,
    /// A NUL-terminated UTF-16 string
    WideString,
}

/// One pointer-typed member of a structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerField {
    pub offset: usize,
    pub pointee: Pointee,
}

impl PointerField {
    pub const fn new(offset: usize, pointee: Pointee) -> Self {
        PointerField { offset, pointee }
    }
}

/// Layout of a structure passed to a remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructSchema {
    pub size: usize,
    pub pointer_fields: Vec<PointerField>,
}

/// A structure that can be copied into a foreign process.
///
/// # Safety
/// `schema().size` must not exceed `size_of::<Self>()`, and every listed
/// pointer field must lie inside the structure and hold either null or a
/// pointer to a live pointee of the declared kind.
pub unsafe trait RemoteStruct: Sized {
    fn schema() -> StructSchema;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Relocation {
    field_offset: usize,
    payload_offset: usize,
}

/// A structure plus the payloads its pointer fields refer to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterBlock {
    bytes: Vec<u8>,
    struct_size: usize,
    relocations: Vec<Relocation>,
}

impl ParameterBlock {
    /// Block holding a structure with no pointer fields attached yet
    pub fn new(struct_bytes: Vec<u8>) -> Self {
        let struct_size = struct_bytes.len();
        ParameterBlock {
            bytes: struct_bytes,
            struct_size,
            relocations: Vec::new(),
        }
    }

    /// Appends `payload` and makes the pointer field at `field_offset` refer
    /// to it. Attaching to the same field again replaces the relocation.
    pub fn attach(&mut self, field_offset: usize, payload: &[u8]) -> MemoryResult<()> {
        let fits = field_offset
            .checked_add(POINTER_SIZE)
            .is_some_and(|end| end <= self.struct_size);
        if !fits {
            return Err(MemoryError::buffer_too_small(
                field_offset.saturating_add(POINTER_SIZE),
                self.struct_size,
            ));
        }

        let payload_offset = self.bytes.len().next_multiple_of(POINTER_SIZE);
        self.bytes.resize(payload_offset, 0);
        self.bytes.extend_from_slice(payload);

        self.relocations
            .retain(|relocation| relocation.field_offset != field_offset);
        self.relocations.push(Relocation {
            field_offset,
            payload_offset,
        });
        Ok(())
    }

    /// Copies `value` and every non-null pointee its schema describes.
    ///
    /// # Safety
    /// The contract of [`RemoteStruct`] must hold for `value`.
    pub unsafe fn from_struct<T: RemoteStruct>(value: &T) -> MemoryResult<Self> {
        let schema = T::schema();
        if schema.size > size_of::<T>() {
            return Err(MemoryError::buffer_too_small(schema.size, size_of::<T>()));
        }
        let raw = std::slice::from_raw_parts(value as *const T as *const u8, schema.size);
        let mut block = ParameterBlock::new(raw.to_vec());

        for field in &schema.pointer_fields {
            let slot = block
                .bytes
                .get(field.offset..field.offset + POINTER_SIZE)
                .ok_or_else(|| {
                    MemoryError::buffer_too_small(field.offset + POINTER_SIZE, schema.size)
                })?;
            let pointer = Address::from_bytes(slot)?;
            if pointer.is_null() {
                continue;
            }
            let payload = read_pointee(pointer, field.pointee);
            block.attach(field.offset, &payload)?;
        }
        Ok(block)
    }

    /// Size of the structure at the start of the block
    pub fn struct_size(&self) -> usize {
        self.struct_size
    }

    /// Total bytes, structure plus payloads
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Block contents with pointer fields unrewritten
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Block contents as they must appear when copied to `base`
    pub fn rebased(&self, base: Address) -> Vec<u8> {
        let mut bytes = self.bytes.clone();
        for relocation in &self.relocations {
            let target = base.add(relocation.payload_offset).as_usize();
            bytes[relocation.field_offset..relocation.field_offset + POINTER_SIZE]
                .copy_from_slice(&target.to_ne_bytes());
        }
        bytes
    }
}

/// Copies a pointee out of local memory, terminators included
unsafe fn read_pointee(pointer: Address, pointee: Pointee) -> Vec<u8> {
    match pointee {
        Pointee::Bytes(len) => std::slice::from_raw_parts(pointer.as_ptr::<u8>(), len).to_vec(),
        Pointee::AnsiString => CStr::from_ptr(pointer.as_ptr()).to_bytes_with_nul().to_vec(),
        Pointee::WideString => {
            let start = pointer.as_ptr::<u16>();
            let mut len = 0;
            while start.add(len).read_unaligned() != 0 {
                len += 1;
            }
            std::slice::from_raw_parts(start as *const u8, (len + 1) * 2).to_vec()
        }
    }
}
