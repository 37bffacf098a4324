//! Relative jump encoding

use crate::core::types::{Address, MemoryResult};

/// Length of `jmp rel32`
pub const JUMP_SIZE: usize = 5;

const JMP_REL32: u8 = 0xE9;

/// Displacement of a `jmp rel32` at `source` landing on `destination`
pub fn jump_displacement(source: Address, destination: Address) -> MemoryResult<i32> {
    let next = source.add(JUMP_SIZE);

    #[cfg(target_pointer_width = "32")]
    {
        Ok((destination.as_usize() as u32).wrapping_sub(next.as_usize() as u32) as i32)
    }

    #[cfg(not(target_pointer_width = "32"))]
    {
        let delta = destination.as_usize() as i128 - next.as_usize() as i128;
        i32::try_from(delta).map_err(|_| crate::core::types::MemoryError::JumpOutOfRange {
            from: source.to_string(),
            to: destination.to_string(),
        })
    }
}

/// Encodes `jmp rel32` placed at `source`, targeting `destination`
pub fn encode_jump(source: Address, destination: Address) -> MemoryResult<[u8; JUMP_SIZE]> {
    let rel = jump_displacement(source, destination)?.to_le_bytes();
    Ok([JMP_REL32, rel[0], rel[1], rel[2], rel[3]])
}
