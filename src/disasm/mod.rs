//! Lazy x86 disassembly over any memory accessor
//!
//! Code is fetched through [`MemoryAccess`] in windows of `decode_window`
//! bytes and decoded with `iced-x86` at the host's bitness. Iteration stops at
//! the first invalid opcode or once memory can no longer be read and the bytes
//! already fetched are used up.

use crate::core::types::Address;
use crate::memory::MemoryAccess;
use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter, OpKind};
use std::fmt;
use tracing::debug;

pub use iced_x86::{FlowControl, Mnemonic};

/// Longest possible x86 instruction
pub const MAX_INSTRUCTION_LENGTH: usize = 15;

/// Bytes fetched per refill unless configured otherwise
pub const DEFAULT_DECODE_WINDOW: usize = 2 * MAX_INSTRUCTION_LENGTH;

/// Decoder bitness matching the host's pointer width
pub const HOST_BITNESS: u32 = (std::mem::size_of::<usize>() * 8) as u32;

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub address: Address,
    pub length: usize,
    pub bytes: Vec<u8>,
    pub mnemonic: Mnemonic,
    pub flow_control: FlowControl,
    /// Has a relative branch target or an IP-relative memory operand
    pub is_relative: bool,
    /// Intel-syntax rendering
    pub text: String,
}

impl DecodedInstruction {
    fn from_iced(instruction: &Instruction, bytes: &[u8], formatter: &mut IntelFormatter) -> Self {
        let is_relative = instruction.is_ip_rel_memory_operand()
            || (0..instruction.op_count()).any(|index| {
                matches!(
                    instruction.op_kind(index),
                    OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
                )
            });

        let mut text = String::new();
        formatter.format(instruction, &mut text);

        DecodedInstruction {
            address: Address::new(instruction.ip() as usize),
            length: instruction.len(),
            bytes: bytes.to_vec(),
            mnemonic: instruction.mnemonic(),
            flow_control: instruction.flow_control(),
            is_relative,
            text,
        }
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:<30} {}", self.address, hex::encode(&self.bytes), self.text)
    }
}

/// Restartable instruction source rooted at one address
pub struct Disassembler<'a, M: MemoryAccess + ?Sized> {
    memory: &'a M,
    start: Address,
    window: usize,
    limit: Option<Address>,
}

impl<'a, M: MemoryAccess + ?Sized> Disassembler<'a, M> {
    pub fn new(memory: &'a M, start: Address) -> Self {
        Self::with_window(memory, start, DEFAULT_DECODE_WINDOW)
    }

    /// Uses `window` bytes per refill, never fewer than one instruction
    pub fn with_window(memory: &'a M, start: Address, window: usize) -> Self {
        Disassembler {
            memory,
            start,
            window: window.max(MAX_INSTRUCTION_LENGTH),
            limit: None,
        }
    }

    /// Never fetches memory at or beyond `limit`
    pub fn with_limit(mut self, limit: Address) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(&self) -> Address {
        self.start
    }

    /// A fresh iterator from the start address
    pub fn instructions(&self) -> Instructions<'a, M> {
        Instructions {
            memory: self.memory,
            window: self.window,
            limit: self.limit,
            buffer: Vec::new(),
            offset: 0,
            next: self.start,
            exhausted: false,
            finished: false,
            formatter: IntelFormatter::new(),
        }
    }
}

/// Iterator over decoded instructions
pub struct Instructions<'a, M: MemoryAccess + ?Sized> {
    memory: &'a M,
    window: usize,
    limit: Option<Address>,
    buffer: Vec<u8>,
    offset: usize,
    next: Address,
    /// No further fetches; only buffered bytes remain
    exhausted: bool,
    finished: bool,
    formatter: IntelFormatter,
}

impl<'a, M: MemoryAccess + ?Sized> Instructions<'a, M> {
    /// Refetches from the next instruction. Returns whether any bytes are
    /// left to decode.
    fn refill(&mut self) -> bool {
        let len = match self.limit {
            Some(limit) => self
                .window
                .min(limit.as_usize().saturating_sub(self.next.as_usize())),
            None => self.window,
        };
        if len == 0 {
            self.exhausted = true;
            return self.offset < self.buffer.len();
        }

        match self.memory.read_vec(self.next, len) {
            Ok(bytes) => {
                self.buffer = bytes;
                self.offset = 0;
            }
            Err(e) => {
                debug!(address = %self.next, error = %e, "Disassembly reached unreadable memory");
                self.exhausted = true;
            }
        }
        if self.limit.is_some() && len < MAX_INSTRUCTION_LENGTH {
            self.exhausted = true;
        }
        self.offset < self.buffer.len()
    }
}

impl<'a, M: MemoryAccess + ?Sized> Iterator for Instructions<'a, M> {
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<DecodedInstruction> {
        if self.finished {
            return None;
        }
        let buffered = self.buffer.len() - self.offset;
        let has_bytes = if !self.exhausted && buffered < MAX_INSTRUCTION_LENGTH {
            self.refill()
        } else {
            buffered > 0
        };
        if !has_bytes {
            self.finished = true;
            return None;
        }

        let remaining = &self.buffer[self.offset..];
        let mut decoder = Decoder::with_ip(
            HOST_BITNESS,
            remaining,
            self.next.as_usize() as u64,
            DecoderOptions::NONE,
        );
        let mut instruction = Instruction::default();
        decoder.decode_out(&mut instruction);
        if instruction.is_invalid() {
            self.finished = true;
            return None;
        }

        let length = instruction.len();
        let decoded =
            DecodedInstruction::from_iced(&instruction, &remaining[..length], &mut self.formatter);
        self.offset += length;
        self.next = self.next.add(length);
        Some(decoded)
    }
}

/// Decodes instructions from `start` until at least `min_bytes` are covered.
///
/// No byte past the longest instruction that could start inside the first
/// `min_bytes` is fetched. Returns the instructions and their total length,
/// or the partial total if decoding ended first.
pub fn decode_prefix<M: MemoryAccess + ?Sized>(
    memory: &M,
    start: Address,
    min_bytes: usize,
    window: usize,
) -> Result<(Vec<DecodedInstruction>, usize), usize> {
    let reach = min_bytes.saturating_add(MAX_INSTRUCTION_LENGTH - 1);
    let limit = Address::new(start.as_usize().saturating_add(reach));
    let disassembler = Disassembler::with_window(memory, start, window).with_limit(limit);

    let mut covered = 0;
    let mut prefix = Vec::new();
    for instruction in disassembler.instructions() {
        covered += instruction.length;
        prefix.push(instruction);
        if covered >= min_bytes {
            return Ok((prefix, covered));
        }
    }
    Err(covered)
}
