//! Relative branch decoding.
//!
//! x64 `call rel32` / `jmp rel32` and RIP-relative operands store a signed
//! 32-bit displacement measured from the end of the instruction:
//!
//! ```text
//! E8 xx xx xx xx        call  next_ip + disp32
//! ^  ^-- opcode_length = 1
//! `---- instruction_length = 5
//! ```

use crate::error::Result;
use crate::memory::ReadMemory;

/// `address + instruction_length + displacement`, wrapping like the CPU does.
pub fn relative_target(address: u64, instruction_length: u64, displacement: i32) -> u64 {
    address
        .wrapping_add(instruction_length)
        .wrapping_add_signed(displacement as i64)
}

/// Decode the branch target of the instruction at `address`.
///
/// The displacement is read at `address + opcode_length`. Both lengths depend on
/// the encoding the signature matched and are supplied per field.
pub fn relative_call_target<R: ReadMemory + ?Sized>(
    reader: &R,
    address: u64,
    opcode_length: u64,
    instruction_length: u64,
) -> Result<u64> {
    let displacement = reader.read_i32(address.wrapping_add(opcode_length))?;
    Ok(relative_target(address, instruction_length, displacement))
}
