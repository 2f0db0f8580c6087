//! Reduced DWARF expression (`exprloc`) evaluator.
//!
//! Only handles the handful of opcodes ORC actually needs a value out of (literal/register
//! constants, the common encoding for `DW_AT_vtable_elem_location`, `DW_AT_data_member_location`,
//! and similar). Anything else is recorded as `passover` rather than rejected outright: an
//! unevaluated expression is still a well-formed attribute, just one this crate does not interpret.

use crate::reader::{sleb128, uleb128, Reader, Whence};

/// The result of evaluating one `exprloc` stream.
pub enum ExprResult {
    /// The stack held exactly one value when the expression ended.
    Value(i64),
    /// An opcode outside the supported subset was encountered; the cursor has been advanced past
    /// the whole expression regardless.
    Passover,
}

const DW_OP_LIT0: u8 = 0x30;
const DW_OP_LIT31: u8 = 0x4f;
const DW_OP_REG0: u8 = 0x50;
const DW_OP_REG31: u8 = 0x6f;
const DW_OP_CONST1U: u8 = 0x08;
const DW_OP_CONST1S: u8 = 0x09;
const DW_OP_CONST2U: u8 = 0x0a;
const DW_OP_CONST2S: u8 = 0x0b;
const DW_OP_CONST4U: u8 = 0x0c;
const DW_OP_CONST4S: u8 = 0x0d;
const DW_OP_CONST8U: u8 = 0x0e;
const DW_OP_CONST8S: u8 = 0x0f;
const DW_OP_CONSTU: u8 = 0x10;
const DW_OP_CONSTS: u8 = 0x11;
const DW_OP_REGX: u8 = 0x90;
const DW_OP_DUP: u8 = 0x12;

/// Evaluates `length` bytes of expression starting at `reader`'s current position, leaving the
/// cursor positioned exactly `length` bytes later regardless of whether evaluation succeeded.
pub fn evaluate(reader: &mut Reader, length: usize) -> Result<ExprResult, crate::error::DwarfError> {
    let start = reader.tellg();
    let end = start + length;
    let mut stack: Vec<i64> = Vec::new();
    let mut passover = false;

    while reader.tellg() < end && !passover {
        let op = reader.read_pod_u8()?;
        match op {
            DW_OP_LIT0..=DW_OP_LIT31 => stack.push((op - DW_OP_LIT0) as i64),
            DW_OP_REG0..=DW_OP_REG31 => stack.push((op - DW_OP_REG0) as i64),
            DW_OP_CONST1U => stack.push(reader.read_pod_u8()? as i64),
            DW_OP_CONST1S => stack.push(reader.read_pod_u8()? as i8 as i64),
            DW_OP_CONST2U => stack.push(reader.read_pod_u16(false)? as i64),
            DW_OP_CONST2S => stack.push(reader.read_pod_u16(false)? as i16 as i64),
            DW_OP_CONST4U => stack.push(reader.read_pod_u32(false)? as i64),
            DW_OP_CONST4S => stack.push(reader.read_pod_u32(false)? as i32 as i64),
            DW_OP_CONST8U => stack.push(reader.read_pod_u64(false)? as i64),
            DW_OP_CONST8S => stack.push(reader.read_pod_u64(false)? as i64),
            DW_OP_CONSTU => stack.push(uleb128(reader)? as i64),
            DW_OP_CONSTS => stack.push(sleb128(reader)? as i64),
            DW_OP_REGX => stack.push(uleb128(reader)? as i64),
            DW_OP_DUP => {
                if let Some(&top) = stack.last() {
                    stack.push(top);
                }
            }
            _ => passover = true,
        }
    }

    reader.seek(end as i64, Whence::Start);

    if passover {
        Ok(ExprResult::Passover)
    } else {
        Ok(stack.last().copied().map(ExprResult::Value).unwrap_or(ExprResult::Passover))
    }
}
