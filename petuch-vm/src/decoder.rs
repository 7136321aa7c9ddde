//! Instruction word decoding.
//!
//! Every instruction starts with a 16-bit word stored little-endian. The top
//! six bits select the opcode, and the opcode fixes which of seven field
//! layouts the remaining ten bits use. Immediates and pointers, when present,
//! follow the word at `ip + 2`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSize {
    Byte,
    Word,
    Dword,
}

impl OperandSize {
    /// Size codes 0..=2; code 3 is malformed and read as DWORD.
    pub fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => OperandSize::Byte,
            1 => OperandSize::Word,
            _ => OperandSize::Dword,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            OperandSize::Byte => 0,
            OperandSize::Word => 1,
            OperandSize::Dword => 2,
        }
    }

    /// Width in bytes: 1, 2 or 4.
    #[inline]
    pub fn bytes(self) -> u32 {
        1 << self.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    Eq,
    Neq,
    Gr,
    L,
}

impl Condition {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Condition::Always),
            1 => Some(Condition::Eq),
            2 => Some(Condition::Neq),
            3 => Some(Condition::Gr),
            4 => Some(Condition::L),
            _ => None,
        }
    }
}

/// Bit layout of the ten bits under the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// dest[9:6] src[5:2] reserved[1:0]
    Type0,
    /// size[9:8] reg[7:4] reserved[3:0]
    Type1,
    /// size[9:8] cond[7:5] reserved[4:0]
    Type2,
    /// size[9:8] dest[7:4] reserved[3:0]
    Type3,
    /// dest[9:6] reserved[5:0]
    Type4,
    /// reserved[9:0]
    Type5,
    /// dest[9:6] src[5:2] size[1:0]
    Type6,
}

macro_rules! opcodes {
    ($($name:ident = $num:literal, $mnemonic:literal, $format:ident;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Opcode {
            $($name = $num,)*
        }

        impl Opcode {
            pub fn from_bits(bits: u8) -> Option<Self> {
                match bits {
                    $($num => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            pub fn format(self) -> Format {
                match self {
                    $(Opcode::$name => Format::$format,)*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0, "NOP", Type5;
    Add0 = 1, "ADD0", Type0;
    Add3 = 2, "ADD3", Type3;
    Sub0 = 3, "SUB0", Type0;
    Sub3 = 4, "SUB3", Type3;
    Mul0 = 5, "MUL0", Type0;
    Mul3 = 6, "MUL3", Type3;
    Div0 = 7, "DIV0", Type0;
    Div3 = 8, "DIV3", Type3;
    Cpy = 9, "CPY", Type0;
    Swp = 10, "SWP", Type0;
    And0 = 11, "AND0", Type0;
    And3 = 12, "AND3", Type3;
    Or0 = 13, "OR0", Type0;
    Or3 = 14, "OR3", Type3;
    Not = 15, "NOT", Type4;
    Xor0 = 16, "XOR0", Type0;
    Xor3 = 17, "XOR3", Type3;
    Inc = 18, "INC", Type4;
    Dec = 19, "DEC", Type4;
    Push4 = 20, "PUSH4", Type4;
    Push2 = 21, "PUSH2", Type2;
    Pop4 = 22, "POP4", Type4;
    Jmp = 23, "JMP", Type2;
    Call = 24, "CALL", Type2;
    Int = 25, "INT", Type2;
    Ld1 = 26, "LD1", Type1;
    Ld3 = 27, "LD3", Type3;
    Ld6 = 28, "LD6", Type6;
    St1 = 29, "ST1", Type1;
    St6 = 30, "ST6", Type6;
    Cmp0 = 31, "CMP0", Type0;
    Cmp3 = 32, "CMP3", Type3;
    Ret = 33, "RET", Type5;
    Iret = 34, "IRET", Type5;
    Hlt = 35, "HLT", Type5;
    Ldsp = 36, "LDSP", Type4;
    Stsp = 37, "STSP", Type4;
    Ldit = 38, "LDIT", Type4;
    Stit = 39, "STIT", Type4;
    Ldmsr = 40, "LDMSR", Type4;
    Stmsr = 41, "STMSR", Type4;
    Ldpd = 42, "LDPD", Type4;
    Stpd = 43, "STPD", Type4;
    Shl = 44, "SHL", Type3;
    Shr = 45, "SHR", Type3;
}

/// A decoded instruction word. Fields a format does not carry are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub word: u16,
    pub opcode: Opcode,
    pub dest: usize,
    pub src: usize,
    pub size_code: u8,
    pub cond: u8,
    pub reserved: u16,
}

impl Instruction {
    pub fn size(&self) -> OperandSize {
        OperandSize::from_code(self.size_code)
    }

    pub fn condition(&self) -> Option<Condition> {
        Condition::from_code(self.cond)
    }

    /// Length of the word plus a sized immediate.
    pub fn len_with_immediate(&self) -> u32 {
        2 + self.size().bytes()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode.mnemonic();
        match self.opcode.format() {
            Format::Type0 => write!(f, "{} r{}, r{}", op, self.dest, self.src),
            Format::Type1 | Format::Type3 => {
                write!(f, "{}.{} r{}", op, self.size().bytes(), self.dest)
            }
            Format::Type2 => write!(f, "{}.{} cc{}", op, self.size().bytes(), self.cond),
            Format::Type4 => write!(f, "{} r{}", op, self.dest),
            Format::Type5 => f.write_str(op),
            Format::Type6 => write!(
                f,
                "{}.{} r{}, r{}",
                op,
                self.size().bytes(),
                self.dest,
                self.src
            ),
        }
    }
}

/// Opcode number of an instruction word.
#[inline]
pub fn opcode_bits(word: u16) -> u8 {
    (word >> 10) as u8
}

/// Split `word` into fields. Returns `None` for an unassigned opcode.
pub fn decode(word: u16) -> Option<Instruction> {
    let opcode = Opcode::from_bits(opcode_bits(word))?;
    let w = word;
    let hi_reg = ((w >> 6) & 0xF) as usize;
    let lo_reg = ((w >> 2) & 0xF) as usize;
    let size_hi = ((w >> 8) & 0x3) as u8;
    let mid_reg = ((w >> 4) & 0xF) as usize;

    let mut insn = Instruction {
        word,
        opcode,
        dest: 0,
        src: 0,
        size_code: 0,
        cond: 0,
        reserved: 0,
    };
    match opcode.format() {
        Format::Type0 => {
            insn.dest = hi_reg;
            insn.src = lo_reg;
            insn.reserved = w & 0x3;
        }
        Format::Type1 | Format::Type3 => {
            insn.size_code = size_hi;
            insn.dest = mid_reg;
            insn.reserved = w & 0xF;
        }
        Format::Type2 => {
            insn.size_code = size_hi;
            insn.cond = ((w >> 5) & 0x7) as u8;
            insn.reserved = w & 0x1F;
        }
        Format::Type4 => {
            insn.dest = hi_reg;
            insn.reserved = w & 0x3F;
        }
        Format::Type5 => {
            insn.reserved = w & 0x3FF;
        }
        Format::Type6 => {
            insn.dest = hi_reg;
            insn.src = lo_reg;
            insn.size_code = (w & 0x3) as u8;
        }
    }
    Some(insn)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn op(opcode: Opcode) -> u16 {
        (opcode as u16) << 10
    }

    pub(crate) fn encode_type0(opcode: Opcode, dest: u16, src: u16) -> u16 {
        op(opcode) | (dest & 0xF) << 6 | (src & 0xF) << 2
    }

    pub(crate) fn encode_type1(opcode: Opcode, size: u16, reg: u16) -> u16 {
        op(opcode) | (size & 0x3) << 8 | (reg & 0xF) << 4
    }

    pub(crate) fn encode_type2(opcode: Opcode, size: u16, cond: u16) -> u16 {
        op(opcode) | (size & 0x3) << 8 | (cond & 0x7) << 5
    }

    pub(crate) fn encode_type3(opcode: Opcode, size: u16, dest: u16) -> u16 {
        op(opcode) | (size & 0x3) << 8 | (dest & 0xF) << 4
    }

    pub(crate) fn encode_type4(opcode: Opcode, dest: u16) -> u16 {
        op(opcode) | (dest & 0xF) << 6
    }

    pub(crate) fn encode_type5(opcode: Opcode) -> u16 {
        op(opcode)
    }

    pub(crate) fn encode_type6(opcode: Opcode, dest: u16, src: u16, size: u16) -> u16 {
        op(opcode) | (dest & 0xF) << 6 | (src & 0xF) << 2 | (size & 0x3)
    }

    #[test]
    fn test_opcode_table_is_dense() {
        for bits in 0..=45u8 {
            let opcode = Opcode::from_bits(bits).unwrap();
            assert_eq!(opcode as u8, bits);
        }
        for bits in 46..=63u8 {
            assert_eq!(Opcode::from_bits(bits), None);
        }
    }

    #[test]
    fn test_decode_type0() {
        let insn = decode(encode_type0(Opcode::Add0, 3, 12)).unwrap();
        assert_eq!(insn.opcode, Opcode::Add0);
        assert_eq!(insn.dest, 3);
        assert_eq!(insn.src, 12);
        assert_eq!(insn.reserved, 0);
        assert_eq!(insn.to_string(), "ADD0 r3, r12");
    }

    #[test]
    fn test_decode_type1_and_type3() {
        let insn = decode(encode_type1(Opcode::Ld1, 1, 9)).unwrap();
        assert_eq!(insn.dest, 9);
        assert_eq!(insn.size(), OperandSize::Word);

        let insn = decode(encode_type3(Opcode::Ld3, 2, 0)).unwrap();
        assert_eq!(insn.opcode, Opcode::Ld3);
        assert_eq!(insn.dest, 0);
        assert_eq!(insn.size(), OperandSize::Dword);
        assert_eq!(insn.len_with_immediate(), 6);
    }

    #[test]
    fn test_decode_type2_conditions() {
        let insn = decode(encode_type2(Opcode::Jmp, 2, 1)).unwrap();
        assert_eq!(insn.condition(), Some(Condition::Eq));
        let insn = decode(encode_type2(Opcode::Jmp, 2, 4)).unwrap();
        assert_eq!(insn.condition(), Some(Condition::L));
        let insn = decode(encode_type2(Opcode::Call, 2, 7)).unwrap();
        assert_eq!(insn.condition(), None);
    }

    #[test]
    fn test_decode_type4_type5_type6() {
        let insn = decode(encode_type4(Opcode::Push4, 15)).unwrap();
        assert_eq!(insn.dest, 15);

        let insn = decode(encode_type5(Opcode::Hlt)).unwrap();
        assert_eq!(insn.opcode, Opcode::Hlt);
        assert_eq!(insn.reserved, 0);

        let insn = decode(encode_type6(Opcode::St6, 4, 5, 1)).unwrap();
        assert_eq!((insn.dest, insn.src), (4, 5));
        assert_eq!(insn.size(), OperandSize::Word);
        assert_eq!(insn.reserved, 0);
    }

    #[test]
    fn test_reserved_bits_reported() {
        let insn = decode(encode_type0(Opcode::Cpy, 1, 2) | 0b11).unwrap();
        assert_eq!(insn.reserved, 0b11);
        assert_eq!((insn.dest, insn.src), (1, 2));

        let insn = decode(encode_type5(Opcode::Nop) | 0x155).unwrap();
        assert_eq!(insn.reserved, 0x155);
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(decode(46 << 10), None);
        assert_eq!(decode(0xFFFF), None);
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(OperandSize::from_code(0).bytes(), 1);
        assert_eq!(OperandSize::from_code(1).bytes(), 2);
        assert_eq!(OperandSize::from_code(2).bytes(), 4);
        assert_eq!(OperandSize::from_code(3), OperandSize::Dword);
    }
}
