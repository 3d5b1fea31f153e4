// ── Instruction encoding ────────────────────────────────────────────
//
// One 32-bit word per instruction, opcode in the top byte:
//
//   [OP:8 | A:8 | B:8 | C:8]      A+B+C
//   [OP:8 | A:8 | BC:16]          A+BC
//   [OP:8 | AB:16 | C:8]          AB+C
//   [OP:8 | ABC:24]               ABC
//   [OP:8 | A:8 | unused]         A
//
// Mnemonic suffixes name each operand's role and field: `r` register,
// `i` immediate, `k` constant-pool index.

use std::fmt;

macro_rules! opcodes {
    ($($name:ident),* $(,)?) => {
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name),*
        }

        impl Opcode {
            /// Every opcode in numeric order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name)),*
                }
            }
        }
    };
}

opcodes! {
    NOOP,
    LOAD_rA_rB,
    LOAD_rA_iBC,
    LOAD_rA_kBC,
    LOADNULL_rA,
    LOADV_rA_rB_kC,
    LOADC_rA_rB_kC,
    FUNCREF_iA_iBC,
    ASSIGN_rA_rB_kC,
    NAME_rA_kBC,
    ADD_rA_rB_rC,
    SUB_rA_rB_rC,
    MULT_rA_rB_rC,
    DIV_rA_rB_rC,
    MOD_rA_rB_rC,
    AND_rA_rB_rC,
    OR_rA_rB_rC,
    NOT_rA_rB,
    LIST_rA_iBC,
    MAP_rA_iBC,
    PUSH_rA_rB,
    INDEX_rA_rB_rC,
    IDXSET_rA_rB_rC,
    SLICE_rA_rB_rC,
    LOCALS_rA,
    OUTER_rA,
    GLOBALS_rA,
    JUMP_iABC,
    LT_rA_rB_rC,
    LT_rA_rB_iC,
    LT_rA_iB_rC,
    LE_rA_rB_rC,
    LE_rA_rB_iC,
    LE_rA_iB_rC,
    EQ_rA_rB_rC,
    EQ_rA_rB_iC,
    NE_rA_rB_rC,
    NE_rA_rB_iC,
    BRTRUE_rA_iBC,
    BRFALSE_rA_iBC,
    BRLT_rA_rB_iC,
    BRLT_rA_iB_iC,
    BRLT_iA_rB_iC,
    BRLE_rA_rB_iC,
    BRLE_rA_iB_iC,
    BRLE_iA_rB_iC,
    BREQ_rA_rB_iC,
    BREQ_rA_iB_iC,
    BRNE_rA_rB_iC,
    BRNE_rA_iB_iC,
    IFLT_rA_rB,
    IFLT_rA_iBC,
    IFLT_iAB_rC,
    IFLE_rA_rB,
    IFLE_rA_iBC,
    IFLE_iAB_rC,
    IFEQ_rA_rB,
    IFEQ_rA_iBC,
    IFNE_rA_rB,
    IFNE_rA_iBC,
    ARGBLK_iABC,
    ARG_rA,
    ARG_iABC,
    CALLF_iA_iBC,
    CALLFN_iA_kBC,
    CALL_rA_rB_rC,
    NEW_rA_rB,
    ISA_rA_rB_rC,
    METHFIND_rA_rB_rC,
    SETSELF_rA,
    CALLIFREF_rA,
    ITERGET_rA_rB_rC,
    NEXT_rA_rB,
    RETURN,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        Opcode::ALL.get(byte as usize).copied()
    }

    /// Case-insensitive lookup by mnemonic.
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }

    /// Operand roles and fields, read off the mnemonic suffix.
    pub fn operands(self) -> Vec<Operand> {
        self.mnemonic().split('_').skip(1).filter_map(Operand::parse).collect()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Register,
    Immediate,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    A,
    B,
    C,
    AB,
    BC,
    ABC,
}

impl Field {
    pub fn bits(self) -> u32 {
        match self {
            Field::A | Field::B | Field::C => 8,
            Field::AB | Field::BC => 16,
            Field::ABC => 24,
        }
    }

    fn shift(self) -> u32 {
        match self {
            Field::A => 16,
            Field::B | Field::AB => 8,
            Field::C | Field::BC | Field::ABC => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::A => "a",
            Field::B => "b",
            Field::C => "c",
            Field::AB => "ab",
            Field::BC => "bc",
            Field::ABC => "abc",
        }
    }

    /// Raw unsigned field value.
    pub fn extract(self, word: u32) -> u32 {
        (word >> self.shift()) & ((1u32 << self.bits()) - 1)
    }

    /// Field value sign-extended from its width.
    pub fn extract_signed(self, word: u32) -> i32 {
        let bits = self.bits();
        let raw = self.extract(word);
        ((raw << (32 - bits)) as i32) >> (32 - bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub role: Role,
    pub field: Field,
}

impl Operand {
    fn parse(part: &str) -> Option<Operand> {
        let role = match part.as_bytes().first()? {
            b'r' => Role::Register,
            b'i' => Role::Immediate,
            b'k' => Role::Constant,
            _ => return None,
        };
        let field = match &part[1..] {
            "A" => Field::A,
            "B" => Field::B,
            "C" => Field::C,
            "AB" => Field::AB,
            "BC" => Field::BC,
            "ABC" => Field::ABC,
            _ => return None,
        };
        Some(Operand { role, field })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unknown opcode mnemonic: {0}")]
    UnknownMnemonic(String),
    #[error("{op}: operand {field} = {value} does not fit in {bits} bits")]
    OperandOutOfRange { op: &'static str, field: &'static str, value: i64, bits: u32 },
}

// ── Encoders ─────────────────────────────────────────────────────────

#[inline(always)]
pub fn ins(op: Opcode) -> u32 {
    (op as u32) << 24
}

#[inline(always)]
pub fn ins_a(op: Opcode, a: u8) -> u32 {
    (op as u32) << 24 | (a as u32) << 16
}

#[inline(always)]
pub fn ins_abc(op: Opcode, a: u8, b: u8, c: u8) -> u32 {
    (op as u32) << 24 | (a as u32) << 16 | (b as u32) << 8 | c as u32
}

/// A + 16-bit BC.
#[inline(always)]
pub fn ins_a_bc(op: Opcode, a: u8, bc: i16) -> u32 {
    (op as u32) << 24 | (a as u32) << 16 | bc as u16 as u32
}

/// 16-bit AB + C.
#[inline(always)]
pub fn ins_ab_c(op: Opcode, ab: i16, c: u8) -> u32 {
    (op as u32) << 24 | (ab as u16 as u32) << 8 | c as u32
}

/// 24-bit ABC; the top byte of `abc` is discarded.
#[inline(always)]
pub fn ins_abc24(op: Opcode, abc: i32) -> u32 {
    (op as u32) << 24 | (abc as u32 & 0x00FF_FFFF)
}

/// Encode from named field values, checking each against its width.
/// Values may be given signed or unsigned (`-1` and `255` both fit in 8 bits).
pub fn encode(op: Opcode, fields: &[(Field, i64)]) -> Result<u32, EncodeError> {
    let mut word = ins(op);
    for &(field, value) in fields {
        let bits = field.bits();
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << bits) - 1;
        if value < min || value > max {
            return Err(EncodeError::OperandOutOfRange { op: op.mnemonic(), field: field.name(), value, bits });
        }
        let mask = (1u32 << bits) - 1;
        word |= ((value as u32) & mask) << field.shift();
    }
    Ok(word)
}

// ── Decoders ─────────────────────────────────────────────────────────

#[inline(always)]
pub fn op(word: u32) -> u8 {
    (word >> 24) as u8
}

#[inline(always)]
pub fn a(word: u32) -> u8 {
    (word >> 16) as u8
}

#[inline(always)]
pub fn b(word: u32) -> u8 {
    (word >> 8) as u8
}

#[inline(always)]
pub fn c(word: u32) -> u8 {
    word as u8
}

#[inline(always)]
pub fn a_s(word: u32) -> i8 {
    a(word) as i8
}

#[inline(always)]
pub fn b_s(word: u32) -> i8 {
    b(word) as i8
}

#[inline(always)]
pub fn c_s(word: u32) -> i8 {
    c(word) as i8
}

#[inline(always)]
pub fn ab_s(word: u32) -> i16 {
    (word >> 8) as u16 as i16
}

#[inline(always)]
pub fn bc_u(word: u32) -> u16 {
    word as u16
}

#[inline(always)]
pub fn bc_s(word: u32) -> i16 {
    word as u16 as i16
}

#[inline(always)]
pub fn abc_s(word: u32) -> i32 {
    ((word << 8) as i32) >> 8
}

/// One instruction in assembly form, e.g. `ADD_rA_rB_rC r2, r0, r1`.
pub fn disassemble(word: u32) -> String {
    let Some(opcode) = Opcode::from_u8(op(word)) else {
        return format!("??? 0x{word:08X}");
    };
    let operands: Vec<String> = opcode
        .operands()
        .into_iter()
        .map(|o| match o.role {
            Role::Register => format!("r{}", o.field.extract(word)),
            Role::Constant => format!("k{}", o.field.extract(word)),
            Role::Immediate => o.field.extract_signed(word).to_string(),
        })
        .collect();
    if operands.is_empty() {
        opcode.mnemonic().to_string()
    } else {
        format!("{} {}", opcode.mnemonic(), operands.join(", "))
    }
}
