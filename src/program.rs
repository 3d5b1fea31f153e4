//! JSON interchange format for function tables.
//!
//! ```json
//! { "functions": [
//!     { "name": "@main", "max_regs": 3,
//!       "params": [], "constants": ["hello"],
//!       "code": [ { "op": "LOAD_rA_kBC", "a": 0, "bc": 0 }, { "op": "RETURN" } ] } ] }
//! ```
//!
//! Code words are either raw `u32`s or assembly objects whose fields are
//! packed according to the shape named by the mnemonic.

use serde::{Deserialize, Serialize};

use crate::bytecode::{self, EncodeError, Field, Opcode};
use crate::funcdef::FuncDef;
use crate::value::{Heap, Value};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("function '{func}', instruction {index}: {source}")]
    Encode {
        func: String,
        index: usize,
        #[source]
        source: EncodeError,
    },
    #[error("function '{func}' declares {count} parameters; at most 254 fit in a frame")]
    TooManyParams { func: String, count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<FuncRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_regs: Option<u16>,
    #[serde(default)]
    pub params: Vec<ParamRecord>,
    #[serde(default)]
    pub constants: Vec<Const>,
    #[serde(default)]
    pub code: Vec<Word>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRecord {
    pub name: String,
    #[serde(default)]
    pub default: Const,
}

/// A constant as it appears in JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Const {
    #[default]
    Null,
    Int(i64),
    Double(f64),
    Str(String),
}

impl Const {
    pub fn to_value(&self, heap: &mut Heap) -> Value {
        match self {
            Const::Null => Value::NULL,
            Const::Int(i) => match i32::try_from(*i) {
                Ok(i) => Value::int(i),
                Err(_) => Value::double(*i as f64),
            },
            Const::Double(d) => Value::double(*d),
            Const::Str(s) => heap.make_string(s),
        }
    }
}

impl From<i32> for Const {
    fn from(i: i32) -> Self {
        Const::Int(i as i64)
    }
}

impl From<f64> for Const {
    fn from(d: f64) -> Self {
        Const::Double(d)
    }
}

impl From<&str> for Const {
    fn from(s: &str) -> Self {
        Const::Str(s.to_string())
    }
}

impl From<String> for Const {
    fn from(s: String) -> Self {
        Const::Str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Word {
    Raw(u32),
    Asm(AsmWord),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AsmWord {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ab: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bc: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abc: Option<i64>,
}

impl AsmWord {
    fn field(&self, field: Field) -> i64 {
        let v = match field {
            Field::A => self.a,
            Field::B => self.b,
            Field::C => self.c,
            Field::AB => self.ab,
            Field::BC => self.bc,
            Field::ABC => self.abc,
        };
        v.unwrap_or(0)
    }

    pub fn encode(&self) -> Result<u32, EncodeError> {
        let op = Opcode::from_mnemonic(&self.op).ok_or_else(|| EncodeError::UnknownMnemonic(self.op.clone()))?;
        let fields: Vec<(Field, i64)> = op.operands().iter().map(|o| (o.field, self.field(o.field))).collect();
        bytecode::encode(op, &fields)
    }
}

impl Word {
    pub fn encode(&self) -> Result<u32, EncodeError> {
        match self {
            Word::Raw(w) => Ok(*w),
            Word::Asm(asm) => asm.encode(),
        }
    }
}

impl FuncRecord {
    /// Encoded code words.
    pub fn words(&self) -> Result<Vec<u32>, LoadError> {
        self.code
            .iter()
            .enumerate()
            .map(|(index, w)| w.encode().map_err(|source| LoadError::Encode { func: self.name.clone(), index, source }))
            .collect()
    }

    pub fn to_funcdef(&self, heap: &mut Heap) -> Result<FuncDef, LoadError> {
        if self.params.len() > 254 {
            return Err(LoadError::TooManyParams { func: self.name.clone(), count: self.params.len() });
        }
        let mut def = FuncDef::new(self.name.clone());
        def.code = self.words()?;
        def.constants = self.constants.iter().map(|c| c.to_value(heap)).collect();
        for p in &self.params {
            let name = heap.make_string(&p.name);
            let default = p.default.to_value(heap);
            def.add_param(name, default);
        }
        def.max_regs = self.max_regs.unwrap_or(self.params.len() as u16 + 1).max(1);
        def.reserve_code_registers();
        Ok(def)
    }
}

impl Program {
    pub fn from_json(text: &str) -> Result<Program, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, LoadError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Materialise every record into `heap`, in table order.
    pub fn into_funcdefs(&self, heap: &mut Heap) -> Result<Vec<FuncDef>, LoadError> {
        self.functions.iter().map(|f| f.to_funcdef(heap)).collect()
    }
}
