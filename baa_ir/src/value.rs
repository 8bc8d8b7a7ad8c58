//! IR values referenced by instruction operand slots
//!
//! Every operand slot owns its `Value`; there is no sharing between slots.
//! Rewrites replace the slot contents, cloning is always explicit.

use crate::arena::BlockId;
use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value usable in an operand slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Immediate integer; the width is determined by the type
    ConstInt { value: i64, ty: Type },
    /// Interned module string, referenced by id
    ConstStr { id: u32 },
    /// SSA virtual register defined within the current function
    Reg { num: u32, ty: Type },
    /// Address of a global variable; the value type is `ptr<pointee>`
    Global { name: String, pointee: Type },
    /// Address of a function
    FuncRef { name: String, ty: Type },
    /// Branch target
    Block(BlockId),
}

impl Value {
    pub fn const_int(value: i64, ty: Type) -> Self {
        Value::ConstInt { value, ty }
    }

    pub fn reg(num: u32, ty: Type) -> Self {
        Value::Reg { num, ty }
    }

    /// The type of this value. Globals are pointers to their pointee; string
    /// constants are `ptr<i8>`; block references carry no data type.
    pub fn ty(&self) -> Type {
        match self {
            Value::ConstInt { ty, .. } => ty.clone(),
            Value::ConstStr { .. } => Type::I8.ptr_to(),
            Value::Reg { ty, .. } => ty.clone(),
            Value::Global { pointee, .. } => pointee.clone().ptr_to(),
            Value::FuncRef { ty, .. } => ty.clone(),
            Value::Block(_) => Type::Void,
        }
    }

    pub fn is_const_int(&self) -> bool {
        matches!(self, Value::ConstInt { .. })
    }

    pub fn as_const_int(&self) -> Option<i64> {
        match self {
            Value::ConstInt { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_reg(&self) -> Option<u32> {
        match self {
            Value::Reg { num, .. } => Some(*num),
            _ => None,
        }
    }

    pub fn is_reg_num(&self, reg: u32) -> bool {
        self.as_reg() == Some(reg)
    }

    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Value::Block(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::ConstInt { value, .. } => write!(f, "{}", value),
            Value::ConstStr { id } => write!(f, ".Lstr_{}", id),
            Value::Reg { num, .. } => write!(f, "%{}", num),
            Value::Global { name, .. } => write!(f, "@{}", name),
            Value::FuncRef { name, .. } => write!(f, "@{}", name),
            Value::Block(id) => write!(f, "%{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert_eq!(Value::const_int(42, Type::I64).ty(), Type::I64);
        assert_eq!(Value::ConstStr { id: 0 }.ty(), Type::I8.ptr_to());
        assert_eq!(
            Value::Global { name: "ع".into(), pointee: Type::I64 }.ty(),
            Type::I64.ptr_to()
        );
    }

    #[test]
    fn test_value_queries() {
        let c = Value::const_int(7, Type::I64);
        assert!(c.is_const_int());
        assert_eq!(c.as_const_int(), Some(7));
        assert_eq!(c.as_reg(), None);

        let r = Value::reg(3, Type::I64);
        assert!(r.is_reg_num(3));
        assert!(!r.is_reg_num(4));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::const_int(-5, Type::I64).to_string(), "-5");
        assert_eq!(Value::reg(12, Type::I64).to_string(), "%12");
        assert_eq!(Value::ConstStr { id: 2 }.to_string(), ".Lstr_2");
    }
}
