//! Value types and constants for the IR.
//!
//! The type lattice is deliberately small: it captures exactly what the
//! rewriter and the optimization passes need - primitive vs. reference,
//! the nominal class of a reference, and the analysis states `Unknown`
//! (not yet inferred) and `Varying` (conflicting inference).

use std::fmt;

use crate::refs::TypeId;

/// Type of an IR value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ValueType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Double-precision float.
    Double,
    /// Any object reference with no more precise class known.
    Object,
    /// Reference of a known class.
    Class(TypeId),
    /// Known null constant, more precise than `Object`.
    Null,
    /// Type not yet inferred.
    #[default]
    Unknown,
    /// Conflicting types met during inference.
    Varying,
}

impl ValueType {
    /// Returns `true` for reference-typed values (those that can be null).
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Object | Self::Class(_) | Self::Null)
    }

    /// Returns `true` for primitive numeric values.
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Double)
    }

    /// Returns `true` if the type is not yet (or not consistently) inferred.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown | Self::Varying)
    }

    /// Merges two types at a control flow join.
    ///
    /// `Unknown` refines to the other side; `Null` merges into any reference
    /// type; two distinct classes widen to `Object`; a primitive meeting a
    /// reference is `Varying`.
    #[must_use]
    pub fn merge(&self, other: &ValueType) -> ValueType {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (Self::Unknown, t) | (t, Self::Unknown) => t.clone(),
            (Self::Null, t) | (t, Self::Null) if t.is_reference() => t.clone(),
            (a, b) if a.is_reference() && b.is_reference() => Self::Object,
            _ => Self::Varying,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Double => write!(f, "double"),
            Self::Object => write!(f, "object"),
            Self::Class(t) => write!(f, "class {t}"),
            Self::Null => write!(f, "null"),
            Self::Unknown => write!(f, "?"),
            Self::Varying => write!(f, "varying"),
        }
    }
}

/// A constant value materializable into code.
///
/// Lens prototype rewrites carry these: a removed parameter names the
/// constant callers used to pass, an appended parameter names the constant
/// call sites must now materialize.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// Integer constant.
    Number(i64),
    /// String constant.
    String(String),
    /// Null reference.
    Null,
}

impl ConstValue {
    /// The value type a materialized constant produces.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Number(_) => ValueType::Int,
            Self::String(_) => ValueType::Object,
            Self::Null => ValueType::Null,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Binary arithmetic/logic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinopKind {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
}

impl BinopKind {
    /// Folds the operator over two constant operands.
    ///
    /// Division by zero is not folded; the instruction must survive so the
    /// runtime exception is preserved.
    #[must_use]
    pub fn fold(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            Self::Add => Some(lhs.wrapping_add(rhs)),
            Self::Sub => Some(lhs.wrapping_sub(rhs)),
            Self::Mul => Some(lhs.wrapping_mul(rhs)),
            Self::Div => (rhs != 0).then(|| lhs.wrapping_div(rhs)),
            Self::And => Some(lhs & rhs),
            Self::Or => Some(lhs | rhs),
            Self::Xor => Some(lhs ^ rhs),
        }
    }
}

/// Comparison kind for conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfKind {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl IfKind {
    /// Evaluates the comparison over two constants.
    #[must_use]
    pub fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_unknown_refines() {
        assert_eq!(ValueType::Unknown.merge(&ValueType::Int), ValueType::Int);
        assert_eq!(ValueType::Int.merge(&ValueType::Unknown), ValueType::Int);
    }

    #[test]
    fn test_merge_null_into_reference() {
        let class = ValueType::Class(TypeId::new(3));
        assert_eq!(ValueType::Null.merge(&class), class);
        assert_eq!(class.merge(&ValueType::Null), class);
    }

    #[test]
    fn test_merge_distinct_classes_widen() {
        let a = ValueType::Class(TypeId::new(1));
        let b = ValueType::Class(TypeId::new(2));
        assert_eq!(a.merge(&b), ValueType::Object);
    }

    #[test]
    fn test_merge_conflict_is_varying() {
        assert_eq!(ValueType::Int.merge(&ValueType::Object), ValueType::Varying);
        assert_eq!(ValueType::Int.merge(&ValueType::Long), ValueType::Varying);
    }

    #[test]
    fn test_binop_fold() {
        assert_eq!(BinopKind::Add.fold(2, 3), Some(5));
        assert_eq!(BinopKind::Div.fold(6, 2), Some(3));
        assert_eq!(BinopKind::Div.fold(6, 0), None);
        assert_eq!(BinopKind::Xor.fold(0b1100, 0b1010), Some(0b0110));
    }

    #[test]
    fn test_if_evaluate() {
        assert!(IfKind::Eq.evaluate(4, 4));
        assert!(IfKind::Lt.evaluate(1, 2));
        assert!(!IfKind::Ge.evaluate(1, 2));
    }
}
