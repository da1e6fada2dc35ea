//! Search conditions over index fields.

use crate::error::{EngineError, EngineResult};
use docdex_codec::Value;

/// A comparison operator applied to one index field.
///
/// A closed union: the compiler matches exhaustively, so adding an
/// operator is a compile-time-checked change everywhere it matters.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    /// Field equals the operand.
    Eq(Value),
    /// Field is strictly less than the operand.
    Lt(Value),
    /// Field is less than or equal to the operand.
    Le(Value),
    /// Field is strictly greater than the operand.
    Gt(Value),
    /// Field is greater than or equal to the operand.
    Ge(Value),
    /// Field equals one member of the operand array.
    ///
    /// A non-array or empty operand compiles to a guaranteed-empty
    /// range, never an error.
    In(Value),
}

impl Comparator {
    /// Returns true for `Eq` and `In`, the membership operators.
    #[must_use]
    pub const fn is_membership(&self) -> bool {
        matches!(self, Comparator::Eq(_) | Comparator::In(_))
    }
}

/// Per-field comparison constraints for one index.
///
/// Field positions refer to the index definition's field order. Two
/// invariants hold by construction: at most one membership operator
/// (`Eq`/`In`) per field, and constrained fields form a contiguous
/// prefix by the time the condition is compiled.
#[derive(Debug, Clone, Default)]
pub struct SearchCondition {
    constraints: Vec<Vec<Comparator>>,
}

impl SearchCondition {
    /// Creates an empty condition over an index of the given arity.
    #[must_use]
    pub fn new(arity: usize) -> Self {
        Self {
            constraints: vec![Vec::new(); arity],
        }
    }

    /// Adds a comparator on the given field position.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidCondition`] if the position is out
    /// of range or the field already carries a membership operator.
    pub fn with(mut self, field: usize, comparator: Comparator) -> EngineResult<Self> {
        let arity = self.constraints.len();
        let slot = self.constraints.get_mut(field).ok_or_else(|| {
            EngineError::invalid_condition(format!(
                "field position {field} out of range for arity {arity}"
            ))
        })?;
        if comparator.is_membership() && slot.iter().any(Comparator::is_membership) {
            return Err(EngineError::invalid_condition(format!(
                "field {field} already has an equality or membership constraint"
            )));
        }
        slot.push(comparator);
        Ok(self)
    }

    /// Number of index fields this condition ranges over.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.constraints.len()
    }

    /// Comparators attached to one field position.
    #[must_use]
    pub fn comparators(&self, field: usize) -> &[Comparator] {
        self.constraints
            .get(field)
            .map_or(&[], |slot| slot.as_slice())
    }

    /// Returns true if no field is constrained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.iter().all(Vec::is_empty)
    }

    /// Checks that constrained fields form a contiguous prefix.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidCondition`] if a constrained field
    /// follows an unconstrained one.
    pub fn validate(&self) -> EngineResult<()> {
        let mut gap_at = None;
        for (position, slot) in self.constraints.iter().enumerate() {
            match (slot.is_empty(), gap_at) {
                (true, None) => gap_at = Some(position),
                (false, Some(gap)) => {
                    return Err(EngineError::invalid_condition(format!(
                        "field {position} is constrained but field {gap} is not"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_exclusive_per_field() {
        let result = SearchCondition::new(1)
            .with(0, Comparator::Eq(Value::from(1i64)))
            .unwrap()
            .with(0, Comparator::In(Value::from(vec![1i64, 2])));
        assert!(matches!(result, Err(EngineError::InvalidCondition { .. })));
    }

    #[test]
    fn range_operators_may_stack() {
        let condition = SearchCondition::new(1)
            .with(0, Comparator::Gt(Value::from(1i64)))
            .unwrap()
            .with(0, Comparator::Le(Value::from(9i64)))
            .unwrap();
        assert_eq!(condition.comparators(0).len(), 2);
    }

    #[test]
    fn out_of_range_field_is_rejected() {
        let result = SearchCondition::new(1).with(3, Comparator::Eq(Value::Null));
        assert!(result.is_err());
    }

    #[test]
    fn gap_fails_validation() {
        let condition = SearchCondition::new(3)
            .with(0, Comparator::Eq(Value::from(1i64)))
            .unwrap()
            .with(2, Comparator::Eq(Value::from(2i64)))
            .unwrap();
        assert!(condition.validate().is_err());
    }

    #[test]
    fn contiguous_prefix_validates() {
        let condition = SearchCondition::new(3)
            .with(0, Comparator::Eq(Value::from(1i64)))
            .unwrap()
            .with(1, Comparator::Lt(Value::from(2i64)))
            .unwrap();
        condition.validate().unwrap();
    }
}
