//! Compiles search conditions into index key ranges.

use crate::condition::{Comparator, SearchCondition};
use crate::definition::IndexDefinition;
use crate::error::EngineResult;
use crate::types::ScanDirection;
use docdex_codec::{encode_bounds, entry_prefix, KeyBounds, Value};

/// Shape of a compiled condition's range sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFormat {
    /// One range per concrete equality tuple, no IN-list involved.
    EqualityOnly,
    /// A single two-sided range per equality prefix.
    OperatorsAndValues,
    /// Multiple equality ranges produced by IN-list expansion.
    InExpansion,
}

/// One key range emitted by the compiler.
#[derive(Debug, Clone)]
pub struct CompiledRange {
    /// Half-open key range over the substrate.
    pub bounds: KeyBounds,
    /// The concrete equality tuple when this range is a pure equality
    /// instantiation; used as the lookup-cache key.
    pub equality: Option<Vec<Value>>,
}

/// The compiler's output: an ordered range sequence.
///
/// Order matters; ranges are emitted in the requested scan direction so
/// callers can consume them front to back.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    /// Shape of the range sequence.
    pub format: RangeFormat,
    /// Ranges in consumption order.
    pub ranges: Vec<CompiledRange>,
}

impl CompiledCondition {
    /// Returns true if no range can match any entry.
    #[must_use]
    pub fn is_guaranteed_empty(&self) -> bool {
        self.ranges.iter().all(|range| range.bounds.is_empty())
    }
}

/// One resolved equality-prefix term: a fixed value or an IN-list's
/// candidate values.
enum PrefixTerm {
    Single(Value),
    Choices(Vec<Value>),
}

/// The range constraint resolved for the stop field.
#[derive(Default)]
struct StopRange {
    lower: Option<(Value, bool)>,
    upper: Option<(Value, bool)>,
}

/// Compiles a condition into the ordered ranges an index scan executes.
///
/// Walks index fields left to right, accumulating an equality prefix
/// while each field carries exactly one membership constraint, then
/// combines at most one lower and one upper operator on the first field
/// that breaks the walk. IN-lists explode into the cross product of
/// their candidate values; the caller is responsible for bounding the
/// product before compiling.
///
/// # Errors
///
/// Returns an error if the condition is structurally invalid or a
/// boundary value cannot be encoded. An IN-list with a non-array or
/// empty operand is not an error; it compiles to a guaranteed-empty
/// range.
pub fn compile(
    definition: &IndexDefinition,
    condition: &SearchCondition,
    direction: ScanDirection,
) -> EngineResult<CompiledCondition> {
    condition.validate()?;

    let kind = definition.kind();
    let index_id = definition.id.as_u64();

    let mut prefix: Vec<PrefixTerm> = Vec::new();
    let mut stop: Option<StopRange> = None;
    let mut saw_in = false;

    for field in 0..definition.arity() {
        let comparators = condition.comparators(field);
        if comparators.is_empty() {
            break;
        }

        // Membership beats any range operator on the same field.
        let membership = comparators.iter().find(|c| c.is_membership());
        match membership {
            Some(Comparator::Eq(value)) => {
                let resolved_by_tie_break = comparators.len() > 1;
                prefix.push(PrefixTerm::Single(value.clone()));
                if resolved_by_tie_break {
                    break;
                }
            }
            Some(Comparator::In(operand)) => {
                let resolved_by_tie_break = comparators.len() > 1;
                match in_candidates(operand, direction) {
                    Some(choices) => {
                        saw_in = true;
                        prefix.push(PrefixTerm::Choices(choices));
                    }
                    // Zero or non-array candidates match nothing.
                    None => return Ok(guaranteed_empty(definition, saw_in)),
                }
                if resolved_by_tie_break {
                    break;
                }
            }
            _ => {
                stop = Some(resolve_stop_range(comparators));
                break;
            }
        }
    }

    // Nothing constrains the scan: one full-index range.
    if prefix.is_empty() && stop.is_none() {
        return Ok(CompiledCondition {
            format: RangeFormat::OperatorsAndValues,
            ranges: vec![CompiledRange {
                bounds: KeyBounds::full_range(kind, index_id),
                equality: None,
            }],
        });
    }

    let combos = expand_prefix(&prefix);

    let mut ranges = Vec::with_capacity(combos.len());
    let format = match stop {
        Some(range) => {
            for combo in combos {
                let mut low = combo.clone();
                let mut low_inclusive = true;
                if let Some((value, inclusive)) = &range.lower {
                    low.push(value.clone());
                    low_inclusive = *inclusive;
                }
                let mut high = combo;
                let mut high_inclusive = true;
                if let Some((value, inclusive)) = &range.upper {
                    high.push(value.clone());
                    high_inclusive = *inclusive;
                }
                let bounds = encode_bounds(
                    kind,
                    index_id,
                    &low,
                    low_inclusive,
                    &high,
                    high_inclusive,
                )?;
                ranges.push(CompiledRange {
                    bounds,
                    equality: None,
                });
            }
            RangeFormat::OperatorsAndValues
        }
        None => {
            for combo in combos {
                let bounds = encode_bounds(kind, index_id, &combo, true, &combo, true)?;
                ranges.push(CompiledRange {
                    bounds,
                    equality: Some(combo),
                });
            }
            if saw_in {
                RangeFormat::InExpansion
            } else {
                RangeFormat::EqualityOnly
            }
        }
    };

    Ok(CompiledCondition { format, ranges })
}

/// Sorted, de-duplicated IN-list candidates in consumption order.
///
/// Returns `None` for a non-array or empty operand.
fn in_candidates(operand: &Value, direction: ScanDirection) -> Option<Vec<Value>> {
    let members = operand.as_array()?;
    if members.is_empty() {
        return None;
    }
    let mut choices = members.to_vec();
    choices.sort();
    choices.dedup();
    if direction.is_reverse() {
        choices.reverse();
    }
    Some(choices)
}

/// Combines the stop field's operators into at most one lower and one
/// upper bound. The first operator retained on a side wins; later
/// operators of the same side are redundant and discarded.
fn resolve_stop_range(comparators: &[Comparator]) -> StopRange {
    let mut range = StopRange::default();
    for comparator in comparators {
        match comparator {
            Comparator::Gt(value) => {
                if range.lower.is_none() {
                    range.lower = Some((value.clone(), false));
                }
            }
            Comparator::Ge(value) => {
                if range.lower.is_none() {
                    range.lower = Some((value.clone(), true));
                }
            }
            Comparator::Lt(value) => {
                if range.upper.is_none() {
                    range.upper = Some((value.clone(), false));
                }
            }
            Comparator::Le(value) => {
                if range.upper.is_none() {
                    range.upper = Some((value.clone(), true));
                }
            }
            Comparator::Eq(_) | Comparator::In(_) => {}
        }
    }
    range
}

/// Cross product of the equality prefix in consumption order.
///
/// Choice lists are already ordered for the scan direction, so the
/// nested product comes out in consumption order as well.
fn expand_prefix(prefix: &[PrefixTerm]) -> Vec<Vec<Value>> {
    let mut combos: Vec<Vec<Value>> = vec![Vec::with_capacity(prefix.len())];
    for term in prefix {
        match term {
            PrefixTerm::Single(value) => {
                for combo in &mut combos {
                    combo.push(value.clone());
                }
            }
            PrefixTerm::Choices(choices) => {
                let mut expanded = Vec::with_capacity(combos.len() * choices.len());
                for combo in combos {
                    for choice in choices {
                        let mut next = combo.clone();
                        next.push(choice.clone());
                        expanded.push(next);
                    }
                }
                combos = expanded;
            }
        }
    }
    combos
}

/// A single range that matches nothing, for IN-lists with no candidates.
fn guaranteed_empty(definition: &IndexDefinition, saw_in: bool) -> CompiledCondition {
    let prefix = entry_prefix(definition.kind(), definition.id.as_u64()).to_vec();
    let format = if saw_in {
        RangeFormat::InExpansion
    } else {
        RangeFormat::EqualityOnly
    };
    CompiledCondition {
        format,
        ranges: vec![CompiledRange {
            bounds: KeyBounds::new(prefix.clone(), prefix),
            equality: None,
        }],
    }
}
