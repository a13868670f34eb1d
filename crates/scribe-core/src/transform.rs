//! Operation transformer for the two-writer (ASR + human) case.
//!
//! `transform(op1, op2)` re-expresses `op1` against the text that already has
//! `op2` applied. Ranges are spans of the shared base text, so an insert is a
//! point. Overlaps are settled by a user-wins policy:
//!
//! - a user edit overlapping ASR output is pushed past the contested span
//! - ASR output overlapping a user edit becomes a canonical no-op
//! - same-author operations are ordered by timestamp
//!
//! This is not a general OT/CRDT scheme. It only converges for exactly one
//! human and one ASR feed; a third writer needs a new conflict matrix.

use crate::operation::{Author, Operation};

/// Rebase `op1` onto a text that already has `op2` applied.
pub fn transform(op1: &Operation, op2: &Operation) -> Operation {
    // op1 entirely before op2
    if op1.end() <= op2.position {
        return op1.clone();
    }

    // op2 entirely before op1
    if op2.end() <= op1.position {
        return op1.shifted(op2.delta());
    }

    transform_conflict(op1, op2)
}

/// Resolve overlapping operations.
fn transform_conflict(op1: &Operation, op2: &Operation) -> Operation {
    match (op1.author, op2.author) {
        (Author::User, Author::Asr) => {
            if op2.end() <= op1.position {
                return op1.shifted(op2.delta());
            }
            if op2.position >= op1.end() {
                return op1.clone();
            }
            // Keep the user's edit verbatim, relocated past the contested span
            let conflict_end = op1.end().min(op2.end());
            op1.moved_to(conflict_end)
        }
        (Author::Asr, Author::User) => {
            if op2.end() <= op1.position {
                return op1.shifted(op2.delta());
            }
            if op2.position >= op1.end() {
                return op1.clone();
            }
            // ASR appending past the user's span still applies
            if op1.position >= op2.end() {
                return op1.shifted(op2.delta());
            }
            Operation::noop(op1.position, op1.timestamp, op1.author)
        }
        _ => {
            if op1.timestamp < op2.timestamp {
                op1.clone()
            } else {
                op1.shifted(op2.delta())
            }
        }
    }
}

/// Rebase every operation in `ops` onto a batch that has already been applied,
/// folding over `against` in order.
pub fn transform_operations(ops: &[Operation], against: &[Operation]) -> Vec<Operation> {
    transform_operations_iter(ops, against.iter())
}

/// Same as [`transform_operations`] for any ordered sequence of applied operations.
pub fn transform_operations_iter<'a>(
    ops: &[Operation],
    against: impl IntoIterator<Item = &'a Operation>,
) -> Vec<Operation> {
    let mut transformed = ops.to_vec();
    for applied in against {
        for op in transformed.iter_mut() {
            *op = transform(op, applied);
        }
    }
    transformed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::apply_operation;

    #[test]
    fn test_op_before_reference_is_unchanged() {
        let op1 = Operation::insert(0, "ab", 2, Author::Asr);
        let op2 = Operation::insert(5, "zz", 1, Author::User);
        assert_eq!(transform(&op1, &op2), op1);
    }

    #[test]
    fn test_op_after_reference_is_shifted() {
        let op1 = Operation::insert(8, "!", 2, Author::Asr);
        let op2 = Operation::delete(2, 3, 1, Author::User);
        assert_eq!(transform(&op1, &op2).position, 5);

        let op2 = Operation::insert(0, "hey ", 1, Author::User);
        assert_eq!(transform(&op1, &op2).position, 12);
    }

    #[test]
    fn test_user_precedence_under_overlap() {
        let doc = "hello";
        let user = Operation::replace(0, "hello", "hello world", 1, Author::User);
        let asr = Operation::delete(3, 2, 2, Author::Asr);

        let rebased = transform(&asr, &user);
        assert!(rebased.is_noop());

        let after_user = apply_operation(doc, &user);
        assert_eq!(apply_operation(&after_user, &rebased), "hello world");
    }

    #[test]
    fn test_user_edit_relocated_past_asr_span() {
        let user = Operation::replace(2, "cd", "XY", 2, Author::User);
        let asr = Operation::delete(3, 3, 1, Author::Asr);
        let rebased = transform(&user, &asr);
        assert_eq!(rebased.position, 4);
        assert_eq!(rebased.kind, user.kind);
    }

    #[test]
    fn test_asr_append_after_user_insert_is_shifted() {
        let user = Operation::insert(11, ", revised", 1, Author::User);
        let asr = Operation::insert(13, "second", 2, Author::Asr);
        assert_eq!(transform(&asr, &user).position, 22);
    }

    #[test]
    fn test_asr_inside_user_delete_is_dropped() {
        let user = Operation::delete(2, 5, 1, Author::User);
        let asr = Operation::insert(4, "zz", 2, Author::Asr);
        assert!(transform(&asr, &user).is_noop());
    }

    #[test]
    fn test_same_author_ordered_by_timestamp() {
        let earlier = Operation::insert(2, "ab", 1, Author::User);
        let later = Operation::insert(3, "cd", 2, Author::User);

        assert_eq!(transform(&earlier, &later), earlier);
        assert_eq!(transform(&later, &earlier).position, 5);
    }

    #[test]
    fn test_non_overlapping_ops_commute() {
        let doc = "the quick brown fox";
        let op1 = Operation::insert(19, " jumps", 2, Author::Asr);
        let op2 = Operation::delete(4, 6, 1, Author::User);

        let a = apply_operation(&apply_operation(doc, &op2), &transform(&op1, &op2));
        let b = apply_operation(&apply_operation(doc, &op1), &transform(&op2, &op1));
        assert_eq!(a, b);
        assert_eq!(a, "the brown fox jumps");
    }

    #[test]
    fn test_transform_operations_folds_in_order() {
        let asr = vec![Operation::insert(5, " there", 3, Author::Asr)];
        let users = vec![
            Operation::insert(0, ">> ", 1, Author::User),
            Operation::insert(0, "# ", 2, Author::User),
        ];
        let rebased = transform_operations(&asr, &users);
        assert_eq!(rebased[0].position, 10);
    }
}
