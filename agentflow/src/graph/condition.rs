//! Guard composition for `if`/`elseif`/`else`
//!
//! Each branch is guarded by its own condition conjoined with the negation of
//! every earlier condition, so at most one partition can fire no matter how the
//! conditions overlap.

/// One branch of a conditional block in document order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch<'a> {
    /// Leading `if` condition
    If(&'a str),
    /// `elseif` condition
    ElseIf(&'a str),
    /// Trailing `else`
    Else,
}

impl<'a> Branch<'a> {
    fn condition(&self) -> Option<&'a str> {
        match self {
            Branch::If(cond) | Branch::ElseIf(cond) => Some(cond),
            Branch::Else => None,
        }
    }
}

/// Guard for every branch, in the same order
///
/// - `if`: the condition as written
/// - `elseif`: `(cond) && !(prior1) && !(prior2) ...`
/// - `else`: `true && !(prior1) && !(prior2) ...`
pub fn compose_branch_guards(branches: &[Branch<'_>]) -> Vec<String> {
    let mut prior: Vec<&str> = Vec::new();
    let mut guards = Vec::with_capacity(branches.len());

    for branch in branches {
        let guard = match branch {
            Branch::If(cond) => cond.to_string(),
            Branch::ElseIf(cond) => negate_prior(format!("({cond})"), &prior),
            Branch::Else => negate_prior("true".to_string(), &prior),
        };
        guards.push(guard);
        if let Some(cond) = branch.condition() {
            prior.push(cond);
        }
    }

    guards
}

fn negate_prior(mut guard: String, prior: &[&str]) -> String {
    for cond in prior {
        guard.push_str(&format!(" && !({cond})"));
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_else() {
        let guards = compose_branch_guards(&[Branch::If("x==10"), Branch::Else]);
        assert_eq!(guards, vec!["x==10", "true && !(x==10)"]);
    }

    #[test]
    fn test_elseif_chain() {
        let guards = compose_branch_guards(&[
            Branch::If("a"),
            Branch::ElseIf("b"),
            Branch::ElseIf("c"),
            Branch::Else,
        ]);
        assert_eq!(
            guards,
            vec![
                "a",
                "(b) && !(a)",
                "(c) && !(a) && !(b)",
                "true && !(a) && !(b) && !(c)",
            ]
        );
    }

    #[test]
    fn test_single_if() {
        assert_eq!(compose_branch_guards(&[Branch::If("ready")]), vec!["ready"]);
    }
}
