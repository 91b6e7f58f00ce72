use crate::dap::protocol::{FunctionBreakpoint, SourceBreakpoint};
use crate::models::BreakPoint;

/// One row of a reconciliation plan: a desired breakpoint, and the current
/// gdb breakpoint it can keep using, if any.
#[derive(Debug)]
pub struct PlanEntry<'d, 'c, D, C> {
    pub desired: &'d D,
    pub matched: Option<&'c C>,
}

#[derive(Debug)]
pub struct ReconcilePlan<'d, 'c, D, C> {
    /// In `desired` order
    pub plan: Vec<PlanEntry<'d, 'c, D, C>>,
    /// Current entries no desired entry claimed
    pub deletes: Vec<&'c C>,
}

/// Diff a client-declared breakpoint set against gdb's current table.
///
/// Each desired entry claims the first current entry the predicate accepts;
/// a current entry is claimed at most once. Unclaimed current entries are
/// scheduled for deletion. Applying the plan (deletes first, then inserting
/// the unmatched desired entries) and reconciling again yields an empty
/// plan, so repeated setBreakpoints requests leave untouched breakpoints
/// alone.
pub fn reconcile<'d, 'c, D, C>(
    desired: &'d [D],
    current: &'c [C],
    matches: impl Fn(&D, &C) -> bool,
) -> ReconcilePlan<'d, 'c, D, C> {
    let mut claimed = vec![false; current.len()];
    let plan = desired
        .iter()
        .map(|want| {
            let matched = current.iter().enumerate().find_map(|(index, have)| {
                if !claimed[index] && matches(want, have) {
                    claimed[index] = true;
                    Some(have)
                } else {
                    None
                }
            });
            PlanEntry {
                desired: want,
                matched,
            }
        })
        .collect();
    let deletes = current
        .iter()
        .zip(&claimed)
        .filter_map(|(have, taken)| (!taken).then_some(have))
        .collect();
    ReconcilePlan { plan, deletes }
}

fn normalize_condition(condition: Option<&str>) -> Option<&str> {
    match condition {
        Some("") | None => None,
        other => other,
    }
}

/// Whether a gdb breakpoint row takes part in source reconciliation for
/// `file`: top-level rows only (children carry a `major.minor` number),
/// located in this file, and not one of our function breakpoints.
pub fn is_source_candidate(
    file: &str,
    breakpoint: &BreakPoint,
    function_numbers: &std::collections::HashSet<u64>,
) -> bool {
    if breakpoint.number.is_child() || function_numbers.contains(&breakpoint.number.major) {
        return false;
    }
    match breakpoint.original_location.as_deref() {
        Some(location) => {
            location.starts_with(&format!("-source {} ", file))
                || location.starts_with(&format!("{}:", file))
        }
        None => false,
    }
}

/// Whether a desired source breakpoint can reuse a current gdb breakpoint:
/// same location, same condition, and no hit condition (hit conditions map
/// to ignore counts gdb cannot report back, so they always reinsert).
pub fn source_breakpoint_matches(
    file: &str,
    desired: &SourceBreakpoint,
    current: &BreakPoint,
) -> bool {
    if desired.hit_condition.is_some() {
        return false;
    }
    let location_matches = match current.original_location.as_deref() {
        // gdb >= 8.1 echoes the explicit location, older gdb the linespec
        Some(location) => {
            location == format!("-source {} -line {}", file, desired.line)
                || location == format!("{}:{}", file, desired.line)
        }
        None => false,
    };
    location_matches
        && normalize_condition(desired.condition.as_deref())
            == normalize_condition(current.cond.as_deref())
}

pub fn is_function_candidate(
    breakpoint: &BreakPoint,
    function_numbers: &std::collections::HashSet<u64>,
) -> bool {
    !breakpoint.number.is_child() && function_numbers.contains(&breakpoint.number.major)
}

pub fn function_breakpoint_matches(desired: &FunctionBreakpoint, current: &BreakPoint) -> bool {
    if desired.hit_condition.is_some() {
        return false;
    }
    let location_matches = match current.original_location.as_deref() {
        Some(location) => {
            location == desired.name || location == format!("-function {}", desired.name)
        }
        None => false,
    };
    location_matches
        && normalize_condition(desired.condition.as_deref())
            == normalize_condition(current.cond.as_deref())
}

/// How a DAP hit condition translates to gdb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitCondition {
    pub ignore_count: u64,
    /// One-shot: stop once on the Nth hit and delete. `>N` breakpoints keep
    /// firing after the threshold instead.
    pub temporary: bool,
}

/// `"N"` stops exactly once, on the Nth hit (ignore N-1, temporary).
/// `">N"` stops from the (N+1)th hit on (ignore N, permanent).
/// A hit count of zero has no meaning on either reading.
pub fn parse_hit_condition(condition: &str) -> Result<HitCondition, String> {
    let trimmed = condition.trim();
    if let Some(tail) = trimmed.strip_prefix('>') {
        let count = tail
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("unsupported hit condition: {}", condition))?;
        Ok(HitCondition {
            ignore_count: count,
            temporary: false,
        })
    } else {
        let count = trimmed
            .parse::<u64>()
            .map_err(|_| format!("unsupported hit condition: {}", condition))?;
        if count == 0 {
            return Err(format!("hit count must be positive: {}", condition));
        }
        Ok(HitCondition {
            ignore_count: count - 1,
            temporary: true,
        })
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;
    use crate::mi::output::Output;

    fn gdb_breakpoint(number: &str, original_location: &str, cond: Option<&str>) -> BreakPoint {
        let cond = match cond {
            Some(c) => format!(",cond=\"{}\"", c),
            None => String::new(),
        };
        let line = format!(
            "^done,bkpt={{number=\"{}\",type=\"breakpoint\",disp=\"keep\",enabled=\"y\",\
             addr=\"0x1000\",times=\"0\",original-location=\"{}\"{}}}\n",
            number, original_location, cond
        );
        let Output::Result(record) = Output::parse(&line).unwrap() else {
            panic!("expected result record");
        };
        serde_json::from_value(record.results["bkpt"].clone()).unwrap()
    }

    fn wanted(line: u32, condition: Option<&str>, hit: Option<&str>) -> SourceBreakpoint {
        SourceBreakpoint {
            line,
            condition: condition.map(|c| c.to_string()),
            hit_condition: hit.map(|h| h.to_string()),
            log_message: None,
        }
    }

    #[test]
    fn test_reconcile_preserves_order_and_claims_once() {
        let desired = ["a", "a", "b"];
        let current = ["a", "c"];
        let result = reconcile(&desired, &current, |d, c| d == c);

        assert_eq!(result.plan.len(), 3);
        assert_eq!(result.plan[0].matched, Some(&"a"));
        // the single current "a" was already claimed
        assert_eq!(result.plan[1].matched, None);
        assert_eq!(result.plan[2].matched, None);
        assert_eq!(result.deletes, vec![&"c"]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let desired = [3u32, 7];
        let current = [7u32, 5];
        let first = reconcile(&desired, &current, |d, c| d == c);
        assert_eq!(first.deletes, vec![&5]);

        // apply: delete the unmatched current, insert the unmatched desired
        let mut applied: Vec<u32> = current
            .iter()
            .filter(|c| !first.deletes.contains(c))
            .copied()
            .collect();
        applied.extend(
            first
                .plan
                .iter()
                .filter(|entry| entry.matched.is_none())
                .map(|entry| *entry.desired),
        );

        let second = reconcile(&desired, &applied, |d, c| d == c);
        assert!(second.deletes.is_empty());
        assert!(second.plan.iter().all(|entry| entry.matched.is_some()));
    }

    #[test]
    fn test_source_match_location_forms() {
        let modern = gdb_breakpoint("1", "-source /tmp/empty.c -line 3", None);
        let legacy = gdb_breakpoint("2", "/tmp/empty.c:3", None);
        let want = wanted(3, None, None);
        assert!(source_breakpoint_matches("/tmp/empty.c", &want, &modern));
        assert!(source_breakpoint_matches("/tmp/empty.c", &want, &legacy));
        assert!(!source_breakpoint_matches(
            "/tmp/empty.c",
            &wanted(4, None, None),
            &modern
        ));
    }

    #[test]
    fn test_source_match_condition() {
        let plain = gdb_breakpoint("1", "-source /tmp/empty.c -line 3", None);
        let guarded = gdb_breakpoint("2", "-source /tmp/empty.c -line 3", Some("i == 3"));
        assert!(!source_breakpoint_matches(
            "/tmp/empty.c",
            &wanted(3, Some("i == 3"), None),
            &plain
        ));
        assert!(source_breakpoint_matches(
            "/tmp/empty.c",
            &wanted(3, Some("i == 3"), None),
            &guarded
        ));
        // empty condition is the same as no condition
        assert!(source_breakpoint_matches(
            "/tmp/empty.c",
            &wanted(3, Some(""), None),
            &plain
        ));
    }

    #[test]
    fn test_hit_condition_never_matches() {
        let current = gdb_breakpoint("1", "-source /tmp/empty.c -line 3", None);
        assert!(!source_breakpoint_matches(
            "/tmp/empty.c",
            &wanted(3, None, Some("3")),
            &current
        ));
    }

    #[test]
    fn test_source_candidate_filter() {
        let mut functions = HashSet::new();
        functions.insert(4u64);
        let ours = gdb_breakpoint("1", "-source /tmp/empty.c -line 3", None);
        let child = gdb_breakpoint("1.1", "-source /tmp/empty.c -line 3", None);
        let other_file = gdb_breakpoint("2", "-source /tmp/other.c -line 3", None);
        let function = gdb_breakpoint("4", "main", None);

        assert!(is_source_candidate("/tmp/empty.c", &ours, &functions));
        assert!(!is_source_candidate("/tmp/empty.c", &child, &functions));
        assert!(!is_source_candidate("/tmp/empty.c", &other_file, &functions));
        assert!(!is_source_candidate("/tmp/empty.c", &function, &functions));
        assert!(is_function_candidate(&function, &functions));
        assert!(!is_function_candidate(&ours, &functions));
    }

    #[test]
    fn test_parse_hit_condition() {
        assert_eq!(
            parse_hit_condition("3"),
            Ok(HitCondition {
                ignore_count: 2,
                temporary: true
            })
        );
        assert_eq!(
            parse_hit_condition("> 5"),
            Ok(HitCondition {
                ignore_count: 5,
                temporary: false
            })
        );
        assert_eq!(
            parse_hit_condition("1"),
            Ok(HitCondition {
                ignore_count: 0,
                temporary: true
            })
        );
        assert!(parse_hit_condition("0").is_err());
        assert!(parse_hit_condition("% 2").is_err());
        assert!(parse_hit_condition("").is_err());
    }
}
