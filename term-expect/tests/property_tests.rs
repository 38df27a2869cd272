//! Property-based tests for filter safety, batch alias ordering and
//! identifier uniqueness.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use term_expect::error::ExpectError;
use term_expect::metrics::{BatchCompiler, MetricRegistry, MetricRequest};
use term_expect::sql::{filter, Dialect};
use term_expect::validators::{combine_filters, RuntimeId};

const METRICS: [&str; 8] = [
    "null_pct",
    "distinct_cnt",
    "min",
    "max",
    "avg",
    "non_null_cnt",
    "duplicate_cnt",
    "pct_50",
];

const VERBS: [&str; 9] = [
    "create", "alter", "drop", "insert", "update", "delete", "merge", "grant", "revoke",
];

fn compiler() -> BatchCompiler {
    BatchCompiler::new(Arc::new(MetricRegistry::with_builtins()))
}

fn dialect() -> impl Strategy<Value = Dialect> {
    prop::sample::select(Dialect::ALL.to_vec())
}

/// Mixed-case spelling of `word`, driven by `mask`.
fn scramble_case(word: &str, mask: u32) -> String {
    word.chars()
        .enumerate()
        .map(|(i, c)| {
            if mask & (1 << (i % 32)) != 0 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_statement_separator_always_rejected(
        left in "[a-z]{1,8} = [0-9]{1,4}",
        right in "[ -~]{0,20}",
        dialect in dialect(),
    ) {
        let predicate = format!("{left}; {right}");
        prop_assert!(matches!(
            filter::validate_for(&predicate, dialect),
            Err(ExpectError::ValidationConfig(_))
        ));
    }

    #[test]
    fn prop_ddl_verbs_rejected_regardless_of_case(
        verb in prop::sample::select(VERBS.to_vec()),
        mask in any::<u32>(),
        column in "[a-z]{1,8}",
        value in 0i64..1000,
        padding in "[ \t\n]{1,3}",
    ) {
        let predicate = format!("{column} = {value} OR{padding}{} x", scramble_case(verb, mask));
        prop_assert!(matches!(
            filter::validate(&predicate),
            Err(ExpectError::ValidationConfig(_))
        ));
    }

    #[test]
    fn prop_simple_comparisons_accepted(
        column in "[a-z][a-z0-9_]{0,10}",
        op in prop::sample::select(vec!["=", "<>", "<", "<=", ">", ">="]),
        value in -1000i64..1000,
        dialect in dialect(),
    ) {
        let predicate = format!("\"{column}\" {op} {value}");
        prop_assert!(filter::validate_for(&predicate, dialect).is_ok());
    }

    #[test]
    fn prop_aliases_follow_request_order(
        picks in prop::collection::vec((0usize..METRICS.len(), "[a-z]{1,6}"), 1..12),
        dialect in dialect(),
    ) {
        let requests: Vec<MetricRequest> = picks
            .iter()
            .enumerate()
            .map(|(i, (metric, column))| {
                MetricRequest::new(column.as_str(), METRICS[*metric], format!("v{i}"))
            })
            .collect();
        let query = compiler().compile("t", &requests, dialect).unwrap();

        let expected: Vec<String> = (0..requests.len()).map(|i| format!("v{i}")).collect();
        prop_assert_eq!(query.aliases(), expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn prop_combined_filter_keeps_both_conditions(
        where_value in 0i64..100,
        cond_value in 0i64..100,
    ) {
        let where_condition = format!("a = {where_value}");
        let condition = format!("b > {cond_value}");
        let combined = combine_filters(Some(where_condition.as_str()), &condition);
        prop_assert_eq!(&combined, &format!("({where_condition}) AND ({condition})"));
        prop_assert!(filter::validate(&combined).is_ok());
    }
}

#[test]
fn test_runtime_ids_unique_at_one_million() {
    let ids: HashSet<String> = (0..1_000_000)
        .map(|_| RuntimeId::generate().as_str().to_string())
        .collect();
    assert_eq!(ids.len(), 1_000_000);
}

#[test]
fn test_runtime_id_is_valid_alias() {
    let id = RuntimeId::generate();
    assert!(id.as_str().starts_with('v'));
    assert_eq!(id.as_str().len(), 33);
    let request = MetricRequest::new("a", "max", id.as_str());
    let sql = compiler()
        .compile_sql("t", &[request], Dialect::Postgres)
        .unwrap();
    assert!(sql.contains(&format!("AS \"{}\"", id.as_str())));
}
