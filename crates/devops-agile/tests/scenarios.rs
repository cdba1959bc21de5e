use chrono::NaiveDate;
use devops_agile::{
    AggFunc, Agile, AgileError, BinaryOp, Combine, DataFrame, FilterSpec, JoinType, NullKind,
    Reference, Scalar, io,
};
use proptest::prelude::*;
use serde_json::json;

fn agile() -> Agile {
    Agile::with_reference_date(NaiveDate::from_ymd_opt(2024, 3, 31).expect("today"))
}

fn records(value: serde_json::Value) -> DataFrame {
    io::read_json_records(&value.to_string()).expect("records")
}

#[test]
fn bug_lead_time_averages_day_difference() {
    let frame = records(json!([
        {"Id": 1, "WorkItemType": "Bug", "ClosedDate": "2024-01-10", "CreatedDate": "2024-01-01"}
    ]));
    let filters = FilterSpec::from_json(&json!({"WorkItemType": "Bug"})).expect("filters");

    let engine = agile();
    let detail = engine.filter(&frame, &filters, &[]).expect("filter");
    assert_eq!(detail, frame);

    let out = engine
        .reduce(
            &detail,
            &Reference::date_diff_days("ClosedDate", "CreatedDate"),
            &[],
            AggFunc::Mean,
            "avg_out",
        )
        .expect("reduce");

    assert_eq!(out.aggregated.column_names(), &["avg_out".to_owned()]);
    assert_eq!(out.aggregated.len(), 1);
    assert_eq!(out.aggregated.value("avg_out", 0), Some(&Scalar::Float64(9.0)));
    assert_eq!(out.detail.value("avg_out", 0), Some(&Scalar::Int64(9)));
}

#[test]
fn negated_state_keeps_every_other_state() {
    let frame = records(json!([
        {"Id": 1, "State": "Done"},
        {"Id": 2, "State": "Removed"},
        {"Id": 3, "State": "Active"}
    ]));
    let filters = FilterSpec::from_json(&json!({"State": "<>Removed"})).expect("filters");
    let out = agile().filter(&frame, &filters, &[]).expect("filter");

    assert_eq!(
        out.column("State").expect("State").values(),
        &[Scalar::from("Done"), Scalar::from("Active")]
    );
}

#[test]
fn true_division_by_zero_yields_null() {
    let left = records(json!([{"K": "A", "V": 10}]));
    let right = records(json!([{"K": "A", "V": 0}]));
    let request = Combine::new("K", "K", JoinType::Inner, BinaryOp::Divide)
        .operands("V", "V")
        .output("out");

    let out = agile().combine(&left, &right, &request).expect("combine");
    assert_eq!(out.len(), 1);
    assert_eq!(out.value("K", 0), Some(&Scalar::from("A")));
    assert!(out.value("out", 0).expect("out").is_missing());
}

#[test]
fn null_divisor_and_unmatched_rows_yield_null() {
    let left = records(json!([{"K": "A", "V": 10}, {"K": "B", "V": 3}]));
    let right = records(json!([{"K": "A", "W": null}]));
    let request = Combine::new("K", "K", JoinType::Left, BinaryOp::FloorDivide)
        .operands("V", "W")
        .output("out");

    let out = agile().combine(&left, &right, &request).expect("combine");
    assert!(out.value("out", 0).expect("null divisor").is_missing());
    assert!(out.value("out", 1).expect("unmatched").is_missing());
}

#[test]
fn single_frame_join_is_unchanged() {
    let frame = records(json!([{"IterationPath": "S1", "Items": 4}]));
    let out = agile()
        .multiple_join(std::slice::from_ref(&frame), "IterationPath")
        .expect("join");
    assert_eq!(out, frame);

    let err = agile().multiple_join(&[], "IterationPath").expect_err("empty");
    assert!(matches!(err, AgileError::NothingToJoin));
}

#[test]
fn empty_group_by_always_yields_one_row() {
    let frame = records(json!([
        {"Effort": 3, "State": "Done"},
        {"Effort": 5, "State": "Active"}
    ]));
    for func in [AggFunc::Mean, AggFunc::Count, AggFunc::Sum, AggFunc::Min, AggFunc::Max] {
        let out = agile()
            .reduce(&frame, &Reference::column("Effort"), &[], func, "out")
            .expect("reduce");
        assert_eq!(out.aggregated.len(), 1, "{func:?}");
    }
}

#[test]
fn count_only_reports_groups_with_surviving_rows() {
    let frame = records(json!([
        {"IterationPath": "S1", "State": "Done", "Id": 1},
        {"IterationPath": "S1", "State": "Removed", "Id": 2},
        {"IterationPath": "S2", "State": "Removed", "Id": 3},
        {"IterationPath": "S3", "State": "Done", "Id": null}
    ]));
    let filters = FilterSpec::new().excludes("State", "Removed");
    let detail = agile().filter(&frame, &filters, &[]).expect("filter");
    let out = agile()
        .reduce(&detail, &Reference::column("Id"), &["IterationPath"], AggFunc::Count, "n")
        .expect("count");

    assert_eq!(
        out.aggregated.column("IterationPath").expect("keys").values(),
        &[Scalar::from("S1"), Scalar::from("S3")]
    );
    assert_eq!(
        out.aggregated.column("n").expect("n").values(),
        &[Scalar::Int64(1), Scalar::Int64(0)]
    );
}

#[test]
fn malformed_filters_fail_fast() {
    for filters in [
        json!({"State": "<>"}),
        json!({"State": ["<>Removed", "Done"]}),
        json!({"State": []}),
        json!({"State": null}),
    ] {
        let err = FilterSpec::from_json(&filters).expect_err("malformed");
        assert!(matches!(err, AgileError::InvalidFilter(_)), "{filters}");
    }

    let frame = records(json!([{"State": "Done"}]));
    let err = agile()
        .filter(&frame, &FilterSpec::new().equals("Sprint", "S1"), &[])
        .expect_err("schema");
    assert!(matches!(err, AgileError::Schema { column } if column == "Sprint"));
}

proptest! {
    #[test]
    fn left_combine_preserves_left_rows_for_unique_right_keys(
        left_keys in proptest::collection::vec(0_i64..6, 0..16),
        right_keys in proptest::collection::btree_set(0_i64..6, 0..6),
    ) {
        let left = DataFrame::from_records(
            &["K", "Done"],
            left_keys.iter().map(|k| vec![Scalar::Int64(*k), Scalar::Int64(k + 1)]).collect(),
        )
        .expect("left");
        let right = DataFrame::from_records(
            &["K", "Planned"],
            right_keys.iter().map(|k| vec![Scalar::Int64(*k), Scalar::Int64(*k)]).collect(),
        )
        .expect("right");

        let request = Combine::new("K", "K", JoinType::Left, BinaryOp::Divide)
            .operands("Done", "Planned")
            .output("ratio");
        let out = agile().combine(&left, &right, &request).expect("combine");

        prop_assert_eq!(out.len(), left.len());
        for row in 0..out.len() {
            let key = out.value("K", row).cloned().unwrap_or(Scalar::Null(NullKind::Null));
            let matched = matches!(key, Scalar::Int64(k) if right_keys.contains(&k) && k != 0);
            prop_assert_eq!(!out.value("ratio", row).expect("ratio").is_missing(), matched);
        }
    }
}
