mod common;

use assert_matches::assert_matches;

use kira_wellframe::domain::{RunId, RunRef};
use kira_wellframe::error::KiraError;
use kira_wellframe::identifier::Identifier;
use kira_wellframe::query::{Expression, select};

fn refs(texts: &[&str]) -> Vec<RunRef> {
    texts.iter().map(|text| text.parse().unwrap()).collect()
}

#[test]
fn textual_refs_build_identifiers() {
    assert_matches!(
        Identifier::from_parts(refs(&["r5"]), Vec::new()).unwrap(),
        Identifier::Scalar(RunRef::Id(RunId(5)))
    );
    assert_matches!(
        Identifier::from_parts(refs(&["r5", "tag:pilot"]), Vec::new()).unwrap(),
        Identifier::Sequence(refs) if refs.len() == 2
    );
    assert_matches!(
        Identifier::from_parts(Vec::new(), Vec::new()),
        Err(KiraError::NoRuns(_))
    );
}

#[test]
fn expressions_select_records() {
    let records: Vec<_> = (1..=6).map(common::record).collect();
    let wheres: Vec<Expression> = ["plate > 2", "experiment != odd"]
        .iter()
        .map(|text| text.parse().unwrap())
        .collect();
    let selected = select(records.iter(), &wheres, common::as_of());
    let ids: Vec<RunId> = selected.iter().map(|record| record.id).collect();
    assert_eq!(ids, vec![RunId(4), RunId(6)]);
}

#[test]
fn as_of_excludes_later_runs() {
    let records: Vec<_> = (1..=6).map(common::record).collect();
    let wheres: Vec<Expression> = vec!["user == kira".parse().unwrap()];
    let cutoff = common::record(3).datetime_run;
    let selected = select(records.iter(), &wheres, cutoff);
    assert_eq!(selected.len(), 3);
}

#[test]
fn malformed_expression_is_rejected() {
    assert_matches!(
        "battery ~ 3".parse::<Expression>(),
        Err(KiraError::InvalidExpression(_))
    );
    assert_matches!(
        "colour == red".parse::<Expression>(),
        Err(KiraError::InvalidExpression(_))
    );
}
