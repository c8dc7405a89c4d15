use chrono::{DateTime, Utc};

use crate::domain::RunRef;
use crate::error::KiraError;
use crate::frame::WellFrame;
use crate::query::Expression;

/// Anything that can name a set of wells to fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    Scalar(RunRef),
    Sequence(Vec<RunRef>),
    Query(Expression),
    QuerySequence(Vec<Expression>),
    Materialized(WellFrame),
}

/// What an [`Identifier`] resolves to before any recordings are touched.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Runs(Vec<RunRef>),
    Query {
        wheres: Vec<Expression>,
        as_of: DateTime<Utc>,
    },
    PassThrough(WellFrame),
}

impl Identifier {
    /// Expression queries need `as_of`; without it the request is refused.
    pub fn resolve(self, as_of: Option<DateTime<Utc>>) -> Result<Resolution, KiraError> {
        match self {
            Identifier::Scalar(reference) => Ok(Resolution::Runs(vec![reference])),
            Identifier::Sequence(refs) => Ok(Resolution::Runs(refs)),
            Identifier::Query(expr) => Identifier::QuerySequence(vec![expr]).resolve(as_of),
            Identifier::QuerySequence(wheres) => match as_of {
                Some(as_of) => Ok(Resolution::Query { wheres, as_of }),
                None => Err(KiraError::RefusingRequest(
                    "will not fetch from flexible queries unless as_of is set".to_string(),
                )),
            },
            Identifier::Materialized(frame) => Ok(Resolution::PassThrough(frame)),
        }
    }

    /// Builds an identifier from CLI-style pieces: run references and/or expressions.
    pub fn from_parts(refs: Vec<RunRef>, wheres: Vec<Expression>) -> Result<Self, KiraError> {
        match (refs.is_empty(), wheres.is_empty()) {
            (false, true) if refs.len() == 1 => Ok(Identifier::Scalar(refs[0].clone())),
            (false, true) => Ok(Identifier::Sequence(refs)),
            (true, false) => Ok(Identifier::QuerySequence(wheres)),
            (false, false) => Err(KiraError::ContradictoryRequest(
                "supply run references or query expressions, not both".to_string(),
            )),
            (true, true) => Err(KiraError::NoRuns("no identifiers supplied".to_string())),
        }
    }
}

impl From<RunRef> for Identifier {
    fn from(reference: RunRef) -> Self {
        Identifier::Scalar(reference)
    }
}

impl From<Vec<RunRef>> for Identifier {
    fn from(refs: Vec<RunRef>) -> Self {
        Identifier::Sequence(refs)
    }
}

impl From<Expression> for Identifier {
    fn from(expr: Expression) -> Self {
        Identifier::Query(expr)
    }
}

impl From<Vec<Expression>> for Identifier {
    fn from(wheres: Vec<Expression>) -> Self {
        Identifier::QuerySequence(wheres)
    }
}

impl From<WellFrame> for Identifier {
    fn from(frame: WellFrame) -> Self {
        Identifier::Materialized(frame)
    }
}
