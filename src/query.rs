use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::RunId;
use crate::error::KiraError;

static EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([a-z_]+)\s*(==|!=|<=|>=|<|>)\s*(.+?)\s*$").unwrap());

/// A run joined with its experiment, project, battery, submission, station, user and plate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub submission: Option<String>,
    pub experiment: String,
    pub project: String,
    #[serde(default)]
    pub project_type: Option<String>,
    pub battery_id: u32,
    pub battery_name: String,
    pub station: u32,
    pub user: String,
    pub plate: u32,
    pub datetime_run: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Run,
    Name,
    Tag,
    Submission,
    Experiment,
    Project,
    ProjectType,
    Battery,
    BatteryName,
    Station,
    User,
    Plate,
}

impl Field {
    fn value_of(self, record: &RunRecord) -> Option<String> {
        match self {
            Field::Run => Some(record.id.get().to_string()),
            Field::Name => Some(record.name.clone()),
            Field::Tag => record.tag.clone(),
            Field::Submission => record.submission.clone(),
            Field::Experiment => Some(record.experiment.clone()),
            Field::Project => Some(record.project.clone()),
            Field::ProjectType => record.project_type.clone(),
            Field::Battery => Some(record.battery_id.to_string()),
            Field::BatteryName => Some(record.battery_name.clone()),
            Field::Station => Some(record.station.to_string()),
            Field::User => Some(record.user.clone()),
            Field::Plate => Some(record.plate.to_string()),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Field::Run => "run",
            Field::Name => "name",
            Field::Tag => "tag",
            Field::Submission => "submission",
            Field::Experiment => "experiment",
            Field::Project => "project",
            Field::ProjectType => "project_type",
            Field::Battery => "battery",
            Field::BatteryName => "battery_name",
            Field::Station => "station",
            Field::User => "user",
            Field::Plate => "plate",
        }
    }
}

impl FromStr for Field {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let field = match value {
            "run" | "id" => Field::Run,
            "name" => Field::Name,
            "tag" => Field::Tag,
            "submission" => Field::Submission,
            "experiment" => Field::Experiment,
            "project" => Field::Project,
            "project_type" => Field::ProjectType,
            "battery" => Field::Battery,
            "battery_name" => Field::BatteryName,
            "station" | "sauron" => Field::Station,
            "user" => Field::User,
            "plate" => Field::Plate,
            _ => return Err(KiraError::InvalidExpression(format!("unknown field {value}"))),
        };
        Ok(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
        }
    }
}

/// A predicate over joined run records, such as `battery == 12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expression {
    pub field: Field,
    pub op: Op,
    pub value: String,
}

impl Expression {
    pub fn new(field: Field, op: Op, value: impl Into<String>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }

    /// Numeric comparison when both sides are integers; string comparison otherwise.
    /// A missing optional field never matches.
    pub fn matches(&self, record: &RunRecord) -> bool {
        let Some(actual) = self.field.value_of(record) else {
            return false;
        };
        let ordering = match (actual.parse::<i64>(), self.value.parse::<i64>()) {
            (Ok(lhs), Ok(rhs)) => lhs.cmp(&rhs),
            _ => actual.as_str().cmp(self.value.as_str()),
        };
        self.op.accepts(ordering)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field.as_str(), self.op.as_str(), self.value)
    }
}

impl FromStr for Expression {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let caps = EXPRESSION
            .captures(value)
            .ok_or_else(|| KiraError::InvalidExpression(value.to_string()))?;
        let op = match &caps[2] {
            "==" => Op::Eq,
            "!=" => Op::Ne,
            "<=" => Op::Le,
            ">=" => Op::Ge,
            "<" => Op::Lt,
            _ => Op::Gt,
        };
        Ok(Expression {
            field: caps[1].parse()?,
            op,
            value: caps[3].to_string(),
        })
    }
}

/// Applies every predicate plus the `as_of` ceiling on run time.
pub fn select<'a, I>(records: I, wheres: &[Expression], as_of: DateTime<Utc>) -> Vec<RunRecord>
where
    I: IntoIterator<Item = &'a RunRecord>,
{
    records
        .into_iter()
        .filter(|record| record.datetime_run <= as_of)
        .filter(|record| wheres.iter().all(|expr| expr.matches(record)))
        .cloned()
        .collect()
}
