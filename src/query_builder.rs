//! Free-form condition builder.
//!
//! Conditions combine with AND/OR and nest into groups, then lower to a
//! single [`Predicate`] understood by every table source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::FloodError;
use crate::query::{CompareOp, Predicate};
use crate::types::ColumnName;

/// Comparison offered by the condition builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal.
    Equals,
    /// Not equal.
    NotEquals,
    /// Greater than.
    GreaterThan,
    /// Less than.
    LessThan,
    /// Case-insensitive substring match.
    Contains,
    /// Case-insensitive prefix match.
    StartsWith,
    /// Case-insensitive suffix match.
    EndsWith,
    /// Null or blank.
    IsEmpty,
    /// Neither null nor blank.
    IsNotEmpty,
}

impl Operator {
    /// Whether the operator compares against a value.
    pub fn needs_value(self) -> bool {
        !matches!(self, Operator::IsEmpty | Operator::IsNotEmpty)
    }

    /// Parse symbolic (`=`, `!=`, `>`, `<`) or word forms.
    pub fn parse(raw: &str) -> Option<Self> {
        let op = match raw.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" | "equals" => Operator::Equals,
            "!=" | "<>" | "neq" | "not-equals" => Operator::NotEquals,
            ">" | "gt" | "greater-than" => Operator::GreaterThan,
            "<" | "lt" | "less-than" => Operator::LessThan,
            "~" | "contains" => Operator::Contains,
            "starts" | "starts-with" => Operator::StartsWith,
            "ends" | "ends-with" => Operator::EndsWith,
            "empty" | "is-empty" => Operator::IsEmpty,
            "not-empty" | "is-not-empty" => Operator::IsNotEmpty,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::GreaterThan => ">",
            Operator::LessThan => "<",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts",
            Operator::EndsWith => "ends",
            Operator::IsEmpty => "empty",
            Operator::IsNotEmpty => "not-empty",
        })
    }
}

/// One `column operator value` row of the builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Column the condition applies to.
    pub column: ColumnName,
    /// Comparison to apply.
    pub operator: Operator,
    /// Operand; `None` for unary operators.
    #[serde(default)]
    pub value: Option<String>,
}

impl Condition {
    /// Condition with an operand.
    pub fn new(column: impl Into<ColumnName>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: Some(value.into()),
        }
    }

    /// Condition without an operand (`IsEmpty` / `IsNotEmpty`).
    pub fn unary(column: impl Into<ColumnName>, operator: Operator) -> Self {
        Self {
            column: column.into(),
            operator,
            value: None,
        }
    }

    /// Lower to a table predicate.
    pub fn to_predicate(&self) -> Result<Predicate, FloodError> {
        let column = self.column.trim();
        if column.is_empty() {
            return Err(FloodError::InvalidCondition("condition has no column".into()));
        }
        let column = column.to_string();
        let operand = || {
            self.value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    FloodError::InvalidCondition(format!(
                        "'{column} {}' needs a value",
                        self.operator
                    ))
                })
        };
        let compare = |op: CompareOp| -> Result<Predicate, FloodError> {
            Ok(Predicate::Compare {
                column: column.clone(),
                op,
                value: operand()?,
            })
        };
        let ilike = |prefix: &str, suffix: &str| -> Result<Predicate, FloodError> {
            Ok(Predicate::ILike {
                column: column.clone(),
                pattern: format!("{prefix}{}{suffix}", operand()?),
            })
        };
        match self.operator {
            Operator::Equals => compare(CompareOp::Eq),
            Operator::NotEquals => compare(CompareOp::Neq),
            Operator::GreaterThan => compare(CompareOp::Gt),
            Operator::LessThan => compare(CompareOp::Lt),
            Operator::Contains => ilike("*", "*"),
            Operator::StartsWith => ilike("", "*"),
            Operator::EndsWith => ilike("*", ""),
            Operator::IsEmpty => Ok(Predicate::IsEmpty(column.clone())),
            Operator::IsNotEmpty => Ok(Predicate::NotEmpty(column.clone())),
        }
    }
}

impl FromStr for Condition {
    type Err = FloodError;

    /// Parse `column operator [value]`; the value may contain spaces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, char::is_whitespace);
        let column = parts.next().unwrap_or_default();
        let raw_op = parts.next().unwrap_or_default();
        let operator = Operator::parse(raw_op).ok_or_else(|| {
            FloodError::InvalidCondition(format!("unknown operator '{raw_op}' in '{s}'"))
        })?;
        let value = parts
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let condition = Condition {
            column: column.to_string(),
            operator,
            value,
        };
        condition.to_predicate()?;
        Ok(condition)
    }
}

/// How the members of a group combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    /// Every member must match.
    #[default]
    And,
    /// At least one member must match.
    Or,
}

/// Member of a condition group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionItem {
    /// A single condition.
    Condition(Condition),
    /// A nested group.
    Group(ConditionGroup),
}

/// Conditions and nested groups joined by one combinator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    /// How the members combine.
    #[serde(default)]
    pub combinator: Combinator,
    /// Conditions and nested groups.
    pub items: Vec<ConditionItem>,
}

impl ConditionGroup {
    /// Empty group with the given combinator.
    pub fn new(combinator: Combinator) -> Self {
        Self {
            combinator,
            items: Vec::new(),
        }
    }

    /// Append a condition.
    pub fn with(mut self, condition: Condition) -> Self {
        self.items.push(ConditionItem::Condition(condition));
        self
    }

    /// Append a nested group.
    pub fn with_group(mut self, group: ConditionGroup) -> Self {
        self.items.push(ConditionItem::Group(group));
        self
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Lower the whole tree to one predicate. Empty groups are rejected.
    pub fn to_predicate(&self) -> Result<Predicate, FloodError> {
        if self.items.is_empty() {
            return Err(FloodError::InvalidCondition("condition group is empty".into()));
        }
        let mut members = self
            .items
            .iter()
            .map(|item| match item {
                ConditionItem::Condition(condition) => condition.to_predicate(),
                ConditionItem::Group(group) => group.to_predicate(),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if members.len() == 1 {
            return Ok(members.remove(0));
        }
        Ok(match self.combinator {
            Combinator::And => Predicate::All(members),
            Combinator::Or => Predicate::Any(members),
        })
    }
}
