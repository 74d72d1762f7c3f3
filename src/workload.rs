//! Benchmark workload definitions
//!
//! A workload names the unit of work every dispatched task performs:
//! execute one operation against an acquired connection and discard the
//! result. All workloads are fixture-free so the harness never needs
//! server-side tables.

use std::fmt;

use async_trait::async_trait;

use crate::benchmark::UnitOfWork;
use crate::client::Connection;
use crate::utils::UnitOfWorkError;

/// Supported benchmark workload types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workload {
    /// `DO 1`: the cheapest server round trip with an OK response
    Do1,
    /// `SELECT 1`: one-column one-row result set, discarded
    Select1,
    /// A single-row SELECT of 100 literal columns, discarded
    Select100Cols,
    /// A batch of `DO <k>` statements; sensitive to the variant's
    /// batch-rewrite and pipelining settings
    DoBatch,
}

impl Workload {
    /// Parse workload name from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "do-1" | "do_1" | "do1" => Some(Self::Do1),
            "select-1" | "select_1" | "select1" => Some(Self::Select1),
            "select-100-cols" | "select_100_cols" => Some(Self::Select100Cols),
            "do-batch" | "do_batch" => Some(Self::DoBatch),
            _ => None,
        }
    }

    /// Get display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Do1 => "do-1",
            Self::Select1 => "select-1",
            Self::Select100Cols => "select-100-cols",
            Self::DoBatch => "do-batch",
        }
    }

    pub fn all() -> [Workload; 4] {
        [Self::Do1, Self::Select1, Self::Select100Cols, Self::DoBatch]
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::DoBatch)
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A batch of single-value statements sharing one template
///
/// `prefix` + value forms one statement (`DO 3`); the whole batch can be
/// rewritten into one multi-value statement (`DO 1,2,3`) or prepared once
/// as `prefix` + `?` and executed per value.
#[derive(Debug, Clone)]
pub struct Batch {
    prefix: String,
    values: Vec<i64>,
}

impl Batch {
    pub fn new(prefix: impl Into<String>, values: Vec<i64>) -> Self {
        Self {
            prefix: prefix.into(),
            values,
        }
    }

    /// Batch of `len` members with values 1..=len, deterministic so runs
    /// are comparable
    pub fn sequential(prefix: impl Into<String>, len: usize) -> Self {
        Self::new(prefix, (1..=len as i64).collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// One statement per member
    pub fn statements(&self) -> impl Iterator<Item = String> + '_ {
        self.values
            .iter()
            .map(move |v| format!("{}{}", self.prefix, v))
    }

    /// Parameterized template for prepared execution
    pub fn template(&self) -> String {
        format!("{}?", self.prefix)
    }

    /// The whole batch as one multi-value statement
    pub fn rewritten(&self) -> String {
        let mut sql = self.prefix.clone();
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                sql.push(',');
            }
            sql.push_str(&v.to_string());
        }
        sql
    }
}

fn select_100_cols_sql() -> String {
    let mut sql = String::with_capacity(512);
    sql.push_str("SELECT ");
    for i in 1..=100 {
        if i > 1 {
            sql.push(',');
        }
        sql.push_str(&i.to_string());
    }
    sql
}

/// A workload with its statement text resolved once, shared by every
/// task of a dispatch
#[derive(Debug, Clone)]
pub struct WorkUnit {
    workload: Workload,
    sql: String,
    batch: Batch,
}

impl WorkUnit {
    pub fn new(workload: Workload, batch_size: usize) -> Self {
        let sql = match workload {
            Workload::Do1 => "DO 1".to_string(),
            Workload::Select1 => "SELECT 1".to_string(),
            Workload::Select100Cols => select_100_cols_sql(),
            Workload::DoBatch => String::new(),
        };
        Self {
            workload,
            sql,
            batch: Batch::sequential("DO ", batch_size),
        }
    }

    pub fn workload(&self) -> Workload {
        self.workload
    }
}

#[async_trait]
impl UnitOfWork<Connection> for WorkUnit {
    async fn run(&self, conn: &mut Connection) -> Result<(), UnitOfWorkError> {
        match self.workload {
            Workload::DoBatch => conn.execute_batch(&self.batch).await,
            _ => conn.execute_discard(&self.sql).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workload_names() {
        assert_eq!(Workload::parse("do-1"), Some(Workload::Do1));
        assert_eq!(Workload::parse("DO-1"), Some(Workload::Do1));
        assert_eq!(Workload::parse("select_1"), Some(Workload::Select1));
        assert_eq!(
            Workload::parse("select-100-cols"),
            Some(Workload::Select100Cols)
        );
        assert_eq!(Workload::parse("do-batch"), Some(Workload::DoBatch));
        assert_eq!(Workload::parse("unknown"), None);
    }

    #[test]
    fn test_all_roundtrip() {
        for workload in Workload::all() {
            assert_eq!(Workload::parse(workload.as_str()), Some(workload));
        }
    }

    #[test]
    fn test_select_100_cols_has_100_columns() {
        let sql = select_100_cols_sql();
        assert!(sql.starts_with("SELECT 1,"));
        assert_eq!(sql.matches(',').count(), 99);
        assert!(sql.ends_with(",100"));
    }

    #[test]
    fn test_batch_statements() {
        let batch = Batch::sequential("DO ", 3);
        let statements: Vec<String> = batch.statements().collect();
        assert_eq!(statements, vec!["DO 1", "DO 2", "DO 3"]);
    }

    #[test]
    fn test_batch_rewrite_collapses_to_one_statement() {
        let batch = Batch::sequential("DO ", 4);
        assert_eq!(batch.rewritten(), "DO 1,2,3,4");
        assert_eq!(batch.template(), "DO ?");
    }

    #[test]
    fn test_work_unit_statements() {
        let unit = WorkUnit::new(Workload::Do1, 100);
        assert_eq!(unit.sql, "DO 1");

        let batch_unit = WorkUnit::new(Workload::DoBatch, 10);
        assert_eq!(batch_unit.batch.len(), 10);
    }
}
