//! Engine-agnostic SQL syntax tree
//!
//! The compiler builds these nodes; dialect specifics only appear in the
//! function calls a dialect chooses to emit and in how the writer prints
//! literals, identifiers and statements.

use octofhir_ehrql_model::TableExpression;
use octofhir_ehrql_types::{EhrqlType, PATIENT_ID, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::generated::GeneratedTable;

/// Column types the engine creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer,
    Float,
    Text,
    Date,
    Boolean,
}

impl SqlType {
    /// Storage type for a series type; codes are stored as text
    pub fn for_type(ty: &EhrqlType) -> Self {
        match ty {
            EhrqlType::Bool => Self::Boolean,
            EhrqlType::Int => Self::Integer,
            EhrqlType::Float => Self::Float,
            EhrqlType::Date => Self::Date,
            EhrqlType::Str | EhrqlType::Code(_) | EhrqlType::Set(_) => Self::Text,
        }
    }
}

// ============================================================================
// Table references
// ============================================================================

/// An external table, as resolved by the table provider
#[derive(Debug, PartialEq, Eq)]
pub struct BaseTable {
    pub name: String,
    pub expression: TableExpression,
}

/// Something a query can read rows from
#[derive(Debug, Clone)]
pub enum TableRef {
    Base(Arc<BaseTable>),
    Generated(Arc<GeneratedTable>),
}

impl TableRef {
    pub fn base(name: impl Into<String>, expression: TableExpression) -> Self {
        Self::Base(Arc::new(BaseTable {
            name: name.into(),
            expression,
        }))
    }

    /// Name other clauses use to refer to this table
    pub fn alias(&self) -> &str {
        match self {
            Self::Base(table) => &table.name,
            Self::Generated(table) => table.name(),
        }
    }

    pub fn generated(&self) -> Option<&Arc<GeneratedTable>> {
        match self {
            Self::Base(_) => None,
            Self::Generated(table) => Some(table),
        }
    }

    pub fn column(&self, name: impl Into<String>) -> Expr {
        Expr::Column {
            table: self.clone(),
            name: name.into(),
        }
    }

    pub fn patient_id(&self) -> Expr {
        self.column(PATIENT_ID)
    }
}

impl PartialEq for TableRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Base(a), Self::Base(b)) => a.name == b.name,
            (Self::Generated(a), Self::Generated(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

impl Eq for TableRef {}

impl Hash for TableRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        matches!(self, Self::Generated(_)).hash(state);
        self.alias().hash(state);
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
        }
    }
}

/// Row-wise largest/smallest of several expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalFunction {
    Max,
    Min,
}

impl HorizontalFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column {
        table: TableRef,
        name: String,
    },
    Literal(Value),
    Null,
    /// `*`, as in `COUNT(*)`
    Star,
    /// A bare keyword argument such as a date part
    Keyword(&'static str),
    Binary {
        op: BinaryOperator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Function {
        name: &'static str,
        args: Vec<Expr>,
        distinct: bool,
    },
    Cast {
        expr: Box<Expr>,
        ty: SqlType,
    },
    Case {
        cases: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
    },
    /// Membership in one column of a table
    InTable {
        expr: Box<Expr>,
        table: TableRef,
        column: String,
    },
    /// Whether the table holds `value` for the patient of the enclosing row
    ExistsInTable {
        table: TableRef,
        value: Box<Expr>,
    },
    Horizontal {
        function: HorizontalFunction,
        args: Vec<Expr>,
    },
    Window {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderBy>,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: char,
    },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn binary(op: BinaryOperator, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOperator::Eq, lhs, rhs)
    }

    pub fn function(name: &'static str, args: Vec<Expr>) -> Self {
        Self::Function {
            name,
            args,
            distinct: false,
        }
    }

    pub fn cast(expr: Expr, ty: SqlType) -> Self {
        Self::Cast {
            expr: Box::new(expr),
            ty,
        }
    }

    pub fn case(cases: Vec<(Expr, Expr)>, default: Option<Expr>) -> Self {
        Self::Case {
            cases,
            default: default.map(Box::new),
        }
    }

    pub fn not(expr: Expr) -> Self {
        Self::Not(Box::new(expr))
    }

    pub fn is_null(expr: Expr) -> Self {
        Self::IsNull(Box::new(expr))
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Self::IsNotNull(Box::new(expr))
    }

    /// `COALESCE(expr, default)`
    pub fn coalesce(expr: Expr, default: Expr) -> Self {
        Self::function("COALESCE", vec![expr, default])
    }

    /// `NULLIF(expr, value)`
    pub fn null_if(expr: Expr, value: Expr) -> Self {
        Self::function("NULLIF", vec![expr, value])
    }

    /// Conjunction of any number of predicates; None if there are none
    pub fn and_all(predicates: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        predicates
            .into_iter()
            .reduce(|acc, next| Expr::binary(BinaryOperator::And, acc, next))
    }

    /// Tables read at this query level, in first-use order.
    ///
    /// Tables only read inside a membership subquery are not included; they are
    /// not joined to the enclosing query.
    pub fn collect_tables(&self, out: &mut Vec<TableRef>) {
        match self {
            Self::Column { table, .. } => {
                if !out.contains(table) {
                    out.push(table.clone());
                }
            }
            Self::Literal(_) | Self::Null | Self::Star | Self::Keyword(_) => {}
            Self::InTable { expr, .. } => expr.collect_tables(out),
            Self::ExistsInTable { value, .. } => value.collect_tables(out),
            _ => self.for_each_child(|child| child.collect_tables(out)),
        }
    }

    /// Every generated table this expression depends on, subqueries included
    pub fn collect_generated(&self, out: &mut Vec<Arc<GeneratedTable>>) {
        let mut push = |table: &TableRef| {
            if let Some(generated) = table.generated() {
                if !out.iter().any(|t| t.name() == generated.name()) {
                    out.push(generated.clone());
                }
            }
        };
        match self {
            Self::Column { table, .. } => push(table),
            Self::InTable { expr, table, .. } => {
                push(table);
                expr.collect_generated(out);
            }
            Self::ExistsInTable { table, value } => {
                push(table);
                value.collect_generated(out);
            }
            _ => self.for_each_child(|child| child.collect_generated(out)),
        }
    }

    fn for_each_child(&self, mut visit: impl FnMut(&Expr)) {
        match self {
            Self::Column { .. } | Self::Literal(_) | Self::Null | Self::Star | Self::Keyword(_) => {}
            Self::Binary { lhs, rhs, .. } => {
                visit(lhs);
                visit(rhs);
            }
            Self::Not(e) | Self::Negate(e) | Self::IsNull(e) | Self::IsNotNull(e) => visit(e),
            Self::Cast { expr, .. } => visit(expr),
            Self::Function { args, .. } | Self::Horizontal { args, .. } => {
                args.iter().for_each(visit)
            }
            Self::Case { cases, default } => {
                for (condition, value) in cases {
                    visit(condition);
                    visit(value);
                }
                if let Some(default) = default {
                    visit(default);
                }
            }
            Self::InList { expr, list } => {
                visit(expr);
                list.iter().for_each(visit);
            }
            Self::InTable { expr, .. } => visit(expr),
            Self::ExistsInTable { value, .. } => visit(value),
            Self::Window {
                function,
                partition_by,
                order_by,
            } => {
                visit(function);
                partition_by.iter().for_each(&mut visit);
                order_by.iter().for_each(|o| visit(&o.expr));
            }
            Self::Like { expr, pattern, .. } => {
                visit(expr);
                visit(pattern);
            }
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
}

/// Join on patient id with the primary table of the select
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub distinct: bool,
    pub columns: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
}

impl Select {
    pub fn from(table: TableRef) -> Self {
        Self {
            from: Some(table),
            ..Self::default()
        }
    }

    pub fn column(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.columns.push(SelectItem {
            expr,
            alias: alias.into(),
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// AND a predicate onto the WHERE clause
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.where_clause = Expr::and_all(self.where_clause.take().into_iter().chain([predicate]));
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, expr: Expr, descending: bool) -> Self {
        self.order_by.push(OrderBy { expr, descending });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn join(mut self, kind: JoinKind, table: TableRef) -> Self {
        if self.from.as_ref() != Some(&table) && !self.joins.iter().any(|j| j.table == table) {
            self.joins.push(Join { kind, table });
        }
        self
    }

    /// LEFT JOIN every table the clauses read other than the primary one
    pub fn join_referenced_tables(mut self) -> Self {
        let mut tables = Vec::new();
        for expr in self.expressions() {
            expr.collect_tables(&mut tables);
        }
        for table in tables {
            self = self.join(JoinKind::Left, table);
        }
        self
    }

    fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.columns
            .iter()
            .map(|c| &c.expr)
            .chain(self.where_clause.iter())
            .chain(self.group_by.iter())
            .chain(self.order_by.iter().map(|o| &o.expr))
    }

    fn collect_generated(&self, out: &mut Vec<Arc<GeneratedTable>>) {
        let tables = self.from.iter().chain(self.joins.iter().map(|j| &j.table));
        for table in tables {
            if let Some(generated) = table.generated() {
                if !out.iter().any(|t| t.name() == generated.name()) {
                    out.push(generated.clone());
                }
            }
        }
        for expr in self.expressions() {
            expr.collect_generated(out);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Box<Select>),
    Union { all: bool, selects: Vec<Select> },
}

impl Query {
    /// Generated tables read directly by this query
    pub fn referenced_tables(&self) -> Vec<Arc<GeneratedTable>> {
        let mut out = Vec::new();
        match self {
            Self::Select(select) => select.collect_generated(&mut out),
            Self::Union { selects, .. } => {
                for select in selects {
                    select.collect_generated(&mut out);
                }
            }
        }
        out
    }
}

impl From<Select> for Query {
    fn from(select: Select) -> Self {
        Self::Select(Box::new(select))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn events() -> TableRef {
        TableRef::base("events", TableExpression::table("events"))
    }

    fn patients() -> TableRef {
        TableRef::base("patients", TableExpression::table("patients"))
    }

    #[test]
    fn test_join_referenced_tables_skips_primary_and_duplicates() {
        let select = Select::from(events())
            .column(events().column("value"), "value")
            .column(patients().column("sex"), "sex")
            .filter(Expr::is_not_null(patients().column("date_of_birth")))
            .join_referenced_tables();
        assert_eq!(
            select.joins,
            vec![Join {
                kind: JoinKind::Left,
                table: patients()
            }]
        );
    }

    #[test]
    fn test_filter_accumulates_conjunction() {
        let select = Select::from(events())
            .filter(Expr::is_not_null(events().column("a")))
            .filter(Expr::is_not_null(events().column("b")));
        assert!(matches!(
            select.where_clause,
            Some(Expr::Binary {
                op: BinaryOperator::And,
                ..
            })
        ));
    }

    #[test]
    fn test_table_identity_is_by_name() {
        assert_eq!(events(), events());
        assert_ne!(events(), patients());
    }
}
