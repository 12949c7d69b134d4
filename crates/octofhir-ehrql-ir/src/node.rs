//! Frame and Series nodes
//!
//! Both node kinds are thin handles around an `Arc`. The structural hash is
//! computed once at construction (children contribute their cached hash), so
//! hashing and comparing large shared graphs stays cheap.

use octofhir_ehrql_types::{EhrqlType, TableSchema, TypedSet, Value};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::{Aggregate, BinaryFn, Domain, Function, IrResult, QueryModelError, UnaryFn};

fn structural_hash<T: Hash>(tag: u8, kind: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    tag.hash(&mut hasher);
    kind.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Frames
// ============================================================================

/// Which row PickOneRowPerPatient keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    First,
    Last,
}

/// A literal row of an inline patient table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InlineRow {
    pub patient_id: i64,
    pub values: Vec<Value>,
}

impl InlineRow {
    pub fn new(patient_id: i64, values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            patient_id,
            values: values.into_iter().collect(),
        }
    }
}

/// Table-shaped node kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    // === Table selection ===
    /// External table with zero or more rows per patient
    SelectTable { name: String, schema: TableSchema },
    /// External table with at most one row per patient
    SelectPatientTable { name: String, schema: TableSchema },
    /// Literal table with at most one row per patient
    InlinePatientTable {
        schema: TableSchema,
        rows: Vec<InlineRow>,
    },

    // === Transforms ===
    Filter { source: Frame, condition: Series },
    Sort { source: Frame, sort_by: Series },
    PickOneRowPerPatient {
        source: Frame,
        position: Position,
        /// Columns read from the picked row; filled in by the transform pass and
        /// used as tie-breakers after the sort keys
        selected_columns: BTreeSet<String>,
    },
}

#[derive(Debug)]
struct FrameNode {
    kind: FrameKind,
    hash: u64,
}

/// Table-shaped IR node
#[derive(Clone)]
pub struct Frame(Arc<FrameNode>);

impl Frame {
    pub(crate) fn from_kind(kind: FrameKind) -> Self {
        let hash = structural_hash(0, &kind);
        Frame(Arc::new(FrameNode { kind, hash }))
    }

    /// Select an event-level table
    pub fn select_table(name: impl Into<String>, schema: TableSchema) -> Self {
        Self::from_kind(FrameKind::SelectTable {
            name: name.into(),
            schema,
        })
    }

    /// Select a patient-level table
    pub fn select_patient_table(name: impl Into<String>, schema: TableSchema) -> Self {
        Self::from_kind(FrameKind::SelectPatientTable {
            name: name.into(),
            schema,
        })
    }

    /// Build a literal patient-level table, validating every row
    pub fn inline_patient_table(
        schema: TableSchema,
        rows: impl IntoIterator<Item = InlineRow>,
    ) -> IrResult<Self> {
        let rows: Vec<InlineRow> = rows.into_iter().collect();
        let mut seen = BTreeSet::new();
        for row in &rows {
            schema.validate_row(&row.values)?;
            if !seen.insert(row.patient_id) {
                return Err(QueryModelError::InvalidLiteral(format!(
                    "inline table has more than one row for patient {}",
                    row.patient_id
                )));
            }
        }
        Ok(Self::from_kind(FrameKind::InlinePatientTable { schema, rows }))
    }

    pub fn kind(&self) -> &FrameKind {
        &self.0.kind
    }

    /// Whether both handles point at the same node allocation
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The frame this one was derived from
    pub fn source(&self) -> Option<&Frame> {
        match self.kind() {
            FrameKind::Filter { source, .. }
            | FrameKind::Sort { source, .. }
            | FrameKind::PickOneRowPerPatient { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this node selects a table rather than transforming a frame
    pub fn is_table(&self) -> bool {
        self.source().is_none()
    }

    /// The table-selection node at the root of this frame's lineage
    pub fn root(&self) -> &Frame {
        let mut frame = self;
        while let Some(source) = frame.source() {
            frame = source;
        }
        frame
    }

    /// Name of the root table, if it is an external table
    pub fn table_name(&self) -> Option<&str> {
        match self.root().kind() {
            FrameKind::SelectTable { name, .. } | FrameKind::SelectPatientTable { name, .. } => {
                Some(name)
            }
            _ => None,
        }
    }

    /// Exactly one row per patient
    pub fn is_patient_frame(&self) -> bool {
        matches!(
            self.kind(),
            FrameKind::SelectPatientTable { .. }
                | FrameKind::InlinePatientTable { .. }
                | FrameKind::PickOneRowPerPatient { .. }
        )
    }

    pub fn schema(&self) -> &TableSchema {
        match self.root().kind() {
            FrameKind::SelectTable { schema, .. }
            | FrameKind::SelectPatientTable { schema, .. }
            | FrameKind::InlinePatientTable { schema, .. } => schema,
            // root() always stops at a table-selection node
            FrameKind::Filter { source, .. }
            | FrameKind::Sort { source, .. }
            | FrameKind::PickOneRowPerPatient { source, .. } => source.schema(),
        }
    }

    /// This frame followed by every frame it was derived from
    pub fn lineage(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(Some(self), |frame| frame.source())
    }

    /// Whether `other` is this frame or was derived from it
    pub fn is_ancestor_or_self_of(&self, other: &Frame) -> bool {
        other.lineage().any(|frame| frame == self)
    }

    pub fn domain(&self) -> Domain {
        if self.is_patient_frame() {
            Domain::Patient
        } else {
            Domain::Rows(self.clone())
        }
    }

    /// Sort keys applied along this frame's lineage, most significant first.
    ///
    /// The most recently applied sort takes priority, earlier sorts break ties.
    pub fn sort_keys(&self) -> SmallVec<[Series; 2]> {
        self.lineage()
            .filter_map(|frame| match frame.kind() {
                FrameKind::Sort { sort_by, .. } => Some(sort_by.clone()),
                _ => None,
            })
            .collect()
    }

    /// Filter conditions applied along this frame's lineage, innermost first
    pub fn filter_conditions(&self) -> Vec<Series> {
        let mut conditions: Vec<Series> = self
            .lineage()
            .filter_map(|frame| match frame.kind() {
                FrameKind::Filter { condition, .. } => Some(condition.clone()),
                _ => None,
            })
            .collect();
        conditions.reverse();
        conditions
    }

    /// Check that a series may be used to filter or sort this frame
    fn check_row_operand(&self, operation: &str, series: &Series) -> IrResult<()> {
        if self.is_patient_frame() {
            return Err(QueryModelError::PatientFrame(operation.to_string()));
        }
        match series.domain() {
            Domain::Patient => Ok(()),
            Domain::Rows(frame) if frame.is_ancestor_or_self_of(self) => Ok(()),
            Domain::Rows(frame) if self.is_ancestor_or_self_of(frame) => Err(
                QueryModelError::DescendantCondition(format!("{operation} {self} using {frame}")),
            ),
            Domain::Rows(frame) => Err(QueryModelError::domain_mismatch(format!(
                "cannot {operation} {self} using rows of {frame}"
            ))),
        }
    }

    /// Keep only rows where `condition` is true
    pub fn filter(&self, condition: &Series) -> IrResult<Frame> {
        if condition.ty() != &EhrqlType::Bool {
            return Err(QueryModelError::type_mismatch(
                "filter",
                "bool",
                condition.ty().to_string(),
            ));
        }
        self.check_row_operand("filter", condition)?;
        Ok(Self::from_kind(FrameKind::Filter {
            source: self.clone(),
            condition: condition.clone(),
        }))
    }

    /// Order rows by `key`; a later sort takes priority over earlier ones
    pub fn sort_by(&self, key: &Series) -> IrResult<Frame> {
        if !key.ty().is_orderable() {
            return Err(QueryModelError::InvalidSort(format!(
                "cannot sort by a value of type {}",
                key.ty()
            )));
        }
        self.check_row_operand("sort", key)?;
        Ok(Self::from_kind(FrameKind::Sort {
            source: self.clone(),
            sort_by: key.clone(),
        }))
    }

    /// Keep one row per patient from a sorted frame
    pub fn pick(&self, position: Position) -> IrResult<Frame> {
        if self.is_patient_frame() {
            return Err(QueryModelError::PatientFrame("pick a row from".to_string()));
        }
        if self.sort_keys().is_empty() {
            return Err(QueryModelError::UnsortedPick);
        }
        Ok(Self::from_kind(FrameKind::PickOneRowPerPatient {
            source: self.clone(),
            position,
            selected_columns: BTreeSet::new(),
        }))
    }

    pub fn first_for_patient(&self) -> IrResult<Frame> {
        self.pick(Position::First)
    }

    pub fn last_for_patient(&self) -> IrResult<Frame> {
        self.pick(Position::Last)
    }

    /// Select a declared column
    pub fn column(&self, name: &str) -> IrResult<Series> {
        let Some(column) = self.schema().column(name) else {
            return Err(QueryModelError::UnknownColumn {
                table: self.root().to_string(),
                column: name.to_string(),
            });
        };
        let ty = column.ty.clone();
        Ok(Series::from_parts(
            SeriesKind::SelectColumn {
                source: self.clone(),
                name: name.to_string(),
            },
            ty,
            self.domain(),
        ))
    }

    /// Whether each patient has at least one row
    pub fn exists_for_patient(&self) -> IrResult<Series> {
        Series::aggregate(Aggregate::Exists {
            source: self.clone(),
        })
    }

    /// Number of rows for each patient
    pub fn count_for_patient(&self) -> IrResult<Series> {
        Series::aggregate(Aggregate::Count {
            source: self.clone(),
        })
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.0.hash == other.0.hash && self.0.kind == other.0.kind)
    }
}

impl Eq for Frame {}

impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame").field(&self.0.kind).finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            FrameKind::SelectTable { name, .. } | FrameKind::SelectPatientTable { name, .. } => {
                write!(f, "{name}")
            }
            FrameKind::InlinePatientTable { rows, .. } => {
                write!(f, "inline_table[{} rows]", rows.len())
            }
            FrameKind::Filter { source, .. } => write!(f, "{source}.where(..)"),
            FrameKind::Sort { source, .. } => write!(f, "{source}.sort_by(..)"),
            FrameKind::PickOneRowPerPatient {
                source, position, ..
            } => match position {
                Position::First => write!(f, "{source}.first_for_patient()"),
                Position::Last => write!(f, "{source}.last_for_patient()"),
            },
        }
    }
}

// ============================================================================
// Series
// ============================================================================

/// Column-shaped node kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    /// A column of a frame
    SelectColumn { source: Frame, name: String },
    /// A literal; its declared type is part of its identity
    Value { value: Value, ty: EhrqlType },
    Aggregate(Aggregate),
    Function(Function),
}

#[derive(Debug)]
struct SeriesNode {
    kind: SeriesKind,
    ty: EhrqlType,
    domain: Domain,
    hash: u64,
}

/// Column-shaped IR node
#[derive(Clone)]
pub struct Series(Arc<SeriesNode>);

impl Series {
    fn from_parts(kind: SeriesKind, ty: EhrqlType, domain: Domain) -> Self {
        let hash = structural_hash(1, &kind);
        Series(Arc::new(SeriesNode {
            kind,
            ty,
            domain,
            hash,
        }))
    }

    /// Build a node from its kind, inferring type and domain.
    ///
    /// Every public constructor funnels through here, so the domain and type
    /// rules hold for every node in existence.
    pub(crate) fn from_kind(kind: SeriesKind) -> IrResult<Self> {
        let (ty, domain) = match &kind {
            SeriesKind::SelectColumn { source, name } => {
                let Some(column) = source.schema().column(name) else {
                    return Err(QueryModelError::UnknownColumn {
                        table: source.root().to_string(),
                        column: name.clone(),
                    });
                };
                (column.ty.clone(), source.domain())
            }
            SeriesKind::Value { value, ty } => {
                value.check_type(ty)?;
                (ty.clone(), Domain::Patient)
            }
            SeriesKind::Aggregate(aggregate) => (aggregate.infer_type()?, Domain::Patient),
            SeriesKind::Function(function) => {
                let ty = function.infer_type()?;
                let domain =
                    Domain::combine(function.arguments().into_iter().map(|arg| arg.domain()))?;
                (ty, domain)
            }
        };
        Ok(Self::from_parts(kind, ty, domain))
    }

    /// A literal of an explicit type (required for nulls)
    pub fn value(value: Value, ty: EhrqlType) -> IrResult<Self> {
        Self::from_kind(SeriesKind::Value { value, ty })
    }

    /// A non-null literal whose type follows from the value
    pub fn literal(value: impl Into<Value>) -> IrResult<Self> {
        let value = value.into();
        let ty = match &value {
            Value::Null => {
                return Err(QueryModelError::InvalidLiteral(
                    "null literals need an explicit type".to_string(),
                ));
            }
            Value::Bool(_) => EhrqlType::Bool,
            Value::Int(_) => EhrqlType::Int,
            Value::Float(_) => EhrqlType::Float,
            Value::Str(_) => EhrqlType::Str,
            Value::Date(_) => EhrqlType::Date,
            Value::Code(code) => EhrqlType::Code(code.system.clone()),
            Value::Set(set) => set.set_type(),
        };
        Self::value(value, ty)
    }

    /// A typed set literal
    pub fn set(element_type: EhrqlType, values: impl IntoIterator<Item = Value>) -> IrResult<Self> {
        let set = TypedSet::new(element_type, values)?;
        let ty = set.set_type();
        Self::value(Value::Set(set), ty)
    }

    pub fn aggregate(aggregate: Aggregate) -> IrResult<Self> {
        Self::from_kind(SeriesKind::Aggregate(aggregate))
    }

    pub fn function(function: Function) -> IrResult<Self> {
        Self::from_kind(SeriesKind::Function(function))
    }

    pub fn unary(op: UnaryFn, operand: &Series) -> IrResult<Self> {
        Self::function(Function::Unary {
            op,
            operand: operand.clone(),
        })
    }

    pub fn binary(op: BinaryFn, lhs: &Series, rhs: &Series) -> IrResult<Self> {
        Self::function(Function::Binary {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        })
    }

    pub fn maximum_of(args: &[Series]) -> IrResult<Self> {
        Self::function(Function::MaximumOf(args.to_vec()))
    }

    pub fn minimum_of(args: &[Series]) -> IrResult<Self> {
        Self::function(Function::MinimumOf(args.to_vec()))
    }

    pub fn case(cases: Vec<(Series, Series)>, default: Option<Series>) -> IrResult<Self> {
        Self::function(Function::Case { cases, default })
    }

    pub fn kind(&self) -> &SeriesKind {
        &self.0.kind
    }

    pub fn ty(&self) -> &EhrqlType {
        &self.0.ty
    }

    pub fn domain(&self) -> &Domain {
        &self.0.domain
    }

    pub fn is_one_row_per_patient(&self) -> bool {
        self.0.domain.is_patient()
    }

    /// Whether both handles point at the same node allocation
    pub fn ptr_eq(&self, other: &Series) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Whether the series can produce null for some patient
    pub fn is_nullable(&self) -> bool {
        match self.kind() {
            SeriesKind::Value { value, .. } => value.is_null(),
            // patients without rows get an empty set
            SeriesKind::Aggregate(Aggregate::CombineAsSet(_)) => false,
            SeriesKind::Aggregate(aggregate) => !aggregate.is_count_like(),
            SeriesKind::Function(Function::Unary {
                op: UnaryFn::IsNull,
                ..
            }) => false,
            _ => true,
        }
    }

    /// Direct operand series
    pub fn children(&self) -> Vec<&Series> {
        match self.kind() {
            SeriesKind::SelectColumn { .. } | SeriesKind::Value { .. } => Vec::new(),
            SeriesKind::Aggregate(aggregate) => aggregate.series().into_iter().collect(),
            SeriesKind::Function(function) => function.arguments(),
        }
    }

    // === Convenience builders ===

    pub fn is_null(&self) -> IrResult<Self> {
        Self::unary(UnaryFn::IsNull, self)
    }

    pub fn is_in(&self, set: &Series) -> IrResult<Self> {
        Self::binary(BinaryFn::In, self, set)
    }

    pub fn min_for_patient(&self) -> IrResult<Self> {
        Self::aggregate(Aggregate::Min(self.clone()))
    }

    pub fn max_for_patient(&self) -> IrResult<Self> {
        Self::aggregate(Aggregate::Max(self.clone()))
    }

    pub fn sum_for_patient(&self) -> IrResult<Self> {
        Self::aggregate(Aggregate::Sum(self.clone()))
    }

    pub fn mean_for_patient(&self) -> IrResult<Self> {
        Self::aggregate(Aggregate::Mean(self.clone()))
    }

    pub fn count_distinct_for_patient(&self) -> IrResult<Self> {
        Self::aggregate(Aggregate::CountDistinct(self.clone()))
    }

    pub fn combine_as_set(&self) -> IrResult<Self> {
        Self::aggregate(Aggregate::CombineAsSet(self.clone()))
    }

    pub fn count_episodes_for_patient(&self, maximum_gap_days: i64) -> IrResult<Self> {
        Self::aggregate(Aggregate::CountEpisodes {
            series: self.clone(),
            maximum_gap_days,
        })
    }
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.0.hash == other.0.hash && self.0.kind == other.0.kind)
    }
}

impl Eq for Series {}

impl Hash for Series {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Series")
            .field("kind", &self.0.kind)
            .field("ty", &self.0.ty)
            .finish()
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            SeriesKind::SelectColumn { source, name } => write!(f, "{source}.{name}"),
            SeriesKind::Value { value, .. } => write!(f, "{value}"),
            SeriesKind::Aggregate(aggregate) => match aggregate {
                Aggregate::Exists { source } | Aggregate::Count { source } => {
                    write!(f, "{source}.{}()", aggregate.name())
                }
                _ => match aggregate.series() {
                    Some(series) => write!(f, "{series}.{}()", aggregate.name()),
                    None => write!(f, "{}()", aggregate.name()),
                },
            },
            SeriesKind::Function(function) => match function {
                Function::Unary { op, operand } => write!(f, "{}({operand})", op.name()),
                Function::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
                Function::MaximumOf(args) => write!(f, "maximum_of({} args)", args.len()),
                Function::MinimumOf(args) => write!(f, "minimum_of({} args)", args.len()),
                Function::Case { cases, .. } => write!(f, "case({} branches)", cases.len()),
            },
        }
    }
}

/// Either kind of node, for graph traversal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Frame(Frame),
    Series(Series),
}

impl Node {
    /// Direct children of this node
    pub fn children(&self) -> Vec<Node> {
        match self {
            Node::Frame(frame) => match frame.kind() {
                FrameKind::SelectTable { .. }
                | FrameKind::SelectPatientTable { .. }
                | FrameKind::InlinePatientTable { .. } => Vec::new(),
                FrameKind::Filter { source, condition } => vec![
                    Node::Frame(source.clone()),
                    Node::Series(condition.clone()),
                ],
                FrameKind::Sort { source, sort_by } => {
                    vec![Node::Frame(source.clone()), Node::Series(sort_by.clone())]
                }
                FrameKind::PickOneRowPerPatient { source, .. } => {
                    vec![Node::Frame(source.clone())]
                }
            },
            Node::Series(series) => match series.kind() {
                SeriesKind::SelectColumn { source, .. } => vec![Node::Frame(source.clone())],
                SeriesKind::Value { .. } => Vec::new(),
                SeriesKind::Aggregate(Aggregate::Exists { source })
                | SeriesKind::Aggregate(Aggregate::Count { source }) => {
                    vec![Node::Frame(source.clone())]
                }
                _ => series
                    .children()
                    .into_iter()
                    .map(|child| Node::Series(child.clone()))
                    .collect(),
            },
        }
    }
}
