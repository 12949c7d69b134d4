//! In-memory reference engine
//!
//! Evaluates a dataset directly against an [`InMemoryDatabase`]. It is the
//! semantic baseline the SQL engines are tested against, so it favours plainness
//! over speed: every frame and series is evaluated once into a column keyed by
//! patient (one-row-per-patient domains) or by row id (many-rows domains).

use octofhir_ehrql_ir::graph::{table_nodes, walk};
use octofhir_ehrql_ir::transform::transform;
use octofhir_ehrql_ir::{
    Aggregate, Dataset, Domain, Frame, FrameKind, Function, Node, Position, Series, SeriesKind,
};
use octofhir_ehrql_types::{ResultRow, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::database::{InMemoryDatabase, TableData};
use crate::error::{EvalError, EvalResult};
use crate::operators::{self, aggregate as aggregates, comparison};

// ============================================================================
// Evaluated nodes
// ============================================================================

/// Address of one value: the patient, plus the row id in many-rows domains
#[derive(Debug, Clone, Copy)]
struct RowRef {
    patient_id: i64,
    row: Option<usize>,
}

impl RowRef {
    fn patient(patient_id: i64) -> Self {
        Self {
            patient_id,
            row: None,
        }
    }
}

/// An evaluated series
#[derive(Debug)]
enum Column {
    /// Same value everywhere
    Constant(Value),
    /// One value per patient; patients without an entry get the default
    Patient {
        values: HashMap<i64, Value>,
        default: Value,
    },
    /// One value per row id of the domain's root table
    Rows(HashMap<usize, Value>),
}

impl Column {
    fn get(&self, at: RowRef) -> EvalResult<Value> {
        match self {
            Self::Constant(value) => Ok(value.clone()),
            Self::Patient { values, default } => {
                Ok(values.get(&at.patient_id).unwrap_or(default).clone())
            }
            Self::Rows(values) => {
                let row = at.row.ok_or_else(|| {
                    EvalError::RowMismatch(format!(
                        "row-level column read for patient {} outside a row context",
                        at.patient_id
                    ))
                })?;
                values.get(&row).cloned().ok_or_else(|| {
                    EvalError::RowMismatch(format!(
                        "no value for row {} of patient {}",
                        row, at.patient_id
                    ))
                })
            }
        }
    }
}

/// An evaluated frame
#[derive(Debug)]
enum Rows {
    /// Row ids of the root table, in table order
    Many { table: String, rows: Vec<usize> },
    /// At most one row id per patient
    PerPatient {
        table: String,
        rows: BTreeMap<i64, usize>,
    },
    /// Literal rows, one per patient
    Inline {
        columns: Vec<String>,
        rows: BTreeMap<i64, Vec<Value>>,
    },
}

// ============================================================================
// Engine
// ============================================================================

/// Reference engine evaluating datasets against an in-memory database
#[derive(Debug, Clone, Copy)]
pub struct InMemoryEngine<'db> {
    database: &'db InMemoryDatabase,
}

impl<'db> InMemoryEngine<'db> {
    pub fn new(database: &'db InMemoryDatabase) -> Self {
        Self { database }
    }

    /// One row per patient in the population, ordered by patient id
    pub fn get_results(&self, dataset: &Dataset) -> EvalResult<Vec<ResultRow>> {
        let dataset = transform(dataset)?;
        let mut evaluator = Evaluator::new(self.database, &dataset)?;

        let population = evaluator.series(dataset.population())?;
        let mut variables = Vec::with_capacity(dataset.variables().len());
        for (name, series) in dataset.variables() {
            variables.push((name.as_str(), evaluator.series(series)?));
        }

        let mut results = Vec::new();
        for patient_id in evaluator.candidates(dataset.population())? {
            let at = RowRef::patient(patient_id);
            if population.get(at)? != Value::Bool(true) {
                continue;
            }
            let mut row = ResultRow::new(patient_id);
            for (name, column) in &variables {
                row = row.with_value(*name, column.get(at)?);
            }
            results.push(row);
        }
        log::debug!(
            "Evaluated {} variables for {} patients in memory",
            variables.len(),
            results.len()
        );
        Ok(results)
    }
}

struct Evaluator<'db> {
    database: &'db InMemoryDatabase,
    /// Every patient known to the database or to an inline table
    patients: BTreeSet<i64>,
    frames: HashMap<Frame, Arc<Rows>>,
    series: HashMap<Series, Arc<Column>>,
}

impl<'db> Evaluator<'db> {
    fn new(database: &'db InMemoryDatabase, dataset: &Dataset) -> EvalResult<Self> {
        let mut patients = database.patient_ids();
        for node in walk(dataset.all_series()) {
            if let Node::Frame(frame) = node {
                match frame.kind() {
                    FrameKind::InlinePatientTable { rows, .. } => {
                        patients.extend(rows.iter().map(|row| row.patient_id));
                    }
                    FrameKind::SelectTable { name, .. }
                    | FrameKind::SelectPatientTable { name, .. } => {
                        database.table(name)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(Self {
            database,
            patients,
            frames: HashMap::new(),
            series: HashMap::new(),
        })
    }

    /// Patients with a row in any table the population reads
    fn candidates(&mut self, population: &Series) -> EvalResult<BTreeSet<i64>> {
        let mut candidates = BTreeSet::new();
        for frame in table_nodes(population) {
            match self.frame(&frame)?.as_ref() {
                Rows::Many { table, rows } => {
                    let data = self.database.table(table)?;
                    candidates.extend(rows.iter().map(|row| data.rows()[*row].patient_id));
                }
                Rows::PerPatient { rows, .. } => candidates.extend(rows.keys().copied()),
                Rows::Inline { rows, .. } => candidates.extend(rows.keys().copied()),
            }
        }
        Ok(candidates)
    }

    fn table(&self, frame: &Frame) -> EvalResult<&'db TableData> {
        let name = frame
            .table_name()
            .ok_or_else(|| EvalError::internal("frame is not rooted in a stored table"))?;
        self.database.table(name)
    }

    // === Frames ===

    fn frame(&mut self, frame: &Frame) -> EvalResult<Arc<Rows>> {
        if let Some(done) = self.frames.get(frame) {
            return Ok(Arc::clone(done));
        }
        let rows = match frame.kind() {
            FrameKind::SelectTable { name, .. } => Rows::Many {
                table: name.clone(),
                rows: (0..self.database.table(name)?.rows().len()).collect(),
            },
            FrameKind::SelectPatientTable { name, .. } => {
                let data = self.database.table(name)?;
                Rows::PerPatient {
                    table: name.clone(),
                    rows: data
                        .rows()
                        .iter()
                        .enumerate()
                        .map(|(index, row)| (row.patient_id, index))
                        .collect(),
                }
            }
            FrameKind::InlinePatientTable { schema, rows } => Rows::Inline {
                columns: schema.column_names().map(str::to_string).collect(),
                rows: rows
                    .iter()
                    .map(|row| (row.patient_id, row.values.clone()))
                    .collect(),
            },
            FrameKind::Filter { source, condition } => {
                let (table, rows) = self.many_rows(source)?;
                let condition = self.series(condition)?;
                let data = self.database.table(&table)?;
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    let at = RowRef {
                        patient_id: data.rows()[row].patient_id,
                        row: Some(row),
                    };
                    if condition.get(at)? == Value::Bool(true) {
                        kept.push(row);
                    }
                }
                Rows::Many { table, rows: kept }
            }
            // ordering only matters to a later pick
            FrameKind::Sort { source, .. } => {
                let (table, rows) = self.many_rows(source)?;
                Rows::Many { table, rows }
            }
            FrameKind::PickOneRowPerPatient {
                source,
                position,
                selected_columns,
            } => self.pick(source, *position, selected_columns.iter())?,
        };
        let rows = Arc::new(rows);
        self.frames.insert(frame.clone(), Arc::clone(&rows));
        Ok(rows)
    }

    fn many_rows(&mut self, frame: &Frame) -> EvalResult<(String, Vec<usize>)> {
        match self.frame(frame)?.as_ref() {
            Rows::Many { table, rows } => Ok((table.clone(), rows.clone())),
            _ => Err(EvalError::internal(
                "expected a frame with many rows per patient",
            )),
        }
    }

    /// Keep the first (or last) row per patient by the sort keys, most recently
    /// applied first, then by the selected columns so ties resolve the same way
    /// on every run
    fn pick<'a>(
        &mut self,
        source: &Frame,
        position: Position,
        selected_columns: impl Iterator<Item = &'a String>,
    ) -> EvalResult<Rows> {
        let (table, rows) = self.many_rows(source)?;
        let data = self.database.table(&table)?;
        let keys = source
            .sort_keys()
            .iter()
            .map(|key| self.series(key))
            .collect::<EvalResult<Vec<_>>>()?;
        let tie_breakers = selected_columns
            .map(|name| {
                data.column_index(name).ok_or_else(|| {
                    EvalError::internal(format!("unknown column '{name}' in '{table}'"))
                })
            })
            .collect::<EvalResult<Vec<_>>>()?;

        let mut best: BTreeMap<i64, (Vec<Value>, usize)> = BTreeMap::new();
        for row in rows {
            let stored = &data.rows()[row];
            let at = RowRef {
                patient_id: stored.patient_id,
                row: Some(row),
            };
            let mut sort_key = Vec::with_capacity(keys.len() + tie_breakers.len());
            for key in &keys {
                sort_key.push(key.get(at)?);
            }
            sort_key.extend(tie_breakers.iter().map(|i| stored.values[*i].clone()));

            let replace = match best.get(&stored.patient_id) {
                None => true,
                Some((current, _)) => {
                    let ordering = sort_key.cmp(current);
                    match position {
                        Position::First => ordering == Ordering::Less,
                        Position::Last => ordering == Ordering::Greater,
                    }
                }
            };
            if replace {
                best.insert(stored.patient_id, (sort_key, row));
            }
        }
        Ok(Rows::PerPatient {
            table,
            rows: best
                .into_iter()
                .map(|(patient_id, (_, row))| (patient_id, row))
                .collect(),
        })
    }

    // === Series ===

    fn series(&mut self, series: &Series) -> EvalResult<Arc<Column>> {
        if let Some(done) = self.series.get(series) {
            return Ok(Arc::clone(done));
        }
        let column = match series.kind() {
            SeriesKind::Value { value, .. } => Column::Constant(value.clone()),
            SeriesKind::SelectColumn { source, name } => self.select_column(source, name)?,
            SeriesKind::Aggregate(aggregate) => self.aggregate(series, aggregate)?,
            SeriesKind::Function(function) => self.function(series, function)?,
        };
        let column = Arc::new(column);
        self.series.insert(series.clone(), Arc::clone(&column));
        Ok(column)
    }

    fn select_column(&mut self, source: &Frame, name: &str) -> EvalResult<Column> {
        let missing = || EvalError::internal(format!("unknown column '{name}'"));
        Ok(match self.frame(source)?.as_ref() {
            Rows::Many { table, rows } => {
                let data = self.database.table(table)?;
                let index = data.column_index(name).ok_or_else(missing)?;
                Column::Rows(
                    rows.iter()
                        .map(|row| (*row, data.rows()[*row].values[index].clone()))
                        .collect(),
                )
            }
            Rows::PerPatient { table, rows } => {
                let data = self.database.table(table)?;
                let index = data.column_index(name).ok_or_else(missing)?;
                Column::Patient {
                    values: rows
                        .iter()
                        .map(|(patient_id, row)| (*patient_id, data.rows()[*row].values[index].clone()))
                        .collect(),
                    default: Value::Null,
                }
            }
            Rows::Inline { columns, rows } => {
                let index = columns.iter().position(|c| c == name).ok_or_else(missing)?;
                Column::Patient {
                    values: rows
                        .iter()
                        .map(|(patient_id, values)| (*patient_id, values[index].clone()))
                        .collect(),
                    default: Value::Null,
                }
            }
        })
    }

    fn aggregate(&mut self, series: &Series, aggregate: &Aggregate) -> EvalResult<Column> {
        let default = aggregates::default_for(aggregate, series.ty());
        let source = aggregate
            .source_frame()
            .ok_or_else(|| EvalError::internal("aggregate over a one-row-per-patient series"))?;
        let (table, rows) = self.many_rows(source)?;
        let data = self.database.table(&table)?;

        let input = match aggregate.series() {
            Some(input) => Some(self.series(input)?),
            None => None,
        };
        // rows per patient, and the non-null input values among them
        let mut grouped: BTreeMap<i64, (usize, Vec<Value>)> = BTreeMap::new();
        for row in rows {
            let patient_id = data.rows()[row].patient_id;
            let (row_count, values) = grouped.entry(patient_id).or_default();
            *row_count += 1;
            if let Some(input) = &input {
                let value = input.get(RowRef {
                    patient_id,
                    row: Some(row),
                })?;
                if !value.is_null() {
                    values.push(value);
                }
            }
        }

        let mut values = HashMap::with_capacity(grouped.len());
        for (patient_id, (row_count, group)) in grouped {
            let value = match aggregate {
                Aggregate::Exists { .. } => Value::Bool(true),
                Aggregate::Count { .. } => Value::Int(row_count as i64),
                _ if group.is_empty() => continue,
                Aggregate::Min(_) => aggregates::minimum(&group),
                Aggregate::Max(_) => aggregates::maximum(&group),
                Aggregate::Sum(_) => aggregates::sum(&group)?,
                Aggregate::Mean(_) => aggregates::mean(&group)?,
                Aggregate::CountDistinct(_) => aggregates::count_distinct(&group),
                Aggregate::CombineAsSet(input) => aggregates::combine_as_set(input.ty(), &group)?,
                Aggregate::CountEpisodes {
                    maximum_gap_days, ..
                } => aggregates::count_episodes(&group, *maximum_gap_days)?,
            };
            values.insert(patient_id, value);
        }
        Ok(Column::Patient { values, default })
    }

    fn function(&mut self, series: &Series, function: &Function) -> EvalResult<Column> {
        let arguments = function
            .arguments()
            .into_iter()
            .map(|argument| self.series(argument))
            .collect::<EvalResult<Vec<_>>>()?;

        if let Some(constant) = constant_arguments(&arguments) {
            return Ok(Column::Constant(apply(function, &constant)?));
        }

        let mut values = Vec::with_capacity(arguments.len());
        match series.domain() {
            Domain::Patient => {
                let mut results = HashMap::with_capacity(self.patients.len());
                for patient_id in &self.patients {
                    let at = RowRef::patient(*patient_id);
                    values.clear();
                    for argument in &arguments {
                        values.push(argument.get(at)?);
                    }
                    results.insert(*patient_id, apply(function, &values)?);
                }
                Ok(Column::Patient {
                    values: results,
                    default: Value::Null,
                })
            }
            Domain::Rows(frame) => {
                let (_, rows) = self.many_rows(frame)?;
                let data = self.table(frame)?;
                let mut results = HashMap::with_capacity(rows.len());
                for row in rows {
                    let at = RowRef {
                        patient_id: data.rows()[row].patient_id,
                        row: Some(row),
                    };
                    values.clear();
                    for argument in &arguments {
                        values.push(argument.get(at)?);
                    }
                    results.insert(row, apply(function, &values)?);
                }
                Ok(Column::Rows(results))
            }
        }
    }
}

fn constant_arguments(arguments: &[Arc<Column>]) -> Option<Vec<Value>> {
    arguments
        .iter()
        .map(|argument| match argument.as_ref() {
            Column::Constant(value) => Some(value.clone()),
            _ => None,
        })
        .collect()
}

/// Apply a function to argument values given in `Function::arguments` order
fn apply(function: &Function, values: &[Value]) -> EvalResult<Value> {
    let arity = || EvalError::internal("wrong number of function arguments");
    match function {
        Function::Unary { op, .. } => {
            let [operand] = values else {
                return Err(arity());
            };
            operators::apply_unary(*op, operand)
        }
        Function::Binary { op, .. } => {
            let [lhs, rhs] = values else {
                return Err(arity());
            };
            operators::apply_binary(*op, lhs, rhs)
        }
        Function::MaximumOf(_) => comparison::maximum_of(values),
        Function::MinimumOf(_) => comparison::minimum_of(values),
        Function::Case { cases, default } => {
            for pair in values.chunks_exact(2).take(cases.len()) {
                if pair[0] == Value::Bool(true) {
                    return Ok(pair[1].clone());
                }
            }
            match default {
                Some(_) => values.last().cloned().ok_or_else(arity),
                None => Ok(Value::Null),
            }
        }
    }
}
