//! Dataset compiler
//!
//! Series compile to SQL expressions over a small number of tables:
//! - a many-rows series becomes an expression over its frame's root table, with
//!   the frame's filter conditions applied by whichever query reads it
//! - a one-row-per-patient series becomes an expression over patient-level
//!   tables (external patient tables or reified intermediate results), which are
//!   LEFT JOINed on `patient_id` by whichever query reads it
//!
//! Aggregates and picks are reified as intermediate tables keyed by patient.
//! Compiled nodes are memoized per compilation, so structurally identical nodes
//! compile to the same expression and share reified tables.

use indexmap::IndexMap;
use octofhir_ehrql_ir::graph::table_nodes;
use octofhir_ehrql_ir::transform::transform;
use octofhir_ehrql_ir::{
    Aggregate, BinaryFn, Dataset, Frame, FrameKind, Function, Position, Series, SeriesKind,
    UnaryFn,
};
use octofhir_ehrql_model::TableProvider;
use octofhir_ehrql_types::{EhrqlType, PATIENT_ID, TypedSet, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::EngineConfig;
use crate::dialect::{Dialect, get_dialect, one_if};
use crate::error::{CompileResult, SqlError};
use crate::generated::{GeneratedTable, ReifyMode, Statement, TableDefinition};
use crate::resolver::resolve;
use crate::sql_ast::{
    BinaryOperator, Expr, HorizontalFunction, JoinKind, OrderBy, Query, Select, SqlType,
    TableRef,
};
use crate::writer::statement_to_sql;

const VALUE: &str = "value";
const ROW_NUMBER: &str = "ehrql_row_num";

/// A compiled series
#[derive(Debug, Clone)]
enum Compiled {
    /// An expression producing the series' value
    Value(Expr),
    /// A boolean expression only usable as a condition
    Predicate(Expr),
    /// A literal set
    Set(TypedSet),
    /// A table of `(patient_id, value)` rows, one per set member
    SetTable(TableRef),
}

/// Caches owned by a single compilation
pub struct CompilationContext {
    mode: ReifyMode,
    series: HashMap<Series, Compiled>,
    patient_frames: HashMap<Frame, TableRef>,
    base_tables: HashMap<String, TableRef>,
    generated: IndexMap<String, Arc<GeneratedTable>>,
    /// Set once the population is known; later tables are narrowed to it
    population: Option<TableRef>,
}

impl CompilationContext {
    fn new(mode: ReifyMode) -> Self {
        Self {
            mode,
            series: HashMap::new(),
            patient_frames: HashMap::new(),
            base_tables: HashMap::new(),
            generated: IndexMap::new(),
            population: None,
        }
    }
}

/// Output of compiling a dataset
#[derive(Debug, Clone)]
pub struct CompiledDataset {
    /// Setup, the main statement and cleanup, in execution order
    pub statements: Vec<Statement>,
    /// Query returning the results; with batching, a template read page by page
    pub main: Statement,
    /// `patient_id` followed by each variable
    pub columns: Vec<(String, EhrqlType)>,
    /// Materialized results table when fetching in batches
    pub results_table: Option<Arc<GeneratedTable>>,
    /// Every table generated while compiling
    pub generated_tables: Vec<Arc<GeneratedTable>>,
}

impl CompiledDataset {
    /// Render every statement in execution order
    pub fn to_sql(&self, dialect: &dyn Dialect) -> CompileResult<Vec<String>> {
        self.statements
            .iter()
            .map(|statement| statement_to_sql(dialect, statement))
            .collect()
    }
}

/// Compiles datasets to SQL for one dialect and table provider
pub struct SqlEngine {
    dialect: Arc<dyn Dialect>,
    provider: Arc<dyn TableProvider>,
    config: EngineConfig,
    /// Distinguishes this engine's table names from other processes and runs
    token: String,
    counter: AtomicU64,
}

impl SqlEngine {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        provider: Arc<dyn TableProvider>,
        config: EngineConfig,
    ) -> CompileResult<Self> {
        config.validate()?;
        let engine = Self {
            dialect,
            provider,
            config,
            token: unique_token(),
            counter: AtomicU64::new(0),
        };
        engine.reify_mode()?;
        Ok(engine)
    }

    /// Engine for a dialect looked up in the registry
    pub fn for_dialect(
        name: &str,
        provider: Arc<dyn TableProvider>,
        config: EngineConfig,
    ) -> CompileResult<Self> {
        Self::new(get_dialect(name)?, provider, config)
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn reify_mode(&self) -> CompileResult<ReifyMode> {
        let mode = self
            .config
            .reification
            .unwrap_or_else(|| self.dialect.default_reify_mode());
        if !self.dialect.supports_reify_mode(mode) {
            return Err(SqlError::unsupported(
                self.dialect.name(),
                format!("reification as {mode}"),
            ));
        }
        Ok(mode)
    }

    fn next_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("tmp_{}_{}", self.token, n)
    }

    // === Entry points ===

    /// Compile a dataset into the statements that produce its results
    pub fn compile(&self, dataset: &Dataset) -> CompileResult<CompiledDataset> {
        let dataset = transform(dataset)?;
        let mut ctx = CompilationContext::new(self.reify_mode()?);

        let population = self.population_table(dataset.population(), &mut ctx)?;
        if self.config.narrow_to_population {
            ctx.population = Some(population.clone());
        }

        let mut columns = vec![(PATIENT_ID.to_string(), EhrqlType::Int)];
        let mut select = Select::from(population.clone()).column(population.patient_id(), PATIENT_ID);
        for (name, series) in dataset.variables() {
            let value = self.value(series, &mut ctx)?;
            select = select.column(value, name.clone());
            columns.push((name.clone(), series.ty().clone()));
        }
        let select = select.join_referenced_tables();

        let (main, results_table) = match self.config.batch_size {
            None => {
                let select = select.order_by(population.patient_id(), false);
                (Statement::Query(select.into()), None)
            }
            Some(_) => {
                let table = self.new_table(
                    &mut ctx,
                    columns.clone(),
                    TableDefinition::Query(select.into()),
                    ReifyMode::CreateTableAs,
                );
                let template = Select::from(table.to_ref());
                let template = columns.iter().fold(template, |s, (name, _)| {
                    s.column(table.to_ref().column(name.clone()), name.clone())
                });
                (Statement::Query(template.into()), Some(table))
            }
        };

        let statements = resolve(
            vec![main.clone()],
            &self.config,
            self.dialect.index_generated_tables(),
        );
        log::debug!(
            "Compiled dataset with {} variables for {}: {} generated tables, {} statements",
            dataset.variables().len(),
            self.dialect.name(),
            ctx.generated.len(),
            statements.len()
        );
        Ok(CompiledDataset {
            statements,
            main,
            columns,
            results_table,
            generated_tables: ctx.generated.into_values().collect(),
        })
    }

    /// Compile and render a dataset
    pub fn get_queries(&self, dataset: &Dataset) -> CompileResult<Vec<String>> {
        self.compile(dataset)?.to_sql(self.dialect())
    }

    // === Tables ===

    fn new_table(
        &self,
        ctx: &mut CompilationContext,
        columns: Vec<(String, EhrqlType)>,
        definition: TableDefinition,
        mode: ReifyMode,
    ) -> Arc<GeneratedTable> {
        let name = self.next_name();
        let physical = self.dialect.physical_table_name(&name, mode);
        let schema = match mode {
            ReifyMode::CreateTableAs => self.config.temp_schema.clone(),
            _ => None,
        };
        log::debug!("Reifying {} as {}", name, mode);
        let table = GeneratedTable::new(name.clone(), physical, schema, columns, definition, mode);
        ctx.generated.insert(name, table.clone());
        table
    }

    /// Reify a per-patient select using the compilation's default mechanism
    fn reify(
        &self,
        ctx: &mut CompilationContext,
        select: Select,
        columns: Vec<(String, EhrqlType)>,
    ) -> TableRef {
        let mut select = select;
        if let Some(population) = ctx.population.clone() {
            select = select.join(JoinKind::Inner, population);
        }
        let select = select.join_referenced_tables();
        let mode = ctx.mode;
        self.new_table(ctx, columns, TableDefinition::Query(select.into()), mode)
            .to_ref()
    }

    fn base_table(&self, frame: &Frame, ctx: &mut CompilationContext) -> CompileResult<TableRef> {
        let (FrameKind::SelectTable { name, schema } | FrameKind::SelectPatientTable { name, schema }) =
            frame.kind()
        else {
            return Err(SqlError::internal(format!("{frame} is not an external table")));
        };
        if let Some(table) = ctx.base_tables.get(name) {
            return Ok(table.clone());
        }
        let expression = self.provider.table_expression(name, schema)?;
        let table = TableRef::base(name.clone(), expression);
        ctx.base_tables.insert(name.clone(), table.clone());
        Ok(table)
    }

    /// Table with one row per patient holding the frame's columns
    fn patient_table(&self, frame: &Frame, ctx: &mut CompilationContext) -> CompileResult<TableRef> {
        if let Some(table) = ctx.patient_frames.get(frame) {
            log::trace!("Reusing table for {}", frame);
            return Ok(table.clone());
        }
        let table = match frame.kind() {
            FrameKind::SelectPatientTable { .. } => self.base_table(frame, ctx)?,
            FrameKind::InlinePatientTable { schema, rows } => {
                let mut columns = vec![(PATIENT_ID.to_string(), EhrqlType::Int)];
                columns.extend(schema.iter().map(|(name, c)| (name.to_string(), c.ty.clone())));
                let rows = rows
                    .iter()
                    .map(|row| {
                        std::iter::once(Value::Int(row.patient_id))
                            .chain(row.values.iter().cloned())
                            .collect()
                    })
                    .collect();
                let mode = ctx.mode;
                self.new_table(ctx, columns, TableDefinition::Rows(rows), mode)
                    .to_ref()
            }
            FrameKind::PickOneRowPerPatient {
                source,
                position,
                selected_columns,
            } => {
                let selected: Vec<String> = selected_columns.iter().cloned().collect();
                self.pick_table(source, *position, &selected, ctx)?
            }
            _ => {
                return Err(SqlError::internal(format!("{frame} is not a patient frame")));
            }
        };
        ctx.patient_frames.insert(frame.clone(), table.clone());
        Ok(table)
    }

    /// Select over the root table of an event frame with its filters applied
    fn event_select(&self, frame: &Frame, ctx: &mut CompilationContext) -> CompileResult<(TableRef, Select)> {
        let table = self.base_table(frame.root(), ctx)?;
        let mut select = Select::from(table.clone());
        for condition in frame.filter_conditions() {
            select = select.filter(self.predicate(&condition, ctx)?);
        }
        Ok((table, select))
    }

    fn pick_table(
        &self,
        source: &Frame,
        position: Position,
        selected: &[String],
        ctx: &mut CompilationContext,
    ) -> CompileResult<TableRef> {
        let (table, select) = self.event_select(source, ctx)?;
        let descending = position == Position::Last;

        // user keys, then the selected columns as tie-breakers; nulls first
        let mut keys = Vec::new();
        for key in source.sort_keys() {
            keys.push(self.value(&key, ctx)?);
        }
        keys.extend(selected.iter().map(|name| table.column(name.clone())));
        let order_by = keys
            .into_iter()
            .flat_map(|key| {
                let rank = Expr::case(
                    vec![(Expr::is_null(key.clone()), Expr::literal(0i64))],
                    Some(Expr::literal(1i64)),
                );
                [rank, key]
            })
            .map(|expr| OrderBy { expr, descending })
            .collect();
        let row_number = Expr::Window {
            function: Box::new(Expr::function("ROW_NUMBER", vec![])),
            partition_by: vec![table.patient_id()],
            order_by,
        };

        let schema = source.schema();
        let mut columns = vec![(PATIENT_ID.to_string(), EhrqlType::Int)];
        let mut ranked = select.column(table.patient_id(), PATIENT_ID);
        for name in selected {
            let Some(column) = schema.column(name) else {
                return Err(SqlError::internal(format!("{source} has no column {name}")));
            };
            ranked = ranked.column(table.column(name.clone()), name.clone());
            columns.push((name.clone(), column.ty.clone()));
        }
        ranked = ranked.column(row_number, ROW_NUMBER);
        if let Some(population) = ctx.population.clone() {
            ranked = ranked.join(JoinKind::Inner, population);
        }
        let ranked = ranked.join_referenced_tables();
        let mut ranked_columns = columns.clone();
        ranked_columns.push((ROW_NUMBER.to_string(), EhrqlType::Int));
        let ranked = self
            .new_table(
                ctx,
                ranked_columns,
                TableDefinition::Query(ranked.into()),
                ReifyMode::Subquery,
            )
            .to_ref();

        let picked = columns.iter().fold(Select::from(ranked.clone()), |s, (name, _)| {
            s.column(ranked.column(name.clone()), name.clone())
        });
        let picked = picked.filter(Expr::eq(ranked.column(ROW_NUMBER), Expr::literal(1i64)));
        Ok(self.reify(ctx, picked, columns))
    }

    fn population_table(&self, population: &Series, ctx: &mut CompilationContext) -> CompileResult<TableRef> {
        let mut sources = Vec::new();
        for frame in table_nodes(population) {
            let table = match frame.kind() {
                FrameKind::InlinePatientTable { .. } => self.patient_table(&frame, ctx)?,
                _ => self.base_table(&frame, ctx)?,
            };
            if !sources.contains(&table) {
                sources.push(table);
            }
        }
        let mut selects: Vec<Select> = sources
            .iter()
            .map(|table| Select::from(table.clone()).column(table.patient_id(), PATIENT_ID))
            .collect();
        let candidates: Query = match selects.len() {
            0 => Select::default()
                .column(Expr::cast(Expr::Null, SqlType::Integer), PATIENT_ID)
                .filter(Expr::eq(Expr::literal(1i64), Expr::literal(0i64)))
                .into(),
            1 => selects.swap_remove(0).distinct().into(),
            _ => Query::Union {
                all: false,
                selects,
            },
        };
        let id_column = vec![(PATIENT_ID.to_string(), EhrqlType::Int)];
        let mode = ctx.mode;
        let candidates = self
            .new_table(ctx, id_column.clone(), TableDefinition::Query(candidates), mode)
            .to_ref();

        let predicate = self.predicate(population, ctx)?;
        let select = Select::from(candidates.clone())
            .column(candidates.patient_id(), PATIENT_ID)
            .filter(predicate);
        Ok(self.reify(ctx, select, id_column))
    }

    // === Series ===

    fn compile_series(&self, series: &Series, ctx: &mut CompilationContext) -> CompileResult<Compiled> {
        if let Some(compiled) = ctx.series.get(series) {
            log::trace!("Reusing compiled {}", series);
            return Ok(compiled.clone());
        }
        let compiled = match series.kind() {
            SeriesKind::SelectColumn { source, name } => {
                let table = if source.is_patient_frame() {
                    self.patient_table(source, ctx)?
                } else {
                    self.base_table(source.root(), ctx)?
                };
                Compiled::Value(table.column(name.clone()))
            }
            SeriesKind::Value { value, .. } => match value {
                Value::Set(set) => Compiled::Set(set.clone()),
                Value::Null => Compiled::Value(Expr::Null),
                other => Compiled::Value(Expr::Literal(other.clone())),
            },
            SeriesKind::Aggregate(aggregate) => self.aggregate(series, aggregate, ctx)?,
            SeriesKind::Function(function) => self.function(function, ctx)?,
        };
        ctx.series.insert(series.clone(), compiled.clone());
        Ok(compiled)
    }

    /// Compile a series for use as a value
    fn value(&self, series: &Series, ctx: &mut CompilationContext) -> CompileResult<Expr> {
        match self.compile_series(series, ctx)? {
            Compiled::Value(expr) => Ok(expr),
            // keep NULL when the predicate is unknown
            Compiled::Predicate(predicate) => Ok(Expr::case(
                vec![
                    (predicate.clone(), Expr::literal(true)),
                    (Expr::not(predicate), Expr::literal(false)),
                ],
                None,
            )),
            Compiled::Set(_) | Compiled::SetTable(_) => Err(SqlError::internal(format!(
                "set-valued {series} used as a value"
            ))),
        }
    }

    /// Compile a boolean series for use as a condition
    fn predicate(&self, series: &Series, ctx: &mut CompilationContext) -> CompileResult<Expr> {
        match self.compile_series(series, ctx)? {
            Compiled::Predicate(predicate) => Ok(predicate),
            Compiled::Value(expr) => Ok(self.dialect.bool_is_true(expr)),
            Compiled::Set(_) | Compiled::SetTable(_) => Err(SqlError::internal(format!(
                "set-valued {series} used as a condition"
            ))),
        }
    }

    fn aggregate(
        &self,
        series: &Series,
        aggregate: &Aggregate,
        ctx: &mut CompilationContext,
    ) -> CompileResult<Compiled> {
        let id_column = (PATIENT_ID.to_string(), EhrqlType::Int);
        match aggregate {
            Aggregate::Exists { source } => {
                let (table, select) = self.event_select(source, ctx)?;
                let select = select.distinct().column(table.patient_id(), PATIENT_ID);
                let reified = self.reify(ctx, select, vec![id_column]);
                Ok(Compiled::Predicate(Expr::is_not_null(reified.patient_id())))
            }
            Aggregate::Count { source } => {
                let (table, select) = self.event_select(source, ctx)?;
                let select = select
                    .column(table.patient_id(), PATIENT_ID)
                    .column(Expr::function("COUNT", vec![Expr::Star]), VALUE)
                    .group_by(table.patient_id());
                let reified = self.reify(
                    ctx,
                    select,
                    vec![id_column, (VALUE.to_string(), EhrqlType::Int)],
                );
                Ok(Compiled::Value(Expr::coalesce(reified.column(VALUE), Expr::literal(0i64))))
            }
            Aggregate::CombineAsSet(input) => {
                let (table, select, value) = self.aggregate_input(input, ctx)?;
                let select = select
                    .distinct()
                    .column(table.patient_id(), PATIENT_ID)
                    .column(value.clone(), VALUE)
                    .filter(Expr::is_not_null(value));
                let element = input.ty().clone();
                let reified = self.reify(ctx, select, vec![id_column, (VALUE.to_string(), element)]);
                Ok(Compiled::SetTable(reified))
            }
            Aggregate::CountEpisodes {
                series: input,
                maximum_gap_days,
            } => self.count_episodes(input, *maximum_gap_days, ctx),
            Aggregate::Min(input)
            | Aggregate::Max(input)
            | Aggregate::Sum(input)
            | Aggregate::Mean(input)
            | Aggregate::CountDistinct(input) => {
                let (table, select, value) = self.aggregate_input(input, ctx)?;
                let aggregated = match aggregate {
                    Aggregate::Min(_) => Expr::function("MIN", vec![value]),
                    Aggregate::Max(_) => Expr::function("MAX", vec![value]),
                    Aggregate::Sum(_) => Expr::function("SUM", vec![value]),
                    Aggregate::Mean(_) => self.dialect.mean(value)?,
                    _ => Expr::Function {
                        name: "COUNT",
                        args: vec![value],
                        distinct: true,
                    },
                };
                let select = select
                    .column(table.patient_id(), PATIENT_ID)
                    .column(aggregated, VALUE)
                    .group_by(table.patient_id());
                let reified = self.reify(
                    ctx,
                    select,
                    vec![id_column, (VALUE.to_string(), series.ty().clone())],
                );
                let result = reified.column(VALUE);
                Ok(Compiled::Value(if aggregate.is_count_like() {
                    Expr::coalesce(result, Expr::literal(0i64))
                } else {
                    result
                }))
            }
        }
    }

    /// Select over the input's frame, plus the input's value expression
    fn aggregate_input(
        &self,
        input: &Series,
        ctx: &mut CompilationContext,
    ) -> CompileResult<(TableRef, Select, Expr)> {
        let Some(frame) = input.domain().frame() else {
            return Err(SqlError::internal(format!(
                "aggregate over one-row-per-patient {input}"
            )));
        };
        let (table, select) = self.event_select(frame, ctx)?;
        let value = self.value(input, ctx)?;
        Ok((table, select, value))
    }

    fn count_episodes(
        &self,
        input: &Series,
        maximum_gap_days: i64,
        ctx: &mut CompilationContext,
    ) -> CompileResult<Compiled> {
        let (table, select, date) = self.aggregate_input(input, ctx)?;
        let previous = Expr::Window {
            function: Box::new(Expr::function("LAG", vec![date.clone()])),
            partition_by: vec![table.patient_id()],
            order_by: vec![OrderBy {
                expr: date.clone(),
                descending: false,
            }],
        };
        let mut lagged = select
            .column(table.patient_id(), PATIENT_ID)
            .column(date.clone(), "date")
            .column(previous, "previous")
            .filter(Expr::is_not_null(date));
        if let Some(population) = ctx.population.clone() {
            lagged = lagged.join(JoinKind::Inner, population);
        }
        let lagged = self
            .new_table(
                ctx,
                vec![
                    (PATIENT_ID.to_string(), EhrqlType::Int),
                    ("date".to_string(), EhrqlType::Date),
                    ("previous".to_string(), EhrqlType::Date),
                ],
                TableDefinition::Query(lagged.join_referenced_tables().into()),
                ReifyMode::Subquery,
            )
            .to_ref();

        // a row starts an episode if it is the first or too far from the one before
        let gap = self
            .dialect
            .days_between(lagged.column("previous"), lagged.column("date"))?;
        let starts_episode = Expr::binary(
            BinaryOperator::Or,
            Expr::is_null(lagged.column("previous")),
            Expr::binary(BinaryOperator::Gt, gap, Expr::literal(maximum_gap_days)),
        );
        let select = Select::from(lagged.clone())
            .column(lagged.patient_id(), PATIENT_ID)
            .column(Expr::function("SUM", vec![one_if(starts_episode)]), VALUE)
            .group_by(lagged.patient_id());
        let reified = self.reify(
            ctx,
            select,
            vec![
                (PATIENT_ID.to_string(), EhrqlType::Int),
                (VALUE.to_string(), EhrqlType::Int),
            ],
        );
        Ok(Compiled::Value(Expr::coalesce(reified.column(VALUE), Expr::literal(0i64))))
    }

    fn function(&self, function: &Function, ctx: &mut CompilationContext) -> CompileResult<Compiled> {
        let dialect = self.dialect.as_ref();
        match function {
            Function::Unary { op, operand } => {
                if *op == UnaryFn::Not {
                    return Ok(Compiled::Predicate(Expr::not(self.predicate(operand, ctx)?)));
                }
                let value = self.value(operand, ctx)?;
                Ok(match op {
                    UnaryFn::IsNull => Compiled::Predicate(Expr::is_null(value)),
                    UnaryFn::Negate => Compiled::Value(Expr::Negate(Box::new(value))),
                    UnaryFn::CastToInt => Compiled::Value(dialect.cast_to_int(value)?),
                    UnaryFn::CastToFloat => Compiled::Value(dialect.cast_to_float(value)?),
                    UnaryFn::YearFromDate => Compiled::Value(dialect.year(value)?),
                    UnaryFn::MonthFromDate => Compiled::Value(dialect.month(value)?),
                    UnaryFn::DayFromDate => Compiled::Value(dialect.day(value)?),
                    UnaryFn::ToFirstOfYear => Compiled::Value(dialect.to_first_of_year(value)?),
                    UnaryFn::ToFirstOfMonth => Compiled::Value(dialect.to_first_of_month(value)?),
                    UnaryFn::Not => Compiled::Predicate(Expr::not(dialect.bool_is_true(value))),
                })
            }
            Function::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, ctx),
            Function::MaximumOf(args) | Function::MinimumOf(args) => {
                let args = args
                    .iter()
                    .map(|arg| self.value(arg, ctx))
                    .collect::<CompileResult<Vec<_>>>()?;
                let function = if matches!(function, Function::MaximumOf(_)) {
                    HorizontalFunction::Max
                } else {
                    HorizontalFunction::Min
                };
                Ok(Compiled::Value(Expr::Horizontal { function, args }))
            }
            Function::Case { cases, default } => {
                let mut compiled = Vec::with_capacity(cases.len());
                for (condition, value) in cases {
                    compiled.push((self.predicate(condition, ctx)?, self.value(value, ctx)?));
                }
                let default = match default {
                    Some(default) => Some(self.value(default, ctx)?),
                    None => None,
                };
                Ok(Compiled::Value(Expr::case(compiled, default)))
            }
        }
    }

    fn binary(
        &self,
        op: BinaryFn,
        lhs: &Series,
        rhs: &Series,
        ctx: &mut CompilationContext,
    ) -> CompileResult<Compiled> {
        let dialect = self.dialect.as_ref();
        if op == BinaryFn::In {
            return self.membership(lhs, rhs, ctx);
        }
        if matches!(op, BinaryFn::And | BinaryFn::Or) {
            let operator = if op == BinaryFn::And {
                BinaryOperator::And
            } else {
                BinaryOperator::Or
            };
            return Ok(Compiled::Predicate(Expr::binary(
                operator,
                self.predicate(lhs, ctx)?,
                self.predicate(rhs, ctx)?,
            )));
        }
        let (l, r) = (self.value(lhs, ctx)?, self.value(rhs, ctx)?);
        let comparison = match op {
            BinaryFn::Eq => Some(BinaryOperator::Eq),
            BinaryFn::Ne => Some(BinaryOperator::Ne),
            BinaryFn::Lt => Some(BinaryOperator::Lt),
            BinaryFn::Le => Some(BinaryOperator::Le),
            BinaryFn::Gt => Some(BinaryOperator::Gt),
            BinaryFn::Ge => Some(BinaryOperator::Ge),
            _ => None,
        };
        if let Some(operator) = comparison {
            return Ok(Compiled::Predicate(Expr::binary(operator, l, r)));
        }
        let value = match op {
            BinaryFn::Add => Expr::binary(BinaryOperator::Add, l, r),
            BinaryFn::Subtract => Expr::binary(BinaryOperator::Subtract, l, r),
            BinaryFn::Multiply => Expr::binary(BinaryOperator::Multiply, l, r),
            BinaryFn::TrueDivide => dialect.true_divide(l, r)?,
            BinaryFn::FloorDivide => dialect.floor_divide(l, r)?,
            BinaryFn::DateAddYears => dialect.add_years(l, r)?,
            BinaryFn::DateAddMonths => dialect.add_months(l, r)?,
            BinaryFn::DateAddDays => dialect.add_days(l, r)?,
            BinaryFn::DateDifferenceInYears => dialect.years_between(l, r)?,
            BinaryFn::DateDifferenceInMonths => dialect.months_between(l, r)?,
            BinaryFn::DateDifferenceInDays => dialect.days_between(l, r)?,
            BinaryFn::StringContains => {
                return Ok(Compiled::Predicate(dialect.string_contains(l, r)?));
            }
            _ => return Err(SqlError::internal(format!("unexpected operator {op}"))),
        };
        Ok(Compiled::Value(value))
    }

    fn membership(&self, lhs: &Series, rhs: &Series, ctx: &mut CompilationContext) -> CompileResult<Compiled> {
        let value = self.value(lhs, ctx)?;
        let null_if_lhs_null = |when_not_null: Expr| {
            Compiled::Value(Expr::case(
                vec![(Expr::is_null(value.clone()), Expr::Null)],
                Some(when_not_null),
            ))
        };
        match self.compile_series(rhs, ctx)? {
            Compiled::Set(set) if set.is_empty() => Ok(null_if_lhs_null(Expr::literal(false))),
            Compiled::Set(set) if set.len() <= self.config.max_in_list_size => {
                Ok(Compiled::Predicate(Expr::InList {
                    expr: Box::new(value),
                    list: set.iter().cloned().map(Expr::Literal).collect(),
                }))
            }
            Compiled::Set(set) => {
                let rows = set.iter().map(|v| vec![v.clone()]).collect();
                let mode = ctx.mode;
                let table = self
                    .new_table(
                        ctx,
                        vec![(VALUE.to_string(), set.element_type().clone())],
                        TableDefinition::Rows(rows),
                        mode,
                    )
                    .to_ref();
                Ok(Compiled::Predicate(Expr::InTable {
                    expr: Box::new(value),
                    table,
                    column: VALUE.to_string(),
                }))
            }
            Compiled::SetTable(table) => {
                let exists = Expr::ExistsInTable {
                    table,
                    value: Box::new(value.clone()),
                };
                Ok(Compiled::Value(Expr::case(
                    vec![
                        (Expr::is_null(value), Expr::Null),
                        (exists, Expr::literal(true)),
                    ],
                    Some(Expr::literal(false)),
                )))
            }
            Compiled::Value(_) | Compiled::Predicate(_) => Err(SqlError::internal(format!(
                "membership test against non-set {rhs}"
            ))),
        }
    }
}

/// Engines created in this process
static ENGINES: AtomicU64 = AtomicU64::new(0);

/// Process id, wall-clock nanoseconds and the engine's sequence number
fn unique_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let sequence = ENGINES.fetch_add(1, Ordering::Relaxed);
    format!("{:x}_{:x}_{:x}", std::process::id(), nanos, sequence)
}
