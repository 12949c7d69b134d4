//! Normalization pass run before compilation
//!
//! - Every `PickOneRowPerPatient` learns which of its columns the dataset reads, so
//!   engines can fetch them in one windowed pass and use them as tie-breakers.
//! - `MaximumOf`/`MinimumOf` with a single argument collapse to that argument.
//!
//! Rewritten nodes go back through the regular constructors, so the output obeys
//! the same invariants as the input.

use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};

use crate::graph::walk;
use crate::{
    Aggregate, Dataset, Frame, FrameKind, Function, IrResult, Node, Series, SeriesKind,
};

/// Apply every rewrite to a dataset
pub fn transform(dataset: &Dataset) -> IrResult<Dataset> {
    let mut rewriter = Rewriter {
        selected: selected_columns_by_pick(dataset),
        frames: HashMap::new(),
        series: HashMap::new(),
    };
    let population = rewriter.series(dataset.population())?;
    let mut variables = IndexMap::with_capacity(dataset.variables().len());
    for (name, series) in dataset.variables() {
        variables.insert(name.clone(), rewriter.series(series)?);
    }
    log::debug!(
        "Transformed dataset: {} frames, {} series rewritten",
        rewriter.frames.len(),
        rewriter.series.len()
    );
    Ok(Dataset::from_parts(population, variables))
}

fn selected_columns_by_pick(dataset: &Dataset) -> HashMap<Frame, BTreeSet<String>> {
    let mut selected: HashMap<Frame, BTreeSet<String>> = HashMap::new();
    for node in walk(dataset.all_series()) {
        if let Node::Series(series) = node {
            if let SeriesKind::SelectColumn { source, name } = series.kind() {
                if matches!(source.kind(), FrameKind::PickOneRowPerPatient { .. }) {
                    selected
                        .entry(source.clone())
                        .or_default()
                        .insert(name.clone());
                }
            }
        }
    }
    selected
}

struct Rewriter {
    selected: HashMap<Frame, BTreeSet<String>>,
    frames: HashMap<Frame, Frame>,
    series: HashMap<Series, Series>,
}

impl Rewriter {
    fn frame(&mut self, frame: &Frame) -> IrResult<Frame> {
        if let Some(done) = self.frames.get(frame) {
            return Ok(done.clone());
        }
        let rewritten = match frame.kind() {
            FrameKind::SelectTable { .. }
            | FrameKind::SelectPatientTable { .. }
            | FrameKind::InlinePatientTable { .. } => frame.clone(),
            FrameKind::Filter { source, condition } => Frame::from_kind(FrameKind::Filter {
                source: self.frame(source)?,
                condition: self.series(condition)?,
            }),
            FrameKind::Sort { source, sort_by } => Frame::from_kind(FrameKind::Sort {
                source: self.frame(source)?,
                sort_by: self.series(sort_by)?,
            }),
            FrameKind::PickOneRowPerPatient {
                source,
                position,
                selected_columns,
            } => {
                let mut columns = selected_columns.clone();
                if let Some(extra) = self.selected.get(frame) {
                    columns.extend(extra.iter().cloned());
                }
                Frame::from_kind(FrameKind::PickOneRowPerPatient {
                    source: self.frame(source)?,
                    position: *position,
                    selected_columns: columns,
                })
            }
        };
        self.frames.insert(frame.clone(), rewritten.clone());
        Ok(rewritten)
    }

    fn series(&mut self, series: &Series) -> IrResult<Series> {
        if let Some(done) = self.series.get(series) {
            return Ok(done.clone());
        }
        let rewritten = match series.kind() {
            SeriesKind::Value { .. } => series.clone(),
            SeriesKind::SelectColumn { source, name } => {
                Series::from_kind(SeriesKind::SelectColumn {
                    source: self.frame(source)?,
                    name: name.clone(),
                })?
            }
            SeriesKind::Aggregate(aggregate) => {
                let aggregate = self.aggregate(aggregate)?;
                Series::from_kind(SeriesKind::Aggregate(aggregate))?
            }
            SeriesKind::Function(Function::MaximumOf(args) | Function::MinimumOf(args))
                if args.len() == 1 =>
            {
                self.series(&args[0])?
            }
            SeriesKind::Function(function) => {
                let function = self.function(function)?;
                Series::from_kind(SeriesKind::Function(function))?
            }
        };
        self.series.insert(series.clone(), rewritten.clone());
        Ok(rewritten)
    }

    fn many(&mut self, args: &[Series]) -> IrResult<Vec<Series>> {
        args.iter().map(|arg| self.series(arg)).collect()
    }

    fn aggregate(&mut self, aggregate: &Aggregate) -> IrResult<Aggregate> {
        Ok(match aggregate {
            Aggregate::Exists { source } => Aggregate::Exists {
                source: self.frame(source)?,
            },
            Aggregate::Count { source } => Aggregate::Count {
                source: self.frame(source)?,
            },
            Aggregate::Min(s) => Aggregate::Min(self.series(s)?),
            Aggregate::Max(s) => Aggregate::Max(self.series(s)?),
            Aggregate::Sum(s) => Aggregate::Sum(self.series(s)?),
            Aggregate::Mean(s) => Aggregate::Mean(self.series(s)?),
            Aggregate::CountDistinct(s) => Aggregate::CountDistinct(self.series(s)?),
            Aggregate::CombineAsSet(s) => Aggregate::CombineAsSet(self.series(s)?),
            Aggregate::CountEpisodes {
                series,
                maximum_gap_days,
            } => Aggregate::CountEpisodes {
                series: self.series(series)?,
                maximum_gap_days: *maximum_gap_days,
            },
        })
    }

    fn function(&mut self, function: &Function) -> IrResult<Function> {
        Ok(match function {
            Function::Unary { op, operand } => Function::Unary {
                op: *op,
                operand: self.series(operand)?,
            },
            Function::Binary { op, lhs, rhs } => Function::Binary {
                op: *op,
                lhs: self.series(lhs)?,
                rhs: self.series(rhs)?,
            },
            Function::MaximumOf(args) => Function::MaximumOf(self.many(args)?),
            Function::MinimumOf(args) => Function::MinimumOf(self.many(args)?),
            Function::Case { cases, default } => {
                let mut rewritten = Vec::with_capacity(cases.len());
                for (condition, value) in cases {
                    rewritten.push((self.series(condition)?, self.series(value)?));
                }
                let default = match default {
                    Some(default) => Some(self.series(default)?),
                    None => None,
                };
                Function::Case {
                    cases: rewritten,
                    default,
                }
            }
        })
    }
}
