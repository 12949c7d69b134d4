//! Domains
//!
//! A domain describes which rows a series has. One-row-per-patient series live in
//! the patient domain and can be combined with anything. Many-rows-per-patient
//! series live in the domain of the frame they were selected from; two such series
//! combine only when one frame lies on the other's Filter/Sort lineage, and the
//! result takes the more derived of the two.

use std::fmt;

use crate::{Frame, IrResult, QueryModelError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Exactly one row per patient
    Patient,
    /// The rows of an event frame
    Rows(Frame),
}

impl Domain {
    pub fn is_patient(&self) -> bool {
        matches!(self, Self::Patient)
    }

    /// The event frame for a many-rows domain
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            Self::Patient => None,
            Self::Rows(frame) => Some(frame),
        }
    }

    /// Combine the domains of operands of a single operation
    pub fn combine<'a>(domains: impl IntoIterator<Item = &'a Domain>) -> IrResult<Domain> {
        let mut result: Option<Frame> = None;
        for domain in domains {
            let Domain::Rows(other) = domain else {
                continue;
            };
            result = Some(match result {
                None => other.clone(),
                Some(current) => {
                    if current.is_ancestor_or_self_of(other) {
                        other.clone()
                    } else if other.is_ancestor_or_self_of(&current) {
                        current
                    } else {
                        return Err(QueryModelError::domain_mismatch(format!(
                            "cannot combine rows of {current} with rows of {other}"
                        )));
                    }
                }
            });
        }
        Ok(result.map_or(Domain::Patient, Domain::Rows))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patient => write!(f, "patient"),
            Self::Rows(frame) => write!(f, "rows of {frame}"),
        }
    }
}
