//! Split semantics: which successors receive a live continuation
//!
//! Every split produces one continuation per branch and then retires the
//! executor that arrived. Branches that are not taken still receive a dead
//! continuation so that downstream joins can account for them.

use crate::variates::VariateSource;
use flowsim_types::{Edge, EvalContext, FlowId, FlowResult, SplitKind};

/// One continuation produced by a split
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Branch {
    pub target: FlowId,
    pub live: bool,
}

/// Fan-out behaviour of a split node
pub trait Splitter {
    /// Decide the continuations for an arrival. `live` is the liveness of
    /// the arriving token; a dead arrival never evaluates guards.
    fn branches(
        &self,
        successors: &[Edge],
        live: bool,
        ctx: &EvalContext<'_>,
        variates: &mut dyn VariateSource,
    ) -> FlowResult<Vec<Branch>>;
}

impl Splitter for SplitKind {
    fn branches(
        &self,
        successors: &[Edge],
        live: bool,
        ctx: &EvalContext<'_>,
        variates: &mut dyn VariateSource,
    ) -> FlowResult<Vec<Branch>> {
        if let SplitKind::ThreadSplit { instances } = *self {
            let target = match successors.first() {
                Some(edge) => edge.target,
                None => return Ok(Vec::new()),
            };
            return Ok((0..instances).map(|_| Branch { target, live }).collect());
        }

        if !live {
            return Ok(successors
                .iter()
                .map(|edge| Branch {
                    target: edge.target,
                    live: false,
                })
                .collect());
        }

        match self {
            SplitKind::Parallel => Ok(successors
                .iter()
                .map(|edge| Branch {
                    target: edge.target,
                    live: true,
                })
                .collect()),

            SplitKind::ExclusiveChoice => {
                let mut chosen = false;
                let mut branches = Vec::with_capacity(successors.len());
                for edge in successors {
                    // guards after the winner are never evaluated
                    let live = !chosen && guard_holds(edge, ctx)?;
                    chosen |= live;
                    branches.push(Branch {
                        target: edge.target,
                        live,
                    });
                }
                Ok(branches)
            }

            SplitKind::MultiChoice => successors
                .iter()
                .map(|edge| {
                    Ok(Branch {
                        target: edge.target,
                        live: guard_holds(edge, ctx)?,
                    })
                })
                .collect(),

            SplitKind::ProbabilitySelection => {
                let weights: Vec<f64> = successors.iter().map(|edge| edge.weight).collect();
                let winner = variates.choose_weighted(ctx.entity.id, &weights)?;
                Ok(successors
                    .iter()
                    .enumerate()
                    .map(|(i, edge)| Branch {
                        target: edge.target,
                        live: i == winner,
                    })
                    .collect())
            }

            SplitKind::ThreadSplit { .. } => Ok(Vec::new()),
        }
    }
}

fn guard_holds(edge: &Edge, ctx: &EvalContext<'_>) -> FlowResult<bool> {
    match &edge.condition {
        Some(condition) => condition.evaluate(ctx),
        None => Ok(true),
    }
}
