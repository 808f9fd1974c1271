//! Bilevel reformulation of a dispatch problem through its KKT conditions.
//!
//! A participant optimising its offers faces a nested problem: it chooses offer
//! parameters, then the market dispatches at least cost given those offers. When the
//! dispatch problem is a continuous LP its optimality is captured exactly by the
//! Karush-Kuhn-Tucker conditions, so the nested problem collapses to a single level:
//! primal feasibility, dual feasibility, stationarity and complementary slackness become
//! constraints, and the participant's own objective goes on top.
//!
//! Complementary slackness is the only non-linear piece. It is encoded either as big-M
//! disjunctions (one binary indicator per condition, solvable by the MIP backend) or as
//! literal dual-times-slack products for a quadratic backend. The big-M constant must
//! dominate every dual and slack value the instance can produce;
//! [`KktProblem::check_big_m_slack`] audits the solved problem for conditions where the
//! constant turned out binding.
use crate::dispatch::problem::{
    solve_optimal, ConstraintKey, DispatchProblem, RowBounds, RowId, VariableId, VariableKey,
};
use crate::units::Money;
use anyhow::{bail, ensure, Context, Result};
use highs::{RowProblem, Sense};

/// The big-M constant used when no other value is configured
pub const DEFAULT_BIG_M: f64 = 1.0e7;

/// How complementary slackness is encoded
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComplementarityMode {
    /// Disjunctive encoding: per condition, a binary indicator and two inequalities force
    /// either the dual or the slack to zero
    BigM(f64),
    /// Literal dual-times-slack products; constructible, but only a backend with
    /// non-convex quadratic support can solve it
    Bilinear,
}

/// An offer parameter lifted out of the dispatch problem into an upper-level decision
#[derive(Debug, Clone, Copy, PartialEq)]
enum PromotionKind {
    /// The objective coefficient of a variable
    Cost(VariableId),
    /// The right hand side of a row
    Rhs(RowId),
    /// The upper bound of a variable
    UpperBound(VariableId),
}

#[derive(Debug, Clone, Copy)]
struct Promotion {
    kind: PromotionKind,
    lower: f64,
    upper: f64,
}

/// A handle to a promoted offer parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotedId(usize);

/// A term of the upper-level objective, minimised by [`KktProblem::solve`]
#[derive(Debug, Clone, Copy)]
pub enum UpperTerm {
    /// A cost on a dispatch variable
    Primal(VariableId, f64),
    /// A cost on a promoted offer parameter
    Promoted(PromotedId, f64),
}

/// Where the slack of a complementarity condition comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackSource {
    /// The lower bound of a row
    RowLower(ConstraintKey),
    /// The upper bound of a row
    RowUpper(ConstraintKey),
    /// The lower bound of a variable
    BoundLower(VariableKey),
    /// The upper bound of a variable
    BoundUpper(VariableKey),
}

/// Builds the single-level reformulation of a dispatch problem.
///
/// The dispatch problem is taken as the lower level and must be continuous; solve with
/// `fix_network_flows` to linearise any loss or link formulations first. Offer
/// parameters are promoted one by one, the upper objective is set over dispatch
/// variables and promoted parameters, and [`build`](Self::build) assembles the
/// reformulated problem.
pub struct KktReformulation<'a> {
    lower: &'a DispatchProblem,
    promotions: Vec<Promotion>,
    upper_objective: Vec<UpperTerm>,
}

impl<'a> KktReformulation<'a> {
    /// Wrap a continuous dispatch problem as the lower level
    pub fn new(lower: &'a DispatchProblem) -> Result<Self> {
        ensure!(
            !lower.has_discrete(),
            "The KKT reformulation needs a continuous dispatch problem, but this one contains \
             discrete variables. Enable fix_network_flows to linearise it."
        );
        Ok(Self {
            lower,
            promotions: Vec::new(),
            upper_objective: Vec::new(),
        })
    }

    /// Promote a variable's objective coefficient to an upper-level decision in
    /// `[lower, upper]`
    pub fn promote_cost(&mut self, variable: VariableId, lower: f64, upper: f64) -> Result<PromotedId> {
        self.push_promotion(PromotionKind::Cost(variable), lower, upper)
    }

    /// Promote a row's right hand side to an upper-level decision in `[lower, upper]`.
    ///
    /// Only equality and single-sided rows can be promoted; a range row has two
    /// independent sides.
    pub fn promote_rhs(&mut self, row: RowId, lower: f64, upper: f64) -> Result<PromotedId> {
        ensure!(
            !matches!(self.lower.row_bounds(row), RowBounds::Range(..)),
            "Cannot promote the right hand side of a range row"
        );
        self.push_promotion(PromotionKind::Rhs(row), lower, upper)
    }

    /// Promote a variable's upper bound to an upper-level decision in `[lower, upper]`
    pub fn promote_upper_bound(
        &mut self,
        variable: VariableId,
        lower: f64,
        upper: f64,
    ) -> Result<PromotedId> {
        self.push_promotion(PromotionKind::UpperBound(variable), lower, upper)
    }

    fn push_promotion(&mut self, kind: PromotionKind, lower: f64, upper: f64) -> Result<PromotedId> {
        ensure!(
            !self.promotions.iter().any(|p| p.kind == kind),
            "That offer parameter has already been promoted"
        );
        let id = PromotedId(self.promotions.len());
        self.promotions.push(Promotion { kind, lower, upper });
        Ok(id)
    }

    /// Set the upper-level objective, to be minimised over the KKT system
    pub fn set_upper_objective(&mut self, terms: Vec<UpperTerm>) {
        self.upper_objective = terms;
    }

    /// Assemble the reformulated single-level problem
    pub fn build(&self, mode: ComplementarityMode) -> KktProblem {
        Assembler::new(self, mode).assemble()
    }
}

/// The identity of an assembled feasibility row, for naming complementarity conditions
enum RowIdentity {
    /// A row of the dispatch problem
    Lower(usize),
    /// The explicit bound row of a variable whose upper bound was promoted
    Bound(usize),
}

/// The dual columns attached to one feasibility row
enum RowDuals {
    /// An equality row's unrestricted dual; always active, no complementarity
    Free(usize),
    /// The non-negative dual of a row bounded below
    Lower(usize),
    /// The non-negative dual of a row bounded above
    Upper(usize),
    /// Both duals of a range row
    Range { lower: usize, upper: usize },
}

#[derive(Debug, Clone)]
struct Column {
    cost: f64,
    lower: f64,
    upper: f64,
    integer: bool,
}

#[derive(Debug, Clone)]
struct Row {
    terms: Vec<(usize, f64)>,
    lower: f64,
    upper: f64,
}

/// One complementarity condition: the dual column and the linear slack it excludes
struct Condition {
    source: SlackSource,
    dual: usize,
    slack_terms: Vec<(usize, f64)>,
    slack_constant: f64,
}

struct Assembler<'a> {
    reformulation: &'a KktReformulation<'a>,
    mode: ComplementarityMode,
    columns: Vec<Column>,
    rows: Vec<Row>,
    conditions: Vec<Condition>,
}

impl<'a> Assembler<'a> {
    fn new(reformulation: &'a KktReformulation<'a>, mode: ComplementarityMode) -> Self {
        Self {
            reformulation,
            mode,
            columns: Vec::new(),
            rows: Vec::new(),
            conditions: Vec::new(),
        }
    }

    fn push_column(&mut self, cost: f64, lower: f64, upper: f64, integer: bool) -> usize {
        self.columns.push(Column {
            cost,
            lower,
            upper,
            integer,
        });
        self.columns.len() - 1
    }

    fn assemble(mut self) -> KktProblem {
        let lower = self.reformulation.lower;
        let num_primal = lower.num_variables();

        // primal columns, bounds as in the dispatch problem
        for j in 0..num_primal {
            let (l, u) = lower.variable_bounds(VariableId(j));
            self.push_column(0.0, l, u, false);
        }

        // promoted parameter columns
        let promoted_offset = num_primal;
        let mut cost_promotions: Vec<(usize, usize)> = Vec::new();
        let mut rhs_promotions: Vec<(usize, usize)> = Vec::new();
        let mut bound_promotions: Vec<(usize, usize)> = Vec::new();
        for promotion in &self.reformulation.promotions {
            let col = self.push_column(0.0, promotion.lower, promotion.upper, false);
            match promotion.kind {
                PromotionKind::Cost(variable) => cost_promotions.push((variable.0, col)),
                PromotionKind::Rhs(row) => rhs_promotions.push((row.0, col)),
                PromotionKind::UpperBound(variable) => {
                    // the bound becomes an explicit row, so the column is unbounded above
                    self.columns[variable.0].upper = f64::INFINITY;
                    bound_promotions.push((variable.0, col));
                }
            }
        }

        // the upper-level objective is the only objective of the reformulated problem
        for term in &self.reformulation.upper_objective {
            match *term {
                UpperTerm::Primal(variable, cost) => self.columns[variable.0].cost += cost,
                UpperTerm::Promoted(id, cost) => self.columns[promoted_offset + id.0].cost += cost,
            }
        }

        // primal feasibility rows, with promoted right hand sides moved into the terms
        let mut feasibility: Vec<(RowIdentity, Vec<(usize, f64)>, RowBounds)> = Vec::new();
        for i in 0..lower.num_rows() {
            let mut terms: Vec<(usize, f64)> = lower
                .row_terms(RowId(i))
                .iter()
                .map(|&(variable, coeff)| (variable.0, coeff))
                .collect();
            let mut bounds = lower.row_bounds(RowId(i));
            if let Some(&(_, col)) = rhs_promotions.iter().find(|&&(row, _)| row == i) {
                terms.push((col, -1.0));
                bounds = match bounds {
                    RowBounds::Equality(_) => RowBounds::Equality(0.0),
                    RowBounds::AtLeast(_) => RowBounds::AtLeast(0.0),
                    RowBounds::AtMost(_) => RowBounds::AtMost(0.0),
                    // range rows are rejected at promotion time
                    other => other,
                };
            }
            feasibility.push((RowIdentity::Lower(i), terms, bounds));
        }
        for &(variable, col) in &bound_promotions {
            feasibility.push((
                RowIdentity::Bound(variable),
                vec![(variable, 1.0), (col, -1.0)],
                RowBounds::AtMost(0.0),
            ));
        }
        for (_, terms, bounds) in &feasibility {
            self.rows.push(Row {
                terms: terms.clone(),
                lower: bounds.lower(),
                upper: bounds.upper(),
            });
        }

        // one dual column per bounded row side, free for equalities
        let row_duals: Vec<RowDuals> = feasibility
            .iter()
            .map(|(_, _, bounds)| match bounds {
                RowBounds::Equality(_) => {
                    RowDuals::Free(self.push_column(0.0, f64::NEG_INFINITY, f64::INFINITY, false))
                }
                RowBounds::AtLeast(_) => {
                    RowDuals::Lower(self.push_column(0.0, 0.0, f64::INFINITY, false))
                }
                RowBounds::AtMost(_) => {
                    RowDuals::Upper(self.push_column(0.0, 0.0, f64::INFINITY, false))
                }
                RowBounds::Range(..) => RowDuals::Range {
                    lower: self.push_column(0.0, 0.0, f64::INFINITY, false),
                    upper: self.push_column(0.0, 0.0, f64::INFINITY, false),
                },
            })
            .collect();

        // one dual column per finite variable bound
        let mut lower_bound_duals: Vec<Option<usize>> = vec![None; num_primal];
        let mut upper_bound_duals: Vec<Option<usize>> = vec![None; num_primal];
        for j in 0..num_primal {
            if self.columns[j].lower.is_finite() {
                lower_bound_duals[j] = Some(self.push_column(0.0, 0.0, f64::INFINITY, false));
            }
            if self.columns[j].upper.is_finite() {
                upper_bound_duals[j] = Some(self.push_column(0.0, 0.0, f64::INFINITY, false));
            }
        }

        // stationarity: per dispatch variable, the signed duals of everything that
        // references it balance its objective coefficient
        let mut stationarity: Vec<Vec<(usize, f64)>> = vec![Vec::new(); num_primal];
        for ((_, terms, _), duals) in feasibility.iter().zip(&row_duals) {
            for &(col, coeff) in terms {
                if col >= num_primal {
                    continue; // promoted parameters are not dispatch decisions
                }
                match duals {
                    RowDuals::Free(d) | RowDuals::Lower(d) => stationarity[col].push((*d, -coeff)),
                    RowDuals::Upper(d) => stationarity[col].push((*d, coeff)),
                    RowDuals::Range { lower, upper } => {
                        stationarity[col].push((*lower, -coeff));
                        stationarity[col].push((*upper, coeff));
                    }
                }
            }
        }
        for j in 0..num_primal {
            let mut terms = std::mem::take(&mut stationarity[j]);
            if let Some(d) = lower_bound_duals[j] {
                terms.push((d, -1.0));
            }
            if let Some(d) = upper_bound_duals[j] {
                terms.push((d, 1.0));
            }
            let rhs = match cost_promotions.iter().find(|&&(variable, _)| variable == j) {
                Some(&(_, col)) => {
                    terms.push((col, 1.0));
                    0.0
                }
                None => -lower.variable_cost(VariableId(j)),
            };
            self.rows.push(Row {
                terms,
                lower: rhs,
                upper: rhs,
            });
        }

        // complementarity: either the dual or its slack is zero
        for ((identity, terms, bounds), duals) in feasibility.iter().zip(&row_duals) {
            match duals {
                RowDuals::Free(_) => {}
                RowDuals::Lower(d) => {
                    self.push_condition(
                        self.row_source(identity, false),
                        *d,
                        terms.clone(),
                        -bounds.lower(),
                    );
                }
                RowDuals::Upper(d) => {
                    self.push_condition(
                        self.row_source(identity, true),
                        *d,
                        negated(terms),
                        bounds.upper(),
                    );
                }
                RowDuals::Range { lower, upper } => {
                    self.push_condition(
                        self.row_source(identity, false),
                        *lower,
                        terms.clone(),
                        -bounds.lower(),
                    );
                    self.push_condition(
                        self.row_source(identity, true),
                        *upper,
                        negated(terms),
                        bounds.upper(),
                    );
                }
            }
        }
        for j in 0..num_primal {
            if let Some(d) = lower_bound_duals[j] {
                let key = lower.variable_key(VariableId(j)).clone();
                self.push_condition(
                    SlackSource::BoundLower(key),
                    d,
                    vec![(j, 1.0)],
                    -self.columns[j].lower,
                );
            }
            if let Some(d) = upper_bound_duals[j] {
                let key = lower.variable_key(VariableId(j)).clone();
                self.push_condition(
                    SlackSource::BoundUpper(key),
                    d,
                    vec![(j, -1.0)],
                    self.columns[j].upper,
                );
            }
        }

        KktProblem {
            columns: self.columns,
            rows: self.rows,
            conditions: self.conditions,
            mode: self.mode,
            promoted_offset,
        }
    }

    fn row_source(&self, identity: &RowIdentity, upper_side: bool) -> SlackSource {
        let lower = self.reformulation.lower;
        match identity {
            RowIdentity::Lower(i) => {
                let key = lower.row_key(RowId(*i)).clone();
                if upper_side {
                    SlackSource::RowUpper(key)
                } else {
                    SlackSource::RowLower(key)
                }
            }
            RowIdentity::Bound(j) => {
                SlackSource::BoundUpper(lower.variable_key(VariableId(*j)).clone())
            }
        }
    }

    /// Record one condition and, in big-M mode, the disjunction enforcing it.
    ///
    /// The slack is `slack_constant + sum(slack_terms)`, non-negative by feasibility.
    fn push_condition(
        &mut self,
        source: SlackSource,
        dual: usize,
        slack_terms: Vec<(usize, f64)>,
        slack_constant: f64,
    ) {
        if let ComplementarityMode::BigM(big_m) = self.mode {
            let indicator = self.push_column(0.0, 0.0, 1.0, true);
            // dual <= M z
            self.rows.push(Row {
                terms: vec![(dual, 1.0), (indicator, -big_m)],
                lower: f64::NEG_INFINITY,
                upper: 0.0,
            });
            // slack <= M (1 - z)
            let mut terms = slack_terms.clone();
            terms.push((indicator, big_m));
            self.rows.push(Row {
                terms,
                lower: f64::NEG_INFINITY,
                upper: big_m - slack_constant,
            });
        }
        self.conditions.push(Condition {
            source,
            dual,
            slack_terms,
            slack_constant,
        });
    }
}

fn negated(terms: &[(usize, f64)]) -> Vec<(usize, f64)> {
    terms.iter().map(|&(col, coeff)| (col, -coeff)).collect()
}

/// The assembled single-level reformulation
pub struct KktProblem {
    columns: Vec<Column>,
    rows: Vec<Row>,
    conditions: Vec<Condition>,
    mode: ComplementarityMode,
    promoted_offset: usize,
}

impl KktProblem {
    /// The number of complementarity conditions in the formulation
    pub fn num_conditions(&self) -> usize {
        self.conditions.len()
    }

    /// Solve the reformulated problem, minimising the upper-level objective
    pub fn solve(&self) -> Result<KktSolution> {
        if self.mode == ComplementarityMode::Bilinear {
            bail!(
                "The bilinear complementarity mode needs a backend with non-convex quadratic \
                 support; solve with the big-M mode instead"
            );
        }

        let mut problem = RowProblem::default();
        let mut cols = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let col = if column.integer {
                problem.add_integer_column(column.cost, column.lower..=column.upper)
            } else {
                problem.add_column(column.cost, column.lower..=column.upper)
            };
            cols.push(col);
        }
        for row in &self.rows {
            problem.add_row(
                row.lower..=row.upper,
                row.terms.iter().map(|&(col, coeff)| (cols[col], coeff)),
            );
        }

        let mut model = problem.optimise(Sense::Minimise);
        model.set_option("output_flag", false);
        let solved = solve_optimal(model).context("Solving the reformulated bilevel problem")?;
        let solution = solved.get_solution();
        Ok(KktSolution {
            objective_value: Money(solved.objective_value()),
            values: solution.columns().to_vec(),
            promoted_offset: self.promoted_offset,
        })
    }

    /// Conditions whose dual or slack reached the big-M ceiling at the optimum.
    ///
    /// A non-empty result means the constant was too small for this instance and the
    /// solution cannot be trusted; solve again with a larger big-M.
    pub fn check_big_m_slack(&self, solution: &KktSolution) -> Vec<SlackSource> {
        let ComplementarityMode::BigM(big_m) = self.mode else {
            return Vec::new();
        };
        let tolerance = 1e-6 * big_m.max(1.0);
        self.conditions
            .iter()
            .filter(|condition| {
                let dual = solution.values[condition.dual];
                let slack = condition.slack_constant
                    + condition
                        .slack_terms
                        .iter()
                        .map(|&(col, coeff)| coeff * solution.values[col])
                        .sum::<f64>();
                dual >= big_m - tolerance || slack >= big_m - tolerance
            })
            .map(|condition| condition.source.clone())
            .collect()
    }
}

/// The numeric result of solving a [`KktProblem`]
#[derive(Debug, Clone)]
pub struct KktSolution {
    /// The upper-level objective value
    pub objective_value: Money,
    values: Vec<f64>,
    promoted_offset: usize,
}

impl KktSolution {
    /// The value of a dispatch variable
    pub fn value(&self, variable: VariableId) -> f64 {
        self.values[variable.0]
    }

    /// The chosen value of a promoted offer parameter
    pub fn promoted_value(&self, id: PromotedId) -> f64 {
        self.values[self.promoted_offset + id.0]
    }
}
