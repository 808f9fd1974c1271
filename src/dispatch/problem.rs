//! The symbolic dispatch problem.
//!
//! Builders register variables and constraint rows here under typed keys rather than
//! writing straight into the solver. The symbolic form is what makes the rest of the
//! engine possible: re-solve pricing perturbs a row and solves again, the bilevel
//! reformulator walks rows and bounds to write optimality conditions, and infeasibility
//! diagnosis re-solves with rows removed. Lowering to the solver happens once per solve,
//! with columns and rows emitted in registration order so solution vectors line up with
//! the stored definitions.
use crate::id::{ConstraintID, InterconnectorID, LinkID, RegionID, UnitID};
use crate::service::FcasService;
use crate::units::{Money, MoneyPerMegaWattHour};
use highs::{HighsModelStatus, HighsStatus, RowProblem, Sense};
use indexmap::IndexMap;
use std::error::Error;
use std::fmt;
use std::io::Write;

/// Identifies a decision variable by what it decides
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableKey {
    /// Cleared volume in one band of a unit's energy offer
    EnergyBand {
        /// The offering unit
        unit: UnitID,
        /// The band number, counting from one
        band: usize,
    },
    /// A unit's energy target
    TotalCleared {
        /// The dispatched unit
        unit: UnitID,
    },
    /// Cleared volume in one band of a unit's FCAS offer
    FcasBand {
        /// The offering unit
        unit: UnitID,
        /// The offered service
        service: FcasService,
        /// The band number, counting from one
        band: usize,
    },
    /// A unit's FCAS target for one service
    FcasTarget {
        /// The dispatched unit
        unit: UnitID,
        /// The dispatched service
        service: FcasService,
    },
    /// A region's total cleared FCAS for one service
    RegionalFcas {
        /// The region
        region: RegionID,
        /// The service
        service: FcasService,
    },
    /// Signed flow on an interconnector, positive in the nominated direction
    InterconnectorFlow {
        /// The interconnector
        interconnector: InterconnectorID,
    },
    /// Total losses on an interconnector
    Loss {
        /// The interconnector
        interconnector: InterconnectorID,
    },
    /// Convex-combination weight on one loss-curve breakpoint
    LossWeight {
        /// The interconnector
        interconnector: InterconnectorID,
        /// The breakpoint index
        breakpoint: usize,
    },
    /// Binary indicator selecting one loss-curve segment
    LossSegment {
        /// The interconnector
        interconnector: InterconnectorID,
        /// The segment index
        segment: usize,
    },
    /// Flow on one direction of an MNSP link
    LinkFlow {
        /// The link
        link: LinkID,
    },
    /// Cleared volume in one band of an MNSP link offer
    LinkBand {
        /// The link
        link: LinkID,
        /// The band number, counting from one
        band: usize,
    },
    /// Binary indicator choosing the active direction of an MNSP
    LinkDirection {
        /// The interconnector the links belong to
        interconnector: InterconnectorID,
    },
    /// Penalised slack absorbing violation of a soft row
    Slack {
        /// The softened row
        row: Box<ConstraintKey>,
        /// Which side of the row the slack relaxes
        side: SlackSide,
    },
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use VariableKey::*;
        match self {
            EnergyBand { unit, band } => write!(f, "energy_band({unit},{band})"),
            TotalCleared { unit } => write!(f, "total_cleared({unit})"),
            FcasBand { unit, service, band } => write!(f, "fcas_band({unit},{service},{band})"),
            FcasTarget { unit, service } => write!(f, "fcas_target({unit},{service})"),
            RegionalFcas { region, service } => write!(f, "regional_fcas({region},{service})"),
            InterconnectorFlow { interconnector } => write!(f, "flow({interconnector})"),
            Loss { interconnector } => write!(f, "loss({interconnector})"),
            LossWeight {
                interconnector,
                breakpoint,
            } => write!(f, "loss_weight({interconnector},{breakpoint})"),
            LossSegment {
                interconnector,
                segment,
            } => write!(f, "loss_segment({interconnector},{segment})"),
            LinkFlow { link } => write!(f, "link_flow({link})"),
            LinkBand { link, band } => write!(f, "link_band({link},{band})"),
            LinkDirection { interconnector } => write!(f, "link_direction({interconnector})"),
            Slack { row, side } => write!(f, "slack_{side}({row})"),
        }
    }
}

/// Which side of a row a slack variable relaxes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlackSide {
    /// The left-hand side fell short of the lower bound
    Deficit,
    /// The left-hand side exceeded the upper bound
    Excess,
}

impl fmt::Display for SlackSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlackSide::Deficit => write!(f, "deficit"),
            SlackSide::Excess => write!(f, "excess"),
        }
    }
}

/// Which side of an FCAS trapezium a coupling row enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapeziumSide {
    /// The enablement-minimum side
    Lower,
    /// The enablement-maximum side
    Upper,
}

impl fmt::Display for TrapeziumSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapeziumSide::Lower => write!(f, "lower"),
            TrapeziumSide::Upper => write!(f, "upper"),
        }
    }
}

/// Identifies a constraint row by what it enforces
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ConstraintKey {
    /// A unit's energy target equals the sum of its cleared bands
    BandSum { unit: UnitID },
    /// A load's target may not exceed its declared maximum availability
    MaxAvailability { unit: UnitID },
    /// A unit may not ramp up faster than its effective rate
    RampUp { unit: UnitID },
    /// A unit may not ramp down faster than its effective rate
    RampDown { unit: UnitID },
    /// A semi-scheduled unit's target may not exceed its forecast
    UigfCeiling { unit: UnitID },
    /// An inflexible unit is dispatched to its fixed loading level
    FixedLoad { unit: UnitID },
    /// Energy delivered this interval may not exceed the remaining daily limit
    DailyEnergy { unit: UnitID },
    /// A fast-start unit follows its inflexibility profile
    FastStartProfile { unit: UnitID },
    /// A unit's target is pinned to its historical value
    FixedTarget { unit: UnitID },
    /// A unit with no energy offer holds its telemetered output
    HoldInitial { unit: UnitID },
    /// An FCAS target equals the sum of its cleared bands
    FcasBandSum { unit: UnitID, service: FcasService },
    /// An FCAS target may not exceed the scaled maximum availability
    FcasMaxAvail { unit: UnitID, service: FcasService },
    /// Energy plus raise regulation may not outrun the ramp-up window
    JointRampUp { unit: UnitID },
    /// Energy minus lower regulation may not outrun the ramp-down window
    JointRampDown { unit: UnitID },
    /// Energy and regulation together stay inside the scaled enablement bound
    EnergyRegulatingCapacity {
        unit: UnitID,
        service: FcasService,
        side: TrapeziumSide,
    },
    /// Energy, contingency FCAS and same-direction regulation stay inside the joint bound
    JointCapacity {
        unit: UnitID,
        service: FcasService,
        side: TrapeziumSide,
    },
    /// A stranded unit's FCAS target is held at zero
    FcasStranded { unit: UnitID, service: FcasService },
    /// Supply, interchange and losses meet a region's demand
    RegionBalance { region: RegionID },
    /// A region's FCAS total equals the sum of its units' targets
    RegionalFcasSum { region: RegionID, service: FcasService },
    /// Flow stays within an interconnector's capacity limits
    InterconnectorCapacity { interconnector: InterconnectorID },
    /// Flow change stays within an interconnector's ramp limit
    InterconnectorRamp { interconnector: InterconnectorID },
    /// Convex-combination weights on the loss curve sum to one
    LossWeightSum { interconnector: InterconnectorID },
    /// Flow equals the weighted combination of loss-curve breakpoints
    LossFlowLink { interconnector: InterconnectorID },
    /// Losses equal the weighted combination of breakpoint losses
    LossValueLink { interconnector: InterconnectorID },
    /// Exactly one loss-curve segment is active
    LossSegmentSum { interconnector: InterconnectorID },
    /// A breakpoint weight may only load its adjacent segments
    LossAdjacency {
        interconnector: InterconnectorID,
        breakpoint: usize,
    },
    /// An MNSP's flow equals its forward minus reverse link flows
    MnspFlowDef { interconnector: InterconnectorID },
    /// A link's flow equals the sum of its cleared bands
    LinkBandSum { link: LinkID },
    /// A link may not ramp up faster than its offered rate
    LinkRampUp { link: LinkID },
    /// A link may not ramp down faster than its offered rate
    LinkRampDown { link: LinkID },
    /// Forward link flow is shut off unless the forward direction is chosen
    LinkExclusiveForward { interconnector: InterconnectorID },
    /// Reverse link flow is shut off unless the reverse direction is chosen
    LinkExclusiveReverse { interconnector: InterconnectorID },
    /// A generic network constraint
    Generic { id: ConstraintID },
}

impl fmt::Display for ConstraintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConstraintKey::*;
        match self {
            BandSum { unit } => write!(f, "band_sum({unit})"),
            MaxAvailability { unit } => write!(f, "max_avail({unit})"),
            RampUp { unit } => write!(f, "ramp_up({unit})"),
            RampDown { unit } => write!(f, "ramp_down({unit})"),
            UigfCeiling { unit } => write!(f, "uigf({unit})"),
            FixedLoad { unit } => write!(f, "fixed_load({unit})"),
            DailyEnergy { unit } => write!(f, "daily_energy({unit})"),
            FastStartProfile { unit } => write!(f, "fast_start({unit})"),
            FixedTarget { unit } => write!(f, "fixed_target({unit})"),
            HoldInitial { unit } => write!(f, "hold_initial({unit})"),
            FcasBandSum { unit, service } => write!(f, "fcas_band_sum({unit},{service})"),
            FcasMaxAvail { unit, service } => write!(f, "fcas_max_avail({unit},{service})"),
            JointRampUp { unit } => write!(f, "joint_ramp_up({unit})"),
            JointRampDown { unit } => write!(f, "joint_ramp_down({unit})"),
            EnergyRegulatingCapacity { unit, service, side } => {
                write!(f, "energy_reg_capacity_{side}({unit},{service})")
            }
            JointCapacity { unit, service, side } => {
                write!(f, "joint_capacity_{side}({unit},{service})")
            }
            FcasStranded { unit, service } => write!(f, "fcas_stranded({unit},{service})"),
            RegionBalance { region } => write!(f, "region_balance({region})"),
            RegionalFcasSum { region, service } => {
                write!(f, "regional_fcas_sum({region},{service})")
            }
            InterconnectorCapacity { interconnector } => {
                write!(f, "ic_capacity({interconnector})")
            }
            InterconnectorRamp { interconnector } => write!(f, "ic_ramp({interconnector})"),
            LossWeightSum { interconnector } => write!(f, "loss_weight_sum({interconnector})"),
            LossFlowLink { interconnector } => write!(f, "loss_flow_link({interconnector})"),
            LossValueLink { interconnector } => write!(f, "loss_value_link({interconnector})"),
            LossSegmentSum { interconnector } => write!(f, "loss_segment_sum({interconnector})"),
            LossAdjacency {
                interconnector,
                breakpoint,
            } => write!(f, "loss_adjacency({interconnector},{breakpoint})"),
            MnspFlowDef { interconnector } => write!(f, "mnsp_flow_def({interconnector})"),
            LinkBandSum { link } => write!(f, "link_band_sum({link})"),
            LinkRampUp { link } => write!(f, "link_ramp_up({link})"),
            LinkRampDown { link } => write!(f, "link_ramp_down({link})"),
            LinkExclusiveForward { interconnector } => {
                write!(f, "link_exclusive_fwd({interconnector})")
            }
            LinkExclusiveReverse { interconnector } => {
                write!(f, "link_exclusive_rev({interconnector})")
            }
            Generic { id } => write!(f, "generic({id})"),
        }
    }
}

/// A handle to a registered variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(pub(crate) usize);

/// A handle to a registered row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId(pub(crate) usize);

/// The bounds of a constraint row
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowBounds {
    /// The left-hand side must equal this value
    Equality(f64),
    /// The left-hand side may not fall below this value
    AtLeast(f64),
    /// The left-hand side may not exceed this value
    AtMost(f64),
    /// The left-hand side must lie in this closed range
    Range(f64, f64),
}

impl RowBounds {
    /// The lower bound, negative infinity when unbounded below
    pub fn lower(&self) -> f64 {
        match *self {
            RowBounds::Equality(b) | RowBounds::AtLeast(b) | RowBounds::Range(b, _) => b,
            RowBounds::AtMost(_) => f64::NEG_INFINITY,
        }
    }

    /// The upper bound, positive infinity when unbounded above
    pub fn upper(&self) -> f64 {
        match *self {
            RowBounds::Equality(b) | RowBounds::AtMost(b) | RowBounds::Range(_, b) => b,
            RowBounds::AtLeast(_) => f64::INFINITY,
        }
    }

    /// The same bounds with every finite side moved by `delta`
    pub fn shifted(&self, delta: f64) -> RowBounds {
        match *self {
            RowBounds::Equality(b) => RowBounds::Equality(b + delta),
            RowBounds::AtLeast(b) => RowBounds::AtLeast(b + delta),
            RowBounds::AtMost(b) => RowBounds::AtMost(b + delta),
            RowBounds::Range(l, u) => RowBounds::Range(l + delta, u + delta),
        }
    }
}

#[derive(Debug, Clone)]
struct VariableDef {
    key: VariableKey,
    cost: f64,
    lower: f64,
    upper: f64,
    integer: bool,
}

#[derive(Debug, Clone)]
struct RowDef {
    key: ConstraintKey,
    bounds: RowBounds,
    terms: Vec<(VariableId, f64)>,
    soft: bool,
}

/// The symbolic form of one interval's optimisation problem
#[derive(Debug, Clone)]
pub struct DispatchProblem {
    vars: Vec<VariableDef>,
    rows: Vec<RowDef>,
    var_index: IndexMap<VariableKey, VariableId>,
    row_index: IndexMap<ConstraintKey, RowId>,
    num_discrete: usize,
    hard_constraints: bool,
    penalty_weight: f64,
}

impl DispatchProblem {
    /// Create an empty problem.
    ///
    /// With `hard_constraints` set, soft rows are registered without slack variables and an
    /// over-constrained interval solves to infeasible instead of accruing penalties.
    /// `penalty_weight` multiplies every violation price.
    pub fn new(hard_constraints: bool, penalty_weight: f64) -> Self {
        Self {
            vars: Vec::new(),
            rows: Vec::new(),
            var_index: IndexMap::new(),
            row_index: IndexMap::new(),
            num_discrete: 0,
            hard_constraints,
            penalty_weight,
        }
    }

    /// Register a continuous variable
    pub fn add_variable(
        &mut self,
        key: VariableKey,
        cost: f64,
        lower: f64,
        upper: f64,
    ) -> VariableId {
        self.add_variable_def(key, cost, lower, upper, false)
    }

    /// Register an integer variable
    pub fn add_integer_variable(
        &mut self,
        key: VariableKey,
        cost: f64,
        lower: f64,
        upper: f64,
    ) -> VariableId {
        self.num_discrete += 1;
        self.add_variable_def(key, cost, lower, upper, true)
    }

    fn add_variable_def(
        &mut self,
        key: VariableKey,
        cost: f64,
        lower: f64,
        upper: f64,
        integer: bool,
    ) -> VariableId {
        let id = VariableId(self.vars.len());
        let previous = self.var_index.insert(key.clone(), id);
        assert!(previous.is_none(), "Variable {key} registered twice");
        self.vars.push(VariableDef {
            key,
            cost,
            lower,
            upper,
            integer,
        });
        id
    }

    /// Register a hard constraint row
    pub fn add_row(
        &mut self,
        key: ConstraintKey,
        bounds: RowBounds,
        terms: Vec<(VariableId, f64)>,
    ) -> RowId {
        self.add_row_def(key, bounds, terms, false)
    }

    /// Register a soft constraint row.
    ///
    /// Unless the problem is in hard mode, slack variables priced at the violation price
    /// times the penalty weight are attached to whichever sides of the row are bounded, so
    /// the row can be violated at a cost and the problem stays feasible.
    pub fn add_soft_row(
        &mut self,
        key: ConstraintKey,
        bounds: RowBounds,
        mut terms: Vec<(VariableId, f64)>,
        violation_price: MoneyPerMegaWattHour,
    ) -> RowId {
        if self.hard_constraints {
            return self.add_row(key, bounds, terms);
        }
        let cost = violation_price.value() * self.penalty_weight;
        if bounds.lower().is_finite() {
            let slack = self.add_variable_def(
                VariableKey::Slack {
                    row: Box::new(key.clone()),
                    side: SlackSide::Deficit,
                },
                cost,
                0.0,
                f64::INFINITY,
                false,
            );
            terms.push((slack, 1.0));
        }
        if bounds.upper().is_finite() {
            let slack = self.add_variable_def(
                VariableKey::Slack {
                    row: Box::new(key.clone()),
                    side: SlackSide::Excess,
                },
                cost,
                0.0,
                f64::INFINITY,
                false,
            );
            terms.push((slack, -1.0));
        }
        self.add_row_def(key, bounds, terms, true)
    }

    fn add_row_def(
        &mut self,
        key: ConstraintKey,
        bounds: RowBounds,
        terms: Vec<(VariableId, f64)>,
        soft: bool,
    ) -> RowId {
        let id = RowId(self.rows.len());
        let previous = self.row_index.insert(key.clone(), id);
        assert!(previous.is_none(), "Row {key} registered twice");
        self.rows.push(RowDef {
            key,
            bounds,
            terms,
            soft,
        });
        id
    }

    /// Look up a variable by key
    pub fn variable(&self, key: &VariableKey) -> Option<VariableId> {
        self.var_index.get(key).copied()
    }

    /// Look up a row by key
    pub fn row(&self, key: &ConstraintKey) -> Option<RowId> {
        self.row_index.get(key).copied()
    }

    /// The key of a registered variable
    pub fn variable_key(&self, id: VariableId) -> &VariableKey {
        &self.vars[id.0].key
    }

    /// The key of a registered row
    pub fn row_key(&self, id: RowId) -> &ConstraintKey {
        &self.rows[id.0].key
    }

    /// The bounds of a registered variable
    pub fn variable_bounds(&self, id: VariableId) -> (f64, f64) {
        (self.vars[id.0].lower, self.vars[id.0].upper)
    }

    /// The objective coefficient of a registered variable
    pub fn variable_cost(&self, id: VariableId) -> f64 {
        self.vars[id.0].cost
    }

    /// Whether a registered variable is integer
    pub fn is_integer(&self, id: VariableId) -> bool {
        self.vars[id.0].integer
    }

    /// Replace the bounds of a registered variable
    pub fn set_variable_bounds(&mut self, id: VariableId, lower: f64, upper: f64) {
        self.vars[id.0].lower = lower;
        self.vars[id.0].upper = upper;
    }

    /// The bounds of a registered row
    pub fn row_bounds(&self, id: RowId) -> RowBounds {
        self.rows[id.0].bounds
    }

    /// The terms of a registered row
    pub fn row_terms(&self, id: RowId) -> &[(VariableId, f64)] {
        &self.rows[id.0].terms
    }

    /// Whether a registered row was added soft
    pub fn is_soft(&self, id: RowId) -> bool {
        self.rows[id.0].soft
    }

    /// Move every finite bound of a row by `delta`
    pub fn shift_rhs(&mut self, id: RowId, delta: f64) {
        let row = &mut self.rows[id.0];
        row.bounds = row.bounds.shifted(delta);
    }

    /// The number of registered variables, slacks included
    pub fn num_variables(&self) -> usize {
        self.vars.len()
    }

    /// The number of registered rows
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Whether the problem contains integer variables
    pub fn has_discrete(&self) -> bool {
        self.num_discrete > 0
    }

    /// Iterate over registered variables in registration order
    pub fn iter_variables(&self) -> impl Iterator<Item = (VariableId, &VariableKey)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, var)| (VariableId(i), &var.key))
    }

    /// Iterate over registered rows in registration order
    pub fn iter_rows(&self) -> impl Iterator<Item = (RowId, &ConstraintKey)> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| (RowId(i), &row.key))
    }

    /// Pin every integer variable to its value in the given solution.
    ///
    /// Used before re-solve pricing so that demand perturbations explore only the
    /// continuous part of the problem around the chosen discrete structure.
    pub fn fix_discrete_from(&mut self, solution: &Solution) {
        for i in 0..self.vars.len() {
            if self.vars[i].integer {
                let value = solution.values[i].round();
                self.vars[i].lower = value;
                self.vars[i].upper = value;
            }
        }
    }

    /// Solve the problem, requiring an optimal result
    pub fn solve(&self) -> Result<Solution, SolveError> {
        self.solve_with_disabled(None)
    }

    fn solve_with_disabled(&self, disabled: Option<&[bool]>) -> Result<Solution, SolveError> {
        let mut problem = RowProblem::default();
        let mut cols = Vec::with_capacity(self.vars.len());
        for var in &self.vars {
            let col = if var.integer {
                problem.add_integer_column(var.cost, var.lower..=var.upper)
            } else {
                problem.add_column(var.cost, var.lower..=var.upper)
            };
            cols.push(col);
        }
        for (i, row) in self.rows.iter().enumerate() {
            if disabled.is_some_and(|disabled| disabled[i]) {
                continue;
            }
            problem.add_row(
                row.bounds.lower()..=row.bounds.upper(),
                row.terms.iter().map(|&(var, coeff)| (cols[var.0], coeff)),
            );
        }

        let mut model = problem.optimise(Sense::Minimise);
        model.set_option("output_flag", false);
        let solved = solve_optimal(model)?;
        let highs_solution = solved.get_solution();

        // Row duals only line up with our row handles for a full continuous solve
        let duals = (!self.has_discrete() && disabled.is_none())
            .then(|| highs_solution.dual_rows().to_vec());
        Ok(Solution {
            objective_value: Money(solved.objective_value()),
            values: highs_solution.columns().to_vec(),
            duals,
        })
    }

    /// Find an irreducible infeasible set of rows by deletion filtering.
    ///
    /// Each row is tentatively removed; if the remainder is still infeasible the removal is
    /// made permanent, otherwise the row is necessary and kept. The rows left standing form
    /// an irreducible infeasible set. Only meaningful after [`solve`](Self::solve) reported
    /// infeasibility; on a feasible problem the result is empty.
    pub fn extract_iis(&self) -> Result<Vec<ConstraintKey>, SolveError> {
        let mut removed = vec![false; self.rows.len()];
        for i in 0..self.rows.len() {
            removed[i] = true;
            match self.solve_with_disabled(Some(&removed)) {
                Err(ref err) if err.is_infeasible() => {} // still infeasible without it
                Err(SolveError::Incoherent(status)) => return Err(SolveError::Incoherent(status)),
                _ => removed[i] = false, // removal restored feasibility, so the row matters
            }
        }
        Ok(self
            .rows
            .iter()
            .zip(&removed)
            .filter(|(_, removed)| !**removed)
            .map(|(row, _)| row.key.clone())
            .collect())
    }

    /// Write the problem as LP-format text, for offline inspection of a failed interval
    pub fn write_lp(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writeln!(writer, "\\ dispatch problem snapshot")?;
        writeln!(writer, "Minimize")?;
        write!(writer, " obj:")?;
        for (i, var) in self.vars.iter().enumerate() {
            if var.cost != 0.0 {
                write!(writer, " {:+} {}", var.cost, lp_name("v", i, &var.key))?;
            }
        }
        writeln!(writer)?;
        writeln!(writer, "Subject To")?;
        for (i, row) in self.rows.iter().enumerate() {
            let name = lp_name("c", i, &row.key);
            let terms = row
                .terms
                .iter()
                .map(|&(var, coeff)| {
                    format!("{coeff:+} {}", lp_name("v", var.0, &self.vars[var.0].key))
                })
                .collect::<Vec<_>>()
                .join(" ");
            match row.bounds {
                RowBounds::Equality(b) => writeln!(writer, " {name}: {terms} = {b}")?,
                RowBounds::AtLeast(b) => writeln!(writer, " {name}: {terms} >= {b}")?,
                RowBounds::AtMost(b) => writeln!(writer, " {name}: {terms} <= {b}")?,
                RowBounds::Range(l, u) => {
                    writeln!(writer, " {name}_lo: {terms} >= {l}")?;
                    writeln!(writer, " {name}_hi: {terms} <= {u}")?;
                }
            }
        }
        writeln!(writer, "Bounds")?;
        for (i, var) in self.vars.iter().enumerate() {
            let name = lp_name("v", i, &var.key);
            match (var.lower.is_finite(), var.upper.is_finite()) {
                (true, true) => writeln!(writer, " {} <= {name} <= {}", var.lower, var.upper)?,
                (true, false) => writeln!(writer, " {name} >= {}", var.lower)?,
                (false, true) => writeln!(writer, " {name} <= {}", var.upper)?,
                (false, false) => writeln!(writer, " {name} free")?,
            }
        }
        if self.has_discrete() {
            writeln!(writer, "General")?;
            for (i, var) in self.vars.iter().enumerate() {
                if var.integer {
                    writeln!(writer, " {}", lp_name("v", i, &var.key))?;
                }
            }
        }
        writeln!(writer, "End")
    }
}

/// An LP-format identifier for a key: a prefix, the index and the sanitised display form
fn lp_name(prefix: &str, index: usize, key: &impl fmt::Display) -> String {
    let mut name = format!("{prefix}{index}_{key}");
    name = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    name
}

/// The numeric result of solving a [`DispatchProblem`]
#[derive(Debug, Clone)]
pub struct Solution {
    /// The objective value: dispatch cost plus violation penalties
    pub objective_value: Money,
    values: Vec<f64>,
    duals: Option<Vec<f64>>,
}

impl Solution {
    /// The value of a variable
    pub fn value(&self, id: VariableId) -> f64 {
        self.values[id.0]
    }

    /// The dual of a row; `None` when the solve had discrete variables
    pub fn dual(&self, id: RowId) -> Option<f64> {
        self.duals.as_ref().map(|duals| duals[id.0])
    }

    /// Whether row duals are available
    pub fn has_duals(&self) -> bool {
        self.duals.is_some()
    }
}

/// Defines the possible errors that can occur when running the solver
#[derive(Debug, Clone)]
pub enum SolveError {
    /// The model definition is incoherent.
    ///
    /// Users should not be able to trigger this error.
    Incoherent(HighsStatus),
    /// An optimal solution could not be found
    NonOptimal(HighsModelStatus),
}

impl SolveError {
    /// Whether the solver proved the problem infeasible
    pub fn is_infeasible(&self) -> bool {
        matches!(self, SolveError::NonOptimal(HighsModelStatus::Infeasible))
    }
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::Incoherent(status) => write!(f, "Incoherent model: {status:?}"),
            SolveError::NonOptimal(status) => {
                write!(f, "Could not find optimal result: {status:?}")
            }
        }
    }
}

impl Error for SolveError {}

/// Try to solve the model, returning an error if the model is incoherent or result is non-optimal
pub fn solve_optimal(model: highs::Model) -> Result<highs::SolvedModel, SolveError> {
    let solved = model.try_solve().map_err(SolveError::Incoherent)?;

    match solved.status() {
        HighsModelStatus::Optimal => Ok(solved),
        status => Err(SolveError::NonOptimal(status)),
    }
}
