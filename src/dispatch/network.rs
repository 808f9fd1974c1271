//! Interconnector and MNSP constraint builders.
//!
//! A regulated interconnector contributes one signed flow variable, entered into the
//! balance of both regions it joins, with soft capacity and ramp rows. When losses are
//! modelled the flow is restricted to the loss curve's domain and a loss variable,
//! interpolated along the curve by a convex combination of its breakpoints, is debited
//! to the two regional balances in the model's nominated shares.
//!
//! An MNSP instead clears each direction of its link from price bands, like a unit. The
//! interconnector-level flow variable is kept and tied to the link flows so capacity,
//! ramp and generic constraints keep a single handle on the service.
use crate::config::DispatchConfig;
use crate::dispatch::problem::{
    ConstraintKey, DispatchProblem, RowBounds, VariableId, VariableKey,
};
use crate::dispatch::unit_energy::BalanceTerms;
use crate::interconnector::{Interconnector, LossModel, MnspLink};
use crate::units::{MegaWatts, Minutes};

/// Register one interconnector's variables and constraints
pub fn add_interconnector(
    problem: &mut DispatchProblem,
    ic: &Interconnector,
    interval: Minutes,
    config: &DispatchConfig,
    balance: &mut BalanceTerms,
) {
    if ic.is_mnsp() && config.include_network_service_links {
        add_mnsp(problem, ic, interval, config, balance);
    } else {
        add_regulated(problem, ic, interval, config, balance);
    }
}

fn add_regulated(
    problem: &mut DispatchProblem,
    ic: &Interconnector,
    interval: Minutes,
    config: &DispatchConfig,
    balance: &mut BalanceTerms,
) {
    let loss_model = if config.include_losses {
        ic.loss_model.as_ref()
    } else {
        None
    };
    // the loss curve is only defined over its breakpoint range
    let (lower, upper) = match loss_model {
        Some(model) => {
            let (lo, hi) = model.flow_range();
            (lo.value(), hi.value())
        }
        None => (f64::NEG_INFINITY, f64::INFINITY),
    };
    let flow = problem.add_variable(
        VariableKey::InterconnectorFlow {
            interconnector: ic.id.clone(),
        },
        0.0,
        lower,
        upper,
    );
    add_flow_limits(problem, ic, flow, interval, config);

    balance
        .entry(ic.from_region.clone())
        .or_default()
        .push((flow, -1.0));
    balance
        .entry(ic.to_region.clone())
        .or_default()
        .push((flow, 1.0));

    if let Some(model) = loss_model {
        let loss = problem.add_variable(
            VariableKey::Loss {
                interconnector: ic.id.clone(),
            },
            0.0,
            f64::NEG_INFINITY,
            f64::INFINITY,
        );
        let share = model.from_region_share.value();
        balance
            .entry(ic.from_region.clone())
            .or_default()
            .push((loss, -share));
        balance
            .entry(ic.to_region.clone())
            .or_default()
            .push((loss, -(1.0 - share)));
        if config.fix_network_flows {
            pin_losses_to_initial(problem, ic, model, flow, loss);
        } else {
            add_loss_curve(problem, ic, model, flow, loss);
        }
    }
}

/// The soft capacity and ramp rows shared by regulated interconnectors and MNSPs
fn add_flow_limits(
    problem: &mut DispatchProblem,
    ic: &Interconnector,
    flow: VariableId,
    interval: Minutes,
    config: &DispatchConfig,
) {
    problem.add_soft_row(
        ConstraintKey::InterconnectorCapacity {
            interconnector: ic.id.clone(),
        },
        RowBounds::Range(-ic.import_limit.value(), ic.export_limit.value()),
        vec![(flow, 1.0)],
        config.violation_prices.interconnector_capacity,
    );
    if let Some(rate) = ic.ramp_limit {
        let headroom = rate * interval;
        problem.add_soft_row(
            ConstraintKey::InterconnectorRamp {
                interconnector: ic.id.clone(),
            },
            RowBounds::Range(
                (ic.initial_mw_flow - headroom).value(),
                (ic.initial_mw_flow + headroom).value(),
            ),
            vec![(flow, 1.0)],
            config.violation_prices.interconnector_ramp,
        );
    }
}

/// Interpolate losses along the curve with a convex combination of its breakpoints.
///
/// One binary per segment keeps the combination on a single segment, so the loss value
/// is exact rather than a convex underestimate.
fn add_loss_curve(
    problem: &mut DispatchProblem,
    ic: &Interconnector,
    model: &LossModel,
    flow: VariableId,
    loss: VariableId,
) {
    let weights: Vec<_> = (0..model.breakpoints.len())
        .map(|k| {
            problem.add_variable(
                VariableKey::LossWeight {
                    interconnector: ic.id.clone(),
                    breakpoint: k,
                },
                0.0,
                0.0,
                1.0,
            )
        })
        .collect();
    let segments: Vec<_> = (0..model.num_segments())
        .map(|s| {
            problem.add_integer_variable(
                VariableKey::LossSegment {
                    interconnector: ic.id.clone(),
                    segment: s,
                },
                0.0,
                0.0,
                1.0,
            )
        })
        .collect();

    problem.add_row(
        ConstraintKey::LossWeightSum {
            interconnector: ic.id.clone(),
        },
        RowBounds::Equality(1.0),
        weights.iter().map(|&w| (w, 1.0)).collect(),
    );

    let mut flow_terms = vec![(flow, 1.0)];
    flow_terms.extend(
        weights
            .iter()
            .zip(&model.breakpoints)
            .map(|(&w, point)| (w, -point.flow.value())),
    );
    problem.add_row(
        ConstraintKey::LossFlowLink {
            interconnector: ic.id.clone(),
        },
        RowBounds::Equality(0.0),
        flow_terms,
    );

    let mut loss_terms = vec![(loss, 1.0)];
    loss_terms.extend(
        weights
            .iter()
            .zip(&model.breakpoints)
            .map(|(&w, point)| (w, -point.loss.value())),
    );
    problem.add_row(
        ConstraintKey::LossValueLink {
            interconnector: ic.id.clone(),
        },
        RowBounds::Equality(0.0),
        loss_terms,
    );

    problem.add_row(
        ConstraintKey::LossSegmentSum {
            interconnector: ic.id.clone(),
        },
        RowBounds::Equality(1.0),
        segments.iter().map(|&z| (z, 1.0)).collect(),
    );

    // a breakpoint may only carry weight when one of its adjacent segments is chosen
    for (k, &weight) in weights.iter().enumerate() {
        let mut terms = vec![(weight, 1.0)];
        if k > 0 {
            terms.push((segments[k - 1], -1.0));
        }
        if k < segments.len() {
            terms.push((segments[k], -1.0));
        }
        problem.add_row(
            ConstraintKey::LossAdjacency {
                interconnector: ic.id.clone(),
                breakpoint: k,
            },
            RowBounds::AtMost(0.0),
            terms,
        );
    }
}

/// Substitute the loss segment containing the telemetered flow directly.
///
/// Used when network flows are held near their telemetered values: the flow keeps the
/// initial direction and losses become a linear function of it, so no binaries enter
/// the problem.
fn pin_losses_to_initial(
    problem: &mut DispatchProblem,
    ic: &Interconnector,
    model: &LossModel,
    flow: VariableId,
    loss: VariableId,
) {
    let (slope, intercept) = model.segment_coefficients(ic.initial_mw_flow);
    problem.add_row(
        ConstraintKey::LossValueLink {
            interconnector: ic.id.clone(),
        },
        RowBounds::Equality(intercept),
        vec![(loss, 1.0), (flow, -slope)],
    );
    let (lower, upper) = problem.variable_bounds(flow);
    if ic.initial_mw_flow >= MegaWatts(0.0) {
        problem.set_variable_bounds(flow, lower.max(0.0), upper);
    } else {
        problem.set_variable_bounds(flow, lower, upper.min(0.0));
    }
}

fn add_mnsp(
    problem: &mut DispatchProblem,
    ic: &Interconnector,
    interval: Minutes,
    config: &DispatchConfig,
    balance: &mut BalanceTerms,
) {
    let flow = problem.add_variable(
        VariableKey::InterconnectorFlow {
            interconnector: ic.id.clone(),
        },
        0.0,
        f64::NEG_INFINITY,
        f64::INFINITY,
    );
    add_flow_limits(problem, ic, flow, interval, config);

    let mut def_terms = vec![(flow, 1.0)];
    let mut forward = Vec::new();
    let mut reverse = Vec::new();
    for link in &ic.links {
        let link_flow = add_link(problem, link, interval, config, balance);
        if link.from_region == ic.from_region {
            def_terms.push((link_flow, -1.0));
            forward.push((link_flow, link.max_avail));
        } else {
            def_terms.push((link_flow, 1.0));
            reverse.push((link_flow, link.max_avail));
        }
    }
    // the signed interconnector flow is the net of the two link directions
    problem.add_row(
        ConstraintKey::MnspFlowDef {
            interconnector: ic.id.clone(),
        },
        RowBounds::Equality(0.0),
        def_terms,
    );

    if config.fix_network_flows {
        let shut = if ic.initial_mw_flow >= MegaWatts(0.0) {
            &reverse
        } else {
            &forward
        };
        for &(link_flow, _) in shut {
            problem.set_variable_bounds(link_flow, 0.0, 0.0);
        }
    } else if !forward.is_empty() && !reverse.is_empty() {
        add_direction_choice(problem, ic, &forward, &reverse);
    }
}

/// Register one MNSP link: a flow variable cleared from its price bands.
///
/// The link draws loss-factor-adjusted energy at the sending end and delivers it at the
/// receiving end, so transport losses are implicit in the two factors. Offer prices are
/// referred to the delivery region's reference node.
fn add_link(
    problem: &mut DispatchProblem,
    link: &MnspLink,
    interval: Minutes,
    config: &DispatchConfig,
    balance: &mut BalanceTerms,
) -> VariableId {
    let flow = problem.add_variable(
        VariableKey::LinkFlow {
            link: link.id.clone(),
        },
        0.0,
        0.0,
        link.max_avail.value(),
    );
    let mut terms = vec![(flow, 1.0)];
    for (i, band) in link.bands.iter().enumerate() {
        if band.avail <= MegaWatts(0.0) {
            continue;
        }
        let cost = band.price.value() / link.to_region_loss_factor.value();
        let var = problem.add_variable(
            VariableKey::LinkBand {
                link: link.id.clone(),
                band: i + 1,
            },
            cost,
            0.0,
            band.avail.value(),
        );
        terms.push((var, -1.0));
    }
    problem.add_row(
        ConstraintKey::LinkBandSum {
            link: link.id.clone(),
        },
        RowBounds::Equality(0.0),
        terms,
    );

    if let Some(rate) = link.ramp_up_rate {
        problem.add_soft_row(
            ConstraintKey::LinkRampUp {
                link: link.id.clone(),
            },
            RowBounds::AtMost((link.initial_mw + rate * interval).value()),
            vec![(flow, 1.0)],
            config.violation_prices.mnsp_ramp,
        );
    }
    if let Some(rate) = link.ramp_down_rate {
        problem.add_soft_row(
            ConstraintKey::LinkRampDown {
                link: link.id.clone(),
            },
            RowBounds::AtLeast((link.initial_mw - rate * interval).value()),
            vec![(flow, 1.0)],
            config.violation_prices.mnsp_ramp,
        );
    }

    balance
        .entry(link.from_region.clone())
        .or_default()
        .push((flow, -link.from_region_loss_factor.value()));
    balance
        .entry(link.to_region.clone())
        .or_default()
        .push((flow, link.to_region_loss_factor.value()));
    flow
}

/// One binary chooses the active direction; the inactive direction's links are shut
fn add_direction_choice(
    problem: &mut DispatchProblem,
    ic: &Interconnector,
    forward: &[(VariableId, MegaWatts)],
    reverse: &[(VariableId, MegaWatts)],
) {
    let choice = problem.add_integer_variable(
        VariableKey::LinkDirection {
            interconnector: ic.id.clone(),
        },
        0.0,
        0.0,
        1.0,
    );
    let forward_cap: f64 = forward.iter().map(|&(_, max)| max.value()).sum();
    let reverse_cap: f64 = reverse.iter().map(|&(_, max)| max.value()).sum();

    let mut terms: Vec<_> = forward.iter().map(|&(flow, _)| (flow, 1.0)).collect();
    terms.push((choice, -forward_cap));
    problem.add_row(
        ConstraintKey::LinkExclusiveForward {
            interconnector: ic.id.clone(),
        },
        RowBounds::AtMost(0.0),
        terms,
    );

    let mut terms: Vec<_> = reverse.iter().map(|&(flow, _)| (flow, 1.0)).collect();
    terms.push((choice, reverse_cap));
    problem.add_row(
        ConstraintKey::LinkExclusiveReverse {
            interconnector: ic.id.clone(),
        },
        RowBounds::AtMost(reverse_cap),
        terms,
    );
}
