use rust_decimal::Decimal;

use super::error::InvalidInput;
use super::ledger::Ledger;
use super::types::{ProjectionResult, ReductionPolicy, RetirementParams, StatusKind};

/// Sum of every committed year's unit. Genesis never contributes.
pub fn accrued_total(ledger: &Ledger) -> Result<Decimal, InvalidInput> {
    ledger
        .blocks_excluding_genesis()
        .iter()
        .try_fold(Decimal::ZERO, |total, block| {
            total.checked_add(block.record().calculate_unit())
        })
        .ok_or(InvalidInput::OutOfRange {
            quantity: "accrued total",
        })
}

pub fn project(
    ledger: &Ledger,
    params: &RetirementParams,
) -> Result<ProjectionResult, InvalidInput> {
    project_total(accrued_total(ledger)?, params)
}

/// Applies the early-retirement reduction to an already accrued total.
pub fn project_total(
    raw_total: Decimal,
    params: &RetirementParams,
) -> Result<ProjectionResult, InvalidInput> {
    if params.planned_retirement_age >= params.normal_pension_age {
        return Ok(ProjectionResult {
            raw_total,
            final_pension: raw_total,
            reduction_applied: Decimal::ZERO,
            years_early: 0,
            status: StatusKind::FullEntitlement,
            adjustment_factor: adjustment_factor(raw_total, raw_total)?,
            over_reduced: false,
        });
    }

    let years_early = params.normal_pension_age - params.planned_retirement_age;
    let reduction_applied = Decimal::from(years_early)
        .checked_mul(params.annual_reduction_rate)
        .ok_or(InvalidInput::OutOfRange {
            quantity: "early-retirement reduction",
        })?;
    let over_reduced = reduction_applied >= Decimal::ONE;

    let mut final_pension = Decimal::ONE
        .checked_sub(reduction_applied)
        .and_then(|kept| raw_total.checked_mul(kept))
        .ok_or(InvalidInput::OutOfRange {
            quantity: "final pension",
        })?;
    if params.reduction_policy == ReductionPolicy::ClampAtZero && final_pension < Decimal::ZERO {
        final_pension = Decimal::ZERO;
    }

    Ok(ProjectionResult {
        raw_total,
        final_pension,
        reduction_applied,
        years_early,
        status: StatusKind::EarlyRetirement,
        adjustment_factor: adjustment_factor(final_pension, raw_total)?,
        over_reduced,
    })
}

fn adjustment_factor(
    final_pension: Decimal,
    raw_total: Decimal,
) -> Result<Decimal, InvalidInput> {
    final_pension
        .checked_div(raw_total.max(Decimal::ONE))
        .ok_or(InvalidInput::OutOfRange {
            quantity: "adjustment factor",
        })
}
