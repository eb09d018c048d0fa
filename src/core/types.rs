use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use super::error::InvalidInput;

/// Fraction of salary credited per year of service, e.g. `1/49`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualRate {
    numerator: u32,
    denominator: u32,
}

impl AccrualRate {
    pub fn new(numerator: u32, denominator: u32) -> Result<Self, InvalidInput> {
        if numerator == 0 || denominator == 0 {
            return Err(InvalidInput::NonPositiveAccrual {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// `1/denominator`, the shape every public-sector CARE scheme uses.
    pub fn one_over(denominator: u32) -> Result<Self, InvalidInput> {
        Self::new(1, denominator)
    }

    pub(crate) const fn zero() -> Self {
        Self {
            numerator: 0,
            denominator: 1,
        }
    }

    pub fn numerator(self) -> u32 {
        self.numerator
    }

    pub fn denominator(self) -> u32 {
        self.denominator
    }
}

impl fmt::Display for AccrualRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// One year's accrual inputs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionRecord {
    year: i32,
    salary: Decimal,
    accrual: AccrualRate,
    cpi_index: Decimal,
    #[serde(skip)]
    unit: Decimal,
}

impl PensionRecord {
    pub fn new(
        year: i32,
        salary: Decimal,
        accrual: AccrualRate,
        cpi_index: Decimal,
    ) -> Result<Self, InvalidInput> {
        if salary.is_sign_negative() && !salary.is_zero() {
            return Err(InvalidInput::NegativeSalary { salary });
        }
        // Rejects the 0/1 rate reserved for the genesis sentinel.
        if accrual.numerator == 0 || accrual.denominator == 0 {
            return Err(InvalidInput::NonPositiveAccrual {
                numerator: accrual.numerator,
                denominator: accrual.denominator,
            });
        }
        // Ledger rows show the index as a percentage.
        if cpi_index.checked_mul(Decimal::ONE_HUNDRED).is_none() {
            return Err(InvalidInput::OutOfRange {
                quantity: "CPI index",
            });
        }
        let unit = checked_unit(salary, accrual, cpi_index).ok_or(InvalidInput::OutOfRange {
            quantity: "accrued unit",
        })?;
        Ok(Self {
            year,
            salary,
            accrual,
            cpi_index,
            unit,
        })
    }

    /// Zero-valued placeholder held by the genesis block.
    pub(crate) fn sentinel(epoch_year: i32) -> Self {
        Self {
            year: epoch_year,
            salary: Decimal::ZERO,
            accrual: AccrualRate::zero(),
            cpi_index: Decimal::ZERO,
            unit: Decimal::ZERO,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn salary(&self) -> Decimal {
        self.salary
    }

    pub fn accrual(&self) -> AccrualRate {
        self.accrual
    }

    pub fn cpi_index(&self) -> Decimal {
        self.cpi_index
    }

    /// Revalued pension earned this year: `salary × accrual × (1 + cpi)`.
    ///
    /// Computed once by [`PensionRecord::new`], which rejects any record whose
    /// unit does not fit in a `Decimal`.
    pub fn calculate_unit(&self) -> Decimal {
        self.unit
    }
}

/// The division by the accrual denominator happens last so it is the only
/// step that can round.
fn checked_unit(salary: Decimal, accrual: AccrualRate, cpi_index: Decimal) -> Option<Decimal> {
    let scaled = salary
        .checked_mul(Decimal::from(accrual.numerator))?
        .checked_mul(Decimal::ONE.checked_add(cpi_index)?)?;
    scaled.checked_div(Decimal::from(accrual.denominator))
}

/// What to do when the early-retirement reduction reaches 100% or more.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReductionPolicy {
    /// Keep `raw × (1 − reduction)` even when it goes negative.
    #[default]
    Preserve,
    /// Floor the final pension at zero.
    ClampAtZero,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetirementParams {
    pub normal_pension_age: u32,
    pub planned_retirement_age: u32,
    pub annual_reduction_rate: Decimal,
    pub reduction_policy: ReductionPolicy,
}

impl RetirementParams {
    pub fn new(
        normal_pension_age: u32,
        planned_retirement_age: u32,
        annual_reduction_rate: Decimal,
        reduction_policy: ReductionPolicy,
    ) -> Result<Self, InvalidInput> {
        if normal_pension_age == 0 {
            return Err(InvalidInput::ZeroAge {
                field: "normal pension age",
            });
        }
        if planned_retirement_age == 0 {
            return Err(InvalidInput::ZeroAge {
                field: "planned retirement age",
            });
        }
        if annual_reduction_rate.is_sign_negative() && !annual_reduction_rate.is_zero() {
            return Err(InvalidInput::NegativeReductionRate {
                rate: annual_reduction_rate,
            });
        }
        Ok(Self {
            normal_pension_age,
            planned_retirement_age,
            annual_reduction_rate,
            reduction_policy,
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    EarlyRetirement,
    FullEntitlement,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub raw_total: Decimal,
    pub final_pension: Decimal,
    pub reduction_applied: Decimal,
    pub years_early: u32,
    pub status: StatusKind,
    /// `final_pension / max(raw_total, 1)`.
    pub adjustment_factor: Decimal,
    /// Set when the reduction reached 100% or more of the accrued pension.
    pub over_reduced: bool,
}
