//! Stage calculator - splits an approved total into deposit, progress and final.
//!
//! Deposit and progress are each rounded half-up to the cent on their own.
//! Final takes whatever is left, so the three obligations always sum exactly
//! to the total. The order matters for reproducible output and must not change.

use crate::{
    core::money::Money,
    entities::PaymentStage,
    errors::{Error, Result},
};
use serde::{Deserialize, Serialize};

/// Basis points in 100%
pub const FULL_BPS: u32 = 10_000;

/// Stage split ratios in basis points (5000 = 50%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSplits {
    /// Deposit share
    pub deposit: u32,
    /// Progress share
    pub progress: u32,
    /// Nominal final share; the final obligation is always the residual
    #[serde(rename = "final")]
    pub final_share: u32,
}

impl Default for StageSplits {
    fn default() -> Self {
        Self {
            deposit: 5_000,
            progress: 3_000,
            final_share: 2_000,
        }
    }
}

impl StageSplits {
    /// Checks that the three shares cover exactly 100%.
    pub fn validate(&self) -> Result<()> {
        let sum = u64::from(self.deposit) + u64::from(self.progress) + u64::from(self.final_share);
        if sum == u64::from(FULL_BPS) {
            Ok(())
        } else {
            Err(Error::Config {
                message: format!(
                    "stage splits must sum to {FULL_BPS} basis points, got {sum} ({}/{}/{})",
                    self.deposit, self.progress, self.final_share
                ),
            })
        }
    }
}

/// The three monetary obligations derived from a proposal total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageAmounts {
    /// Deposit obligation
    pub deposit: Money,
    /// Progress obligation
    pub progress: Money,
    /// Final obligation (residual)
    pub final_amount: Money,
}

impl StageAmounts {
    /// Obligation for a single stage
    #[must_use]
    pub const fn for_stage(&self, stage: PaymentStage) -> Money {
        match stage {
            PaymentStage::Deposit => self.deposit,
            PaymentStage::Progress => self.progress,
            PaymentStage::Final => self.final_amount,
        }
    }

    /// Sum of all three obligations
    #[must_use]
    pub fn sum(&self) -> Money {
        self.deposit + self.progress + self.final_amount
    }
}

/// Computes stage obligations for `total`.
///
/// # Errors
/// - [`Error::InvalidAmount`] when `total` is zero or negative
/// - [`Error::Config`] when the splits do not cover 100%
/// - [`Error::RoundingInvariantViolation`] when the obligations fail to sum to
///   `total` or any obligation comes out negative; approval must stop here
pub fn compute(total: Money, splits: &StageSplits) -> Result<StageAmounts> {
    if !total.is_positive() {
        return Err(Error::InvalidAmount { amount: total });
    }
    splits.validate()?;

    let deposit = total.share_bps(splits.deposit);
    let progress = total.share_bps(splits.progress);
    let final_amount = total - (deposit + progress);

    let amounts = StageAmounts {
        deposit,
        progress,
        final_amount,
    };

    if amounts.sum() != total || final_amount < Money::ZERO {
        return Err(Error::RoundingInvariantViolation {
            total,
            deposit,
            progress,
            final_amount,
        });
    }

    Ok(amounts)
}
