//! Hop planning: hop count, per-hop amounts with variance, per-hop delays.
//!
//! Planning is a pure function of the session id, the destination, and the
//! request parameters. The rng is seeded from a digest of those inputs, so
//! the same session always replans identically — crash recovery and audits
//! re-derive the plan from the session id alone.

use std::str::FromStr;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tumbler_common::{tier_for_amount, Address, Amount, MIN_DENOMINATION};
use uuid::Uuid;

use crate::error::MixError;

/// Platform fee in basis points (2 %).
pub const PLATFORM_FEE_BPS: u64 = 200;

/// Referral share in basis points, charged only when a referral is present.
pub const REFERRAL_FEE_BPS: u64 = 50;

const BPS_DENOM: u64 = 10_000;

/// Routing profile selecting hop-count and delay ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrivacyProfile {
    /// Minimum hops, no delay.
    Fast,
    Default,
    /// Maximum hops, long delays.
    Max,
}

impl PrivacyProfile {
    fn hop_range(self) -> (u32, u32) {
        match self {
            PrivacyProfile::Fast => (2, 2),
            PrivacyProfile::Default => (2, 4),
            PrivacyProfile::Max => (4, 6),
        }
    }

    fn delay_range_secs(self) -> (u64, u64) {
        match self {
            PrivacyProfile::Fast => (0, 0),
            PrivacyProfile::Default => (60, 1_800),
            PrivacyProfile::Max => (1_800, 7_200),
        }
    }
}

impl FromStr for PrivacyProfile {
    type Err = MixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(PrivacyProfile::Fast),
            "default" => Ok(PrivacyProfile::Default),
            "max" => Ok(PrivacyProfile::Max),
            other => Err(MixError::InvalidProfile(other.to_string())),
        }
    }
}

/// One planned hop: the amount its outgoing transfer carries and the
/// privacy delay observed before submitting it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopSpec {
    pub amount: Amount,
    pub delay_secs: u64,
}

/// A session's full hop plan plus the fee split computed up front.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopPlan {
    pub hops: Vec<HopSpec>,
    pub net_amount: Amount,
    pub platform_fee: Amount,
    pub referral_fee: Amount,
}

impl HopPlan {
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Heuristic 0–100 routing-complexity metric. UI metric only: no
    /// correctness decision may consult it.
    pub fn stealth_score(&self) -> u8 {
        let hop_points = (self.hop_count() as u64 * 40 / 6).min(40);

        let avg_delay = self
            .hops
            .iter()
            .map(|hop| hop.delay_secs)
            .sum::<u64>()
            .checked_div(self.hop_count() as u64)
            .unwrap_or(0);
        let delay_points = (avg_delay * 30 / 7_200).min(30);

        // Spread of intermediate amounts around the even split, scaled to
        // the maximum configured variance.
        let base = self.net_amount / self.hop_count() as u64;
        let intermediates = &self.hops[..self.hop_count() - 1];
        let spread_points = if intermediates.is_empty() || base == 0 {
            0
        } else {
            let mean_deviation = intermediates
                .iter()
                .map(|hop| hop.amount.abs_diff(base))
                .sum::<u64>()
                / intermediates.len() as u64;
            (mean_deviation * 100 / base * 30 / 15).min(30)
        };

        (hop_points + delay_points + spread_points).min(100) as u8
    }
}

/// Compute a session's hop plan.
///
/// Intermediate hops carry the even split of the net amount with ±5–15 %
/// variance for obfuscation; the final hop carries exactly the net
/// destination amount, absorbing all rounding. Fees come off the top.
pub fn plan(
    gross_amount: Amount,
    destination: &Address,
    profile: PrivacyProfile,
    has_referral: bool,
    seed: &Uuid,
) -> Result<HopPlan, MixError> {
    if gross_amount < MIN_DENOMINATION {
        return Err(MixError::InvalidAmount(format!(
            "{gross_amount} is below the minimum denomination {MIN_DENOMINATION}"
        )));
    }
    if tier_for_amount(gross_amount).is_none() {
        return Err(MixError::InvalidAmount(format!(
            "{gross_amount} is not a supported denomination"
        )));
    }

    let platform_fee = gross_amount * PLATFORM_FEE_BPS / BPS_DENOM;
    let referral_fee = if has_referral {
        gross_amount * REFERRAL_FEE_BPS / BPS_DENOM
    } else {
        0
    };
    let net_amount = gross_amount - platform_fee - referral_fee;

    let mut rng = seeded_rng(seed, destination);
    let (hop_lo, hop_hi) = profile.hop_range();
    let hop_count = rng.gen_range(hop_lo..=hop_hi) as usize;
    let (delay_lo, delay_hi) = profile.delay_range_secs();

    let base = net_amount / hop_count as u64;
    let mut hops = Vec::with_capacity(hop_count);
    for index in 0..hop_count {
        let amount = if index == hop_count - 1 {
            net_amount
        } else {
            let variance_pct = rng.gen_range(5..=15u64);
            let offset = base * variance_pct / 100;
            if rng.gen_bool(0.5) {
                base + offset
            } else {
                base - offset
            }
        };
        let delay_secs = rng.gen_range(delay_lo..=delay_hi);
        hops.push(HopSpec { amount, delay_secs });
    }

    Ok(HopPlan {
        hops,
        net_amount,
        platform_fee,
        referral_fee,
    })
}

fn seeded_rng(seed: &Uuid, destination: &Address) -> ChaCha8Rng {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tumbler.hop-plan.v1");
    hasher.update(seed.as_bytes());
    hasher.update(destination.as_str().as_bytes());
    ChaCha8Rng::from_seed(*hasher.finalize().as_bytes())
}
