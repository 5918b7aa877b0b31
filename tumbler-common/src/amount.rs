//! Fixed-point amounts and the denomination table.
//!
//! All amounts are in the smallest ledger unit. Deposits and mix requests
//! must use one of the fixed denominations: same-amount anonymity sets are
//! what keeps withdrawals amount-indistinguishable.

/// Smallest-unit amount.
pub type Amount = u64;

/// Smallest units per whole coin.
pub const UNIT: Amount = 100_000_000;

/// Supported fixed denominations, ascending. Tier N is `DENOMINATIONS[N]`.
pub const DENOMINATIONS: [Amount; 4] = [UNIT / 10, UNIT, 5 * UNIT, 10 * UNIT];

/// The smallest accepted denomination.
pub const MIN_DENOMINATION: Amount = DENOMINATIONS[0];

/// The denomination tier for an amount, if it is one of the fixed tiers.
pub fn tier_for_amount(amount: Amount) -> Option<u8> {
    DENOMINATIONS
        .iter()
        .position(|d| *d == amount)
        .map(|idx| idx as u8)
}

/// The fixed amount for a tier index.
pub fn denomination_for_tier(tier: u8) -> Option<Amount> {
    DENOMINATIONS.get(tier as usize).copied()
}
