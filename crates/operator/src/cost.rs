//! Voice-credit accounting.
//!
//! Changing a vote-option allocation refunds the cost of the current weight
//! and charges the cost of the new one. Under linear accounting the cost of
//! a weight is the weight itself; under quadratic accounting it is the
//! square. Squares of 96-bit weights exceed `u128`, so the quadratic path
//! runs over big integers.

use num_bigint::BigUint;

/// Credit accounting for one allocation change.
pub trait CommandCost {
    /// Apply a reallocation from `current_votes` to `new_votes` against
    /// `balance`. Returns the new balance, or `None` when the credits do
    /// not cover the change.
    fn apply(&self, balance: u128, current_votes: u128, new_votes: u128) -> Option<u128>;
}

/// Linear accounting: a weight of `v` costs `v` credits.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearCost;

impl CommandCost for LinearCost {
    fn apply(&self, balance: u128, current_votes: u128, new_votes: u128) -> Option<u128> {
        let refunded = balance.checked_add(current_votes)?;
        refunded.checked_sub(new_votes)
    }
}

/// Quadratic accounting: a weight of `v` costs `v^2` credits.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuadraticCost;

impl CommandCost for QuadraticCost {
    fn apply(&self, balance: u128, current_votes: u128, new_votes: u128) -> Option<u128> {
        let current = BigUint::from(current_votes);
        let new = BigUint::from(new_votes);
        let refunded = BigUint::from(balance) + &current * &current;
        let cost = &new * &new;
        if refunded < cost {
            return None;
        }
        u128::try_from(refunded - cost).ok()
    }
}

/// The accounting mode selected by the round configuration.
pub fn cost_for(quadratic: bool) -> &'static dyn CommandCost {
    if quadratic {
        &QuadraticCost
    } else {
        &LinearCost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_refunds_previous_weight() {
        // Balance 20 with 50 already on the option supports a move to 70.
        assert_eq!(LinearCost.apply(20, 50, 70), Some(0));
        assert_eq!(LinearCost.apply(20, 50, 71), None);
        assert_eq!(LinearCost.apply(100, 0, 40), Some(60));
    }

    #[test]
    fn quadratic_squares_the_weights() {
        // Balance 100 covers 5^2 + 8^2 but not 7^2 + 8^2.
        assert_eq!(QuadraticCost.apply(100, 0, 5), Some(75));
        assert_eq!(QuadraticCost.apply(75, 0, 8), Some(11));
        assert_eq!(QuadraticCost.apply(100 - 64, 0, 7), None);
    }

    #[test]
    fn quadratic_handles_large_weights() {
        let weight = 1u128 << 90;
        // Moving from `weight` back to `weight` is free at any balance.
        assert_eq!(QuadraticCost.apply(5, weight, weight), Some(5));
    }

    #[test]
    fn mode_selection() {
        assert_eq!(cost_for(false).apply(10, 0, 3), Some(7));
        assert_eq!(cost_for(true).apply(10, 0, 3), Some(1));
    }
}
