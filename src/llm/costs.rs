//! Per-token prices for the models we run, in USD.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) price per token for a known model.
pub fn model_cost(model: &str) -> Option<(Decimal, Decimal)> {
    let per_million = match model {
        m if m.starts_with("gpt-4o-mini") => (dec!(0.15), dec!(0.60)),
        m if m.starts_with("gpt-4o") => (dec!(2.50), dec!(10.00)),
        m if m.starts_with("gpt-4.1-mini") => (dec!(0.40), dec!(1.60)),
        m if m.starts_with("gpt-4.1") => (dec!(2.00), dec!(8.00)),
        m if m.contains("haiku") => (dec!(0.80), dec!(4.00)),
        m if m.contains("sonnet") => (dec!(3.00), dec!(15.00)),
        m if m.contains("opus") => (dec!(15.00), dec!(75.00)),
        _ => return None,
    };
    let million = dec!(1000000);
    Some((per_million.0 / million, per_million.1 / million))
}

/// Fallback when the model is unknown.
pub fn default_cost() -> (Decimal, Decimal) {
    (dec!(0.000003), dec!(0.000015))
}

/// Estimated spend for a token count.
pub fn estimate(costs: (Decimal, Decimal), input_tokens: u64, output_tokens: u64) -> Decimal {
    costs.0 * Decimal::from(input_tokens) + costs.1 * Decimal::from(output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_is_matched_before_full_model() {
        let (input, output) = model_cost("gpt-4o-mini").unwrap();
        assert_eq!(input, dec!(0.00000015));
        assert_eq!(output, dec!(0.0000006));
    }

    #[test]
    fn estimate_scales_with_tokens() {
        let costs = model_cost("gpt-4o-mini").unwrap();
        assert_eq!(estimate(costs, 1_000_000, 0), dec!(0.15));
        assert!(model_cost("unknown-model").is_none());
    }
}
