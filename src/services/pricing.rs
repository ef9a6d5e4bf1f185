//! Effective unit price of a price option under explicit sale prices and a
//! store-wide sale percentage.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::entities::price_option;

/// Discounts below this fraction of the base price do not count as a sale.
const MIN_SALE_FRACTION: Decimal = dec!(0.01);

/// Result of pricing a single option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// Price the customer pays per unit
    pub price: Decimal,
    pub original_price: Decimal,
    /// Set when an explicit sale price produced `price`
    pub sale_price: Option<Decimal>,
    /// Set when the store-wide percentage produced `price`
    pub sale_percentage: Option<Decimal>,
}

impl PriceQuote {
    fn base(price: Decimal) -> Self {
        Self {
            price,
            original_price: price,
            sale_price: None,
            sale_percentage: None,
        }
    }

    /// True when the price sits at least 1% below the base.
    pub fn is_discounted(&self) -> bool {
        is_meaningful_discount(self.original_price, self.price)
    }
}

fn is_meaningful_discount(base: Decimal, price: Decimal) -> bool {
    base > Decimal::ZERO && price < base && (base - price) / base >= MIN_SALE_FRACTION
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Prices one option.
///
/// An explicit sale price below base wins over the store-wide percentage.
/// A negative base is logged and returned unmodified.
pub fn effective_price(
    base: Decimal,
    explicit_sale: Option<Decimal>,
    sale_percentage: Option<Decimal>,
) -> PriceQuote {
    if base < Decimal::ZERO {
        warn!(%base, "price option has a negative base price, leaving it unpriced");
        return PriceQuote::base(base);
    }

    if let Some(sale) = explicit_sale.filter(|s| *s >= Decimal::ZERO && *s < base) {
        return PriceQuote {
            price: sale,
            original_price: base,
            sale_price: Some(sale),
            sale_percentage: None,
        };
    }

    match sale_percentage {
        Some(pct) if pct > Decimal::ZERO && pct <= dec!(100) => {
            let candidate = round_money(base * (dec!(100) - pct) / dec!(100));
            if candidate < Decimal::ZERO || !is_meaningful_discount(base, candidate) {
                return PriceQuote::base(base);
            }
            PriceQuote {
                price: candidate,
                original_price: base,
                sale_price: None,
                sale_percentage: Some(pct),
            }
        }
        _ => PriceQuote::base(base),
    }
}

pub fn quote_option(option: &price_option::Model, sale_percentage: Option<Decimal>) -> PriceQuote {
    effective_price(option.price, option.sale_price, sale_percentage)
}

/// Minimum effective price across the options, `None` when there are none.
pub fn lowest_price(
    options: &[price_option::Model],
    sale_percentage: Option<Decimal>,
) -> Option<Decimal> {
    options
        .iter()
        .map(|o| quote_option(o, sale_percentage).price)
        .min()
}

pub fn has_active_sale(options: &[price_option::Model], sale_percentage: Option<Decimal>) -> bool {
    options
        .iter()
        .any(|o| quote_option(o, sale_percentage).is_discounted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::price_option::PriceOptionType;
    use proptest::prelude::*;
    use rstest::rstest;
    use uuid::Uuid;

    fn option(price: Decimal, sale_price: Option<Decimal>) -> price_option::Model {
        price_option::Model {
            id: Uuid::new_v4(),
            product_id: Uuid::nil(),
            option_type: PriceOptionType::Packet,
            weight: 500,
            price,
            sale_price,
            position: 0,
        }
    }

    #[test]
    fn ten_percent_sale_on_thousand() {
        let quote = effective_price(dec!(1000), None, Some(dec!(10)));
        assert_eq!(quote.price, dec!(900));
        assert_eq!(quote.sale_percentage, Some(dec!(10)));
        assert!(quote.is_discounted());
    }

    #[test]
    fn explicit_sale_price_beats_percentage() {
        let quote = effective_price(dec!(1000), Some(dec!(850)), Some(dec!(50)));
        assert_eq!(quote.price, dec!(850));
        assert_eq!(quote.sale_price, Some(dec!(850)));
        assert_eq!(quote.sale_percentage, None);
    }

    #[test]
    fn explicit_sale_price_not_below_base_is_ignored() {
        let quote = effective_price(dec!(500), Some(dec!(500)), None);
        assert_eq!(quote.price, dec!(500));
        assert_eq!(quote.sale_price, None);
    }

    #[rstest]
    #[case(dec!(1000), dec!(0.5))]
    #[case(dec!(10), dec!(0.04))]
    #[case(dec!(250), dec!(0))]
    #[case(dec!(250), dec!(101))]
    #[case(dec!(250), dec!(-5))]
    fn no_sale_when_percentage_is_negligible_or_out_of_range(
        #[case] base: Decimal,
        #[case] pct: Decimal,
    ) {
        let quote = effective_price(base, None, Some(pct));
        assert_eq!(quote.price, base);
        assert!(!quote.is_discounted());
    }

    #[test]
    fn full_percentage_makes_item_free() {
        let quote = effective_price(dec!(300), None, Some(dec!(100)));
        assert_eq!(quote.price, Decimal::ZERO);
        assert!(quote.is_discounted());
    }

    #[test]
    fn negative_base_is_passed_through() {
        let quote = effective_price(dec!(-10), Some(dec!(5)), Some(dec!(20)));
        assert_eq!(quote.price, dec!(-10));
        assert_eq!(quote.sale_price, None);
    }

    #[test]
    fn lowest_price_and_active_sale_over_options() {
        let options = vec![
            option(dec!(1200), None),
            option(dec!(700), Some(dec!(650))),
            option(dec!(800), None),
        ];
        assert_eq!(lowest_price(&options, None), Some(dec!(650)));
        assert!(has_active_sale(&options, None));

        let plain = vec![option(dec!(1200), None)];
        assert!(!has_active_sale(&plain, None));
        assert_eq!(lowest_price(&[], Some(dec!(10))), None);
    }

    proptest! {
        #[test]
        fn effective_price_is_bounded_by_base(
            base_cents in 0i64..10_000_000,
            sale_cents in proptest::option::of(0i64..10_000_000),
            pct in proptest::option::of(-20i64..=120),
        ) {
            let base = Decimal::new(base_cents, 2);
            let sale = sale_cents.map(|c| Decimal::new(c, 2));
            let pct = pct.map(Decimal::from);
            let quote = effective_price(base, sale, pct);
            prop_assert!(quote.price >= Decimal::ZERO);
            prop_assert!(quote.price <= base);
            prop_assert_eq!(quote.original_price, base);
        }
    }
}
