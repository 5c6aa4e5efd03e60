use serde::{Deserialize, Serialize};

use crate::identifier::{Amount, InstrumentDefinitionId, TransactionNumber};

/// Summary of one offer as listed by the notary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferData {
    pub transaction_id: TransactionNumber,
    pub asset_type: InstrumentDefinitionId,
    pub currency_type: InstrumentDefinitionId,
    pub scale: Amount,
    /// 0 for a market order.
    pub price_per_scale: Amount,
    pub selling: bool,
}

impl OfferData {
    fn same_market(&self, other: &OfferData) -> bool {
        self.asset_type == other.asset_type
            && self.currency_type == other.currency_type
            && self.scale == other.scale
    }
}

/// Existing offers of the same Nym that `new_offer` would trade against.
///
/// A new buy at price P crosses existing sells priced at or below P; a new sell at P crosses
/// existing buys priced at or above P. Market orders have no price and never cross.
pub fn find_strange_offers<'a>(
    existing: &'a [OfferData],
    new_offer: &OfferData,
) -> Vec<&'a OfferData> {
    if new_offer.price_per_scale == 0 {
        return Vec::new();
    }
    let strange: Vec<&OfferData> = existing
        .iter()
        .filter(|offer| offer.same_market(new_offer))
        .filter(|offer| offer.selling != new_offer.selling)
        .filter(|offer| offer.price_per_scale != 0)
        .filter(|offer| {
            if new_offer.selling {
                offer.price_per_scale >= new_offer.price_per_scale
            } else {
                offer.price_per_scale <= new_offer.price_per_scale
            }
        })
        .collect();

    if !strange.is_empty() {
        log::debug!(
            "New offer at {} crosses {} existing offers",
            new_offer.price_per_scale,
            strange.len()
        );
    }
    strange
}

#[cfg(test)]
mod test {
    use super::*;

    fn offer(id: TransactionNumber, price: Amount, selling: bool) -> OfferData {
        OfferData {
            transaction_id: id,
            asset_type: InstrumentDefinitionId::from("gold"),
            currency_type: InstrumentDefinitionId::from("usd"),
            scale: 1,
            price_per_scale: price,
            selling,
        }
    }

    fn ids(offers: Vec<&OfferData>) -> Vec<TransactionNumber> {
        offers.iter().map(|offer| offer.transaction_id).collect()
    }

    #[test]
    fn test_new_buy_flags_sell_at_or_below_its_price() {
        assert_eq!(
            ids(find_strange_offers(&[offer(1, 35, true)], &offer(9, 40, false))),
            vec![1]
        );

        let existing = vec![offer(1, 35, true), offer(2, 40, true), offer(3, 45, true)];
        assert_eq!(
            ids(find_strange_offers(&existing, &offer(9, 40, false))),
            vec![1, 2]
        );
    }

    #[test]
    fn test_new_sell_flags_buy_at_or_above_its_price() {
        assert_eq!(
            ids(find_strange_offers(&[offer(1, 40, false)], &offer(9, 30, true))),
            vec![1]
        );

        let existing = vec![offer(1, 25, false), offer(2, 30, false), offer(3, 40, false)];
        assert_eq!(
            ids(find_strange_offers(&existing, &offer(9, 30, true))),
            vec![2, 3]
        );
    }

    #[test]
    fn test_same_side_and_market_orders_not_flagged() {
        let existing = vec![offer(1, 40, false), offer(2, 0, true)];

        assert!(find_strange_offers(&existing, &offer(9, 30, false)).is_empty());
        assert!(find_strange_offers(&existing, &offer(9, 0, true)).is_empty());
        assert!(find_strange_offers(&existing, &offer(9, 45, false)).is_empty());
    }

    #[test]
    fn test_other_markets_ignored() {
        let mut other_scale = offer(1, 35, true);
        other_scale.scale = 10;
        let mut other_currency = offer(2, 35, true);
        other_currency.currency_type = InstrumentDefinitionId::from("eur");

        assert!(find_strange_offers(&[other_scale, other_currency], &offer(9, 40, false))
            .is_empty());
    }
}
