use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::{AccountId, Amount, InstrumentDefinitionId, NotaryId, TransactionNumber};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OfferError {
    #[error("Price limit can not be negative: {0}")]
    NegativePrice(Amount),
    #[error("Total assets on offer ({total}) must be at least one minimum increment ({increment})")]
    TotalBelowIncrement { total: Amount, increment: Amount },
    #[error("Asset and currency must be different instrument definitions")]
    SameInstrument,
    #[error("Scale must be positive: {0}")]
    InvalidScale(Amount),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopSign {
    Less,
    Greater,
}

impl StopSign {
    pub fn from_char(sign: char) -> Option<Self> {
        match sign {
            '<' => Some(StopSign::Less),
            '>' => Some(StopSign::Greater),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrder {
    pub sign: StopSign,
    pub activation_price: Amount,
}

impl StopOrder {
    /// A stop order needs both a sign and a non-zero activation price.
    pub fn normalize(sign: Option<char>, activation_price: Amount) -> Option<StopOrder> {
        let sign = sign.and_then(StopSign::from_char)?;
        if activation_price == 0 {
            log::debug!("Dropping stop order without activation price");
            return None;
        }
        Some(StopOrder {
            sign,
            activation_price,
        })
    }
}

/// `max(1, minimum) * max(1, scale)`.
pub fn minimum_increment(minimum: Amount, scale: Amount) -> Amount {
    minimum.max(1).saturating_mul(scale.max(1))
}

/// What the caller asks for when placing an offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferTerms {
    pub scale: Amount,
    pub minimum_increment: Amount,
    pub total_assets: Amount,
    /// 0 for a market order.
    pub price_limit: Amount,
    pub selling: bool,
    pub stop_sign: Option<char>,
    pub activation_price: Amount,
    pub valid_to: DateTime<Utc>,
}

impl OfferTerms {
    /// Validates the terms and returns the effective increment and stop order.
    pub fn validate(&self) -> Result<(Amount, Option<StopOrder>), OfferError> {
        if self.price_limit < 0 {
            return Err(OfferError::NegativePrice(self.price_limit));
        }
        if self.scale < 1 {
            return Err(OfferError::InvalidScale(self.scale));
        }
        let increment = minimum_increment(self.minimum_increment, self.scale);
        if self.total_assets < increment {
            return Err(OfferError::TotalBelowIncrement {
                total: self.total_assets,
                increment,
            });
        }
        Ok((
            increment,
            StopOrder::normalize(self.stop_sign, self.activation_price),
        ))
    }
}

/// A standing offer on the notary's market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOffer {
    pub notary_id: NotaryId,
    pub asset_type: InstrumentDefinitionId,
    pub currency_type: InstrumentDefinitionId,
    pub asset_account: AccountId,
    pub currency_account: AccountId,
    pub scale: Amount,
    pub minimum_increment: Amount,
    pub total_assets: Amount,
    pub price_limit: Amount,
    pub selling: bool,
    pub stop: Option<StopOrder>,
    pub valid_to: DateTime<Utc>,
    pub opening: TransactionNumber,
    pub asset_closing: TransactionNumber,
    pub currency_closing: TransactionNumber,
}

impl MarketOffer {
    pub fn is_market_order(&self) -> bool {
        self.price_limit == 0
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    fn terms() -> OfferTerms {
        OfferTerms {
            scale: 10,
            minimum_increment: 2,
            total_assets: 100,
            price_limit: 5,
            selling: true,
            stop_sign: None,
            activation_price: 0,
            valid_to: Utc::now(),
        }
    }

    #[test]
    fn test_minimum_increment() {
        assert_eq!(minimum_increment(0, 0), 1);
        assert_eq!(minimum_increment(3, 0), 3);
        assert_eq!(minimum_increment(0, 100), 100);
        assert_eq!(minimum_increment(3, 100), 300);
    }

    #[test]
    fn test_negative_price_rejected() {
        let terms = OfferTerms {
            price_limit: -1,
            ..terms()
        };
        assert_matches!(terms.validate(), Err(OfferError::NegativePrice(-1)));
    }

    #[test]
    fn test_total_must_cover_one_increment() {
        let terms = OfferTerms {
            total_assets: 19,
            ..terms()
        };
        assert_matches!(
            terms.validate(),
            Err(OfferError::TotalBelowIncrement {
                total: 19,
                increment: 20
            })
        );
        let terms = OfferTerms {
            total_assets: 20,
            ..terms
        };
        assert_matches!(terms.validate(), Ok((20, None)));
    }

    #[test]
    fn test_stop_order_normalization() {
        let stop = OfferTerms {
            stop_sign: Some('>'),
            activation_price: 7,
            ..terms()
        };
        assert_matches!(
            stop.validate(),
            Ok((
                _,
                Some(StopOrder {
                    sign: StopSign::Greater,
                    activation_price: 7
                })
            ))
        );

        let no_price = OfferTerms {
            stop_sign: Some('<'),
            activation_price: 0,
            ..terms()
        };
        assert_matches!(no_price.validate(), Ok((_, None)));

        let bad_sign = OfferTerms {
            stop_sign: Some('='),
            activation_price: 7,
            ..terms()
        };
        assert_matches!(bad_sign.validate(), Ok((_, None)));
    }
}
