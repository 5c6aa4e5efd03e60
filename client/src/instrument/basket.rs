use serde::{Deserialize, Serialize};

use crate::identifier::{AccountId, Amount, InstrumentDefinitionId, TransactionNumber};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketMember {
    pub instrument_definition: InstrumentDefinitionId,
    pub weight: Amount,
}

/// Definition of a basket currency, sent with `issueBasket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketTerms {
    pub name: String,
    pub members: Vec<BasketMember>,
    pub minimum_transfer: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeMember {
    pub instrument_definition: InstrumentDefinitionId,
    pub account_id: AccountId,
}

/// Exchange in or out of a basket currency, `multiple` minimum transfers at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketExchange {
    pub basket: InstrumentDefinitionId,
    pub basket_account: AccountId,
    pub exchange_in: bool,
    pub multiple: Amount,
    pub members: Vec<ExchangeMember>,
    /// Closed by the basket receipt.
    pub closing_number: TransactionNumber,
}

/// Payout to every holder of `shares_type`, paid from the issuer's account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dividend {
    pub shares_type: InstrumentDefinitionId,
    pub amount_per_share: Amount,
    pub outstanding_shares: Amount,
}

impl Dividend {
    pub fn total(&self) -> Option<Amount> {
        self.amount_per_share.checked_mul(self.outstanding_shares)
    }
}
