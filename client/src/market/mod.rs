//! Market offer numeric policy and duplicate-offer detection.

pub mod offer;
pub mod strange;

pub use offer::{minimum_increment, MarketOffer, OfferError, OfferTerms, StopOrder, StopSign};
pub use strange::{find_strange_offers, OfferData};
