//! Payment instruments exchanged between Nyms and deposited with a notary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifier::{AccountId, Amount, NotaryId, NymId, TransactionNumber};
use crate::utilities::crypto::{Certificate, Signable};

pub mod basket;
pub mod payment_plan;
pub mod smart_contract;

pub use payment_plan::PaymentPlan;
pub use smart_contract::SmartContract;

/// A signed order to pay `amount` from the sender's account.
///
/// A voucher is a cheque drawn by the notary on its own account, with the purchasing Nym
/// recorded as remitter. Its number belongs to the remitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cheque {
    pub notary_id: NotaryId,
    pub number: TransactionNumber,
    pub amount: Amount,
    pub sender_nym: NymId,
    pub sender_account: AccountId,
    pub recipient_nym: Option<NymId>,
    pub remitter_nym: Option<NymId>,
    pub remitter_account: Option<AccountId>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub memo: String,
    pub certificate: Option<Certificate>,
}

impl Cheque {
    pub fn is_voucher(&self) -> bool {
        self.remitter_nym.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_to
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && now <= self.valid_to
    }

    /// The Nym whose transaction number the cheque carries.
    pub fn number_owner(&self) -> &NymId {
        self.remitter_nym.as_ref().unwrap_or(&self.sender_nym)
    }

    pub fn number_account(&self) -> &AccountId {
        self.remitter_account.as_ref().unwrap_or(&self.sender_account)
    }
}

impl Signable for Cheque {
    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn set_certificate(&mut self, certificate: Option<Certificate>) {
        self.certificate = certificate;
    }
}

/// Transaction numbers a Nym holds on an instrument, and the account they were drawn for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeldNumbers {
    pub opening: Option<TransactionNumber>,
    pub closing: Vec<TransactionNumber>,
    pub accounts: Vec<AccountId>,
}

impl HeldNumbers {
    pub fn is_empty(&self) -> bool {
        self.opening.is_none() && self.closing.is_empty()
    }

    pub fn all(&self) -> Vec<TransactionNumber> {
        self.opening
            .iter()
            .chain(self.closing.iter())
            .copied()
            .filter(|number| *number > 0)
            .collect()
    }
}

/// Instruments kept in the payments inbox, outpayments, record and expired boxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instrument {
    Cheque(Cheque),
    Voucher(Cheque),
    PaymentPlan(PaymentPlan),
    SmartContract(SmartContract),
}

impl Instrument {
    pub fn notary_id(&self) -> &NotaryId {
        match self {
            Instrument::Cheque(cheque) | Instrument::Voucher(cheque) => &cheque.notary_id,
            Instrument::PaymentPlan(plan) => &plan.notary_id,
            Instrument::SmartContract(contract) => &contract.notary_id,
        }
    }

    /// Number identifying the instrument: the cheque number or the cron item's opening number.
    pub fn number(&self) -> Option<TransactionNumber> {
        let number = match self {
            Instrument::Cheque(cheque) | Instrument::Voucher(cheque) => cheque.number,
            Instrument::PaymentPlan(plan) => plan.sender_opening,
            Instrument::SmartContract(contract) => contract.opening_number(),
        };
        (number > 0).then_some(number)
    }

    pub fn numbers_for(&self, nym: &NymId) -> HeldNumbers {
        match self {
            Instrument::Cheque(cheque) | Instrument::Voucher(cheque) => {
                if cheque.number_owner() == nym && cheque.number > 0 {
                    HeldNumbers {
                        opening: Some(cheque.number),
                        closing: Vec::new(),
                        accounts: vec![cheque.number_account().clone()],
                    }
                } else {
                    HeldNumbers::default()
                }
            }
            Instrument::PaymentPlan(plan) => plan.numbers_for(nym),
            Instrument::SmartContract(contract) => contract.numbers_for(nym),
        }
    }

    /// Whether `nym` is the one who put this instrument in front of the notary: the drawer
    /// or remitter of a cheque, the payer of a plan, or the activating party of a contract.
    pub fn activated_by(&self, nym: &NymId) -> bool {
        match self {
            Instrument::Cheque(cheque) | Instrument::Voucher(cheque) => cheque.number_owner() == nym,
            Instrument::PaymentPlan(plan) => &plan.sender_nym == nym,
            Instrument::SmartContract(contract) => match (&contract.activator, contract.party_for(nym)) {
                (Some(activator), Some(party)) => activator == &party.name,
                _ => false,
            },
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Instrument::Cheque(cheque) | Instrument::Voucher(cheque) => cheque.is_expired(now),
            Instrument::PaymentPlan(plan) => now > plan.valid_to,
            Instrument::SmartContract(contract) => now > contract.valid_to,
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    fn cheque() -> Cheque {
        let now = Utc::now();
        Cheque {
            notary_id: NotaryId::from("notary"),
            number: 12,
            amount: 100,
            sender_nym: NymId::from("alice"),
            sender_account: AccountId::from("alice-usd"),
            recipient_nym: Some(NymId::from("bob")),
            remitter_nym: None,
            remitter_account: None,
            valid_from: now - Duration::hours(1),
            valid_to: now + Duration::days(30),
            memo: "rent".to_string(),
            certificate: None,
        }
    }

    #[test]
    fn test_cheque_numbers_belong_to_drawer() {
        let instrument = Instrument::Cheque(cheque());

        let held = instrument.numbers_for(&NymId::from("alice"));
        assert_eq!(held.all(), vec![12]);
        assert_eq!(held.accounts, vec![AccountId::from("alice-usd")]);
        assert!(instrument.numbers_for(&NymId::from("bob")).is_empty());
    }

    #[test]
    fn test_voucher_numbers_belong_to_remitter() {
        let mut voucher = cheque();
        voucher.sender_nym = NymId::from("notary-nym");
        voucher.sender_account = AccountId::from("voucher-account");
        voucher.remitter_nym = Some(NymId::from("alice"));
        voucher.remitter_account = Some(AccountId::from("alice-usd"));
        let instrument = Instrument::Voucher(voucher);

        assert_eq!(instrument.numbers_for(&NymId::from("alice")).all(), vec![12]);
        assert!(instrument.numbers_for(&NymId::from("notary-nym")).is_empty());
    }

    #[test]
    fn test_cheque_expiry() {
        let cheque = cheque();
        let instrument = Instrument::Cheque(cheque.clone());

        assert!(!instrument.is_expired(Utc::now()));
        assert!(instrument.is_expired(cheque.valid_to + Duration::seconds(1)));
        assert!(!cheque.is_valid_at(cheque.valid_from - Duration::seconds(1)));
    }
}
