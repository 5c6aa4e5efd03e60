use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifier::{AccountId, Amount, NotaryId, NymId, TransactionNumber};
use crate::instrument::HeldNumbers;
use crate::utilities::crypto::{Certificate, Keypair, PublicKey, Signable};

/// Recurring payment proposed by a merchant (recipient) and confirmed by the payer (sender).
///
/// The merchant signs the proposal; the payer's confirmation adds the sender numbers and a
/// second signature over the whole plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub notary_id: NotaryId,
    pub recipient_nym: NymId,
    pub recipient_account: AccountId,
    pub recipient_opening: TransactionNumber,
    pub recipient_closing: TransactionNumber,
    pub sender_nym: NymId,
    pub sender_account: Option<AccountId>,
    pub sender_opening: TransactionNumber,
    pub sender_closing: TransactionNumber,
    pub initial_payment: Amount,
    pub payment_amount: Amount,
    pub payment_period_secs: i64,
    pub max_payments: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub memo: String,
    pub recipient_certificate: Option<Certificate>,
    pub certificate: Option<Certificate>,
}

impl PaymentPlan {
    pub fn is_confirmed(&self) -> bool {
        self.sender_opening > 0 && self.sender_closing > 0 && self.sender_account.is_some()
    }

    /// The plan as the merchant signed it.
    fn proposal(&self) -> PaymentPlan {
        let mut proposal = self.clone();
        proposal.sender_account = None;
        proposal.sender_opening = 0;
        proposal.sender_closing = 0;
        proposal.recipient_certificate = None;
        proposal.certificate = None;
        proposal
    }

    pub fn sign_proposal(&mut self, keypair: &Keypair) -> anyhow::Result<()> {
        let certificate = Certificate::prepare(keypair, &self.proposal())?;
        self.recipient_certificate = Some(certificate);
        Ok(())
    }

    pub fn verify_proposal(&self, merchant: &PublicKey) -> bool {
        match &self.recipient_certificate {
            Some(certificate) if certificate.public_key() == merchant => certificate
                .verify(&self.proposal())
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn numbers_for(&self, nym: &NymId) -> HeldNumbers {
        let mut held = HeldNumbers::default();
        if &self.recipient_nym == nym {
            held.opening = Some(self.recipient_opening).filter(|n| *n > 0);
            held.closing.push(self.recipient_closing);
            held.accounts.push(self.recipient_account.clone());
        } else if &self.sender_nym == nym {
            held.opening = Some(self.sender_opening).filter(|n| *n > 0);
            held.closing.push(self.sender_closing);
            held.accounts.extend(self.sender_account.iter().cloned());
        }
        held.closing.retain(|n| *n > 0);
        held
    }
}

impl Signable for PaymentPlan {
    fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    fn set_certificate(&mut self, certificate: Option<Certificate>) {
        self.certificate = certificate;
    }
}
