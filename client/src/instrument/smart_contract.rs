use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifier::{AccountId, NotaryId, NymId, TransactionNumber};
use crate::instrument::HeldNumbers;
use crate::utilities::crypto::{Certificate, Keypair, PublicKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyAccount {
    pub name: String,
    pub account_id: Option<AccountId>,
    pub closing: TransactionNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub nym_id: Option<NymId>,
    pub opening: TransactionNumber,
    pub accounts: Vec<PartyAccount>,
    pub certificate: Option<Certificate>,
}

impl Party {
    pub fn is_confirmed(&self) -> bool {
        self.nym_id.is_some()
            && self.opening > 0
            && self.certificate.is_some()
            && self
                .accounts
                .iter()
                .all(|account| account.account_id.is_some() && account.closing > 0)
    }
}

/// Multi-party agreement. Each party confirms separately; one of them activates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartContract {
    pub notary_id: NotaryId,
    pub terms: String,
    pub parties: Vec<Party>,
    /// Name of the party that activated the contract.
    pub activator: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl SmartContract {
    pub fn party(&self, name: &str) -> Option<&Party> {
        self.parties.iter().find(|party| party.name == name)
    }

    pub fn party_mut(&mut self, name: &str) -> Option<&mut Party> {
        self.parties.iter_mut().find(|party| party.name == name)
    }

    pub fn party_for(&self, nym: &NymId) -> Option<&Party> {
        self.parties
            .iter()
            .find(|party| party.nym_id.as_ref() == Some(nym))
    }

    pub fn is_fully_confirmed(&self) -> bool {
        !self.parties.is_empty() && self.parties.iter().all(Party::is_confirmed)
    }

    /// The activator's opening number identifies the contract once active.
    pub fn opening_number(&self) -> TransactionNumber {
        self.activator
            .as_deref()
            .and_then(|name| self.party(name))
            .map(|party| party.opening)
            .unwrap_or_default()
    }

    /// What party `name` signs: the terms and its own numbers, with every other party's
    /// confirmation blanked out.
    fn confirmation(&self, name: &str) -> SmartContract {
        let mut view = self.clone();
        view.activator = None;
        for party in view.parties.iter_mut() {
            party.certificate = None;
            if party.name != name {
                party.opening = 0;
                for account in party.accounts.iter_mut() {
                    account.account_id = None;
                    account.closing = 0;
                }
            }
        }
        view
    }

    pub fn sign_party(&mut self, name: &str, keypair: &Keypair) -> anyhow::Result<()> {
        let certificate = Certificate::prepare(keypair, &self.confirmation(name))?;
        let party = self
            .party_mut(name)
            .ok_or_else(|| anyhow::anyhow!("No party named {name}"))?;
        party.certificate = Some(certificate);
        Ok(())
    }

    pub fn verify_party(&self, name: &str, signer: &PublicKey) -> bool {
        let Some(party) = self.party(name) else {
            return false;
        };
        match &party.certificate {
            Some(certificate) if certificate.public_key() == signer => certificate
                .verify(&self.confirmation(name))
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn numbers_for(&self, nym: &NymId) -> HeldNumbers {
        let Some(party) = self.party_for(nym) else {
            return HeldNumbers::default();
        };
        HeldNumbers {
            opening: Some(party.opening).filter(|n| *n > 0),
            closing: party
                .accounts
                .iter()
                .map(|account| account.closing)
                .filter(|n| *n > 0)
                .collect(),
            accounts: party
                .accounts
                .iter()
                .filter_map(|account| account.account_id.clone())
                .collect(),
        }
    }
}
