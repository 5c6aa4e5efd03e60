//! Nym keys, known notaries and asset accounts held by the client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::{AccountId, Amount, InstrumentDefinitionId, NotaryId, NymId};
use crate::utilities::crypto::{KeyPairError, Keypair, PublicKey};

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Unknown Nym: {0}")]
    UnknownNym(NymId),
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),
    #[error("Unknown notary: {0}")]
    UnknownNotary(NotaryId),
    #[error("Account {0} already exists")]
    DuplicateAccount(AccountId),
    #[error(transparent)]
    Key(#[from] KeyPairError),
}

/// Local view of an asset account. The notary's copy is authoritative; the balance here is
/// what the last balance agreement or account download established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub nym_id: NymId,
    pub notary_id: NotaryId,
    pub instrument_definition: InstrumentDefinitionId,
    pub balance: Amount,
}

impl Account {
    pub fn new(
        id: AccountId,
        nym_id: NymId,
        notary_id: NotaryId,
        instrument_definition: InstrumentDefinitionId,
    ) -> Self {
        Self {
            id,
            nym_id,
            notary_id,
            instrument_definition,
            balance: 0,
        }
    }
}

#[derive(Default)]
pub struct Wallet {
    nyms: BTreeMap<NymId, Keypair>,
    notaries: BTreeMap<NotaryId, Option<PublicKey>>,
    accounts: BTreeMap<AccountId, Account>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    /// Base58 keypairs.
    pub nyms: BTreeMap<NymId, String>,
    pub notaries: BTreeMap<NotaryId, Option<PublicKey>>,
    pub accounts: BTreeMap<AccountId, Account>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_nym(&mut self, keypair: Keypair) -> NymId {
        let nym_id = NymId::from_public_key(&keypair.public_key());
        log::info!("Adding Nym {nym_id} to wallet");
        self.nyms.insert(nym_id.clone(), keypair);
        nym_id
    }

    pub fn keypair(&self, nym: &NymId) -> Result<&Keypair, WalletError> {
        self.nyms
            .get(nym)
            .ok_or_else(|| WalletError::UnknownNym(nym.clone()))
    }

    pub fn remove_nym(&mut self, nym: &NymId) -> Option<Keypair> {
        self.nyms.remove(nym)
    }

    pub fn nyms(&self) -> impl Iterator<Item = &NymId> {
        self.nyms.keys()
    }

    pub fn add_notary(&mut self, notary: NotaryId, public_key: Option<PublicKey>) {
        self.notaries.insert(notary, public_key);
    }

    pub fn notary_key(&self, notary: &NotaryId) -> Result<Option<&PublicKey>, WalletError> {
        self.notaries
            .get(notary)
            .map(Option::as_ref)
            .ok_or_else(|| WalletError::UnknownNotary(notary.clone()))
    }

    pub fn add_account(&mut self, account: Account) -> Result<(), WalletError> {
        if self.accounts.contains_key(&account.id) {
            return Err(WalletError::DuplicateAccount(account.id));
        }
        log::info!("Adding account {} for {}", account.id, account.nym_id);
        self.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    pub fn account(&self, id: &AccountId) -> Result<&Account, WalletError> {
        self.accounts
            .get(id)
            .ok_or_else(|| WalletError::UnknownAccount(id.clone()))
    }

    pub fn account_mut(&mut self, id: &AccountId) -> Result<&mut Account, WalletError> {
        self.accounts
            .get_mut(id)
            .ok_or_else(|| WalletError::UnknownAccount(id.clone()))
    }

    pub fn accounts_for<'a>(&'a self, nym: &'a NymId) -> impl Iterator<Item = &'a Account> {
        self.accounts
            .values()
            .filter(move |account| &account.nym_id == nym)
    }

    pub fn snapshot(&self) -> Result<WalletSnapshot, WalletError> {
        let mut nyms = BTreeMap::new();
        for (nym, keypair) in &self.nyms {
            nyms.insert(nym.clone(), keypair.to_base58()?);
        }
        Ok(WalletSnapshot {
            nyms,
            notaries: self.notaries.clone(),
            accounts: self.accounts.clone(),
        })
    }

    pub fn from_snapshot(snapshot: WalletSnapshot) -> Result<Self, WalletError> {
        let mut nyms = BTreeMap::new();
        for (nym, encoded) in snapshot.nyms {
            nyms.insert(nym, Keypair::from_base58(&encoded)?);
        }
        Ok(Self {
            nyms,
            notaries: snapshot.notaries,
            accounts: snapshot.accounts,
        })
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_snapshot_round_trip_keeps_keys() {
        let mut wallet = Wallet::new();
        let nym = wallet.add_nym(Keypair::generate());
        wallet.add_notary(NotaryId::from("notary"), None);
        wallet
            .add_account(Account::new(
                AccountId::from("usd"),
                nym.clone(),
                NotaryId::from("notary"),
                InstrumentDefinitionId::from("USD"),
            ))
            .unwrap();

        let restored = Wallet::from_snapshot(wallet.snapshot().unwrap()).unwrap();
        assert_eq!(
            restored.keypair(&nym).unwrap().public_key(),
            wallet.keypair(&nym).unwrap().public_key()
        );
        assert_eq!(restored.accounts_for(&nym).count(), 1);
    }

    #[test]
    fn test_unknown_lookups() {
        let mut wallet = Wallet::new();
        assert_matches!(
            wallet.keypair(&NymId::from("nobody")),
            Err(WalletError::UnknownNym(_))
        );
        assert_matches!(
            wallet.notary_key(&NotaryId::from("nowhere")),
            Err(WalletError::UnknownNotary(_))
        );
        let account = Account::new(
            AccountId::from("usd"),
            NymId::from("alice"),
            NotaryId::from("notary"),
            InstrumentDefinitionId::from("USD"),
        );
        wallet.add_account(account.clone()).unwrap();
        assert_matches!(wallet.add_account(account), Err(WalletError::DuplicateAccount(_)));
    }
}
