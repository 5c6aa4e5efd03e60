//! Builds signed transaction requests.
//!
//! Every operation validates its inputs before drawing transaction numbers, draws them all at
//! once, and returns the numbers inside a [PreparedTransaction] (or commits them into the
//! instrument it returns). Any error after drawing drops the handles, which returns the
//! numbers to the pool.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::agreement::{AgreementError, AgreementProposal, BalanceAgreementBuilder};
use crate::context::ServerContext;
use crate::identifier::{AccountId, Amount, TransactionNumber};
use crate::instrument::basket::BasketTerms;
use crate::ledger::{BoxType, Ledger, Transaction, TransactionHeader, TransactionType};
use crate::market::OfferError;
use crate::message::{Message, MessagePayload, MessageType};
use crate::numbers::{ManagedNumber, NumberError};
use crate::utilities::crypto::Signable;
use crate::wallet::Account;

mod account;
mod basket;
mod cron;
mod nymbox;
mod prepared;

pub use cron::{PlanTerms, SmartContractAccount};
pub use nymbox::PreparedNymbox;
pub use prepared::PreparedTransaction;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Account {0} is not owned by this Nym on this notary")]
    AccountNotOwned(AccountId),
    #[error("Amount must be positive: {0}")]
    InvalidAmount(Amount),
    #[error(transparent)]
    Numbers(#[from] NumberError),
    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),
    #[error("Invalid market offer: {0}")]
    Offer(#[from] OfferError),
    #[error("Balance agreement failed: {0}")]
    Agreement(#[from] AgreementError),
    #[error("Nothing to process in the Nymbox")]
    EmptyNymbox,
    #[error("Failed to sign: {0}")]
    Signing(#[from] anyhow::Error),
}

/// An account with the boxes its balance statement commits to.
#[derive(Clone, Copy)]
pub struct AccountView<'a> {
    pub account: &'a Account,
    pub inbox: &'a Ledger,
    pub outbox: &'a Ledger,
}

impl<'a> AccountView<'a> {
    pub fn new(account: &'a Account, inbox: &'a Ledger, outbox: &'a Ledger) -> Self {
        Self {
            account,
            inbox,
            outbox,
        }
    }
}

pub struct TransactionBuilder<'a> {
    context: &'a ServerContext,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(context: &'a ServerContext) -> Self {
        Self { context }
    }

    fn check_account(&self, account: &Account) -> Result<(), BuildError> {
        if &account.nym_id != self.context.nym_id() || &account.notary_id != self.context.notary_id()
        {
            return Err(BuildError::AccountNotOwned(account.id.clone()));
        }
        Ok(())
    }

    fn check_view(&self, view: &AccountView) -> Result<(), BuildError> {
        self.check_account(view.account)?;
        let owns = |ledger: &Ledger, box_type: BoxType| {
            ledger.box_type == box_type && ledger.account_id.as_ref() == Some(&view.account.id)
        };
        if !owns(view.inbox, BoxType::Inbox) || !owns(view.outbox, BoxType::Outbox) {
            return Err(BuildError::AccountNotOwned(view.account.id.clone()));
        }
        Ok(())
    }

    fn check_amount(amount: Amount) -> Result<(), BuildError> {
        if amount <= 0 {
            return Err(BuildError::InvalidAmount(amount));
        }
        Ok(())
    }

    fn check_validity(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), BuildError> {
        if to <= from {
            return Err(BuildError::InvalidInstrument(format!(
                "valid to {to} is not after valid from {from}"
            )));
        }
        Ok(())
    }

    fn header(
        &self,
        transaction_type: TransactionType,
        number: TransactionNumber,
        account: Option<&AccountId>,
    ) -> TransactionHeader {
        TransactionHeader::new(
            transaction_type,
            number,
            self.context.nym_id().clone(),
            account.cloned(),
            self.context.notary_id().clone(),
        )
    }

    fn message(&self, message_type: MessageType, payload: MessagePayload) -> Message {
        Message::new(
            message_type,
            self.context.nym_id().clone(),
            self.context.notary_id().clone(),
            payload,
        )
    }

    /// Adds the balance statement, signs, and wraps the transaction for notarization.
    fn notarize(
        &self,
        mut transaction: Transaction,
        view: AccountView,
        proposal: AgreementProposal,
        numbers: Vec<ManagedNumber>,
        message_type: MessageType,
    ) -> Result<PreparedTransaction, BuildError> {
        let statement =
            BalanceAgreementBuilder::new(self.context, view.account, view.inbox, view.outbox)
                .build(&proposal)?;
        transaction.items.push(statement);
        transaction.sign(self.context.keypair())?;

        log::debug!(
            "Prepared {} {} on {} holding {:?}",
            transaction.transaction_type(),
            transaction.number(),
            view.account.id,
            transaction.held_numbers()
        );
        let message = self.message(
            message_type,
            MessagePayload::Transaction(Box::new(transaction)),
        );
        Ok(PreparedTransaction::new(message, numbers))
    }

    pub fn register_nym(&self) -> Message {
        self.message(MessageType::RegisterNym, MessagePayload::None)
    }

    pub fn unregister_nym(&self) -> Message {
        self.message(MessageType::UnregisterNym, MessagePayload::None)
    }

    pub fn get_request_number(&self) -> Message {
        self.message(MessageType::GetRequestNumber, MessagePayload::None)
    }

    pub fn get_transaction_numbers(&self) -> Message {
        self.message(MessageType::GetTransactionNumbers, MessagePayload::None)
    }

    pub fn get_nymbox(&self) -> Message {
        self.message(MessageType::GetNymbox, MessagePayload::None)
    }

    pub fn get_account_data(&self, account: &Account) -> Result<Message, BuildError> {
        self.check_account(account)?;
        Ok(self.message(
            MessageType::GetAccountData,
            MessagePayload::Account(account.id.clone()),
        ))
    }

    pub fn get_box_receipt(
        &self,
        box_type: BoxType,
        account_id: Option<AccountId>,
        number: TransactionNumber,
    ) -> Message {
        self.message(
            MessageType::GetBoxReceipt,
            MessagePayload::BoxReceipt {
                box_type,
                account_id,
                number,
            },
        )
    }

    pub fn issue_basket(&self, terms: BasketTerms) -> Result<Message, BuildError> {
        if terms.members.is_empty() {
            return Err(BuildError::InvalidInstrument(
                "basket has no members".to_string(),
            ));
        }
        if let Some(member) = terms.members.iter().find(|member| member.weight <= 0) {
            return Err(BuildError::InvalidAmount(member.weight));
        }
        Self::check_amount(terms.minimum_transfer)?;
        Ok(self.message(MessageType::IssueBasket, MessagePayload::Basket(terms)))
    }
}
