//! Balance agreements and transaction statements.
//!
//! Every transaction carries a signed statement of what the Nym believes the notary will
//! hold once the transaction succeeds: the account balance, the digests of its boxes and
//! the transaction numbers still issued to the Nym. The notary refuses the transaction if
//! its own view differs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ServerContext;
use crate::identifier::{AccountId, Amount, TransactionNumber};
use crate::ledger::{BoxType, Item, ItemType, Ledger, ReportLine, TransactionType};
use crate::utilities::crypto::{PublicKey, Signable};
use crate::utilities::hash::HashType;
use crate::wallet::Account;

#[derive(Error, Debug)]
pub enum AgreementError {
    #[error("Balance {balance} can not change by {delta}")]
    Overflow { balance: Amount, delta: Amount },
    #[error("{box_type} does not belong to account {account}")]
    LedgerMismatch {
        box_type: BoxType,
        account: AccountId,
    },
    #[error("Failed to prepare statement: {0}")]
    Signing(#[from] anyhow::Error),
}

/// Digests of the boxes a statement commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementDigests {
    pub inbox: Option<HashType>,
    pub outbox: Option<HashType>,
    pub nymbox: Option<HashType>,
}

/// What a transaction changes, as far as the balance statement is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgreementProposal {
    pub transaction_number: TransactionNumber,
    pub delta: Amount,
    /// Numbers the notary closes when the transaction succeeds.
    pub closing: BTreeSet<TransactionNumber>,
    /// Amount of the pending transfer this transaction adds to the outbox.
    pub outbox_pending: Option<Amount>,
    /// Inbox receipts this transaction removes.
    pub inbox_removals: BTreeSet<TransactionNumber>,
}

impl AgreementProposal {
    pub fn new(transaction_number: TransactionNumber, delta: Amount) -> Self {
        Self {
            transaction_number,
            delta,
            ..Default::default()
        }
    }

    pub fn closing<I: IntoIterator<Item = TransactionNumber>>(mut self, numbers: I) -> Self {
        self.closing.extend(numbers);
        self
    }

    pub fn outbox_pending(mut self, amount: Amount) -> Self {
        self.outbox_pending = Some(amount);
        self
    }

    pub fn inbox_removals<I: IntoIterator<Item = TransactionNumber>>(mut self, numbers: I) -> Self {
        self.inbox_removals.extend(numbers);
        self
    }
}

pub struct BalanceAgreementBuilder<'a> {
    context: &'a ServerContext,
    account: &'a Account,
    inbox: &'a Ledger,
    outbox: &'a Ledger,
}

impl<'a> BalanceAgreementBuilder<'a> {
    pub fn new(
        context: &'a ServerContext,
        account: &'a Account,
        inbox: &'a Ledger,
        outbox: &'a Ledger,
    ) -> Self {
        Self {
            context,
            account,
            inbox,
            outbox,
        }
    }

    pub fn build(&self, proposal: &AgreementProposal) -> Result<Item, AgreementError> {
        for ledger in [self.inbox, self.outbox] {
            if ledger.account_id.as_ref() != Some(&self.account.id) {
                return Err(AgreementError::LedgerMismatch {
                    box_type: ledger.box_type,
                    account: self.account.id.clone(),
                });
            }
        }
        let balance = self
            .account
            .balance
            .checked_add(proposal.delta)
            .ok_or(AgreementError::Overflow {
                balance: self.account.balance,
                delta: proposal.delta,
            })?;

        let mut inbox = self.inbox.report()?;
        inbox.retain(|line| !proposal.inbox_removals.contains(&line.number));

        let mut outbox = self.outbox.report()?;
        if let Some(amount) = proposal.outbox_pending {
            outbox.push(ReportLine {
                number: proposal.transaction_number,
                transaction_type: TransactionType::Pending,
                amount,
                digest: HashType::default(),
            });
            outbox.sort_by_key(|line| line.number);
        }

        let mut statement = Item::new(ItemType::BalanceStatement, Some(self.account.id.clone()))
            .with_amount(balance)
            .with_reference(proposal.transaction_number);
        statement.numbers = remaining_numbers(self.context, &BTreeSet::new(), &proposal.closing);
        statement.digests = Some(StatementDigests {
            inbox: Some(HashType::of(&inbox)?),
            outbox: Some(HashType::of(&outbox)?),
            nymbox: self.context.nymbox_hash(),
        });
        statement.sign(self.context.keypair())?;

        log::debug!(
            "Balance statement for {} on transaction {}: {} -> {balance}, {} issued numbers",
            self.account.id,
            proposal.transaction_number,
            self.account.balance,
            statement.numbers.len()
        );
        Ok(statement)
    }
}

/// Account-less statement used when processing the Nymbox.
pub fn transaction_statement(
    context: &ServerContext,
    transaction_number: TransactionNumber,
    adding: &BTreeSet<TransactionNumber>,
    closing: &BTreeSet<TransactionNumber>,
) -> Result<Item, AgreementError> {
    let mut statement =
        Item::new(ItemType::TransactionStatement, None).with_reference(transaction_number);
    statement.numbers = remaining_numbers(context, adding, closing);
    statement.digests = Some(StatementDigests {
        inbox: None,
        outbox: None,
        nymbox: context.nymbox_hash(),
    });
    statement.sign(context.keypair())?;
    Ok(statement)
}

fn remaining_numbers(
    context: &ServerContext,
    adding: &BTreeSet<TransactionNumber>,
    closing: &BTreeSet<TransactionNumber>,
) -> BTreeSet<TransactionNumber> {
    context
        .numbers()
        .issued_numbers()
        .union(adding)
        .filter(|number| !closing.contains(number))
        .copied()
        .collect()
}

/// Checks the signature and that the statement is internally consistent.
pub fn verify_statement(statement: &Item, signer: &PublicKey) -> bool {
    if !statement.item_type.is_statement() {
        return false;
    }
    if statement.numbers.iter().any(|number| *number <= 0) {
        return false;
    }
    let account_matches = match statement.item_type {
        ItemType::BalanceStatement => statement.account_id.is_some(),
        _ => statement.account_id.is_none(),
    };
    account_matches && statement.digests.is_some() && statement.verify_signature(signer)
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::identifier::{InstrumentDefinitionId, NotaryId, NymId};
    use crate::ledger::{Transaction, TransactionHeader};
    use crate::utilities::crypto::Keypair;

    fn context() -> ServerContext {
        let context = ServerContext::new(
            NymId::from("alice"),
            NotaryId::from("notary"),
            Keypair::generate(),
            None,
        );
        for number in [5, 6, 7] {
            context.numbers().add_issued_number(number);
        }
        context
    }

    fn account(balance: Amount) -> Account {
        let mut account = Account::new(
            AccountId::from("usd"),
            NymId::from("alice"),
            NotaryId::from("notary"),
            InstrumentDefinitionId::from("USD"),
        );
        account.balance = balance;
        account
    }

    fn ledger(box_type: BoxType) -> Ledger {
        Ledger::new(
            box_type,
            NymId::from("alice"),
            Some(AccountId::from("usd")),
            NotaryId::from("notary"),
        )
    }

    #[test]
    fn test_statement_applies_delta_and_closing() {
        let context = context();
        let account = account(100);
        let inbox = ledger(BoxType::Inbox);
        let outbox = ledger(BoxType::Outbox);

        let proposal = AgreementProposal::new(5, -30).closing([5]);
        let statement = BalanceAgreementBuilder::new(&context, &account, &inbox, &outbox)
            .build(&proposal)
            .unwrap();

        assert_eq!(statement.amount, 70);
        assert_eq!(statement.in_reference_to, 5);
        assert_eq!(statement.numbers, BTreeSet::from([6, 7]));
        assert!(verify_statement(&statement, &context.keypair().public_key()));
        assert!(!verify_statement(&statement, &Keypair::generate().public_key()));
    }

    #[test]
    fn test_pending_transfer_changes_outbox_digest() {
        let context = context();
        let account = account(100);
        let inbox = ledger(BoxType::Inbox);
        let outbox = ledger(BoxType::Outbox);
        let builder = BalanceAgreementBuilder::new(&context, &account, &inbox, &outbox);

        let plain = builder.build(&AgreementProposal::new(5, -30)).unwrap();
        let pending = builder
            .build(&AgreementProposal::new(5, -30).outbox_pending(30))
            .unwrap();

        let outbox_digest = |item: &Item| item.digests.as_ref().and_then(|d| d.outbox);
        assert_ne!(outbox_digest(&plain), outbox_digest(&pending));
        assert_eq!(
            plain.digests.as_ref().and_then(|d| d.inbox),
            pending.digests.as_ref().and_then(|d| d.inbox)
        );
    }

    #[test]
    fn test_inbox_removals_reflected_in_digest() {
        let context = context();
        let account = account(100);
        let mut inbox = ledger(BoxType::Inbox);
        let outbox = ledger(BoxType::Outbox);
        let header = TransactionHeader::new(
            TransactionType::Pending,
            40,
            NymId::from("bob"),
            Some(AccountId::from("usd")),
            NotaryId::from("notary"),
        );
        inbox.add(Transaction::new(header)).unwrap();
        let empty_inbox = ledger(BoxType::Inbox);

        let removing = BalanceAgreementBuilder::new(&context, &account, &inbox, &outbox)
            .build(&AgreementProposal::new(5, 0).inbox_removals([40]))
            .unwrap();
        let empty = BalanceAgreementBuilder::new(&context, &account, &empty_inbox, &outbox)
            .build(&AgreementProposal::new(5, 0))
            .unwrap();

        assert_eq!(
            removing.digests.as_ref().and_then(|d| d.inbox),
            empty.digests.as_ref().and_then(|d| d.inbox)
        );
    }

    #[test]
    fn test_overflow_and_mismatched_box_rejected() {
        let context = context();
        let inbox = ledger(BoxType::Inbox);
        let outbox = ledger(BoxType::Outbox);

        let rich = account(Amount::MAX);
        assert_matches!(
            BalanceAgreementBuilder::new(&context, &rich, &inbox, &outbox)
                .build(&AgreementProposal::new(5, 1)),
            Err(AgreementError::Overflow { .. })
        );

        let mut other = account(0);
        other.id = AccountId::from("eur");
        assert_matches!(
            BalanceAgreementBuilder::new(&context, &other, &inbox, &outbox)
                .build(&AgreementProposal::new(5, 0)),
            Err(AgreementError::LedgerMismatch {
                box_type: BoxType::Inbox,
                ..
            })
        );
    }

    #[test]
    fn test_transaction_statement_adds_numbers() {
        let context = context();
        let statement =
            transaction_statement(&context, 0, &BTreeSet::from([20, 21]), &BTreeSet::from([5]))
                .unwrap();

        assert_eq!(statement.numbers, BTreeSet::from([6, 7, 20, 21]));
        assert!(statement.account_id.is_none());
        assert!(verify_statement(&statement, &context.keypair().public_key()));
    }
}
