//! Fixtures shared by the unit tests.

use chrono::{Duration, Utc};

use crate::context::ServerContext;
use crate::identifier::{AccountId, Amount, InstrumentDefinitionId, NotaryId, NymId, TransactionNumber};
use crate::instrument::Cheque;
use crate::ledger::{BoxType, Ledger, Transaction, TransactionHeader, TransactionType};
use crate::utilities::crypto::{Keypair, Signable};
use crate::wallet::Account;

pub(crate) fn alice() -> NymId {
    NymId::from("alice")
}

pub(crate) fn notary() -> NotaryId {
    NotaryId::from("notary")
}

pub(crate) fn usd() -> AccountId {
    AccountId::from("alice-usd")
}

pub(crate) fn context_with_numbers(numbers: &[TransactionNumber]) -> ServerContext {
    let context = ServerContext::new(alice(), notary(), Keypair::generate(), None);
    for number in numbers {
        context.numbers().add_issued_number(*number);
    }
    context
}

pub(crate) fn account(id: AccountId, instrument: &str, balance: Amount) -> Account {
    let mut account = Account::new(id, alice(), notary(), InstrumentDefinitionId::from(instrument));
    account.balance = balance;
    account
}

pub(crate) fn account_box(box_type: BoxType, account: &AccountId) -> Ledger {
    Ledger::new(box_type, alice(), Some(account.clone()), notary())
}

pub(crate) fn nym_box(box_type: BoxType) -> Ledger {
    Ledger::new(box_type, alice(), None, notary())
}

pub(crate) fn receipt(
    transaction_type: TransactionType,
    number: TransactionNumber,
    in_reference_to: TransactionNumber,
    closing_number: Option<TransactionNumber>,
    amount: Amount,
) -> Transaction {
    let mut header = TransactionHeader::new(transaction_type, number, alice(), Some(usd()), notary());
    header.in_reference_to = in_reference_to;
    header.closing_number = closing_number;
    header.amount = amount;
    Transaction::new(header)
}

pub(crate) fn nymbox_receipt(
    transaction_type: TransactionType,
    number: TransactionNumber,
    numbers: &[TransactionNumber],
) -> Transaction {
    let mut header = TransactionHeader::new(transaction_type, number, alice(), None, notary());
    header.numbers = numbers.iter().copied().collect();
    Transaction::new(header)
}

pub(crate) fn cheque(drawer: &Keypair, number: TransactionNumber, amount: Amount) -> Cheque {
    let now = Utc::now();
    let mut cheque = Cheque {
        notary_id: notary(),
        number,
        amount,
        sender_nym: NymId::from_public_key(&drawer.public_key()),
        sender_account: AccountId::from("drawer-usd"),
        recipient_nym: None,
        remitter_nym: None,
        remitter_account: None,
        valid_from: now - Duration::hours(1),
        valid_to: now + Duration::days(30),
        memo: String::new(),
        certificate: None,
    };
    cheque.sign(drawer).expect("signing test cheque");
    cheque
}
