use chrono::{DateTime, Utc};

use crate::agreement::AgreementProposal;
use crate::builder::{AccountView, BuildError, PreparedTransaction, TransactionBuilder};
use crate::identifier::{AccountId, Amount, NymId, TransactionNumber};
use crate::instrument::basket::Dividend;
use crate::instrument::{Cheque, Instrument};
use crate::ledger::{Attachment, Item, ItemType, Transaction, TransactionType};
use crate::message::MessageType;
use crate::utilities::crypto::Signable;
use crate::utilities::time::ClientTime;
use crate::wallet::Account;

impl<'a> TransactionBuilder<'a> {
    /// Draws one number and writes a signed cheque. No message is sent.
    pub fn write_cheque(
        &self,
        account: &Account,
        amount: Amount,
        recipient: Option<NymId>,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        memo: &str,
    ) -> Result<Cheque, BuildError> {
        self.check_account(account)?;
        Self::check_amount(amount)?;
        Self::check_validity(valid_from, valid_to)?;

        let mut numbers = self
            .context
            .numbers()
            .reserve(1, MessageType::NotarizeTransaction)?;
        let mut cheque = Cheque {
            notary_id: self.context.notary_id().clone(),
            number: numbers[0].value(),
            amount,
            sender_nym: self.context.nym_id().clone(),
            sender_account: account.id.clone(),
            recipient_nym: recipient,
            remitter_nym: None,
            remitter_account: None,
            valid_from,
            valid_to,
            memo: memo.to_string(),
            certificate: None,
        };
        cheque.sign(self.context.keypair())?;

        numbers[0].set_success(true);
        log::info!("Wrote cheque {} for {amount} on {}", cheque.number, account.id);
        Ok(cheque)
    }

    /// Returns the number of a cheque that will never be deposited.
    pub fn discard_cheque(&self, cheque: &Cheque) -> bool {
        if cheque.number_owner() != self.context.nym_id()
            || &cheque.notary_id != self.context.notary_id()
        {
            log::warn!("Cheque {} was not written by this Nym", cheque.number);
            return false;
        }
        self.context.numbers().recover_available_number(cheque.number)
    }

    pub fn deposit_cheque(
        &self,
        view: AccountView,
        cheque: &Cheque,
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&view)?;
        Self::check_amount(cheque.amount)?;
        if &cheque.notary_id != self.context.notary_id() {
            return Err(BuildError::InvalidInstrument(format!(
                "cheque {} is drawn on notary {}",
                cheque.number, cheque.notary_id
            )));
        }
        let now = ClientTime::now();
        if cheque.is_expired(now) {
            return Err(BuildError::InvalidInstrument(format!(
                "cheque {} expired at {}",
                cheque.number, cheque.valid_to
            )));
        }
        if !cheque.is_valid_at(now) {
            return Err(BuildError::InvalidInstrument(format!(
                "cheque {} is not valid before {}",
                cheque.number, cheque.valid_from
            )));
        }
        if let Some(recipient) = &cheque.recipient_nym {
            if recipient != self.context.nym_id() {
                return Err(BuildError::InvalidInstrument(format!(
                    "cheque {} is payable to {recipient}",
                    cheque.number
                )));
            }
        }
        let signed_by_sender = cheque.certificate().map_or(false, |certificate| {
            NymId::from_public_key(certificate.public_key()) == cheque.sender_nym
                && cheque.verify_signature(certificate.public_key())
        });
        if !signed_by_sender && !cheque.is_voucher() {
            return Err(BuildError::InvalidInstrument(format!(
                "cheque {} is not signed by its sender",
                cheque.number
            )));
        }

        let numbers = self
            .context
            .numbers()
            .reserve(1, MessageType::NotarizeTransaction)?;
        let number = numbers[0].value();

        let instrument = if cheque.is_voucher() {
            Instrument::Voucher(cheque.clone())
        } else {
            Instrument::Cheque(cheque.clone())
        };
        let mut transaction = Transaction::new(self.header(
            TransactionType::Deposit,
            number,
            Some(&view.account.id),
        ));
        transaction.header.amount = cheque.amount;
        transaction.items.push(
            Item::new(ItemType::Deposit, Some(view.account.id.clone()))
                .with_amount(cheque.amount)
                .with_attachment(Attachment::Instrument(instrument)),
        );

        let proposal = AgreementProposal::new(number, cheque.amount).closing([number]);
        self.notarize(
            transaction,
            view,
            proposal,
            numbers,
            MessageType::NotarizeTransaction,
        )
    }

    pub fn transfer(
        &self,
        view: AccountView,
        destination: &AccountId,
        amount: Amount,
        note: &str,
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&view)?;
        Self::check_amount(amount)?;
        if destination == &view.account.id {
            return Err(BuildError::InvalidInstrument(
                "transfer to the same account".to_string(),
            ));
        }

        let numbers = self
            .context
            .numbers()
            .reserve(1, MessageType::NotarizeTransaction)?;
        let number = numbers[0].value();

        let mut transaction = Transaction::new(self.header(
            TransactionType::Transfer,
            number,
            Some(&view.account.id),
        ));
        transaction.header.amount = amount;
        let mut item = Item::new(ItemType::Transfer, Some(view.account.id.clone())).with_amount(amount);
        item.destination_account = Some(destination.clone());
        if !note.is_empty() {
            item.note = Some(note.to_string());
        }
        transaction.items.push(item);

        let proposal = AgreementProposal::new(number, -amount).outbox_pending(amount);
        self.notarize(
            transaction,
            view,
            proposal,
            numbers,
            MessageType::NotarizeTransaction,
        )
    }

    /// Draws the withdrawal number and the voucher's own number.
    pub fn withdraw_voucher(
        &self,
        view: AccountView,
        recipient: Option<NymId>,
        amount: Amount,
        valid_to: DateTime<Utc>,
        memo: &str,
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&view)?;
        Self::check_amount(amount)?;
        let now = ClientTime::now();
        Self::check_validity(now, valid_to)?;

        let numbers = self
            .context
            .numbers()
            .reserve(2, MessageType::NotarizeTransaction)?;
        let (number, voucher_number) = (numbers[0].value(), numbers[1].value());

        let voucher = Cheque {
            notary_id: self.context.notary_id().clone(),
            number: voucher_number,
            amount,
            sender_nym: self.context.nym_id().clone(),
            sender_account: view.account.id.clone(),
            recipient_nym: recipient,
            remitter_nym: Some(self.context.nym_id().clone()),
            remitter_account: Some(view.account.id.clone()),
            valid_from: now,
            valid_to,
            memo: memo.to_string(),
            certificate: None,
        };
        let mut transaction = Transaction::new(self.header(
            TransactionType::WithdrawVoucher,
            number,
            Some(&view.account.id),
        ));
        transaction.header.amount = amount;
        transaction.header.numbers.insert(voucher_number);
        transaction.items.push(
            Item::new(ItemType::WithdrawVoucher, Some(view.account.id.clone()))
                .with_amount(amount)
                .with_attachment(Attachment::Instrument(Instrument::Voucher(voucher))),
        );

        let proposal = AgreementProposal::new(number, -amount).closing([number]);
        self.notarize(
            transaction,
            view,
            proposal,
            numbers,
            MessageType::NotarizeTransaction,
        )
    }

    pub fn pay_dividend(
        &self,
        view: AccountView,
        dividend: Dividend,
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&view)?;
        Self::check_amount(dividend.amount_per_share)?;
        Self::check_amount(dividend.outstanding_shares)?;
        let total = dividend
            .total()
            .ok_or(BuildError::InvalidAmount(dividend.amount_per_share))?;

        let numbers = self
            .context
            .numbers()
            .reserve(1, MessageType::NotarizeTransaction)?;
        let number = numbers[0].value();

        let mut transaction = Transaction::new(self.header(
            TransactionType::PayDividend,
            number,
            Some(&view.account.id),
        ));
        transaction.header.amount = total;
        transaction.items.push(
            Item::new(ItemType::PayDividend, Some(view.account.id.clone()))
                .with_amount(total)
                .with_attachment(Attachment::Dividend(dividend)),
        );

        let proposal = AgreementProposal::new(number, -total).closing([number]);
        self.notarize(
            transaction,
            view,
            proposal,
            numbers,
            MessageType::NotarizeTransaction,
        )
    }

    /// Cancels the market offer or payment plan opened with `opening`.
    pub fn cancel_cron_item(
        &self,
        view: AccountView,
        opening: TransactionNumber,
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&view)?;
        if !self.context.numbers().verify_issued_number(opening) {
            return Err(BuildError::InvalidInstrument(format!(
                "cron item {opening} is not open"
            )));
        }

        let numbers = self
            .context
            .numbers()
            .reserve(1, MessageType::NotarizeTransaction)?;
        let number = numbers[0].value();

        let mut transaction = Transaction::new(self.header(
            TransactionType::CancelCronItem,
            number,
            Some(&view.account.id),
        ));
        transaction.header.in_reference_to = opening;
        transaction.items.push(
            Item::new(ItemType::CancelCronItem, Some(view.account.id.clone())).with_reference(opening),
        );

        let proposal = AgreementProposal::new(number, 0).closing([number]);
        self.notarize(
            transaction,
            view,
            proposal,
            numbers,
            MessageType::NotarizeTransaction,
        )
    }
}
