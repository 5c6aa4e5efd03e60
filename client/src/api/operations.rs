//! Transaction requests and instruments, one method per builder operation.

use chrono::{DateTime, Utc};

use crate::api::{ClientError, NotaryClient, TransactionOutcome};
use crate::builder::{AccountView, PlanTerms, PreparedTransaction, SmartContractAccount, TransactionBuilder};
use crate::context::ServerContext;
use crate::identifier::{AccountId, Amount, InstrumentDefinitionId, NotaryId, NymId, TransactionNumber};
use crate::instrument::basket::{BasketTerms, Dividend};
use crate::instrument::{Cheque, Instrument, PaymentPlan, SmartContract};
use crate::ledger::{Attachment, BoxType, Ledger, Transaction, TransactionHeader, TransactionType};
use crate::market::OfferTerms;
use crate::message::Transport;
use crate::reply::ReplyReport;
use crate::utilities::crypto::PublicKey;
use crate::wallet::Account;

/// An account together with its locally stored boxes.
pub(super) struct LoadedAccount {
    pub(super) account: Account,
    pub(super) inbox: Ledger,
    pub(super) outbox: Ledger,
}

impl LoadedAccount {
    pub(super) fn view(&self) -> AccountView<'_> {
        AccountView::new(&self.account, &self.inbox, &self.outbox)
    }
}

impl<T: Transport> NotaryClient<T> {
    pub(super) fn load_account(&self, account_id: &AccountId) -> Result<LoadedAccount, ClientError> {
        let account = self.wallet.read().account(account_id)?.clone();
        let inbox = self.load_box(
            BoxType::Inbox,
            &account.nym_id,
            &account.notary_id,
            Some(account_id),
        )?;
        let outbox = self.load_box(
            BoxType::Outbox,
            &account.nym_id,
            &account.notary_id,
            Some(account_id),
        )?;
        Ok(LoadedAccount {
            account,
            inbox,
            outbox,
        })
    }

    /// Builds a transaction under the pair's lock and sends it. The drawn numbers are
    /// committed only once the transport reports the message left.
    pub(super) fn notarize<F>(
        &self,
        nym: &NymId,
        notary: &NotaryId,
        build: F,
    ) -> Result<(TransactionOutcome, Option<ReplyReport>), ClientError>
    where
        F: FnOnce(&ServerContext) -> Result<PreparedTransaction, ClientError>,
    {
        let lock = self.locks.get(nym, notary);
        let _guard = lock.lock();
        let context = self.context(nym, notary)?;
        let mut context = context.lock();

        let prepared = build(&*context)?;
        let message = prepared.message().clone();
        let report = self.send(&mut context, message, move || {
            prepared.commit();
        })?;
        let outcome = report
            .as_ref()
            .map_or(TransactionOutcome::Unresolved, |report| report.outcome.into());
        log::debug!("Transaction for {nym} on {notary}: {outcome:?}");
        Ok((outcome, report))
    }

    fn notarize_on<F>(&self, account_id: &AccountId, build: F) -> Result<TransactionOutcome, ClientError>
    where
        F: FnOnce(TransactionBuilder, AccountView) -> Result<PreparedTransaction, ClientError>,
    {
        let (nym, notary) = {
            let wallet = self.wallet.read();
            let account = wallet.account(account_id)?;
            (account.nym_id.clone(), account.notary_id.clone())
        };
        // The balance and boxes the statement is built from must not change before it is sent.
        let lock = self.locks.get(&nym, &notary);
        let _guard = lock.lock();
        let loaded = self.load_account(account_id)?;
        let (outcome, _) = self.notarize(&nym, &notary, |context| {
            build(TransactionBuilder::new(context), loaded.view())
        })?;
        Ok(outcome)
    }

    /// Runs a builder call that draws numbers into an instrument instead of a request.
    fn with_builder<R, F>(&self, nym: &NymId, notary: &NotaryId, f: F) -> Result<R, ClientError>
    where
        F: FnOnce(TransactionBuilder) -> Result<R, ClientError>,
    {
        let lock = self.locks.get(nym, notary);
        let _guard = lock.lock();
        let context = self.context(nym, notary)?;
        let context = context.lock();
        let result = f(TransactionBuilder::new(&context))?;
        self.persist_context(&context)?;
        Ok(result)
    }

    /// Keeps a copy of an instrument this Nym handed out.
    fn add_outpayment(
        &self,
        nym: &NymId,
        notary: &NotaryId,
        number: TransactionNumber,
        instrument: Instrument,
    ) -> Result<(), ClientError> {
        let mut outpayments = self.load_box(BoxType::Outpayments, nym, notary, None)?;
        let header = TransactionHeader::new(
            TransactionType::InstrumentNotice,
            number,
            nym.clone(),
            None,
            notary.clone(),
        );
        let mut entry = Transaction::new(header);
        entry.attachment = Some(Attachment::Instrument(instrument));
        outpayments.add(entry)?;
        self.store.store_ledger(&outpayments)?;
        Ok(())
    }

    pub fn write_cheque(
        &self,
        account_id: &AccountId,
        amount: Amount,
        recipient: Option<NymId>,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        memo: &str,
    ) -> Result<Cheque, ClientError> {
        let account = self.wallet.read().account(account_id)?.clone();
        let cheque = self.with_builder(&account.nym_id, &account.notary_id, |builder| {
            Ok(builder.write_cheque(&account, amount, recipient, valid_from, valid_to, memo)?)
        })?;
        self.add_outpayment(
            &account.nym_id,
            &account.notary_id,
            cheque.number,
            Instrument::Cheque(cheque.clone()),
        )?;
        Ok(cheque)
    }

    /// Gives an unsent cheque's number back. The cheque must not be handed out afterwards.
    pub fn discard_cheque(&self, cheque: &Cheque) -> Result<bool, ClientError> {
        let nym = cheque.number_owner().clone();
        let notary = cheque.notary_id.clone();
        let recovered = self.with_builder(&nym, &notary, |builder| Ok(builder.discard_cheque(cheque)))?;
        if recovered {
            let mut outpayments = self.load_box(BoxType::Outpayments, &nym, &notary, None)?;
            if outpayments.remove(cheque.number).is_some() {
                self.store.store_ledger(&outpayments)?;
            }
        }
        Ok(recovered)
    }

    pub fn deposit_cheque(
        &self,
        account_id: &AccountId,
        cheque: &Cheque,
    ) -> Result<TransactionOutcome, ClientError> {
        self.notarize_on(account_id, |builder, view| {
            Ok(builder.deposit_cheque(view, cheque)?)
        })
    }

    pub fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
        note: &str,
    ) -> Result<TransactionOutcome, ClientError> {
        self.notarize_on(from, |builder, view| {
            Ok(builder.transfer(view, to, amount, note)?)
        })
    }

    pub fn withdraw_voucher(
        &self,
        account_id: &AccountId,
        recipient: Option<NymId>,
        amount: Amount,
        valid_to: DateTime<Utc>,
        memo: &str,
    ) -> Result<TransactionOutcome, ClientError> {
        self.notarize_on(account_id, |builder, view| {
            Ok(builder.withdraw_voucher(view, recipient, amount, valid_to, memo)?)
        })
    }

    pub fn pay_dividend(
        &self,
        account_id: &AccountId,
        dividend: Dividend,
    ) -> Result<TransactionOutcome, ClientError> {
        self.notarize_on(account_id, |builder, view| {
            Ok(builder.pay_dividend(view, dividend)?)
        })
    }

    pub fn cancel_cron_item(
        &self,
        account_id: &AccountId,
        opening: TransactionNumber,
    ) -> Result<TransactionOutcome, ClientError> {
        self.notarize_on(account_id, |builder, view| {
            Ok(builder.cancel_cron_item(view, opening)?)
        })
    }

    pub fn issue_market_offer(
        &self,
        asset_account: &AccountId,
        currency_account: &AccountId,
        terms: OfferTerms,
    ) -> Result<TransactionOutcome, ClientError> {
        let currency = self.wallet.read().account(currency_account)?.clone();
        self.notarize_on(asset_account, |builder, view| {
            Ok(builder.issue_market_offer(view, &currency, terms)?)
        })
    }

    pub fn propose_payment_plan(
        &self,
        recipient_account: &AccountId,
        sender_nym: NymId,
        terms: PlanTerms,
    ) -> Result<PaymentPlan, ClientError> {
        let account = self.wallet.read().account(recipient_account)?.clone();
        let plan = self.with_builder(&account.nym_id, &account.notary_id, |builder| {
            Ok(builder.propose_payment_plan(&account, sender_nym, terms)?)
        })?;
        self.add_outpayment(
            &account.nym_id,
            &account.notary_id,
            plan.recipient_opening,
            Instrument::PaymentPlan(plan.clone()),
        )?;
        Ok(plan)
    }

    pub fn confirm_payment_plan(
        &self,
        sender_account: &AccountId,
        plan: PaymentPlan,
        merchant: Option<&PublicKey>,
    ) -> Result<PaymentPlan, ClientError> {
        let account = self.wallet.read().account(sender_account)?.clone();
        self.with_builder(&account.nym_id, &account.notary_id, |builder| {
            Ok(builder.confirm_payment_plan(&account, plan, merchant)?)
        })
    }

    pub fn deposit_payment_plan(
        &self,
        account_id: &AccountId,
        plan: &PaymentPlan,
    ) -> Result<TransactionOutcome, ClientError> {
        self.notarize_on(account_id, |builder, view| {
            Ok(builder.deposit_payment_plan(view, plan)?)
        })
    }

    /// Signs `party` onto the contract, binding each named contract account to a wallet
    /// account.
    pub fn confirm_smart_contract(
        &self,
        nym: &NymId,
        contract: SmartContract,
        party: &str,
        accounts: &[(&str, AccountId)],
    ) -> Result<SmartContract, ClientError> {
        let notary = contract.notary_id.clone();
        let bound = {
            let wallet = self.wallet.read();
            accounts
                .iter()
                .map(|(name, id)| Ok((*name, wallet.account(id)?.clone())))
                .collect::<Result<Vec<_>, ClientError>>()?
        };
        let bindings: Vec<SmartContractAccount> = bound
            .iter()
            .map(|(name, account)| SmartContractAccount {
                name: *name,
                account,
            })
            .collect();
        self.with_builder(nym, &notary, |builder| {
            Ok(builder.confirm_smart_contract(contract, party, &bindings)?)
        })
    }

    pub fn activate_smart_contract(
        &self,
        account_id: &AccountId,
        contract: SmartContract,
        party: &str,
    ) -> Result<TransactionOutcome, ClientError> {
        self.notarize_on(account_id, |builder, view| {
            Ok(builder.activate_smart_contract(view, contract, party)?)
        })
    }

    pub fn exchange_basket(
        &self,
        basket_account: &AccountId,
        basket: InstrumentDefinitionId,
        exchange_in: bool,
        multiple: Amount,
        members: &[AccountId],
    ) -> Result<TransactionOutcome, ClientError> {
        let members = {
            let wallet = self.wallet.read();
            members
                .iter()
                .map(|id| Ok(wallet.account(id)?.clone()))
                .collect::<Result<Vec<_>, ClientError>>()?
        };
        let member_refs: Vec<&Account> = members.iter().collect();
        self.notarize_on(basket_account, |builder, view| {
            Ok(builder.exchange_basket(view, basket, exchange_in, multiple, &member_refs)?)
        })
    }

    pub fn issue_basket(
        &self,
        nym: &NymId,
        notary: &NotaryId,
        terms: BasketTerms,
    ) -> Result<ReplyReport, ClientError> {
        let lock = self.locks.get(nym, notary);
        let _guard = lock.lock();
        let context = self.context(nym, notary)?;
        let mut context = context.lock();
        let message = TransactionBuilder::new(&context).issue_basket(terms)?;
        self.request(&mut context, message)
    }
}
