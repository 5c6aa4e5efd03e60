use chrono::{DateTime, Utc};

use crate::agreement::AgreementProposal;
use crate::builder::{AccountView, BuildError, PreparedTransaction, TransactionBuilder};
use crate::identifier::{Amount, NymId};
use crate::instrument::{Instrument, PaymentPlan, SmartContract};
use crate::ledger::{Attachment, Item, ItemType, Transaction, TransactionType};
use crate::market::{MarketOffer, OfferError, OfferTerms};
use crate::message::MessageType;
use crate::utilities::crypto::{PublicKey, Signable};
use crate::wallet::Account;

/// Terms of a payment plan as the merchant proposes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTerms {
    pub initial_payment: Amount,
    pub payment_amount: Amount,
    pub payment_period_secs: i64,
    pub max_payments: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub memo: String,
}

/// Binds one of a party's named contract accounts to a real account.
pub struct SmartContractAccount<'a> {
    pub name: &'a str,
    pub account: &'a Account,
}

impl<'a> TransactionBuilder<'a> {
    /// Draws the opening number and the closing numbers for the asset and currency accounts.
    pub fn issue_market_offer(
        &self,
        asset: AccountView,
        currency: &Account,
        terms: OfferTerms,
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&asset)?;
        self.check_account(currency)?;
        if asset.account.instrument_definition == currency.instrument_definition {
            return Err(OfferError::SameInstrument.into());
        }
        let (increment, stop) = terms.validate()?;

        let numbers = self
            .context
            .numbers()
            .reserve(3, MessageType::NotarizeTransaction)?;
        let (opening, asset_closing, currency_closing) =
            (numbers[0].value(), numbers[1].value(), numbers[2].value());

        let offer = MarketOffer {
            notary_id: self.context.notary_id().clone(),
            asset_type: asset.account.instrument_definition.clone(),
            currency_type: currency.instrument_definition.clone(),
            asset_account: asset.account.id.clone(),
            currency_account: currency.id.clone(),
            scale: terms.scale,
            minimum_increment: increment,
            total_assets: terms.total_assets,
            price_limit: terms.price_limit,
            selling: terms.selling,
            stop,
            valid_to: terms.valid_to,
            opening,
            asset_closing,
            currency_closing,
        };
        let mut transaction = Transaction::new(self.header(
            TransactionType::MarketOffer,
            opening,
            Some(&asset.account.id),
        ));
        transaction.header.numbers.extend([asset_closing, currency_closing]);
        transaction.items.push(
            Item::new(ItemType::MarketOffer, Some(asset.account.id.clone()))
                .with_amount(terms.total_assets)
                .with_attachment(Attachment::Offer(offer)),
        );

        self.notarize(
            transaction,
            asset,
            AgreementProposal::new(opening, 0),
            numbers,
            MessageType::NotarizeTransaction,
        )
    }

    /// Merchant side: draws the recipient's opening and closing numbers and signs the proposal.
    pub fn propose_payment_plan(
        &self,
        recipient_account: &Account,
        sender_nym: NymId,
        terms: PlanTerms,
    ) -> Result<PaymentPlan, BuildError> {
        self.check_account(recipient_account)?;
        if terms.initial_payment < 0 || terms.payment_amount < 0 {
            return Err(BuildError::InvalidAmount(
                terms.initial_payment.min(terms.payment_amount),
            ));
        }
        if terms.initial_payment == 0 && terms.payment_amount == 0 {
            return Err(BuildError::InvalidAmount(0));
        }
        Self::check_validity(terms.valid_from, terms.valid_to)?;

        let mut numbers = self
            .context
            .numbers()
            .reserve(2, MessageType::NotarizeTransaction)?;
        let mut plan = PaymentPlan {
            notary_id: self.context.notary_id().clone(),
            recipient_nym: self.context.nym_id().clone(),
            recipient_account: recipient_account.id.clone(),
            recipient_opening: numbers[0].value(),
            recipient_closing: numbers[1].value(),
            sender_nym,
            sender_account: None,
            sender_opening: 0,
            sender_closing: 0,
            initial_payment: terms.initial_payment,
            payment_amount: terms.payment_amount,
            payment_period_secs: terms.payment_period_secs,
            max_payments: terms.max_payments,
            valid_from: terms.valid_from,
            valid_to: terms.valid_to,
            memo: terms.memo,
            recipient_certificate: None,
            certificate: None,
        };
        plan.sign_proposal(self.context.keypair())?;

        numbers.iter_mut().for_each(|number| number.set_success(true));
        log::info!(
            "Proposed payment plan {} to {}",
            plan.recipient_opening,
            plan.sender_nym
        );
        Ok(plan)
    }

    /// Payer side: draws the sender's opening and closing numbers and countersigns.
    pub fn confirm_payment_plan(
        &self,
        sender_account: &Account,
        mut plan: PaymentPlan,
        merchant: Option<&PublicKey>,
    ) -> Result<PaymentPlan, BuildError> {
        self.check_account(sender_account)?;
        if &plan.sender_nym != self.context.nym_id() || &plan.notary_id != self.context.notary_id()
        {
            return Err(BuildError::InvalidInstrument(
                "payment plan is not addressed to this Nym on this notary".to_string(),
            ));
        }
        if plan.is_confirmed() {
            return Err(BuildError::InvalidInstrument(
                "payment plan is already confirmed".to_string(),
            ));
        }
        let merchant = merchant
            .or_else(|| plan.recipient_certificate.as_ref().map(|c| c.public_key()))
            .cloned();
        let signed = merchant.map_or(false, |merchant| {
            NymId::from_public_key(&merchant) == plan.recipient_nym && plan.verify_proposal(&merchant)
        });
        if !signed {
            return Err(BuildError::InvalidInstrument(
                "payment plan proposal is not signed by its recipient".to_string(),
            ));
        }

        let mut numbers = self
            .context
            .numbers()
            .reserve(2, MessageType::NotarizeTransaction)?;
        plan.sender_account = Some(sender_account.id.clone());
        plan.sender_opening = numbers[0].value();
        plan.sender_closing = numbers[1].value();
        plan.sign(self.context.keypair())?;

        numbers.iter_mut().for_each(|number| number.set_success(true));
        Ok(plan)
    }

    /// Uses the sender's opening number drawn at confirmation. Draws nothing new.
    pub fn deposit_payment_plan(
        &self,
        view: AccountView,
        plan: &PaymentPlan,
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&view)?;
        if !plan.is_confirmed()
            || &plan.sender_nym != self.context.nym_id()
            || plan.sender_account.as_ref() != Some(&view.account.id)
        {
            return Err(BuildError::InvalidInstrument(
                "payment plan is not confirmed for this account".to_string(),
            ));
        }
        if !plan.verify_signature(&self.context.keypair().public_key()) {
            return Err(BuildError::InvalidInstrument(
                "payment plan confirmation signature is invalid".to_string(),
            ));
        }
        for number in [plan.sender_opening, plan.sender_closing] {
            if !self.context.numbers().verify_issued_number(number) {
                return Err(BuildError::InvalidInstrument(format!(
                    "payment plan number {number} is not issued"
                )));
            }
        }

        let mut transaction = Transaction::new(self.header(
            TransactionType::PaymentPlan,
            plan.sender_opening,
            Some(&view.account.id),
        ));
        transaction.header.numbers.insert(plan.sender_closing);
        transaction.items.push(
            Item::new(ItemType::PaymentPlan, Some(view.account.id.clone()))
                .with_attachment(Attachment::Instrument(Instrument::PaymentPlan(plan.clone()))),
        );

        self.notarize(
            transaction,
            view,
            AgreementProposal::new(plan.sender_opening, 0),
            Vec::new(),
            MessageType::NotarizeTransaction,
        )
    }

    /// Signs on as `party`: draws an opening number plus one closing number per account.
    pub fn confirm_smart_contract(
        &self,
        mut contract: SmartContract,
        party: &str,
        accounts: &[SmartContractAccount],
    ) -> Result<SmartContract, BuildError> {
        if &contract.notary_id != self.context.notary_id() {
            return Err(BuildError::InvalidInstrument(format!(
                "smart contract is for notary {}",
                contract.notary_id
            )));
        }
        for binding in accounts {
            self.check_account(binding.account)?;
        }
        let nym = self.context.nym_id();
        {
            let entry = contract.party(party).ok_or_else(|| {
                BuildError::InvalidInstrument(format!("no party named {party}"))
            })?;
            if entry.opening > 0 {
                return Err(BuildError::InvalidInstrument(format!(
                    "party {party} has already confirmed"
                )));
            }
            if entry.nym_id.as_ref().map_or(false, |owner| owner != nym) {
                return Err(BuildError::InvalidInstrument(format!(
                    "party {party} belongs to another Nym"
                )));
            }
            for account in &entry.accounts {
                if !accounts.iter().any(|binding| binding.name == account.name) {
                    return Err(BuildError::InvalidInstrument(format!(
                        "no account bound for {party}.{}",
                        account.name
                    )));
                }
            }
        }

        let mut numbers = {
            let needed = contract.party(party).map_or(0, |p| p.accounts.len()) + 1;
            self.context
                .numbers()
                .reserve(needed, MessageType::NotarizeTransaction)?
        };
        if let Some(entry) = contract.party_mut(party) {
            entry.nym_id = Some(nym.clone());
            entry.opening = numbers[0].value();
            for (account, number) in entry.accounts.iter_mut().zip(numbers.iter().skip(1)) {
                if let Some(binding) = accounts.iter().find(|b| b.name == account.name) {
                    account.account_id = Some(binding.account.id.clone());
                }
                account.closing = number.value();
            }
        }
        contract.sign_party(party, self.context.keypair())?;

        numbers.iter_mut().for_each(|number| number.set_success(true));
        log::info!("Confirmed smart contract as party {party}");
        Ok(contract)
    }

    /// Activates a fully confirmed contract using this Nym's party opening number.
    pub fn activate_smart_contract(
        &self,
        view: AccountView,
        mut contract: SmartContract,
        party: &str,
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&view)?;
        if !contract.is_fully_confirmed() {
            return Err(BuildError::InvalidInstrument(
                "smart contract is not confirmed by every party".to_string(),
            ));
        }
        let entry = contract
            .party(party)
            .filter(|entry| entry.nym_id.as_ref() == Some(self.context.nym_id()))
            .ok_or_else(|| {
                BuildError::InvalidInstrument(format!("this Nym is not party {party}"))
            })?;
        if !contract.verify_party(party, &self.context.keypair().public_key()) {
            return Err(BuildError::InvalidInstrument(format!(
                "party {party} signature is invalid"
            )));
        }
        if !entry
            .accounts
            .iter()
            .any(|account| account.account_id.as_ref() == Some(&view.account.id))
        {
            return Err(BuildError::InvalidInstrument(format!(
                "account {} is not bound to party {party}",
                view.account.id
            )));
        }
        let opening = entry.opening;
        let closing: Vec<_> = entry.accounts.iter().map(|account| account.closing).collect();
        for number in std::iter::once(opening).chain(closing.iter().copied()) {
            if !self.context.numbers().verify_issued_number(number) {
                return Err(BuildError::InvalidInstrument(format!(
                    "smart contract number {number} is not issued"
                )));
            }
        }
        contract.activator = Some(party.to_string());

        let mut transaction = Transaction::new(self.header(
            TransactionType::SmartContract,
            opening,
            Some(&view.account.id),
        ));
        transaction.header.numbers.extend(closing);
        transaction.items.push(
            Item::new(ItemType::SmartContract, Some(view.account.id.clone()))
                .with_attachment(Attachment::Instrument(Instrument::SmartContract(contract))),
        );

        self.notarize(
            transaction,
            view,
            AgreementProposal::new(opening, 0),
            Vec::new(),
            MessageType::NotarizeTransaction,
        )
    }
}
