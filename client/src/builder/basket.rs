use crate::agreement::AgreementProposal;
use crate::builder::{AccountView, BuildError, PreparedTransaction, TransactionBuilder};
use crate::identifier::{Amount, InstrumentDefinitionId};
use crate::instrument::basket::{BasketExchange, ExchangeMember};
use crate::ledger::{Attachment, Item, ItemType, Transaction, TransactionType};
use crate::message::MessageType;
use crate::wallet::Account;

impl<'a> TransactionBuilder<'a> {
    /// Exchanges `multiple` minimum transfers into (or out of) the basket held in `view`.
    ///
    /// Draws the exchange number and the number the basket receipt will close.
    pub fn exchange_basket(
        &self,
        view: AccountView,
        basket: InstrumentDefinitionId,
        exchange_in: bool,
        multiple: Amount,
        members: &[&Account],
    ) -> Result<PreparedTransaction, BuildError> {
        self.check_view(&view)?;
        Self::check_amount(multiple)?;
        if view.account.instrument_definition != basket {
            return Err(BuildError::InvalidInstrument(format!(
                "account {} is not denominated in basket {basket}",
                view.account.id
            )));
        }
        if members.is_empty() {
            return Err(BuildError::InvalidInstrument(
                "basket exchange needs member accounts".to_string(),
            ));
        }
        for member in members {
            self.check_account(member)?;
        }

        let numbers = self
            .context
            .numbers()
            .reserve(2, MessageType::NotarizeTransaction)?;
        let (number, closing) = (numbers[0].value(), numbers[1].value());

        let exchange = BasketExchange {
            basket,
            basket_account: view.account.id.clone(),
            exchange_in,
            multiple,
            members: members
                .iter()
                .map(|account| ExchangeMember {
                    instrument_definition: account.instrument_definition.clone(),
                    account_id: account.id.clone(),
                })
                .collect(),
            closing_number: closing,
        };
        let mut transaction = Transaction::new(self.header(
            TransactionType::ExchangeBasket,
            number,
            Some(&view.account.id),
        ));
        transaction.header.numbers.insert(closing);
        transaction.items.push(
            Item::new(ItemType::ExchangeBasket, Some(view.account.id.clone()))
                .with_amount(multiple)
                .with_attachment(Attachment::BasketExchange(exchange)),
        );

        self.notarize(
            transaction,
            view,
            AgreementProposal::new(number, 0).closing([number]),
            numbers,
            MessageType::NotarizeTransaction,
        )
    }
}
