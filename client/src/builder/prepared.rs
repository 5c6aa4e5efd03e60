use crate::identifier::TransactionNumber;
use crate::ledger::Transaction;
use crate::message::Message;
use crate::numbers::ManagedNumber;

/// A signed message together with the transaction numbers it holds.
///
/// The numbers go back to the pool when this is dropped. Only [PreparedTransaction::commit],
/// called once the transport reports that the message left, keeps them drawn.
#[derive(Debug)]
pub struct PreparedTransaction {
    message: Message,
    numbers: Vec<ManagedNumber>,
}

impl PreparedTransaction {
    pub(crate) fn new(message: Message, numbers: Vec<ManagedNumber>) -> Self {
        Self { message, numbers }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.message.transaction()
    }

    pub fn numbers(&self) -> Vec<TransactionNumber> {
        self.numbers.iter().map(ManagedNumber::value).collect()
    }

    /// Marks every held number as used and releases the message.
    ///
    /// # Panics
    ///
    /// If any held number is invalid. Builders never produce one, so this means the local
    /// number state is corrupted.
    pub fn commit(self) -> Message {
        let PreparedTransaction {
            message,
            mut numbers,
        } = self;
        for number in numbers.iter_mut() {
            assert!(
                number.valid(),
                "Committing an invalid transaction number for {}",
                message.message_type
            );
            number.set_success(true);
        }
        message
    }
}
