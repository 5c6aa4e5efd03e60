use std::collections::{BTreeMap, HashMap};

use crate::identifier::{NotaryId, NymId, RequestNumber};
use crate::message::Message;

/// Messages sent to a notary whose replies have not been processed yet.
///
/// Keyed by (notary, Nym) and then by request number. Several messages can share a request
/// number when one was re-sent.
#[derive(Default)]
pub struct MessageOutbuffer {
    messages: HashMap<(NotaryId, NymId), BTreeMap<RequestNumber, Vec<Message>>>,
}

impl MessageOutbuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: Message) {
        log::debug!(
            "Adding {} request {} to outbuffer: {}",
            message.message_type,
            message.request_number,
            message.id
        );
        self.messages
            .entry((message.notary_id.clone(), message.nym_id.clone()))
            .or_default()
            .entry(message.request_number)
            .or_default()
            .push(message);
        log::trace!("Outbuffer size: {}", self.len());
    }

    pub fn get(
        &self,
        request_number: RequestNumber,
        notary: &NotaryId,
        nym: &NymId,
    ) -> Option<&Message> {
        self.messages
            .get(&(notary.clone(), nym.clone()))
            .and_then(|requests| requests.get(&request_number))
            .and_then(|messages| messages.first())
    }

    /// Removes every message with `request_number`. Returns false if there was none.
    pub fn remove(&mut self, request_number: RequestNumber, notary: &NotaryId, nym: &NymId) -> bool {
        !self.take(request_number, notary, nym).is_empty()
    }

    pub fn take(
        &mut self,
        request_number: RequestNumber,
        notary: &NotaryId,
        nym: &NymId,
    ) -> Vec<Message> {
        let key = (notary.clone(), nym.clone());
        let Some(requests) = self.messages.get_mut(&key) else {
            return Vec::new();
        };
        let taken = requests.remove(&request_number).unwrap_or_default();
        if requests.is_empty() {
            self.messages.remove(&key);
        }
        if taken.is_empty() {
            log::trace!("Request {request_number} not found in outbuffer");
        } else {
            log::debug!("Removed request {request_number} from outbuffer");
        }
        taken
    }

    /// The pair's messages in request order, as they are persisted.
    pub fn messages_for(&self, notary: &NotaryId, nym: &NymId) -> Vec<Message> {
        self.messages
            .get(&(notary.clone(), nym.clone()))
            .map(|requests| requests.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn request_numbers(&self, notary: &NotaryId, nym: &NymId) -> Vec<RequestNumber> {
        self.messages
            .get(&(notary.clone(), nym.clone()))
            .map(|requests| requests.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn len_for(&self, notary: &NotaryId, nym: &NymId) -> usize {
        self.messages
            .get(&(notary.clone(), nym.clone()))
            .map(|requests| requests.values().map(Vec::len).sum())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages
            .values()
            .flat_map(|requests| requests.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops every message for the pair, handing each to `harvest` first so the numbers it
    /// still holds can be recovered.
    pub fn clear<F>(&mut self, notary: &NotaryId, nym: &NymId, mut harvest: F) -> usize
    where
        F: FnMut(&Message),
    {
        let Some(requests) = self.messages.remove(&(notary.clone(), nym.clone())) else {
            return 0;
        };
        let mut cleared = 0;
        for message in requests.values().flatten() {
            harvest(message);
            cleared += 1;
        }
        log::debug!("Cleared {cleared} messages for {nym} on {notary} from outbuffer");
        cleared
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{MessagePayload, MessageType};

    fn message(request_number: RequestNumber, nym: &str) -> Message {
        let mut message = Message::new(
            MessageType::GetTransactionNumbers,
            NymId::from(nym),
            NotaryId::from("notary"),
            MessagePayload::None,
        );
        message.request_number = request_number;
        message
    }

    #[test]
    fn test_add_get_remove() {
        let mut outbuffer = MessageOutbuffer::new();
        let notary = NotaryId::from("notary");
        let nym = NymId::from("alice");
        outbuffer.add(message(3, "alice"));
        outbuffer.add(message(3, "alice"));
        outbuffer.add(message(4, "alice"));
        outbuffer.add(message(3, "bob"));

        assert_eq!(outbuffer.len(), 4);
        assert_eq!(outbuffer.len_for(&notary, &nym), 3);
        assert_eq!(outbuffer.get(3, &notary, &nym).map(|m| m.request_number), Some(3));
        assert_eq!(outbuffer.request_numbers(&notary, &nym), vec![3, 4]);

        assert!(outbuffer.remove(3, &notary, &nym));
        assert!(!outbuffer.remove(3, &notary, &nym));
        assert_eq!(outbuffer.len_for(&notary, &nym), 1);
        assert_eq!(outbuffer.len_for(&notary, &NymId::from("bob")), 1);
    }

    #[test]
    fn test_messages_for_pair_in_request_order() {
        let mut outbuffer = MessageOutbuffer::new();
        outbuffer.add(message(5, "alice"));
        outbuffer.add(message(3, "alice"));
        outbuffer.add(message(4, "bob"));

        let notary = NotaryId::from("notary");
        let sent = outbuffer.messages_for(&notary, &NymId::from("alice"));
        assert_eq!(
            sent.iter().map(|m| m.request_number).collect::<Vec<_>>(),
            vec![3, 5]
        );
        assert!(outbuffer.messages_for(&NotaryId::from("other"), &NymId::from("alice")).is_empty());
    }

    #[test]
    fn test_clear_harvests_every_message() {
        let mut outbuffer = MessageOutbuffer::new();
        outbuffer.add(message(3, "alice"));
        outbuffer.add(message(5, "alice"));
        outbuffer.add(message(4, "bob"));

        let mut harvested = Vec::new();
        let cleared = outbuffer.clear(&NotaryId::from("notary"), &NymId::from("alice"), |m| {
            harvested.push(m.request_number)
        });

        assert_eq!(cleared, 2);
        assert_eq!(harvested, vec![3, 5]);
        assert_eq!(outbuffer.len(), 1);
    }
}
