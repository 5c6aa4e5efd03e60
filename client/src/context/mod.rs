//! Client-side state for one (Nym, notary) pair.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identifier::{NotaryId, NymId, RequestNumber};
use crate::numbers::{NumberPool, NumberSnapshot};
use crate::utilities::crypto::{Keypair, PublicKey, Signable};
use crate::utilities::hash::HashType;

pub mod locks;

pub use locks::ContextLocks;

pub struct ServerContext {
    nym_id: NymId,
    notary_id: NotaryId,
    numbers: NumberPool,
    request_number: RequestNumber,
    acknowledged_replies: BTreeSet<RequestNumber>,
    remote_public_key: Option<PublicKey>,
    nymbox_hash: Option<HashType>,
    keypair: Keypair,
}

/// Persisted form of a [ServerContext]. The keypair lives in the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub nym_id: NymId,
    pub notary_id: NotaryId,
    pub numbers: NumberSnapshot,
    pub request_number: RequestNumber,
    pub acknowledged_replies: BTreeSet<RequestNumber>,
    pub remote_public_key: Option<PublicKey>,
    pub nymbox_hash: Option<HashType>,
}

impl ServerContext {
    pub fn new(
        nym_id: NymId,
        notary_id: NotaryId,
        keypair: Keypair,
        remote_public_key: Option<PublicKey>,
    ) -> Self {
        let numbers = NumberPool::new(format!("{nym_id}@{notary_id}"));
        Self {
            nym_id,
            notary_id,
            numbers,
            request_number: 1,
            acknowledged_replies: BTreeSet::new(),
            remote_public_key,
            nymbox_hash: None,
            keypair,
        }
    }

    pub fn from_snapshot(snapshot: ContextSnapshot, keypair: Keypair) -> Self {
        let mut context = Self::new(
            snapshot.nym_id.clone(),
            snapshot.notary_id.clone(),
            keypair,
            None,
        );
        context.restore(snapshot);
        context
    }

    pub fn nym_id(&self) -> &NymId {
        &self.nym_id
    }

    pub fn notary_id(&self) -> &NotaryId {
        &self.notary_id
    }

    pub fn numbers(&self) -> &NumberPool {
        &self.numbers
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn request_number(&self) -> RequestNumber {
        self.request_number
    }

    /// Returns the current request number and advances it.
    pub fn next_request_number(&mut self) -> RequestNumber {
        let current = self.request_number;
        self.request_number += 1;
        current
    }

    pub fn set_request_number(&mut self, request_number: RequestNumber) {
        log::debug!(
            "[{}@{}] Request number {} -> {request_number}",
            self.nym_id,
            self.notary_id,
            self.request_number
        );
        self.request_number = request_number;
    }

    pub fn acknowledged_replies(&self) -> &BTreeSet<RequestNumber> {
        &self.acknowledged_replies
    }

    pub fn add_acknowledged_reply(&mut self, request_number: RequestNumber) {
        if self.acknowledged_replies.insert(request_number) {
            log::trace!("Acknowledged reply to request {request_number}");
        }
    }

    pub fn verify_acknowledged_reply(&self, request_number: RequestNumber) -> bool {
        self.acknowledged_replies.contains(&request_number)
    }

    /// Forgets acknowledgements whose reply notices the notary has already removed.
    pub fn remove_acknowledged_replies<I>(&mut self, request_numbers: I)
    where
        I: IntoIterator<Item = RequestNumber>,
    {
        for request_number in request_numbers {
            self.acknowledged_replies.remove(&request_number);
        }
    }

    pub fn remote_public_key(&self) -> Option<&PublicKey> {
        self.remote_public_key.as_ref()
    }

    pub fn set_remote_public_key(&mut self, public_key: PublicKey) {
        self.remote_public_key = Some(public_key);
    }

    /// Checks the notary's signature on `value`. Passes when the notary key is not known yet.
    pub fn verify_remote<T: Signable>(&self, value: &T) -> bool {
        match &self.remote_public_key {
            Some(public_key) => value.verify_signature(public_key),
            None => {
                log::trace!("Notary key for {} unknown, skipping verification", self.notary_id);
                true
            }
        }
    }

    pub fn nymbox_hash(&self) -> Option<HashType> {
        self.nymbox_hash
    }

    pub fn set_nymbox_hash(&mut self, hash: HashType) {
        self.nymbox_hash = Some(hash);
    }

    /// True while the notary still expects this Nym to close numbers, or the client has
    /// claims on numbers the notary has not confirmed.
    pub fn has_open_numbers(&self) -> bool {
        self.numbers.issued_count() > 0 || self.numbers.tentative_count() > 0
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            nym_id: self.nym_id.clone(),
            notary_id: self.notary_id.clone(),
            numbers: self.numbers.snapshot(),
            request_number: self.request_number,
            acknowledged_replies: self.acknowledged_replies.clone(),
            remote_public_key: self.remote_public_key.clone(),
            nymbox_hash: self.nymbox_hash,
        }
    }

    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.numbers.restore(snapshot.numbers);
        self.request_number = snapshot.request_number;
        self.acknowledged_replies = snapshot.acknowledged_replies;
        self.remote_public_key = snapshot.remote_public_key;
        self.nymbox_hash = snapshot.nymbox_hash;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn context() -> ServerContext {
        ServerContext::new(
            NymId::from("alice"),
            NotaryId::from("notary"),
            Keypair::generate(),
            None,
        )
    }

    #[test]
    fn test_request_numbers_advance() {
        let mut context = context();
        assert_eq!(context.next_request_number(), 1);
        assert_eq!(context.next_request_number(), 2);

        context.set_request_number(40);
        assert_eq!(context.next_request_number(), 40);
        assert_eq!(context.request_number(), 41);
    }

    #[test]
    fn test_acknowledged_replies_pruned() {
        let mut context = context();
        context.add_acknowledged_reply(3);
        context.add_acknowledged_reply(4);
        context.remove_acknowledged_replies([3]);

        assert!(!context.verify_acknowledged_reply(3));
        assert!(context.verify_acknowledged_reply(4));
    }

    #[test]
    fn test_snapshot_restores_state() {
        let mut context = context();
        context.numbers().add_issued_number(5);
        context.numbers().add_tentative_number(9);
        context.set_request_number(12);
        context.add_acknowledged_reply(11);
        let snapshot = context.snapshot();

        let restored = ServerContext::from_snapshot(snapshot.clone(), Keypair::generate());
        assert_eq!(restored.snapshot(), snapshot);
        assert!(restored.has_open_numbers());
    }

    #[test]
    fn test_verify_remote_with_known_key() {
        let notary = Keypair::generate();
        let mut context = context();
        let mut reply = crate::message::Reply {
            message_type: crate::message::MessageType::GetNymbox,
            nym_id: NymId::from("alice"),
            notary_id: NotaryId::from("notary"),
            request_number: 1,
            success: true,
            payload: crate::message::ReplyPayload::None,
            acknowledged_replies: BTreeSet::new(),
            certificate: None,
        };
        assert!(context.verify_remote(&reply));

        context.set_remote_public_key(notary.public_key());
        assert!(!context.verify_remote(&reply));

        reply.sign(&notary).unwrap();
        assert!(context.verify_remote(&reply));
    }
}
