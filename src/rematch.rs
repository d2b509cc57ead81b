//! Two-party rematch handshake nested inside an open match connection.
//!
//! States run `None → Offered → (Accepted | Declined | Expired) → None`. The
//! requester sees a countdown; the receiver sees accept/decline controls.
//! Roles are decided by comparing stable participant ids, never display
//! names.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, VersusError};
use crate::protocol::{ClientMessage, MatchId, RematchOfferPayload};

/// Lifecycle of a rematch offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RematchStatus {
    Offered,
    Accepted,
    Declined,
    Expired,
}

/// A rematch offer between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RematchOffer {
    pub match_id: Option<MatchId>,
    pub requester_id: String,
    pub receiver_id: String,
    pub requester_name: Option<String>,
    pub message: String,
    pub created_at: Option<String>,
    pub status: RematchStatus,
}

impl From<RematchOfferPayload> for RematchOffer {
    fn from(p: RematchOfferPayload) -> Self {
        Self {
            match_id: p.match_id,
            requester_id: p.requester_id,
            receiver_id: p.receiver_id,
            requester_name: p.requester_name,
            message: p.message,
            created_at: p.created_at,
            status: RematchStatus::Offered,
        }
    }
}

/// What the local participant should currently see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RematchView {
    /// The peer asked and the local participant may accept or decline.
    pub is_offered: bool,
    /// The local participant asked and is waiting for the peer.
    pub rematch_pending: bool,
    /// Ticks left before the local request lapses. Requester only.
    pub countdown: Option<u32>,
    pub offer: Option<RematchOffer>,
}

/// Tracks the rematch handshake for one match view.
#[derive(Debug)]
pub struct RematchCoordinator {
    local_participant: Option<String>,
    countdown_start: u32,
    offer: Option<RematchOffer>,
    pending: bool,
    countdown: Option<u32>,
    generation: u64,
}

impl RematchCoordinator {
    pub fn new(countdown_start: u32) -> Self {
        Self {
            local_participant: None,
            countdown_start: countdown_start.max(1),
            offer: None,
            pending: false,
            countdown: None,
            generation: 0,
        }
    }

    pub fn set_local_participant(&mut self, id: Option<String>) {
        self.local_participant = id;
    }

    pub fn local_participant(&self) -> Option<&str> {
        self.local_participant.as_deref()
    }

    /// Incremented whenever a countdown starts or rematch state is cleared.
    /// Ticks carrying an older generation are ignored.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn countdown_active(&self) -> bool {
        self.countdown.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.offer.is_none() && !self.pending
    }

    /// Ask the peer for a rematch and start the local countdown.
    pub fn request(&mut self, match_id: MatchId, message: Option<String>) -> ClientMessage {
        self.pending = true;
        self.start_countdown();
        ClientMessage::RematchRequest { match_id, message }
    }

    /// An offer arrived from the server.
    pub fn on_offer(&mut self, offer: RematchOffer) {
        let is_requester = match self.local_participant.as_deref() {
            Some(local) => offer.requester_id == local,
            None => self.pending,
        };
        debug!(
            requester = %offer.requester_id,
            receiver = %offer.receiver_id,
            is_requester,
            "rematch offer"
        );
        if is_requester {
            self.pending = true;
            if self.countdown.is_none() {
                self.start_countdown();
            }
        } else {
            self.pending = false;
            self.countdown = None;
        }
        self.offer = Some(offer);
    }

    /// Accept the peer's offer.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NoRematchOffer`] unless an offer from the peer
    /// is waiting for an answer.
    pub fn accept(&mut self, match_id: MatchId) -> Result<ClientMessage> {
        match self.offer.as_mut() {
            Some(offer) if !self.pending && offer.status == RematchStatus::Offered => {
                offer.status = RematchStatus::Accepted;
                Ok(ClientMessage::RematchAccept { match_id })
            }
            _ => Err(VersusError::NoRematchOffer),
        }
    }

    /// Decline the peer's offer, or withdraw our own request.
    ///
    /// # Errors
    ///
    /// Returns [`VersusError::NoRematchOffer`] when no rematch is in progress.
    pub fn decline(&mut self, match_id: MatchId) -> Result<ClientMessage> {
        if self.is_idle() {
            return Err(VersusError::NoRematchOffer);
        }
        self.clear();
        Ok(ClientMessage::RematchDecline { match_id })
    }

    pub fn on_declined(&mut self) {
        self.clear();
    }

    pub fn on_expired(&mut self) {
        self.clear();
    }

    /// One countdown tick. Returns [`RematchStatus::Expired`] when the
    /// requester's countdown runs out; the state is cleared in that case.
    pub fn tick(&mut self, generation: u64) -> Option<RematchStatus> {
        if generation != self.generation {
            return None;
        }
        let remaining = self.countdown?.saturating_sub(1);
        if remaining == 0 {
            self.clear();
            Some(RematchStatus::Expired)
        } else {
            self.countdown = Some(remaining);
            None
        }
    }

    /// Drop every trace of the current handshake.
    pub fn clear(&mut self) {
        self.offer = None;
        self.pending = false;
        self.countdown = None;
        self.generation += 1;
    }

    pub fn view(&self) -> RematchView {
        RematchView {
            is_offered: !self.pending
                && self
                    .offer
                    .as_ref()
                    .is_some_and(|o| o.status == RematchStatus::Offered),
            rematch_pending: self.pending,
            countdown: self.countdown,
            offer: self.offer.clone(),
        }
    }

    fn start_countdown(&mut self) {
        self.generation += 1;
        self.countdown = Some(self.countdown_start);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn offer_from(requester: &str, receiver: &str) -> RematchOffer {
        RematchOffer {
            match_id: Some(MatchId::from("1")),
            requester_id: requester.into(),
            receiver_id: receiver.into(),
            requester_name: Some("Sam".into()),
            message: "one more?".into(),
            created_at: None,
            status: RematchStatus::Offered,
        }
    }

    fn coordinator_for(local: &str) -> RematchCoordinator {
        let mut c = RematchCoordinator::new(10);
        c.set_local_participant(Some(local.into()));
        c
    }

    #[test]
    fn receiver_sees_accept_controls() {
        let mut o = coordinator_for("O");
        o.on_offer(offer_from("X", "O"));
        let view = o.view();
        assert!(view.is_offered);
        assert!(!view.rematch_pending);
        assert_eq!(view.countdown, None);
    }

    #[test]
    fn requester_waits_with_countdown() {
        let mut x = coordinator_for("X");
        let frame = x.request(MatchId::from("1"), None);
        assert!(matches!(frame, ClientMessage::RematchRequest { .. }));
        x.on_offer(offer_from("X", "O"));
        let view = x.view();
        assert!(!view.is_offered);
        assert!(view.rematch_pending);
        assert_eq!(view.countdown, Some(10));
    }

    #[test]
    fn role_uses_ids_not_names() {
        // Both participants are called "Sam"; only the id decides the role.
        let mut o = coordinator_for("O");
        let mut offer = offer_from("X", "O");
        offer.requester_name = Some("O".into());
        o.on_offer(offer);
        assert!(o.view().is_offered);
    }

    #[test]
    fn countdown_expires_requester_state() {
        let mut x = RematchCoordinator::new(3);
        x.request(MatchId::from("1"), None);
        let generation = x.generation();
        assert_eq!(x.tick(generation), None);
        assert_eq!(x.tick(generation), None);
        assert_eq!(x.tick(generation), Some(RematchStatus::Expired));
        assert!(x.is_idle());
        assert_eq!(x.view(), RematchView::default());
    }

    #[test]
    fn stale_ticks_are_ignored() {
        let mut x = RematchCoordinator::new(2);
        x.request(MatchId::from("1"), None);
        let old = x.generation();
        x.on_declined();
        x.request(MatchId::from("1"), None);
        assert_eq!(x.tick(old), None);
        assert_eq!(x.view().countdown, Some(2));
    }

    #[test]
    fn accept_requires_peer_offer() {
        let mut x = coordinator_for("X");
        assert!(matches!(
            x.accept(MatchId::from("1")),
            Err(VersusError::NoRematchOffer)
        ));
        x.request(MatchId::from("1"), None);
        x.on_offer(offer_from("X", "O"));
        assert!(x.accept(MatchId::from("1")).is_err());

        let mut o = coordinator_for("O");
        o.on_offer(offer_from("X", "O"));
        let frame = o.accept(MatchId::from("1")).unwrap();
        assert_eq!(
            frame,
            ClientMessage::RematchAccept {
                match_id: MatchId::from("1")
            }
        );
        assert_eq!(o.view().offer.unwrap().status, RematchStatus::Accepted);
        assert!(!o.view().is_offered);
    }

    #[test]
    fn decline_clears_everything() {
        let mut o = coordinator_for("O");
        o.on_offer(offer_from("X", "O"));
        let frame = o.decline(MatchId::from("1")).unwrap();
        assert!(matches!(frame, ClientMessage::RematchDecline { .. }));
        assert!(o.is_idle());
        assert!(o.decline(MatchId::from("1")).is_err());
    }

    #[test]
    fn unknown_local_id_falls_back_to_pending_flag() {
        let mut c = RematchCoordinator::new(10);
        c.on_offer(offer_from("X", "O"));
        assert!(c.view().is_offered);

        let mut c = RematchCoordinator::new(10);
        c.request(MatchId::from("1"), None);
        c.on_offer(offer_from("X", "O"));
        assert!(c.view().rematch_pending);
    }
}
