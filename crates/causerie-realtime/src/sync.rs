//! Conversation sync: paginated, order-stable history retrieval.
//!
//! Clients merge these pages with live-delivered messages by
//! de-duplicating on message id; the service only guarantees stable
//! ordering and stable identities, it does not merge server-side.

use tracing::trace;

use causerie_shared::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use causerie_shared::{Conversation, StoredMessage, UserId};
use causerie_store::StoreError;

use crate::SharedStore;

/// One page of history, chronologically ascending, plus whether older
/// messages remain beyond it.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub messages: Vec<StoredMessage>,
    pub has_more: bool,
}

pub struct ConversationSync {
    store: SharedStore,
    max_page_size: u32,
}

impl ConversationSync {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_page_size(store: SharedStore, max_page_size: u32) -> Self {
        Self {
            store,
            max_page_size: max_page_size.max(1),
        }
    }

    pub fn default_page_size(&self) -> u32 {
        DEFAULT_PAGE_SIZE.min(self.max_page_size)
    }

    /// Up to `page_size` messages between `requester` and `peer`.
    ///
    /// `page` is zero-based; page 0 holds the most recent messages. The
    /// store selects by creation time descending (tie-broken on the
    /// assigned sequence, never on array position) and the page is
    /// reversed here so the result reads chronologically ascending.
    pub async fn history(
        &self,
        requester: &UserId,
        peer: &UserId,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage, StoreError> {
        let limit = page_size.clamp(1, self.max_page_size);
        let offset = page.saturating_mul(limit);

        let db = self.store.lock().await;
        let mut messages = db.history_page(requester, peer, limit, offset)?;
        messages.reverse();

        let total = db.count_between(requester, peer)?;
        let has_more = total > (page as u64 + 1) * limit as u64;

        trace!(
            requester = %requester.short(),
            peer = %peer.short(),
            page,
            returned = messages.len(),
            has_more,
            "history page served"
        );

        Ok(HistoryPage { messages, has_more })
    }

    /// Every conversation the identity participates in, most recently
    /// updated first, annotated with its latest message.
    pub async fn conversations_for(&self, identity: &UserId) -> Result<Vec<Conversation>, StoreError> {
        let db = self.store.lock().await;
        db.conversations_for(identity)
    }
}
