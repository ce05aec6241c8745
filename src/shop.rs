//! Shop economy mirror and transaction ledger.
//!
//! The tracker holds the client's view of gold, offers and inventory, and
//! a ledger of requests awaiting server confirmation. Nothing here is
//! optimistic: every mutation happens only when a confirmed server result
//! arrives, so the local economy can never diverge from the server's.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use web_time::{Duration, Instant};

use crate::error::SessionError;

/// Categories whose names contain an underscore, breaking the plain
/// `category_subcategory_name` split.
const TWO_WORD_CATEGORIES: &[&str] = &["learning_modifiers", "reward_modifiers"];

/// A single purchasable entry presented by the shop for the current
/// refresh cycle. Replaced wholesale on each refresh or shop open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopOffer {
    /// Item identifier in `category_subcategory_name` form.
    #[serde(alias = "item_id", alias = "id")]
    pub option_id: String,
    /// Price in gold.
    #[serde(default)]
    pub cost: i64,
    /// Stock remaining, if the server limits it.
    #[serde(default)]
    pub stock: Option<i64>,
    /// Whether the current gold balance covers the cost. Recomputed
    /// locally whenever gold changes, since some result messages omit it.
    #[serde(default)]
    pub affordable: bool,
    /// Whether this offer was already bought this cycle.
    #[serde(default, alias = "already_purchased")]
    pub purchased: bool,
}

/// The parsed parts of an item identifier.
///
/// Identifiers follow `category_subcategory_name`, with the two-word
/// categories (`learning_modifiers`, `reward_modifiers`) as a grammar
/// exception consumers must handle. The category and subcategory drive
/// local data lookup downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPath {
    /// Top-level item category.
    pub category: String,
    /// Category-specific subdivision.
    pub subcategory: String,
    /// Item name; may itself contain underscores.
    pub name: String,
}

impl ItemPath {
    /// Parses an item identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidItemId`] when the identifier has
    /// fewer than three segments or any segment is empty.
    pub fn parse(id: &str) -> Result<Self, SessionError> {
        let invalid = || SessionError::InvalidItemId { id: id.to_owned() };

        let (category, rest) = match TWO_WORD_CATEGORIES
            .iter()
            .find_map(|c| id.strip_prefix(&format!("{}_", c)).map(|rest| (*c, rest)))
        {
            Some((category, rest)) => (category.to_owned(), rest),
            None => {
                let (category, rest) = id.split_once('_').ok_or_else(invalid)?;
                (category.to_owned(), rest)
            }
        };

        let (subcategory, name) = rest.split_once('_').ok_or_else(invalid)?;
        if category.is_empty() || subcategory.is_empty() || name.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            category,
            subcategory: subcategory.to_owned(),
            name: name.to_owned(),
        })
    }
}

impl FromStr for ItemPath {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemPath::parse(s)
    }
}

/// What kind of economy request a pending transaction tracks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    /// A `purchase_option` request.
    Purchase,
    /// A `sell_item` request.
    Sell,
    /// A `refresh_shop` request.
    Refresh,
}

/// A client-side record of an outbound economy request awaiting server
/// confirmation. Created on request send, destroyed on matching
/// confirm/fail, on timeout expiry, or on disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    /// The request kind.
    pub kind: TransactionKind,
    /// The item the request referred to; empty for refreshes.
    pub item_id: String,
    /// The cost (or expected gain, for sells) quoted when the request was sent.
    pub expected_cost: i64,
    /// When the request was sent, for timeout expiry.
    pub sent_at: Instant,
}

/// Ledger of purchase/sell/refresh requests awaiting confirmation, plus
/// the confirmed-state mirror of gold, offers and inventory.
#[derive(Debug, Default)]
pub struct ShopTransactionTracker {
    gold: i64,
    refresh_cost: i64,
    offers: Vec<ShopOffer>,
    inventory: Vec<String>,
    pending: BTreeMap<String, PendingTransaction>,
    pending_refresh: Option<PendingTransaction>,
}

impl ShopTransactionTracker {
    /// Creates an empty tracker with zero gold and no offers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirmed gold balance.
    #[must_use]
    pub fn gold(&self) -> i64 {
        self.gold
    }

    /// Cost of the next shop refresh.
    #[must_use]
    pub fn refresh_cost(&self) -> i64 {
        self.refresh_cost
    }

    /// The current offer list.
    #[must_use]
    pub fn offers(&self) -> &[ShopOffer] {
        &self.offers
    }

    /// The local inventory mirror.
    #[must_use]
    pub fn inventory(&self) -> &[String] {
        &self.inventory
    }

    /// Looks up the quoted cost of an offer.
    #[must_use]
    pub fn offer_cost(&self, option_id: &str) -> Option<i64> {
        self.offers
            .iter()
            .find(|o| o.option_id == option_id)
            .map(|o| o.cost)
    }

    /// Number of requests awaiting confirmation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len() + usize::from(self.pending_refresh.is_some())
    }

    /// Replaces the offer list and economy snapshot wholesale, as carried
    /// by `shop_phase_start` and `options`.
    pub fn apply_shop_state(
        &mut self,
        offers: Vec<ShopOffer>,
        client_gold: Option<i64>,
        refresh_cost: Option<i64>,
        inventory: Option<Vec<String>>,
    ) {
        self.offers = offers;
        if let Some(gold) = client_gold {
            self.gold = gold;
        }
        if let Some(cost) = refresh_cost {
            self.refresh_cost = cost;
        }
        if let Some(items) = inventory {
            self.inventory = items;
        }
        self.refresh_affordability();
        debug!(
            offers = self.offers.len(),
            gold = self.gold,
            "applied shop state"
        );
    }

    /// Records an outbound purchase awaiting confirmation.
    pub fn record_purchase(&mut self, item_id: &str, expected_cost: i64, now: Instant) {
        self.record(TransactionKind::Purchase, item_id, expected_cost, now);
    }

    /// Records an outbound sale awaiting confirmation.
    pub fn record_sell(&mut self, item_id: &str, expected_gain: i64, now: Instant) {
        self.record(TransactionKind::Sell, item_id, expected_gain, now);
    }

    /// Records an outbound refresh awaiting confirmation.
    pub fn record_refresh(&mut self, now: Instant) {
        if self.pending_refresh.is_some() {
            warn!("refresh requested while another refresh is pending; replacing");
        }
        self.pending_refresh = Some(PendingTransaction {
            kind: TransactionKind::Refresh,
            item_id: String::new(),
            expected_cost: self.refresh_cost,
            sent_at: now,
        });
    }

    fn record(&mut self, kind: TransactionKind, item_id: &str, expected_cost: i64, now: Instant) {
        let previous = self.pending.insert(
            item_id.to_owned(),
            PendingTransaction {
                kind,
                item_id: item_id.to_owned(),
                expected_cost,
                sent_at: now,
            },
        );
        if previous.is_some() {
            warn!(item_id, "replaced an already-pending transaction");
        }
    }

    /// Resolves a purchase result. Returns the matching pending
    /// transaction, or `None` if there was none, in which case nothing
    /// is mutated: a stray result must never move gold.
    pub fn resolve_purchase(
        &mut self,
        item_id: &str,
        success: bool,
        cost: Option<i64>,
        remaining_gold: Option<i64>,
    ) -> Option<PendingTransaction> {
        let pending = self.take_pending(item_id)?;
        if success {
            let charged = cost.unwrap_or(pending.expected_cost);
            self.gold = remaining_gold.unwrap_or(self.gold - charged);
            if let Some(offer) = self.offers.iter_mut().find(|o| o.option_id == item_id) {
                offer.purchased = true;
            }
            self.inventory.push(item_id.to_owned());
            self.refresh_affordability();
        }
        Some(pending)
    }

    /// Resolves a refresh result. On success the offer list is replaced
    /// wholesale; the economy snapshot follows the server's balance when
    /// it sends one.
    pub fn resolve_refresh(
        &mut self,
        success: bool,
        offers: Option<Vec<ShopOffer>>,
        remaining_gold: Option<i64>,
    ) -> Option<PendingTransaction> {
        let pending = self.pending_refresh.take();
        if pending.is_none() {
            warn!("refresh result without a pending refresh");
            return None;
        }
        if success {
            if let Some(offers) = offers {
                self.offers = offers;
            }
            if let Some(gold) = remaining_gold {
                self.gold = gold;
            } else if let Some(ref tx) = pending {
                self.gold -= tx.expected_cost;
            }
            self.refresh_affordability();
        }
        pending
    }

    /// Resolves a sell result. On success gold increases and the item
    /// leaves the local inventory mirror.
    pub fn resolve_sell(
        &mut self,
        item_id: &str,
        success: bool,
        remaining_gold: Option<i64>,
    ) -> Option<PendingTransaction> {
        let pending = self.take_pending(item_id)?;
        if success {
            self.gold = remaining_gold.unwrap_or(self.gold + pending.expected_cost);
            self.inventory.retain(|owned| owned != item_id);
            self.refresh_affordability();
        }
        Some(pending)
    }

    /// Fails and returns every pending transaction older than `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<PendingTransaction> {
        let mut expired: Vec<PendingTransaction> = Vec::new();
        let keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, tx)| now.saturating_duration_since(tx.sent_at) >= timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            if let Some(tx) = self.pending.remove(&key) {
                expired.push(tx);
            }
        }
        if let Some(tx) = self.pending_refresh.take() {
            if now.saturating_duration_since(tx.sent_at) >= timeout {
                expired.push(tx);
            } else {
                self.pending_refresh = Some(tx);
            }
        }
        expired
    }

    /// Fails and returns all pending transactions, e.g. on disconnect.
    /// They must be treated as failed, not left dangling.
    pub fn fail_all(&mut self) -> Vec<PendingTransaction> {
        let mut failed: Vec<PendingTransaction> =
            std::mem::take(&mut self.pending).into_values().collect();
        if let Some(tx) = self.pending_refresh.take() {
            failed.push(tx);
        }
        failed
    }

    fn take_pending(&mut self, item_id: &str) -> Option<PendingTransaction> {
        let pending = self.pending.remove(item_id);
        if pending.is_none() {
            warn!(item_id, "result message without a pending transaction");
        }
        pending
    }

    fn refresh_affordability(&mut self) {
        for offer in &mut self.offers {
            offer.affordable = offer.cost <= self.gold;
        }
    }
}
