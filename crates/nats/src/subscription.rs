//! Subscription tracking across connection epochs.
//!
//! The desired state is a fixed set of [`SubjectBinding`]s. Every time the
//! kernel enters `Connected` it starts a new epoch and asks the
//! [`SubscriptionManager`] to subscribe each binding once on the new link.
//! Subscriptions never outlive their epoch: a disconnect forgets them
//! (the link that owned them is gone), a stop unsubscribes them first.
//!
//! Deliveries are routed by subscription id. An id that is not live in the
//! current epoch is stale and the message is dropped.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::transport::{Delivery, InboundMessage, Link, SubscriptionId, TransportError};

/// One subject to subscribe to, optionally as part of a queue group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectBinding {
    pub subject: String,
    pub queue_group: Option<String>,
}

impl SubjectBinding {
    pub fn new(subject: impl Into<String>, queue_group: Option<String>) -> Self {
        Self {
            subject: subject.into(),
            queue_group,
        }
    }
}

#[derive(Debug)]
pub struct SubscriptionManager {
    bindings: Vec<SubjectBinding>,

    /// Live subscription id -> index into `bindings`.
    live: HashMap<SubscriptionId, usize>,

    /// Epoch whose subscriptions are in `live`. `None` between sessions.
    epoch: Option<u64>,
}

impl SubscriptionManager {
    /// Duplicated bindings are collapsed.
    pub fn new(mut bindings: Vec<SubjectBinding>) -> Self {
        bindings.sort();
        bindings.dedup();
        Self {
            bindings,
            live: HashMap::new(),
            epoch: None,
        }
    }

    pub fn bindings(&self) -> &[SubjectBinding] {
        &self.bindings
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Subscribes every binding on `link` for `epoch`.
    ///
    /// Calling it again for the same epoch does nothing. If any subscribe
    /// fails the epoch is left unsubscribed and the error is returned; the
    /// caller is expected to abandon the link.
    pub async fn on_connected(
        &mut self,
        link: &mut dyn Link,
        epoch: u64,
    ) -> Result<usize, TransportError> {
        if self.epoch == Some(epoch) {
            debug!(epoch, "Subscriptions already established for this epoch");
            return Ok(self.live.len());
        }

        self.live.clear();
        self.epoch = None;

        let mut live = HashMap::with_capacity(self.bindings.len());
        for (index, binding) in self.bindings.iter().enumerate() {
            let id = link.subscribe(binding).await?;
            info!(
                subject = %binding.subject,
                queue_group = binding.queue_group.as_deref().unwrap_or("-"),
                %id,
                epoch,
                "Subscribed"
            );
            live.insert(id, index);
        }

        self.live = live;
        self.epoch = Some(epoch);
        Ok(self.live.len())
    }

    /// Forgets the subscriptions of a lost session without talking to the bus.
    pub fn on_disconnected(&mut self) {
        if let Some(epoch) = self.epoch.take() {
            debug!(
                epoch,
                count = self.live.len(),
                "Invalidated subscriptions of lost session"
            );
        }
        self.live.clear();
    }

    /// Unsubscribes everything that is live, then releases the handles.
    pub async fn shutdown(&mut self, link: &mut dyn Link) {
        let mut ids: Vec<SubscriptionId> = self.live.drain().map(|(id, _)| id).collect();
        ids.sort();

        for id in ids {
            match link.unsubscribe(id).await {
                Ok(()) => debug!(%id, "Unsubscribed"),
                Err(e) => warn!(%id, "Failed to unsubscribe: {e}"),
            }
        }
        self.epoch = None;
    }

    /// Matches a delivery to its binding, or `None` if the id is stale.
    pub fn route(&self, delivery: Delivery) -> Option<InboundMessage> {
        let binding = &self.bindings[*self.live.get(&delivery.subscription)?];
        Some(InboundMessage {
            subject: delivery.subject,
            payload: delivery.payload,
            queue_group: binding.queue_group.clone(),
        })
    }
}
