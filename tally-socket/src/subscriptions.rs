//! Set of channels the application wants delivered.
//!
//! The registry survives reconnects. After every transition into
//! `Connected` its full contents are replayed as subscribe frames.

use std::collections::BTreeSet;

use crate::envelope::Envelope;

#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    channels: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel. Returns `false` if it was already present.
    pub fn subscribe(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_string())
    }

    /// Remove a channel. Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Channels in sorted order.
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().cloned().collect()
    }

    /// One subscribe frame per channel, in sorted order.
    pub fn replay_frames(&self) -> Vec<Envelope> {
        self.channels.iter().map(Envelope::subscribe).collect()
    }
}
