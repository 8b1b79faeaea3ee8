//! SD entries queued by the instances while handling an event

use std::net::SocketAddrV4;

use crate::protocol::sd::{self, Entry, Flags, Options};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Target {
    /// The SD multicast group of the engine
    Multicast,
    Unicast(SocketAddrV4),
}

/// Collects outgoing SD entries and groups them into one SD message per target.
///
/// Handlers never touch the socket; they push entries here and the engine sends
/// whatever was collected once the handler returns.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    messages: Vec<(Target, sd::Header)>,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues `entry` for `target`, starting another message for the same
    /// target once the option index of the current one is exhausted.
    pub(crate) fn push(&mut self, target: Target, entry: Entry, options: Vec<Options>) {
        let open = self
            .messages
            .iter_mut()
            .rev()
            .find(|(t, header)| *t == target && header.has_room_for(options.len()));
        match open {
            Some((_, header)) => header.add_entry(entry, options),
            None => {
                let header = sd::Header::new(Flags::new_sd(true)).with_entry(entry, options);
                self.messages.push((target, header));
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (Target, sd::Header)> + '_ {
        self.messages.drain(..)
    }

    #[cfg(test)]
    pub(crate) fn entries_for(&self, target: Target) -> Vec<Entry> {
        self.messages
            .iter()
            .filter(|(t, _)| *t == target)
            .flat_map(|(_, header)| header.entries.iter().cloned())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn messages(&self) -> &[(Target, sd::Header)] {
        &self.messages
    }
}
