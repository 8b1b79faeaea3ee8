//! SD session IDs and reboot detection

use std::collections::HashMap;
use std::net::SocketAddrV4;

/// Session counter for outgoing SD messages.
///
/// Session IDs start at 1 and skip 0 on wrap-around. The reboot flag stays set
/// until the counter wraps for the first time.
#[derive(Debug)]
pub(crate) struct SessionCounter {
    next: u16,
    wrapped: bool,
}

impl SessionCounter {
    pub(crate) fn new() -> Self {
        Self {
            next: 1,
            wrapped: false,
        }
    }

    /// Returns the session ID to use and whether the reboot flag must be set.
    pub(crate) fn next(&mut self) -> (u16, bool) {
        let session_id = self.next;
        let reboot = !self.wrapped;
        if self.next == u16::MAX {
            self.next = 1;
            self.wrapped = true;
        } else {
            self.next += 1;
        }
        (session_id, reboot)
    }
}

#[derive(Clone, Copy, Debug)]
struct PeerSession {
    reboot: bool,
    session_id: u16,
}

/// Last seen (reboot flag, session ID) for every SD peer.
#[derive(Debug, Default)]
pub(crate) struct PeerSessions {
    peers: HashMap<SocketAddrV4, PeerSession>,
}

impl PeerSessions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a message from `peer` and returns `true` if it shows that the peer rebooted.
    ///
    /// A reboot is either the reboot flag switching from cleared to set, or the
    /// session ID not increasing while the flag stays set.
    pub(crate) fn update(&mut self, peer: SocketAddrV4, reboot: bool, session_id: u16) -> bool {
        let current = PeerSession { reboot, session_id };
        let rebooted = match self.peers.insert(peer, current) {
            Some(previous) => {
                (!previous.reboot && reboot)
                    || (previous.reboot && reboot && session_id <= previous.session_id)
            }
            None => false,
        };
        rebooted
    }
}
