//! Fan-out of engine notifications to connected players.

use std::collections::HashMap;

use ratrace_protocol::{PlayerId, ServerMessage};
use tokio::sync::mpsc;

/// Outbound channel for one connected player. The connection's writer
/// task drains it.
pub type PlayerSender = mpsc::UnboundedSender<ServerMessage>;

/// One notification and who gets it. Recipients are resolved when the
/// notification is produced, so a player who leaves in the same step
/// still receives what was addressed to them.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub recipients: Vec<PlayerId>,
    pub message: ServerMessage,
}

/// Per-player senders, keyed by player.
#[derive(Debug, Default)]
pub struct Broadcaster {
    senders: HashMap<PlayerId, PlayerSender>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `player`'s channel, returning the one it replaces.
    pub fn register(&mut self, player: PlayerId, sender: PlayerSender) -> Option<PlayerSender> {
        self.senders.insert(player, sender)
    }

    pub fn unregister(&mut self, player: PlayerId) -> Option<PlayerSender> {
        self.senders.remove(&player)
    }

    pub fn is_registered(&self, player: PlayerId) -> bool {
        self.senders.contains_key(&player)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Sends `outbound` to every registered recipient and returns how many
    /// accepted it. Unregistered recipients are skipped. A closed channel
    /// is dropped from the table; delivery to the others goes on.
    pub fn deliver(&mut self, outbound: Outbound) -> usize {
        let Outbound { recipients, message } = outbound;
        let mut delivered = 0;
        let mut dead = Vec::new();

        for player in recipients {
            match self.senders.get(&player) {
                Some(sender) => match sender.send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => dead.push(player),
                },
                None => tracing::trace!(%player, "no channel for recipient, skipping"),
            }
        }

        for player in dead {
            self.senders.remove(&player);
            tracing::debug!(%player, "dropping closed player channel");
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use ratrace_protocol::RoomId;

    use super::*;

    fn removed(id: u64) -> ServerMessage {
        ServerMessage::RoomRemoved { room_id: RoomId(id) }
    }

    #[test]
    fn test_deliver_reaches_registered_recipients_only() {
        let mut broadcaster = Broadcaster::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broadcaster.register(PlayerId(1), tx);

        let delivered = broadcaster.deliver(Outbound {
            recipients: vec![PlayerId(1), PlayerId(2)],
            message: removed(1),
        });

        assert_eq!(delivered, 1);
        assert_eq!(rx.try_recv().unwrap(), removed(1));
    }

    #[test]
    fn test_deliver_drops_closed_channel_and_continues() {
        let mut broadcaster = Broadcaster::new();
        let (gone, gone_rx) = mpsc::unbounded_channel();
        let (alive, mut alive_rx) = mpsc::unbounded_channel();
        broadcaster.register(PlayerId(1), gone);
        broadcaster.register(PlayerId(2), alive);
        drop(gone_rx);

        let delivered = broadcaster.deliver(Outbound {
            recipients: vec![PlayerId(1), PlayerId(2)],
            message: removed(3),
        });

        assert_eq!(delivered, 1);
        assert!(!broadcaster.is_registered(PlayerId(1)));
        assert_eq!(alive_rx.try_recv().unwrap(), removed(3));
    }

    #[test]
    fn test_register_replaces_previous_channel() {
        let mut broadcaster = Broadcaster::new();
        let (old, _old_rx) = mpsc::unbounded_channel();
        let (new, _new_rx) = mpsc::unbounded_channel();

        assert!(broadcaster.register(PlayerId(1), old).is_none());
        assert!(broadcaster.register(PlayerId(1), new).is_some());
        assert_eq!(broadcaster.len(), 1);
    }
}
