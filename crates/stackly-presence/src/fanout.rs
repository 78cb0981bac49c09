use std::sync::Arc;

use serde::Serialize;

use stackly_core::{ChannelId, UserId};

use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// Delivers serialized events to live connections of this process.
///
/// Delivery never fails towards the caller: a connection that cannot take
/// the frame is skipped and left for the transport layer to clean up.
/// Each event is serialized once and queued on every target in turn, so
/// sequential calls for one channel arrive in call order.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send to every connection in one channel. Returns how many accepted it.
    pub fn send<E: Serialize>(&self, event: &E, channel: &ChannelId) -> usize {
        self.deliver(event, self.registry.channel_members(channel))
    }

    /// Send to every connection in every channel.
    pub fn send_all<E: Serialize>(&self, event: &E) -> usize {
        self.deliver(event, self.registry.all_connections())
    }

    pub fn send_to_user<E: Serialize>(&self, user_id: UserId, event: &E) -> usize {
        self.deliver(event, self.registry.user_connections(user_id))
    }

    /// Forward an already serialized payload to every connection.
    pub fn send_all_raw(&self, payload: &str) -> usize {
        deliver_raw(payload, &self.registry.all_connections())
    }

    fn deliver<E: Serialize>(&self, event: &E, targets: Vec<Arc<ConnectionHandle>>) -> usize {
        if targets.is_empty() {
            return 0;
        }
        match serde_json::to_string(event) {
            Ok(payload) => deliver_raw(&payload, &targets),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event");
                0
            }
        }
    }
}

fn deliver_raw(payload: &str, targets: &[Arc<ConnectionHandle>]) -> usize {
    targets
        .iter()
        .filter(|conn| conn.try_deliver(payload))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackly_core::{PresenceEvent, PresenceStatus, RoomEvent};

    fn setup() -> (Arc<ConnectionRegistry>, Broadcaster) {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        (registry, broadcaster)
    }

    #[test]
    fn send_reaches_only_the_channel() {
        let (registry, broadcaster) = setup();
        let mut in_room = registry.add(UserId::new(1), ChannelId::room(5));
        let mut elsewhere = registry.add(UserId::new(2), ChannelId::room(6));

        let event = RoomEvent::Typing {
            user_id: UserId::new(1),
            room_id: 5,
        };
        assert_eq!(broadcaster.send(&event, &ChannelId::room(5)), 1);

        let frame = in_room.rx.try_recv().unwrap();
        assert_eq!(serde_json::from_str::<RoomEvent>(&frame).unwrap(), event);
        assert!(elsewhere.rx.try_recv().is_err());
    }

    #[test]
    fn failing_connection_does_not_block_the_rest() {
        let (registry, broadcaster) = setup();
        let room = ChannelId::room(5);
        let mut receivers: Vec<_> = (1..=3)
            .map(|n| registry.add(UserId::new(n), room.clone()).rx)
            .collect();
        let broken = registry.add(UserId::new(4), room.clone());
        drop(broken.rx);

        let delivered = broadcaster.send(&RoomEvent::Pong, &room);

        assert_eq!(delivered, 3);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), r#"{"type":"pong"}"#);
        }
    }

    #[test]
    fn send_all_spans_every_channel() {
        let (registry, broadcaster) = setup();
        let mut a = registry.add(UserId::new(1), ChannelId::room(1));
        let mut b = registry.add(UserId::new(2), ChannelId::user(UserId::new(2)));

        let event = PresenceEvent::online(UserId::new(1));
        assert_eq!(broadcaster.send_all(&event), 2);
        assert!(a.rx.try_recv().is_ok());
        assert!(b.rx.try_recv().is_ok());
    }

    #[test]
    fn send_to_user_targets_owned_connections() {
        let (registry, broadcaster) = setup();
        let mut first = registry.add(UserId::new(1), ChannelId::room(1));
        let mut second = registry.add(UserId::new(1), ChannelId::room(2));
        let mut other = registry.add(UserId::new(2), ChannelId::room(1));

        let event = PresenceEvent::status_update(UserId::new(1), PresenceStatus::Brb, None);
        assert_eq!(broadcaster.send_to_user(UserId::new(1), &event), 2);
        assert!(first.rx.try_recv().is_ok());
        assert!(second.rx.try_recv().is_ok());
        assert!(other.rx.try_recv().is_err());
    }

    #[test]
    fn per_channel_order_is_preserved() {
        let (registry, broadcaster) = setup();
        let room = ChannelId::room(3);
        let mut conn = registry.add(UserId::new(1), room.clone());

        for n in 0..5 {
            let event = RoomEvent::Typing {
                user_id: UserId::new(n),
                room_id: 3,
            };
            broadcaster.send(&event, &room);
        }

        for n in 0..5 {
            let frame: RoomEvent = serde_json::from_str(&conn.rx.try_recv().unwrap()).unwrap();
            assert_eq!(
                frame,
                RoomEvent::Typing {
                    user_id: UserId::new(n),
                    room_id: 3
                }
            );
        }
    }

    #[test]
    fn empty_process_delivers_nothing() {
        let (_registry, broadcaster) = setup();
        assert_eq!(broadcaster.send_all(&PresenceEvent::offline(UserId::new(1))), 0);
        assert_eq!(broadcaster.send_all_raw("{}"), 0);
    }
}
