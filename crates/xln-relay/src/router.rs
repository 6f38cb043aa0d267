use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::{json, Value};
use tracing::{debug, warn};

use xln_core::constants::RELAY_QUEUE_CAPACITY;
use xln_core::{parse_entity_ref, EntityId, Profile, XlnError};
use xln_gossip::GossipStore;

/// Transport-level handle of one connected WebSocket client.
pub type ClientId = u64;

/// What the transport loop should do with a handled frame.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayAction {
    /// Send a JSON reply to the originating client.
    Reply(Value),
    /// Forward the raw frame to another live client.
    Forward { client: ClientId, frame: String },
    /// Hand the frame to the local runtime inbox.
    DeliverLocal(Value),
}

/// Pure message router: stateless with respect to application semantics.
/// Owns only the clients-by-entity map, per-entity pending queues (capped,
/// oldest-drop), and the gossip store.
#[derive(Debug, Default)]
pub struct RelayRouter {
    clients: BTreeMap<EntityId, ClientId>,
    entities_by_client: BTreeMap<ClientId, EntityId>,
    pending: BTreeMap<EntityId, VecDeque<String>>,
    gossip: GossipStore,
    /// Entities served by the local runtime rather than a remote client.
    local_entities: BTreeSet<EntityId>,
}

impl RelayRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an entity as locally hosted: routable frames for it go to the
    /// runtime inbox instead of a socket.
    pub fn register_local(&mut self, entity: EntityId) {
        self.local_entities.insert(entity);
    }

    pub fn gossip(&self) -> &GossipStore {
        &self.gossip
    }

    pub fn pending_for(&self, entity: &EntityId) -> usize {
        self.pending.get(entity).map(|q| q.len()).unwrap_or(0)
    }

    /// Forget a closed connection.
    pub fn disconnect(&mut self, client: ClientId) {
        if let Some(entity) = self.entities_by_client.remove(&client) {
            self.clients.remove(&entity);
            debug!(%entity, client, "relay client disconnected");
        }
    }

    /// Handle one inbound text frame. Never fails: malformed input turns
    /// into an `error` reply for the sender.
    pub fn handle_frame(&mut self, client: ClientId, text: &str) -> Vec<RelayAction> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return vec![error_reply(&XlnError::RelayMsgObjectInvalid, None)],
        };
        let Some(obj) = value.as_object() else {
            return vec![error_reply(&XlnError::RelayMsgObjectInvalid, None)];
        };
        let id = obj.get("id").cloned();
        let Some(msg_type) = obj.get("type").and_then(Value::as_str) else {
            return vec![error_reply(&XlnError::RelayMsgTypeInvalid, id.as_ref())];
        };

        match msg_type {
            "hello" => self.handle_hello(client, obj.get("from"), id.as_ref()),
            "entity_input" | "runtime_input" => {
                self.handle_routable(text, &value, id.as_ref())
            }
            "gossip_announce" => {
                self.handle_announce(value.pointer("/payload/profiles"));
                Vec::new()
            }
            "gossip_request" => {
                let profiles: Vec<&Profile> = self.gossip.profiles().collect();
                let mut reply = json!({
                    "type": "gossip_response",
                    "payload": { "profiles": profiles },
                });
                if let Some(id) = id {
                    reply["inReplyTo"] = id;
                }
                vec![RelayAction::Reply(reply)]
            }
            "gossip_response" => {
                // Pull-model response arriving at the relay: ingest it.
                self.handle_announce(value.pointer("/payload/profiles"));
                Vec::new()
            }
            "ping" => {
                let mut reply = json!({ "type": "pong" });
                if let Some(id) = id {
                    reply["inReplyTo"] = id;
                }
                vec![RelayAction::Reply(reply)]
            }
            "pong" => Vec::new(),
            other => {
                debug!(msg_type = other, "unknown relay message type");
                vec![error_reply(
                    &XlnError::RelayMsgTypeInvalid,
                    id.as_ref(),
                )]
            }
        }
    }

    fn handle_hello(
        &mut self,
        client: ClientId,
        from: Option<&Value>,
        id: Option<&Value>,
    ) -> Vec<RelayAction> {
        let entity = match from.and_then(Value::as_str).map(parse_entity_ref) {
            Some(Ok((entity, _))) => entity,
            _ => return vec![error_reply(&XlnError::RelayMsgTypeInvalid, id)],
        };
        self.clients.insert(entity, client);
        self.entities_by_client.insert(client, entity);
        debug!(%entity, client, "relay client registered");

        // Flush everything queued while the peer was offline, exactly once.
        match self.pending.remove(&entity) {
            Some(queue) => queue
                .into_iter()
                .map(|frame| RelayAction::Forward { client, frame })
                .collect(),
            None => Vec::new(),
        }
    }

    fn handle_routable(&mut self, raw: &str, value: &Value, id: Option<&Value>) -> Vec<RelayAction> {
        let target = match value.get("to").and_then(Value::as_str).map(parse_entity_ref) {
            Some(Ok((entity, _))) => entity,
            _ => return vec![error_reply(&XlnError::RelayMsgTypeInvalid, id)],
        };

        if self.local_entities.contains(&target) {
            return vec![RelayAction::DeliverLocal(value.clone())];
        }
        if let Some(client) = self.clients.get(&target) {
            return vec![RelayAction::Forward { client: *client, frame: raw.to_string() }];
        }

        // Target offline: queue until it says hello, oldest dropped beyond
        // the cap.
        let queue = self.pending.entry(target).or_default();
        if queue.len() >= RELAY_QUEUE_CAPACITY {
            warn!(entity = %target, "relay queue full, dropping oldest frame");
            queue.pop_front();
        }
        queue.push_back(raw.to_string());
        Vec::new()
    }

    fn handle_announce(&mut self, profiles: Option<&Value>) {
        let Some(list) = profiles.and_then(Value::as_array) else { return };
        for entry in list {
            match serde_json::from_value::<Profile>(entry.clone()) {
                Ok(profile) => {
                    self.gossip.announce(profile);
                }
                Err(err) => warn!(%err, "undecodable gossip profile ignored"),
            }
        }
    }
}

fn error_reply(err: &XlnError, in_reply_to: Option<&Value>) -> RelayAction {
    let mut reply = json!({ "type": "error", "error": err.code() });
    if let Some(id) = in_reply_to {
        reply["inReplyTo"] = id.clone();
    }
    RelayAction::Reply(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_input(from: u64, to: u64, note: &str) -> String {
        json!({
            "type": "entity_input",
            "id": format!("msg-{note}"),
            "from": format!("#{from}"),
            "to": format!("#{to}"),
            "payload": { "note": note },
        })
        .to_string()
    }

    #[test]
    fn garbage_and_untyped_frames_get_error_replies() {
        let mut router = RelayRouter::new();
        let actions = router.handle_frame(1, "not json");
        assert!(matches!(
            &actions[0],
            RelayAction::Reply(v) if v["error"] == "RELAY_MSG_OBJECT_INVALID"
        ));
        let actions = router.handle_frame(1, r#"{"payload": 1}"#);
        assert!(matches!(
            &actions[0],
            RelayAction::Reply(v) if v["error"] == "RELAY_MSG_TYPE_INVALID"
        ));
        let actions = router.handle_frame(1, r#"{"type": "warp"}"#);
        assert!(matches!(
            &actions[0],
            RelayAction::Reply(v) if v["error"] == "RELAY_MSG_TYPE_INVALID"
        ));
    }

    #[test]
    fn queues_until_hello_then_flushes_exactly_once() {
        let mut router = RelayRouter::new();
        let frame = entity_input(1, 2, "offline");
        assert!(router.handle_frame(7, &frame).is_empty());
        assert_eq!(router.pending_for(&EntityId::from_number(2)), 1);

        // B connects and says hello: the queued frame flushes to it.
        let actions = router.handle_frame(9, r##"{"type":"hello","from":"#2"}"##);
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            RelayAction::Forward { client: 9, frame: f } if f == &frame
        ));
        assert_eq!(router.pending_for(&EntityId::from_number(2)), 0);

        // A second hello delivers nothing more.
        let actions = router.handle_frame(9, r##"{"type":"hello","from":"#2"}"##);
        assert!(actions.is_empty());
    }

    #[test]
    fn live_clients_get_direct_forwarding() {
        let mut router = RelayRouter::new();
        router.handle_frame(9, r##"{"type":"hello","from":"#2"}"##);
        let frame = entity_input(1, 2, "live");
        let actions = router.handle_frame(7, &frame);
        assert!(matches!(&actions[0], RelayAction::Forward { client: 9, .. }));
    }

    #[test]
    fn local_entities_deliver_to_runtime() {
        let mut router = RelayRouter::new();
        router.register_local(EntityId::from_number(2));
        let actions = router.handle_frame(7, &entity_input(1, 2, "local"));
        assert!(matches!(&actions[0], RelayAction::DeliverLocal(_)));
    }

    #[test]
    fn queue_caps_with_oldest_drop() {
        let mut router = RelayRouter::new();
        for i in 0..(RELAY_QUEUE_CAPACITY + 5) {
            router.handle_frame(7, &entity_input(1, 2, &format!("{i}")));
        }
        assert_eq!(router.pending_for(&EntityId::from_number(2)), RELAY_QUEUE_CAPACITY);
        // Oldest five were dropped: the flush starts at frame 5.
        let actions = router.handle_frame(9, r##"{"type":"hello","from":"#2"}"##);
        assert!(matches!(
            &actions[0],
            RelayAction::Forward { frame, .. } if frame.contains("msg-5")
        ));
    }

    #[test]
    fn ping_pong_and_gossip_pull() {
        let mut router = RelayRouter::new();
        let actions = router.handle_frame(1, r#"{"type":"ping","id":"p1"}"#);
        assert!(matches!(
            &actions[0],
            RelayAction::Reply(v) if v["type"] == "pong" && v["inReplyTo"] == "p1"
        ));

        let profile = Profile::new(EntityId::from_number(3), 50);
        let announce = json!({
            "type": "gossip_announce",
            "payload": { "profiles": [profile] },
        })
        .to_string();
        assert!(router.handle_frame(1, &announce).is_empty());

        let actions = router.handle_frame(2, r#"{"type":"gossip_request","id":"g1"}"#);
        let RelayAction::Reply(reply) = &actions[0] else { panic!("expected reply") };
        assert_eq!(reply["type"], "gossip_response");
        assert_eq!(reply["inReplyTo"], "g1");
        assert_eq!(reply["payload"]["profiles"].as_array().unwrap().len(), 1);
    }
}
