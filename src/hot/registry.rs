//! Component J's subscription registry: `byTarget: Map<TargetName,
//! Set<Client>>` plus per-client state (§4.J). Informed architecturally by
//! `examples/other_examples/3e9bcfb8_CK-Technology-bolt__src-dev_workflows-hot_reload.rs.rs`'s
//! `active_environments: Arc<RwLock<HashMap<...>>>` shape (structure only,
//! not its logging voice, which follows this crate's `tracing` idiom instead).

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use crate::config::{BrowserUiPosition, CompilationMode};

use super::protocol::ServerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

#[derive(Debug)]
pub struct ClientState {
    pub id: ClientId,
    pub target_name: String,
    pub compilation_mode: CompilationMode,
    pub browser_ui_position: BrowserUiPosition,
    pub open_error_overlay: bool,
    pub last_seen_hot_timestamp: u64,
    outbox: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientState {
    pub fn send(&self, message: ServerMessage) {
        let _ = self.outbox.send(message);
    }
}

/// Registry of currently-connected hot clients, keyed by target name so the
/// scheduler can cheaply answer "who is listening for this output" and
/// "what's this target's current browser-assigned priority" (most recent
/// `last_seen_hot_timestamp` among a target's clients, per §4.I).
#[derive(Debug, Default)]
pub struct Registry {
    by_target: HashMap<String, HashSet<ClientId>>,
    clients: HashMap<ClientId, ClientState>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        target_name: String,
        compilation_mode: CompilationMode,
        browser_ui_position: BrowserUiPosition,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    ) -> ClientId {
        let id = ClientId(self.next_id);
        self.next_id += 1;
        self.by_target.entry(target_name.clone()).or_default().insert(id);
        self.clients.insert(
            id,
            ClientState {
                id,
                target_name,
                compilation_mode,
                browser_ui_position,
                open_error_overlay: false,
                last_seen_hot_timestamp: 0,
                outbox,
            },
        );
        id
    }

    pub fn unregister(&mut self, id: ClientId) {
        if let Some(client) = self.clients.remove(&id) {
            if let Some(set) = self.by_target.get_mut(&client.target_name) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_target.remove(&client.target_name);
                }
            }
        }
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut ClientState> {
        self.clients.get_mut(&id)
    }

    pub fn clients_for_target(&self, target_name: &str) -> impl Iterator<Item = &ClientState> {
        self.by_target
            .get(target_name)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.clients.get(id))
    }

    pub fn broadcast(&self, target_name: &str, message: ServerMessage) {
        for client in self.clients_for_target(target_name) {
            client.send(message.clone());
        }
    }

    /// Highest `last_seen_hot_timestamp` across a target's connected clients,
    /// used as that target's scheduler priority in hot mode (§4.I).
    pub fn priority_of(&self, target_name: &str) -> u64 {
        self.clients_for_target(target_name).map(|c| c.last_seen_hot_timestamp).max().unwrap_or(0)
    }

    pub fn subscribed_targets(&self) -> impl Iterator<Item = &str> {
        self.by_target.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_looks_up_clients_by_target() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register("Main".to_string(), CompilationMode::Debug, BrowserUiPosition::BottomLeft, tx);
        assert_eq!(registry.clients_for_target("Main").count(), 1);
        registry.unregister(id);
        assert_eq!(registry.clients_for_target("Main").count(), 0);
    }

    #[test]
    fn priority_is_the_max_last_seen_timestamp() {
        let mut registry = Registry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let id1 = registry.register("Main".to_string(), CompilationMode::Debug, BrowserUiPosition::BottomLeft, tx1);
        let id2 = registry.register("Main".to_string(), CompilationMode::Debug, BrowserUiPosition::BottomLeft, tx2);
        registry.client_mut(id1).unwrap().last_seen_hot_timestamp = 5;
        registry.client_mut(id2).unwrap().last_seen_hot_timestamp = 9;
        assert_eq!(registry.priority_of("Main"), 9);
    }

    #[test]
    fn broadcast_reaches_every_client_for_a_target() {
        let mut registry = Registry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("Main".to_string(), CompilationMode::Debug, BrowserUiPosition::BottomLeft, tx);
        registry.broadcast("Main", ServerMessage::FocusedTabAcknowledged);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::FocusedTabAcknowledged)));
    }
}
