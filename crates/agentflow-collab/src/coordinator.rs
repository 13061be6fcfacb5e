use crate::message::{CollaborationMessage, CollaborationSession, MessageType, TeamStats};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info};

/// Messages kept per inbox before the oldest are dropped.
pub const DEFAULT_INBOX_CAPACITY: usize = 1000;

/// Stable handle of a collaboration session. Ids are never reused.
pub type SessionId = u64;

#[derive(Default)]
struct State {
    /// Agent name → received messages, in delivery order.
    inboxes: HashMap<String, VecDeque<CollaborationMessage>>,
    sessions: BTreeMap<SessionId, CollaborationSession>,
    next_session: SessionId,
    total_messages: usize,
}

/// Mediates messages between agents and tracks collaboration sessions.
///
/// Delivery is synchronous: a sent message is in the recipient's inbox
/// when `send_message` returns, so messages between one sender and one
/// recipient arrive in the order they were sent. Messages involving an
/// unregistered agent are dropped rather than reported as errors.
///
/// State stays bounded: each inbox keeps at most `inbox_capacity` messages,
/// and sessions live until [`remove_session`](Self::remove_session).
pub struct TeamCoordinator {
    state: Mutex<State>,
    inbox_capacity: usize,
}

impl Default for TeamCoordinator {
    fn default() -> Self {
        Self::with_inbox_capacity(DEFAULT_INBOX_CAPACITY)
    }
}

impl TeamCoordinator {
    /// Coordinator with [`DEFAULT_INBOX_CAPACITY`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A coordinator whose inboxes keep at most `capacity` messages each
    /// (minimum 1). The oldest message is dropped on overflow.
    pub fn with_inbox_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            inbox_capacity: capacity.max(1),
        }
    }

    /// Maximum messages kept per inbox.
    pub fn inbox_capacity(&self) -> usize {
        self.inbox_capacity
    }

    /// Register an agent. Returns `false` if it was already registered.
    pub fn register_agent(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        let mut state = self.state.lock();
        if state.inboxes.contains_key(&name) {
            return false;
        }
        debug!(agent = %name, "Agent joined collaboration");
        state.inboxes.insert(name, VecDeque::new());
        true
    }

    /// Whether `name` has joined.
    pub fn is_registered(&self, name: &str) -> bool {
        self.state.lock().inboxes.contains_key(name)
    }

    /// Registered agent names, sorted.
    pub fn agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().inboxes.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Deliver a message. Returns `None` when either side is not registered.
    pub fn send_message(
        &self,
        sender: &str,
        recipient: &str,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Option<CollaborationMessage> {
        self.deliver(CollaborationMessage::new(sender, recipient, message_type, content))
    }

    /// Like [`send_message`](Self::send_message), with metadata attached.
    pub fn send_message_with_metadata(
        &self,
        sender: &str,
        recipient: &str,
        message_type: MessageType,
        content: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Option<CollaborationMessage> {
        let mut message = CollaborationMessage::new(sender, recipient, message_type, content);
        message.metadata = metadata;
        self.deliver(message)
    }

    fn deliver(&self, message: CollaborationMessage) -> Option<CollaborationMessage> {
        let mut state = self.state.lock();
        if !state.inboxes.contains_key(&message.sender) {
            debug!(sender = %message.sender, "Dropping message from unregistered agent");
            return None;
        }
        let Some(inbox) = state.inboxes.get_mut(&message.recipient) else {
            debug!(recipient = %message.recipient, "Dropping message to unregistered agent");
            return None;
        };
        if inbox.len() >= self.inbox_capacity {
            inbox.pop_front();
            debug!(recipient = %message.recipient, "Inbox full, dropped oldest message");
        }
        inbox.push_back(message.clone());
        state.total_messages += 1;

        for session in state
            .sessions
            .values_mut()
            .filter(|s| s.is_open() && s.involves(&message.sender, &message.recipient))
        {
            session.messages.push(message.clone());
        }

        debug!(
            sender = %message.sender,
            recipient = %message.recipient,
            message_type = ?message.message_type,
            "Message delivered"
        );
        Some(message)
    }

    /// Messages received by `agent`, oldest first.
    pub fn inbox(&self, agent: &str) -> Vec<CollaborationMessage> {
        self.state
            .lock()
            .inboxes
            .get(agent)
            .map(|inbox| inbox.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every message in `agent`'s inbox, oldest first.
    pub fn take_inbox(&self, agent: &str) -> Vec<CollaborationMessage> {
        self.state
            .lock()
            .inboxes
            .get_mut(agent)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Messages received by `agent` from `sender`, oldest first.
    pub fn messages_from(&self, agent: &str, sender: &str) -> Vec<CollaborationMessage> {
        self.state
            .lock()
            .inboxes
            .get(agent)
            .map(|inbox| inbox.iter().filter(|m| m.sender == sender).cloned().collect())
            .unwrap_or_default()
    }

    /// Open a session and return its id.
    pub fn start_session(&self, task: impl Into<String>, participants: Vec<String>) -> SessionId {
        let mut state = self.state.lock();
        let session = CollaborationSession {
            task: task.into(),
            participants,
            messages: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
        };
        let id = state.next_session;
        state.next_session += 1;
        info!(id, task = %session.task, participants = session.participants.len(), "Collaboration session started");
        state.sessions.insert(id, session);
        id
    }

    /// Close a session with an outcome. `None` if the id is unknown or
    /// the session is already closed. The closed session stays queryable
    /// until removed.
    pub fn end_session(&self, id: SessionId, outcome: impl Into<String>) -> Option<CollaborationSession> {
        let mut state = self.state.lock();
        let session = state.sessions.get_mut(&id).filter(|s| s.is_open())?;
        session.ended_at = Some(Utc::now());
        session.outcome = Some(outcome.into());
        info!(id, messages = session.messages.len(), "Collaboration session ended");
        Some(session.clone())
    }

    /// Drop a session, open or closed, and return it.
    pub fn remove_session(&self, id: SessionId) -> Option<CollaborationSession> {
        let removed = self.state.lock().sessions.remove(&id);
        if removed.is_some() {
            debug!(id, "Collaboration session removed");
        }
        removed
    }

    /// Snapshot of a retained session.
    pub fn session(&self, id: SessionId) -> Option<CollaborationSession> {
        self.state.lock().sessions.get(&id).cloned()
    }

    /// Retained sessions, oldest first.
    pub fn sessions(&self) -> Vec<CollaborationSession> {
        self.state.lock().sessions.values().cloned().collect()
    }

    /// Counts over agents, messages and retained sessions.
    pub fn team_stats(&self) -> TeamStats {
        let state = self.state.lock();
        let mut agents: Vec<String> = state.inboxes.keys().cloned().collect();
        agents.sort_unstable();
        TeamStats {
            total_agents: agents.len(),
            total_messages: state.total_messages,
            total_sessions: state.sessions.len(),
            open_sessions: state.sessions.values().filter(|s| s.is_open()).count(),
            agents,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn team(names: &[&str]) -> TeamCoordinator {
        let coordinator = TeamCoordinator::new();
        for name in names {
            coordinator.register_agent(*name);
        }
        coordinator
    }

    #[test]
    fn test_register_is_idempotent() {
        let coordinator = TeamCoordinator::new();
        assert!(coordinator.register_agent("planner"));
        assert!(!coordinator.register_agent("planner"));
        assert_eq!(coordinator.agents(), vec!["planner".to_string()]);
    }

    #[test]
    fn test_send_delivers_to_inbox() {
        let coordinator = team(&["planner", "coder"]);
        let msg = coordinator
            .send_message("planner", "coder", MessageType::Request, "implement parser")
            .unwrap();
        assert_eq!(msg.sender, "planner");

        let inbox = coordinator.inbox("coder");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].content, "implement parser");
        assert!(coordinator.inbox("planner").is_empty());
    }

    #[test]
    fn test_unregistered_sides_are_noops() {
        let coordinator = team(&["planner"]);
        assert!(coordinator
            .send_message("planner", "ghost", MessageType::Notification, "hi")
            .is_none());
        assert!(coordinator
            .send_message("ghost", "planner", MessageType::Notification, "hi")
            .is_none());
        assert!(coordinator.inbox("planner").is_empty());
        assert_eq!(coordinator.team_stats().total_messages, 0);
    }

    #[test]
    fn test_fifo_per_sender() {
        let coordinator = team(&["a", "b", "c"]);
        for i in 0..5 {
            coordinator.send_message("a", "c", MessageType::Feedback, format!("a{i}"));
            coordinator.send_message("b", "c", MessageType::Feedback, format!("b{i}"));
        }
        let from_a: Vec<String> = coordinator
            .messages_from("c", "a")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(from_a, vec!["a0", "a1", "a2", "a3", "a4"]);
    }

    #[test]
    fn test_sessions_capture_participant_messages() {
        let coordinator = team(&["planner", "coder", "reviewer"]);
        let index = coordinator.start_session(
            "ship feature",
            vec!["planner".to_string(), "coder".to_string()],
        );

        coordinator.send_message("planner", "coder", MessageType::Request, "build it");
        coordinator.send_message("coder", "reviewer", MessageType::Request, "review it");

        let ended = coordinator.end_session(index, "merged").unwrap();
        assert_eq!(ended.messages.len(), 1);
        assert_eq!(ended.outcome.as_deref(), Some("merged"));
        assert!(!ended.is_open());

        // Closed sessions stop collecting and cannot be closed twice.
        coordinator.send_message("planner", "coder", MessageType::Feedback, "thanks");
        assert_eq!(coordinator.session(index).unwrap().messages.len(), 1);
        assert!(coordinator.end_session(index, "again").is_none());
        assert!(coordinator.end_session(99, "missing").is_none());
    }

    #[test]
    fn test_removed_session_id_is_not_reused() {
        let coordinator = team(&["a", "b"]);
        let first = coordinator.start_session("one", vec!["a".into(), "b".into()]);
        coordinator.end_session(first, "done");
        assert_eq!(coordinator.remove_session(first).unwrap().outcome.as_deref(), Some("done"));
        assert!(coordinator.remove_session(first).is_none());
        assert!(coordinator.session(first).is_none());

        let second = coordinator.start_session("two", vec!["a".into()]);
        assert_ne!(first, second);
        assert_eq!(coordinator.sessions().len(), 1);
        assert!(coordinator.end_session(first, "late").is_none());
    }

    #[test]
    fn test_take_inbox_drains() {
        let coordinator = team(&["a", "b"]);
        coordinator.send_message("a", "b", MessageType::Request, "one");
        coordinator.send_message("a", "b", MessageType::Request, "two");

        let taken: Vec<String> = coordinator.take_inbox("b").into_iter().map(|m| m.content).collect();
        assert_eq!(taken, vec!["one", "two"]);
        assert!(coordinator.inbox("b").is_empty());
        assert!(coordinator.take_inbox("ghost").is_empty());
        assert_eq!(coordinator.team_stats().total_messages, 2);
    }

    #[test]
    fn test_inbox_drops_oldest_past_capacity() {
        let coordinator = TeamCoordinator::with_inbox_capacity(3);
        coordinator.register_agent("a");
        coordinator.register_agent("b");
        for i in 0..5 {
            coordinator.send_message("a", "b", MessageType::Feedback, i.to_string());
        }
        let kept: Vec<String> = coordinator.inbox("b").into_iter().map(|m| m.content).collect();
        assert_eq!(kept, vec!["2", "3", "4"]);
        assert_eq!(TeamCoordinator::new().inbox_capacity(), DEFAULT_INBOX_CAPACITY);
    }

    #[test]
    fn test_team_stats() {
        let coordinator = team(&["b", "a"]);
        coordinator.start_session("t", vec!["a".to_string()]);
        coordinator.send_message("a", "b", MessageType::Response, "ok");
        let stats = coordinator.team_stats();
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.open_sessions, 1);
        assert_eq!(stats.agents, vec!["a", "b"]);
    }
}
