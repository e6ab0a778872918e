//! Mock implementations for testing
//!
//! These mocks enable end-to-end testing of the dispatcher without a database
//! or a network connection.

use super::executor::{DispatchError, EventProcessor};
use super::traits::*;
use super::DispatchManager;
use crate::commands::CommandRegistry;
use crate::directory::{DbError, Group, GroupRole, UserIdentity};
use crate::session::SessionStore;
use crate::state_machine::{ConvState, MenuButton, Session};
use crate::transport::{InboundEvent, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// In-memory Directory
// ============================================================================

/// Directory backed by in-memory maps, with per-operation failure injection
#[derive(Default)]
pub struct InMemoryDirectory {
    pub users: Mutex<HashMap<UserIdentity, Option<String>>>,
    pub groups: Mutex<HashMap<String, Group>>,
    pub memberships: Mutex<HashMap<UserIdentity, String>>,
    pub roles: Mutex<HashMap<(String, UserIdentity), GroupRole>>,
    /// Record of every upsert call
    pub upserts: Mutex<Vec<UserIdentity>>,
    failing: Mutex<HashSet<&'static str>>,
    /// Code whose lookup blocks until the paired notify fires
    gate: Mutex<Option<(String, Arc<Notify>)>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation fail from now on
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Block lookups of `code` until the returned notify fires
    pub fn gate_code(&self, code: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((code.to_string(), Arc::clone(&notify)));
        notify
    }

    fn check(&self, operation: &'static str) -> Result<(), DbError> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(DbError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        Ok(())
    }

    /// Insert a group directly, bypassing the conversation
    pub fn seed_group(&self, id: &str, name: &str, description: &str) -> Group {
        let group = Group {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.groups
            .lock()
            .unwrap()
            .insert(group.id.clone(), group.clone());
        group
    }

    pub fn group_of(&self, user: UserIdentity) -> Option<String> {
        self.memberships.lock().unwrap().get(&user).cloned()
    }

    pub fn role_of(&self, group_id: &str, user: UserIdentity) -> Option<GroupRole> {
        self.roles
            .lock()
            .unwrap()
            .get(&(group_id.to_string(), user))
            .copied()
    }

    pub fn group_count(&self) -> usize {
        self.groups.lock().unwrap().len()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn upsert_user(
        &self,
        id: UserIdentity,
        display_name: Option<&str>,
    ) -> Result<(), DbError> {
        self.check("upsert_user")?;
        self.upserts.lock().unwrap().push(id);
        self.users
            .lock()
            .unwrap()
            .insert(id, display_name.map(str::to_string));
        Ok(())
    }

    async fn find_group_by_code(&self, code: &str) -> Result<Option<Group>, DbError> {
        self.check("find_group_by_code")?;
        let gate = self
            .gate
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(gated, _)| gated == code)
            .map(|(_, notify)| Arc::clone(notify));
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.groups.lock().unwrap().get(code).cloned())
    }

    async fn create_group(&self, name: &str, description: &str) -> Result<Group, DbError> {
        self.check("create_group")?;
        let id = format!("group-{}", self.group_count() + 1);
        Ok(self.seed_group(&id, name, description))
    }

    async fn associate_user_with_group(
        &self,
        id: UserIdentity,
        group_id: &str,
    ) -> Result<(), DbError> {
        self.check("associate_user_with_group")?;
        if !self.groups.lock().unwrap().contains_key(group_id) {
            return Err(DbError::GroupNotFound(group_id.to_string()));
        }
        if !self.users.lock().unwrap().contains_key(&id) {
            return Err(DbError::UserNotFound(id));
        }
        self.memberships
            .lock()
            .unwrap()
            .insert(id, group_id.to_string());
        Ok(())
    }

    async fn grant_role(
        &self,
        group_id: &str,
        user: UserIdentity,
        role: GroupRole,
    ) -> Result<(), DbError> {
        self.check("grant_role")?;
        self.roles
            .lock()
            .unwrap()
            .insert((group_id.to_string(), user), role);
        Ok(())
    }

    async fn find_group_for_user(&self, user: UserIdentity) -> Result<Option<Group>, DbError> {
        self.check("find_group_for_user")?;
        let Some(group_id) = self.group_of(user) else {
            return Ok(None);
        };
        Ok(self.groups.lock().unwrap().get(&group_id).cloned())
    }
}

// ============================================================================
// Recording Transport
// ============================================================================

/// Outbound message captured by [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        to: UserIdentity,
        text: String,
    },
    Menu {
        to: UserIdentity,
        text: String,
        buttons: Vec<MenuButton>,
    },
}

impl Sent {
    pub fn to(&self) -> UserIdentity {
        match self {
            Sent::Text { to, .. } | Sent::Menu { to, .. } => *to,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Sent::Text { text, .. } | Sent::Menu { text, .. } => text,
        }
    }
}

/// Transport that records sends instead of delivering them
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
    /// Sends whose text starts with this prefix fail
    failing_prefix: Mutex<Option<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_texts_starting_with(&self, prefix: Option<&str>) {
        *self.failing_prefix.lock().unwrap() = prefix.map(str::to_string);
    }

    fn check(&self, text: &str) -> Result<(), TransportError> {
        let prefix_hit = self
            .failing_prefix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|prefix| text.starts_with(prefix));
        if prefix_hit || self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    /// Texts of everything sent to the user, in order
    pub fn texts_for(&self, user: UserIdentity) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.to() == user)
            .map(|s| s.text().to_string())
            .collect()
    }

    pub fn last_text_for(&self, user: UserIdentity) -> Option<String> {
        self.texts_for(user).pop()
    }

    pub fn menus_for(&self, user: UserIdentity) -> Vec<Vec<MenuButton>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Menu { to, buttons, .. } if *to == user => Some(buttons.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, to: UserIdentity, text: &str) -> Result<(), TransportError> {
        self.check(text)?;
        self.sent.lock().unwrap().push(Sent::Text {
            to,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_menu(
        &self,
        to: UserIdentity,
        text: &str,
        buttons: &[MenuButton],
    ) -> Result<(), TransportError> {
        self.check(text)?;
        self.sent.lock().unwrap().push(Sent::Menu {
            to,
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
        Ok(())
    }
}

// ============================================================================
// Test Bot
// ============================================================================

/// Processor wired to in-memory collaborators
pub struct TestBot {
    pub processor: EventProcessor<InMemoryDirectory, RecordingTransport>,
    pub directory: Arc<InMemoryDirectory>,
    pub transport: Arc<RecordingTransport>,
    pub sessions: Arc<SessionStore>,
}

impl TestBot {
    pub fn new() -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let transport = Arc::new(RecordingTransport::new());
        let sessions = Arc::new(SessionStore::new());
        let commands = Arc::new(CommandRegistry::builtin().unwrap());
        let processor = EventProcessor::new(
            Arc::clone(&directory),
            Arc::clone(&transport),
            commands,
            Arc::clone(&sessions),
        );
        Self {
            processor,
            directory,
            transport,
            sessions,
        }
    }

    pub async fn send(&self, user: UserIdentity, text: &str) -> Result<(), DispatchError> {
        self.processor.process(InboundEvent::text(user, text)).await
    }

    pub async fn state(&self, user: UserIdentity) -> ConvState {
        self.sessions.get_state(user).await
    }

    pub async fn session(&self, user: UserIdentity) -> Session {
        self.sessions.lock(user).await.clone()
    }

    pub async fn force_state(&self, user: UserIdentity, state: ConvState) {
        self.sessions.set_state(user, state).await;
    }
}

impl<D, T> DispatchManager<D, T>
where
    D: Directory + 'static,
    T: Transport + 'static,
{
    /// Wait until every worker has drained its queue
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let busy = self
                .workers
                .read()
                .await
                .values()
                .any(|handle| !handle.is_idle());
            if !busy {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{group_report, SCRATCH_GROUP_NAME};

    const ALICE: UserIdentity = UserIdentity(1001);
    const BOB: UserIdentity = UserIdentity(1002);

    #[tokio::test]
    async fn test_start_bootstraps_user_idempotently() {
        let bot = TestBot::new();

        bot.send(ALICE, "/start").await.unwrap();
        bot.send(ALICE, "/start").await.unwrap();

        assert_eq!(bot.directory.upserts.lock().unwrap().len(), 2);
        assert_eq!(bot.directory.users.lock().unwrap().len(), 1);
        assert_eq!(bot.state(ALICE).await, ConvState::Idle);

        let menus = bot.transport.menus_for(ALICE);
        assert_eq!(menus.len(), 2);
        assert_eq!(
            menus[0],
            vec![
                MenuButton::new("Join", "/join"),
                MenuButton::new("Create", "/creategroup"),
            ]
        );
    }

    #[tokio::test]
    async fn test_commands_apply_in_every_state() {
        let expected = [
            ("/start", None),
            ("/creategroup", Some(ConvState::AwaitingGroupName)),
            ("/join", Some(ConvState::AwaitingGroupCode)),
            ("/groupinfo", None),
        ];

        for state in ConvState::ALL {
            for (command, target) in expected {
                let bot = TestBot::new();
                bot.force_state(ALICE, state).await;

                bot.send(ALICE, command).await.unwrap();

                assert_eq!(
                    bot.state(ALICE).await,
                    target.unwrap_or(state),
                    "{command} from {state}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_create_group_happy_path() {
        let bot = TestBot::new();

        bot.send(ALICE, "/creategroup").await.unwrap();
        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupName);

        bot.send(ALICE, "Chess Club").await.unwrap();
        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupDescription);
        assert_eq!(
            bot.session(ALICE).await.scratch_value(SCRATCH_GROUP_NAME),
            Some("Chess Club")
        );

        bot.send(ALICE, "Weekly games").await.unwrap();

        let session = bot.session(ALICE).await;
        assert_eq!(session.state, ConvState::Idle);
        assert!(session.scratch.is_empty());

        let group_id = bot.directory.group_of(ALICE).unwrap();
        assert_eq!(bot.directory.role_of(&group_id, ALICE), Some(GroupRole::Owner));

        let group = bot.directory.groups.lock().unwrap()[&group_id].clone();
        assert_eq!(group.name, "Chess Club");
        assert_eq!(group.description, "Weekly games");
        assert_eq!(bot.transport.last_text_for(ALICE), Some(group_report(&group)));
    }

    #[tokio::test]
    async fn test_join_with_valid_code() {
        let bot = TestBot::new();
        let group = bot.directory.seed_group("abc-123", "Chess Club", "Weekly games");

        bot.send(BOB, "/join").await.unwrap();
        bot.send(BOB, "  abc-123 ").await.unwrap();

        assert_eq!(bot.state(BOB).await, ConvState::Idle);
        assert_eq!(bot.directory.group_of(BOB).as_deref(), Some(group.id.as_str()));
        assert_eq!(
            bot.transport.last_text_for(BOB).as_deref(),
            Some("You joined group Chess Club - Weekly games")
        );
    }

    #[tokio::test]
    async fn test_join_with_wrong_code_stays_waiting() {
        let bot = TestBot::new();

        bot.send(BOB, "/join").await.unwrap();
        bot.send(BOB, "nope").await.unwrap();

        assert_eq!(bot.state(BOB).await, ConvState::AwaitingGroupCode);
        assert_eq!(bot.directory.group_of(BOB), None);
        assert_eq!(
            bot.transport.last_text_for(BOB).as_deref(),
            Some("Wrong group code")
        );
    }

    #[tokio::test]
    async fn test_event_without_text_is_rejected_in_place() {
        let cases = [
            (ConvState::AwaitingGroupCode, "No text for group code"),
            (ConvState::AwaitingGroupName, "No text for group name"),
            (ConvState::AwaitingGroupDescription, "No text for group description"),
            (ConvState::Idle, "Please enter a valid command"),
        ];

        for (state, reply) in cases {
            let bot = TestBot::new();
            bot.force_state(ALICE, state).await;

            bot.processor
                .process(InboundEvent::empty(ALICE))
                .await
                .unwrap();

            assert_eq!(bot.state(ALICE).await, state);
            assert_eq!(bot.transport.texts_for(ALICE), vec![reply.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_idle_free_text_asks_for_command() {
        let bot = TestBot::new();

        bot.send(ALICE, "hello").await.unwrap();

        assert_eq!(bot.state(ALICE).await, ConvState::Idle);
        assert_eq!(
            bot.transport.last_text_for(ALICE).as_deref(),
            Some("Please enter a valid command")
        );
    }

    #[tokio::test]
    async fn test_command_token_wins_over_pending_input() {
        let bot = TestBot::new();

        bot.send(ALICE, "/creategroup").await.unwrap();
        bot.send(ALICE, "/join").await.unwrap();

        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupCode);
        assert_eq!(bot.directory.group_count(), 0);
    }

    #[tokio::test]
    async fn test_button_press_acts_as_command() {
        let bot = TestBot::new();

        bot.processor
            .process(InboundEvent::callback(ALICE, "/creategroup"))
            .await
            .unwrap();

        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupName);
    }

    #[tokio::test]
    async fn test_group_info_reports_membership() {
        let bot = TestBot::new();

        bot.send(ALICE, "/groupinfo").await.unwrap();
        assert!(bot
            .transport
            .last_text_for(ALICE)
            .unwrap()
            .starts_with("No group found"));

        let group = bot.directory.seed_group("g-1", "Chess Club", "Weekly games");
        bot.directory
            .memberships
            .lock()
            .unwrap()
            .insert(ALICE, group.id.clone());
        bot.force_state(ALICE, ConvState::AwaitingGroupName).await;

        bot.send(ALICE, "/groupinfo").await.unwrap();
        assert_eq!(bot.transport.last_text_for(ALICE), Some(group_report(&group)));
        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupName);
    }

    #[tokio::test]
    async fn test_directory_failure_discards_changes() {
        let bot = TestBot::new();
        bot.send(ALICE, "/creategroup").await.unwrap();
        bot.send(ALICE, "Chess Club").await.unwrap();
        let before = bot.session(ALICE).await;

        bot.directory.fail("create_group");
        bot.processor
            .handle(InboundEvent::text(ALICE, "Weekly games"))
            .await;

        let after = bot.session(ALICE).await;
        assert_eq!(after.state, ConvState::AwaitingGroupDescription);
        assert_eq!(after.scratch, before.scratch);
        assert_eq!(after.last_activity, before.last_activity);
        assert_eq!(bot.directory.group_of(ALICE), None);
        assert!(bot
            .transport
            .last_text_for(ALICE)
            .unwrap()
            .starts_with("Something went wrong"));
    }

    #[tokio::test]
    async fn test_join_failure_after_lookup_discards_changes() {
        let bot = TestBot::new();
        bot.directory.seed_group("abc-123", "Chess Club", "Weekly games");
        bot.send(BOB, "/join").await.unwrap();
        let replies_before = bot.transport.texts_for(BOB).len();

        bot.directory.fail("associate_user_with_group");
        let result = bot.send(BOB, "abc-123").await;

        assert!(matches!(result, Err(DispatchError::Directory(_))));
        assert_eq!(bot.state(BOB).await, ConvState::AwaitingGroupCode);
        assert_eq!(bot.transport.texts_for(BOB).len(), replies_before);
    }

    #[tokio::test]
    async fn test_transport_failure_discards_changes() {
        let bot = TestBot::new();
        bot.transport.set_failing(true);

        let result = bot.send(ALICE, "/join").await;

        assert!(matches!(result, Err(DispatchError::Transport(_))));
        assert_eq!(bot.state(ALICE).await, ConvState::Idle);
    }

    #[tokio::test]
    async fn test_lost_report_does_not_duplicate_group_on_retry() {
        let bot = TestBot::new();
        bot.send(ALICE, "/creategroup").await.unwrap();
        bot.send(ALICE, "Chess Club").await.unwrap();

        bot.transport.fail_texts_starting_with(Some("Your group:"));
        let result = bot.send(ALICE, "We play chess").await;
        assert!(matches!(result, Err(DispatchError::Transport(_))));

        // Directory writes landed, so the session moved on with them
        let session = bot.session(ALICE).await;
        assert_eq!(session.state, ConvState::Idle);
        assert!(session.scratch.is_empty());
        let group_id = bot.directory.group_of(ALICE).unwrap();
        assert_eq!(bot.directory.role_of(&group_id, ALICE), Some(GroupRole::Owner));

        bot.transport.fail_texts_starting_with(None);
        bot.send(ALICE, "We play chess").await.unwrap();

        assert_eq!(bot.directory.group_count(), 1);
        assert_eq!(bot.directory.group_of(ALICE), Some(group_id));
        assert_eq!(
            bot.transport.last_text_for(ALICE).as_deref(),
            Some("Please enter a valid command")
        );
    }

    #[tokio::test]
    async fn test_lost_join_confirmation_keeps_membership() {
        let bot = TestBot::new();
        bot.directory.seed_group("abc-123", "Chess Club", "Weekly games");
        bot.send(BOB, "/join").await.unwrap();

        bot.transport.fail_texts_starting_with(Some("You joined"));
        let result = bot.send(BOB, "abc-123").await;

        assert!(matches!(result, Err(DispatchError::Transport(_))));
        assert_eq!(bot.state(BOB).await, ConvState::Idle);
        assert_eq!(bot.directory.group_of(BOB).as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_failed_role_grant_keeps_created_group() {
        let bot = TestBot::new();
        bot.send(ALICE, "/creategroup").await.unwrap();
        bot.send(ALICE, "Chess Club").await.unwrap();

        bot.directory.fail("grant_role");
        let result = bot.send(ALICE, "We play chess").await;

        assert!(matches!(result, Err(DispatchError::Directory(_))));
        let session = bot.session(ALICE).await;
        assert_eq!(session.state, ConvState::Idle);
        assert!(session.scratch.is_empty());
        assert_eq!(bot.directory.group_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_upsert_abandons_event() {
        let bot = TestBot::new();
        bot.directory.fail("upsert_user");

        let result = bot.send(ALICE, "/join").await;

        assert!(matches!(result, Err(DispatchError::Directory(_))));
        assert_eq!(bot.state(ALICE).await, ConvState::Idle);
        assert!(bot.transport.texts_for(ALICE).is_empty());
    }

    fn manager(bot: &TestBot) -> Arc<DispatchManager<InMemoryDirectory, RecordingTransport>> {
        let processor = EventProcessor::new(
            Arc::clone(&bot.directory),
            Arc::clone(&bot.transport),
            Arc::new(CommandRegistry::builtin().unwrap()),
            Arc::clone(&bot.sessions),
        );
        Arc::new(DispatchManager::new(processor))
    }

    #[tokio::test]
    async fn test_concurrent_users_do_not_interfere() {
        let bot = TestBot::new();
        let manager = manager(&bot);
        let users: Vec<UserIdentity> = (1..=10).map(UserIdentity).collect();

        for step in ["/creategroup", "name", "description"] {
            for user in &users {
                let text = match step {
                    "/creategroup" => step.to_string(),
                    _ => format!("{step} {user}"),
                };
                manager.dispatch(InboundEvent::text(*user, text)).await;
            }
        }
        assert!(manager.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(bot.directory.group_count(), users.len());
        for user in &users {
            assert_eq!(bot.state(*user).await, ConvState::Idle);
            let group_id = bot.directory.group_of(*user).unwrap();
            let group = bot.directory.groups.lock().unwrap()[&group_id].clone();
            assert_eq!(group.name, format!("name {user}"));
            assert_eq!(group.description, format!("description {user}"));
            assert_eq!(bot.directory.role_of(&group_id, *user), Some(GroupRole::Owner));
        }
    }

    async fn wait_for_state(bot: &TestBot, user: UserIdentity, expected: ConvState) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if bot.state(user).await == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_slow_directory_call_delays_only_its_user() {
        let bot = TestBot::new();
        let manager = manager(&bot);
        let release = bot.directory.gate_code("slow-code");

        manager.dispatch(InboundEvent::text(ALICE, "/join")).await;
        manager.dispatch(InboundEvent::text(ALICE, "slow-code")).await;

        manager.dispatch(InboundEvent::text(BOB, "/creategroup")).await;
        manager.dispatch(InboundEvent::text(BOB, "Chess Club")).await;

        assert!(wait_for_state(&bot, BOB, ConvState::AwaitingGroupDescription).await);
        assert_eq!(
            bot.transport.last_text_for(BOB).as_deref(),
            Some("Please enter group description")
        );
        // Alice is still parked inside the lookup
        assert!(!bot
            .transport
            .texts_for(ALICE)
            .contains(&"Wrong group code".to_string()));
        assert!(!manager.wait_idle(Duration::from_millis(50)).await);

        release.notify_one();
        assert!(manager.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(
            bot.transport.last_text_for(ALICE).as_deref(),
            Some("Wrong group code")
        );
        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupCode);
    }

    #[tokio::test]
    async fn test_events_from_one_user_are_processed_in_order() {
        let bot = TestBot::new();
        let manager = manager(&bot);

        let events = ["/creategroup", "Chess Club", "/join", "nope", "/start"];
        for text in events {
            manager.dispatch(InboundEvent::text(ALICE, text)).await;
        }
        assert!(manager.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(
            bot.transport.texts_for(ALICE),
            vec![
                "Please enter a group name",
                "Please enter group description",
                "Please enter a group code",
                "Wrong group code",
                "Welcome to bot, enter command /join to join group \n /creategroup to create one",
            ]
        );
        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupCode);
    }

    #[tokio::test]
    async fn test_sweep_stops_idle_workers_and_evicts_stale_sessions() {
        let bot = TestBot::new();
        let manager = manager(&bot);

        manager.dispatch(InboundEvent::text(ALICE, "/join")).await;
        manager.dispatch(InboundEvent::text(BOB, "/creategroup")).await;
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(manager.worker_count().await, 2);

        bot.sessions.lock(ALICE).await.last_activity = Utc::now() - chrono::Duration::hours(3);

        manager.sweep(Some(chrono::Duration::hours(1))).await;

        assert_eq!(manager.worker_count().await, 0);
        assert_eq!(bot.state(ALICE).await, ConvState::Idle);
        assert_eq!(bot.state(BOB).await, ConvState::AwaitingGroupName);

        // A swept user starts a fresh worker on the next event
        manager.dispatch(InboundEvent::text(ALICE, "/join")).await;
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupCode);
    }

    #[tokio::test]
    async fn test_sweep_without_ttl_keeps_sessions() {
        let bot = TestBot::new();
        let manager = manager(&bot);

        manager.dispatch(InboundEvent::text(ALICE, "/join")).await;
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
        bot.sessions.lock(ALICE).await.last_activity = Utc::now() - chrono::Duration::days(30);

        manager.sweep(None).await;

        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupCode);
    }

    #[tokio::test]
    async fn test_run_drains_stream() {
        let bot = TestBot::new();
        let manager = manager(&bot);
        let events = futures::stream::iter(vec![
            InboundEvent::text(ALICE, "/join"),
            InboundEvent::text(BOB, "/creategroup"),
        ]);

        Arc::clone(&manager).run(events).await;
        assert!(manager.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(bot.state(ALICE).await, ConvState::AwaitingGroupCode);
        assert_eq!(bot.state(BOB).await, ConvState::AwaitingGroupName);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let bot = TestBot::new();
        let manager = manager(&bot);
        let cancel = tokio_util::sync::CancellationToken::new();

        let sweeper = manager.start_session_sweeper(
            Some(chrono::Duration::hours(1)),
            Duration::from_millis(10),
            cancel.clone(),
        );
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), sweeper)
            .await
            .unwrap()
            .unwrap();
    }
}
