use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flume::Receiver;
use parley_core::{
    AppAction, AppCore, AppReconciler, AppUpdate, AuthState, ReactionKind, SyncApp, SyncConfig,
};
use parley_memory_store::{MemoryBackend, MemoryStore};
use parley_store_traits::{ManualClock, StoreError};
use parley_test_utils::{seed_friendship, seed_user, StaticAuthenticator};

const START_MS: i64 = 1_700_000_000_000;

struct Peer {
    store: Arc<MemoryStore>,
    core: AppCore,
    updates: Receiver<AppUpdate>,
}

struct World {
    clock: Arc<ManualClock>,
    backend: MemoryBackend,
}

impl World {
    /// Two friends, alice (a1) and bob (b1), each signed in on their own client.
    fn friends() -> (Self, Peer, Peer) {
        let clock = Arc::new(ManualClock::new(START_MS));
        let backend = MemoryBackend::new(clock.clone());
        seed_user(&backend, "a1", "alice");
        seed_user(&backend, "b1", "bob");
        seed_friendship(&backend, "a1", "b1");
        let world = Self { clock, backend };
        let mut a = world.peer("a1");
        let mut b = world.peer("b1");
        a.core.sign_in(None).unwrap();
        b.core.sign_in(None).unwrap();
        world.settle(&mut [&mut a, &mut b]);
        (world, a, b)
    }

    fn peer(&self, user_id: &str) -> Peer {
        let store = Arc::new(self.backend.client(user_id));
        let (core, updates) = AppCore::new(
            store.clone(),
            self.clock.clone(),
            StaticAuthenticator::signed_in(user_id),
            SyncConfig::default(),
        );
        Peer {
            store,
            core,
            updates,
        }
    }

    fn settle(&self, peers: &mut [&mut Peer]) {
        for _ in 0..8 {
            self.backend.flush();
            for peer in peers.iter_mut() {
                peer.core.tick();
            }
        }
    }
}

fn texts(peer: &Peer) -> Vec<String> {
    peer.core
        .state()
        .current_conversation
        .map(|c| c.messages.into_iter().map(|m| m.text).collect())
        .unwrap_or_default()
}

#[test]
fn signing_in_creates_the_profile_with_the_chosen_handle() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let backend = MemoryBackend::new(clock.clone());
    let (mut core, _updates) = AppCore::new(
        Arc::new(backend.client("c1")),
        clock,
        StaticAuthenticator::signed_in("c1"),
        SyncConfig::default(),
    );
    core.dispatch(AppAction::SignIn {
        username: Some("carol".into()),
    });
    assert_eq!(
        core.state().auth,
        AuthState::SignedIn {
            user_id: "c1".into(),
            display_name: "@carol".into(),
        }
    );
    let doc = backend.document("users/c1").unwrap();
    assert_eq!(doc["displayName"], "@carol");
    assert_eq!(doc["tags"], serde_json::json!([]));
}

#[test]
fn signing_in_without_a_user_toasts() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let backend = MemoryBackend::new(clock.clone());
    let (mut core, _updates) = AppCore::new(
        Arc::new(backend.client("x")),
        clock,
        StaticAuthenticator::signed_out(),
        SyncConfig::default(),
    );
    core.dispatch(AppAction::SignIn { username: None });
    assert_eq!(core.state().auth, AuthState::SignedOut);
    assert_eq!(core.state().toast.as_deref(), Some("Sign in first"));
}

#[test]
fn message_reaches_the_peer_and_is_marked_read() {
    let (world, mut a, mut b) = World::friends();
    assert_eq!(a.core.state().friends.len(), 1);
    assert_eq!(a.core.state().friends[0].display_name, "@bob");

    a.core.select_friend("b1").unwrap();
    b.core.select_friend("a1").unwrap();
    b.core.send_message("hello", None).unwrap();
    world.settle(&mut [&mut a, &mut b]);

    let view = a.core.state().current_conversation.unwrap();
    assert_eq!(view.chat_id, "a1_b1");
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].text, "hello");
    assert!(!view.messages[0].is_mine);
    assert!(view.messages[0].read);

    let mine = b.core.state().current_conversation.unwrap();
    assert!(mine.messages[0].is_mine);
    assert!(mine.messages[0].read);

    let friend = b.core.state().friends[0].clone();
    assert_eq!(friend.last_message.as_ref().unwrap().text, "hello");
    assert!(!friend.has_unread);
}

#[test]
fn second_send_within_the_cooldown_is_dropped() {
    let (world, mut a, mut b) = World::friends();
    a.core.select_friend("b1").unwrap();

    assert!(a.core.send_message("one", None).unwrap().is_some());
    assert_eq!(a.core.send_message("two", None).unwrap(), None);
    assert!(a.core.state().busy.sending);

    world.clock.advance(Duration::from_millis(2_000));
    a.core.tick();
    assert!(!a.core.state().busy.sending);
    assert!(a.core.send_message("three", None).unwrap().is_some());

    world.settle(&mut [&mut a, &mut b]);
    assert_eq!(texts(&a), vec!["one", "three"]);
}

#[test]
fn offline_send_explains_it_will_retry() {
    let (_world, mut a, _b) = World::friends();
    a.core.select_friend("b1").unwrap();
    a.store.set_offline(true);

    a.core.dispatch(AppAction::SendMessage {
        text: "hi".into(),
        reply_to: None,
    });
    let state = a.core.state();
    assert_eq!(
        state.toast.as_deref(),
        Some("Message will be sent when connection is restored")
    );
    assert!(!state.busy.sending);

    a.core.dispatch(AppAction::ClearToast);
    assert_eq!(a.core.state().toast, None);
}

#[test]
fn reply_carries_a_quote_of_the_original() {
    let (world, mut a, mut b) = World::friends();
    a.core.select_friend("b1").unwrap();
    b.core.select_friend("a1").unwrap();
    b.core.send_message("question?", None).unwrap();
    world.settle(&mut [&mut a, &mut b]);

    let original = a.core.state().current_conversation.unwrap().messages[0].id;
    // Answer a second later so the reply sorts after the question.
    world.clock.advance(Duration::from_millis(1_000));
    a.core.send_message("answer", Some(original)).unwrap();
    world.settle(&mut [&mut a, &mut b]);

    let view = b.core.state().current_conversation.unwrap();
    let reply = view.messages[1].reply_to.clone().unwrap();
    assert_eq!(reply.id, original.to_string());
    assert_eq!(reply.sender_id, "b1");
    assert_eq!(reply.text, "question?");
}

#[test]
fn reaction_shows_before_the_store_confirms() {
    let (world, mut a, mut b) = World::friends();
    a.core.select_friend("b1").unwrap();
    b.core.select_friend("a1").unwrap();
    b.core.send_message("hello", None).unwrap();
    world.settle(&mut [&mut a, &mut b]);
    let id = a.core.state().current_conversation.unwrap().messages[0].id;

    assert_eq!(a.core.react(id, ReactionKind::Love).unwrap(), Some(ReactionKind::Love));
    let message = a.core.state().current_conversation.unwrap().messages[0].clone();
    assert_eq!(message.my_reaction, Some(ReactionKind::Love));
    assert_eq!(message.reactions[0].count, 1);

    world.settle(&mut [&mut a, &mut b]);
    let seen_by_b = b.core.state().current_conversation.unwrap().messages[0].clone();
    assert_eq!(seen_by_b.my_reaction, None);
    assert_eq!(seen_by_b.reactions[0].kind, ReactionKind::Love);
    assert!(!seen_by_b.reactions[0].reacted_by_me);

    assert_eq!(a.core.react(id, ReactionKind::Love).unwrap(), None);
    world.settle(&mut [&mut a, &mut b]);
    assert!(a.core.state().current_conversation.unwrap().messages[0]
        .reactions
        .is_empty());
}

#[test]
fn peer_typing_disappears_once_the_mark_is_stale() {
    let (world, mut a, mut b) = World::friends();
    a.core.select_friend("b1").unwrap();
    b.core.select_friend("a1").unwrap();
    world.settle(&mut [&mut a, &mut b]);

    a.core.update_draft("hel").unwrap();
    world.settle(&mut [&mut b]);
    assert!(b.core.state().current_conversation.unwrap().peer_typing);

    world.clock.advance(Duration::from_millis(5_999));
    b.core.tick();
    assert!(b.core.state().current_conversation.unwrap().peer_typing);

    world.clock.advance(Duration::from_millis(1));
    b.core.tick();
    assert!(!b.core.state().current_conversation.unwrap().peer_typing);
}

#[test]
fn removing_the_selected_friend_closes_the_conversation() {
    let (world, mut a, mut b) = World::friends();
    a.core.select_friend("b1").unwrap();
    a.core.remove_friend("b1").unwrap();
    world.settle(&mut [&mut a, &mut b]);

    let state = a.core.state();
    assert!(state.current_conversation.is_none());
    assert!(state.friends.is_empty());
    assert!(world.backend.document("users/b1/friends/a1").is_none());

    world.clock.advance(Duration::from_millis(700));
    world.settle(&mut [&mut a, &mut b]);
    assert!(b.core.state().friends.is_empty());
}

#[test]
fn friend_request_round_trip_updates_both_request_lists() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let backend = MemoryBackend::new(clock.clone());
    seed_user(&backend, "a1", "alice");
    seed_user(&backend, "b1", "bob");
    let world = World { clock, backend };
    let mut a = world.peer("a1");
    let mut b = world.peer("b1");
    a.core.sign_in(None).unwrap();
    b.core.sign_in(None).unwrap();

    a.core.send_friend_request("bob").unwrap();
    assert_eq!(a.core.state().outgoing_requests.len(), 1);
    b.core.refresh_requests().unwrap();
    assert_eq!(b.core.state().pending_requests[0].user_id, "a1");

    b.core.accept_friend_request("a1").unwrap();
    assert!(b.core.state().pending_requests.is_empty());
    world.settle(&mut [&mut a, &mut b]);
    world.clock.advance(Duration::from_millis(700));
    world.settle(&mut [&mut a, &mut b]);

    assert_eq!(a.core.state().friends.len(), 1);
    assert_eq!(b.core.state().friends.len(), 1);
    a.core.refresh_requests().unwrap();
    assert!(a.core.state().outgoing_requests.is_empty());

    a.core.dispatch(AppAction::SendFriendRequest {
        username: "bob".into(),
    });
    assert!(a.core.state().toast.is_some());
}

#[test]
fn listener_failure_is_reported_and_sign_out_resets_state() {
    let (world, mut a, _b) = World::friends();
    world
        .backend
        .fail_listeners("users/a1/friends", StoreError::PermissionDenied("rules".into()));
    world.settle(&mut [&mut a]);
    assert!(a
        .core
        .state()
        .toast
        .is_some_and(|t| t.starts_with("Sync problem")));

    a.core.dispatch(AppAction::SignOut);
    let state = a.core.state();
    assert_eq!(state.auth, AuthState::SignedOut);
    assert!(state.friends.is_empty());

    let revs: Vec<u64> = a.updates.drain().map(|u| u.rev()).collect();
    assert!(revs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn reselecting_after_a_message_listener_failure_resubscribes() {
    let (world, mut a, mut b) = World::friends();
    a.core.select_friend("b1").unwrap();
    b.core.select_friend("a1").unwrap();
    world.settle(&mut [&mut a, &mut b]);

    world
        .backend
        .fail_listeners("chats/a1_b1/messages", StoreError::Unavailable("dropped".into()));
    world.settle(&mut [&mut a, &mut b]);
    assert!(world.backend.listeners_on("chats/a1_b1/messages").is_empty());

    a.core.dispatch(AppAction::SelectFriend {
        friend_id: "b1".into(),
    });
    b.core.dispatch(AppAction::SelectFriend {
        friend_id: "a1".into(),
    });

    b.core.send_message("after fault", None).unwrap();
    world.settle(&mut [&mut a, &mut b]);
    assert_eq!(texts(&a), vec!["after fault"]);
}

#[test]
fn signing_in_again_restarts_a_failed_friends_listener() {
    let (world, mut a, _b) = World::friends();
    world
        .backend
        .fail_listeners("users/a1/friends", StoreError::Unavailable("dropped".into()));
    world.settle(&mut [&mut a]);
    assert!(world.backend.listeners_on("users/a1/friends").is_empty());

    seed_user(&world.backend, "c1", "carol");
    seed_friendship(&world.backend, "a1", "c1");
    a.core.dispatch(AppAction::SignIn { username: None });
    assert_eq!(world.backend.listeners_on("users/a1/friends").len(), 1);

    world.settle(&mut [&mut a]);
    let mut names: Vec<String> = a
        .core
        .state()
        .friends
        .into_iter()
        .map(|f| f.display_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["@bob", "@carol"]);

    // A healthy session is left alone.
    a.core.dispatch(AppAction::SignIn { username: None });
    assert_eq!(world.backend.listeners_on("users/a1/friends").len(), 1);
}

struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

#[test]
fn threaded_app_delivers_updates_to_the_reconciler() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let backend = MemoryBackend::new(clock.clone());
    seed_user(&backend, "b1", "bob");
    seed_friendship(&backend, "a1", "b1");

    let app = SyncApp::new(
        Arc::new(backend.client("a1")),
        clock,
        StaticAuthenticator::signed_in("a1"),
        SyncConfig::default(),
    );
    let updates = Arc::new(Mutex::new(vec![]));
    app.listen_for_updates(Box::new(TestReconciler {
        updates: updates.clone(),
    }));
    app.dispatch(AppAction::SignIn {
        username: Some("alice".into()),
    });

    wait_until("signed in", Duration::from_secs(2), || {
        matches!(app.state().auth, AuthState::SignedIn { .. })
    });
    wait_until("friends loaded", Duration::from_secs(2), || {
        backend.flush();
        app.state().friends.len() == 1
    });
    let seen = updates.lock().unwrap();
    assert!(seen
        .iter()
        .any(|u| matches!(u, AppUpdate::FriendsChanged { friends, .. } if friends.len() == 1)));
}
