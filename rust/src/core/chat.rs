// Conversation actions and the projection of the open conversation into state.

use super::*;

use crate::chat_id::conversation_id;
use crate::conversation::{ConversationEvent, OlderPage};
use crate::model::{MessageId, ReactionKind};
use crate::presence::PresenceEvent;
use crate::reactions::summarize;
use crate::state::{ChatMessage, ConversationView};

impl AppCore {
    fn open_chat(&self) -> Option<&OpenChat> {
        self.session.as_ref()?.conversation.as_ref()
    }

    fn open_chat_ids(&self) -> Result<(String, String, String), SyncError> {
        let me = self.require_user()?;
        let chat = self
            .open_chat()
            .ok_or_else(|| SyncError::Validation("no conversation selected".into()))?;
        Ok((me, chat.friend_id.clone(), chat.chat_id.clone()))
    }

    /// Opens the conversation with `friend_id`, replacing the current one.
    pub fn select_friend(&mut self, friend_id: &str) -> Result<(), SyncError> {
        let me = self.require_user()?;
        let chat_id = conversation_id(&me, friend_id);
        let selected = self.open_chat().is_some_and(|c| c.chat_id == chat_id);
        if selected && self.conversations.is_open(&chat_id) {
            self.conversations.reset_freshness(&chat_id);
            return Ok(());
        }
        self.close_conversation();

        let token = self.session_token;
        let tx = self.core_sender.clone();
        let handle = self.conversations.open(&chat_id, move |event| {
            let internal = match event {
                ConversationEvent::Messages(snapshot) => {
                    InternalEvent::ConversationUpdated { token, snapshot }
                }
                ConversationEvent::Failed { error, .. } => InternalEvent::ListenerFailed { token, error },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(internal)));
        })?;

        let tx = self.core_sender.clone();
        let typing = self.presence.subscribe(&chat_id, &me, move |event| {
            let internal = match event {
                PresenceEvent::PeerTyping { chat_id, typing } => InternalEvent::PeerTyping {
                    token,
                    chat_id,
                    typing,
                },
                PresenceEvent::Failed { error, .. } => InternalEvent::ListenerFailed { token, error },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(internal)));
        });
        if let Err(e) = typing {
            tracing::warn!(%chat_id, %e, "typing watch failed to start");
        }

        if let Some(session) = self.session.as_mut() {
            session.conversation = Some(OpenChat {
                friend_id: friend_id.to_string(),
                chat_id: chat_id.clone(),
                handle,
                snapshot: None,
                peer_typing: false,
            });
        }
        self.projection.clear();
        self.state.current_conversation = Some(ConversationView {
            chat_id: chat_id.clone(),
            peer_id: friend_id.to_string(),
            messages: vec![],
            can_load_older: true,
            peer_typing: false,
        });
        self.emit_current_conversation();

        if let Err(e) = self.conversations.mark_read(&chat_id, &me) {
            tracing::warn!(%chat_id, %e, "mark read on open failed");
        }
        Ok(())
    }

    /// Clears the local typing mark and releases the conversation and its typing watch.
    pub fn close_conversation(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let me = session.user_id.clone();
        let Some(chat) = session.conversation.take() else {
            return;
        };
        if let Err(e) = self.presence.clear(&chat.chat_id, &me) {
            tracing::warn!(chat_id = %chat.chat_id, %e, "failed to clear typing on close");
        }
        self.presence.unsubscribe(&chat.chat_id);
        self.conversations.close(&chat.handle);
        self.projection.clear();
        if self.state.current_conversation.take().is_some() {
            self.emit_current_conversation();
        }
    }

    /// Typing activity: a non-empty draft marks the user as typing.
    pub fn update_draft(&mut self, text: &str) -> Result<(), SyncError> {
        let Ok((me, _, chat_id)) = self.open_chat_ids() else {
            return Ok(());
        };
        self.presence
            .set_typing(&chat_id, &me, !text.trim().is_empty())
    }

    /// Sends to the selected friend.
    ///
    /// Returns `Ok(None)` when suppressed by the send cooldown.
    pub fn send_message(
        &mut self,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Option<MessageId>, SyncError> {
        let (me, friend_id, chat_id) = self.open_chat_ids()?;
        let now = self.clock.now_millis();
        if self.send_cooldown_until.is_some_and(|until| now < until) {
            tracing::debug!(%chat_id, "send suppressed by cooldown");
            return Ok(None);
        }

        let reply = reply_to.and_then(|id| {
            self.open_chat()?
                .snapshot
                .as_ref()?
                .messages
                .iter()
                .find(|m| m.id == id)
                .map(|m| m.reply_ref())
        });
        if reply_to.is_some() && reply.is_none() {
            tracing::debug!(%chat_id, "reply target not loaded; sending without quote");
        }

        self.send_cooldown_until = Some(now + self.config.send_cooldown_ms);
        self.set_busy(|b| b.sending = true);
        match self
            .conversations
            .send(&me, &friend_id, text, reply, &mut self.presence)
        {
            Ok(id) => {
                self.friend_sync.reset_freshness();
                let rev = self.next_rev();
                self.emit(AppUpdate::MessageSent {
                    rev,
                    chat_id,
                    message_id: id,
                });
                Ok(Some(id))
            }
            Err(e) => {
                self.send_cooldown_until = None;
                self.set_busy(|b| b.sending = false);
                Err(e)
            }
        }
    }

    pub fn load_older(&mut self) -> Result<OlderPage, SyncError> {
        let (_, _, chat_id) = self.open_chat_ids()?;
        self.set_busy(|b| b.loading_older = true);
        let result = self.conversations.load_older(&chat_id);
        self.set_busy(|b| b.loading_older = false);
        result
    }

    /// Toggles `kind` on a message, showing the result before the store confirms it.
    pub fn react(
        &mut self,
        message_id: MessageId,
        kind: ReactionKind,
    ) -> Result<Option<ReactionKind>, SyncError> {
        let (me, _, chat_id) = self.open_chat_ids()?;
        let current = match self.projection.target(message_id, &me) {
            Some(pending) => pending,
            None => self.reactions.current(&chat_id, message_id, &me)?,
        };
        let target = crate::reactions::toggle_target(current, kind);
        self.apply_reaction(&chat_id, message_id, &me, target)?;
        Ok(target)
    }

    pub fn remove_reaction(&mut self, message_id: MessageId) -> Result<(), SyncError> {
        let (me, _, chat_id) = self.open_chat_ids()?;
        self.apply_reaction(&chat_id, message_id, &me, None)
    }

    fn apply_reaction(
        &mut self,
        chat_id: &str,
        message_id: MessageId,
        me: &str,
        target: Option<ReactionKind>,
    ) -> Result<(), SyncError> {
        self.projection.record(message_id, me, target);
        self.refresh_conversation_view();
        match self.reactions.apply(chat_id, message_id, me, target) {
            Ok(()) => {
                self.projection.ack(message_id, me);
                Ok(())
            }
            Err(e) => {
                self.projection.fail(message_id, me);
                self.refresh_conversation_view();
                Err(e)
            }
        }
    }

    pub(super) fn on_conversation_snapshot(&mut self, snapshot: ConversationSnapshot) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let me = session.user_id.clone();
        let Some(chat) = session.conversation.as_mut() else {
            return;
        };
        if chat.chat_id != snapshot.chat_id {
            return;
        }
        let unread_from_peer = snapshot
            .messages
            .iter()
            .any(|m| m.sender_id != me && !m.read);
        let chat_id = chat.chat_id.clone();
        chat.snapshot = Some(snapshot);
        self.projection.reconcile();
        self.refresh_conversation_view();

        if unread_from_peer {
            match self.conversations.mark_read(&chat_id, &me) {
                Ok(n) => tracing::debug!(%chat_id, n, "incoming marked read"),
                Err(e) => tracing::warn!(%chat_id, %e, "mark read failed"),
            }
        }
    }

    pub(super) fn on_peer_typing(&mut self, chat_id: &str, typing: bool) {
        let Some(chat) = self
            .session
            .as_mut()
            .and_then(|s| s.conversation.as_mut())
        else {
            return;
        };
        if chat.chat_id != chat_id || chat.peer_typing == typing {
            return;
        }
        chat.peer_typing = typing;
        self.refresh_conversation_view();
    }

    fn refresh_conversation_view(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let me = session.user_id.as_str();
        let Some(chat) = session.conversation.as_ref() else {
            return;
        };
        let (messages, can_load_older) = match &chat.snapshot {
            Some(snapshot) => (
                snapshot
                    .messages
                    .iter()
                    .map(|m| {
                        let reactions = self.projection.overlay(m.id, &m.reactions);
                        ChatMessage {
                            id: m.id,
                            sender_id: m.sender_id.clone(),
                            text: m.text.clone(),
                            timestamp: m.timestamp,
                            is_mine: m.sender_id == me,
                            read: m.read,
                            reply_to: m.reply_to.clone(),
                            reactions: summarize(&reactions, me),
                            my_reaction: reactions.get(me).copied(),
                        }
                    })
                    .collect(),
                snapshot.has_older,
            ),
            None => (vec![], true),
        };
        let view = ConversationView {
            chat_id: chat.chat_id.clone(),
            peer_id: chat.friend_id.clone(),
            messages,
            can_load_older,
            peer_typing: chat.peer_typing,
        };
        if self.state.current_conversation.as_ref() != Some(&view) {
            self.state.current_conversation = Some(view);
            self.emit_current_conversation();
        }
    }
}
