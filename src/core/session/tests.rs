use super::*;
use crate::character::record::{ConversationMethod, SowSystemMode, VoiceConfig};
use crate::core::effects::{SpeechRecognizer, SpeechSynthesizer, Translator};
use crate::core::emotion::EmotionClassifier;
use crate::core::ledger::RemoteMessage;
use async_trait::async_trait;
use futures_util::stream;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
struct AdapterState {
    replies: Mutex<VecDeque<Vec<ReplyEvent>>>,
    fail_next_send: Mutex<Option<String>>,
    requests: Mutex<Vec<(String, Vec<ContextMessage>)>>,
    remote_chat: Mutex<Vec<RemoteMessage>>,
    remote_calls: Mutex<Vec<String>>,
    fail_remote: Mutex<bool>,
}

struct FakeAdapter {
    method: ConversationMethod,
    state: Arc<AdapterState>,
}

impl FakeAdapter {
    fn boxed(method: ConversationMethod, state: &Arc<AdapterState>) -> Box<dyn ProviderAdapter> {
        Box::new(Self {
            method,
            state: state.clone(),
        })
    }

    fn remote_result(&self, call: String) -> Result<(), ProviderError> {
        self.state.remote_calls.lock().unwrap().push(call);
        if *self.state.fail_remote.lock().unwrap() {
            return Err(ProviderError::Api {
                status: Some(503),
                message: "remote unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn remote_message(author: &str, is_user: bool, text: &str, turn: &str) -> RemoteMessage {
    RemoteMessage {
        author_name: author.to_string(),
        is_user,
        text: text.to_string(),
        remote: RemoteTurn {
            turn_id: turn.to_string(),
            candidate_id: format!("{turn}-c"),
        },
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn method(&self) -> ConversationMethod {
        self.method
    }

    async fn send(&self, request: TurnRequest<'_>) -> Result<ReplyStream, ProviderError> {
        if let Some(message) = self.state.fail_next_send.lock().unwrap().take() {
            return Err(ProviderError::Api {
                status: Some(500),
                message,
            });
        }
        let context = match request.context {
            TurnContext::Messages(messages) => messages,
            TurnContext::Remote { .. } => Vec::new(),
        };
        self.state
            .requests
            .lock()
            .unwrap()
            .push((request.user_message.to_string(), context));

        let events = self
            .state
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        if self.method.is_stateful() {
            let mut chat = self.state.remote_chat.lock().unwrap();
            let n = chat.len();
            chat.push(remote_message(
                request.user_name,
                true,
                request.user_message,
                &format!("t{n}"),
            ));
            if let Some(ReplyEvent::Snapshot {
                text,
                remote: Some(remote),
            }) = events.last()
            {
                chat.push(RemoteMessage {
                    author_name: "Aria".to_string(),
                    is_user: false,
                    text: text.clone(),
                    remote: remote.clone(),
                });
            }
        }

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn fetch_chat(
        &self,
        _record: &CharacterRecord,
    ) -> Result<Option<Vec<RemoteMessage>>, ProviderError> {
        if !self.method.is_stateful() {
            return Ok(None);
        }
        Ok(Some(self.state.remote_chat.lock().unwrap().clone()))
    }

    async fn edit_remote(
        &self,
        _record: &CharacterRecord,
        message: &Message,
        new_text: &str,
    ) -> Result<(), ProviderError> {
        self.remote_result(format!(
            "edit {} {new_text}",
            message.turn_id.clone().unwrap_or_default()
        ))
    }

    async fn delete_remote(
        &self,
        _record: &CharacterRecord,
        turn_ids: &[String],
    ) -> Result<(), ProviderError> {
        self.remote_result(format!("delete {}", turn_ids.join(",")))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Vec<String>,
    input_enabled: Option<bool>,
}

impl SessionSink for RecordingSink {
    fn display_message(&mut self, author: &str, text: &str, is_user: bool) {
        self.events.push(format!("display {author} {is_user} {text}"));
    }

    fn update_reply(&mut self, _author: &str, text: &str) {
        self.events.push(format!("update {text}"));
    }

    fn finish_reply(&mut self, _author: &str, text: &str) {
        self.events.push(format!("finish {text}"));
    }

    fn set_expression(&mut self, character_name: &str, emotion: Emotion) {
        self.events.push(format!("expression {character_name} {emotion}"));
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.input_enabled = Some(enabled);
        self.events.push(format!("input {enabled}"));
    }

    fn notify_error(&mut self, message: &str) {
        self.events.push(format!("error {message}"));
    }

    fn play_audio(&mut self, path: &Path) {
        self.events.push(format!("audio {}", path.display()));
    }
}

struct FixedClassifier(Option<Emotion>);

#[async_trait]
impl EmotionClassifier for FixedClassifier {
    async fn classify(&self, _text: &str) -> Result<Emotion, ProviderError> {
        self.0
            .ok_or_else(|| ProviderError::Protocol("classifier offline".to_string()))
    }
}

struct TaggingTranslator {
    fail: bool,
}

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError> {
        if self.fail {
            return Err(ProviderError::Protocol("translator offline".to_string()));
        }
        Ok(format!("[{target_language}] {text}"))
    }
}

struct RecordingSpeech {
    spoken: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SpeechSynthesizer for RecordingSpeech {
    async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> Result<PathBuf, ProviderError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(PathBuf::from("/tmp/clip.mp3"))
    }
}

struct Harness {
    _dir: TempDir,
    store: CharacterStore,
    adapter: Arc<AdapterState>,
    session: Session,
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.user_data.user_name = "Kai".to_string();
    settings
}

fn harness_with(
    method: ConversationMethod,
    configure: impl FnOnce(&mut CharacterRecord),
    effects: Effects,
    settings: Settings,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = CharacterStore::new(dir.path().join("characters.json"));
    let mut record = CharacterRecord::new("Aria", "Hello {{user}}!", method);
    configure(&mut record);
    store.insert(record).unwrap();

    let adapter = Arc::new(AdapterState::default());
    let session = Session::new(
        "Aria",
        store.clone(),
        settings,
        FakeAdapter::boxed(method, &adapter),
        effects,
    );
    Harness {
        _dir: dir,
        store,
        adapter,
        session,
    }
}

fn harness() -> Harness {
    harness_with(
        ConversationMethod::MistralAi,
        |_| {},
        Effects::default(),
        settings(),
    )
}

fn deltas(parts: &[&str]) -> Vec<ReplyEvent> {
    parts
        .iter()
        .map(|part| ReplyEvent::Delta(part.to_string()))
        .collect()
}

fn texts(store: &CharacterStore) -> Vec<(u64, String)> {
    store
        .get("Aria")
        .unwrap()
        .chat_content
        .iter()
        .map(|(id, message)| (id.0, message.text.clone()))
        .collect()
}

#[tokio::test]
async fn empty_input_is_a_no_op() {
    let mut h = harness();
    let mut sink = RecordingSink::default();
    let outcome = h.session.handle_user_message("   ", &mut sink).await.unwrap();
    assert!(outcome.is_none());
    assert!(sink.events.is_empty());
    assert_eq!(texts(&h.store).len(), 1);
}

#[tokio::test]
async fn stateless_turn_appends_both_sides() {
    let mut h = harness();
    h.adapter
        .replies
        .lock()
        .unwrap()
        .push_back(deltas(&["Hi ", "there, ", "{{user}}!"]));

    let mut sink = RecordingSink::default();
    let outcome = h
        .session
        .handle_user_message("Hi", &mut sink)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.user_message, Some(MessageId(2)));
    assert_eq!(outcome.reply, MessageId(3));
    assert_eq!(outcome.text, "Hi there, Kai!");
    assert_eq!(
        texts(&h.store),
        vec![
            (1, "Hello {{user}}!".to_string()),
            (2, "Hi".to_string()),
            (3, "Hi there, Kai!".to_string()),
        ]
    );
    assert_eq!(
        sink.events,
        vec![
            "input false",
            "display Kai true Hi",
            "update Hi ",
            "update Hi there, ",
            "update Hi there, {{user}}!",
            "finish Hi there, Kai!",
            "input true",
        ]
    );
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn context_carries_system_prompt_and_history_without_pending_message() {
    let mut h = harness();
    h.adapter
        .replies
        .lock()
        .unwrap()
        .push_back(deltas(&["Sure."]));
    let mut sink = RecordingSink::default();
    h.session
        .handle_user_message("Tell me a story", &mut sink)
        .await
        .unwrap();

    let requests = h.adapter.requests.lock().unwrap();
    let (user_message, context) = &requests[0];
    assert_eq!(user_message, "Tell me a story");
    assert_eq!(context[0].role, crate::core::message::ContextRole::System);
    assert_eq!(context[1].content, "Hello Kai!");
    assert_eq!(context.len(), 2);
}

#[tokio::test]
async fn snapshots_replace_rather_than_append() {
    let mut h = harness();
    h.adapter.replies.lock().unwrap().push_back(vec![
        ReplyEvent::Snapshot {
            text: "Hel".to_string(),
            remote: None,
        },
        ReplyEvent::Snapshot {
            text: "Hello again".to_string(),
            remote: None,
        },
    ]);
    let mut sink = RecordingSink::default();
    let outcome = h
        .session
        .handle_user_message("Hi", &mut sink)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.text, "Hello again");
}

#[tokio::test]
async fn provider_failure_keeps_user_message_and_reenables_input() {
    let mut h = harness();
    *h.adapter.fail_next_send.lock().unwrap() = Some("overloaded".to_string());

    let mut sink = RecordingSink::default();
    let err = h
        .session
        .handle_user_message("Hi", &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Provider(_)));
    assert_eq!(sink.input_enabled, Some(true));
    assert!(sink.events.iter().any(|e| e.contains("overloaded")));
    assert_eq!(
        texts(&h.store),
        vec![(1, "Hello {{user}}!".to_string()), (2, "Hi".to_string())]
    );
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn side_effects_run_in_order_after_the_reply() {
    let spoken = Arc::new(Mutex::new(Vec::new()));
    let effects = Effects {
        translator: Some(Box::new(TaggingTranslator { fail: false })),
        classifier: Some(Box::new(FixedClassifier(Some(Emotion::Joy)))),
        speech: Some(Box::new(RecordingSpeech {
            spoken: spoken.clone(),
        })),
    };
    let mut settings = settings();
    settings.main_settings.target_language = "ru".to_string();
    settings.main_settings.translator_mode = crate::core::config::TranslationMode::CharacterOutput;

    let mut h = harness_with(
        ConversationMethod::MistralAi,
        |record| {
            record.current_sow_system_mode = SowSystemMode::ExpressionImages;
            record.voice = VoiceConfig::ElevenLabs {
                voice_id: "v1".to_string(),
            };
        },
        effects,
        settings,
    );
    h.adapter
        .replies
        .lock()
        .unwrap()
        .push_back(deltas(&["*smiles* Nice to see you"]));

    let mut sink = RecordingSink::default();
    let outcome = h
        .session
        .handle_user_message("Hi", &mut sink)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.emotion, Some(Emotion::Joy));
    assert_eq!(outcome.displayed, "[ru] *smiles* Nice to see you");
    assert_eq!(outcome.audio, Some(PathBuf::from("/tmp/clip.mp3")));
    assert_eq!(*spoken.lock().unwrap(), vec!["[ru] Nice to see you"]);
    assert_eq!(h.store.get("Aria").unwrap().current_emotion, Emotion::Joy);
    // Input was sent untranslated in CharacterOutput mode.
    assert_eq!(h.adapter.requests.lock().unwrap()[0].0, "Hi");

    let tail: Vec<&str> = sink
        .events
        .iter()
        .skip_while(|e| !e.starts_with("finish"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        tail,
        vec![
            "finish *smiles* Nice to see you",
            "expression Aria joy",
            "finish [ru] *smiles* Nice to see you",
            "audio /tmp/clip.mp3",
            "input true",
        ]
    );
}

#[tokio::test]
async fn input_translation_failure_sends_original_text() {
    let effects = Effects {
        translator: Some(Box::new(TaggingTranslator { fail: true })),
        classifier: None,
        speech: None,
    };
    let mut settings = settings();
    settings.main_settings.translator_mode = crate::core::config::TranslationMode::UserInput;
    let mut h = harness_with(ConversationMethod::MistralAi, |_| {}, effects, settings);
    h.adapter.replies.lock().unwrap().push_back(deltas(&["ok"]));

    let mut sink = RecordingSink::default();
    h.session
        .handle_user_message("Привет", &mut sink)
        .await
        .unwrap();
    assert_eq!(h.adapter.requests.lock().unwrap()[0].0, "Привет");
}

#[tokio::test]
async fn classifier_failure_keeps_previous_emotion() {
    let effects = Effects {
        translator: None,
        classifier: Some(Box::new(FixedClassifier(None))),
        speech: None,
    };
    let mut h = harness_with(
        ConversationMethod::MistralAi,
        |record| {
            record.current_sow_system_mode = SowSystemMode::Live2DModel;
            record.current_emotion = Emotion::Curiosity;
        },
        effects,
        settings(),
    );
    h.adapter.replies.lock().unwrap().push_back(deltas(&["Hm."]));

    let mut sink = RecordingSink::default();
    let outcome = h
        .session
        .handle_user_message("Hi", &mut sink)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.emotion, None);
    assert_eq!(
        h.store.get("Aria").unwrap().current_emotion,
        Emotion::Curiosity
    );
}

#[tokio::test]
async fn cancelled_stream_is_reported() {
    let mut h = harness();
    h.adapter.replies.lock().unwrap().push_back(deltas(&["never"]));
    h.session.cancellation_token().cancel();

    let mut sink = RecordingSink::default();
    let err = h
        .session
        .handle_user_message("Hi", &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert_eq!(texts(&h.store).len(), 2);
}

#[tokio::test]
async fn regenerate_replaces_last_reply() {
    let mut h = harness();
    {
        let mut replies = h.adapter.replies.lock().unwrap();
        replies.push_back(deltas(&["First answer"]));
        replies.push_back(deltas(&["Second answer"]));
    }
    let mut sink = RecordingSink::default();
    h.session.handle_user_message("Hi", &mut sink).await.unwrap();
    let outcome = h.session.regenerate(&mut sink).await.unwrap();

    assert_eq!(outcome.reply, MessageId(4));
    assert_eq!(
        texts(&h.store),
        vec![
            (1, "Hello {{user}}!".to_string()),
            (2, "Hi".to_string()),
            (4, "Second answer".to_string()),
        ]
    );
    let requests = h.adapter.requests.lock().unwrap();
    assert_eq!(requests[1].0, "Hi");
    assert!(requests[1].1.iter().all(|m| m.content != "First answer"));
}

#[tokio::test]
async fn regenerate_without_user_message_fails() {
    let mut h = harness();
    let mut sink = RecordingSink::default();
    let err = h.session.regenerate(&mut sink).await.unwrap_err();
    assert!(matches!(err, SessionError::NothingToRegenerate));
    assert_eq!(sink.input_enabled, Some(true));
}

#[tokio::test]
async fn local_edit_delete_and_continue() {
    let mut h = harness();
    for reply in ["A1", "A2"] {
        h.adapter.replies.lock().unwrap().push_back(deltas(&[reply]));
    }
    let mut sink = RecordingSink::default();
    h.session.handle_user_message("Q1", &mut sink).await.unwrap();
    h.session.handle_user_message("Q2", &mut sink).await.unwrap();

    h.session.edit_message(MessageId(3), "A1 edited").await.unwrap();
    h.session.delete_messages(&[MessageId(5)]).await.unwrap();
    assert_eq!(
        texts(&h.store),
        vec![
            (1, "Hello {{user}}!".to_string()),
            (2, "Q1".to_string()),
            (3, "A1 edited".to_string()),
            (4, "Q2".to_string()),
        ]
    );

    let truncation = h.session.continue_from(MessageId(2)).await.unwrap();
    assert_eq!(truncation.removed, vec![MessageId(3), MessageId(4)]);
    assert!(h.adapter.remote_calls.lock().unwrap().is_empty());

    let err = h.session.edit_message(MessageId(9), "x").await.unwrap_err();
    assert!(matches!(err, SessionError::Store(ref e) if e.is_not_found()));
}

fn character_ai_harness() -> Harness {
    harness_with(
        ConversationMethod::CharacterAi,
        |record| {
            record.chat_id = Some("chat-1".to_string());
            record.character_id = Some("char-1".to_string());
        },
        Effects::default(),
        settings(),
    )
}

fn snapshot(text: &str, turn: &str) -> ReplyEvent {
    ReplyEvent::Snapshot {
        text: text.to_string(),
        remote: Some(RemoteTurn {
            turn_id: turn.to_string(),
            candidate_id: format!("{turn}-c"),
        }),
    }
}

#[tokio::test]
async fn character_ai_turn_reconciles_with_remote_history() {
    let mut h = character_ai_harness();
    h.adapter
        .remote_chat
        .lock()
        .unwrap()
        .push(remote_message("Aria", false, "Hello Kai!", "g0"));
    h.adapter
        .replies
        .lock()
        .unwrap()
        .push_back(vec![snapshot("Hey", "r1"), snapshot("Hey you", "r1")]);

    let mut sink = RecordingSink::default();
    let outcome = h
        .session
        .handle_user_message("Hi", &mut sink)
        .await
        .unwrap()
        .unwrap();

    let record = h.store.get("Aria").unwrap();
    let messages: Vec<_> = record.chat_content.iter().collect();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|(_, m)| m.turn_id.is_some()));
    assert!(messages.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(outcome.text, "Hey you");
    assert_eq!(outcome.reply, messages[2].0);
    // IDs continue above everything handed out before reconciliation.
    assert!(outcome.reply > MessageId(2));

    let user_id = outcome.user_message.unwrap();
    assert_eq!(user_id, messages[1].0);
    assert_eq!(record.chat_content.get(user_id).unwrap().text, "Hi");
    h.session.edit_message(user_id, "Hi!").await.unwrap();
}

#[tokio::test]
async fn character_ai_reply_is_stored_with_placeholders_resolved() {
    let mut h = character_ai_harness();
    h.adapter
        .remote_chat
        .lock()
        .unwrap()
        .push(remote_message("Aria", false, "Hello {{user}}!", "g0"));
    h.adapter
        .replies
        .lock()
        .unwrap()
        .push_back(vec![snapshot("Hey {{user}}", "r1")]);

    let mut sink = RecordingSink::default();
    let outcome = h
        .session
        .handle_user_message("I'm {{user}}", &mut sink)
        .await
        .unwrap()
        .unwrap();

    let record = h.store.get("Aria").unwrap();
    assert_eq!(outcome.text, "Hey Kai");
    assert_eq!(record.chat_content.get(outcome.reply).unwrap().text, outcome.text);
    let texts: Vec<&str> = record
        .chat_content
        .iter()
        .map(|(_, message)| message.text.as_str())
        .collect();
    assert_eq!(texts, vec!["Hello Kai!", "I'm {{user}}", "Hey Kai"]);
}

#[tokio::test]
async fn deleting_every_message_is_refused_before_any_remote_call() {
    let mut h = harness();
    let err = h.session.delete_messages(&[MessageId(1)]).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Store(StoreError::Ledger {
            source: LedgerError::WouldEmpty,
            ..
        })
    ));
    assert_eq!(texts(&h.store), vec![(1, "Hello {{user}}!".to_string())]);

    let mut h = character_ai_harness();
    h.store
        .reconcile_remote(
            "Aria",
            vec![
                remote_message("Aria", false, "Hello", "t0"),
                remote_message("Kai", true, "Hi", "t1"),
            ],
        )
        .unwrap();
    let ids = h.store.get("Aria").unwrap().chat_content.ids();
    assert!(h.session.delete_messages(&ids).await.is_err());
    assert!(h.adapter.remote_calls.lock().unwrap().is_empty());
    assert_eq!(h.store.get("Aria").unwrap().chat_content.len(), 2);
}

#[tokio::test]
async fn character_ai_edit_goes_remote_first() {
    let mut h = character_ai_harness();
    h.store
        .reconcile_remote(
            "Aria",
            vec![
                remote_message("Aria", false, "Hello", "t0"),
                remote_message("Kai", true, "Hi", "t1"),
            ],
        )
        .unwrap();
    let ids: Vec<MessageId> = h.store.get("Aria").unwrap().chat_content.ids();

    *h.adapter.fail_remote.lock().unwrap() = true;
    let err = h.session.edit_message(ids[1], "Hi!").await.unwrap_err();
    assert!(matches!(err, SessionError::Provider(_)));
    assert_eq!(
        h.store.get("Aria").unwrap().chat_content.get(ids[1]).unwrap().text,
        "Hi"
    );

    *h.adapter.fail_remote.lock().unwrap() = false;
    h.session.edit_message(ids[1], "Hi!").await.unwrap();
    assert_eq!(
        h.store.get("Aria").unwrap().chat_content.get(ids[1]).unwrap().text,
        "Hi!"
    );
    assert_eq!(
        *h.adapter.remote_calls.lock().unwrap(),
        vec!["edit t1 Hi!", "edit t1 Hi!"]
    );
}

#[tokio::test]
async fn character_ai_continue_removes_remote_turns_first() {
    let mut h = character_ai_harness();
    h.store
        .reconcile_remote(
            "Aria",
            vec![
                remote_message("Aria", false, "Hello", "t0"),
                remote_message("Kai", true, "Hi", "t1"),
                remote_message("Aria", false, "Hi there", "t2"),
            ],
        )
        .unwrap();
    let ids = h.store.get("Aria").unwrap().chat_content.ids();

    *h.adapter.fail_remote.lock().unwrap() = true;
    assert!(h.session.continue_from(ids[0]).await.is_err());
    assert_eq!(h.store.get("Aria").unwrap().chat_content.len(), 3);

    *h.adapter.fail_remote.lock().unwrap() = false;
    let truncation = h.session.continue_from(ids[0]).await.unwrap();
    assert_eq!(truncation.removed, vec![ids[1], ids[2]]);
    assert_eq!(
        h.adapter.remote_calls.lock().unwrap().last().unwrap(),
        "delete t1,t2"
    );
}

#[tokio::test]
async fn character_ai_requires_chat_handle() {
    let mut h = harness_with(
        ConversationMethod::CharacterAi,
        |_| {},
        Effects::default(),
        settings(),
    );
    let mut sink = RecordingSink::default();
    let err = h
        .session
        .handle_user_message("Hi", &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Configuration(ConfigurationError::MissingSetting(_))
    ));
}

struct FixedRecognizer(Result<&'static str, &'static str>);

#[async_trait]
impl SpeechRecognizer for FixedRecognizer {
    async fn listen(&self) -> Result<String, ProviderError> {
        self.0
            .map(str::to_string)
            .map_err(|message| ProviderError::Protocol(message.to_string()))
    }
}

#[tokio::test]
async fn recognized_speech_runs_a_turn() {
    let mut h = harness();
    h.adapter.replies.lock().unwrap().push_back(deltas(&["Heard you"]));
    let mut sink = RecordingSink::default();

    let outcome = h
        .session
        .handle_voice_input(&FixedRecognizer(Ok("Good morning")), &mut sink)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.user_message, Some(MessageId(2)));
    assert_eq!(
        texts(&h.store),
        vec![
            (1, "Hello {{user}}!".to_string()),
            (2, "Good morning".to_string()),
            (3, "Heard you".to_string()),
        ]
    );
}

#[tokio::test]
async fn recognition_failure_appends_nothing() {
    let mut h = harness();
    let mut sink = RecordingSink::default();

    let err = h
        .session
        .handle_voice_input(&FixedRecognizer(Err("no microphone")), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Provider(_)));
    assert_eq!(texts(&h.store).len(), 1);
    assert!(sink.events.iter().any(|event| event.contains("no microphone")));
    assert_eq!(h.session.state(), SessionState::Idle);
}
