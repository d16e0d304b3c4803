use super::*;
use std::fs;
use tempfile::TempDir;

mod test_helpers {
    use super::*;

    pub(super) fn parse_args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv)
            .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
    }

    pub(super) fn write_card(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(format!("{name}.json"));
        let card = serde_json::json!({
            "spec": "chara_card_v2",
            "spec_version": "2.0",
            "data": { "name": name, "first_mes": "Hello, {{user}}!" }
        });
        fs::write(&path, card.to_string()).unwrap();
        path
    }

    pub(super) fn texts(paths: &DataPaths, name: &str) -> Vec<(u64, String)> {
        CharacterStore::new(paths.characters_path())
            .get(name)
            .unwrap()
            .chat_content
            .iter()
            .map(|(id, message)| (id.0, message.text.clone()))
            .collect()
    }
}

use test_helpers::{parse_args, texts, write_card};

#[test]
fn test_add_defaults_to_mistral() {
    let args = parse_args(&["soul-of-waifu", "add", "--card", "aria.json"]);
    match args.command {
        Commands::Add { card, method } => {
            assert_eq!(card, PathBuf::from("aria.json"));
            assert_eq!(method, ConversationMethod::MistralAi);
        }
        _ => panic!("expected add command"),
    }
}

#[test]
fn test_method_accepts_ids_and_display_names() {
    let cases: [(&[&str], ConversationMethod); 3] = [
        (
            &["soul-of-waifu", "add", "-c", "a.json", "-m", "openrouter"],
            ConversationMethod::OpenRouter,
        ),
        (
            &["soul-of-waifu", "add", "-c", "a.json", "-m", "Local LLM"],
            ConversationMethod::LocalLlm,
        ),
        (
            &["soul-of-waifu", "add", "-c", "a.json", "--method", "OPENAI"],
            ConversationMethod::OpenAi,
        ),
    ];
    for (argv, expected) in cases {
        match parse_args(argv).command {
            Commands::Add { method, .. } => {
                assert_eq!(method, expected, "unexpected method for argv={argv:?}")
            }
            _ => panic!("expected add command for argv={argv:?}"),
        }
    }

    let err = Args::try_parse_from(["soul-of-waifu", "add", "-c", "a.json", "-m", "gemini"])
        .err()
        .expect("unknown method should be rejected");
    assert!(err.to_string().contains("unknown conversation method"));
}

#[test]
fn test_edit_joins_words_and_delete_takes_many_ids() {
    match parse_args(&["soul-of-waifu", "edit", "Aria", "3", "Good", "-", "morning"]).command {
        Commands::Edit { name, id, text } => {
            assert_eq!(name, "Aria");
            assert_eq!(id, MessageId(3));
            assert_eq!(text.join(" "), "Good - morning");
        }
        _ => panic!("expected edit command"),
    }

    match parse_args(&["soul-of-waifu", "delete", "Aria", "2", "3"]).command {
        Commands::Delete { ids, .. } => assert_eq!(ids, vec![MessageId(2), MessageId(3)]),
        _ => panic!("expected delete command"),
    }

    assert!(Args::try_parse_from(["soul-of-waifu", "delete", "Aria"]).is_err());
    assert!(Args::try_parse_from(["soul-of-waifu", "delete", "Aria", "two"]).is_err());
}

#[test]
fn test_global_flags_after_subcommand() {
    let args = parse_args(&[
        "soul-of-waifu",
        "continue-from",
        "Aria",
        "4",
        "--data-dir",
        "/tmp/sow",
        "-l",
        "sow.log",
    ]);
    assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/sow")));
    assert_eq!(args.log, Some(PathBuf::from("sow.log")));
    assert!(matches!(
        args.command,
        Commands::ContinueFrom { id: MessageId(4), .. }
    ));
}

#[tokio::test]
async fn test_history_commands_work_without_provider_tokens() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::new(dir.path().join("data"));
    let card = write_card(&dir, "Aria");

    run(
        Commands::Add {
            card,
            method: ConversationMethod::OpenRouter,
        },
        &paths,
    )
    .await
    .unwrap();

    let store = CharacterStore::new(paths.characters_path());
    store.append("Aria", "Sam", true, "Hi").unwrap();
    store.append("Aria", "Aria", false, "How are you?").unwrap();
    store.append("Aria", "Sam", true, "Fine").unwrap();

    run(
        Commands::Edit {
            name: "Aria".to_string(),
            id: MessageId(2),
            text: vec!["Hi".to_string(), "there".to_string()],
        },
        &paths,
    )
    .await
    .unwrap();
    run(
        Commands::ContinueFrom {
            name: "Aria".to_string(),
            id: MessageId(3),
        },
        &paths,
    )
    .await
    .unwrap();
    run(
        Commands::Delete {
            name: "Aria".to_string(),
            ids: vec![MessageId(3)],
        },
        &paths,
    )
    .await
    .unwrap();

    assert_eq!(
        texts(&paths, "Aria"),
        vec![
            (1, "Hello, {{user}}!".to_string()),
            (2, "Hi there".to_string()),
        ]
    );

    run(Commands::List, &paths).await.unwrap();
    run(
        Commands::Remove {
            name: "Aria".to_string(),
        },
        &paths,
    )
    .await
    .unwrap();
    assert!(run(
        Commands::Show {
            name: "Aria".to_string()
        },
        &paths
    )
    .await
    .is_err());
}

#[tokio::test]
async fn test_unknown_message_id_is_an_error() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::new(dir.path());
    let card = write_card(&dir, "Mira");
    run(
        Commands::Add {
            card,
            method: ConversationMethod::MistralAi,
        },
        &paths,
    )
    .await
    .unwrap();

    let err = run(
        Commands::Delete {
            name: "Mira".to_string(),
            ids: vec![MessageId(1), MessageId(9)],
        },
        &paths,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains('9'), "unexpected error: {err}");
    assert_eq!(texts(&paths, "Mira").len(), 1);
}

#[tokio::test]
async fn test_cards_cannot_create_character_ai_characters() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::new(dir.path());
    let card = write_card(&dir, "Aria");
    assert!(run(
        Commands::Add {
            card,
            method: ConversationMethod::CharacterAi,
        },
        &paths,
    )
    .await
    .is_err());
}

#[tokio::test]
async fn test_add_cai_requires_token() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::new(dir.path());
    let err = run(
        Commands::AddCai {
            character_id: "abc".to_string(),
        },
        &paths,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains(character_ai::TOKEN_KEY));
}

#[tokio::test]
async fn test_set_token_persists_to_api_json() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::new(dir.path());
    run(
        Commands::SetToken {
            key: "mistral_api_token".to_string(),
            value: "sk-test".to_string(),
        },
        &paths,
    )
    .await
    .unwrap();

    let tokens = ConfigOrchestrator::new(&paths).tokens().unwrap();
    assert_eq!(tokens.get("mistral_api_token"), Some("sk-test"));
    assert!(paths.api_path().exists());
}
