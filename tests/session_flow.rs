//! End-to-end session behaviour through [`ChatSession`] with a scripted provider.
//!
//! Covers the upload → key → context → seed → stream pipeline, including the
//! guard notices that never reach the model.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use repochat::chat::ChatSession;
use repochat::models::{ChatMessage, Chunk, ChunkPart, ContentPart};
use repochat::provider::{ProviderEvent, ScriptedProvider};
use repochat::session::SEED_NOTE;
use repochat::store::EMPTY_STORE_KEY;
use repochat::stream::{START_NOTICE, UPLOAD_FOLLOWUP_NOTICE};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn setup() -> (TempDir, ChatSession, ScriptedProvider) {
    let tmp = TempDir::new().unwrap();
    let provider = ScriptedProvider::new();
    let session = ChatSession::new(Arc::new(provider.clone()));
    (tmp, session, provider)
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn write_zip(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    for (entry, content) in entries {
        zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path
}

async fn collect(session: &ChatSession, history: &[ChatMessage]) -> Vec<String> {
    session
        .ask(history)
        .map(|s| s.expect("answer stream failed"))
        .collect()
        .await
}

#[tokio::test]
async fn test_upload_single_file() {
    let (tmp, session, _) = setup();
    let path = write_file(tmp.path(), "app.py", "print(1)");

    let summary = session.upload_batch(&[&path]).await;

    let store = session.store_snapshot().await;
    assert_eq!(store.len(), 1);
    let batch = store.batch("app.py").unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch["app.py"], "print(1)");

    let listed: Vec<&str> = summary
        .lines()
        .filter_map(|l| l.strip_prefix("- "))
        .collect();
    assert_eq!(listed, vec!["app.py"]);
}

#[tokio::test]
async fn test_first_question_without_uploads_is_unseeded() {
    let (_tmp, session, provider) = setup();

    let answers = collect(&session, &[ChatMessage::user("hello")]).await;
    assert_eq!(answers.last().unwrap(), "hello");

    assert_eq!(session.current_key().await, EMPTY_STORE_KEY);
    assert_eq!(provider.contexts_created(), 1);
    assert!(provider.seeds().is_empty());
    assert_eq!(
        provider.prompts(),
        vec![("scripted-1".to_string(), "hello".to_string())]
    );
}

#[tokio::test]
async fn test_empty_history_makes_no_remote_call() {
    let (_tmp, session, provider) = setup();

    assert_eq!(collect(&session, &[]).await, vec![START_NOTICE]);
    assert!(provider.events().is_empty());
}

#[tokio::test]
async fn test_archive_skips_unrecognized_entries() {
    let (tmp, session, _) = setup();
    let path = write_zip(
        tmp.path(),
        "lib.zip",
        &[("a.py", "def f(): pass"), ("notes.bin", "\u{0}\u{1}")],
    );

    session.upload(&path).await.unwrap();

    let store = session.store_snapshot().await;
    let batch = store.batch("lib.zip").unwrap();
    assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["a.py"]);
}

#[tokio::test]
async fn test_streamed_answer_snapshots() {
    let (_tmp, session, provider) = setup();
    provider.push_reply(["Hel", "lo", " world"]);

    let answers = collect(&session, &[ChatMessage::user("greet me")]).await;
    assert_eq!(answers, vec!["Hel", "Hello", "Hello world"]);
}

#[tokio::test]
async fn test_upload_acknowledgement_gets_followup_notice() {
    let (tmp, session, provider) = setup();
    let path = write_file(tmp.path(), "app.py", "print(1)");
    let summary = session.upload_batch(&[&path]).await;

    let history = vec![ChatMessage::user(summary)];
    assert_eq!(
        collect(&session, &history).await,
        vec![UPLOAD_FOLLOWUP_NOTICE]
    );
    assert!(provider.events().is_empty());
}

#[tokio::test]
async fn test_seeding_happens_once_before_first_prompt() {
    let (tmp, session, provider) = setup();
    let archive = write_zip(tmp.path(), "lib.zip", &[("a.py", "x = 1"), ("b.md", "# B")]);
    let history_head = ChatMessage::user(session.upload_batch(&[&archive]).await);

    let mut history = vec![history_head, ChatMessage::user("what is x?")];
    collect(&session, &history).await;
    history.push(ChatMessage::assistant("x"));
    history.push(ChatMessage::user("and b?"));
    collect(&session, &history).await;

    let events = provider.events();
    assert!(matches!(events[0], ProviderEvent::ContextCreated { .. }));
    match &events[1] {
        ProviderEvent::Seeded { parts, .. } => {
            assert_eq!(
                parts,
                &vec![
                    ContentPart::File {
                        mime_type: "text/x-python".to_string(),
                        data: "File: a.py\n\nx = 1".to_string(),
                    },
                    ContentPart::File {
                        mime_type: "text/plain".to_string(),
                        data: "File: b.md\n\n# B".to_string(),
                    },
                    ContentPart::Text(SEED_NOTE.to_string()),
                ]
            );
        }
        other => panic!("expected seeding second, got {:?}", other),
    }
    assert!(matches!(events[2], ProviderEvent::Prompt { .. }));
    assert!(matches!(events[3], ProviderEvent::Prompt { .. }));
    assert_eq!(events.len(), 4);
}

#[tokio::test]
async fn test_new_upload_switches_to_new_context() {
    let (tmp, session, provider) = setup();
    let first = write_file(tmp.path(), "a.py", "a = 1");
    let second = write_file(tmp.path(), "b.py", "b = 2");

    session.upload(&first).await.unwrap();
    collect(&session, &[ChatMessage::user("q1")]).await;
    session.upload(&second).await.unwrap();
    collect(&session, &[ChatMessage::user("q2")]).await;

    assert_eq!(session.current_key().await, "a.py,b.py");
    assert_eq!(provider.contexts_created(), 2);

    // The second context is seeded with every stored batch.
    let seeds = provider.seeds();
    assert_eq!(seeds.len(), 2);
    assert_eq!(seeds[1].0, "scripted-2");
    assert_eq!(seeds[1].1.len(), 3);
}

#[tokio::test]
async fn test_same_name_reupload_reuses_context_without_reseeding() {
    let (tmp, session, provider) = setup();
    let path = write_file(tmp.path(), "app.py", "print(1)");
    session.upload(&path).await.unwrap();
    collect(&session, &[ChatMessage::user("q1")]).await;

    std::fs::write(&path, "print(2)").unwrap();
    session.upload(&path).await.unwrap();
    collect(&session, &[ChatMessage::user("q2")]).await;

    assert_eq!(provider.contexts_created(), 1);
    assert_eq!(provider.seeds().len(), 1);
    let store = session.store_snapshot().await;
    assert_eq!(store.batch("app.py").unwrap()["app.py"], "print(2)");
}

#[tokio::test]
async fn test_non_text_parts_are_ignored() {
    let (_tmp, session, provider) = setup();
    provider.push_chunks(vec![
        Chunk {
            parts: vec![ChunkPart { text: None }],
        },
        Chunk::from_texts(["only text"]),
    ]);

    let answers = collect(&session, &[ChatMessage::user("q")]).await;
    assert_eq!(answers, vec!["only text"]);
}

#[tokio::test]
async fn test_remote_failure_keeps_partial_answer_and_session() {
    let (_tmp, session, provider) = setup();
    provider.push_failure_after(["par", "tial"], "quota exceeded");
    provider.push_reply(["retry ok"]);

    let items: Vec<anyhow::Result<String>> =
        session.ask(&[ChatMessage::user("q")]).collect().await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), "par");
    assert_eq!(items[1].as_ref().unwrap(), "partial");
    let err = items[2].as_ref().unwrap_err();
    assert!(format!("{:#}", err).contains("quota exceeded"));

    let answers = collect(&session, &[ChatMessage::user("q")]).await;
    assert_eq!(answers, vec!["retry ok"]);
    assert_eq!(provider.contexts_created(), 1);
}

#[tokio::test]
async fn test_rejected_stream_is_an_error_item() {
    let (_tmp, session, provider) = setup();
    provider.push_rejection("permission denied");

    let items: Vec<anyhow::Result<String>> =
        session.ask(&[ChatMessage::user("q")]).collect().await;
    assert_eq!(items.len(), 1);
    assert!(items[0].is_err());
}

#[tokio::test]
async fn test_abandoned_stream_leaves_session_usable() {
    let (_tmp, session, provider) = setup();
    provider.push_reply(["one ", "two ", "three"]);

    {
        let mut answers = session.ask(&[ChatMessage::user("count")]);
        assert_eq!(answers.next().await.unwrap().unwrap(), "one ");
    }

    provider.push_reply(["next"]);
    let answers = collect(&session, &[ChatMessage::user("again")]).await;
    assert_eq!(answers, vec!["next"]);
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let (tmp, session, provider) = setup();
    let path = write_file(tmp.path(), "app.py", "print(1)");
    session.upload(&path).await.unwrap();
    collect(&session, &[ChatMessage::user("q")]).await;

    session.reset().await;

    assert_eq!(session.current_key().await, EMPTY_STORE_KEY);
    assert!(session.store_snapshot().await.is_empty());
    collect(&session, &[ChatMessage::user("q")]).await;
    assert_eq!(provider.contexts_created(), 2);
    assert_eq!(provider.seeds().len(), 1);
}
