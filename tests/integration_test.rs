// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Whole-stack smoke tests: configs on disk through to a completed turn,
//! using the offline mock provider.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crew_config::{load_agents_file, load_global_config};
use crew_core::{AgentManager, ChatSession};
use crew_model::{ModelRegistry, Part, Role};
use crew_store::ConversationStore;
use crew_tools::{AgentScope, ToolRegistry, ToolSource};

fn write_file(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread")]
async fn configs_to_completed_turn_on_the_mock_provider() {
    let dir = tempfile::tempdir().unwrap();

    let global_path = write_file(
        dir.path(),
        "config.json",
        &format!(
            r#"{{ "conversation_dir": "{}" }}"#,
            dir.path().join("conversations").display()
        ),
    );
    let agents_path = write_file(
        dir.path(),
        "agents.toml",
        r#"
        [[agents]]
        name = "Echo"
        description = "Repeats things"
        tools = ["transfer"]
        system_prompt = "Echo the user verbatim. Today is {current_date}."
        "#,
    );

    let config = Arc::new(load_global_config(Some(&global_path)).unwrap());
    let agents = load_agents_file(&agents_path).unwrap();

    let models = Arc::new(ModelRegistry::from_config(&config).unwrap());
    models.set_current("mock-model").unwrap();

    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(
            Arc::new(crew_core::TransferTool),
            ToolSource::Builtin,
            AgentScope::All,
        )
        .unwrap();

    let store = Arc::new(
        ConversationStore::new(config.conversation_dir.clone().unwrap()).unwrap(),
    );
    let manager = AgentManager::new(&agents.agents, models, tools, config).unwrap();
    let mut session = ChatSession::new(manager, Arc::clone(&store));
    session.select_agent("Echo").unwrap();

    let (tx, _rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    session
        .run_turn(vec![Part::Text { text: "ping".into() }], &tx, &cancel)
        .await
        .unwrap();

    // The mock echoes; the whole exchange is durable.
    let history = &session.manager.agent("Echo").unwrap().history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text(), "ping");

    let stored = store.load(&session.conversation.id).unwrap();
    assert_eq!(stored.histories["Echo"], *history);
    assert_eq!(stored.turn_log.len(), 1);
    assert_eq!(stored.title, "ping");
}

#[tokio::test]
async fn malformed_agents_file_fails_before_any_network_use() {
    let dir = tempfile::tempdir().unwrap();
    let agents_path = write_file(dir.path(), "agents.toml", "agents = [ {");
    assert!(load_agents_file(&agents_path).is_err());
}
