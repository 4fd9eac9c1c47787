//! End-to-end tests of the nl2sh session pipeline.
//! The completion service is scripted; one live test runs when OPENAI_API_KEY is set.

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use nl2sh::credentials::Language;
    use nl2sh::{
        CompletionClient, CompletionRequest, Credentials, DataLayout, Error, Invocation,
        ModerationClient, OpenAi, RecordingRenderer, Renderer, Result, Role, Session,
        SessionController, ShellType, Snapshot,
    };

    #[derive(Default)]
    struct Script {
        responses: Mutex<VecDeque<String>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[derive(Clone, Default)]
    struct ScriptedClient {
        script: Arc<Script>,
    }

    impl ScriptedClient {
        fn with_responses(responses: &[&str]) -> Self {
            let client = Self::default();
            client
                .script
                .responses
                .lock()
                .unwrap()
                .extend(responses.iter().map(|r| r.to_string()));
            client
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.script.requests.lock().unwrap().clone()
        }

        fn next(&self, request: CompletionRequest) -> String {
            self.script.requests.lock().unwrap().push(request);
            self.script
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            Ok(self.next(request))
        }

        async fn complete_streaming(
            &self,
            request: CompletionRequest,
            renderer: &mut dyn Renderer,
        ) -> Result<String> {
            let text = self.next(request);
            let mut received = String::new();
            for piece in text.split_inclusive(' ') {
                renderer.print_text(piece);
                received.push_str(piece);
                if renderer.should_interrupt() {
                    renderer.print_interrupted();
                    return Err(Error::abort("interrupted by user"));
                }
            }
            renderer.finish_response();
            Ok(received)
        }
    }

    struct FixedModeration(Result<bool>);

    #[async_trait]
    impl ModerationClient for FixedModeration {
        async fn is_flagged(&self, _text: &str) -> Result<bool> {
            self.0.clone()
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            api_key: "sk-test".to_string(),
            organization: None,
            model: "m1".to_string(),
            language: Language::English,
        }
    }

    fn open(
        dir: &tempfile::TempDir,
        shell: ShellType,
        client: &ScriptedClient,
    ) -> SessionController {
        let session = Session::new(DataLayout::new(dir.path()), shell, credentials());
        SessionController::open(session, Box::new(client.clone())).unwrap()
    }

    fn transcript(dir: &tempfile::TempDir) -> String {
        std::fs::read_to_string(DataLayout::new(dir.path()).transcript()).unwrap()
    }

    #[tokio::test]
    async fn multi_turn_replays_previous_turns() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["# list\nls -la\n", "# count\nls | wc -l\n"]);
        let mut controller = open(&dir, ShellType::Bash, &client);
        let mut renderer = RecordingRenderer::new();

        let started = controller
            .run("# start multi-turn", &mut renderer)
            .await
            .unwrap();
        assert_eq!(
            started,
            Invocation::Command("Multi turn mode is on".to_string())
        );

        let first = controller.run("# list files\n", &mut renderer).await.unwrap();
        let Invocation::Query(first) = first else {
            panic!("expected a query");
        };
        assert!(first.appended);
        assert_eq!(controller.buffer().config().token_count, 7);
        assert_eq!(transcript(&dir), "# list files\n# list\nls -la\n");

        controller.run("# count them\n", &mut renderer).await.unwrap();
        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].model, "m1");
        assert_eq!(requests[1].messages[0].role, Role::System);
        assert_eq!(
            requests[1].messages[1].content,
            "#!/bin/bash\n\n# list files\n# list\nls -la\n# count them\n"
        );
        assert_eq!(renderer.text, "# list\nls -la\n# count\nls | wc -l\n");
        assert_eq!(renderer.finished, 2);
    }

    #[tokio::test]
    async fn single_turn_does_not_append() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["# greet\necho hi\n"]);
        let mut controller = open(&dir, ShellType::Zsh, &client);
        let mut renderer = RecordingRenderer::new();

        let outcome = controller.run("# say hi\n", &mut renderer).await.unwrap();
        let Invocation::Query(outcome) = outcome else {
            panic!("expected a query");
        };
        assert!(!outcome.appended);
        assert_eq!(outcome.response, "# greet\necho hi\n");
        assert_eq!(transcript(&dir), "");
        assert_eq!(controller.buffer().config().token_count, 0);
        assert!(
            client.requests()[0].messages[1]
                .content
                .starts_with("#!/bin/zsh\n\n")
        );
    }

    #[tokio::test]
    async fn directives_never_reach_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::default();
        let mut controller = open(&dir, ShellType::Bash, &client);
        let mut renderer = RecordingRenderer::new();

        for directive in ["# set model gpt-4o-mini", "# show config", "# set temperature 9"] {
            let outcome = controller.run(directive, &mut renderer).await.unwrap();
            assert!(matches!(outcome, Invocation::Command(_)));
        }
        assert!(client.requests().is_empty());
        assert_eq!(controller.buffer().config().model, "gpt-4o-mini");
        assert_eq!(controller.buffer().config().temperature, 0.0);
        assert_eq!(renderer.errors.len(), 1);
    }

    #[tokio::test]
    async fn unknown_verb_is_a_query() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["# frob\nfrob --all\n"]);
        let mut controller = open(&dir, ShellType::Bash, &client);
        let mut renderer = RecordingRenderer::new();

        let outcome = controller
            .run("# frobnicate the widgets", &mut renderer)
            .await
            .unwrap();
        assert!(matches!(outcome, Invocation::Query(_)));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_query_aborts_before_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["unused"]);
        let mut controller = open(&dir, ShellType::Bash, &client);
        let mut renderer = RecordingRenderer::new();

        let err = controller.run("  \n", &mut renderer).await.unwrap_err();
        assert!(err.is_empty_query());
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn flagged_response_is_redacted_and_not_appended() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["# bad\nrm -rf /\n"]);
        let mut controller =
            open(&dir, ShellType::Bash, &client).with_moderation(Box::new(FixedModeration(Ok(true))));
        let mut renderer = RecordingRenderer::new();
        controller
            .run("# start multi-turn", &mut renderer)
            .await
            .unwrap();

        let outcome = controller.run("# wipe it\n", &mut renderer).await.unwrap();
        let Invocation::Query(outcome) = outcome else {
            panic!("expected a query");
        };
        assert!(outcome.flagged);
        assert!(!outcome.appended);
        assert_eq!(renderer.text, "");
        assert!(renderer.saw_info("Sensitive content detected"));
        assert_eq!(transcript(&dir), "");
    }

    #[tokio::test]
    async fn moderation_failure_counts_as_not_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["# here\npwd\n"]);
        let moderation = FixedModeration(Err(Error::connection("moderation down", None)));
        let mut controller =
            open(&dir, ShellType::Bash, &client).with_moderation(Box::new(moderation));
        let mut renderer = RecordingRenderer::new();

        let outcome = controller.run("# where am i\n", &mut renderer).await.unwrap();
        let Invocation::Query(outcome) = outcome else {
            panic!("expected a query");
        };
        assert!(!outcome.flagged);
        assert_eq!(renderer.text, "# here\npwd\n");
    }

    #[tokio::test]
    async fn streaming_appends_full_response() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["# disk\ndf -h .\n"]);
        let mut controller = open(&dir, ShellType::Bash, &client).with_streaming(true);
        let mut renderer = RecordingRenderer::new();
        controller
            .run("# start multi-turn", &mut renderer)
            .await
            .unwrap();

        controller.run("# disk usage\n", &mut renderer).await.unwrap();
        assert_eq!(renderer.text, "# disk\ndf -h .\n");
        assert_eq!(transcript(&dir), "# disk usage\n# disk\ndf -h .\n");
    }

    #[tokio::test]
    async fn interrupted_stream_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["# many words here\nls -la\n"]);
        let mut controller = open(&dir, ShellType::Bash, &client).with_streaming(true);
        let mut setup = RecordingRenderer::new();
        controller.run("# start multi-turn", &mut setup).await.unwrap();

        let mut renderer = RecordingRenderer::new().interrupt_after(1);
        let err = controller
            .run("# list everything\n", &mut renderer)
            .await
            .unwrap_err();
        assert!(err.is_abort());
        assert!(renderer.interrupted);
        assert_eq!(transcript(&dir), "");
        assert_eq!(controller.buffer().config().token_count, 0);
    }

    #[tokio::test]
    async fn unknown_shell_warns_and_sends_no_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::with_responses(&["# x\nx\n"]);
        let mut controller = open(&dir, ShellType::Unknown, &client);
        let mut renderer = RecordingRenderer::new();

        controller.run("# do x\n", &mut renderer).await.unwrap();
        assert!(renderer.saw_info("Unsupported shell type"));
        assert_eq!(client.requests()[0].messages[1].content, "# do x\n");
    }

    #[tokio::test]
    async fn startup_loads_shell_snapshot_body() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let snapshot = Snapshot {
            config: nl2sh::SessionConfig::new("other-model", ShellType::Zsh),
            body: "# show time\ndate\n".to_string(),
        };
        let path = layout.snapshot("zsh-context").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, snapshot.render()).unwrap();

        let client = ScriptedClient::with_responses(&["# x\nx\n"]);
        let controller = open(&dir, ShellType::Zsh, &client);
        assert_eq!(transcript(&dir), "# show time\ndate\n");
        assert_eq!(controller.buffer().config().model, "m1");
    }

    #[tokio::test]
    async fn live_completion() {
        let Ok(api_key) = std::env::var("OPENAI_API_KEY") else {
            eprintln!("Skipping test: OPENAI_API_KEY not set");
            return;
        };
        let credentials = Credentials {
            api_key,
            organization: None,
            model: "gpt-4o-mini".to_string(),
            language: Language::English,
        };
        let client = OpenAi::new(&credentials).expect("Failed to create client");
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(DataLayout::new(dir.path()), ShellType::Bash, credentials);
        let mut controller = SessionController::open(session, Box::new(client)).unwrap();
        let mut renderer = RecordingRenderer::new();
        let outcome = controller
            .run("# print the current directory\n", &mut renderer)
            .await;
        assert!(outcome.is_ok(), "Request should succeed with valid API key");
    }
}
