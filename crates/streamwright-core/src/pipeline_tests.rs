//! End-to-end tests for the response pipeline
//!
//! These tests verify that:
//! - Engine events drive streamed edits onto files on disk
//! - Finishing one exchange leaves a concurrent exchange open
//! - Cancelling an exchange stops its edits and closes its response
//! - Session responses record the edits and survive a snapshot

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::config::PipelineConfig;
    use crate::document::{DocumentHost, Range, WorkspaceDocuments};
    use crate::events::{parse_event, ApplyEditsRequest, EditedCodeStreamingRequest};
    use crate::pipeline::ResponsePipeline;
    use crate::router::Routing;
    use crate::stream::{create_sink_channel, CloseReason, RegistrationPolicy, SinkMessage, SinkUpdate};
    use crate::types::{ExchangeId, SessionId, StreamKey};

    struct Fixture {
        _temp: TempDir,
        host: Arc<WorkspaceDocuments>,
        pipeline: ResponsePipeline,
        path: PathBuf,
    }

    fn fixture(content: &str) -> Fixture {
        fixture_with(content, PipelineConfig::default())
    }

    fn fixture_with(content: &str, config: PipelineConfig) -> Fixture {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("lib.rs");
        std::fs::write(&path, content).expect("Failed to write fixture");
        let host = Arc::new(WorkspaceDocuments::new(temp.path()));
        let pipeline = ResponsePipeline::new(host.clone(), config);
        Fixture {
            _temp: temp,
            host,
            pipeline,
            path,
        }
    }

    fn range_json(range: &Range) -> serde_json::Value {
        serde_json::to_value(range).unwrap()
    }

    fn edit_line(
        key: &StreamKey,
        id: &str,
        path: &Path,
        range: &Range,
        event: serde_json::Value,
    ) -> String {
        json!({
            "request_id": key.session_id,
            "exchange_id": key.exchange_id,
            "event": {"SymbolEventSubStep": {
                "symbol_identifier": {"symbol_name": "target", "fs_file_path": path},
                "event": {"Edit": {"EditCodeStreaming": {
                    "edit_request_id": id,
                    "session_id": key.session_id,
                    "exchange_id": key.exchange_id,
                    "fs_file_path": path,
                    "range": range_json(range),
                    "event": event,
                    "apply_directly": false
                }}}
            }}
        })
        .to_string()
    }

    fn chat_line(key: &StreamKey, so_far: &str, delta: &str) -> String {
        json!({
            "request_id": key.session_id,
            "exchange_id": key.exchange_id,
            "event": {"ChatEvent": {"answer_up_until_now": so_far, "delta": delta}}
        })
        .to_string()
    }

    fn finished_line(key: &StreamKey) -> String {
        json!({
            "request_id": key.session_id,
            "exchange_id": key.exchange_id,
            "event": {"ExchangeEvent": {"FinishedExchange": {
                "exchange_id": key.exchange_id,
                "session_id": key.session_id
            }}}
        })
        .to_string()
    }

    fn open(f: &Fixture, session: &str, exchange: &str) -> (StreamKey, UnboundedReceiver<SinkMessage>) {
        let session_id = SessionId::from(session);
        if !f.pipeline.sessions().has_session(&session_id) {
            f.pipeline.sessions().create_session(Some(session_id.clone()));
        }
        let rx = f
            .pipeline
            .sessions()
            .open_exchange(&session_id, ExchangeId::from(exchange))
            .unwrap();
        (StreamKey::new(session, exchange), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SinkMessage>) -> Vec<SinkUpdate> {
        let mut updates = Vec::new();
        while let Ok(message) = rx.try_recv() {
            updates.push(message.update);
        }
        updates
    }

    #[tokio::test]
    async fn test_streamed_edit_from_events() {
        let f = fixture("keep\nold one\nold two\ntail\n");
        let (key, mut rx) = open(&f, "s1", "e1");
        let range = Range::lines(1, 2, 7);

        let lines = vec![
            chat_line(&key, "", "Rewriting the middle."),
            edit_line(&key, "r1", &f.path, &range, json!("Start")),
            edit_line(&key, "r1", &f.path, &range, json!({"Delta": "Hello, "})),
            edit_line(&key, "r1", &f.path, &range, json!({"Delta": "world\nSec"})),
            edit_line(&key, "r1", &f.path, &range, json!({"Delta": "ond line\n"})),
            edit_line(&key, "r1", &f.path, &range, json!("End")),
            finished_line(&key),
        ];
        let stats = f.pipeline.consume(futures::stream::iter(lines)).await;
        assert_eq!(stats.malformed, 0);
        assert_eq!(stats.dropped, 0);

        assert_eq!(
            std::fs::read_to_string(&f.path).unwrap(),
            "keep\nHello, world\nSecond line\ntail\n"
        );

        let updates = drain(&mut rx);
        assert!(matches!(updates.first(), Some(SinkUpdate::EditsInfo(_))));
        assert_eq!(updates.last(), Some(&SinkUpdate::Closed(CloseReason::Finished)));
        let edits = updates
            .iter()
            .filter(|u| matches!(u, SinkUpdate::CodeEdit(_)))
            .count();
        assert_eq!(edits, 2);

        let session = f.pipeline.sessions().get_session(&key.session_id).unwrap();
        let response = session.model.response(&key.exchange_id).unwrap();
        assert!(response.is_complete());
        assert_eq!(response.repr(), "Rewriting the middle.\n\nMade changes.");
        assert!(!f.pipeline.registry().contains(&key));
    }

    #[tokio::test]
    async fn test_shrink_through_pipeline() {
        let f = fixture("L0\nL1\nL2\nL3\nL4");
        let (key, _rx) = open(&f, "s1", "e1");
        let range = Range::lines(1, 3, 0);

        let request = |event: serde_json::Value| -> EditedCodeStreamingRequest {
            let line = edit_line(&key, "r1", &f.path, &range, event);
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            serde_json::from_value(
                value["event"]["SymbolEventSubStep"]["event"]["Edit"]["EditCodeStreaming"].clone(),
            )
            .unwrap()
        };

        assert!(f.pipeline.provide_edit_streamed(&request(json!("Start"))).await.success);
        f.pipeline
            .provide_edit_streamed(&request(json!({"Delta": "X\n"})))
            .await;
        assert!(f.pipeline.provide_edit_streamed(&request(json!("End"))).await.success);

        assert_eq!(std::fs::read_to_string(&f.path).unwrap(), "L0\nX\nL3\nL4");
    }

    #[tokio::test]
    async fn test_control_surface_end_is_idempotent() {
        let f = fixture("a\nb\nc");
        let (key, _rx) = open(&f, "s1", "e1");
        let request: EditedCodeStreamingRequest = serde_json::from_value(json!({
            "edit_request_id": "r1",
            "session_id": key.session_id,
            "exchange_id": key.exchange_id,
            "fs_file_path": f.path,
            "range": range_json(&Range::lines(2, 2, 1)),
            "event": "Start"
        }))
        .unwrap();

        assert!(f.pipeline.begin_edit_request(&request).await.success);
        f.pipeline.feed_edit_delta(&"r1".into(), "C\nD").await;
        assert!(f.pipeline.end_edit_request(&"r1".into()).await.success);
        assert!(!f.pipeline.end_edit_request(&"r1".into()).await.success);

        assert_eq!(std::fs::read_to_string(&f.path).unwrap(), "a\nb\nC\nD");
    }

    #[tokio::test]
    async fn test_concurrent_exchanges_finish_independently() {
        let f = fixture("");
        let (e1, mut rx1) = open(&f, "s1", "e1");
        let (e2, mut rx2) = open(&f, "s1", "e2");

        let route = |line: String| {
            let pipeline = &f.pipeline;
            async move { pipeline.route_event(&parse_event(&line).unwrap()).await }
        };

        route(chat_line(&e1, "x", "one")).await;
        route(chat_line(&e2, "x", "two")).await;
        assert_eq!(route(finished_line(&e1)).await, Routing::Delivered);
        assert_eq!(route(chat_line(&e2, "x", " more")).await, Routing::Delivered);
        assert_eq!(route(chat_line(&e1, "x", "late")).await, Routing::Dropped);

        assert!(!f.pipeline.registry().contains(&e1));
        assert!(f.pipeline.registry().contains(&e2));
        assert_eq!(
            drain(&mut rx1),
            vec![
                SinkUpdate::Markdown("one".to_string()),
                SinkUpdate::Closed(CloseReason::Finished),
            ]
        );
        assert_eq!(
            drain(&mut rx2),
            vec![
                SinkUpdate::Markdown("two".to_string()),
                SinkUpdate::Markdown(" more".to_string()),
            ]
        );

        let session = f.pipeline.sessions().get_session(&e2.session_id).unwrap();
        assert!(session.model.request_in_progress());
    }

    #[tokio::test]
    async fn test_cancel_exchange_abandons_edits() {
        let f = fixture("a\nb\nc");
        let (key, mut rx) = open(&f, "s1", "e1");
        let range = Range::lines(0, 2, 1);
        let route = |event: serde_json::Value| {
            let line = edit_line(&key, "r1", &f.path, &range, event);
            let pipeline = &f.pipeline;
            async move { pipeline.route_event(&parse_event(&line).unwrap()).await }
        };

        route(json!("Start")).await;
        route(json!({"Delta": "A\n"})).await;
        assert!(f.pipeline.cancel_exchange(&key).await);
        assert_eq!(route(json!({"Delta": "B\n"})).await, Routing::Dropped);
        assert!(!f.pipeline.end_edit_request(&"r1".into()).await.success);

        // Applied lines stay in the open document, nothing reaches disk
        assert_eq!(f.host.text(&f.path).await.unwrap(), "A\nb\nc");
        assert_eq!(std::fs::read_to_string(&f.path).unwrap(), "a\nb\nc");
        assert!(f.pipeline.edits().lease_holder(&f.path).is_none());

        let updates = drain(&mut rx);
        assert_eq!(updates.last(), Some(&SinkUpdate::Closed(CloseReason::Canceled)));
        let session = f.pipeline.sessions().get_session(&key.session_id).unwrap();
        assert!(session.model.response(&key.exchange_id).unwrap().is_canceled());
    }

    #[tokio::test]
    async fn test_provide_edit_echoes_to_exchange() {
        let f = fixture("fn main() {\n    println!(\"hi\");\n}\n");
        let (sink, mut rx) = create_sink_channel(StreamKey::new("s1", "e1"));
        let key = StreamKey::new("s1", "e1");
        f.pipeline.register_sink(key.clone(), sink).unwrap();

        let request = ApplyEditsRequest {
            fs_file_path: f.path.display().to_string(),
            edited_content: "    println!(\"bye\");".to_string(),
            selected_range: Range::lines(1, 1, 18),
            apply_directly: true,
        };
        let outcome = f.pipeline.provide_edit(&request, Some(&key)).await;
        assert!(outcome.success);
        assert_eq!(outcome.fs_file_path, f.path.display().to_string());
        assert_eq!(
            std::fs::read_to_string(&f.path).unwrap(),
            "fn main() {\n    println!(\"bye\");\n}\n"
        );
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SinkUpdate::CodeEdit(_)]
        ));
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_second_sink() {
        let mut config = PipelineConfig::default();
        config.registry.policy = RegistrationPolicy::Reject;
        let f = fixture_with("", config);
        let key = StreamKey::new("s1", "e1");

        let (first, _rx1) = create_sink_channel(key.clone());
        let (second, _rx2) = create_sink_channel(key.clone());
        assert!(f.pipeline.register_sink(key.clone(), first).is_ok());
        assert!(f.pipeline.register_sink(key, second).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_after_streamed_exchange() {
        let f = fixture("x\n");
        let (key, _rx) = open(&f, "s1", "e1");
        let range = Range::lines(0, 0, 1);
        let lines = vec![
            chat_line(&key, "x", "Renamed it."),
            edit_line(&key, "r1", &f.path, &range, json!("Start")),
            edit_line(&key, "r1", &f.path, &range, json!({"Delta": "y\n"})),
            edit_line(&key, "r1", &f.path, &range, json!("End")),
            finished_line(&key),
        ];
        f.pipeline.consume(futures::stream::iter(lines)).await;

        let json = f.pipeline.sessions().export_session(&key.session_id).unwrap();
        f.pipeline.sessions().remove_session(&key.session_id);
        let restored = f.pipeline.sessions().import_session(&json).unwrap();
        let response = restored.model.response(&key.exchange_id).unwrap();
        assert_eq!(response.repr(), "Renamed it.\n\nMade changes.");
        assert!(response.has_edit_groups());
    }

    #[tokio::test]
    async fn test_shutdown_drops_new_events() {
        let f = fixture("");
        let (key, _rx) = open(&f, "s1", "e1");
        f.pipeline.shutdown();
        let routing = f
            .pipeline
            .route_event(&parse_event(&chat_line(&key, "x", "late")).unwrap())
            .await;
        assert_eq!(routing, Routing::Dropped);
    }

    #[tokio::test]
    async fn test_host_close_releases_exchange() {
        let f = fixture("");
        let (key, mut rx) = open(&f, "s1", "e1");

        assert!(f.pipeline.close_exchange(&key, CloseReason::Finished).await);
        assert!(!f.pipeline.registry().contains(&key));
        assert!(!f.pipeline.close_exchange(&key, CloseReason::Finished).await);

        let routing = f
            .pipeline
            .route_event(&parse_event(&chat_line(&key, "x", "late")).unwrap())
            .await;
        assert_eq!(routing, Routing::Dropped);
        assert_eq!(drain(&mut rx), vec![SinkUpdate::Closed(CloseReason::Finished)]);
        let session = f.pipeline.sessions().get_session(&key.session_id).unwrap();
        assert!(session.model.response(&key.exchange_id).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_remove_session_frees_edit_leases() {
        let f = fixture("a\nb\n");
        let (key, mut rx) = open(&f, "s1", "e1");
        let range = Range::lines(0, 0, 1);
        let start = edit_line(&key, "r1", &f.path, &range, json!("Start"));
        let delta = edit_line(&key, "r1", &f.path, &range, json!({"Delta": "A\n"}));
        f.pipeline.route_event(&parse_event(&start).unwrap()).await;
        f.pipeline.route_event(&parse_event(&delta).unwrap()).await;
        assert_eq!(f.pipeline.edits().lease_holder(&f.path), Some("r1".into()));

        assert!(f.pipeline.remove_session(&key.session_id).await);
        assert!(f.pipeline.edits().lease_holder(&f.path).is_none());
        assert_eq!(f.pipeline.edits().active_requests(), 0);
        assert!(!f.pipeline.sessions().has_session(&key.session_id));
        assert_eq!(drain(&mut rx).last(), Some(&SinkUpdate::Closed(CloseReason::Canceled)));

        // Another session can now write the document
        let (other, _rx) = open(&f, "s2", "e1");
        let start = edit_line(&other, "r2", &f.path, &range, json!("Start"));
        assert_eq!(
            f.pipeline.route_event(&parse_event(&start).unwrap()).await,
            Routing::Delivered
        );
    }

    #[tokio::test]
    async fn test_relative_and_absolute_paths_share_a_lease() {
        let f = fixture("a\nb\n");
        let (key, _rx) = open(&f, "s1", "e1");
        let (other, _other_rx) = open(&f, "s1", "e2");
        let range = Range::lines(0, 0, 1);

        let absolute = edit_line(&key, "r1", &f.path, &range, json!("Start"));
        let relative = edit_line(&other, "r2", Path::new("lib.rs"), &range, json!("Start"));
        assert_eq!(
            f.pipeline.route_event(&parse_event(&absolute).unwrap()).await,
            Routing::Delivered
        );
        assert_eq!(
            f.pipeline.route_event(&parse_event(&relative).unwrap()).await,
            Routing::Dropped
        );
        assert_eq!(f.pipeline.edits().active_requests(), 1);
    }
}
