//! Integration tests for events

#[cfg(test)]
mod tests {
    use refurb_events::*;
    use refurb_types::{RunState, TaskSnapshot};
    use uuid::Uuid;

    fn snapshot(description: &str) -> TaskSnapshot {
        TaskSnapshot {
            step: 1,
            description: description.to_string(),
            progress: 100,
            message: "done".to_string(),
            verdict: vec![],
            estimate: Some(5.0),
            elapsed: Some(4.5),
            is_started: true,
            is_done: true,
            teardown: false,
        }
    }

    #[tokio::test]
    async fn test_event_sender_emit() {
        let (tx, mut rx) = channel();

        tx.emit_error("test error");
        tx.emit_debug("test debug");

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.event,
            AppEvent::General(GeneralEvent::Error { .. })
        ));
        assert_eq!(first.meta.level, EventLevel::Error);

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.event,
            AppEvent::General(GeneralEvent::DebugLog { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);

        // Should not panic when receiver is dropped
        tx.emit_warning("ignored");
    }

    #[tokio::test]
    async fn test_event_reporter_tags_run_id() {
        let (tx, mut rx) = channel();
        let reporter = EventReporter::new(tx);
        let run_id = Uuid::new_v4();

        reporter.report_task_success(run_id, 4.5, &snapshot("Make filesystem"));
        reporter.report_run_finished(run_id, RunState::Success, 10.0, &[]);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.meta.correlation_id, Some(run_id.to_string()));
        assert_eq!(msg.meta.source, EventSource::TASK);
        match msg.event {
            AppEvent::Task(TaskEvent::Succeeded { task, .. }) => {
                assert_eq!(task.description, "Make filesystem");
            }
            other => panic!("unexpected event {other:?}"),
        }

        let msg = rx.recv().await.unwrap();
        assert!(matches!(
            msg.event,
            AppEvent::Runner(RunnerEvent::Finished {
                state: RunState::Success,
                ..
            })
        ));
    }

    #[test]
    fn test_event_json_shape() {
        let event = AppEvent::Task(TaskEvent::Failed {
            run_id: Uuid::nil(),
            elapsed: 1.0,
            task: snapshot("Unmount"),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "task");
        assert_eq!(json["event"]["type"], "failed");
        assert_eq!(json["event"]["task"]["description"], "Unmount");
    }

    #[test]
    fn test_recording_reporter_collects_logs() {
        let reporter = RecordingReporter::new();
        reporter.log(Uuid::nil(), "partition table written");
        reporter.report_tasks(Uuid::nil(), 3.0, &[snapshot("a")]);
        assert_eq!(reporter.logs(), vec!["partition table written".to_string()]);
        assert_eq!(reporter.events().len(), 2);
    }
}
