//! Tests for sessions and uploads against the in-memory transport

#[cfg(test)]
mod tests {
    use crate::{
        config::{SftpConfig, UploadConfig},
        error::RelayError,
        transfer::{MemoryTransport, SessionManager, Uploader},
        types::{FailureReason, Message, UploadOutcome},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn endpoint() -> SftpConfig {
        SftpConfig {
            host: "sftp.test".to_string(),
            username: "relay".to_string(),
            ..SftpConfig::default()
        }
    }

    fn manager(transport: &MemoryTransport) -> SessionManager {
        SessionManager::new(Arc::new(transport.clone()), endpoint())
    }

    fn uploader() -> Uploader {
        Uploader::new(UploadConfig::default())
    }

    #[tokio::test]
    async fn scoped_session_closes_once_after_body() {
        let transport = MemoryTransport::new();
        let sessions = manager(&transport);

        let value = sessions
            .scoped(1, |session| async move { session.batch_id() * 10 })
            .await
            .unwrap();

        assert_eq!(value, 10);
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn scoped_session_closes_when_body_panics() {
        let transport = MemoryTransport::new();
        let sessions = manager(&transport);

        let result: Result<(), RelayError> = sessions
            .scoped(7, |_session| async move { panic!("boom") })
            .await;

        assert!(matches!(result, Err(RelayError::Unexpected(_))));
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn failed_open_never_runs_body() {
        let transport = MemoryTransport::new().unreachable();
        let sessions = manager(&transport);

        let result = sessions.scoped(1, |_session| async move { 0u8 }).await;

        assert!(matches!(result, Err(RelayError::Connection(_))));
        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(transport.connect_count(), 0);
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn failed_open_tears_down_its_connection() {
        let transport = MemoryTransport::new().unreachable();
        let sessions = manager(&transport);

        assert!(sessions.open(4).await.is_err());
        assert!(sessions.open(5).await.is_err());

        assert_eq!(transport.connect_attempts(), 2);
        assert_eq!(transport.close_count(), 2);
    }

    #[tokio::test]
    async fn close_failure_is_swallowed() {
        let transport = MemoryTransport::new().fail_on_close();
        let sessions = manager(&transport);

        let result = sessions.scoped(1, |_session| async move { "done" }).await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn closing_twice_releases_once() {
        let transport = MemoryTransport::new();
        let sessions = manager(&transport);

        let session = sessions.open(3).await.unwrap();
        sessions.close(&session).await;
        sessions.close(&session).await;

        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn upload_after_close_fails_cleanly() {
        let transport = MemoryTransport::new();
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();
        sessions.close(&session).await;

        let outcome = uploader().upload(&session, &Message::new("late", "x")).await;

        assert!(matches!(
            outcome.failure_reason(),
            Some(FailureReason::Transmission(_))
        ));
        assert_eq!(transport.write_count(), 0);
    }

    #[tokio::test]
    async fn upload_preserves_multibyte_payload() {
        let transport = MemoryTransport::new();
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();
        let body = "Grüße, 世界! 🚀 naïve café";

        let outcome = uploader().upload(&session, &Message::new("msg-1", body)).await;
        sessions.close(&session).await;

        assert_eq!(
            outcome,
            UploadOutcome::Success {
                destination: "/upload/msg-1.txt".to_string()
            }
        );
        let stored = transport.file("/upload/msg-1.txt").unwrap();
        assert_eq!(stored.as_ref(), body.as_bytes());
        assert_eq!(std::str::from_utf8(&stored).unwrap(), body);
    }

    #[tokio::test]
    async fn staged_upload_leaves_no_part_files() {
        let transport = MemoryTransport::new().fail_writes_for("broken");
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();
        let uploader = uploader();

        let ok = uploader.upload(&session, &Message::new("good", "1")).await;
        let failed = uploader.upload(&session, &Message::new("broken", "2")).await;
        sessions.close(&session).await;

        assert!(ok.is_success());
        assert!(!failed.is_success());
        assert_eq!(transport.paths(), vec!["/upload/good.txt".to_string()]);
        assert_eq!(transport.rename_count(), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_upload_logs_its_destination() {
        let transport = MemoryTransport::new().fail_writes_for("broken");
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();

        let outcome = uploader().upload(&session, &Message::new("broken", "x")).await;
        sessions.close(&session).await;

        assert!(!outcome.is_success());
        assert!(logs_contain("Upload failed"));
        assert!(logs_contain("destination=/upload/broken.txt"));
    }

    #[tokio::test]
    async fn redelivered_message_replaces_existing_file() {
        let transport = MemoryTransport::new();
        transport.insert_file("/upload/dup.txt", "old contents");
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();

        let outcome = uploader().upload(&session, &Message::new("dup", "new contents")).await;
        sessions.close(&session).await;

        assert!(outcome.is_success());
        assert_eq!(transport.file("/upload/dup.txt").unwrap().as_ref(), b"new contents");
        assert_eq!(transport.paths(), vec!["/upload/dup.txt".to_string()]);
    }

    #[tokio::test]
    async fn failed_commit_keeps_previous_file() {
        let transport = MemoryTransport::new().fail_renames();
        transport.insert_file("/upload/dup.txt", "old contents");
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();

        let outcome = uploader().upload(&session, &Message::new("dup", "new contents")).await;
        sessions.close(&session).await;

        assert!(matches!(
            outcome.failure_reason(),
            Some(FailureReason::Transmission(_))
        ));
        assert_eq!(transport.file("/upload/dup.txt").unwrap().as_ref(), b"old contents");
        assert_eq!(transport.paths(), vec!["/upload/dup.txt".to_string()]);
    }

    #[tokio::test]
    async fn failed_commit_without_previous_file_leaves_nothing() {
        let transport = MemoryTransport::new().fail_renames();
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();

        let outcome = uploader().upload(&session, &Message::new("fresh", "x")).await;
        sessions.close(&session).await;

        assert!(!outcome.is_success());
        assert!(transport.paths().is_empty());
        // no second attempt when nothing is in the way
        assert_eq!(transport.rename_count(), 1);
    }

    #[tokio::test]
    async fn write_failures_match_whole_message_ids() {
        let transport = MemoryTransport::new().fail_writes_for("m-1");
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();
        let uploader = uploader();

        let mut failed = Vec::new();
        for i in 0..12 {
            let id = format!("m-{}", i);
            if !uploader.upload(&session, &Message::new(id.as_str(), "x")).await.is_success() {
                failed.push(id);
            }
        }
        sessions.close(&session).await;

        assert_eq!(failed, vec!["m-1".to_string()]);
        assert_eq!(transport.paths().len(), 11);
    }

    #[tokio::test]
    async fn direct_write_when_staging_disabled() {
        let transport = MemoryTransport::new();
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();
        let uploader = Uploader::new(UploadConfig {
            remote_directory: "/drop/".to_string(),
            file_name_template: "msg-{message_id}.json".to_string(),
            atomic_rename: false,
        });

        let outcome = uploader.upload(&session, &Message::new("42", "{}")).await;
        sessions.close(&session).await;

        assert_eq!(
            outcome,
            UploadOutcome::Success {
                destination: "/drop/msg-42.json".to_string()
            }
        );
        assert_eq!(transport.rename_count(), 0);
    }

    #[tokio::test]
    async fn invalid_ids_never_reach_the_connection() {
        let transport = MemoryTransport::new();
        let sessions = manager(&transport);
        let session = sessions.open(1).await.unwrap();
        let uploader = uploader();

        for id in ["", "..", "../etc/passwd", "a\\b", "line\nbreak"] {
            let outcome = uploader.upload(&session, &Message::new(id, "x")).await;
            assert!(
                matches!(
                    outcome.failure_reason(),
                    Some(FailureReason::InvalidDestination(_))
                ),
                "id {:?} should be rejected",
                id
            );
        }
        sessions.close(&session).await;

        assert_eq!(transport.write_count(), 0);
    }

    #[tokio::test]
    async fn slow_write_times_out() {
        let transport = MemoryTransport::new().with_write_delay(Duration::from_millis(500));
        let endpoint = SftpConfig {
            transfer_timeout_ms: Some(20),
            ..endpoint()
        };
        let sessions = SessionManager::new(Arc::new(transport.clone()), endpoint);
        let session = sessions.open(1).await.unwrap();

        let outcome = uploader().upload(&session, &Message::new("slow", "x")).await;
        sessions.close(&session).await;

        assert_eq!(outcome.failure_reason(), Some(&FailureReason::Timeout(20)));
        assert!(transport.file("/upload/slow.txt").is_none());
    }

    #[test]
    fn staging_path_is_hidden_and_session_specific() {
        let destination = uploader().destination_for("abc").unwrap();
        let a = destination.staging_path(uuid::Uuid::new_v4());
        let b = destination.staging_path(uuid::Uuid::new_v4());

        assert_eq!(destination.path(), "/upload/abc.txt");
        assert!(a.starts_with("/upload/.abc.txt."));
        assert!(a.ends_with(".part"));
        assert_ne!(a, b);

        let session_id = uuid::Uuid::new_v4();
        let backup = destination.backup_path(session_id);
        assert!(backup.starts_with("/upload/.abc.txt."));
        assert!(backup.ends_with(".prev"));
        assert_ne!(backup, destination.staging_path(session_id));
    }
}
