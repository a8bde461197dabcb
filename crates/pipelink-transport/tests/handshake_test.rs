//! Integration tests for launching helpers and the startup handshake
//!
//! These use stock unix tools as misbehaving helpers; the happy path with
//! a real HTTP/2 helper is covered by the `pipelink` crate's tests.

#![cfg(unix)]

use pipelink_transport::{FramedTransport, TransportError, handshake, launch};
use rstest::rstest;
use std::time::Duration;

#[tokio::test]
async fn test_missing_binary_fails_before_any_io() {
    let err = launch("/nonexistent/bin/helper", &["serve", "restic", "--stdin", "x"]).unwrap_err();
    assert!(matches!(err, TransportError::Spawn { .. }));
    assert!(err.to_string().contains("/nonexistent/bin/helper"));
}

#[rstest]
#[case::exits_after_preface("sh", &["-c", "head -c 24 >/dev/null; exit 3"])]
#[case::echoes_frames_back("cat", &[])]
#[tokio::test]
async fn test_failed_handshake_kills_helper(#[case] program: &str, #[case] args: &[&str]) {
    let (conn, mut process) = launch(program, args).unwrap();
    let transport = FramedTransport::over(conn).await.unwrap();

    let result = handshake(&transport, &mut process, Duration::from_secs(10)).await;

    assert!(result.is_err());
    assert!(!process.is_alive());
    assert!(!process.is_foreground());
}

#[tokio::test]
async fn test_silent_helper_times_out_and_is_killed() {
    let (conn, mut process) = launch("sleep", &["30"]).unwrap();
    let transport = FramedTransport::over(conn).await.unwrap();

    let err = handshake(&transport, &mut process, Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Timeout(_)));
    assert!(!process.is_alive());

    // already reaped, so this returns at once
    let status = tokio::time::timeout(Duration::from_secs(1), process.wait())
        .await
        .expect("wait should not block")
        .unwrap();
    assert!(!status.success());
}
