use std::path::PathBuf;
use std::time::Duration;

use astwire::protocol::{
    query_spec, InputMode, ProtocolError, StderrMode, Supervisor, SupervisorConfig,
};

fn outline_bin() -> &'static str {
    env!("CARGO_BIN_EXE_astwire-outline")
}

fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../astwire-ast/tests/fixtures")
        .join(name);
    std::fs::read(path).expect("fixture should exist")
}

fn outline_config() -> SupervisorConfig {
    SupervisorConfig::new(outline_bin())
        .with_stderr(StderrMode::Null)
        .with_env("RUST_LOG", "debug")
}

#[tokio::test]
async fn test_outline_generator_reports_stream_spec() {
    let spec = query_spec(outline_bin(), Vec::<String>::new()).await.unwrap();
    assert_eq!(spec.input, InputMode::StdinStream);
    assert!(spec.uses_stream_protocol());
    assert_eq!(spec.suffix, vec![".outline.txt"]);
}

#[tokio::test]
async fn test_supervised_generator_answers_requests() {
    let generator = Supervisor::spawn(outline_config()).await.unwrap();
    assert!(generator.pid().is_some());

    let mut stream = generator
        .request("minimal.bgn", fixture("minimal.json"))
        .await
        .unwrap();
    let frame = stream.receive().await.unwrap().expect("an outline");
    assert!(!frame.is_error(), "{}", frame.error_lossy());
    assert_eq!(frame.name_lossy(), "minimal.outline.txt");
    assert_eq!(&frame.code[..], b"format A\nfield A.x\n");
    assert_eq!(stream.receive().await.unwrap(), None);

    generator.close();
    let status = tokio::time::timeout(Duration::from_secs(10), generator.wait())
        .await
        .expect("generator should exit after its input ends");
    assert!(status.expect("exit status").success());
    assert_eq!(generator.closed().await, ProtocolError::Eof);
}

#[tokio::test]
async fn test_load_error_is_reported_on_its_stream_only() {
    let generator = Supervisor::spawn(outline_config()).await.unwrap();

    let mut broken = generator
        .request("broken.bgn", r#"{"node":[{"node_type":"nope"}]}"#)
        .await
        .unwrap();
    let mut fine = generator
        .request("all_kinds.bgn", fixture("all_kinds.json"))
        .await
        .unwrap();

    let frame = broken.receive().await.unwrap().expect("an error frame");
    assert!(frame.is_error());
    assert!(
        frame.error_lossy().contains("unknown node kind: `nope`"),
        "{}",
        frame.error_lossy()
    );
    assert_eq!(broken.receive().await.unwrap(), None);

    let frame = fine.receive().await.unwrap().expect("an outline");
    assert!(!frame.is_error(), "{}", frame.error_lossy());
    let text = String::from_utf8_lossy(&frame.code).into_owned();
    assert!(text.lines().any(|line| line == "format Header"), "{}", text);
    assert!(text.lines().any(|line| line == "fn check"), "{}", text);
    assert_eq!(fine.receive().await.unwrap(), None);

    generator.close();
}

#[tokio::test]
async fn test_many_concurrent_requests() {
    let generator = Supervisor::spawn(outline_config()).await.unwrap();
    let document = fixture("minimal.json");

    let mut streams = Vec::new();
    for i in 0..16 {
        let stream = generator
            .request(format!("f{}.bgn", i), document.clone())
            .await
            .unwrap();
        streams.push((i, stream));
    }
    for (i, mut stream) in streams {
        let frame = stream.receive().await.unwrap().expect("an outline");
        assert_eq!(frame.name_lossy(), format!("f{}.outline.txt", i));
        assert_eq!(stream.receive().await.unwrap(), None);
    }
    assert_eq!(generator.multiplexer().active_streams(), 0);
    generator.close();
}

#[tokio::test]
async fn test_crashing_generator_closes_with_exit_status() {
    let config = SupervisorConfig::new("sh")
        .with_args(["-c", "exit 3"])
        .with_stderr(StderrMode::Null);
    let err = Supervisor::spawn(config).await.unwrap_err();
    match err {
        ProtocolError::ProcessExited(status) => assert!(status.contains('3'), "{}", status),
        other => panic!("expected a process exit, got {:?}", other),
    }
}

/// Writes a version 1 response header, then runs `rest`.
fn scripted(rest: &str) -> SupervisorConfig {
    SupervisorConfig::new("sh")
        .with_args(["-c".to_string(), format!("printf '\\000\\000\\000\\001'; {}", rest)])
        .with_stderr(StderrMode::Null)
}

#[tokio::test]
async fn test_crash_after_handshake_fails_pending_streams() {
    // consume the request header and one byte of the request, then die
    let generator = Supervisor::spawn(scripted("head -c 5 >/dev/null; exit 5"))
        .await
        .unwrap();
    let mut stream = generator.request("a.bgn", "{}").await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), stream.receive())
        .await
        .expect("a crash should close the channel");
    match outcome {
        Err(ProtocolError::ProcessExited(status)) => {
            assert!(status.contains('5'), "{}", status)
        }
        other => panic!("expected a process exit, got {:?}", other),
    }
    let status = generator.wait().await.expect("exit status");
    assert_eq!(status.code(), Some(5));
}

#[tokio::test]
async fn test_output_closed_while_process_runs_is_eof() {
    let generator = Supervisor::spawn(scripted("exec 1>&-; sleep 5"))
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(3), async {
        let mut stream = generator.request("a.bgn", "{}").await?;
        stream.receive().await
    })
    .await
    .expect("end of output should close the channel");
    assert_eq!(outcome, Err(ProtocolError::Eof));
    assert!(generator.multiplexer().state().is_closed());
}

#[tokio::test]
async fn test_generator_that_exits_cleanly_without_header_is_eof() {
    let config = SupervisorConfig::new("sh")
        .with_args(["-c", "exit 0"])
        .with_stderr(StderrMode::Null);
    let err = Supervisor::spawn(config).await.unwrap_err();
    assert!(err.is_eof(), "{:?}", err);
}

#[tokio::test]
async fn test_missing_program_is_spawn_error() {
    let config = SupervisorConfig::new("/nonexistent/astwire-generator");
    let err = Supervisor::spawn(config).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Spawn(_)), "{:?}", err);
}
