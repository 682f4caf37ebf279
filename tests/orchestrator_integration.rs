//! Integration tests for the session orchestrator, end to end over real
//! processes.

use std::sync::Arc;
use std::time::Duration;

use cmdlink::config::{CmdlinkConfig, LimitsConfig, TimingConfig};
use cmdlink::format::{OutputFormat, StreamChannel};
use cmdlink::session::{
    MemoryTransport, NullTransport, RemoteMessage, SessionError, SessionOrchestrator, SessionSpec,
    SessionStatus, StaticRegistry,
};
use tokio::time::timeout;

const TEST_WAIT: Duration = Duration::from_secs(5);

fn orchestrator(transport: Arc<MemoryTransport>) -> SessionOrchestrator {
    SessionOrchestrator::new(
        CmdlinkConfig::default(),
        Box::new(StaticRegistry::with_known_tools()),
        transport,
    )
}

/// Pump events until the session reaches a terminal state, then drain the
/// stragglers so late output is accounted for.
async fn pump_until_terminal(orch: &mut SessionOrchestrator, id: &str) {
    timeout(TEST_WAIT, async {
        loop {
            assert!(orch.pump().await, "event channel closed unexpectedly");
            let snapshot = orch.snapshot(id).expect("session vanished");
            if snapshot.status.is_terminal() {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for the session to terminate");
    tokio::time::sleep(Duration::from_millis(200)).await;
    orch.drain_pending();
}

/// A wrapped command runs to completion with its output captured and its
/// exit code recorded.
#[tokio::test]
async fn echo_session_runs_to_terminated_with_output() {
    let transport = Arc::new(MemoryTransport::new());
    let mut orch = orchestrator(transport.clone());

    let spec = SessionSpec::new("sh")
        .args(["-c", "printf 'hello\\n'"])
        .manual_start();
    let id = orch.create_session(&spec).expect("create failed");
    orch.attach_observer(&id, "watcher").expect("attach failed");
    orch.start_session(&id).expect("start failed");

    pump_until_terminal(&mut orch, &id).await;

    let snapshot = orch.snapshot(&id).expect("snapshot failed");
    assert_eq!(snapshot.status, SessionStatus::Terminated);
    assert_eq!(snapshot.exit_code, Some(0));
    assert_eq!(snapshot.tool, "Shell");

    let history = orch.history(&id, OutputFormat::Text, None).expect("history failed");
    assert!(history.concat().contains("hello"));
    assert_eq!(
        orch.session_lines(&id, StreamChannel::Stdout),
        vec!["hello"]
    );

    // The observer saw the running status, the output, and the exit.
    let messages = transport.take_messages();
    assert!(messages.iter().all(|(observer, _)| observer == "watcher"));
    assert!(messages
        .iter()
        .any(|(_, m)| matches!(m, RemoteMessage::Output { .. })));
    assert!(messages.iter().any(|(_, m)| matches!(
        m,
        RemoteMessage::Status { status: SessionStatus::Terminated, exit_code: Some(0), .. }
    )));
}

/// Input is echoed to every observer except the one who sent it.
#[tokio::test]
async fn input_echo_excludes_the_sender() {
    let transport = Arc::new(MemoryTransport::new());
    let mut orch = orchestrator(transport.clone());

    let spec = SessionSpec::new("cat").manual_start();
    let id = orch.create_session(&spec).expect("create failed");
    orch.attach_observer(&id, "alice").expect("attach failed");
    orch.attach_observer(&id, "bob").expect("attach failed");
    orch.start_session(&id).expect("start failed");

    orch.send_input(&id, "ping\n", Some("alice"))
        .await
        .expect("send failed");

    let echoes: Vec<String> = transport
        .take_messages()
        .into_iter()
        .filter(|(_, m)| matches!(m, RemoteMessage::InputEcho { .. }))
        .map(|(observer, _)| observer)
        .collect();
    assert_eq!(echoes, vec!["bob".to_string()]);

    let snapshot = orch.snapshot(&id).expect("snapshot failed");
    assert_eq!(snapshot.input_len, 1);

    orch.terminate_session(&id, true).expect("terminate failed");
    pump_until_terminal(&mut orch, &id).await;
}

/// A forced termination records the kill signal on the session.
#[cfg(unix)]
#[tokio::test]
async fn forced_termination_records_the_signal() {
    let transport = Arc::new(MemoryTransport::new());
    let mut orch = orchestrator(transport);

    let spec = SessionSpec::new("sleep").arg("30");
    let id = orch.create_session(&spec).expect("create failed");
    orch.terminate_session(&id, true).expect("terminate failed");
    pump_until_terminal(&mut orch, &id).await;

    let snapshot = orch.snapshot(&id).expect("snapshot failed");
    assert_eq!(snapshot.status, SessionStatus::Terminated);
    assert_eq!(snapshot.exit_code, None);
    assert_eq!(snapshot.signal, Some(9));
}

/// Pause and resume drive both the session status and the process.
#[cfg(unix)]
#[tokio::test]
async fn pause_and_resume_follow_the_state_machine() {
    let transport = Arc::new(MemoryTransport::new());
    let mut orch = orchestrator(transport);

    let spec = SessionSpec::new("sleep").arg("30");
    let id = orch.create_session(&spec).expect("create failed");

    orch.pause_session(&id).expect("pause failed");
    assert_eq!(orch.snapshot(&id).expect("snapshot").status, SessionStatus::Paused);
    assert!(matches!(
        orch.pause_session(&id),
        Err(SessionError::InvalidState { .. })
    ));
    assert!(matches!(
        orch.send_input(&id, "x", None).await,
        Err(SessionError::InvalidState { .. })
    ));

    orch.resume_session(&id).expect("resume failed");
    assert_eq!(orch.snapshot(&id).expect("snapshot").status, SessionStatus::Running);

    orch.terminate_session(&id, true).expect("terminate failed");
    pump_until_terminal(&mut orch, &id).await;
}

/// Garbage collection purges terminated sessions once their grace window
/// has elapsed, and force-terminates sessions idle past the timeout.
#[tokio::test]
async fn garbage_collection_purges_and_reaps() {
    let config = CmdlinkConfig {
        limits: LimitsConfig::default(),
        timing: TimingConfig {
            terminated_grace_secs: 0,
            idle_timeout_secs: 0,
            ..TimingConfig::default()
        },
    };
    let mut orch = SessionOrchestrator::new(
        config,
        Box::new(StaticRegistry::with_known_tools()),
        Arc::new(NullTransport),
    );

    // A terminated session is purged on the first sweep (zero grace).
    let spec = SessionSpec::new("sh").args(["-c", "true"]).manual_start();
    let terminated = orch.create_session(&spec).expect("create failed");
    orch.terminate_session(&terminated, false).expect("terminate failed");
    orch.collect_garbage();
    assert!(matches!(
        orch.snapshot(&terminated),
        Err(SessionError::NotFound { .. })
    ));

    // An idle session past the (zero) idle timeout is force-terminated.
    let idle = orch.create_session(&spec).expect("create failed");
    orch.collect_garbage();
    assert_eq!(
        orch.snapshot(&idle).expect("snapshot").status,
        SessionStatus::Terminated
    );

    // A session with a live process is spared, however quiet.
    let running = orch
        .create_session(&SessionSpec::new("sleep").arg("30"))
        .expect("create failed");
    orch.collect_garbage();
    assert_eq!(
        orch.snapshot(&running).expect("snapshot").status,
        SessionStatus::Running
    );

    orch.terminate_session(&running, true).expect("terminate failed");
    pump_until_terminal(&mut orch, &running).await;
}

/// History compaction keeps the most recent records once the cap is hit.
#[tokio::test]
async fn history_compacts_under_a_small_cap() {
    let config = CmdlinkConfig {
        limits: LimitsConfig {
            history_cap: 4,
            history_keep: 2,
            ..LimitsConfig::default()
        },
        timing: TimingConfig::default(),
    };
    let mut orch = SessionOrchestrator::new(
        config,
        Box::new(StaticRegistry::with_known_tools()),
        Arc::new(NullTransport),
    );

    let spec = SessionSpec::new("sh").manual_start();
    let id = orch.create_session(&spec).expect("create failed");
    for i in 0..5 {
        orch.handle_event(cmdlink::process::ProcessEvent::Output {
            id: id.clone(),
            channel: StreamChannel::Stdout,
            bytes: format!("line {i}\n").into_bytes(),
        });
    }
    let history = orch.history(&id, OutputFormat::Text, None).expect("history failed");
    assert_eq!(history, vec!["line 3\n", "line 4\n"]);
}

/// Stats aggregate session and process counts.
#[tokio::test]
async fn stats_reflect_live_sessions() {
    let transport = Arc::new(MemoryTransport::new());
    let mut orch = orchestrator(transport);

    let running = orch
        .create_session(&SessionSpec::new("sleep").arg("30"))
        .expect("create failed");
    orch.create_session(&SessionSpec::new("sh").args(["-c", "true"]).manual_start())
        .expect("create failed");

    let stats = orch.stats();
    assert_eq!(stats.running, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.processes.tracked, 1);

    orch.terminate_session(&running, true).expect("terminate failed");
    pump_until_terminal(&mut orch, &running).await;
    let stats = orch.stats();
    assert_eq!(stats.terminated, 1);
    assert_eq!(stats.idle, 1);
}

/// History renders in every supported format.
#[tokio::test]
async fn history_formats_render_from_the_same_records() {
    let mut orch = SessionOrchestrator::new(
        CmdlinkConfig::default(),
        Box::new(StaticRegistry::with_known_tools()),
        Arc::new(NullTransport),
    );
    let spec = SessionSpec::new("sh").manual_start();
    let id = orch.create_session(&spec).expect("create failed");
    orch.handle_event(cmdlink::process::ProcessEvent::Output {
        id: id.clone(),
        channel: StreamChannel::Stdout,
        bytes: b"\x1b[31mRed\x1b[0m".to_vec(),
    });

    let text = orch.history(&id, OutputFormat::Text, None).expect("history");
    assert_eq!(text, vec!["Red"]);
    let html = orch.history(&id, OutputFormat::Html, None).expect("history");
    assert!(html[0].contains("Red</span>"));
    let json = orch.history(&id, OutputFormat::Json, None).expect("history");
    let value: serde_json::Value = serde_json::from_str(&json[0]).expect("valid json");
    assert_eq!(value["text"], "Red");
    let raw = orch.history(&id, OutputFormat::Raw, None).expect("history");
    assert!(!raw[0].contains('\x1b'));
}

/// Shutdown terminates every live session and leaves the set terminal.
#[cfg(unix)]
#[tokio::test]
async fn shutdown_terminates_everything() {
    let mut orch = SessionOrchestrator::new(
        CmdlinkConfig::default(),
        Box::new(StaticRegistry::with_known_tools()),
        Arc::new(NullTransport),
    );
    orch.create_session(&SessionSpec::new("sleep").arg("30"))
        .expect("create failed");
    orch.create_session(&SessionSpec::new("sleep").arg("30"))
        .expect("create failed");

    timeout(TEST_WAIT, orch.shutdown())
        .await
        .expect("shutdown timed out");
    assert!(orch
        .list_sessions()
        .iter()
        .all(|s| s.status.is_terminal()));
}
