//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Control CLI for exercising R-EMS messaging sockets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;

use assert_cmd::Command;

fn run(args: &[&str]) -> (bool, String) {
    let output = Command::cargo_bin("r-emsctl")
        .expect("binary built")
        .env_remove("R_EMS_CONFIG")
        .args(args)
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .expect("command runs");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
    )
}

#[test]
fn reqrep_demo_round_trips_dates() {
    let (ok, stdout) = run(&["reqrep", "demo", "inproc://cli-reqrep", "--rounds", "2"]);
    assert!(ok, "{stdout}");
    assert_eq!(stdout.matches("NODE1: RECEIVED DATE").count(), 2);
}

#[test]
fn survey_demo_collects_responses() {
    let (ok, stdout) = run(&["survey", "demo", "inproc://cli-survey", "--rounds", "1"]);
    assert!(ok, "{stdout}");
    assert!(stdout.contains("SURVEY RESPONSE"));
    assert!(stdout.contains("SERVER: SURVEY COMPLETE"));
}

#[test]
fn pipeline_demo_stops_on_stop() {
    let (ok, stdout) = run(&["pipeline", "demo", "inproc://cli-pipeline", "ping"]);
    assert!(ok, "{stdout}");
    assert!(stdout.contains("NODE0: RECEIVED \"ping\""));
    assert!(stdout.contains("NODE0: STOPPING"));
}

#[test]
fn socket_command_uses_configuration() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("messaging.toml");
    fs::write(
        &path,
        "[sockets.announcer]\ntopology = \"pub\"\nlisten = \"inproc://cli-config\"\n",
    )
    .expect("write config");
    let config = path.to_string_lossy().into_owned();

    let (ok, stdout) = run(&["--config", &config, "socket", "announcer", "--send", "hello"]);
    assert!(ok, "{stdout}");
    assert!(stdout.contains("announcer: SENDING \"hello\""));

    let (ok, _) = run(&["socket", "announcer"]);
    assert!(!ok);
}
