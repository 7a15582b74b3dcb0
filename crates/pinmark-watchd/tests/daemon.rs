use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Watchd {
    _dir: TempDir,
    cfg: PathBuf,
    child: Child,
}

impl Watchd {
    fn spawn(extra: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = dir.path().join("config");
        std::fs::create_dir_all(cfg.join("pinmark")).expect("cfg dir");
        // keep the daemon away from the real API
        std::fs::write(
            cfg.join("pinmark").join("settings.toml"),
            "[api]\nbase_url = \"http://127.0.0.1:9/v1/\"\n",
        )
        .expect("settings");
        let child = Command::new(assert_cmd::cargo::cargo_bin("watchd"))
            .env("XDG_CONFIG_HOME", &cfg)
            .env_remove("PINMARK_LOG")
            .arg("--db")
            .arg(dir.path().join("pinmark.db"))
            .arg("--port")
            .arg("0")
            .args(extra)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn watchd");
        Self {
            _dir: dir,
            cfg,
            child,
        }
    }

    fn port(&self) -> u16 {
        wait_for_port(&self.cfg.join("pinmark").join("watchd.json"))
    }
}

impl Drop for Watchd {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_for_port(info: &Path) -> u16 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(s) = std::fs::read_to_string(info) {
            if let Ok(v) = serde_json::from_str::<Value>(&s) {
                if let Some(port) = v["port"].as_u64() {
                    return port as u16;
                }
            }
        }
        assert!(Instant::now() < deadline, "watchd.json never appeared");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn send(port: u16, req: &Value) -> Value {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut writer = stream.try_clone().unwrap();
    writeln!(writer, "{req}").unwrap();
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).unwrap();
    serde_json::from_str(line.trim()).expect("response json")
}

#[test]
fn health_once_answers_and_exits() {
    let mut d = Watchd::spawn(&["--health-once"]);
    let port = d.port();
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).unwrap();
    let v: Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(v["ok"], true);
    assert_eq!(v["data"]["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(v["data"]["ping"], false);
    let status = d.child.wait().unwrap();
    assert!(status.success());
}

#[test]
fn bad_request_gets_error_response() {
    let d = Watchd::spawn(&["--exit-after-ms", "10000"]);
    let port = d.port();
    let v = send(port, &json!({"op": "reboot"}));
    assert_eq!(v["ok"], false);
    assert!(v["error"].as_str().unwrap().starts_with("bad request"));
}

#[test]
fn malformed_options_are_rejected() {
    let d = Watchd::spawn(&["--exit-after-ms", "10000"]);
    let port = d.port();
    send(port, &json!({"op": "options", "options": {"menu": true}}));
    for bad in [json!(null), json!(42), json!("ping")] {
        let v = send(port, &json!({"op": "options", "options": bad}));
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "bad options");
    }
    // republishing the same record is still a no-op, so nothing was overwritten
    let v = send(port, &json!({"op": "options", "options": {"menu": true}}));
    assert_eq!(v["data"]["changed"], false);
}

#[test]
fn ping_option_gates_navigation_indicator() {
    let mut d = Watchd::spawn(&["--exit-after-ms", "10000"]);
    let port = d.port();

    // ping is off by default: nobody listens for navigation
    let v = send(port, &json!({"op": "navigated", "tab_id": 7, "url": "about:blank"}));
    assert_eq!(v["data"]["watched"], false);

    let v = send(port, &json!({"op": "options", "options": {"ping": true}}));
    assert_eq!(v["ok"], true);
    assert_eq!(v["data"]["changed"], true);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let h = send(port, &json!({"op": "health"}));
        if h["data"]["ping"] == true {
            break;
        }
        assert!(Instant::now() < deadline, "ping never switched on");
        std::thread::sleep(Duration::from_millis(20));
    }

    let v = send(port, &json!({"op": "navigated", "tab_id": 1, "url": "about:blank"}));
    assert_eq!(v["data"]["watched"], true);
    let h = send(port, &json!({"op": "health"}));
    assert_eq!(h["data"]["tabs"], 2);

    let stdout = d.child.stdout.take().unwrap();
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).unwrap();
    let v: Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(v, json!({"tab_id": 1, "bookmarked": false}));
}

#[test]
fn closed_tabs_leave_the_table() {
    let d = Watchd::spawn(&["--exit-after-ms", "10000"]);
    let port = d.port();
    send(port, &json!({"op": "navigated", "tab_id": 3, "url": "https://a.example/"}));
    let v = send(port, &json!({"op": "closed", "tab_id": 3}));
    assert_eq!(v["data"]["tabs"], 0);
    let v = send(port, &json!({"op": "deleted", "url": "https://a.example/"}));
    assert_eq!(v["ok"], true);
}
