mod common;
use common::TestEnv;

#[test]
fn config_json_prints_paths() {
    let t = TestEnv::new();
    let out = t
        .bin()
        .args(["config", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let cfgdir = v.get("config_dir").and_then(|s| s.as_str()).unwrap_or("");
    assert!(cfgdir.contains("pinmark"));
    assert_eq!(v["db_path"].as_str(), t.db.to_str());
    assert_eq!(v["api_url"], common::DEAD_API);
    assert_eq!(v["complete"]["limit"], 9);
    assert_eq!(v["cache"]["ttl_secs"], 3600);
}

#[test]
fn settings_file_is_read() {
    let t = TestEnv::new();
    let dir = t.cfg.join("pinmark");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("settings.toml"),
        "[cache]\nttl_secs = 60\n\n[complete]\nlimit = 3\n",
    )
    .unwrap();
    let out = t
        .bin()
        .args(["config", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["cache"]["ttl_secs"], 60);
    assert_eq!(v["complete"]["limit"], 3);
}

#[test]
fn config_json_has_only_settings_in_use() {
    let t = TestEnv::new();
    let out = t
        .bin()
        .args(["config", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["complete"], serde_json::json!({"limit": 9}));
}
