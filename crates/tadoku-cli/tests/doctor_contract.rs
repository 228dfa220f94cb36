#[test]
fn tadoku_doctor_contract_json_booleans_only() {
    let tmp = tempfile::tempdir().unwrap();

    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["doctor"])
        // Ensure we don't accidentally inherit keys from the environment.
        .env_remove("TADOKU_OPENAI_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("TADOKU_GEMINI_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env("TADOKU_DATA_DIR", tmp.path())
        .output()
        .expect("run tadoku doctor");

    assert!(out.status.success(), "tadoku doctor failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse doctor json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("doctor"));
    assert_eq!(v["name"].as_str(), Some("tadoku"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
    assert!(v.get("elapsed_ms").is_some());

    // Config surface should be present and booleans-only for secrets.
    assert_eq!(v["configured"]["providers"]["openai"].as_bool(), Some(false));
    assert_eq!(v["configured"]["providers"]["gemini"].as_bool(), Some(false));
    assert!(!v["configured"]["data_dir"].as_str().unwrap_or("").is_empty());
    assert!(!v["configured"]["defaults"]["openai_model"]
        .as_str()
        .unwrap_or("")
        .is_empty());

    // All three checks pass against a fresh writable data dir.
    let checks = v["checks"].as_array().expect("checks array");
    for name in ["data_dir_writable", "known_store_readable", "segmenter_selfcheck"] {
        let check = checks
            .iter()
            .find(|c| c["name"].as_str() == Some(name))
            .unwrap_or_else(|| panic!("{name} check missing"));
        assert_eq!(check["ok"].as_bool(), Some(true), "{name} not ok");
    }
    assert_eq!(v["ok"].as_bool(), Some(true));
}

#[test]
fn tadoku_doctor_flags_malformed_known_store() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("known.json"), b"{not json").unwrap();

    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["doctor"])
        .env("TADOKU_DATA_DIR", tmp.path())
        .output()
        .expect("run tadoku doctor");

    // Doctor reports problems; it does not fail the process over them.
    assert!(out.status.success(), "tadoku doctor failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse doctor json");

    let checks = v["checks"].as_array().expect("checks array");
    let store = checks
        .iter()
        .find(|c| c["name"].as_str() == Some("known_store_readable"))
        .expect("known_store_readable check");
    assert_eq!(store["ok"].as_bool(), Some(false));
    assert!(!store["hint"].as_str().unwrap_or("").is_empty());
    assert_eq!(v["ok"].as_bool(), Some(false));
}

#[test]
fn tadoku_doctor_text_output_contract() {
    let tmp = tempfile::tempdir().unwrap();

    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["doctor", "--output", "text"])
        .env("TADOKU_DATA_DIR", tmp.path())
        .output()
        .expect("run tadoku doctor --output text");

    assert!(out.status.success(), "tadoku doctor failed");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(
        s.contains("tadoku "),
        "expected doctor text output to mention tadoku"
    );
    assert!(s.contains("checks:"), "expected checks summary");
}
