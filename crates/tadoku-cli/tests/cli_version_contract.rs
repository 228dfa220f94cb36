#[test]
fn tadoku_version_contract() {
    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["version"])
        .output()
        .expect("run tadoku version");

    assert!(out.status.success(), "tadoku version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse version json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("version"));
    assert_eq!(v["name"].as_str(), Some("tadoku"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
}

#[test]
fn tadoku_version_text_output_contract() {
    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["version", "--output", "text"])
        .output()
        .expect("run tadoku version --output text");

    assert!(out.status.success(), "tadoku version failed");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(
        s.trim_start().starts_with("tadoku "),
        "expected text output to start with `tadoku `"
    );
}
