use predicates::prelude::*;

const PAGE: &str = concat!(
    "<html><body><div id=\"main_text\">",
    "<p>学校の門の前で、先生がゆっくりと生徒たちに話しかけているのだった。</p>",
    "<p>授業が終わってもいいと言われたが、誰も帰ろうとはしなかったのである。</p>",
    "<p>放課後の教室には、本を読んでいる生徒がひとりだけ残っていたのだった。</p>",
    "<p>窓の外では、秋の風が校庭の木々を静かに揺らし続けているのだった。</p>",
    "<p>図書室の棚の奥から、古い辞書を取り出して机の上に広げてみたのだった。</p>",
    "<p>廊下の向こうから、放送委員の声が夕方の連絡を告げて響いてきたのだった。</p>",
    "<p>先生は黒板の文字を消しながら、明日の予定をもう一度説明してくれたのだった。</p>",
    "<p>校門を出るころには、空がすっかり茜色に染まりきっていたのだった。</p>",
    "</div></body></html>"
);

#[test]
fn tadoku_segment_contract_single_chunk_at_default_window() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("page.html");
    std::fs::write(&input, PAGE).unwrap();

    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["segment", "--input", input.to_str().unwrap()])
        .args(["--url", "https://example.com/novel?page=2"])
        .output()
        .expect("run tadoku segment");

    assert!(out.status.success(), "tadoku segment failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse segment json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("segment"));
    assert_eq!(v["units"].as_u64(), Some(8));

    let chunks = v["chunks"].as_array().expect("chunks array");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["id"].as_str(), Some("0-7"));
    assert_eq!(chunks[0]["start_unit"].as_u64(), Some(0));
    assert_eq!(chunks[0]["end_unit"].as_u64(), Some(7));
    assert!(chunks[0]["chars"].as_u64().unwrap_or(0) > 200);
    assert!(!chunks[0]["preview"].as_str().unwrap_or("").is_empty());
}

#[test]
fn tadoku_segment_contract_one_minute_window_splits() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("page.html");
    std::fs::write(&input, PAGE).unwrap();

    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["segment", "--input", input.to_str().unwrap()])
        .args(["--minutes", "1"])
        .output()
        .expect("run tadoku segment --minutes 1");

    assert!(out.status.success(), "tadoku segment failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse segment json");

    let chunks = v["chunks"].as_array().expect("chunks array");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0]["id"].as_str(), Some("0-5"));
    assert_eq!(chunks[1]["id"].as_str(), Some("6-7"));
}

#[test]
fn tadoku_segment_reads_stdin_when_no_input_flag() {
    let mut cmd = assert_cmd::Command::new(env!("CARGO_BIN_EXE_tadoku"));
    cmd.arg("segment")
        .write_stdin(PAGE)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\":\"segment\""));
}
