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
fn tadoku_annotate_contract_writes_html_and_summary() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("page.html");
    std::fs::write(&input, PAGE).unwrap();
    let store = tmp.path().join("known.json");
    let out_path = tmp.path().join("annotated.html");

    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["annotate", "--input", input.to_str().unwrap()])
        .args(["--store", store.to_str().unwrap()])
        .args(["--minutes", "1"])
        .args(["--out", out_path.to_str().unwrap()])
        .output()
        .expect("run tadoku annotate");

    assert!(out.status.success(), "tadoku annotate failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse annotate json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("annotate"));
    assert_eq!(v["chunks"].as_u64(), Some(2));
    assert!(v["words"].as_u64().unwrap_or(0) > 0);

    let html = std::fs::read_to_string(&out_path).expect("annotated html exists");
    assert!(html.contains("data-tadoku-hl"), "expected highlight spans");
    assert!(html.contains("学校の門の前で"), "expected page text to survive");
}

#[test]
fn tadoku_annotate_contract_stdout_html_without_out_flag() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("page.html");
    std::fs::write(&input, PAGE).unwrap();
    let store = tmp.path().join("known.json");

    let out = std::process::Command::new(env!("CARGO_BIN_EXE_tadoku"))
        .args(["annotate", "--input", input.to_str().unwrap()])
        .args(["--store", store.to_str().unwrap()])
        .output()
        .expect("run tadoku annotate");

    assert!(out.status.success(), "tadoku annotate failed");
    let s = String::from_utf8_lossy(&out.stdout);
    assert!(s.trim_start().starts_with("<html"), "expected bare HTML on stdout");
    assert!(s.contains("data-tadoku-hl"), "expected highlight spans");
}
