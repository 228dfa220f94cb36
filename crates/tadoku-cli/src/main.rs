use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tadoku_core::{ReadingMode, SessionSettings};
use tadoku_engine::session::ReaderSession;
use tadoku_engine::stores::JsonKnownStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tadoku")]
#[command(about = "Segment, analyze, and annotate Japanese reading pages", long_about = None)]
struct Cli {
    /// Verbose engine logging (debug level, stderr).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split a page into timed chunks and print the chunk table (json).
    Segment(SegmentCmd),
    /// Run local analysis over chunks and print per-chunk reports (json).
    Analyze(AnalyzeCmd),
    /// Render highlight spans into the page and emit the annotated HTML.
    Annotate(AnnotateCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct SegmentCmd {
    /// HTML file to read (stdin when omitted).
    #[arg(long)]
    input: Option<std::path::PathBuf>,
    /// Page URL recorded as the document key.
    #[arg(long, default_value = "")]
    url: String,
    /// Chunk window in minutes (the overlay offers 1, 5, 10, 30).
    #[arg(long, default_value_t = 10)]
    minutes: u32,
    /// Chars of chunk text included as a preview.
    #[arg(long, default_value_t = 40)]
    preview_chars: usize,
}

#[derive(clap::Args, Debug)]
struct AnalyzeCmd {
    /// HTML file to read (stdin when omitted).
    #[arg(long)]
    input: Option<std::path::PathBuf>,
    /// Page URL recorded as the document key.
    #[arg(long, default_value = "")]
    url: String,
    /// Chunk window in minutes (the overlay offers 1, 5, 10, 30).
    #[arg(long, default_value_t = 10)]
    minutes: u32,
    /// Reading mode. Allowed: intensive, extensive
    #[arg(long, default_value = "intensive")]
    mode: String,
    /// Analyze a single chunk by index instead of the whole page.
    #[arg(long)]
    chunk: Option<usize>,
    /// Report every token instead of scored selections.
    #[arg(long)]
    raw: bool,
    /// Known-items file (default: <data_dir>/known.json).
    #[arg(long, env = "TADOKU_KNOWN_STORE")]
    store: Option<std::path::PathBuf>,
}

#[derive(clap::Args, Debug)]
struct AnnotateCmd {
    /// HTML file to read (stdin when omitted).
    #[arg(long)]
    input: Option<std::path::PathBuf>,
    /// Page URL recorded as the document key.
    #[arg(long, default_value = "")]
    url: String,
    /// Chunk window in minutes (the overlay offers 1, 5, 10, 30).
    #[arg(long, default_value_t = 10)]
    minutes: u32,
    /// Reading mode. Allowed: intensive, extensive
    #[arg(long, default_value = "intensive")]
    mode: String,
    /// Highlight every token instead of scored selections.
    #[arg(long)]
    raw: bool,
    /// Known-items file (default: <data_dir>/known.json).
    #[arg(long, env = "TADOKU_KNOWN_STORE")]
    store: Option<std::path::PathBuf>,
    /// Write the annotated HTML here and print a JSON summary to stdout.
    /// Without it the HTML itself goes to stdout.
    #[arg(long)]
    out: Option<std::path::PathBuf>,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Optional env-file loader (opt-in): overlay hosts and cron wrappers are
    // rarely interactive shells, so keys can live in one file. Vars already in
    // the process environment win; values are never logged.
    if let Ok(p) = std::env::var("TADOKU_ENV_FILE") {
        let p = p.trim();
        if !p.is_empty() {
            if let Ok(txt) = std::fs::read_to_string(p) {
                for raw in txt.lines() {
                    let s = raw.trim();
                    if s.is_empty() || s.starts_with('#') {
                        continue;
                    }
                    let Some((k, v)) = s.split_once('=') else {
                        continue;
                    };
                    let k = k.trim();
                    let v = v.trim();
                    if k.is_empty() {
                        continue;
                    }
                    if std::env::var_os(k).is_none() {
                        std::env::set_var(k, v);
                    }
                }
            }
        }
    }

    let cli = Cli::parse();

    // Logs go to stderr; stdout carries payloads (json or HTML).
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Segment(args) => {
            #[derive(serde::Serialize)]
            struct SegmentRow<'a> {
                id: &'a str,
                start_unit: usize,
                end_unit: usize,
                boundary: u32,
                chars: usize,
                preview: String,
            }

            let html = read_input(args.input.as_deref())?;
            let settings = SessionSettings {
                chunk_minutes: args.minutes,
                ..SessionSettings::default()
            };
            let session = ReaderSession::new(&html, &args.url, settings);
            let rows: Vec<SegmentRow> = session
                .chunks()
                .iter()
                .map(|chunk| SegmentRow {
                    id: &chunk.id,
                    start_unit: chunk.start_unit,
                    end_unit: chunk.end_unit,
                    boundary: session
                        .units()
                        .get(chunk.start_unit)
                        .map(|u| u.boundary_id)
                        .unwrap_or(0),
                    chars: chunk.char_count,
                    preview: preview(&chunk.text, args.preview_chars),
                })
                .collect();
            let payload = serde_json::json!({
                "schema_version": 1,
                "kind": "segment",
                "ok": true,
                "url": args.url,
                "units": session.units().len(),
                "chunks": rows,
            });
            println!("{payload}");
        }
        Commands::Analyze(args) => {
            let html = read_input(args.input.as_deref())?;
            let mut session =
                build_session(&html, &args.url, args.minutes, &args.mode, args.store)?;
            session.set_raw_tokens_mode(args.raw);

            let selected = match args.chunk {
                Some(index) => {
                    let total = session.chunks().len();
                    let Some(chunk) = session.chunks().get(index) else {
                        anyhow::bail!("chunk {index} out of range ({total} chunks)");
                    };
                    vec![chunk.clone()]
                }
                None => session.chunks().to_vec(),
            };

            let mut rows = Vec::new();
            for chunk in &selected {
                let report = session.analyze_chunk(chunk).await?;
                rows.push(serde_json::json!({
                    "chunk_id": chunk.id,
                    "chars": chunk.char_count,
                    "report": report,
                }));
            }
            let payload = serde_json::json!({
                "schema_version": 1,
                "kind": "analyze",
                "ok": true,
                "url": args.url,
                "chunks": rows,
            });
            println!("{payload}");
        }
        Commands::Annotate(args) => {
            let html = read_input(args.input.as_deref())?;
            let mut session =
                build_session(&html, &args.url, args.minutes, &args.mode, args.store)?;
            session.set_raw_tokens_mode(args.raw);

            let mut words = 0usize;
            let mut patterns = 0usize;
            for index in 0..session.chunks().len() {
                session.go_to_chunk(index);
                if let Some(report) = session.render_current().await? {
                    words += report.words.len();
                    patterns += report.patterns.len();
                }
            }

            let annotated = session.page().to_html(session.page().root());
            match args.out {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(parent)?;
                        }
                    }
                    std::fs::write(&path, &annotated)?;
                    let payload = serde_json::json!({
                        "schema_version": 1,
                        "kind": "annotate",
                        "ok": true,
                        "out": path.to_string_lossy(),
                        "chunks": session.chunks().len(),
                        "words": words,
                        "patterns": patterns,
                    });
                    println!("{payload}");
                }
                None => println!("{annotated}"),
            }
        }
        Commands::Doctor(args) => {
            fn has_env(k: &str) -> bool {
                std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
            }

            let t0 = std::time::Instant::now();

            // Env presence (booleans only; never print values).
            let openai_configured = has_env("TADOKU_OPENAI_API_KEY") || has_env("OPENAI_API_KEY");
            let gemini_configured = has_env("TADOKU_GEMINI_API_KEY") || has_env("GEMINI_API_KEY");

            let data_dir = data_dir_from_env().unwrap_or_else(default_data_dir);

            let mut checks: Vec<serde_json::Value> = Vec::new();

            // Check: data dir is creatable + writable.
            let data_ok = (|| -> Result<()> {
                std::fs::create_dir_all(&data_dir)?;
                let probe = data_dir.join(format!(
                    "tadoku-doctor-{}.probe",
                    std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis()
                ));
                std::fs::write(&probe, b"ok")?;
                let _ = std::fs::remove_file(&probe);
                Ok(())
            })()
            .is_ok();
            checks.push(serde_json::json!({
                "name": "data_dir_writable",
                "ok": data_ok,
                "message": if data_ok { "data dir is writable" } else { "data dir is not writable" },
                "hint": if data_ok { "" } else { "Set TADOKU_DATA_DIR to a writable directory." },
            }));

            // Check: known-items file parses (a missing file is fine).
            let store_err = JsonKnownStore::open(data_dir.join("known.json")).err();
            let store_ok = store_err.is_none();
            checks.push(serde_json::json!({
                "name": "known_store_readable",
                "ok": store_ok,
                "message": match &store_err {
                    None => "known store parsed".to_string(),
                    Some(e) => e.to_string(),
                },
                "hint": if store_ok {
                    ""
                } else {
                    "The known-items file is malformed; fix it or move it aside. A missing file is fine."
                },
            }));

            // Check: segmenter self-check over a built-in page.
            let mut probe_page = tadoku_engine::page::PageTree::parse(DOCTOR_PROBE_HTML);
            let probe_units = tadoku_engine::segment::segment_page(&mut probe_page);
            let segment_ok = !probe_units.is_empty();
            checks.push(serde_json::json!({
                "name": "segmenter_selfcheck",
                "ok": segment_ok,
                "message": if segment_ok {
                    "segmenter produced units"
                } else {
                    "segmenter produced no units"
                },
                "hint": "",
            }));

            let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
            let payload = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": ok,
                "name": "tadoku",
                "version": env!("CARGO_PKG_VERSION"),
                "platform": {
                    "os": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                },
                "configured": {
                    "providers": {
                        "openai": openai_configured,
                        "gemini": gemini_configured,
                    },
                    "defaults": {
                        "openai_model": tadoku_engine::openai::DEFAULT_OPENAI_MODEL,
                        "openai_service_tier": tadoku_engine::openai::DEFAULT_OPENAI_SERVICE_TIER,
                        "gemini_model": tadoku_engine::gemini::DEFAULT_MODEL_CANDIDATES[0],
                        "chars_per_minute": tadoku_core::CHARS_PER_MINUTE,
                    },
                    "data_dir": data_dir.to_string_lossy().to_string(),
                },
                "checks": checks,
                "elapsed_ms": t0.elapsed().as_millis(),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => {
                    println!("tadoku {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
                    println!(
                        "data_dir: {}",
                        payload["configured"]["data_dir"].as_str().unwrap_or("")
                    );
                    println!(
                        "providers: openai={} gemini={}",
                        payload["configured"]["providers"]["openai"]
                            .as_bool()
                            .unwrap_or(false),
                        payload["configured"]["providers"]["gemini"]
                            .as_bool()
                            .unwrap_or(false),
                    );
                    println!("checks:");
                    if let Some(arr) = payload["checks"].as_array() {
                        for c in arr {
                            let name = c["name"].as_str().unwrap_or("?");
                            let ok = c["ok"].as_bool().unwrap_or(false);
                            println!("- {}: {}", name, if ok { "ok" } else { "fail" });
                        }
                    }
                }
                _ => println!("{payload}"),
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "tadoku",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("tadoku {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }

    Ok(())
}

const DOCTOR_PROBE_HTML: &str = "<div id=\"main_text\">\
<p>吾輩は猫である。名前はまだ無い。どこで生れたかとんと見当がつかぬ。</p>\
<p>何でも薄暗いじめじめした所でニャーニャー泣いていた事だけは記憶している。</p>\
</div>";

fn read_input(path: Option<&std::path::Path>) -> Result<String> {
    use std::io::Read;
    match path {
        Some(p) => Ok(std::fs::read_to_string(p)?),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn parse_mode(s: &str) -> Result<ReadingMode> {
    match s.to_ascii_lowercase().as_str() {
        "intensive" => Ok(ReadingMode::Intensive),
        "extensive" => Ok(ReadingMode::Extensive),
        other => anyhow::bail!("unknown mode: {other} (allowed: intensive, extensive)"),
    }
}

fn build_session(
    html: &str,
    url: &str,
    minutes: u32,
    mode: &str,
    store: Option<std::path::PathBuf>,
) -> Result<ReaderSession> {
    let settings = SessionSettings {
        chunk_minutes: minutes,
        mode: parse_mode(mode)?,
        ..SessionSettings::default()
    };
    let session = ReaderSession::new(html, url, settings);
    let store_path = store.unwrap_or_else(|| {
        data_dir_from_env()
            .unwrap_or_else(default_data_dir)
            .join("known.json")
    });
    let known = JsonKnownStore::open(store_path)?;
    Ok(session.with_known_store(Arc::new(known))?)
}

fn data_dir_from_env() -> Option<std::path::PathBuf> {
    std::env::var("TADOKU_DATA_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(std::path::PathBuf::from)
}

fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tadoku")
}
