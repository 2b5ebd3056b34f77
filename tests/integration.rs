use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragchat");
    path
}

fn setup_test_env(extra_config: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("solar.md"),
        "Solar panels convert sunlight into electricity using photovoltaic cells.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ragchat.sqlite"

[server]
bind = "127.0.0.1:7341"
{}
"#,
        root.display(),
        extra_config
    );

    let config_path = config_dir.join("ragchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Pull the ID out of `Created chat <id>`.
fn created_chat_id(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("Created chat "))
        .map(|id| id.trim().to_string())
        .unwrap_or_else(|| panic!("no chat id in output: {}", stdout))
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_ragchat(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/ragchat.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, _, success1) = run_ragchat(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ragchat(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_ragchat(&missing, &["documents"]);
    assert!(!success);
    assert!(stderr.contains("config"), "stderr={}", stderr);
}

#[test]
fn test_ingest_without_embeddings_keeps_document() {
    let (tmp, config_path) = setup_test_env("");
    run_ragchat(&config_path, &["init"]);

    let file = tmp.path().join("files/solar.md");
    let (_, stderr, success) = run_ragchat(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(!success, "ingest should fail with embeddings disabled");
    assert!(stderr.contains("not indexed"), "stderr={}", stderr);

    let (stdout, _, success) = run_ragchat(&config_path, &["documents"]);
    assert!(success);
    let line = stdout
        .lines()
        .find(|l| l.contains("solar"))
        .unwrap_or_else(|| panic!("document missing from list: {}", stdout));
    assert!(line.contains(" no "), "document should not be indexed: {}", line);
}

#[test]
fn test_ingest_in_rebuild_mode_defers_indexing() {
    let (tmp, config_path) = setup_test_env("[retrieval]\nindex_mode = \"rebuild\"\n");
    run_ragchat(&config_path, &["init"]);

    let file = tmp.path().join("files/solar.md");
    let (stdout, stderr, success) = run_ragchat(
        &config_path,
        &["ingest", file.to_str().unwrap(), "--title", "Solar Power"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Solar Power"));
    assert!(stdout.contains("deferred"));
}

#[test]
fn test_documents_empty() {
    let (_tmp, config_path) = setup_test_env("");
    let (stdout, _, success) = run_ragchat(&config_path, &["documents"]);
    assert!(success);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_chat_new_list_show() {
    let (_tmp, config_path) = setup_test_env("");
    run_ragchat(&config_path, &["init"]);

    let (stdout, _, success) = run_ragchat(&config_path, &["chat", "new"]);
    assert!(success);
    assert!(stdout.contains("New Chat 1"));
    let first = created_chat_id(&stdout);

    let (stdout, _, success) = run_ragchat(&config_path, &["chat", "new", "--title", "Physics"]);
    assert!(success);
    let second = created_chat_id(&stdout);
    assert_ne!(first, second);

    let (stdout, _, success) = run_ragchat(&config_path, &["chat", "list"]);
    assert!(success);
    assert!(stdout.contains("New Chat 1"));
    assert!(stdout.contains("Physics"));
    assert!(stdout.contains("(no messages)"));

    let (stdout, _, success) = run_ragchat(&config_path, &["chat", "show", &second]);
    assert!(success);
    assert!(stdout.contains("Physics"));
    assert!(stdout.contains("Messages (0)"));
}

#[test]
fn test_chat_show_unknown() {
    let (_tmp, config_path) = setup_test_env("");
    let (_, stderr, success) = run_ragchat(&config_path, &["chat", "show", "no-such-chat"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr={}", stderr);
}

#[test]
fn test_ask_unknown_chat() {
    let (_tmp, config_path) = setup_test_env("");
    let (_, stderr, success) = run_ragchat(&config_path, &["ask", "no-such-chat", "hello"]);
    assert!(!success);
    assert!(stderr.contains("chat not found"), "stderr={}", stderr);
}

#[test]
fn test_ask_without_generation_leaves_no_messages() {
    let (_tmp, config_path) = setup_test_env("");
    run_ragchat(&config_path, &["init"]);

    let (stdout, _, _) = run_ragchat(&config_path, &["chat", "new"]);
    let chat_id = created_chat_id(&stdout);

    let (_, stderr, success) = run_ragchat(&config_path, &["ask", &chat_id, "What is solar power?"]);
    assert!(!success, "ask should fail with generation disabled");
    assert!(stderr.contains("generation"), "stderr={}", stderr);

    let (stdout, _, success) = run_ragchat(&config_path, &["chat", "show", &chat_id]);
    assert!(success);
    assert!(
        stdout.contains("Messages (0)"),
        "user message should have been rolled back: {}",
        stdout
    );
}

/// Minimal PDF with one text object, built with correct xref offsets so
/// `pdf-extract` can parse it.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

#[test]
fn test_ingest_directory_skips_unreadable_pdf() {
    let (tmp, config_path) = setup_test_env("[retrieval]\nindex_mode = \"rebuild\"\n");
    run_ragchat(&config_path, &["init"]);

    let files = tmp.path().join("files");
    fs::create_dir_all(files.join("papers")).unwrap();
    fs::write(files.join("papers/wind.txt"), "Wind turbines turn moving air into power.").unwrap();
    fs::write(files.join("papers/bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(files.join("papers/tides.pdf"), minimal_pdf("tidal energy")).unwrap();
    fs::write(files.join("image.png"), [0u8, 159, 146, 150]).unwrap();

    let (stdout, stderr, success) = run_ragchat(&config_path, &["ingest", files.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("skipped  papers/bad.pdf"), "stdout={}", stdout);
    assert!(stdout.contains("papers/tides.pdf"), "stdout={}", stdout);
    assert!(stdout.contains("stored   papers/wind.txt"), "stdout={}", stdout);
    assert!(stdout.contains("stored   solar.md"), "stdout={}", stdout);
    assert!(!stdout.contains("image.png"), "stdout={}", stdout);
    assert!(stdout.contains("of 4 files"), "stdout={}", stdout);

    let (stdout, _, success) = run_ragchat(&config_path, &["documents"]);
    assert!(success);
    assert!(stdout.contains("wind"));
    assert!(stdout.contains("solar"));
    assert!(!stdout.contains("bad"));
}

#[test]
fn test_ingest_directory_with_glob() {
    let (tmp, config_path) = setup_test_env("[retrieval]\nindex_mode = \"rebuild\"\n");
    run_ragchat(&config_path, &["init"]);

    let files = tmp.path().join("files");
    fs::write(files.join("notes.txt"), "Geothermal plants tap heat from the earth.").unwrap();

    let (stdout, stderr, success) = run_ragchat(
        &config_path,
        &["ingest", files.to_str().unwrap(), "--glob", "**/*.txt"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("stored   notes.txt"), "stdout={}", stdout);
    assert!(!stdout.contains("solar.md"), "stdout={}", stdout);
    assert!(stdout.contains("Ingested 1 of 1 files"), "stdout={}", stdout);
}

#[test]
fn test_ingest_directory_reports_unindexed_documents() {
    let (tmp, config_path) = setup_test_env("");
    run_ragchat(&config_path, &["init"]);

    let files = tmp.path().join("files");
    let (stdout, stderr, success) = run_ragchat(&config_path, &["ingest", files.to_str().unwrap()]);
    assert!(!success, "ingest should fail with embeddings disabled");
    assert!(stdout.contains("not indexed"), "stdout={}", stdout);
    assert!(stderr.contains("retried on the next sync"), "stderr={}", stderr);

    let (stdout, _, _) = run_ragchat(&config_path, &["documents"]);
    assert!(stdout.contains("solar"), "document should be kept: {}", stdout);
}

#[test]
fn test_ingest_directory_rejects_title() {
    let (tmp, config_path) = setup_test_env("");
    let files = tmp.path().join("files");
    let (_, stderr, success) = run_ragchat(
        &config_path,
        &["ingest", files.to_str().unwrap(), "--title", "All"],
    );
    assert!(!success);
    assert!(stderr.contains("--title"), "stderr={}", stderr);
}
