use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn vctx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("vctx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::create_dir_all(root.join("_data")).unwrap();
    fs::write(
        root.join("_data/collections.yml"),
        "hanuman-chalisa:\n  title: Hanuman Chalisa\n  subject: Hanuman\n  subject_type: deity\n",
    )
    .unwrap();

    let verses_dir = root.join("_verses/hanuman-chalisa");
    fs::create_dir_all(&verses_dir).unwrap();
    fs::write(
        verses_dir.join("chaupai-01.md"),
        "---\ntitle_en: First Chaupai\ndevanagari: जय हनुमान ज्ञान गुन सागर\ntransliteration: jaya hanumāna jñāna guna sāgara\n---\n\nCommentary body.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[paths]
project_dir = "{}"

[chunking]
max_chars = 4000

[retrieval]
top_k = 8

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536

[generation]
provider = "openai"
model = "gpt-4o"
"#,
        root.display()
    );

    let config_path = config_dir.join("vctx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_vctx(config_path: &Path, args: &[&str], api_key: Option<&str>) -> (String, String, bool) {
    let binary = vctx_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config").arg(config_path.to_str().unwrap()).args(args);
    match api_key {
        Some(key) => {
            cmd.env("OPENAI_API_KEY", key);
        }
        None => {
            cmd.env_remove("OPENAI_API_KEY");
        }
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run vctx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_missing_credential_is_fatal_before_processing() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_vctx(
        &config_path,
        &["annotate", "--collection", "hanuman-chalisa", "--all"],
        None,
    );
    assert!(!success);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr: {}", stderr);

    // No verse file was touched.
    let verse = fs::read_to_string(
        tmp.path().join("_verses/hanuman-chalisa/chaupai-01.md"),
    )
    .unwrap();
    assert!(!verse.contains("puranic_context"));
}

#[test]
fn test_index_missing_file_fails() {
    let (tmp, config_path) = setup_test_env();

    let missing = tmp.path().join("sources/nope.txt");
    let (_, stderr, success) = run_vctx(
        &config_path,
        &["index-sources", "--file", missing.to_str().unwrap()],
        Some("test-key"),
    );
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_annotate_unknown_collection_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_vctx(
        &config_path,
        &["annotate", "--collection", "unknown-collection", "--all"],
        Some("test-key"),
    );
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_annotate_unknown_verse_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_vctx(
        &config_path,
        &[
            "annotate",
            "--collection",
            "hanuman-chalisa",
            "--verse",
            "chaupai-99",
        ],
        Some("test-key"),
    );
    assert!(!success);
    assert!(stderr.contains("Verse file not found"), "stderr: {}", stderr);
}

#[test]
fn test_annotate_requires_verse_or_all() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_vctx(
        &config_path,
        &["annotate", "--collection", "hanuman-chalisa"],
        Some("test-key"),
    );
    assert!(!success);
    assert!(
        stderr.contains("--verse or --all"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad_config = tmp.path().join("config/bad.toml");
    fs::write(&bad_config, "[embedding]\nprovider = \"bedrock\"\n").unwrap();

    let (_, stderr, success) = run_vctx(
        &bad_config,
        &["annotate", "--collection", "hanuman-chalisa", "--all"],
        Some("test-key"),
    );
    assert!(!success);
    assert!(
        stderr.contains("Unknown embedding provider"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn test_zero_chunk_size_rejected() {
    let (tmp, config_path) = setup_test_env();
    let source = tmp.path().join("src.txt");
    fs::write(&source, "Some text.").unwrap();

    let (_, stderr, success) = run_vctx(
        &config_path,
        &[
            "index-sources",
            "--file",
            source.to_str().unwrap(),
            "--chunk-size",
            "0",
        ],
        Some("test-key"),
    );
    assert!(!success);
    assert!(stderr.contains("--chunk-size"), "stderr: {}", stderr);
}
