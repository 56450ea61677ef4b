//! Multi-format indexing through the `kidx` binary: DOCX extraction, corrupt
//! PDFs, stored mime types and the file size limit.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Scratch root with a `files/` dir holding one markdown file, and a config
/// using the hashing embedder and a 1000-byte file limit.
fn setup_file_support_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("readme.md"), "# Readme\n\nPlain text file for tests.\n").unwrap();

    let config_content = format!(
        r#"[db]
path = '{}'

[loader]
max_file_size = 1000

[embedding]
provider = "hashing"
model = "hashing-128"
dims = 128
"#,
        root.join("data").join("kidx.sqlite").display()
    );
    let config_path = root.join("kidx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kidx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_kidx"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kidx: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn docx_indexed_and_searchable() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("office.docx"), minimal_docx_with_text("office test phrase")).unwrap();

    let (stdout, stderr, success) = run_kidx(&config_path, &["index", files_dir.to_str().unwrap()]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 processed"), "{}", stdout);

    let (search_out, _, success) =
        run_kidx(&config_path, &["search", "office test phrase", "--top-k", "1"]);
    assert!(success);
    assert!(
        search_out.contains("office.docx") && search_out.contains("office test phrase"),
        "search should return the docx text, got: {}",
        search_out
    );
}

#[test]
fn docx_mime_type_stored() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("office.docx"), minimal_docx_with_text("stored type")).unwrap();

    run_kidx(&config_path, &["index", files_dir.to_str().unwrap()]);
    let (sources, _, success) = run_kidx(&config_path, &["sources"]);
    assert!(success);
    assert!(
        sources.contains("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "{}",
        sources
    );
    assert!(sources.contains("text/markdown"));
}

#[test]
fn corrupt_pdf_fails_alone() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(files_dir.join("good.md"), "# Good\n\nThis is good.\n").unwrap();

    let (stdout, stderr, success) = run_kidx(&config_path, &["index", files_dir.to_str().unwrap()]);
    assert!(success, "batch must succeed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("files: 3 total, 2 processed, 0 skipped, 1 failed"),
        "{}",
        stdout
    );
    assert!(stderr.contains("bad.pdf"), "{}", stderr);
}

#[test]
fn oversized_file_counted_as_failure() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("big.txt"), "x".repeat(2000)).unwrap();

    let (stdout, stderr, success) = run_kidx(&config_path, &["index", files_dir.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("1 processed"), "{}", stdout);
    assert!(stdout.contains("1 failed"), "{}", stdout);
    assert!(stderr.contains("file too large"), "{}", stderr);
}

#[test]
fn unsupported_files_ignored_by_directory_walk() {
    let (tmp, config_path) = setup_file_support_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("photo.png"), [0u8, 1, 2, 3]).unwrap();

    let (stdout, _, success) = run_kidx(&config_path, &["index", files_dir.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("files: 1 total, 1 processed"), "{}", stdout);

    let (stdout, stderr, success) = run_kidx(
        &config_path,
        &["index", files_dir.join("photo.png").to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("1 failed"), "{}", stdout);
    assert!(stderr.contains("unsupported file type"), "{}", stderr);
}
