use anyhow::Result;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const PROVIDER_KEYS: &[&str] = &[
    "DASHSCOPE_API_KEY",
    "ALIYUN_API_KEY",
    "OPENAI_API_KEY",
    "EMBEDDING_PROVIDER",
    "VECTORSTORE_PATH",
    "COLLECTION_NAME",
];

/// Helper to run the CLI binary against an index inside `temp_dir`
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<Output> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_docqa-retriever"));
    for key in PROVIDER_KEYS {
        cmd.env_remove(key);
    }
    cmd.current_dir(temp_dir.path())
        .arg("--persist-dir")
        .arg(temp_dir.path().join("index"))
        .args(args)
        .env("RUST_LOG", "error");

    Ok(cmd.output()?)
}

fn write_docs(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join("grid.txt"),
        "Battery storage balances the grid during evening peaks.",
    )?;
    std::fs::write(dir.join("hydro.txt"), "Pumped hydro stores energy for days.")?;
    Ok(())
}

#[test]
fn test_search_before_ingest_is_informational() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let output = run_cli(&temp_dir, &["search", "storage"])?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No collection 'energy_docs' found"));
    Ok(())
}

#[test]
fn test_ingest_search_stats_delete() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let docs = temp_dir.path().join("docs");
    write_docs(&docs)?;

    let output = run_cli(
        &temp_dir,
        &["--format", "json", "ingest", docs.to_string_lossy().as_ref()],
    )?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(summary["chunks"], 2);
    assert_eq!(summary["embedding_mode"], "hash_affinity");

    let output = run_cli(
        &temp_dir,
        &["--format", "json", "search", "Pumped hydro stores energy for days.", "-k", "1"],
    )?;
    assert!(output.status.success());
    let results: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(results.as_array().map(Vec::len), Some(1));
    assert_eq!(results[0]["content"], "Pumped hydro stores energy for days.");
    assert_eq!(results[0]["metadata"]["file_name"], "hydro.txt");

    let output = run_cli(&temp_dir, &["--format", "json", "stats"])?;
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(stats["record_count"], 2);
    assert_eq!(stats["dimension"], 384);

    let output = run_cli(&temp_dir, &["--format", "json", "delete"])?;
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["success"], true);
    assert!(temp_dir.path().join("index").is_dir());

    let output = run_cli(&temp_dir, &["stats"])?;
    assert!(String::from_utf8_lossy(&output.stdout).contains("No collection"));
    Ok(())
}

#[test]
fn test_ingest_missing_path_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let output = run_cli(&temp_dir, &["ingest", "does-not-exist.txt"])?;

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
    Ok(())
}
