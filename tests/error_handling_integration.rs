use chunkagg::{aggregate_file, PipelineConfig, PipelineError};

#[path = "integration/mod.rs"]
mod test_utils;
use test_utils::{config_with, TestFixture};

/// Test missing input is reported as a configuration error before any work starts
#[tokio::test]
async fn test_missing_input_file() {
    let fixture = TestFixture::new();
    let missing = fixture.root_path.join("does-not-exist.txt");

    let err = aggregate_file(&missing, &PipelineConfig::default()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Config(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("does-not-exist.txt"));
}

/// Test zero chunk size is rejected even for an empty file
#[tokio::test]
async fn test_zero_chunk_size() {
    let fixture = TestFixture::new();
    let path = fixture.create_measurements("empty.txt", "");

    let err = aggregate_file(&path, &config_with(0, 1, 1)).await.unwrap_err();
    assert!(err.is_config());
}

/// Test a directory path is not accepted as input
#[tokio::test]
async fn test_directory_input() {
    let fixture = TestFixture::new();
    let err = aggregate_file(&fixture.root_path, &PipelineConfig::default()).await.unwrap_err();
    assert!(err.is_config());
}

/// Test files full of garbage still complete with an empty result
#[tokio::test]
async fn test_only_malformed_lines() {
    let fixture = TestFixture::new();
    let path = fixture.create_measurements("garbage.txt", "no\ndelimiters\nhere;x\n;1.0\n");

    let output = aggregate_file(&path, &config_with(4, 2, 2)).await
        .expect("Malformed records are never fatal");

    assert_eq!(output.summary.to_string(), "{}");
    assert_eq!(output.stats.counters.malformed_records, 4);
    assert_eq!(output.stats.counters.records_aggregated, 0);
}

/// Test unreadable input surfaces as an I/O failure naming the file
#[tokio::test]
async fn test_unreadable_input() {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let fixture = TestFixture::new();
        let path = fixture.create_measurements("restricted.txt", "A;1.0\nB;2.0\n");

        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o000);
        std::fs::set_permissions(&path, perms).unwrap();

        // Privileged users can still open the file; nothing to test then
        if std::fs::File::open(&path).is_ok() {
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o644);
            std::fs::set_permissions(&path, perms).unwrap();
            return;
        }

        let result = aggregate_file(&path, &config_with(4, 2, 2)).await;

        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o644);
        std::fs::set_permissions(&path, perms).unwrap();

        match result {
            Err(PipelineError::Io { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected I/O failure, got {other:?}"),
        }
    }
}
