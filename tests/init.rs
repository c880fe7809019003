use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_locus"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "locus init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join(".locus.toml");
    assert!(config_path.exists(), ".locus.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    for section in ["[llm]", "[embedding]", "[ingest]", "[retrieval]", "[storage]", "[github]"] {
        assert!(content.contains(section), "{section} missing");
    }

    // Everything is commented out, so it parses to the defaults.
    let config: locus_core::LocusConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.retrieval.max_limit, 20);
    assert_eq!(config.llm.max_concurrent, 4);
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".locus.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_locus"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert_eq!(
        std::fs::read_to_string(dir.path().join(".locus.toml")).unwrap(),
        "# existing"
    );
}
