use std::collections::HashMap;
use std::io::Write;

use dbconf::config::{ConfigError, Resolver, Source, ENV_DRIVER};
use tempfile::NamedTempFile;

const ENV_URL: &str = "jdbc:mysql://db.local:3306/app?useUnicode=true&characterEncoding=UTF-8&useSSL=false&serverTimezone=Asia/Shanghai&allowPublicKeyRetrieval=true&connectTimeout=5000";

const FULL_ENV: &[(&str, &str)] = &[
    ("DB_HOST", "db.local"),
    ("DB_PORT", "3306"),
    ("DB_DATABASE", "app"),
    ("DB_USERNAME", "u"),
    ("DB_PASSWORD", "p"),
];

const DOCUMENT: &str = "\
database:
  driver: com.mysql.cj.jdbc.Driver
  host: file.local
  port: 3307
  database: shop
  username: reader
  password: hunter2
";

fn resolver(env: &[(&str, &str)], path: &std::path::Path) -> Resolver {
    let vars: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Resolver::new(move |key: &str| vars.get(key).cloned(), path)
}

fn document(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn complete_environment_ignores_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = resolver(FULL_ENV, &dir.path().join("application.yml"))
        .resolve()
        .unwrap();

    assert_eq!(config.url(), ENV_URL);
    assert_eq!(config.source(), &Source::Environment);
    assert_eq!(config.driver(), ENV_DRIVER);
    assert_eq!(config.username(), "u");
    assert_eq!(config.password(), "p");
}

#[test]
fn complete_environment_ignores_malformed_file() {
    let file = document("database: [not, a, mapping");
    let config = resolver(FULL_ENV, file.path()).resolve().unwrap();
    assert_eq!(config.url(), ENV_URL);
}

#[test]
fn partial_environment_falls_back_to_file_entirely() {
    let file = document(DOCUMENT);

    // Every non-empty strict subset of the five variables.
    for mask in 1u32..31 {
        let env: Vec<(&str, &str)> = FULL_ENV
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << *i) != 0)
            .map(|(_, pair)| *pair)
            .collect();

        let config = resolver(&env, file.path()).resolve().unwrap();
        assert_eq!(config.source(), &Source::File(file.path().to_path_buf()));
        assert_eq!(config.url(), "jdbc:mysql://file.local:3307/shop", "env {:?}", env);
        assert_eq!(config.username(), "reader");
        assert_eq!(config.password(), "hunter2");
    }
}

#[test]
fn parameters_keep_document_order() {
    let file = document(&format!("{}  parameters:\n    a: \"1\"\n    b: \"2\"\n", DOCUMENT));
    let config = resolver(&[], file.path()).resolve().unwrap();
    assert_eq!(config.url(), "jdbc:mysql://file.local:3307/shop?a=1&b=2");

    let file = document(&format!("{}  parameters:\n    b: \"2\"\n    a: \"1\"\n", DOCUMENT));
    let config = resolver(&[], file.path()).resolve().unwrap();
    assert!(config.url().ends_with("?b=2&a=1"));
}

#[test]
fn no_parameters_means_no_query() {
    let file = document(DOCUMENT);
    let config = resolver(&[], file.path()).resolve().unwrap();
    assert!(!config.url().contains('?'));
    assert!(config.parameters().is_empty());
}

#[test]
fn missing_database_section_is_invalid() {
    let file = document("server:\n  port: 8080\n");
    let err = resolver(&[("DB_HOST", "db.local")], file.path())
        .resolve()
        .unwrap_err();

    match err {
        ConfigError::Invalid { reason, .. } => assert!(reason.contains("`database`"), "{}", reason),
        other => panic!("expected invalid config, got {:?}", other),
    }
}

#[test]
fn missing_file_without_environment_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("application.yml");
    let err = resolver(&[], &path).resolve().unwrap_err();

    match err {
        ConfigError::Missing { path: reported } => assert_eq!(reported, path),
        other => panic!("expected missing config, got {:?}", other),
    }
}

#[test]
fn malformed_document_keeps_its_cause() {
    let file = document("database:\n  host: [unterminated\n");
    let err = resolver(&[], file.path()).resolve().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn string_port_is_accepted() {
    let file = document(&DOCUMENT.replace("3307", "\"3308\""));
    let config = resolver(&[], file.path()).resolve().unwrap();
    assert_eq!(config.port(), "3308");
}
