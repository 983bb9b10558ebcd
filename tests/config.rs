// ABOUTME: Integration tests for configuration parsing and validation.
// ABOUTME: Tests YAML parsing, probe defaults, and env references.

use flotilla::config::*;
use flotilla::types::UnitName;
use std::collections::HashMap;
use std::time::Duration;

mod parsing {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let yaml = r#"
stack: homelab
units:
  db:
    start: "docker compose up -d db"
    stop: "docker compose stop db"
"#;
        let config = StackConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.stack.as_str(), "homelab");
        assert_eq!(config.profile, Profile::Dev);
        assert_eq!(config.units.len(), 1);

        let db = &config.units[&UnitName::new("db").unwrap()];
        assert!(db.depends_on.is_empty());
        assert!(db.ports.is_empty());
        assert!(db.probe.is_none());
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
stack: homelab
profile: prod
ports:
  range: 9000-9100

units:
  postgres:
    start: "docker compose up -d postgres"
    stop: "docker compose stop postgres"
    ports:
      - "5432:5432"
    probe:
      tcp:
        port: 5432
      retries: 5
      delay: 2s

  api:
    depends_on: [postgres]
    start: "docker compose up -d api"
    stop: "docker compose stop api"
    ports:
      - "8080:8080"
      - "8443:8443"
    probe:
      http:
        port: 8080
        path: /healthz
        accept: [200, 204]
      start_period: 30s

env:
  DATABASE_PASSWORD:
    env: DATABASE_PASSWORD
  LOG_LEVEL: info
"#;
        let config = StackConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.profile, Profile::Prod);
        assert_eq!(config.ports.range, PortRange::new(9000, 9100).unwrap());
        assert_eq!(config.units.len(), 2);

        let postgres = &config.units[&UnitName::new("postgres").unwrap()];
        assert_eq!(postgres.ports.len(), 1);
        assert_eq!(postgres.ports[0].preferred_host, 5432);
        let probe = postgres.probe.as_ref().unwrap();
        assert_eq!(probe.retries, 5);
        assert_eq!(probe.delay, Duration::from_secs(2));
        assert!(matches!(probe.target, ProbeTarget::Tcp(_)));

        let api = &config.units[&UnitName::new("api").unwrap()];
        assert_eq!(api.depends_on.len(), 1);
        let probe = api.probe.as_ref().unwrap();
        assert_eq!(probe.start_period, Duration::from_secs(30));
        match &probe.target {
            ProbeTarget::Http(http) => {
                assert_eq!(http.path, "/healthz");
                assert_eq!(http.accept.len(), 2);
            }
            other => panic!("expected http probe, got {other:?}"),
        }

        assert_eq!(
            config.env.get("LOG_LEVEL"),
            Some(&EnvValue::Literal("info".to_string()))
        );
        assert!(matches!(
            config.env.get("DATABASE_PASSWORD"),
            Some(EnvValue::FromEnv { .. })
        ));
    }

    #[test]
    fn probe_defaults_apply() {
        let yaml = r#"
stack: homelab
units:
  db:
    start: "start db"
    stop: "stop db"
    probe:
      tcp:
        port: 5432
"#;
        let config = StackConfig::from_yaml(yaml).unwrap();
        let probe = config.units[&UnitName::new("db").unwrap()]
            .probe
            .as_ref()
            .unwrap()
            .clone();
        assert_eq!(probe.retries, 3);
        assert_eq!(probe.delay, Duration::from_secs(10));
        assert_eq!(probe.timeout, Duration::from_secs(5));
        assert_eq!(probe.start_period, Duration::ZERO);
    }

    #[test]
    fn missing_stack_returns_error() {
        let yaml = r#"
units:
  db:
    start: "start db"
    stop: "stop db"
"#;
        let err = StackConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("stack"));
    }

    #[test]
    fn empty_units_returns_error() {
        let yaml = r#"
stack: homelab
units: {}
"#;
        let err = StackConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one unit"));
    }

    #[test]
    fn uppercase_unit_name_returns_error() {
        let yaml = r#"
stack: homelab
units:
  Postgres:
    start: "start"
    stop: "stop"
"#;
        assert!(StackConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn malformed_port_returns_error() {
        let yaml = r#"
stack: homelab
units:
  db:
    start: "start"
    stop: "stop"
    ports:
      - "not-a-port"
"#;
        let err = StackConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("HOST:CONTAINER"));
    }

    #[test]
    fn malformed_port_range_returns_error() {
        let yaml = r#"
stack: homelab
ports:
  range: "9000"
units:
  db:
    start: "start"
    stop: "stop"
"#;
        assert!(StackConfig::from_yaml(yaml).is_err());
    }
}

mod env_values {
    use super::*;

    #[test]
    fn literal_resolves_to_itself() {
        let value = EnvValue::Literal("info".to_string());
        assert_eq!(value.resolve().unwrap(), "info");
    }

    #[test]
    fn missing_reference_falls_back_to_default() {
        let value = EnvValue::FromEnv {
            var: "FLOTILLA_TEST_UNSET_VAR".to_string(),
            default: Some("fallback".to_string()),
        };
        assert_eq!(value.resolve().unwrap(), "fallback");
    }

    #[test]
    fn missing_reference_without_default_errors() {
        let value = EnvValue::FromEnv {
            var: "FLOTILLA_TEST_UNSET_VAR_2".to_string(),
            default: None,
        };
        let err = value.resolve().unwrap_err();
        assert!(err.to_string().contains("FLOTILLA_TEST_UNSET_VAR_2"));
    }

    #[test]
    fn resolve_map_covers_all_keys() {
        let map = HashMap::from([
            (
                "A".to_string(),
                EnvValue::Literal("1".to_string()),
            ),
            (
                "B".to_string(),
                EnvValue::FromEnv {
                    var: "FLOTILLA_TEST_UNSET_VAR_3".to_string(),
                    default: Some("2".to_string()),
                },
            ),
        ]);
        let resolved = resolve_env_map(&map).unwrap();
        assert_eq!(resolved.get("A").map(String::as_str), Some("1"));
        assert_eq!(resolved.get("B").map(String::as_str), Some("2"));
    }
}

mod discovery {
    use super::*;

    #[test]
    fn discover_finds_config_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "stack: found\nunits:\n  db:\n    start: s\n    stop: t\n",
        )
        .unwrap();

        let config = StackConfig::discover(dir.path()).unwrap();
        assert_eq!(config.stack.as_str(), "found");
    }

    #[test]
    fn discover_errors_when_no_config_present() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StackConfig::discover(dir.path()).is_err());
    }

    #[test]
    fn state_dir_override_is_honored() {
        let yaml = r#"
stack: homelab
state_dir: /var/lib/flotilla
units:
  db:
    start: s
    stop: t
"#;
        let config = StackConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.state_dir(),
            std::path::PathBuf::from("/var/lib/flotilla")
        );
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), Some("fresh"), false).unwrap();

        let err = init_config(dir.path(), Some("fresh"), false).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // Force succeeds, and the written template parses back.
        init_config(dir.path(), Some("fresh"), true).unwrap();
        let config = StackConfig::discover(dir.path()).unwrap();
        assert_eq!(config.stack.as_str(), "fresh");
    }
}
