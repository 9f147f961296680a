//! CLI integration tests for openrpc-shapes binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const DEVICE: &str = "tests/fixtures/device.json";
const TYPES: &str = "tests/fixtures/types.json";

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("openrpc-shapes"))
}

// Helper to create a temp document file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

mod resolve_command {
    use super::*;

    #[test]
    fn resolves_composed_schema() {
        cmd()
            .args(["resolve", DEVICE, "--schema", "DeviceVersion", "--bundle", TYPES])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""title":"DeviceVersion""#))
            .stdout(predicate::str::contains(r#""readable":{"type":"string"}"#))
            .stdout(predicate::str::contains("allOf").not());
    }

    #[test]
    fn resolves_method() {
        cmd()
            .args(["resolve", DEVICE, "--method", "onNameChanged", "--bundle", TYPES, "--collapse-unions"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""result":{"name":"name","schema":{"type":"string"}}"#));
    }

    #[test]
    fn resolve_with_pretty() {
        cmd()
            .args(["resolve", DEVICE, "--schema", "AudioProfile", "--pretty"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\n  \"title\": \"AudioProfile\""));
    }

    #[test]
    fn resolve_with_output_file() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("tree.json");

        cmd()
            .args(["resolve", DEVICE, "--schema", "Tree", "--output", output.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());

        let content = fs::read_to_string(&output).unwrap();
        assert!(content.contains(r##""$ref":"#/components/schemas/Tree""##));
    }

    #[test]
    fn requires_a_target() {
        cmd()
            .args(["resolve", DEVICE])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--schema"));
    }

    #[test]
    fn schema_and_method_conflict() {
        cmd()
            .args(["resolve", DEVICE, "--schema", "Tree", "--method", "screen"])
            .assert()
            .failure();
    }
}

mod project_command {
    use super::*;

    #[test]
    fn projects_enum_schema() {
        cmd()
            .args(["project", DEVICE, "--schema", "AudioProfile"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""target":"schema""#))
            .stdout(predicate::str::contains(r#""key":"DOLBY_DIGITAL_5_1""#));
    }

    #[test]
    fn projects_tuple_as_array() {
        cmd()
            .args(["project", DEVICE, "--schema", "Resolution", "--tuples-as-arrays"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""type_ref":"number[]""#));
    }

    #[test]
    fn projects_event_with_proxy() {
        cmd()
            .args([
                "project",
                DEVICE,
                "--method",
                "onNameChanged",
                "--bundle",
                TYPES,
                "--proxy",
                "string=StringEvent",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("StringEvent"))
            .stdout(predicate::str::contains(r#""event":true"#));
    }

    #[test]
    fn rejects_bad_proxy() {
        cmd()
            .args(["project", DEVICE, "--method", "screen", "--proxy", "string"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("PRIMITIVE=NAME"));
    }

    #[test]
    fn custom_profile() {
        let dir = TempDir::new().unwrap();
        let profile = write_temp_file(
            &dir,
            "kotlin.json",
            r#"{ "name": "kotlin", "templates": { "qualified": "${module}::${type}" } }"#,
        );

        cmd()
            .args([
                "project",
                DEVICE,
                "--method",
                "firmware",
                "--bundle",
                TYPES,
                "--profile",
                profile.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Types::SemanticVersion"));
    }
}

mod generate_command {
    use super::*;

    #[test]
    fn generates_module() {
        cmd()
            .args(["generate", DEVICE, "--bundle", TYPES])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""module":"Device""#))
            .stdout(predicate::str::contains(r#""name":"ScreenOptions""#))
            .stdout(predicate::str::contains(r#""errors":[]"#));
    }

    #[test]
    fn module_errors_exit_nonzero_with_output() {
        let dir = TempDir::new().unwrap();
        let broken = write_temp_file(
            &dir,
            "broken.json",
            r##"{
                "info": { "title": "Broken" },
                "methods": [],
                "components": {
                    "schemas": {
                        "Good": { "type": "string" },
                        "Bad": { "allOf": [{ "type": "string" }, { "type": "boolean" }] }
                    }
                }
            }"##,
        );

        cmd()
            .args(["generate", broken.to_str().unwrap()])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(r#""name":"Good""#))
            .stderr(predicate::str::contains("Broken"))
            .stderr(predicate::str::contains("irreconcilable union"));
    }
}

mod localize_command {
    use super::*;

    #[test]
    fn copies_bundle_schemas_into_components() {
        cmd()
            .args(["localize", DEVICE, "--bundle", TYPES])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r##""$ref":"#/components/schemas/SemanticVersion""##,
            ))
            .stdout(predicate::str::contains(r#""ListenResponse":{"#))
            .stdout(predicate::str::contains("https://meta.example.com/types#").not());
    }

    #[test]
    fn missing_bundle_is_an_error() {
        cmd()
            .args(["localize", DEVICE])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("unresolved reference"));
    }
}

mod error_handling {
    use super::*;

    #[test]
    fn file_not_found() {
        cmd()
            .args(["resolve", "/nonexistent/device.json", "--schema", "Tree"])
            .assert()
            .code(3)
            .stderr(
                predicate::str::contains("not found").or(predicate::str::contains("No such file")),
            );
    }

    #[test]
    fn invalid_json_document() {
        let dir = TempDir::new().unwrap();
        let document = write_temp_file(&dir, "bad.json", r#"{ not valid json"#);

        cmd()
            .args(["resolve", document.to_str().unwrap(), "--schema", "Tree"])
            .assert()
            .code(2);
    }

    #[test]
    fn unknown_schema() {
        cmd()
            .args(["project", DEVICE, "--schema", "Nope"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains(r#"no schema or method named "Nope""#));
    }

    #[test]
    fn missing_bundle_reference() {
        cmd()
            .args(["resolve", DEVICE, "--schema", "DeviceVersion"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("unresolved reference"));
    }
}

mod help_and_version {
    use super::*;

    #[test]
    fn help_flag() {
        cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Resolve OpenRPC schemas"));
    }

    #[test]
    fn version_flag() {
        cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("openrpc-shapes"));
    }

    #[test]
    fn project_help() {
        cmd()
            .args(["project", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--tuples-as-arrays"))
            .stdout(predicate::str::contains("--bundle"))
            .stdout(predicate::str::contains("--proxy"));
    }
}
