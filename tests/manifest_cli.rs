//! End-to-end check of `taskspec create` / `taskspec check` against an
//! on-disk fixture package.

use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::{json, Value};

fn taskspec() -> Command {
    Command::new(env!("CARGO_BIN_EXE_taskspec"))
}

/// Lay out a package with one non-parallel and one compound task.
fn write_fixture_package(root: &Path) {
    let src_dir = root.join("my_package");
    let dev_dir = src_dir.join("dev");
    fs::create_dir_all(&dev_dir).unwrap();

    let task_list = json!({
        "authors": "Name Surname",
        "docs_link": "https://example.com/docs",
        "task_list": [
            {
                "type": "non-parallel",
                "name": "Thresholding Task",
                "executable": "thresholding_task.py",
                "meta": {"cpus": 1},
                "category": "Segmentation",
                "tags": ["threshold"],
            },
            {
                "type": "compound",
                "name": "Compound Task",
                "executable": "compute_task.py",
                "executable_init": "init_task.py",
            },
        ],
    });
    fs::write(
        dev_dir.join("task_list.json"),
        serde_json::to_string_pretty(&task_list).unwrap(),
    )
    .unwrap();

    let declarations = [
        (
            "thresholding_task",
            json!({
                "function": "thresholding_task",
                "doc": "Apply a fixed threshold.\n\nArgs:\n    zarr_url: Path to the image.\n    threshold: Cutoff value.",
                "params": [
                    {"name": "zarr_url", "type": "str"},
                    {"name": "threshold", "type": "int", "default": 128},
                ],
            }),
        ),
        (
            "init_task",
            json!({
                "function": "init_task",
                "doc": "Split the image into chunks.",
                "params": [
                    {"name": "zarr_url", "type": "str"},
                ],
            }),
        ),
        (
            "compute_task",
            json!({
                "function": "compute_task",
                "doc": "Process one chunk.",
                "params": [
                    {"name": "zarr_url", "type": "str"},
                    {"name": "chunk", "type": "int"},
                ],
            }),
        ),
    ];
    for (stem, declaration) in declarations {
        fs::write(src_dir.join(format!("{stem}.py")), "").unwrap();
        fs::write(
            src_dir.join(format!("{stem}.args.json")),
            serde_json::to_string_pretty(&declaration).unwrap(),
        )
        .unwrap();
    }
}

#[test]
fn create_then_check_round_trip() {
    let root = tempfile::tempdir().unwrap();
    write_fixture_package(root.path());

    // package name is normalized before the sources are located
    let status = taskspec()
        .args(["create", "--package", "My-Package"])
        .arg("--package-root")
        .arg(root.path())
        .status()
        .unwrap();
    assert!(status.success());

    let manifest_path = root.path().join("my_package/__TASK_MANIFEST__.json");
    let body = fs::read_to_string(&manifest_path).unwrap();
    assert!(body.ends_with('\n'));
    let manifest: Value = serde_json::from_str(&body).unwrap();

    assert_eq!(manifest["manifest_version"], "2");
    assert_eq!(manifest["has_args_schemas"], true);
    assert_eq!(manifest["args_schema_version"], "pydantic_v2");
    assert_eq!(manifest["authors"], "Name Surname");

    let thresholding = &manifest["task_list"][0];
    assert_eq!(thresholding["name"], "Thresholding Task");
    assert_eq!(thresholding["category"], "Segmentation");
    assert_eq!(thresholding["tags"], json!(["threshold"]));
    assert_eq!(thresholding["executable_non_parallel"], "thresholding_task.py");
    assert_eq!(thresholding["meta_non_parallel"], json!({"cpus": 1}));
    assert_eq!(thresholding["docs_info"], "Apply a fixed threshold.");
    assert_eq!(thresholding["docs_link"], "https://example.com/docs");
    assert!(thresholding.get("executable_parallel").is_none());
    let schema = &thresholding["args_schema_non_parallel"];
    assert_eq!(schema["required"], json!(["zarr_url"]));
    assert_eq!(schema["additionalProperties"], false);
    assert_eq!(schema["properties"]["zarr_url"]["type"], "string");
    assert_eq!(
        schema["properties"]["zarr_url"]["description"],
        "Path to the image."
    );
    assert_eq!(schema["properties"]["threshold"]["default"], 128);

    let compound = &manifest["task_list"][1];
    assert_eq!(compound["executable_non_parallel"], "init_task.py");
    assert_eq!(compound["executable_parallel"], "compute_task.py");
    assert!(compound["args_schema_non_parallel"].is_object());
    assert!(compound["args_schema_parallel"].is_object());
    assert_eq!(
        compound["docs_info"],
        "Split the image into chunks.\nProcess one chunk."
    );

    // freshly written manifest passes the check
    let status = taskspec()
        .args(["check", "--package", "my_package"])
        .arg("--package-root")
        .arg(root.path())
        .status()
        .unwrap();
    assert!(status.success());
}

#[test]
fn check_flags_stale_manifest() {
    let root = tempfile::tempdir().unwrap();
    write_fixture_package(root.path());

    let status = taskspec()
        .args(["create", "--package", "my_package"])
        .arg("--package-root")
        .arg(root.path())
        .status()
        .unwrap();
    assert!(status.success());

    // change a default in the task declaration; the committed manifest is
    // now stale
    let declaration_path = root
        .path()
        .join("my_package/thresholding_task.args.json");
    let body = fs::read_to_string(&declaration_path).unwrap();
    fs::write(&declaration_path, body.replace("128", "200")).unwrap();

    let output = taskspec()
        .args(["check", "--package", "my_package"])
        .arg("--package-root")
        .arg(root.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Values are different"), "stderr: {stderr}");
    assert!(
        stderr.contains("args_schema_non_parallel"),
        "stderr: {stderr}"
    );
}

#[test]
fn create_rejects_invalid_signatures() {
    let root = tempfile::tempdir().unwrap();
    write_fixture_package(root.path());

    // `args` is a forbidden parameter name
    let declaration_path = root
        .path()
        .join("my_package/thresholding_task.args.json");
    let body = fs::read_to_string(&declaration_path).unwrap();
    fs::write(&declaration_path, body.replace("\"threshold\"", "\"args\"")).unwrap();

    let output = taskspec()
        .args(["create", "--package", "my_package"])
        .arg("--package-root")
        .arg(root.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("forbidden name"), "stderr: {stderr}");
}
