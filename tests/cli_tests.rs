//! wmctl end to end: plan files in, results or diagnostics out

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::process::Output;
use tempfile::TempDir;
use tokio::process::Command;

async fn spawn_waste_api() -> String {
    async fn resource(
        Path(resource): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Result<Json<Value>, StatusCode> {
        match resource.as_str() {
            "shipments" => Ok(Json(json!({
                "success": true,
                "data": [{ "id": "S1" }, { "id": "S2" }]
            }))),
            "contaminants-detected" => {
                let ids = query.get("shipment_ids").cloned().unwrap_or_default();
                Ok(Json(json!({ "success": true, "data": { "checked": ids } })))
            }
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    let app = Router::new().route("/api/:resource", get(resource));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("waste api stub error");
    });
    format!("http://{}", addr)
}

fn write_json(dir: &TempDir, name: &str, value: &Value) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

async fn wmctl(args: &[&str], tool_config: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wmctl"))
        .args(args)
        .env("WM_TOOL_CONFIG", tool_config)
        .env_remove("WM_TOOL_REGISTRY_URL")
        .env("RUST_LOG", "off")
        .output()
        .await
        .expect("failed to launch wmctl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[tokio::test]
async fn test_validate_accepts_well_formed_plan() {
    let dir = TempDir::new().unwrap();
    let plan = write_json(
        &dir,
        "plan.json",
        &json!({
            "steps": [
                { "tool": "shipments" },
                { "tool": "contaminants", "dependsOn": [0] }
            ]
        }),
    );

    let output = wmctl(&["validate", "--plan-file", &plan], "missing.json").await;
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Plan is valid: 2 steps, 1 with no dependencies"));
}

#[tokio::test]
async fn test_validate_rejects_cycle_and_negative_index() {
    let dir = TempDir::new().unwrap();
    let cyclic = write_json(
        &dir,
        "cyclic.json",
        &json!({
            "steps": [
                { "tool": "shipments", "depends_on": [1] },
                { "tool": "contaminants", "depends_on": [0] }
            ]
        }),
    );
    let output = wmctl(&["validate", "--plan-file", &cyclic], "missing.json").await;
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Circular dependency detected"));

    let negative = write_json(
        &dir,
        "negative.json",
        &json!({ "steps": [{ "tool": "shipments", "depends_on": [-1] }] }),
    );
    let output = wmctl(&["validate", "--plan-file", &negative], "missing.json").await;
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid dependency index -1 in step 0"));
}

#[tokio::test]
async fn test_run_writes_ordered_results() {
    let api_url = spawn_waste_api().await;
    let dir = TempDir::new().unwrap();
    let tools = write_json(
        &dir,
        "tools.json",
        &json!([
            { "name": "shipments", "url": api_url, "kind": "resource" },
            {
                "name": "contaminants",
                "url": api_url,
                "kind": "resource",
                "resource": "contaminants-detected"
            }
        ]),
    );
    let plan = write_json(
        &dir,
        "plan.json",
        &json!({
            "steps": [
                { "tool": "shipments", "params": { "status": "rejected" } },
                {
                    "tool": "contaminants",
                    "params": { "shipment_ids": "${step[0].data.*.id}" },
                    "depends_on": [0]
                }
            ]
        }),
    );
    let out = dir.path().join("results.json");
    let out = out.to_string_lossy().into_owned();

    let output = wmctl(
        &["run", "--plan-file", &plan, "--out", &out, "--max-retries", "1"],
        &tools,
    )
    .await;
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Results written to"));

    let written: Value = serde_json::from_str(&std::fs::read_to_string(FsPath::new(&out)).unwrap()).unwrap();
    assert_eq!(written["status"], "completed");
    assert_eq!(written["failed_steps"], json!([]));
    assert_eq!(written["results"][0]["tool"], "shipments");
    assert_eq!(written["results"][1]["data"], json!({ "checked": "S1,S2" }));
}

#[tokio::test]
async fn test_run_fail_fast_exits_with_failed_step() {
    let api_url = spawn_waste_api().await;
    let dir = TempDir::new().unwrap();
    let tools = write_json(
        &dir,
        "tools.json",
        &json!([{ "name": "shipments", "url": api_url, "kind": "resource" }]),
    );
    let plan = write_json(
        &dir,
        "plan.json",
        &json!({
            "steps": [
                { "tool": "shipments" },
                { "tool": "inspections", "depends_on": [0] }
            ]
        }),
    );

    let output = wmctl(
        &["run", "--plan-file", &plan, "--fail-fast", "--max-retries", "1"],
        &tools,
    )
    .await;
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Plan execution failed: Step 1 failed: Tool not found: inspections"));
}
