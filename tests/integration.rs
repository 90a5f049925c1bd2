use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kbstack_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kbstack");
    path
}

const BASE_CONFIG: &str = r#"[stack]
region = "ap-southeast-2"

[knowledge_base]
embedding_model_arn = "arn:aws:bedrock:ap-southeast-2::foundation-model/amazon.titan-embed-text-v2:0"
collection_import = "AossCollectionArn"
"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), BASE_CONFIG);
    (tmp, config_path)
}

fn write_config(root: &Path, content: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("kbstack.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

fn run_kbstack(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kbstack_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        // Never let ambient credentials leak in; commands that need them
        // must fail identically on any machine.
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env_remove("AWS_SESSION_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbstack binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn synth_template(config_path: &Path) -> serde_json::Value {
    let (stdout, stderr, success) = run_kbstack(config_path, &["synth"]);
    assert!(success, "synth failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).expect("synth did not print valid JSON")
}

#[test]
fn test_synth_renders_the_declared_graph() {
    let (_tmp, config_path) = setup_test_env();

    let template = synth_template(&config_path);
    assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");

    let resources = template["Resources"].as_object().unwrap();
    assert_eq!(
        resources.len(),
        5,
        "expected exactly five resources, got: {:?}",
        resources.keys().collect::<Vec<_>>()
    );
    assert_eq!(resources["KbDocsBucket"]["Type"], "AWS::S3::Bucket");
    assert_eq!(resources["KnowledgeBaseRole"]["Type"], "AWS::IAM::Role");
    assert_eq!(
        resources["KnowledgeBaseRolePolicy"]["Type"],
        "AWS::IAM::Policy"
    );
    assert_eq!(
        resources["KnowledgeBase"]["Type"],
        "AWS::Bedrock::KnowledgeBase"
    );
    assert_eq!(resources["S3DataSource"]["Type"], "AWS::Bedrock::DataSource");

    let outputs = template["Outputs"].as_object().unwrap();
    assert_eq!(outputs.len(), 4);
    for name in [
        "DocsBucketName",
        "DocsPrefix",
        "KnowledgeBaseId",
        "DataSourceId",
    ] {
        assert!(outputs.contains_key(name), "missing output {}", name);
    }
    assert_eq!(outputs["DocsPrefix"]["Value"], "kb/");
}

#[test]
fn test_synth_is_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout1, _, success1) = run_kbstack(&config_path, &["synth"]);
    let (stdout2, _, success2) = run_kbstack(&config_path, &["synth"]);
    assert!(success1 && success2);
    assert_eq!(
        stdout1, stdout2,
        "re-evaluating the declaration must be byte-identical"
    );
}

#[test]
fn test_data_source_references_the_bucket_arn() {
    let (_tmp, config_path) = setup_test_env();

    let template = synth_template(&config_path);
    let ds = &template["Resources"]["S3DataSource"]["Properties"];
    assert_eq!(
        ds["DataSourceConfiguration"]["S3Configuration"]["BucketArn"],
        serde_json::json!({"Fn::GetAtt": ["KbDocsBucket", "Arn"]})
    );
    assert_eq!(
        ds["KnowledgeBaseId"],
        serde_json::json!({"Fn::GetAtt": ["KnowledgeBase", "KnowledgeBaseId"]})
    );

    let kb = &template["Resources"]["KnowledgeBase"]["Properties"];
    assert_eq!(
        kb["StorageConfiguration"]["OpensearchServerlessConfiguration"]["CollectionArn"],
        serde_json::json!({"Fn::ImportValue": "AossCollectionArn"})
    );
}

#[test]
fn test_explicit_dependency_edges() {
    let (_tmp, config_path) = setup_test_env();

    let template = synth_template(&config_path);
    assert_eq!(
        template["Resources"]["KnowledgeBase"]["DependsOn"],
        serde_json::json!(["KnowledgeBaseRolePolicy"])
    );
    assert_eq!(
        template["Resources"]["S3DataSource"]["DependsOn"],
        serde_json::json!(["KnowledgeBase"])
    );
}

#[test]
fn test_grant_follows_the_docs_prefix() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        &format!(
            "{}\n[data_source]\ndocs_prefix = \"manuals/\"\n",
            BASE_CONFIG
        ),
    );

    let template = synth_template(&config_path);

    let statement = &template["Resources"]["KnowledgeBaseRolePolicy"]["Properties"]
        ["PolicyDocument"]["Statement"][0];
    assert_eq!(
        statement["Resource"][1],
        serde_json::json!({"Fn::Join": ["", [{"Fn::GetAtt": ["KbDocsBucket", "Arn"]}, "/manuals/*"]]}),
        "the read grant must cover exactly the docs prefix"
    );

    let ds = &template["Resources"]["S3DataSource"]["Properties"];
    assert_eq!(
        ds["DataSourceConfiguration"]["S3Configuration"]["InclusionPrefixes"],
        serde_json::json!(["manuals/"]),
        "the inclusion prefix must match the granted prefix"
    );

    assert_eq!(template["Outputs"]["DocsPrefix"]["Value"], "manuals/");
}

#[test]
fn test_public_access_block_is_always_on() {
    let tmp = TempDir::new().unwrap();
    // Even with every bucket knob turned off, public access stays blocked.
    let config_path = write_config(
        tmp.path(),
        &format!(
            "{}\n[bucket]\nretain_on_delete = false\nversioned = false\n",
            BASE_CONFIG
        ),
    );

    let template = synth_template(&config_path);
    let block =
        &template["Resources"]["KbDocsBucket"]["Properties"]["PublicAccessBlockConfiguration"];
    for key in [
        "BlockPublicAcls",
        "BlockPublicPolicy",
        "IgnorePublicAcls",
        "RestrictPublicBuckets",
    ] {
        assert_eq!(block[key], serde_json::json!(true), "{} must be true", key);
    }
}

#[test]
fn test_bucket_retained_by_default() {
    let (_tmp, config_path) = setup_test_env();

    let template = synth_template(&config_path);
    let bucket = &template["Resources"]["KbDocsBucket"];
    assert_eq!(bucket["DeletionPolicy"], "Retain");
    assert_eq!(bucket["UpdateReplacePolicy"], "Retain");

    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        &format!("{}\n[bucket]\nretain_on_delete = false\n", BASE_CONFIG),
    );
    let template = synth_template(&config_path);
    assert_eq!(
        template["Resources"]["KbDocsBucket"]["DeletionPolicy"],
        "Delete"
    );
}

#[test]
fn test_missing_collection_reference_fails_before_synthesis() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        r#"[stack]
region = "ap-southeast-2"

[knowledge_base]
embedding_model_arn = "arn:aws:bedrock:ap-southeast-2::foundation-model/amazon.titan-embed-text-v2:0"
"#,
    );

    let (stdout, stderr, success) = run_kbstack(&config_path, &["synth"]);
    assert!(!success, "synth without a collection reference must fail");
    assert!(
        stderr.contains("collection"),
        "should name the missing reference, got: {}",
        stderr
    );
    assert!(
        stdout.is_empty(),
        "no partial template on stdout, got: {}",
        stdout
    );
}

#[test]
fn test_conflicting_collection_references_fail() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        &format!(
            "{}collection_arn = \"arn:aws:aoss:ap-southeast-2:123456789012:collection/abc123\"\n",
            BASE_CONFIG
        ),
    );

    let (_, stderr, success) = run_kbstack(&config_path, &["synth"]);
    assert!(!success);
    assert!(stderr.contains("not both"), "got: {}", stderr);
}

#[test]
fn test_model_region_mismatch_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        r#"[stack]
region = "us-east-1"

[knowledge_base]
embedding_model_arn = "arn:aws:bedrock:ap-southeast-2::foundation-model/amazon.titan-embed-text-v2:0"
collection_import = "AossCollectionArn"
"#,
    );

    let (_, stderr, success) = run_kbstack(&config_path, &["synth"]);
    assert!(!success, "cross-region model ARN must be rejected");
    assert!(
        stderr.contains("ap-southeast-2") && stderr.contains("us-east-1"),
        "should name both regions, got: {}",
        stderr
    );
}

#[test]
fn test_resources_lists_dependency_edges() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbstack(&config_path, &["resources"]);
    assert!(success, "resources failed: {}", stderr);
    for logical_id in [
        "KbDocsBucket",
        "KnowledgeBaseRole",
        "KnowledgeBaseRolePolicy",
        "KnowledgeBase",
        "S3DataSource",
    ] {
        assert!(
            stdout.contains(logical_id),
            "missing {}: {}",
            logical_id,
            stdout
        );
    }

    let kb_row = stdout
        .lines()
        .find(|l| l.contains("AWS::Bedrock::KnowledgeBase"))
        .expect("no knowledge base row");
    assert!(
        kb_row.contains("KnowledgeBaseRolePolicy"),
        "knowledge base row should show its edge: {}",
        kb_row
    );
    assert!(
        stdout.contains("outputs: DataSourceId, DocsBucketName, DocsPrefix, KnowledgeBaseId"),
        "got: {}",
        stdout
    );
}

#[test]
fn test_synth_writes_output_file() {
    let (tmp, config_path) = setup_test_env();
    let out_path = tmp.path().join("out").join("template.json");

    let (_, stderr, success) = run_kbstack(
        &config_path,
        &["synth", "--output", out_path.to_str().unwrap()],
    );
    assert!(success, "synth --output failed: {}", stderr);
    assert!(stderr.contains("Synthesized 5 resources, 4 outputs"));

    let written = fs::read_to_string(&out_path).unwrap();
    let template: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert!(template["Resources"]["KnowledgeBase"].is_object());
}

#[test]
fn test_deploy_requires_credentials() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbstack(&config_path, &["deploy"]);
    assert!(!success, "deploy without credentials must fail");
    assert!(
        stderr.contains("AWS_ACCESS_KEY_ID"),
        "should name the missing variable, got: {}",
        stderr
    );
}

#[test]
fn test_outputs_requires_credentials() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbstack(&config_path, &["outputs"]);
    assert!(!success);
    assert!(stderr.contains("AWS_ACCESS_KEY_ID"), "got: {}", stderr);
}

#[test]
fn test_serve_requires_a_generation_model() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbstack(&config_path, &["serve", "chat"]);
    assert!(!success, "serve without a generation model must fail");
    assert!(
        stderr.contains("generation_model_arn"),
        "should name the missing setting, got: {}",
        stderr
    );
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config").join("kbstack.toml");

    let (_, stderr, success) = run_kbstack(&config_path, &["synth"]);
    assert!(!success);
    assert!(
        stderr.contains("Failed to read config file"),
        "got: {}",
        stderr
    );
}

#[test]
fn test_unknown_progress_mode_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_kbstack(&config_path, &["deploy", "--progress", "fancy", "--no-wait"]);
    assert!(!success, "unknown progress mode must fail");
    assert!(stderr.contains("Unknown progress mode"), "got: {}", stderr);
}
