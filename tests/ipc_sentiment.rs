use serde_json::json;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_smartsped");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn smartsped");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Keyword classifier behind a minimal HTTP endpoint; runs until the test process exits.
fn spawn_sentiment_service() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind sentiment service");
    let addr = listener.local_addr().expect("local addr");
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((k, v)) = line.split_once(':') {
                    if k.eq_ignore_ascii_case("content-length") {
                        content_length = v.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            if reader.read_exact(&mut body).is_err() {
                continue;
            }
            let req: serde_json::Value = serde_json::from_slice(&body).unwrap_or(json!({}));
            let mut sentiments = serde_json::Map::new();
            if let Some(comments) = req["comments"].as_object() {
                for (id, text) in comments {
                    let label = if text.as_str().unwrap_or("").contains("late") {
                        "Negative"
                    } else {
                        "Positive"
                    };
                    sentiments.insert(id.clone(), json!(label));
                }
            }
            let resp = json!({ "sentiments": sentiments }).to_string();
            let mut stream = stream;
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                resp.len(),
                resp
            );
            let _ = stream.flush();
        }
    });
    format!("http://{}/getsentiment", addr)
}

#[test]
fn comments_are_classified_by_task_and_on_submit() {
    let workspace = temp_dir("smartspe-ipc-sentiment");
    let service_url = spawn_sentiment_service();
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let ev = request_ok(
        &mut stdin,
        &mut reader,
        "ev",
        "evaluations.create",
        json!({
            "name": "Review",
            "startDate": 0,
            "endDate": 10_000,
            "questions": ["Contributes"]
        }),
    );
    let evaluation_id = ev["evaluationId"].as_str().expect("evaluationId").to_string();
    let q1 = ev["questionIds"][0].as_str().expect("q1").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "grp",
        "groups.create",
        json!({
            "evaluationId": evaluation_id,
            "name": "Blue",
            "members": [
                { "id": "a", "lastName": "Adams", "firstName": "Ann" },
                { "id": "b", "lastName": "Brown", "firstName": "Bea" }
            ]
        }),
    );

    // Service disabled: comments are stored unclassified.
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "sa",
        "submissions.submit",
        json!({
            "evaluationId": evaluation_id,
            "studentId": "a",
            "now": 100,
            "ratings": { "a": { q1.clone(): 4 } },
            "comments": { "a": "fine work", "b": "great teammate" }
        }),
    );
    assert_eq!(first["sentimentsClassified"], 0);

    request_ok(
        &mut stdin,
        &mut reader,
        "su",
        "setup.update",
        json!({
            "section": "sentiment",
            "patch": { "enabled": true, "serviceUrl": service_url, "batchSize": 1, "timeoutSeconds": 5 }
        }),
    );

    let pass = request_ok(&mut stdin, &mut reader, "ts", "tasks.sentiment", json!({}));
    assert_eq!(pass["enabled"], true);
    assert_eq!(pass["found"], 2);
    assert_eq!(pass["updated"], 2);
    assert_eq!(pass["missing"], 0);

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "sb",
        "submissions.submit",
        json!({
            "evaluationId": evaluation_id,
            "studentId": "b",
            "now": 200,
            "ratings": { "a": { q1.clone(): 2 } },
            "comments": { "a": "always late" }
        }),
    );
    assert_eq!(second["sentimentsClassified"], 1);

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "cm",
        "reports.commentsModel",
        json!({ "evaluationId": evaluation_id, "studentId": "a" }),
    );
    let comments = model["comments"].as_array().expect("comments");
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0]["isSelf"], true);
    assert_eq!(comments[0]["sentiment"], "Positive");
    assert_eq!(comments[1]["authorId"], "b");
    assert_eq!(comments[1]["sentiment"], "Negative");

    // Nothing left to classify.
    let again = request_ok(&mut stdin, &mut reader, "ts2", "tasks.sentiment", json!({}));
    assert_eq!(again["found"], 0);

    let _ = std::fs::remove_dir_all(workspace);
}
