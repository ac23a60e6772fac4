#[path = "../src/sentiment.rs"]
mod sentiment;

use sentiment::{HttpClassifier, Sentiment, SentimentClassifier};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::Duration;

/// Serves one HTTP response and hands back the request body it received.
fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((k, v)) = line.split_once(':') {
                if k.eq_ignore_ascii_case("content-length") {
                    content_length = v.trim().parse().expect("content length");
                }
            }
        }
        let mut request_body = vec![0u8; content_length];
        reader.read_exact(&mut request_body).expect("read body");

        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
        .expect("write response");
        stream.flush().expect("flush response");
        String::from_utf8(request_body).expect("utf8 body")
    });
    (format!("http://{}/getsentiment", addr), handle)
}

fn batch(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn partial_batch_results_stay_partial() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"sentiments":{"1":"Positive","2":"Meh","4":"Negative"}}"#.to_string(),
    );
    let classifier = HttpClassifier::new(url, Duration::from_secs(5)).expect("client");

    let labels = classifier.classify_batch(&batch(&[
        ("1", "great teammate"),
        ("2", "fine"),
        ("3", "no reply"),
    ]));

    // Unknown labels and ids outside the batch are ignored; missing ids are absent.
    assert_eq!(labels.len(), 1);
    assert_eq!(labels.get("1"), Some(&Sentiment::Positive));

    let sent: serde_json::Value =
        serde_json::from_str(&server.join().expect("server thread")).expect("request json");
    assert_eq!(
        sent,
        serde_json::json!({
            "comments": { "1": "great teammate", "2": "fine", "3": "no reply" }
        })
    );
}

#[test]
fn error_status_classifies_nothing() {
    let (url, server) = serve_once("500 Internal Server Error", "{}".to_string());
    let classifier = HttpClassifier::new(url, Duration::from_secs(5)).expect("client");
    let labels = classifier.classify_batch(&batch(&[("1", "late again")]));
    assert!(labels.is_empty());
    let _ = server.join();
}

#[test]
fn malformed_body_classifies_nothing() {
    let (url, server) = serve_once("200 OK", "not json".to_string());
    let classifier = HttpClassifier::new(url, Duration::from_secs(5)).expect("client");
    let labels = classifier.classify_batch(&batch(&[("1", "ok")]));
    assert!(labels.is_empty());
    let _ = server.join();
}

#[test]
fn unreachable_service_classifies_nothing() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").expect("bind");
        l.local_addr().expect("addr").port()
    };
    let classifier = HttpClassifier::new(
        format!("http://127.0.0.1:{}/getsentiment", port),
        Duration::from_secs(2),
    )
    .expect("client");
    let labels = classifier.classify_batch(&batch(&[("1", "great")]));
    assert!(labels.is_empty());
}

#[test]
fn empty_batch_makes_no_request() {
    let classifier =
        HttpClassifier::new("http://127.0.0.1:9/unused", Duration::from_secs(1)).expect("client");
    assert!(classifier.classify_batch(&BTreeMap::new()).is_empty());
}
