//! Comment sentiment classification.
//!
//! The external service is treated as a batch classifier: ids and texts go in,
//! a label per id comes back. Anything that goes wrong on the way (transport,
//! status, decoding, unknown labels) only makes the affected ids absent.

use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
            Sentiment::Neutral => "Neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Positive" => Some(Sentiment::Positive),
            "Negative" => Some(Sentiment::Negative),
            "Neutral" => Some(Sentiment::Neutral),
            _ => None,
        }
    }
}

pub trait SentimentClassifier {
    /// Returns a label for every id the service could classify; missing ids failed.
    fn classify_batch(&self, comments: &BTreeMap<String, String>) -> BTreeMap<String, Sentiment>;
}

/// Used when the service is switched off; classifies nothing.
pub struct DisabledClassifier;

impl SentimentClassifier for DisabledClassifier {
    fn classify_batch(&self, _comments: &BTreeMap<String, String>) -> BTreeMap<String, Sentiment> {
        BTreeMap::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentimentSettings {
    pub enabled: bool,
    pub service_url: String,
    pub timeout_seconds: u64,
    pub batch_size: usize,
    pub max_comments: usize,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_url: "http://localhost:5000/getsentiment".to_string(),
            timeout_seconds: 2,
            batch_size: 5,
            max_comments: 50,
        }
    }
}

impl SentimentSettings {
    /// Reads the `sentiment` setup section; absent or malformed fields keep their defaults.
    pub fn from_json(v: &serde_json::Value) -> Self {
        let d = Self::default();
        Self {
            enabled: v.get("enabled").and_then(|x| x.as_bool()).unwrap_or(d.enabled),
            service_url: v
                .get("serviceUrl")
                .and_then(|x| x.as_str())
                .map(|s| s.to_string())
                .unwrap_or(d.service_url),
            timeout_seconds: v
                .get("timeoutSeconds")
                .and_then(|x| x.as_u64())
                .unwrap_or(d.timeout_seconds),
            batch_size: v
                .get("batchSize")
                .and_then(|x| x.as_u64())
                .map(|n| n.max(1) as usize)
                .unwrap_or(d.batch_size),
            max_comments: v
                .get("maxComments")
                .and_then(|x| x.as_u64())
                .map(|n| n as usize)
                .unwrap_or(d.max_comments),
        }
    }
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    comments: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    sentiments: HashMap<String, serde_json::Value>,
}

pub struct HttpClassifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build sentiment http client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn request(&self, comments: &BTreeMap<String, String>) -> anyhow::Result<BatchResponse> {
        let resp = self
            .client
            .post(&self.url)
            .json(&BatchRequest { comments })
            .send()
            .context("sentiment request failed")?
            .error_for_status()
            .context("sentiment service returned an error status")?;
        resp.json::<BatchResponse>()
            .context("invalid JSON from sentiment service")
    }
}

impl SentimentClassifier for HttpClassifier {
    fn classify_batch(&self, comments: &BTreeMap<String, String>) -> BTreeMap<String, Sentiment> {
        if comments.is_empty() {
            return BTreeMap::new();
        }
        let parsed = match self.request(comments) {
            Ok(v) => v,
            Err(e) => {
                warn!(url = %self.url, error = %format!("{e:#}"), "sentiment batch failed");
                return BTreeMap::new();
            }
        };
        debug!(returned = parsed.sentiments.len(), "sentiment batch response");

        let mut out = BTreeMap::new();
        for id in comments.keys() {
            let label = parsed.sentiments.get(id).and_then(|v| v.as_str());
            match label.and_then(Sentiment::parse) {
                Some(s) => {
                    out.insert(id.clone(), s);
                }
                None => {
                    if let Some(l) = label {
                        warn!(comment_id = %id, label = %l, "unknown sentiment label");
                    }
                }
            }
        }
        out
    }
}

pub fn classifier_from_settings(
    settings: &SentimentSettings,
) -> anyhow::Result<Box<dyn SentimentClassifier>> {
    if !settings.enabled || settings.service_url.trim().is_empty() {
        return Ok(Box::new(DisabledClassifier));
    }
    let classifier = HttpClassifier::new(
        settings.service_url.trim(),
        Duration::from_secs(settings.timeout_seconds.max(1)),
    )?;
    Ok(Box::new(classifier))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentPassSummary {
    pub found: usize,
    pub updated: usize,
    pub missing: usize,
}

/// Classifies comments on final submissions that have no sentiment yet.
///
/// Works in batches of `batch_size` and stops after the batch in which
/// `max_comments` updates have been reached.
pub fn run_sentiment_pass(
    conn: &Connection,
    classifier: &dyn SentimentClassifier,
    batch_size: usize,
    max_comments: usize,
) -> anyhow::Result<SentimentPassSummary> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.comment
         FROM comments c
         JOIN submissions s ON s.id = c.submission_id
         WHERE c.sentiment IS NULL
           AND s.submitted_at IS NOT NULL
         ORDER BY c.id",
    )?;
    let pending = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to load pending comments")?;

    let mut summary = SentimentPassSummary {
        found: pending.len(),
        ..Default::default()
    };
    if pending.is_empty() {
        info!("no comments need sentiment analysis");
        return Ok(summary);
    }
    info!(found = summary.found, "starting sentiment pass");

    let mut update = conn.prepare("UPDATE comments SET sentiment = ? WHERE id = ?")?;
    for chunk in pending.chunks(batch_size.max(1)) {
        let batch: BTreeMap<String, String> = chunk.iter().cloned().collect();
        let labels = classifier.classify_batch(&batch);
        for id in batch.keys() {
            match labels.get(id) {
                Some(s) => {
                    update
                        .execute((s.as_str(), id))
                        .with_context(|| format!("failed to update comment {}", id))?;
                    summary.updated += 1;
                }
                None => {
                    warn!(comment_id = %id, "no sentiment returned");
                    summary.missing += 1;
                }
            }
        }
        if summary.updated >= max_comments {
            break;
        }
    }

    info!(
        updated = summary.updated,
        missing = summary.missing,
        "sentiment pass finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_exactly() {
        assert_eq!(Sentiment::parse("Positive"), Some(Sentiment::Positive));
        assert_eq!(Sentiment::parse("Neutral"), Some(Sentiment::Neutral));
        assert_eq!(Sentiment::parse("positive"), None);
        assert_eq!(Sentiment::Negative.as_str(), "Negative");
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let s = SentimentSettings::from_json(&serde_json::json!({ "batchSize": 0, "enabled": "yes" }));
        assert_eq!(s.batch_size, 1);
        assert!(!s.enabled);
        assert_eq!(s.max_comments, 50);
        assert_eq!(s.timeout_seconds, 2);
    }

    #[test]
    fn disabled_settings_build_a_noop_classifier() {
        let c = classifier_from_settings(&SentimentSettings::default()).expect("classifier");
        let mut batch = BTreeMap::new();
        batch.insert("1".to_string(), "great teammate".to_string());
        assert!(c.classify_batch(&batch).is_empty());
    }
}
