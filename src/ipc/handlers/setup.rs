use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sentiment::SentimentSettings;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Sentiment,
    Drafts,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sentiment" => Some(Self::Sentiment),
            "drafts" => Some(Self::Drafts),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Sentiment => "setup.sentiment",
            Self::Drafts => "setup.drafts",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Sentiment => {
            let d = SentimentSettings::default();
            json!({
                "enabled": d.enabled,
                "serviceUrl": d.service_url,
                "timeoutSeconds": d.timeout_seconds,
                "batchSize": d.batch_size,
                "maxComments": d.max_comments
            })
        }
        SetupSection::Drafts => json!({
            "maxAgeDays": 30
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Sentiment => match k.as_str() {
                "enabled" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "serviceUrl" => {
                    let url = parse_string_max(v, k, 300)?;
                    if !url.is_empty()
                        && !url.starts_with("http://")
                        && !url.starts_with("https://")
                    {
                        return Err("serviceUrl must start with http:// or https://".into());
                    }
                    obj.insert(k.clone(), Value::String(url));
                }
                "timeoutSeconds" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 60)?));
                }
                "batchSize" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "maxComments" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 10_000)?));
                }
                _ => return Err(format!("unknown sentiment field: {}", k)),
            },
            SetupSection::Drafts => match k.as_str() {
                "maxAgeDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 365)?));
                }
                _ => return Err(format!("unknown drafts field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values keep their defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn load_sentiment_settings(conn: &rusqlite::Connection) -> anyhow::Result<SentimentSettings> {
    Ok(SentimentSettings::from_json(&load_section(
        conn,
        SetupSection::Sentiment,
    )?))
}

pub fn load_draft_max_age_days(conn: &rusqlite::Connection) -> anyhow::Result<i64> {
    let drafts = load_section(conn, SetupSection::Drafts)?;
    Ok(drafts
        .get("maxAgeDays")
        .and_then(|v| v.as_i64())
        .unwrap_or(30))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let sentiment = match load_section(conn, SetupSection::Sentiment) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let drafts = match load_section(conn, SetupSection::Drafts) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "sentiment": sentiment,
            "drafts": drafts
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
