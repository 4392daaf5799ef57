/// 用于处理 SurrealDB Thing ID 的序列化/反序列化辅助模块

use serde::{Deserialize, Deserializer, Serializer};

/// 去掉 "table:" 前缀以及 SurrealDB 的 ⟨⟩ / 反引号包裹，只保留记录键
pub fn strip_record_prefix(raw: &str) -> String {
    let key = match raw.split_once(':') {
        Some((table, rest)) if !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => rest,
        _ => raw,
    };

    key.trim_start_matches(['⟨', '`'])
        .trim_end_matches(['⟩', '`'])
        .to_string()
}

/// 处理 SurrealDB 的 Thing ID 格式 (例如: "notifications:xxxxx")，对外只暴露记录键
pub mod record_id {
    use super::*;

    pub fn serialize<S>(id: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(id)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IdValue {
            String(String),
            Thing {
                #[allow(dead_code)]
                tb: String,
                id: serde_json::Value,
            },
        }

        match IdValue::deserialize(deserializer)? {
            IdValue::String(s) => Ok(strip_record_prefix(&s)),
            IdValue::Thing { id, .. } => match id {
                serde_json::Value::String(s) => Ok(s),
                serde_json::Value::Number(n) => Ok(n.to_string()),
                serde_json::Value::Object(map) => {
                    // 1.x 的 Id 枚举会被序列化为 {"String": "..."} 或 {"Number": 1}
                    match map.into_iter().next() {
                        Some((_, serde_json::Value::String(s))) => Ok(s),
                        Some((_, other)) => Ok(other.to_string()),
                        None => Err(serde::de::Error::custom("empty record id")),
                    }
                }
                other => Ok(other.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Row {
        #[serde(with = "record_id")]
        id: String,
    }

    #[test]
    fn test_strip_record_prefix() {
        assert_eq!(strip_record_prefix("connection_requests:abc"), "abc");
        assert_eq!(strip_record_prefix("profiles:⟨a-b-c⟩"), "a-b-c");
        assert_eq!(strip_record_prefix("plain"), "plain");
    }

    #[test]
    fn test_record_id_from_thing_object() {
        let row: Row = serde_json::from_value(serde_json::json!({
            "id": { "tb": "notifications", "id": { "String": "n1" } }
        }))
        .unwrap();
        assert_eq!(row.id, "n1");

        let row: Row = serde_json::from_value(serde_json::json!({ "id": "notifications:n2" })).unwrap();
        assert_eq!(row.id, "n2");
    }
}
