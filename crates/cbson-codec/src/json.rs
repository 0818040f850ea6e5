//! BSON 与扩展 JSON 互转模块
//!
//! JSON 的类型系统较简单，BSON 特有类型使用 `$` 前缀的包装对象表示。
//! 只有键集合与包装格式完全一致的对象才会被识别，其余对象按普通文档处理。

use crate::document::Document;
use crate::spec::BinarySubtype;
use crate::value::{Binary, BsonValue, CodeWithScope, DbRef, Regex, Timestamp, UtcDateTime};
use crate::{BsonError, BsonResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbson_common::ObjectId;
use chrono::DateTime;
use compact_str::CompactString;
use serde_json::{json, Map, Number, Value as JsonValue};

/// 将 BsonValue 转换为 JSON
///
/// # 扩展 JSON 格式
/// - ObjectId: `{"$oid": "507f1f77bcf86cd799439011"}`
/// - DateTime: `{"$date": 1234567890000}`
/// - Binary: `{"$binary": "base64", "$type": "00"}`
/// - Regex: `{"$regex": "pattern", "$options": "i"}`
/// - JavaScript: `{"$code": "..."}`，带作用域时附加 `"$scope": {...}`
/// - Symbol: `{"$symbol": "..."}`
/// - Timestamp: `{"$timestamp": {"t": 1, "i": 2}}`
/// - MinKey / MaxKey: `{"$minKey": 1}` / `{"$maxKey": 1}`
/// - DbRef: `{"$ref": "collection", "$id": ...}`
/// - 非有限浮点数: `{"$numberDouble": "NaN"}`
pub fn to_json(value: &BsonValue) -> BsonResult<JsonValue> {
    let json = match value {
        BsonValue::Null => JsonValue::Null,
        BsonValue::Boolean(b) => JsonValue::Bool(*b),
        BsonValue::Integer(n) => json!(*n),
        BsonValue::Double(f) => match Number::from_f64(*f) {
            Some(n) => JsonValue::Number(n),
            None => json!({ "$numberDouble": non_finite_name(*f) }),
        },
        BsonValue::String(s) => JsonValue::String(s.to_string()),
        BsonValue::Binary(b) => json!({
            "$binary": STANDARD.encode(&b.bytes),
            "$type": format!("{:02x}", u8::from(b.subtype)),
        }),
        BsonValue::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
        BsonValue::DateTime(dt) => json!({ "$date": dt.timestamp_millis() }),
        BsonValue::Timestamp(ts) => json!({ "$timestamp": { "t": ts.time, "i": ts.increment } }),
        BsonValue::Array(arr) => JsonValue::Array(arr.iter().map(to_json).collect::<BsonResult<_>>()?),
        BsonValue::Document(doc) => to_json_document(doc)?,
        BsonValue::Regex(r) => json!({ "$regex": r.pattern(), "$options": r.options() }),
        BsonValue::DbRef(r) => json!({ "$ref": r.collection.as_str(), "$id": to_json(&r.id)? }),
        BsonValue::JavaScriptCode(code) => json!({ "$code": code.as_str() }),
        BsonValue::JavaScriptCodeWithScope(cws) => json!({
            "$code": cws.code.as_str(),
            "$scope": to_json_document(&cws.scope)?,
        }),
        BsonValue::Symbol(s) => json!({ "$symbol": s.as_str() }),
        BsonValue::MinKey => json!({ "$minKey": 1 }),
        BsonValue::MaxKey => json!({ "$maxKey": 1 }),
    };
    Ok(json)
}

pub fn to_json_document(doc: &Document) -> BsonResult<JsonValue> {
    let mut obj = Map::with_capacity(doc.len());
    for (k, v) in doc.iter() {
        obj.insert(k.to_string(), to_json(v)?);
    }
    Ok(JsonValue::Object(obj))
}

fn non_finite_name(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

/// 从 JSON 转换为 BsonValue
///
/// # Brief
/// 识别扩展 JSON 包装对象；超出 i64 范围的整数返回 `IntegerOutOfRange`
pub fn from_json(value: &JsonValue) -> BsonResult<BsonValue> {
    match value {
        JsonValue::Null => Ok(BsonValue::Null),
        JsonValue::Bool(b) => Ok(BsonValue::Boolean(*b)),
        JsonValue::Number(n) => number_from_json(n),
        JsonValue::String(s) => Ok(BsonValue::String(CompactString::new(s))),
        JsonValue::Array(arr) => Ok(BsonValue::Array(
            arr.iter().map(from_json).collect::<BsonResult<_>>()?,
        )),
        JsonValue::Object(obj) => match extended_from_json(obj)? {
            Some(value) => Ok(value),
            None => Ok(BsonValue::Document(document_from_map(obj)?)),
        },
    }
}

/// JSON 对象转换为文档；输入不是对象时返回 `UnsupportedType`
pub fn from_json_document(value: &JsonValue) -> BsonResult<Document> {
    match from_json(value)? {
        BsonValue::Document(doc) => Ok(doc),
        other => Err(BsonError::UnsupportedType(format!(
            "top-level JSON value must be an object, found {}",
            other.type_name()
        ))),
    }
}

fn document_from_map(obj: &Map<String, JsonValue>) -> BsonResult<Document> {
    let mut doc = Document::with_capacity(obj.len());
    for (k, v) in obj {
        doc.insert(k.as_str(), from_json(v)?);
    }
    Ok(doc)
}

fn number_from_json(n: &Number) -> BsonResult<BsonValue> {
    if let Some(i) = n.as_i64() {
        return Ok(BsonValue::Integer(i));
    }
    if n.is_u64() {
        return Err(BsonError::IntegerOutOfRange(n.to_string()));
    }
    n.as_f64()
        .map(BsonValue::Double)
        .ok_or_else(|| BsonError::Deserialization(format!("Invalid number {}", n)))
}

/// 识别扩展 JSON 包装；不是包装格式时返回 None
fn extended_from_json(obj: &Map<String, JsonValue>) -> BsonResult<Option<BsonValue>> {
    let has_only = |keys: &[&str]| obj.len() == keys.len() && keys.iter().all(|k| obj.contains_key(*k));
    let str_of = |key: &str| obj.get(key).and_then(JsonValue::as_str);

    if has_only(&["$oid"]) {
        if let Some(hex) = str_of("$oid") {
            return Ok(Some(BsonValue::ObjectId(ObjectId::from_hex(hex)?)));
        }
    }

    if has_only(&["$date"]) {
        match &obj["$date"] {
            JsonValue::Number(n) => {
                if let Some(millis) = n.as_i64() {
                    return Ok(Some(BsonValue::DateTime(UtcDateTime::from_millis(millis))));
                }
            }
            JsonValue::String(s) => {
                let dt = DateTime::parse_from_rfc3339(s)
                    .map_err(|e| BsonError::Deserialization(format!("Invalid $date {:?}: {}", s, e)))?;
                return Ok(Some(BsonValue::DateTime(UtcDateTime::from_millis(
                    dt.timestamp_millis(),
                ))));
            }
            _ => {}
        }
    }

    if has_only(&["$binary", "$type"]) || has_only(&["$binary"]) {
        if let Some(encoded) = str_of("$binary") {
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| BsonError::Deserialization(format!("Invalid base64 in $binary: {}", e)))?;
            let subtype = match str_of("$type") {
                Some(hex) => u8::from_str_radix(hex, 16).map_err(|_| {
                    BsonError::Deserialization(format!("Invalid binary subtype {:?}", hex))
                })?,
                None => 0,
            };
            return Ok(Some(BsonValue::Binary(Binary::with_subtype(
                BinarySubtype::from(subtype),
                bytes,
            ))));
        }
    }

    if has_only(&["$regex", "$options"]) || has_only(&["$regex"]) {
        if let Some(pattern) = str_of("$regex") {
            let options = str_of("$options").unwrap_or("");
            return Ok(Some(BsonValue::Regex(Regex::new(pattern, options))));
        }
    }

    if has_only(&["$code"]) {
        if let Some(code) = str_of("$code") {
            return Ok(Some(BsonValue::JavaScriptCode(CompactString::new(code))));
        }
    }

    if has_only(&["$code", "$scope"]) {
        if let (Some(code), Some(JsonValue::Object(scope))) = (str_of("$code"), obj.get("$scope")) {
            return Ok(Some(BsonValue::JavaScriptCodeWithScope(CodeWithScope::new(
                code,
                document_from_map(scope)?,
            ))));
        }
    }

    if has_only(&["$symbol"]) {
        if let Some(s) = str_of("$symbol") {
            return Ok(Some(BsonValue::Symbol(CompactString::new(s))));
        }
    }

    if has_only(&["$timestamp"]) {
        if let Some(ts) = obj["$timestamp"].as_object() {
            let part = |key: &str| {
                ts.get(key)
                    .and_then(JsonValue::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
            };
            if let (Some(time), Some(increment)) = (part("t"), part("i")) {
                return Ok(Some(BsonValue::Timestamp(Timestamp { time, increment })));
            }
        }
    }

    if has_only(&["$minKey"]) {
        return Ok(Some(BsonValue::MinKey));
    }

    if has_only(&["$maxKey"]) {
        return Ok(Some(BsonValue::MaxKey));
    }

    if has_only(&["$numberDouble"]) {
        if let Some(s) = str_of("$numberDouble") {
            let f = match s {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other.parse().map_err(|_| {
                    BsonError::Deserialization(format!("Invalid $numberDouble {:?}", other))
                })?,
            };
            return Ok(Some(BsonValue::Double(f)));
        }
    }

    if has_only(&["$ref", "$id"]) {
        if let Some(collection) = str_of("$ref") {
            return Ok(Some(BsonValue::DbRef(DbRef::new(
                collection,
                from_json(&obj["$id"])?,
            ))));
        }
    }

    Ok(None)
}

/// 将 BsonValue 序列化为美化的 JSON 字符串
pub fn to_json_string(value: &BsonValue) -> BsonResult<String> {
    let json_value = to_json(value)?;
    serde_json::to_string_pretty(&json_value)
        .map_err(|e| BsonError::Serialization(format!("JSON serialization failed: {}", e)))
}

/// 解析 JSON 字符串并转换为 BsonValue
pub fn from_json_string(json_str: &str) -> BsonResult<BsonValue> {
    let json_value: JsonValue = serde_json::from_str(json_str)
        .map_err(|e| BsonError::Deserialization(format!("JSON parsing failed: {}", e)))?;
    from_json(&json_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_basic_types() {
        assert_eq!(to_json(&BsonValue::Null).unwrap(), JsonValue::Null);
        assert_eq!(to_json(&BsonValue::Boolean(true)).unwrap(), JsonValue::Bool(true));
        assert_eq!(to_json(&BsonValue::Integer(42)).unwrap(), json!(42));
        assert_eq!(to_json(&BsonValue::from("hello")).unwrap(), json!("hello"));
    }

    #[test]
    fn test_document_order_preserved() {
        let doc = doc! { "name": "Alice", "age": 30, "a": 1 };
        let json_val = to_json_document(&doc).unwrap();
        let keys: Vec<_> = json_val.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["name", "age", "a"]);
        assert_eq!(from_json_document(&json_val).unwrap(), doc);
    }

    #[test]
    fn test_extended_round_trip() {
        let mut doc = doc! {
            "min": (BsonValue::MinKey),
            "max": (BsonValue::MaxKey),
            "nan": (f64::INFINITY)
        };
        doc.insert("oid", ObjectId::from_bytes([0x11; 12]));
        doc.insert("date", UtcDateTime::from_millis(-5));
        doc.insert("bin", Binary::with_subtype(BinarySubtype::Md5, vec![1, 2, 3]));
        doc.insert("re", Regex::new("^x", "mi").with_extra_options("u"));
        doc.insert("code", BsonValue::JavaScriptCode("f()".into()));
        doc.insert("cws", CodeWithScope::new("x", doc! { "x": 1 }));
        doc.insert("sym", BsonValue::Symbol("s".into()));
        doc.insert("ts", Timestamp { time: 1, increment: 2 });
        doc.insert("ref", DbRef::new("users", ObjectId::from_bytes([2; 12])));

        let json = to_json_document(&doc).unwrap();
        assert_eq!(json["bin"], json!({ "$binary": "AQID", "$type": "05" }));
        assert_eq!(json["re"], json!({ "$regex": "^x", "$options": "imu" }));
        assert_eq!(from_json_document(&json).unwrap(), doc);
    }

    #[test]
    fn test_wrapper_needs_exact_keys() {
        let json = json!({ "$oid": "000000000000000000000000", "extra": 1 });
        assert!(matches!(from_json(&json).unwrap(), BsonValue::Document(_)));
    }

    #[test]
    fn test_invalid_object_id() {
        let json = json!({ "$oid": "zz" });
        assert!(matches!(from_json(&json), Err(BsonError::InvalidObjectId(_))));
    }

    #[test]
    fn test_date_from_rfc3339() {
        let json = json!({ "$date": "1970-01-01T00:00:01.500Z" });
        assert_eq!(
            from_json(&json).unwrap(),
            BsonValue::DateTime(UtcDateTime::from_millis(1500))
        );
    }

    #[test]
    fn test_integer_out_of_range() {
        let value = from_json_string("9223372036854775808");
        assert!(matches!(value, Err(BsonError::IntegerOutOfRange(_))));
        assert_eq!(
            from_json_string("-9223372036854775808").unwrap(),
            BsonValue::Integer(i64::MIN)
        );
        assert_eq!(from_json_string("1.5").unwrap(), BsonValue::Double(1.5));
    }

    #[test]
    fn test_top_level_must_be_object() {
        assert!(matches!(
            from_json_document(&json!([1, 2])),
            Err(BsonError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_string_round_trip() {
        let original = BsonValue::Document(doc! { "name": "Bob", "age": 25 });
        let json_str = to_json_string(&original).unwrap();
        assert_eq!(from_json_string(&json_str).unwrap(), original);
    }
}
