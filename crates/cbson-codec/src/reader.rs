//! 文档解码器
//!
//! 从左到右消费字节流，每轮读取 [类型标记][键名][负载]，
//! 嵌套对象由长度前缀界定范围，字段顺序与线格式一致。

use crate::document::Document;
use crate::spec::{BinarySubtype, ElementType, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH, MIN_DOCUMENT_SIZE};
use crate::value::{Binary, BsonValue, CodeWithScope, DbRef, Regex, Timestamp, UtcDateTime};
use crate::{BsonError, BsonResult};
use cbson_common::{CodecConfig, ObjectId, types::OBJECT_ID_LEN};
use compact_str::CompactString;
use std::io::Read;
use tracing::{debug, trace};

/// 解码选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub max_nesting_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }
}

impl From<&CodecConfig> for DecodeOptions {
    fn from(config: &CodecConfig) -> Self {
        Self {
            max_nesting_depth: config.max_nesting_depth,
        }
    }
}

/// 解码文档
///
/// # Brief
/// 将 BSON 字节还原为文档，外层长度之后的多余字节被忽略
///
/// # Arguments
/// * `data` - 以 4 字节长度前缀开头的字节切片
///
/// # Returns
/// 成功返回文档，输入损坏时返回错误且不产生部分结果
pub fn decode_document(data: &[u8]) -> BsonResult<Document> {
    decode_document_with(data, &DecodeOptions::default())
}

pub fn decode_document_with(data: &[u8], options: &DecodeOptions) -> BsonResult<Document> {
    let mut reader = DocumentReader::new(data, options);
    let doc = reader.read_document()?;
    debug!(fields = doc.len(), bytes = reader.position(), "Decoded document");
    Ok(doc)
}

/// # Brief
/// 从 `Read` 中读取恰好一个文档
///
/// 先读 4 字节长度，再读取剩余的 `长度 - 4` 字节后解码；不会多读。
pub fn decode_from_reader<R: Read>(reader: &mut R, options: &DecodeOptions) -> BsonResult<Document> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let declared = i32::from_le_bytes(prefix);
    let len = usize::try_from(declared)
        .ok()
        .filter(|len| (MIN_DOCUMENT_SIZE..=MAX_DOCUMENT_SIZE).contains(len))
        .ok_or_else(|| BsonError::Malformed {
            offset: 0,
            reason: format!("document length {} is outside 5..={}", declared, MAX_DOCUMENT_SIZE),
        })?;

    let mut data = Vec::new();
    data.try_reserve(len)
        .map_err(|_| BsonError::OutOfMemory { requested: len })?;
    data.extend_from_slice(&prefix);
    reader.take((len - 4) as u64).read_to_end(&mut data)?;
    if data.len() < len {
        return Err(BsonError::UnexpectedEof {
            offset: data.len(),
            need: len - data.len(),
            have: 0,
        });
    }
    decode_document_with(&data, options)
}

/// 文档读取器
///
/// 持有输入切片、读取位置和当前嵌套深度；输入在解码过程中只读。
pub struct DocumentReader<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> DocumentReader<'a> {
    pub fn new(data: &'a [u8], options: &DecodeOptions) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
            max_depth: options.max_nesting_depth,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// 读取一个顶层文档
    pub fn read_document(&mut self) -> BsonResult<Document> {
        let remaining = self.data.len().saturating_sub(self.pos);
        if remaining < 4 {
            return Err(BsonError::UnexpectedEof {
                offset: self.pos,
                need: 4,
                have: remaining,
            });
        }
        self.read_document_body()
    }

    fn enter(&mut self) -> BsonResult<()> {
        if self.depth >= self.max_depth {
            return Err(BsonError::NestingTooDeep(self.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn read_document_body(&mut self) -> BsonResult<Document> {
        let mut doc = Document::new();
        self.read_elements(|key, value| {
            doc.insert(key, value);
        })?;
        Ok(doc)
    }

    fn read_array_body(&mut self) -> BsonResult<Vec<BsonValue>> {
        let mut items = Vec::new();
        self.read_elements(|_, value| items.push(value))?;
        Ok(items)
    }

    /// 元素循环：文档和数组共用，数组调用方丢弃键名
    fn read_elements<F>(&mut self, mut visit: F) -> BsonResult<()>
    where
        F: FnMut(CompactString, BsonValue),
    {
        self.enter()?;
        let start = self.pos;
        let end = self.read_object_end()?;

        loop {
            if self.pos >= end {
                return Err(BsonError::Malformed {
                    offset: start,
                    reason: format!("object declared {} bytes but has no terminator", end - start),
                });
            }
            let tag = self.read_u8()?;
            if tag == 0 {
                if self.pos != end {
                    return Err(BsonError::Malformed {
                        offset: self.pos - 1,
                        reason: format!(
                            "terminator found before the declared end at offset {}",
                            end
                        ),
                    });
                }
                break;
            }

            let key = self.read_cstring("key")?;
            let value = self.read_value(tag, &key)?;
            if self.pos > end {
                return Err(BsonError::Malformed {
                    offset: start,
                    reason: format!("element {:?} overruns the declared object length", key),
                });
            }
            visit(key, value);
        }

        self.leave();
        Ok(())
    }

    /// 读取长度前缀并返回对象结束位置
    fn read_object_end(&mut self) -> BsonResult<usize> {
        let start = self.pos;
        let declared = self.read_i32()?;
        let len = usize::try_from(declared)
            .ok()
            .filter(|len| *len >= MIN_DOCUMENT_SIZE)
            .ok_or_else(|| BsonError::Malformed {
                offset: start,
                reason: format!("object length {} is below the minimum of {}", declared, MIN_DOCUMENT_SIZE),
            })?;
        let have = self.data.len() - start;
        if len > have {
            return Err(BsonError::UnexpectedEof {
                offset: start,
                need: len,
                have,
            });
        }
        Ok(start + len)
    }

    fn read_value(&mut self, tag: u8, key: &str) -> BsonResult<BsonValue> {
        let element_type = ElementType::from_u8(tag).ok_or_else(|| BsonError::UnknownTypeTag {
            tag,
            key: key.to_string(),
        })?;
        trace!(key, ?element_type, offset = self.pos, "Reading element");

        let value = match element_type {
            ElementType::Double => BsonValue::Double(self.read_f64()?),
            ElementType::String => BsonValue::String(self.read_string(key)?),
            ElementType::Document => match DbRef::from_document(self.read_document_body()?) {
                Ok(dbref) => BsonValue::DbRef(dbref),
                Err(doc) => BsonValue::Document(doc),
            },
            ElementType::Array => BsonValue::Array(self.read_array_body()?),
            ElementType::Binary => BsonValue::Binary(self.read_binary(key)?),
            ElementType::Undefined => {
                debug!(key, "Legacy undefined value decoded as null");
                BsonValue::Null
            }
            ElementType::ObjectId => BsonValue::ObjectId(self.read_object_id()?),
            ElementType::Boolean => {
                let offset = self.pos;
                match self.read_u8()? {
                    0 => BsonValue::Boolean(false),
                    1 => BsonValue::Boolean(true),
                    other => {
                        return Err(BsonError::Malformed {
                            offset,
                            reason: format!("boolean {:?} has invalid byte 0x{:02X}", key, other),
                        })
                    }
                }
            }
            ElementType::DateTime => {
                BsonValue::DateTime(UtcDateTime::from_millis(self.read_i64()?))
            }
            ElementType::Null => BsonValue::Null,
            ElementType::Regex => {
                let pattern = self.read_cstring("regex pattern")?;
                let options = self.read_cstring("regex options")?;
                BsonValue::Regex(Regex::from_wire(pattern, &options))
            }
            ElementType::DbPointer => {
                let collection = self.read_string(key)?;
                let id = self.read_object_id()?;
                debug!(key, "Legacy DBPointer decoded as DBRef");
                BsonValue::DbRef(DbRef::new(collection, id))
            }
            ElementType::JavaScriptCode => BsonValue::JavaScriptCode(self.read_string(key)?),
            ElementType::Symbol => BsonValue::Symbol(self.read_string(key)?),
            ElementType::JavaScriptCodeWithScope => {
                BsonValue::JavaScriptCodeWithScope(self.read_code_with_scope(key)?)
            }
            ElementType::Int32 => BsonValue::Integer(self.read_i32()? as i64),
            ElementType::Timestamp => BsonValue::Timestamp(Timestamp::from_u64(self.read_u64()?)),
            ElementType::Int64 => BsonValue::Integer(self.read_i64()?),
            ElementType::MinKey => BsonValue::MinKey,
            ElementType::MaxKey => BsonValue::MaxKey,
        };
        Ok(value)
    }

    fn read_binary(&mut self, key: &str) -> BsonResult<Binary> {
        let start = self.pos;
        let len = self.read_length(key)?;
        let subtype = BinarySubtype::from(self.read_u8()?);
        if subtype == BinarySubtype::BinaryOld {
            let inner = self.read_length(key)?;
            if inner.checked_add(4) != Some(len) {
                return Err(BsonError::Malformed {
                    offset: start,
                    reason: format!(
                        "old binary {:?} inner length {} does not match outer length {}",
                        key, inner, len
                    ),
                });
            }
            return Ok(Binary::with_subtype(subtype, self.read_bytes(inner)?));
        }
        Ok(Binary::with_subtype(subtype, self.read_bytes(len)?))
    }

    fn read_code_with_scope(&mut self, key: &str) -> BsonResult<CodeWithScope> {
        let start = self.pos;
        let end = self.read_object_end()?;
        let code = self.read_string(key)?;
        let scope = self.read_document_body()?;
        if self.pos != end {
            return Err(BsonError::Malformed {
                offset: start,
                reason: format!(
                    "code with scope {:?} declared {} bytes but used {}",
                    key,
                    end - start,
                    self.pos - start
                ),
            });
        }
        Ok(CodeWithScope { code, scope })
    }

    fn read_object_id(&mut self) -> BsonResult<ObjectId> {
        Ok(ObjectId::from_slice(self.read_bytes(OBJECT_ID_LEN)?)?)
    }

    /// 长度前缀的 UTF-8 字符串，长度包含结尾 NUL
    fn read_string(&mut self, key: &str) -> BsonResult<CompactString> {
        let start = self.pos;
        let declared = self.read_i32()?;
        if declared < 1 {
            return Err(BsonError::Malformed {
                offset: start,
                reason: format!("string {:?} has invalid length {}", key, declared),
            });
        }
        let bytes = self.read_bytes(declared as usize)?;
        let (body, terminator) = bytes.split_at(bytes.len() - 1);
        if terminator != [0] {
            return Err(BsonError::Malformed {
                offset: start,
                reason: format!("string {:?} is not NUL-terminated", key),
            });
        }
        let s = std::str::from_utf8(body).map_err(|source| BsonError::InvalidEncoding {
            context: format!("string value of {:?}", key),
            source,
        })?;
        Ok(CompactString::from(s))
    }

    fn read_cstring(&mut self, context: &str) -> BsonResult<CompactString> {
        let start = self.pos;
        let rest = &self.data[start..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(BsonError::UnexpectedEof {
                offset: start,
                need: rest.len() + 1,
                have: rest.len(),
            })?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|source| BsonError::InvalidEncoding {
            context: format!("{} at offset {}", context, start),
            source,
        })?;
        self.pos += nul + 1;
        Ok(CompactString::from(s))
    }

    fn read_length(&mut self, key: &str) -> BsonResult<usize> {
        let start = self.pos;
        let declared = self.read_i32()?;
        usize::try_from(declared).map_err(|_| BsonError::Malformed {
            offset: start,
            reason: format!("{:?} has negative length {}", key, declared),
        })
    }

    fn read_bytes(&mut self, len: usize) -> BsonResult<&'a [u8]> {
        let have = self.data.len() - self.pos;
        if len > have {
            return Err(BsonError::UnexpectedEof {
                offset: self.pos,
                need: len,
                have,
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_fixed<const N: usize>(&mut self) -> BsonResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> BsonResult<u8> {
        Ok(self.read_fixed::<1>()?[0])
    }

    fn read_i32(&mut self) -> BsonResult<i32> {
        Ok(i32::from_le_bytes(self.read_fixed()?))
    }

    fn read_i64(&mut self) -> BsonResult<i64> {
        Ok(i64::from_le_bytes(self.read_fixed()?))
    }

    fn read_u64(&mut self) -> BsonResult<u64> {
        Ok(u64::from_le_bytes(self.read_fixed()?))
    }

    fn read_f64(&mut self) -> BsonResult<f64> {
        Ok(f64::from_le_bytes(self.read_fixed()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{encode_document, encode_document_with, EncodeOptions};
    use crate::{doc, RegexFlags};
    use std::io::Cursor;

    fn round_trip(doc: &Document) -> Document {
        let bytes = encode_document(doc, false, false).unwrap();
        decode_document(&bytes).unwrap()
    }

    fn sample() -> Document {
        let mut doc = doc! {
            "double": 1.5,
            "string": "héllo",
            "empty": "",
            "nested": { "a": 1, "b": [true, false, null] },
            "small": 42,
            "big": 9_000_000_000i64,
            "neg": (i64::MIN),
            "min": (BsonValue::MinKey),
            "max": (BsonValue::MaxKey)
        };
        doc.insert("oid", ObjectId::from_bytes([0xAB; 12]));
        doc.insert("date", UtcDateTime::from_millis(1_700_000_000_000));
        doc.insert("bin", Binary::with_subtype(BinarySubtype::Uuid, vec![1; 16]));
        doc.insert("old", Binary::with_subtype(BinarySubtype::BinaryOld, vec![5, 6]));
        doc.insert("user", Binary::with_subtype(BinarySubtype::UserDefined(0x80), vec![]));
        doc.insert("re", Regex::new("^a", "xi"));
        doc.insert("ref", DbRef::new("users", ObjectId::from_bytes([1; 12])));
        doc.insert("code", BsonValue::JavaScriptCode("f()".into()));
        doc.insert("sym", BsonValue::Symbol("sym".into()));
        doc.insert("cws", CodeWithScope::new("x + y", doc! { "x": 1, "y": "z" }));
        doc.insert("ts", Timestamp { time: 7, increment: 9 });
        doc.insert("nan_free", f64::MIN_POSITIVE);
        doc
    }

    #[test]
    fn test_round_trip_all_types() {
        let doc = sample();
        assert_eq!(round_trip(&doc), doc);
    }

    #[test]
    fn test_reencode_is_idempotent() {
        let bytes = encode_document(&sample(), false, false).unwrap();
        let decoded = decode_document(&bytes).unwrap();
        assert_eq!(encode_document(&decoded, false, false).unwrap(), bytes);
    }

    #[test]
    fn test_float_bits_preserved() {
        let doc = doc! { "z": (-0.0f64), "inf": (f64::INFINITY) };
        let decoded = round_trip(&doc);
        assert_eq!(decoded.get_f64("z").unwrap().to_bits(), (-0.0f64).to_bits());
        assert_eq!(decoded.get_f64("inf"), Some(f64::INFINITY));
    }

    #[test]
    fn test_decode_known_bytes() {
        let bytes = b"\x16\x00\x00\x00\x02hello\x00\x06\x00\x00\x00world\x00\x00";
        let doc = decode_document(bytes).unwrap();
        assert_eq!(doc, doc! { "hello": "world" });
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode_document(&doc! { "a": 1 }, false, false).unwrap().to_vec();
        bytes.extend_from_slice(b"garbage");
        assert_eq!(decode_document(&bytes).unwrap(), doc! { "a": 1 });
    }

    #[test]
    fn test_unknown_tag_fails() {
        let bytes = b"\x0C\x00\x00\x00\x99a\x00\x00\x00\x00\x00\x00";
        match decode_document(bytes) {
            Err(BsonError::UnknownTypeTag { tag, key }) => {
                assert_eq!(tag, 0x99);
                assert_eq!(key, "a");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // decimal128 不在支持范围内
        let mut bytes = vec![0x18, 0, 0, 0, 0x13, b'd', 0];
        bytes.extend_from_slice(&[0; 16]);
        bytes.push(0);
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::UnknownTypeTag { tag: 0x13, .. })
        ));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            decode_document(&[5, 0, 0]),
            Err(BsonError::UnexpectedEof { .. })
        ));
        let bytes = encode_document(&doc! { "a": "long string" }, false, false).unwrap();
        assert!(matches!(
            decode_document(&bytes[..bytes.len() - 3]),
            Err(BsonError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_outer_length_checks() {
        assert!(matches!(
            decode_document(&[4, 0, 0, 0, 0]),
            Err(BsonError::Malformed { .. })
        ));
        assert!(matches!(
            decode_document(&[6, 0, 0, 0, 0]),
            Err(BsonError::UnexpectedEof { .. })
        ));
        assert!(matches!(
            decode_document(&[0xFF, 0xFF, 0xFF, 0xFF, 0]),
            Err(BsonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_missing_terminator() {
        // 声明长度 7，元素之后直接到达末尾
        let bytes = [7, 0, 0, 0, 0x0A, b'a', 0, 0];
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_early_terminator() {
        let bytes = [9, 0, 0, 0, 0x0A, b'a', 0, 0, 0];
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_nested_length_mismatch() {
        let mut bytes = encode_document(&doc! { "d": { "x": 1 } }, false, false)
            .unwrap()
            .to_vec();
        // 内层文档长度从 12 改为 11
        bytes[7] = 11;
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_invalid_boolean() {
        let bytes = [9, 0, 0, 0, 0x08, b'b', 0, 2, 0];
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_string() {
        let bytes = [14, 0, 0, 0, 0x02, b's', 0, 2, 0, 0, 0, 0xFF, 0, 0];
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_key() {
        let bytes = [8, 0, 0, 0, 0x0A, 0xC3, 0, 0];
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_zero_string_length() {
        let bytes = [12, 0, 0, 0, 0x02, b's', 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_undefined_decodes_to_null() {
        let bytes = [8, 0, 0, 0, 0x06, b'u', 0, 0];
        assert_eq!(decode_document(&bytes).unwrap(), doc! { "u": null });
    }

    #[test]
    fn test_db_pointer_decodes_to_dbref() {
        let mut bytes = vec![0, 0, 0, 0, 0x0C, b'p', 0];
        bytes.extend_from_slice(&6i32.to_le_bytes());
        bytes.extend_from_slice(b"users\0");
        bytes.extend_from_slice(&[3; 12]);
        bytes.push(0);
        let len = bytes.len() as i32;
        bytes[..4].copy_from_slice(&len.to_le_bytes());

        let doc = decode_document(&bytes).unwrap();
        let expected = DbRef::new("users", ObjectId::from_bytes([3; 12]));
        assert_eq!(doc.get("p"), Some(&BsonValue::DbRef(expected)));
    }

    #[test]
    fn test_ref_document_with_extra_fields_stays_document() {
        let inner = doc! { "$ref": "users", "$id": 1, "$db": "app" };
        let doc = doc! { "r": inner };
        let decoded = round_trip(&doc);
        assert!(matches!(decoded.get("r"), Some(BsonValue::Document(_))));
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_array_names_discarded() {
        // 数组键名为 "x"、"y"，解码时只保留位置顺序
        let body: Vec<u8> = [
            &[0x10, b'x', 0][..],
            &1i32.to_le_bytes(),
            &[0x10, b'y', 0],
            &2i32.to_le_bytes(),
            &[0],
        ]
        .concat();
        let mut array = ((body.len() + 4) as i32).to_le_bytes().to_vec();
        array.extend_from_slice(&body);
        let mut bytes = vec![0, 0, 0, 0, 0x04, b'a', 0];
        bytes.extend_from_slice(&array);
        bytes.push(0);
        let len = bytes.len() as i32;
        bytes[..4].copy_from_slice(&len.to_le_bytes());

        let doc = decode_document(&bytes).unwrap();
        assert_eq!(
            doc.get("a"),
            Some(&BsonValue::Array(vec![
                BsonValue::Integer(1),
                BsonValue::Integer(2)
            ]))
        );
    }

    #[test]
    fn test_regex_extra_options_order_preserved() {
        let bytes = [14, 0, 0, 0, 0x0B, b'r', 0, b'a', 0, b'i', b'z', b'y', 0, 0];
        let doc = decode_document(&bytes).unwrap();
        let Some(BsonValue::Regex(regex)) = doc.get("r") else {
            panic!("expected regex");
        };
        assert_eq!(regex.pattern(), "a");
        assert_eq!(regex.flags(), RegexFlags::IGNORE_CASE);
        assert_eq!(regex.extra_options(), "zy");
        assert_eq!(regex.options(), "iyz");
    }

    #[test]
    fn test_regex_round_trip() {
        let regex = Regex::new("a.c", "mi").with_extra_options("zy");
        let doc = doc! { "r": (regex.clone()) };
        assert_eq!(round_trip(&doc).get("r"), Some(&BsonValue::Regex(regex)));
    }

    #[test]
    fn test_old_binary_length_mismatch() {
        let mut bytes = encode_document(
            &doc! { "b": (Binary::with_subtype(BinarySubtype::BinaryOld, vec![1, 2])) },
            false,
            false,
        )
        .unwrap()
        .to_vec();
        // 内层长度 2 改为 3
        bytes[12] = 3;
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_code_with_scope_length_mismatch() {
        let cws = CodeWithScope::new("f", doc! { "x": 1 });
        let mut bytes = encode_document(&doc! { "c": cws }, false, false)
            .unwrap()
            .to_vec();
        bytes.insert(bytes.len() - 1, 0);
        bytes[7] += 1;
        bytes[0] += 1;
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_depth_guard() {
        let deep = doc! { "a": { "b": { "c": { "d": 1 } } } };
        let bytes = encode_document_with(&deep, &EncodeOptions::default()).unwrap();
        assert!(decode_document(&bytes).is_ok());

        let options = DecodeOptions {
            max_nesting_depth: 3,
        };
        assert!(matches!(
            decode_document_with(&bytes, &options),
            Err(BsonError::NestingTooDeep(3))
        ));
    }

    #[test]
    fn test_deeply_nested_input_is_rejected() {
        // 1000 层嵌套数组，不会耗尽栈
        let mut bytes = vec![5, 0, 0, 0, 0];
        for _ in 0..1000 {
            let mut outer = ((bytes.len() + 8) as i32).to_le_bytes().to_vec();
            outer.extend_from_slice(&[0x04, b'a', 0]);
            outer.extend_from_slice(&bytes);
            outer.push(0);
            bytes = outer;
        }
        assert!(matches!(
            decode_document(&bytes),
            Err(BsonError::NestingTooDeep(MAX_NESTING_DEPTH))
        ));
    }

    #[test]
    fn test_decode_from_reader() {
        let first = doc! { "a": 1 };
        let second = doc! { "b": "two" };
        let mut stream = encode_document(&first, false, false).unwrap().to_vec();
        stream.extend_from_slice(&encode_document(&second, false, false).unwrap());

        let mut cursor = Cursor::new(stream);
        let options = DecodeOptions::default();
        assert_eq!(decode_from_reader(&mut cursor, &options).unwrap(), first);
        assert_eq!(decode_from_reader(&mut cursor, &options).unwrap(), second);
        assert!(matches!(
            decode_from_reader(&mut cursor, &options),
            Err(BsonError::Io(_))
        ));
    }

    #[test]
    fn test_decode_from_reader_short_body() {
        let mut cursor = Cursor::new(vec![20, 0, 0, 0, 0x0A, b'a', 0]);
        assert!(matches!(
            decode_from_reader(&mut cursor, &DecodeOptions::default()),
            Err(BsonError::UnexpectedEof { .. })
        ));
    }
}
