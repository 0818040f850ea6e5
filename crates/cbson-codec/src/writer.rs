//! 文档编码器
//!
//! 深度优先遍历有序文档，为每个字段写出 [类型标记][键名][NUL][负载]。
//! 嵌套对象先预留长度字段，主体写完后回填总长度。

use crate::buffer::{Buffer, LengthSlot};
use crate::document::Document;
use crate::spec::{BinarySubtype, MAX_DOCUMENT_SIZE, MAX_NESTING_DEPTH, MAX_REGEX_EXTRA_OPTIONS};
use crate::value::{Binary, BsonValue, CodeWithScope};
use crate::{BsonError, BsonResult};
use bytes::Bytes;
use cbson_common::CodecConfig;
use std::io::Write;
use tracing::{debug, trace};

/// 编码选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// 拒绝以 `$` 开头或包含 `.` 的键名
    pub validate_keys: bool,
    /// 把顶层文档的 `_id` 字段写在最前
    pub promote_id: bool,
    pub max_nesting_depth: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            validate_keys: false,
            promote_id: false,
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }
}

impl From<&CodecConfig> for EncodeOptions {
    fn from(config: &CodecConfig) -> Self {
        Self {
            validate_keys: config.validate_keys,
            promote_id: config.promote_id,
            max_nesting_depth: config.max_nesting_depth,
        }
    }
}

/// 编码文档
///
/// # Brief
/// 将文档序列化为 BSON 字节
///
/// # Arguments
/// * `doc` - 要编码的文档
/// * `validate_keys` - 是否校验键名
/// * `promote_id` - 是否把 `_id` 写在最前
///
/// # Returns
/// 成功返回编码后的字节，任一约束被违反时返回错误且不产生部分输出
pub fn encode_document(doc: &Document, validate_keys: bool, promote_id: bool) -> BsonResult<Bytes> {
    encode_document_with(
        doc,
        &EncodeOptions {
            validate_keys,
            promote_id,
            ..EncodeOptions::default()
        },
    )
}

pub fn encode_document_with(doc: &Document, options: &EncodeOptions) -> BsonResult<Bytes> {
    let mut buf = Buffer::new();
    DocumentWriter::new(&mut buf, *options).write_document(doc)?;
    debug!(fields = doc.len(), bytes = buf.len(), "Encoded document");
    Ok(buf.into_bytes())
}

/// 编码文档并写入 `writer`，返回写出的字节数
pub fn encode_to_writer<W: Write>(
    doc: &Document,
    options: &EncodeOptions,
    writer: &mut W,
) -> BsonResult<usize> {
    let bytes = encode_document_with(doc, options)?;
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// 文档写入器
///
/// 持有单次编码调用的缓冲区借用和当前嵌套深度。
pub struct DocumentWriter<'a> {
    buf: &'a mut Buffer,
    options: EncodeOptions,
    depth: usize,
}

impl<'a> DocumentWriter<'a> {
    pub fn new(buf: &'a mut Buffer, options: EncodeOptions) -> Self {
        Self {
            buf,
            options,
            depth: 0,
        }
    }

    /// 写出一个顶层文档，返回其字节长度
    pub fn write_document(&mut self, doc: &Document) -> BsonResult<usize> {
        self.write_document_body(doc, self.options.validate_keys, self.options.promote_id)
    }

    fn enter(&mut self) -> BsonResult<()> {
        if self.depth >= self.options.max_nesting_depth {
            return Err(BsonError::NestingTooDeep(self.options.max_nesting_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn write_document_body(
        &mut self,
        doc: &Document,
        validate_keys: bool,
        promote_id: bool,
    ) -> BsonResult<usize> {
        self.enter()?;
        let slot = self.buf.reserve_length()?;

        if promote_id {
            if let Some(id) = doc.get("_id") {
                self.write_element("_id", id, validate_keys)?;
            }
        }

        for (key, value) in doc.iter() {
            if promote_id && key == "_id" {
                continue;
            }
            if validate_keys {
                validate_key(key)?;
            }
            self.write_element(key, value, validate_keys)?;
        }

        self.buf.write_u8(0)?;
        let size = self.finish_object(slot)?;
        self.leave();
        Ok(size)
    }

    fn write_array(&mut self, items: &[BsonValue], validate_keys: bool) -> BsonResult<usize> {
        self.enter()?;
        let slot = self.buf.reserve_length()?;
        for (index, value) in items.iter().enumerate() {
            self.write_element(&index.to_string(), value, validate_keys)?;
        }
        self.buf.write_u8(0)?;
        let size = self.finish_object(slot)?;
        self.leave();
        Ok(size)
    }

    fn finish_object(&mut self, slot: LengthSlot) -> BsonResult<usize> {
        let size = self.buf.len_since(slot);
        if size > MAX_DOCUMENT_SIZE {
            return Err(BsonError::DocumentTooLarge {
                size,
                max: MAX_DOCUMENT_SIZE,
            });
        }
        self.buf.patch_length(slot)
    }

    fn write_element(&mut self, key: &str, value: &BsonValue, validate_keys: bool) -> BsonResult<()> {
        let element_type = value.element_type();
        trace!(key, ?element_type, "Writing element");
        self.buf.write_u8(element_type.as_u8())?;
        self.write_cstring(key, "key")?;

        match value {
            BsonValue::Double(n) => self.buf.write_f64(*n)?,
            BsonValue::String(s) | BsonValue::JavaScriptCode(s) | BsonValue::Symbol(s) => {
                self.write_string(s)?
            }
            BsonValue::Document(doc) => {
                self.write_document_body(doc, validate_keys, false)?;
            }
            BsonValue::DbRef(dbref) => {
                self.write_document_body(&dbref.to_document(), false, false)?;
            }
            BsonValue::Array(items) => {
                self.write_array(items, validate_keys)?;
            }
            BsonValue::Binary(binary) => self.write_binary(binary)?,
            BsonValue::ObjectId(id) => self.buf.write(id.as_bytes())?,
            BsonValue::Boolean(b) => self.buf.write_u8(u8::from(*b))?,
            BsonValue::DateTime(dt) => self.buf.write_i64(dt.timestamp_millis())?,
            BsonValue::Null | BsonValue::MinKey | BsonValue::MaxKey => {}
            BsonValue::Regex(regex) => {
                let extra = regex.extra_options().chars().count();
                if extra > MAX_REGEX_EXTRA_OPTIONS {
                    return Err(BsonError::InvalidDocument(format!(
                        "regex has {} extra options, at most {} allowed",
                        extra, MAX_REGEX_EXTRA_OPTIONS
                    )));
                }
                self.write_cstring(regex.pattern(), "regex pattern")?;
                self.write_cstring(&regex.options(), "regex options")?;
            }
            BsonValue::JavaScriptCodeWithScope(cws) => self.write_code_with_scope(cws)?,
            BsonValue::Integer(n) => match i32::try_from(*n) {
                Ok(small) => self.buf.write_i32(small)?,
                Err(_) => self.buf.write_i64(*n)?,
            },
            BsonValue::Timestamp(ts) => self.buf.write_u64(ts.to_u64())?,
        }
        Ok(())
    }

    fn write_cstring(&mut self, s: &str, context: &str) -> BsonResult<()> {
        if s.as_bytes().contains(&0) {
            return Err(BsonError::InvalidDocument(format!(
                "{} {:?} must not contain a NUL byte",
                context, s
            )));
        }
        self.buf.write(s.as_bytes())?;
        self.buf.write_u8(0)
    }

    fn write_string(&mut self, s: &str) -> BsonResult<()> {
        self.buf.write_i32(wire_len(s.len() + 1)?)?;
        self.buf.write(s.as_bytes())?;
        self.buf.write_u8(0)
    }

    fn write_binary(&mut self, binary: &Binary) -> BsonResult<()> {
        let len = binary.bytes.len();
        if binary.subtype == BinarySubtype::BinaryOld {
            self.buf.write_i32(wire_len(len + 4)?)?;
            self.buf.write_u8(binary.subtype.into())?;
            self.buf.write_i32(wire_len(len)?)?;
        } else {
            self.buf.write_i32(wire_len(len)?)?;
            self.buf.write_u8(binary.subtype.into())?;
        }
        self.buf.write(&binary.bytes)
    }

    fn write_code_with_scope(&mut self, cws: &CodeWithScope) -> BsonResult<()> {
        let slot = self.buf.reserve_length()?;
        self.write_string(&cws.code)?;
        self.write_document_body(&cws.scope, false, false)?;
        self.finish_object(slot)?;
        Ok(())
    }
}

fn validate_key(key: &str) -> BsonResult<()> {
    if key.starts_with('$') {
        return Err(BsonError::InvalidName {
            key: key.to_string(),
            reason: "key must not start with '$'",
        });
    }
    if key.contains('.') {
        return Err(BsonError::InvalidName {
            key: key.to_string(),
            reason: "key must not contain '.'",
        });
    }
    Ok(())
}

/// 负载长度转换为线格式的 int32
fn wire_len(len: usize) -> BsonResult<i32> {
    if len > MAX_DOCUMENT_SIZE {
        return Err(BsonError::DocumentTooLarge {
            size: len,
            max: MAX_DOCUMENT_SIZE,
        });
    }
    i32::try_from(len).map_err(|_| BsonError::DocumentTooLarge {
        size: len,
        max: MAX_DOCUMENT_SIZE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DbRef, Regex, Timestamp, UtcDateTime};
    use crate::{bson, doc, ObjectId};

    fn encode(doc: &Document) -> Vec<u8> {
        encode_document(doc, false, false).unwrap().to_vec()
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(encode(&Document::new()), vec![5, 0, 0, 0, 0]);
    }

    #[test]
    fn test_string_layout() {
        let bytes = encode(&doc! { "hello": "world" });
        assert_eq!(
            bytes,
            b"\x16\x00\x00\x00\x02hello\x00\x06\x00\x00\x00world\x00\x00".to_vec()
        );
    }

    #[test]
    fn test_string_payload_may_contain_nul() {
        let bytes = encode(&doc! { "s": "a\0b" });
        assert_eq!(&bytes[7..11], &4i32.to_le_bytes());
        assert_eq!(&bytes[11..15], b"a\0b\0");
    }

    #[test]
    fn test_integer_width_selection() {
        let bytes = encode(&doc! { "n": 2147483647 });
        assert_eq!(bytes[4], 0x10);
        assert_eq!(bytes.len(), 4 + 1 + 2 + 4 + 1);

        let bytes = encode(&doc! { "n": 2147483648i64 });
        assert_eq!(bytes[4], 0x12);
        assert_eq!(bytes.len(), 4 + 1 + 2 + 8 + 1);
        assert_eq!(&bytes[7..15], &2147483648i64.to_le_bytes());

        let bytes = encode(&doc! { "n": (-2147483649i64) });
        assert_eq!(bytes[4], 0x12);
    }

    #[test]
    fn test_key_validation() {
        for key in ["$bad", "a.b"] {
            let mut doc = Document::new();
            doc.insert(key, 1);
            let err = encode_document(&doc, true, false).unwrap_err();
            assert!(matches!(err, BsonError::InvalidName { .. }), "{key}");
            assert!(encode_document(&doc, false, false).is_ok());
        }
    }

    #[test]
    fn test_key_validation_reaches_nested_documents() {
        let doc = doc! { "outer": { "a.b": 1 } };
        assert!(matches!(
            encode_document(&doc, true, false),
            Err(BsonError::InvalidName { .. })
        ));

        let doc = doc! { "list": [{ "$x": 1 }] };
        assert!(matches!(
            encode_document(&doc, true, false),
            Err(BsonError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_key_validation_skips_dbref_and_scope() {
        let mut doc = Document::new();
        doc.insert("ref", DbRef::new("users", ObjectId::from_bytes([7; 12])));
        doc.insert(
            "code",
            CodeWithScope::new("return x", doc! { "$scoped": 1 }),
        );
        assert!(encode_document(&doc, true, false).is_ok());
    }

    #[test]
    fn test_nul_in_key_rejected() {
        let mut doc = Document::new();
        doc.insert("a\0b", 1);
        assert!(matches!(
            encode_document(&doc, false, false),
            Err(BsonError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_nul_in_regex_pattern_rejected() {
        let doc = doc! { "re": (Regex::new("a\0", "")) };
        assert!(matches!(
            encode_document(&doc, false, false),
            Err(BsonError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_promote_id() {
        let doc = doc! { "x": 1, "_id": 2 };
        let promoted = encode_document(&doc, false, true).unwrap();
        assert_eq!(&promoted[4..9], b"\x10_id\x00");
        assert_eq!(&promoted[13..16], b"\x10x\x00");

        let plain = encode_document(&doc, false, false).unwrap();
        assert_eq!(&plain[4..7], b"\x10x\x00");
        assert_eq!(promoted.len(), plain.len());
    }

    #[test]
    fn test_promote_id_only_at_top_level() {
        let doc = doc! { "inner": { "a": 1, "_id": 2 } };
        let bytes = encode_document(&doc, false, true).unwrap();
        // 外层(4) + 标记(1) + "inner\0"(6) + 内层长度(4) 之后是内层首字段
        assert_eq!(&bytes[15..18], b"\x10a\x00");
    }

    #[test]
    fn test_array_index_keys() {
        let bytes = encode(&doc! { "a": ["a", "b", "c"] });
        assert_eq!(bytes[4], 0x04);
        let body = &bytes[7..];
        let expected_len = 4 + 3 * (1 + 2 + 4 + 2) + 1;
        assert_eq!(&body[..4], &(expected_len as i32).to_le_bytes());
        assert_eq!(&body[4..7], b"\x020\x00");
        assert_eq!(&body[13..16], b"\x021\x00");
        assert_eq!(&body[22..25], b"\x022\x00");
    }

    #[test]
    fn test_regex_options_sorted() {
        let regex = Regex::new("a.c", "mi").with_extra_options("zy");
        let bytes = encode(&doc! { "r": regex });
        assert_eq!(&bytes[4..7], b"\x0Br\x00");
        assert_eq!(&bytes[7..16], b"a.c\x00imyz\x00");
    }

    #[test]
    fn test_regex_too_many_extra_options_rejected() {
        let doc = doc! { "r": (Regex::new("p", "abcdefghjklnop")) };
        assert!(matches!(
            encode_document(&doc, false, false),
            Err(BsonError::InvalidDocument(_))
        ));

        let bytes = encode(&doc! { "r": (Regex::new("p", "imxabcdefghj")) });
        assert_eq!(&bytes[7..22], b"p\x00imxabcdefghj\x00");
    }

    #[test]
    fn test_binary_layouts() {
        let bytes = encode(&doc! { "b": (Binary::new(vec![1, 2, 3])) });
        assert_eq!(&bytes[7..15], &[3, 0, 0, 0, 0, 1, 2, 3]);

        let old = Binary::with_subtype(BinarySubtype::BinaryOld, vec![9, 9]);
        let bytes = encode(&doc! { "b": old });
        assert_eq!(&bytes[7..17], &[6, 0, 0, 0, 2, 2, 0, 0, 0, 9]);
    }

    #[test]
    fn test_code_with_scope_layout() {
        let cws = CodeWithScope::new("f", doc! { "x": 1 });
        let bytes = encode(&doc! { "c": cws });
        assert_eq!(bytes[4], 0x0F);
        // 总长度 = 4 + (4 + 2) + 作用域文档 12
        assert_eq!(&bytes[7..11], &22i32.to_le_bytes());
        assert_eq!(&bytes[11..17], b"\x02\x00\x00\x00f\x00");
        assert_eq!(&bytes[17..21], &12i32.to_le_bytes());
    }

    #[test]
    fn test_scalar_payloads() {
        let doc = doc! {
            "t": (Timestamp { time: 1, increment: 2 }),
            "d": (UtcDateTime::from_millis(-1)),
            "min": (BsonValue::MinKey),
            "max": (BsonValue::MaxKey),
            "f": false
        };
        let bytes = encode(&doc);
        assert_eq!(&bytes[4..7], b"\x11t\x00");
        assert_eq!(&bytes[7..15], &[2, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(&bytes[15..18], b"\x09d\x00");
        assert_eq!(&bytes[18..26], &(-1i64).to_le_bytes());
        assert_eq!(&bytes[26..31], b"\xFFmin\x00");
        assert_eq!(&bytes[31..36], b"\x7Fmax\x00");
        assert_eq!(&bytes[36..40], b"\x08f\x00\x00");
    }

    #[test]
    fn test_size_ceiling_is_inclusive() {
        // 4 长度 + 1 标记 + "b\0" + 4 负载长度 + 1 子类型 + 负载 + 1 结尾
        let overhead = 13;
        let exact = doc! { "b": (Binary::new(vec![0u8; MAX_DOCUMENT_SIZE - overhead])) };
        let bytes = encode_document(&exact, false, false).unwrap();
        assert_eq!(bytes.len(), MAX_DOCUMENT_SIZE);

        let over = doc! { "b": (Binary::new(vec![0u8; MAX_DOCUMENT_SIZE - overhead + 1])) };
        assert!(matches!(
            encode_document(&over, false, false),
            Err(BsonError::DocumentTooLarge { .. })
        ));
    }

    #[test]
    fn test_nested_oversize_fails_whole_encode() {
        let inner = doc! { "b": (Binary::new(vec![0u8; MAX_DOCUMENT_SIZE])) };
        let outer = doc! { "ok": 1, "inner": inner };
        assert!(matches!(
            encode_document(&outer, false, false),
            Err(BsonError::DocumentTooLarge { .. })
        ));
    }

    #[test]
    fn test_nesting_depth_guard() {
        let options = EncodeOptions {
            max_nesting_depth: 3,
            ..EncodeOptions::default()
        };
        let ok = doc! { "a": { "b": { "c": 1 } } };
        assert!(encode_document_with(&ok, &options).is_ok());

        let too_deep = doc! { "a": { "b": { "c": { "d": 1 } } } };
        assert!(matches!(
            encode_document_with(&too_deep, &options),
            Err(BsonError::NestingTooDeep(3))
        ));

        let arrays = doc! { "a": [[[1]]] };
        assert!(matches!(
            encode_document_with(&arrays, &options),
            Err(BsonError::NestingTooDeep(3))
        ));
    }

    #[test]
    fn test_options_from_config() {
        let config = CodecConfig {
            validate_keys: true,
            promote_id: true,
            max_nesting_depth: 7,
        };
        let options = EncodeOptions::from(&config);
        assert!(options.validate_keys);
        assert!(options.promote_id);
        assert_eq!(options.max_nesting_depth, 7);
    }

    #[test]
    fn test_encode_to_writer() {
        let doc = doc! { "a": (bson!([1, 2])) };
        let mut out = Vec::new();
        let written = encode_to_writer(&doc, &EncodeOptions::default(), &mut out).unwrap();
        assert_eq!(written, out.len());
        assert_eq!(out, encode(&doc));
    }
}
