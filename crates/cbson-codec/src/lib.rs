//! # cbson - BSON 文档编解码器
//!
//! 把有序键值文档转换为 BSON 线格式，并从线格式还原。
//!
//! - **字节精确**：小端序、长度前缀、NUL 结尾，与其他 BSON 实现逐字节一致
//! - **格式约束**：文档体积上限 4 MiB、键名与正则模式不允许包含 NUL
//! - **整数宽度**：按数值大小自动选择 Int32 / Int64
//! - **Serde 集成**：任意 `Serialize` 类型都可以直接编码
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use cbson_codec::{doc, decode_document, encode_document};
//!
//! let doc = doc! { "name": "cbson", "version": 1 };
//! let bytes = encode_document(&doc, false, false).unwrap();
//! let decoded = decode_document(&bytes).unwrap();
//! assert_eq!(doc, decoded);
//! ```

pub mod buffer;
pub mod de;
pub mod document;
pub mod json;
pub mod reader;
pub mod ser;
pub mod spec;
pub mod value;
pub mod writer;

pub use buffer::{Buffer, LengthSlot};
pub use cbson_common::ObjectId;
pub use de::{from_bson, from_document};
pub use document::Document;
pub use reader::{decode_document, decode_document_with, decode_from_reader, DecodeOptions, DocumentReader};
pub use ser::{encode, to_bson, to_document};
pub use spec::{BinarySubtype, ElementType};
pub use value::{Binary, BsonValue, CodeWithScope, DbRef, Regex, RegexFlags, Timestamp, UtcDateTime};
pub use writer::{encode_document, encode_document_with, encode_to_writer, DocumentWriter, EncodeOptions};

use thiserror::Error;

/// 编解码操作的错误类型
///
/// 每个错误都携带足够的上下文（键名、偏移、长度），无需查看原始字节即可定位问题。
#[derive(Error, Debug)]
pub enum BsonError {
    /// IO 操作错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 校验模式下键名以 `$` 开头或包含 `.`
    #[error("Invalid key name {key:?}: {reason}")]
    InvalidName { key: String, reason: &'static str },

    /// 文档内容不合法（键名/正则模式包含 NUL 等）
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// 序列化后体积超过上限
    #[error("Document too large: {size} bytes exceeds the {max} byte limit")]
    DocumentTooLarge { size: usize, max: usize },

    /// 需要 UTF-8 的位置出现了非法字节序列
    #[error("Invalid UTF-8 in {context}: {source}")]
    InvalidEncoding {
        context: String,
        #[source]
        source: std::str::Utf8Error,
    },

    /// 整数超出有符号 64 位范围
    #[error("Integer out of range: {0} does not fit in a signed 64-bit integer")]
    IntegerOutOfRange(String),

    /// 宿主值没有对应的线类型
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// 解码时遇到未知的类型标记字节
    #[error("Unknown type tag 0x{tag:02X} for key {key:?}")]
    UnknownTypeTag { tag: u8, key: String },

    /// 输入在解码完成前结束
    #[error("Unexpected end of input at offset {offset}: need {need} bytes, have {have}")]
    UnexpectedEof { offset: usize, need: usize, have: usize },

    /// 结构性损坏（长度不符、缺少结尾 NUL 等）
    #[error("Malformed input at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    /// 缓冲区分配失败
    #[error("Out of memory: failed to reserve {requested} bytes")]
    OutOfMemory { requested: usize },

    /// 回填位置越界
    #[error("Invalid buffer position {position} (buffer length {len})")]
    InvalidPosition { position: usize, len: usize },

    /// 嵌套层级过深
    #[error("Nesting too deep: max {0}")]
    NestingTooDeep(usize),

    /// ObjectId 格式无效
    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    /// 序列化过程错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 反序列化过程错误
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<cbson_common::CommonError> for BsonError {
    fn from(err: cbson_common::CommonError) -> Self {
        match err {
            cbson_common::CommonError::InvalidObjectId(msg) => BsonError::InvalidObjectId(msg),
            cbson_common::CommonError::Io(e) => BsonError::Io(e),
            other => BsonError::Deserialization(other.to_string()),
        }
    }
}

/// 编解码操作的 Result 类型别名
pub type BsonResult<T> = Result<T, BsonError>;
