//! BSON 值类型定义模块
//!
//! 定义了编解码器支持的全部数据类型，包括基础类型和扩展类型。
//! 使用 `CompactString` 优化短字符串的内存占用。

use crate::document::Document;
use crate::spec::{BinarySubtype, ElementType, MAX_REGEX_EXTRA_OPTIONS};
use crate::BsonError;
use cbson_common::ObjectId;
use chrono::{DateTime, TimeZone, Utc};
use compact_str::CompactString;
use std::fmt;

/// BSON 值的枚举类型
///
/// 整数只有一个 `Integer` 变体：线宽度（Int32 / Int64）在编码时按数值大小选择，
/// 两种标记解码后都还原为 `Integer`，因此编码再解码总能得到相同的值。
///
/// # 支持的类型
///
/// - **基础类型**: Null, Boolean, Integer, Double, String, Binary
/// - **标识类型**: ObjectId, DbRef
/// - **时间类型**: DateTime, Timestamp
/// - **复合类型**: Array, Document, JavaScriptCodeWithScope
/// - **特殊类型**: Regex, Symbol, JavaScriptCode, MinKey, MaxKey
#[derive(Debug, Clone, PartialEq)]
pub enum BsonValue {
    /// 64 位浮点数
    Double(f64),
    /// UTF-8 字符串
    String(CompactString),
    /// 嵌套文档（有序键值对）
    Document(Document),
    /// 值数组
    Array(Vec<BsonValue>),
    /// 二进制数据（带子类型）
    Binary(Binary),
    /// 12 字节的对象标识符
    ObjectId(ObjectId),
    /// 布尔值
    Boolean(bool),
    /// UTC 日期时间（毫秒）
    DateTime(UtcDateTime),
    /// 空值
    Null,
    /// 正则表达式
    Regex(Regex),
    /// 数据库引用
    DbRef(DbRef),
    /// JavaScript 代码（无作用域）
    JavaScriptCode(CompactString),
    /// 符号，与普通字符串在线格式上区分
    Symbol(CompactString),
    /// 带作用域的 JavaScript 代码
    JavaScriptCodeWithScope(CodeWithScope),
    /// 有符号整数，宽度由编码器选择
    Integer(i64),
    /// 内部时间戳
    Timestamp(Timestamp),
    /// 小于所有值的哨兵
    MinKey,
    /// 大于所有值的哨兵
    MaxKey,
}

/// 二进制值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub subtype: BinarySubtype,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            subtype: BinarySubtype::Generic,
            bytes: bytes.into(),
        }
    }

    pub fn with_subtype(subtype: BinarySubtype, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            subtype,
            bytes: bytes.into(),
        }
    }
}

/// 正则表达式选项位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegexFlags(u8);

impl RegexFlags {
    pub const IGNORE_CASE: RegexFlags = RegexFlags(0b001);
    pub const MULTILINE: RegexFlags = RegexFlags(0b010);
    pub const EXTENDED: RegexFlags = RegexFlags(0b100);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: RegexFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RegexFlags) {
        self.0 |= other.0;
    }

    /// 单字符选项到选项位的映射，只识别 i / m / x
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(Self::IGNORE_CASE),
            'm' => Some(Self::MULTILINE),
            'x' => Some(Self::EXTENDED),
            _ => None,
        }
    }

    /// 按字母顺序输出选项字符，每个字符至多一次
    pub fn to_option_string(self) -> String {
        let mut s = String::with_capacity(3);
        if self.contains(Self::IGNORE_CASE) {
            s.push('i');
        }
        if self.contains(Self::MULTILINE) {
            s.push('m');
        }
        if self.contains(Self::EXTENDED) {
            s.push('x');
        }
        s
    }
}

impl std::ops::BitOr for RegexFlags {
    type Output = RegexFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        RegexFlags(self.0 | rhs.0)
    }
}

/// 正则表达式值
///
/// i / m / x 存入选项位，其余选项字符作为额外选项单独保存（至多 9 个）。
/// 通过构造函数创建时额外选项按字符排序，与编码器写出的顺序一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regex {
    pattern: CompactString,
    flags: RegexFlags,
    extra_options: CompactString,
}

impl Regex {
    /// # Brief
    /// 由模式和选项字符串创建正则
    ///
    /// # Arguments
    /// * `pattern` - 正则模式
    /// * `options` - 选项字符，如 "mi" 或 "iu"
    pub fn new(pattern: impl Into<CompactString>, options: &str) -> Self {
        let (flags, extra) = parse_options(options, usize::MAX);
        Self {
            pattern: pattern.into(),
            flags,
            extra_options: sort_chars(&extra),
        }
    }

    pub fn with_flags(pattern: impl Into<CompactString>, flags: RegexFlags) -> Self {
        Self {
            pattern: pattern.into(),
            flags,
            extra_options: CompactString::default(),
        }
    }

    /// 追加额外选项；其中的 i / m / x 仍然归入选项位
    pub fn with_extra_options(mut self, extra: &str) -> Self {
        let mut combined = String::from(self.extra_options.as_str());
        combined.push_str(extra);
        let (flags, extra) = parse_options(&combined, usize::MAX);
        self.flags.insert(flags);
        self.extra_options = sort_chars(&extra);
        self
    }

    /// 解码路径：额外选项保持出现顺序，超过上限的部分丢弃
    pub(crate) fn from_wire(pattern: CompactString, options: &str) -> Self {
        let (flags, extra_options) = parse_options(options, MAX_REGEX_EXTRA_OPTIONS);
        Self {
            pattern,
            flags,
            extra_options,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn flags(&self) -> RegexFlags {
        self.flags
    }

    pub fn extra_options(&self) -> &str {
        &self.extra_options
    }

    /// 线格式上的完整选项字符串
    pub fn options(&self) -> String {
        let mut s = self.flags.to_option_string();
        s.push_str(&sort_chars(&self.extra_options));
        s
    }
}

fn parse_options(options: &str, max_extra: usize) -> (RegexFlags, CompactString) {
    let mut flags = RegexFlags::empty();
    let mut extra = CompactString::default();
    let mut extra_len = 0;
    for c in options.chars() {
        if let Some(flag) = RegexFlags::from_char(c) {
            flags.insert(flag);
        } else if extra_len < max_extra {
            extra.push(c);
            extra_len += 1;
        }
    }
    (flags, extra)
}

pub(crate) fn sort_chars(s: &str) -> CompactString {
    let mut chars: Vec<char> = s.chars().collect();
    chars.sort_unstable();
    chars.into_iter().collect()
}

/// 带作用域的 JavaScript 代码
#[derive(Debug, Clone, PartialEq)]
pub struct CodeWithScope {
    pub code: CompactString,
    pub scope: Document,
}

impl CodeWithScope {
    pub fn new(code: impl Into<CompactString>, scope: Document) -> Self {
        Self {
            code: code.into(),
            scope,
        }
    }
}

/// 数据库引用
///
/// 线格式上写成 `{"$ref": collection, "$id": id}` 形式的嵌套文档；
/// 旧式 DBPointer（标记 0x0C）解码后也还原为这个类型。
#[derive(Debug, Clone, PartialEq)]
pub struct DbRef {
    pub collection: CompactString,
    pub id: Box<BsonValue>,
}

impl DbRef {
    pub const REF_KEY: &'static str = "$ref";
    pub const ID_KEY: &'static str = "$id";

    pub fn new(collection: impl Into<CompactString>, id: impl Into<BsonValue>) -> Self {
        Self {
            collection: collection.into(),
            id: Box::new(id.into()),
        }
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::with_capacity(2);
        doc.insert(Self::REF_KEY, BsonValue::String(self.collection.clone()));
        doc.insert(Self::ID_KEY, (*self.id).clone());
        doc
    }

    /// # Brief
    /// 识别 `$ref` 约定的文档
    ///
    /// 第一个字段是字符串类型的 `$ref`、第二个字段是 `$id` 且没有其他字段时转换为 DbRef，
    /// 否则原样返回文档。带有额外字段（如 `$db`）的 `$ref` 文档仍保持为 `Document`，
    /// 不会丢弃任何字段。
    pub fn from_document(doc: Document) -> Result<DbRef, Document> {
        if doc.len() != 2 {
            return Err(doc);
        }
        match (doc.get_index(0), doc.get_index(1)) {
            (Some((Self::REF_KEY, BsonValue::String(collection))), Some((Self::ID_KEY, id))) => {
                Ok(DbRef {
                    collection: collection.clone(),
                    id: Box::new(id.clone()),
                })
            }
            _ => Err(doc),
        }
    }
}

/// UTC 日期时间，自纪元起的毫秒数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UtcDateTime(i64);

impl UtcDateTime {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub const fn timestamp_millis(self) -> i64 {
        self.0
    }

    /// 转换为 chrono 时间；超出 chrono 可表示范围时返回 None
    pub fn to_chrono(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for UtcDateTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Display for UtcDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_chrono() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// 内部时间戳：高 32 位为秒，低 32 位为递增序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    pub(crate) fn to_u64(self) -> u64 {
        ((self.time as u64) << 32) | self.increment as u64
    }

    pub(crate) fn from_u64(raw: u64) -> Self {
        Self {
            time: (raw >> 32) as u32,
            increment: raw as u32,
        }
    }
}

impl BsonValue {
    /// 获取值的线类型标记
    ///
    /// # Brief
    /// 编码前对每个值只分类一次，整数按数值大小选择 Int32 或 Int64
    pub fn element_type(&self) -> ElementType {
        match self {
            BsonValue::Double(_) => ElementType::Double,
            BsonValue::String(_) => ElementType::String,
            BsonValue::Document(_) | BsonValue::DbRef(_) => ElementType::Document,
            BsonValue::Array(_) => ElementType::Array,
            BsonValue::Binary(_) => ElementType::Binary,
            BsonValue::ObjectId(_) => ElementType::ObjectId,
            BsonValue::Boolean(_) => ElementType::Boolean,
            BsonValue::DateTime(_) => ElementType::DateTime,
            BsonValue::Null => ElementType::Null,
            BsonValue::Regex(_) => ElementType::Regex,
            BsonValue::JavaScriptCode(_) => ElementType::JavaScriptCode,
            BsonValue::Symbol(_) => ElementType::Symbol,
            BsonValue::JavaScriptCodeWithScope(_) => ElementType::JavaScriptCodeWithScope,
            BsonValue::Integer(n) => {
                if i32::try_from(*n).is_ok() {
                    ElementType::Int32
                } else {
                    ElementType::Int64
                }
            }
            BsonValue::Timestamp(_) => ElementType::Timestamp,
            BsonValue::MinKey => ElementType::MinKey,
            BsonValue::MaxKey => ElementType::MaxKey,
        }
    }

    /// 获取值的类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            BsonValue::Double(_) => "double",
            BsonValue::String(_) => "string",
            BsonValue::Document(_) => "document",
            BsonValue::Array(_) => "array",
            BsonValue::Binary(_) => "binary",
            BsonValue::ObjectId(_) => "objectId",
            BsonValue::Boolean(_) => "bool",
            BsonValue::DateTime(_) => "date",
            BsonValue::Null => "null",
            BsonValue::Regex(_) => "regex",
            BsonValue::DbRef(_) => "dbref",
            BsonValue::JavaScriptCode(_) => "javascript",
            BsonValue::Symbol(_) => "symbol",
            BsonValue::JavaScriptCodeWithScope(_) => "javascriptWithScope",
            BsonValue::Integer(_) => "int",
            BsonValue::Timestamp(_) => "timestamp",
            BsonValue::MinKey => "minKey",
            BsonValue::MaxKey => "maxKey",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, BsonValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BsonValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// 整数值能放进 i32 时返回
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            BsonValue::Integer(n) => i32::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            BsonValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// 数值类型统一转换为 f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            BsonValue::Double(n) => Some(*n),
            BsonValue::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            BsonValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<BsonValue>> {
        match self {
            BsonValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            BsonValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            BsonValue::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Binary> {
        match self {
            BsonValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<UtcDateTime> {
        match self {
            BsonValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// 获取指定键的值
    ///
    /// # Arguments
    /// * `key` - 键名（文档）或索引字符串（数组）
    pub fn get(&self, key: &str) -> Option<&BsonValue> {
        match self {
            BsonValue::Document(doc) => doc.get(key),
            BsonValue::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        }
    }

    /// 按点分隔路径获取嵌套值，如 "user.address.city"
    pub fn get_path(&self, path: &str) -> Option<&BsonValue> {
        let mut current = self;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }
}

impl Default for BsonValue {
    fn default() -> Self {
        BsonValue::Null
    }
}

impl fmt::Display for BsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BsonValue::Double(n) => write!(f, "{}", n),
            BsonValue::String(s) => write!(f, "\"{}\"", s),
            BsonValue::Document(doc) => write!(f, "{}", doc),
            BsonValue::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            BsonValue::Binary(b) => write!(
                f,
                "Binary({}, <{} bytes>)",
                u8::from(b.subtype),
                b.bytes.len()
            ),
            BsonValue::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            BsonValue::Boolean(b) => write!(f, "{}", b),
            BsonValue::DateTime(dt) => write!(f, "DateTime(\"{}\")", dt),
            BsonValue::Null => write!(f, "null"),
            BsonValue::Regex(r) => write!(f, "/{}/{}", r.pattern(), r.options()),
            BsonValue::DbRef(r) => write!(f, "DBRef(\"{}\", {})", r.collection, r.id),
            BsonValue::JavaScriptCode(code) => write!(f, "Code({})", code),
            BsonValue::Symbol(s) => write!(f, "Symbol(\"{}\")", s),
            BsonValue::JavaScriptCodeWithScope(c) => {
                write!(f, "Code({}, scope: {})", c.code, c.scope)
            }
            BsonValue::Integer(n) => write!(f, "{}", n),
            BsonValue::Timestamp(ts) => write!(f, "Timestamp({}, {})", ts.time, ts.increment),
            BsonValue::MinKey => write!(f, "MinKey"),
            BsonValue::MaxKey => write!(f, "MaxKey"),
        }
    }
}

// ============================================================================
// From 特征实现 - 支持从各种 Rust 类型转换为 BsonValue
// ============================================================================

macro_rules! impl_from_small_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for BsonValue {
                fn from(v: $ty) -> Self {
                    BsonValue::Integer(v as i64)
                }
            }
        )*
    };
}

impl_from_small_int!(i8, i16, i32, i64, u8, u16, u32);

impl TryFrom<u64> for BsonValue {
    type Error = BsonError;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        i64::try_from(v)
            .map(BsonValue::Integer)
            .map_err(|_| BsonError::IntegerOutOfRange(v.to_string()))
    }
}

impl TryFrom<i128> for BsonValue {
    type Error = BsonError;

    fn try_from(v: i128) -> Result<Self, Self::Error> {
        i64::try_from(v)
            .map(BsonValue::Integer)
            .map_err(|_| BsonError::IntegerOutOfRange(v.to_string()))
    }
}

impl TryFrom<u128> for BsonValue {
    type Error = BsonError;

    fn try_from(v: u128) -> Result<Self, Self::Error> {
        i64::try_from(v)
            .map(BsonValue::Integer)
            .map_err(|_| BsonError::IntegerOutOfRange(v.to_string()))
    }
}

impl From<bool> for BsonValue {
    fn from(v: bool) -> Self {
        BsonValue::Boolean(v)
    }
}

impl From<f32> for BsonValue {
    fn from(v: f32) -> Self {
        BsonValue::Double(v as f64)
    }
}

impl From<f64> for BsonValue {
    fn from(v: f64) -> Self {
        BsonValue::Double(v)
    }
}

impl From<&str> for BsonValue {
    fn from(v: &str) -> Self {
        BsonValue::String(CompactString::from(v))
    }
}

impl From<String> for BsonValue {
    fn from(v: String) -> Self {
        BsonValue::String(CompactString::from(v))
    }
}

impl From<CompactString> for BsonValue {
    fn from(v: CompactString) -> Self {
        BsonValue::String(v)
    }
}

impl From<Document> for BsonValue {
    fn from(v: Document) -> Self {
        BsonValue::Document(v)
    }
}

impl From<Binary> for BsonValue {
    fn from(v: Binary) -> Self {
        BsonValue::Binary(v)
    }
}

impl From<ObjectId> for BsonValue {
    fn from(v: ObjectId) -> Self {
        BsonValue::ObjectId(v)
    }
}

impl From<UtcDateTime> for BsonValue {
    fn from(v: UtcDateTime) -> Self {
        BsonValue::DateTime(v)
    }
}

impl From<DateTime<Utc>> for BsonValue {
    fn from(v: DateTime<Utc>) -> Self {
        BsonValue::DateTime(v.into())
    }
}

impl From<Regex> for BsonValue {
    fn from(v: Regex) -> Self {
        BsonValue::Regex(v)
    }
}

impl From<DbRef> for BsonValue {
    fn from(v: DbRef) -> Self {
        BsonValue::DbRef(v)
    }
}

impl From<CodeWithScope> for BsonValue {
    fn from(v: CodeWithScope) -> Self {
        BsonValue::JavaScriptCodeWithScope(v)
    }
}

impl From<Timestamp> for BsonValue {
    fn from(v: Timestamp) -> Self {
        BsonValue::Timestamp(v)
    }
}

impl<T: Into<BsonValue>> From<Option<T>> for BsonValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(BsonValue::Null)
    }
}

impl<T: Into<BsonValue>> From<Vec<T>> for BsonValue {
    fn from(v: Vec<T>) -> Self {
        BsonValue::Array(v.into_iter().map(Into::into).collect())
    }
}

/// 构造 BsonValue 的便捷宏
///
/// 负数等多 token 表达式需要加括号，如 `bson!((-1))`。
///
/// ```rust,ignore
/// use cbson_codec::bson;
///
/// let null = bson!(null);
/// let number = bson!(42);
/// let array = bson!([1, "two", null]);
/// let doc = bson!({ "name": "test", "tags": ["a", "b"] });
/// ```
#[macro_export]
macro_rules! bson {
    (null) => {
        $crate::BsonValue::Null
    };
    ([ $($elem:tt),* $(,)? ]) => {
        $crate::BsonValue::Array(vec![ $($crate::bson!($elem)),* ])
    };
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::BsonValue::Document($crate::doc! { $($key : $value),* })
    };
    ($e:expr) => {
        $crate::BsonValue::from($e)
    };
}
