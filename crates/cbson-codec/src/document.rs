//! 文档结构模块
//!
//! 有序键值映射，字段按插入顺序编码。

use crate::value::BsonValue;
use crate::{BsonError, BsonResult};
use compact_str::CompactString;
use indexmap::IndexMap;
use std::fmt;

/// 有序文档
///
/// 使用 `IndexMap` 保持字段插入顺序；同名键再次插入时覆盖旧值并保留原位置。
/// 相等比较区分字段顺序。
#[derive(Debug, Clone, Default)]
pub struct Document {
    fields: IndexMap<CompactString, BsonValue>,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len() && self.fields.iter().eq(other.fields.iter())
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            fields: IndexMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity(capacity),
        }
    }

    /// 插入字段
    ///
    /// # Brief
    /// 插入或更新一个字段，返回被覆盖的旧值
    ///
    /// # Arguments
    /// * `key` - 字段名
    /// * `value` - 字段值
    pub fn insert(
        &mut self,
        key: impl Into<CompactString>,
        value: impl Into<BsonValue>,
    ) -> Option<BsonValue> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&BsonValue> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut BsonValue> {
        self.fields.get_mut(key)
    }

    /// 按插入位置获取字段
    pub fn get_index(&self, index: usize) -> Option<(&str, &BsonValue)> {
        self.fields.get_index(index).map(|(k, v)| (k.as_str(), v))
    }

    /// 移除字段，后续字段保持原有顺序
    pub fn remove(&mut self, key: &str) -> Option<BsonValue> {
        self.fields.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &BsonValue> {
        self.fields.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BsonValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.fields.get(key).and_then(|v| v.as_i32())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<BsonValue>> {
        self.fields.get(key).and_then(|v| v.as_array())
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.fields.get(key).and_then(|v| v.as_document())
    }

    /// 按路径获取嵌套值
    ///
    /// # Arguments
    /// * `path` - 点分隔的路径，如 "user.address.city"；数组用索引表示
    pub fn get_path(&self, path: &str) -> Option<&BsonValue> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// 合并另一个文档，同名字段以 `other` 为准
    pub fn merge(&mut self, other: Document) {
        for (k, v) in other.fields {
            self.fields.insert(k, v);
        }
    }

    /// 从 BsonValue 创建文档
    ///
    /// # Returns
    /// 值为 `BsonValue::Document` 时返回其文档，否则返回错误
    pub fn from_bson_value(value: BsonValue) -> BsonResult<Self> {
        match value {
            BsonValue::Document(doc) => Ok(doc),
            other => Err(BsonError::InvalidDocument(format!(
                "Expected document, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn into_inner(self) -> IndexMap<CompactString, BsonValue> {
        self.fields
    }
}

impl From<IndexMap<CompactString, BsonValue>> for Document {
    fn from(fields: IndexMap<CompactString, BsonValue>) -> Self {
        Self { fields }
    }
}

impl<K: Into<CompactString>, V: Into<BsonValue>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (CompactString, BsonValue);
    type IntoIter = indexmap::map::IntoIter<CompactString, BsonValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " \"{}\": {}", k, v)?;
        }
        if self.fields.is_empty() {
            write!(f, "}}")
        } else {
            write!(f, " }}")
        }
    }
}

/// 构造 Document 的便捷宏
///
/// # 示例
///
/// ```rust,ignore
/// use cbson_codec::doc;
///
/// let empty = doc!();
/// let doc = doc! {
///     "name": "test",
///     "value": 123
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:tt : $value:tt),* $(,)?) => {
        {
            let mut doc = $crate::Document::new();
            $(
                doc.insert($key, $crate::bson!($value));
            )*
            doc
        }
    };
}
