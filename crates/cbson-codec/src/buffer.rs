//! 编码缓冲区
//!
//! 单次编码调用独占的可增长字节区域。所有追加操作先做可失败的预留，
//! 分配失败以 `OutOfMemory` 返回而不是中止进程。

use crate::{BsonError, BsonResult};
use bytes::{BufMut, Bytes};

/// 长度占位句柄
///
/// 由 [`Buffer::reserve_length`] 返回，记录 4 字节长度字段的位置，
/// 写完对象主体后通过 [`Buffer::patch_length`] 回填。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a reserved length slot must be patched"]
pub struct LengthSlot {
    position: usize,
}

impl LengthSlot {
    pub fn position(&self) -> usize {
        self.position
    }
}

#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> BsonResult<Self> {
        let mut buf = Self::new();
        buf.reserve(capacity)?;
        Ok(buf)
    }

    fn reserve(&mut self, additional: usize) -> BsonResult<()> {
        self.data
            .try_reserve(additional)
            .map_err(|_| BsonError::OutOfMemory {
                requested: additional,
            })
    }

    /// 追加字节
    pub fn write(&mut self, bytes: &[u8]) -> BsonResult<()> {
        self.reserve(bytes.len())?;
        self.data.put_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> BsonResult<()> {
        self.reserve(1)?;
        self.data.put_u8(v);
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> BsonResult<()> {
        self.reserve(4)?;
        self.data.put_i32_le(v);
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> BsonResult<()> {
        self.reserve(8)?;
        self.data.put_i64_le(v);
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> BsonResult<()> {
        self.reserve(8)?;
        self.data.put_u64_le(v);
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> BsonResult<()> {
        self.reserve(8)?;
        self.data.put_f64_le(v);
        Ok(())
    }

    /// # Brief
    /// 在当前位置预留 4 字节长度字段
    ///
    /// # Returns
    /// 回填用的占位句柄
    pub fn reserve_length(&mut self) -> BsonResult<LengthSlot> {
        let position = self.data.len();
        self.write_i32(0)?;
        Ok(LengthSlot { position })
    }

    /// 覆盖已写入区域内的字节
    pub fn write_at(&mut self, position: usize, bytes: &[u8]) -> BsonResult<()> {
        let end = position
            .checked_add(bytes.len())
            .filter(|end| *end <= self.data.len())
            .ok_or(BsonError::InvalidPosition {
                position,
                len: self.data.len(),
            })?;
        self.data[position..end].copy_from_slice(bytes);
        Ok(())
    }

    /// 自占位处到当前位置的字节数（包含长度字段本身）
    pub fn len_since(&self, slot: LengthSlot) -> usize {
        self.data.len().saturating_sub(slot.position)
    }

    /// # Brief
    /// 用占位处到当前位置的总长度回填长度字段
    ///
    /// # Returns
    /// 回填的长度值
    pub fn patch_length(&mut self, slot: LengthSlot) -> BsonResult<usize> {
        let size = self.len_since(slot);
        let encoded = i32::try_from(size).map_err(|_| BsonError::DocumentTooLarge {
            size,
            max: i32::MAX as usize,
        })?;
        self.write_at(slot.position, &encoded.to_le_bytes())?;
        Ok(size)
    }

    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.data)
    }
}
