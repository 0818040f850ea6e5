//! cbson 命令行工具的库部分
//!
//! 扩展 JSON 与 BSON 文件互转、日志初始化、配置加载。

use cbson_codec::json::{from_json_document, to_json_document};
use cbson_codec::{decode_document_with, encode_document_with, BsonError, DecodeOptions, EncodeOptions};
use cbson_common::{CbsonConfig, CommonError};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] BsonError),

    #[error("Config error: {0}")]
    Config(#[from] CommonError),
}

pub type CliResult<T> = Result<T, CliError>;

/// # Brief
/// 安装全局 tracing subscriber
///
/// `RUST_LOG` 存在时覆盖 `level`。
pub fn init_logging(level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// 读取配置文件，未指定时使用默认值
pub fn load_config(path: Option<&Path>) -> CliResult<CbsonConfig> {
    match path {
        Some(path) => Ok(CbsonConfig::from_file(path)?),
        None => Ok(CbsonConfig::default()),
    }
}

/// # Brief
/// 把扩展 JSON 文件编码为 BSON 文件
///
/// # Returns
/// 写出的字节数
pub fn encode_file(input: &Path, output: &Path, options: &EncodeOptions) -> CliResult<usize> {
    let text = fs::read_to_string(input)?;
    let json: serde_json::Value = serde_json::from_str(&text)?;
    let doc = from_json_document(&json)?;
    let bytes = encode_document_with(&doc, options)?;
    fs::write(output, &bytes)?;
    info!("Encoded {} -> {} ({} bytes)", input.display(), output.display(), bytes.len());
    Ok(bytes.len())
}

/// # Brief
/// 把 BSON 文件解码为扩展 JSON 文本
pub fn decode_file(input: &Path, options: &DecodeOptions, pretty: bool) -> CliResult<String> {
    let data = fs::read(input)?;
    debug!("Read {} bytes from {}", data.len(), input.display());
    let doc = decode_document_with(&data, options)?;
    let json = to_json_document(&doc)?;
    let text = if pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_encode_then_decode_file() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.bson");
        fs::write(
            &input,
            r#"{"name": "cbson", "_id": {"$oid": "507f1f77bcf86cd799439011"}, "n": 5000000000}"#,
        )
        .unwrap();

        let options = EncodeOptions { promote_id: true, ..Default::default() };
        let written = encode_file(&input, &output, &options).unwrap();
        assert_eq!(fs::metadata(&output).unwrap().len() as usize, written);

        let text = decode_file(&output, &DecodeOptions::default(), false).unwrap();
        assert_eq!(
            text,
            r#"{"_id":{"$oid":"507f1f77bcf86cd799439011"},"name":"cbson","n":5000000000}"#
        );
    }

    #[test]
    fn test_encode_rejects_invalid_keys() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.json");
        fs::write(&input, r#"{"a.b": 1}"#).unwrap();

        let options = EncodeOptions { validate_keys: true, ..Default::default() };
        let err = encode_file(&input, &dir.path().join("out.bson"), &options).unwrap_err();
        assert!(matches!(err, CliError::Codec(BsonError::InvalidName { .. })));
    }

    #[test]
    fn test_encode_rejects_non_object() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.json");
        fs::write(&input, "[1, 2]").unwrap();

        let err = encode_file(&input, &dir.path().join("out.bson"), &EncodeOptions::default())
            .unwrap_err();
        assert!(matches!(err, CliError::Codec(BsonError::UnsupportedType(_))));
    }

    #[test]
    fn test_decode_truncated_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[16, 0, 0, 0, 0x10]).unwrap();

        let err = decode_file(file.path(), &DecodeOptions::default(), true).unwrap_err();
        assert!(matches!(err, CliError::Codec(BsonError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_load_config() {
        assert_eq!(load_config(None).unwrap(), CbsonConfig::default());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[codec]\nvalidate_keys = true\n\n[log]\nlevel = \"debug\"").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert!(config.codec.validate_keys);
        assert_eq!(config.log.level, "debug");

        let mut bad = NamedTempFile::new().unwrap();
        writeln!(bad, "[codec]\nmax_nesting_depth = 0").unwrap();
        assert!(matches!(load_config(Some(bad.path())), Err(CliError::Config(_))));
    }
}
