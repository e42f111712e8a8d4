//! 打包浮点编码
//!
//! 线缆上的浮点数为 `:` 加上 f32 小端 4 字节的 base64 编码，去掉 `==` 填充，
//! 固定 6 个字符。例如 `1.0` 编码为 `:AACAPw`。

use crate::ProtocolError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

/// 打包浮点的前缀字符
pub const FLOAT_PREFIX: char = ':';

/// 编码为打包浮点
///
/// 非有限值（NaN/∞）以及超出 f32 范围的值会被拒绝。
pub fn encode_float(value: f64) -> Result<String, ProtocolError> {
    let narrowed = value as f32;
    if !value.is_finite() || !narrowed.is_finite() {
        return Err(ProtocolError::NonFinite(value));
    }

    let mut out = String::with_capacity(7);
    out.push(FLOAT_PREFIX);
    STANDARD_NO_PAD.encode_string(narrowed.to_le_bytes(), &mut out);
    Ok(out)
}

/// 解码打包浮点（接受带或不带 `:` 前缀）
pub fn decode_float(text: &str) -> Result<f32, ProtocolError> {
    let body = text.strip_prefix(FLOAT_PREFIX).unwrap_or(text);
    let bytes = STANDARD_NO_PAD
        .decode(body)
        .map_err(|_| ProtocolError::InvalidFloat(text.to_string()))?;
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidFloat(text.to_string()))?;
    Ok(f32::from_le_bytes(raw))
}
