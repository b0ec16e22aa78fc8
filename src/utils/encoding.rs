//! 文件名字符集推断
//!
//! 很多压缩工具按本地代码页（GBK、Shift_JIS、CP866 ...）写入文件名而不做标记。
//! 对同一目录下的一组兄弟条目，取原始名字字节的一小段样本交给 chardetng 猜测，
//! 再用猜出的字符集逐个解码整组名字：只有当足够比例的名字能干净解码时才接受。

use crate::config::CharsetConfig;
use encoding_rs::Encoding;
use tracing::debug;

/// 一次被接受的推断结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharsetGuess {
    pub encoding: &'static Encoding,
    /// Fraction of the group's names that decode cleanly, 0.0..=1.0
    pub confidence: f64,
}

impl CharsetGuess {
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

/// 兄弟组字符集推断器
#[derive(Debug, Clone)]
pub struct CharsetInferrer {
    sample_bytes: usize,
    min_confidence: f64,
}

impl Default for CharsetInferrer {
    fn default() -> Self {
        Self::new(&CharsetConfig::default())
    }
}

impl CharsetInferrer {
    pub fn new(config: &CharsetConfig) -> Self {
        Self {
            sample_bytes: config.sample_bytes,
            min_confidence: config.min_confidence,
        }
    }

    /// 为一组原始名字推断字符集
    ///
    /// 样本全是 ASCII、检测器不确定、猜到不可用的字符集，或干净解码比例
    /// 低于阈值时返回 `None`，此时调用方保留原名。
    pub fn infer(&self, names: &[&[u8]]) -> Option<CharsetGuess> {
        let sample = self.build_sample(names);
        if sample.is_ascii() {
            return None;
        }

        let mut detector = chardetng::EncodingDetector::new();
        detector.feed(&sample, true);
        let (encoding, confident) = detector.guess_assess(None, true);
        if !confident || !is_usable(encoding) {
            debug!(
                charset = encoding.name(),
                confident,
                sample_len = sample.len(),
                "Charset guess rejected"
            );
            return None;
        }

        let confidence = self.assess(names, encoding);
        if confidence < self.min_confidence {
            debug!(
                charset = encoding.name(),
                confidence,
                "Too few names decode cleanly, keeping original names"
            );
            return None;
        }
        Some(CharsetGuess {
            encoding,
            confidence,
        })
    }

    /// Fraction of `names` that `encoding` decodes cleanly
    pub fn assess(&self, names: &[&[u8]], encoding: &'static Encoding) -> f64 {
        if names.is_empty() {
            return 0.0;
        }
        let clean = names
            .iter()
            .filter(|raw| decode_clean(encoding, raw).is_some())
            .count();
        clean as f64 / names.len() as f64
    }

    fn build_sample(&self, names: &[&[u8]]) -> Vec<u8> {
        let mut sample = Vec::with_capacity(self.sample_bytes);
        for raw in names {
            if sample.len() >= self.sample_bytes {
                break;
            }
            if !sample.is_empty() {
                sample.push(b'\n');
            }
            let room = self.sample_bytes.saturating_sub(sample.len());
            sample.extend_from_slice(&raw[..raw.len().min(room)]);
        }
        sample
    }
}

/// 用指定字符集解码；出现非法字节、替换字符或控制字符时返回 `None`
pub fn decode_clean(encoding: &'static Encoding, raw: &[u8]) -> Option<String> {
    let (text, had_errors) = encoding.decode_without_bom_handling(raw);
    if had_errors || text.contains('\u{FFFD}') || text.chars().any(char::is_control) {
        return None;
    }
    Some(text.into_owned())
}

fn is_usable(encoding: &'static Encoding) -> bool {
    encoding != encoding_rs::REPLACEMENT
        && encoding != encoding_rs::UTF_16LE
        && encoding != encoding_rs::UTF_16BE
        && encoding != encoding_rs::X_USER_DEFINED
}

/// GBK 编码的样本文件名及其正确解码
#[cfg(test)]
pub(crate) const GBK_SAMPLE_NAMES: [(&[u8], &str); 6] = [
    (b"\xbb\xe1\xd2\xe9\xbc\xcd\xd2\xaa.docx", "会议纪要.docx"),
    (b"\xb2\xc6\xce\xf1\xb1\xa8\xb1\xed2024.xlsx", "财务报表2024.xlsx"),
    (b"\xcf\xee\xc4\xbf\xbc\xc6\xbb\xae\xca\xe9.pdf", "项目计划书.pdf"),
    (b"\xd3\xc3\xbb\xa7\xca\xb9\xd3\xc3\xca\xd6\xb2\xe1.txt", "用户使用手册.txt"),
    (b"\xc4\xea\xb6\xc8\xb9\xa4\xd7\xf7\xd7\xdc\xbd\xe1.doc", "年度工作总结.doc"),
    (b"\xbf\xcd\xbb\xa7\xc1\xaa\xcf\xb5\xb7\xbd\xca\xbd.csv", "客户联系方式.csv"),
];
