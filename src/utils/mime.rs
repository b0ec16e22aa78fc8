//! MIME 类型识别
//!
//! 优先按内容魔数识别（infer），其次按文件名扩展名（mime_guess），
//! 都失败时退回到通用的 `application/octet-stream`。

/// Generic type used when nothing better is known
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Bytes of leading content used for sniffing
pub const SNIFF_LEN: usize = 8192;

/// Determine the MIME type of a file from its first bytes and its name
pub fn sniff_mime(head: &[u8], file_name: &str) -> String {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    if let Some(guess) = mime_guess::from_path(file_name).first_raw() {
        return guess.to_string();
    }
    if !head.is_empty() && looks_textual(head) {
        return "text/plain".to_string();
    }
    OCTET_STREAM.to_string()
}

/// Unknown or generic types get re-typed when a file is re-extracted
pub fn is_generic(mime: Option<&str>) -> bool {
    matches!(mime, None | Some("") | Some(OCTET_STREAM))
}

fn looks_textual(head: &[u8]) -> bool {
    std::str::from_utf8(head)
        .map(|text| {
            text.chars()
                .all(|c| !c.is_control() || c.is_ascii_whitespace())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"PK\x03\x04\x14\x00\x00\x00".as_slice(), "x.bin", "application/zip")]
    #[case(&[0x1F, 0x8B, 0x08, 0x00, 0, 0, 0, 0], "x", "application/gzip")]
    #[case(b"%PDF-1.7\n".as_slice(), "report", "application/pdf")]
    #[case(b"".as_slice(), "notes.txt", "text/plain")]
    #[case(b"plain words\n".as_slice(), "README", "text/plain")]
    #[case(&[0x00, 0x01, 0x02, 0xFE], "blob", OCTET_STREAM)]
    fn test_sniff_mime(#[case] head: &[u8], #[case] name: &str, #[case] expected: &str) {
        assert_eq!(sniff_mime(head, name), expected);
    }

    #[test]
    fn test_is_generic() {
        assert!(is_generic(None));
        assert!(is_generic(Some(OCTET_STREAM)));
        assert!(!is_generic(Some("text/plain")));
    }
}
