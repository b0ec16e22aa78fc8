//! 归档内路径处理工具
//!
//! 把归档条目路径切分成组件、清理不安全的组件名，并为没有路径的条目
//! （单流 gzip/bzip2）合成一个确定且唯一的名字。

use sanitize_filename::Options;

/// Split an archive path on `/` and `\`, dropping empty, `.` and `..` tokens
pub fn split_path_tokens(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .filter(|token| !is_skipped_token(token.as_bytes()))
        .collect()
}

/// Split raw path bytes on `/` with the same token filtering
pub fn split_raw_tokens(raw: &[u8]) -> Vec<&[u8]> {
    raw.split(|b| *b == b'/')
        .filter(|token| !is_skipped_token(token))
        .collect()
}

fn is_skipped_token(token: &[u8]) -> bool {
    token.is_empty() || token == b"." || token == b".."
}

/// 把一个路径组件清理成可以安全落盘的文件名
///
/// 保留原始名字作为目录记录的名字，这里只决定磁盘上的文件名。
pub fn sanitize_component(name: &str) -> String {
    let options = Options {
        windows: true,
        truncate: true,
        replacement: "_",
    };
    let cleaned = sanitize_filename::sanitize_with_options(name, options);
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// 为没有路径的条目合成路径
///
/// `.tgz`/`.tbz`/`.tbz2` 去掉扩展名后补 `.tar`，`.gz`/`.bz2` 直接去掉扩展名；
/// 其他情况或候选名已被占用时，使用 `归档名/条目索引`。
pub fn synthesize_entry_path(
    archive_name: &str,
    index: usize,
    is_taken: impl Fn(&str) -> bool,
) -> String {
    let lower = archive_name.to_ascii_lowercase();
    let strip = |suffix: &str| &archive_name[..archive_name.len() - suffix.len()];

    let candidate = if lower.ends_with(".tgz") {
        Some(format!("{}.tar", strip(".tgz")))
    } else if lower.ends_with(".tbz2") {
        Some(format!("{}.tar", strip(".tbz2")))
    } else if lower.ends_with(".tbz") {
        Some(format!("{}.tar", strip(".tbz")))
    } else if lower.ends_with(".gz") {
        Some(strip(".gz").to_string())
    } else if lower.ends_with(".bz2") {
        Some(strip(".bz2").to_string())
    } else {
        None
    };

    match candidate {
        Some(name) if !split_path_tokens(&name).is_empty() && !is_taken(&name) => name,
        _ => format!("{}/{}", archive_name, index),
    }
}
