#![allow(dead_code)]
use std::path::PathBuf;

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

/// Build a sentence line with a valid checksum and CRLF terminator.
pub fn sentence(total: u32, number: u32, group: &str, channel: char, payload: &str) -> String {
    let body = format!("AIVDM,{total},{number},{group},{channel},{payload},0");
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("!{body}*{checksum:02X}\r\n")
}

/// Split `payload` into `parts` fragments of a single message.
pub fn fragments(payload: &str, parts: usize, group: &str, channel: char) -> Vec<String> {
    let size = payload.len().div_ceil(parts);
    let chunks: Vec<&str> = payload
        .as_bytes()
        .chunks(size)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect();
    let total = chunks.len() as u32;
    chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| sentence(total, idx as u32 + 1, group, channel, chunk))
        .collect()
}
