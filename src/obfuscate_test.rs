use super::*;

#[test]
fn obfuscate_ascii_matches_base64() {
    assert_eq!(obfuscate("admin"), "YWRtaW4=");
}

#[test]
fn obfuscate_handles_multibyte_text() {
    let encoded = obfuscate("管理员");
    assert_eq!(deobfuscate(&encoded).as_deref(), Some("管理员"));
}

#[test]
fn deobfuscate_empty_string() {
    assert_eq!(deobfuscate("").as_deref(), Some(""));
}

#[test]
fn deobfuscate_rejects_garbage() {
    assert!(deobfuscate("not base64 !!").is_none());
}

#[test]
fn deobfuscate_rejects_invalid_utf8() {
    // 0xff 0xfe is not valid UTF-8.
    assert!(deobfuscate("//4=").is_none());
}
