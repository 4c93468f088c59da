//! End-to-end CLI tests for `nly`.

use assert_cmd::Command;
use nlyaml_core::schema::KeyFormat;
use nlyaml_core::wire::{AttrKind, MessageBuilder, MsgFlags, tag};
use predicates::prelude::*;

fn nly() -> Command {
    Command::cargo_bin("nly").expect("binary builds")
}

/// A two-message capture: schema (label `net` + u32 `mtu`), then one value.
fn capture() -> Vec<u8> {
    let mut b = MessageBuilder::new(0x1c, MsgFlags::CREATE, 1, 0, 1, 1);
    let list = b.begin_nested(tag::LIST);
    let rec = b.begin_nested(1);
    b.put_u16(tag::LIST_SIZE, 2);
    b.put_u16(tag::INDEX, 1);
    b.put_u16(tag::NLA_TYPE, AttrKind::NulString.code());
    b.put_str(tag::VALUE, "net");
    b.put_u16(tag::KEY_FORMAT, KeyFormat::MAPPING.bits());
    b.end_nested(rec);
    let rec = b.begin_nested(2);
    b.put_u16(tag::INDEX, 2);
    b.put_u16(tag::NLA_TYPE, AttrKind::U32.code());
    b.put_str(tag::VALUE, "mtu");
    b.end_nested(rec);
    b.end_nested(list);
    let mut stream = b.finish();

    let mut b = MessageBuilder::new(0x1c, MsgFlags::empty(), 2, 0, 1, 1);
    b.put_u32(2, 9000);
    stream.extend_from_slice(&b.finish());
    stream
}

#[test]
fn decode_capture_to_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.bin");
    std::fs::write(&path, capture()).unwrap();

    nly()
        .arg("decode")
        .arg("--check")
        .arg(&path)
        .assert()
        .success()
        .stdout("net:\n  mtu: 9000\n");
}

#[test]
fn decode_reads_stdin() {
    nly()
        .arg("decode")
        .write_stdin(capture())
        .assert()
        .success()
        .stdout(predicate::str::contains("mtu: 9000"));
}

#[test]
fn decode_garbage_fails_with_diagnostic() {
    nly()
        .arg("decode")
        .write_stdin("definitely not netlink")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn encode_yaml_to_hex() {
    nly()
        .args(["encode", "--family", "lnet", "--command", "7", "--hex"])
        .write_stdin("net:\n  mtu: 9000\n")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("00000000 "));
}

#[test]
fn encode_without_group_fails() {
    nly()
        .args(["encode", "--hex"])
        .write_stdin("mtu: 9000\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("multicast group"));
}

#[test]
fn encode_writes_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("msg.bin");

    nly()
        .args(["--output", out.to_str().unwrap(), "encode"])
        .write_stdin("net:\n  mtu: 9000\n")
        .assert()
        .success();

    let bytes = std::fs::read(&out).unwrap();
    let len = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    assert_eq!(len, bytes.len());
}
