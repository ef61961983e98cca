#![allow(unused_crate_dependencies)]
use std::io;

use serde::{Deserialize, Serialize};
use serde_bencode::{Decoder, Encoder, Error, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Announce {
    info_hash: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<String>,
}

fn announces() -> Vec<Announce> {
    (0..4)
        .map(|i| Announce {
            info_hash: format!("hash{i}"),
            port: 6881 + i,
            event: (i == 0).then(|| "started".to_owned()),
        })
        .collect()
}

#[test]
fn value_stream() {
    let mut encoder = Encoder::new(Vec::new());
    for announce in announces() {
        encoder.encode(&announce).expect("announce must encode");
    }
    encoder.encode(&[1, 2, 3]).expect("list must encode");

    assert!(encoder.error().is_none(), "no errors so far");
    let buf = encoder.into_writer();

    let mut decoder = Decoder::new(buf.as_slice());
    for expected in announces() {
        let announce: Announce = decoder.decode().expect("announce must decode");
        assert_eq!(announce, expected, "announces in order");
    }

    let list: Value = decoder.decode().expect("list must decode");
    assert_eq!(
        list,
        Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        "trailing list"
    );

    let err = decoder.decode::<Value>().expect_err("no more values");
    assert!(matches!(err, Error::EndOfStream), "wrong error: {err:?}");

    let again = decoder.decode::<Value>().expect_err("decoder is stopped");
    assert!(matches!(again, Error::EndOfStream), "first error is kept: {again:?}");
}

#[test]
fn reads_one_value_at_a_time() {
    let mut reader: &[u8] = b"i1e4:rest";
    let first: i32 = serde_bencode::from_reader(&mut reader).expect("first value");
    assert_eq!(first, 1, "first value");
    assert_eq!(reader, b"4:rest", "rest is left in the reader");
}

#[test]
fn case_sensitive_decoder() {
    let mut decoder = Decoder::new(&b"d9:INFO_HASH1:x4:porti1ee"[..]).case_insensitive(false);
    let err = decoder.decode::<Announce>().expect_err("key doesn't match");
    assert!(matches!(err, Error::Custom(_)), "missing field: {err:?}");
}

struct Broken;

impl io::Write for Broken {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("disk on fire"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn sticky_encoder_error() {
    let mut encoder = Encoder::new(Broken);
    let err = encoder.encode(&announces()[0]).expect_err("writer fails");
    assert!(matches!(err, Error::Io(_)), "wrong error: {err:?}");

    let again = encoder.encode(&1).expect_err("encoder is stopped");
    assert!(matches!(again, Error::Io(_)), "first error is kept: {again:?}");
    assert!(encoder.error().is_some(), "error is stored");
}

#[test]
fn sticky_decoder_error() {
    let mut decoder = Decoder::new(&b"i1ei2x3e"[..]);
    let first: i64 = decoder.decode().expect("first value is fine");
    assert_eq!(first, 1, "first value");

    let err = decoder.decode::<i64>().expect_err("bad digit");
    assert!(
        matches!(&err, Error::Syntax(e) if e.offset() == 2),
        "offset within the value: {err:?}"
    );

    let again = decoder.decode::<i64>().expect_err("decoder is stopped");
    assert!(matches!(again, Error::Syntax(_)), "first error is kept: {again:?}");
    assert_eq!(decoder.into_reader(), b"3e", "nothing more is read");
}

#[test]
fn truncated_value() {
    let mut decoder = Decoder::new(&b"li1e"[..]);
    let err = decoder.decode::<Vec<i32>>().expect_err("list never ends");
    assert!(
        matches!(&err, Error::Syntax(e) if e.offset() == 4),
        "wrong error: {err:?}"
    );
}
