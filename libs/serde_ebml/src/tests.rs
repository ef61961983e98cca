// scenario tests over whole records. the expected bytes are written out in
// full where the exact encoding matters.
use std::fmt;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::*;

const WRAPPER: ElementId = ElementId::from_const(0x3F_0000);

fn id(raw: u32) -> ElementId {
    ElementId::new(raw).expect("valid id")
}

fn hex(s: &str) -> Vec<u8> {
    assert!(s.len() % 2 == 0, "hex strings have even length");
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("valid hex"))
        .collect()
}

fn round_trip<T>(value: &T) -> Vec<u8>
where
    T: PartialEq + fmt::Debug + Serialize + serde::de::DeserializeOwned,
{
    let buf = to_vec(value).expect("serializing must work");
    let rev: T = from_slice(&buf).expect("deserializing must work");
    assert_eq!(*value, rev, "serialization messed up data");

    let rev: T = from_reader(buf.as_slice()).expect("deserializing must work");
    assert_eq!(*value, rev, "reader and slice must agree");
    buf
}

fn element_round_trip<T>(id: ElementId, value: &T) -> Vec<u8>
where
    T: PartialEq + fmt::Debug + Serialize + serde::de::DeserializeOwned,
{
    let buf = element_to_vec(id, value).expect("serializing must work");
    let rev: T = element_from_slice(id, &buf).expect("deserializing must work");
    assert_eq!(*value, rev, "serialization messed up data");
    buf
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct DoDad {
    #[serde(rename = "4242")]
    do_hickey: u64,
    #[serde(rename = "4243")]
    thinga_mabob: String,
    #[serde(rename = "4244")]
    hum_dinger: i64,
}

fn do_dad() -> DoDad {
    DoDad {
        do_hickey: 70000,
        thinga_mabob: "huzah".to_owned(),
        hum_dinger: -92387,
    }
}

#[test]
fn do_dad_wrapped() {
    let buf = element_round_trip(WRAPPER, &do_dad());
    assert_eq!(
        buf,
        hex("3f00009442428301117042438568757a6168424483fe971d"),
        "wrapped record"
    );
}

#[test]
fn do_dad_flat() {
    let value = DoDad {
        hum_dinger: -92387,
        ..DoDad::default()
    };

    let buf = round_trip(&value);
    assert_eq!(buf, hex("424483fe971d"), "zero fields are left out");
}

#[test]
fn header() {
    let header = Header {
        version: 1,
        read_version: 1,
        max_id_length: 1,
        max_size_length: 1,
        doc_type: "matroska".to_owned(),
        doc_type_version: 1,
        doc_type_read_version: 1,
    };

    let buf = element_round_trip(ids::EBML, &header);
    assert_eq!(
        buf,
        hex("1a45dfa3a34286810142f7810142f2810142f381014282886d6174726f736b614287810142858101"),
        "ebml header"
    );

    element_round_trip(ids::EBML, &Header::new("webm"));
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Small {
    #[serde(rename = "4242")]
    count: u32,
    #[serde(rename = "4243")]
    label: String,
}

#[test]
fn small_wrapped() {
    let value = Small {
        count: 14,
        label: "huzah".to_owned(),
    };

    let buf = element_round_trip(WRAPPER, &value);
    assert_eq!(buf, hex("3f00008c4242810e42438568757a6168"), "wrapped record");
}

#[test]
fn empty_record() {
    assert_eq!(
        element_to_vec(WRAPPER, &DoDad::default()).expect("serializing must work"),
        [0x3F, 0x00, 0x00, 0x80],
        "an empty container is still written"
    );
    assert!(
        to_vec(&DoDad::default())
            .expect("serializing must work")
            .is_empty(),
        "a flat empty record writes nothing"
    );

    let value: DoDad = from_slice(&[]).expect("deserializing must work");
    assert_eq!(value, DoDad::default(), "everything is zero filled");
}

#[test]
fn skips_unknown_elements() {
    let buf = Element::container(
        WRAPPER,
        vec![
            Element::uint(id(0x4242), 70000).expect("valid"),
            Element::leaf(ids::VOID, vec![0]).expect("valid"),
            Element::leaf(id(0x4243), b"huzah".to_vec()).expect("valid"),
            Element::leaf(id(0x4299), vec![0xAB, 0xCD]).expect("valid"),
            Element::int(id(0x4244), -92387).expect("valid"),
        ],
    )
    .expect("valid")
    .to_vec();

    let value: DoDad = element_from_slice(WRAPPER, &buf).expect("deserializing must work");
    assert_eq!(value, do_dad(), "unknown elements are ignored");

    // elements before the requested one are skipped too
    let mut buf2 = Element::leaf(ids::VOID, vec![0; 3]).expect("valid").to_vec();
    buf2.extend_from_slice(&buf);
    let value: DoDad = element_from_slice(WRAPPER, &buf2).expect("deserializing must work");
    assert_eq!(value, do_dad(), "leading elements are ignored");
}

#[test]
fn element_not_found() {
    let buf = Element::leaf(ids::VOID, vec![0]).expect("valid").to_vec();
    let err = element_from_slice::<DoDad>(WRAPPER, &buf).expect_err("no such element");
    assert!(
        matches!(err, Error::ElementNotFound(i) if i == WRAPPER),
        "wrong error: {err:?}"
    );
}

#[test]
fn unknown_size_container() {
    let buf = hex("3f0000ff4242810e42438568757a6168");
    let value: Small = element_from_slice(WRAPPER, &buf).expect("deserializing must work");
    assert_eq!(
        value,
        Small {
            count: 14,
            label: "huzah".to_owned(),
        },
        "container runs to the end of the input"
    );
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Wide {
    #[serde(rename = "4242")]
    value: u64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Narrow {
    #[serde(rename = "4242")]
    value: u8,
}

#[test]
fn field_overflow() {
    let buf = to_vec(&Wide { value: 300 }).expect("serializing must work");
    let err = from_slice::<Narrow>(&buf).expect_err("300 doesn't fit a u8");

    assert!(
        matches!(err, Error::Element { id, offset: Some(0), .. } if id.get() == 0x4242),
        "error names the element: {err:?}"
    );
    assert!(
        matches!(err.innermost(), Error::FieldOverflow { value, ty: "u8" } if value == "300"),
        "wrong error: {err:?}"
    );

    let buf = hex("42428a0102030405060708090a");
    let err = from_slice::<Wide>(&buf).expect_err("10 bytes don't fit a u64");
    assert!(
        matches!(err.innermost(), Error::FieldOverflow { value, ty: "u64" } if value == "0x0102030405060708090a"),
        "wrong error: {err:?}"
    );
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Track {
    #[serde(rename = "d7")]
    number: u64,
    #[serde(rename = "536e")]
    name: String,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Tracks {
    #[serde(rename = "ae")]
    tracks: Vec<Track>,
    #[serde(rename = "4255")]
    codes: Vec<u32>,
    #[serde(rename = "4256")]
    label: String,
}

#[test]
fn repeated_fields() {
    let value = Tracks {
        tracks: vec![
            Track {
                number: 1,
                name: "video".to_owned(),
            },
            Track {
                number: 2,
                name: String::new(),
            },
        ],
        codes: vec![0, 7],
        label: "x".to_owned(),
    };

    let buf = round_trip(&value);
    assert_eq!(
        buf,
        hex("ae8bd78101536e85766964656fae83d781024255804255810742568178"),
        "one element per member, zero members are kept"
    );

    round_trip(&Tracks::default());
}

#[test]
fn repeated_fields_with_unknown() {
    let track = |n: u64| {
        Element::container(id(0xAE), vec![Element::uint(id(0xD7), n).expect("valid")])
            .expect("valid")
    };

    let buf = Element::group(vec![
        track(1),
        Element::leaf(ids::VOID, vec![0]).expect("valid"),
        track(2),
        Element::uint(id(0x4255), 7).expect("valid"),
        Element::leaf(id(0x4256), b"x".to_vec()).expect("valid"),
    ])
    .to_vec();

    let value: Tracks = from_slice(&buf).expect("deserializing must work");
    assert_eq!(
        value.tracks.iter().map(|t| t.number).collect::<Vec<_>>(),
        [1, 2],
        "unknown elements within a run are skipped"
    );
    assert_eq!(value.codes, [7], "next run");
    assert_eq!(value.label, "x", "after the runs");

    // a run that is interrupted by a known element and resumed later
    let buf = Element::group(vec![
        track(1),
        Element::leaf(id(0x4256), b"x".to_vec()).expect("valid"),
        track(2),
    ])
    .to_vec();

    let value: Tracks = from_slice(&buf).expect("deserializing must work");
    assert_eq!(
        value.tracks.iter().map(|t| t.number).collect::<Vec<_>>(),
        [1, 2],
        "split runs are merged"
    );
    assert_eq!(value.label, "x", "field between the runs");
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Cluster {
    #[serde(rename = "e7")]
    timecode: u64,
    #[serde(rename = "a3")]
    simple: Vec<u64>,
    #[serde(rename = "a0")]
    group: Vec<u64>,
}

#[test]
fn interleaved_sequences() {
    let buf = hex("a38101a08102a38103");
    let value: Cluster = from_slice(&buf).expect("deserializing must work");
    assert_eq!(value.simple, [1, 3], "first sequence");
    assert_eq!(value.group, [2], "second sequence");

    let expected = Cluster {
        timecode: 5,
        simple: vec![1, 3, 5],
        group: vec![2, 4],
    };

    // with a scalar field first and an unknown element in between
    let payload = "e78105a38101a08102a38103ec8100a08104a38105";
    let buf = hex(payload);
    let value: Cluster = from_slice(&buf).expect("deserializing must work");
    assert_eq!(value, expected, "from a slice");

    let value: Cluster = from_reader(buf.as_slice()).expect("deserializing must work");
    assert_eq!(value, expected, "from a reader");

    // wrapped in an element, followed by another one
    let buf = hex(&format!("1f43b67595{payload}ec8100"));
    let mut de = Deserializer::from_slice(&buf);
    let value: Cluster = de.decode_element(id(0x1F43_B675)).expect("deserializing must work");
    assert_eq!(value, expected, "wrapped");
    assert_eq!(de.remainder(), [0xEC, 0x81, 0x00], "stops after the element");

    let mut de = Deserializer::from_reader(buf.as_slice());
    let value: Cluster = de.decode_element(id(0x1F43_B675)).expect("deserializing must work");
    assert_eq!(value, expected, "wrapped, from a reader");
    assert_eq!(de.position(), 26, "stops after the element");
}

#[test]
fn top_level_sequence() {
    let buf = hex("4255810142558102ec8100");
    let mut de = Deserializer::from_slice(&buf);
    let codes: Vec<u32> = de.decode_element(id(0x4255)).expect("deserializing must work");
    assert_eq!(codes, [1, 2], "the run of elements");
    assert_eq!(de.position(), 8, "stops before the next element");
    assert_eq!(de.remainder(), [0xEC, 0x81, 0x00], "next element is left");
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Segment {
    #[serde(rename = "1f43b675")]
    clusters: Vec<Cluster>,
    #[serde(rename = "4489")]
    duration: u64,
}

#[test]
fn interleaved_in_nested_records() {
    // each cluster interleaves its blocks, and the clusters are split up by
    // the duration
    let first = "a38101a08102a38103";
    let second = "a08104a38105a08106";
    let buf = hex(&format!("1f43b67589{first}448981091f43b67589{second}"));
    let value: Segment = from_slice(&buf).expect("deserializing must work");

    let expected = Segment {
        clusters: vec![
            Cluster {
                timecode: 0,
                simple: vec![1, 3],
                group: vec![2],
            },
            Cluster {
                timecode: 0,
                simple: vec![5],
                group: vec![4, 6],
            },
        ],
        duration: 9,
    };
    assert_eq!(value, expected, "from a slice");

    let value: Segment = from_reader(buf.as_slice()).expect("deserializing must work");
    assert_eq!(value, expected, "from a reader");

    round_trip(&expected);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Node {
    #[serde(rename = "4281")]
    value: u32,
    #[serde(rename = "4280")]
    next: Option<Box<Node>>,
}

#[test]
fn nested_options() {
    let value = Node {
        value: 1,
        next: Some(Box::new(Node {
            value: 2,
            next: Some(Box::new(Node {
                value: 3,
                next: None,
            })),
        })),
    };

    round_trip(&value);

    let value = Node {
        value: 0,
        next: Some(Box::new(Node {
            value: 0,
            next: None,
        })),
    };

    let buf = round_trip(&value);
    assert_eq!(buf, [0x42, 0x80, 0x80], "empty but present record");
}

#[derive(Debug, Default, PartialEq)]
struct Prefix {
    bytes: Vec<u8>,
}

struct Capped<'a> {
    out: &'a mut Vec<u8>,
    left: usize,
}

impl io::Write for Capped<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.left);
        self.out.extend_from_slice(&buf[..n]);
        self.left -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Marshal for Prefix {
    fn marshal(&self) -> (u64, impl io::Read + '_) {
        (self.bytes.len() as u64, self.bytes.as_slice())
    }
}

impl Unmarshal for Prefix {
    fn unmarshal(&mut self, _size: u64) -> impl io::Write + '_ {
        Capped {
            out: &mut self.bytes,
            left: 3,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Blob {
    #[serde(rename = "a1")]
    payload: Custom<Prefix>,
    #[serde(rename = "a2")]
    after: u32,
}

#[test]
fn custom_payload() {
    let value = Blob {
        payload: Custom(Prefix {
            bytes: vec![1, 2, 3, 4, 5, 6],
        }),
        after: 9,
    };

    let buf = to_vec(&value).expect("serializing must work");
    assert_eq!(
        buf,
        [0xA1, 0x86, 1, 2, 3, 4, 5, 6, 0xA2, 0x81, 9],
        "marshaled payload is written as is"
    );

    let back: Blob = from_slice(&buf).expect("deserializing must work");
    assert_eq!(back.payload.bytes, [1, 2, 3], "sink stopped early");
    assert_eq!(back.after, 9, "reader resumes after the element");
}

struct Liar;

impl Marshal for Liar {
    fn marshal(&self) -> (u64, impl io::Read + '_) {
        (10, &b"abc"[..])
    }
}

#[derive(Serialize)]
struct Lies {
    #[serde(rename = "a1")]
    payload: Custom<Liar>,
}

#[test]
fn custom_short_payload() {
    let err = to_vec(&Lies {
        payload: Custom(Liar),
    })
    .expect_err("payload is shorter than declared");

    assert!(
        matches!(
            err.innermost(),
            Error::MarshalerLength {
                expected: 10,
                actual: 3
            }
        ),
        "wrong error: {err:?}"
    );
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Stamped {
    #[serde(rename = "4461")]
    date: Date,
}

#[test]
fn dates() {
    let buf = round_trip(&Stamped { date: Date::EPOCH });
    assert_eq!(
        buf,
        [0x44, 0x61, 0x88, 0, 0, 0, 0, 0, 0, 0, 0],
        "dates always take 8 bytes"
    );

    let buf = round_trip(&Stamped {
        date: Date::from_nanos(-5),
    });
    assert_eq!(buf[3..], [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFB], "two's complement");

    let err = from_slice::<Stamped>(&[0x44, 0x61, 0x84, 0, 0, 0, 1]).expect_err("too short");
    assert!(
        matches!(err.innermost(), Error::InvalidDateSize(4)),
        "wrong error: {err:?}"
    );
}

fn default_b() -> u32 {
    42
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Partial {
    #[serde(rename = "4242")]
    a: u64,
    #[serde(rename = "4243", default = "default_b")]
    b: u32,
}

#[test]
fn zero_fill() {
    let buf = [0x42, 0x42, 0x81, 0x05];

    let value: Partial = from_slice(&buf).expect("deserializing must work");
    assert_eq!(value, Partial { a: 5, b: 0 }, "zero fill wins over defaults");

    let mut de = Deserializer::from_slice(&buf).zero_fill(false);
    let value = Partial::deserialize(&mut de).expect("deserializing must work");
    assert_eq!(value, Partial { a: 5, b: 42 }, "serde defaults apply");

    let buf = [0x42, 0x43, 0x81, 0x05];
    let mut de = Deserializer::from_slice(&buf).zero_fill(false);
    let err = Partial::deserialize(&mut de).expect_err("a is missing");
    assert!(
        matches!(err.innermost(), Error::Custom(msg) if msg.contains("missing field")),
        "wrong error: {err:?}"
    );
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct WithIgnored {
    #[serde(rename = "4242")]
    a: u64,
    #[serde(rename = "-")]
    ignored: u64,
}

#[test]
fn ignored_field() {
    let buf = to_vec(&WithIgnored { a: 1, ignored: 5 }).expect("serializing must work");
    assert_eq!(buf, [0x42, 0x42, 0x81, 0x01], "ignored field is left out");

    let value: WithIgnored = from_slice(&buf).expect("deserializing must work");
    assert_eq!(value, WithIgnored { a: 1, ignored: 0 }, "ignored field is zero");
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Floats {
    #[serde(rename = "4489")]
    duration: f64,
    #[serde(rename = "448a")]
    ratio: f32,
}

#[test]
fn floats() {
    let buf = round_trip(&Floats {
        duration: 1234.5,
        ratio: 0.25,
    });
    assert_eq!(buf.len(), 11 + 7, "8 and 4 byte payloads");

    round_trip(&Floats {
        duration: 0.0,
        ratio: 0.0,
    });

    let err = from_slice::<Floats>(&[0x44, 0x89, 0x83, 1, 2, 3]).expect_err("3 byte float");
    assert!(
        matches!(err.innermost(), Error::InvalidFloatSize(3)),
        "wrong error: {err:?}"
    );
}

#[test]
fn wide_float_into_f32() {
    fn ratio(v: f64) -> Result<f32> {
        let mut buf = vec![0x44, 0x8a, 0x88];
        buf.extend_from_slice(&v.to_be_bytes());
        from_slice::<Floats>(&buf).map(|f| f.ratio)
    }

    assert_eq!(ratio(0.5).expect("exact in f32"), 0.5, "narrowed");
    assert!(ratio(f64::NAN).expect("nan stays nan").is_nan(), "nan");

    for v in [1e300, 0.1] {
        let err = ratio(v).expect_err("doesn't fit an f32");
        assert!(
            matches!(err.innermost(), Error::FieldOverflow { value, ty: "f32" } if *value == v.to_string()),
            "wrong error for {v}: {err:?}"
        );
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Payload {
    #[serde(rename = "a3", with = "serde_bytes")]
    data: Vec<u8>,
    #[serde(rename = "a4")]
    single: char,
}

#[test]
fn bytes_and_chars() {
    let buf = round_trip(&Payload {
        data: vec![0, 1, 2, 255],
        single: 'ß',
    });
    assert_eq!(buf, [0xA3, 0x84, 0, 1, 2, 255, 0xA4, 0x82, 0xC3, 0x9F], "raw payloads");
}

#[derive(Debug, PartialEq, Deserialize)]
struct Borrowed<'a> {
    #[serde(rename = "4282", borrow)]
    doc_type: &'a str,
}

#[test]
fn borrowed_str() {
    let buf = hex("4282886d6174726f736b61");
    let value: Borrowed<'_> = from_slice(&buf).expect("deserializing must work");
    assert_eq!(value.doc_type, "matroska", "borrowed from the input");
}

#[test]
fn truncated() {
    let buf = element_to_vec(WRAPPER, &do_dad()).expect("serializing must work");
    let err = element_from_slice::<DoDad>(WRAPPER, &buf[..buf.len() - 2]).expect_err("cut off");
    assert!(
        matches!(err.innermost(), Error::TruncatedStream { .. }),
        "wrong error: {err:?}"
    );

    let err = from_reader::<DoDad, _>(&buf[..buf.len() - 2]).expect_err("cut off");
    assert!(
        matches!(err.innermost(), Error::TruncatedStream { .. }),
        "wrong error: {err:?}"
    );
}

#[test]
fn out_of_bounds() {
    let buf = [0x3F, 0x00, 0x00, 0x85, 0x42, 0x42, 0x83, 0x01, 0x11, 0x70];
    let err = element_from_slice::<DoDad>(WRAPPER, &buf).expect_err("child exceeds parent");
    assert!(
        matches!(err.innermost(), Error::ElementOutOfBounds { id, offset: 4 } if id.get() == 0x4242),
        "wrong error: {err:?}"
    );
}

#[test]
fn invalid_markers() {
    let err = from_slice::<DoDad>(&[0x00, 0x81, 0x00]).expect_err("no id marker");
    assert!(
        matches!(err.innermost(), Error::InvalidIdMarker { offset: 0 }),
        "wrong error: {err:?}"
    );

    let err = from_slice::<DoDad>(&[0x42, 0x42, 0x00]).expect_err("no size marker");
    assert!(
        matches!(err.innermost(), Error::InvalidSizeMarker { offset: 2 }),
        "wrong error: {err:?}"
    );
}

#[derive(Debug, Serialize, Deserialize)]
struct Flagged {
    #[serde(rename = "4242")]
    flag: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Named {
    name: String,
}

#[test]
fn unsupported() {
    let err = to_vec(&Flagged { flag: true }).expect_err("bools aren't supported");
    assert!(
        matches!(err.innermost(), Error::UnsupportedType("bool")),
        "wrong error: {err:?}"
    );

    let err = to_vec(&5u32).expect_err("not a record");
    assert!(matches!(err, Error::InvalidTarget), "wrong error: {err:?}");

    let err = from_slice::<u32>(&[]).expect_err("not a record");
    assert!(matches!(err, Error::InvalidTarget), "wrong error: {err:?}");

    let err = to_vec(&Named {
        name: "x".to_owned(),
    })
    .expect_err("field name isn't an id");
    assert!(
        matches!(err.innermost(), Error::MalformedTag(tag) if tag == "name"),
        "wrong error: {err:?}"
    );

    let err = from_slice::<Named>(&[]).expect_err("field name isn't an id");
    assert!(
        matches!(err.innermost(), Error::MalformedTag(tag) if tag == "name"),
        "wrong error: {err:?}"
    );
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Inner {
    #[serde(rename = "4242")]
    a: u64,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Flattened {
    #[serde(flatten)]
    inner: Inner,
    #[serde(rename = "4243")]
    b: u64,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Embedded {
    #[serde(rename = "4242")]
    a: u64,
    #[serde(rename = "4243")]
    b: u64,
}

#[test]
fn flattened_fields() {
    fn is_map(err: &Error) -> bool {
        matches!(err.innermost(), Error::UnsupportedType("map"))
    }

    let value = Flattened {
        inner: Inner { a: 7 },
        b: 9,
    };

    let err = to_vec(&value).expect_err("flatten goes through a map");
    assert!(is_map(&err), "wrong error: {err:?}");
    let err = element_to_vec(WRAPPER, &value).expect_err("flatten goes through a map");
    assert!(is_map(&err), "wrong error: {err:?}");

    // the embedded fields declared on the record itself
    let buf = round_trip(&Embedded { a: 7, b: 9 });
    assert_eq!(buf, hex("4242810742438109"), "embedded fields are siblings");

    let err = from_slice::<Flattened>(&buf).expect_err("flatten goes through a map");
    assert!(is_map(&err), "wrong error: {err:?}");

    let buf = element_round_trip(WRAPPER, &Embedded { a: 7, b: 9 });
    let err = element_from_slice::<Flattened>(WRAPPER, &buf).expect_err("flatten goes through a map");
    assert!(is_map(&err), "wrong error: {err:?}");
}

#[test]
fn private_cache() {
    let cache = Arc::new(SchemaCache::new());
    let buf = to_vec(&do_dad()).expect("serializing must work");

    let mut de = Deserializer::from_slice(&buf).with_cache(Arc::clone(&cache));
    let value = DoDad::deserialize(&mut de).expect("deserializing must work");
    assert_eq!(value, do_dad(), "same result with any cache");
    assert_eq!(cache.len(), 1, "schema was cached");
    assert!(de.remainder().is_empty(), "all input consumed");
}

#[test]
fn error_display() {
    let buf = to_vec(&Wide { value: 300 }).expect("serializing must work");
    let err = from_slice::<Narrow>(&buf).expect_err("300 doesn't fit a u8");
    let msg = err.to_string();
    assert!(msg.starts_with("element 4242 at offset 0: "), "got: {msg}");
}
