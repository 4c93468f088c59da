//! Benchmarks for the two transcoding directions.
//!
//! - Inbound: schema intake plus value rendering into YAML text
//! - Outbound: YAML text shaped into a framed message

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nlyaml_core::schema::KeyFormat;
use nlyaml_core::session::{ReadSession, WriteSession};
use nlyaml_core::transport::ReplayTransport;
use nlyaml_core::wire::{AttrKind, MessageBuilder, MsgFlags, tag};

const FAMILY: u16 = 0x1c;

fn nets_schema() -> Vec<u8> {
    let mut b = MessageBuilder::new(FAMILY, MsgFlags::CREATE, 1, 0, 1, 1);
    let list = b.begin_nested(tag::LIST);

    let root_rec = b.begin_nested(1);
    b.put_u16(tag::LIST_SIZE, 1);
    b.put_u16(tag::INDEX, 1);
    b.put_u16(tag::NLA_TYPE, AttrKind::Nested.code());
    b.put_str(tag::VALUE, "net");
    b.put_u16(tag::KEY_FORMAT, KeyFormat::MAPPING.bits());

    let child_list = b.begin_nested(tag::LIST);
    let nets_rec = b.begin_nested(1);
    b.put_u16(tag::LIST_SIZE, 1);
    b.put_u16(tag::INDEX, 1);
    b.put_u16(tag::NLA_TYPE, AttrKind::Nested.code());
    b.put_str(tag::VALUE, "nets");
    b.put_u16(tag::KEY_FORMAT, (KeyFormat::SEQUENCE | KeyFormat::MAPPING).bits());

    let grand_list = b.begin_nested(tag::LIST);
    let rec = b.begin_nested(1);
    b.put_u16(tag::LIST_SIZE, 3);
    b.put_u16(tag::INDEX, 1);
    b.put_u16(tag::NLA_TYPE, AttrKind::String.code());
    b.put_str(tag::VALUE, "nid");
    b.end_nested(rec);
    let rec = b.begin_nested(2);
    b.put_u16(tag::INDEX, 2);
    b.put_u16(tag::NLA_TYPE, AttrKind::String.code());
    b.put_str(tag::VALUE, "status");
    b.end_nested(rec);
    let rec = b.begin_nested(3);
    b.put_u16(tag::INDEX, 3);
    b.put_u16(tag::NLA_TYPE, AttrKind::U32.code());
    b.put_str(tag::VALUE, "refcount");
    b.end_nested(rec);
    b.end_nested(grand_list);

    b.end_nested(nets_rec);
    b.end_nested(child_list);
    b.end_nested(root_rec);
    b.end_nested(list);
    b.finish()
}

fn nets_values(elements: usize) -> Vec<u8> {
    let mut b = MessageBuilder::new(FAMILY, MsgFlags::empty(), 2, 0, 1, 1);
    let net = b.begin_nested(1);
    let nets = b.begin_nested(1);
    for i in 0..elements {
        let elem = b.begin_nested((i + 1) as u16);
        b.put_str(1, &format!("tcp{i}"));
        b.put_str(2, if i % 2 == 0 { "up" } else { "down" });
        b.put_u32(3, i as u32);
        b.end_nested(elem);
    }
    b.end_nested(nets);
    b.end_nested(net);
    b.finish()
}

fn bench_inbound(c: &mut Criterion) {
    let schema = nets_schema();
    let mut group = c.benchmark_group("inbound");

    for elements in [16usize, 256, 1024] {
        let values = nets_values(elements);
        let wire_len = (schema.len() + values.len()) as u64;
        group.throughput(Throughput::Bytes(wire_len));
        group.bench_with_input(
            BenchmarkId::from_parameter(elements),
            &(schema.clone(), values),
            |b, (schema, values)| {
                b.iter(|| {
                    let mut transport = ReplayTransport::new();
                    transport.queue_datagram(schema.clone());
                    transport.queue_datagram(values.clone());
                    let mut session = ReadSession::attach(transport, false).unwrap();
                    black_box(session.read_to_document().unwrap())
                });
            },
        );
    }
    group.finish();
}

fn bench_outbound(c: &mut Criterion) {
    let mut doc = String::from("net:\n  nets:\n");
    for i in 0..512 {
        doc.push_str(&format!("    - nid: tcp{i}\n      status: up\n      refcount: {i}\n"));
    }

    let mut group = c.benchmark_group("outbound");
    group.throughput(Throughput::Bytes(doc.len() as u64));
    group.bench_function("emit-512-elements", |b| {
        b.iter(|| {
            let transport = ReplayTransport::permissive();
            let mut session =
                WriteSession::attach(transport, "lnet", 1, 7, MsgFlags::REQUEST).unwrap();
            session.write_fragment(black_box(&doc)).unwrap();
            session.finish().unwrap();
            black_box(session.into_transport().sent().len())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_inbound, bench_outbound);
criterion_main!(benches);
