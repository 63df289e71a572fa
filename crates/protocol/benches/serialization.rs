//! Benchmarks for USB/IP wire encoding
//!
//! Measures encoding/decoding performance for:
//! - Device list replies
//! - Submit requests and replies of different sizes

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{
    DeviceSummary, Direction, HandshakeResponse, InterfaceClass, IoHeader, IoRequest, IoResponse,
    Location, Speed, SubmitRequest, cmd,
};

fn benchmark_device_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_list");

    let devices: Vec<DeviceSummary> = (1..=10)
        .map(|i| DeviceSummary {
            path: Location::new(1, i).path(),
            location: Location::new(1, i),
            speed: Speed::High,
            vendor_id: 0x1234,
            product_id: 0x5678 + i,
            bcd_device: 0x0100,
            configuration_value: 1,
            num_configurations: 1,
            interfaces: vec![
                InterfaceClass {
                    class: 7,
                    subclass: 1,
                    protocol: 4,
                };
                3
            ],
            ..Default::default()
        })
        .collect();

    let reply = HandshakeResponse::DevList(devices);

    group.bench_function("encode_10_devices", |b| b.iter(|| black_box(&reply).encode()));

    let bytes = reply.encode();
    group.bench_function("decode_10_devices", |b| {
        b.iter(|| HandshakeResponse::decode(black_box(&bytes)))
    });

    group.finish();
}

fn header(direction: Direction) -> IoHeader {
    IoHeader {
        command: cmd::SUBMIT,
        seqnum: 1,
        location: Location::new(1, 1),
        direction,
        endpoint: 1,
    }
}

fn benchmark_submit_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_sizes");

    for size in [64usize, 512, 4096, 16384, 65536].iter() {
        let mut rq = SubmitRequest::new(header(Direction::Out), *size as u32);
        rq.buffer = vec![0xAB; *size];
        let bytes = rq.encode();

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("encode_out", size), size, |b, _| {
            b.iter(|| black_box(&rq).encode())
        });

        group.bench_with_input(BenchmarkId::new("decode_out", size), size, |b, _| {
            b.iter(|| {
                let mut raw = [0u8; IoHeader::SIZE];
                raw.copy_from_slice(&bytes[..IoHeader::SIZE]);
                let mut body = [0u8; IoHeader::BODY_SIZE];
                body.copy_from_slice(&bytes[IoHeader::SIZE..IoHeader::SIZE + IoHeader::BODY_SIZE]);
                IoRequest::decode(IoHeader::decode(black_box(&raw)), &body)
            })
        });

        let mut rq = SubmitRequest::new(header(Direction::In), *size as u32);
        rq.produce_in(&vec![0xCD; *size]);
        let rsp = IoResponse::from(rq.into_response(0));

        group.bench_with_input(BenchmarkId::new("encode_in_reply", size), size, |b, _| {
            b.iter(|| {
                let rsp = black_box(&rsp);
                (rsp.encode_header(), rsp.encode_body())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_device_list, benchmark_submit_sizes);
criterion_main!(benches);
