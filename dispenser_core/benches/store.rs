use criterion::{Criterion, black_box, criterion_group, criterion_main};
use dispenser_core::{Phase, StateRecord, crc16};

fn bench_crc16(c: &mut Criterion) {
    let entry: Vec<u8> = (0..64u8).collect();
    c.bench_function("crc16_64_byte_entry", |b| {
        b.iter(|| crc16(black_box(&entry)))
    });
}

fn bench_record_codec(c: &mut Criterion) {
    let record = StateRecord {
        phase: Phase::Dispensing,
        pills_left: 4,
        progress_in_slot: 96,
        in_motion: true,
        calibrated: true,
        slots_completed: 3,
    };
    c.bench_function("record_encode", |b| {
        b.iter(|| black_box(&record).encode())
    });
    let raw = record.encode();
    c.bench_function("record_decode", |b| {
        b.iter(|| StateRecord::decode(black_box(&raw)))
    });
}

criterion_group!(benches, bench_crc16, bench_record_codec);
criterion_main!(benches);
