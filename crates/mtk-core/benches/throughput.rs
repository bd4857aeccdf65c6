//! SPSC ring/queue throughput, mirroring the teacher crate's
//! `benches/throughput.rs` single-producer/single-consumer benchmark.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mtk_core::{Config, Ring};
use std::sync::Arc;
use std::thread;

const MSG_PER_PRODUCER: u64 = 5_000_000;
const BATCH_SIZE: usize = 4096;

fn bench_ring_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(MSG_PER_PRODUCER));

    group.bench_function("ring_reserve_commit_consume", |b| {
        b.iter(|| {
            let ring = Arc::new(Ring::<u32>::new(Config::default()));

            let producer_ring = Arc::clone(&ring);
            let producer = thread::spawn(move || {
                let mut sent = 0u64;
                while sent < MSG_PER_PRODUCER {
                    let want = BATCH_SIZE.min((MSG_PER_PRODUCER - sent) as usize);
                    if let Some(mut reservation) = producer_ring.reserve(want) {
                        let slice = reservation.as_mut_slice();
                        for (i, item) in slice.iter_mut().enumerate() {
                            item.write((sent + i as u64) as u32);
                        }
                        let len = slice.len();
                        reservation.commit();
                        sent += len as u64;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut received = 0u64;
            while received < MSG_PER_PRODUCER {
                received += ring.consume_batch_owned(|item| {
                    black_box(item);
                }) as u64;
                if received < MSG_PER_PRODUCER {
                    std::hint::spin_loop();
                }
            }
            producer.join().unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ring_spsc);
criterion_main!(benches);
