use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::{mem::MaybeUninit, ptr::NonNull};
use tagalloc::{Heap, SliceSource};

const POOL_LEN: usize = 1024 * 70;
const MAX_ALLOCS: usize = 256;

struct Xorshift32(u32);

impl Xorshift32 {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }
}

/// Keep a fixed number of live allocations and repeatedly replace one of them
/// with a new allocation of a random size.
fn bench_one<const CHUNK_WORDS: usize>(c: &mut Criterion, name: &str) {
    let mut group = c.benchmark_group(name);
    let mut pool = vec![MaybeUninit::<u8>::uninit(); POOL_LEN];

    for &(min_size, mask) in &[
        (1, 7),
        (1, 15),
        (1, 63),
        (1, 255),
        (16, 15),
        (16, 63),
        (16, 127),
        (64, 63),
        (64, 127),
        (128, 127),
    ] {
        let size_range = min_size..min_size + mask + 1;
        let num_allocs = (POOL_LEN / size_range.end / 2)
            .min(MAX_ALLOCS)
            .next_power_of_two()
            / 2;

        let mut heap: Heap<_, CHUNK_WORDS> = Heap::new(SliceSource::new(&mut pool)).unwrap();

        let mut rng = Xorshift32(0x12345689);
        let mut next_size = || (rng.next() as usize & mask) + min_size;

        let mut allocs: Vec<NonNull<u8>> = (0..num_allocs)
            .map(|_| heap.allocate(next_size()).unwrap())
            .collect();

        group.bench_function(
            BenchmarkId::from_parameter(format_args!("size {:?}", size_range)),
            |b| {
                let mut alloc_i = 0;
                b.iter(|| {
                    let slot = &mut allocs[alloc_i & (num_allocs - 1)];
                    unsafe { heap.release(*slot) };
                    *slot = heap.allocate(next_size()).unwrap();

                    alloc_i = alloc_i.wrapping_add(1);
                });
            },
        );
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("noop", |b| b.iter(noop));

    bench_one::<64>(c, "tagalloc_chunk_64");
    bench_one::<1024>(c, "tagalloc_chunk_1024");
}

#[inline(never)]
fn noop() {}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
