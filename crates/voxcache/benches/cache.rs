use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use voxcache::{Cache, DecodedImage, ImageVolume};

fn image(id: &str, size: usize) -> DecodedImage {
    DecodedImage::new(id, 1, size as u32, Bytes::from(vec![b'x'; size]))
}

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb_cached", |b| {
        let cache: Cache = Cache::with_max_cache_size(1024 * 1024).unwrap();
        let ids: Vec<String> = (0..100).map(|i| format!("img-{}", i)).collect();
        for id in &ids {
            cache.put_image_sync(id, image(id, 1024)).unwrap();
        }

        let mut counter = 0;
        b.iter(|| {
            black_box(cache.image(&ids[counter % 100]).unwrap());
            counter += 1;
        });
    });

    group.finish();
}

fn bench_put_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_1kb_evicting", |b| {
        // Room for roughly 100 images; every put past that evicts the oldest
        let cache: Cache = Cache::with_max_cache_size(100 * 1024 + 1).unwrap();
        let mut counter = 0u64;
        b.iter(|| {
            cache.reclaim(1024, None).ok();
            let id = format!("img-{}", counter);
            black_box(cache.put_image_sync(&id, image(&id, 1024)).ok());
            counter += 1;
        });
    });

    group.finish();
}

fn bench_reclaim_with_protection(c: &mut Criterion) {
    let mut group = c.benchmark_group("reclaim");
    group.sample_size(20);

    group.bench_function("reclaim_half_protected", |b| {
        b.iter_with_setup(
            || {
                let cache: Cache = Cache::with_max_cache_size(1000 * 1024 + 1).unwrap();
                let ids: Vec<String> = (0..1000).map(|i| format!("img-{}", i)).collect();
                for id in &ids {
                    cache.put_image_sync(id, image(id, 1024)).unwrap();
                }
                let protected: Vec<String> = ids.iter().step_by(2).cloned().collect();
                (cache, protected)
            },
            |(cache, protected)| {
                black_box(cache.reclaim(600 * 1024, Some(&protected)).unwrap());
            },
        );
    });

    group.finish();
}

fn bench_volume_linking(c: &mut Criterion) {
    let mut group = c.benchmark_group("volume");
    group.sample_size(20);

    group.bench_function("put_and_remove_volume_500_slices", |b| {
        let cache: Cache = Cache::with_max_cache_size(1024 * 1024).unwrap();
        let ids: Vec<String> = (0..500).map(|i| format!("slice-{}", i)).collect();
        for id in &ids {
            cache.put_image_sync(id, image(id, 512)).unwrap();
        }

        b.iter(|| {
            let volume = ImageVolume::new("ct", ids.clone(), Bytes::new());
            cache.put_volume_sync("ct", volume).unwrap();
            cache.remove_volume_load_object("ct").unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cached_get,
    bench_put_with_eviction,
    bench_reclaim_with_protection,
    bench_volume_linking
);
criterion_main!(benches);
