//! Benchmark for classification and location resolution
//!
//! Runs over a synthetic topology of one AHCI, one MegaRAID and one SAS
//! expander shelf.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use disk_inventory::domain::ports::Topology;
use disk_inventory::hardware::topology::{MockTopology, SasSlot};
use disk_inventory::hardware::{DeviceClassifier, DiskScanner};
use std::sync::Arc;

const SAS_BAYS: u32 = 24;

fn build_topology() -> MockTopology {
    let topology = MockTopology::new();
    for host in 0..4 {
        topology.add_ahci_disk(&format!("sata{}", host), host, &format!("0x5000c5000000{:04x}", host));
    }
    for target in 0..8 {
        topology.add_megaraid_disk(
            &format!("raid{}", target),
            &format!("0:2:{}:0", target),
            &format!("0x5000c5001000{:04x}", target),
        );
    }
    for bay in 0..SAS_BAYS {
        let bay_id = bay.to_string();
        topology.add_sas_disk(
            &format!("sas{}", bay),
            &format!("0x5000cca2000{:05x}", bay),
            SasSlot {
                expander: Some(if bay % 2 == 0 { "SAS2X36" } else { "SAS2X28" }),
                enclosure: "500304801f2e7a3f",
                bay: &bay_id,
                phy: bay,
            },
        );
    }
    topology.add_disk_with_driver("other0", "unknown-raid", "0x5000c5002000");
    topology
}

fn bench_resolve(c: &mut Criterion) {
    let topology = build_topology();
    let classifier = DeviceClassifier::new();
    let devices = topology.enumerate().unwrap_or_default();

    let mut group = c.benchmark_group("location");
    group.throughput(Throughput::Elements(devices.len() as u64));

    group.bench_function("classify", |b| {
        b.iter(|| {
            for device in &devices {
                black_box(classifier.classify(black_box(device)));
            }
        });
    });

    group.bench_function("classify_and_locate", |b| {
        b.iter(|| {
            for device in &devices {
                black_box(classifier.disk_from_device(&topology, black_box(device)));
            }
        });
    });

    group.finish();
}

fn bench_full_scan(c: &mut Criterion) {
    let scanner = DiskScanner::new(Arc::new(build_topology()), Arc::new(DeviceClassifier::new()));

    let mut group = c.benchmark_group("location");
    group.bench_function("full_scan", |b| {
        b.iter(|| black_box(scanner.scan()));
    });
    group.finish();
}

criterion_group!(benches, bench_resolve, bench_full_scan);
criterion_main!(benches);
