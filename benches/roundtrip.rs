//! Benchmark: decode and decode+encode of a synthetic scenario with a few thousand nested records,
//! fed to the decoder in 64 KiB chunks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use piececodec::{decode_scenario, encode_scenario, load_schema_str, Codec};

const SCHEMA: &str = r#"
piece Header {
	version: c4;
	unit_count: u32 {
		on_commit: set_value(self.units) = len(x);
	}
	units: struct:Unit {
		on_construct: set_repeat(self.unit_count) = x;
	}
}

piece Map {
	width: u32;
	height: u32;
	tiles: u16 [1024];
	__END_OF_FILE_MARK__: 1;
}

struct Unit {
	id: u32;
	x: f32;
	y: f32;
	name: str16;
}
"#;

const UNITS: u32 = 4000;
const CHUNK: usize = 64 * 1024;

fn scenario_bytes() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(b"1.40");
    b.extend_from_slice(&UNITS.to_le_bytes());
    for i in 0..UNITS {
        b.extend_from_slice(&i.to_le_bytes());
        b.extend_from_slice(&(i as f32 * 0.5).to_le_bytes());
        b.extend_from_slice(&(i as f32 * 0.25).to_le_bytes());
        let name = format!("unit{}", i);
        b.extend_from_slice(&(name.len() as u16).to_le_bytes());
        b.extend_from_slice(name.as_bytes());
    }
    b.extend_from_slice(&32u32.to_le_bytes());
    b.extend_from_slice(&32u32.to_le_bytes());
    for t in 0..1024u16 {
        b.extend_from_slice(&(t % 17).to_le_bytes());
    }
    b
}

fn bench_roundtrip(c: &mut Criterion) {
    let codec = Codec::new(load_schema_str(SCHEMA).expect("schema"));
    let input = scenario_bytes();

    c.bench_function("decode_scenario", |b| {
        b.iter(|| {
            let result = decode_scenario(&codec, black_box(&input).chunks(CHUNK)).expect("decode");
            black_box(result.byte_length)
        })
    });

    c.bench_function("decode_encode_scenario", |b| {
        b.iter(|| {
            let mut result = decode_scenario(&codec, black_box(&input).chunks(CHUNK)).expect("decode");
            let out = encode_scenario(&codec, &mut result.registry).expect("encode");
            black_box(out.len())
        })
    });
}

criterion_group!(benches, bench_roundtrip);
criterion_main!(benches);
