//! Decoder fuzz target: decode arbitrary bytes as a scenario with hook-driven repeat counts,
//! nested records, length-prefixed strings and a sentinel. Decoding must not panic or allocate
//! unboundedly; whatever decodes must re-encode.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const SCHEMA: &str = r#"
piece Header {
	version: c4;
	count: u16 {
		on_commit: set_value(self.items) = len(x);
	}
	items: struct:Item {
		on_construct: set_repeat(self.count) = x;
	}
	__END_OF_FILE_MARK__: 1;
}
struct Item {
	kind: s8;
	label: str32;
}
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let schema = match piececodec::load_schema_str(SCHEMA) {
        Ok(s) => s,
        Err(_) => return,
    };
    let codec = piececodec::Codec::new(schema);
    let mut input = b"1.40".to_vec();
    input.extend_from_slice(data);
    if let Ok(mut result) = piececodec::decode_scenario(&codec, input.chunks(7)) {
        let _ = piececodec::encode_scenario(&codec, &mut result.registry);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
