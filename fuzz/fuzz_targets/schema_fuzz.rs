//! Schema fuzz target: feed arbitrary text to the DSL parser and resolver.
//! Neither may panic; both return Ok or a schema error.
//! Build with: cargo fuzz run schema_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let _ = piececodec::load_schema_str(s);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run schema_fuzz");
}
