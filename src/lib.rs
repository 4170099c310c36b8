//! # piececodec: schema-driven codec for piece-structured scenario files
//!
//! A scenario file is a sequence of record sections ("pieces"), each an ordered list of typed,
//! possibly repeating fields. The layout is described by a schema DSL (PEST grammar); the codec
//! decodes a byte stream into live pieces and encodes them back, byte for byte.
//!
//! ## Schema DSL
//!
//! - **format**: optional settings (supported version, version field, end-of-stream sentinel)
//! - **piece**: a top-level section, decoded in declaration order
//! - **struct**: a nested-record template, used as `struct:Name`
//!
//! ## Field types
//!
//! - `u8`..`u64`, `s8`..`s64`: little-endian integers (bit width)
//! - `f32`/`f64` (also `f4`/`f8`): floats
//! - `c4`: fixed-width chars (byte count); `str16`/`str32`: signed length prefix, then bytes
//! - `256`: raw bytes (byte count)
//! - `struct:Name`: nested record
//!
//! A field may repeat (`[n]`), carry a default (`= expr`), and declare dependency hooks that run
//! when the field is constructed (before decode), committed (before encode) or refreshed.
//!
//! ## Example DSL
//!
//! ```text
//! piece Header {
//!     version: c4 = "1.40";
//!     count: u32 {
//!         on_commit: set_value(self.items) = len(x);
//!     }
//!     items: struct:Item {
//!         on_construct: set_repeat(self.count) = x;
//!     }
//!     __END_OF_FILE_MARK__: 1;
//! }
//!
//! struct Item {
//!     id: u16;
//!     name: str16 = "";
//! }
//! ```
//!
//! ## Usage
//!
//! See `tests/integration.rs` for full examples.

pub mod ast;
pub mod codec;
pub mod datatype;
pub mod dependency;
pub mod dump;
pub mod expr;
pub mod parser;
pub mod piece;
pub mod scenario;
pub mod schema;
pub mod stream;
pub mod value;

pub use codec::{Codec, CodecError, EncodedPiece, PieceDecodeResult, TrailingData};
pub use datatype::{Category, DataType};
pub use dump::dump_piece;
pub use parser::parse;
pub use piece::{Field, Piece, PieceRegistry};
pub use scenario::{decode_scenario, encode_scenario, ScenarioDecodeResult};
pub use schema::{load_schema, load_schema_str, FormatConfig, ResolvedSchema};
pub use stream::ByteStream;
pub use value::Value;
