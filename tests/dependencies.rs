//! Dependency hooks: construct/commit/refresh phases, cross-piece targets, formulas.

use piececodec::{decode_scenario, load_schema_str, Codec, CodecError, Value};

fn codec(src: &str) -> Codec {
    Codec::new(load_schema_str(src).expect("schema"))
}

#[test]
fn construct_and_refresh_recompute_from_target() {
    let codec = codec(
        r#"
piece P {
	b: u32;
	a: u32 {
		on_construct: set_value(self.b) = x * 2;
		on_refresh: set_value(self.b) = x * 2;
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    registry.set_values("P", vec![Value::U32(21), Value::U32(0)]).expect("set");
    assert_eq!(registry.get("P").unwrap().get("a"), Some(&Value::I64(42)));

    registry.get_mut("P").unwrap().set("b", Value::U32(5)).unwrap();
    assert_eq!(registry.get("P").unwrap().get("a"), Some(&Value::I64(42)));
    registry.refresh("P", "a").expect("refresh");
    assert_eq!(registry.get("P").unwrap().get("a"), Some(&Value::I64(10)));
}

#[test]
fn refresh_self_runs_refresh_hooks() {
    let codec = codec(
        r#"
piece P {
	b: u8;
	a: u8 {
		on_construct: refresh_self;
		on_refresh: set_value(self.b) = x + 1;
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    registry.set_values("P", vec![Value::U8(1), Value::U8(0)]).expect("set");
    assert_eq!(registry.get("P").unwrap().get("a"), Some(&Value::I64(2)));
}

#[test]
fn repeat_count_from_another_piece() {
    let codec = codec(
        r#"
piece A {
	n: u8;
}
piece B {
	items: u8 {
		on_construct: set_repeat(A.n) = x;
	}
	__END_OF_FILE_MARK__: 1;
}
"#,
    );
    let result = decode_scenario(&codec, [&[2u8, 7, 8][..]]).expect("decode");
    let b = result.registry.get("B").unwrap();
    assert_eq!(b.get("items"), Some(&Value::List(vec![Value::U8(7), Value::U8(8)])));
    assert_eq!(b.field("items").unwrap().repeat, 2);

    let result = decode_scenario(&codec, [&[0u8][..]]).expect("decode");
    assert_eq!(result.registry.get("B").unwrap().get("items"), Some(&Value::List(vec![])));
}

#[test]
fn commit_refreshes_field_in_other_piece() {
    let codec = codec(
        r#"
piece A {
	base: u8;
	total: u8 {
		on_refresh: set_value(self.base) = x + 1;
	}
}
piece B {
	items: u8 {
		on_commit: refresh(A.total);
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    registry.get_mut("A").unwrap().set("base", Value::U8(9)).unwrap();
    registry.get_mut("B").unwrap().set("items", Value::U8(1)).unwrap();
    codec.encode_piece(&mut registry, "B").expect("encode");
    assert_eq!(registry.get("A").unwrap().get("total"), Some(&Value::I64(10)));
}

#[test]
fn other_pieces_read_the_piece_being_encoded() {
    let codec = codec(
        r#"
piece A {
	total: u8 {
		on_refresh: set_value(B.items) = x;
	}
}
piece B {
	items: u8 {
		on_commit: refresh(A.total);
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    registry.get_mut("B").unwrap().set("items", Value::U8(1)).unwrap();
    let encoded = codec.encode_piece(&mut registry, "B").expect("encode");
    assert_eq!(encoded.bytes, vec![1]);
    assert_eq!(registry.get("A").unwrap().get("total"), Some(&Value::U8(1)));
    assert!(registry.get("B").is_some());
}

#[test]
fn piece_being_encoded_cannot_be_refreshed_from_elsewhere() {
    let codec = codec(
        r#"
piece A {
	total: u8 {
		on_refresh: refresh(B.items);
	}
}
piece B {
	items: u8 {
		on_commit: refresh(A.total);
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    registry.get_mut("B").unwrap().set("items", Value::U8(1)).unwrap();
    let err = codec.encode_piece(&mut registry, "B").unwrap_err();
    assert!(matches!(err, CodecError::Schema(_)), "{:?}", err);
    // Both pieces are back in the registry after the failure.
    assert!(registry.get("A").is_some());
    assert!(registry.get("B").is_some());
}

const OWNER_SCHEMA: &str = r#"
piece Header {
	count: u8;
	players: struct:Player;
}

struct Player {
	id: u8;
	slot: u8 = Header.count;
}
"#;

#[test]
fn nested_default_reads_the_enclosing_piece() {
    let codec = codec(OWNER_SCHEMA);
    let mut registry = codec.new_registry();
    let player_id = codec.schema().struct_id("Player").expect("Player");
    let mut player = codec.schema().instantiate_struct(player_id);
    player.set("id", Value::U8(5)).unwrap();
    let header = registry.get_mut("Header").unwrap();
    header.set("count", Value::U8(3)).unwrap();
    header.set("players", Value::Struct(Box::new(player))).unwrap();

    let encoded = codec.encode_piece(&mut registry, "Header").expect("encode");
    assert_eq!(encoded.bytes, vec![3, 5, 3]);

    // The filled-in default stays on the record; later edits go through as_piece_mut.
    let header = registry.get_mut("Header").unwrap();
    let players = header.field_mut("players").unwrap().value.as_mut().unwrap();
    let player = players.as_piece_mut().expect("struct");
    assert_eq!(player.get("slot"), Some(&Value::U8(3)));
    player.set("slot", Value::U8(9)).unwrap();
    let encoded = codec.encode_piece(&mut registry, "Header").expect("encode");
    assert_eq!(encoded.bytes, vec![3, 5, 9]);
}

#[test]
fn nested_hooks_read_the_piece_being_decoded() {
    let codec = codec(
        r#"
piece Header {
	count: u8;
	players: struct:Player;
}

struct Player {
	id: u8;
	tags: u8 {
		on_construct: set_repeat(Header.count) = x;
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    codec
        .decode_piece_bytes(&mut registry, "Header", &[2, 7, 10, 11])
        .expect("decode");
    let header = registry.get("Header").unwrap();
    let player = header.get("players").unwrap().as_piece().expect("struct");
    assert_eq!(player.get("id"), Some(&Value::U8(7)));
    assert_eq!(player.get("tags"), Some(&Value::List(vec![Value::U8(10), Value::U8(11)])));

    let encoded = codec.encode_piece(&mut registry, "Header").expect("encode");
    assert_eq!(encoded.bytes, vec![2, 7, 10, 11]);
}

#[test]
fn commit_count_from_sequence_length() {
    let codec = codec(
        r#"
piece P {
	count: u16 {
		on_commit: set_value(self.items) = len(x);
	}
	items: u8 {
		on_construct: set_repeat(self.count) = x;
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    registry
        .get_mut("P")
        .unwrap()
        .set("items", Value::List(vec![Value::U8(4), Value::U8(5), Value::U8(6)]))
        .unwrap();
    let encoded = codec.encode_piece(&mut registry, "P").expect("encode");
    assert_eq!(encoded.bytes, vec![3, 0, 4, 5, 6]);

    let mut fresh = codec.new_registry();
    codec.decode_piece_bytes(&mut fresh, "P", &encoded.bytes).expect("decode");
    assert_eq!(fresh.get("P").unwrap().get("items"), registry.get("P").unwrap().get("items"));
}

#[test]
fn positional_destructuring_and_constants() {
    let codec = codec(
        r#"
piece P {
	pair: u16 [2];
	packed: u32 {
		on_commit: set_value(self.pair) as (hi, lo) = hi * k + lo where k = 256;
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    registry
        .get_mut("P")
        .unwrap()
        .set("pair", Value::List(vec![Value::U16(1), Value::U16(2)]))
        .unwrap();
    let encoded = codec.encode_piece(&mut registry, "P").expect("encode");
    assert_eq!(encoded.bytes, vec![1, 0, 2, 0, 2, 1, 0, 0]);
    assert!(encoded.gaps.is_empty());
}

#[test]
fn hooks_of_one_phase_all_run_in_order() {
    let codec = codec(
        r#"
piece P {
	a: u8;
	b: u8;
	out: u8 {
		on_commit: set_value(self.a) = x + 1;
		on_commit: set_value(self.out, self.b) = x * 10;
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    registry
        .set_values("P", vec![Value::U8(1), Value::U8(3), Value::U8(0)])
        .expect("set");
    let encoded = codec.encode_piece(&mut registry, "P").expect("encode");
    // a + 1 = 2, then out * 10 = 20, then b * 10 = 30.
    assert_eq!(encoded.bytes, vec![1, 3, 30]);
}

#[test]
fn negative_repeat_count_is_an_expression_error() {
    let codec = codec(
        r#"
piece P {
	n: s8;
	items: u8 {
		on_construct: set_repeat(self.n) = x;
	}
}
"#,
    );
    let mut registry = codec.new_registry();
    let err = codec.decode_piece_bytes(&mut registry, "P", &[0xff]).unwrap_err();
    assert!(matches!(err, CodecError::Expression(_)), "{:?}", err);
}

#[test]
fn bulk_set_arity_is_checked() {
    let codec = codec("piece P {\n\ta: u8;\n\tb: u8;\n}\n");
    let mut registry = codec.new_registry();
    let err = registry.set_values("P", vec![Value::U8(1)]).unwrap_err();
    assert!(matches!(err, CodecError::Schema(_)));
    assert!(registry.get("P").unwrap().get("a").is_none());
}
