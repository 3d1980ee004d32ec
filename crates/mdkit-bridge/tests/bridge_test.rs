//! Integration tests driving the bridge against a real guest module.
//!
//! The guest is `fixtures/mdkit_guest.wat`; its header lists how each entry
//! point reacts to the first input byte.

use mdkit_bridge::bridge::config::ExportNames;
use mdkit_bridge::{
    Bridge, BridgeConfig, BridgeError, BridgeRuntime, Extension, Handle, StructuredValue,
};

const GUEST_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/mdkit_guest.wat");

fn bridge_with(config: BridgeConfig) -> Bridge {
    let runtime = BridgeRuntime::new(config).expect("failed to create runtime");
    let module = runtime.load_module(GUEST_PATH).expect("failed to load module");
    runtime.instantiate(&module).expect("failed to instantiate")
}

fn bridge() -> Bridge {
    bridge_with(BridgeConfig::development())
}

#[test]
fn test_load_guest_module() {
    let runtime = BridgeRuntime::new(BridgeConfig::default()).expect("failed to create runtime");
    let module = runtime.load_module(GUEST_PATH).expect("failed to load module");

    assert_eq!(module.name(), "mdkit_guest");

    let exports: Vec<&str> = module.exports().collect();
    for name in [
        "__wbindgen_malloc",
        "__wbindgen_realloc",
        "__wbindgen_free",
        "markdown_to_ast",
        "markdown_to_html",
    ] {
        assert!(exports.contains(&name), "should export '{}'", name);
    }
}

#[test]
fn test_reference_table_constants() {
    let bridge = bridge();
    let table = bridge.table();

    assert_eq!(bridge.table_len(), 4);
    assert_eq!(table.resolve(Handle::UNDEFINED).unwrap(), StructuredValue::Undefined);
    assert_eq!(table.resolve(Handle::NULL).unwrap(), StructuredValue::Null);
    assert_eq!(table.resolve(Handle::TRUE).unwrap(), StructuredValue::Bool(true));
    assert_eq!(table.resolve(Handle::FALSE).unwrap(), StructuredValue::Bool(false));
}

#[test]
fn test_parse_empty_input() {
    let mut bridge = bridge();
    let value = bridge.parse_structured("").expect("parse failed");
    assert_eq!(value, StructuredValue::Array(Vec::new()));
    assert!(value.is_empty());
}

#[test]
fn test_parse_builds_nodes_through_intrinsics() {
    let mut bridge = bridge();
    let value = bridge.parse_structured("héllo wörld 🎉").expect("parse failed");

    let node = value.at(0).expect("one node");
    assert_eq!(node.get("type").and_then(|v| v.as_str()), Some("text"));
    assert_eq!(node.get("content").and_then(|v| v.as_str()), Some("héllo wörld 🎉"));
    assert_eq!(
        node.get("length").and_then(|v| v.as_f64()),
        Some("héllo wörld 🎉".len() as f64)
    );
    assert!(bridge.table_len() > 4);
}

#[test]
fn test_parse_map_preserves_insertion_order() {
    let mut bridge = bridge();
    let value = bridge.parse_structured("# heading").expect("parse failed");

    assert_eq!(
        value,
        StructuredValue::Map(vec![
            (StructuredValue::String("a".into()), StructuredValue::Number(1.0)),
            (StructuredValue::String("b".into()), StructuredValue::Number(2.0)),
        ])
    );
    assert_eq!(value.to_json(), serde_json::json!({"a": 1, "b": 2}));
}

#[test]
fn test_parse_scalars_and_constants() {
    let mut bridge = bridge();
    let value = bridge.parse_structured("$").expect("parse failed");

    assert_eq!(
        value,
        StructuredValue::Array(vec![
            StructuredValue::Error("nested".into()),
            StructuredValue::Bool(true),
            StructuredValue::Bool(false),
            StructuredValue::BigInt(u64::MAX),
            StructuredValue::Null,
            StructuredValue::Undefined,
        ])
    );
}

#[test]
fn test_parse_raise_surfaces_message_verbatim() {
    let mut bridge = bridge();
    let err = bridge.parse_structured("!unterminated emphasis").unwrap_err();
    assert_eq!(err, BridgeError::ModuleRaised("!unterminated emphasis".into()));

    let stats = bridge.alloc_stats();
    assert_eq!(stats.places, 1);
    assert_eq!(stats.releases, 1);
}

#[test]
fn test_parse_rejects_invalid_guest_text() {
    let mut bridge = bridge();
    let err = bridge.parse_structured("~").unwrap_err();
    assert!(matches!(err, BridgeError::Decode { valid_up_to: 0, len: 2 }));
    assert_eq!(bridge.alloc_stats().outstanding(), 0);
}

#[test]
fn test_parse_reports_guest_misuse() {
    let mut bridge = bridge();
    assert_eq!(
        bridge.parse_structured("?").unwrap_err(),
        BridgeError::InvalidHandle(9999)
    );
    assert!(matches!(
        bridge.parse_structured("@").unwrap_err(),
        BridgeError::CyclicValue(_)
    ));
}

#[test]
fn test_parse_bounds_deep_and_shared_values() {
    let mut bridge = bridge_with(BridgeConfig::development().max_nodes(10_000));
    assert_eq!(
        bridge.parse_structured("^").unwrap_err(),
        BridgeError::ValueTooDeep { max_depth: 128 }
    );
    assert_eq!(
        bridge.parse_structured("%").unwrap_err(),
        BridgeError::ValueTooLarge { max_nodes: 10_000 }
    );

    // The bridge stays usable and the staged input was still released.
    let stats = bridge.alloc_stats();
    assert_eq!(stats.places, stats.releases);
    assert!(bridge.parse_structured("plain").is_ok());
}

#[test]
fn test_transform_round_trip() {
    let mut bridge = bridge();
    assert_eq!(bridge.transform_text("hello").unwrap(), "<p>hello</p>");
    assert_eq!(
        bridge.transform_text("héllo wörld 🎉").unwrap(),
        "<p>héllo wörld 🎉</p>"
    );
    assert_eq!(bridge.transform_text("").unwrap(), "<p></p>");

    let stats = bridge.alloc_stats();
    assert_eq!(stats.places, 3);
    assert_eq!(stats.releases, 3);
    assert_eq!(stats.reclaims, 3);
}

#[test]
fn test_transform_raise_releases_input() {
    let mut bridge = bridge();
    let err = bridge.transform_text("!boom").unwrap_err();
    assert_eq!(err, BridgeError::ModuleRaised("render refused input".into()));
    assert_eq!(err.to_string(), "render refused input");

    let stats = bridge.alloc_stats();
    assert_eq!(stats.places, stats.releases);
    assert_eq!(stats.reclaims, 0);
}

#[test]
fn test_transform_invalid_output_is_still_freed() {
    let mut bridge = bridge();
    let err = bridge.transform_text("~").unwrap_err();
    assert!(matches!(err, BridgeError::Decode { .. }));

    let stats = bridge.alloc_stats();
    assert_eq!(stats.places, stats.releases);
    assert_eq!(stats.reclaims, 1);

    // The bridge stays usable.
    assert_eq!(bridge.transform_text("ok").unwrap(), "<p>ok</p>");
}

#[test]
fn test_memory_growth_is_transparent() {
    let mut bridge = bridge();
    let before = bridge.memory_generation();
    let initial_size = bridge.memory_size();

    let text = "é".repeat(100_000);
    let html = bridge.transform_text(&text).expect("transform failed");
    assert_eq!(html.len(), text.len() + 7);
    assert!(html.starts_with("<p>é"));
    assert!(html.ends_with("é</p>"));

    assert!(bridge.memory_size() > initial_size);
    assert!(bridge.memory_generation() > before);
}

#[test]
fn test_decoder_rotation_is_transparent() {
    let mut bridge = bridge_with(BridgeConfig::development().decode_ceiling(64));

    for i in 0..16 {
        let text = format!("paragraph {} with ünïcode", i);
        assert_eq!(bridge.transform_text(&text).unwrap(), format!("<p>{}</p>", text));
    }
    assert!(bridge.decoder_rotations() > 0);
}

#[test]
fn test_guest_without_reallocator() {
    let config = BridgeConfig::development()
        .exports(ExportNames::default().realloc("__absent_realloc"));
    let mut bridge = bridge_with(config);
    assert!(!bridge.has_realloc());

    assert_eq!(bridge.transform_text("naïve").unwrap(), "<p>naïve</p>");
    assert_eq!(bridge.alloc_stats().extensions, 0);
}

#[test]
fn test_memory_limit_surfaces_as_allocation_failure() {
    let mut bridge = bridge_with(BridgeConfig::development().max_memory(2 * 65536));
    let err = bridge.transform_text(&"x".repeat(200_000)).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::AllocationFailure { requested: 200_000, .. }
    ));
    assert_eq!(bridge.alloc_stats().places, 0);
}

#[test]
fn test_missing_export_is_reported() {
    let runtime = BridgeRuntime::new(BridgeConfig::development()).unwrap();
    let module = runtime
        .load_module_bytes(
            "partial",
            r#"(module
                (memory (export "memory") 1)
                (func (export "__wbindgen_malloc") (param i32 i32) (result i32) i32.const 8)
                (func (export "__wbindgen_free") (param i32 i32 i32))
                (func (export "markdown_to_ast") (param i32 i32) (result i32) i32.const 0))"#,
        )
        .unwrap();

    let err = runtime.instantiate(&module).unwrap_err();
    assert_eq!(err, BridgeError::MissingExport("markdown_to_html".into()));
}

#[test]
fn test_custom_entry_point_names() {
    let config = BridgeConfig::development()
        .exports(ExportNames::default().parse("parse_md").render("render_md"));
    let runtime = BridgeRuntime::new(config).unwrap();
    let module = runtime.load_module(GUEST_PATH).unwrap();

    let err = runtime.instantiate(&module).unwrap_err();
    assert_eq!(err, BridgeError::MissingExport("parse_md".into()));
}

struct HeadingOnly;

impl Extension for HeadingOnly {
    fn name(&self) -> &'static str {
        "heading-only"
    }

    fn preprocess(&self, input: &str) -> Option<String> {
        (!input.starts_with('#')).then(|| format!("# {}", input))
    }

    fn postprocess(&self, value: &mut StructuredValue) {
        if let StructuredValue::Map(entries) = value {
            entries.retain(|(key, _)| key.as_str() != Some("b"));
        }
    }
}

#[test]
fn test_extensions_wrap_parse() {
    let mut bridge = bridge().with_extension(HeadingOnly);
    let value = bridge.parse_structured("plain").expect("parse failed");
    assert_eq!(value.to_json(), serde_json::json!({"a": 1}));

    // Render bypasses extensions.
    assert_eq!(bridge.transform_text("plain").unwrap(), "<p>plain</p>");
}
