/// Custom uniffi-bindgen binary for generating language bindings.
///
/// Generates Python/Kotlin/Swift bindings from the compiled kvlink-uniffi
/// cdylib.
///
/// Usage:
///   cargo run -p kvlink-uniffi --features cli --bin kvlink-uniffi-bindgen -- \
///     generate --library -l python -o bindings/python \
///     target/release/libkvlink_uniffi.so
fn main() {
    uniffi::uniffi_bindgen_main();
}
