fn main() {
    // The enif_* symbols only exist once the BEAM loads the library, so the
    // macOS linker must be told to leave them unresolved.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        println!("cargo:rustc-link-arg=-undefined");
        println!("cargo:rustc-link-arg=dynamic_lookup");
    }
}
