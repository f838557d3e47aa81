/// Returns the `(major, minor, patch)` version of this build, read from
/// the crate's own `Cargo.toml` at compile time.
pub fn version() -> (u32, u32, u32) {
    (
        env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap(),
        env!("CARGO_PKG_VERSION_MINOR").parse().unwrap(),
        env!("CARGO_PKG_VERSION_PATCH").parse().unwrap(),
    )
}
