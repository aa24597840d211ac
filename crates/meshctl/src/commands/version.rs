/// Print the client and protocol versions.
pub(crate) fn version() {
    println!(
        "{} {} (protocol v{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        common::protocol::PROTOCOL_VERSION
    );
}
