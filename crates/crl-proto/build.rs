fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only client stubs are generated: the server side of each RPC is owned
    // by the external storage-authority, CA, and publisher services.
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile(&["proto/crl.proto"], &["proto/"])?;
    Ok(())
}
