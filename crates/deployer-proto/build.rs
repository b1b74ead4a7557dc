fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc so builds have no system dependency.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/deployer.proto"], &["proto"])?;

    Ok(())
}
