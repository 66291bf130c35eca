// build.rs
use tonic_prost_build::configure;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Compile node-to-node protocols
    configure()
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(
            &[
                "proto/common.proto",
                "proto/node.proto",
                "proto/file_service.proto",
            ],
            &["proto/"],
        )?;

    Ok(())
}
