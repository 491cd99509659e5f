fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/fileformat.proto");
    println!("cargo:rerun-if-changed=proto/osmformat.proto");

    // Prefer a vendored protoc to avoid requiring a system installation.
    let protoc_path = protoc_bin_vendored::protoc_bin_path()
        .map_err(|e| format!("failed to locate vendored protoc: {e}"))?;
    std::env::set_var("PROTOC", protoc_path);

    prost_build::Config::new().compile_protos(
        &["proto/fileformat.proto", "proto/osmformat.proto"],
        &["proto/"],
    )?;

    Ok(())
}
