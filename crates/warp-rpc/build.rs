fn main() {
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", path);
        }
    }

    let mut config = tonic_prost_build::Config::new();

    // Raster payloads are large; decode them as `Bytes` so the transport
    // buffer is shared instead of copied into a Vec per granule.
    config.bytes([".warprpc.RasterPayload.data"]);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/warp.proto"], &["proto"])
        .unwrap();
}
