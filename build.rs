// The generated stubs are checked in under proto/, so a plain build does not
// need protoc. Set MRJOBS_REGEN_PROTO=1 after editing proto/mr.proto.
fn main() {
    let proto_files = &["proto/mr.proto"];
    let dirs = &["."];

    // recompile protobufs only if any of the proto files changes.
    for file in proto_files {
        println!("cargo:rerun-if-changed={}", file);
    }
    println!("cargo:rerun-if-env-changed=MRJOBS_REGEN_PROTO");

    if std::env::var_os("MRJOBS_REGEN_PROTO").is_none() {
        return;
    }

    tonic_build::configure()
        .out_dir("proto")
        .build_client(true)
        .build_server(true)
        .compile(proto_files, dirs)
        .unwrap_or_else(|e| panic!("protobuf compilation failed: {}", e));
}
