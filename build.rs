fn main() {
    println!("cargo:rerun-if-changed=proto/rpc.proto");
    prost_build::compile_protos(&["proto/rpc.proto"], &["proto/"])
        .expect("failed to compile proto/rpc.proto");
}
