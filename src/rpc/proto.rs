//! Generated protobuf stubs for `proto/rpc.proto`, compiled by `build.rs`
//! via `prost-build`.

include!(concat!(env!("OUT_DIR"), "/fibermesh.rpc.rs"));
