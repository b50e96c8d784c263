//! Build script for compiling protobuf definitions

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().compile_protos(&["../../proto/engine.proto"], &["../../proto"])?;

    Ok(())
}
